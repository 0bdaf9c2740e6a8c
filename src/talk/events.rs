//! Pull-based notifications from the controller to the presentation layer.
//!
//! Every event is handed out exactly once. Caption updates are latest-wins
//! (only the newest pending caption matters); abort notices queue up to a
//! fixed depth and the oldest is dropped on overflow.

use std::collections::VecDeque;

use crate::speech::AbortNotice;

const ABORT_CAPACITY: usize = 4;

#[derive(Debug, Default)]
pub struct PresentationEvents {
    bubble: Option<String>,
    aborts: VecDeque<AbortNotice>,
}

impl PresentationEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the visible caption. An empty string clears it.
    pub fn push_bubble(&mut self, text: impl Into<String>) {
        self.bubble = Some(text.into());
    }

    pub fn push_abort(&mut self, request_id: u32, reason: &str) {
        if self.aborts.len() >= ABORT_CAPACITY {
            if let Some(dropped) = self.aborts.pop_front() {
                log::warn!("talk: abort queue full, dropped id={}", dropped.request_id);
            }
        }
        self.aborts.push_back(AbortNotice {
            request_id,
            reason: reason.to_string(),
        });
    }

    pub fn take_bubble(&mut self) -> Option<String> {
        self.bubble.take()
    }

    pub fn take_abort(&mut self) -> Option<AbortNotice> {
        self.aborts.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bubble_is_latest_wins_and_delivered_once() {
        let mut ev = PresentationEvents::new();
        ev.push_bubble("first");
        ev.push_bubble("second");
        assert_eq!(ev.take_bubble().as_deref(), Some("second"));
        assert_eq!(ev.take_bubble(), None);
    }

    #[test]
    fn aborts_are_fifo_and_bounded() {
        let mut ev = PresentationEvents::new();
        for id in 1..=5 {
            ev.push_abort(id, "timeout");
        }
        let ids: Vec<u32> = std::iter::from_fn(|| ev.take_abort())
            .map(|a| a.request_id)
            .collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
        assert_eq!(ev.take_abort(), None);
    }
}
