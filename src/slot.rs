//! One-shot result cell for work dispatched to a background worker.
//!
//! A [`BackgroundSlot`] is created when work is dispatched and drained by the
//! cooperative tick with [`try_take`](BackgroundSlot::try_take), which never
//! blocks. Each slot yields its payload at most once. Dropping a slot (for
//! example because a newer dispatch superseded it) aborts the worker task and
//! discards whatever it would have produced.
//!
//! ```rust
//! use tap_talk::slot::{BackgroundSlot, SlotPoll};
//!
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let mut slot = BackgroundSlot::spawn(rt.handle(), 7, async { 40 + 2 });
//! let value = loop {
//!     match slot.try_take() {
//!         SlotPoll::Ready(v) => break v,
//!         SlotPoll::Pending => std::thread::sleep(std::time::Duration::from_millis(1)),
//!         SlotPoll::Lost => unreachable!(),
//!     }
//! };
//! assert_eq!(value, 42);
//! assert_eq!(slot.token(), 7);
//! ```

use std::future::Future;

use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;

/// Outcome of a non-blocking poll.
#[derive(Debug, PartialEq, Eq)]
pub enum SlotPoll<T> {
    /// Worker still running.
    Pending,
    Ready(T),
    /// Worker ended without a result (panicked or aborted), or the payload
    /// was already taken.
    Lost,
}

pub struct BackgroundSlot<T> {
    token: u32,
    rx: Option<oneshot::Receiver<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> BackgroundSlot<T> {
    /// Run `work` on `handle` and return the slot its result will land in.
    pub fn spawn<F>(handle: &Handle, token: u32, work: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = handle.spawn(async move {
            // Receiver gone means the slot was superseded.
            let _ = tx.send(work.await);
        });
        Self {
            token,
            rx: Some(rx),
            task,
        }
    }

    /// Same as [`spawn`](Self::spawn) for blocking work.
    pub fn spawn_blocking<F>(handle: &Handle, token: u32, work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task = handle.spawn_blocking(move || {
            let _ = tx.send(work());
        });
        Self {
            token,
            rx: Some(rx),
            task,
        }
    }
}

impl<T> BackgroundSlot<T> {
    pub fn try_take(&mut self) -> SlotPoll<T> {
        let Some(rx) = self.rx.as_mut() else {
            return SlotPoll::Lost;
        };
        match rx.try_recv() {
            Ok(value) => {
                self.rx = None;
                SlotPoll::Ready(value)
            }
            Err(TryRecvError::Empty) => SlotPoll::Pending,
            Err(TryRecvError::Closed) => {
                self.rx = None;
                SlotPoll::Lost
            }
        }
    }

    /// Dispatch token this slot was created with.
    pub fn token(&self) -> u32 {
        self.token
    }

    /// `true` once the payload has been taken or is known to be lost.
    pub fn is_drained(&self) -> bool {
        self.rx.is_none()
    }
}

impl<T> Drop for BackgroundSlot<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T> std::fmt::Debug for BackgroundSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSlot")
            .field("token", &self.token)
            .field("drained", &self.is_drained())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_ready<T>(slot: &mut BackgroundSlot<T>) -> T {
        for _ in 0..200 {
            match slot.try_take() {
                SlotPoll::Ready(v) => return v,
                SlotPoll::Pending => tokio::time::sleep(Duration::from_millis(5)).await,
                SlotPoll::Lost => panic!("slot lost"),
            }
        }
        panic!("slot never became ready");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn result_is_delivered_exactly_once() {
        let mut slot = BackgroundSlot::spawn(&Handle::current(), 1, async { "done" });
        assert_eq!(wait_ready(&mut slot).await, "done");
        assert!(slot.is_drained());
        assert_eq!(slot.try_take(), SlotPoll::Lost);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_until_worker_finishes() {
        let mut slot = BackgroundSlot::spawn(&Handle::current(), 2, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            5
        });
        assert_eq!(slot.try_take(), SlotPoll::Pending);
        assert_eq!(wait_ready(&mut slot).await, 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panicking_worker_is_lost() {
        let mut slot: BackgroundSlot<u8> =
            BackgroundSlot::spawn(&Handle::current(), 3, async { panic!("worker died") });
        let mut saw_lost = false;
        for _ in 0..200 {
            match slot.try_take() {
                SlotPoll::Lost => {
                    saw_lost = true;
                    break;
                }
                SlotPoll::Pending => tokio::time::sleep(Duration::from_millis(5)).await,
                SlotPoll::Ready(_) => unreachable!(),
            }
        }
        assert!(saw_lost);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropping_slot_aborts_worker() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
        let slot = BackgroundSlot::spawn(&Handle::current(), 4, async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(()).await;
        });
        drop(slot);
        // Sender dropped with the aborted task, never sent.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_work_is_delivered() {
        let mut slot = BackgroundSlot::spawn_blocking(&Handle::current(), 5, || 9_u32);
        assert_eq!(wait_ready(&mut slot).await, 9);
    }
}
