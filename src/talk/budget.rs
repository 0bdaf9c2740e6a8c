//! Time budget arithmetic for one conversation cycle.
//!
//! Transcription and answer generation share one overall deadline. Each call
//! gets `min(own ceiling, deadline - elapsed - margin)`, and a call whose
//! share falls below the floor is not made at all.

use std::time::Duration;

use crate::config::TalkConfig;

/// Time left before `deadline - margin`, zero once it has passed.
pub fn remaining_budget(elapsed: Duration, deadline: Duration, margin: Duration) -> Duration {
    deadline.saturating_sub(elapsed).saturating_sub(margin)
}

/// Timeout for the next external call, or `None` when it should be skipped.
///
/// ```rust
/// use std::time::Duration;
/// use tap_talk::config::TalkConfig;
/// use tap_talk::talk::budget::call_timeout;
///
/// let cfg = TalkConfig::default();
/// let t = call_timeout(Duration::from_millis(10_000), Duration::from_millis(19_000), &cfg);
/// assert_eq!(t, Some(Duration::from_millis(750)));
/// ```
pub fn call_timeout(ceiling: Duration, elapsed: Duration, cfg: &TalkConfig) -> Option<Duration> {
    let remaining = remaining_budget(
        elapsed,
        Duration::from_millis(cfg.overall_deadline_ms),
        Duration::from_millis(cfg.overall_margin_ms),
    );
    let timeout = ceiling.min(remaining);
    if timeout < Duration::from_millis(cfg.call_floor_ms) {
        None
    } else {
        Some(timeout)
    }
}

/// Ceiling on waiting for the answer to finish playing:
/// `clamp(base + per_byte * len, min, max)`.
pub fn hard_timeout(len_bytes: usize, cfg: &TalkConfig) -> Duration {
    let scaled = cfg
        .speak_timeout_per_byte_ms
        .saturating_mul(len_bytes as u64)
        .saturating_add(cfg.speak_timeout_base_ms);
    let min = cfg.speak_timeout_min_ms;
    let max = cfg.speak_timeout_max_ms.max(min);
    Duration::from_millis(scaled.clamp(min, max))
}
