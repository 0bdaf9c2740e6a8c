//! Exclusive ownership of the single shared audio bus.
//!
//! Capture and playback run on the same physical bus and must never hold it
//! at the same time. [`AudioArbiter::acquire`] hands out an [`AudioGuard`];
//! the bus is released when the last guard of the owning thread is dropped
//! (or explicitly [`released`](AudioGuard::release)).
//!
//! # Rules
//!
//! ```text
//! free bus                       ──acquire(role)──▶ owned, depth 1
//! owned by this thread, same role──acquire(role)──▶ depth + 1
//! owned by this thread, other role──acquire──────▶ denied immediately
//! owned by another thread         ──acquire──────▶ wait ≤ timeout, then denied
//! ```
//!
//! A denied acquisition never leaves anything held: ownership is only written
//! when a guard is actually handed out, and a guard is the only way to give
//! it back. Guards are `!Send`, so they are always released by the thread
//! that took them.
//!
//! Every ownership transition is published, while the owner lock is held,
//! on a `tokio::sync::watch` channel ([`AudioArbiter::subscribe_busy`]) so CPU-heavy work elsewhere can
//! throttle itself while audio is active.

use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// The two mutually exclusive users of the audio bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Capture,
    Playback,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Capture => f.write_str("Capture"),
            Role::Playback => f.write_str("Playback"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ownership record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Ownership {
    role: Role,
    thread: ThreadId,
    callsite: &'static str,
    since: Instant,
    depth: u32,
}

/// Read-only view of the current owner, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerInfo {
    pub role: Role,
    pub callsite: &'static str,
    pub since: Instant,
    pub depth: u32,
}

struct Inner {
    owner: Mutex<Option<Ownership>>,
    freed: Condvar,
    busy: watch::Sender<bool>,
}

enum Attempt {
    Free,
    Reenter,
    Mismatch(Role),
    HeldElsewhere(Role),
}

// ---------------------------------------------------------------------------
// AudioArbiter
// ---------------------------------------------------------------------------

/// Cheap-to-clone handle to the bus arbiter; clones share one bus.
#[derive(Clone)]
pub struct AudioArbiter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AudioArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioArbiter")
            .field("owner", &self.owner())
            .field("depth", &self.depth())
            .finish()
    }
}

impl Default for AudioArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioArbiter {
    pub fn new() -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                owner: Mutex::new(None),
                freed: Condvar::new(),
                busy,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Ownership>> {
        self.inner
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Try to take the bus for `role`, waiting at most `timeout` for another
    /// thread to let go of it.
    ///
    /// Returns `None` when the wait timed out or when this thread already
    /// owns the bus for the other role.
    pub fn acquire(
        &self,
        role: Role,
        callsite: &'static str,
        timeout: Duration,
    ) -> Option<AudioGuard> {
        let me = thread::current().id();
        let t0 = Instant::now();
        let mut owner = self.lock();

        loop {
            let attempt = match owner.as_ref() {
                None => Attempt::Free,
                Some(o) if o.thread == me && o.role == role => Attempt::Reenter,
                Some(o) if o.thread == me => Attempt::Mismatch(o.role),
                Some(o) => Attempt::HeldElsewhere(o.role),
            };

            match attempt {
                Attempt::Free => {
                    *owner = Some(Ownership {
                        role,
                        thread: me,
                        callsite,
                        since: Instant::now(),
                        depth: 1,
                    });
                    // Published under the owner lock so busy never lags ownership.
                    self.inner.busy.send_replace(true);
                    drop(owner);
                    log::info!(
                        "arbiter: acquire owner={role} waited={}ms site={callsite}",
                        t0.elapsed().as_millis()
                    );
                    return Some(AudioGuard::new(self.clone(), role));
                }
                Attempt::Reenter => {
                    if let Some(o) = owner.as_mut() {
                        o.depth += 1;
                        log::debug!(
                            "arbiter: reenter owner={role} depth={} site={callsite} owner_site={}",
                            o.depth,
                            o.callsite
                        );
                    }
                    return Some(AudioGuard::new(self.clone(), role));
                }
                Attempt::Mismatch(current) => {
                    log::info!(
                        "arbiter: deny reason=reenter_mismatch cur={current} want={role} site={callsite}"
                    );
                    return None;
                }
                Attempt::HeldElsewhere(current) => {
                    let waited = t0.elapsed();
                    if waited >= timeout {
                        log::info!(
                            "arbiter: acquire_fail want={role} cur={current} waited={}ms site={callsite}",
                            waited.as_millis()
                        );
                        return None;
                    }
                    owner = self
                        .inner
                        .freed
                        .wait_timeout(owner, timeout - waited)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Drop one level of ownership held by the calling thread.
    ///
    /// Releasing a bus that is not held (depth already 0) is a logged no-op.
    fn release(&self, callsite: &'static str) {
        let me = thread::current().id();
        let mut owner = self.lock();

        let Some(o) = owner.as_mut() else {
            log::warn!("arbiter: release ignored depth=0 site={callsite}");
            return;
        };
        if o.thread != me {
            log::warn!(
                "arbiter: release ignored reason=foreign_thread owner={} site={callsite}",
                o.role
            );
            return;
        }

        o.depth -= 1;
        if o.depth > 0 {
            log::debug!("arbiter: release depth={} site={callsite}", o.depth);
            return;
        }

        let prev = o.role;
        let held = o.since.elapsed();
        *owner = None;
        self.inner.busy.send_replace(false);
        drop(owner);
        self.inner.freed.notify_all();
        log::info!(
            "arbiter: release owner={prev} held={}ms site={callsite}",
            held.as_millis()
        );
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    pub fn owner(&self) -> Option<Role> {
        self.lock().as_ref().map(|o| o.role)
    }

    pub fn owner_callsite(&self) -> Option<&'static str> {
        self.lock().as_ref().map(|o| o.callsite)
    }

    pub fn owner_since(&self) -> Option<Instant> {
        self.lock().as_ref().map(|o| o.since)
    }

    /// Nesting depth of the current owner; 0 when the bus is free.
    pub fn depth(&self) -> u32 {
        self.lock().as_ref().map_or(0, |o| o.depth)
    }

    pub fn snapshot(&self) -> Option<OwnerInfo> {
        self.lock().as_ref().map(|o| OwnerInfo {
            role: o.role,
            callsite: o.callsite,
            since: o.since,
            depth: o.depth,
        })
    }

    /// `true` while either role holds the bus.
    pub fn is_busy(&self) -> bool {
        *self.inner.busy.borrow()
    }

    /// Receiver that observes every busy/free transition.
    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.inner.busy.subscribe()
    }
}

// ---------------------------------------------------------------------------
// AudioGuard
// ---------------------------------------------------------------------------

/// Proof of bus ownership for one role. Dropping it releases one level.
#[must_use = "the audio bus is released as soon as the guard is dropped"]
pub struct AudioGuard {
    arbiter: AudioArbiter,
    role: Role,
    released: bool,
    // Ownership is bound to the acquiring thread.
    _not_send: PhantomData<*const ()>,
}

impl AudioGuard {
    fn new(arbiter: AudioArbiter, role: Role) -> Self {
        Self {
            arbiter,
            role,
            released: false,
            _not_send: PhantomData,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Release with an explicit callsite for the logs.
    pub fn release(mut self, callsite: &'static str) {
        self.released = true;
        self.arbiter.release(callsite);
    }
}

impl Drop for AudioGuard {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.arbiter.release("guard.drop");
        }
    }
}

impl std::fmt::Debug for AudioGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGuard").field("role", &self.role).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
