//! # Activity Tracking
//!
//! Deadlock detection for the process director. Every actor owns an
//! [`Activity`] flag that is raised while the actor is parked in a receiver
//! wait (an empty `get`, a trigger wait, or a `put` on a full bounded queue).
//! The party that satisfies the wait (the producer that enqueues, the consumer
//! that frees a slot, or whoever closes the receiver) lowers the flag while
//! still holding the receiver lock, before the parked task has even been
//! polled again. So "every live actor is blocked" can only be observed when no
//! actor is able to make progress.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActivityCounts {
    pub active: usize,
    pub blocked: usize,
}

/// Aggregates the activity flags of every actor taking part in a run.
///
/// Besides receiver waits, an actor whose `prefire` declined can park here
/// until some other actor makes progress. Progress is counted in an epoch
/// that is bumped whenever a firing completes, a message is enqueued or an
/// actor retires; a bump releases every parked actor under the same lock, so
/// a parked actor never counts as blocked once there is news for it.
#[derive(Debug, Default)]
pub struct ActivityMonitor {
    state: Mutex<MonitorState>,
    changed: Notify,
}

#[derive(Debug, Default)]
struct MonitorState {
    counts: ActivityCounts,
    epoch: u64,
    /// Actors parked in [`ActivityMonitor::wait_for_progress`].
    parked: usize,
    quiesced: bool,
}

impl MonitorState {
    fn unpark_all(&mut self) {
        self.counts.blocked = self.counts.blocked.saturating_sub(self.parked);
        self.parked = 0;
    }
}

impl ActivityMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn counts(&self) -> ActivityCounts {
        self.lock().counts
    }

    pub fn set_active(&self, active: usize) {
        self.update(|s| s.counts.active = active);
    }

    /// Removes a finished actor from the live set.
    pub fn retire(&self) {
        self.update(|s| {
            s.counts.active = s.counts.active.saturating_sub(1);
            s.epoch += 1;
            s.unpark_all();
        });
    }

    /// Current progress epoch.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Records that some actor made progress and wakes every parked actor.
    pub fn note_progress(&self) {
        self.update(|s| {
            s.epoch += 1;
            s.unpark_all();
        });
    }

    /// Gives up on parked actors: every current and future
    /// [`wait_for_progress`](Self::wait_for_progress) returns false.
    pub fn quiesce(&self) {
        self.update(|s| {
            s.quiesced = true;
            s.unpark_all();
        });
    }

    pub fn is_quiesced(&self) -> bool {
        self.lock().quiesced
    }

    fn block(&self) {
        self.update(|s| s.counts.blocked += 1);
    }

    fn unblock(&self) {
        self.update(|s| s.counts.blocked = s.counts.blocked.saturating_sub(1));
    }

    fn update(&self, f: impl FnOnce(&mut MonitorState)) {
        {
            let mut state = self.lock();
            f(&mut state);
        }
        self.changed.notify_waiters();
    }

    pub fn is_deadlocked(&self) -> bool {
        let counts = self.counts();
        counts.active > 0 && counts.blocked >= counts.active
    }

    /// Resolves once every live actor is blocked.
    pub async fn deadlocked(&self) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if self.is_deadlocked() {
                return;
            }
            changed.await;
        }
    }

    /// Parks the caller, counted as blocked, until the epoch moves past
    /// `seen` (`true`) or the run is quiesced (`false`).
    pub async fn wait_for_progress(&self, seen: u64) -> bool {
        {
            let mut state = self.lock();
            if state.quiesced {
                return false;
            }
            if state.epoch > seen {
                return true;
            }
            state.parked += 1;
            state.counts.blocked += 1;
        }
        self.changed.notify_waiters();
        let _parked = Parked {
            monitor: self,
            epoch: seen,
        };

        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            {
                let state = self.lock();
                if state.quiesced {
                    return false;
                }
                if state.epoch > seen {
                    return true;
                }
            }
            changed.await;
        }
    }
}

/// Takes a parked actor back out of the blocked count when its wait is
/// dropped before anything released it.
struct Parked<'a> {
    monitor: &'a ActivityMonitor,
    epoch: u64,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        let released = {
            let mut state = self.monitor.lock();
            if state.epoch == self.epoch && !state.quiesced && state.parked > 0 {
                state.parked -= 1;
                state.counts.blocked = state.counts.blocked.saturating_sub(1);
                true
            } else {
                false
            }
        };
        if released {
            self.monitor.changed.notify_waiters();
        }
    }
}

/// Blocked/unblocked flag of a single actor.
#[derive(Debug, Default)]
pub struct Activity {
    inner: Mutex<ActivityState>,
}

#[derive(Debug, Default)]
struct ActivityState {
    blocked: bool,
    monitor: Option<Arc<ActivityMonitor>>,
}

impl Activity {
    /// An activity flag that reports to no monitor.
    pub fn detached() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, monitor: Arc<ActivityMonitor>) {
        let mut state = self.lock();
        state.blocked = false;
        state.monitor = Some(monitor);
    }

    pub fn detach(&self) {
        let mut state = self.lock();
        state.blocked = false;
        state.monitor = None;
    }

    pub fn is_blocked(&self) -> bool {
        self.lock().blocked
    }

    /// Reports progress to the attached monitor, if any.
    pub(crate) fn note_progress(&self) {
        if let Some(monitor) = &self.lock().monitor {
            monitor.note_progress();
        }
    }

    /// Marks the actor as parked. Idempotent while already blocked.
    pub(crate) fn enter_wait(&self) {
        let mut state = self.lock();
        if !state.blocked {
            state.blocked = true;
            if let Some(monitor) = &state.monitor {
                monitor.block();
            }
        }
    }

    /// Marks the actor as runnable. Idempotent while already runnable.
    pub(crate) fn release(&self) {
        let mut state = self.lock();
        if state.blocked {
            state.blocked = false;
            if let Some(monitor) = &state.monitor {
                monitor.unblock();
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ActivityState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_enter_and_release_are_idempotent() {
        let monitor = ActivityMonitor::new();
        let activity = Activity::detached();
        activity.attach(monitor.clone());
        monitor.set_active(2);

        activity.enter_wait();
        activity.enter_wait();
        assert_eq!(monitor.counts().blocked, 1);

        activity.release();
        activity.release();
        assert_eq!(monitor.counts().blocked, 0);
    }

    #[test]
    fn test_deadlock_requires_all_live_actors_blocked() {
        let monitor = ActivityMonitor::new();
        let a = Activity::detached();
        let b = Activity::detached();
        a.attach(monitor.clone());
        b.attach(monitor.clone());
        monitor.set_active(2);

        a.enter_wait();
        assert!(!monitor.is_deadlocked());
        b.enter_wait();
        assert!(monitor.is_deadlocked());

        b.release();
        assert!(!monitor.is_deadlocked());

        // b finishes; a is now the only live actor and it is still parked
        monitor.retire();
        assert!(monitor.is_deadlocked());
    }

    #[test]
    fn test_detached_activity_reports_nowhere() {
        let activity = Activity::detached();
        activity.enter_wait();
        assert!(activity.is_blocked());
        activity.release();
        assert!(!activity.is_blocked());
    }

    #[tokio::test]
    async fn test_parked_actor_counts_as_blocked_until_progress() {
        let monitor = ActivityMonitor::new();
        monitor.set_active(2);
        let seen = monitor.epoch();

        let parked = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_for_progress(seen).await })
        };
        while monitor.counts().blocked == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!monitor.is_deadlocked());

        monitor.note_progress();
        // released synchronously, before the parked task runs again
        assert_eq!(monitor.counts().blocked, 0);
        assert!(tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap());
    }

    #[tokio::test]
    async fn test_progress_before_parking_returns_immediately() {
        let monitor = ActivityMonitor::new();
        monitor.set_active(1);
        let seen = monitor.epoch();
        monitor.note_progress();

        assert!(monitor.wait_for_progress(seen).await);
        assert_eq!(monitor.counts().blocked, 0);
    }

    #[tokio::test]
    async fn test_quiesce_releases_parked_actors() {
        let monitor = ActivityMonitor::new();
        monitor.set_active(1);
        let seen = monitor.epoch();

        let parked = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_for_progress(seen).await })
        };
        tokio::time::timeout(Duration::from_secs(1), monitor.deadlocked())
            .await
            .expect("a lone parked actor is a deadlock");

        monitor.quiesce();
        assert!(!tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap());
        assert_eq!(monitor.counts().blocked, 0);
        assert!(!monitor.wait_for_progress(monitor.epoch()).await);
    }

    #[tokio::test]
    async fn test_dropped_wait_leaves_the_blocked_count() {
        let monitor = ActivityMonitor::new();
        monitor.set_active(1);
        let seen = monitor.epoch();
        {
            let wait = monitor.wait_for_progress(seen);
            tokio::pin!(wait);
            assert!(tokio::time::timeout(Duration::from_millis(10), wait.as_mut())
                .await
                .is_err());
            assert_eq!(monitor.counts().blocked, 1);
        }
        assert_eq!(monitor.counts().blocked, 0);
    }

    #[tokio::test]
    async fn test_deadlocked_future_resolves_on_last_block() {
        let monitor = ActivityMonitor::new();
        let activity = Activity::detached();
        activity.attach(monitor.clone());
        monitor.set_active(1);

        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.deadlocked().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        activity.enter_wait();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("deadlock was not reported")
            .unwrap();
    }
}
