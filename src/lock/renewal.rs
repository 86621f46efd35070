//! Background renewal of held locks.
//!
//! Each schedule is a tokio task that renews one lock every
//! [`LockRenewalService::calculate_renewal_delay`]. The task only holds a weak
//! reference to the lock, so dropping the last handle to a lock also ends its
//! renewals at the next tick.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::IntervalLock;
use crate::time;

/// Process-local identifier of one renewal schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleId(u64);

impl std::fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "renewal-{}", self.0)
    }
}

#[derive(Default)]
pub struct LockRenewalService {
    next_id: AtomicU64,
    schedules: Mutex<HashMap<ScheduleId, JoinHandle<()>>>,
}

impl LockRenewalService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start renewing `lock` every renewal delay. The first renewal happens one
    /// delay from now.
    pub async fn schedule(&self, lock: &IntervalLock) -> ScheduleId {
        let id = ScheduleId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let delay = self.calculate_renewal_delay(lock);
        let weak = lock.downgrade();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + delay, delay);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(lock) = weak.upgrade() else {
                    debug!(schedule = %id, "lock dropped, ending renewal schedule");
                    break;
                };
                trace!(schedule = %id, lease = ?lock.lease_name(), "renewing lease");
                // Failures are logged by the lock; the schedule keeps going.
                lock.scheduled_renewal().await;
            }
        });

        let mut schedules = self.schedules.lock().await;
        // Tasks whose lock was dropped have ended on their own.
        schedules.retain(|_, h| !h.is_finished());
        schedules.insert(id, handle);
        debug!(schedule = %id, delay_ms = delay.as_millis() as u64, active = schedules.len(), "scheduled lease renewal");
        id
    }

    pub async fn is_scheduled(&self, id: ScheduleId) -> bool {
        self.schedules
            .lock()
            .await
            .get(&id)
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop a schedule and wait until its task has been torn down.
    ///
    /// Returns whether a running schedule was stopped. Unknown or already
    /// cancelled ids return `false`.
    pub async fn cancel(&self, id: ScheduleId) -> bool {
        let handle = self.schedules.lock().await.remove(&id);
        match handle {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                // Resolves once the task future is dropped, i.e. no renewal
                // from this schedule can start after we return.
                let _ = handle.await;
                debug!(schedule = %id, was_running, "cancelled lease renewal");
                was_running
            }
            None => false,
        }
    }

    /// Cancel every outstanding schedule, used at process shutdown.
    pub async fn cancel_all(&self) -> BTreeMap<ScheduleId, bool> {
        let ids: Vec<ScheduleId> = self.schedules.lock().await.keys().copied().collect();
        let mut results = BTreeMap::new();
        for id in ids {
            results.insert(id, self.cancel(id).await);
        }
        results
    }

    /// Renewal period for `lock`, a fixed fraction of its lease duration.
    ///
    /// `IntervalLock::release` also sleeps for this long after cancelling a
    /// schedule, so a renewal request already on the wire has landed before
    /// the lease is deleted.
    pub fn calculate_renewal_delay(&self, lock: &IntervalLock) -> Duration {
        time::renewal_delay(lock.duration_secs())
    }
}
