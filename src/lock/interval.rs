//! The namespace lock state machine.
//!
//! The lock's state is never cached in-process; every operation reads the
//! lease and decides from what it finds:
//!
//! | lease                                   | acquire  | renew | release |
//! |-----------------------------------------|----------|-------|---------|
//! | absent                                  | create   | create| no-op   |
//! | expired (any holder)                    | take over| error*| delete  |
//! | held by this process                    | renew    | renew | delete  |
//! | same user+host, holder process dead     | transfer | error | error   |
//! | anyone else                             | error    | error | error   |
//!
//! (*) renew only succeeds for an expired lease still held by this process.
//!
//! All writes to an existing lease are `replace` calls carrying the
//! `resourceVersion` that was read, so two processes racing for the same
//! lease cannot both succeed.

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::ObjectMeta;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{LockError, LockHolder, LockRenewalService, ScheduleId};
use crate::k8s::{K8sBackend, K8sError};
use crate::settings::DEFAULT_LEASE_DURATION_SECS;
use crate::{keys, time};

/// Lease reads are retried this many times on 5xx responses.
const LEASE_READ_ATTEMPTS: u32 = 4;
const LEASE_READ_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Mutual-exclusion lock over one namespace, backed by a Kubernetes Lease.
///
/// Cloning is cheap and clones share the renewal schedule. Operations on one
/// lock must not overlap; the lock arbitrates between processes, not between
/// tasks of one process.
#[derive(Clone)]
pub struct IntervalLock {
    inner: Arc<LockInner>,
}

struct LockInner {
    backend: Arc<dyn K8sBackend>,
    renewal: Arc<LockRenewalService>,
    holder: LockHolder,
    /// `None` means the command needs no coordination; every operation is a no-op.
    namespace: Option<String>,
    lease_name: Option<String>,
    duration_secs: i32,
    schedule_id: Mutex<Option<ScheduleId>>,
}

/// Non-owning handle used by the renewal task.
pub(crate) struct WeakIntervalLock(Weak<LockInner>);

impl WeakIntervalLock {
    pub(crate) fn upgrade(&self) -> Option<IntervalLock> {
        self.0.upgrade().map(|inner| IntervalLock { inner })
    }
}

enum Failure {
    Acquire,
    Release,
}

impl IntervalLock {
    pub fn new(
        backend: Arc<dyn K8sBackend>,
        renewal: Arc<LockRenewalService>,
        holder: LockHolder,
        namespace: Option<String>,
        lease_name: Option<String>,
        duration_secs: Option<i32>,
    ) -> Self {
        let lease_name = lease_name.or_else(|| namespace.as_deref().map(keys::lease_name));
        Self {
            inner: Arc::new(LockInner {
                backend,
                renewal,
                holder,
                namespace,
                lease_name,
                duration_secs: duration_secs
                    .filter(|d| *d > 0)
                    .unwrap_or(DEFAULT_LEASE_DURATION_SECS),
                schedule_id: Mutex::new(None),
            }),
        }
    }

    pub fn holder(&self) -> &LockHolder {
        &self.inner.holder
    }

    pub fn namespace(&self) -> Option<&str> {
        self.inner.namespace.as_deref()
    }

    pub fn lease_name(&self) -> Option<&str> {
        self.inner.lease_name.as_deref()
    }

    pub fn duration_secs(&self) -> i32 {
        self.inner.duration_secs
    }

    /// The active renewal schedule, if any.
    pub async fn schedule_id(&self) -> Option<ScheduleId> {
        *self.inner.schedule_id.lock().await
    }

    pub(crate) fn downgrade(&self) -> WeakIntervalLock {
        WeakIntervalLock(Arc::downgrade(&self.inner))
    }

    fn target(&self) -> Option<(&str, &str)> {
        match (&self.inner.namespace, &self.inner.lease_name) {
            (Some(ns), Some(name)) => Some((ns, name)),
            _ => None,
        }
    }

    /// Acquire the lock, creating, renewing, taking over or transferring the
    /// lease as its current state allows.
    pub async fn acquire(&self) -> Result<(), LockError> {
        let Some((namespace, lease_name)) = self.target() else {
            return Ok(());
        };
        let lease = self
            .retrieve_lease(namespace, lease_name)
            .await
            .map_err(|e| self.error(Failure::Acquire, "failed to read existing lease", None, Some(e)))?;

        let Some(lease) = lease else {
            return self.create_or_renew(namespace, lease_name, None, true).await;
        };

        // Expiry and same-process ownership are checked before the
        // same-machine transfer so a live holder elsewhere is never displaced.
        if self.lease_expired(&lease) || self.held_by_self(&lease) || holder_json(&lease).is_none()
        {
            return self
                .create_or_renew(namespace, lease_name, Some(lease), true)
                .await;
        }

        if let Some(other) = holder_of(&lease) {
            if self.inner.holder.is_same_machine_identity(&other) && !other.is_process_alive() {
                return self.transfer(namespace, lease_name, lease, &other).await;
            }
        }

        let other = holder_json(&lease).map(str::to_string);
        Err(self.error(
            Failure::Acquire,
            &format!("lock already acquired by {}", describe_holder(&lease)),
            other,
            None,
        ))
    }

    /// `acquire` with failures logged and reported as `false`.
    pub async fn try_acquire(&self) -> bool {
        match self.acquire().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "try_acquire: lock not acquired");
                false
            }
        }
    }

    /// Renew the lease. Only valid while the lease is absent or held by this process.
    pub async fn renew(&self) -> Result<(), LockError> {
        self.renew_lease(true).await
    }

    /// Renewals issued by the renewal task never start a schedule: after
    /// `release` has taken the schedule id, a late renewal must not start a
    /// new one.
    async fn renew_lease(&self, ensure_schedule: bool) -> Result<(), LockError> {
        let Some((namespace, lease_name)) = self.target() else {
            return Ok(());
        };
        let lease = self
            .retrieve_lease(namespace, lease_name)
            .await
            .map_err(|e| self.error(Failure::Acquire, "failed to read existing lease", None, Some(e)))?;

        match lease {
            None => {
                self.create_or_renew(namespace, lease_name, None, ensure_schedule)
                    .await
            }
            Some(lease) if self.held_by_self(&lease) => {
                self.create_or_renew(namespace, lease_name, Some(lease), ensure_schedule)
                    .await
            }
            Some(lease) => {
                let other = holder_json(&lease).map(str::to_string);
                Err(self.error(
                    Failure::Acquire,
                    &format!("cannot renew lock held by {}", describe_holder(&lease)),
                    other,
                    None,
                ))
            }
        }
    }

    /// `renew` with failures logged and reported as `false`.
    pub async fn try_renew(&self) -> bool {
        match self.renew().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to renew lease");
                false
            }
        }
    }

    /// Renewal run by the renewal task; failures are logged, never returned.
    ///
    /// Boxed as an explicit `Send` future so the task type does not depend on
    /// the renew path, which can itself start a schedule.
    pub(crate) fn scheduled_renewal(&self) -> Pin<Box<dyn Future<Output = bool> + Send + 'static>> {
        let lock = self.clone();
        Box::pin(async move {
            match lock.renew_lease(false).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "scheduled lease renewal failed");
                    false
                }
            }
        })
    }

    /// Release the lock.
    ///
    /// Any renewal schedule is cancelled first, then the lock waits one
    /// renewal delay so a renewal already sent to the API server cannot
    /// recreate the lease after it is deleted. An absent lease is a no-op;
    /// a lease held by this process or already expired is deleted; anything
    /// else is an error.
    pub async fn release(&self) -> Result<(), LockError> {
        let scheduled = self.inner.schedule_id.lock().await.take();
        if let Some(id) = scheduled {
            self.inner.renewal.cancel(id).await;
            let settle = self.inner.renewal.calculate_renewal_delay(self);
            debug!(schedule = %id, settle_ms = settle.as_millis() as u64, "waiting out in-flight renewals");
            tokio::time::sleep(settle).await;
        }

        let Some((namespace, lease_name)) = self.target() else {
            return Ok(());
        };
        let lease = self
            .retrieve_lease(namespace, lease_name)
            .await
            .map_err(|e| self.error(Failure::Release, "failed to read existing lease", None, Some(e)))?;

        let Some(lease) = lease else {
            return Ok(());
        };

        if self.held_by_self(&lease) || self.lease_expired(&lease) {
            self.inner
                .backend
                .delete_lease(namespace, lease_name)
                .await
                .map_err(|e| self.error(Failure::Release, "failed to delete lease", None, Some(e)))?;
            info!(namespace, lease = lease_name, "lock released");
            return Ok(());
        }

        let other = holder_json(&lease).map(str::to_string);
        Err(self.error(
            Failure::Release,
            &format!("cannot release lock held by {}", describe_holder(&lease)),
            other,
            None,
        ))
    }

    /// `release` with failures logged and reported as `false`.
    pub async fn try_release(&self) -> bool {
        match self.release().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to release lock");
                false
            }
        }
    }

    /// True iff the lease exists, is not expired, and is held by this process.
    pub async fn is_acquired(&self) -> bool {
        match self.current_lease().await {
            Some(lease) => !self.lease_expired(&lease) && self.held_by_self(&lease),
            None => false,
        }
    }

    /// True iff the lease exists and is expired, whoever holds it.
    pub async fn is_expired(&self) -> bool {
        match self.current_lease().await {
            Some(lease) => self.lease_expired(&lease),
            None => false,
        }
    }

    /// Read the lease for status queries; read failures count as "no lease".
    pub async fn current_lease(&self) -> Option<Lease> {
        let (namespace, lease_name) = self.target()?;
        match self.retrieve_lease(namespace, lease_name).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(namespace, lease = lease_name, error = %e, "failed to read lease");
                None
            }
        }
    }

    async fn retrieve_lease(
        &self,
        namespace: &str,
        lease_name: &str,
    ) -> Result<Option<Lease>, K8sError> {
        let mut attempt = 1;
        loop {
            match self.inner.backend.get_lease(namespace, lease_name).await {
                Ok(lease) => return Ok(lease),
                Err(e) if e.is_transient() && attempt < LEASE_READ_ATTEMPTS => {
                    debug!(namespace, lease = lease_name, attempt, error = %e, "transient error reading lease, retrying");
                    attempt += 1;
                    tokio::time::sleep(LEASE_READ_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Create the lease, renew our own, or take over a released or expired one.
    async fn create_or_renew(
        &self,
        namespace: &str,
        lease_name: &str,
        existing: Option<Lease>,
        ensure_schedule: bool,
    ) -> Result<(), LockError> {
        let now = Utc::now();
        let result = match existing {
            None => {
                let lease = self.new_lease(namespace, lease_name, now);
                self.inner.backend.create_lease(namespace, &lease).await.map(|_| {
                    info!(namespace, lease = lease_name, holder = %self.inner.holder, "lock acquired");
                })
            }
            Some(lease) if self.held_by_self(&lease) => {
                let mut updated = lease;
                let spec = updated.spec.get_or_insert_with(LeaseSpec::default);
                spec.renew_time = Some(MicroTime(now));
                spec.lease_duration_seconds = Some(self.inner.duration_secs);
                self.inner
                    .backend
                    .replace_lease(namespace, lease_name, &updated)
                    .await
                    .map(|_| {
                        debug!(namespace, lease = lease_name, "lease renewed");
                    })
            }
            Some(lease) => {
                let previous = holder_json(&lease).map(str::to_string);
                let updated = self.taken_over(lease, now);
                self.inner
                    .backend
                    .replace_lease(namespace, lease_name, &updated)
                    .await
                    .map(|_| {
                        info!(namespace, lease = lease_name, previous = ?previous, "took over expired lease");
                    })
            }
        };

        result.map_err(|e| {
            let message = match &e {
                K8sError::Conflict(_) => "lease was modified concurrently by another process",
                _ => "failed to create or renew the lease",
            };
            self.error(Failure::Acquire, message, None, Some(e))
        })?;

        if ensure_schedule {
            self.ensure_scheduled().await;
        }
        Ok(())
    }

    /// Hand a lease held by a dead process on this machine to this process.
    async fn transfer(
        &self,
        namespace: &str,
        lease_name: &str,
        lease: Lease,
        previous: &LockHolder,
    ) -> Result<(), LockError> {
        let updated = self.taken_over(lease, Utc::now());
        self.inner
            .backend
            .replace_lease(namespace, lease_name, &updated)
            .await
            .map_err(|e| {
                self.error(
                    Failure::Acquire,
                    "failed to transfer lease from dead process",
                    Some(previous.to_json()),
                    Some(e),
                )
            })?;
        info!(namespace, lease = lease_name, previous = %previous, "transferred lease from dead process");
        self.ensure_scheduled().await;
        Ok(())
    }

    async fn ensure_scheduled(&self) {
        let mut schedule_id = self.inner.schedule_id.lock().await;
        if schedule_id.is_none() {
            *schedule_id = Some(self.inner.renewal.schedule(self).await);
        }
    }

    fn new_lease(&self, namespace: &str, lease_name: &str, now: chrono::DateTime<Utc>) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(lease_name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(keys::lease_labels()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.inner.holder.to_json()),
                lease_duration_seconds: Some(self.inner.duration_secs),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        }
    }

    /// `lease` rewritten for a new holder: this process. Keeps metadata
    /// (including resourceVersion) so the replace is conditional.
    fn taken_over(&self, mut lease: Lease, now: chrono::DateTime<Utc>) -> Lease {
        let spec = lease.spec.get_or_insert_with(LeaseSpec::default);
        spec.holder_identity = Some(self.inner.holder.to_json());
        spec.lease_duration_seconds = Some(self.inner.duration_secs);
        spec.acquire_time = Some(MicroTime(now));
        spec.renew_time = Some(MicroTime(now));
        spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
        lease
    }

    fn lease_expired(&self, lease: &Lease) -> bool {
        match &lease.spec {
            Some(spec) => time::lease_expired(spec, self.inner.duration_secs, Utc::now()),
            None => true,
        }
    }

    fn held_by_self(&self, lease: &Lease) -> bool {
        holder_of(lease).is_some_and(|h| h == self.inner.holder)
    }

    fn error(
        &self,
        kind: Failure,
        message: &str,
        other_holder: Option<String>,
        source: Option<K8sError>,
    ) -> LockError {
        let namespace = self.inner.namespace.clone().unwrap_or_default();
        let lease_name = self.inner.lease_name.clone().unwrap_or_default();
        let self_holder = self.inner.holder.to_json();
        let message = message.to_string();
        match kind {
            Failure::Acquire => LockError::Acquisition {
                message,
                namespace,
                lease_name,
                self_holder,
                other_holder,
                source,
            },
            Failure::Release => LockError::Relinquishment {
                message,
                namespace,
                lease_name,
                self_holder,
                other_holder,
                source,
            },
        }
    }
}

/// Raw `holderIdentity`; empty strings count as no holder.
fn holder_json(lease: &Lease) -> Option<&str> {
    lease
        .spec
        .as_ref()
        .and_then(|s| s.holder_identity.as_deref())
        .filter(|h| !h.is_empty())
}

fn holder_of(lease: &Lease) -> Option<LockHolder> {
    holder_json(lease).and_then(|json| LockHolder::from_json(json).ok())
}

fn describe_holder(lease: &Lease) -> String {
    match (holder_of(lease), holder_json(lease)) {
        (Some(holder), _) => holder.to_string(),
        (None, Some(raw)) => format!("unrecognised holder {raw:?}"),
        (None, None) => "nobody".to_string(),
    }
}
