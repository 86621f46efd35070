//! Namespace locks built on Kubernetes `Lease` objects.
//!
//! One lease per namespace arbitrates which CLI process may mutate the
//! deployment. The holder identity stored in the lease is a JSON-encoded
//! [`LockHolder`]; a lease whose last renewal is older than its duration is
//! expired and may be taken over by anyone, and a lease held by a dead process
//! on the same user+host is reclaimed without waiting for expiry.
//!
//! ## Known Limitations
//!
//! - **No fencing token**: ordering across processes is enforced only through
//!   the lease identity and expiry. A partitioned holder whose write is still
//!   in flight could land after a transfer. Renewing at half the duration and
//!   the liveness probe before transfer keep this window small.
//! - **Clock skew sensitivity**: expiry compares local time with the lease's
//!   `renewTime`.

use crate::k8s::K8sError;

pub mod identity;
pub mod interval;
pub mod manager;
pub mod renewal;
pub mod retry;

pub use identity::LockHolder;
pub use interval::IntervalLock;
pub use manager::LockManager;
pub use renewal::{LockRenewalService, ScheduleId};
pub use retry::{AcquireAttempt, acquire_with_retry};

/// Error type for lock operations.
///
/// Holder identities are carried in their serialized (JSON) form so they can
/// be reported verbatim.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{message} [lease: {namespace}/{lease_name}, holder: {self_holder}{}]", other_suffix(.other_holder))]
    Acquisition {
        message: String,
        namespace: String,
        lease_name: String,
        self_holder: String,
        other_holder: Option<String>,
        #[source]
        source: Option<K8sError>,
    },
    #[error("{message} [lease: {namespace}/{lease_name}, holder: {self_holder}{}]", other_suffix(.other_holder))]
    Relinquishment {
        message: String,
        namespace: String,
        lease_name: String,
        self_holder: String,
        other_holder: Option<String>,
        #[source]
        source: Option<K8sError>,
    },
    #[error("failed to acquire lock after {attempts} attempts: {last}")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        last: Box<LockError>,
    },
    #[error("invalid namespace name: {0:?}")]
    InvalidNamespace(String),
}

fn other_suffix(other: &Option<String>) -> String {
    match other {
        Some(o) => format!(", current holder: {o}"),
        None => String::new(),
    }
}

impl LockError {
    /// The competing holder, when the failure was caused by one.
    pub fn other_holder(&self) -> Option<LockHolder> {
        match self {
            LockError::Acquisition { other_holder, .. }
            | LockError::Relinquishment { other_holder, .. } => other_holder
                .as_deref()
                .and_then(|json| LockHolder::from_json(json).ok()),
            LockError::AttemptsExhausted { last, .. } => last.other_holder(),
            _ => None,
        }
    }

    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            LockError::Acquisition { .. } | LockError::AttemptsExhausted { .. }
        )
    }
}
