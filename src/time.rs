//! Time helpers shared by the lease and remote config code.
//!
//! Lease timestamps are Kubernetes `MicroTime` values (UTC, microsecond
//! precision). Durations are plain `std::time::Duration`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::LeaseSpec;

/// Fraction of the lease duration after which a held lease is renewed.
pub const RENEWAL_FRACTION: f64 = 0.5;

/// Format a chrono DateTime for K8S MicroTime (RFC3339 with microseconds and Z suffix)
pub fn format_microtime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Whole seconds elapsed between `since` and `now`, truncated toward zero.
pub fn elapsed_seconds(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_seconds()
}

/// The instant a lease was last touched: `renewTime`, falling back to `acquireTime`.
pub fn last_renewal(spec: &LeaseSpec) -> Option<DateTime<Utc>> {
    spec.renew_time
        .as_ref()
        .or(spec.acquire_time.as_ref())
        .map(|t| t.0)
}

/// Lease expiry rule.
///
/// A lease is expired when more than `duration_secs` whole seconds have passed
/// since its last renewal. A lease exactly at its boundary is still valid. A
/// spec that was never stamped counts as expired.
pub fn lease_expired(spec: &LeaseSpec, default_duration_secs: i32, now: DateTime<Utc>) -> bool {
    let duration_secs = spec
        .lease_duration_seconds
        .filter(|d| *d > 0)
        .unwrap_or(default_duration_secs);
    match last_renewal(spec) {
        Some(last) => elapsed_seconds(last, now) > i64::from(duration_secs),
        None => true,
    }
}

/// Delay between renewals of a lease that lasts `duration_secs`.
pub fn renewal_delay(duration_secs: i32) -> Duration {
    let millis = (f64::from(duration_secs.max(0)) * 1000.0 * RENEWAL_FRACTION).round() as u64;
    Duration::from_millis(millis.max(1))
}
