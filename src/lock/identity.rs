use serde::{Deserialize, Serialize};

/// Who holds a lock: one OS process on one machine.
///
/// Serialized as `{"username":..,"hostname":..,"pid":..}` into the lease's
/// `holderIdentity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockHolder {
    username: String,
    hostname: String,
    #[serde(rename = "pid")]
    process_id: u32,
}

impl LockHolder {
    /// Holder for the current process with an explicit username.
    pub fn of(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hostname: current_hostname(),
            process_id: std::process::id(),
        }
    }

    /// Holder for the current process and OS user.
    pub fn current() -> Self {
        Self::of(current_username())
    }

    /// Fully specified holder, for identities read back from a lease or built in tests.
    pub fn new(username: impl Into<String>, hostname: impl Into<String>, process_id: u32) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
            process_id,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Same user on the same host, regardless of process.
    pub fn is_same_machine_identity(&self, other: &LockHolder) -> bool {
        self.username == other.username && self.hostname == other.hostname
    }

    /// Signal-0 probe against `process_id`.
    ///
    /// `EPERM` means the process exists but belongs to someone else, so it
    /// counts as alive. Only meaningful for holders on this machine.
    #[cfg(unix)]
    pub fn is_process_alive(&self) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(self.process_id) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    /// Without a liveness probe every holder is assumed alive, so stale leases
    /// are only reclaimed through expiry.
    #[cfg(not(unix))]
    pub fn is_process_alive(&self) -> bool {
        true
    }

    pub fn to_json(&self) -> String {
        // A struct of two strings and an integer always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for LockHolder {
    fn default() -> Self {
        Self::current()
    }
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "user '{}' on host '{}' (pid {})",
            self.username, self.hostname, self.process_id
        )
    }
}

fn current_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn current_username() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(not(unix))]
fn current_username() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_field_names() {
        let h = LockHolder::new("alice", "box-1", 4242);
        let v: serde_json::Value = serde_json::from_str(&h.to_json()).unwrap();
        assert_eq!(v["username"], "alice");
        assert_eq!(v["hostname"], "box-1");
        assert_eq!(v["pid"], 4242);
    }

    #[test]
    fn json_round_trip_with_awkward_strings() {
        for (u, host, pid) in [
            ("", "", 0u32),
            ("d\u{e9}j\u{e0} \"vu\"", "h\\ost\n", u32::MAX),
            ("svc-account@corp", "node-7.cluster.local", 1),
        ] {
            let h = LockHolder::new(u, host, pid);
            assert_eq!(LockHolder::from_json(&h.to_json()).unwrap(), h);
        }
    }

    #[test]
    fn equality_and_machine_identity() {
        let a = LockHolder::new("alice", "box", 1);
        let b = LockHolder::new("alice", "box", 2);
        let c = LockHolder::new("alice", "other", 1);
        assert_ne!(a, b);
        assert!(a.is_same_machine_identity(&b));
        assert!(!a.is_same_machine_identity(&c));
        assert_eq!(a, LockHolder::new("alice", "box", 1));
    }

    #[test]
    fn current_process_is_alive() {
        let me = LockHolder::current();
        assert_eq!(me.process_id(), std::process::id());
        assert!(me.is_process_alive());
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!LockHolder::new("x", "y", pid).is_process_alive());
    }
}
