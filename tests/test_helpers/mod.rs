#![allow(dead_code)]

use solo::bootstrap::Services;
use solo::invocation::{CommandInvocation, flags};
use solo::lock::LockHolder;
use solo::settings::{AppConfig, DeploymentConfig};
use std::sync::Arc;

use crate::mock_k8s::MockK8sFactory;

pub const CONTEXT: &str = "kind-solo";
pub const NAMESPACE: &str = "solo-e2e";
pub const DEPLOYMENT: &str = "solo-deployment";
pub const EMAIL: &str = "ops@example.com";

/// Settings for tests: short lock duration, few attempts, one deployment
/// mapped onto `CONTEXT`.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.user.email = EMAIL.to_string();
    cfg.lease.duration_secs = 20;
    cfg.lease.acquire_attempts = 3;
    cfg.cluster_refs.insert("cluster-1".into(), CONTEXT.into());
    cfg.deployments.insert(
        DEPLOYMENT.into(),
        DeploymentConfig {
            namespace: NAMESPACE.into(),
            clusters: vec!["cluster-1".into()],
        },
    );
    cfg
}

/// Services wired to a fresh mock cluster reachable as `CONTEXT`.
pub fn mock_services() -> (Services, Arc<MockK8sFactory>) {
    mock_services_with(test_config())
}

pub fn mock_services_with(config: AppConfig) -> (Services, Arc<MockK8sFactory>) {
    let factory = MockK8sFactory::new(CONTEXT);
    let services = Services::new(config, factory.clone());
    (services, factory)
}

/// An invocation against the test deployment's namespace.
pub fn invocation(command: &[&str]) -> CommandInvocation {
    CommandInvocation::new(command.iter().copied()).with_flag(flags::NAMESPACE, NAMESPACE)
}

/// A holder on this machine whose process has exited.
#[cfg(unix)]
pub fn dead_holder() -> LockHolder {
    let me = LockHolder::current();
    let mut child = std::process::Command::new("true")
        .spawn()
        .expect("spawn true");
    let pid = child.id();
    child.wait().expect("wait for child");
    LockHolder::new(me.username(), me.hostname(), pid)
}

/// A live holder on another machine.
pub fn remote_holder() -> LockHolder {
    LockHolder::new("someone-else", "far-away-host", 4242)
}

/// A live holder on this machine: the parent process of the test runner.
#[cfg(unix)]
pub fn live_sibling_holder() -> LockHolder {
    let me = LockHolder::current();
    let ppid = std::os::unix::process::parent_id();
    LockHolder::new(me.username(), me.hostname(), ppid)
}
