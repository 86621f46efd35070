//! Library side of the `soloctl` binary, shared with tests.

use std::io::Write;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::bootstrap::Services;
use crate::command::{CommandError, LockedCommand};
use crate::invocation::{CommandInvocation, flags};
use crate::lock::{AcquireAttempt, IntervalLock, LockHolder, acquire_with_retry};
use crate::remote_config::{CreateRemoteConfig, DeploymentState, RemoteConfigError};
use crate::time;

/// Options shared by every soloctl command
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub namespace: Option<String>,
    pub deployment: Option<String>,
    pub context: Option<String>,
    pub cluster_ref: Option<String>,
    /// Output in JSON format instead of human-readable text
    pub json: bool,
}

impl GlobalOptions {
    /// The invocation these options describe, for `command` words.
    pub fn invocation(&self, command: &[&str]) -> CommandInvocation {
        let mut inv = CommandInvocation::new(command.iter().copied());
        for (flag, value) in [
            (flags::NAMESPACE, &self.namespace),
            (flags::DEPLOYMENT, &self.deployment),
            (flags::CONTEXT, &self.context),
            (flags::CLUSTER_REF, &self.cluster_ref),
        ] {
            if let Some(v) = value {
                inv.set_flag(flag, v.as_str());
            }
        }
        inv
    }

    fn resolved(&self, services: &Services, command: &[&str]) -> CommandInvocation {
        let mut inv = self.invocation(command);
        services.config.apply_deployment_defaults(&mut inv);
        inv
    }
}

fn require_namespace(inv: &CommandInvocation) -> anyhow::Result<String> {
    inv.namespace()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no namespace: pass --namespace or a configured --deployment"))
}

/// A lock handle for inspecting or releasing a namespace lease without
/// creating the namespace.
fn observer_lock(services: &Services, namespace: String) -> IntervalLock {
    IntervalLock::new(
        services.factory.default_backend(),
        services.renewal.clone(),
        LockHolder::current(),
        Some(namespace),
        None,
        Some(services.config.lease.duration_secs),
    )
}

/// Show who holds the namespace lease.
pub async fn lease_status<W: Write>(
    services: &Services,
    opts: &GlobalOptions,
    out: &mut W,
) -> anyhow::Result<()> {
    let inv = opts.resolved(services, &["lease", "status"]);
    let namespace = require_namespace(&inv)?;
    let lock = observer_lock(services, namespace.clone());

    let Some(lease) = lock.current_lease().await else {
        if opts.json {
            writeln!(out, "{}", serde_json::json!({ "namespace": namespace, "held": false }))?;
        } else {
            writeln!(out, "Namespace {namespace} is not locked")?;
        }
        return Ok(());
    };

    let spec = lease.spec.unwrap_or_default();
    let holder = spec
        .holder_identity
        .as_deref()
        .and_then(|json| LockHolder::from_json(json).ok());
    let expired = time::lease_expired(&spec, lock.duration_secs(), Utc::now());
    let last_renewal = time::last_renewal(&spec).map(time::format_microtime);

    if opts.json {
        let json_output = serde_json::json!({
            "namespace": namespace,
            "lease": lock.lease_name(),
            "held": true,
            "holder": holder,
            "expired": expired,
            "duration_secs": spec.lease_duration_seconds,
            "last_renewal": last_renewal,
            "transitions": spec.lease_transitions,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&json_output)?)?;
    } else {
        writeln!(out, "Lease {}/{}", namespace, lock.lease_name().unwrap_or_default())?;
        match &holder {
            Some(h) => writeln!(out, "Holder:       {h}")?,
            None => writeln!(out, "Holder:       (unknown)")?,
        }
        writeln!(out, "Last renewal: {}", last_renewal.as_deref().unwrap_or("never"))?;
        writeln!(
            out,
            "Duration:     {}s",
            spec.lease_duration_seconds.unwrap_or(lock.duration_secs())
        )?;
        writeln!(out, "Transitions:  {}", spec.lease_transitions.unwrap_or(0))?;
        writeln!(out, "Expired:      {}", if expired { "yes" } else { "no" })?;
    }
    Ok(())
}

/// Acquire the namespace lock, hold it for `hold`, then release it.
pub async fn lease_acquire<W: Write>(
    services: &Services,
    opts: &GlobalOptions,
    hold: Duration,
    out: &mut W,
) -> anyhow::Result<()> {
    let inv = opts.resolved(services, &["lease", "acquire"]);
    let namespace = require_namespace(&inv)?;
    let lock = services
        .lock_manager
        .create_for(Some(namespace.clone()), LockHolder::current())
        .await?;

    let mut progress = Vec::new();
    let acquired = acquire_with_retry(&lock, services.config.lease.acquire_attempts, |attempt| {
        if let AcquireAttempt::Waiting {
            attempt,
            max_attempts,
            retry_in,
            reason,
        } = attempt
        {
            progress.push(format!(
                "Attempt {attempt}/{max_attempts} failed ({reason}), retrying in {}s",
                retry_in.as_secs()
            ));
        }
    })
    .await;
    for line in progress {
        writeln!(out, "{line}")?;
    }
    acquired?;

    writeln!(out, "Acquired lock on namespace {namespace}")?;
    if !hold.is_zero() {
        info!(namespace = %namespace, hold_secs = hold.as_secs(), "holding lock");
        tokio::time::sleep(hold).await;
    }
    lock.release().await?;
    writeln!(out, "Released lock on namespace {namespace}")?;
    Ok(())
}

/// Release the namespace lease. Succeeds only for a lease that is expired or
/// held by this process.
pub async fn lease_release<W: Write>(
    services: &Services,
    opts: &GlobalOptions,
    out: &mut W,
) -> anyhow::Result<()> {
    let inv = opts.resolved(services, &["lease", "release"]);
    let namespace = require_namespace(&inv)?;
    observer_lock(services, namespace.clone()).release().await?;
    writeln!(out, "Released lock on namespace {namespace}")?;
    Ok(())
}

async fn load_remote_config(
    services: &Services,
    opts: &GlobalOptions,
    command: &[&str],
) -> anyhow::Result<crate::remote_config::RemoteConfigDataWrapper> {
    let inv = opts.resolved(services, command);
    let namespace = require_namespace(&inv)?;
    let context = services
        .config
        .context_of(&inv)
        .or_else(|| services.factory.current_context())
        .ok_or(RemoteConfigError::ContextUnresolved)?;
    Ok(services.remote_config.load(&namespace, &context).await?)
}

/// Print the deployment's remote config.
pub async fn remote_config_show<W: Write>(
    services: &Services,
    opts: &GlobalOptions,
    out: &mut W,
) -> anyhow::Result<()> {
    let doc = load_remote_config(services, opts, &["remote-config", "show"]).await?;
    if opts.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&doc.to_document())?)?;
    } else {
        write!(out, "{}", doc.to_yaml()?)?;
    }
    Ok(())
}

/// Print the deployment's command history, oldest first.
pub async fn remote_config_history<W: Write>(
    services: &Services,
    opts: &GlobalOptions,
    out: &mut W,
) -> anyhow::Result<()> {
    let doc = load_remote_config(services, opts, &["remote-config", "history"]).await?;
    if opts.json {
        let json_output = serde_json::json!({
            "last_executed_command": doc.last_executed_command(),
            "history": doc.command_history(),
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&json_output)?)?;
    } else {
        for (i, entry) in doc.command_history().iter().enumerate() {
            writeln!(out, "{:>3}  {}", i + 1, entry)?;
        }
    }
    Ok(())
}

/// Create the remote config of a new deployment, under the namespace lock.
pub async fn remote_config_create<W: Write>(
    services: &Services,
    opts: &GlobalOptions,
    node_aliases: &[String],
    out: &mut W,
) -> anyhow::Result<()> {
    let mut inv = opts.invocation(&["remote-config", "create"]);
    if !node_aliases.is_empty() {
        inv.set_flag(flags::NODE_ALIASES, node_aliases.join(","));
    }
    services.config.apply_deployment_defaults(&mut inv);

    let deployment = inv
        .deployment()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("--deployment is required"))?;
    let namespace = require_namespace(&inv)?;
    let cluster_ref = inv
        .cluster_ref()
        .map(str::to_string)
        .or_else(|| services.factory.current_context())
        .ok_or_else(|| anyhow::anyhow!("--cluster-ref is required"))?;
    let context = services
        .config
        .context_of(&inv)
        .unwrap_or_else(|| services.config.context_for(&cluster_ref));

    let params = CreateRemoteConfig {
        namespace,
        deployment,
        cluster_ref,
        context,
        state: DeploymentState::PreGenesis,
        node_aliases: inv.node_aliases(),
        dns_base_domain: None,
        dns_consensus_node_pattern: None,
    };

    let doc = LockedCommand::new(services)
        .run(inv, |ctx| async move {
            ctx.remote_config
                .create(params, &ctx.invocation)
                .await
                .map_err(CommandError::from)
        })
        .await?;

    writeln!(
        out,
        "Created remote config for deployment {} in namespace {} ({} consensus nodes)",
        doc.metadata().deployment_name,
        doc.metadata().namespace,
        doc.components().consensus_nodes().count()
    )?;
    Ok(())
}
