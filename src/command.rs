//! Running a mutating command under the namespace lock.
//!
//! Every command that changes shared cluster state follows the same
//! sequence: resolve the target namespace, acquire its lock (retrying while
//! another process holds it), load and audit the remote config, do the work,
//! and release the lock whether or not the work succeeded.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bootstrap::Services;
use crate::invocation::CommandInvocation;
use crate::lock::{AcquireAttempt, IntervalLock, LockError, acquire_with_retry};
use crate::remote_config::{RemoteConfigDataWrapper, RemoteConfigError, RemoteConfigManager};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    RemoteConfig(#[from] RemoteConfigError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How the command uses the remote config before its work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteConfigMode {
    /// The command does not touch the remote config (e.g. it creates it).
    #[default]
    Skip,
    /// Load, optionally health-check, and record the command in history.
    LoadAndValidate {
        validate: bool,
        skip_consensus_node_validation: bool,
    },
}

/// What the command body gets to work with.
pub struct CommandContext {
    pub lock: IntervalLock,
    pub invocation: CommandInvocation,
    pub remote_config: Arc<RemoteConfigManager>,
    /// The loaded document, when the command asked for it.
    pub loaded: Option<RemoteConfigDataWrapper>,
}

type ProgressFn = Box<dyn Fn(&AcquireAttempt) + Send + Sync>;

pub struct LockedCommand {
    services: Services,
    mode: RemoteConfigMode,
    progress: Option<ProgressFn>,
}

impl LockedCommand {
    pub fn new(services: &Services) -> Self {
        Self {
            services: services.clone(),
            mode: RemoteConfigMode::Skip,
            progress: None,
        }
    }

    pub fn with_remote_config(mut self, mode: RemoteConfigMode) -> Self {
        self.mode = mode;
        self
    }

    /// Report each lock acquisition attempt, e.g. to a progress display.
    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&AcquireAttempt) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(f));
        self
    }

    /// Run `work` while holding the lock of the namespace `invocation` targets.
    ///
    /// The lock is released on every path once it was acquired. When both the
    /// work and the release fail, the work's error is returned and the
    /// release failure is logged.
    pub async fn run<F, Fut, T>(
        &self,
        mut invocation: CommandInvocation,
        work: F,
    ) -> Result<T, CommandError>
    where
        F: FnOnce(CommandContext) -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        let services = &self.services;
        services.config.apply_deployment_defaults(&mut invocation);

        let lock = services.lock_manager.create(&invocation).await?;
        acquire_with_retry(&lock, services.config.lease.acquire_attempts, |attempt| {
            if let AcquireAttempt::Waiting {
                attempt,
                max_attempts,
                retry_in,
                reason,
            } = attempt
            {
                info!(attempt, max_attempts, retry_in_secs = retry_in.as_secs(), %reason, "waiting for lock");
            }
            if let Some(progress) = &self.progress {
                progress(attempt);
            }
        })
        .await?;

        let outcome = self.run_locked(&lock, invocation, work).await;

        let released = lock.release().await;
        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(error = %release_err, "failed to release lock after command failure");
                Err(e)
            }
        }
    }

    async fn run_locked<F, Fut, T>(
        &self,
        lock: &IntervalLock,
        mut invocation: CommandInvocation,
        work: F,
    ) -> Result<T, CommandError>
    where
        F: FnOnce(CommandContext) -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        let remote_config = self.services.remote_config.clone();
        let loaded = match self.mode {
            RemoteConfigMode::Skip => None,
            RemoteConfigMode::LoadAndValidate {
                validate,
                skip_consensus_node_validation,
            } => Some(
                remote_config
                    .load_and_validate(&mut invocation, validate, skip_consensus_node_validation)
                    .await?,
            ),
        };
        work(CommandContext {
            lock: lock.clone(),
            invocation,
            remote_config,
            loaded,
        })
        .await
    }
}
