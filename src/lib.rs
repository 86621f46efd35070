//! Distributed coordination for multi-cluster Solo deployments.
//!
//! Two subsystems live here:
//!
//! - [`lock`]: namespace-wide mutual exclusion built on Kubernetes `Lease`
//!   objects, with background renewal and stale-holder reclamation.
//! - [`remote_config`]: the versioned deployment document stored in a
//!   labelled `ConfigMap` and replicated to every cluster context of the
//!   deployment.
//!
//! [`command::LockedCommand`] ties them together the way every mutating CLI
//! command uses them.

extern crate self as solo;

pub mod bootstrap;
pub mod command;
pub mod invocation;
pub mod k8s;
pub mod keys;
pub mod lock;
pub mod remote_config;
pub mod settings;
pub mod soloctl;
pub mod time;
pub mod trace;

pub use solo_macros::test;
