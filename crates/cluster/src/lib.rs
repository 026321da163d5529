// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! peerbot-cluster: per-thread worker deployments.
//!
//! The cluster is the authority for which workers exist. Everything here
//! converges observed state to desired state with idempotent reads and
//! writes: the reconciler creates and monitors deployments, the orphan
//! sweeper repairs stuck ones, and the idle scaler parks quiet threads at
//! zero replicas. In-memory bookkeeping is advisory and rebuilt by listing
//! label selectors.

pub mod api;
pub mod idle;
pub mod kube_api;
pub mod manifest;
pub mod orphan;
pub mod reconciler;
pub mod secrets;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use api::{ClusterApi, ClusterError, DeploymentView, SELECTOR_WORKERS};
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeCluster;
pub use idle::{IdleScaler, LAST_ACTIVITY_ANNOTATION};
pub use kube_api::KubeCluster;
pub use manifest::{build_deployment, ManifestConfig, WorkerSpec};
pub use orphan::{OrphanSweeper, RecoveryAction, RecoveryReport, SweepConfig};
pub use reconciler::{DeploymentHealth, EnsureOutcome, Reconciler, ReconcilerConfig};
pub use secrets::{user_secret_keys, user_secret_name};
