//! Controller module for FailoverService reconciliation
//! This module contains the controller loop, the reconciliation pass and
//! the per-cluster convergence of generated mesh configuration.

pub mod clients;
pub mod config;
pub mod convergence;
#[cfg(test)]
mod fakes;
mod finalizers;
pub mod leader;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;

pub use clients::{
    ArtifactStore, ClusterClientFactory, KubeArtifactStore, KubeClusterClients,
    KubeSnapshotSource, KubeStatusWriter, SnapshotSource, StatusWriter, FIELD_MANAGER,
    status_patch,
};
pub use leader::LeaderElector;
pub use config::ControllerConfig;
pub use convergence::{converge, plan_cluster, ClusterPlan};
pub use finalizers::{is_being_deleted, FAILOVER_SERVICE_FINALIZER};
pub use reconciler::{run_controller, ControllerState, FailoverReconciler, CONTROLLER_NAME};
