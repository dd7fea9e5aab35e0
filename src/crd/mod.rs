//! Custom Resource Definitions for mesh-failover
//!
//! This module defines the Kubernetes CRDs read and written by the
//! FailoverService control loop.

pub mod discovery;
mod failover_service;
pub mod istio;
pub mod types;

#[cfg(test)]
mod tests;

pub use discovery::{
    AppliedTrafficPolicy, Federation, IstioMesh, KubeService, KubernetesCluster,
    KubernetesClusterSpec, Mesh, MeshService, MeshServiceSpec, MeshServiceStatus, MeshSpec,
    MeshType, OtherMesh, OutlierDetection, TrafficPolicySpec, VirtualMesh, VirtualMeshSpec,
};
pub use failover_service::{
    FailoverService, FailoverServiceSpec, FailoverServiceStatus, TranslatorErrorStatus,
};
pub use istio::{EnvoyFilter, EnvoyFilterSpec, ServiceEntry, ServiceEntrySpec};
pub use types::*;
