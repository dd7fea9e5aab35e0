//! Runtime configuration of the controller

use std::time::Duration;

use crate::failover::{OwnershipLabels, DEFAULT_VIRTUAL_IP_CIDR};

pub const DEFAULT_RESYNC_SECONDS: u64 = 300;
pub const DEFAULT_LOCAL_CLUSTER: &str = "local";

/// Port of the REST API and metrics server
pub const DEFAULT_API_PORT: u16 = 8080;

/// Settings threaded into the reconciler and its collaborators
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace holding KubernetesCluster registrations and the leader lease
    pub namespace: String,

    /// Name under which the cluster the controller runs in is registered
    pub local_cluster: String,

    /// Ownership label pair stamped on and used to select generated artifacts
    pub labels: OwnershipLabels,

    /// Requeue interval after a successful pass
    pub resync_interval: Duration,

    /// IPv4 block virtual addresses are drawn from
    pub virtual_ip_cidr: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            local_cluster: DEFAULT_LOCAL_CLUSTER.to_string(),
            labels: OwnershipLabels::default(),
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECONDS),
            virtual_ip_cidr: DEFAULT_VIRTUAL_IP_CIDR.to_string(),
        }
    }
}
