//! Discovery Custom Resource Definitions
//!
//! These resources are produced by mesh discovery and by cluster
//! registration. The failover controller only ever reads them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClusterObjectRef, ResourceRef, ServicePort};

/// Suffix of a service's in-cluster fully-qualified name
pub const LOCAL_SERVICE_DOMAIN: &str = "svc.cluster.local";

// ============================================================================
// MeshService
// ============================================================================

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "discovery.meshfailover.io",
    version = "v1alpha1",
    kind = "MeshService",
    namespaced,
    status = "MeshServiceStatus",
    shortname = "msvc",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.kubeService.ref.cluster"}"#,
    printcolumn = r#"{"name":"Mesh","type":"string","jsonPath":".spec.mesh.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MeshServiceSpec {
    /// The Kubernetes service backing this mesh service
    pub kube_service: KubeService,

    /// The mesh this service belongs to
    pub mesh: ResourceRef,

    /// Federation metadata, present once the service is reachable from other clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federation: Option<Federation>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeService {
    #[serde(rename = "ref")]
    pub reference: ClusterObjectRef,

    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Federation {
    /// Name under which remote clusters resolve this service
    pub multicluster_dns_name: String,

    #[serde(default)]
    pub federated_to_meshes: Vec<ResourceRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeshServiceStatus {
    /// Traffic policies currently applied to this service
    #[serde(default)]
    pub applied_traffic_policies: Vec<AppliedTrafficPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppliedTrafficPolicy {
    #[serde(rename = "ref")]
    pub reference: ResourceRef,

    #[serde(default)]
    pub spec: TrafficPolicySpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outlier_detection: Option<OutlierDetection>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OutlierDetection {
    #[serde(default = "default_consecutive_errors")]
    pub consecutive_errors: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ejection_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ejection_percent: Option<u32>,
}

fn default_consecutive_errors() -> u32 {
    5
}

impl MeshService {
    /// The (name, namespace, cluster) identity of the backing Kubernetes service
    pub fn identity(&self) -> &ClusterObjectRef {
        &self.spec.kube_service.reference
    }

    /// Name of the cluster hosting the backing service
    pub fn cluster(&self) -> &str {
        &self.spec.kube_service.reference.cluster
    }

    /// `{name}.{namespace}.svc.cluster.local`
    pub fn local_fqdn(&self) -> String {
        let reference = &self.spec.kube_service.reference;
        format!(
            "{}.{}.{}",
            reference.name, reference.namespace, LOCAL_SERVICE_DOMAIN
        )
    }

    /// Multicluster DNS name, when federation has assigned one
    pub fn multicluster_dns_name(&self) -> Option<&str> {
        self.spec
            .federation
            .as_ref()
            .map(|f| f.multicluster_dns_name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// Whether any applied traffic policy configures outlier detection
    pub fn has_outlier_detection(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.applied_traffic_policies
                    .iter()
                    .any(|p| p.spec.outlier_detection.is_some())
            })
            .unwrap_or(false)
    }
}

// ============================================================================
// Mesh
// ============================================================================

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "discovery.meshfailover.io",
    version = "v1alpha1",
    kind = "Mesh",
    namespaced,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.cluster.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MeshSpec {
    /// The KubernetesCluster the mesh control plane runs in
    pub cluster: ResourceRef,

    /// Which mesh technology this is
    pub mesh_type: MeshType,
}

/// Mesh technologies known to discovery
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum MeshType {
    #[serde(rename = "istio1_5")]
    Istio1_5(IstioMesh),

    #[serde(rename = "istio1_6")]
    Istio1_6(IstioMesh),

    /// Any other mesh; discovered but not configurable for failover
    #[serde(rename = "other")]
    Other(OtherMesh),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IstioMesh {
    /// Namespace the Istio control plane is installed in
    pub installation_namespace: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OtherMesh {
    /// Free-form technology name reported by discovery
    #[serde(default)]
    pub technology: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_namespace: Option<String>,
}

impl MeshType {
    /// Namespace the mesh control plane is installed in, if known
    pub fn installation_namespace(&self) -> Option<&str> {
        match self {
            MeshType::Istio1_5(istio) | MeshType::Istio1_6(istio) => {
                Some(istio.installation_namespace.as_str())
            }
            MeshType::Other(other) => other.installation_namespace.as_deref(),
        }
    }

    /// Whether failover configuration can be generated for this mesh type
    pub fn supports_failover(&self) -> bool {
        match self {
            MeshType::Istio1_5(_) | MeshType::Istio1_6(_) => true,
            MeshType::Other(_) => false,
        }
    }

    /// Human-readable technology name
    pub fn technology(&self) -> &str {
        match self {
            MeshType::Istio1_5(_) => "istio1.5",
            MeshType::Istio1_6(_) => "istio1.6",
            MeshType::Other(other) if other.technology.is_empty() => "unknown",
            MeshType::Other(other) => other.technology.as_str(),
        }
    }
}

impl Mesh {
    /// Name of the cluster the mesh runs in
    pub fn cluster(&self) -> &str {
        &self.spec.cluster.name
    }
}

// ============================================================================
// KubernetesCluster
// ============================================================================

/// A workload cluster registered with the management plane
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "discovery.meshfailover.io",
    version = "v1alpha1",
    kind = "KubernetesCluster",
    namespaced,
    shortname = "kc"
)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesClusterSpec {
    /// Secret holding the kubeconfig used to reach the cluster
    pub secret_ref: ResourceRef,

    /// Kubeconfig context to use; the current context when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

// ============================================================================
// VirtualMesh
// ============================================================================

/// Administrative grouping of meshes that trust each other
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.meshfailover.io",
    version = "v1alpha1",
    kind = "VirtualMesh",
    namespaced,
    shortname = "vm"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMeshSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Member meshes
    #[serde(default)]
    pub meshes: Vec<ResourceRef>,
}

impl VirtualMesh {
    pub fn contains(&self, mesh: &ResourceRef) -> bool {
        self.spec.meshes.iter().any(|m| m == mesh)
    }
}
