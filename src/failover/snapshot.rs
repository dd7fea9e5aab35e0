//! Input and output snapshots of one reconciliation pass
//!
//! The [`InputSnapshot`] is the entire world view for a pass and is never
//! mutated once built. The [`OutputSnapshot`] is built additively by the
//! processor and handed to the reconciler.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::crd::{
    ClusterObjectRef, EnvoyFilter, FailoverService, FailoverServiceStatus, KubernetesCluster,
    Mesh, MeshService, ResourceRef, ServiceEntry, VirtualMesh,
};

// ============================================================================
// InputSnapshot
// ============================================================================

/// Read-only view of every input kind for one pass.
///
/// No referential integrity is enforced between the sets; lookups can miss.
#[derive(Clone, Debug, Default)]
pub struct InputSnapshot {
    failover_services: Vec<FailoverService>,
    mesh_services: Vec<MeshService>,
    service_index: HashMap<ClusterObjectRef, usize>,
    meshes: Vec<Mesh>,
    virtual_meshes: Vec<VirtualMesh>,
    clusters: Vec<KubernetesCluster>,
}

impl InputSnapshot {
    pub fn builder() -> InputSnapshotBuilder {
        InputSnapshotBuilder::default()
    }

    pub fn failover_services(&self) -> &[FailoverService] {
        &self.failover_services
    }

    pub fn failover_service(&self, key: &ResourceRef) -> Option<&FailoverService> {
        self.failover_services
            .iter()
            .find(|fs| ResourceRef::from_resource(*fs) == *key)
    }

    pub fn mesh_services(&self) -> &[MeshService] {
        &self.mesh_services
    }

    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    pub fn virtual_meshes(&self) -> &[VirtualMesh] {
        &self.virtual_meshes
    }

    pub fn clusters(&self) -> &[KubernetesCluster] {
        &self.clusters
    }

    /// Discovered service backed by the Kubernetes service `identity`
    pub fn find_mesh_service(&self, identity: &ClusterObjectRef) -> Option<&MeshService> {
        self.service_index
            .get(identity)
            .and_then(|idx| self.mesh_services.get(*idx))
    }

    pub fn find_mesh(&self, reference: &ResourceRef) -> Option<&Mesh> {
        self.meshes
            .iter()
            .find(|m| ResourceRef::from_resource(*m) == *reference)
    }

    /// Every cluster named anywhere in the snapshot
    pub fn referenced_clusters(&self) -> BTreeSet<String> {
        let registered = self.clusters.iter().map(|c| c.name_any());
        let mesh_clusters = self.meshes.iter().map(|m| m.cluster().to_string());
        let service_clusters = self.mesh_services.iter().map(|s| s.cluster().to_string());

        registered
            .chain(mesh_clusters)
            .chain(service_clusters)
            .filter(|c| !c.is_empty())
            .collect()
    }
}

#[derive(Default)]
pub struct InputSnapshotBuilder {
    snapshot: InputSnapshot,
}

impl InputSnapshotBuilder {
    pub fn failover_services(mut self, items: Vec<FailoverService>) -> Self {
        self.snapshot.failover_services = items;
        self
    }

    pub fn mesh_services(mut self, items: Vec<MeshService>) -> Self {
        self.snapshot.mesh_services = items;
        self
    }

    pub fn meshes(mut self, items: Vec<Mesh>) -> Self {
        self.snapshot.meshes = items;
        self
    }

    pub fn virtual_meshes(mut self, items: Vec<VirtualMesh>) -> Self {
        self.snapshot.virtual_meshes = items;
        self
    }

    pub fn clusters(mut self, items: Vec<KubernetesCluster>) -> Self {
        self.snapshot.clusters = items;
        self
    }

    /// Index discovered services by identity. The first service seen for an
    /// identity wins; later duplicates are dropped with a warning.
    pub fn build(mut self) -> InputSnapshot {
        let mut index = HashMap::with_capacity(self.snapshot.mesh_services.len());
        for (idx, service) in self.snapshot.mesh_services.iter().enumerate() {
            let identity = service.identity().clone();
            if let Some(first) = index.get(&identity) {
                let kept: &MeshService = &self.snapshot.mesh_services[*first];
                warn!(
                    "Duplicate discovered service identity {}: keeping {}, ignoring {}",
                    identity,
                    ResourceRef::from_resource(kept),
                    ResourceRef::from_resource(service)
                );
                continue;
            }
            index.insert(identity, idx);
        }
        self.snapshot.service_index = index;
        self.snapshot
    }
}

// ============================================================================
// MeshOutputs
// ============================================================================

/// Where a generated artifact lives
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(cluster: impl Into<String>, object: &impl ResourceExt) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
        }
    }

    pub fn object_ref(&self) -> ResourceRef {
        ResourceRef::new(self.name.clone(), self.namespace.clone())
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.cluster)
    }
}

/// Accumulator of mesh-specific artifacts generated during a pass.
///
/// Artifacts are keyed by target cluster, namespace and name, so merging is
/// commutative and associative for non-conflicting inputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshOutputs {
    service_entries: BTreeMap<ArtifactKey, ServiceEntry>,
    envoy_filters: BTreeMap<ArtifactKey, EnvoyFilter>,
}

impl MeshOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service_entry(&mut self, cluster: &str, entry: ServiceEntry) {
        self.service_entries
            .insert(ArtifactKey::new(cluster, &entry), entry);
    }

    pub fn add_envoy_filter(&mut self, cluster: &str, filter: EnvoyFilter) {
        self.envoy_filters
            .insert(ArtifactKey::new(cluster, &filter), filter);
    }

    pub fn merge(&mut self, other: MeshOutputs) {
        self.service_entries.extend(other.service_entries);
        self.envoy_filters.extend(other.envoy_filters);
    }

    pub fn service_entries(&self) -> &BTreeMap<ArtifactKey, ServiceEntry> {
        &self.service_entries
    }

    pub fn envoy_filters(&self) -> &BTreeMap<ArtifactKey, EnvoyFilter> {
        &self.envoy_filters
    }

    pub fn is_empty(&self) -> bool {
        self.service_entries.is_empty() && self.envoy_filters.is_empty()
    }

    /// Clusters receiving at least one artifact
    pub fn clusters(&self) -> BTreeSet<String> {
        self.service_entries
            .keys()
            .chain(self.envoy_filters.keys())
            .map(|k| k.cluster.clone())
            .collect()
    }
}

/// An artifact kind the reconciler converges in every cluster
pub trait ManagedArtifact:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Short kind name used in logs and metrics
    const KIND: &'static str;

    /// The desired artifacts of this kind
    fn desired(outputs: &MeshOutputs) -> &BTreeMap<ArtifactKey, Self>;
}

impl ManagedArtifact for ServiceEntry {
    const KIND: &'static str = "ServiceEntry";

    fn desired(outputs: &MeshOutputs) -> &BTreeMap<ArtifactKey, Self> {
        outputs.service_entries()
    }
}

impl ManagedArtifact for EnvoyFilter {
    const KIND: &'static str = "EnvoyFilter";

    fn desired(outputs: &MeshOutputs) -> &BTreeMap<ArtifactKey, Self> {
        outputs.envoy_filters()
    }
}

// ============================================================================
// OutputSnapshot
// ============================================================================

/// New status computed for one FailoverService
#[derive(Clone, Debug, PartialEq)]
pub struct StatusUpdate {
    pub key: ResourceRef,
    pub status: FailoverServiceStatus,
}

/// Result of processing one InputSnapshot
#[derive(Clone, Debug, Default)]
pub struct OutputSnapshot {
    /// One entry per FailoverService in the input, in input order
    pub statuses: Vec<StatusUpdate>,

    /// Artifacts to converge
    pub mesh_outputs: MeshOutputs,

    /// FailoverServices whose previously applied artifacts must be kept
    /// because no fresh translation was produced for them this pass
    pub retained: BTreeSet<ResourceRef>,
}

impl OutputSnapshot {
    pub fn status_of(&self, key: &ResourceRef) -> Option<&FailoverServiceStatus> {
        self.statuses
            .iter()
            .find(|u| u.key == *key)
            .map(|u| &u.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failover::test_fixtures::*;

    #[test]
    fn test_duplicate_identities_keep_first() {
        let mut first = mesh_service("reviews", "west", "istio-west", true);
        first.metadata.name = Some("first".to_string());
        let mut second = mesh_service("reviews", "west", "istio-west", true);
        second.metadata.name = Some("second".to_string());

        let snapshot = InputSnapshot::builder()
            .mesh_services(vec![first, second])
            .build();

        let found = snapshot
            .find_mesh_service(&ClusterObjectRef::new("reviews", NS, "west"))
            .unwrap();
        assert_eq!(found.name_any(), "first");
    }

    #[test]
    fn test_referenced_clusters_include_every_source() {
        let snapshot = InputSnapshot::builder()
            .clusters(vec![cluster("central")])
            .meshes(vec![istio_mesh("istio-east", "east")])
            .mesh_services(vec![mesh_service("reviews", "west", "istio-west", true)])
            .build();

        let clusters: Vec<String> = snapshot.referenced_clusters().into_iter().collect();
        assert_eq!(clusters, vec!["central", "east", "west"]);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let mut a = MeshOutputs::new();
        a.add_service_entry("east", service_entry("a", "istio-system"));
        let mut b = MeshOutputs::new();
        b.add_service_entry("west", service_entry("b", "istio-system"));

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab, ba);
        assert_eq!(ab.clusters().len(), 2);
    }
}
