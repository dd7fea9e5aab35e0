//! In-memory collaborators for controller tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::ResourceExt;

use crate::crd::{FailoverService, KubernetesCluster, Mesh, MeshService, ResourceRef, VirtualMesh};
use crate::error::{Error, Result};
use crate::failover::ManagedArtifact;

use super::clients::{ArtifactStore, ClusterClientFactory, SnapshotSource, StatusWriter};

/// Fixed inputs, optionally failing one list call
#[derive(Clone, Default)]
pub struct FakeSource {
    pub failover_services: Vec<FailoverService>,
    pub mesh_services: Vec<MeshService>,
    pub meshes: Vec<Mesh>,
    pub clusters: Vec<KubernetesCluster>,
    pub virtual_meshes: Vec<VirtualMesh>,
    pub fail_meshes: bool,
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn list_failover_services(&self) -> Result<Vec<FailoverService>> {
        Ok(self.failover_services.clone())
    }

    async fn list_mesh_services(&self) -> Result<Vec<MeshService>> {
        Ok(self.mesh_services.clone())
    }

    async fn list_meshes(&self) -> Result<Vec<Mesh>> {
        if self.fail_meshes {
            return Err(Error::BackendUnavailable("meshes".to_string()));
        }
        Ok(self.meshes.clone())
    }

    async fn list_clusters(&self) -> Result<Vec<KubernetesCluster>> {
        Ok(self.clusters.clone())
    }

    async fn list_virtual_meshes(&self) -> Result<Vec<VirtualMesh>> {
        Ok(self.virtual_meshes.clone())
    }
}

/// Records written statuses; writes for names in `failing` fail
#[derive(Clone, Default)]
pub struct FakeStatusWriter {
    pub written: Arc<Mutex<Vec<FailoverService>>>,
    pub failing: HashSet<String>,
}

#[async_trait]
impl StatusWriter for FakeStatusWriter {
    async fn update_status(&self, fs: &FailoverService) -> Result<()> {
        if self.failing.contains(&fs.name_any()) {
            return Err(Error::BackendUnavailable(format!("status {}", fs.name_any())));
        }
        self.written.lock().unwrap().push(fs.clone());
        Ok(())
    }
}

type ClusterState<K> = Arc<Mutex<HashMap<String, BTreeMap<ResourceRef, K>>>>;

/// Artifacts of one kind in every cluster; clusters in `unreachable` refuse clients
pub struct FakeClusters<K> {
    pub state: ClusterState<K>,
    pub unreachable: HashSet<String>,
}

impl<K> Default for FakeClusters<K> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            unreachable: HashSet::new(),
        }
    }
}

impl<K: ManagedArtifact> FakeClusters<K> {
    pub fn seed(&self, cluster: &str, artifact: K) {
        self.state
            .lock()
            .unwrap()
            .entry(cluster.to_string())
            .or_default()
            .insert(ResourceRef::from_resource(&artifact), artifact);
    }

    /// Sorted `namespace/name` keys present in `cluster`
    pub fn keys(&self, cluster: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .get(cluster)
            .map(|objects| objects.keys().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, cluster: &str, key: &ResourceRef) -> Option<K> {
        self.state
            .lock()
            .unwrap()
            .get(cluster)
            .and_then(|objects| objects.get(key).cloned())
    }
}

#[async_trait]
impl<K: ManagedArtifact> ClusterClientFactory<K> for FakeClusters<K> {
    async fn client_for(&self, cluster: &str) -> Result<Box<dyn ArtifactStore<K>>> {
        if self.unreachable.contains(cluster) {
            return Err(Error::UnknownCluster(cluster.to_string()));
        }
        Ok(Box::new(FakeStore {
            cluster: cluster.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeStore<K> {
    cluster: String,
    state: ClusterState<K>,
}

fn matches_selector<K: ResourceExt>(obj: &K, selector: &str) -> bool {
    match selector.split_once('=') {
        Some((key, value)) => obj.labels().get(key).map(String::as_str) == Some(value),
        None => obj.labels().contains_key(selector),
    }
}

#[async_trait]
impl<K: ManagedArtifact> ArtifactStore<K> for FakeStore<K> {
    async fn list(&self, selector: &str) -> Result<Vec<K>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .get(&self.cluster)
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| matches_selector(*o, selector))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(&self, artifact: &K) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .entry(self.cluster.clone())
            .or_default()
            .insert(ResourceRef::from_resource(artifact), artifact.clone());
        Ok(())
    }

    async fn delete(&self, key: &ResourceRef) -> Result<()> {
        if let Some(objects) = self.state.lock().unwrap().get_mut(&self.cluster) {
            objects.remove(key);
        }
        Ok(())
    }
}
