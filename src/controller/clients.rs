//! Kubernetes-facing collaborators of the reconciler
//!
//! The reconciler only talks to the outside world through the traits in
//! this module. The `Kube*` types implement them against the API server of
//! the management cluster and of every registered workload cluster.

use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::crd::{
    FailoverService, KubernetesCluster, Mesh, MeshService, ResourceRef, VirtualMesh,
};
use crate::error::{Error, Result};
use crate::failover::ManagedArtifact;

/// Field manager used for server-side apply of generated artifacts
pub const FIELD_MANAGER: &str = "mesh-failover-controller";

/// Secret key holding a registered cluster's kubeconfig
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

// ============================================================================
// Collaborator traits
// ============================================================================

/// One list call per input kind of a pass
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn list_failover_services(&self) -> Result<Vec<FailoverService>>;
    async fn list_mesh_services(&self) -> Result<Vec<MeshService>>;
    async fn list_meshes(&self) -> Result<Vec<Mesh>>;
    async fn list_clusters(&self) -> Result<Vec<KubernetesCluster>>;
    async fn list_virtual_meshes(&self) -> Result<Vec<VirtualMesh>>;
}

/// Writes the status subresource of a FailoverService
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn update_status(&self, fs: &FailoverService) -> Result<()>;
}

/// Cluster-scoped access to one artifact kind
#[async_trait]
pub trait ArtifactStore<K: ManagedArtifact>: Send + Sync {
    /// Every artifact matching `selector`, across namespaces
    async fn list(&self, selector: &str) -> Result<Vec<K>>;

    /// Create or update `artifact`
    async fn upsert(&self, artifact: &K) -> Result<()>;

    /// Delete an artifact. Deleting a missing artifact succeeds.
    async fn delete(&self, key: &ResourceRef) -> Result<()>;
}

/// Hands out an [`ArtifactStore`] for a named cluster
#[async_trait]
pub trait ClusterClientFactory<K: ManagedArtifact>: Send + Sync {
    async fn client_for(&self, cluster: &str) -> Result<Box<dyn ArtifactStore<K>>>;
}

// ============================================================================
// Management cluster
// ============================================================================

async fn list_all<K>(client: &Client) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    let api: Api<K> = Api::all(client.clone());
    Ok(api.list(&ListParams::default()).await?.items)
}

/// Lists inputs from the management cluster
#[derive(Clone)]
pub struct KubeSnapshotSource {
    client: Client,
}

impl KubeSnapshotSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotSource for KubeSnapshotSource {
    async fn list_failover_services(&self) -> Result<Vec<FailoverService>> {
        list_all(&self.client).await
    }

    async fn list_mesh_services(&self) -> Result<Vec<MeshService>> {
        list_all(&self.client).await
    }

    async fn list_meshes(&self) -> Result<Vec<Mesh>> {
        list_all(&self.client).await
    }

    async fn list_clusters(&self) -> Result<Vec<KubernetesCluster>> {
        list_all(&self.client).await
    }

    async fn list_virtual_meshes(&self) -> Result<Vec<VirtualMesh>> {
        list_all(&self.client).await
    }
}

/// Merge patch replacing every status field the controller owns.
///
/// Messages are always present in the serialized status, so an ACCEPTED
/// verdict clears the message of an earlier rejection.
pub fn status_patch(fs: &FailoverService) -> serde_json::Value {
    json!({ "status": fs.status })
}

/// Patches the status subresource with a merge patch
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    #[instrument(skip(self, fs), fields(name = %fs.name_any(), namespace = fs.namespace()))]
    async fn update_status(&self, fs: &FailoverService) -> Result<()> {
        let namespace = fs.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<FailoverService> = Api::namespaced(self.client.clone(), &namespace);

        let patch = status_patch(fs);
        api.patch_status(
            &fs.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        debug!("Updated status of FailoverService {}/{}", namespace, fs.name_any());
        Ok(())
    }
}

// ============================================================================
// Workload clusters
// ============================================================================

/// Resolves cluster names to API clients.
///
/// The local cluster is served by the controller's own client. Any other
/// cluster must be registered as a KubernetesCluster in `namespace`; its
/// client is built from the referenced kubeconfig Secret and cached.
pub struct KubeClusterClients {
    local: Client,
    local_cluster: String,
    namespace: String,
    cache: RwLock<HashMap<String, Client>>,
}

impl KubeClusterClients {
    pub fn new(local: Client, local_cluster: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            local,
            local_cluster: local_cluster.into(),
            namespace: namespace.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Client for `cluster`, connecting on first use
    pub async fn client(&self, cluster: &str) -> Result<Client> {
        if cluster == self.local_cluster {
            return Ok(self.local.clone());
        }
        if let Some(client) = self.cache.read().await.get(cluster) {
            return Ok(client.clone());
        }

        let client = self.connect(cluster).await?;
        self.cache
            .write()
            .await
            .insert(cluster.to_string(), client.clone());
        Ok(client)
    }

    #[instrument(skip(self))]
    async fn connect(&self, cluster: &str) -> Result<Client> {
        let registrations: Api<KubernetesCluster> =
            Api::namespaced(self.local.clone(), &self.namespace);
        let registration = registrations
            .get_opt(cluster)
            .await?
            .ok_or_else(|| Error::UnknownCluster(cluster.to_string()))?;

        let secret_ref = &registration.spec.secret_ref;
        let secrets: Api<Secret> = Api::namespaced(self.local.clone(), &secret_ref.namespace);
        let kubeconfig_error = |message: String| Error::KubeconfigError {
            cluster: cluster.to_string(),
            message,
        };

        let secret = secrets
            .get_opt(&secret_ref.name)
            .await?
            .ok_or_else(|| kubeconfig_error(format!("secret {} not found", secret_ref)))?;
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_SECRET_KEY))
            .ok_or_else(|| {
                kubeconfig_error(format!(
                    "secret {} has no {:?} key",
                    secret_ref, KUBECONFIG_SECRET_KEY
                ))
            })?;
        let yaml = std::str::from_utf8(&raw.0)
            .map_err(|e| kubeconfig_error(format!("kubeconfig is not UTF-8: {}", e)))?;

        let kubeconfig =
            Kubeconfig::from_yaml(yaml).map_err(|e| kubeconfig_error(e.to_string()))?;
        let options = KubeConfigOptions {
            context: registration.spec.context.clone(),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| kubeconfig_error(e.to_string()))?;
        let client = Client::try_from(config)?;

        info!("Connected to registered cluster {}", cluster);
        Ok(client)
    }
}

#[async_trait]
impl<K: ManagedArtifact> ClusterClientFactory<K> for KubeClusterClients {
    async fn client_for(&self, cluster: &str) -> Result<Box<dyn ArtifactStore<K>>> {
        let client = self.client(cluster).await?;
        Ok(Box::new(KubeArtifactStore::<K>::new(client, cluster)))
    }
}

/// Server-side applies artifacts of kind `K` in one cluster
pub struct KubeArtifactStore<K> {
    client: Client,
    cluster: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ManagedArtifact> KubeArtifactStore<K> {
    pub fn new(client: Client, cluster: impl Into<String>) -> Self {
        Self {
            client,
            cluster: cluster.into(),
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: ManagedArtifact> ArtifactStore<K> for KubeArtifactStore<K> {
    async fn list(&self, selector: &str) -> Result<Vec<K>> {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn upsert(&self, artifact: &K) -> Result<()> {
        let namespace = artifact.namespace().unwrap_or_else(|| "default".to_string());
        let name = artifact.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);

        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(artifact),
        )
        .await?;

        debug!(
            "Applied {} {}/{} in cluster {}",
            K::KIND,
            namespace,
            name,
            self.cluster
        );
        Ok(())
    }

    async fn delete(&self, key: &ResourceRef) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!("Deleted {} {} in cluster {}", K::KIND, key, self.cluster);
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::crd::{ApprovalStatus, FailoverServiceStatus, StatusState, TranslatorErrorStatus};
    use crate::failover::test_fixtures::failover_service;

    /// JSON merge patch as the API server applies it (RFC 7386)
    fn apply_merge_patch(target: &mut Value, patch: &Value) {
        let Value::Object(fields) = patch else {
            *target = patch.clone();
            return;
        };
        if !target.is_object() {
            *target = Value::Object(Default::default());
        }
        let object = target.as_object_mut().unwrap();
        for (key, value) in fields {
            if value.is_null() {
                object.remove(key);
            } else {
                apply_merge_patch(object.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }

    #[test]
    fn test_accepted_status_clears_previous_messages() {
        let fs = failover_service("a", ("reviews", "east"), &[("reviews", "east")], &[]);
        let rejected = fs.with_status(FailoverServiceStatus {
            observed_generation: Some(1),
            validation_status: Some(ApprovalStatus::invalid("mesh x not found")),
            translation_status: Some(ApprovalStatus::processing_error("istio-translator: boom")),
            translator_errors: vec![TranslatorErrorStatus {
                translator_id: "istio-translator".to_string(),
                error_message: "boom".to_string(),
            }],
        });
        let accepted = fs.with_status(FailoverServiceStatus {
            observed_generation: Some(2),
            validation_status: Some(ApprovalStatus::accepted()),
            translation_status: Some(ApprovalStatus::accepted()),
            translator_errors: vec![],
        });

        let mut stored = serde_json::to_value(&fs).unwrap();
        apply_merge_patch(&mut stored, &status_patch(&rejected));
        apply_merge_patch(&mut stored, &status_patch(&accepted));

        let stored: FailoverService = serde_json::from_value(stored).unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.observed_generation, Some(2));
        assert_eq!(status.validation_status, Some(ApprovalStatus::accepted()));
        assert_eq!(status.translation_status, Some(ApprovalStatus::accepted()));
        assert!(status.translator_errors.is_empty());
    }

    #[test]
    fn test_status_patch_carries_empty_message() {
        let fs = failover_service("a", ("reviews", "east"), &[], &[]).with_status(
            FailoverServiceStatus {
                validation_status: Some(ApprovalStatus {
                    state: StatusState::Accepted,
                    message: String::new(),
                }),
                ..Default::default()
            },
        );

        let patch = status_patch(&fs);
        assert_eq!(patch["status"]["validationStatus"]["message"], "");
    }
}
