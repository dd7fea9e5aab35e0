//! Istio translation
//!
//! For every targeted Istio mesh the translator emits:
//! - a mesh-internal ServiceEntry resolving the failover hostname to a
//!   virtual IP on the mesh's cluster
//! - an EnvoyFilter replacing the default outbound cluster for the hostname
//!   with an aggregate cluster whose members are the backing services in
//!   priority order

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::ObjectMeta;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::crd::istio::{
    ApplyTo, ClusterMatch, EnvoyConfigObjectMatch, EnvoyConfigObjectPatch, EnvoyPatch, IstioPort,
    PatchContext, PatchOperation, ServiceEntryLocation, ServiceEntryResolution,
};
use crate::crd::{
    EnvoyFilter, EnvoyFilterSpec, FailoverService, Mesh, MeshService, MeshType, ResourceRef,
    ServiceEntry, ServiceEntrySpec,
};
use crate::failover::ip_assigner::IpAssigner;
use crate::failover::labels::OwnershipLabels;
use crate::failover::snapshot::{ArtifactKey, MeshOutputs};

use super::{FailoverTranslator, TranslationResult};

pub const ISTIO_TRANSLATOR_ID: &str = "istio-translator";

const AGGREGATE_CLUSTER_NAME: &str = "envoy.clusters.aggregate";
const AGGREGATE_CONNECT_TIMEOUT: &str = "1s";
const AGGREGATE_LB_POLICY: &str = "CLUSTER_PROVIDED";

/// Typed config of the aggregate cluster extension, Envoy v2 API (Istio 1.5)
const AGGREGATE_CONFIG_TYPE_V2: &str =
    "type.googleapis.com/envoy.config.cluster.aggregate.v2alpha.ClusterConfig";

/// Typed config of the aggregate cluster extension, Envoy v3 API (Istio 1.6+)
const AGGREGATE_CONFIG_TYPE_V3: &str =
    "type.googleapis.com/envoy.extensions.clusters.aggregate.v3.ClusterConfig";

/// Name Istio gives the outbound Envoy cluster of `hostname:port`
pub fn envoy_cluster_name(port: u32, hostname: &str) -> String {
    format!("outbound|{}||{}", port, hostname)
}

/// Generated artifacts share the FailoverService's name and namespace
fn artifact_name(owner: &ResourceRef) -> String {
    format!("{}.{}", owner.name, owner.namespace)
}

/// Istio installation details needed to render artifacts for one mesh
struct IstioTarget<'a> {
    mesh: &'a Mesh,
    installation_namespace: &'a str,
    aggregate_config_type: &'static str,
}

impl<'a> IstioTarget<'a> {
    /// `None` for meshes this translator does not handle
    fn from_mesh(mesh: &'a Mesh) -> Option<Self> {
        let aggregate_config_type = match &mesh.spec.mesh_type {
            MeshType::Istio1_5(_) => AGGREGATE_CONFIG_TYPE_V2,
            MeshType::Istio1_6(_) => AGGREGATE_CONFIG_TYPE_V3,
            MeshType::Other(_) => return None,
        };
        Some(Self {
            mesh,
            installation_namespace: mesh.spec.mesh_type.installation_namespace()?,
            aggregate_config_type,
        })
    }

    fn cluster(&self) -> &str {
        self.mesh.cluster()
    }
}

/// Translates FailoverServices for Istio 1.5 and 1.6 meshes
pub struct IstioTranslator {
    ip_assigner: Arc<dyn IpAssigner>,
    labels: OwnershipLabels,
}

impl IstioTranslator {
    pub fn new(ip_assigner: Arc<dyn IpAssigner>, labels: OwnershipLabels) -> Self {
        Self {
            ip_assigner,
            labels,
        }
    }

    /// Ordered aggregate cluster members as seen from the mesh's cluster
    fn aggregate_members(
        &self,
        target: &IstioTarget<'_>,
        prioritized: &[&MeshService],
        problems: &mut Vec<String>,
    ) -> Vec<String> {
        let mut members = Vec::new();
        for service in prioritized {
            let hostname = if service.cluster() == target.cluster() {
                service.local_fqdn()
            } else {
                match service.multicluster_dns_name() {
                    Some(name) => name.to_string(),
                    None => {
                        problems.push(format!(
                            "service {} has no multicluster DNS name for remote mesh {}",
                            service.identity(),
                            ResourceRef::from_resource(target.mesh)
                        ));
                        continue;
                    }
                }
            };
            members.extend(
                service
                    .spec
                    .kube_service
                    .ports
                    .iter()
                    .map(|port| envoy_cluster_name(port.number, &hostname)),
            );
        }
        members
    }

    fn service_entry(
        &self,
        fs: &FailoverService,
        owner: &ResourceRef,
        target: &IstioTarget<'_>,
        ip: Ipv4Addr,
    ) -> ServiceEntry {
        let namespace = fs
            .spec
            .namespace
            .clone()
            .unwrap_or_else(|| target.installation_namespace.to_string());
        let port = &fs.spec.port;

        ServiceEntry {
            metadata: ObjectMeta {
                name: Some(artifact_name(owner)),
                namespace: Some(namespace),
                labels: Some(self.labels.for_owner(owner)),
                ..Default::default()
            },
            spec: ServiceEntrySpec {
                hosts: vec![fs.spec.hostname.clone()],
                addresses: vec![ip.to_string()],
                ports: vec![IstioPort {
                    number: port.number,
                    protocol: port.protocol.clone(),
                    name: port.name.clone(),
                }],
                location: ServiceEntryLocation::MeshInternal,
                resolution: ServiceEntryResolution::Dns,
            },
        }
    }

    /// REMOVE the default cluster, then ADD the aggregate cluster under the same name
    fn envoy_filter(
        &self,
        fs: &FailoverService,
        owner: &ResourceRef,
        target: &IstioTarget<'_>,
        members: Vec<String>,
    ) -> EnvoyFilter {
        let cluster_name = envoy_cluster_name(fs.spec.port.number, &fs.spec.hostname);
        let cluster_match = EnvoyConfigObjectMatch {
            context: PatchContext::Any,
            cluster: Some(ClusterMatch {
                name: cluster_name.clone(),
            }),
        };

        let aggregate_cluster = json!({
            "name": cluster_name,
            "connect_timeout": AGGREGATE_CONNECT_TIMEOUT,
            "lb_policy": AGGREGATE_LB_POLICY,
            "cluster_type": {
                "name": AGGREGATE_CLUSTER_NAME,
                "typed_config": {
                    "@type": target.aggregate_config_type,
                    "clusters": members,
                }
            }
        });

        EnvoyFilter {
            metadata: ObjectMeta {
                name: Some(artifact_name(owner)),
                namespace: Some(target.installation_namespace.to_string()),
                labels: Some(self.labels.for_owner(owner)),
                ..Default::default()
            },
            spec: EnvoyFilterSpec {
                config_patches: vec![
                    EnvoyConfigObjectPatch {
                        apply_to: ApplyTo::Cluster,
                        match_: Some(cluster_match.clone()),
                        patch: EnvoyPatch {
                            operation: PatchOperation::Remove,
                            value: None,
                        },
                    },
                    EnvoyConfigObjectPatch {
                        apply_to: ApplyTo::Cluster,
                        match_: Some(cluster_match),
                        patch: EnvoyPatch {
                            operation: PatchOperation::Add,
                            value: Some(aggregate_cluster),
                        },
                    },
                ],
            },
        }
    }
}

#[async_trait]
impl FailoverTranslator for IstioTranslator {
    fn id(&self) -> &'static str {
        ISTIO_TRANSLATOR_ID
    }

    #[instrument(
        skip(self, fs, prioritized, meshes),
        fields(name = %fs.metadata.name.as_deref().unwrap_or_default(), services = prioritized.len())
    )]
    async fn translate(
        &self,
        fs: &FailoverService,
        prioritized: &[&MeshService],
        meshes: &[Mesh],
    ) -> TranslationResult {
        let owner = ResourceRef::from_resource(fs);
        let mut outputs = MeshOutputs::new();

        if prioritized.is_empty() {
            return TranslationResult::new(
                self.id(),
                outputs,
                vec!["at least one failover service is required".to_string()],
            );
        }

        let mut problems = Vec::new();
        // Artifact locations already taken, and the mesh they were generated for
        let mut claimed: BTreeMap<ArtifactKey, &ResourceRef> = BTreeMap::new();
        for mesh_ref in &fs.spec.meshes {
            let Some(mesh) = meshes
                .iter()
                .find(|m| ResourceRef::from_resource(*m) == *mesh_ref)
            else {
                problems.push(format!("mesh {} not found", mesh_ref));
                continue;
            };
            let Some(target) = IstioTarget::from_mesh(mesh) else {
                debug!(
                    "Skipping mesh {} of type {}",
                    mesh_ref,
                    mesh.spec.mesh_type.technology()
                );
                continue;
            };

            let mut mesh_problems = Vec::new();
            let members = self.aggregate_members(&target, prioritized, &mut mesh_problems);
            if !mesh_problems.is_empty() {
                problems.extend(mesh_problems);
                continue;
            }

            let ip = match self
                .ip_assigner
                .assign(target.cluster(), &fs.spec.hostname)
                .await
            {
                Ok(ip) => ip,
                Err(e) => {
                    problems.push(format!("mesh {}: {}", mesh_ref, e));
                    continue;
                }
            };

            let cluster = target.cluster().to_string();
            let entry = self.service_entry(fs, &owner, &target, ip);
            let filter = self.envoy_filter(fs, &owner, &target, members);
            let keys = [
                ArtifactKey::new(&cluster, &entry),
                ArtifactKey::new(&cluster, &filter),
            ];
            if let Some((key, other)) = keys
                .iter()
                .find_map(|key| claimed.get(key).map(|other| (key, *other)))
            {
                problems.push(format!(
                    "mesh {} would overwrite {} generated for mesh {}",
                    mesh_ref, key, other
                ));
                continue;
            }
            claimed.extend(keys.into_iter().map(|key| (key, mesh_ref)));

            outputs.add_service_entry(&cluster, entry);
            outputs.add_envoy_filter(&cluster, filter);
            debug!("Translated {} for mesh {} on cluster {}", owner, mesh_ref, cluster);
        }

        if !problems.is_empty() {
            warn!(
                "Translation of {} finished with {} problem(s)",
                owner,
                problems.len()
            );
        }
        TranslationResult::new(self.id(), outputs, problems)
    }
}
