//! Builders for test inputs shared by the failover and controller tests

use kube::api::ObjectMeta;

use crate::crd::{
    AppliedTrafficPolicy, ClusterObjectRef, Federation, FailoverService, FailoverServiceSpec,
    IstioMesh, KubeService, KubernetesCluster, KubernetesClusterSpec, Mesh, MeshService,
    MeshServiceSpec, MeshServiceStatus, MeshSpec, MeshType, OtherMesh, OutlierDetection,
    ResourceRef, ServiceEntry, ServiceEntrySpec, ServicePort, TrafficPolicySpec, VirtualMesh,
    VirtualMeshSpec,
};

/// Namespace of workload services and FailoverServices
pub const NS: &str = "bookinfo";

/// Namespace of discovery and networking resources
pub const MESH_NS: &str = "mesh-system";

pub const ISTIO_NS: &str = "istio-system";

pub fn mesh_ref(name: &str) -> ResourceRef {
    ResourceRef::new(name, MESH_NS)
}

pub fn http_port() -> ServicePort {
    ServicePort {
        number: 9080,
        name: "http".to_string(),
        protocol: "HTTP".to_string(),
    }
}

/// Discovered service `name` in `cluster`, owned by mesh `mesh`
pub fn mesh_service(name: &str, cluster: &str, mesh: &str, outlier_detection: bool) -> MeshService {
    let policies = if outlier_detection {
        vec![AppliedTrafficPolicy {
            reference: ResourceRef::new("outlier-policy", NS),
            spec: TrafficPolicySpec {
                outlier_detection: Some(OutlierDetection {
                    consecutive_errors: 5,
                    ..Default::default()
                }),
            },
        }]
    } else {
        vec![]
    };

    MeshService {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}-{}", name, NS, cluster)),
            namespace: Some(MESH_NS.to_string()),
            ..Default::default()
        },
        spec: MeshServiceSpec {
            kube_service: KubeService {
                reference: ClusterObjectRef::new(name, NS, cluster),
                ports: vec![http_port()],
            },
            mesh: mesh_ref(mesh),
            federation: Some(Federation {
                multicluster_dns_name: format!("{}.{}.{}.global", name, NS, cluster),
                federated_to_meshes: vec![],
            }),
        },
        status: Some(MeshServiceStatus {
            applied_traffic_policies: policies,
        }),
    }
}

pub fn mesh(name: &str, cluster: &str, mesh_type: MeshType) -> Mesh {
    Mesh {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(MESH_NS.to_string()),
            ..Default::default()
        },
        spec: MeshSpec {
            cluster: ResourceRef::new(cluster, MESH_NS),
            mesh_type,
        },
    }
}

pub fn istio_mesh(name: &str, cluster: &str) -> Mesh {
    mesh(
        name,
        cluster,
        MeshType::Istio1_6(IstioMesh {
            installation_namespace: ISTIO_NS.to_string(),
            version: None,
        }),
    )
}

pub fn other_mesh(name: &str, cluster: &str) -> Mesh {
    mesh(
        name,
        cluster,
        MeshType::Other(OtherMesh {
            technology: "linkerd".to_string(),
            installation_namespace: None,
        }),
    )
}

pub fn virtual_mesh(name: &str, meshes: &[&str]) -> VirtualMesh {
    VirtualMesh {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(MESH_NS.to_string()),
            ..Default::default()
        },
        spec: VirtualMeshSpec {
            display_name: None,
            meshes: meshes.iter().map(|m| mesh_ref(m)).collect(),
        },
    }
}

pub fn cluster(name: &str) -> KubernetesCluster {
    KubernetesCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(MESH_NS.to_string()),
            ..Default::default()
        },
        spec: KubernetesClusterSpec {
            secret_ref: ResourceRef::new(format!("{}-kubeconfig", name), MESH_NS),
            context: None,
        },
    }
}

/// FailoverService at generation 1 with no status.
///
/// `failover` lists `(service, cluster)` pairs in priority order.
pub fn failover_service(
    name: &str,
    target: (&str, &str),
    failover: &[(&str, &str)],
    meshes: &[&str],
) -> FailoverService {
    FailoverService {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: FailoverServiceSpec {
            hostname: format!("{}.{}.global", name, NS),
            port: http_port(),
            namespace: None,
            target_service: ClusterObjectRef::new(target.0, NS, target.1),
            failover_services: failover
                .iter()
                .map(|(svc, cluster)| ClusterObjectRef::new(*svc, NS, *cluster))
                .collect(),
            meshes: meshes.iter().map(|m| mesh_ref(m)).collect(),
        },
        status: None,
    }
}

pub fn service_entry(name: &str, namespace: &str) -> ServiceEntry {
    ServiceEntry {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: ServiceEntrySpec::default(),
    }
}
