use kube::CustomResourceExt;
use mesh_failover::crd::{FailoverService, KubernetesCluster, Mesh, MeshService, VirtualMesh};

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        FailoverService::crd(),
        MeshService::crd(),
        Mesh::crd(),
        VirtualMesh::crd(),
        KubernetesCluster::crd(),
    ];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
