//! Unit tests for CRD serialization and helpers

#[cfg(test)]
mod failover_service_serialization {
    use crate::crd::{ApprovalStatus, FailoverService, FailoverServiceStatus};

    const MANIFEST: &str = r#"
apiVersion: networking.meshfailover.io/v1alpha1
kind: FailoverService
metadata:
  name: reviews-failover
  namespace: bookinfo
  generation: 3
spec:
  hostname: reviews-failover.bookinfo.global
  port:
    number: 9080
    name: http
    protocol: HTTP
  targetService:
    name: reviews
    namespace: bookinfo
    cluster: east
  failoverServices:
    - name: reviews
      namespace: bookinfo
      cluster: west
    - name: reviews-backup
      namespace: bookinfo
      cluster: central
  meshes:
    - name: istio-east
      namespace: mesh-system
"#;

    #[test]
    fn test_manifest_deserializes_with_priority_order() {
        let fs: FailoverService = serde_yaml::from_str(MANIFEST).unwrap();

        assert_eq!(fs.spec.hostname, "reviews-failover.bookinfo.global");
        assert_eq!(fs.spec.port.number, 9080);
        assert_eq!(fs.spec.target_service.cluster, "east");
        let clusters: Vec<&str> = fs
            .spec
            .failover_services
            .iter()
            .map(|s| s.cluster.as_str())
            .collect();
        assert_eq!(clusters, vec!["west", "central"]);
        assert_eq!(fs.spec.namespace, None);
        assert_eq!(fs.generation(), 3);
        assert!(fs.status.is_none());
    }

    #[test]
    fn test_status_serializes_camel_case_states() {
        let status = FailoverServiceStatus {
            observed_generation: Some(2),
            validation_status: Some(ApprovalStatus::accepted()),
            translation_status: Some(ApprovalStatus::processing_error("boom")),
            translator_errors: vec![],
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["observedGeneration"], 2);
        assert_eq!(json["validationStatus"]["state"], "ACCEPTED");
        assert_eq!(json["translationStatus"]["state"], "PROCESSING_ERROR");
        assert_eq!(json["translationStatus"]["message"], "boom");
    }

    #[test]
    fn test_freshness_gate() {
        let mut fs: FailoverService = serde_yaml::from_str(MANIFEST).unwrap();
        fs.metadata.generation = Some(4);

        let mut status = FailoverServiceStatus {
            observed_generation: Some(4),
            validation_status: Some(ApprovalStatus::accepted()),
            ..Default::default()
        };
        assert!(status.is_ready_for_translation(fs.generation()));

        status.observed_generation = Some(3);
        assert!(!status.is_ready_for_translation(fs.generation()));

        status.observed_generation = Some(4);
        status.validation_status = Some(ApprovalStatus::invalid("nope"));
        assert!(!status.is_ready_for_translation(fs.generation()));
    }
}

#[cfg(test)]
mod discovery_serialization {
    use crate::crd::{Mesh, MeshService, MeshType};

    #[test]
    fn test_mesh_type_is_externally_tagged() {
        let mesh: Mesh = serde_json::from_value(serde_json::json!({
            "apiVersion": "discovery.meshfailover.io/v1alpha1",
            "kind": "Mesh",
            "metadata": {"name": "istio-east", "namespace": "mesh-system"},
            "spec": {
                "cluster": {"name": "east", "namespace": "mesh-system"},
                "meshType": {"istio1_6": {"installationNamespace": "istio-system"}}
            }
        }))
        .unwrap();

        assert_eq!(mesh.cluster(), "east");
        assert!(matches!(mesh.spec.mesh_type, MeshType::Istio1_6(_)));
        assert_eq!(
            mesh.spec.mesh_type.installation_namespace(),
            Some("istio-system")
        );
        assert!(mesh.spec.mesh_type.supports_failover());
    }

    #[test]
    fn test_other_mesh_is_not_supported() {
        let mesh_type: MeshType =
            serde_json::from_value(serde_json::json!({"other": {"technology": "linkerd"}}))
                .unwrap();

        assert!(!mesh_type.supports_failover());
        assert_eq!(mesh_type.technology(), "linkerd");
        assert_eq!(mesh_type.installation_namespace(), None);
    }

    #[test]
    fn test_mesh_service_helpers() {
        let service: MeshService = serde_yaml::from_str(
            r#"
apiVersion: discovery.meshfailover.io/v1alpha1
kind: MeshService
metadata:
  name: reviews-bookinfo-west
  namespace: mesh-system
spec:
  kubeService:
    ref:
      name: reviews
      namespace: bookinfo
      cluster: west
    ports:
      - number: 9080
        name: http
        protocol: HTTP
  mesh:
    name: istio-west
    namespace: mesh-system
  federation:
    multiclusterDnsName: reviews.bookinfo.west.global
status:
  appliedTrafficPolicies:
    - ref:
        name: outlier
        namespace: bookinfo
      spec:
        outlierDetection:
          consecutiveErrors: 3
"#,
        )
        .unwrap();

        assert_eq!(service.cluster(), "west");
        assert_eq!(service.local_fqdn(), "reviews.bookinfo.svc.cluster.local");
        assert_eq!(
            service.multicluster_dns_name(),
            Some("reviews.bookinfo.west.global")
        );
        assert!(service.has_outlier_detection());
    }
}

#[cfg(test)]
mod crd_generation {
    use kube::CustomResourceExt;

    use crate::crd::{FailoverService, KubernetesCluster, Mesh, MeshService, VirtualMesh};

    #[test]
    fn test_crds_have_expected_groups() {
        assert_eq!(
            FailoverService::crd().spec.group,
            "networking.meshfailover.io"
        );
        assert_eq!(VirtualMesh::crd().spec.group, "networking.meshfailover.io");
        assert_eq!(MeshService::crd().spec.group, "discovery.meshfailover.io");
        assert_eq!(Mesh::crd().spec.group, "discovery.meshfailover.io");
        assert_eq!(
            KubernetesCluster::crd().spec.group,
            "discovery.meshfailover.io"
        );
    }

    #[test]
    fn test_failover_service_has_status_subresource() {
        let crd = FailoverService::crd();
        let version = &crd.spec.versions[0];
        assert!(version
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some());
    }
}
