//! FailoverService Custom Resource Definition
//!
//! A FailoverService declares a hostname/port that should be served by an
//! ordered list of backing services spread across clusters. The first entry
//! in `failoverServices` is the most preferred destination; later entries are
//! only used when the earlier ones are ejected by outlier detection.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApprovalStatus, ClusterObjectRef, ResourceRef, ServicePort};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.meshfailover.io",
    version = "v1alpha1",
    kind = "FailoverService",
    namespaced,
    status = "FailoverServiceStatus",
    shortname = "fos",
    printcolumn = r#"{"name":"Hostname","type":"string","jsonPath":".spec.hostname"}"#,
    printcolumn = r#"{"name":"Validation","type":"string","jsonPath":".status.validationStatus.state"}"#,
    printcolumn = r#"{"name":"Translation","type":"string","jsonPath":".status.translationStatus.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FailoverServiceSpec {
    /// Hostname clients use to reach the failover service
    pub hostname: String,

    /// Port clients use to reach the failover service
    pub port: ServicePort,

    /// Namespace for the generated host entry in each target mesh.
    /// Defaults to the mesh installation namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// The service whose traffic is being protected
    pub target_service: ClusterObjectRef,

    /// Backing services in priority order, most preferred first
    #[serde(default)]
    pub failover_services: Vec<ClusterObjectRef>,

    /// Meshes whose data planes should be configured
    #[serde(default)]
    pub meshes: Vec<ResourceRef>,
}

/// Status subresource of a FailoverService
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailoverServiceStatus {
    /// Generation last examined by validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    pub validation_status: Option<ApprovalStatus>,

    pub translation_status: Option<ApprovalStatus>,

    #[serde(default)]
    pub translator_errors: Vec<TranslatorErrorStatus>,
}

/// Failure reported by one translator for one FailoverService
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranslatorErrorStatus {
    pub translator_id: String,
    pub error_message: String,
}

impl FailoverService {
    /// Current `metadata.generation`, zero when unset
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    /// Copy of this object carrying `status` instead of its stored status
    pub fn with_status(&self, status: FailoverServiceStatus) -> FailoverService {
        let mut merged = self.clone();
        merged.status = Some(status);
        merged
    }
}

impl FailoverServiceStatus {
    /// Freshness gate: accepted by validation at the given generation
    pub fn is_ready_for_translation(&self, generation: i64) -> bool {
        let accepted = self
            .validation_status
            .as_ref()
            .map(ApprovalStatus::is_accepted)
            .unwrap_or(false);
        accepted && self.observed_generation == Some(generation)
    }
}
