//! Response bodies of the REST API

use serde::{Deserialize, Serialize};

use crate::crd::{FailoverService, StatusState};
use kube::ResourceExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// One FailoverService with its current verdicts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverServiceSummary {
    pub name: String,
    pub namespace: String,
    pub hostname: String,
    pub port: u32,
    /// Backing services in priority order, as `namespace/name@cluster`
    pub failover_services: Vec<String>,
    pub observed_generation: Option<i64>,
    pub validation_state: Option<StatusState>,
    pub translation_state: Option<StatusState>,
    pub translator_errors: usize,
}

impl From<&FailoverService> for FailoverServiceSummary {
    fn from(fs: &FailoverService) -> Self {
        let status = fs.status.as_ref();
        Self {
            name: fs.name_any(),
            namespace: fs.namespace().unwrap_or_default(),
            hostname: fs.spec.hostname.clone(),
            port: fs.spec.port.number,
            failover_services: fs
                .spec
                .failover_services
                .iter()
                .map(ToString::to_string)
                .collect(),
            observed_generation: status.and_then(|s| s.observed_generation),
            validation_state: status
                .and_then(|s| s.validation_status.as_ref())
                .map(|v| v.state),
            translation_state: status
                .and_then(|s| s.translation_status.as_ref())
                .map(|t| t.state),
            translator_errors: status.map(|s| s.translator_errors.len()).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverServiceListResponse {
    pub items: Vec<FailoverServiceSummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ApprovalStatus, FailoverServiceStatus};
    use crate::failover::test_fixtures::failover_service;

    #[test]
    fn test_summary_reports_states_and_order() {
        let fs = failover_service(
            "reviews",
            ("reviews", "east"),
            &[("reviews", "west"), ("reviews", "east")],
            &["istio-east"],
        )
        .with_status(FailoverServiceStatus {
            observed_generation: Some(1),
            validation_status: Some(ApprovalStatus::accepted()),
            translation_status: Some(ApprovalStatus::processing_error("boom")),
            translator_errors: vec![],
        });

        let summary = FailoverServiceSummary::from(&fs);
        assert_eq!(summary.port, 9080);
        assert_eq!(
            summary.failover_services,
            vec!["bookinfo/reviews@west", "bookinfo/reviews@east"]
        );
        assert_eq!(summary.validation_state, Some(StatusState::Accepted));
        assert_eq!(summary.translation_state, Some(StatusState::ProcessingError));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["translationState"], "PROCESSING_ERROR");
    }

    #[test]
    fn test_summary_without_status() {
        let fs = failover_service("a", ("a", "east"), &[], &[]);
        let summary = FailoverServiceSummary::from(&fs);
        assert_eq!(summary.validation_state, None);
        assert_eq!(summary.translator_errors, 0);
    }
}
