//! Mesh-specific translation of FailoverServices
//!
//! A translator turns one validated FailoverService plus its backing
//! services, already in priority order, into artifacts for the data plane
//! of every mesh the FailoverService targets.

mod istio;

use async_trait::async_trait;
use thiserror::Error;

use crate::crd::{FailoverService, Mesh, MeshService, TranslatorErrorStatus};

use super::snapshot::MeshOutputs;

pub use istio::{envoy_cluster_name, IstioTranslator, ISTIO_TRANSLATOR_ID};

/// Every problem one translator hit for one FailoverService
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{translator_id}: {}", .problems.join("; "))]
pub struct TranslatorError {
    pub translator_id: String,
    pub problems: Vec<String>,
}

impl TranslatorError {
    pub fn to_status(&self) -> TranslatorErrorStatus {
        TranslatorErrorStatus {
            translator_id: self.translator_id.clone(),
            error_message: self.problems.join("; "),
        }
    }
}

/// Artifacts produced by one translate call, possibly partial when `error` is set
#[derive(Debug, Default)]
pub struct TranslationResult {
    pub outputs: MeshOutputs,
    pub error: Option<TranslatorError>,
}

impl TranslationResult {
    pub fn new(translator_id: &str, outputs: MeshOutputs, problems: Vec<String>) -> Self {
        let error = (!problems.is_empty()).then(|| TranslatorError {
            translator_id: translator_id.to_string(),
            problems,
        });
        Self { outputs, error }
    }
}

/// One implementation per mesh technology.
///
/// `prioritized` is in the exact order of `spec.failoverServices` and must
/// not be reordered. `meshes` is every Mesh in the snapshot.
#[async_trait]
pub trait FailoverTranslator: Send + Sync {
    fn id(&self) -> &'static str;

    async fn translate(
        &self,
        fs: &FailoverService,
        prioritized: &[&MeshService],
        meshes: &[Mesh],
    ) -> TranslationResult;
}
