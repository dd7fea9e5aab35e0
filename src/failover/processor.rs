//! Pass orchestration
//!
//! The processor validates every FailoverService in a snapshot, applies the
//! freshness gate and runs the registered translators for the ready ones.
//! A failure for one FailoverService never affects its siblings.

use tracing::{debug, info, instrument, warn};

use crate::crd::{
    ApprovalStatus, ClusterObjectRef, FailoverService, FailoverServiceStatus, MeshService,
    ResourceRef,
};

use super::snapshot::{InputSnapshot, MeshOutputs, OutputSnapshot, StatusUpdate};
use super::translation::{FailoverTranslator, TranslatorError};
use super::validation::FailoverValidator;

pub struct FailoverProcessor {
    validator: Box<dyn FailoverValidator>,
    translators: Vec<Box<dyn FailoverTranslator>>,
}

impl FailoverProcessor {
    pub fn new(validator: impl FailoverValidator + 'static) -> Self {
        Self {
            validator: Box::new(validator),
            translators: Vec::new(),
        }
    }

    /// Register a translator. Translators run in registration order.
    pub fn with_translator(mut self, translator: impl FailoverTranslator + 'static) -> Self {
        self.translators.push(Box::new(translator));
        self
    }

    pub fn translator_ids(&self) -> Vec<&'static str> {
        self.translators.iter().map(|t| t.id()).collect()
    }

    /// Compute statuses and artifacts for every FailoverService in `snapshot`
    #[instrument(skip_all, fields(failover_services = snapshot.failover_services().len()))]
    pub async fn process(&self, snapshot: &InputSnapshot) -> OutputSnapshot {
        let verdicts = self.validator.validate(snapshot);
        let mut output = OutputSnapshot::default();

        for fs in snapshot.failover_services() {
            let key = ResourceRef::from_resource(fs);
            let mut status = fs.status.clone().unwrap_or_default();
            if let Some(verdict) = verdicts.get(&key) {
                verdict.apply_to(&mut status);
            }

            if !status.is_ready_for_translation(fs.generation()) {
                debug!(
                    "Not translating {}: validation not accepted for generation {}",
                    key,
                    fs.generation()
                );
                output.retained.insert(key.clone());
                output.statuses.push(StatusUpdate { key, status });
                continue;
            }

            match resolve_prioritized(fs, snapshot) {
                Ok(prioritized) => {
                    let (outputs, errors) = self.translate(fs, &prioritized, snapshot).await;
                    record_translation(&mut status, &errors);
                    if errors.is_empty() {
                        info!("Translated FailoverService {}", key);
                    } else {
                        warn!(
                            "FailoverService {} translated with {} translator error(s)",
                            key,
                            errors.len()
                        );
                        output.retained.insert(key.clone());
                    }
                    output.mesh_outputs.merge(outputs);
                }
                Err(missing) => {
                    warn!(
                        "FailoverService {} references unknown service {}",
                        key, missing
                    );
                    status.translation_status = Some(ApprovalStatus::processing_error(format!(
                        "failover service {} not found",
                        missing
                    )));
                    status.translator_errors.clear();
                    output.retained.insert(key.clone());
                }
            }

            output.statuses.push(StatusUpdate { key, status });
        }

        output
    }

    async fn translate(
        &self,
        fs: &FailoverService,
        prioritized: &[&MeshService],
        snapshot: &InputSnapshot,
    ) -> (MeshOutputs, Vec<TranslatorError>) {
        let mut outputs = MeshOutputs::new();
        let mut errors = Vec::new();
        for translator in &self.translators {
            let result = translator
                .translate(fs, prioritized, snapshot.meshes())
                .await;
            outputs.merge(result.outputs);
            errors.extend(result.error);
        }
        (outputs, errors)
    }
}

/// Backing services in declared order, or the first reference that does not resolve
fn resolve_prioritized<'a>(
    fs: &FailoverService,
    snapshot: &'a InputSnapshot,
) -> Result<Vec<&'a MeshService>, ClusterObjectRef> {
    fs.spec
        .failover_services
        .iter()
        .map(|reference| {
            snapshot
                .find_mesh_service(reference)
                .ok_or_else(|| reference.clone())
        })
        .collect()
}

fn record_translation(status: &mut FailoverServiceStatus, errors: &[TranslatorError]) {
    status.translator_errors = errors.iter().map(TranslatorError::to_status).collect();
    status.translation_status = Some(if errors.is_empty() {
        ApprovalStatus::accepted()
    } else {
        ApprovalStatus::processing_error(
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    });
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::crd::{Mesh, StatusState};
    use crate::failover::test_fixtures::*;
    use crate::failover::translation::TranslationResult;
    use crate::failover::validation::{TopologyValidator, ValidationOutcome, ValidationResults};
    use crate::failover::{IstioTranslator, OwnershipLabels, VirtualIpAssigner};

    /// Records the prioritized identities of every call
    #[derive(Clone, Default)]
    struct RecordingTranslator {
        calls: Arc<Mutex<Vec<Vec<ClusterObjectRef>>>>,
    }

    #[async_trait]
    impl FailoverTranslator for RecordingTranslator {
        fn id(&self) -> &'static str {
            "recording"
        }

        async fn translate(
            &self,
            _fs: &FailoverService,
            prioritized: &[&MeshService],
            _meshes: &[Mesh],
        ) -> TranslationResult {
            self.calls
                .lock()
                .unwrap()
                .push(prioritized.iter().map(|s| s.identity().clone()).collect());
            TranslationResult::default()
        }
    }

    /// Fails for one FailoverService name
    struct FailingTranslator(&'static str);

    #[async_trait]
    impl FailoverTranslator for FailingTranslator {
        fn id(&self) -> &'static str {
            "failing"
        }

        async fn translate(
            &self,
            fs: &FailoverService,
            _prioritized: &[&MeshService],
            _meshes: &[Mesh],
        ) -> TranslationResult {
            let problems = if fs.metadata.name.as_deref() == Some(self.0) {
                vec!["boom".to_string()]
            } else {
                vec![]
            };
            TranslationResult::new(self.id(), MeshOutputs::new(), problems)
        }
    }

    /// Accepts everything but reports a fixed generation
    struct FixedGenerationValidator(i64);

    impl FailoverValidator for FixedGenerationValidator {
        fn validate(&self, snapshot: &InputSnapshot) -> ValidationResults {
            snapshot
                .failover_services()
                .iter()
                .map(|fs| {
                    (
                        ResourceRef::from_resource(fs),
                        ValidationOutcome {
                            observed_generation: self.0,
                            validation_status: ApprovalStatus::accepted(),
                        },
                    )
                })
                .collect()
        }
    }

    fn topology(failover_services: Vec<FailoverService>) -> InputSnapshot {
        InputSnapshot::builder()
            .failover_services(failover_services)
            .mesh_services(vec![
                mesh_service("reviews", "east", "istio-east", true),
                mesh_service("reviews", "west", "istio-west", true),
                mesh_service("ratings", "west", "istio-west", true),
            ])
            .meshes(vec![istio_mesh("istio-east", "east"), istio_mesh("istio-west", "west")])
            .virtual_meshes(vec![virtual_mesh("global", &["istio-east", "istio-west"])])
            .build()
    }

    fn reviews_failover(name: &str) -> FailoverService {
        failover_service(
            name,
            ("reviews", "east"),
            &[("reviews", "west"), ("ratings", "west"), ("reviews", "east")],
            &["istio-east"],
        )
    }

    #[tokio::test]
    async fn test_translators_receive_services_in_declared_order() {
        let recorder = RecordingTranslator::default();
        let processor = FailoverProcessor::new(TopologyValidator::new()).with_translator(recorder.clone());

        let output = processor.process(&topology(vec![reviews_failover("a")])).await;

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![vec![
                ClusterObjectRef::new("reviews", NS, "west"),
                ClusterObjectRef::new("ratings", NS, "west"),
                ClusterObjectRef::new("reviews", NS, "east"),
            ]]
        );
        let status = output.status_of(&ResourceRef::new("a", NS)).unwrap();
        assert_eq!(status.observed_generation, Some(1));
        assert!(status.translation_status.as_ref().unwrap().is_accepted());
        assert!(output.retained.is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_resource_does_not_affect_siblings() {
        let mut unresolvable = reviews_failover("unresolvable");
        unresolvable.spec.failover_services.push(ClusterObjectRef::new("ghost", NS, "west"));
        let snapshot = topology(vec![
            reviews_failover("a"),
            reviews_failover("broken"),
            unresolvable,
            reviews_failover("b"),
        ]);

        // Resolution failures are only reachable past validation, so accept everything
        let processor = FailoverProcessor::new(FixedGenerationValidator(1))
            .with_translator(FailingTranslator("broken"));
        let output = processor.process(&snapshot).await;

        assert_eq!(output.statuses.len(), 4);
        for name in ["a", "b"] {
            let status = output.status_of(&ResourceRef::new(name, NS)).unwrap();
            assert!(status.translation_status.as_ref().unwrap().is_accepted());
            assert!(status.translator_errors.is_empty());
        }

        let broken = output.status_of(&ResourceRef::new("broken", NS)).unwrap();
        assert_eq!(
            broken.translation_status.as_ref().unwrap().state,
            StatusState::ProcessingError
        );
        assert_eq!(broken.translator_errors.len(), 1);
        assert_eq!(broken.translator_errors[0].translator_id, "failing");
        assert_eq!(broken.translator_errors[0].error_message, "boom");

        let unresolved = output
            .status_of(&ResourceRef::new("unresolvable", NS))
            .unwrap();
        let translation = unresolved.translation_status.as_ref().unwrap();
        assert_eq!(translation.state, StatusState::ProcessingError);
        assert!(translation.message.contains("bookinfo/ghost@west"));

        let retained: Vec<&str> = output.retained.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(retained, vec!["broken", "unresolvable"]);
    }

    #[tokio::test]
    async fn test_stale_generation_is_never_translated() {
        let recorder = RecordingTranslator::default();
        let mut fs = reviews_failover("a");
        fs.metadata.generation = Some(2);
        fs.status = Some(FailoverServiceStatus {
            observed_generation: Some(2),
            validation_status: Some(ApprovalStatus::accepted()),
            translation_status: Some(ApprovalStatus::accepted()),
            translator_errors: vec![],
        });

        let processor =
            FailoverProcessor::new(FixedGenerationValidator(1)).with_translator(recorder.clone());
        let output = processor.process(&topology(vec![fs])).await;

        assert!(recorder.calls.lock().unwrap().is_empty());
        let status = output.status_of(&ResourceRef::new("a", NS)).unwrap();
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.translation_status, Some(ApprovalStatus::accepted()));
        assert!(output.retained.contains(&ResourceRef::new("a", NS)));
        assert!(output.mesh_outputs.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_resource_keeps_previous_translation_status() {
        let recorder = RecordingTranslator::default();
        let mut fs = failover_service("bad", ("reviews", "east"), &[], &["istio-east"]);
        fs.status = Some(FailoverServiceStatus {
            translation_status: Some(ApprovalStatus::accepted()),
            ..Default::default()
        });

        let processor = FailoverProcessor::new(TopologyValidator::new()).with_translator(recorder.clone());
        let output = processor.process(&topology(vec![fs])).await;

        assert!(recorder.calls.lock().unwrap().is_empty());
        let status = output.status_of(&ResourceRef::new("bad", NS)).unwrap();
        assert_eq!(
            status.validation_status.as_ref().unwrap().state,
            StatusState::Invalid
        );
        assert_eq!(status.translation_status, Some(ApprovalStatus::accepted()));
    }

    #[tokio::test]
    async fn test_repeated_passes_are_idempotent() {
        let assigner = Arc::new(VirtualIpAssigner::from_cidr("240.0.0.0/4").unwrap());
        let processor = FailoverProcessor::new(TopologyValidator::new())
            .with_translator(IstioTranslator::new(assigner, OwnershipLabels::default()));

        let first = processor.process(&topology(vec![reviews_failover("a")])).await;
        let status = first.statuses[0].status.clone();

        let mut applied = reviews_failover("a");
        applied.status = Some(status.clone());
        let second = processor.process(&topology(vec![applied])).await;

        assert_eq!(second.statuses[0].status, status);
        assert_eq!(second.mesh_outputs, first.mesh_outputs);
        let entry = second.mesh_outputs.service_entries().values().next().unwrap();
        assert_eq!(entry.spec.addresses, vec![Ipv4Addr::new(240, 0, 0, 1).to_string()]);
    }
}
