//! FailoverService validation
//!
//! Validation inspects every FailoverService against the full topology in the
//! snapshot and produces a fresh validation verdict for it. Rules are
//! evaluated independently and every violation is reported at once, except
//! for an empty `failoverServices` list which makes every other check moot.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::crd::{
    ApprovalStatus, ClusterObjectRef, FailoverService, FailoverServiceStatus, MeshService,
    ResourceRef,
};

use super::snapshot::InputSnapshot;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A single business-rule violation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("target service {0} not found")]
    TargetServiceNotFound(ClusterObjectRef),

    #[error("missing services: failoverServices must list at least one service")]
    MissingServices,

    #[error("failover service {0} not found")]
    ServiceNotFound(ClusterObjectRef),

    #[error("mesh {mesh} of service {service} not found")]
    MeshNotFound {
        service: ClusterObjectRef,
        mesh: ResourceRef,
    },

    #[error("mesh {mesh} of service {service} has unsupported type {technology}")]
    UnsupportedMesh {
        service: ClusterObjectRef,
        mesh: ResourceRef,
        technology: String,
    },

    #[error("service {0} has no outlier detection configured")]
    MissingOutlierDetection(ClusterObjectRef),

    #[error("mesh {0} is not a member of any VirtualMesh; no common VirtualMesh groups the failover services")]
    MeshNotInVirtualMesh(ResourceRef),

    #[error("failover services span VirtualMeshes [{}]; no common VirtualMesh groups meshes [{}]", join(.virtual_meshes), join(.meshes))]
    NoCommonVirtualMesh {
        meshes: Vec<ResourceRef>,
        virtual_meshes: Vec<ResourceRef>,
    },

    #[error("hostname {0:?} is not a valid DNS subdomain")]
    InvalidHostname(String),

    #[error("port {0} is out of range")]
    InvalidPort(u32),

    #[error("target mesh {0} not found")]
    TargetMeshNotFound(ResourceRef),

    #[error("target mesh {mesh} has unsupported type {technology}")]
    UnsupportedTargetMesh {
        mesh: ResourceRef,
        technology: String,
    },
}

fn join(refs: &[ResourceRef]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fresh validation verdict for one FailoverService
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub observed_generation: i64,
    pub validation_status: ApprovalStatus,
}

impl ValidationOutcome {
    fn from_errors(generation: i64, errors: &[ValidationError]) -> Self {
        let validation_status = if errors.is_empty() {
            ApprovalStatus::accepted()
        } else {
            ApprovalStatus::invalid(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };
        Self {
            observed_generation: generation,
            validation_status,
        }
    }

    /// Copy the verdict into `status`, leaving translation fields alone
    pub fn apply_to(&self, status: &mut FailoverServiceStatus) {
        status.observed_generation = Some(self.observed_generation);
        status.validation_status = Some(self.validation_status.clone());
    }
}

pub type ValidationResults = BTreeMap<ResourceRef, ValidationOutcome>;

/// Computes validation verdicts for a snapshot.
///
/// Implementations return new verdicts instead of touching the snapshot.
/// A FailoverService missing from the results keeps its stored status.
pub trait FailoverValidator: Send + Sync {
    fn validate(&self, snapshot: &InputSnapshot) -> ValidationResults;
}

/// Validates FailoverServices against discovered services, meshes and
/// VirtualMesh federation.
#[derive(Clone, Debug, Default)]
pub struct TopologyValidator;

impl TopologyValidator {
    pub fn new() -> Self {
        Self
    }

    /// All rule violations for `fs`, empty when it is valid
    pub fn check(&self, fs: &FailoverService, snapshot: &InputSnapshot) -> Vec<ValidationError> {
        let spec = &fs.spec;

        if spec.failover_services.is_empty() {
            return vec![ValidationError::MissingServices];
        }

        let mut errors = Vec::new();

        if !is_dns1123_subdomain(&spec.hostname) {
            errors.push(ValidationError::InvalidHostname(spec.hostname.clone()));
        }
        if spec.port.number == 0 || spec.port.number > u32::from(u16::MAX) {
            errors.push(ValidationError::InvalidPort(spec.port.number));
        }

        if snapshot.find_mesh_service(&spec.target_service).is_none() {
            errors.push(ValidationError::TargetServiceNotFound(
                spec.target_service.clone(),
            ));
        }

        self.check_target_meshes(fs, snapshot, &mut errors);

        let mut resolved: Vec<&MeshService> = Vec::with_capacity(spec.failover_services.len());
        for reference in &spec.failover_services {
            match snapshot.find_mesh_service(reference) {
                Some(service) => resolved.push(service),
                None => errors.push(ValidationError::ServiceNotFound(reference.clone())),
            }
        }

        let mut parent_meshes = BTreeSet::new();
        for service in &resolved {
            let identity = service.identity().clone();
            let mesh_ref = &service.spec.mesh;
            match snapshot.find_mesh(mesh_ref) {
                None => errors.push(ValidationError::MeshNotFound {
                    service: identity.clone(),
                    mesh: mesh_ref.clone(),
                }),
                Some(mesh) => {
                    if !mesh.spec.mesh_type.supports_failover() {
                        errors.push(ValidationError::UnsupportedMesh {
                            service: identity.clone(),
                            mesh: mesh_ref.clone(),
                            technology: mesh.spec.mesh_type.technology().to_string(),
                        });
                    }
                    parent_meshes.insert(mesh_ref.clone());
                }
            }

            if !service.has_outlier_detection() {
                errors.push(ValidationError::MissingOutlierDetection(identity));
            }
        }

        self.check_federation(&parent_meshes, snapshot, &mut errors);

        errors
    }

    fn check_target_meshes(
        &self,
        fs: &FailoverService,
        snapshot: &InputSnapshot,
        errors: &mut Vec<ValidationError>,
    ) {
        for mesh_ref in &fs.spec.meshes {
            match snapshot.find_mesh(mesh_ref) {
                None => errors.push(ValidationError::TargetMeshNotFound(mesh_ref.clone())),
                Some(mesh) if !mesh.spec.mesh_type.supports_failover() => {
                    errors.push(ValidationError::UnsupportedTargetMesh {
                        mesh: mesh_ref.clone(),
                        technology: mesh.spec.mesh_type.technology().to_string(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    /// Services spread over several meshes need one VirtualMesh covering all of them
    fn check_federation(
        &self,
        meshes: &BTreeSet<ResourceRef>,
        snapshot: &InputSnapshot,
        errors: &mut Vec<ValidationError>,
    ) {
        if meshes.len() <= 1 {
            return;
        }

        let virtual_meshes = snapshot.virtual_meshes();
        let covered = virtual_meshes
            .iter()
            .any(|vm| meshes.iter().all(|m| vm.contains(m)));
        if covered {
            return;
        }

        let unfederated: Vec<&ResourceRef> = meshes
            .iter()
            .filter(|m| !virtual_meshes.iter().any(|vm| vm.contains(m)))
            .collect();
        if !unfederated.is_empty() {
            errors.extend(
                unfederated
                    .into_iter()
                    .map(|m| ValidationError::MeshNotInVirtualMesh(m.clone())),
            );
            return;
        }

        let involved: BTreeSet<ResourceRef> = virtual_meshes
            .iter()
            .filter(|vm| meshes.iter().any(|m| vm.contains(m)))
            .map(ResourceRef::from_resource)
            .collect();
        errors.push(ValidationError::NoCommonVirtualMesh {
            meshes: meshes.iter().cloned().collect(),
            virtual_meshes: involved.into_iter().collect(),
        });
    }
}

impl FailoverValidator for TopologyValidator {
    #[instrument(skip_all, fields(failover_services = snapshot.failover_services().len()))]
    fn validate(&self, snapshot: &InputSnapshot) -> ValidationResults {
        snapshot
            .failover_services()
            .iter()
            .map(|fs| {
                let key = ResourceRef::from_resource(fs);
                let errors = self.check(fs, snapshot);
                if errors.is_empty() {
                    debug!("FailoverService {} passed validation", key);
                } else {
                    warn!(
                        "FailoverService {} failed validation with {} error(s)",
                        key,
                        errors.len()
                    );
                }
                let outcome = ValidationOutcome::from_errors(fs.generation(), &errors);
                (key, outcome)
            })
            .collect()
    }
}

/// RFC 1123 subdomain: dot-separated lowercase alphanumeric labels,
/// inner hyphens allowed
fn is_dns1123_subdomain(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    value.split('.').all(|label| {
        let bytes = label.as_bytes();
        !bytes.is_empty()
            && bytes.len() <= MAX_LABEL_LEN
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
            && bytes.first() != Some(&b'-')
            && bytes.last() != Some(&b'-')
    })
}
