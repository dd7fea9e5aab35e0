//! FailoverService processing pipeline
//!
//! A pass runs the validator over the whole [`InputSnapshot`], gates each
//! FailoverService on its fresh validation verdict, resolves its prioritized
//! backing services and hands them to every registered translator. The
//! result is an [`OutputSnapshot`] of statuses and mesh artifacts for the
//! reconciler to converge.

pub mod ip_assigner;
pub mod labels;
pub mod processor;
pub mod snapshot;
pub mod translation;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use ip_assigner::{IpAssigner, VirtualIpAssigner, DEFAULT_VIRTUAL_IP_CIDR};
pub use labels::OwnershipLabels;
pub use processor::FailoverProcessor;
pub use snapshot::{
    ArtifactKey, InputSnapshot, InputSnapshotBuilder, ManagedArtifact, MeshOutputs,
    OutputSnapshot, StatusUpdate,
};
pub use translation::{FailoverTranslator, IstioTranslator, TranslationResult, TranslatorError};
pub use validation::{
    FailoverValidator, TopologyValidator, ValidationError, ValidationOutcome, ValidationResults,
};
