//! Finalizer handling for FailoverService deletion
//!
//! The finalizer holds a deleted FailoverService until one pass without it
//! has run, so the artifacts generated for it are swept from every cluster
//! before the object disappears.

use kube::ResourceExt;

/// Finalizer name used to protect FailoverService resources
pub const FAILOVER_SERVICE_FINALIZER: &str = "failoverservice.meshfailover.io/finalizer";

/// Check if the object is being deleted
///
/// A deletion timestamp indicates the user has requested deletion,
/// but finalizers are preventing the actual removal.
pub fn is_being_deleted<K: ResourceExt>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
