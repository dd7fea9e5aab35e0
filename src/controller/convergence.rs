//! Per-cluster convergence of generated artifacts
//!
//! For each artifact kind, every relevant cluster is driven to hold exactly
//! the desired set of owned artifacts: all desired artifacts are upserted and
//! owned artifacts that are no longer desired are deleted. Clusters are
//! converged concurrently and every failure is collected.

use std::collections::{BTreeMap, BTreeSet};

use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::crd::ResourceRef;
use crate::error::MultiError;
use crate::failover::labels::{owner_of, OwnershipLabels};
use crate::failover::{ArtifactKey, ManagedArtifact, MeshOutputs};

#[cfg(feature = "metrics")]
use super::metrics;

use super::clients::ClusterClientFactory;

/// Writes needed to converge one cluster
#[derive(Debug, PartialEq)]
pub struct ClusterPlan<'a, K> {
    pub upserts: Vec<&'a K>,
    pub deletes: Vec<ResourceRef>,
}

/// Diff `existing` owned artifacts of `cluster` against `desired`.
///
/// Existing artifacts generated for a FailoverService in `retained` are
/// never deleted, so they keep serving traffic until it translates again.
pub fn plan_cluster<'a, K: ManagedArtifact>(
    cluster: &str,
    desired: &'a BTreeMap<ArtifactKey, K>,
    existing: &[K],
    retained: &BTreeSet<ResourceRef>,
) -> ClusterPlan<'a, K> {
    let in_cluster = || desired.iter().filter(|(key, _)| key.cluster == cluster);
    let upserts: Vec<&K> = in_cluster().map(|(_, artifact)| artifact).collect();
    let wanted: BTreeSet<ResourceRef> = in_cluster().map(|(key, _)| key.object_ref()).collect();

    let deletes = existing
        .iter()
        .filter(|a| {
            owner_of(*a)
                .map(|owner| !retained.contains(&owner))
                .unwrap_or(true)
        })
        .map(ResourceRef::from_resource)
        .filter(|key| !wanted.contains(key))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    ClusterPlan { upserts, deletes }
}

/// Converge artifacts of kind `K` in every cluster of `clusters`
#[instrument(skip_all, fields(kind = K::KIND, clusters = clusters.len()))]
pub async fn converge<K: ManagedArtifact>(
    factory: &dyn ClusterClientFactory<K>,
    outputs: &MeshOutputs,
    clusters: &BTreeSet<String>,
    retained: &BTreeSet<ResourceRef>,
    labels: &OwnershipLabels,
) -> MultiError {
    let desired = K::desired(outputs);
    let results = join_all(
        clusters
            .iter()
            .map(|cluster| converge_cluster(factory, cluster, desired, retained, labels)),
    )
    .await;

    results.into_iter().fold(MultiError::new(), |mut acc, errors| {
        acc.extend(errors);
        acc
    })
}

async fn converge_cluster<K: ManagedArtifact>(
    factory: &dyn ClusterClientFactory<K>,
    cluster: &str,
    desired: &BTreeMap<ArtifactKey, K>,
    retained: &BTreeSet<ResourceRef>,
    labels: &OwnershipLabels,
) -> MultiError {
    let mut errors = MultiError::new();

    let Some(store) = errors.record(factory.client_for(cluster).await) else {
        warn!("No client for cluster {}, skipping {} convergence", cluster, K::KIND);
        return errors;
    };

    // Without a listing nothing can be deleted safely, but desired artifacts are still applied
    let existing = errors.record(store.list(&labels.selector()).await);
    let plan = plan_cluster(cluster, desired, existing.as_deref().unwrap_or_default(), retained);
    let deletes = if existing.is_some() {
        plan.deletes
    } else {
        Vec::new()
    };

    for artifact in &plan.upserts {
        if errors.record(store.upsert(artifact).await).is_some() {
            #[cfg(feature = "metrics")]
            metrics::inc_artifact_operation(K::KIND, cluster, "upsert");
        }
    }

    for key in &deletes {
        if errors.record(store.delete(key).await).is_some() {
            info!("Deleted stale {} {} in cluster {}", K::KIND, key, cluster);
            #[cfg(feature = "metrics")]
            metrics::inc_artifact_operation(K::KIND, cluster, "delete");
        }
    }

    if !errors.is_empty() {
        warn!(
            "Converging {} in cluster {} hit {} error(s)",
            K::KIND,
            cluster,
            errors.len()
        );
    }
    errors
}
