//! Lease based leader election
//!
//! Only the replica holding the `mesh-failover-leader` Lease runs passes.
//! The holder renews well inside the lease duration; the others poll and take
//! over once renewals stop. Takeovers are conditional on the resource version
//! that was read, so two candidates can never both win the same expiry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::Result;

pub const LEASE_NAME: &str = "mesh-failover-leader";

const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What a candidate should do with the lease as it currently stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseDecision {
    /// The candidate already holds the lease
    Renew,
    /// The lease is free or its holder stopped renewing
    TakeOver,
    /// Another holder is still within its lease duration
    Wait,
}

/// Decide for `identity` against the lease `spec` at time `now`
pub fn decide(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    match holder {
        Some(h) if h == identity => return LeaseDecision::Renew,
        None | Some("") => return LeaseDecision::TakeOver,
        Some(_) => {}
    }

    let Some(renewed) = spec.and_then(|s| s.renew_time.as_ref()) else {
        return LeaseDecision::TakeOver;
    };
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS);

    if now > renewed.0 + chrono::Duration::seconds(duration.into()) {
        LeaseDecision::TakeOver
    } else {
        LeaseDecision::Wait
    }
}

fn renew_patch(now: DateTime<Utc>) -> serde_json::Value {
    json!({
        "spec": {
            "renewTime": MicroTime(now),
            "leaseDurationSeconds": LEASE_DURATION_SECS,
        }
    })
}

/// Only applies if the lease is unchanged since `existing` was read
fn takeover_patch(existing: &Lease, identity: &str, now: DateTime<Utc>) -> serde_json::Value {
    let transitions = existing
        .spec
        .as_ref()
        .and_then(|s| s.lease_transitions)
        .unwrap_or_default();
    json!({
        "metadata": { "resourceVersion": existing.resource_version() },
        "spec": {
            "holderIdentity": identity,
            "acquireTime": MicroTime(now),
            "renewTime": MicroTime(now),
            "leaseDurationSeconds": LEASE_DURATION_SECS,
            "leaseTransitions": transitions + 1,
        }
    })
}

fn new_lease(namespace: &str, identity: &str, now: DateTime<Utc>) -> Lease {
    Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.to_string()),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            lease_transitions: Some(0),
            ..Default::default()
        }),
    }
}

/// Identity of this replica: the pod name, falling back to the host name
pub fn default_identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    })
}

pub struct LeaderElector {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// One election round. Returns whether this replica holds the lease.
    pub async fn try_acquire_or_renew(&self) -> Result<bool> {
        let now = Utc::now();

        let Some(existing) = self.leases.get_opt(LEASE_NAME).await? else {
            return match self
                .leases
                .create(&PostParams::default(), &new_lease(&self.namespace, &self.identity, now))
                .await
            {
                Ok(_) => {
                    info!("Created lease {} with holder {}", LEASE_NAME, self.identity);
                    Ok(true)
                }
                Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let patch = match decide(existing.spec.as_ref(), &self.identity, now) {
            LeaseDecision::Wait => return Ok(false),
            LeaseDecision::Renew => renew_patch(now),
            LeaseDecision::TakeOver => {
                info!(
                    "Lease held by {:?} has expired, taking over",
                    existing.spec.as_ref().and_then(|s| s.holder_identity.as_deref())
                );
                takeover_patch(&existing, &self.identity, now)
            }
        };

        match self
            .leases
            .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(true),
            // Another candidate changed the lease first
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!("Lost the race for lease {}", LEASE_NAME);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Keep `is_leader` current for the lifetime of the process
    pub async fn run(self, is_leader: Arc<AtomicBool>) {
        info!("Leader election using holder ID: {}", self.identity);
        loop {
            let leading = match self.try_acquire_or_renew().await {
                Ok(leading) => leading,
                Err(e) => {
                    warn!("Leader election error: {:?}", e);
                    false
                }
            };

            let was_leading = is_leader.swap(leading, Ordering::Relaxed);
            match (was_leading, leading) {
                (false, true) => info!("Acquired leadership for lease {}", LEASE_NAME),
                (true, false) => warn!("Lost leadership for lease {}", LEASE_NAME),
                _ => {}
            }

            tokio::time::sleep(if leading { RENEW_INTERVAL } else { RETRY_INTERVAL }).await;
        }
    }
}
