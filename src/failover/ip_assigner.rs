//! Virtual IP allocation for generated host entries
//!
//! Every failover hostname needs a routable address on each cluster it is
//! configured in. Addresses are handed out from a reserved IPv4 block and
//! stay stable for a `(cluster, hostname)` pair for the lifetime of the
//! process, so repeated passes render identical ServiceEntries.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Reserved class E block, never routed on the public internet
pub const DEFAULT_VIRTUAL_IP_CIDR: &str = "240.0.0.0/4";

/// Hands out cluster-scoped virtual addresses
#[async_trait]
pub trait IpAssigner: Send + Sync {
    /// Address for `hostname` on `cluster`. Repeated calls with the same
    /// arguments return the same address.
    async fn assign(&self, cluster: &str, hostname: &str) -> Result<Ipv4Addr>;
}

#[derive(Debug, Default)]
struct ClusterPool {
    assigned: HashMap<String, Ipv4Addr>,
    next_offset: u32,
}

/// In-memory allocator over a single IPv4 block.
///
/// The network and broadcast addresses of the block are never handed out.
#[derive(Debug)]
pub struct VirtualIpAssigner {
    network: u32,
    host_count: u32,
    pools: Mutex<HashMap<String, ClusterPool>>,
}

impl VirtualIpAssigner {
    /// Allocator over `cidr`, e.g. `240.0.0.0/4`
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let (addr, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| Error::ConfigError(format!("invalid CIDR {cidr:?}: missing prefix")))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| Error::ConfigError(format!("invalid CIDR {cidr:?}: {e}")))?;
        let prefix: u32 = prefix
            .parse()
            .map_err(|e| Error::ConfigError(format!("invalid CIDR {cidr:?}: {e}")))?;
        if !(1..=30).contains(&prefix) {
            return Err(Error::ConfigError(format!(
                "invalid CIDR {cidr:?}: prefix must be between 1 and 30"
            )));
        }

        let mask = u32::MAX << (32 - prefix);
        let size = 1u32 << (32 - prefix);
        Ok(Self {
            network: u32::from(addr) & mask,
            host_count: size - 2,
            pools: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl IpAssigner for VirtualIpAssigner {
    async fn assign(&self, cluster: &str, hostname: &str) -> Result<Ipv4Addr> {
        let mut pools = self.pools.lock().await;
        let pool = pools.entry(cluster.to_string()).or_default();

        if let Some(ip) = pool.assigned.get(hostname) {
            return Ok(*ip);
        }

        if pool.next_offset >= self.host_count {
            return Err(Error::IpAssignmentError {
                cluster: cluster.to_string(),
                message: format!("address pool exhausted after {} hosts", self.host_count),
            });
        }

        pool.next_offset += 1;
        let ip = Ipv4Addr::from(self.network + pool.next_offset);
        pool.assigned.insert(hostname.to_string(), ip);
        debug!("Assigned {} to {} on cluster {}", ip, hostname, cluster);
        Ok(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignments_are_stable_per_cluster_and_hostname() {
        let assigner = VirtualIpAssigner::from_cidr(DEFAULT_VIRTUAL_IP_CIDR).unwrap();

        tokio_test::block_on(async {
            let first = assigner.assign("east", "reviews.global").await.unwrap();
            let again = assigner.assign("east", "reviews.global").await.unwrap();
            let other = assigner.assign("east", "ratings.global").await.unwrap();
            let remote = assigner.assign("west", "reviews.global").await.unwrap();

            assert_eq!(first, Ipv4Addr::new(240, 0, 0, 1));
            assert_eq!(first, again);
            assert_eq!(other, Ipv4Addr::new(240, 0, 0, 2));
            assert_eq!(remote, Ipv4Addr::new(240, 0, 0, 1));
        });
    }

    #[tokio::test]
    async fn test_exhausted_pool_is_an_error() {
        let assigner = VirtualIpAssigner::from_cidr("10.1.2.0/30").unwrap();

        assert_eq!(
            assigner.assign("east", "a").await.unwrap(),
            Ipv4Addr::new(10, 1, 2, 1)
        );
        assert_eq!(
            assigner.assign("east", "b").await.unwrap(),
            Ipv4Addr::new(10, 1, 2, 2)
        );
        let err = assigner.assign("east", "c").await.unwrap_err();
        assert!(matches!(err, Error::IpAssignmentError { .. }));
    }

    #[test]
    fn test_invalid_cidr_is_rejected() {
        assert!(VirtualIpAssigner::from_cidr("240.0.0.0").is_err());
        assert!(VirtualIpAssigner::from_cidr("not-an-ip/8").is_err());
        assert!(VirtualIpAssigner::from_cidr("10.0.0.0/31").is_err());
    }
}
