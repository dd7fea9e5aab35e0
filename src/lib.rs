//! mesh-failover: multi-cluster control plane for prioritized service-mesh failover
//!
//! This crate watches FailoverService resources together with the discovered
//! mesh topology and generates the Istio configuration that routes a
//! hostname to an ordered list of backing services across clusters.

pub mod controller;
pub mod crd;
pub mod error;
pub mod failover;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
