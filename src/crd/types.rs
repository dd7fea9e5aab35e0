//! Shared types for failover resource specifications
//!
//! These types are used across the CRD definitions and the failover pipeline.
//!
//! # Type Hierarchy
//!
//! - [`ResourceRef`] - name/namespace reference to a resource in the management cluster
//! - [`ClusterObjectRef`] - name/namespace/cluster reference to a workload-cluster object
//! - [`ServicePort`] - port declaration shared by failover services and discovered services
//! - [`ApprovalStatus`] / [`StatusState`] - status verdicts written back by the controller

use std::fmt;

use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a namespaced resource by name and namespace
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub name: String,
    pub namespace: String,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Build a reference pointing at an existing object
    pub fn from_resource<K: ResourceExt>(obj: &K) -> Self {
        Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference to an object living in a specific workload cluster
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObjectRef {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
}

impl ClusterObjectRef {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            cluster: cluster.into(),
        }
    }
}

impl fmt::Display for ClusterObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.cluster)
    }
}

/// Port exposed by a service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port number
    pub number: u32,

    /// Port name (e.g. "http")
    #[serde(default)]
    pub name: String,

    /// Application protocol (e.g. "HTTP", "TCP", "GRPC")
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

/// Verdict of a validation or translation step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusState {
    /// The resource was checked and is usable
    #[default]
    Accepted,
    /// The resource violates a business rule
    Invalid,
    /// The resource was valid but generating configuration for it failed
    ProcessingError,
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusState::Accepted => write!(f, "ACCEPTED"),
            StatusState::Invalid => write!(f, "INVALID"),
            StatusState::ProcessingError => write!(f, "PROCESSING_ERROR"),
        }
    }
}

/// State plus a human-readable explanation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStatus {
    pub state: StatusState,

    /// Always serialized, so a merge patch clears an earlier message
    #[serde(default)]
    pub message: String,
}

impl ApprovalStatus {
    pub fn accepted() -> Self {
        Self {
            state: StatusState::Accepted,
            message: String::new(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            state: StatusState::Invalid,
            message: message.into(),
        }
    }

    pub fn processing_error(message: impl Into<String>) -> Self {
        Self {
            state: StatusState::ProcessingError,
            message: message.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.state == StatusState::Accepted
    }
}
