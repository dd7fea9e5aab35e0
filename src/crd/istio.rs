//! Istio networking resources generated by the failover controller
//!
//! Only the fields the controller writes are modelled. The objects are
//! applied with server-side apply, so fields owned by other managers are
//! left untouched.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// ServiceEntry
// ============================================================================

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "ServiceEntry",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntrySpec {
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub ports: Vec<IstioPort>,

    #[serde(default)]
    pub location: ServiceEntryLocation,

    #[serde(default)]
    pub resolution: ServiceEntryResolution,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IstioPort {
    pub number: u32,
    pub protocol: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEntryLocation {
    MeshExternal,
    #[default]
    MeshInternal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEntryResolution {
    None,
    Static,
    #[default]
    Dns,
}

// ============================================================================
// EnvoyFilter
// ============================================================================

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "EnvoyFilter",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyFilterSpec {
    /// Patches applied in order
    #[serde(default)]
    pub config_patches: Vec<EnvoyConfigObjectPatch>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyConfigObjectPatch {
    pub apply_to: ApplyTo,

    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_: Option<EnvoyConfigObjectMatch>,

    pub patch: EnvoyPatch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplyTo {
    Cluster,
    Listener,
    HttpFilter,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyConfigObjectMatch {
    #[serde(default)]
    pub context: PatchContext,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterMatch>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchContext {
    #[default]
    Any,
    SidecarInbound,
    SidecarOutbound,
    Gateway,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMatch {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyPatch {
    pub operation: PatchOperation,

    /// Raw Envoy configuration, only meaningful for additive operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchOperation {
    Merge,
    Add,
    Remove,
    InsertBefore,
    InsertAfter,
}

impl EnvoyFilter {
    /// Member clusters of the aggregate cluster added by this filter, in order
    pub fn aggregate_clusters(&self) -> Option<Vec<String>> {
        let value = self
            .spec
            .config_patches
            .iter()
            .find(|p| p.patch.operation == PatchOperation::Add)?
            .patch
            .value
            .as_ref()?;

        let clusters = value
            .pointer("/cluster_type/typed_config/clusters")?
            .as_array()?;

        clusters
            .iter()
            .map(|c| c.as_str().map(str::to_string))
            .collect()
    }
}
