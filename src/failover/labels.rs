//! Ownership labels stamped on generated artifacts

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::ResourceRef;

/// Label naming the FailoverService an artifact was generated for
pub const FAILOVER_SERVICE_NAME_LABEL: &str = "meshfailover.io/failover-service-name";

/// Label naming the namespace of the FailoverService an artifact was generated for
pub const FAILOVER_SERVICE_NAMESPACE_LABEL: &str = "meshfailover.io/failover-service-namespace";

pub const DEFAULT_OWNER_LABEL_KEY: &str = "meshfailover.io/managed-by";
pub const DEFAULT_OWNER_LABEL_VALUE: &str = "failover-service-controller";

/// The fixed key/value pair marking artifacts this controller owns.
///
/// Only artifacts carrying this pair are listed when diffing existing
/// state against desired state, so only they are ever deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipLabels {
    pub key: String,
    pub value: String,
}

impl Default for OwnershipLabels {
    fn default() -> Self {
        Self {
            key: DEFAULT_OWNER_LABEL_KEY.to_string(),
            value: DEFAULT_OWNER_LABEL_VALUE.to_string(),
        }
    }
}

impl OwnershipLabels {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Label selector matching owned artifacts, e.g. `key=value`
    pub fn selector(&self) -> String {
        format!("{}={}", self.key, self.value)
    }

    /// Full label set for an artifact generated on behalf of `owner`
    pub fn for_owner(&self, owner: &ResourceRef) -> BTreeMap<String, String> {
        BTreeMap::from([
            (self.key.clone(), self.value.clone()),
            (FAILOVER_SERVICE_NAME_LABEL.to_string(), owner.name.clone()),
            (
                FAILOVER_SERVICE_NAMESPACE_LABEL.to_string(),
                owner.namespace.clone(),
            ),
        ])
    }

    /// Whether `obj` carries the ownership pair
    pub fn is_owned<K: ResourceExt>(&self, obj: &K) -> bool {
        obj.labels().get(&self.key) == Some(&self.value)
    }
}

/// The FailoverService an artifact was generated for, read back from its labels
pub fn owner_of<K: ResourceExt>(obj: &K) -> Option<ResourceRef> {
    let labels = obj.labels();
    let name = labels.get(FAILOVER_SERVICE_NAME_LABEL)?;
    let namespace = labels.get(FAILOVER_SERVICE_NAMESPACE_LABEL)?;
    Some(ResourceRef::new(name.clone(), namespace.clone()))
}
