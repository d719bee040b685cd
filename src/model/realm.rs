use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::EntityStatus;

/// Credentials used when pulling images within a realm's namespace.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

/// Administrative tenant. Owns one containerd namespace and the top-level
/// cgroup every descendant entity nests under.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Realm {
    pub name: String,
    // The containerd namespace every runtime call for this realm is scoped to
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_credentials: Option<RegistryCredentials>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub status: EntityStatus,
}

impl Realm {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }
}
