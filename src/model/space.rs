use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::EntityStatus;

/// A shared CNI network plus cgroup subtree within a realm. Every cell in
/// the space attaches to the same network configuration list.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub name: String,
    pub realm_name: String,
    // Explicit conflist location; when absent the path is derived from the
    // run path at provisioning time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cni_config_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub status: EntityStatus,
}

impl Space {
    pub fn new(name: &str, realm_name: &str) -> Self {
        Self {
            name: name.to_string(),
            realm_name: realm_name.to_string(),
            ..Default::default()
        }
    }
}
