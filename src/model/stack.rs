use serde::{Deserialize, Serialize};

use super::EntityStatus;

/// Cgroup-only grouping of cells within a space, used for resource
/// accounting across related cells.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    pub name: String,
    pub realm_name: String,
    pub space_name: String,
    #[serde(default)]
    pub status: EntityStatus,
}

impl Stack {
    pub fn new(name: &str, realm_name: &str, space_name: &str) -> Self {
        Self {
            name: name.to_string(),
            realm_name: realm_name.to_string(),
            space_name: space_name.to_string(),
            ..Default::default()
        }
    }
}
