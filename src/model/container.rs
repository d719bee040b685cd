use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::KukeonError;
use crate::naming;

/// Image used when a cell does not declare its own root container.
pub const DEFAULT_ROOT_IMAGE: &str = "docker.io/library/busybox:stable";

/// Declared container within a cell.
///
/// `id` is the base name, unique within the cell. The tuple fields are
/// inherited from the owning cell when left empty. `containerd_id` is the
/// naming-derived runtime identifier; once persisted it is authoritative and
/// re-derivation is only used to detect corrupt metadata.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub id: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cni_config_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub realm_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub space_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cell_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cell_id: String,
    #[serde(default)]
    pub root: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containerd_id: Option<String>,
}

impl ContainerSpec {
    /// Derives the containerd ID from the tuple and checks it against the
    /// persisted value. The persisted value wins when both exist and agree;
    /// disagreement means the document was edited or written by a different
    /// naming scheme.
    pub fn resolve_containerd_id(&self) -> Result<String, KukeonError> {
        let derived = if self.root {
            naming::build_root_containerd_id(&self.space_name, &self.stack_name, &self.cell_id)?
        } else {
            naming::build_containerd_id(
                &self.space_name,
                &self.stack_name,
                &self.cell_id,
                &self.id,
            )?
        };

        match &self.containerd_id {
            None => Ok(derived),
            Some(persisted) if persisted == &derived => Ok(persisted.clone()),
            Some(persisted) => Err(KukeonError::CorruptMetadata {
                kind: "container",
                name: self.id.clone(),
                reason: format!(
                    "persisted containerd id {persisted:?} does not match derived {derived:?}"
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(root: bool) -> ContainerSpec {
        ContainerSpec {
            id: "nginx".to_string(),
            image: "docker.io/library/nginx:1.25".to_string(),
            space_name: "web".to_string(),
            stack_name: "api".to_string(),
            cell_name: "c1".to_string(),
            cell_id: "c1_id".to_string(),
            realm_name: "prod".to_string(),
            root,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_derives_when_unset() {
        assert_eq!(spec(false).resolve_containerd_id().unwrap(), "web.api.c1_id.nginx");
        assert_eq!(spec(true).resolve_containerd_id().unwrap(), "web.api.c1_id");
    }

    #[test]
    fn test_resolve_prefers_matching_persisted_value() {
        let mut s = spec(false);
        s.containerd_id = Some("web.api.c1_id.nginx".to_string());
        assert_eq!(s.resolve_containerd_id().unwrap(), "web.api.c1_id.nginx");
    }

    #[test]
    fn test_resolve_flags_mismatch_as_corrupt() {
        let mut s = spec(false);
        s.containerd_id = Some("web.api.other".to_string());
        assert!(matches!(
            s.resolve_containerd_id(),
            Err(KukeonError::CorruptMetadata { .. })
        ));
    }
}
