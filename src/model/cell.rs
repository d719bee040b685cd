use std::collections::HashMap;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::container::{ContainerSpec, DEFAULT_ROOT_IMAGE};
use super::EntityState;
use crate::error::KukeonError;

/// Observed state of one container within a cell.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ContainerState {
    #[default]
    Unknown,
    Created,
    Running,
    Stopped,
}

impl Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Unknown => "Unknown",
            Self::Created => "Created",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
        };

        write!(f, "{print}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub containerd_id: String,
    pub state: ContainerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CellStatus {
    pub state: EntityState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cgroup_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerStatus>,
}

/// The unit of scheduling: an ordered set of containers sharing the Linux
/// net/ipc/uts namespaces of one root container.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    // Display name, unique within the stack
    pub name: String,
    // Stable identifier used for naming derivation, distinct from the name
    pub id: String,
    pub realm_name: String,
    pub space_name: String,
    pub stack_name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_container: Option<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub status: CellStatus,
}

impl Cell {
    /// Checks the fields every lifecycle operation requires.
    pub fn validate(&self) -> Result<(), KukeonError> {
        if self.name.is_empty() {
            return Err(KukeonError::CellNameRequired);
        }
        if self.id.is_empty() {
            return Err(KukeonError::CellIdRequired);
        }
        if self.realm_name.is_empty() {
            return Err(KukeonError::RealmNameRequired);
        }
        if self.space_name.is_empty() {
            return Err(KukeonError::SpaceNameRequired);
        }
        if self.stack_name.is_empty() {
            return Err(KukeonError::StackNameRequired);
        }
        Ok(())
    }

    fn inherit_tuple(&self, spec: &mut ContainerSpec) {
        if spec.realm_name.is_empty() {
            spec.realm_name = self.realm_name.clone();
        }
        if spec.space_name.is_empty() {
            spec.space_name = self.space_name.clone();
        }
        if spec.stack_name.is_empty() {
            spec.stack_name = self.stack_name.clone();
        }
        if spec.cell_name.is_empty() {
            spec.cell_name = self.name.clone();
        }
        if spec.cell_id.is_empty() {
            spec.cell_id = self.id.clone();
        }
    }

    /// Materializes the root container spec: the declared one when present,
    /// otherwise a pause-style default that only holds the shared namespaces
    /// open. The tuple is filled in and `root` is stamped either way.
    pub fn root_spec(&self) -> ContainerSpec {
        let mut spec = self.root_container.clone().unwrap_or_else(|| ContainerSpec {
            id: "root".to_string(),
            image: DEFAULT_ROOT_IMAGE.to_string(),
            command: vec!["sleep".to_string(), "infinity".to_string()],
            ..Default::default()
        });
        self.inherit_tuple(&mut spec);
        spec.root = true;
        spec
    }

    /// The workload specs in declared order, tuples inherited. Specs marked
    /// `root` are excluded; the root container never appears in this list.
    pub fn workload_specs(&self) -> Vec<ContainerSpec> {
        self.containers
            .iter()
            .filter(|spec| !spec.root)
            .cloned()
            .map(|mut spec| {
                self.inherit_tuple(&mut spec);
                spec
            })
            .collect()
    }

    /// Every container spec the cell can derive, root first. Used by purge
    /// to scrub runtime and network state for the whole cell.
    pub fn all_specs(&self) -> Vec<ContainerSpec> {
        let mut specs = vec![self.root_spec()];
        specs.extend(self.workload_specs());
        specs
    }

    pub fn set_container_status(&mut self, status: ContainerStatus) {
        match self
            .status
            .containers
            .iter_mut()
            .find(|existing| existing.containerd_id == status.containerd_id)
        {
            Some(existing) => *existing = status,
            None => self.status.containers.push(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> Cell {
        Cell {
            name: "c1".to_string(),
            id: "c1_id".to_string(),
            realm_name: "prod".to_string(),
            space_name: "web".to_string(),
            stack_name: "api".to_string(),
            containers: vec![
                ContainerSpec {
                    id: "nginx".to_string(),
                    image: "docker.io/library/nginx:1.25".to_string(),
                    ..Default::default()
                },
                ContainerSpec {
                    id: "sidecar".to_string(),
                    image: "docker.io/library/busybox:stable".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_requires_identity_fields() {
        assert!(cell().validate().is_ok());

        let mut missing_id = cell();
        missing_id.id.clear();
        assert!(matches!(
            missing_id.validate(),
            Err(KukeonError::CellIdRequired)
        ));

        let mut missing_realm = cell();
        missing_realm.realm_name.clear();
        assert!(matches!(
            missing_realm.validate(),
            Err(KukeonError::RealmNameRequired)
        ));
    }

    #[test]
    fn test_root_spec_synthesizes_default() {
        let root = cell().root_spec();
        assert!(root.root);
        assert_eq!(root.image, DEFAULT_ROOT_IMAGE);
        assert_eq!(root.command, vec!["sleep", "infinity"]);
        assert_eq!(root.cell_id, "c1_id");
        assert_eq!(root.space_name, "web");
    }

    #[test]
    fn test_root_spec_keeps_declared_container() {
        let mut declared = cell();
        declared.root_container = Some(ContainerSpec {
            id: "pause".to_string(),
            image: "registry.k8s.io/pause:3.9".to_string(),
            ..Default::default()
        });

        let root = declared.root_spec();
        assert!(root.root);
        assert_eq!(root.image, "registry.k8s.io/pause:3.9");
        assert_eq!(root.realm_name, "prod");
    }

    #[test]
    fn test_workload_specs_inherit_tuple_and_skip_root() {
        let mut with_stray_root = cell();
        with_stray_root.containers.push(ContainerSpec {
            id: "stray".to_string(),
            root: true,
            ..Default::default()
        });

        let specs = with_stray_root.workload_specs();
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(|spec| !spec.root));
        assert!(specs.iter().all(|spec| spec.cell_id == "c1_id"));
        assert_eq!(specs[0].id, "nginx");
        assert_eq!(specs[1].id, "sidecar");
    }

    #[test]
    fn test_set_container_status_replaces_by_id() {
        let mut cell = cell();
        cell.set_container_status(ContainerStatus {
            containerd_id: "web.api.c1_id.nginx".to_string(),
            state: ContainerState::Running,
            pid: Some(42),
        });
        cell.set_container_status(ContainerStatus {
            containerd_id: "web.api.c1_id.nginx".to_string(),
            state: ContainerState::Stopped,
            pid: None,
        });

        assert_eq!(cell.status.containers.len(), 1);
        assert_eq!(cell.status.containers[0].state, ContainerState::Stopped);
    }
}
