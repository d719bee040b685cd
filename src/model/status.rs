use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed state of a realm, space, stack or cell.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum EntityState {
    // The entity document exists but provisioning has not begun
    #[default]
    Pending,
    // Provisioning is in progress
    Creating,
    // All owned resources are in place
    Ready,
    // Cells only: containers stopped, metadata retained
    Stopped,
    // Provisioning failed; the operator must purge and recreate
    Failed,
}

impl EntityState {
    /// Whether a `Create` call may (re-)provision the entity.
    pub fn can_provision(&self) -> bool {
        matches!(self, EntityState::Pending | EntityState::Creating)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, EntityState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EntityState::Failed)
    }
}

impl Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let print = match *self {
            Self::Pending => "Pending",
            Self::Creating => "Creating",
            Self::Ready => "Ready",
            Self::Stopped => "Stopped",
            Self::Failed => "Failed",
        };

        write!(f, "{print}")
    }
}

/// Status block persisted with every realm, space and stack document.
///
/// `cgroup_path` stores the absolute path computed at creation time; it is
/// the authoritative value used on deletion and is never re-derived at read
/// time.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntityStatus {
    pub state: EntityState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cgroup_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl EntityStatus {
    pub fn mark_ready(&mut self) {
        self.state = EntityState::Ready;
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisionable_states() {
        assert!(EntityState::Pending.can_provision());
        assert!(EntityState::Creating.can_provision());
        assert!(!EntityState::Ready.can_provision());
        assert!(!EntityState::Stopped.can_provision());
        assert!(!EntityState::Failed.can_provision());
    }

    #[test]
    fn test_mark_ready_stamps_creation_time_once() {
        let mut status = EntityStatus::default();
        status.mark_ready();
        let first = status.created_at;
        assert!(first.is_some());

        status.mark_ready();
        assert_eq!(status.created_at, first);
    }
}
