use nix::sys::signal::Signal;

use super::Engine;
use crate::error::{KukeonError, Result};
use crate::model::{Cell, ContainerState, ContainerStatus};

impl Engine {
    /// Sends SIGKILL to every task in the cell: workloads first, then the
    /// root. Absent tasks and containers are not errors. After the kills
    /// the root is detached from the space network, using the netns path
    /// captured before the root task died.
    pub fn kill_cell(&self, cell: &Cell) -> Result<()> {
        cell.validate()?;
        let realm = self.realm(&cell.realm_name)?;
        let mut cell = cell.clone();
        let gateway = self.gateway_for_realm(&realm)?;

        let root_spec = cell.root_spec();
        let root_id = root_spec.resolve_containerd_id()?;
        let netns = self.root_netns(&gateway, &root_id);

        for spec in cell.workload_specs() {
            let containerd_id = match spec.resolve_containerd_id() {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(container = %spec.id, err = %err, "skipping unresolvable workload");
                    continue;
                }
            };
            if let Err(err) = gateway.kill_task(&containerd_id, Signal::SIGKILL) {
                tracing::warn!(container_id = %containerd_id, err = %err, "failed to kill workload task");
            }
            cell.set_container_status(ContainerStatus {
                containerd_id,
                state: ContainerState::Stopped,
                pid: None,
            });
        }

        if let Err(err) = gateway.kill_task(&root_id, Signal::SIGKILL) {
            tracing::warn!(container_id = %root_id, err = %err, "failed to kill root task");
        }
        cell.set_container_status(ContainerStatus {
            containerd_id: root_id.clone(),
            state: ContainerState::Stopped,
            pid: None,
        });

        self.detach_root(&cell, &root_id, netns.as_ref());

        if let Err(err) = self.store().update_cell(&cell) {
            tracing::warn!(cell = %cell.id, err = %err, "failed to persist cell status after kill");
        }
        Ok(())
    }

    /// Sends SIGKILL to one workload task. The root container is refused:
    /// killing it would tear the shared namespaces out from under the
    /// remaining workloads, so the caller must kill the whole cell.
    pub fn kill_container(&self, cell: &Cell, container_id: &str) -> Result<()> {
        cell.validate()?;
        if container_id.is_empty() {
            return Err(KukeonError::ContainerNameRequired);
        }

        let root_spec = cell.root_spec();
        if container_id == root_spec.id {
            return Err(KukeonError::RootKillForbidden {
                id: container_id.to_string(),
            });
        }

        let spec = cell
            .workload_specs()
            .into_iter()
            .find(|spec| spec.id == container_id)
            .ok_or_else(|| KukeonError::ContainerNotFound {
                id: container_id.to_string(),
            })?;

        let realm = self.realm(&cell.realm_name)?;
        let gateway = self.gateway_for_realm(&realm)?;
        let containerd_id = spec.resolve_containerd_id()?;
        gateway.kill_task(&containerd_id, Signal::SIGKILL)?;
        Ok(())
    }
}
