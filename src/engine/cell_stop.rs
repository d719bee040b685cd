use super::{pid_alive, Engine};
use crate::error::Result;
use crate::model::{Cell, ContainerState, ContainerStatus, EntityState};
use crate::runtime::{DeleteOptions, Gateway, NamespacePaths, StopOptions};

impl Engine {
    /// Stops a cell: workloads in declared order, then the root container,
    /// with the CNI detach happening while the root's netns is still valid.
    ///
    /// Teardown never aborts on a single failure; every step is attempted
    /// and the mandatory IPAM sweep runs regardless of earlier outcomes, so
    /// leases are freed even when the live DEL was impossible.
    pub fn stop_cell(&self, cell: &Cell) -> Result<Cell> {
        cell.validate()?;
        let realm = self.realm(&cell.realm_name)?;
        let mut cell = cell.clone();
        let gateway = self.gateway_for_realm(&realm)?;

        let stop = StopOptions {
            force: false,
            timeout: self.config().stop_timeout,
        };
        let delete = DeleteOptions { snapshot_cleanup: true };

        for spec in cell.workload_specs() {
            let containerd_id = match spec.resolve_containerd_id() {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(container = %spec.id, err = %err, "skipping unresolvable workload");
                    continue;
                }
            };
            if let Err(err) = gateway.stop_container(&containerd_id, &stop) {
                tracing::warn!(container_id = %containerd_id, err = %err, "failed to stop workload");
            }
            if let Err(err) = gateway.delete_container(&containerd_id, &delete) {
                tracing::warn!(container_id = %containerd_id, err = %err, "failed to delete workload");
            }
            cell.set_container_status(ContainerStatus {
                containerd_id,
                state: ContainerState::Stopped,
                pid: None,
            });
        }

        let root_spec = cell.root_spec();
        let root_id = root_spec.resolve_containerd_id()?;

        // Resolve the netns path before the root task dies, then detach.
        let netns = self.root_netns(&gateway, &root_id);
        self.detach_root(&cell, &root_id, netns.as_ref());

        if let Err(err) = gateway.stop_container(&root_id, &stop) {
            tracing::warn!(container_id = %root_id, err = %err, "failed to stop root container");
        }
        if let Err(err) = gateway.delete_container(&root_id, &delete) {
            tracing::warn!(container_id = %root_id, err = %err, "failed to delete root container");
        }
        cell.set_container_status(ContainerStatus {
            containerd_id: root_id.clone(),
            state: ContainerState::Stopped,
            pid: None,
        });

        // Final-cleanup sweep, mandatory even when the detach succeeded.
        self.sweep_cni_state(&cell, &root_id);

        cell.status.state = EntityState::Stopped;
        if let Err(err) = self.store().update_cell(&cell) {
            tracing::warn!(
                cell = %cell.id,
                cell_name = %cell.name,
                err = %err,
                "failed to persist cell status after stop"
            );
        }

        tracing::info!(
            cell = %cell.id,
            cell_name = %cell.name,
            space = %cell.space_name,
            realm = %cell.realm_name,
            "cell stopped"
        );
        Ok(cell)
    }

    /// Netns path of the root task, when the task exists and its process is
    /// still observable.
    pub(crate) fn root_netns(&self, gateway: &Gateway, root_id: &str) -> Option<NamespacePaths> {
        match gateway.task_pid(root_id) {
            Ok(Some(pid)) if pid_alive(pid) => Some(NamespacePaths::from_pid(pid)),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(container_id = %root_id, err = %err, "could not resolve root task");
                None
            }
        }
    }

    /// Best-effort CNI DEL for the root container. Failures are warnings:
    /// the sweep afterwards removes whatever the plugins could not.
    pub(crate) fn detach_root(&self, cell: &Cell, root_id: &str, netns: Option<&NamespacePaths>) {
        let space = match self.space(&cell.realm_name, &cell.space_name) {
            Ok(space) => space,
            Err(err) => {
                tracing::warn!(cell = %cell.id, err = %err, "cannot resolve space for cni detach");
                return;
            }
        };
        let mut manager = match self.cni_manager() {
            Ok(manager) => manager,
            Err(err) => {
                tracing::warn!(cell = %cell.id, err = %err, "cannot build cni manager for detach");
                return;
            }
        };
        if let Err(err) = manager.load_network_config_list(&self.cni_conf_path(&space)) {
            tracing::warn!(cell = %cell.id, err = %err, "cannot load network config for detach");
            return;
        }
        if let Err(err) =
            manager.del_container_from_network(root_id, netns.map(|paths| paths.net.as_path()))
        {
            tracing::warn!(container_id = %root_id, err = %err, "cni detach failed");
        }
    }

    /// Removes IPAM allocations and cache entries for one container by
    /// file-path scanning.
    pub(crate) fn sweep_cni_state(&self, cell: &Cell, containerd_id: &str) {
        let network_name = match self.network_name(&cell.realm_name, &cell.space_name) {
            Ok(name) => name,
            Err(err) => {
                tracing::warn!(cell = %cell.id, err = %err, "cannot resolve network name for sweep");
                return;
            }
        };
        match self.cni_manager() {
            Ok(manager) => manager.purge_container_state(&network_name, containerd_id),
            Err(err) => {
                tracing::warn!(cell = %cell.id, err = %err, "cannot build cni manager for sweep")
            }
        }
    }
}
