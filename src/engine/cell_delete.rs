use std::time::Duration;

use super::Engine;
use crate::error::{KukeonError, Result};
use crate::model::Cell;
use crate::runtime::{DeleteOptions, StopOptions};

impl Engine {
    /// Removes a cell and everything it owns: containers, network state,
    /// cgroup and metadata. Success when the cell's metadata is already
    /// absent.
    ///
    /// Idempotence is per step: absent containers and tasks downgrade to
    /// debug logs, and a failing step never prevents the later ones from
    /// running.
    pub fn delete_cell(&self, cell: &Cell) -> Result<()> {
        cell.validate()?;

        // The stored document is authoritative for status and the declared
        // container set; already-deleted is success.
        let stored = match self.store().get_cell(
            &cell.realm_name,
            &cell.space_name,
            &cell.stack_name,
            &cell.name,
        ) {
            Ok(stored) => stored,
            Err(err) if err.is_not_found() => {
                tracing::debug!(cell = %cell.id, cell_name = %cell.name, "cell metadata already absent");
                return Ok(());
            }
            Err(source) => {
                return Err(KukeonError::GetCell {
                    name: cell.name.clone(),
                    source,
                })
            }
        };

        self.teardown_cell_runtime_state(&stored);

        // Cgroup: the absolute path stored at creation time wins.
        let cgroup_path = self.cell_cgroup_path(&stored);
        if let Err(err) = self.cgroup().delete(&cgroup_path) {
            tracing::warn!(path = ?cgroup_path, err = %err, "failed to delete cell cgroup");
        }

        self.store()
            .delete_cell(
                &stored.realm_name,
                &stored.space_name,
                &stored.stack_name,
                &stored.name,
            )
            .map_err(|source| KukeonError::UpdateCellMetadata {
                name: stored.name.clone(),
                source,
            })?;
        let cell_dir = self.store().cell_dir(
            &stored.realm_name,
            &stored.space_name,
            &stored.stack_name,
            &stored.name,
        );
        self.store().remove_dir(&cell_dir)?;

        tracing::info!(
            cell = %stored.id,
            cell_name = %stored.name,
            space = %stored.space_name,
            realm = %stored.realm_name,
            "cell deleted"
        );
        Ok(())
    }

    /// Stops and deletes every container of a cell and scrubs its network
    /// state. Entirely best effort; used by delete and purge.
    pub(crate) fn teardown_cell_runtime_state(&self, cell: &Cell) {
        let gateway = match self.realm(&cell.realm_name).and_then(|realm| self.gateway_for_realm(&realm)) {
            Ok(gateway) => gateway,
            Err(err) => {
                tracing::warn!(
                    cell = %cell.id,
                    err = %err,
                    "cannot reach runtime for cell teardown, cleaning filesystem state only"
                );
                self.sweep_cell_cni_state(cell);
                return;
            }
        };

        let stop = StopOptions {
            force: false,
            timeout: self.config().stop_timeout,
        };
        let reap = StopOptions {
            force: true,
            timeout: Duration::from_secs(1),
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
            self.sweep_cni_state(cell, &containerd_id);
            if let Err(err) = gateway.stop_container(&containerd_id, &stop) {
                tracing::debug!(container_id = %containerd_id, err = %err, "workload stop during delete");
                let _ = gateway.stop_container(&containerd_id, &reap);
            }
            if let Err(err) = gateway.delete_container(&containerd_id, &delete) {
                tracing::warn!(container_id = %containerd_id, err = %err, "failed to delete workload");
            }
        }

        let root_id = match cell.root_spec().resolve_containerd_id() {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(cell = %cell.id, err = %err, "cannot resolve root container id");
                return;
            }
        };
        let netns = self.root_netns(&gateway, &root_id);
        self.detach_root(cell, &root_id, netns.as_ref());
        if let Err(err) = gateway.stop_container(&root_id, &stop) {
            tracing::debug!(container_id = %root_id, err = %err, "root stop during delete");
            let _ = gateway.stop_container(&root_id, &reap);
        }
        if let Err(err) = gateway.delete_container(&root_id, &delete) {
            tracing::warn!(container_id = %root_id, err = %err, "failed to delete root container");
        }

        // Mandatory sweep, even when the live detach succeeded.
        self.sweep_cni_state(cell, &root_id);
    }

    /// Filesystem-only CNI scrub for every container the cell can derive.
    pub(crate) fn sweep_cell_cni_state(&self, cell: &Cell) {
        for spec in cell.all_specs() {
            match spec.resolve_containerd_id() {
                Ok(containerd_id) => self.sweep_cni_state(cell, &containerd_id),
                Err(err) => {
                    tracing::warn!(container = %spec.id, err = %err, "cannot resolve container id for sweep")
                }
            }
        }
    }
}
