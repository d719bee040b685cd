use std::time::Duration;

use super::{pid_alive, Engine};
use crate::error::{KukeonError, Result};
use crate::model::{Cell, ContainerState, ContainerStatus, EntityState};
use crate::runtime::{DeleteOptions, NamespacePaths, RuntimeError, StopOptions};

impl Engine {
    /// Starts a cell: recreates and starts the root container, attaches it
    /// to the space network, then recreates and starts every workload
    /// inside the root's net/ipc/uts namespaces.
    ///
    /// The root's task is observed running with a valid PID before any
    /// workload container is created; workloads start in declared order.
    /// Stale records left behind by a crash are deleted and recreated, so
    /// repeated starts converge on a fresh cell.
    pub fn start_cell(&self, cell: &Cell) -> Result<Cell> {
        cell.validate()?;
        let realm = self.realm(&cell.realm_name)?;
        let space = self.space(&cell.realm_name, &cell.space_name)?;
        self.stack(&cell.realm_name, &cell.space_name, &cell.stack_name)?;

        let mut cell = cell.clone();
        let gateway = self.gateway_for_realm(&realm)?;

        // The cell cgroup may be missing after a crash; creation is
        // create-or-load either way.
        let cgroup_path = self.cell_cgroup_path(&cell);
        self.cgroup().create(&cgroup_path)?;
        cell.status.cgroup_path = Some(cgroup_path.display().to_string());

        let root_spec = cell.root_spec();
        let root_id = root_spec.resolve_containerd_id()?;

        // Recreate semantics: drop any prior task and record so a stale
        // spec from a previous run cannot leak into this one. Absence of
        // the prior record is the common case and not an error.
        let reap = StopOptions {
            force: true,
            timeout: Duration::from_secs(1),
        };
        gateway.stop_container(&root_id, &reap)?;
        gateway.delete_container(&root_id, &DeleteOptions { snapshot_cleanup: true })?;

        self.create_root_container(&cell, &gateway)?;
        let root_task = gateway
            .start_container(&root_id)
            .map_err(|source| KukeonError::StartRoot {
                id: root_id.clone(),
                source,
            })?;
        let root_pid = root_task.pid();
        if !pid_alive(root_pid) {
            tracing::warn!(
                container_id = %root_id,
                pid = root_pid,
                "root task pid is not observable in /proc"
            );
        }
        let ns_paths = NamespacePaths::from_pid(root_pid);

        // Attach the shared namespace to the space network before any
        // workload joins it.
        let network_name = self.network_name(&cell.realm_name, &cell.space_name)?;
        let mut manager = self.cni_manager()?;
        manager
            .load_network_config_list(&self.cni_conf_path(&space))
            .map_err(KukeonError::InitCniManager)?;
        manager
            .add_container_to_network(&root_id, &ns_paths.net)
            .map_err(|source| KukeonError::AttachRoot {
                id: root_id.clone(),
                network: network_name.clone(),
                source,
            })?;

        cell.set_container_status(ContainerStatus {
            containerd_id: root_id.clone(),
            state: ContainerState::Running,
            pid: Some(root_pid),
        });

        for spec in cell.workload_specs() {
            let containerd_id = spec.resolve_containerd_id()?;

            gateway.stop_container(&containerd_id, &reap)?;
            gateway.delete_container(&containerd_id, &DeleteOptions { snapshot_cleanup: true })?;

            match gateway.create_container(&containerd_id, &spec, &cell.labels, Some(&ns_paths)) {
                Ok(()) => {}
                Err(err) if err.is_already_exists() => {
                    tracing::debug!(
                        container_id = %containerd_id,
                        cell = %cell.id,
                        "workload container already exists"
                    );
                }
                Err(RuntimeError::Spec { source, .. }) => {
                    return Err(KukeonError::ConversionFailed(source))
                }
                Err(err) => return Err(err.into()),
            }

            let task = gateway.start_container(&containerd_id)?;
            cell.set_container_status(ContainerStatus {
                containerd_id,
                state: ContainerState::Running,
                pid: Some(task.pid()),
            });
        }

        cell.status.state = EntityState::Ready;
        if cell.status.created_at.is_none() {
            cell.status.created_at = Some(chrono::Utc::now());
        }

        // Status persistence is best effort: a metadata hiccup must not
        // undo a successfully started cell.
        if let Err(err) = self.store().update_cell(&cell) {
            tracing::warn!(
                cell = %cell.id,
                cell_name = %cell.name,
                err = %err,
                "failed to persist cell status after start"
            );
        }

        tracing::info!(
            cell = %cell.id,
            cell_name = %cell.name,
            space = %cell.space_name,
            realm = %cell.realm_name,
            root_pid,
            "cell started"
        );
        Ok(cell)
    }
}
