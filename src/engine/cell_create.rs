use super::Engine;
use crate::error::{KukeonError, Result};
use crate::model::{Cell, Realm};
use crate::runtime::{Gateway, RuntimeError};

impl Engine {
    /// Creates the cell's container records: root first, then every
    /// workload in declared order. No tasks are started here.
    ///
    /// Returns the root container's containerd ID. If a later step fails,
    /// no cleanup is attempted: the caller is expected to purge, which
    /// removes any partial record.
    pub(crate) fn create_cell_containers(&self, cell: &Cell, realm: &Realm) -> Result<String> {
        let gateway = self.gateway_for_realm(realm)?;
        let root_id = self.create_root_container(cell, &gateway)?;

        for spec in cell.workload_specs() {
            let containerd_id = spec.resolve_containerd_id()?;
            match gateway.create_container(&containerd_id, &spec, &cell.labels, None) {
                Ok(()) => {}
                Err(err) if err.is_already_exists() => {
                    // Lost a create race; the record is in place either way
                    tracing::debug!(
                        container_id = %containerd_id,
                        cell = %cell.id,
                        "container already exists"
                    );
                }
                Err(err) => return Err(map_workload_create_err(err)),
            }
        }

        Ok(root_id)
    }

    /// Same as [`Self::create_cell_containers`], but every create is
    /// guarded by an existence check. The check is advisory: a concurrent
    /// creator racing between check and act still resolves to success.
    pub(crate) fn ensure_cell_containers(&self, cell: &Cell, realm: &Realm) -> Result<String> {
        let gateway = self.gateway_for_realm(realm)?;

        let root_spec = cell.root_spec();
        let root_id = root_spec.resolve_containerd_id()?;
        if !gateway.exists_container(&root_id).map_err(KukeonError::Runtime)? {
            self.create_root_container(cell, &gateway)?;
        }

        for spec in cell.workload_specs() {
            let containerd_id = spec.resolve_containerd_id()?;
            if gateway
                .exists_container(&containerd_id)
                .map_err(KukeonError::Runtime)?
            {
                continue;
            }
            match gateway.create_container(&containerd_id, &spec, &cell.labels, None) {
                Ok(()) => {}
                Err(err) if err.is_already_exists() => {
                    tracing::debug!(
                        container_id = %containerd_id,
                        cell = %cell.id,
                        "container created concurrently"
                    );
                }
                Err(err) => return Err(map_workload_create_err(err)),
            }
        }

        Ok(root_id)
    }

    /// Creates the root container record, wrapping any failure in the
    /// root-specific error kind.
    pub(crate) fn create_root_container(&self, cell: &Cell, gateway: &Gateway) -> Result<String> {
        let root_spec = cell.root_spec();
        let root_id = root_spec.resolve_containerd_id()?;

        match gateway.create_container(&root_id, &root_spec, &cell.labels, None) {
            Ok(()) => Ok(root_id),
            Err(err) if err.is_already_exists() => {
                tracing::debug!(container_id = %root_id, cell = %cell.id, "root container already exists");
                Ok(root_id)
            }
            Err(RuntimeError::Spec { source, .. }) => Err(KukeonError::ConversionFailed(source)),
            Err(err) => {
                tracing::error!(
                    container_id = %root_id,
                    cell = %cell.id,
                    cell_name = %cell.name,
                    space = %cell.space_name,
                    realm = %cell.realm_name,
                    err = %err,
                    "failed to create root container"
                );
                Err(KukeonError::CreateRootContainer {
                    id: root_id,
                    source: err,
                })
            }
        }
    }
}

fn map_workload_create_err(err: RuntimeError) -> KukeonError {
    match err {
        RuntimeError::Spec { source, .. } => KukeonError::ConversionFailed(source),
        other => KukeonError::Runtime(other),
    }
}
