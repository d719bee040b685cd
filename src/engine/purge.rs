use std::time::Duration;

use super::Engine;
use crate::error::{KukeonError, Result};
use crate::model::{Cell, Realm, Space, Stack};
use crate::naming;
use crate::runtime::{DeleteOptions, StopOptions};

/// Which containerd IDs a purge owns. The five purge flavors reduce to one
/// runtime walk parameterized by this scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PurgeScope {
    /// Every container in the realm's namespace.
    Realm,
    /// Containers whose ID is derived from the space.
    Space { space: String },
    /// Containers whose ID is derived from the stack.
    Stack { space: String, stack: String },
}

impl PurgeScope {
    fn matches(&self, containerd_id: &str) -> bool {
        match self {
            PurgeScope::Realm => true,
            PurgeScope::Space { space } => {
                containerd_id.starts_with(&naming::space_id_prefix(space))
            }
            PurgeScope::Stack { space, stack } => {
                containerd_id.starts_with(&naming::stack_id_prefix(space, stack))
            }
        }
    }
}

impl Engine {
    /// Deletes the cell, then scrubs every trace the stored (or supplied)
    /// spec can derive: container records, CNI state, cgroup, metadata
    /// directory. Works even when the forward path left only fragments.
    pub fn purge_cell(&self, cell: &Cell) -> Result<()> {
        cell.validate()?;

        // Read the stored document before delete removes it; the supplied
        // one is the fallback for a cell whose metadata is already gone.
        let target = self
            .store()
            .get_cell(&cell.realm_name, &cell.space_name, &cell.stack_name, &cell.name)
            .unwrap_or_else(|_| cell.clone());

        if let Err(err) = self.delete_cell(&target) {
            tracing::warn!(cell = %target.name, err = %err, "delete during purge failed, continuing");
        }

        // Orphaned records survive a failed delete (e.g. unreachable
        // metadata); remove them and their network state by derived ID.
        if let Ok(realm) = self.realm(&target.realm_name) {
            if let Ok(gateway) = self.gateway_for_realm(&realm) {
                let reap = StopOptions {
                    force: true,
                    timeout: Duration::from_secs(1),
                };
                for spec in target.all_specs() {
                    let Ok(containerd_id) = spec.resolve_containerd_id() else {
                        continue;
                    };
                    if let Err(err) = gateway.stop_container(&containerd_id, &reap) {
                        tracing::debug!(container_id = %containerd_id, err = %err, "purge stop");
                    }
                    if let Err(err) =
                        gateway.delete_container(&containerd_id, &DeleteOptions { snapshot_cleanup: true })
                    {
                        tracing::debug!(container_id = %containerd_id, err = %err, "purge delete");
                    }
                }
            }
        }
        self.sweep_cell_cni_state(&target);

        let cgroup_path = self.cell_cgroup_path(&target);
        if let Err(err) = self.cgroup().delete(&cgroup_path) {
            tracing::warn!(path = ?cgroup_path, err = %err, "failed to force-delete cell cgroup");
        }

        let dir = self.store().cell_dir(
            &target.realm_name,
            &target.space_name,
            &target.stack_name,
            &target.name,
        );
        self.store().remove_dir(&dir)?;
        tracing::info!(cell = %target.id, cell_name = %target.name, "cell purged");
        Ok(())
    }

    /// Deletes the stack, then sweeps the runtime for any container whose
    /// ID the stack owns, listed in a cell spec or not.
    pub fn purge_stack(&self, stack: &Stack) -> Result<()> {
        if stack.name.is_empty() {
            return Err(KukeonError::StackNameRequired);
        }
        let target = self
            .store()
            .get_stack(&stack.realm_name, &stack.space_name, &stack.name)
            .unwrap_or_else(|_| stack.clone());

        let realm_doc = self.store().get_realm(&target.realm_name).ok();
        if let Err(err) = self.delete_stack(&target) {
            tracing::warn!(stack = %target.name, err = %err, "delete during purge failed, continuing");
        }

        let networks = self.space_networks(&target.realm_name, Some(&target.space_name));
        self.purge_runtime_scope(
            realm_doc.as_ref(),
            &PurgeScope::Stack {
                space: target.space_name.clone(),
                stack: target.name.clone(),
            },
            &networks,
        );

        let cgroup_path = self.entity_cgroup_path(
            &target.status.cgroup_path,
            &[&target.realm_name, &target.space_name, &target.name],
        );
        if let Err(err) = self.cgroup().delete(&cgroup_path) {
            tracing::warn!(path = ?cgroup_path, err = %err, "failed to force-delete stack cgroup");
        }

        let dir = self
            .store()
            .stack_dir(&target.realm_name, &target.space_name, &target.name);
        self.store().remove_dir(&dir)?;
        tracing::info!(stack = %target.name, space = %target.space_name, "stack purged");
        Ok(())
    }

    /// Deletes the space, sweeps the runtime for containers the space owns,
    /// and wipes the space network's on-disk state wholesale.
    pub fn purge_space(&self, space: &Space) -> Result<()> {
        if space.name.is_empty() {
            return Err(KukeonError::SpaceNameRequired);
        }
        let target = self
            .store()
            .get_space(&space.realm_name, &space.name)
            .unwrap_or_else(|_| space.clone());

        // Conflist path must be resolved before metadata disappears.
        let conf_path = self.cni_conf_path(&target);

        let realm_doc = self.store().get_realm(&target.realm_name).ok();
        if let Err(err) = self.delete_space(&target) {
            tracing::warn!(space = %target.name, err = %err, "delete during purge failed, continuing");
        }

        let networks = self.space_networks(&target.realm_name, Some(&target.name));
        self.purge_runtime_scope(
            realm_doc.as_ref(),
            &PurgeScope::Space {
                space: target.name.clone(),
            },
            &networks,
        );

        for network in &networks {
            self.purge_cni_for_network(network, &conf_path);
        }

        let cgroup_path = self.entity_cgroup_path(
            &target.status.cgroup_path,
            &[&target.realm_name, &target.name],
        );
        if let Err(err) = self.cgroup().delete(&cgroup_path) {
            tracing::warn!(path = ?cgroup_path, err = %err, "failed to force-delete space cgroup");
        }

        let dir = self.store().space_dir(&target.realm_name, &target.name);
        self.store().remove_dir(&dir)?;
        tracing::info!(space = %target.name, realm = %target.realm_name, "space purged");
        Ok(())
    }

    /// Deletes the realm, sweeps every container in its namespace (orphans
    /// included), scrubs all of its networks, empties the namespace of
    /// images and snapshots, and finally deletes the namespace itself.
    pub fn purge_realm(&self, realm: &Realm) -> Result<()> {
        if realm.name.is_empty() {
            return Err(KukeonError::RealmNameRequired);
        }
        let target = self
            .store()
            .get_realm(&realm.name)
            .unwrap_or_else(|_| realm.clone());

        // Space list and conflist paths disappear with the metadata; gather
        // the network inventory first.
        let spaces = self.owned_names(self.store().list_spaces(&target.name));
        let network_inventory: Vec<(String, std::path::PathBuf)> = spaces
            .iter()
            .filter_map(|space_name| {
                let network = self.network_name(&target.name, space_name).ok()?;
                let conf_path = self
                    .store()
                    .get_space(&target.name, space_name)
                    .ok()
                    .map(|space| self.cni_conf_path(&space))
                    .unwrap_or_default();
                Some((network, conf_path))
            })
            .collect();
        let networks: Vec<String> = network_inventory
            .iter()
            .map(|(network, _)| network.clone())
            .collect();

        if let Err(err) = self.delete_realm(&target) {
            tracing::warn!(realm = %target.name, err = %err, "delete during purge failed, continuing");
        }

        self.purge_runtime_scope(Some(&target), &PurgeScope::Realm, &networks);

        for (network, conf_path) in &network_inventory {
            self.purge_cni_for_network(network, conf_path);
        }

        // Empty and delete the containerd namespace.
        if !target.namespace.is_empty() {
            let gateway = crate::runtime::Gateway::new(self.client());
            if let Err(err) = gateway.cleanup_namespace_resources(&target.namespace) {
                tracing::warn!(namespace = %target.namespace, err = %err, "namespace resource cleanup failed");
            }
            if let Err(err) = gateway.delete_namespace(&target.namespace) {
                tracing::warn!(namespace = %target.namespace, err = %err, "failed to delete namespace");
            }
        }

        let cgroup_path =
            self.entity_cgroup_path(&target.status.cgroup_path, &[&target.name]);
        if let Err(err) = self.cgroup().delete(&cgroup_path) {
            tracing::warn!(path = ?cgroup_path, err = %err, "failed to force-delete realm cgroup");
        }

        let dir = self.store().realm_dir(&target.name);
        self.store().remove_dir(&dir)?;
        tracing::info!(realm = %target.name, "realm purged");
        Ok(())
    }

    /// Walks the runtime and removes every container (and its network
    /// state) the scope owns. Entirely best effort. The realm document is
    /// captured by the caller before metadata deletion, since it carries
    /// the namespace the walk is scoped to.
    fn purge_runtime_scope(&self, realm: Option<&Realm>, scope: &PurgeScope, networks: &[String]) {
        let Some(realm) = realm else {
            tracing::warn!(?scope, "realm metadata unavailable, skipping runtime purge walk");
            return;
        };
        let gateway = match self.gateway_for_realm(realm) {
            Ok(gateway) => gateway,
            Err(err) => {
                tracing::warn!(realm = %realm.name, err = %err, "cannot reach runtime for purge walk");
                return;
            }
        };
        let containers = match gateway.list_containers() {
            Ok(containers) => containers,
            Err(err) => {
                tracing::warn!(realm = %realm.name, err = %err, "failed to list containers for purge");
                return;
            }
        };

        let manager = match self.cni_manager() {
            Ok(manager) => Some(manager),
            Err(err) => {
                tracing::warn!(err = %err, "cannot build cni manager for purge walk");
                None
            }
        };
        let reap = StopOptions {
            force: true,
            timeout: Duration::from_secs(1),
        };

        for record in containers {
            if !scope.matches(&record.id) {
                continue;
            }
            tracing::debug!(container_id = %record.id, ?scope, "purging container");
            if let Err(err) = gateway.stop_container(&record.id, &reap) {
                tracing::warn!(container_id = %record.id, err = %err, "failed to stop container during purge");
            }
            if let Err(err) =
                gateway.delete_container(&record.id, &DeleteOptions { snapshot_cleanup: true })
            {
                tracing::warn!(container_id = %record.id, err = %err, "failed to delete container during purge");
            }
            if let Some(manager) = &manager {
                for network in networks {
                    manager.purge_container_state(network, &record.id);
                }
            }
        }
    }

    /// Removes a network's conflist and every IPAM/cache file related to
    /// it.
    pub(crate) fn purge_cni_for_network(&self, network_name: &str, conf_path: &std::path::Path) {
        match self.cni_manager() {
            Ok(manager) => {
                if conf_path.as_os_str().is_empty() {
                    manager.purge_network_state(network_name);
                } else if let Err(err) = manager.delete_network(network_name, conf_path) {
                    tracing::warn!(network = %network_name, err = %err, "failed to purge network");
                }
            }
            Err(err) => tracing::warn!(network = %network_name, err = %err, "cannot build cni manager"),
        }
    }

    /// Network names owned by a realm, or by one space of it.
    fn space_networks(&self, realm_name: &str, only_space: Option<&str>) -> Vec<String> {
        let spaces = match only_space {
            Some(space) => vec![space.to_string()],
            None => self.owned_names(self.store().list_spaces(realm_name)),
        };
        spaces
            .iter()
            .filter_map(|space| self.network_name(realm_name, space).ok())
            .collect()
    }
}
