use std::path::PathBuf;

use super::Engine;
use crate::error::{KukeonError, Result};
use crate::model::{Cell, Realm, Space, Stack};

impl Engine {
    /// Deletes a stack: every owned cell first, then the stack's cgroup and
    /// metadata subtree. Success when the stack is already gone.
    pub fn delete_stack(&self, stack: &Stack) -> Result<()> {
        if stack.name.is_empty() {
            return Err(KukeonError::StackNameRequired);
        }

        let stored = match self
            .store()
            .get_stack(&stack.realm_name, &stack.space_name, &stack.name)
        {
            Ok(stored) => stored,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(source) => {
                return Err(KukeonError::GetStack {
                    name: stack.name.clone(),
                    source,
                })
            }
        };

        for cell in self.owned_cells(&stored.realm_name, &stored.space_name, &stored.name) {
            if let Err(err) = self.delete_cell(&cell) {
                tracing::warn!(cell = %cell.name, stack = %stored.name, err = %err, "failed to delete cell");
            }
        }

        let cgroup_path = self.entity_cgroup_path(
            &stored.status.cgroup_path,
            &[&stored.realm_name, &stored.space_name, &stored.name],
        );
        if let Err(err) = self.cgroup().delete(&cgroup_path) {
            tracing::warn!(path = ?cgroup_path, err = %err, "failed to delete stack cgroup");
        }

        self.store()
            .delete_stack(&stored.realm_name, &stored.space_name, &stored.name)
            .map_err(|source| KukeonError::UpdateStackMetadata {
                name: stored.name.clone(),
                source,
            })?;
        let dir = self
            .store()
            .stack_dir(&stored.realm_name, &stored.space_name, &stored.name);
        self.store().remove_dir(&dir)?;

        tracing::info!(stack = %stored.name, space = %stored.space_name, realm = %stored.realm_name, "stack deleted");
        Ok(())
    }

    /// Deletes a space: stacks, then the space's CNI network and on-disk
    /// network state, then cgroup and metadata.
    pub fn delete_space(&self, space: &Space) -> Result<()> {
        if space.name.is_empty() {
            return Err(KukeonError::SpaceNameRequired);
        }

        let stored = match self.store().get_space(&space.realm_name, &space.name) {
            Ok(stored) => stored,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(source) => {
                return Err(KukeonError::GetSpace {
                    name: space.name.clone(),
                    source,
                })
            }
        };

        for stack_name in self.owned_names(self.store().list_stacks(&stored.realm_name, &stored.name)) {
            let stack = Stack::new(&stack_name, &stored.realm_name, &stored.name);
            if let Err(err) = self.delete_stack(&stack) {
                tracing::warn!(stack = %stack_name, space = %stored.name, err = %err, "failed to delete stack");
            }
        }

        // Network teardown: remove the conflist and every IPAM/cache file
        // the network accumulated.
        match self.network_name(&stored.realm_name, &stored.name) {
            Ok(network_name) => {
                let conf_path = self.cni_conf_path(&stored);
                match self.cni_manager() {
                    Ok(manager) => {
                        if let Err(err) = manager.delete_network(&network_name, &conf_path) {
                            tracing::warn!(network = %network_name, err = %err, "failed to delete network");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(network = %network_name, err = %err, "cannot build cni manager")
                    }
                }
            }
            Err(err) => {
                tracing::warn!(space = %stored.name, err = %err, "cannot resolve network name")
            }
        }

        let cgroup_path = self.entity_cgroup_path(
            &stored.status.cgroup_path,
            &[&stored.realm_name, &stored.name],
        );
        if let Err(err) = self.cgroup().delete(&cgroup_path) {
            tracing::warn!(path = ?cgroup_path, err = %err, "failed to delete space cgroup");
        }

        self.store()
            .delete_space(&stored.realm_name, &stored.name)
            .map_err(|source| KukeonError::UpdateSpaceMetadata {
                name: stored.name.clone(),
                source,
            })?;
        let dir = self.store().space_dir(&stored.realm_name, &stored.name);
        self.store().remove_dir(&dir)?;

        tracing::info!(space = %stored.name, realm = %stored.realm_name, "space deleted");
        Ok(())
    }

    /// Deletes a realm: spaces, then the containerd namespace (only when it
    /// has been emptied), then cgroup and metadata.
    pub fn delete_realm(&self, realm: &Realm) -> Result<()> {
        if realm.name.is_empty() {
            return Err(KukeonError::RealmNameRequired);
        }

        let stored = match self.store().get_realm(&realm.name) {
            Ok(stored) => stored,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(source) => {
                return Err(KukeonError::GetRealm {
                    name: realm.name.clone(),
                    source,
                })
            }
        };

        for space_name in self.owned_names(self.store().list_spaces(&stored.name)) {
            let space = Space::new(&space_name, &stored.name);
            if let Err(err) = self.delete_space(&space) {
                tracing::warn!(space = %space_name, realm = %stored.name, err = %err, "failed to delete space");
            }
        }

        // The namespace is removed only once empty; a realm with leftover
        // images or orphan containers needs a purge instead.
        if !stored.namespace.is_empty() {
            let gateway = crate::runtime::Gateway::new(self.client());
            if let Err(err) = gateway.delete_namespace(&stored.namespace) {
                tracing::warn!(namespace = %stored.namespace, err = %err, "namespace not deleted");
            }
        }

        let cgroup_path =
            self.entity_cgroup_path(&stored.status.cgroup_path, &[&stored.name]);
        if let Err(err) = self.cgroup().delete(&cgroup_path) {
            tracing::warn!(path = ?cgroup_path, err = %err, "failed to delete realm cgroup");
        }

        self.store()
            .delete_realm(&stored.name)
            .map_err(|source| KukeonError::UpdateRealmMetadata {
                name: stored.name.clone(),
                source,
            })?;
        let dir = self.store().realm_dir(&stored.name);
        self.store().remove_dir(&dir)?;

        tracing::info!(realm = %stored.name, "realm deleted");
        Ok(())
    }

    /// Starts every cell owned by a stack, in name order.
    pub fn start_stack(&self, stack: &Stack) -> Result<()> {
        for cell in self.owned_cells(&stack.realm_name, &stack.space_name, &stack.name) {
            self.start_cell(&cell)?;
        }
        Ok(())
    }

    /// Stops every cell owned by a stack. Failures are logged so the
    /// remaining cells still stop.
    pub fn stop_stack(&self, stack: &Stack) -> Result<()> {
        for cell in self.owned_cells(&stack.realm_name, &stack.space_name, &stack.name) {
            if let Err(err) = self.stop_cell(&cell) {
                tracing::warn!(cell = %cell.name, stack = %stack.name, err = %err, "failed to stop cell");
            }
        }
        Ok(())
    }

    /// Kills every cell owned by a stack.
    pub fn kill_stack(&self, stack: &Stack) -> Result<()> {
        for cell in self.owned_cells(&stack.realm_name, &stack.space_name, &stack.name) {
            if let Err(err) = self.kill_cell(&cell) {
                tracing::warn!(cell = %cell.name, stack = %stack.name, err = %err, "failed to kill cell");
            }
        }
        Ok(())
    }

    /// Stops every cell in every stack of a space.
    pub fn stop_space(&self, space: &Space) -> Result<()> {
        for stack_name in self.owned_names(self.store().list_stacks(&space.realm_name, &space.name)) {
            let stack = Stack::new(&stack_name, &space.realm_name, &space.name);
            self.stop_stack(&stack)?;
        }
        Ok(())
    }

    /// Stops every cell in every space of a realm.
    pub fn stop_realm(&self, realm: &Realm) -> Result<()> {
        for space_name in self.owned_names(self.store().list_spaces(&realm.name)) {
            let space = Space::new(&space_name, &realm.name);
            self.stop_space(&space)?;
        }
        Ok(())
    }

    /// Cells of a stack, loaded from metadata. Unreadable documents are
    /// logged and skipped so teardown can proceed past corruption.
    pub(crate) fn owned_cells(&self, realm: &str, space: &str, stack: &str) -> Vec<Cell> {
        let mut cells = Vec::new();
        for name in self.owned_names(self.store().list_cells(realm, space, stack)) {
            match self.store().get_cell(realm, space, stack, &name) {
                Ok(cell) => cells.push(cell),
                Err(err) => {
                    tracing::warn!(cell = %name, err = %err, "failed to load cell metadata");
                }
            }
        }
        cells
    }

    pub(crate) fn owned_names(
        &self,
        listing: std::result::Result<Vec<String>, crate::metadata::MetadataError>,
    ) -> Vec<String> {
        match listing {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(err = %err, "failed to list metadata children");
                Vec::new()
            }
        }
    }

    pub(crate) fn entity_cgroup_path(
        &self,
        stored: &Option<String>,
        segments: &[&str],
    ) -> PathBuf {
        match stored {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.cgroup().entity_path(segments),
        }
    }
}
