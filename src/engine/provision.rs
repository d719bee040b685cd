use super::Engine;
use crate::cni::NetworkConfigList;
use crate::error::{KukeonError, Result};
use crate::model::{Cell, ContainerState, ContainerStatus, EntityState, Realm, Space, Stack};
use crate::runtime::Gateway;

impl Engine {
    /// Creates a realm: containerd namespace plus top-level cgroup.
    ///
    /// Ensure semantics: a `Ready` realm is returned as-is, a `Failed` one
    /// is refused until purged, and a half-provisioned one (crash between
    /// steps) is provisioned again. `Failed` is persisted before any
    /// provisioning error propagates.
    pub fn create_realm(&self, realm: &Realm) -> Result<Realm> {
        if realm.name.is_empty() {
            return Err(KukeonError::RealmNameRequired);
        }

        match self.store().get_realm(&realm.name) {
            Ok(existing) if existing.status.state.is_ready() => Ok(existing),
            Ok(existing) if existing.status.state.is_failed() => Err(KukeonError::FailedState {
                kind: "realm",
                name: existing.name,
            }),
            Ok(_) => self.provision_new_realm(realm.clone()),
            Err(err) if err.is_not_found() => self.provision_new_realm(realm.clone()),
            Err(source) => Err(KukeonError::GetRealm {
                name: realm.name.clone(),
                source,
            }),
        }
    }

    fn provision_new_realm(&self, mut realm: Realm) -> Result<Realm> {
        realm.status.state = EntityState::Creating;
        self.persist_realm(&realm)?;

        if realm.namespace.is_empty() {
            let err = KukeonError::CreateNamespace {
                namespace: String::new(),
                source: crate::runtime::RuntimeError::EmptyNamespace,
            };
            return Err(self.fail_realm(realm, err));
        }

        let gateway = Gateway::new(self.client());
        if let Err(source) = gateway.create_namespace(&realm.namespace) {
            let err = KukeonError::CreateNamespace {
                namespace: realm.namespace.clone(),
                source,
            };
            return Err(self.fail_realm(realm, err));
        }

        let cgroup_path = self.cgroup().entity_path(&[&realm.name]);
        if let Err(err) = self.cgroup().create(&cgroup_path) {
            return Err(self.fail_realm(realm, err));
        }
        realm.status.cgroup_path = Some(cgroup_path.display().to_string());

        realm.status.mark_ready();
        self.persist_realm(&realm)?;
        tracing::info!(realm = %realm.name, namespace = %realm.namespace, "realm created");
        Ok(realm)
    }

    /// Creates a space: cgroup under the realm plus the space's network
    /// configuration list. A space without an explicit conflist path gets a
    /// default bridge network written under the run path.
    pub fn create_space(&self, space: &Space) -> Result<Space> {
        if space.name.is_empty() {
            return Err(KukeonError::SpaceNameRequired);
        }
        let realm = self.realm(&space.realm_name)?;

        match self.store().get_space(&space.realm_name, &space.name) {
            Ok(existing) if existing.status.state.is_ready() => Ok(existing),
            Ok(existing) if existing.status.state.is_failed() => Err(KukeonError::FailedState {
                kind: "space",
                name: existing.name,
            }),
            Ok(_) => self.provision_new_space(space.clone(), &realm),
            Err(err) if err.is_not_found() => self.provision_new_space(space.clone(), &realm),
            Err(source) => Err(KukeonError::GetSpace {
                name: space.name.clone(),
                source,
            }),
        }
    }

    fn provision_new_space(&self, mut space: Space, realm: &Realm) -> Result<Space> {
        space.status.state = EntityState::Creating;
        self.persist_space(&space)?;

        let network_name = match self.network_name(&space.realm_name, &space.name) {
            Ok(name) => name,
            Err(err) => return Err(self.fail_space(space, err)),
        };

        let parent = self.entity_cgroup_path(&realm.status.cgroup_path, &[&realm.name]);
        let cgroup_path = parent.join(&space.name);
        if let Err(err) = self.cgroup().create(&cgroup_path) {
            return Err(self.fail_space(space, err));
        }
        space.status.cgroup_path = Some(cgroup_path.display().to_string());

        let conf_path = self.cni_conf_path(&space);
        if space.cni_config_path.is_some() {
            // An explicitly declared conflist must already exist; the
            // engine never generates one outside its own run path.
            if !conf_path.exists() {
                return Err(self.fail_space(
                    space,
                    KukeonError::NetworkNotFound { name: network_name },
                ));
            }
        } else if conf_path.exists() {
            // The derived slot may hold a conflist from a previous run of
            // this space, but never a foreign network.
            match NetworkConfigList::load(&conf_path) {
                Ok(existing) if existing.name != network_name => {
                    return Err(self.fail_space(
                        space,
                        KukeonError::NetworkAlreadyExists { name: existing.name },
                    ));
                }
                _ => {}
            }
        } else {
            let conflist = NetworkConfigList::bridge_default(&network_name);
            if let Err(err) = conflist.save(&conf_path) {
                return Err(self.fail_space(space, err.into()));
            }
        }

        space.status.mark_ready();
        self.persist_space(&space)?;
        tracing::info!(space = %space.name, realm = %space.realm_name, network = %network_name, "space created");
        Ok(space)
    }

    /// Creates a stack: a cgroup under the space.
    pub fn create_stack(&self, stack: &Stack) -> Result<Stack> {
        if stack.name.is_empty() {
            return Err(KukeonError::StackNameRequired);
        }
        self.realm(&stack.realm_name)?;
        let space = self.space(&stack.realm_name, &stack.space_name)?;

        match self
            .store()
            .get_stack(&stack.realm_name, &stack.space_name, &stack.name)
        {
            Ok(existing) if existing.status.state.is_ready() => Ok(existing),
            Ok(existing) if existing.status.state.is_failed() => Err(KukeonError::FailedState {
                kind: "stack",
                name: existing.name,
            }),
            Ok(_) => self.provision_new_stack(stack.clone(), &space),
            Err(err) if err.is_not_found() => self.provision_new_stack(stack.clone(), &space),
            Err(source) => Err(KukeonError::GetStack {
                name: stack.name.clone(),
                source,
            }),
        }
    }

    fn provision_new_stack(&self, mut stack: Stack, space: &Space) -> Result<Stack> {
        stack.status.state = EntityState::Creating;
        self.persist_stack(&stack)?;

        let parent = self.entity_cgroup_path(
            &space.status.cgroup_path,
            &[&space.realm_name, &space.name],
        );
        let cgroup_path = parent.join(&stack.name);
        if let Err(err) = self.cgroup().create(&cgroup_path) {
            return Err(self.fail_stack(stack, err));
        }
        stack.status.cgroup_path = Some(cgroup_path.display().to_string());

        stack.status.mark_ready();
        self.persist_stack(&stack)?;
        tracing::info!(stack = %stack.name, space = %stack.space_name, realm = %stack.realm_name, "stack created");
        Ok(stack)
    }

    /// Creates a cell: cgroup under the stack plus the container records
    /// for the root and every declared workload. Nothing is started.
    pub fn create_cell(&self, cell: &Cell) -> Result<Cell> {
        cell.validate()?;
        let realm = self.realm(&cell.realm_name)?;
        self.space(&cell.realm_name, &cell.space_name)?;
        let stack = self.stack(&cell.realm_name, &cell.space_name, &cell.stack_name)?;

        match self.store().get_cell(
            &cell.realm_name,
            &cell.space_name,
            &cell.stack_name,
            &cell.name,
        ) {
            Ok(existing) if existing.status.state.is_ready() => Ok(existing),
            Ok(existing) if existing.status.state.is_failed() => Err(KukeonError::FailedState {
                kind: "cell",
                name: existing.name,
            }),
            // Pending, Creating or Stopped: reconcile the records back into
            // place with existence checks.
            Ok(_) => self.provision_new_cell(cell.clone(), &realm, &stack, false),
            Err(err) if err.is_not_found() => {
                self.provision_new_cell(cell.clone(), &realm, &stack, true)
            }
            Err(source) => Err(KukeonError::GetCell {
                name: cell.name.clone(),
                source,
            }),
        }
    }

    fn provision_new_cell(
        &self,
        mut cell: Cell,
        realm: &Realm,
        stack: &Stack,
        fresh: bool,
    ) -> Result<Cell> {
        cell.status.state = EntityState::Creating;
        self.persist_cell(&cell)?;

        let parent = self.entity_cgroup_path(
            &stack.status.cgroup_path,
            &[&stack.realm_name, &stack.space_name, &stack.name],
        );
        let cgroup_path = parent.join(&cell.name);
        if let Err(err) = self.cgroup().create(&cgroup_path) {
            return Err(self.fail_cell(cell, err));
        }
        cell.status.cgroup_path = Some(cgroup_path.display().to_string());

        // Root and workload records. On failure the partial records stay
        // for purge to collect; the Failed state is persisted first.
        let containers = if fresh {
            self.create_cell_containers(&cell, realm)
        } else {
            self.ensure_cell_containers(&cell, realm)
        };
        if let Err(err) = containers {
            return Err(self.fail_cell(cell, err));
        }

        for spec in cell.all_specs() {
            if let Ok(containerd_id) = spec.resolve_containerd_id() {
                cell.set_container_status(ContainerStatus {
                    containerd_id,
                    state: ContainerState::Created,
                    pid: None,
                });
            }
        }

        cell.status.state = EntityState::Ready;
        if cell.status.created_at.is_none() {
            cell.status.created_at = Some(chrono::Utc::now());
        }
        self.persist_cell(&cell)?;
        tracing::info!(
            cell = %cell.id,
            cell_name = %cell.name,
            stack = %cell.stack_name,
            space = %cell.space_name,
            realm = %cell.realm_name,
            "cell created"
        );
        Ok(cell)
    }

    // Persistence helpers. The failure variants persist `Failed` before
    // handing the original error back, so a restarted caller observes the
    // same state.

    fn persist_realm(&self, realm: &Realm) -> Result<()> {
        self.store()
            .update_realm(realm)
            .map_err(|source| KukeonError::UpdateRealmMetadata {
                name: realm.name.clone(),
                source,
            })
    }

    fn persist_space(&self, space: &Space) -> Result<()> {
        self.store()
            .update_space(space)
            .map_err(|source| KukeonError::UpdateSpaceMetadata {
                name: space.name.clone(),
                source,
            })
    }

    fn persist_stack(&self, stack: &Stack) -> Result<()> {
        self.store()
            .update_stack(stack)
            .map_err(|source| KukeonError::UpdateStackMetadata {
                name: stack.name.clone(),
                source,
            })
    }

    fn persist_cell(&self, cell: &Cell) -> Result<()> {
        self.store()
            .update_cell(cell)
            .map_err(|source| KukeonError::UpdateCellMetadata {
                name: cell.name.clone(),
                source,
            })
    }

    fn fail_realm(&self, mut realm: Realm, err: KukeonError) -> KukeonError {
        tracing::error!(realm = %realm.name, err = %err, "realm provisioning failed");
        realm.status.state = EntityState::Failed;
        if let Err(persist_err) = self.persist_realm(&realm) {
            tracing::warn!(realm = %realm.name, err = %persist_err, "failed to persist failed state");
        }
        err
    }

    fn fail_space(&self, mut space: Space, err: KukeonError) -> KukeonError {
        tracing::error!(space = %space.name, realm = %space.realm_name, err = %err, "space provisioning failed");
        space.status.state = EntityState::Failed;
        if let Err(persist_err) = self.persist_space(&space) {
            tracing::warn!(space = %space.name, err = %persist_err, "failed to persist failed state");
        }
        err
    }

    fn fail_stack(&self, mut stack: Stack, err: KukeonError) -> KukeonError {
        tracing::error!(stack = %stack.name, space = %stack.space_name, err = %err, "stack provisioning failed");
        stack.status.state = EntityState::Failed;
        if let Err(persist_err) = self.persist_stack(&stack) {
            tracing::warn!(stack = %stack.name, err = %persist_err, "failed to persist failed state");
        }
        err
    }

    fn fail_cell(&self, mut cell: Cell, err: KukeonError) -> KukeonError {
        tracing::error!(
            cell = %cell.id,
            cell_name = %cell.name,
            space = %cell.space_name,
            realm = %cell.realm_name,
            err = %err,
            "cell provisioning failed"
        );
        cell.status.state = EntityState::Failed;
        if let Err(persist_err) = self.persist_cell(&cell) {
            tracing::warn!(cell = %cell.name, err = %persist_err, "failed to persist failed state");
        }
        err
    }

}
