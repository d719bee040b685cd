//! The cell lifecycle engine.
//!
//! Composes naming, the metadata store, the CNI manager and the runtime
//! gateway into the create/start/stop/kill/delete/purge state machine.
//! Operations are synchronous and designed to be safely re-run: "already
//! exists" on create and "not found" on stop/delete are downgraded to
//! success, and every teardown path keeps going past individual failures so
//! later cleanup steps still run.

mod cell_create;
mod cell_delete;
mod cell_kill;
mod cell_start;
mod cell_stop;
mod entity_delete;
mod provision;
mod purge;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cgroup::CgroupRoot;
use crate::cni::{CniDirs, CniManager};
use crate::error::{KukeonError, Result};
use crate::metadata::MetadataStore;
use crate::model::{Cell, Realm, Space, Stack};
use crate::naming;
use crate::runtime::{Client, Gateway};

pub const DEFAULT_RUN_PATH: &str = "/var/run/kukeon";

/// Engine tunables. Empty CNI directories fall back to the operational
/// defaults when the manager is constructed.
#[derive(Debug, Clone)]
pub struct Config {
    pub run_path: PathBuf,
    pub cni: CniDirs,
    pub stop_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_path: PathBuf::from(DEFAULT_RUN_PATH),
            cni: CniDirs::default(),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Coordinator for all lifecycle operations.
///
/// Holds no global mutable state: a fresh gateway is bound per operation so
/// a namespace binding never leaks from a previous call.
pub struct Engine {
    config: Config,
    store: MetadataStore,
    client: Arc<dyn Client>,
    cgroup: CgroupRoot,
}

impl Engine {
    /// Builds an engine over the host cgroup hierarchy.
    pub fn new(config: Config, client: Arc<dyn Client>) -> Result<Self> {
        let cgroup = CgroupRoot::detect()?;
        Ok(Self::with_cgroup_root(config, client, cgroup))
    }

    /// Builds an engine with an explicit cgroup root, for callers that
    /// manage the hierarchy themselves (and for tests).
    pub fn with_cgroup_root(config: Config, client: Arc<dyn Client>, cgroup: CgroupRoot) -> Self {
        let store = MetadataStore::new(config.run_path.clone());
        Self {
            config,
            store,
            client,
            cgroup,
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn cgroup(&self) -> &CgroupRoot {
        &self.cgroup
    }

    pub(crate) fn client(&self) -> Arc<dyn Client> {
        self.client.clone()
    }

    // Lookups. Ancestor entities must already exist; a missing ancestor is
    // surfaced as the corresponding Get* error.

    pub fn realm(&self, name: &str) -> Result<Realm> {
        if name.is_empty() {
            return Err(KukeonError::RealmNameRequired);
        }
        self.store
            .get_realm(name)
            .map_err(|source| KukeonError::GetRealm {
                name: name.to_string(),
                source,
            })
    }

    pub fn space(&self, realm: &str, name: &str) -> Result<Space> {
        if name.is_empty() {
            return Err(KukeonError::SpaceNameRequired);
        }
        self.store
            .get_space(realm, name)
            .map_err(|source| KukeonError::GetSpace {
                name: name.to_string(),
                source,
            })
    }

    pub fn stack(&self, realm: &str, space: &str, name: &str) -> Result<Stack> {
        if name.is_empty() {
            return Err(KukeonError::StackNameRequired);
        }
        self.store
            .get_stack(realm, space, name)
            .map_err(|source| KukeonError::GetStack {
                name: name.to_string(),
                source,
            })
    }

    /// Looks a cell up by its tuple. Distinguishes a missing cell from a
    /// failing store.
    pub fn cell(&self, realm: &str, space: &str, stack: &str, name: &str) -> Result<Cell> {
        if name.is_empty() {
            return Err(KukeonError::CellNameRequired);
        }
        match self.store.get_cell(realm, space, stack, name) {
            Ok(cell) => Ok(cell),
            Err(err) if err.is_not_found() => Err(KukeonError::CellNotFound {
                name: name.to_string(),
            }),
            Err(source) => Err(KukeonError::GetCell {
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Binds a fresh gateway to the realm's containerd namespace.
    pub(crate) fn gateway_for_realm(&self, realm: &Realm) -> Result<Gateway> {
        let mut gateway = Gateway::new(self.client.clone());
        match &realm.registry_credentials {
            Some(credentials) => gateway
                .set_namespace_with_credentials(&realm.namespace, credentials.clone())
                .map_err(KukeonError::ConnectContainerd)?,
            None => gateway
                .set_namespace(&realm.namespace)
                .map_err(KukeonError::ConnectContainerd)?,
        }
        Ok(gateway)
    }

    pub(crate) fn cni_manager(&self) -> Result<CniManager> {
        CniManager::new(self.config.cni.clone()).map_err(KukeonError::InitCniManager)
    }

    /// The conflist a cell in this space attaches through: the explicit
    /// path declared on the space, or the derived run-path location.
    pub(crate) fn cni_conf_path(&self, space: &Space) -> PathBuf {
        space.cni_config_path.clone().unwrap_or_else(|| {
            self.store
                .space_conflist_path(&space.realm_name, &space.name)
        })
    }

    pub(crate) fn network_name(&self, realm_name: &str, space_name: &str) -> Result<String> {
        naming::build_space_network_name(realm_name, space_name)
    }

    /// Absolute cgroup path for a cell, preferring the value persisted in
    /// status over re-derivation.
    pub(crate) fn cell_cgroup_path(&self, cell: &Cell) -> PathBuf {
        match &cell.status.cgroup_path {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.cgroup.entity_path(&[
                &cell.realm_name,
                &cell.space_name,
                &cell.stack_name,
                &cell.name,
            ]),
        }
    }
}

/// Whether a PID still names a live process on this host.
pub(crate) fn pid_alive(pid: i32) -> bool {
    procfs::process::Process::new(pid).is_ok()
}
