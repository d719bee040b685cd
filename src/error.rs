use std::path::PathBuf;

use crate::cni::CniError;
use crate::metadata::MetadataError;
use crate::runtime::RuntimeError;

/// Errors surfaced by the public lifecycle operations.
///
/// Every variant that wraps a lower-level failure keeps the originating
/// error reachable through `source()`.
#[derive(Debug, thiserror::Error)]
pub enum KukeonError {
    #[error("realm name is required")]
    RealmNameRequired,
    #[error("space name is required")]
    SpaceNameRequired,
    #[error("stack name is required")]
    StackNameRequired,
    #[error("cell name is required")]
    CellNameRequired,
    #[error("cell id is required")]
    CellIdRequired,
    #[error("container name is required")]
    ContainerNameRequired,
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("cell {name} not found")]
    CellNotFound { name: String },
    #[error("container {id} not found")]
    ContainerNotFound { id: String },
    #[error("task for container {id} not found")]
    TaskNotFound { id: String },
    #[error("network {name} already exists")]
    NetworkAlreadyExists { name: String },
    #[error("network {name} not found")]
    NetworkNotFound { name: String },

    #[error("failed to get realm {name}")]
    GetRealm {
        name: String,
        #[source]
        source: MetadataError,
    },
    #[error("failed to get space {name}")]
    GetSpace {
        name: String,
        #[source]
        source: MetadataError,
    },
    #[error("failed to get stack {name}")]
    GetStack {
        name: String,
        #[source]
        source: MetadataError,
    },
    #[error("failed to get cell {name}")]
    GetCell {
        name: String,
        #[source]
        source: MetadataError,
    },
    #[error("failed to update realm {name} metadata")]
    UpdateRealmMetadata {
        name: String,
        #[source]
        source: MetadataError,
    },
    #[error("failed to update space {name} metadata")]
    UpdateSpaceMetadata {
        name: String,
        #[source]
        source: MetadataError,
    },
    #[error("failed to update stack {name} metadata")]
    UpdateStackMetadata {
        name: String,
        #[source]
        source: MetadataError,
    },
    #[error("failed to update cell {name} metadata")]
    UpdateCellMetadata {
        name: String,
        #[source]
        source: MetadataError,
    },
    #[error("metadata for {kind} {name} is corrupt: {reason}")]
    CorruptMetadata {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("failed to connect to container runtime")]
    ConnectContainerd(#[source] RuntimeError),
    #[error("failed to create containerd namespace {namespace:?}")]
    CreateNamespace {
        namespace: String,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to create root container {id}")]
    CreateRootContainer {
        id: String,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to start root container {id}")]
    StartRoot {
        id: String,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to attach root container {id} to network {network}")]
    AttachRoot {
        id: String,
        network: String,
        #[source]
        source: CniError,
    },
    #[error("failed to initialize cni manager")]
    InitCniManager(#[source] CniError),

    #[error("failed to convert container spec")]
    ConversionFailed(#[source] oci_spec::OciSpecError),

    #[error("{kind} {name} is in failed state, purge and recreate it")]
    FailedState { kind: &'static str, name: String },

    #[error("container {id} is the cell's root container, kill the cell instead")]
    RootKillForbidden { id: String },

    #[error("cgroup operation failed for {path:?}")]
    Cgroup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cgroup v2 hierarchy not usable: {reason}")]
    CgroupSetup { reason: String },

    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Cni(#[from] CniError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, KukeonError>;
