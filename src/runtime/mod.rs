//! Container runtime access.
//!
//! The low-level containerd client is a collaborator, not part of this
//! crate: it is modeled as the [`Client`] trait. Everything above it
//! (namespace scoping, OCI spec construction, label stamping, stop/delete
//! idempotence) lives in the [`Gateway`]. Tests run the gateway against
//! the in-memory client in [`testing`].

mod client;
mod gateway;
pub mod testing;

pub use client::{
    Client, ContainerRecord, CreateContainerRequest, DeleteOptions, StopOptions, TaskHandle,
};
pub use gateway::{Gateway, NamespacePaths};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to connect to container runtime at {address:?}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no containerd namespace bound to the gateway")]
    NamespaceNotSet,
    #[error("containerd namespace name is empty")]
    EmptyNamespace,
    #[error("containerd namespace {namespace:?} is not empty")]
    NamespaceNotEmpty { namespace: String },
    #[error("container {id:?} not found")]
    ContainerNotFound { id: String },
    #[error("container {id:?} already exists")]
    ContainerAlreadyExists { id: String },
    #[error("container {id:?} still has an active task")]
    TaskStillActive { id: String },
    #[error("task for container {id:?} not found")]
    TaskNotFound { id: String },
    #[error("task for container {id:?} already exists")]
    TaskAlreadyExists { id: String },
    #[error("task for container {id:?} has no pid")]
    TaskWithoutPid { id: String },
    #[error("failed to build runtime spec for container {id:?}")]
    Spec {
        id: String,
        #[source]
        source: oci_spec::OciSpecError,
    },
    #[error("runtime client error: {msg}")]
    Client { msg: String },
}

impl RuntimeError {
    /// Absent container or task: expected during teardown and downgraded to
    /// success by idempotent operations.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RuntimeError::ContainerNotFound { .. } | RuntimeError::TaskNotFound { .. }
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            RuntimeError::ContainerAlreadyExists { .. } | RuntimeError::TaskAlreadyExists { .. }
        )
    }
}
