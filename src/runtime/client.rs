use std::collections::HashMap;
use std::time::Duration;

use nix::sys::signal::Signal;
use oci_spec::runtime::Spec;

use super::RuntimeError;
use crate::model::RegistryCredentials;

/// A container record as the runtime reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub image: String,
    pub labels: HashMap<String, String>,
}

/// Handle on a created or running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub pid: i32,
}

impl TaskHandle {
    pub fn pid(&self) -> i32 {
        self.pid
    }
}

/// Everything the runtime needs to create a container record: identity,
/// image reference, labels, the full OCI runtime spec, and credentials for
/// the image pull when the realm declares them.
#[derive(Debug, Clone)]
pub struct CreateContainerRequest {
    pub id: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub runtime_spec: Spec,
    pub registry_credentials: Option<RegistryCredentials>,
}

#[derive(Debug, Clone, Copy)]
pub struct StopOptions {
    // Skip the graceful signal and go straight to SIGKILL
    pub force: bool,
    pub timeout: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            force: false,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub snapshot_cleanup: bool,
}

/// Low-level containerd operations, each scoped to an explicit namespace.
///
/// Implementations own connection handling and image pulling:
/// `create_container` pulls the requested image within the namespace before
/// the record is created. All calls are synchronous; callers that need
/// cancellation must not get it here, because a half-applied runtime
/// mutation is worse than a late one.
pub trait Client: Send + Sync {
    fn create_namespace(&self, namespace: &str) -> Result<(), RuntimeError>;

    /// Removes the namespace. Fails with [`RuntimeError::NamespaceNotEmpty`]
    /// while containers, tasks, images or snapshots remain.
    fn delete_namespace(&self, namespace: &str) -> Result<(), RuntimeError>;

    /// Removes images and snapshots left in the namespace so that
    /// `delete_namespace` can succeed.
    fn cleanup_namespace_resources(&self, namespace: &str) -> Result<(), RuntimeError>;

    fn create_container(
        &self,
        namespace: &str,
        request: CreateContainerRequest,
    ) -> Result<(), RuntimeError>;

    fn get_container(&self, namespace: &str, id: &str) -> Result<ContainerRecord, RuntimeError>;

    fn list_containers(&self, namespace: &str) -> Result<Vec<ContainerRecord>, RuntimeError>;

    /// Removes the container record, optionally cleaning up its snapshot.
    /// Fails with [`RuntimeError::TaskStillActive`] while a task exists.
    fn delete_container(
        &self,
        namespace: &str,
        id: &str,
        snapshot_cleanup: bool,
    ) -> Result<(), RuntimeError>;

    fn create_task(&self, namespace: &str, id: &str) -> Result<TaskHandle, RuntimeError>;

    fn start_task(&self, namespace: &str, id: &str) -> Result<TaskHandle, RuntimeError>;

    fn get_task(&self, namespace: &str, id: &str) -> Result<TaskHandle, RuntimeError>;

    fn kill_task(&self, namespace: &str, id: &str, signal: Signal) -> Result<(), RuntimeError>;

    /// Waits for the task to exit, up to `timeout`. Returns whether it
    /// exited.
    fn wait_task(
        &self,
        namespace: &str,
        id: &str,
        timeout: Duration,
    ) -> Result<bool, RuntimeError>;

    fn delete_task(&self, namespace: &str, id: &str) -> Result<(), RuntimeError>;
}
