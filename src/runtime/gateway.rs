use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use nix::sys::signal::Signal;
use oci_spec::runtime::{
    LinuxBuilder, LinuxNamespace, LinuxNamespaceBuilder, LinuxNamespaceType, ProcessBuilder, Spec,
    SpecBuilder,
};

use super::client::{
    Client, ContainerRecord, CreateContainerRequest, DeleteOptions, StopOptions, TaskHandle,
};
use super::RuntimeError;
use crate::model::{labels, ContainerSpec, RegistryCredentials};

const DEFAULT_PATH_ENV: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

type Result<T> = std::result::Result<T, RuntimeError>;

/// Namespace file paths of a running root container, joined by every
/// workload container in the cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePaths {
    pub net: PathBuf,
    pub ipc: PathBuf,
    pub uts: PathBuf,
}

impl NamespacePaths {
    pub fn from_pid(pid: i32) -> Self {
        Self {
            net: PathBuf::from(format!("/proc/{pid}/ns/net")),
            ipc: PathBuf::from(format!("/proc/{pid}/ns/ipc")),
            uts: PathBuf::from(format!("/proc/{pid}/ns/uts")),
        }
    }
}

/// Stateful wrapper over the runtime client, bound to one containerd
/// namespace at a time. One gateway is constructed per engine invocation so
/// a namespace binding never leaks between operations.
pub struct Gateway {
    client: Arc<dyn Client>,
    namespace: Option<String>,
    credentials: Option<RegistryCredentials>,
}

impl Gateway {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self {
            client,
            namespace: None,
            credentials: None,
        }
    }

    pub fn set_namespace(&mut self, namespace: &str) -> Result<()> {
        if namespace.is_empty() {
            return Err(RuntimeError::EmptyNamespace);
        }
        self.namespace = Some(namespace.to_string());
        self.credentials = None;
        Ok(())
    }

    pub fn set_namespace_with_credentials(
        &mut self,
        namespace: &str,
        credentials: RegistryCredentials,
    ) -> Result<()> {
        self.set_namespace(namespace)?;
        self.credentials = Some(credentials);
        Ok(())
    }

    fn namespace(&self) -> Result<&str> {
        self.namespace
            .as_deref()
            .ok_or(RuntimeError::NamespaceNotSet)
    }

    // Namespace lifecycle, used by realm provisioning and purge.

    pub fn create_namespace(&self, namespace: &str) -> Result<()> {
        if namespace.is_empty() {
            return Err(RuntimeError::EmptyNamespace);
        }
        self.client.create_namespace(namespace)
    }

    pub fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.client.delete_namespace(namespace)
    }

    pub fn cleanup_namespace_resources(&self, namespace: &str) -> Result<()> {
        self.client.cleanup_namespace_resources(namespace)
    }

    // Containers

    /// Creates a container record from a declared spec. `extra_labels` are
    /// merged on top of the identity labels derived from the spec's tuple.
    pub fn create_container(
        &self,
        containerd_id: &str,
        spec: &ContainerSpec,
        extra_labels: &HashMap<String, String>,
        ns_paths: Option<&NamespacePaths>,
    ) -> Result<()> {
        let namespace = self.namespace()?;
        let request = CreateContainerRequest {
            id: containerd_id.to_string(),
            image: spec.image.clone(),
            labels: build_labels(spec, extra_labels),
            runtime_spec: build_runtime_spec(containerd_id, spec, ns_paths)?,
            registry_credentials: self.credentials.clone(),
        };
        tracing::debug!(
            namespace,
            container_id = containerd_id,
            image = %spec.image,
            "creating container"
        );
        self.client.create_container(namespace, request)
    }

    pub fn get_container(&self, id: &str) -> Result<ContainerRecord> {
        self.client.get_container(self.namespace()?, id)
    }

    pub fn exists_container(&self, id: &str) -> Result<bool> {
        match self.get_container(id) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        self.client.list_containers(self.namespace()?)
    }

    /// Creates and starts the container's task. The returned handle always
    /// carries a non-zero PID.
    pub fn start_container(&self, id: &str) -> Result<TaskHandle> {
        let namespace = self.namespace()?;
        self.client.create_task(namespace, id)?;
        let task = self.client.start_task(namespace, id)?;
        if task.pid() == 0 {
            return Err(RuntimeError::TaskWithoutPid { id: id.to_string() });
        }
        tracing::debug!(namespace, container_id = id, pid = task.pid(), "task started");
        Ok(task)
    }

    /// PID of the container's task, or `None` when no task exists.
    pub fn task_pid(&self, id: &str) -> Result<Option<i32>> {
        match self.client.get_task(self.namespace()?, id) {
            Ok(task) => Ok(Some(task.pid())),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Stops the container's task: graceful signal, grace period, SIGKILL,
    /// then task deletion. Success when the task or the container is
    /// already gone.
    pub fn stop_container(&self, id: &str, opts: &StopOptions) -> Result<()> {
        let namespace = self.namespace()?;
        match self.client.get_task(namespace, id) {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                tracing::debug!(namespace, container_id = id, "no task to stop");
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        if !opts.force {
            self.kill_task(id, Signal::SIGTERM)?;
            if self.client.wait_task(namespace, id, opts.timeout)? {
                return self.delete_task_idempotent(id);
            }
            tracing::debug!(
                namespace,
                container_id = id,
                "task did not exit within grace period, killing"
            );
        }

        self.kill_task(id, Signal::SIGKILL)?;
        self.client.wait_task(namespace, id, opts.timeout)?;
        self.delete_task_idempotent(id)
    }

    /// Direct signal delivery. Absent task or container is success.
    pub fn kill_task(&self, id: &str, signal: Signal) -> Result<()> {
        match self.client.kill_task(self.namespace()?, id, signal) {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                tracing::debug!(container_id = id, signal = %signal, "no task to signal");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn delete_task_idempotent(&self, id: &str) -> Result<()> {
        match self.client.delete_task(self.namespace()?, id) {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Removes the container record. Success when already absent.
    pub fn delete_container(&self, id: &str, opts: &DeleteOptions) -> Result<()> {
        match self
            .client
            .delete_container(self.namespace()?, id, opts.snapshot_cleanup)
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                tracing::debug!(container_id = id, "no container to delete");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn build_labels(
    spec: &ContainerSpec,
    extra_labels: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut result = HashMap::new();
    result.insert(labels::REALM.to_string(), spec.realm_name.clone());
    result.insert(labels::SPACE.to_string(), spec.space_name.clone());
    result.insert(labels::STACK.to_string(), spec.stack_name.clone());
    result.insert(labels::CELL.to_string(), spec.cell_id.clone());
    result.insert(labels::CELL_NAME.to_string(), spec.cell_name.clone());
    if spec.root {
        result.insert(
            labels::CONTAINER_TYPE.to_string(),
            labels::CONTAINER_TYPE_ROOT.to_string(),
        );
    }
    for (key, value) in extra_labels {
        result.insert(key.clone(), value.clone());
    }
    result
}

/// Builds the OCI runtime spec for a container.
///
/// The root container gets private net/ipc/uts namespaces and its
/// containerd ID as hostname; workloads join the root's namespaces by path
/// and must not set a hostname, since the UTS namespace is shared.
fn build_runtime_spec(
    containerd_id: &str,
    spec: &ContainerSpec,
    ns_paths: Option<&NamespacePaths>,
) -> Result<Spec> {
    let wrap = |source: oci_spec::OciSpecError| RuntimeError::Spec {
        id: containerd_id.to_string(),
        source,
    };

    let args = if spec.command.is_empty() {
        vec!["sleep".to_string(), "infinity".to_string()]
    } else {
        spec.command.clone()
    };
    let process = ProcessBuilder::default()
        .args(args)
        .env(vec![DEFAULT_PATH_ENV.to_string()])
        .cwd("/")
        .build()
        .map_err(wrap)?;

    let mut namespaces: Vec<LinuxNamespace> = vec![
        LinuxNamespaceBuilder::default()
            .typ(LinuxNamespaceType::Pid)
            .build()
            .map_err(wrap)?,
        LinuxNamespaceBuilder::default()
            .typ(LinuxNamespaceType::Mount)
            .build()
            .map_err(wrap)?,
    ];
    match ns_paths {
        None => {
            for typ in [
                LinuxNamespaceType::Network,
                LinuxNamespaceType::Ipc,
                LinuxNamespaceType::Uts,
            ] {
                namespaces.push(LinuxNamespaceBuilder::default().typ(typ).build().map_err(wrap)?);
            }
        }
        Some(paths) => {
            for (typ, path) in [
                (LinuxNamespaceType::Network, &paths.net),
                (LinuxNamespaceType::Ipc, &paths.ipc),
                (LinuxNamespaceType::Uts, &paths.uts),
            ] {
                namespaces.push(
                    LinuxNamespaceBuilder::default()
                        .typ(typ)
                        .path(path.clone())
                        .build()
                        .map_err(wrap)?,
                );
            }
        }
    }
    let linux = LinuxBuilder::default()
        .namespaces(namespaces)
        .build()
        .map_err(wrap)?;

    let mut builder = SpecBuilder::default().process(process).linux(linux);
    if ns_paths.is_none() {
        builder = builder.hostname(containerd_id);
    }
    builder.build().map_err(wrap)
}
