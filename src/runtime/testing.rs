//! In-memory implementation of the runtime client trait.
//!
//! Backs the unit and scenario test suites: containers and tasks live in a
//! mutex-guarded map, and every mutation is journaled so tests can assert
//! ordering properties (root started before workloads, workloads stopped
//! before root).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use nix::sys::signal::Signal;
use oci_spec::runtime::Spec;

use super::client::{Client, ContainerRecord, CreateContainerRequest, TaskHandle};
use super::RuntimeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    NamespaceCreated { namespace: String },
    NamespaceDeleted { namespace: String },
    ContainerCreated { namespace: String, id: String },
    ContainerDeleted { namespace: String, id: String },
    TaskStarted { namespace: String, id: String, pid: i32 },
    TaskKilled { namespace: String, id: String, signal: Signal },
    TaskDeleted { namespace: String, id: String },
}

#[derive(Debug)]
struct StoredContainer {
    record: ContainerRecord,
    runtime_spec: Spec,
}

#[derive(Debug)]
struct TaskState {
    pid: i32,
    running: bool,
}

#[derive(Debug, Default)]
struct NamespaceState {
    containers: HashMap<String, StoredContainer>,
    tasks: HashMap<String, TaskState>,
    images: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    namespaces: HashMap<String, NamespaceState>,
    events: Vec<Event>,
}

/// In-memory runtime client.
#[derive(Debug)]
pub struct MemoryClient {
    state: Mutex<State>,
    next_pid: AtomicI32,
    failures: Mutex<HashSet<String>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_pid: AtomicI32::new(1000),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every future call of the named operation fail with a client
    /// error until cleared.
    pub fn inject_failure(&self, op: &str) {
        self.failures.lock().unwrap().insert(op.to_string());
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn check_failure(&self, op: &str) -> Result<(), RuntimeError> {
        if self.failures.lock().unwrap().contains(op) {
            return Err(RuntimeError::Client {
                msg: format!("injected failure for {op}"),
            });
        }
        Ok(())
    }

    // Test accessors

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains_key(namespace)
    }

    pub fn container_ids(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .namespaces
            .get(namespace)
            .map(|ns| ns.containers.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn running_task_pids(&self, namespace: &str) -> Vec<i32> {
        let state = self.state.lock().unwrap();
        state
            .namespaces
            .get(namespace)
            .map(|ns| {
                ns.tasks
                    .values()
                    .filter(|task| task.running)
                    .map(|task| task.pid)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn runtime_spec(&self, namespace: &str, id: &str) -> Option<Spec> {
        let state = self.state.lock().unwrap();
        state
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.containers.get(id))
            .map(|container| container.runtime_spec.clone())
    }

    pub fn images(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut images: Vec<String> = state
            .namespaces
            .get(namespace)
            .map(|ns| ns.images.iter().cloned().collect())
            .unwrap_or_default();
        images.sort();
        images
    }
}

impl Client for MemoryClient {
    fn create_namespace(&self, namespace: &str) -> Result<(), RuntimeError> {
        self.check_failure("create_namespace")?;
        if namespace.is_empty() {
            return Err(RuntimeError::EmptyNamespace);
        }
        let mut state = self.state.lock().unwrap();
        if !state.namespaces.contains_key(namespace) {
            state
                .namespaces
                .insert(namespace.to_string(), NamespaceState::default());
            state.events.push(Event::NamespaceCreated {
                namespace: namespace.to_string(),
            });
        }
        Ok(())
    }

    fn delete_namespace(&self, namespace: &str) -> Result<(), RuntimeError> {
        self.check_failure("delete_namespace")?;
        let mut state = self.state.lock().unwrap();
        let Some(ns) = state.namespaces.get(namespace) else {
            return Ok(());
        };
        if !ns.containers.is_empty() || !ns.tasks.is_empty() || !ns.images.is_empty() {
            return Err(RuntimeError::NamespaceNotEmpty {
                namespace: namespace.to_string(),
            });
        }
        state.namespaces.remove(namespace);
        state.events.push(Event::NamespaceDeleted {
            namespace: namespace.to_string(),
        });
        Ok(())
    }

    fn cleanup_namespace_resources(&self, namespace: &str) -> Result<(), RuntimeError> {
        self.check_failure("cleanup_namespace_resources")?;
        let mut state = self.state.lock().unwrap();
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.images.clear();
        }
        Ok(())
    }

    fn create_container(
        &self,
        namespace: &str,
        request: CreateContainerRequest,
    ) -> Result<(), RuntimeError> {
        self.check_failure("create_container")?;
        let mut state = self.state.lock().unwrap();
        let ns = state.namespaces.entry(namespace.to_string()).or_default();
        if ns.containers.contains_key(&request.id) {
            return Err(RuntimeError::ContainerAlreadyExists { id: request.id });
        }

        // The image is pulled into the namespace as part of creation
        ns.images.insert(request.image.clone());
        ns.containers.insert(
            request.id.clone(),
            StoredContainer {
                record: ContainerRecord {
                    id: request.id.clone(),
                    image: request.image,
                    labels: request.labels,
                },
                runtime_spec: request.runtime_spec,
            },
        );
        state.events.push(Event::ContainerCreated {
            namespace: namespace.to_string(),
            id: request.id,
        });
        Ok(())
    }

    fn get_container(&self, namespace: &str, id: &str) -> Result<ContainerRecord, RuntimeError> {
        let state = self.state.lock().unwrap();
        state
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.containers.get(id))
            .map(|container| container.record.clone())
            .ok_or_else(|| RuntimeError::ContainerNotFound { id: id.to_string() })
    }

    fn list_containers(&self, namespace: &str) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<ContainerRecord> = state
            .namespaces
            .get(namespace)
            .map(|ns| {
                ns.containers
                    .values()
                    .map(|container| container.record.clone())
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    fn delete_container(
        &self,
        namespace: &str,
        id: &str,
        _snapshot_cleanup: bool,
    ) -> Result<(), RuntimeError> {
        self.check_failure("delete_container")?;
        let mut state = self.state.lock().unwrap();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| RuntimeError::ContainerNotFound { id: id.to_string() })?;
        if !ns.containers.contains_key(id) {
            return Err(RuntimeError::ContainerNotFound { id: id.to_string() });
        }
        if ns.tasks.contains_key(id) {
            return Err(RuntimeError::TaskStillActive { id: id.to_string() });
        }
        ns.containers.remove(id);
        state.events.push(Event::ContainerDeleted {
            namespace: namespace.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    fn create_task(&self, namespace: &str, id: &str) -> Result<TaskHandle, RuntimeError> {
        self.check_failure("create_task")?;
        let mut state = self.state.lock().unwrap();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| RuntimeError::ContainerNotFound { id: id.to_string() })?;
        if !ns.containers.contains_key(id) {
            return Err(RuntimeError::ContainerNotFound { id: id.to_string() });
        }
        if ns.tasks.contains_key(id) {
            return Err(RuntimeError::TaskAlreadyExists { id: id.to_string() });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        ns.tasks.insert(id.to_string(), TaskState { pid, running: false });
        Ok(TaskHandle { pid })
    }

    fn start_task(&self, namespace: &str, id: &str) -> Result<TaskHandle, RuntimeError> {
        self.check_failure("start_task")?;
        let mut state = self.state.lock().unwrap();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| RuntimeError::TaskNotFound { id: id.to_string() })?;
        let task = ns
            .tasks
            .get_mut(id)
            .ok_or_else(|| RuntimeError::TaskNotFound { id: id.to_string() })?;
        task.running = true;
        let pid = task.pid;
        state.events.push(Event::TaskStarted {
            namespace: namespace.to_string(),
            id: id.to_string(),
            pid,
        });
        Ok(TaskHandle { pid })
    }

    fn get_task(&self, namespace: &str, id: &str) -> Result<TaskHandle, RuntimeError> {
        let state = self.state.lock().unwrap();
        state
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.tasks.get(id))
            .map(|task| TaskHandle { pid: task.pid })
            .ok_or_else(|| RuntimeError::TaskNotFound { id: id.to_string() })
    }

    fn kill_task(&self, namespace: &str, id: &str, signal: Signal) -> Result<(), RuntimeError> {
        self.check_failure("kill_task")?;
        let mut state = self.state.lock().unwrap();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| RuntimeError::TaskNotFound { id: id.to_string() })?;
        let task = ns
            .tasks
            .get_mut(id)
            .ok_or_else(|| RuntimeError::TaskNotFound { id: id.to_string() })?;
        // Simulated processes exit on the first fatal signal
        task.running = false;
        state.events.push(Event::TaskKilled {
            namespace: namespace.to_string(),
            id: id.to_string(),
            signal,
        });
        Ok(())
    }

    fn wait_task(
        &self,
        namespace: &str,
        id: &str,
        _timeout: Duration,
    ) -> Result<bool, RuntimeError> {
        let state = self.state.lock().unwrap();
        let running = state
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.tasks.get(id))
            .map(|task| task.running)
            .unwrap_or(false);
        Ok(!running)
    }

    fn delete_task(&self, namespace: &str, id: &str) -> Result<(), RuntimeError> {
        self.check_failure("delete_task")?;
        let mut state = self.state.lock().unwrap();
        let ns = state
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| RuntimeError::TaskNotFound { id: id.to_string() })?;
        if ns.tasks.remove(id).is_none() {
            return Err(RuntimeError::TaskNotFound { id: id.to_string() });
        }
        state.events.push(Event::TaskDeleted {
            namespace: namespace.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }
}
