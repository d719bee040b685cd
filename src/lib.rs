//! # Kukeon
//!
//! Single-host orchestrator for *cells*: groups of containers that share
//! the Linux net/ipc/uts namespaces of one root container, arranged in a
//! realm → space → stack → cell hierarchy on top of an OCI runtime and a
//! CNI plugin suite.
//!
//! The [`engine::Engine`] is the entry point: it composes naming, the
//! filesystem metadata store, the CNI manager and the runtime gateway into
//! the create/start/stop/kill/delete/purge lifecycle, keeping on-disk
//! metadata, cgroup hierarchy, containerd namespace and CNI state mutually
//! consistent across crashes and repeated operator requests.

pub mod cgroup;
pub mod cni;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod model;
pub mod naming;
pub mod runtime;

pub use engine::{Config, Engine};
pub use error::KukeonError;
