//! CNI network management for spaces.
//!
//! A space owns one network configuration list; the manager invokes the
//! plugin chain with ADD/DEL against a netns path and owns the on-disk IPAM
//! and cache layout so purge can scrub state even when a live DEL is no
//! longer possible.

mod config;
mod invoker;
mod manager;

use std::path::PathBuf;

pub use config::NetworkConfigList;
pub use invoker::{InvokeParams, Operation, PluginInvoker};
pub use manager::{contains_exact_container_id, CniDirs, CniManager};

#[derive(Debug, thiserror::Error)]
pub enum CniError {
    #[error("no network configuration loaded")]
    NotLoaded,
    #[error("network configuration list {path:?} has no plugins")]
    EmptyPluginList { path: PathBuf },
    #[error("plugin search path is empty")]
    EmptyPluginPath,
    #[error("plugin configuration is missing the \"type\" field")]
    MissingPluginType,
    #[error("failed to read network config {path:?}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse network config {path:?}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write network config {path:?}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("plugin binary {plugin:?} not found in search path")]
    PluginNotFound { plugin: String },
    #[error("failed to execute plugin {plugin:?}")]
    Exec {
        plugin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("plugin {plugin:?} failed (code {code}): {msg}")]
    Plugin {
        plugin: String,
        code: u64,
        msg: String,
    },
    #[error("failed to parse output of plugin {plugin:?}")]
    ParseOutput {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cni state operation failed at {path:?}")]
    State {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CniError {
    /// ADD reporting that the attachment already exists is idempotent
    /// success, not a failure.
    pub fn is_already_exists(&self) -> bool {
        match self {
            CniError::Plugin { msg, .. } => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("already exists") || msg.contains("already allocated")
            }
            _ => false,
        }
    }
}
