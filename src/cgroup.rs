//! Cgroup v2 placement for the entity hierarchy.
//!
//! Every entity owns one cgroup directory nested under the process's own
//! cgroup: `join(current, "kukeon", realm, space, stack, cell)`. The
//! absolute path is computed once at provisioning time and persisted in the
//! entity's status; deletion trusts the persisted path.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::KukeonError;

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Subtree name all kukeon-owned cgroups nest under.
const KUKEON_CGROUP: &str = "kukeon";

type Result<T> = std::result::Result<T, KukeonError>;

/// The mountpoint and current-process base every absolute cgroup path is
/// computed from.
#[derive(Debug, Clone)]
pub struct CgroupRoot {
    mountpoint: PathBuf,
    // Path of the current process's cgroup relative to the mountpoint
    base: PathBuf,
}

impl CgroupRoot {
    /// Detects the host cgroup v2 mountpoint and the calling process's
    /// cgroup from `/proc/self/cgroup`.
    pub fn detect() -> Result<Self> {
        let mountpoint = PathBuf::from(DEFAULT_CGROUP_ROOT);
        if !mountpoint.join("cgroup.controllers").exists() {
            return Err(KukeonError::CgroupSetup {
                reason: format!("no cgroup v2 hierarchy mounted at {DEFAULT_CGROUP_ROOT}"),
            });
        }

        let content =
            fs::read_to_string("/proc/self/cgroup").map_err(|err| KukeonError::Cgroup {
                path: PathBuf::from("/proc/self/cgroup"),
                source: err,
            })?;
        let base = current_cgroup_from(&content)?;

        Ok(Self::new(mountpoint, base))
    }

    /// Builds a root over an explicit mountpoint and base path. The base is
    /// interpreted relative to the mountpoint.
    pub fn new<P: Into<PathBuf>, B: Into<PathBuf>>(mountpoint: P, base: B) -> Self {
        let base: PathBuf = base.into();
        let base = base.strip_prefix("/").unwrap_or(&base).to_path_buf();
        Self {
            mountpoint: mountpoint.into(),
            base,
        }
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Absolute cgroup path of the current process.
    pub fn current_path(&self) -> PathBuf {
        self.mountpoint.join(&self.base)
    }

    /// Absolute cgroup path for an entity, identified by its ancestry
    /// segments in realm → space → stack → cell order.
    pub fn entity_path(&self, segments: &[&str]) -> PathBuf {
        let mut path = self.current_path().join(KUKEON_CGROUP);
        for segment in segments {
            path.push(segment);
        }
        path
    }

    /// Creates the cgroup directory, tolerating an existing one.
    pub fn create(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|err| KukeonError::Cgroup {
            path: path.to_path_buf(),
            source: err,
        })
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    /// Removes the cgroup and any nested child cgroups. Cgroupfs only
    /// supports `rmdir` on empty directories, so children are removed
    /// deepest-first. Absent directories are success.
    pub fn delete(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        remove_dir_tree(path)
    }
}

fn remove_dir_tree(path: &Path) -> Result<()> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(KukeonError::Cgroup {
                path: path.to_path_buf(),
                source: err,
            })
        }
    };

    for entry in entries {
        let entry = entry.map_err(|err| KukeonError::Cgroup {
            path: path.to_path_buf(),
            source: err,
        })?;
        if entry.path().is_dir() {
            remove_dir_tree(&entry.path())?;
        }
    }

    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(KukeonError::Cgroup {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

/// Extracts the unified-hierarchy entry from `/proc/self/cgroup` content.
fn current_cgroup_from(content: &str) -> Result<PathBuf> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .map(PathBuf::from)
        .ok_or_else(|| KukeonError::CgroupSetup {
            reason: "no unified cgroup entry in /proc/self/cgroup".to_string(),
        })
}
