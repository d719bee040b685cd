use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::Value;

use super::config::NetworkConfigList;
use super::invoker::{InvokeParams, Operation, PluginInvoker};
use super::CniError;

pub const DEFAULT_CNI_BIN_DIR: &str = "/opt/cni/bin";
pub const DEFAULT_CNI_CONF_DIR: &str = "/opt/cni/net.d";
pub const DEFAULT_CNI_CACHE_DIR: &str = "/opt/cni/cache";
pub const DEFAULT_CNI_NETWORKS_DIR: &str = "/var/lib/cni/networks";

/// Result-cache locations older plugin versions used; purge sweeps these in
/// addition to the configured cache directory.
const LEGACY_CACHE_DIRS: &[&str] = &["/var/lib/cni", "/opt/cni/cache"];

type Result<T> = std::result::Result<T, CniError>;

/// Directory layout the manager operates on. Empty fields fall back to the
/// operational defaults once the manager is constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CniDirs {
    pub bin_dir: PathBuf,
    pub conf_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub networks_dir: PathBuf,
}

impl CniDirs {
    fn or_defaults(mut self) -> Self {
        if self.bin_dir.as_os_str().is_empty() {
            self.bin_dir = PathBuf::from(DEFAULT_CNI_BIN_DIR);
        }
        if self.conf_dir.as_os_str().is_empty() {
            self.conf_dir = PathBuf::from(DEFAULT_CNI_CONF_DIR);
        }
        if self.cache_dir.as_os_str().is_empty() {
            self.cache_dir = PathBuf::from(DEFAULT_CNI_CACHE_DIR);
        }
        if self.networks_dir.as_os_str().is_empty() {
            self.networks_dir = PathBuf::from(DEFAULT_CNI_NETWORKS_DIR);
        }
        self
    }
}

/// Loads a space's network configuration list and drives the plugin chain.
///
/// Besides ADD/DEL the manager owns the on-disk layout of IPAM allocations
/// (`{networks_dir}/{network}/{containerdID}`) and result caches
/// (`{cache_dir}/results/{containerdID}[-{network}]`), which purge removes
/// by path even when the plugins can no longer be invoked.
#[derive(Debug)]
pub struct CniManager {
    dirs: CniDirs,
    invoker: PluginInvoker,
    config: Option<NetworkConfigList>,
}

impl CniManager {
    /// Builds a manager over the given layout. Defaults are applied after
    /// the directory set is assembled so the plugin search path is never
    /// empty by the time ADD runs.
    pub fn new(dirs: CniDirs) -> Result<Self> {
        let dirs = dirs.or_defaults();
        let invoker = PluginInvoker::new(vec![dirs.bin_dir.clone()])?;
        Ok(Self {
            dirs,
            invoker,
            config: None,
        })
    }

    /// Loads a conflist, replacing any previously loaded configuration.
    pub fn load_network_config_list(&mut self, path: &Path) -> Result<()> {
        let config = NetworkConfigList::load(path)?;
        tracing::debug!(network = %config.name, path = ?path, "loaded network configuration list");
        self.config = Some(config);
        Ok(())
    }

    pub fn network_name(&self) -> Option<&str> {
        self.config.as_ref().map(|config| config.name.as_str())
    }

    fn config(&self) -> Result<&NetworkConfigList> {
        self.config.as_ref().ok_or(CniError::NotLoaded)
    }

    /// Runs the plugin chain with ADD. A plugin reporting that the
    /// attachment already exists is success; the container is simply
    /// re-attached to state that survived a previous run.
    pub fn add_container_to_network(&self, container_id: &str, netns: &Path) -> Result<()> {
        let config = self.config()?;
        let params = InvokeParams::new(container_id, Some(netns));

        let mut prev_result = Value::Null;
        for plugin_conf in &config.plugins {
            let conf = chained_conf(plugin_conf, config, &prev_result);
            match self.invoker.invoke(&conf, Operation::Add, &params) {
                Ok(result) => prev_result = result,
                Err(err) if err.is_already_exists() => {
                    tracing::debug!(
                        container_id,
                        network = %config.name,
                        "network attachment already exists"
                    );
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }

        if let Err(err) = self.write_cache_entry(container_id, &config.name, &prev_result) {
            tracing::warn!(container_id, err = %err, "failed to cache cni result");
        }
        Ok(())
    }

    /// Runs the plugin chain with DEL, in reverse order. A missing netns is
    /// tolerated; plugin failures are collected so the remaining plugins
    /// still get their chance to clean up.
    pub fn del_container_from_network(
        &self,
        container_id: &str,
        netns: Option<&Path>,
    ) -> Result<()> {
        let config = self.config()?;
        let params = InvokeParams::new(container_id, netns);
        let prev_result = self
            .read_cache_entry(container_id, &config.name)
            .unwrap_or(Value::Null);

        let mut first_error = None;
        for plugin_conf in config.plugins.iter().rev() {
            let conf = chained_conf(plugin_conf, config, &prev_result);
            if let Err(err) = self.invoker.invoke(&conf, Operation::Del, &params) {
                tracing::warn!(container_id, err = %err, "cni del failed for plugin");
                first_error.get_or_insert(err);
            }
        }

        self.remove_cache_entries(container_id);
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Removes a space's network configuration file and all related on-disk
    /// state. Idempotent.
    pub fn delete_network(&self, network_name: &str, conf_path: &Path) -> Result<()> {
        match fs::remove_file(conf_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(CniError::State {
                    path: conf_path.to_path_buf(),
                    source: err,
                })
            }
        }
        self.purge_network_state(network_name);
        Ok(())
    }

    // On-disk layout

    pub fn network_dir(&self, network_name: &str) -> PathBuf {
        self.dirs.networks_dir.join(network_name)
    }

    pub fn ipam_allocation_path(&self, network_name: &str, container_id: &str) -> PathBuf {
        self.network_dir(network_name).join(container_id)
    }

    /// All result-cache directories purge must sweep: the configured one
    /// plus the legacy locations.
    pub fn cache_result_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.dirs.cache_dir.join("results")];
        for legacy in LEGACY_CACHE_DIRS {
            let dir = Path::new(legacy).join("results");
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }

    fn cache_entry_path(&self, container_id: &str, network_name: &str) -> PathBuf {
        self.dirs
            .cache_dir
            .join("results")
            .join(format!("{container_id}-{network_name}"))
    }

    fn write_cache_entry(
        &self,
        container_id: &str,
        network_name: &str,
        result: &Value,
    ) -> Result<()> {
        let path = self.cache_entry_path(container_id, network_name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|err| CniError::State {
                path: path.clone(),
                source: err,
            })?;
        }
        fs::write(&path, result.to_string()).map_err(|err| CniError::State {
            path,
            source: err,
        })
    }

    fn read_cache_entry(&self, container_id: &str, network_name: &str) -> Option<Value> {
        let content = fs::read_to_string(self.cache_entry_path(container_id, network_name)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Scrubs every IPAM allocation and cache entry owned by a container.
    /// Each removal is attempted independently so a failure never shields
    /// later state from cleanup.
    pub fn purge_container_state(&self, network_name: &str, container_id: &str) {
        // Direct allocation file keyed by container id
        remove_file_quiet(&self.ipam_allocation_path(network_name, container_id));

        // host-local names allocation files by IP address with the owner id
        // in the file body; scan for exact-token matches
        let network_dir = self.network_dir(network_name);
        if let Ok(entries) = fs::read_dir(&network_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                match fs::read_to_string(&path) {
                    Ok(content) if contains_exact_container_id(&content, container_id) => {
                        tracing::debug!(path = ?path, container_id, "removing ipam allocation");
                        remove_file_quiet(&path);
                    }
                    _ => {}
                }
            }
        }

        self.remove_cache_entries(container_id);
    }

    /// Removes cache entries named `{id}` or `{id}-*` from every known
    /// cache directory.
    fn remove_cache_entries(&self, container_id: &str) {
        let prefixed = format!("{container_id}-");
        for dir in self.cache_result_dirs() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name == container_id || name.starts_with(&prefixed) {
                    remove_file_quiet(&entry.path());
                }
            }
        }
    }

    /// Wipes a network's IPAM directory and every cache entry mentioning
    /// the network name.
    pub fn purge_network_state(&self, network_name: &str) {
        let dir = self.network_dir(network_name);
        if let Err(err) = fs::remove_dir_all(&dir) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(path = ?dir, err = %err, "failed to remove network state dir");
            }
        }

        for cache_dir in self.cache_result_dirs() {
            let Ok(entries) = fs::read_dir(&cache_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name.contains(network_name) {
                    remove_file_quiet(&entry.path());
                }
            }
        }
    }
}

/// Injects the chain-level fields into one plugin's configuration.
fn chained_conf(plugin_conf: &Value, config: &NetworkConfigList, prev_result: &Value) -> Value {
    let mut conf = plugin_conf.clone();
    if let Value::Object(map) = &mut conf {
        map.insert("name".to_string(), Value::String(config.name.clone()));
        map.insert(
            "cniVersion".to_string(),
            Value::String(config.cni_version.clone()),
        );
        if !prev_result.is_null() {
            map.insert("prevResult".to_string(), prev_result.clone());
        }
    }
    conf
}

fn remove_file_quiet(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(path = ?path, err = %err, "failed to remove cni state file");
        }
    }
}

/// Whether `content` mentions `container_id` as a complete token.
///
/// Raw substring matching is forbidden here: container IDs share prefixes,
/// so `web.api.c1` must not match a file owned by `web.api.c10`. The whole
/// trimmed content is compared first, then the ID is matched with non-word
/// boundaries on both sides.
pub fn contains_exact_container_id(content: &str, container_id: &str) -> bool {
    if container_id.is_empty() {
        return false;
    }
    if content.trim() == container_id {
        return true;
    }

    let escaped = regex::escape(container_id);
    let Ok(regex) = Regex::new(&format!(r"(^|[^\w]){escaped}([^\w]|$)")) else {
        return false;
    };
    regex.is_match(content)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use anyhow::Result;

    use super::*;

    fn manager_in(tmp: &Path) -> CniManager {
        CniManager::new(CniDirs {
            bin_dir: tmp.join("bin"),
            conf_dir: tmp.join("net.d"),
            cache_dir: tmp.join("cache"),
            networks_dir: tmp.join("networks"),
        })
        .unwrap()
    }

    fn install_plugin(tmp: &Path, name: &str, script: &str) {
        let bin_dir = tmp.join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        let path = bin_dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn write_conflist(tmp: &Path, name: &str) -> PathBuf {
        let path = tmp.join(format!("{name}.conflist"));
        NetworkConfigList {
            cni_version: "0.4.0".to_string(),
            name: name.to_string(),
            plugins: vec![serde_json::json!({"type": "bridge"})],
        }
        .save(&path)
        .unwrap();
        path
    }

    #[test]
    fn test_defaults_applied_for_empty_dirs() {
        let manager = CniManager::new(CniDirs::default()).unwrap();
        assert_eq!(
            manager.dirs.bin_dir,
            PathBuf::from(DEFAULT_CNI_BIN_DIR)
        );
        assert_eq!(
            manager.dirs.networks_dir,
            PathBuf::from(DEFAULT_CNI_NETWORKS_DIR)
        );
        assert_eq!(
            manager.cache_result_dirs(),
            vec![
                PathBuf::from("/opt/cni/cache/results"),
                PathBuf::from("/var/lib/cni/results"),
            ]
        );
    }

    #[test]
    fn test_add_invokes_chain_and_caches_result() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        install_plugin(
            tmp.path(),
            "bridge",
            "#!/bin/sh\nprintf '{\"cniVersion\":\"0.4.0\",\"ips\":[{\"address\":\"10.88.0.5/16\"}]}'\n",
        );
        let conf_path = write_conflist(tmp.path(), "prod-web");

        let mut manager = manager_in(tmp.path());
        manager.load_network_config_list(&conf_path)?;
        manager.add_container_to_network("web.api.c1", Path::new("/proc/42/ns/net"))?;

        let cache = tmp.path().join("cache/results/web.api.c1-prod-web");
        assert!(cache.exists());
        Ok(())
    }

    #[test]
    fn test_add_treats_already_exists_as_success() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        install_plugin(
            tmp.path(),
            "bridge",
            "#!/bin/sh\nprintf '{\"code\": 11, \"msg\": \"container already exists\"}'\nexit 1\n",
        );
        let conf_path = write_conflist(tmp.path(), "prod-web");

        let mut manager = manager_in(tmp.path());
        manager.load_network_config_list(&conf_path)?;
        manager.add_container_to_network("web.api.c1", Path::new("/proc/42/ns/net"))?;
        Ok(())
    }

    #[test]
    fn test_del_tolerates_missing_netns_and_drops_cache() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        install_plugin(tmp.path(), "bridge", "#!/bin/sh\nexit 0\n");
        let conf_path = write_conflist(tmp.path(), "prod-web");

        let mut manager = manager_in(tmp.path());
        manager.load_network_config_list(&conf_path)?;

        let cache = tmp.path().join("cache/results/web.api.c1-prod-web");
        fs::create_dir_all(cache.parent().unwrap())?;
        fs::write(&cache, "{}")?;

        manager.del_container_from_network("web.api.c1", None)?;
        assert!(!cache.exists());
        Ok(())
    }

    #[test]
    fn test_purge_container_state_scrubs_by_name_and_content() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let manager = manager_in(tmp.path());

        let network_dir = manager.network_dir("prod-web");
        fs::create_dir_all(&network_dir)?;
        // Allocation keyed by container id
        fs::write(network_dir.join("web.api.c1"), "")?;
        // Allocation keyed by IP, owner in the body
        fs::write(network_dir.join("10.88.0.5"), "web.api.c1\neth0\n")?;
        // Allocation owned by a different container with a shared prefix
        fs::write(network_dir.join("10.88.0.6"), "web.api.c10\neth0\n")?;

        let cache_dir = tmp.path().join("cache/results");
        fs::create_dir_all(&cache_dir)?;
        fs::write(cache_dir.join("web.api.c1"), "{}")?;
        fs::write(cache_dir.join("web.api.c1-prod-web"), "{}")?;
        fs::write(cache_dir.join("web.api.c10-prod-web"), "{}")?;

        manager.purge_container_state("prod-web", "web.api.c1");

        assert!(!network_dir.join("web.api.c1").exists());
        assert!(!network_dir.join("10.88.0.5").exists());
        assert!(network_dir.join("10.88.0.6").exists());
        assert!(!cache_dir.join("web.api.c1").exists());
        assert!(!cache_dir.join("web.api.c1-prod-web").exists());
        assert!(cache_dir.join("web.api.c10-prod-web").exists());
        Ok(())
    }

    #[test]
    fn test_delete_network_removes_conf_state_and_cache() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let manager = manager_in(tmp.path());
        let conf_path = write_conflist(tmp.path(), "prod-web");

        let network_dir = manager.network_dir("prod-web");
        fs::create_dir_all(&network_dir)?;
        fs::write(network_dir.join("last_reserved_ip.0"), "10.88.0.5")?;

        let cache_dir = tmp.path().join("cache/results");
        fs::create_dir_all(&cache_dir)?;
        fs::write(cache_dir.join("web.api.c1-prod-web"), "{}")?;

        manager.delete_network("prod-web", &conf_path)?;
        assert!(!conf_path.exists());
        assert!(!network_dir.exists());
        assert!(!cache_dir.join("web.api.c1-prod-web").exists());

        // Idempotent
        manager.delete_network("prod-web", &conf_path)?;
        Ok(())
    }

    #[test]
    fn test_contains_exact_container_id() {
        assert!(contains_exact_container_id("abc\n", "abc"));
        assert!(!contains_exact_container_id("abcd", "abc"));
        assert!(contains_exact_container_id("[abc]", "abc"));
        assert!(contains_exact_container_id("abc-123", "abc"));
        assert!(!contains_exact_container_id("abc_123", "abc"));
        assert!(!contains_exact_container_id("xabc", "abc"));
        assert!(contains_exact_container_id("eth0 abc eth1", "abc"));
        assert!(!contains_exact_container_id("anything", ""));
        // Regex metacharacters in ids must be escaped
        assert!(contains_exact_container_id("web.api.c1\n", "web.api.c1"));
        assert!(!contains_exact_container_id("webXapiXc1", "web.api.c1"));
    }
}
