use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::CniError;

/// CNI spec version written into generated conflists.
pub const CNI_VERSION: &str = "0.4.0";

/// Subnet handed to host-local IPAM when a space does not bring its own
/// conflist.
const DEFAULT_SUBNET: &str = "10.88.0.0/16";

/// A `.conflist` document: an ordered chain of plugin configurations under
/// one network name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfigList {
    pub cni_version: String,
    pub name: String,
    #[serde(default)]
    pub plugins: Vec<Value>,
}

impl NetworkConfigList {
    pub fn load(path: &Path) -> Result<Self, CniError> {
        let content = fs::read_to_string(path).map_err(|err| CniError::ReadConfig {
            path: path.to_path_buf(),
            source: err,
        })?;
        let list: Self =
            serde_json::from_str(&content).map_err(|err| CniError::ParseConfig {
                path: path.to_path_buf(),
                source: err,
            })?;
        if list.plugins.is_empty() {
            return Err(CniError::EmptyPluginList {
                path: path.to_path_buf(),
            });
        }
        Ok(list)
    }

    pub fn save(&self, path: &Path) -> Result<(), CniError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|err| CniError::WriteConfig {
                path: path.to_path_buf(),
                source: err,
            })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|err| CniError::ParseConfig {
            path: path.to_path_buf(),
            source: err,
        })?;
        fs::write(path, content).map_err(|err| CniError::WriteConfig {
            path: path.to_path_buf(),
            source: err,
        })
    }

    /// Default bridge + host-local-IPAM chain for a space network.
    pub fn bridge_default(network_name: &str) -> Self {
        Self {
            cni_version: CNI_VERSION.to_string(),
            name: network_name.to_string(),
            plugins: vec![
                json!({
                    "type": "bridge",
                    "bridge": bridge_interface_name(network_name),
                    "isGateway": true,
                    "ipMasq": true,
                    "ipam": {
                        "type": "host-local",
                        "subnet": DEFAULT_SUBNET,
                        "routes": [{ "dst": "0.0.0.0/0" }],
                    },
                }),
                json!({
                    "type": "portmap",
                    "capabilities": { "portMappings": true },
                }),
            ],
        }
    }
}

/// Linux interface names are capped at 15 bytes, so the bridge is named by
/// a stable hash of the network name rather than the name itself.
fn bridge_interface_name(network_name: &str) -> String {
    let mut hasher = DefaultHasher::new();
    network_name.hash(&mut hasher);
    format!("ku{:012x}", hasher.finish() & 0xffff_ffff_ffff)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn test_bridge_default_round_trip() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("cni").join("web.conflist");

        let list = NetworkConfigList::bridge_default("prod-web");
        list.save(&path)?;
        let loaded = NetworkConfigList::load(&path)?;

        assert_eq!(loaded, list);
        assert_eq!(loaded.name, "prod-web");
        assert_eq!(loaded.plugins.len(), 2);
        assert_eq!(loaded.plugins[0]["type"], "bridge");
        Ok(())
    }

    #[test]
    fn test_load_rejects_empty_plugin_list() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("empty.conflist");
        fs::write(
            &path,
            r#"{"cniVersion": "0.4.0", "name": "empty", "plugins": []}"#,
        )?;

        assert!(matches!(
            NetworkConfigList::load(&path),
            Err(CniError::EmptyPluginList { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_bridge_name_is_stable_and_short() {
        let a = bridge_interface_name("prod-web");
        let b = bridge_interface_name("prod-web");
        assert_eq!(a, b);
        assert!(a.len() <= 15);
        assert_ne!(a, bridge_interface_name("prod-batch"));
    }
}
