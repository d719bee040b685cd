use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::Value;

use super::CniError;

/// Interface name configured inside the shared network namespace.
pub const DEFAULT_IFNAME: &str = "eth0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Del,
}

impl Operation {
    fn as_env(&self) -> &'static str {
        match self {
            Operation::Add => "ADD",
            Operation::Del => "DEL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvokeParams {
    pub container_id: String,
    // DEL may run without a netns when the container is already gone
    pub netns: Option<PathBuf>,
    pub ifname: String,
}

impl InvokeParams {
    pub fn new(container_id: &str, netns: Option<&Path>) -> Self {
        Self {
            container_id: container_id.to_string(),
            netns: netns.map(Path::to_path_buf),
            ifname: DEFAULT_IFNAME.to_string(),
        }
    }
}

/// Executes CNI plugin binaries per the CNI execution convention: operation
/// and attachment identity in `CNI_*` environment variables, plugin
/// configuration on stdin, result or error JSON on stdout.
#[derive(Debug, Clone)]
pub struct PluginInvoker {
    bin_dirs: Vec<PathBuf>,
}

impl PluginInvoker {
    pub fn new(bin_dirs: Vec<PathBuf>) -> Result<Self, CniError> {
        if bin_dirs.is_empty() {
            return Err(CniError::EmptyPluginPath);
        }
        Ok(Self { bin_dirs })
    }

    fn find_plugin(&self, plugin: &str) -> Result<PathBuf, CniError> {
        self.bin_dirs
            .iter()
            .map(|dir| dir.join(plugin))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| CniError::PluginNotFound {
                plugin: plugin.to_string(),
            })
    }

    fn search_path(&self) -> String {
        let parts: Vec<&str> = self
            .bin_dirs
            .iter()
            .filter_map(|dir| dir.to_str())
            .collect();
        parts.join(":")
    }

    /// Runs one plugin of the chain. `conf` must already carry the injected
    /// `name`, `cniVersion` and `prevResult` fields.
    pub fn invoke(
        &self,
        conf: &Value,
        op: Operation,
        params: &InvokeParams,
    ) -> Result<Value, CniError> {
        let plugin = conf
            .get("type")
            .and_then(Value::as_str)
            .ok_or(CniError::MissingPluginType)?
            .to_string();
        let binary = self.find_plugin(&plugin)?;

        let mut command = Command::new(&binary);
        command
            .env("CNI_COMMAND", op.as_env())
            .env("CNI_CONTAINERID", &params.container_id)
            .env("CNI_IFNAME", &params.ifname)
            .env("CNI_PATH", self.search_path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(netns) = &params.netns {
            command.env("CNI_NETNS", netns);
        }

        let mut child = command.spawn().map_err(|err| CniError::Exec {
            plugin: plugin.clone(),
            source: err,
        })?;
        let stdin_payload = conf.to_string();
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(stdin_payload.as_bytes())
                .map_err(|err| CniError::Exec {
                    plugin: plugin.clone(),
                    source: err,
                })?;
        }
        let output = child.wait_with_output().map_err(|err| CniError::Exec {
            plugin: plugin.clone(),
            source: err,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(parse_plugin_error(&plugin, &stdout, &output.stderr));
        }

        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout.trim()).map_err(|err| CniError::ParseOutput {
            plugin,
            source: err,
        })
    }
}

/// Failed plugins report `{"code": ..., "msg": ...}` on stdout; anything
/// else is folded into a generic error with whatever the plugin printed.
fn parse_plugin_error(plugin: &str, stdout: &str, stderr: &[u8]) -> CniError {
    if let Ok(err) = serde_json::from_str::<Value>(stdout.trim()) {
        let code = err.get("code").and_then(Value::as_u64).unwrap_or(0);
        if let Some(msg) = err.get("msg").and_then(Value::as_str) {
            return CniError::Plugin {
                plugin: plugin.to_string(),
                code,
                msg: msg.to_string(),
            };
        }
    }

    let stderr = String::from_utf8_lossy(stderr);
    let msg = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    CniError::Plugin {
        plugin: plugin.to_string(),
        code: 0,
        msg,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use anyhow::Result;
    use serde_json::json;

    use super::*;

    /// Installs a fake plugin script into `dir` and returns the invoker.
    fn fake_plugin(dir: &Path, name: &str, script: &str) -> PluginInvoker {
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        PluginInvoker::new(vec![dir.to_path_buf()]).unwrap()
    }

    #[test]
    fn test_invoke_passes_environment_and_parses_result() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let invoker = fake_plugin(
            tmp.path(),
            "bridge",
            "#!/bin/sh\nprintf '{\"cniVersion\":\"0.4.0\",\"op\":\"'$CNI_COMMAND'\",\"id\":\"'$CNI_CONTAINERID'\"}'\n",
        );

        let conf = json!({"type": "bridge", "name": "prod-web", "cniVersion": "0.4.0"});
        let params = InvokeParams::new("web.api.c1", Some(Path::new("/proc/42/ns/net")));
        let result = invoker.invoke(&conf, Operation::Add, &params)?;

        assert_eq!(result["op"], "ADD");
        assert_eq!(result["id"], "web.api.c1");
        Ok(())
    }

    #[test]
    fn test_invoke_surfaces_structured_plugin_error() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let invoker = fake_plugin(
            tmp.path(),
            "bridge",
            "#!/bin/sh\nprintf '{\"code\": 11, \"msg\": \"container already exists\"}'\nexit 1\n",
        );

        let conf = json!({"type": "bridge"});
        let params = InvokeParams::new("web.api.c1", None);
        let err = invoker
            .invoke(&conf, Operation::Add, &params)
            .unwrap_err();

        assert!(matches!(err, CniError::Plugin { code: 11, .. }));
        assert!(err.is_already_exists());
        Ok(())
    }

    #[test]
    fn test_missing_plugin_binary() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let invoker = PluginInvoker::new(vec![tmp.path().to_path_buf()])?;
        let conf = json!({"type": "macvlan"});
        let params = InvokeParams::new("id", None);

        assert!(matches!(
            invoker.invoke(&conf, Operation::Add, &params),
            Err(CniError::PluginNotFound { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_empty_search_path_rejected() {
        assert!(matches!(
            PluginInvoker::new(Vec::new()),
            Err(CniError::EmptyPluginPath)
        ));
    }
}
