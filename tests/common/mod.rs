//! Shared fixture for the scenario suites: an engine wired to the
//! in-memory runtime client, a scratch run path, a scratch cgroup
//! hierarchy, and a fake CNI plugin chain that emulates host-local IPAM by
//! writing allocation files.

// Not every suite uses every helper.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kukeon::cgroup::CgroupRoot;
use kukeon::cni::CniDirs;
use kukeon::model::{Cell, ContainerSpec, Realm, Space, Stack};
use kukeon::runtime::testing::MemoryClient;
use kukeon::{Config, Engine};

pub struct Harness {
    // Held for its Drop; the scratch tree lives as long as the harness
    #[allow(dead_code)]
    pub tmp: tempfile::TempDir,
    pub engine: Engine,
    pub client: Arc<MemoryClient>,
    pub networks_dir: PathBuf,
    pub cgroup_dir: PathBuf,
}

pub fn harness() -> Harness {
    let tmp = tempfile::tempdir().expect("failed to create scratch dir");
    let root = tmp.path();

    let bin_dir = root.join("cni/bin");
    let networks_dir = root.join("cni/networks");
    install_fake_plugins(&bin_dir, &networks_dir);

    let cgroup_dir = root.join("cgroup");
    fs::create_dir_all(&cgroup_dir).unwrap();

    let config = Config {
        run_path: root.join("run"),
        cni: CniDirs {
            bin_dir,
            conf_dir: root.join("cni/net.d"),
            cache_dir: root.join("cni/cache"),
            networks_dir: networks_dir.clone(),
        },
        stop_timeout: Duration::from_millis(100),
    };

    let client = Arc::new(MemoryClient::new());
    let engine = Engine::with_cgroup_root(
        config,
        client.clone(),
        CgroupRoot::new(&cgroup_dir, "/"),
    );

    Harness {
        tmp,
        engine,
        client,
        networks_dir,
        cgroup_dir,
    }
}

/// The bridge fake maintains allocation files the way host-local does:
/// ADD writes `{networks_dir}/{network}/{containerID}`, DEL removes it.
fn install_fake_plugins(bin_dir: &std::path::Path, networks_dir: &std::path::Path) {
    fs::create_dir_all(bin_dir).unwrap();

    let bridge = format!(
        r#"#!/bin/sh
conf=$(cat)
name=$(printf '%s' "$conf" | sed -n 's/.*"name":"\([^"]*\)".*/\1/p')
case "$CNI_COMMAND" in
ADD)
    mkdir -p '{networks}'/"$name"
    printf '%s' "$CNI_CONTAINERID" > '{networks}'/"$name"/"$CNI_CONTAINERID"
    printf '{{"cniVersion":"0.4.0","ips":[{{"address":"10.88.0.5/16"}}]}}'
    ;;
DEL)
    rm -f '{networks}'/"$name"/"$CNI_CONTAINERID"
    ;;
esac
"#,
        networks = networks_dir.display()
    );
    write_plugin(bin_dir, "bridge", &bridge);

    let portmap = r#"#!/bin/sh
cat > /dev/null
if [ "$CNI_COMMAND" = "ADD" ]; then
    printf '{"cniVersion":"0.4.0"}'
fi
"#;
    write_plugin(bin_dir, "portmap", portmap);
}

fn write_plugin(bin_dir: &std::path::Path, name: &str, script: &str) {
    let path = bin_dir.join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Provisions the standard realm/space/stack hierarchy used by most
/// scenarios: realm `prod` (namespace `prod-ns`), space `web`, stack `api`.
pub fn provision_tree(harness: &Harness) {
    harness
        .engine
        .create_realm(&Realm::new("prod", "prod-ns"))
        .expect("failed to create realm");
    harness
        .engine
        .create_space(&Space::new("web", "prod"))
        .expect("failed to create space");
    harness
        .engine
        .create_stack(&Stack::new("api", "prod", "web"))
        .expect("failed to create stack");
}

/// Cell `c1` with the default root container and two workloads.
pub fn sample_cell() -> Cell {
    Cell {
        name: "c1".to_string(),
        id: "c1".to_string(),
        realm_name: "prod".to_string(),
        space_name: "web".to_string(),
        stack_name: "api".to_string(),
        containers: vec![
            ContainerSpec {
                id: "nginx".to_string(),
                image: "docker.io/library/nginx:1.25".to_string(),
                command: vec!["nginx".to_string()],
                ..Default::default()
            },
            ContainerSpec {
                id: "sidecar".to_string(),
                image: "docker.io/library/busybox:stable".to_string(),
                command: vec!["sh".to_string(), "-c".to_string(), "sleep 1d".to_string()],
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

pub const ROOT_ID: &str = "web.api.c1";
pub const NGINX_ID: &str = "web.api.c1.nginx";
pub const SIDECAR_ID: &str = "web.api.c1.sidecar";
pub const NAMESPACE: &str = "prod-ns";
pub const NETWORK: &str = "prod-web";
