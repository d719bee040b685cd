//! Provisioning state-machine scenarios: create idempotence, failure
//! persistence, and the no-recovery rule for failed entities.

mod common;

use anyhow::Result;
use common::{harness, provision_tree, sample_cell};
use kukeon::model::{EntityState, Realm, Space, Stack};
use kukeon::KukeonError;

#[test]
fn test_create_is_idempotent_at_every_level() -> Result<()> {
    let harness = harness();

    let realm = harness.engine.create_realm(&Realm::new("prod", "prod-ns"))?;
    let realm_again = harness.engine.create_realm(&Realm::new("prod", "prod-ns"))?;
    assert_eq!(realm_again.status.state, EntityState::Ready);
    assert_eq!(realm.status.cgroup_path, realm_again.status.cgroup_path);

    let space = harness.engine.create_space(&Space::new("web", "prod"))?;
    let space_again = harness.engine.create_space(&Space::new("web", "prod"))?;
    assert_eq!(space_again.status.state, EntityState::Ready);
    assert_eq!(space.status.created_at, space_again.status.created_at);

    harness.engine.create_stack(&Stack::new("api", "prod", "web"))?;
    let stack_again = harness.engine.create_stack(&Stack::new("api", "prod", "web"))?;
    assert_eq!(stack_again.status.state, EntityState::Ready);

    let cell = harness.engine.create_cell(&sample_cell())?;
    let cell_again = harness.engine.create_cell(&sample_cell())?;
    assert_eq!(cell_again.status.state, EntityState::Ready);
    assert_eq!(cell.status.cgroup_path, cell_again.status.cgroup_path);
    // The second create did not duplicate any container record.
    assert_eq!(harness.client.container_ids(common::NAMESPACE).len(), 3);
    Ok(())
}

#[test]
fn test_cgroup_paths_nest_by_ancestry() -> Result<()> {
    let harness = harness();
    provision_tree(&harness);
    let cell = harness.engine.create_cell(&sample_cell())?;

    let realm = harness.engine.store().get_realm("prod")?;
    let space = harness.engine.store().get_space("prod", "web")?;
    let stack = harness.engine.store().get_stack("prod", "web", "api")?;

    let realm_path = realm.status.cgroup_path.unwrap();
    let space_path = space.status.cgroup_path.unwrap();
    let stack_path = stack.status.cgroup_path.unwrap();
    let cell_path = cell.status.cgroup_path.unwrap();

    assert!(space_path.starts_with(&realm_path));
    assert!(stack_path.starts_with(&space_path));
    assert!(cell_path.starts_with(&stack_path));
    assert!(std::path::Path::new(&cell_path).is_dir());
    Ok(())
}

#[test]
fn test_create_realm_with_empty_namespace_persists_failed_state() {
    let harness = harness();

    let err = harness
        .engine
        .create_realm(&Realm::new("prod", ""))
        .unwrap_err();
    assert!(matches!(err, KukeonError::CreateNamespace { .. }));

    // A restarted caller observes the same failure.
    let stored = harness.engine.store().get_realm("prod").unwrap();
    assert_eq!(stored.status.state, EntityState::Failed);

    // No recovery without a purge.
    let err = harness
        .engine
        .create_realm(&Realm::new("prod", "prod-ns"))
        .unwrap_err();
    assert!(matches!(err, KukeonError::FailedState { kind: "realm", .. }));
}

#[test]
fn test_cell_provisioning_failure_persists_failed_state() -> Result<()> {
    let harness = harness();
    provision_tree(&harness);

    harness.client.inject_failure("create_container");
    let err = harness.engine.create_cell(&sample_cell()).unwrap_err();
    assert!(matches!(err, KukeonError::CreateRootContainer { .. }));

    let stored = harness.engine.store().get_cell("prod", "web", "api", "c1")?;
    assert_eq!(stored.status.state, EntityState::Failed);

    // Create on a failed cell is refused until the operator purges it.
    harness.client.clear_failures();
    let err = harness.engine.create_cell(&sample_cell()).unwrap_err();
    assert!(matches!(err, KukeonError::FailedState { kind: "cell", .. }));

    harness.engine.purge_cell(&sample_cell())?;
    let recreated = harness.engine.create_cell(&sample_cell())?;
    assert_eq!(recreated.status.state, EntityState::Ready);
    Ok(())
}

#[test]
fn test_create_space_writes_default_conflist() -> Result<()> {
    let harness = harness();
    harness.engine.create_realm(&Realm::new("prod", "prod-ns"))?;
    harness.engine.create_space(&Space::new("web", "prod"))?;

    let conf_path = harness
        .engine
        .store()
        .space_conflist_path("prod", "web");
    assert!(conf_path.exists());
    let content = std::fs::read_to_string(&conf_path)?;
    assert!(content.contains("\"prod-web\""));
    assert!(content.contains("bridge"));
    Ok(())
}

#[test]
fn test_create_space_with_missing_explicit_conflist_fails() -> Result<()> {
    let harness = harness();
    harness.engine.create_realm(&Realm::new("prod", "prod-ns"))?;

    let mut space = Space::new("web", "prod");
    space.cni_config_path = Some("/nonexistent/web.conflist".into());
    let err = harness.engine.create_space(&space).unwrap_err();
    assert!(matches!(err, KukeonError::NetworkNotFound { .. }));

    let stored = harness.engine.store().get_space("prod", "web")?;
    assert_eq!(stored.status.state, EntityState::Failed);
    Ok(())
}

#[test]
fn test_validation_errors_have_no_side_effects() {
    let harness = harness();

    assert!(matches!(
        harness.engine.create_realm(&Realm::new("", "ns")),
        Err(KukeonError::RealmNameRequired)
    ));
    assert!(matches!(
        harness.engine.create_space(&Space::new("", "prod")),
        Err(KukeonError::SpaceNameRequired)
    ));

    let mut cell = sample_cell();
    cell.id.clear();
    assert!(matches!(
        harness.engine.create_cell(&cell),
        Err(KukeonError::CellIdRequired)
    ));

    // Nothing was written anywhere.
    assert!(harness.engine.store().list_realms().unwrap().is_empty());
    assert!(!harness.client.has_namespace("ns"));
}

#[test]
fn test_cell_lookup_distinguishes_absence() -> Result<()> {
    let harness = harness();
    provision_tree(&harness);

    assert!(matches!(
        harness.engine.cell("prod", "web", "api", "c1"),
        Err(KukeonError::CellNotFound { .. })
    ));

    harness.engine.create_cell(&sample_cell())?;
    let cell = harness.engine.cell("prod", "web", "api", "c1")?;
    assert_eq!(cell.id, "c1");
    Ok(())
}

#[test]
fn test_missing_ancestor_is_surfaced() {
    let harness = harness();
    harness
        .engine
        .create_realm(&Realm::new("prod", "prod-ns"))
        .unwrap();

    // Space is missing: stack creation names the missing ancestor.
    let err = harness
        .engine
        .create_stack(&Stack::new("api", "prod", "web"))
        .unwrap_err();
    assert!(matches!(err, KukeonError::GetSpace { .. }));
}
