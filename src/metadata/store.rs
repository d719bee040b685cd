use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::MetadataError;
use crate::model::{Cell, Realm, Space, Stack};

const REALM_FILE: &str = "realm.json";
const SPACE_FILE: &str = "space.json";
const STACK_FILE: &str = "stack.json";
const CELL_FILE: &str = "cell.json";

type Result<T> = std::result::Result<T, MetadataError>;

/// Filesystem-backed store for entity documents.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    run_path: PathBuf,
}

impl MetadataStore {
    pub fn new<P: Into<PathBuf>>(run_path: P) -> Self {
        Self {
            run_path: run_path.into(),
        }
    }

    pub fn run_path(&self) -> &Path {
        &self.run_path
    }

    // Directory layout. Each *_dir is the subtree a purge may wipe with a
    // single recursive removal.

    pub fn realm_dir(&self, realm: &str) -> PathBuf {
        self.run_path.join("realms").join(realm)
    }

    pub fn space_dir(&self, realm: &str, space: &str) -> PathBuf {
        self.realm_dir(realm).join("spaces").join(space)
    }

    pub fn stack_dir(&self, realm: &str, space: &str, stack: &str) -> PathBuf {
        self.space_dir(realm, space).join("stacks").join(stack)
    }

    pub fn cell_dir(&self, realm: &str, space: &str, stack: &str, cell: &str) -> PathBuf {
        self.stack_dir(realm, space, stack).join("cells").join(cell)
    }

    pub fn space_cni_dir(&self, realm: &str, space: &str) -> PathBuf {
        self.space_dir(realm, space).join("cni")
    }

    /// Default conflist location for a space without an explicit
    /// `cniConfigPath`.
    pub fn space_conflist_path(&self, realm: &str, space: &str) -> PathBuf {
        self.space_cni_dir(realm, space)
            .join(format!("{space}.conflist"))
    }

    fn realm_file(&self, realm: &str) -> PathBuf {
        self.realm_dir(realm).join(REALM_FILE)
    }

    fn space_file(&self, realm: &str, space: &str) -> PathBuf {
        self.space_dir(realm, space).join(SPACE_FILE)
    }

    fn stack_file(&self, realm: &str, space: &str, stack: &str) -> PathBuf {
        self.stack_dir(realm, space, stack).join(STACK_FILE)
    }

    fn cell_file(&self, realm: &str, space: &str, stack: &str, cell: &str) -> PathBuf {
        self.cell_dir(realm, space, stack, cell).join(CELL_FILE)
    }

    // Documents

    pub fn get_realm(&self, realm: &str) -> Result<Realm> {
        read_document(&self.realm_file(realm))
    }

    pub fn get_space(&self, realm: &str, space: &str) -> Result<Space> {
        read_document(&self.space_file(realm, space))
    }

    pub fn get_stack(&self, realm: &str, space: &str, stack: &str) -> Result<Stack> {
        read_document(&self.stack_file(realm, space, stack))
    }

    pub fn get_cell(&self, realm: &str, space: &str, stack: &str, cell: &str) -> Result<Cell> {
        read_document(&self.cell_file(realm, space, stack, cell))
    }

    pub fn update_realm(&self, realm: &Realm) -> Result<()> {
        write_document(&self.realm_file(&realm.name), realm)
    }

    pub fn update_space(&self, space: &Space) -> Result<()> {
        write_document(&self.space_file(&space.realm_name, &space.name), space)
    }

    pub fn update_stack(&self, stack: &Stack) -> Result<()> {
        write_document(
            &self.stack_file(&stack.realm_name, &stack.space_name, &stack.name),
            stack,
        )
    }

    pub fn update_cell(&self, cell: &Cell) -> Result<()> {
        write_document(
            &self.cell_file(&cell.realm_name, &cell.space_name, &cell.stack_name, &cell.name),
            cell,
        )
    }

    pub fn delete_realm(&self, realm: &str) -> Result<()> {
        remove_file_idempotent(&self.realm_file(realm))
    }

    pub fn delete_space(&self, realm: &str, space: &str) -> Result<()> {
        remove_file_idempotent(&self.space_file(realm, space))
    }

    pub fn delete_stack(&self, realm: &str, space: &str, stack: &str) -> Result<()> {
        remove_file_idempotent(&self.stack_file(realm, space, stack))
    }

    pub fn delete_cell(&self, realm: &str, space: &str, stack: &str, cell: &str) -> Result<()> {
        remove_file_idempotent(&self.cell_file(realm, space, stack, cell))
    }

    /// Recursively removes a metadata subtree. Idempotent.
    pub fn remove_dir(&self, dir: &Path) -> Result<()> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(MetadataError::Remove {
                path: dir.to_path_buf(),
                source: err,
            }),
        }
    }

    // Child listings, used by the cascading operations. A missing parent
    // directory lists as empty.

    pub fn list_realms(&self) -> Result<Vec<String>> {
        list_subdirs(&self.run_path.join("realms"))
    }

    pub fn list_spaces(&self, realm: &str) -> Result<Vec<String>> {
        list_subdirs(&self.realm_dir(realm).join("spaces"))
    }

    pub fn list_stacks(&self, realm: &str, space: &str) -> Result<Vec<String>> {
        list_subdirs(&self.space_dir(realm, space).join("stacks"))
    }

    pub fn list_cells(&self, realm: &str, space: &str, stack: &str) -> Result<Vec<String>> {
        list_subdirs(&self.stack_dir(realm, space, stack).join("cells"))
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(MetadataError::NotFound),
        Err(err) => {
            return Err(MetadataError::Read {
                path: path.to_path_buf(),
                source: err,
            })
        }
    };

    serde_json::from_reader(BufReader::new(file)).map_err(|err| MetadataError::Decode {
        path: path.to_path_buf(),
        source: err,
    })
}

/// Writes a document atomically: serialize to a temp file in the target
/// directory, flush, then rename over the destination.
fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|err| MetadataError::Write {
        path: path.to_path_buf(),
        source: err,
    })?;

    let tmp = path.with_extension("json.tmp");
    let file = File::create(&tmp).map_err(|err| MetadataError::Write {
        path: tmp.clone(),
        source: err,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, document).map_err(|err| MetadataError::Encode {
        path: path.to_path_buf(),
        source: err,
    })?;
    writer.flush().map_err(|err| MetadataError::Write {
        path: tmp.clone(),
        source: err,
    })?;

    fs::rename(&tmp, path).map_err(|err| MetadataError::Write {
        path: path.to_path_buf(),
        source: err,
    })
}

fn remove_file_idempotent(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(MetadataError::Remove {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

fn list_subdirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(MetadataError::Read {
                path: dir.to_path_buf(),
                source: err,
            })
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| MetadataError::Read {
            path: dir.to_path_buf(),
            source: err,
        })?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::model::{EntityState, RegistryCredentials};

    fn store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_realm_round_trip() -> Result<()> {
        let (_dir, store) = store();
        let mut realm = Realm::new("prod", "prod-ns");
        realm.registry_credentials = Some(RegistryCredentials {
            username: "robot".to_string(),
            password: "hunter2".to_string(),
        });
        realm.status.mark_ready();

        store.update_realm(&realm)?;
        let loaded = store.get_realm("prod")?;
        assert_eq!(loaded, realm);
        Ok(())
    }

    #[test]
    fn test_get_absent_returns_not_found() {
        let (_dir, store) = store();
        assert!(store.get_realm("missing").unwrap_err().is_not_found());
        assert!(store
            .get_cell("r", "s", "st", "missing")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_cell_round_trip_preserves_status() -> Result<()> {
        let (_dir, store) = store();
        let mut cell = Cell {
            name: "c1".to_string(),
            id: "c1_id".to_string(),
            realm_name: "prod".to_string(),
            space_name: "web".to_string(),
            stack_name: "api".to_string(),
            ..Default::default()
        };
        cell.status.state = EntityState::Ready;
        cell.status.cgroup_path = Some("/sys/fs/cgroup/kukeon/prod/web/api/c1".to_string());

        store.update_cell(&cell)?;
        let loaded = store.get_cell("prod", "web", "api", "c1")?;
        assert_eq!(loaded, cell);
        assert_eq!(loaded.status.state, EntityState::Ready);
        Ok(())
    }

    #[test]
    fn test_update_is_atomic_replacement() -> Result<()> {
        let (_dir, store) = store();
        let mut realm = Realm::new("prod", "prod-ns");
        store.update_realm(&realm)?;

        realm.status.state = EntityState::Failed;
        store.update_realm(&realm)?;

        let loaded = store.get_realm("prod")?;
        assert_eq!(loaded.status.state, EntityState::Failed);
        // No temp file left behind
        assert!(!store.realm_dir("prod").join("realm.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_delete_is_idempotent() -> Result<()> {
        let (_dir, store) = store();
        let realm = Realm::new("prod", "prod-ns");
        store.update_realm(&realm)?;

        store.delete_realm("prod")?;
        store.delete_realm("prod")?;
        assert!(store.get_realm("prod").unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn test_remove_dir_is_idempotent() -> Result<()> {
        let (_dir, store) = store();
        let cell = Cell {
            name: "c1".to_string(),
            id: "c1_id".to_string(),
            realm_name: "prod".to_string(),
            space_name: "web".to_string(),
            stack_name: "api".to_string(),
            ..Default::default()
        };
        store.update_cell(&cell)?;

        let dir = store.cell_dir("prod", "web", "api", "c1");
        store.remove_dir(&dir)?;
        store.remove_dir(&dir)?;
        assert!(!dir.exists());
        Ok(())
    }

    #[test]
    fn test_list_children() -> Result<()> {
        let (_dir, store) = store();
        store.update_realm(&Realm::new("prod", "prod-ns"))?;
        store.update_space(&Space::new("web", "prod"))?;
        store.update_space(&Space::new("batch", "prod"))?;
        store.update_stack(&Stack::new("api", "prod", "web"))?;

        assert_eq!(store.list_realms()?, vec!["prod"]);
        assert_eq!(store.list_spaces("prod")?, vec!["batch", "web"]);
        assert_eq!(store.list_stacks("prod", "web")?, vec!["api"]);
        assert_eq!(store.list_cells("prod", "web", "api")?, Vec::<String>::new());
        Ok(())
    }

    #[test]
    fn test_layout_matches_run_path_contract() {
        let store = MetadataStore::new("/var/run/kukeon");
        assert_eq!(
            store.cell_dir("prod", "web", "api", "c1"),
            PathBuf::from("/var/run/kukeon/realms/prod/spaces/web/stacks/api/cells/c1")
        );
        assert_eq!(
            store.space_conflist_path("prod", "web"),
            PathBuf::from("/var/run/kukeon/realms/prod/spaces/web/cni/web.conflist")
        );
    }
}
