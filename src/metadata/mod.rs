//! Hierarchical filesystem store for entity documents.
//!
//! One JSON document per entity under the run path:
//!
//! ```text
//! realms/<realm>/realm.json
//! realms/<realm>/spaces/<space>/space.json
//! realms/<realm>/spaces/<space>/stacks/<stack>/stack.json
//! realms/<realm>/spaces/<space>/stacks/<stack>/cells/<cell>/cell.json
//! realms/<realm>/spaces/<space>/cni/<space>.conflist
//! ```

mod store;

use std::path::PathBuf;

pub use store::MetadataStore;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata not found")]
    NotFound,
    #[error("failed to read metadata file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write metadata file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove metadata at {path:?}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode metadata document {path:?}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode metadata document {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl MetadataError {
    /// Whether this is the "already deleted" sentinel rather than a real
    /// I/O failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::NotFound)
    }
}
