//! Internal model of the realm → space → stack → cell → container hierarchy.
//!
//! Children reference their parents by name, never by pointer; lookups go
//! through the metadata store. Observed state (`status`) travels with the
//! declared spec in one document per entity.

mod cell;
mod container;
mod realm;
mod space;
mod stack;
mod status;

pub use cell::{Cell, CellStatus, ContainerState, ContainerStatus};
pub use container::ContainerSpec;
pub use realm::{Realm, RegistryCredentials};
pub use space::Space;
pub use stack::Stack;
pub use status::{EntityState, EntityStatus};

/// Container labels written by the engine.
pub mod labels {
    pub const REALM: &str = "kukeon.io/realm";
    pub const SPACE: &str = "kukeon.io/space";
    pub const STACK: &str = "kukeon.io/stack";
    pub const CELL: &str = "kukeon.io/cell";
    pub const CELL_NAME: &str = "kukeon.io/cell-name";
    pub const CONTAINER_TYPE: &str = "kukeon.io/container-type";

    pub const CONTAINER_TYPE_ROOT: &str = "root";
}
