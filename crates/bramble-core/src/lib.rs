#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Dependency resolution, placement, lockfiles, and reification for
//! bramble, an npm-compatible package manager.

pub mod actual;
pub mod builder;
pub mod config;
pub mod error;
pub mod install;
pub mod integrity;
pub mod lock;
pub mod manifest;
pub mod place;
pub mod registry;
pub mod reify;
pub mod tarball;
pub mod tree;
pub mod version;
pub mod writer;

pub use config::{Config, LockfileVersion, SaveKind};
pub use error::{codes, PmError};
pub use install::{
    add, clean_install, install, list, remove, update, InstallOutcome, ListedPackage,
};
pub use lock::{LockFormat, Lockfile};
pub use registry::{PackumentSource, RegistryClient, TarballSource};
pub use reify::{no_progress, ReifyReport};
pub use tree::{Edge, EdgeKind, Inventory, NodeId, Tree};
