//! Stratafs — a layered virtual file system
//!
//! Unifies heterogeneous read-mostly byte sources under one hierarchical,
//! case-insensitive namespace. Clients open files by logical path; the
//! path resolves against a tree of *mount points*, each layering one or
//! more *directory backends* drawn from different *package* types:
//!
//! - **Host directories** — a filesystem subtree, re-checked on lookup
//! - **ZIP archives** — stored entries as direct windows, deflated
//!   entries inflated once at open time
//! - **GCF archives** — Valve cache files whose bytes are scattered
//!   across fixed-size blocks chained through a fragmentation map
//! - **Custom packages** — anything registered through the factory
//!   registry
//!
//! Later mounts shadow earlier ones at the same node, so a patch archive
//! mounted over a base archive transparently overrides individual files.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratafs::{GcfFactory, Vfs, ZipFactory};
//!
//! let mut vfs = Vfs::new();
//! vfs.register_package_factory(Arc::new(ZipFactory));
//! vfs.register_package_factory(Arc::new(GcfFactory));
//!
//! vfs.mount("base_assets.zip", "/game").unwrap();
//! vfs.mount("patch", "/game").unwrap(); // host directory shadows the zip
//!
//! let config = vfs.load("/game/config/settings.ini");
//! ```
//!
//! ## Ownership model
//!
//! Packages own their directory backends; the mount tree holds only weak
//! references. Dropping a package (or [`Vfs::reset`]) expires its
//! references everywhere in the tree, and lookups skip them. File handles
//! opened earlier keep what they need and stay valid until closed.

pub mod error;
pub mod factory;
pub mod file;
pub mod mount;
pub mod package;
pub mod types;
pub mod vfs;

pub use error::{Result, VfsError};
pub use factory::FactoryRegistry;
pub use file::{DiskFile, MemoryFile, VfsFile};
pub use mount::MountPoint;
pub use package::gcf::{GcfFactory, GcfPackage};
pub use package::host::HostPackage;
pub use package::zip::{ZipFactory, ZipPackage};
pub use package::{Directory, DirectoryRef, Package, PackageFactory, PackageRef};
pub use types::{FileAttr, Mode, SeekFrom};
pub use vfs::Vfs;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
