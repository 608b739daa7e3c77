//! Package abstraction
//!
//! A *package* is a source of files with shared metadata: a host-filesystem
//! subtree, a ZIP archive, a GCF cache file, or any user-supplied
//! implementation. A package owns one or more *directory backends*, each
//! presenting a flat, case-insensitive set of filenames within one logical
//! directory; mounting a package attaches those backends into the mount
//! tree along the package's internal directory structure.
//!
//! Ownership is one-way: backends are owned by their package (and the VFS
//! owns the packages), while the mount tree holds only weak references.
//! Dropping a package therefore makes all of its mount-tree references
//! stale, and lookups skip them.

pub mod gcf;
pub mod host;
pub mod zip;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::file::VfsFile;
use crate::mount::MountPoint;
use crate::types::{FileAttr, Mode};

/// One logical directory exposed by a package.
///
/// All name lookups are case-insensitive; implementations key their file
/// maps by the ASCII-lowercased filename.
pub trait Directory: Send + Sync {
    /// Size of the named file in bytes, or zero when absent.
    fn file_size(&self, filename: &str) -> u64;

    /// Attributes of the named file, or empty when absent.
    fn file_attr(&self, filename: &str) -> FileAttr;

    /// Attributes of this directory as a whole.
    fn dir_attr(&self) -> FileAttr;

    /// Test whether the named file exists.
    fn file_exists(&self, filename: &str) -> bool;

    /// List the (lowercased) filenames in this directory.
    fn file_list(&self) -> Vec<String>;

    /// Open the named file, or `None` when it is absent or the mode is
    /// incompatible with the backend.
    fn openfile(&self, filename: &str, mode: Mode) -> Option<Box<dyn VfsFile>>;
}

pub type DirectoryRef = Arc<dyn Directory>;

/// A mounted source of files.
pub trait Package: Send + Sync {
    /// Parse the package once, populating its internal directory tree.
    ///
    /// Returns the number of files found. Corrupt or missing packages
    /// yield `Ok(0)` and an empty (but still mountable) package.
    fn scan(&self) -> Result<usize>;

    /// Attach this package's directory backends into the mount tree,
    /// rooted at `mountpoint`.
    fn mount(&self, mountpoint: &Arc<MountPoint>) -> Result<()>;

    /// Attribute mask of the package as a whole.
    fn attributes(&self) -> FileAttr;
}

pub type PackageRef = Arc<dyn Package>;

/// Decides whether it recognizes a package name and constructs packages.
pub trait PackageFactory: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Lowercased extensions (without leading dot) this factory claims.
    fn file_types(&self) -> Vec<String>;

    /// Probe whether `path` names a package this factory can read.
    fn is_supported(&self, path: &str) -> bool;

    fn create_package(&self, path: &str) -> PackageRef;
}

/// In-memory directory tree built by an archive scan.
///
/// Archive packages (GCF, ZIP) transform their on-disk directory records
/// into one of these, then mount it depth-first: the node's backend at the
/// relative path, children at `path + "/" + name`.
pub(crate) struct DirTree<D> {
    pub directory: Option<Arc<D>>,
    pub children: BTreeMap<String, DirTree<D>>,
}

impl<D> DirTree<D> {
    pub fn new(directory: Option<Arc<D>>) -> Self {
        DirTree {
            directory,
            children: BTreeMap::new(),
        }
    }

    pub fn empty() -> Self {
        DirTree::new(None)
    }
}

impl<D: Directory + 'static> DirTree<D> {
    pub fn mount_into(&self, mountpoint: &Arc<MountPoint>, path: &str) -> Result<()> {
        let Some(directory) = &self.directory else {
            return Ok(());
        };
        let directory: DirectoryRef = Arc::clone(directory) as DirectoryRef;
        mountpoint.mount(path, &directory)?;

        let base = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        for (name, child) in &self.children {
            child.mount_into(mountpoint, &format!("{base}{name}"))?;
        }
        Ok(())
    }
}

/// Normalize a package path: backslashes become forward slashes.
pub(crate) fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}
