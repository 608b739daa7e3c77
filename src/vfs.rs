//! VFS facade
//!
//! Owns the root mount point, the factory registry and every mounted
//! package. Mounting a package selects a factory, scans the package once
//! and attaches its directory backends into the tree; opening a file
//! resolves through the tree with newest-mount-wins shadowing.

use std::io::{self, Write};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, VfsError};
use crate::factory::FactoryRegistry;
use crate::file::VfsFile;
use crate::mount::MountPoint;
use crate::package::{DirectoryRef, PackageFactory, PackageRef};
use crate::types::{FileAttr, Mode};

const LOAD_CHUNK_SIZE: usize = 512;

/// The virtual file system.
///
/// # Examples
///
/// ```rust,no_run
/// use stratafs::{Vfs, ZipFactory};
/// use std::sync::Arc;
///
/// let mut vfs = Vfs::new();
/// vfs.register_package_factory(Arc::new(ZipFactory));
/// vfs.mount("assets.zip", "/assets").unwrap();
///
/// let data = vfs.load("/assets/textures/wall.png");
/// ```
pub struct Vfs {
    root: Arc<MountPoint>,
    factories: FactoryRegistry,
    packages: Vec<PackageRef>,
}

impl Vfs {
    /// An empty namespace with no registered factories.
    pub fn new() -> Self {
        Vfs {
            root: MountPoint::new("", FileAttr::READ | FileAttr::WRITE),
            factories: FactoryRegistry::new(),
            packages: Vec::new(),
        }
    }

    pub fn register_package_factory(&mut self, factory: Arc<dyn PackageFactory>) {
        self.factories.register(factory);
    }

    /// Mount the package at `package_name` under `mountpoint`.
    ///
    /// A factory is selected by extension or probe (falling back to a
    /// host-filesystem package), the package is scanned, and its
    /// directory tree is attached. The package stays owned by the VFS
    /// until [`Vfs::reset`]. A failed attach is not rolled back.
    pub fn mount(&mut self, package_name: &str, mountpoint: &str) -> Result<()> {
        let package = self
            .factories
            .create_package(package_name)
            .ok_or_else(|| VfsError::Mount(package_name.to_string()))?;

        let node = self
            .root
            .get_mountpoint(mountpoint, true)
            .ok_or_else(|| VfsError::Mount(mountpoint.to_string()))?;

        if let Err(err) = package.mount(&node) {
            warn!("mounting {package_name} at {mountpoint}: {err}");
            return Err(err);
        }

        info!("mounted {package_name} at {mountpoint}");
        self.packages.push(package);
        Ok(())
    }

    /// Mount a caller-supplied directory backend under `mountpoint`.
    ///
    /// The tree keeps only a weak reference; the caller retains ownership
    /// and dropping the backend unmounts it implicitly.
    pub fn mount_directory(&mut self, directory: &DirectoryRef, mountpoint: &str) -> Result<()> {
        self.root.mount(mountpoint, directory)
    }

    /// Descend to (optionally creating) the node at `path`.
    pub fn get_mountpoint(&self, path: &str, create: bool) -> Option<Arc<MountPoint>> {
        self.root.get_mountpoint(path, create)
    }

    /// Open a file by logical path.
    pub fn openfile(&self, path: &str, mode: Mode) -> Option<Box<dyn VfsFile>> {
        self.root.openfile(path, mode)
    }

    /// Read the start of `path` into `buf`, returning the bytes read.
    pub fn load_into(&self, path: &str, buf: &mut [u8]) -> usize {
        self.root.load(path, buf)
    }

    /// Stream `path` through `callback` in chunks, returning the total
    /// bytes delivered. The callback receives each chunk's byte offset.
    pub fn load_chunks<F>(&self, path: &str, callback: F) -> u64
    where
        F: FnMut(u64, &[u8]),
    {
        let mut buf = [0u8; LOAD_CHUNK_SIZE];
        self.root.load_chunks(path, callback, &mut buf)
    }

    /// Load the whole of `path` into a fresh buffer. Returns an empty
    /// buffer when the file is absent or the read comes up short.
    pub fn load(&self, path: &str) -> Vec<u8> {
        let Some(mut file) = self.openfile(path, Mode::READ) else {
            return Vec::new();
        };
        let size = file.size() as usize;
        if size == 0 {
            return Vec::new();
        }
        let mut data = vec![0u8; size];
        if file.read(&mut data) != size {
            return Vec::new();
        }
        data
    }

    /// Print the mount tree for diagnostics.
    pub fn write_tree<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.root.write_tree(out, "")
    }

    /// Drop all packages, factories and mounts. Every directory reference
    /// in the tree expires; files opened earlier remain valid until
    /// closed.
    pub fn reset(&mut self) {
        info!("resetting virtual file system");
        self.packages.clear();
        self.factories.clear();
        self.root.reset();
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}
