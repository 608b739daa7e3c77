//! Host-filesystem package
//!
//! Exposes a subtree of the host filesystem as a package: one directory
//! backend per encountered subdirectory, mounted at its path relative to
//! the package root. File metadata is re-checked against the host on every
//! lookup, so external changes are picked up without rescanning.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, VfsError};
use crate::file::{DiskFile, VfsFile};
use crate::mount::MountPoint;
use crate::package::{normalize_path, Directory, DirectoryRef, Package};
use crate::types::{FileAttr, Mode};

// Directories never descended into during a scan.
const SKIPPED_DIRS: &[&str] = &["CVS", ".git"];

#[derive(Clone)]
struct HostFileInfo {
    /// Original-case filename, used to address the host file.
    filename: String,
    size: u64,
    attributes: FileAttr,
}

fn host_readable(meta: &fs::Metadata) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o400 != 0
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        true
    }
}

fn attributes_for(meta: &fs::Metadata, mask: FileAttr) -> FileAttr {
    let mut attr = FileAttr::RANDOM;
    if mask.contains(FileAttr::READ) && host_readable(meta) {
        attr |= FileAttr::READ;
    }
    if mask.contains(FileAttr::WRITE) && !meta.permissions().readonly() {
        attr |= FileAttr::WRITE;
    }
    if meta.is_dir() {
        attr |= FileAttr::DIR;
    }
    attr
}

/// Backend over one host subdirectory.
pub struct HostDirectory {
    path: PathBuf,
    attributes: FileAttr,
    files: Mutex<HashMap<String, HostFileInfo>>,
}

impl HostDirectory {
    fn new(path: PathBuf, attributes: FileAttr) -> Self {
        HostDirectory {
            path,
            attributes,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Enumerate this directory, returning the file count and the names of
    /// subdirectories worth descending into.
    fn scan(&self) -> (usize, Vec<String>) {
        let mut files = self.files.lock();
        files.clear();

        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("cannot enumerate {}: {err}", self.path.display());
                return (0, Vec::new());
            }
        };

        let mut subdirs = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                if !SKIPPED_DIRS.contains(&name.as_str()) {
                    subdirs.push(name);
                }
                continue;
            }
            debug!("scan: {} ({} bytes)", name, meta.len());
            files.insert(
                name.to_ascii_lowercase(),
                HostFileInfo {
                    filename: name,
                    size: meta.len(),
                    attributes: attributes_for(&meta, self.attributes),
                },
            );
        }
        (files.len(), subdirs)
    }

    /// Look up a file, re-checking the host metadata. Files that vanished
    /// since the scan report as absent.
    fn get_info(&self, filename: &str) -> Option<HostFileInfo> {
        let name = filename.to_ascii_lowercase();
        let mut files = self.files.lock();
        let info = files.get_mut(&name)?;
        let meta = fs::metadata(self.path.join(&info.filename)).ok()?;
        info.size = meta.len();
        info.attributes = attributes_for(&meta, self.attributes);
        Some(info.clone())
    }

    fn open_inner(&self, filename: &str, mode: Mode) -> Result<Box<dyn VfsFile>> {
        let info = self
            .get_info(filename)
            .ok_or_else(|| VfsError::NotFound(filename.to_string()))?;
        if mode.wants_write() && !info.attributes.contains(FileAttr::WRITE) {
            return Err(VfsError::PermissionDenied(filename.to_string()));
        }
        if mode.contains(Mode::READ) && !info.attributes.contains(FileAttr::READ) {
            return Err(VfsError::PermissionDenied(filename.to_string()));
        }
        let file = DiskFile::open(self.path.join(&info.filename), mode)?;
        Ok(Box::new(file))
    }
}

impl Directory for HostDirectory {
    fn file_size(&self, filename: &str) -> u64 {
        self.get_info(filename).map(|info| info.size).unwrap_or(0)
    }

    fn file_attr(&self, filename: &str) -> FileAttr {
        self.get_info(filename)
            .map(|info| info.attributes)
            .unwrap_or(FileAttr::empty())
    }

    fn dir_attr(&self) -> FileAttr {
        self.attributes
    }

    fn file_exists(&self, filename: &str) -> bool {
        self.files
            .lock()
            .contains_key(&filename.to_ascii_lowercase())
    }

    fn file_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn openfile(&self, filename: &str, mode: Mode) -> Option<Box<dyn VfsFile>> {
        match self.open_inner(filename, mode) {
            Ok(file) => Some(file),
            Err(err) => {
                debug!("host open {filename}: {err}");
                None
            }
        }
    }
}

/// Package over a host-filesystem subtree.
pub struct HostPackage {
    root: PathBuf,
    attributes: FileAttr,
    directories: Mutex<Vec<Arc<HostDirectory>>>,
}

impl HostPackage {
    /// Package rooted at `path` with the default READ|WRITE mask.
    pub fn new(path: &str) -> Self {
        HostPackage::with_attributes(path, FileAttr::READ | FileAttr::WRITE)
    }

    /// Package rooted at `path`. The mask is ANDed with per-file host
    /// permissions, so a READ-only mask yields a read-only package even
    /// over writable files.
    pub fn with_attributes(path: &str, attributes: FileAttr) -> Self {
        HostPackage {
            root: PathBuf::from(normalize_path(path)),
            attributes,
            directories: Mutex::new(Vec::new()),
        }
    }

    fn scan_tree(&self, path: PathBuf, out: &mut Vec<Arc<HostDirectory>>, count: &mut usize) {
        let directory = Arc::new(HostDirectory::new(path.clone(), self.attributes));
        let (found, subdirs) = directory.scan();
        if found > 0 {
            *count += found;
            out.push(directory);
        }
        for name in subdirs {
            self.scan_tree(path.join(name), out, count);
        }
    }
}

impl Package for HostPackage {
    fn scan(&self) -> Result<usize> {
        let mut directories = Vec::new();
        let mut count = 0;
        self.scan_tree(self.root.clone(), &mut directories, &mut count);
        debug!(
            "host package {}: {} files in {} directories",
            self.root.display(),
            count,
            directories.len()
        );
        *self.directories.lock() = directories;
        Ok(count)
    }

    fn mount(&self, mountpoint: &Arc<MountPoint>) -> Result<()> {
        for directory in self.directories.lock().iter() {
            let relative = directory
                .path()
                .strip_prefix(&self.root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .map_err(|_| crate::error::VfsError::Mount(directory.path().display().to_string()))?;
            let directory: DirectoryRef = Arc::clone(directory) as DirectoryRef;
            mountpoint.mount(&relative, &directory)?;
        }
        Ok(())
    }

    fn attributes(&self) -> FileAttr {
        self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &[u8]) {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(content).unwrap();
    }

    fn fixture_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "Readme.TXT", b"top level");
        fs::create_dir(temp.path().join("textures")).unwrap();
        write_file(&temp.path().join("textures"), "wall.png", b"pixels");
        fs::create_dir(temp.path().join(".git")).unwrap();
        write_file(&temp.path().join(".git"), "HEAD", b"ref");
        temp
    }

    #[test]
    fn scan_finds_files_and_skips_vcs_dirs() {
        let temp = fixture_tree();
        let package = HostPackage::new(temp.path().to_str().unwrap());
        assert_eq!(package.scan().unwrap(), 2);

        let directories = package.directories.lock();
        assert_eq!(directories.len(), 2);
        assert!(directories.iter().all(|d| !d.path().ends_with(".git")));
    }

    #[test]
    fn mount_places_subdirectories_at_relative_paths() {
        let temp = fixture_tree();
        let package = HostPackage::new(temp.path().to_str().unwrap());
        package.scan().unwrap();

        let root = MountPoint::new("", FileAttr::READ | FileAttr::WRITE);
        package.mount(&root).unwrap();

        assert!(root.openfile("readme.txt", Mode::READ).is_some());
        assert!(root.openfile("textures/WALL.PNG", Mode::READ).is_some());
        assert!(root.openfile(".git/head", Mode::READ).is_none());
    }

    #[test]
    fn lookup_rescans_host_metadata() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "grow.bin", b"1234");

        let package = HostPackage::new(temp.path().to_str().unwrap());
        package.scan().unwrap();
        let directory = package.directories.lock()[0].clone();

        assert_eq!(directory.file_size("grow.bin"), 4);
        write_file(temp.path(), "grow.bin", b"123456789");
        assert_eq!(directory.file_size("grow.bin"), 9);
    }

    #[test]
    fn read_only_mask_denies_writes() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "data.txt", b"content");

        let package =
            HostPackage::with_attributes(temp.path().to_str().unwrap(), FileAttr::READ);
        package.scan().unwrap();
        let directory = package.directories.lock()[0].clone();

        assert!(directory.openfile("data.txt", Mode::WRITE).is_none());
        assert!(directory.openfile("data.txt", Mode::READ).is_some());
        assert!(!directory.file_attr("data.txt").contains(FileAttr::WRITE));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_loses_read_attr() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "secret.bin", b"x");
        fs::set_permissions(
            temp.path().join("secret.bin"),
            fs::Permissions::from_mode(0o200),
        )
        .unwrap();

        let package = HostPackage::new(temp.path().to_str().unwrap());
        package.scan().unwrap();
        let directory = package.directories.lock()[0].clone();

        assert!(!directory.file_attr("secret.bin").contains(FileAttr::READ));
        assert!(directory.openfile("secret.bin", Mode::READ).is_none());
    }

    #[test]
    fn missing_root_scans_empty() {
        let package = HostPackage::new("/no/such/directory/anywhere");
        assert_eq!(package.scan().unwrap(), 0);
    }

    #[test]
    fn vanished_file_reports_absent() {
        let temp = TempDir::new().unwrap();
        write_file(temp.path(), "gone.txt", b"x");

        let package = HostPackage::new(temp.path().to_str().unwrap());
        package.scan().unwrap();
        let directory = package.directories.lock()[0].clone();

        fs::remove_file(temp.path().join("gone.txt")).unwrap();
        assert!(directory.openfile("gone.txt", Mode::READ).is_none());
        assert_eq!(directory.file_size("gone.txt"), 0);
    }
}
