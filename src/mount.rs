//! Mount-point tree
//!
//! The logical namespace is a tree of [`MountPoint`] nodes. Each node
//! carries an ordered list of weak references to directory backends; a
//! path lookup descends the tree case-insensitively and then consults the
//! target node's backends in reverse-insertion order, so later mounts
//! shadow earlier ones at the same node (LIFO).
//!
//! Nodes own their children; backends are owned by their packages, so a
//! dropped package leaves stale references behind that lookups silently
//! skip.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::Result;
use crate::file::VfsFile;
use crate::package::{Directory, DirectoryRef};
use crate::types::{FileAttr, Mode};

/// Split a logical path into its directory prefix and leaf filename.
pub(crate) fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => (&path[..pos], &path[pos + 1..]),
        None => ("", path),
    }
}

struct Inner {
    attributes: FileAttr,
    children: BTreeMap<String, Arc<MountPoint>>,
    directories: Vec<Weak<dyn Directory>>,
}

/// A node in the logical namespace tree.
///
/// Aggregates zero or more directory backends and zero or more child
/// mount points. The node's mutex covers its children, backend list and
/// attributes; `openfile` holds it across backend resolution and the
/// delegated open, so concurrent mounts and opens on the same node are
/// linearizable.
pub struct MountPoint {
    name: String,
    inner: Mutex<Inner>,
}

impl MountPoint {
    /// Create a detached node. The root of a tree has the empty name.
    pub fn new(name: &str, attributes: FileAttr) -> Arc<Self> {
        Arc::new(MountPoint {
            name: name.to_string(),
            inner: Mutex::new(Inner {
                attributes,
                children: BTreeMap::new(),
                directories: Vec::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> FileAttr {
        self.inner.lock().attributes
    }

    /// Descend to the node at `path`, creating missing nodes when `create`
    /// is set. Created children inherit this node's attributes. Segments
    /// are matched case-insensitively; an empty path returns this node.
    pub fn get_mountpoint(self: &Arc<Self>, path: &str, create: bool) -> Option<Arc<MountPoint>> {
        let mut current = Arc::clone(self);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let name = segment.to_ascii_lowercase();
            let next = {
                let mut inner = current.inner.lock();
                match inner.children.get(&name) {
                    Some(child) => Arc::clone(child),
                    None if create => {
                        let child = MountPoint::new(&name, inner.attributes);
                        inner.children.insert(name.clone(), Arc::clone(&child));
                        child
                    }
                    None => return None,
                }
            };
            current = next;
        }
        Some(current)
    }

    /// Append a directory backend at `path`, creating intermediate nodes
    /// as needed. Only a weak reference is retained.
    pub fn mount(self: &Arc<Self>, path: &str, directory: &DirectoryRef) -> Result<()> {
        let node = self
            .get_mountpoint(path, true)
            .ok_or_else(|| crate::error::VfsError::Mount(path.to_string()))?;
        node.inner.lock().directories.push(Arc::downgrade(directory));
        Ok(())
    }

    /// Resolve `path` and open the named file.
    ///
    /// The directory prefix is descended without creating nodes; the leaf
    /// is probed against the target node's live backends newest-first, and
    /// the first backend that owns the file performs the open.
    pub fn openfile(self: &Arc<Self>, path: &str, mode: Mode) -> Option<Box<dyn VfsFile>> {
        let path = path.trim_start_matches('/');
        let (dir_path, leaf) = split_path(path);
        if leaf.is_empty() {
            return None;
        }

        let node = self.get_mountpoint(dir_path, false)?;
        let required = mode.required_attributes();
        let name = leaf.to_ascii_lowercase();

        let inner = node.inner.lock();
        if !inner.attributes.contains(required) {
            return None;
        }
        for weak in inner.directories.iter().rev() {
            let Some(directory) = weak.upgrade() else {
                continue;
            };
            if !directory.dir_attr().contains(required) {
                continue;
            }
            if directory.file_exists(&name) {
                return directory.openfile(leaf, mode);
            }
        }
        None
    }

    /// Open `path` for reading and fill `buf`, returning the bytes read.
    pub fn load(self: &Arc<Self>, path: &str, buf: &mut [u8]) -> usize {
        match self.openfile(path, Mode::READ) {
            Some(mut file) => file.read(buf),
            None => 0,
        }
    }

    /// Open `path` for reading and feed it chunk-wise through `callback`,
    /// using `buf` as the transfer buffer. The callback receives the byte
    /// offset of each chunk. Returns the total bytes delivered.
    pub fn load_chunks<F>(self: &Arc<Self>, path: &str, mut callback: F, buf: &mut [u8]) -> u64
    where
        F: FnMut(u64, &[u8]),
    {
        let Some(mut file) = self.openfile(path, Mode::READ) else {
            return 0;
        };
        let mut total = 0u64;
        while !file.is_eof() && !file.is_fail() {
            let n = file.read(buf);
            if n == 0 {
                break;
            }
            callback(total, &buf[..n]);
            total += n as u64;
        }
        total
    }

    /// Emit the tree rooted here: node names as `+=[name]`, the files of
    /// each live backend, then children with a deeper indent.
    pub fn write_tree<W: Write>(&self, out: &mut W, prefix: &str) -> io::Result<()> {
        let inner = self.inner.lock();
        writeln!(out, "{prefix}+=[{}]", self.name)?;
        for weak in &inner.directories {
            if let Some(directory) = weak.upgrade() {
                for file in directory.file_list() {
                    writeln!(out, "{prefix}| |  {file}")?;
                }
            }
        }
        let child_prefix = format!("{prefix}| ");
        for child in inner.children.values() {
            child.write_tree(out, &child_prefix)?;
        }
        Ok(())
    }

    /// Drop all children and backend references.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.children.clear();
        inner.directories.clear();
    }
}
