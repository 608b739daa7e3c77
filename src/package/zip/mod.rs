//! ZIP archive package
//!
//! Scanning locates the end-of-central-directory trailer by reading the
//! archive's tail window and searching backward for the signature, then
//! walks the central directory, cross-checking each entry's local file
//! header. Stored entries open as direct windows into the archive;
//! deflated entries are inflated once at open time into a [`MemoryFile`].
//!
//! Multi-volume archives, encrypted entries and writes are not supported.

pub mod format;

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use flate2::{Decompress, FlushDecompress, Status};
use parking_lot::Mutex;
use tracing::{debug, warn};

use format::{
    find_eocd, CentralDirEntry, LocalFileHeader, ZipFileInfo, CENTRAL_DIR_SIGNATURE,
    LOCAL_HEADER_SIGNATURE, METHOD_DEFLATED, METHOD_STORED,
};

use crate::error::{Result, VfsError};
use crate::file::{MemoryFile, VfsFile};
use crate::mount::MountPoint;
use crate::package::{normalize_path, DirTree, Directory, Package, PackageFactory, PackageRef};
use crate::types::{FileAttr, Mode};

// Largest possible distance from the EOCD signature to the end of the
// archive: a 65535-byte comment plus the record itself.
const EOCD_WINDOW: u64 = 0xFFFF + 22;

/// One-shot DEFLATE of `source` into the pre-sized `target`.
fn inflate(source: &[u8], target: &mut [u8]) -> Result<()> {
    let mut stream = Decompress::new(false);
    match stream.decompress(source, target, FlushDecompress::Finish) {
        Ok(Status::StreamEnd) | Ok(Status::Ok) => {
            if stream.total_out() as usize == target.len() {
                Ok(())
            } else {
                Err(VfsError::Format(format!(
                    "inflate produced {} of {} bytes",
                    stream.total_out(),
                    target.len()
                )))
            }
        }
        Ok(Status::BufError) => Err(VfsError::Format("inflate buffer error".into())),
        Err(err) => Err(VfsError::Format(format!("inflate: {err}"))),
    }
}

/// Shared package state: the archive path and the per-entry metadata
/// table, indexed by file id.
struct ZipState {
    path: PathBuf,
    files: Mutex<Vec<ZipFileInfo>>,
}

impl ZipState {
    fn add(&self, info: ZipFileInfo) -> u32 {
        let mut files = self.files.lock();
        let id = files.len() as u32;
        files.push(info);
        id
    }

    fn file_info(&self, id: u32) -> Option<ZipFileInfo> {
        self.files.lock().get(id as usize).copied()
    }

    fn open_by_id(&self, id: u32, mode: Mode) -> Result<Box<dyn VfsFile>> {
        let info = self
            .file_info(id)
            .ok_or_else(|| VfsError::NotFound(format!("zip file id {id}")))?;

        match info.compression_method {
            METHOD_STORED => {
                let file = ZipStoredFile::open(&self.path, info, mode)?;
                Ok(Box::new(file))
            }
            METHOD_DEFLATED => {
                let mut archive = File::open(&self.path)?;
                archive.seek(SeekFrom::Start(info.file_offset as u64))?;
                let mut compressed = vec![0u8; info.size_compressed as usize];
                archive.read_exact(&mut compressed)?;

                let mut decompressed = vec![0u8; info.size_uncompressed as usize];
                inflate(&compressed, &mut decompressed)?;
                Ok(Box::new(MemoryFile::from_bytes(Mode::READ, decompressed)))
            }
            method => Err(VfsError::UnsupportedCompression(method)),
        }
    }
}

/// One logical directory inside a ZIP archive; maps lowercased leaf
/// names to package-wide file ids.
pub struct ZipDirectory {
    state: Arc<ZipState>,
    files: Mutex<HashMap<String, u32>>,
}

impl ZipDirectory {
    fn new(state: Arc<ZipState>) -> Self {
        ZipDirectory {
            state,
            files: Mutex::new(HashMap::new()),
        }
    }

    fn add_file(&self, filename: &str, id: u32) {
        if filename.is_empty() {
            return;
        }
        self.files.lock().insert(filename.to_ascii_lowercase(), id);
    }

    fn file_id(&self, filename: &str) -> Option<u32> {
        self.files
            .lock()
            .get(&filename.to_ascii_lowercase())
            .copied()
    }

    fn open_inner(&self, filename: &str, mode: Mode) -> Result<Box<dyn VfsFile>> {
        if mode.wants_write() || !mode.contains(Mode::READ) {
            return Err(VfsError::ReadOnly);
        }
        let id = self
            .file_id(filename)
            .ok_or_else(|| VfsError::NotFound(filename.to_string()))?;
        self.state.open_by_id(id, mode)
    }
}

impl Directory for ZipDirectory {
    fn file_size(&self, filename: &str) -> u64 {
        self.file_id(filename)
            .and_then(|id| self.state.file_info(id))
            .map(|info| info.size_uncompressed as u64)
            .unwrap_or(0)
    }

    fn file_attr(&self, filename: &str) -> FileAttr {
        if self.file_exists(filename) {
            FileAttr::READ
        } else {
            FileAttr::empty()
        }
    }

    fn dir_attr(&self) -> FileAttr {
        FileAttr::READ
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
                debug!("zip open {filename}: {err}");
                None
            }
        }
    }
}

/// Package reader over one ZIP archive.
pub struct ZipPackage {
    state: Arc<ZipState>,
    root: Mutex<DirTree<ZipDirectory>>,
}

impl ZipPackage {
    pub fn new(path: &str) -> Self {
        ZipPackage {
            state: Arc::new(ZipState {
                path: PathBuf::from(normalize_path(path)),
                files: Mutex::new(Vec::new()),
            }),
            root: Mutex::new(DirTree::empty()),
        }
    }

    fn parse(&self) -> Result<usize> {
        let mut archive = File::open(&self.state.path)?;
        let archive_size = archive.seek(SeekFrom::End(0))?;
        if archive_size < 4 + format::EndOfCentralDir::SIZE as u64 {
            return Err(VfsError::Format("archive smaller than trailer".into()));
        }

        // Tail window covering the farthest possible EOCD position.
        let window_start = archive_size.saturating_sub(EOCD_WINDOW);
        archive.seek(SeekFrom::Start(window_start))?;
        let mut window = vec![0u8; (archive_size - window_start) as usize];
        archive.read_exact(&mut window)?;

        let eocd =
            find_eocd(&window).ok_or_else(|| VfsError::Format("missing end-of-directory".into()))?;
        if eocd.disk_number != 0 || eocd.central_dir_disk_num != 0 {
            return Err(VfsError::MultiVolume);
        }

        self.state.files.lock().clear();
        let mut root = DirTree::new(Some(Arc::new(ZipDirectory::new(Arc::clone(&self.state)))));

        let mut count = 0;
        let mut offset = eocd.dir_offset as u64;
        for _ in 0..eocd.dir_entry_count {
            archive.seek(SeekFrom::Start(offset))?;
            let mut signature = [0u8; 4];
            if archive.read_exact(&mut signature).is_err() || signature != CENTRAL_DIR_SIGNATURE {
                break;
            }
            let dir_entry_file_offset = (offset + 4) as u32;

            let mut entry_buf = [0u8; CentralDirEntry::SIZE];
            archive.read_exact(&mut entry_buf)?;
            let entry = CentralDirEntry::from_bytes(&entry_buf);

            let mut name_buf = vec![0u8; entry.filename_size as usize];
            archive.read_exact(&mut name_buf)?;
            let path = String::from_utf8_lossy(&name_buf).into_owned();

            // Cross-check the local header; its fields describe the data.
            archive.seek(SeekFrom::Start(entry.file_offset as u64))?;
            if archive.read_exact(&mut signature).is_err() || signature != LOCAL_HEADER_SIGNATURE {
                break;
            }
            let mut local_buf = [0u8; LocalFileHeader::SIZE];
            archive.read_exact(&mut local_buf)?;
            let local = LocalFileHeader::from_bytes(&local_buf);

            if local.size_uncompressed > 0 {
                let info = ZipFileInfo {
                    compression_method: local.compression_method,
                    crc: local.crc,
                    file_offset: entry.file_offset
                        + LocalFileHeader::SIZE as u32
                        + 4
                        + local.filename_size as u32
                        + local.extra_size as u32,
                    dir_entry_file_offset,
                    size_compressed: local.size_compressed,
                    size_uncompressed: local.size_uncompressed,
                };
                self.add_file(&mut root, &path, info);
                count += 1;
            }

            offset += (4 + CentralDirEntry::SIZE) as u64
                + entry.filename_size as u64
                + entry.extra_size as u64
                + entry.comment_size as u64;
        }

        *self.root.lock() = root;
        debug!(
            "zip package {}: {count} files",
            self.state.path.display()
        );
        Ok(count)
    }

    /// Register one entry: create the directory chain for its path prefix
    /// and record the leaf in the target backend.
    fn add_file(&self, root: &mut DirTree<ZipDirectory>, path: &str, info: ZipFileInfo) {
        let (prefix, leaf) = crate::mount::split_path(path.trim_start_matches('/'));
        if leaf.is_empty() {
            return;
        }

        let mut node = root;
        for segment in prefix.split('/').filter(|s| !s.is_empty()) {
            let name = segment.to_ascii_lowercase();
            let state = Arc::clone(&self.state);
            node = node
                .children
                .entry(name)
                .or_insert_with(|| DirTree::new(Some(Arc::new(ZipDirectory::new(state)))));
        }

        let id = self.state.add(info);
        if let Some(directory) = &node.directory {
            directory.add_file(leaf, id);
        }
    }
}

impl Package for ZipPackage {
    fn scan(&self) -> Result<usize> {
        match self.parse() {
            Ok(count) => Ok(count),
            Err(err) => {
                warn!("zip package {}: {err}", self.state.path.display());
                Ok(0)
            }
        }
    }

    fn mount(&self, mountpoint: &Arc<MountPoint>) -> Result<()> {
        self.root.lock().mount_into(mountpoint, "")
    }

    fn attributes(&self) -> FileAttr {
        FileAttr::READ
    }
}

/// Handle over a stored (uncompressed) entry: a direct window into the
/// archive file bounded by the entry's data.
pub struct ZipStoredFile {
    file: File,
    info: ZipFileInfo,
    /// Absolute position in the archive file.
    position: u64,
    count: usize,
    fail: bool,
}

impl ZipStoredFile {
    fn open(path: &std::path::Path, info: ZipFileInfo, mode: Mode) -> Result<Self> {
        let file = File::open(path)?;
        let position = if mode.contains(Mode::AT_END) {
            info.file_offset as u64 + info.size_uncompressed as u64
        } else {
            info.file_offset as u64
        };
        Ok(ZipStoredFile {
            file,
            info,
            position,
            count: 0,
            fail: false,
        })
    }

    fn data_start(&self) -> u64 {
        self.info.file_offset as u64
    }

    fn data_end(&self) -> u64 {
        self.data_start() + self.info.size_uncompressed as u64
    }
}

impl VfsFile for ZipStoredFile {
    fn get(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        if self.read(&mut byte) == 1 {
            Some(byte[0])
        } else {
            None
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.fail || self.is_eof() || self.position < self.data_start() {
            self.count = 0;
            return 0;
        }
        let available = (self.data_end() - self.position) as usize;
        let wanted = buf.len().min(available);

        let read = match self
            .file
            .seek(SeekFrom::Start(self.position))
            .and_then(|_| self.file.read(&mut buf[..wanted]))
        {
            Ok(n) => n,
            Err(_) => {
                self.fail = true;
                0
            }
        };
        self.position += read as u64;
        self.count = read;
        read
    }

    fn write(&mut self, _data: &[u8]) -> usize {
        // The package is read-only.
        0
    }

    fn ignore(&mut self, count: usize, delimiter: Option<u8>) {
        match delimiter {
            None => self.seek(SeekFrom::Current(count as i64)),
            Some(delim) => {
                let mut remaining = count;
                while remaining > 0 && !self.is_eof() && !self.fail {
                    remaining -= 1;
                    if self.get() == Some(delim) {
                        break;
                    }
                }
            }
        }
    }

    fn seek(&mut self, pos: SeekFrom) {
        let size = self.info.size_uncompressed as i64;
        let logical = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => (self.position - self.data_start()) as i64 + offset,
            SeekFrom::End(offset) => size + offset,
        };
        self.position = self.data_start() + logical.clamp(0, size) as u64;
    }

    fn tell(&mut self) -> u64 {
        self.position - self.data_start()
    }

    fn is_fail(&self) -> bool {
        self.fail
    }

    fn is_eof(&self) -> bool {
        self.position >= self.data_end()
    }

    fn last_read(&self) -> usize {
        self.count
    }

    fn size(&mut self) -> u64 {
        self.info.size_uncompressed as u64
    }
}

/// Factory recognizing `.zip` archives.
pub struct ZipFactory;

impl PackageFactory for ZipFactory {
    fn name(&self) -> &str {
        "ZIP"
    }

    fn description(&self) -> &str {
        "ZIP archive package"
    }

    fn file_types(&self) -> Vec<String> {
        vec!["zip".to_string()]
    }

    fn is_supported(&self, path: &str) -> bool {
        path.rsplit('.')
            .next()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
            && path.contains('.')
    }

    fn create_package(&self, path: &str) -> PackageRef {
        Arc::new(ZipPackage::new(path))
    }
}
