//! Valve GCF (Game Cache File) package
//!
//! A GCF archive stores file bytes in fixed-size data blocks chained
//! through a fragmentation map, with a sibling/child linked directory
//! describing the logical tree. Scanning parses the header chain once and
//! transforms the linked directory records into an owned tree of
//! backends; opening a file yields a [`GcfFile`] that walks the frag-map
//! chain as it reads.
//!
//! The package is read-only: writes on GCF handles are silently
//! discarded, and writable open modes are rejected at the directory.

pub mod format;

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use format::{
    GcfBlockEntry, GcfBlockEntryHeader, GcfBlockEntryMapHeader, GcfChecksumHeader,
    GcfDataBlockHeader, GcfDirectoryEntry, GcfDirectoryHeader, GcfFragMapHeader, GcfHeader,
    BLOCK_ENTRY_MAP_SIZE, DIRECTORY_MAP_HEADER_SIZE,
};

use crate::error::{Result, VfsError};
use crate::file::VfsFile;
use crate::mount::MountPoint;
use crate::package::{normalize_path, DirTree, Directory, Package, PackageFactory, PackageRef};
use crate::types::{FileAttr, Mode};

#[derive(Clone, Copy)]
struct GcfFileRecord {
    size: u32,
    block_entry_index: u32,
}

#[derive(Default)]
struct GcfInfo {
    block_size: u32,
    block_count: u32,
    first_block_offset: u32,
    /// File offset of the frag-map array, kept for diagnostics.
    #[allow(dead_code)]
    fragmap_offset: u64,
    frag_map: Vec<u32>,
    files: Vec<GcfFileRecord>,
}

/// Shared package state: the archive path plus everything the frag-chain
/// walk needs. Directories and open file handles keep an `Arc` to this.
struct GcfState {
    path: PathBuf,
    inner: Mutex<GcfInfo>,
}

impl GcfState {
    fn block_size(&self) -> u32 {
        self.inner.lock().block_size
    }

    fn block_count(&self) -> u32 {
        self.inner.lock().block_count
    }

    fn first_block_offset(&self) -> u32 {
        self.inner.lock().first_block_offset
    }

    fn file_record(&self, file_id: u32) -> Option<GcfFileRecord> {
        self.inner.lock().files.get(file_id as usize).copied()
    }

    /// Next block in the chain, or `block_count` (end marker) when the
    /// index is out of range.
    fn next_block(&self, index: u32) -> u32 {
        let inner = self.inner.lock();
        inner
            .frag_map
            .get(index as usize)
            .copied()
            .unwrap_or(inner.block_count)
    }

    /// Block containing logical `offset`, found by stepping the frag map
    /// `offset / block_size` times from `first_block`.
    fn block_index(&self, first_block: u32, offset: u32) -> u32 {
        let inner = self.inner.lock();
        let mut block = first_block;
        let mut steps = offset / inner.block_size.max(1);
        while steps > 0 {
            block = inner
                .frag_map
                .get(block as usize)
                .copied()
                .unwrap_or(inner.block_count);
            steps -= 1;
        }
        block
    }
}

#[derive(Clone)]
struct GcfDirEntry {
    filename: String,
    first_block_index: u32,
    size: u32,
    file_id: u32,
}

/// One logical directory inside a GCF archive.
pub struct GcfDirectory {
    state: Arc<GcfState>,
    files: Mutex<HashMap<String, GcfDirEntry>>,
}

impl GcfDirectory {
    fn new(state: Arc<GcfState>) -> Self {
        GcfDirectory {
            state,
            files: Mutex::new(HashMap::new()),
        }
    }

    fn add_file(&self, filename: &str, first_block_index: u32, size: u32, file_id: u32) {
        self.files.lock().insert(
            filename.to_ascii_lowercase(),
            GcfDirEntry {
                filename: filename.to_string(),
                first_block_index,
                size,
                file_id,
            },
        );
    }

    fn get_info(&self, filename: &str) -> Option<GcfDirEntry> {
        self.files
            .lock()
            .get(&filename.to_ascii_lowercase())
            .cloned()
    }

    fn open_inner(&self, filename: &str, mode: Mode) -> Result<Box<dyn VfsFile>> {
        if mode.wants_write() || !mode.contains(Mode::READ) {
            return Err(VfsError::ReadOnly);
        }
        let info = self
            .get_info(filename)
            .ok_or_else(|| VfsError::NotFound(filename.to_string()))?;
        let file = GcfFile::open(Arc::clone(&self.state), info.file_id, mode)?;
        Ok(Box::new(file))
    }
}

impl Directory for GcfDirectory {
    fn file_size(&self, filename: &str) -> u64 {
        self.get_info(filename)
            .map(|info| info.size as u64)
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
                debug!("gcf open {filename}: {err}");
                None
            }
        }
    }
}

/// Directory block pulled into memory during a scan.
struct DirectoryData {
    slab: Vec<u8>,
    item_count: u32,
    names_offset: usize,
    dir_map: Vec<u32>,
}

impl DirectoryData {
    fn entry(&self, index: u32) -> Option<GcfDirectoryEntry> {
        if index >= self.item_count {
            return None;
        }
        let offset = GcfDirectoryHeader::SIZE + GcfDirectoryEntry::SIZE * index as usize;
        Some(GcfDirectoryEntry::from_bytes(&self.slab[offset..]))
    }

    fn name(&self, name_offset: u32) -> String {
        let start = self.names_offset + name_offset as usize;
        let bytes = self.slab.get(start..).unwrap_or(&[]);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }
}

/// Package reader over one GCF archive.
pub struct GcfPackage {
    state: Arc<GcfState>,
    root: Mutex<DirTree<GcfDirectory>>,
}

impl GcfPackage {
    pub fn new(path: &str) -> Self {
        GcfPackage {
            state: Arc::new(GcfState {
                path: PathBuf::from(normalize_path(path)),
                inner: Mutex::new(GcfInfo::default()),
            }),
            root: Mutex::new(DirTree::empty()),
        }
    }

    fn parse(&self) -> Result<usize> {
        let mut file = File::open(&self.state.path)?;
        let file_size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        if file_size < GcfHeader::SIZE as u64 {
            return Err(VfsError::Format("archive smaller than header".into()));
        }

        let header = GcfHeader::from_bytes(&read_block(&mut file, GcfHeader::SIZE)?);
        if header.file_size as u64 != file_size {
            return Err(VfsError::Format(format!(
                "header file size {} does not match actual size {}",
                header.file_size, file_size
            )));
        }
        if header.block_size == 0 {
            return Err(VfsError::Format("zero block size".into()));
        }

        // Block entries are read lazily at open time; skip the table.
        let block_header =
            GcfBlockEntryHeader::from_bytes(&read_block(&mut file, GcfBlockEntryHeader::SIZE)?);
        file.seek(SeekFrom::Current(
            (GcfBlockEntry::SIZE as i64) * block_header.block_count as i64,
        ))?;

        let frag_header =
            GcfFragMapHeader::from_bytes(&read_block(&mut file, GcfFragMapHeader::SIZE)?);
        let fragmap_offset = file.stream_position()?;
        let frag_bytes = read_block(&mut file, frag_header.block_count as usize * 4)?;
        let frag_map: Vec<u32> = frag_bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        if header.format_version <= 5 {
            let map_header = GcfBlockEntryMapHeader::from_bytes(&read_block(
                &mut file,
                GcfBlockEntryMapHeader::SIZE,
            )?);
            file.seek(SeekFrom::Current(
                (BLOCK_ENTRY_MAP_SIZE as i64) * map_header.block_count as i64,
            ))?;
        }

        // Directory block: header + entries + packed names, retained whole.
        let dir_pos = file.stream_position()?;
        let dir_header =
            GcfDirectoryHeader::from_bytes(&read_block(&mut file, GcfDirectoryHeader::SIZE)?);

        let entries_size = GcfDirectoryEntry::SIZE * dir_header.item_count as usize;
        if (dir_header.directory_size as usize) < GcfDirectoryHeader::SIZE + entries_size {
            return Err(VfsError::Format("directory block too small".into()));
        }

        file.seek(SeekFrom::Start(dir_pos + dir_header.directory_size as u64))?;
        read_block(&mut file, DIRECTORY_MAP_HEADER_SIZE)?;
        let map_bytes = read_block(&mut file, dir_header.item_count as usize * 4)?;
        let dir_map: Vec<u32> = map_bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        file.seek(SeekFrom::Start(dir_pos))?;
        let slab = read_block(&mut file, dir_header.directory_size as usize)?;
        let directory = DirectoryData {
            slab,
            item_count: dir_header.item_count,
            names_offset: GcfDirectoryHeader::SIZE + entries_size,
            dir_map,
        };

        // Checksum block is not verified; its size locates the data region.
        let checksum_pos = dir_pos
            + dir_header.directory_size as u64
            + DIRECTORY_MAP_HEADER_SIZE as u64
            + dir_header.item_count as u64 * 4;
        file.seek(SeekFrom::Start(checksum_pos))?;
        let checksum_header =
            GcfChecksumHeader::from_bytes(&read_block(&mut file, GcfChecksumHeader::SIZE)?);

        let data_pos = checksum_pos + checksum_header.checksum_size as u64 + GcfChecksumHeader::SIZE as u64;
        file.seek(SeekFrom::Start(data_pos))?;
        let data_header =
            GcfDataBlockHeader::from_bytes(&read_block(&mut file, GcfDataBlockHeader::SIZE)?);

        // Walk the linked directory entries into an owned tree.
        let mut files = Vec::new();
        let mut entry_index = 0;
        if let Some(root_entry) = directory.entry(0) {
            if root_entry.is_folder() {
                entry_index = root_entry.first_index;
            }
        }
        let mut budget = directory.item_count.saturating_add(1);
        let root = self.scan_directory(&directory, entry_index, &mut files, &mut budget);

        let count = files.len();
        *self.state.inner.lock() = GcfInfo {
            block_size: header.block_size,
            block_count: header.block_count,
            first_block_offset: data_header.first_block_offset,
            fragmap_offset,
            frag_map,
            files,
        };
        *self.root.lock() = root;

        debug!(
            "gcf package {}: {} files, block size {}, {} blocks",
            self.state.path.display(),
            count,
            header.block_size,
            header.block_count
        );
        Ok(count)
    }

    /// Walk one sibling chain, recursing into folders. `budget` bounds the
    /// total number of entries visited; corrupt link fields could
    /// otherwise cycle.
    fn scan_directory(
        &self,
        directory: &DirectoryData,
        mut entry_index: u32,
        files: &mut Vec<GcfFileRecord>,
        budget: &mut u32,
    ) -> DirTree<GcfDirectory> {
        let backend = Arc::new(GcfDirectory::new(Arc::clone(&self.state)));
        let mut node = DirTree::new(Some(Arc::clone(&backend)));

        while entry_index != 0 && *budget > 0 {
            *budget -= 1;
            let Some(entry) = directory.entry(entry_index) else {
                break;
            };
            let name = directory.name(entry.name_offset);

            if entry.is_folder() {
                let child = self.scan_directory(directory, entry.first_index, files, budget);
                node.children.insert(name.to_ascii_lowercase(), child);
            } else {
                let first_block_index = directory
                    .dir_map
                    .get(entry_index as usize)
                    .copied()
                    .unwrap_or(0);
                let file_id = files.len() as u32;
                files.push(GcfFileRecord {
                    size: entry.item_size,
                    block_entry_index: first_block_index,
                });
                backend.add_file(&name, first_block_index, entry.item_size, file_id);
            }

            entry_index = entry.next_index;
        }

        node
    }
}

impl Package for GcfPackage {
    fn scan(&self) -> Result<usize> {
        match self.parse() {
            Ok(count) => Ok(count),
            Err(err) => {
                warn!("gcf package {}: {err}", self.state.path.display());
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

fn read_block(file: &mut File, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// File handle over a GCF entry whose bytes are scattered across chained
/// data blocks.
pub struct GcfFile {
    state: Arc<GcfState>,
    file: File,
    size: u32,
    block_size: u32,
    block_count: u32,
    first_block_offset: u32,
    first_data_block_index: u32,
    /// Logical position within the entry.
    file_pointer: u32,
    /// Physical block containing `file_pointer`.
    block_num: u32,
    /// Offset of `file_pointer` within that block.
    block_offset: u32,
    /// Bytes left in the current block.
    block_avail: u32,
    count: usize,
    fail: bool,
}

impl GcfFile {
    fn open(state: Arc<GcfState>, file_id: u32, mode: Mode) -> Result<Self> {
        let record = state
            .file_record(file_id)
            .ok_or_else(|| VfsError::NotFound(format!("gcf file id {file_id}")))?;

        let mut file = File::open(&state.path)?;

        // The directory map points at a block entry; its fourth field is
        // the first data block of the chain.
        let entry_offset = GcfHeader::SIZE as u64
            + GcfBlockEntryHeader::SIZE as u64
            + GcfBlockEntry::SIZE as u64 * record.block_entry_index as u64;
        file.seek(SeekFrom::Start(entry_offset))?;
        let mut entry_buf = [0u8; GcfBlockEntry::SIZE];
        file.read_exact(&mut entry_buf)?;
        let block_entry = GcfBlockEntry::from_bytes(&entry_buf);

        let mut handle = GcfFile {
            block_size: state.block_size(),
            block_count: state.block_count(),
            first_block_offset: state.first_block_offset(),
            first_data_block_index: block_entry.first_data_block_index,
            state,
            file,
            size: record.size,
            file_pointer: if mode.contains(Mode::AT_END) {
                record.size
            } else {
                0
            },
            block_num: 0,
            block_offset: 0,
            block_avail: 0,
            count: 0,
            fail: false,
        };
        handle.update_block_info();
        Ok(handle)
    }

    /// Recompute the block position from the logical file pointer by
    /// walking the frag chain.
    fn update_block_info(&mut self) {
        self.block_num = self
            .state
            .block_index(self.first_data_block_index, self.file_pointer);
        self.block_offset = self.file_pointer % self.block_size.max(1);
        self.block_avail = if self.block_num >= self.block_count {
            0
        } else {
            self.block_size - self.block_offset
        };
    }

    fn advance_block(&mut self) {
        self.block_num = self.state.next_block(self.block_num);
        self.block_avail = if self.block_num >= self.block_count {
            0
        } else {
            self.block_size
        };
        self.block_offset = 0;
    }

    fn data_offset(&self) -> u64 {
        self.first_block_offset as u64
            + self.block_num as u64 * self.block_size as u64
            + self.block_offset as u64
    }
}

impl VfsFile for GcfFile {
    fn get(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        if self.read(&mut byte) == 1 {
            Some(byte[0])
        } else {
            None
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.is_eof() || self.fail {
            self.count = 0;
            return 0;
        }

        let available = (self.size - self.file_pointer) as usize;
        let mut remaining = buf.len().min(available);
        let mut total = 0;

        while remaining > 0 {
            let chunk = (self.block_avail as usize).min(remaining);
            if chunk == 0 {
                break;
            }
            let offset = self.data_offset();
            let read = match self
                .file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| self.file.read(&mut buf[total..total + chunk]))
            {
                Ok(n) => n,
                Err(_) => {
                    self.fail = true;
                    break;
                }
            };
            if read == 0 {
                self.fail = true;
                break;
            }

            total += read;
            remaining -= read;
            self.file_pointer += read as u32;
            self.block_offset += read as u32;
            self.block_avail -= read as u32;

            if self.block_avail == 0 {
                self.advance_block();
            }
        }

        self.count = total;
        total
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
        let size = self.size as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.file_pointer as i64 + offset,
            SeekFrom::End(offset) => size + offset,
        };
        self.file_pointer = target.clamp(0, size) as u32;
        self.update_block_info();
    }

    fn tell(&mut self) -> u64 {
        self.file_pointer as u64
    }

    fn is_fail(&self) -> bool {
        self.fail
    }

    fn is_eof(&self) -> bool {
        self.file_pointer >= self.size
    }

    fn last_read(&self) -> usize {
        self.count
    }

    fn size(&mut self) -> u64 {
        self.size as u64
    }
}

/// Factory recognizing `.gcf` archives.
pub struct GcfFactory;

impl PackageFactory for GcfFactory {
    fn name(&self) -> &str {
        "GCF"
    }

    fn description(&self) -> &str {
        "Valve GCF (Game Cache File)"
    }

    fn file_types(&self) -> Vec<String> {
        vec!["gcf".to_string()]
    }

    fn is_supported(&self, path: &str) -> bool {
        path.rsplit('.')
            .next()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gcf"))
            && path.contains('.')
    }

    fn create_package(&self, path: &str) -> PackageRef {
        Arc::new(GcfPackage::new(path))
    }
}
