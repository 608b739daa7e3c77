//! GCF package scenarios: fragmented chains, directory trees, corruption

use std::fs;
use std::path::Path;
use std::sync::Arc;

use stratafs::{GcfFactory, Mode, SeekFrom, Vfs};
use tempfile::TempDir;

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

struct DirEntry {
    name_offset: u32,
    item_size: u32,
    directory_type: u32,
    next_index: u32,
    first_index: u32,
}

/// Assembles a minimal format-version-6 archive the scanner accepts:
/// header, block entries, frag map, directory block, directory map,
/// checksum block, data-block header, data blocks.
struct GcfBuilder {
    block_size: u32,
    frag_map: Vec<u32>,
    blocks: Vec<Vec<u8>>,
    /// first_data_block_index per block entry.
    block_entries: Vec<u32>,
    dir_entries: Vec<DirEntry>,
    names: Vec<u8>,
    /// block-entry index per directory item (files only).
    dir_map: Vec<u32>,
}

impl GcfBuilder {
    fn new(block_size: u32, frag_map: Vec<u32>) -> Self {
        GcfBuilder {
            block_size,
            frag_map,
            blocks: Vec::new(),
            block_entries: Vec::new(),
            dir_entries: Vec::new(),
            names: Vec::new(),
            dir_map: Vec::new(),
        }
    }

    fn add_block(&mut self, content: &[u8]) {
        let mut block = content.to_vec();
        block.resize(self.block_size as usize, 0);
        self.blocks.push(block);
    }

    /// Register a name in the packed blob, returning its offset.
    fn add_name(&mut self, name: &str) -> u32 {
        let offset = self.names.len() as u32;
        self.names.extend_from_slice(name.as_bytes());
        self.names.push(0);
        offset
    }

    fn add_folder(&mut self, name: &str, next_index: u32, first_index: u32) {
        let name_offset = self.add_name(name);
        self.dir_entries.push(DirEntry {
            name_offset,
            item_size: 0,
            directory_type: 0,
            next_index,
            first_index,
        });
        self.dir_map.push(0);
    }

    fn add_file(&mut self, name: &str, size: u32, first_data_block: u32, next_index: u32) {
        let name_offset = self.add_name(name);
        let block_entry_index = self.block_entries.len() as u32;
        self.block_entries.push(first_data_block);
        self.dir_entries.push(DirEntry {
            name_offset,
            item_size: size,
            directory_type: 0x4000,
            next_index,
            first_index: 0,
        });
        self.dir_map.push(block_entry_index);
    }

    fn finish(self) -> Vec<u8> {
        let block_count = self.frag_map.len() as u32;
        let item_count = self.dir_entries.len() as u32;
        let n_block_entries = self.block_entries.len() as u32;
        let directory_size = 56 + 28 * item_count + self.names.len() as u32;

        let mut data = Vec::new();

        // Header; the file size is patched in at the end.
        data.extend(u32s(&[1, 1, 6, 0xBEEF, 1, 0, 0, 0, self.block_size, block_count, 0]));

        // Block-entry table.
        data.extend(u32s(&[n_block_entries, n_block_entries, 0, 0, 0, 0, 0, 0]));
        for (index, first_block) in self.block_entries.iter().enumerate() {
            data.extend(u32s(&[0x200F_8000, 0, 0, *first_block, 0, 0, index as u32]));
        }

        // Fragmentation map.
        data.extend(u32s(&[block_count, 0, 0, 0]));
        data.extend(u32s(&self.frag_map));

        // Directory block: header, entries, packed names.
        data.extend(u32s(&[
            4,
            0xBEEF,
            1,
            item_count,
            n_block_entries,
            0x8000,
            directory_size,
            self.names.len() as u32,
            0,
            0,
            0,
            0,
            0,
            0,
        ]));
        for entry in &self.dir_entries {
            data.extend(u32s(&[
                entry.name_offset,
                entry.item_size,
                0xFFFF_FFFF,
                entry.directory_type,
                0xFFFF_FFFF,
                entry.next_index,
                entry.first_index,
            ]));
        }
        data.extend_from_slice(&self.names);

        // Directory map.
        data.extend(u32s(&[1, 0]));
        data.extend(u32s(&self.dir_map));

        // Checksum block: header plus an empty map.
        data.extend(u32s(&[1, 16]));
        data.extend(u32s(&[0x1489_3721, 1, 0, 0]));

        // Data-block header and the blocks themselves.
        let first_block_offset = data.len() as u32 + 24;
        data.extend(u32s(&[
            1,
            block_count,
            self.block_size,
            first_block_offset,
            block_count,
            0,
        ]));
        for block in &self.blocks {
            data.extend_from_slice(block);
        }

        // Patch the header's total file size.
        let file_size = data.len() as u32;
        data[28..32].copy_from_slice(&file_size.to_le_bytes());
        data
    }
}

/// Fixture: `data.bin` (10 bytes, chain 0 → 2 → 1) in the root and
/// `maps/level.dat` (4 bytes, block 3) in a subfolder, over the frag map
/// `[2, 3, 1, END]` with 4-byte blocks.
fn fragmented_fixture() -> Vec<u8> {
    let mut builder = GcfBuilder::new(4, vec![2, 3, 1, 0xFFFF_FFFF]);
    builder.add_block(b"ABCD"); // block 0: data.bin bytes 0..4
    builder.add_block(b"IJ"); // block 1: data.bin bytes 8..10
    builder.add_block(b"EFGH"); // block 2: data.bin bytes 4..8
    builder.add_block(b"WXYZ"); // block 3: level.dat

    // Entry 0 is the root folder; its children start at entry 1.
    builder.add_folder("root", 0, 1);
    builder.add_file("data.bin", 10, 0, 2);
    builder.add_folder("Maps", 0, 3);
    builder.add_file("Level.DAT", 4, 3, 0);
    builder.finish()
}

fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> String {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path.to_str().unwrap().to_string()
}

fn mounted_vfs(dir: &Path, archive_name: &str, bytes: &[u8]) -> Vfs {
    let archive = write_archive(dir, archive_name, bytes);
    let mut vfs = Vfs::new();
    vfs.register_package_factory(Arc::new(GcfFactory));
    vfs.mount(&archive, "/game").unwrap();
    vfs
}

#[test]
fn sequential_read_follows_the_frag_chain() {
    let temp = TempDir::new().unwrap();
    let vfs = mounted_vfs(temp.path(), "cache.gcf", &fragmented_fixture());

    let mut file = vfs.openfile("/game/data.bin", Mode::READ).unwrap();
    assert_eq!(file.size(), 10);

    let mut buf = [0u8; 16];
    assert_eq!(file.read(&mut buf), 10);
    assert_eq!(&buf[..10], b"ABCDEFGHIJ");
    assert!(file.is_eof());
}

#[test]
fn seek_lands_mid_chain() {
    let temp = TempDir::new().unwrap();
    let vfs = mounted_vfs(temp.path(), "cache.gcf", &fragmented_fixture());

    let mut file = vfs.openfile("/game/data.bin", Mode::READ).unwrap();
    file.seek(SeekFrom::Start(6));
    let mut buf = [0u8; 2];
    assert_eq!(file.read(&mut buf), 2);
    assert_eq!(&buf, b"GH");
    assert_eq!(file.tell(), 8);

    // Continue across the block boundary.
    assert_eq!(file.get(), Some(b'I'));
    assert_eq!(file.get(), Some(b'J'));
    assert_eq!(file.get(), None);
}

#[test]
fn relative_and_end_seeks() {
    let temp = TempDir::new().unwrap();
    let vfs = mounted_vfs(temp.path(), "cache.gcf", &fragmented_fixture());

    let mut file = vfs.openfile("/game/data.bin", Mode::READ).unwrap();
    file.seek(SeekFrom::End(-1));
    assert_eq!(file.tell(), 9);
    assert_eq!(file.get(), Some(b'J'));

    file.seek(SeekFrom::Start(5));
    file.seek(SeekFrom::Current(-3));
    assert_eq!(file.tell(), 2);
    assert_eq!(file.get(), Some(b'C'));
}

#[test]
fn subfolders_mount_case_insensitively() {
    let temp = TempDir::new().unwrap();
    let vfs = mounted_vfs(temp.path(), "cache.gcf", &fragmented_fixture());

    assert_eq!(vfs.load("/game/maps/level.dat"), b"WXYZ");
    assert_eq!(vfs.load("/GAME/MAPS/LEVEL.DAT"), b"WXYZ");
}

#[test]
fn writes_are_silently_discarded() {
    let temp = TempDir::new().unwrap();
    let vfs = mounted_vfs(temp.path(), "cache.gcf", &fragmented_fixture());

    // Writable open modes never resolve on a read-only package.
    assert!(vfs.openfile("/game/data.bin", Mode::WRITE).is_none());
    assert!(vfs
        .openfile("/game/data.bin", Mode::READ | Mode::APPEND)
        .is_none());

    // The write capability on a read handle is a no-op.
    let mut file = vfs.openfile("/game/data.bin", Mode::READ).unwrap();
    assert_eq!(file.write(b"junk"), 0);
    let mut buf = [0u8; 4];
    assert_eq!(file.read(&mut buf), 4);
    assert_eq!(&buf, b"ABCD");
}

#[test]
fn ignore_skips_bytes_and_delimiters() {
    let temp = TempDir::new().unwrap();
    let vfs = mounted_vfs(temp.path(), "cache.gcf", &fragmented_fixture());

    let mut file = vfs.openfile("/game/data.bin", Mode::READ).unwrap();
    file.ignore(6, None);
    assert_eq!(file.get(), Some(b'G'));

    file.seek(SeekFrom::Start(0));
    file.ignore(100, Some(b'E'));
    assert_eq!(file.get(), Some(b'F'));
}

#[test]
fn header_size_mismatch_scans_empty() {
    let temp = TempDir::new().unwrap();
    let mut bytes = fragmented_fixture();
    // Truncating breaks the header's recorded file size.
    bytes.pop();
    let archive = write_archive(temp.path(), "bad.gcf", &bytes);

    let mut vfs = Vfs::new();
    vfs.register_package_factory(Arc::new(GcfFactory));
    vfs.mount(&archive, "/game").unwrap();
    assert!(vfs.openfile("/game/data.bin", Mode::READ).is_none());
}

#[test]
fn undersized_archive_scans_empty() {
    let temp = TempDir::new().unwrap();
    let archive = write_archive(temp.path(), "tiny.gcf", &[0u8; 10]);

    let mut vfs = Vfs::new();
    vfs.register_package_factory(Arc::new(GcfFactory));
    vfs.mount(&archive, "/game").unwrap();

    let mut out = Vec::new();
    vfs.write_tree(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    // The mountpoint exists but lists nothing.
    assert!(text.contains("+=[game]"));
    assert!(!text.contains("| |  "));
}

#[test]
fn at_end_open_positions_at_size() {
    let temp = TempDir::new().unwrap();
    let vfs = mounted_vfs(temp.path(), "cache.gcf", &fragmented_fixture());

    let mut file = vfs
        .openfile("/game/data.bin", Mode::READ | Mode::AT_END)
        .unwrap();
    assert_eq!(file.tell(), 10);
    assert!(file.is_eof());

    file.seek(SeekFrom::Start(0));
    assert_eq!(file.get(), Some(b'A'));
}
