//! Memory-backed file handle

use std::io::SeekFrom;

use crate::file::VfsFile;
use crate::types::Mode;

/// File handle over an owned byte buffer.
///
/// Used for scratch buffers and for decompressed archive entries (a
/// deflated ZIP entry is materialized into one of these at open time).
pub struct MemoryFile {
    data: Vec<u8>,
    mode: Mode,
    position: u64,
    count: usize,
    fail: bool,
}

impl MemoryFile {
    /// Create an empty buffer with the given mode.
    pub fn new(mode: Mode) -> Self {
        MemoryFile {
            data: Vec::new(),
            mode,
            position: 0,
            count: 0,
            fail: false,
        }
    }

    /// Create a buffer seeded with `data`.
    ///
    /// TRUNCATE discards the seed; APPEND and AT_END position at the end.
    pub fn from_bytes(mode: Mode, data: Vec<u8>) -> Self {
        let mut file = MemoryFile::new(mode);
        if !mode.contains(Mode::TRUNCATE) {
            file.data = data;
            if mode.intersects(Mode::APPEND | Mode::AT_END) {
                file.position = file.data.len() as u64;
            }
        }
        file
    }

    /// Borrow the underlying buffer.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Resize the underlying buffer, zero-filling any growth.
    pub fn resize(&mut self, size: usize) {
        self.data.resize(size, 0);
    }

    fn clamp(&self, pos: i64) -> u64 {
        pos.clamp(0, self.data.len() as i64) as u64
    }
}

impl VfsFile for MemoryFile {
    fn get(&mut self) -> Option<u8> {
        let pos = self.position as usize;
        if pos >= self.data.len() {
            self.count = 0;
            return None;
        }
        let value = self.data[pos];
        self.position += 1;
        self.count = 1;
        Some(value)
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let pos = self.position as usize;
        if buf.is_empty() || !self.mode.contains(Mode::READ) || pos >= self.data.len() {
            self.count = 0;
            return 0;
        }
        let n = buf.len().min(self.data.len() - pos);
        buf[..n].copy_from_slice(&self.data[pos..pos + n]);
        self.position += n as u64;
        self.count = n;
        n
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() || !self.mode.contains(Mode::WRITE) {
            return 0;
        }
        if self.position > self.data.len() as u64 {
            self.position = self.data.len() as u64;
        }
        let pos = self.position as usize;
        let end = pos + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[pos..end].copy_from_slice(data);
        self.position = end as u64;
        data.len()
    }

    fn ignore(&mut self, count: usize, delimiter: Option<u8>) {
        let mut remaining = count;
        while remaining > 0 && (self.position as usize) < self.data.len() {
            let byte = self.data[self.position as usize];
            self.position += 1;
            remaining -= 1;
            if delimiter == Some(byte) {
                break;
            }
        }
    }

    fn seek(&mut self, pos: SeekFrom) {
        self.position = match pos {
            SeekFrom::Start(offset) => self.clamp(offset as i64),
            SeekFrom::Current(offset) => self.clamp(self.position as i64 + offset),
            SeekFrom::End(offset) => self.clamp(self.data.len() as i64 + offset),
        };
    }

    fn tell(&mut self) -> u64 {
        self.position
    }

    fn is_fail(&self) -> bool {
        self.fail
    }

    fn is_eof(&self) -> bool {
        self.position >= self.data.len() as u64
    }

    fn last_read(&self) -> usize {
        self.count
    }

    fn size(&mut self) -> u64 {
        self.data.len() as u64
    }
}
