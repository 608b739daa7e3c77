//! Host-file handle

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;
use crate::file::VfsFile;
use crate::types::Mode;

/// File handle wrapping a host filesystem stream.
///
/// Mode bits translate onto [`OpenOptions`]: READ opens for input, WRITE
/// for output, APPEND appends, TRUNCATE truncates, and AT_END positions
/// at the end right after opening. The stream is always binary.
pub struct DiskFile {
    file: File,
    mode: Mode,
    count: usize,
    fail: bool,
    eof: bool,
}

impl DiskFile {
    pub fn open<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(mode.contains(Mode::READ));
        if mode.contains(Mode::APPEND) {
            options.append(true);
        } else if mode.contains(Mode::WRITE) {
            options.write(true);
        }
        if mode.contains(Mode::TRUNCATE) {
            options.write(true).truncate(true);
        }

        let mut file = options.open(path)?;
        if mode.contains(Mode::AT_END) {
            file.seek(SeekFrom::End(0))?;
        }

        Ok(DiskFile {
            file,
            mode,
            count: 0,
            fail: false,
            eof: false,
        })
    }
}

impl VfsFile for DiskFile {
    fn get(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        if self.read(&mut byte) == 1 {
            Some(byte[0])
        } else {
            None
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.fail || self.eof || buf.is_empty() {
            self.count = 0;
            return 0;
        }
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => total += n,
                Err(_) => {
                    self.fail = true;
                    break;
                }
            }
        }
        self.count = total;
        total
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if !self.mode.wants_write() {
            return 0;
        }
        match self.file.write_all(data) {
            Ok(()) => data.len(),
            Err(_) => {
                self.fail = true;
                0
            }
        }
    }

    fn ignore(&mut self, count: usize, delimiter: Option<u8>) {
        match delimiter {
            None => self.seek(SeekFrom::Current(count as i64)),
            Some(delim) => {
                let mut remaining = count;
                while remaining > 0 {
                    match self.get() {
                        Some(byte) => {
                            remaining -= 1;
                            if byte == delim {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    fn seek(&mut self, pos: SeekFrom) {
        // Repositioning clears end-of-stream, matching stream semantics.
        self.eof = false;
        if self.file.seek(pos).is_err() {
            self.fail = true;
        }
    }

    fn tell(&mut self) -> u64 {
        self.file.stream_position().unwrap_or(0)
    }

    fn is_fail(&self) -> bool {
        self.fail
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn last_read(&self) -> usize {
        self.count
    }

    fn size(&mut self) -> u64 {
        self.file.metadata().map(|meta| meta.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn fixture(content: &[u8]) -> NamedTempFile {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(content).unwrap();
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn read_and_seek() {
        let temp = fixture(b"disk file content");
        let mut file = DiskFile::open(temp.path(), Mode::READ).unwrap();

        assert_eq!(file.size(), 17);

        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf), 4);
        assert_eq!(&buf, b"disk");

        file.seek(SeekFrom::Start(5));
        assert_eq!(file.read(&mut buf), 4);
        assert_eq!(&buf, b"file");
        assert_eq!(file.tell(), 9);
    }

    #[test]
    fn short_read_sets_eof() {
        let temp = fixture(b"abc");
        let mut file = DiskFile::open(temp.path(), Mode::READ).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf), 3);
        assert!(file.is_eof());
        assert_eq!(file.read(&mut buf), 0);

        // Seeking clears the end-of-stream state.
        file.seek(SeekFrom::Start(0));
        assert_eq!(file.read(&mut buf), 3);
    }

    #[test]
    fn write_denied_without_write_mode() {
        let temp = fixture(b"keep");
        let mut file = DiskFile::open(temp.path(), Mode::READ).unwrap();
        assert_eq!(file.write(b"nope"), 0);
    }

    #[test]
    fn at_end_positions_after_content() {
        let temp = fixture(b"12345");
        let mut file = DiskFile::open(temp.path(), Mode::READ | Mode::AT_END).unwrap();
        assert_eq!(file.tell(), 5);
    }

    #[test]
    fn truncate_empties_file() {
        let temp = fixture(b"soon gone");
        let mut file =
            DiskFile::open(temp.path(), Mode::READ | Mode::WRITE | Mode::TRUNCATE).unwrap();
        assert_eq!(file.size(), 0);
        file.write(b"new");
        assert_eq!(file.size(), 3);
    }

    #[test]
    fn ignore_skips_to_delimiter() {
        let temp = fixture(b"head;tail");
        let mut file = DiskFile::open(temp.path(), Mode::READ).unwrap();
        file.ignore(100, Some(b';'));
        assert_eq!(file.get(), Some(b't'));
    }
}
