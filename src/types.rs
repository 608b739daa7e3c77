//! Open modes, file attributes and seek origins
//!
//! Modes and attributes are carried as bitmasks: a file handle is opened
//! with a [`Mode`], and directories/files report a [`FileAttr`].
//! Resolution derives the attributes a backend must satisfy from the
//! requested open mode. Seeking uses the standard [`SeekFrom`] origins.

use bitflags::bitflags;

pub use std::io::SeekFrom;

bitflags! {
    /// Open mode requested by the caller
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mode: u32 {
        const READ     = 1 << 0;
        const WRITE    = 1 << 1;
        const APPEND   = 1 << 2;
        const AT_END   = 1 << 3;
        const TRUNCATE = 1 << 4;
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::READ
    }
}

impl Mode {
    /// Attributes a directory backend must carry to satisfy this mode.
    ///
    /// READ maps to [`FileAttr::READ`], WRITE to [`FileAttr::WRITE`];
    /// both may be set. APPEND/AT_END/TRUNCATE impose no extra demand
    /// at resolution time.
    pub fn required_attributes(self) -> FileAttr {
        let mut attr = FileAttr::empty();
        if self.contains(Mode::READ) {
            attr |= FileAttr::READ;
        }
        if self.contains(Mode::WRITE) {
            attr |= FileAttr::WRITE;
        }
        attr
    }

    /// True if any writable bit is set.
    pub fn wants_write(self) -> bool {
        self.intersects(Mode::WRITE | Mode::APPEND)
    }
}

bitflags! {
    /// Attributes of a file or directory backend
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttr: u16 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        const RANDOM = 1 << 2;
        const DIR    = 1 << 3;
    }
}
