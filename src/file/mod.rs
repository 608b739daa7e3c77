//! File handle abstraction
//!
//! Every open file, regardless of where its bytes live, is presented as a
//! [`VfsFile`]: a stream-like read/seek surface with sticky failure and
//! end-of-stream state. The crate ships two general-purpose variants,
//! [`MemoryFile`] and [`DiskFile`]; the archive packages add their own
//! (GCF chained-block streams, ZIP stored windows).

pub mod disk;
pub mod memory;

pub use disk::DiskFile;
pub use memory::MemoryFile;

use crate::types::SeekFrom;

/// Uniform read/seek surface over an open file.
///
/// Handles are single-owner: a `Box<dyn VfsFile>` must not be shared between
/// threads while in use. Failure (`is_fail`) and end-of-stream (`is_eof`)
/// are sticky; once a read fails, subsequent reads return zero.
pub trait VfsFile: Send {
    /// Read the next byte, or `None` at end of stream.
    fn get(&mut self) -> Option<u8>;

    /// Read up to `buf.len()` bytes, returning the count actually read.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Write `data`, returning the count written. Read-only variants
    /// discard the data and return zero.
    fn write(&mut self, data: &[u8]) -> usize;

    /// Skip up to `count` bytes. With a delimiter, skipping stops after
    /// the delimiter byte has been consumed.
    fn ignore(&mut self, count: usize, delimiter: Option<u8>);

    /// Reposition the stream.
    fn seek(&mut self, pos: SeekFrom);

    /// Current logical position.
    fn tell(&mut self) -> u64;

    /// True once an I/O operation has failed.
    fn is_fail(&self) -> bool;

    /// True when the position is at or past the end of the file.
    fn is_eof(&self) -> bool;

    /// Number of bytes transferred by the last read operation.
    fn last_read(&self) -> usize;

    /// Logical size of the file in bytes.
    fn size(&mut self) -> u64;
}
