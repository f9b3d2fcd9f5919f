//! Backing store interface.
//!
//! The memory manager reads executables and keeps swap regions through these traits. The
//! file system itself lives elsewhere; [`MemFileSystem`] is an in-memory implementation
//! for hosts and tests.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;
use thiserror::Error;

/// Errors reported by the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A read returned fewer bytes than requested.
    #[error("short read at offset {offset}: wanted {expected} bytes, got {actual}")]
    ShortRead {
        offset: usize,
        expected: usize,
        actual: usize,
    },
    /// A write transferred fewer bytes than requested.
    #[error("short write at offset {offset}: wanted {expected} bytes, wrote {actual}")]
    ShortWrite {
        offset: usize,
        expected: usize,
        actual: usize,
    },
    /// A file with this name already exists.
    #[error("file {0} already exists")]
    AlreadyExists(String),
    /// No file with this name exists.
    #[error("file {0} not found")]
    NotFound(String),
}

/// An open file with positional reads and writes.
///
/// A transfer that returns fewer bytes than requested means the request ran past the end of
/// the file. It is never a silent partial success: callers that need the whole range use
/// [`read_exact_at`](OpenFile::read_exact_at) and [`write_all_at`](OpenFile::write_all_at).
pub trait OpenFile {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the number read.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize;

    /// Writes up to `buf.len()` bytes starting at `offset`, returning the number written.
    fn write_at(&mut self, buf: &[u8], offset: usize) -> usize;

    /// Returns the file length in bytes.
    fn length(&self) -> usize;

    /// Fills `buf` from `offset`, failing on a short transfer.
    fn read_exact_at(&self, buf: &mut [u8], offset: usize) -> Result<(), StoreError> {
        let actual = self.read_at(buf, offset);
        if actual != buf.len() {
            return Err(StoreError::ShortRead {
                offset,
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Writes all of `buf` at `offset`, failing on a short transfer.
    fn write_all_at(&mut self, buf: &[u8], offset: usize) -> Result<(), StoreError> {
        let actual = self.write_at(buf, offset);
        if actual != buf.len() {
            return Err(StoreError::ShortWrite {
                offset,
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }
}

/// A flat namespace of fixed-size files.
pub trait FileSystem {
    /// Handle type returned by [`open`](FileSystem::open).
    type File: OpenFile;

    /// Creates a zero-filled file of `size` bytes.
    fn create(&mut self, name: &str, size: usize) -> Result<(), StoreError>;

    /// Opens an existing file.
    fn open(&self, name: &str) -> Option<Self::File>;

    /// Deletes a file, returning true if it existed.
    fn remove(&mut self, name: &str) -> bool;
}

/// In-memory file. Clones share the same contents, like two open handles on one file.
#[derive(Debug, Clone, Default)]
pub struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemFile {
    /// Creates a zero-filled file of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    /// Wraps existing contents, e.g. an executable image.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(bytes)),
        }
    }

    /// Returns a copy of the file contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl OpenFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let count = buf.len().min(data.len() - offset);
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        count
    }

    fn write_at(&mut self, buf: &[u8], offset: usize) -> usize {
        let mut data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let count = buf.len().min(data.len() - offset);
        data[offset..offset + count].copy_from_slice(&buf[..count]);
        count
    }

    fn length(&self) -> usize {
        self.data.lock().len()
    }
}

/// In-memory [`FileSystem`].
#[derive(Debug, Default)]
pub struct MemFileSystem {
    files: BTreeMap<String, MemFile>,
}

impl MemFileSystem {
    /// Creates an empty file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given contents, replacing any file of the same name.
    pub fn insert(&mut self, name: &str, bytes: Vec<u8>) {
        self.files.insert(name.to_string(), MemFile::from_bytes(bytes));
    }

    /// Returns true if a file with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Returns the number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if there are no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileSystem for MemFileSystem {
    type File = MemFile;

    fn create(&mut self, name: &str, size: usize) -> Result<(), StoreError> {
        if self.files.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        self.files.insert(name.to_string(), MemFile::with_size(size));
        Ok(())
    }

    fn open(&self, name: &str) -> Option<MemFile> {
        self.files.get(name).cloned()
    }

    fn remove(&mut self, name: &str) -> bool {
        self.files.remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_stops_at_end_of_file() {
        let file = MemFile::from_bytes(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(&mut buf, 2), 2);
        assert_eq!(&buf[..2], &[3, 4]);
        assert_eq!(file.read_at(&mut buf, 4), 0);
    }

    #[test]
    fn write_does_not_grow_file() {
        let mut file = MemFile::with_size(4);
        assert_eq!(file.write_at(&[9; 8], 1), 3);
        assert_eq!(file.to_vec(), vec![0, 9, 9, 9]);
    }

    #[test]
    fn short_transfers_are_errors() {
        let mut file = MemFile::with_size(4);
        let mut buf = [0u8; 4];
        assert_eq!(
            file.read_exact_at(&mut buf, 2),
            Err(StoreError::ShortRead {
                offset: 2,
                expected: 4,
                actual: 2
            })
        );
        assert!(matches!(
            file.write_all_at(&buf, 3),
            Err(StoreError::ShortWrite { actual: 1, .. })
        ));
        assert!(file.write_all_at(&buf, 0).is_ok());
    }

    #[test]
    fn handles_share_contents() {
        let mut fs = MemFileSystem::new();
        fs.create("SWAP.0", 16).unwrap();
        let mut writer = fs.open("SWAP.0").unwrap();
        let reader = fs.open("SWAP.0").unwrap();
        writer.write_all_at(&[5, 6], 10).unwrap();

        let mut buf = [0u8; 2];
        reader.read_exact_at(&mut buf, 10).unwrap();
        assert_eq!(buf, [5, 6]);
    }

    #[test]
    fn create_refuses_duplicates() {
        let mut fs = MemFileSystem::new();
        fs.create("a", 1).unwrap();
        assert_eq!(
            fs.create("a", 1),
            Err(StoreError::AlreadyExists("a".to_string()))
        );
        assert!(fs.remove("a"));
        assert!(!fs.remove("a"));
        assert!(fs.is_empty());
    }
}
