//! Data file I/O.
//!
//! The engine assumes plain OS threads, so page I/O is synchronous
//! positional reads and writes against a single data file. The file handle
//! is wrapped in a mutex; a page read or write seeks and transfers under
//! that lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use grove_common::error::GroveResult;
use grove_common::types::PhysicalPageId;
use parking_lot::Mutex;

/// A page-granular data file.
///
/// Pages live at `page_id * page_size`. The page space only ever grows;
/// writing past the current end extends the file.
pub struct DataFile {
    file: Mutex<File>,
    path: PathBuf,
    page_size: usize,
}

impl DataFile {
    /// Opens (creating if necessary) a data file.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> GroveResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
            page_size,
        })
    }

    /// Returns the file path.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the page size this file was opened with.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Reads one full page into `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not exactly one page long.
    pub fn read_page(&self, page_id: PhysicalPageId, buf: &mut [u8]) -> GroveResult<()> {
        assert_eq!(buf.len(), self.page_size, "buffer must be one page");
        let offset = page_id.as_u64() * self.page_size as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes one full page from `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is not exactly one page long.
    pub fn write_page(&self, page_id: PhysicalPageId, buf: &[u8]) -> GroveResult<()> {
        assert_eq!(buf.len(), self.page_size, "buffer must be one page");
        let offset = page_id.as_u64() * self.page_size as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Flushes file contents and metadata to stable storage.
    pub fn sync(&self) -> GroveResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    /// Returns the current file size in bytes.
    pub fn size(&self) -> GroveResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .finish()
    }
}
