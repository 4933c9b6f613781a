//! File-backed journal.

use super::JournalBackend;
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal stored in a single file.
///
/// # Durability
///
/// - `append` writes through the OS page cache
/// - `sync` calls `File::sync_all()`
/// - `replace` writes a sibling temp file, syncs it, renames it over the
///   journal and syncs the parent directory
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileJournal {
    /// Opens or creates the journal file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = Self::open_file(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> StoreResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn sync_parent(&self) -> StoreResult<()> {
        #[cfg(unix)]
        if let Some(parent) = self.path.parent() {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }
}

impl JournalBackend for FileJournal {
    fn read_all(&self) -> StoreResult<Vec<u8>> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::with_capacity(*self.size.read() as usize);
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(*self.size.read())
    }

    fn replace(&mut self, data: &[u8]) -> StoreResult<()> {
        let temp_path = self.temp_path();
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(data)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        self.sync_parent()?;

        let reopened = Self::open_file(&self.path)?;
        *self.size.write() = reopened.metadata()?.len();
        *self.file.write() = reopened;
        Ok(())
    }
}
