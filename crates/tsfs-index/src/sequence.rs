//! Persisted monotonic counter.
//!
//! The value lives in a small file as an 8-byte big-endian integer. An
//! in-process mutex serializes threads and an exclusive `flock` serializes
//! processes sharing the file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

use crate::{IndexError, Result};

#[derive(Debug)]
pub struct Sequence {
    path: PathBuf,
    file: Mutex<File>,
}

impl Sequence {
    /// Open the counter at `path`, starting at zero if the file is new.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the current value and persist its successor.
    pub fn next(&self) -> Result<u64> {
        self.with_locked_file(|file| {
            let value = read_value(file)?;
            let successor = value
                .checked_add(1)
                .ok_or_else(|| IndexError::Corrupted("sequence exhausted".into()))?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&successor.to_be_bytes())?;
            file.sync_data()?;
            Ok(value)
        })
    }

    /// The value the next call to [`next`](Self::next) will return.
    pub fn current(&self) -> Result<u64> {
        self.with_locked_file(read_value)
    }

    pub fn close(&self) -> Result<()> {
        let file = self.file.lock().map_err(|_| IndexError::LockPoisoned)?;
        file.sync_all()?;
        Ok(())
    }

    fn with_locked_file<T>(&self, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        let mut file = self.file.lock().map_err(|_| IndexError::LockPoisoned)?;
        file.lock_exclusive()?;
        let result = f(&mut *file);
        let unlocked = FileExt::unlock(&*file);
        let value = result?;
        unlocked?;
        Ok(value)
    }
}

fn read_value(file: &mut File) -> Result<u64> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::with_capacity(8);
    file.read_to_end(&mut buf)?;
    match buf.len() {
        0 => Ok(0),
        8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf);
            Ok(u64::from_be_bytes(bytes))
        }
        n => Err(IndexError::Corrupted(format!(
            "sequence file holds {} bytes, expected 8",
            n
        ))),
    }
}
