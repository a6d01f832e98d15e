//! Locked access to the per-source JSON documents.
//!
//! Readers take a shared advisory lock, writers an exclusive one. Locks are
//! held by a guard that releases them when dropped, so every early return
//! unlocks the file.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::types::{Document, DocumentError};

/// Whether a lock attempt may wait for a conflicting holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Blocking,
    NonBlocking,
}

/// Holds an advisory lock on `file` until dropped.
#[derive(Debug)]
pub struct DocumentLock<'a> {
    file: &'a File,
}

impl Drop for DocumentLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file) {
            tracing::warn!(error = %e, "Failed to release document lock");
        }
    }
}

fn contention(e: std::io::Error) -> DocumentError {
    if e.kind() == ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
    {
        DocumentError::Contended
    } else {
        DocumentError::Io(e)
    }
}

pub fn lock_shared(file: &File, mode: LockMode) -> Result<DocumentLock<'_>, DocumentError> {
    match mode {
        LockMode::Blocking => FileExt::lock_shared(file).map_err(DocumentError::Io)?,
        LockMode::NonBlocking => FileExt::try_lock_shared(file).map_err(contention)?,
    }
    Ok(DocumentLock { file })
}

/// Exclusive locks are never waited for.
pub fn lock_exclusive(file: &File) -> Result<DocumentLock<'_>, DocumentError> {
    FileExt::try_lock_exclusive(file).map_err(contention)?;
    Ok(DocumentLock { file })
}

fn read_document(mut file: &File) -> Result<Option<Document>, DocumentError> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut content)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&content)?))
}

fn write_document(mut file: &File, doc: &Document) -> Result<(), DocumentError> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&bytes)?;
    file.sync_data()?;
    Ok(())
}

/// Reads the document under a shared lock.
pub fn read_shared(path: &Path, mode: LockMode) -> Result<Document, DocumentError> {
    let file = File::open(path)?;
    let _lock = lock_shared(&file, mode)?;
    read_document(&file)?.ok_or_else(|| {
        DocumentError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "document is empty",
        ))
    })
}

/// Truncates and overwrites the document under a non-blocking exclusive lock.
pub fn write_exclusive(path: &Path, doc: &Document) -> Result<(), DocumentError> {
    // No truncate on open: the file must not be emptied before the lock is held.
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    let _lock = lock_exclusive(&file)?;
    write_document(&file, doc)
}

/// Read-modify-write under a single exclusive lock.
///
/// A missing or empty file starts from `Document::empty(url)`. Returns the
/// document as written.
pub fn update_exclusive<F>(path: &Path, url: &str, f: F) -> Result<Document, DocumentError>
where
    F: FnOnce(&mut Document),
{
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    let _lock = lock_exclusive(&file)?;
    let mut doc = read_document(&file)?.unwrap_or_else(|| Document::empty(url));
    f(&mut doc);
    write_document(&file, &doc)?;
    Ok(doc)
}

/// Creates an empty document for `url` if none exists yet.
pub fn ensure_exists(path: &Path, url: &str) -> Result<bool, DocumentError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => {
            write_exclusive(path, &Document::empty(url))?;
            tracing::info!(path = %path.display(), "Created empty feed document");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(DocumentError::Io(e)),
    }
}
