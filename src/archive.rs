//! Archive access
//!
//! [ArchiveIndex] wraps an opened ZIP archive and knows nothing about EPUB.
//! The name → entry index is built once when the archive is opened, after which
//! entries are looked up in constant time and read into memory in one call.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read, Seek},
    path::Path,
};

use zip::{ZipArchive, result::ZipError};

use crate::error::EpubError;

/// Metadata of a single archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// The entry name, unique within the archive
    pub name: String,

    /// Uncompressed size in bytes, as declared by the central directory
    pub size: u64,

    /// Compressed size in bytes
    pub compressed_size: u64,

    /// Position of the entry in the central directory, used to open it
    pub(crate) index: usize,
}

/// Named-entry view over an opened ZIP archive
///
/// The archive reader is held until [close](ArchiveIndex::close) is called or the
/// index is dropped. After closing, the entry table is discarded and every read
/// fails with [EpubError::ArchiveClosed].
pub struct ArchiveIndex<R: Read + Seek> {
    /// The logical name of the archive, used in every error
    name: String,

    archive: Option<ZipArchive<R>>,

    entries: HashMap<String, ArchiveEntry>,

    /// Upper bound on the decompressed size of a single read
    max_entry_size: Option<u64>,
}

impl ArchiveIndex<BufReader<File>> {
    /// Opens the archive at `path`
    ///
    /// The path, as given, becomes the logical name of the archive.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EpubError> {
        let name = path.as_ref().to_string_lossy().to_string();
        let file = File::open(&path).map_err(|source| EpubError::IOError {
            epub: name.clone(),
            path: None,
            source,
        })?;

        Self::from_reader(BufReader::new(file), name)
    }
}

impl<R: Read + Seek> ArchiveIndex<R> {
    /// Opens an archive from any seekable byte source
    ///
    /// # Parameters
    /// - `reader`: The byte source, usually a file or an in-memory cursor
    /// - `name`: The logical name of the archive, reported in errors
    ///
    /// # Return
    /// - `Ok(ArchiveIndex)`: The opened archive with its entry table
    /// - `Err(EpubError)`: `NotAnArchive` if the source is not a zip container,
    ///   `IOError` if reading the source failed
    pub fn from_reader(reader: R, name: impl Into<String>) -> Result<Self, EpubError> {
        let name = name.into();
        let mut archive = ZipArchive::new(reader).map_err(|err| match err {
            ZipError::Io(source) => EpubError::IOError {
                epub: name.clone(),
                path: None,
                source,
            },
            source => EpubError::NotAnArchive {
                epub: name.clone(),
                source,
            },
        })?;

        let mut entries = HashMap::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive
                .by_index_raw(index)
                .map_err(|source| EpubError::NotAnArchive {
                    epub: name.clone(),
                    source,
                })?;

            // Directories are not readable entries
            if file.is_dir() {
                continue;
            }

            let entry = ArchiveEntry {
                name: file.name().to_string(),
                size: file.size(),
                compressed_size: file.compressed_size(),
                index,
            };
            entries.insert(entry.name.clone(), entry);
        }

        Ok(Self {
            name,
            archive: Some(archive),
            entries,
            max_entry_size: None,
        })
    }

    /// Sets the upper bound on the decompressed size of a single read
    pub fn set_max_entry_size(&mut self, limit: Option<u64>) {
        self.max_entry_size = limit;
    }

    /// Returns the logical name of the archive
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up an entry by name
    pub fn lookup(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.get(name)
    }

    /// Checks whether an entry with the given name exists
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Returns the entries of the archive, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.archive.is_none()
    }

    /// Reads an entry to completion
    ///
    /// # Return
    /// - `Ok(Vec<u8>)`: The decompressed content of the entry
    /// - `Err(EpubError)`: `EntryNotFound` if there is no such entry, `ArchiveClosed`
    ///   after [close](ArchiveIndex::close), `EntryTooLarge` if the read limit is
    ///   exceeded, otherwise the zip or io error of the underlying read
    pub fn read_all(&mut self, name: &str) -> Result<Vec<u8>, EpubError> {
        let archive = self
            .archive
            .as_mut()
            .ok_or_else(|| EpubError::ArchiveClosed {
                epub: self.name.clone(),
            })?;

        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| EpubError::EntryNotFound {
                epub: self.name.clone(),
                path: name.to_string(),
            })?;

        if let Some(limit) = self.max_entry_size {
            if entry.size > limit {
                return Err(EpubError::EntryTooLarge {
                    epub: self.name.clone(),
                    path: name.to_string(),
                    limit,
                });
            }
        }

        let mut file = archive
            .by_index(entry.index)
            .map_err(|source| EpubError::ArchiveError {
                epub: self.name.clone(),
                path: name.to_string(),
                source,
            })?;

        let mut buffer = Vec::new();
        let read = match self.max_entry_size {
            // The declared size may lie, so never read more than one byte past the limit
            Some(limit) => file.take(limit.saturating_add(1)).read_to_end(&mut buffer),
            None => file.read_to_end(&mut buffer),
        };
        read.map_err(|source| EpubError::IOError {
            epub: self.name.clone(),
            path: Some(name.to_string()),
            source,
        })?;

        if let Some(limit) = self.max_entry_size {
            if buffer.len() as u64 > limit {
                return Err(EpubError::EntryTooLarge {
                    epub: self.name.clone(),
                    path: name.to_string(),
                    limit,
                });
            }
        }

        Ok(buffer)
    }

    /// Releases the underlying reader
    ///
    /// Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.archive.take().is_some() {
            self.entries.clear();
        }
    }
}
