//! Archive session: open, extract, close.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use crate::codec::CodecRegistry;
use crate::database::ArchiveDatabase;
use crate::format::header::locate_start_header;
use crate::format::parser::read_archive_header;
use crate::format::streams::ResourceLimits;
use crate::{Error, Result};

use super::callback::{ExtractCallback, OperationResult};
use super::decoder::{DecodeOutcome, FolderDecoder};
use super::entry::Entry;
use super::folder_out::FolderOutStream;

/// Options for [`Handler::open_with_options`].
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Limits applied while parsing and decoding.
    pub limits: ResourceLimits,
    /// Search the first N bytes for the signature (archives behind a stub).
    ///
    /// `None` requires the signature at the current stream position.
    pub max_check_start_position: Option<u64>,
}

impl OpenOptions {
    /// Creates default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resource limits.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Enables the signature search over the first `max` bytes.
    pub fn max_check_start_position(mut self, max: u64) -> Self {
        self.max_check_start_position = Some(max);
        self
    }
}

/// Files of one extraction group.
///
/// A group is either one folder, decoded once, or a single file without data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractFolderInfo {
    /// Folder to decode, `None` for a file without data.
    pub folder_index: Option<usize>,
    /// First file of the group.
    pub file_index: usize,
    /// For each file from `file_index` on, whether it was requested.
    pub statuses: Vec<bool>,
    /// Unpack size of the folder (0 without folder).
    pub unpack_size: u64,
    /// Bytes of the folder's output up to the end of the last requested file.
    ///
    /// Progress totals count these bytes; the rest of the folder is decoded
    /// only to verify it.
    pub required_size: u64,
}

/// Groups sorted, distinct file indices by folder.
pub(crate) fn group_requests(db: &ArchiveDatabase, indices: &[usize]) -> Vec<ExtractFolderInfo> {
    let mut groups: Vec<ExtractFolderInfo> = Vec::new();
    for &index in indices {
        let Some(folder_index) = db.folder_of_file(index) else {
            groups.push(ExtractFolderInfo {
                folder_index: None,
                file_index: index,
                statuses: vec![true],
                unpack_size: 0,
                required_size: 0,
            });
            continue;
        };

        let start = db.folder_start_file_index[folder_index];
        let same_folder = groups
            .last()
            .is_some_and(|g| g.folder_index == Some(folder_index));
        if !same_folder {
            groups.push(ExtractFolderInfo {
                folder_index: Some(folder_index),
                file_index: start,
                statuses: Vec::new(),
                unpack_size: db.folders[folder_index].unpack_size(),
                required_size: 0,
            });
        }

        let last = groups.len() - 1;
        let group = &mut groups[last];
        for i in start + group.statuses.len()..=index {
            group.statuses.push(i == index);
            group.required_size += db.files[i].unpack_size;
        }
    }
    groups
}

/// A 7z archive session.
///
/// # Example
///
/// ```rust,no_run
/// use sevenz_extract::{Handler, MemoryCallback};
///
/// let mut handler = Handler::open_path("archive.7z")?;
/// for i in 0..handler.len() {
///     let entry = handler.entry(i)?;
///     println!("{} {} [{}]", entry.name, entry.size, entry.methods);
/// }
///
/// let mut callback = MemoryCallback::new();
/// handler.extract(Some(&[0]), false, &mut callback)?;
/// handler.close();
/// # Ok::<(), sevenz_extract::Error>(())
/// ```
pub struct Handler<R> {
    reader: Option<R>,
    db: ArchiveDatabase,
    registry: CodecRegistry,
    limits: ResourceLimits,
}

impl<R> std::fmt::Debug for Handler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("open", &self.reader.is_some())
            .field("files", &self.db.files.len())
            .field("folders", &self.db.folders.len())
            .finish_non_exhaustive()
    }
}

impl<R> Default for Handler<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler<BufReader<File>> {
    /// Opens the archive at `path`.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut handler = Self::new();
        handler.open(BufReader::new(File::open(path)?))?;
        Ok(handler)
    }
}

impl<R> Handler<R> {
    /// Creates a closed handler with the default codecs.
    pub fn new() -> Self {
        Self::with_registry(CodecRegistry::default())
    }

    /// Creates a closed handler using `registry` for decoding.
    pub fn with_registry(registry: CodecRegistry) -> Self {
        Self {
            reader: None,
            db: ArchiveDatabase::default(),
            registry,
            limits: ResourceLimits::default(),
        }
    }

    /// Releases the archive stream and clears the database.
    ///
    /// Closing a closed handler does nothing.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            log::debug!("closing archive");
        }
        self.db.clear();
    }

    /// Returns `true` while an archive is open.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Returns the number of files (0 when closed).
    pub fn len(&self) -> usize {
        self.db.files.len()
    }

    /// Returns `true` if there are no files.
    pub fn is_empty(&self) -> bool {
        self.db.files.is_empty()
    }

    /// Returns the metadata of file `index`.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`] when closed, [`Error::IndexOutOfRange`] for a bad index.
    pub fn entry(&self, index: usize) -> Result<Entry> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        if index >= self.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(Entry::from_database(&self.db, &self.registry, index))
    }

    /// Returns all entries in file order.
    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        (0..self.len()).map(|i| Entry::from_database(&self.db, &self.registry, i))
    }

    /// Returns the archive database.
    pub fn database(&self) -> &ArchiveDatabase {
        &self.db
    }

    /// Number of decoding threads. Folders are always decoded one at a time.
    pub fn num_threads(&self) -> usize {
        1
    }
}

impl<R: Read + Seek> Handler<R> {
    /// Opens an archive, replacing any open one.
    pub fn open(&mut self, reader: R) -> Result<()> {
        self.open_with_options(reader, &OpenOptions::default())
    }

    /// Opens an archive with explicit options.
    ///
    /// On error the handler is left closed.
    pub fn open_with_options(&mut self, mut reader: R, options: &OpenOptions) -> Result<()> {
        self.close();

        let start_header = locate_start_header(&mut reader, options.max_check_start_position)?;
        let header = read_archive_header(&mut reader, &start_header, &self.registry, &options.limits)?;
        let db = ArchiveDatabase::from_header(&start_header, header)?;

        log::debug!(
            "opened archive at offset {}: {} files in {} folders",
            start_header.archive_offset,
            db.files.len(),
            db.folders.len()
        );
        self.db = db;
        self.limits = options.limits.clone();
        self.reader = Some(reader);
        Ok(())
    }

    /// Extracts or tests files.
    ///
    /// `indices` selects files, `None` means all. Folders are decoded once
    /// each, in ascending order, whatever order the indices come in. Decode
    /// failures are reported per file through `callback`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] or [`Error::IndexOutOfRange`] before any callback
    /// - [`Error::Io`] if the archive stream or an output sink fails
    /// - [`Error::ResourceLimitExceeded`] if a folder's pack streams are too large
    /// - any error returned by `callback`
    pub fn extract(
        &mut self,
        indices: Option<&[usize]>,
        test_mode: bool,
        callback: &mut dyn ExtractCallback,
    ) -> Result<()> {
        let reader = self.reader.as_mut().ok_or(Error::NotOpen)?;
        let db = &self.db;

        let indices = match indices {
            None => (0..db.files.len()).collect::<Vec<_>>(),
            Some(list) => {
                if let Some(&index) = list.iter().find(|&&i| i >= db.files.len()) {
                    return Err(Error::IndexOutOfRange {
                        index,
                        len: db.files.len(),
                    });
                }
                let mut sorted = list.to_vec();
                sorted.sort_unstable();
                sorted.dedup();
                sorted
            }
        };

        let groups = group_requests(db, &indices);
        let total: u64 = groups.iter().map(|g| g.required_size).sum();
        callback.set_total(total)?;

        let decoder = FolderDecoder::new(&self.registry, &self.limits);
        let mut completed = 0u64;
        for group in groups {
            callback.set_completed(completed)?;

            let mut out =
                FolderOutStream::init(db, group.file_index, group.statuses, test_mode, callback)?;
            let Some(folder_index) = group.folder_index else {
                continue;
            };

            log::debug!(
                "decoding folder {} ({} bytes, {} needed)",
                folder_index,
                group.unpack_size,
                group.required_size
            );
            let required = group.required_size;
            let mut written = 0u64;
            let outcome = decoder.decode(
                reader,
                db.folder_stream_pos(folder_index, 0),
                db.folder_pack_sizes(folder_index),
                &db.folders[folder_index],
                &mut |data| {
                    out.write(data, callback)?;
                    written += data.len() as u64;
                    callback.set_completed(completed + written.min(required))
                },
            )?;

            let failure = match outcome {
                DecodeOutcome::Ok if out.was_writing_finished() => None,
                DecodeOutcome::Ok => Some((
                    OperationResult::DataError,
                    "folder ended before its files".to_string(),
                )),
                DecodeOutcome::DataError(reason) => Some((OperationResult::DataError, reason)),
                DecodeOutcome::Unsupported(reason) => {
                    Some((OperationResult::UnsupportedMethod, reason))
                }
            };
            if let Some((result, reason)) = failure {
                log::warn!("folder {} failed: {}", folder_index, reason);
                out.flush_corrupted(result, callback)?;
            }

            completed += required;
        }
        Ok(())
    }
}
