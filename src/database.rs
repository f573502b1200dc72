//! In-memory archive database.
//!
//! The database is built once per [`Handler::open`](crate::Handler::open)
//! from the parsed header. It keeps the raw tables (pack sizes, folders,
//! files) plus index tables derived by [`ArchiveDatabase::fill`], so that
//! folders and files refer to each other by index only.

use crate::format::header::StartHeader;
use crate::format::parser::ArchiveHeader;
use crate::format::streams::{Folder, SubStreamsInfo};
use crate::timestamp::Timestamp;
use crate::{Error, Result};

/// Metadata of one file record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileItem {
    /// Path inside the archive, `/`-separated as stored.
    pub name: String,
    /// Uncompressed size (0 for directories and empty files).
    pub unpack_size: u64,
    /// Whether the file has data in some folder.
    pub has_stream: bool,
    /// Whether this record is a directory.
    pub is_directory: bool,
    /// Whether this is an anti-item (deletion marker).
    pub is_anti: bool,
    /// Windows attributes, if stored.
    pub attributes: Option<u32>,
    /// CRC32 of the file content, if stored.
    pub crc: Option<u32>,
    /// Creation time.
    pub ctime: Option<Timestamp>,
    /// Last access time.
    pub atime: Option<Timestamp>,
    /// Last write time.
    pub mtime: Option<Timestamp>,
    /// Start position, if stored.
    pub start_pos: Option<u64>,
}

/// Structural model of an opened archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveDatabase {
    /// Absolute stream position of pack stream 0.
    pub pack_base: u64,
    /// Size of every pack stream, in pack stream order.
    pub pack_sizes: Vec<u64>,
    /// Folders in header order.
    pub folders: Vec<Folder>,
    /// Number of files (substreams) produced by each folder.
    pub num_unpack_streams: Vec<u64>,
    /// File records in header order.
    pub files: Vec<FileItem>,

    /// First pack stream consumed by each folder.
    pub folder_start_pack_stream_index: Vec<usize>,
    /// Offset of each pack stream relative to `pack_base`.
    pub pack_stream_start_positions: Vec<u64>,
    /// First file produced by each folder.
    pub folder_start_file_index: Vec<usize>,
    /// Folder owning each file, `None` for files without data.
    pub file_index_to_folder_index: Vec<Option<usize>>,
}

impl ArchiveDatabase {
    /// Builds and fills the database from a parsed header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InconsistentDatabase`] if the header tables do not
    /// describe a consistent archive.
    pub fn from_header(start_header: &StartHeader, header: ArchiveHeader) -> Result<Self> {
        let ArchiveHeader {
            pack_info,
            unpack_info,
            substreams_info,
            files_info,
        } = header;

        let (pack_pos, pack_sizes) = pack_info
            .map(|p| (p.pack_pos, p.pack_sizes))
            .unwrap_or_default();
        let folders = unpack_info.map(|u| u.folders).unwrap_or_default();
        let substreams =
            substreams_info.unwrap_or_else(|| SubStreamsInfo::one_per_folder(&folders));

        let pack_base = start_header
            .data_start()
            .checked_add(pack_pos)
            .ok_or_else(|| Error::InconsistentDatabase("pack position overflows".into()))?;

        let mut db = Self {
            pack_base,
            pack_sizes,
            folders,
            num_unpack_streams: substreams.num_unpack_streams_in_folders,
            files: files_info.map(|f| f.files).unwrap_or_default(),
            ..Self::default()
        };
        db.fill()?;

        log::debug!(
            "archive database: {} pack streams, {} folders, {} files",
            db.pack_sizes.len(),
            db.folders.len(),
            db.files.len()
        );
        Ok(db)
    }

    /// Computes the derived index tables and validates them.
    ///
    /// Checks that the folders' pack streams exist, that files map onto
    /// folders in order, and that the sizes of each folder's files add up to
    /// the folder's unpack size.
    pub fn fill(&mut self) -> Result<()> {
        self.fill_pack_streams()?;
        self.fill_file_folders()?;
        self.check_folder_sizes()
    }

    fn fill_pack_streams(&mut self) -> Result<()> {
        self.folder_start_pack_stream_index = Vec::with_capacity(self.folders.len());
        let mut next = 0usize;
        for folder in &self.folders {
            self.folder_start_pack_stream_index.push(next);
            next += folder.packed_streams.len();
        }
        if next > self.pack_sizes.len() {
            return Err(Error::InconsistentDatabase(format!(
                "folders use {} pack streams but only {} exist",
                next,
                self.pack_sizes.len()
            )));
        }

        self.pack_stream_start_positions = Vec::with_capacity(self.pack_sizes.len());
        let mut pos = 0u64;
        for &size in &self.pack_sizes {
            self.pack_stream_start_positions.push(pos);
            pos = pos
                .checked_add(size)
                .ok_or_else(|| Error::InconsistentDatabase("pack sizes overflow".into()))?;
        }
        // Every pack stream must end at an addressable stream position
        if self.pack_base.checked_add(pos).is_none() {
            return Err(Error::InconsistentDatabase(format!(
                "pack streams end past the stream limit ({} + {})",
                self.pack_base, pos
            )));
        }
        Ok(())
    }

    fn fill_file_folders(&mut self) -> Result<()> {
        if self.num_unpack_streams.len() != self.folders.len() {
            return Err(Error::InconsistentDatabase(format!(
                "{} substream counts for {} folders",
                self.num_unpack_streams.len(),
                self.folders.len()
            )));
        }

        self.folder_start_file_index = vec![self.files.len(); self.folders.len()];
        self.file_index_to_folder_index = Vec::with_capacity(self.files.len());

        let mut folder_index = 0usize;
        let mut index_in_folder = 0u64;
        for (file_index, file) in self.files.iter().enumerate() {
            let empty_stream = !file.has_stream;
            if empty_stream && index_in_folder == 0 {
                self.file_index_to_folder_index.push(None);
                continue;
            }

            if index_in_folder == 0 {
                // Folders without substreams own no files
                loop {
                    let Some(&count) = self.num_unpack_streams.get(folder_index) else {
                        return Err(Error::InconsistentDatabase(format!(
                            "file {} has data but no folder is left",
                            file_index
                        )));
                    };
                    self.folder_start_file_index[folder_index] = file_index;
                    if count != 0 {
                        break;
                    }
                    folder_index += 1;
                }
            }

            self.file_index_to_folder_index.push(Some(folder_index));
            if empty_stream {
                continue;
            }
            index_in_folder += 1;
            if index_in_folder >= self.num_unpack_streams[folder_index] {
                folder_index += 1;
                index_in_folder = 0;
            }
        }

        if index_in_folder != 0 {
            return Err(Error::InconsistentDatabase(format!(
                "folder {} is missing files",
                folder_index
            )));
        }
        Ok(())
    }

    fn check_folder_sizes(&self) -> Result<()> {
        let mut sums = vec![0u64; self.folders.len()];
        for (file, folder) in self.files.iter().zip(&self.file_index_to_folder_index) {
            if let Some(f) = *folder {
                sums[f] = sums[f].saturating_add(file.unpack_size);
            }
        }

        for (i, (folder, &sum)) in self.folders.iter().zip(&sums).enumerate() {
            // Folders without substreams hold bytes of no file
            if self.num_unpack_streams[i] != 0 && folder.unpack_size() != sum {
                return Err(Error::InconsistentDatabase(format!(
                    "folder {} unpacks to {} bytes but its files hold {}",
                    i,
                    folder.unpack_size(),
                    sum
                )));
            }
        }
        Ok(())
    }

    /// Returns the absolute stream position of a folder's `index`-th pack stream.
    pub fn folder_stream_pos(&self, folder_index: usize, index: usize) -> u64 {
        let pack_index = self.folder_start_pack_stream_index[folder_index] + index;
        self.pack_base + self.pack_stream_start_positions[pack_index]
    }

    /// Returns the sizes of the pack streams feeding a folder.
    pub fn folder_pack_sizes(&self, folder_index: usize) -> &[u64] {
        let start = self.folder_start_pack_stream_index[folder_index];
        let count = self.folders[folder_index].packed_streams.len();
        &self.pack_sizes[start..start + count]
    }

    /// Returns the total packed size of a folder.
    pub fn folder_full_pack_size(&self, folder_index: usize) -> u64 {
        self.folder_pack_sizes(folder_index).iter().sum()
    }

    /// Returns the folder owning a file, `None` for files without data.
    pub fn folder_of_file(&self, file_index: usize) -> Option<usize> {
        self.file_index_to_folder_index
            .get(file_index)
            .copied()
            .flatten()
    }

    /// Removes all tables.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
