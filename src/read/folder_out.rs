//! Splitting a folder's decoded output into files.

use std::io::Write;

use crate::database::ArchiveDatabase;
use crate::Result;

use super::callback::{AskMode, ExtractCallback, OperationResult};

/// File currently receiving bytes.
struct OpenFile {
    index: usize,
    requested: bool,
    target: Option<Box<dyn Write>>,
    hasher: crc32fast::Hasher,
    remaining: u64,
}

/// Output sink for one folder group.
///
/// Files `start_index..start_index + statuses.len()` are fed in order from
/// the decoded stream, each cut at its unpack size. A file whose status is
/// `false` is consumed silently. Bytes after the last status belong to files
/// nobody asked for and are dropped.
pub struct FolderOutStream<'a> {
    db: &'a ArchiveDatabase,
    start_index: usize,
    statuses: Vec<bool>,
    test_mode: bool,
    current: usize,
    file: Option<OpenFile>,
}

impl std::fmt::Debug for FolderOutStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderOutStream")
            .field("start_index", &self.start_index)
            .field("statuses", &self.statuses)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<'a> FolderOutStream<'a> {
    /// Prepares the splitter and completes leading empty files.
    pub fn init(
        db: &'a ArchiveDatabase,
        start_index: usize,
        statuses: Vec<bool>,
        test_mode: bool,
        callback: &mut dyn ExtractCallback,
    ) -> Result<Self> {
        let mut out = Self {
            db,
            start_index,
            statuses,
            test_mode,
            current: 0,
            file: None,
        };
        out.write_empty_files(callback)?;
        Ok(out)
    }

    /// Feeds decoded bytes.
    ///
    /// # Errors
    ///
    /// Errors of the callback or of a file's sink.
    pub fn write(&mut self, mut data: &[u8], callback: &mut dyn ExtractCallback) -> Result<()> {
        while !data.is_empty() {
            if self.file.is_none() {
                if self.current >= self.statuses.len() {
                    return Ok(());
                }
                self.open_file(callback)?;
            }
            let Some(file) = self.file.as_mut() else {
                return Ok(());
            };

            let n = usize::try_from(file.remaining).map_or(data.len(), |r| r.min(data.len()));
            let (chunk, rest) = data.split_at(n);
            file.hasher.update(chunk);
            if let Some(target) = file.target.as_mut() {
                target.write_all(chunk)?;
            }
            file.remaining -= n as u64;
            data = rest;

            if file.remaining == 0 {
                self.finish_file(callback)?;
                self.write_empty_files(callback)?;
            }
        }
        Ok(())
    }

    /// Ends every file not yet completed with `result`.
    pub fn flush_corrupted(
        &mut self,
        result: OperationResult,
        callback: &mut dyn ExtractCallback,
    ) -> Result<()> {
        while self.current < self.statuses.len() {
            if self.file.is_none() {
                self.open_file(callback)?;
            }
            if let Some(file) = self.file.take() {
                let OpenFile {
                    index,
                    requested,
                    target,
                    ..
                } = file;
                drop(target);
                if requested {
                    callback.set_operation_result(index, result)?;
                }
            }
            self.current += 1;
        }
        Ok(())
    }

    /// Returns `true` once every file of the group has been completed.
    pub fn was_writing_finished(&self) -> bool {
        self.current == self.statuses.len()
    }

    fn open_file(&mut self, callback: &mut dyn ExtractCallback) -> Result<()> {
        let index = self.start_index + self.current;
        let requested = self.statuses[self.current];
        let size = self.db.files.get(index).map_or(0, |f| f.unpack_size);

        let mut target = None;
        if requested {
            let mut mode = if self.test_mode {
                AskMode::Test
            } else {
                AskMode::Extract
            };
            target = callback.get_stream(index, mode)?;
            if mode == AskMode::Test {
                target = None;
            } else if target.is_none() {
                mode = AskMode::Skip;
            }
            callback.prepare_operation(mode)?;
        }

        self.file = Some(OpenFile {
            index,
            requested,
            target,
            hasher: crc32fast::Hasher::new(),
            remaining: size,
        });
        Ok(())
    }

    fn finish_file(&mut self, callback: &mut dyn ExtractCallback) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let OpenFile {
            index,
            requested,
            target,
            hasher,
            ..
        } = file;

        let mut result = OperationResult::Ok;
        if let Some(expected) = self.db.files.get(index).and_then(|f| f.crc) {
            let actual = hasher.finalize();
            if actual != expected {
                log::warn!(
                    "CRC mismatch in file {}: expected {:#010x}, got {:#010x}",
                    index,
                    expected,
                    actual
                );
                result = OperationResult::CrcError;
            }
        }

        if let Some(mut target) = target {
            target.flush()?;
        }
        self.current += 1;
        if requested {
            log::debug!("file {} done: {:?}", index, result);
            callback.set_operation_result(index, result)?;
        }
        Ok(())
    }

    /// Opens and completes zero-length files at the cursor.
    fn write_empty_files(&mut self, callback: &mut dyn ExtractCallback) -> Result<()> {
        while self.file.is_none() && self.current < self.statuses.len() {
            let index = self.start_index + self.current;
            if self.db.files.get(index).is_some_and(|f| f.unpack_size != 0) {
                break;
            }
            self.open_file(callback)?;
            self.finish_file(callback)?;
        }
        Ok(())
    }
}
