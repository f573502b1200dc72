//! Extraction callback interface.
//!
//! [`Handler::extract`](crate::Handler::extract) drives an [`ExtractCallback`]:
//!
//! 1. [`set_total`](ExtractCallback::set_total) once, with the unpack size of
//!    every folder that has to be decoded
//! 2. per requested file: [`get_stream`](ExtractCallback::get_stream),
//!    [`prepare_operation`](ExtractCallback::prepare_operation), the file's
//!    bytes written to the returned sink, then
//!    [`set_operation_result`](ExtractCallback::set_operation_result)
//! 3. [`set_completed`](ExtractCallback::set_completed) with the cumulative
//!    number of decoded bytes, before each group and as data is produced
//!
//! Files that share a folder with a requested file but were not requested
//! themselves are decoded and discarded without any callback.
//!
//! Returning an error from any method aborts the `extract` call.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::Result;

/// What the handler will do with a file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AskMode {
    /// Bytes are written to the sink returned by `get_stream`.
    Extract,
    /// Bytes are decoded and verified but not stored.
    Test,
    /// Bytes are discarded.
    Skip,
}

/// Final result of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationResult {
    /// The file was decoded and its CRC (if any) matched.
    Ok,
    /// The file's folder uses a method that cannot be decoded.
    UnsupportedMethod,
    /// The file's folder is corrupted or was cut short.
    DataError,
    /// The file's bytes do not match its stored CRC.
    CrcError,
}

impl OperationResult {
    /// Returns `true` for [`DataError`](Self::DataError) and [`CrcError`](Self::CrcError).
    pub fn is_data_error(self) -> bool {
        matches!(self, OperationResult::DataError | OperationResult::CrcError)
    }
}

/// Receives progress, output sinks and per-file results during extraction.
pub trait ExtractCallback {
    /// Called once with the total number of bytes to decode.
    fn set_total(&mut self, total: u64) -> Result<()> {
        let _ = total;
        Ok(())
    }

    /// Called with the cumulative number of decoded bytes.
    fn set_completed(&mut self, completed: u64) -> Result<()> {
        let _ = completed;
        Ok(())
    }

    /// Returns the sink for file `index`, or `None` to skip its bytes.
    ///
    /// In [`AskMode::Test`] a returned sink is ignored.
    fn get_stream(&mut self, index: usize, mode: AskMode) -> Result<Option<Box<dyn Write>>>;

    /// Called after `get_stream` with the mode that will actually be used.
    fn prepare_operation(&mut self, mode: AskMode) -> Result<()> {
        let _ = mode;
        Ok(())
    }

    /// Reports the result of file `index`. The sink was dropped before this call.
    fn set_operation_result(&mut self, index: usize, result: OperationResult) -> Result<()>;
}

/// Callback collecting extracted files and results in memory.
///
/// # Example
///
/// ```rust,no_run
/// use sevenz_extract::{Handler, MemoryCallback};
/// use std::fs::File;
///
/// let mut handler = Handler::new();
/// handler.open(File::open("archive.7z")?)?;
/// let mut callback = MemoryCallback::new();
/// handler.extract(None, false, &mut callback)?;
/// for (index, data) in callback.files() {
///     println!("{}: {} bytes", handler.entry(*index)?.name, data.len());
/// }
/// # Ok::<(), sevenz_extract::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct MemoryCallback {
    total: Option<u64>,
    completed: u64,
    files: BTreeMap<usize, Vec<u8>>,
    results: BTreeMap<usize, OperationResult>,
    current: Option<(usize, Arc<Mutex<Vec<u8>>>)>,
}

impl MemoryCallback {
    /// Creates an empty callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the contents of successfully extracted files by index.
    pub fn files(&self) -> &BTreeMap<usize, Vec<u8>> {
        &self.files
    }

    /// Returns the content of one extracted file.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.files.get(&index).map(Vec::as_slice)
    }

    /// Returns the reported result of every file.
    pub fn results(&self) -> &BTreeMap<usize, OperationResult> {
        &self.results
    }

    /// Returns the total reported by `set_total`.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Returns the last cumulative progress value.
    pub fn completed(&self) -> u64 {
        self.completed
    }
}

struct SharedBufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for SharedBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .buffer
            .lock()
            .map_err(|_| io::Error::other("mutex poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ExtractCallback for MemoryCallback {
    fn set_total(&mut self, total: u64) -> Result<()> {
        self.total = Some(total);
        Ok(())
    }

    fn set_completed(&mut self, completed: u64) -> Result<()> {
        self.completed = completed;
        Ok(())
    }

    fn get_stream(&mut self, index: usize, mode: AskMode) -> Result<Option<Box<dyn Write>>> {
        if mode != AskMode::Extract {
            self.current = None;
            return Ok(None);
        }
        let buffer = Arc::new(Mutex::new(Vec::new()));
        self.current = Some((index, Arc::clone(&buffer)));
        Ok(Some(Box::new(SharedBufferWriter { buffer })))
    }

    fn set_operation_result(&mut self, index: usize, result: OperationResult) -> Result<()> {
        self.results.insert(index, result);
        let Some((current, buffer)) = self.current.take() else {
            return Ok(());
        };
        if current == index && result == OperationResult::Ok {
            let data = Arc::try_unwrap(buffer)
                .map(|mutex| mutex.into_inner().unwrap_or_default())
                .unwrap_or_else(|arc| arc.lock().map(|guard| guard.clone()).unwrap_or_default());
            self.files.insert(index, data);
        }
        Ok(())
    }
}
