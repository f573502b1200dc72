//! Error types for 7z archive reading.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes of opening and extracting an archive, along with a
//! convenient [`Result<T>`] type alias.
//!
//! # Where errors surface
//!
//! Errors fall in two groups with different propagation rules:
//!
//! - **Open-time errors** ([`Error::InvalidSignature`], [`Error::MalformedHeader`],
//!   [`Error::InconsistentDatabase`], [`Error::ResourceLimitExceeded`]) abort
//!   [`Handler::open`](crate::Handler::open). No partially built database is
//!   kept; the handler stays closed.
//! - **Decode-time failures** (unsupported codec, corrupted data, CRC mismatch)
//!   never show up as an `Err` from [`Handler::extract`](crate::Handler::extract).
//!   They are reported per file through
//!   [`ExtractCallback::set_operation_result`](crate::ExtractCallback::set_operation_result),
//!   and extraction continues with the next folder.
//!
//! Only [`Error::Io`] (a broken archive stream or output sink) and errors
//! returned by the callback itself abort an `extract` call.
//!
//! ```rust,no_run
//! use sevenz_extract::{Error, Handler};
//! use std::fs::File;
//!
//! fn open(path: &str) -> sevenz_extract::Result<Handler<File>> {
//!     let mut handler = Handler::new();
//!     match handler.open(File::open(path)?) {
//!         Ok(()) => Ok(handler),
//!         Err(Error::InvalidSignature) => {
//!             eprintln!("{path} is not a 7z archive");
//!             Err(Error::InvalidSignature)
//!         }
//!         Err(e) if e.is_corruption() => {
//!             eprintln!("{path} is damaged: {e}");
//!             Err(e)
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use std::io;

/// The error type for archive operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error on the archive stream or an output sink.
    ///
    /// During extraction this is fatal for the current call: sequential
    /// pack-stream reads cannot safely continue. The handler can be reused
    /// after a fresh `open`.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The 7z signature was not found.
    #[error("Invalid 7z signature")]
    InvalidSignature,

    /// The archive header is structurally invalid.
    ///
    /// Raised for CRC mismatches of the start or next header, unexpected
    /// property IDs, out-of-range indices and truncated header data.
    #[error("Malformed header at offset {offset:#x}: {reason}")]
    MalformedHeader {
        /// Approximate byte offset where the problem was detected.
        offset: u64,
        /// Description of the problem.
        reason: String,
    },

    /// The parsed header does not describe a consistent archive.
    ///
    /// Raised by the database fill pass, e.g. when substream sizes of a folder
    /// do not add up to the folder's unpack size.
    #[error("Inconsistent archive database: {0}")]
    InconsistentDatabase(String),

    /// A coder uses a method that cannot be decoded.
    ///
    /// This covers unknown method IDs as well as recognized methods without a
    /// decoder (PPMD, 7zAES, or codecs whose cargo feature is disabled).
    #[error("Unsupported method: {method_id:#x}")]
    UnsupportedMethod {
        /// The method ID that is not supported.
        method_id: u64,
    },

    /// A format feature is not supported.
    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature {
        /// Description of the unsupported feature.
        feature: &'static str,
    },

    /// Decoded data is corrupted.
    #[error("Data error: {0}")]
    DataError(String),

    /// A resource limit was exceeded while parsing.
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// The handler has no open archive.
    #[error("No archive is open")]
    NotOpen,

    /// A file index is outside the archive's file list.
    #[error("File index {index} out of range (archive has {len} files)")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of files in the archive.
        len: usize,
    },

    /// The extraction callback asked to stop.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` if this error means the archive itself is damaged.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::InvalidSignature
                | Error::MalformedHeader { .. }
                | Error::InconsistentDatabase(_)
                | Error::DataError(_)
        )
    }

    /// Returns `true` if this error is caused by an unsupported method or feature.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedMethod { .. } | Error::UnsupportedFeature { .. }
        )
    }

    /// Returns the method ID if this is an unsupported method error.
    pub fn method_id(&self) -> Option<u64> {
        match self {
            Error::UnsupportedMethod { method_id } => Some(*method_id),
            _ => None,
        }
    }

    /// Creates a malformed header error.
    pub fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Error::MalformedHeader {
            offset,
            reason: reason.into(),
        }
    }
}

/// Converts an I/O error raised while reading header bytes.
///
/// Running out of header bytes means a declared size did not match the data,
/// which is a malformed header rather than a stream failure.
pub(crate) fn header_io_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::malformed(0, "truncated header data")
    } else {
        Error::Io(e)
    }
}

/// A specialized Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
