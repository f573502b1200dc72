//! # sevenz-extract
//!
//! A pure-Rust reader and extractor for 7z archives.
//!
//! The archive header is parsed once into an [`ArchiveDatabase`]; extraction
//! then decodes each needed folder exactly once and splits its output into
//! files, reporting progress and per-file results through an
//! [`ExtractCallback`]. A damaged or unsupported folder only affects its own
//! files.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sevenz_extract::{Handler, MemoryCallback, OperationResult, Result};
//!
//! fn main() -> Result<()> {
//!     let mut handler = Handler::open_path("archive.7z")?;
//!
//!     for entry in handler.entries() {
//!         println!("{}: {} bytes [{}]", entry.name, entry.size, entry.methods);
//!     }
//!
//!     let mut callback = MemoryCallback::new();
//!     handler.extract(None, false, &mut callback)?;
//!     for (index, result) in callback.results() {
//!         if *result != OperationResult::Ok {
//!             eprintln!("file {index}: {result:?}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `lzma` | Yes | LZMA, LZMA2 and BCJ decoding |
//! | `deflate` | Yes | Deflate decoding |
//! | `deflate64` | Yes | Deflate64 decoding |
//! | `bzip2` | Yes | BZip2 decoding |
//!
//! Copy and BCJ2 are always available. PPMd and 7zAES are recognized but
//! reported as unsupported methods.
//!
//! ## Minimum Supported Rust Version (MSRV)
//!
//! This crate requires **Rust 1.85** or later.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Default buffer size for read operations (8 KiB).
pub(crate) const READ_BUFFER_SIZE: usize = 8192;

pub mod codec;
pub mod database;
pub mod error;
pub mod format;
pub mod read;
pub mod timestamp;

pub use database::{ArchiveDatabase, FileItem};
pub use error::{Error, Result};
pub use format::streams::ResourceLimits;
pub use timestamp::Timestamp;

// Re-export reading API at crate root for convenience
pub use read::{
    AskMode, DecodeOutcome, Entry, ExtractCallback, ExtractFolderInfo, FolderDecoder,
    FolderOutStream, Handler, MemoryCallback, OpenOptions, OperationResult,
};
