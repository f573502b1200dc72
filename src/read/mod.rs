//! Archive reading API.
//!
//! [`Handler`] owns the archive stream and database. Extraction groups the
//! requested files by folder ([`ExtractFolderInfo`]), decodes every folder
//! with a [`FolderDecoder`] and feeds the output through a
//! [`FolderOutStream`], which cuts it into files and reports to the
//! [`ExtractCallback`].

mod callback;
pub(crate) mod decoder;
mod entry;
mod folder_out;
mod handler;

pub use callback::{AskMode, ExtractCallback, MemoryCallback, OperationResult};
pub use decoder::{DecodeOutcome, FolderDecoder};
pub use entry::{Entry, methods_string, size_value_string};
pub use folder_out::FolderOutStream;
pub use handler::{ExtractFolderInfo, Handler, OpenOptions};
