//! Codec infrastructure for decoding 7z folders.
//!
//! Every coder of a folder is turned into a [`Decoder`] by the
//! [`CodecRegistry`], which maps method IDs to constructors. Methods that are
//! known by name but have no constructor (PPMD, 7zAES, or codecs whose cargo
//! feature is disabled) are reported as unsupported when a folder needs them.

#[cfg(feature = "lzma")]
pub mod lzma;

#[cfg(any(feature = "deflate", feature = "deflate64"))]
pub mod deflate;

#[cfg(feature = "bzip2")]
pub mod bzip2;

#[cfg(feature = "lzma")]
pub mod filters;

pub mod bcj2;

mod copy;
mod registry;

use crate::{Error, Result};
use std::io::Read;

/// A decoder that reads coded data and produces decoded output.
pub trait Decoder: Read + Send {
    /// Returns the method ID for this decoder.
    fn method_id(&self) -> &'static [u8];
}

/// Copy decoder (no compression).
pub use copy::CopyDecoder;

#[cfg(feature = "lzma")]
pub use lzma::{Lzma2Decoder, LzmaDecoder};

#[cfg(feature = "deflate")]
pub use deflate::DeflateDecoder;

#[cfg(feature = "deflate64")]
pub use deflate::Deflate64Decoder;

#[cfg(feature = "bzip2")]
pub use bzip2::Bzip2Decoder;

#[cfg(feature = "lzma")]
pub use filters::BcjX86Decoder;

pub use bcj2::{Bcj2Decoder, RangeDecoder};

pub use registry::{CodecRegistry, DecoderConstructor, MethodInfo};

/// Method IDs for the coders this crate knows about.
pub mod method {
    /// Copy (no compression).
    pub const COPY: &[u8] = &[0x00];
    /// LZMA compression.
    pub const LZMA: &[u8] = &[0x03, 0x01, 0x01];
    /// LZMA2 compression.
    pub const LZMA2: &[u8] = &[0x21];
    /// PPMd compression.
    pub const PPMD: &[u8] = &[0x03, 0x04, 0x01];
    /// BCJ (x86) filter.
    pub const BCJ_X86: &[u8] = &[0x03, 0x03, 0x01, 0x03];
    /// BCJ2 (4-stream x86) filter.
    pub const BCJ2: &[u8] = &[0x03, 0x03, 0x01, 0x1B];
    /// Deflate compression.
    pub const DEFLATE: &[u8] = &[0x04, 0x01, 0x08];
    /// Deflate64 compression.
    pub const DEFLATE64: &[u8] = &[0x04, 0x01, 0x09];
    /// BZip2 compression.
    pub const BZIP2: &[u8] = &[0x04, 0x02, 0x02];
    /// 7zAES (AES-256 + SHA-256) encryption.
    pub const AES: &[u8] = &[0x06, 0xF1, 0x07, 0x01];
}

/// Takes the only input of a single-input coder.
pub(crate) fn single_input(inputs: Vec<Box<dyn Decoder>>) -> Result<Box<dyn Decoder>> {
    let mut inputs = inputs.into_iter();
    match (inputs.next(), inputs.next()) {
        (Some(input), None) => Ok(input),
        _ => Err(Error::UnsupportedFeature {
            feature: "single-stream coder with several inputs",
        }),
    }
}
