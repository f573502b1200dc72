//! Deflate and Deflate64 decoders.

use std::io::{self, BufReader, Read};

use crate::Result;
use crate::format::streams::Coder;

use super::{Decoder, method, single_input};

/// Deflate decoder.
#[cfg(feature = "deflate")]
pub struct DeflateDecoder<R> {
    inner: flate2::bufread::DeflateDecoder<BufReader<R>>,
}

#[cfg(feature = "deflate")]
impl<R> std::fmt::Debug for DeflateDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateDecoder").finish_non_exhaustive()
    }
}

#[cfg(feature = "deflate")]
impl<R: Read + Send> DeflateDecoder<R> {
    /// Creates a new Deflate decoder over a raw (headerless) stream.
    pub fn new(input: R) -> Self {
        Self {
            inner: flate2::bufread::DeflateDecoder::new(BufReader::new(input)),
        }
    }
}

#[cfg(feature = "deflate")]
impl<R: Read + Send> Read for DeflateDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(feature = "deflate")]
impl<R: Read + Send> Decoder for DeflateDecoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::DEFLATE
    }
}

/// Deflate64 ("enhanced deflate") decoder.
#[cfg(feature = "deflate64")]
pub struct Deflate64Decoder<R> {
    inner: deflate64::Deflate64Decoder<BufReader<R>>,
}

#[cfg(feature = "deflate64")]
impl<R> std::fmt::Debug for Deflate64Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deflate64Decoder").finish_non_exhaustive()
    }
}

#[cfg(feature = "deflate64")]
impl<R: Read + Send> Deflate64Decoder<R> {
    /// Creates a new Deflate64 decoder.
    pub fn new(input: R) -> Self {
        Self {
            inner: deflate64::Deflate64Decoder::with_buffer(BufReader::new(input)),
        }
    }
}

#[cfg(feature = "deflate64")]
impl<R: Read + Send> Read for Deflate64Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(feature = "deflate64")]
impl<R: Read + Send> Decoder for Deflate64Decoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::DEFLATE64
    }
}

#[cfg(feature = "deflate")]
pub(super) fn build_deflate_decoder(
    inputs: Vec<Box<dyn Decoder>>,
    _coder: &Coder,
    _unpack_size: u64,
) -> Result<Box<dyn Decoder>> {
    Ok(Box::new(DeflateDecoder::new(single_input(inputs)?)))
}

#[cfg(feature = "deflate64")]
pub(super) fn build_deflate64_decoder(
    inputs: Vec<Box<dyn Decoder>>,
    _coder: &Coder,
    _unpack_size: u64,
) -> Result<Box<dyn Decoder>> {
    Ok(Box::new(Deflate64Decoder::new(single_input(inputs)?)))
}
