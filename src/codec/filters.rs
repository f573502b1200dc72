//! BCJ x86 branch converter.
//!
//! Reverses the x86 Branch/Call/Jump preprocessing that turns relative
//! `CALL`/`JMP` targets into absolute addresses before compression.

use std::io::{self, Read};

use lzma_rust2::filter::bcj::BcjReader;

use crate::Result;
use crate::format::streams::Coder;

use super::{Decoder, method, single_input};

/// BCJ x86 filter decoder.
pub struct BcjX86Decoder<R> {
    inner: BcjReader<R>,
}

impl<R> std::fmt::Debug for BcjX86Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BcjX86Decoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> BcjX86Decoder<R> {
    /// Creates a new BCJ x86 filter decoder starting at address 0.
    pub fn new(input: R) -> Self {
        Self {
            inner: BcjReader::new_x86(input, 0),
        }
    }
}

impl<R: Read + Send> Read for BcjX86Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for BcjX86Decoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::BCJ_X86
    }
}

pub(super) fn build_bcj_x86_decoder(
    inputs: Vec<Box<dyn Decoder>>,
    _coder: &Coder,
    _unpack_size: u64,
) -> Result<Box<dyn Decoder>> {
    Ok(Box::new(BcjX86Decoder::new(single_input(inputs)?)))
}
