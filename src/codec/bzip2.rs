//! BZip2 decoder.

use std::io::{self, Read};

use bzip2::read::BzDecoder;

use crate::Result;
use crate::format::streams::Coder;

use super::{Decoder, method, single_input};

/// BZip2 decoder.
pub struct Bzip2Decoder<R> {
    inner: BzDecoder<R>,
}

impl<R> std::fmt::Debug for Bzip2Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bzip2Decoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> Bzip2Decoder<R> {
    /// Creates a new BZip2 decoder.
    pub fn new(input: R) -> Self {
        Self {
            inner: BzDecoder::new(input),
        }
    }
}

impl<R: Read + Send> Read for Bzip2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for Bzip2Decoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::BZIP2
    }
}

pub(super) fn build_decoder(
    inputs: Vec<Box<dyn Decoder>>,
    _coder: &Coder,
    _unpack_size: u64,
) -> Result<Box<dyn Decoder>> {
    Ok(Box::new(Bzip2Decoder::new(single_input(inputs)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_bzip2_decodes_stream() {
        let data = b"Hello, World! This is a test of BZip2 decoding.".repeat(8);
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decoder = Bzip2Decoder::new(Cursor::new(compressed));
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_bzip2_bad_magic() {
        let mut decoder = Bzip2Decoder::new(Cursor::new(b"not bzip2 data".to_vec()));
        let mut out = Vec::new();
        assert!(decoder.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_bzip2_method_id() {
        let decoder = Bzip2Decoder::new(Cursor::new(Vec::<u8>::new()));
        assert_eq!(decoder.method_id(), method::BZIP2);
    }
}
