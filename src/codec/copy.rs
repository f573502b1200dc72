//! Copy codec (stored data).

use std::io::{self, Read};

use crate::Result;
use crate::format::streams::Coder;

use super::{Decoder, method, single_input};

/// A decoder that passes at most `size` bytes through unchanged.
///
/// Also used to feed packed streams into the coder graph.
pub struct CopyDecoder<R> {
    inner: R,
    remaining: u64,
}

impl<R> std::fmt::Debug for CopyDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyDecoder")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Send> CopyDecoder<R> {
    /// Creates a new copy decoder reading at most `size` bytes of `inner`.
    pub fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: Read + Send> Read for CopyDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let max_read = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max_read])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl<R: Read + Send> Decoder for CopyDecoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::COPY
    }
}

pub(super) fn build_decoder(
    inputs: Vec<Box<dyn Decoder>>,
    _coder: &Coder,
    unpack_size: u64,
) -> Result<Box<dyn Decoder>> {
    Ok(Box::new(CopyDecoder::new(single_input(inputs)?, unpack_size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_copy_stops_at_size() {
        let mut decoder = CopyDecoder::new(Cursor::new(b"Hello, World!".to_vec()), 5);
        let mut output = Vec::new();
        decoder.read_to_end(&mut output).unwrap();
        assert_eq!(output, b"Hello");
    }

    #[test]
    fn test_copy_short_source_ends_early() {
        let mut decoder = CopyDecoder::new(Cursor::new(b"abc".to_vec()), 10);
        let mut output = Vec::new();
        decoder.read_to_end(&mut output).unwrap();
        assert_eq!(output, b"abc");
    }

    #[test]
    fn test_copy_method_id() {
        let decoder = CopyDecoder::new(Cursor::new(Vec::new()), 0);
        assert_eq!(decoder.method_id(), method::COPY);
    }
}
