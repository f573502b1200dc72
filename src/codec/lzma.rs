//! LZMA and LZMA2 decoders.

use crate::format::streams::Coder;
use crate::{Error, Result};
use std::io::{self, Read};

use super::{Decoder, method, single_input};

/// LZMA decoder.
pub struct LzmaDecoder<R> {
    inner: lzma_rust2::LzmaReader<R>,
}

impl<R> std::fmt::Debug for LzmaDecoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LzmaDecoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> LzmaDecoder<R> {
    /// Creates a new LZMA decoder.
    ///
    /// # Arguments
    ///
    /// * `input` - The compressed data source
    /// * `properties` - LZMA properties (1 byte lc/lp/pb + 4 byte dictionary size)
    /// * `uncompressed_size` - Size of the decoded stream
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataError`] if the properties are invalid.
    pub fn new(input: R, properties: &[u8], uncompressed_size: u64) -> Result<Self> {
        let [props_byte, d0, d1, d2, d3, ..] = *properties else {
            return Err(Error::DataError(
                "LZMA properties too short (need 5 bytes)".into(),
            ));
        };
        let dict_size = u32::from_le_bytes([d0, d1, d2, d3]);

        let reader = lzma_rust2::LzmaReader::new_with_props(
            input,
            uncompressed_size,
            props_byte,
            dict_size,
            None,
        )
        .map_err(|e| Error::DataError(format!("invalid LZMA properties: {}", e)))?;

        Ok(Self { inner: reader })
    }
}

impl<R: Read + Send> Read for LzmaDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for LzmaDecoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::LZMA
    }
}

/// LZMA2 decoder.
pub struct Lzma2Decoder<R> {
    inner: lzma_rust2::Lzma2Reader<R>,
}

impl<R> std::fmt::Debug for Lzma2Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lzma2Decoder").finish_non_exhaustive()
    }
}

impl<R: Read + Send> Lzma2Decoder<R> {
    /// Creates a new LZMA2 decoder.
    ///
    /// `properties` is the single byte encoding the dictionary size.
    pub fn new(input: R, properties: &[u8]) -> Result<Self> {
        let &[prop, ..] = properties else {
            return Err(Error::DataError("LZMA2 properties missing".into()));
        };
        let dict_size = decode_lzma2_dict_size(prop)?;

        Ok(Self {
            inner: lzma_rust2::Lzma2Reader::new(input, dict_size, None),
        })
    }
}

impl<R: Read + Send> Read for Lzma2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Decoder for Lzma2Decoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::LZMA2
    }
}

/// Decodes the LZMA2 dictionary size from the property byte.
///
/// Values 0-39 select `2^(p/2 + 12)` (even) or `3 * 2^(p/2 + 11)` (odd);
/// 40 means 4 GiB - 1.
fn decode_lzma2_dict_size(prop: u8) -> Result<u32> {
    match prop {
        40 => Ok(0xFFFF_FFFF),
        0..40 => {
            let base_log = (prop as u32) / 2 + 12;
            Ok(if prop % 2 == 0 {
                1u32 << base_log
            } else {
                3u32 << (base_log - 1)
            })
        }
        _ => Err(Error::DataError(format!(
            "invalid LZMA2 dictionary size property: {}",
            prop
        ))),
    }
}

pub(super) fn build_lzma_decoder(
    inputs: Vec<Box<dyn Decoder>>,
    coder: &Coder,
    unpack_size: u64,
) -> Result<Box<dyn Decoder>> {
    let input = single_input(inputs)?;
    Ok(Box::new(LzmaDecoder::new(
        input,
        coder.properties(),
        unpack_size,
    )?))
}

pub(super) fn build_lzma2_decoder(
    inputs: Vec<Box<dyn Decoder>>,
    coder: &Coder,
    _unpack_size: u64,
) -> Result<Box<dyn Decoder>> {
    let input = single_input(inputs)?;
    Ok(Box::new(Lzma2Decoder::new(input, coder.properties())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TEXT: &[u8] = b"Hello, World! Hello, World! This is a test of LZMA decoding.";

    #[test]
    fn test_decode_lzma2_dict_size() {
        assert_eq!(decode_lzma2_dict_size(0).unwrap(), 4096);
        assert_eq!(decode_lzma2_dict_size(1).unwrap(), 6144);
        assert_eq!(decode_lzma2_dict_size(16).unwrap(), 1 << 20);
        assert_eq!(decode_lzma2_dict_size(19).unwrap(), 3 << 20);
        assert_eq!(decode_lzma2_dict_size(40).unwrap(), 0xFFFF_FFFF);
        assert!(decode_lzma2_dict_size(41).is_err());
    }

    #[test]
    fn test_lzma_properties_too_short() {
        let err = LzmaDecoder::new(Cursor::new(vec![]), &[0x5D, 0, 0], 0).unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }

    #[test]
    fn test_lzma2_properties_missing() {
        let err = Lzma2Decoder::new(Cursor::new(vec![]), &[]).unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }

    #[test]
    fn test_lzma_decodes_raw_stream() {
        let opts = lzma_rust2::LzmaOptions::with_preset(0);
        let mut writer = lzma_rust2::LzmaWriter::new_no_header(Vec::new(), &opts, true).unwrap();
        std::io::Write::write_all(&mut writer, TEXT).unwrap();
        let compressed = writer.finish().unwrap();

        let mut props = vec![opts.get_props()];
        props.extend_from_slice(&opts.dict_size.to_le_bytes());

        let coder = Coder::new(method::LZMA, Some(props));
        let input: Box<dyn Decoder> = Box::new(crate::codec::CopyDecoder::new(
            Cursor::new(compressed.clone()),
            compressed.len() as u64,
        ));
        let mut decoder = build_lzma_decoder(vec![input], &coder, TEXT.len() as u64).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, TEXT);
    }

    #[test]
    fn test_lzma2_decodes_stream() {
        let mut opts = lzma_rust2::Lzma2Options::with_preset(0);
        opts.lzma_options.dict_size = 1 << 20;
        let mut writer = lzma_rust2::Lzma2Writer::new(Vec::new(), opts);
        std::io::Write::write_all(&mut writer, TEXT).unwrap();
        let compressed = writer.finish().unwrap();

        let mut decoder = Lzma2Decoder::new(Cursor::new(compressed), &[16]).unwrap();
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, TEXT);
    }
}
