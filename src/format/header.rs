//! 7z signature header parsing and signature search.

use crate::error::header_io_error;
use crate::{Error, Result};
use std::io::{Read, Seek, SeekFrom};

use super::reader::{read_u8, read_u32_le};
use super::{SIGNATURE, SIGNATURE_HEADER_SIZE, VERSION_MAJOR, VERSION_MINOR};

/// The start header of a 7z archive.
///
/// This is the first structure in a 7z file, located immediately after
/// the 6-byte signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartHeader {
    /// Archive format version - major number.
    pub version_major: u8,
    /// Archive format version - minor number.
    pub version_minor: u8,
    /// CRC of the following 20 bytes (offset, size, crc).
    pub start_header_crc: u32,
    /// Offset from the end of the start header to the next header.
    pub next_header_offset: u64,
    /// Size of the next header (compressed if encoded).
    pub next_header_size: u64,
    /// CRC of the next header data.
    pub next_header_crc: u32,
    /// Position of the signature in the stream (non-zero behind a stub).
    pub archive_offset: u64,
}

impl StartHeader {
    /// Parses the signature and start header from a reader.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSignature`] if the first 6 bytes are not the 7z signature
    /// - [`Error::UnsupportedFeature`] for archive versions newer than 0.4
    /// - [`Error::MalformedHeader`] if the start header is truncated or its CRC does not match
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let mut sig = [0u8; 6];
        r.read_exact(&mut sig).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::InvalidSignature,
            _ => Error::Io(e),
        })?;
        if sig != *SIGNATURE {
            return Err(Error::InvalidSignature);
        }

        let version_major = read_u8(r).map_err(header_io_error)?;
        let version_minor = read_u8(r).map_err(header_io_error)?;
        if version_major != VERSION_MAJOR || version_minor > VERSION_MINOR {
            return Err(Error::UnsupportedFeature {
                feature: "unsupported archive version",
            });
        }

        let start_header_crc = read_u32_le(r).map_err(header_io_error)?;

        let mut data = [0u8; 20];
        r.read_exact(&mut data)
            .map_err(|_| Error::malformed(12, "truncated start header"))?;

        let calculated = crc32fast::hash(&data);
        if calculated != start_header_crc {
            return Err(Error::malformed(
                12,
                format!(
                    "start header CRC mismatch: expected {:#x}, got {:#x}",
                    start_header_crc, calculated
                ),
            ));
        }

        let [o0, o1, o2, o3, o4, o5, o6, o7, s0, s1, s2, s3, s4, s5, s6, s7, c0, c1, c2, c3] = data;

        Ok(Self {
            version_major,
            version_minor,
            start_header_crc,
            next_header_offset: u64::from_le_bytes([o0, o1, o2, o3, o4, o5, o6, o7]),
            next_header_size: u64::from_le_bytes([s0, s1, s2, s3, s4, s5, s6, s7]),
            next_header_crc: u32::from_le_bytes([c0, c1, c2, c3]),
            archive_offset: 0,
        })
    }

    /// Returns the position where packed data starts (pack position 0).
    pub fn data_start(&self) -> u64 {
        self.archive_offset + SIGNATURE_HEADER_SIZE
    }

    /// Returns the byte position where the next header starts.
    ///
    /// `None` if the declared offset overflows.
    pub fn next_header_position(&self) -> Option<u64> {
        self.data_start().checked_add(self.next_header_offset)
    }
}

/// Reads the start header at the current position, or searches for it.
///
/// With `max_check_start_position == None` the signature must be at the
/// current stream position. Otherwise the first `max_check_start_position`
/// bytes (plus the signature length) are scanned for a signature whose start
/// header CRC is valid, so archives behind an executable stub can be opened.
pub fn locate_start_header<R: Read + Seek>(
    reader: &mut R,
    max_check_start_position: Option<u64>,
) -> Result<StartHeader> {
    let base = reader.stream_position()?;
    let mut header = match (StartHeader::parse(reader), max_check_start_position) {
        (Ok(header), _) => header,
        (Err(Error::InvalidSignature), Some(limit)) => {
            reader.seek(SeekFrom::Start(base))?;
            find_start_header(reader, limit)?
        }
        (Err(e), _) => return Err(e),
    };
    header.archive_offset += base;
    Ok(header)
}

/// Scans forward for a signature followed by a valid start header.
///
/// Returns the header with `archive_offset` relative to where the scan began.
fn find_start_header<R: Read + Seek>(reader: &mut R, limit: u64) -> Result<StartHeader> {
    let base = reader.stream_position()?;
    let window = limit.saturating_add(SIGNATURE_HEADER_SIZE);
    let mut buffer = Vec::new();
    reader.by_ref().take(window).read_to_end(&mut buffer)?;

    let mut offset = 0usize;
    while let Some(pos) = buffer[offset..].windows(SIGNATURE.len()).position(|w| w == SIGNATURE) {
        let candidate = offset + pos;
        if candidate as u64 > limit {
            break;
        }
        let mut slice = &buffer[candidate..];
        if let Ok(mut header) = StartHeader::parse(&mut slice) {
            log::debug!("found 7z signature at offset {}", candidate);
            header.archive_offset = candidate as u64;
            reader.seek(SeekFrom::Start(base + candidate as u64 + SIGNATURE_HEADER_SIZE))?;
            return Ok(header);
        }
        offset = candidate + 1;
    }

    Err(Error::InvalidSignature)
}
