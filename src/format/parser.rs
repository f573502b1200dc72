//! Main header parser for 7z archives.
//!
//! Handles both plain headers and encoded headers, whose real header is
//! stored as a compressed folder in the pack area.

use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::codec::CodecRegistry;
use crate::error::header_io_error;
use crate::read::decoder::{DecodeOutcome, FolderDecoder};
use crate::{Error, Result};

use super::files::FilesInfo;
use super::header::StartHeader;
use super::property_id;
use super::reader::{read_u8, read_variable_u64, skip_bytes};
use super::streams::{Folder, PackInfo, ResourceLimits, SubStreamsInfo, UnpackInfo};

/// Maximum nesting of encoded headers.
const MAX_ENCODED_HEADER_DEPTH: u32 = 4;

/// Parsed archive header data.
#[derive(Debug, Clone, Default)]
pub struct ArchiveHeader {
    /// Pack info (compressed stream info).
    pub pack_info: Option<PackInfo>,
    /// Unpack info (folder/coder definitions).
    pub unpack_info: Option<UnpackInfo>,
    /// Substreams info (per-file info within folders).
    pub substreams_info: Option<SubStreamsInfo>,
    /// Files info (file metadata).
    pub files_info: Option<FilesInfo>,
}

impl ArchiveHeader {
    /// Returns all folders.
    pub fn folders(&self) -> &[Folder] {
        self.unpack_info.as_ref().map_or(&[], |u| &u.folders)
    }

    /// Returns the sizes and CRCs of the substreams, in file order.
    fn substream_sizes_and_crcs(&self) -> (Vec<u64>, Vec<Option<u32>>) {
        match &self.substreams_info {
            Some(ss) => (ss.unpack_sizes.clone(), ss.digests.clone()),
            None => {
                let ss = SubStreamsInfo::one_per_folder(self.folders());
                (ss.unpack_sizes, ss.digests)
            }
        }
    }
}

/// Header parser with resource limit enforcement.
#[derive(Debug)]
pub struct HeaderParser<'a> {
    limits: &'a ResourceLimits,
    registry: &'a CodecRegistry,
    depth: u32,
}

impl<'a> HeaderParser<'a> {
    /// Creates a parser decoding encoded headers with `registry`.
    pub fn new(registry: &'a CodecRegistry, limits: &'a ResourceLimits) -> Self {
        Self {
            limits,
            registry,
            depth: 0,
        }
    }

    /// Parses header bytes starting with `HEADER` or `ENCODED_HEADER`.
    ///
    /// `reader` and `data_start` locate the pack area for encoded headers.
    pub fn parse<R: Read + Seek>(
        &mut self,
        data: Vec<u8>,
        reader: &mut R,
        data_start: u64,
    ) -> Result<ArchiveHeader> {
        let mut data = data;
        loop {
            let (&marker, rest) = data
                .split_first()
                .ok_or_else(|| Error::malformed(0, "empty header"))?;
            let mut cursor = Cursor::new(rest);
            match marker {
                property_id::HEADER => return self.parse_main_header(&mut cursor),
                property_id::ENCODED_HEADER => {
                    self.depth += 1;
                    if self.depth > MAX_ENCODED_HEADER_DEPTH {
                        return Err(Error::ResourceLimitExceeded(
                            "maximum encoded header depth exceeded".into(),
                        ));
                    }
                    let mut streams = ArchiveHeader::default();
                    self.parse_streams_info(&mut cursor, &mut streams)?;
                    data = self.decode_header(reader, &streams, data_start)?;
                }
                other => {
                    return Err(Error::malformed(
                        0,
                        format!("expected header marker, got {:#x}", other),
                    ));
                }
            }
        }
    }

    fn parse_main_header<R: Read>(&mut self, r: &mut R) -> Result<ArchiveHeader> {
        let mut header = ArchiveHeader::default();

        loop {
            match read_u8(r).map_err(header_io_error)? {
                property_id::END => break,

                property_id::ARCHIVE_PROPERTIES => skip_archive_properties(r)?,

                property_id::ADDITIONAL_STREAMS_INFO => {
                    return Err(Error::UnsupportedFeature {
                        feature: "additional streams",
                    });
                }

                property_id::MAIN_STREAMS_INFO => self.parse_streams_info(r, &mut header)?,

                property_id::FILES_INFO => {
                    let (sizes, crcs) = header.substream_sizes_and_crcs();
                    header.files_info = Some(
                        FilesInfo::parse(r, &sizes, &crcs, self.limits).map_err(eof_to_malformed)?,
                    );
                }

                other => {
                    return Err(Error::malformed(
                        0,
                        format!("unexpected property ID in header: {:#x}", other),
                    ));
                }
            }
        }

        Ok(header)
    }

    fn parse_streams_info<R: Read>(&mut self, r: &mut R, header: &mut ArchiveHeader) -> Result<()> {
        loop {
            match read_u8(r).map_err(header_io_error)? {
                property_id::END => break,

                property_id::PACK_INFO => {
                    header.pack_info = Some(PackInfo::parse(r, self.limits).map_err(eof_to_malformed)?);
                }

                property_id::UNPACK_INFO => {
                    header.unpack_info =
                        Some(UnpackInfo::parse(r, self.limits).map_err(eof_to_malformed)?);
                }

                property_id::SUBSTREAMS_INFO => {
                    header.substreams_info = Some(
                        SubStreamsInfo::parse(r, header.folders(), self.limits)
                            .map_err(eof_to_malformed)?,
                    );
                }

                other => {
                    return Err(Error::malformed(
                        0,
                        format!("unexpected property ID in streams info: {:#x}", other),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Decodes the folders of an encoded header into the next header bytes.
    fn decode_header<R: Read + Seek>(
        &self,
        reader: &mut R,
        streams: &ArchiveHeader,
        data_start: u64,
    ) -> Result<Vec<u8>> {
        let pack_info = streams
            .pack_info
            .as_ref()
            .ok_or_else(|| Error::malformed(0, "encoded header without pack info"))?;
        let folders = streams.folders();
        if folders.is_empty() {
            return Err(Error::malformed(0, "encoded header without folders"));
        }

        let decoder = FolderDecoder::new(self.registry, self.limits);
        let mut pos = data_start
            .checked_add(pack_info.pack_pos)
            .ok_or_else(|| Error::malformed(0, "pack position overflows"))?;
        let mut next_pack = 0usize;
        let mut decoded = Vec::new();

        for folder in folders {
            let count = folder.packed_streams.len();
            let sizes = pack_info
                .pack_sizes
                .get(next_pack..next_pack + count)
                .ok_or_else(|| Error::malformed(0, "encoded header folder without pack streams"))?;
            next_pack += count;

            if (decoded.len() as u64).saturating_add(folder.unpack_size())
                > self.limits.max_header_bytes
            {
                return Err(Error::ResourceLimitExceeded(format!(
                    "decoded header larger than {} bytes",
                    self.limits.max_header_bytes
                )));
            }

            let outcome = decoder.decode(reader, pos, sizes, folder, &mut |chunk| {
                decoded.extend_from_slice(chunk);
                Ok(())
            })?;
            match outcome {
                DecodeOutcome::Ok => {}
                DecodeOutcome::DataError(reason) => {
                    return Err(Error::DataError(format!("encoded header: {}", reason)));
                }
                DecodeOutcome::Unsupported(_) => {
                    return Err(Error::UnsupportedMethod {
                        method_id: unsupported_method_id(self.registry, folder),
                    });
                }
            }

            pos = sizes.iter().fold(pos, |p, &s| p.saturating_add(s));
        }

        log::debug!("decoded encoded header: {} bytes", decoded.len());
        Ok(decoded)
    }
}

/// Returns the first method of `folder` the registry cannot decode.
fn unsupported_method_id(registry: &CodecRegistry, folder: &Folder) -> u64 {
    folder
        .coders
        .iter()
        .find(|c| !registry.lookup(c.method_id()).is_some_and(|m| m.is_decodable()))
        .or_else(|| folder.coders.first())
        .map_or(0, |c| c.method_id_u64())
}

fn skip_archive_properties<R: Read>(r: &mut R) -> Result<()> {
    loop {
        let prop_type = read_variable_u64(r).map_err(header_io_error)?;
        if prop_type == 0 {
            return Ok(());
        }
        let size = read_variable_u64(r).map_err(header_io_error)?;
        skip_bytes(r, size).map_err(header_io_error)?;
    }
}

fn eof_to_malformed(e: Error) -> Error {
    match e {
        Error::Io(io) => header_io_error(io),
        other => other,
    }
}

/// Reads, verifies and parses the header that `start_header` points to.
///
/// An archive whose next header size is 0 has no entries.
///
/// # Errors
///
/// - [`Error::MalformedHeader`] for a bad CRC, a header outside the stream or bad structure
/// - [`Error::ResourceLimitExceeded`] if the header is larger than `max_header_bytes`
/// - [`Error::UnsupportedMethod`] / [`Error::DataError`] if an encoded header cannot be decoded
pub fn read_archive_header<R: Read + Seek>(
    reader: &mut R,
    start_header: &StartHeader,
    registry: &CodecRegistry,
    limits: &ResourceLimits,
) -> Result<ArchiveHeader> {
    if start_header.next_header_size == 0 {
        return Ok(ArchiveHeader::default());
    }
    if start_header.next_header_size > limits.max_header_bytes {
        return Err(Error::ResourceLimitExceeded(format!(
            "header size {} exceeds limit {}",
            start_header.next_header_size, limits.max_header_bytes
        )));
    }

    let header_pos = start_header
        .next_header_position()
        .ok_or_else(|| Error::malformed(12, "next header offset overflows"))?;
    reader.seek(SeekFrom::Start(header_pos))?;

    let mut data = Vec::new();
    reader
        .by_ref()
        .take(start_header.next_header_size)
        .read_to_end(&mut data)?;
    if (data.len() as u64) < start_header.next_header_size {
        return Err(Error::malformed(header_pos, "next header extends past end of archive"));
    }

    let actual_crc = crc32fast::hash(&data);
    if actual_crc != start_header.next_header_crc {
        return Err(Error::malformed(
            header_pos,
            format!(
                "next header CRC mismatch: expected {:#x}, got {:#x}",
                start_header.next_header_crc, actual_crc
            ),
        ));
    }

    HeaderParser::new(registry, limits).parse(data, reader, start_header.data_start())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::method;
    use crate::format::reader::write_variable_u64;

    fn parse(data: Vec<u8>) -> Result<ArchiveHeader> {
        let registry = CodecRegistry::default();
        let limits = ResourceLimits::default();
        HeaderParser::new(&registry, &limits).parse(data, &mut Cursor::new(Vec::new()), 0)
    }

    #[test]
    fn test_empty_header() {
        let header = parse(vec![property_id::HEADER, property_id::END]).unwrap();
        assert!(header.pack_info.is_none());
        assert!(header.unpack_info.is_none());
        assert!(header.files_info.is_none());
    }

    #[test]
    fn test_invalid_marker() {
        let err = parse(vec![0x99]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let err = parse(vec![property_id::HEADER, property_id::MAIN_STREAMS_INFO]).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));
    }

    #[test]
    fn test_header_with_pack_info() {
        let mut data = vec![
            property_id::HEADER,
            property_id::MAIN_STREAMS_INFO,
            property_id::PACK_INFO,
        ];
        write_variable_u64(&mut data, 0);
        write_variable_u64(&mut data, 1);
        data.push(property_id::SIZE);
        write_variable_u64(&mut data, 1000);
        data.extend_from_slice(&[property_id::END, property_id::END, property_id::END]);

        let header = parse(data).unwrap();
        assert_eq!(header.pack_info.unwrap().pack_sizes, vec![1000]);
    }

    #[test]
    fn test_archive_properties_skipped() {
        let mut data = vec![property_id::HEADER, property_id::ARCHIVE_PROPERTIES];
        write_variable_u64(&mut data, 0x42);
        write_variable_u64(&mut data, 3);
        data.extend_from_slice(&[1, 2, 3]);
        data.push(0);
        data.push(property_id::END);
        assert!(parse(data).is_ok());
    }

    #[test]
    fn test_additional_streams_unsupported() {
        let err = parse(vec![property_id::HEADER, property_id::ADDITIONAL_STREAMS_INFO]).unwrap_err();
        assert!(err.is_unsupported());
    }

    /// Streams info for one Copy folder of `size` bytes at pack position `pos`.
    fn copy_streams_info(pos: u64, size: u64, crc: Option<u32>) -> Vec<u8> {
        let mut data = vec![property_id::PACK_INFO];
        write_variable_u64(&mut data, pos);
        write_variable_u64(&mut data, 1);
        data.push(property_id::SIZE);
        write_variable_u64(&mut data, size);
        data.push(property_id::END);

        data.extend_from_slice(&[property_id::UNPACK_INFO, property_id::FOLDER]);
        write_variable_u64(&mut data, 1);
        data.push(0); // not external
        write_variable_u64(&mut data, 1); // one coder
        data.push(method::COPY.len() as u8);
        data.extend_from_slice(method::COPY);
        data.push(property_id::CODERS_UNPACK_SIZE);
        write_variable_u64(&mut data, size);
        if let Some(crc) = crc {
            data.push(property_id::CRC);
            data.push(1);
            data.extend_from_slice(&crc.to_le_bytes());
        }
        data.push(property_id::END);
        data.push(property_id::END);
        data
    }

    #[test]
    fn test_encoded_header_decoded_through_copy_folder() {
        let inner = vec![property_id::HEADER, property_id::END];
        let mut archive = vec![0u8; 8];
        archive.extend_from_slice(&inner);

        let mut data = vec![property_id::ENCODED_HEADER];
        data.extend(copy_streams_info(8, inner.len() as u64, Some(crc32fast::hash(&inner))));

        let registry = CodecRegistry::default();
        let limits = ResourceLimits::default();
        let header = HeaderParser::new(&registry, &limits)
            .parse(data, &mut Cursor::new(archive), 0)
            .unwrap();
        assert!(header.files_info.is_none());
    }

    #[test]
    fn test_encoded_header_crc_mismatch() {
        let inner = vec![property_id::HEADER, property_id::END];
        let mut data = vec![property_id::ENCODED_HEADER];
        data.extend(copy_streams_info(0, 2, Some(0x1234_5678)));

        let registry = CodecRegistry::default();
        let limits = ResourceLimits::default();
        let err = HeaderParser::new(&registry, &limits)
            .parse(data, &mut Cursor::new(inner), 0)
            .unwrap_err();
        assert!(matches!(err, Error::DataError(_)));
    }

    #[test]
    fn test_encoded_header_depth_limit() {
        // The decoded bytes are the same encoded header again
        let mut data = vec![property_id::ENCODED_HEADER];
        let len = 1 + copy_streams_info(0, 0, None).len() as u64;
        let len = 1 + copy_streams_info(0, len, None).len() as u64;
        data.extend(copy_streams_info(0, len, None));
        let archive = data.clone();

        let registry = CodecRegistry::default();
        let limits = ResourceLimits::default();
        let err = HeaderParser::new(&registry, &limits)
            .parse(data, &mut Cursor::new(archive), 0)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceLimitExceeded(_)));
    }

    #[test]
    fn test_read_archive_header_crc_mismatch() {
        let mut archive = vec![0u8; 32];
        archive.extend_from_slice(&[property_id::HEADER, property_id::END]);
        let start = StartHeader {
            version_major: 0,
            version_minor: 4,
            start_header_crc: 0,
            next_header_offset: 0,
            next_header_size: 2,
            next_header_crc: 0xBAD,
            archive_offset: 0,
        };
        let err = read_archive_header(
            &mut Cursor::new(archive),
            &start,
            &CodecRegistry::default(),
            &ResourceLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));
    }

    #[test]
    fn test_read_archive_header_past_end() {
        let start = StartHeader {
            version_major: 0,
            version_minor: 4,
            start_header_crc: 0,
            next_header_offset: 100,
            next_header_size: 2,
            next_header_crc: 0,
            archive_offset: 0,
        };
        let err = read_archive_header(
            &mut Cursor::new(vec![0u8; 40]),
            &start,
            &CodecRegistry::default(),
            &ResourceLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));
    }
}
