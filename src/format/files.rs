//! FilesInfo parsing: per-file names, flags, times and attributes.

use crate::database::FileItem;
use crate::timestamp::Timestamp;
use crate::{Error, Result};
use std::io::Read;

use super::property_id;
use super::reader::{
    read_all_or_bits, read_bool_vector, read_bytes, read_count, read_u8, read_u32_le, read_u64_le,
};
use super::streams::ResourceLimits;

/// Maximum length for UTF-16LE names (in code units).
const MAX_UTF16_STRING_LENGTH: usize = 32768;

/// Files info from the archive header.
#[derive(Debug, Clone, Default)]
pub struct FilesInfo {
    /// File records in header order.
    pub files: Vec<FileItem>,
}

impl FilesInfo {
    /// Parses FilesInfo from a reader.
    ///
    /// The reader should be positioned after the `FILES_INFO` property ID.
    /// `unpack_sizes` and `digests` are the substream sizes and CRCs; they
    /// are assigned in order to the files that have a data stream.
    ///
    /// Every property is parsed within its declared size. Unknown properties
    /// are skipped.
    pub fn parse<R: Read>(
        r: &mut R,
        unpack_sizes: &[u64],
        digests: &[Option<u32>],
        limits: &ResourceLimits,
    ) -> Result<Self> {
        let num_files = read_count(r)?;
        if num_files > limits.max_entries {
            return Err(Error::ResourceLimitExceeded(format!(
                "too many files: {}",
                num_files
            )));
        }

        let mut files = vec![FileItem::default(); num_files];
        let mut empty_streams = vec![false; num_files];
        let mut empty_files = Vec::new();
        let mut anti_items = Vec::new();

        loop {
            let prop_id = read_u8(r)?;
            if prop_id == property_id::END {
                break;
            }

            let size = read_count(r)?;
            if size as u64 > limits.max_header_bytes {
                return Err(Error::malformed(0, format!("property {:#x} too large", prop_id)));
            }
            let data = read_bytes(r, size)?;
            let mut p = data.as_slice();

            match prop_id {
                property_id::NAME => {
                    check_not_external(&mut p, "external file names")?;
                    for file in files.iter_mut() {
                        file.name = read_utf16le_string(&mut p)?;
                    }
                }
                property_id::EMPTY_STREAM => {
                    empty_streams = read_bool_vector(&mut p, num_files)?;
                }
                property_id::EMPTY_FILE => {
                    let num_empty = empty_streams.iter().filter(|&&e| e).count();
                    empty_files = read_bool_vector(&mut p, num_empty)?;
                }
                property_id::ANTI => {
                    let num_empty = empty_streams.iter().filter(|&&e| e).count();
                    anti_items = read_bool_vector(&mut p, num_empty)?;
                }
                property_id::CTIME => {
                    read_defined_values(&mut p, &mut files, read_u64_le, |f, t| {
                        f.ctime = Some(Timestamp::from_filetime(t))
                    })?;
                }
                property_id::ATIME => {
                    read_defined_values(&mut p, &mut files, read_u64_le, |f, t| {
                        f.atime = Some(Timestamp::from_filetime(t))
                    })?;
                }
                property_id::MTIME => {
                    read_defined_values(&mut p, &mut files, read_u64_le, |f, t| {
                        f.mtime = Some(Timestamp::from_filetime(t))
                    })?;
                }
                property_id::WIN_ATTRIBUTES => {
                    read_defined_values(&mut p, &mut files, read_u32_le, |f, a| {
                        f.attributes = Some(a)
                    })?;
                }
                property_id::START_POS => {
                    read_defined_values(&mut p, &mut files, read_u64_le, |f, pos| {
                        f.start_pos = Some(pos)
                    })?;
                }
                property_id::DUMMY => {}
                other => {
                    log::warn!("skipping unknown file property {:#x} ({} bytes)", other, size);
                }
            }
        }

        let mut empty_index = 0;
        let mut stream_index = 0;
        for (file, &is_empty_stream) in files.iter_mut().zip(&empty_streams) {
            if is_empty_stream {
                file.has_stream = false;
                file.is_directory = !empty_files.get(empty_index).copied().unwrap_or(false);
                file.is_anti = anti_items.get(empty_index).copied().unwrap_or(false);
                file.unpack_size = 0;
                empty_index += 1;
            } else {
                file.has_stream = true;
                file.is_directory = false;
                file.unpack_size = *unpack_sizes.get(stream_index).ok_or_else(|| {
                    Error::malformed(0, "more files with data than substreams")
                })?;
                file.crc = digests.get(stream_index).copied().flatten();
                stream_index += 1;
            }
        }

        if stream_index != unpack_sizes.len() {
            return Err(Error::malformed(
                0,
                format!(
                    "{} substreams but {} files with data",
                    unpack_sizes.len(),
                    stream_index
                ),
            ));
        }

        Ok(Self { files })
    }
}

fn check_not_external(p: &mut &[u8], feature: &'static str) -> Result<()> {
    if read_u8(p)? != 0 {
        return Err(Error::UnsupportedFeature { feature });
    }
    Ok(())
}

/// Reads a UTF-16LE null-terminated string.
fn read_utf16le_string<R: Read>(r: &mut R) -> Result<String> {
    let mut units = Vec::new();
    loop {
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf)?;
        let unit = u16::from_le_bytes(buf);
        if unit == 0 {
            break;
        }
        if units.len() >= MAX_UTF16_STRING_LENGTH {
            return Err(Error::ResourceLimitExceeded(format!(
                "file name exceeds {} UTF-16 code units",
                MAX_UTF16_STRING_LENGTH
            )));
        }
        units.push(unit);
    }
    String::from_utf16(&units).map_err(|_| Error::malformed(0, "invalid UTF-16 file name"))
}

/// Reads a "defined" vector, the external flag, then one value per defined file.
fn read_defined_values<'a, T>(
    p: &mut &'a [u8],
    files: &mut [FileItem],
    read_value: fn(&mut &'a [u8]) -> std::io::Result<T>,
    mut assign: impl FnMut(&mut FileItem, T),
) -> Result<()> {
    let defined = read_all_or_bits(p, files.len())?;
    check_not_external(p, "external file properties")?;
    for (file, has_value) in files.iter_mut().zip(defined) {
        if has_value {
            assign(file, read_value(p)?);
        }
    }
    Ok(())
}
