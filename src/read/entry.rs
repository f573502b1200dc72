//! Per-entry metadata view.

use std::time::SystemTime;

use crate::codec::{CodecRegistry, method};
use crate::database::ArchiveDatabase;
use crate::format::streams::Folder;
use crate::timestamp::Timestamp;

/// Metadata of one archive entry.
///
/// This struct is marked `#[non_exhaustive]`; pattern matching on `Entry`
/// requires a `..` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Entry {
    /// Index in the archive's file list.
    pub index: usize,
    /// Path within the archive.
    pub name: String,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Whether this is an anti-item.
    pub is_anti: bool,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Packed size of the entry's folder.
    ///
    /// Attributed to the first file of the folder; 0 for the others and for
    /// entries without data.
    pub pack_size: u64,
    /// CRC32 of the content, if stored.
    pub crc: Option<u32>,
    /// Stored start position, if any.
    pub start_pos: Option<u64>,
    /// Last write time.
    pub last_write_time: Option<Timestamp>,
    /// Creation time.
    pub creation_time: Option<Timestamp>,
    /// Last access time.
    pub access_time: Option<Timestamp>,
    /// Windows attributes, if stored.
    pub attributes: Option<u32>,
    /// Coder chain of the entry's folder, e.g. `"BCJ LZMA:24"`.
    pub methods: String,
    /// Folder holding the entry's data.
    pub folder_index: Option<usize>,
}

impl Entry {
    pub(crate) fn from_database(db: &ArchiveDatabase, registry: &CodecRegistry, index: usize) -> Self {
        let file = &db.files[index];
        let folder_index = db.folder_of_file(index);

        let pack_size = folder_index
            .filter(|&f| db.folder_start_file_index[f] == index)
            .map_or(0, |f| db.folder_full_pack_size(f));
        let methods = folder_index
            .map(|f| methods_string(&db.folders[f], registry))
            .unwrap_or_default();

        Self {
            index,
            name: file.name.clone(),
            is_directory: file.is_directory,
            is_anti: file.is_anti,
            size: file.unpack_size,
            pack_size,
            crc: file.crc,
            start_pos: file.start_pos,
            last_write_time: file.mtime,
            creation_time: file.ctime,
            access_time: file.atime,
            attributes: file.attributes,
            methods,
            folder_index,
        }
    }

    /// Returns the last write time as `SystemTime`.
    pub fn modified(&self) -> Option<SystemTime> {
        self.last_write_time.map(SystemTime::from)
    }
}

/// Describes a folder's coders, last coder first.
///
/// Coders are separated by a space and alternative methods of one coder by
/// `|`. Unknown methods contribute nothing. LZMA carries its dictionary size,
/// e.g. `LZMA:24` for 16 MiB.
pub fn methods_string(folder: &Folder, registry: &CodecRegistry) -> String {
    let mut out = String::new();
    for coder in folder.coders.iter().rev() {
        if !out.is_empty() {
            out.push(' ');
        }
        for (i, alt) in coder.alt_coders.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            let Some(name) = registry.name_of(&alt.method_id) else {
                continue;
            };
            out.push_str(name);
            if alt.method_id == method::LZMA {
                if let Some([_, d0, d1, d2, d3, ..]) = alt.properties.as_deref() {
                    out.push(':');
                    out.push_str(&size_value_string(u32::from_le_bytes([*d0, *d1, *d2, *d3])));
                }
            }
        }
    }
    out
}

/// Formats a dictionary size: `i` for `2^i`, else `Nm`, `Nk` or `Nb`.
pub fn size_value_string(value: u32) -> String {
    if value.is_power_of_two() {
        return value.trailing_zeros().to_string();
    }
    if value % (1 << 20) == 0 {
        format!("{}m", value >> 20)
    } else if value % (1 << 10) == 0 {
        format!("{}k", value >> 10)
    } else {
        format!("{}b", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::streams::{AltCoder, BindPair, Coder};

    fn lzma_coder(dict: u32) -> Coder {
        let mut props = vec![0x5D];
        props.extend_from_slice(&dict.to_le_bytes());
        Coder::new(method::LZMA, Some(props))
    }

    fn folder(coders: Vec<Coder>) -> Folder {
        Folder {
            bind_pairs: (1..coders.len() as u64)
                .map(|i| BindPair {
                    in_index: i - 1,
                    out_index: i,
                })
                .collect(),
            packed_streams: vec![coders.len() as u64 - 1],
            unpack_sizes: vec![0; coders.len()],
            unpack_crc: None,
            coders,
        }
    }

    #[test]
    fn test_size_value_string() {
        assert_eq!(size_value_string(1 << 24), "24");
        assert_eq!(size_value_string(1), "0");
        assert_eq!(size_value_string(3 << 20), "3m");
        assert_eq!(size_value_string(4 << 20), "22");
        assert_eq!(size_value_string(3 << 10), "3k");
        assert_eq!(size_value_string(1000), "1000b");
        assert_eq!(size_value_string(0), "0m");
    }

    #[test]
    fn test_methods_reverse_order() {
        let registry = CodecRegistry::default();
        let f = folder(vec![Coder::new(method::BCJ_X86, None), lzma_coder(3 << 20)]);
        assert_eq!(methods_string(&f, &registry), "LZMA:3m BCJ");
    }

    #[test]
    fn test_methods_short_lzma_props_have_no_suffix() {
        let registry = CodecRegistry::default();
        let f = folder(vec![Coder::new(method::LZMA, Some(vec![0x5D, 0, 0]))]);
        assert_eq!(methods_string(&f, &registry), "LZMA");
    }

    #[test]
    fn test_methods_alternatives_and_unknown_ids() {
        let registry = CodecRegistry::default();
        let mut coder = Coder::new(method::COPY, None);
        coder.alt_coders.push(AltCoder {
            method_id: method::DEFLATE.to_vec(),
            properties: None,
        });
        let unknown = Coder::new(&[0x7F, 0x7F], None);
        let f = folder(vec![unknown, coder]);
        assert_eq!(methods_string(&f, &registry), "Copy|Deflate ");
    }
}
