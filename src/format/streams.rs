//! Streams info structures for 7z archives.
//!
//! These structures describe the packed streams of an archive, the folders
//! (independently decodable units) with their coder graphs, and how each
//! folder's output is split into per-file substreams.

use crate::{Error, Result};
use std::io::Read;

use super::property_id;
use super::reader::{read_all_or_bits, read_bytes, read_count, read_u8, read_u32_le, read_variable_u64};

/// Maximum number of input or output streams in one folder.
const MAX_FOLDER_STREAMS: u64 = 64;

/// Resource limits for parsing and decoding.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum number of entries (files, folders, streams) allowed.
    pub max_entries: usize,
    /// Maximum bytes to read for header data.
    pub max_header_bytes: u64,
    /// Maximum number of coders in one folder.
    pub max_coders_per_folder: usize,
    /// Maximum packed bytes buffered for decoding one folder.
    pub max_pack_buffer: u64,
}

impl Default for ResourceLimits {
    /// Creates resource limits with the following default values:
    ///
    /// | Limit | Default Value |
    /// |-------|---------------|
    /// | `max_entries` | 1,000,000 |
    /// | `max_header_bytes` | 64 MiB |
    /// | `max_coders_per_folder` | 32 |
    /// | `max_pack_buffer` | 4 GiB |
    fn default() -> Self {
        Self {
            max_entries: 1_000_000,
            max_header_bytes: 64 << 20,
            max_coders_per_folder: 32,
            max_pack_buffer: 4 << 30,
        }
    }
}

impl ResourceLimits {
    /// Creates new resource limits with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resource limits with no restrictions.
    pub fn unlimited() -> Self {
        Self {
            max_entries: usize::MAX,
            max_header_bytes: u64::MAX,
            max_coders_per_folder: usize::MAX,
            max_pack_buffer: u64::MAX,
        }
    }

    /// Sets the maximum number of entries.
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Sets the maximum header bytes.
    pub fn max_header_bytes(mut self, max: u64) -> Self {
        self.max_header_bytes = max;
        self
    }

    /// Sets the maximum number of coders per folder.
    pub fn max_coders_per_folder(mut self, max: usize) -> Self {
        self.max_coders_per_folder = max;
        self
    }

    /// Sets the maximum packed bytes buffered per folder.
    pub fn max_pack_buffer(mut self, max: u64) -> Self {
        self.max_pack_buffer = max;
        self
    }

    fn check_count(&self, what: &str, count: usize) -> Result<()> {
        if count > self.max_entries {
            return Err(Error::ResourceLimitExceeded(format!(
                "too many {}: {}",
                what, count
            )));
        }
        Ok(())
    }
}

/// Information about packed (compressed) streams.
#[derive(Debug, Clone, Default)]
pub struct PackInfo {
    /// Position of the first pack stream, relative to the end of the signature header.
    pub pack_pos: u64,
    /// Sizes of each packed stream.
    pub pack_sizes: Vec<u64>,
    /// Optional CRC values for each packed stream.
    pub pack_crcs: Vec<Option<u32>>,
}

impl PackInfo {
    /// Parses PackInfo from a reader.
    ///
    /// The reader should be positioned after the `PACK_INFO` property ID.
    pub fn parse<R: Read>(r: &mut R, limits: &ResourceLimits) -> Result<Self> {
        let pack_pos = read_variable_u64(r)?;
        let num_streams = read_count(r)?;
        limits.check_count("pack streams", num_streams)?;

        let mut pack_sizes = vec![0; num_streams];
        let mut pack_crcs = vec![None; num_streams];

        loop {
            match read_u8(r)? {
                property_id::END => break,
                property_id::SIZE => {
                    for size in pack_sizes.iter_mut() {
                        *size = read_variable_u64(r)?;
                    }
                }
                property_id::CRC => {
                    let defined = read_all_or_bits(r, num_streams)?;
                    for (crc, has_crc) in pack_crcs.iter_mut().zip(defined) {
                        if has_crc {
                            *crc = Some(read_u32_le(r)?);
                        }
                    }
                }
                other => {
                    return Err(Error::malformed(
                        0,
                        format!("unexpected property ID in PackInfo: {:#x}", other),
                    ));
                }
            }
        }

        Ok(Self {
            pack_pos,
            pack_sizes,
            pack_crcs,
        })
    }

    /// Returns the number of pack streams.
    pub fn num_streams(&self) -> usize {
        self.pack_sizes.len()
    }
}

/// One method encoding for a coder position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltCoder {
    /// Method ID bytes (variable length, typically 1-4 bytes).
    pub method_id: Vec<u8>,
    /// Coder properties (e.g. LZMA lc/lp/pb byte and dictionary size).
    pub properties: Option<Vec<u8>>,
}

/// One codec stage of a folder.
///
/// Old archives may list alternative method encodings for one coder
/// position; decoding always uses the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coder {
    /// Method encodings for this position, never empty.
    pub alt_coders: Vec<AltCoder>,
    /// Number of input streams.
    pub num_in_streams: u64,
    /// Number of output streams.
    pub num_out_streams: u64,
}

impl Coder {
    /// Creates a simple one-input, one-output coder.
    pub fn new(method_id: &[u8], properties: Option<Vec<u8>>) -> Self {
        Self {
            alt_coders: vec![AltCoder {
                method_id: method_id.to_vec(),
                properties,
            }],
            num_in_streams: 1,
            num_out_streams: 1,
        }
    }

    /// Returns the method ID used for decoding.
    pub fn method_id(&self) -> &[u8] {
        self.alt_coders
            .first()
            .map(|alt| alt.method_id.as_slice())
            .unwrap_or_default()
    }

    /// Returns the properties used for decoding (empty if none).
    pub fn properties(&self) -> &[u8] {
        self.alt_coders
            .first()
            .and_then(|alt| alt.properties.as_deref())
            .unwrap_or_default()
    }

    /// Returns the method ID as a number, first byte most significant.
    ///
    /// LZMA `[03 01 01]` becomes `0x030101`.
    pub fn method_id_u64(&self) -> u64 {
        self.method_id()
            .iter()
            .take(8)
            .fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    fn parse<R: Read>(r: &mut R, limits: &ResourceLimits) -> Result<Self> {
        let mut alt_coders = Vec::new();

        let (num_in_streams, num_out_streams) = loop {
            let flags = read_u8(r)?;
            let method_id = read_bytes(r, (flags & 0x0F) as usize)?;

            let streams = if flags & 0x10 != 0 {
                (read_variable_u64(r)?, read_variable_u64(r)?)
            } else {
                (1, 1)
            };

            let properties = if flags & 0x20 != 0 {
                let size = read_variable_u64(r)?;
                if size > limits.max_header_bytes {
                    return Err(Error::ResourceLimitExceeded(
                        "coder properties too large".into(),
                    ));
                }
                Some(read_bytes(r, size as usize)?)
            } else {
                None
            };

            alt_coders.push(AltCoder {
                method_id,
                properties,
            });

            if flags & 0x80 == 0 {
                break streams;
            }
            if alt_coders.len() >= limits.max_coders_per_folder {
                return Err(Error::ResourceLimitExceeded(
                    "too many alternative methods".into(),
                ));
            }
        };

        Ok(Self {
            alt_coders,
            num_in_streams,
            num_out_streams,
        })
    }
}

/// A binding pair connecting one coder's output to another coder's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindPair {
    /// Folder-wide index of the input stream being fed.
    pub in_index: u64,
    /// Folder-wide index of the output stream feeding it.
    pub out_index: u64,
}

/// A folder (block) containing one or more coders.
///
/// Input and output streams are numbered folder-wide in coder order. Every
/// input is fed either by a packed stream or by exactly one bind pair; the
/// one output not consumed by a bind pair is the folder's main output.
#[derive(Debug, Clone, Default)]
pub struct Folder {
    /// List of coders in this folder.
    pub coders: Vec<Coder>,
    /// Binding pairs connecting coder streams.
    pub bind_pairs: Vec<BindPair>,
    /// Input stream index fed by each of the folder's packed streams, in pack order.
    pub packed_streams: Vec<u64>,
    /// Unpacked sizes for each output stream.
    pub unpack_sizes: Vec<u64>,
    /// Optional CRC of the main output.
    pub unpack_crc: Option<u32>,
}

impl Folder {
    /// Parses a single folder from a reader.
    pub fn parse<R: Read>(r: &mut R, limits: &ResourceLimits) -> Result<Self> {
        let num_coders = read_count(r)?;
        if num_coders == 0 {
            return Err(Error::malformed(0, "folder without coders"));
        }
        if num_coders > limits.max_coders_per_folder {
            return Err(Error::ResourceLimitExceeded(format!(
                "too many coders in folder: {}",
                num_coders
            )));
        }

        let mut coders = Vec::with_capacity(num_coders);
        for _ in 0..num_coders {
            coders.push(Coder::parse(r, limits)?);
        }

        let mut folder = Folder {
            coders,
            ..Default::default()
        };
        let total_in = folder.total_in_streams();
        let total_out = folder.total_out_streams();
        if total_out == 0 || total_in > MAX_FOLDER_STREAMS || total_out > MAX_FOLDER_STREAMS {
            return Err(Error::malformed(
                0,
                format!("unsupported stream counts: {} in, {} out", total_in, total_out),
            ));
        }

        let num_bind_pairs = total_out - 1;
        for _ in 0..num_bind_pairs {
            folder.bind_pairs.push(BindPair {
                in_index: read_variable_u64(r)?,
                out_index: read_variable_u64(r)?,
            });
        }

        if total_in < num_bind_pairs {
            return Err(Error::malformed(0, "more bind pairs than input streams"));
        }
        let num_packed = total_in - num_bind_pairs;
        if num_packed == 1 {
            // The single packed stream feeds the one unbound input
            if let Some(unbound) =
                (0..total_in).find(|&i| folder.find_bind_pair_for_in_stream(i).is_none())
            {
                folder.packed_streams.push(unbound);
            }
        } else {
            for _ in 0..num_packed {
                folder.packed_streams.push(read_variable_u64(r)?);
            }
        }

        folder.validate_graph()?;
        Ok(folder)
    }

    /// Returns the total number of input streams across all coders.
    pub fn total_in_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_in_streams).sum()
    }

    /// Returns the total number of output streams across all coders.
    pub fn total_out_streams(&self) -> u64 {
        self.coders.iter().map(|c| c.num_out_streams).sum()
    }

    /// Returns `(first_in_stream, first_out_stream)` for each coder.
    pub fn coder_stream_offsets(&self) -> Vec<(u64, u64)> {
        let mut offsets = Vec::with_capacity(self.coders.len());
        let (mut in_offset, mut out_offset) = (0, 0);
        for coder in &self.coders {
            offsets.push((in_offset, out_offset));
            in_offset += coder.num_in_streams;
            out_offset += coder.num_out_streams;
        }
        offsets
    }

    /// Returns the coder owning the given output stream.
    pub fn coder_for_out_stream(&self, out_index: u64) -> Option<usize> {
        self.coder_stream_offsets()
            .iter()
            .zip(&self.coders)
            .position(|(&(_, first_out), coder)| {
                out_index >= first_out && out_index < first_out + coder.num_out_streams
            })
    }

    /// Finds the bind pair feeding the given input stream.
    pub fn find_bind_pair_for_in_stream(&self, in_index: u64) -> Option<&BindPair> {
        self.bind_pairs.iter().find(|bp| bp.in_index == in_index)
    }

    /// Finds the bind pair consuming the given output stream.
    pub fn find_bind_pair_for_out_stream(&self, out_index: u64) -> Option<&BindPair> {
        self.bind_pairs.iter().find(|bp| bp.out_index == out_index)
    }

    /// Returns the position in `packed_streams` of the given input stream.
    pub fn find_packed_stream_index(&self, in_index: u64) -> Option<usize> {
        self.packed_streams.iter().position(|&ps| ps == in_index)
    }

    /// Returns the folder-wide index of the main (unbound) output stream.
    pub fn main_out_index(&self) -> Option<u64> {
        (0..self.total_out_streams()).find(|&i| self.find_bind_pair_for_out_stream(i).is_none())
    }

    /// Returns the size of the folder's main output.
    pub fn unpack_size(&self) -> u64 {
        self.main_out_index()
            .and_then(|i| self.unpack_sizes.get(i as usize).copied())
            .unwrap_or(0)
    }

    /// Returns the declared size of an output stream.
    pub fn out_stream_size(&self, out_index: u64) -> Option<u64> {
        self.unpack_sizes.get(out_index as usize).copied()
    }

    /// Validates the coder graph.
    ///
    /// Checks that every bind pair and packed stream index is in range, every
    /// input is fed exactly once, exactly one output is left unbound, and the
    /// bindings contain no cycle.
    pub fn validate_graph(&self) -> Result<()> {
        let total_in = self.total_in_streams();
        let total_out = self.total_out_streams();

        let mut in_fed = vec![false; total_in as usize];
        let mut out_used = vec![false; total_out as usize];

        for (i, bp) in self.bind_pairs.iter().enumerate() {
            if bp.in_index >= total_in || bp.out_index >= total_out {
                return Err(Error::malformed(
                    0,
                    format!(
                        "bind_pair[{}] ({} <- {}) out of range ({} in, {} out)",
                        i, bp.in_index, bp.out_index, total_in, total_out
                    ),
                ));
            }
            if std::mem::replace(&mut in_fed[bp.in_index as usize], true)
                || std::mem::replace(&mut out_used[bp.out_index as usize], true)
            {
                return Err(Error::malformed(0, format!("bind_pair[{}] reuses a stream", i)));
            }
        }

        for &ps in &self.packed_streams {
            if ps >= total_in || std::mem::replace(&mut in_fed[ps as usize], true) {
                return Err(Error::malformed(
                    0,
                    format!("invalid packed stream input index {}", ps),
                ));
            }
        }

        if in_fed.iter().any(|&fed| !fed) {
            return Err(Error::malformed(0, "coder input stream without a source"));
        }
        if out_used.iter().filter(|&&used| !used).count() != 1 {
            return Err(Error::malformed(0, "folder must have exactly one main output"));
        }

        // Following bindings from any coder must never come back to it
        let offsets = self.coder_stream_offsets();
        for start in 0..self.coders.len() {
            let mut stack = vec![start];
            let mut visited = vec![false; self.coders.len()];
            while let Some(coder) = stack.pop() {
                let (first_in, _) = offsets[coder];
                for in_index in first_in..first_in + self.coders[coder].num_in_streams {
                    let Some(bp) = self.find_bind_pair_for_in_stream(in_index) else {
                        continue;
                    };
                    let Some(source) = self.coder_for_out_stream(bp.out_index) else {
                        continue;
                    };
                    if source == start {
                        return Err(Error::malformed(0, "cycle in coder bindings"));
                    }
                    if !std::mem::replace(&mut visited[source], true) {
                        stack.push(source);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Unpack info containing folder definitions.
#[derive(Debug, Clone, Default)]
pub struct UnpackInfo {
    /// List of folders (blocks).
    pub folders: Vec<Folder>,
}

impl UnpackInfo {
    /// Parses UnpackInfo from a reader.
    ///
    /// The reader should be positioned after the `UNPACK_INFO` property ID.
    pub fn parse<R: Read>(r: &mut R, limits: &ResourceLimits) -> Result<Self> {
        let mut folders = Vec::new();

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::FOLDER => {
                    let num_folders = read_count(r)?;
                    limits.check_count("folders", num_folders)?;

                    if read_u8(r)? != 0 {
                        return Err(Error::UnsupportedFeature {
                            feature: "external folder definitions",
                        });
                    }

                    folders = Vec::with_capacity(num_folders.min(4096));
                    for _ in 0..num_folders {
                        folders.push(Folder::parse(r, limits)?);
                    }
                }

                property_id::CODERS_UNPACK_SIZE => {
                    for folder in &mut folders {
                        folder.unpack_sizes = (0..folder.total_out_streams())
                            .map(|_| read_variable_u64(r))
                            .collect::<std::io::Result<_>>()?;
                    }
                }

                property_id::CRC => {
                    let defined = read_all_or_bits(r, folders.len())?;
                    for (folder, has_crc) in folders.iter_mut().zip(defined) {
                        if has_crc {
                            folder.unpack_crc = Some(read_u32_le(r)?);
                        }
                    }
                }

                other => {
                    return Err(Error::malformed(
                        0,
                        format!("unexpected property ID in UnpackInfo: {:#x}", other),
                    ));
                }
            }
        }

        for (i, folder) in folders.iter().enumerate() {
            if folder.unpack_sizes.len() as u64 != folder.total_out_streams() {
                return Err(Error::malformed(
                    0,
                    format!("folder[{}] has no unpack sizes", i),
                ));
            }
        }

        Ok(Self { folders })
    }
}

/// Information about substreams within folders.
///
/// In solid archives, multiple files can be packed into a single folder.
/// SubStreamsInfo describes how many files are in each folder and their sizes.
#[derive(Debug, Clone, Default)]
pub struct SubStreamsInfo {
    /// Number of unpack streams (files) in each folder.
    pub num_unpack_streams_in_folders: Vec<u64>,
    /// Unpacked sizes of each substream, in folder order.
    pub unpack_sizes: Vec<u64>,
    /// Optional CRC values for each substream.
    pub digests: Vec<Option<u32>>,
}

impl SubStreamsInfo {
    /// Returns the layout used when an archive has no SubStreamsInfo:
    /// one substream per folder covering the whole folder.
    pub fn one_per_folder(folders: &[Folder]) -> Self {
        Self {
            num_unpack_streams_in_folders: vec![1; folders.len()],
            unpack_sizes: folders.iter().map(Folder::unpack_size).collect(),
            digests: folders.iter().map(|f| f.unpack_crc).collect(),
        }
    }

    /// Parses SubStreamsInfo from a reader.
    ///
    /// The reader should be positioned after the `SUBSTREAMS_INFO` property ID.
    pub fn parse<R: Read>(r: &mut R, folders: &[Folder], limits: &ResourceLimits) -> Result<Self> {
        let mut counts = vec![1u64; folders.len()];
        let mut unpack_sizes: Option<Vec<u64>> = None;
        let mut digests: Option<Vec<Option<u32>>> = None;

        loop {
            match read_u8(r)? {
                property_id::END => break,

                property_id::NUM_UNPACK_STREAM => {
                    let mut total = 0u64;
                    for count in counts.iter_mut() {
                        *count = read_variable_u64(r)?;
                        total = total.saturating_add(*count);
                    }
                    limits.check_count("substreams", usize::try_from(total).unwrap_or(usize::MAX))?;
                }

                property_id::SIZE => {
                    let mut sizes = Vec::new();
                    for (folder, &count) in folders.iter().zip(&counts) {
                        if count == 0 {
                            continue;
                        }
                        // The last size of each folder is implicit
                        let mut sum = 0u64;
                        for _ in 1..count {
                            let size = read_variable_u64(r)?;
                            sum = sum.saturating_add(size);
                            sizes.push(size);
                        }
                        sizes.push(folder.unpack_size().saturating_sub(sum));
                    }
                    unpack_sizes = Some(sizes);
                }

                property_id::CRC => {
                    let inherits = |folder: &Folder, count: u64| count == 1 && folder.unpack_crc.is_some();
                    let needing: u64 = folders
                        .iter()
                        .zip(&counts)
                        .filter(|&(f, &c)| !inherits(f, c))
                        .map(|(_, &c)| c)
                        .sum();

                    let defined = read_all_or_bits(r, needing as usize)?;
                    let mut defined = defined.into_iter();
                    let mut values = Vec::new();
                    for (folder, &count) in folders.iter().zip(&counts) {
                        if inherits(folder, count) {
                            values.push(folder.unpack_crc);
                            continue;
                        }
                        for _ in 0..count {
                            values.push(match defined.next() {
                                Some(true) => Some(read_u32_le(r)?),
                                _ => None,
                            });
                        }
                    }
                    digests = Some(values);
                }

                other => {
                    return Err(Error::malformed(
                        0,
                        format!("unexpected property ID in SubStreamsInfo: {:#x}", other),
                    ));
                }
            }
        }

        let unpack_sizes = match unpack_sizes {
            Some(sizes) => sizes,
            None => {
                let mut sizes = Vec::new();
                for (folder, &count) in folders.iter().zip(&counts) {
                    match count {
                        0 => {}
                        1 => sizes.push(folder.unpack_size()),
                        _ => return Err(Error::malformed(0, "missing substream sizes")),
                    }
                }
                sizes
            }
        };

        let digests = digests.unwrap_or_else(|| {
            folders
                .iter()
                .zip(&counts)
                .flat_map(|(folder, &count)| {
                    let crc = if count == 1 { folder.unpack_crc } else { None };
                    std::iter::repeat_n(crc, count as usize)
                })
                .collect()
        });

        Ok(Self {
            num_unpack_streams_in_folders: counts,
            unpack_sizes,
            digests,
        })
    }

    /// Returns the total number of substreams.
    pub fn total_streams(&self) -> u64 {
        self.num_unpack_streams_in_folders.iter().sum()
    }
}
