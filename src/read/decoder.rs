//! Folder decoding.
//!
//! A folder's pack streams are read into memory, its coder graph is wired
//! from the main output backwards, and the main output is pumped into a sink.
//! Failures that belong to the folder (bad data, unsupported coders) come back
//! as a [`DecodeOutcome`]; only I/O failures of the archive stream, sink
//! errors and resource limits are returned as `Err`.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use crate::codec::{CodecRegistry, CopyDecoder, Decoder};
use crate::format::streams::{Folder, ResourceLimits};
use crate::{Error, READ_BUFFER_SIZE, Result};

/// Result of decoding one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum DecodeOutcome {
    /// The whole main output was produced and verified.
    Ok,
    /// The packed data is corrupted or truncated.
    DataError(String),
    /// A coder of the folder cannot be decoded.
    Unsupported(String),
}

impl DecodeOutcome {
    /// Returns `true` for [`DecodeOutcome::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, DecodeOutcome::Ok)
    }
}

/// Decodes folders using a codec registry.
#[derive(Debug, Clone, Copy)]
pub struct FolderDecoder<'a> {
    registry: &'a CodecRegistry,
    limits: &'a ResourceLimits,
}

impl<'a> FolderDecoder<'a> {
    /// Creates a decoder.
    pub fn new(registry: &'a CodecRegistry, limits: &'a ResourceLimits) -> Self {
        Self { registry, limits }
    }

    /// Decodes `folder` and passes its main output to `sink` in order.
    ///
    /// `pack_start` is the absolute position of the folder's first pack
    /// stream and `pack_sizes` the sizes of its pack streams, which are
    /// stored back to back.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the archive stream fails (other than ending early)
    /// - [`Error::ResourceLimitExceeded`] if the pack streams exceed `max_pack_buffer`
    /// - any error returned by `sink`
    pub fn decode<R: Read + Seek>(
        &self,
        reader: &mut R,
        pack_start: u64,
        pack_sizes: &[u64],
        folder: &Folder,
        sink: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<DecodeOutcome> {
        let packed = match self.read_pack_streams(reader, pack_start, pack_sizes)? {
            Some(packed) => packed,
            None => return Ok(DecodeOutcome::DataError("truncated pack stream".into())),
        };

        let Some(main_out) = folder.main_out_index() else {
            return Ok(DecodeOutcome::DataError("folder has no main output".into()));
        };

        let mut graph = Graph {
            folder,
            registry: self.registry,
            packed: packed.into_iter().map(Some).collect(),
            offsets: folder.coder_stream_offsets(),
        };
        let decoder = match graph.build_out_stream(main_out, 0) {
            Ok(decoder) => decoder,
            Err(e) if e.is_unsupported() => return Ok(DecodeOutcome::Unsupported(e.to_string())),
            Err(e) => return Ok(DecodeOutcome::DataError(e.to_string())),
        };

        let unpack_size = folder.unpack_size();
        let limited = decoder.take(unpack_size);
        let mut output: Box<dyn Read + Send> = match folder.unpack_crc {
            Some(crc) => Box::new(CrcVerifyingReader::new(limited, unpack_size, crc)),
            None => Box::new(limited),
        };

        let mut produced = 0u64;
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = match output.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Ok(DecodeOutcome::DataError(e.to_string())),
            };
            sink(&buf[..n])?;
            produced += n as u64;
        }

        if produced < unpack_size {
            return Ok(DecodeOutcome::DataError(format!(
                "decoded {} of {} bytes",
                produced, unpack_size
            )));
        }
        Ok(DecodeOutcome::Ok)
    }

    /// Reads the folder's pack streams, `None` if the archive ends early.
    fn read_pack_streams<R: Read + Seek>(
        &self,
        reader: &mut R,
        pack_start: u64,
        pack_sizes: &[u64],
    ) -> Result<Option<Vec<Vec<u8>>>> {
        let total = pack_sizes
            .iter()
            .try_fold(0u64, |acc, &s| acc.checked_add(s))
            .unwrap_or(u64::MAX);
        if total > self.limits.max_pack_buffer {
            return Err(Error::ResourceLimitExceeded(format!(
                "folder pack size {} exceeds limit {}",
                total, self.limits.max_pack_buffer
            )));
        }

        reader.seek(SeekFrom::Start(pack_start))?;
        let mut streams = Vec::with_capacity(pack_sizes.len());
        for &size in pack_sizes {
            let mut data = Vec::new();
            let read = reader.by_ref().take(size).read_to_end(&mut data)?;
            if (read as u64) < size {
                return Ok(None);
            }
            streams.push(data);
        }
        Ok(Some(streams))
    }
}

/// Coder graph being wired for one decode.
struct Graph<'a> {
    folder: &'a Folder,
    registry: &'a CodecRegistry,
    packed: Vec<Option<Vec<u8>>>,
    offsets: Vec<(u64, u64)>,
}

impl Graph<'_> {
    /// Builds the decoder producing the folder-wide output stream `out_index`.
    fn build_out_stream(&mut self, out_index: u64, depth: usize) -> Result<Box<dyn Decoder>> {
        if depth > self.folder.coders.len() {
            return Err(Error::malformed(0, "cycle in coder bindings"));
        }
        let coder_index = self
            .folder
            .coder_for_out_stream(out_index)
            .ok_or_else(|| Error::malformed(0, format!("no coder produces stream {}", out_index)))?;
        let coder = &self.folder.coders[coder_index];
        let (first_in, _) = self.offsets[coder_index];

        let mut inputs = Vec::with_capacity(coder.num_in_streams as usize);
        for in_index in first_in..first_in + coder.num_in_streams {
            inputs.push(self.build_in_stream(in_index, depth)?);
        }

        let size = self.folder.out_stream_size(out_index).unwrap_or(0);
        self.registry.build(coder, inputs, size)
    }

    fn build_in_stream(&mut self, in_index: u64, depth: usize) -> Result<Box<dyn Decoder>> {
        if let Some(pack_index) = self.folder.find_packed_stream_index(in_index) {
            let data = self
                .packed
                .get_mut(pack_index)
                .and_then(Option::take)
                .ok_or_else(|| Error::malformed(0, format!("pack stream {} used twice", pack_index)))?;
            let len = data.len() as u64;
            return Ok(Box::new(CopyDecoder::new(Cursor::new(data), len)));
        }

        let bind_pair = self
            .folder
            .find_bind_pair_for_in_stream(in_index)
            .ok_or_else(|| Error::malformed(0, format!("input stream {} has no source", in_index)))?;
        self.build_out_stream(bind_pair.out_index, depth + 1)
    }
}

/// Reader that checks a CRC32 once `expected_size` bytes were read.
///
/// The read that completes the stream fails with `InvalidData` on mismatch,
/// so the last chunk never reaches the sink.
pub(crate) struct CrcVerifyingReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    remaining: u64,
    expected_crc: u32,
}

impl<R: Read> CrcVerifyingReader<R> {
    pub(crate) fn new(inner: R, expected_size: u64, expected_crc: u32) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            remaining: expected_size,
            expected_crc,
        }
    }
}

impl<R: Read> Read for CrcVerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.remaining = self.remaining.saturating_sub(n as u64);
        if self.remaining == 0 {
            let actual = self.hasher.clone().finalize();
            if actual != self.expected_crc {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "folder CRC mismatch: expected {:#010x}, got {:#010x}",
                        self.expected_crc, actual
                    ),
                ));
            }
        }
        Ok(n)
    }
}
