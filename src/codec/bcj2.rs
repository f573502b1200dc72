//! BCJ2 decoder for x86 executables.
//!
//! BCJ2 is the only standard 7z coder with several inputs. The encoder moves
//! the targets of `CALL` (E8), `JMP` (E9) and conditional jumps (0F 8x) out of
//! the code into separate streams:
//!
//! - input 0 (main): the code with the 4-byte targets removed
//! - input 1 (call): absolute `CALL` targets, big-endian
//! - input 2 (jump): absolute `JMP`/`Jcc` targets, big-endian
//! - input 3 (range): range-coded bits telling which opcodes were converted
//!
//! The decoder needs all four inputs at once; the folder decoder resolves
//! each of them (packed stream or another coder's output) before building it.

use std::io::{self, BufReader, Read};

use crate::format::streams::Coder;
use crate::{Error, Result};

use super::{Decoder, method};

const NUM_MOVE_BITS: u32 = 5;
const NUM_BIT_MODEL_TOTAL_BITS: u32 = 11;
const BIT_MODEL_TOTAL: u32 = 1 << NUM_BIT_MODEL_TOTAL_BITS;
const TOP_VALUE: u32 = 1 << 24;
const INITIAL_PROB: u32 = BIT_MODEL_TOTAL / 2;

/// Decoded output buffered per refill.
const OUTPUT_CHUNK: usize = 32 * 1024;

/// Range decoder for the BCJ2 selector bits.
pub struct RangeDecoder<R> {
    reader: R,
    range: u32,
    code: u32,
}

impl<R: Read> RangeDecoder<R> {
    /// Creates a range decoder, consuming the 5 initialization bytes.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let mut init = [0u8; 5];
        reader.read_exact(&mut init)?;
        let code = init[1..]
            .iter()
            .fold(0u32, |code, &b| (code << 8) | b as u32);

        Ok(Self {
            reader,
            range: 0xFFFF_FFFF,
            code,
        })
    }

    /// Decodes one bit with probability `prob` (of a zero, out of 2048).
    ///
    /// Returns the bit and the adapted probability. A range stream that ends
    /// early is padded with zero bytes.
    pub fn decode_bit(&mut self, prob: u32) -> io::Result<(bool, u32)> {
        let bound = (self.range >> NUM_BIT_MODEL_TOTAL_BITS) * prob;

        let result = if self.code < bound {
            self.range = bound;
            (false, prob + ((BIT_MODEL_TOTAL - prob) >> NUM_MOVE_BITS))
        } else {
            self.range -= bound;
            self.code -= bound;
            (true, prob - (prob >> NUM_MOVE_BITS))
        };

        if self.range < TOP_VALUE {
            let mut byte = [0u8; 1];
            match self.reader.read(&mut byte) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(e),
            }
            self.code = (self.code << 8) | byte[0] as u32;
            self.range <<= 8;
        }

        Ok(result)
    }
}

/// BCJ2 decoder merging the four streams back into x86 code.
pub struct Bcj2Decoder<R> {
    main: BufReader<R>,
    call: R,
    jump: R,
    range_decoder: RangeDecoder<R>,
    /// 256 contexts for E8 keyed by the previous byte, one for E9, one for Jcc.
    probs: [u32; 258],
    prev_byte: u8,
    written: u32,
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl<R> std::fmt::Debug for Bcj2Decoder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bcj2Decoder")
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl<R: Read> Bcj2Decoder<R> {
    /// Creates a BCJ2 decoder from its main, call, jump and range inputs.
    pub fn new(main: R, call: R, jump: R, range: R) -> io::Result<Self> {
        Ok(Self {
            main: BufReader::new(main),
            call,
            jump,
            range_decoder: RangeDecoder::new(range)?,
            probs: [INITIAL_PROB; 258],
            prev_byte: 0,
            written: 0,
            buffer: Vec::with_capacity(OUTPUT_CHUNK + 4),
            buffer_pos: 0,
        })
    }

    #[inline]
    fn is_jcc(prev: u8, curr: u8) -> bool {
        prev == 0x0F && (curr & 0xF0) == 0x80
    }

    #[inline]
    fn is_jump(prev: u8, curr: u8) -> bool {
        (curr & 0xFE) == 0xE8 || Self::is_jcc(prev, curr)
    }

    #[inline]
    fn prob_index(prev: u8, curr: u8) -> usize {
        match curr {
            0xE8 => prev as usize,
            0xE9 => 256,
            _ => 257,
        }
    }

    fn fill_buffer(&mut self) -> io::Result<()> {
        self.buffer.clear();
        self.buffer_pos = 0;

        while self.buffer.len() < OUTPUT_CHUNK {
            let mut byte = [0u8; 1];
            if self.main.read(&mut byte)? == 0 {
                break;
            }
            let b = byte[0];
            self.written = self.written.wrapping_add(1);
            self.buffer.push(b);

            if !Self::is_jump(self.prev_byte, b) {
                self.prev_byte = b;
                continue;
            }

            let idx = Self::prob_index(self.prev_byte, b);
            let (converted, prob) = self.range_decoder.decode_bit(self.probs[idx])?;
            self.probs[idx] = prob;
            if !converted {
                self.prev_byte = b;
                continue;
            }

            let source = if b == 0xE8 {
                &mut self.call
            } else {
                &mut self.jump
            };
            let mut dest = [0u8; 4];
            source.read_exact(&mut dest)?;

            let relative = u32::from_be_bytes(dest).wrapping_sub(self.written.wrapping_add(4));
            self.buffer.extend_from_slice(&relative.to_le_bytes());
            self.prev_byte = (relative >> 24) as u8;
            self.written = self.written.wrapping_add(4);
        }

        Ok(())
    }
}

impl<R: Read> Read for Bcj2Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffer_pos >= self.buffer.len() {
            self.fill_buffer()?;
        }

        let available = &self.buffer[self.buffer_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.buffer_pos += n;
        Ok(n)
    }
}

impl<R: Read + Send> Decoder for Bcj2Decoder<R> {
    fn method_id(&self) -> &'static [u8] {
        method::BCJ2
    }
}

pub(super) fn build_decoder(
    inputs: Vec<Box<dyn Decoder>>,
    _coder: &Coder,
    _unpack_size: u64,
) -> Result<Box<dyn Decoder>> {
    let inputs: [Box<dyn Decoder>; 4] = inputs.try_into().map_err(|_| Error::UnsupportedFeature {
        feature: "BCJ2 coder without exactly four inputs",
    })?;
    let [main, call, jump, range] = inputs;
    let decoder = Bcj2Decoder::new(main, call, jump, range)
        .map_err(|e| Error::DataError(format!("BCJ2 range stream: {}", e)))?;
    Ok(Box::new(decoder))
}
