//! Low-level binary reading utilities for 7z header parsing.
//!
//! All multi-byte fixed-width fields are little-endian. Counts and sizes use
//! the 7z variable-length integer encoding read by [`read_variable_u64`].

use std::io::{self, Read};

/// Reads a variable-length encoded u64 from a reader.
///
/// The number of leading one bits in the first byte tells how many extra
/// bytes follow; the remaining low bits of the first byte are the most
/// significant part of the value:
///
/// - `0xxxxxxx`: value 0-127, no extra bytes
/// - `10xxxxxx` + 1 byte: value up to 0x3FFF
/// - `110xxxxx` + 2 bytes: value up to 0x1F_FFFF
/// - ...
/// - `11111111` + 8 bytes: full u64
///
/// # Errors
///
/// Returns an error if the reader encounters EOF or an I/O error.
pub fn read_variable_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let first = read_u8(r)? as u64;
    let mut mask = 0x80u64;
    let mut value = 0u64;

    for i in 0..8 {
        if first & mask == 0 {
            let high = first & (mask - 1);
            return Ok(value | (high << (8 * i)));
        }
        value |= (read_u8(r)? as u64) << (8 * i);
        mask >>= 1;
    }

    Ok(value)
}

/// Reads a variable-length count and converts it to `usize`.
///
/// Values that do not fit the platform's `usize` are reported as
/// `InvalidData`.
pub fn read_count<R: Read>(r: &mut R) -> io::Result<usize> {
    let value = read_variable_u64(r)?;
    usize::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("count {value} does not fit in memory"),
        )
    })
}

/// Reads a single byte.
pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Reads an unsigned 32-bit little-endian integer.
pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Reads an unsigned 64-bit little-endian integer.
pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads a packed boolean vector of `count` entries.
///
/// Bits are consumed from the most significant bit of each byte down.
pub fn read_bool_vector<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<bool>> {
    let bytes = read_bytes(r, count.div_ceil(8))?;
    Ok((0..count)
        .map(|i| bytes[i / 8] & (0x80 >> (i % 8)) != 0)
        .collect())
}

/// Reads a boolean vector preceded by the "all defined" marker byte.
///
/// A non-zero marker means every entry is `true` and no bit vector follows.
pub fn read_all_or_bits<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<bool>> {
    if read_u8(r)? != 0 {
        Ok(vec![true; count])
    } else {
        read_bool_vector(r, count)
    }
}

/// Reads exactly `count` bytes into a new vector.
///
/// The buffer grows with the data actually read, so a bogus huge count on a
/// short input fails with `UnexpectedEof` instead of a huge allocation.
pub fn read_bytes<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(count.min(64 * 1024));
    let read = r.by_ref().take(count as u64).read_to_end(&mut buf)?;
    if read != count {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {count} bytes, got {read}"),
        ));
    }
    Ok(buf)
}

/// Skips `count` bytes.
pub fn skip_bytes<R: Read>(r: &mut R, count: u64) -> io::Result<()> {
    let skipped = io::copy(&mut r.by_ref().take(count), &mut io::sink())?;
    if skipped != count {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

/// Encodes a value with the variable-length integer encoding.
#[cfg(test)]
pub(crate) fn write_variable_u64(buf: &mut Vec<u8>, value: u64) {
    let mut extra = 0usize;
    while extra < 8 && value >= 1u64 << (7 * (extra + 1)) {
        extra += 1;
    }
    let mut first = !(0xFFu8 >> extra);
    if extra < 8 {
        first |= (value >> (8 * extra)) as u8;
    }
    buf.push(first);
    buf.extend_from_slice(&value.to_le_bytes()[..extra]);
}
