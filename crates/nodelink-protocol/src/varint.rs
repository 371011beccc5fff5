//! Base-128 variable-length integers ("varints") and the zigzag transform.
//!
//! A varint stores 7 payload bits per byte, low-order group first. The
//! high bit of every byte is a continuation flag: `1` means "another byte
//! follows", `0` means "this is the last byte".
//!
//! ```text
//!   300 = 0b1_0010_1100
//!
//!   byte 0: 1 0101100   ← continuation set, low 7 bits
//!   byte 1: 0 0000010   ← continuation clear, next 7 bits
//! ```
//!
//! A 64-bit value never needs more than [`MAX_VARINT_LEN`] bytes, so the
//! decoder refuses to read past that point no matter what the input says.

/// Maximum number of bytes a 64-bit varint can occupy.
pub const MAX_VARINT_LEN: usize = 10;

const CONTINUATION: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7F;

/// Outcome of scanning the front of a buffer for one varint.
enum Scan {
    /// A full varint: its value and how many bytes it used.
    Complete(u64, usize),
    /// The buffer ended before the terminating byte.
    Incomplete,
}

fn scan(buf: &[u8]) -> Scan {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        // At i == 9 the shift is 63: only the lowest payload bit fits,
        // the rest falls off the top, same as any 64-bit protobuf reader.
        value |= u64::from(byte & PAYLOAD_MASK) << (7 * i);
        if byte & CONTINUATION == 0 || i + 1 == MAX_VARINT_LEN {
            return Scan::Complete(value, i + 1);
        }
    }
    Scan::Incomplete
}

/// Decodes one varint from the front of `buf`, advancing it past the
/// consumed bytes.
///
/// The three outcomes callers need to tell apart:
///
/// - `Some(value)`: a varint was read.
/// - `None`: `buf` was already empty **and** `permit_eof` is set. This is
///   the clean "no more data" signal, distinct from a decoded zero.
/// - `Some(0)`: the buffer ended in the middle of a varint (or was empty
///   with `permit_eof` unset). The input is malformed; the whole buffer is
///   consumed and zero is returned so decoding can carry on.
///
/// Never consumes more than [`MAX_VARINT_LEN`] bytes.
pub fn decode_varint(buf: &mut &[u8], permit_eof: bool) -> Option<u64> {
    if buf.is_empty() {
        return if permit_eof { None } else { Some(0) };
    }
    match scan(buf) {
        Scan::Complete(value, len) => {
            *buf = &buf[len..];
            Some(value)
        }
        Scan::Incomplete => {
            tracing::debug!(
                available = buf.len(),
                "stream ended inside a varint"
            );
            *buf = &buf[buf.len()..];
            Some(0)
        }
    }
}

/// Reads a varint from the front of `buf` without consuming anything.
///
/// Returns the value and its encoded width, or `None` if `buf` does not
/// yet hold a complete varint. The frame decoder uses this to wait for
/// more bytes instead of misreading a header split across two reads.
pub fn peek_varint(buf: &[u8]) -> Option<(u64, usize)> {
    match scan(buf) {
        Scan::Complete(value, len) => Some((value, len)),
        Scan::Incomplete => None,
    }
}

/// Appends `value` to `out` as a varint and returns the number of bytes
/// written.
///
/// Zero encodes as a single `0x00` byte.
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    loop {
        let byte = (value as u8) & PAYLOAD_MASK;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | CONTINUATION);
    }
    out.len() - start
}

/// Number of bytes [`encode_varint`] would write for `value`.
///
/// Signed protobuf integers (`int32`/`int64`) are sign-extended to 64 bits
/// before encoding, so a negative value cast with `as u64` has its top bit
/// set and always reports the full 10-byte width.
pub fn size_of_varint(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Maps a signed integer onto an unsigned one so that small magnitudes
/// stay small: `0 → 0, -1 → 1, 1 → 2, -2 → 3, …`.
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Exact inverse of [`zigzag_encode`].
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
