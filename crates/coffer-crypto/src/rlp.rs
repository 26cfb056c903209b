//! Streaming RLP encoding.
//!
//! Ethereum signing hashes the RLP encoding of the transaction without
//! materializing it: headers are emitted into the Keccak context and the
//! data field streams through in chunks. These helpers produce the header
//! bytes and per-field encodings; the caller owns the hash context.

/// Encoded length of a string (byte array) field of length `len`.
#[must_use]
pub fn string_encoded_len(len: usize, first_byte: Option<u8>) -> usize {
    match (len, first_byte) {
        (1, Some(b)) if b < 0x80 => 1,
        _ => header_len(len) + len,
    }
}

/// Encoded length of a scalar passed as minimal big-endian bytes.
#[must_use]
pub fn scalar_encoded_len(bytes: &[u8]) -> usize {
    let minimal = strip_leading_zeros(bytes);
    string_encoded_len(minimal.len(), minimal.first().copied())
}

fn header_len(len: usize) -> usize {
    if len <= 55 {
        1
    } else {
        1 + be_len(len as u64)
    }
}

fn be_len(value: u64) -> usize {
    ((64 - u64::from(value | 1).leading_zeros() as u64 + 7) / 8) as usize
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Header for a string of `len` payload bytes (long or short form).
///
/// Not applicable to the single-byte `< 0x80` case, which has no header.
#[must_use]
pub fn string_header(len: usize) -> Vec<u8> {
    header(0x80, len)
}

/// Header for a list whose payload totals `len` bytes.
#[must_use]
pub fn list_header(len: usize) -> Vec<u8> {
    header(0xC0, len)
}

fn header(offset: u8, len: usize) -> Vec<u8> {
    if len <= 55 {
        vec![offset + len as u8]
    } else {
        let len_bytes = (len as u64).to_be_bytes();
        let skip = len_bytes.iter().position(|&b| b != 0).unwrap_or(7);
        let mut out = Vec::with_capacity(9);
        out.push(offset + 55 + (8 - skip) as u8);
        out.extend_from_slice(&len_bytes[skip..]);
        out
    }
}

/// Full encoding of a string field.
#[must_use]
pub fn encode_string(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        return bytes.to_vec();
    }
    let mut out = string_header(bytes.len());
    out.extend_from_slice(bytes);
    out
}

/// Full encoding of a scalar given as (possibly zero-padded) big-endian
/// bytes. Zero encodes as the empty string.
#[must_use]
pub fn encode_scalar(bytes: &[u8]) -> Vec<u8> {
    encode_string(strip_leading_zeros(bytes))
}

/// Full encoding of a `u64` scalar.
#[must_use]
pub fn encode_u64(value: u64) -> Vec<u8> {
    encode_scalar(&value.to_be_bytes())
}
