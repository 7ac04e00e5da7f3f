//! Wire Field Encoding
//!
//! Every AVDECC PDU and AEM descriptor is a fixed-layout record of big-endian
//! integers, with at most a trailing variable-length list whose offset and
//! count are carried in the fixed part.
//!
//! Decoders in this crate call [`ensure_len`] (or [`ensure_list`]) once for the
//! layout they are about to read and then project fields with the `read_*`
//! helpers. The helpers index the slice directly, so they must only be used on
//! a range that has already been checked.
//!
//! # Example
//!
//! ```
//! use avdecc_rs::encoding::{ensure_len, read_u16, read_u64};
//!
//! let data = [0x00, 0x24, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0, 7];
//! ensure_len(&data, 12).unwrap();
//! assert_eq!(read_u16(&data, 0), 0x0024);
//! assert_eq!(read_u64(&data, 4), 7);
//! ```

use bytes::{Buf, BufMut};

use crate::error::FormatError;

/// Result type for decoding operations
pub type Result<T> = std::result::Result<T, FormatError>;

/// Length of the fixed UTF-8 string fields used by AEM descriptors
pub const AEM_STRING_LEN: usize = 64;

/// Check that `data` holds at least `required` bytes
pub fn ensure_len(data: &[u8], required: usize) -> Result<()> {
    if data.len() < required {
        return Err(FormatError::TruncatedFrame {
            required,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Check that a list of `count` items of `item_len` bytes starting at `offset`
/// fits inside `data`. Returns the end offset of the list.
pub fn ensure_list(data: &[u8], offset: usize, count: usize, item_len: usize) -> Result<usize> {
    let end = count
        .checked_mul(item_len)
        .and_then(|len| len.checked_add(offset))
        .ok_or_else(|| FormatError::MalformedPdu("list length overflow".into()))?;
    ensure_len(data, end)?;
    Ok(end)
}

pub fn read_u8(data: &[u8], offset: usize) -> u8 {
    data[offset]
}

pub fn read_u16(data: &[u8], offset: usize) -> u16 {
    (&data[offset..]).get_u16()
}

/// Read a 24-bit field into the low bits of a `u32`
pub fn read_u24(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([0, data[offset], data[offset + 1], data[offset + 2]])
}

pub fn read_u32(data: &[u8], offset: usize) -> u32 {
    (&data[offset..]).get_u32()
}

pub fn read_u64(data: &[u8], offset: usize) -> u64 {
    (&data[offset..]).get_u64()
}

pub fn read_mac(data: &[u8], offset: usize) -> [u8; 6] {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&data[offset..offset + 6]);
    mac
}

/// Read a fixed-width, NUL-padded UTF-8 string field.
///
/// Invalid UTF-8 sequences are replaced rather than rejected: names are
/// informational and a bad byte should not make the whole descriptor unusable.
pub fn read_string(data: &[u8], offset: usize, len: usize) -> String {
    let raw = &data[offset..offset + len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Write a 24-bit field from the low bits of a `u32`
pub fn put_u24(buf: &mut impl BufMut, value: u32) {
    let bytes = value.to_be_bytes();
    buf.put_slice(&bytes[1..]);
}

/// Write a fixed-width string field, truncating and NUL-padding as needed
pub fn put_string(buf: &mut impl BufMut, value: &str, len: usize) {
    let bytes = value.as_bytes();
    let take = bytes.len().min(len);
    buf.put_slice(&bytes[..take]);
    buf.put_bytes(0, len - take);
}
