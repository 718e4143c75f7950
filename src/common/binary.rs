//! Little-endian field access shared by the header, table and directory codecs.
//!
//! Every multi-byte integer in a compound file is stored little-endian. The
//! readers here are bounds-checked and report how much data was missing; the
//! writers assume the caller sized the buffer for the fixed record layout.

use zerocopy::{FromBytes, LE, U16, U32};

/// Binary parsing error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryError {
    /// Not enough data to read the requested type
    InsufficientData { expected: usize, available: usize },
    /// Failed to parse the data
    ParseError(String),
}

impl std::fmt::Display for BinaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryError::InsufficientData {
                expected,
                available,
            } => {
                write!(
                    f,
                    "Insufficient data: expected {}, got {}",
                    expected, available
                )
            },
            BinaryError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for BinaryError {}

/// Result type for binary operations
pub type BinaryResult<T> = Result<T, BinaryError>;

#[inline]
fn check_len(data: &[u8], offset: usize, width: usize) -> BinaryResult<()> {
    if offset + width > data.len() {
        return Err(BinaryError::InsufficientData {
            expected: offset + width,
            available: data.len(),
        });
    }
    Ok(())
}

/// Read a little-endian u16 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use olestore::common::binary::read_u16_le;
/// let data = [0x34, 0x12, 0x78, 0x56];
/// assert_eq!(read_u16_le(&data, 0).unwrap(), 0x1234);
/// assert_eq!(read_u16_le(&data, 2).unwrap(), 0x5678);
/// ```
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> BinaryResult<u16> {
    check_len(data, offset, 2)?;
    U16::<LE>::read_from_bytes(&data[offset..offset + 2])
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read u16".to_string()))
}

/// Read a little-endian u32 from a byte slice at the given offset.
///
/// # Examples
///
/// ```
/// use olestore::common::binary::read_u32_le;
/// let data = [0xFE, 0xFF, 0xFF, 0xFF];
/// assert_eq!(read_u32_le(&data, 0).unwrap(), 0xFFFF_FFFE);
/// ```
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> BinaryResult<u32> {
    check_len(data, offset, 4)?;
    U32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .map_err(|_| BinaryError::ParseError("Failed to read u32".to_string()))
}

/// Write a little-endian u16 at `offset`.
#[inline]
pub fn write_u16_le(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write a little-endian u32 at `offset`.
#[inline]
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Write a little-endian u64 at `offset`.
#[inline]
pub fn write_u64_le(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Decode a run of little-endian u32 values filling the whole slice.
///
/// Trailing bytes that do not form a full value are ignored.
pub fn read_u32_array_le(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|chunk| {
            U32::<LE>::read_from_bytes(chunk)
                .map(|v| v.get())
                .unwrap_or(0)
        })
        .collect()
}

/// Encode `values` into `data` as consecutive little-endian u32 values.
pub fn write_u32_array_le(data: &mut [u8], values: &[u32]) {
    for (chunk, value) in data.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
}

/// Decode a UTF-16LE string of `char_count` code units starting at `offset`.
///
/// Unpaired surrogates are replaced rather than rejected.
///
/// # Examples
///
/// ```
/// use olestore::common::binary::parse_utf16le_string_len;
/// let data = vec![0x48, 0x00, 0x65, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F, 0x00];
/// assert_eq!(parse_utf16le_string_len(&data, 0, 5), "Hello");
/// assert_eq!(parse_utf16le_string_len(&data, 0, 3), "Hel");
/// ```
pub fn parse_utf16le_string_len(data: &[u8], offset: usize, char_count: usize) -> String {
    let byte_count = char_count * 2;
    if offset + byte_count > data.len() {
        return String::new();
    }

    let units: Vec<u16> = data[offset..offset + byte_count]
        .chunks_exact(2)
        .map(|chunk| {
            U16::<LE>::read_from_bytes(chunk)
                .map(|v| v.get())
                .unwrap_or(0)
        })
        .collect();

    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u16_le() {
        let data = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(read_u16_le(&data, 0).unwrap(), 0x1234);
        assert_eq!(read_u16_le(&data, 2).unwrap(), 0x5678);
        assert!(read_u16_le(&data, 3).is_err());
    }

    #[test]
    fn test_read_u32_insufficient() {
        let data = [0x01, 0x02, 0x03];
        assert_eq!(
            read_u32_le(&data, 0),
            Err(BinaryError::InsufficientData {
                expected: 4,
                available: 3
            })
        );
    }

    #[test]
    fn test_u64_write() {
        let mut data = [0u8; 12];
        write_u64_le(&mut data, 4, 0x0102_0304_0506_0708);
        assert_eq!(&data[4..], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&data[..4], &[0; 4]);
    }

    #[test]
    fn test_u32_arrays() {
        let mut data = [0u8; 8];
        write_u32_array_le(&mut data, &[1, 0xFFFF_FFFE]);
        assert_eq!(read_u32_array_le(&data), vec![1, 0xFFFF_FFFE]);
    }

    #[test]
    fn test_utf16_with_control_prefix() {
        let name: Vec<u8> = "\u{5}SummaryInformation"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let parsed = parse_utf16le_string_len(&name, 0, name.len() / 2);
        assert_eq!(parsed, "\u{5}SummaryInformation");
    }
}
