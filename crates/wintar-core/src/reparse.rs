//! Reparse point decoding.
//!
//! `BackupRead` returns the raw `REPARSE_DATA_BUFFER` of a reparse point.
//! Symbolic links and mount points (junctions) carry a target path that is
//! archived as a tar symlink; other tags have no archive representation.

use std::fmt;

/// `IO_REPARSE_TAG_MOUNT_POINT`
pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
/// `IO_REPARSE_TAG_SYMLINK`
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

/// Tag (4) + data length (2) + reserved (2)
const REPARSE_HEADER_LEN: usize = 8;
/// Substitute/print name offsets and lengths
const NAME_FIELDS_LEN: usize = 8;

/// A decoded symlink or mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReparsePoint {
    /// Link target as shown to users (the print name)
    pub target: String,

    /// True for junctions / volume mount points
    pub is_mount_point: bool,
}

/// Reasons a reparse buffer cannot be turned into a `ReparsePoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReparseError {
    /// A tag other than symlink or mount point
    UnsupportedTag(u32),

    /// The buffer is too short or its offsets point outside of it
    Invalid(String),
}

impl fmt::Display for ReparseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReparseError::UnsupportedTag(tag) => write!(f, "unsupported reparse tag {:#010X}", tag),
            ReparseError::Invalid(reason) => write!(f, "invalid reparse buffer: {}", reason),
        }
    }
}

/// Decode a `REPARSE_DATA_BUFFER`.
pub fn decode_reparse_point(buf: &[u8]) -> Result<ReparsePoint, ReparseError> {
    if buf.len() < REPARSE_HEADER_LEN {
        return Err(ReparseError::Invalid(format!(
            "{} bytes is shorter than the reparse header",
            buf.len()
        )));
    }

    let tag = le_u32(buf, 0);
    let is_mount_point = match tag {
        IO_REPARSE_TAG_MOUNT_POINT => true,
        IO_REPARSE_TAG_SYMLINK => false,
        other => return Err(ReparseError::UnsupportedTag(other)),
    };

    let data = &buf[REPARSE_HEADER_LEN..];
    // Symlinks carry a flags word before the path buffer.
    let flags_len = if is_mount_point { 0 } else { 4 };
    if data.len() < NAME_FIELDS_LEN + flags_len {
        return Err(ReparseError::Invalid("name fields are missing".to_string()));
    }

    let substitute_offset = le_u16(data, 0) as usize;
    let substitute_len = le_u16(data, 2) as usize;
    let print_offset = le_u16(data, 4) as usize;
    let print_len = le_u16(data, 6) as usize;

    let path_buffer = &data[NAME_FIELDS_LEN + flags_len..];
    let print_name = name_at(path_buffer, print_offset, print_len)?;

    // Some tools leave the print name empty; fall back to the NT path.
    let target = if print_name.is_empty() {
        let substitute = name_at(path_buffer, substitute_offset, substitute_len)?;
        strip_nt_prefix(&substitute).to_string()
    } else {
        print_name
    };

    Ok(ReparsePoint {
        target,
        is_mount_point,
    })
}

fn name_at(path_buffer: &[u8], offset: usize, len: usize) -> Result<String, ReparseError> {
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= path_buffer.len())
        .ok_or_else(|| {
            ReparseError::Invalid(format!(
                "name at {}+{} exceeds the {} byte path buffer",
                offset,
                len,
                path_buffer.len()
            ))
        })?;
    Ok(crate::stream::decode_utf16le(&path_buffer[offset..end]))
}

fn strip_nt_prefix(path: &str) -> &str {
    path.strip_prefix("\\??\\").unwrap_or(path)
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mount_point_reparse_buffer, symlink_reparse_buffer};

    #[test]
    fn test_decode_symlink() {
        let buf = symlink_reparse_buffer("\\??\\C:\\target", "C:\\target", false);
        let rp = decode_reparse_point(&buf).unwrap();
        assert_eq!(rp.target, "C:\\target");
        assert!(!rp.is_mount_point);
    }

    #[test]
    fn test_decode_relative_symlink() {
        let buf = symlink_reparse_buffer("..\\sibling", "..\\sibling", true);
        let rp = decode_reparse_point(&buf).unwrap();
        assert_eq!(rp.target, "..\\sibling");
        assert!(!rp.is_mount_point);
    }

    #[test]
    fn test_decode_mount_point() {
        let buf = mount_point_reparse_buffer("\\??\\D:\\data", "D:\\data");
        let rp = decode_reparse_point(&buf).unwrap();
        assert_eq!(rp.target, "D:\\data");
        assert!(rp.is_mount_point);
    }

    #[test]
    fn test_empty_print_name_uses_substitute() {
        let buf = mount_point_reparse_buffer("\\??\\D:\\data", "");
        let rp = decode_reparse_point(&buf).unwrap();
        assert_eq!(rp.target, "D:\\data");
    }

    #[test]
    fn test_unsupported_tag() {
        // IO_REPARSE_TAG_DEDUP
        let mut buf = vec![0u8; 16];
        buf[..4].copy_from_slice(&0x8000_0013u32.to_le_bytes());
        assert_eq!(
            decode_reparse_point(&buf),
            Err(ReparseError::UnsupportedTag(0x8000_0013))
        );
    }

    #[test]
    fn test_truncated_buffer() {
        let mut buf = symlink_reparse_buffer("\\??\\C:\\target", "C:\\target", false);
        buf.truncate(24);
        assert!(matches!(
            decode_reparse_point(&buf),
            Err(ReparseError::Invalid(_))
        ));
    }
}
