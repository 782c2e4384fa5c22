//! Extended attribute decoding.
//!
//! The `BACKUP_EA_DATA` stream holds a chain of `FILE_FULL_EA_INFORMATION`
//! entries:
//!
//! ```text
//! next_entry_offset: u32
//! flags:             u8
//! name_length:       u8
//! value_length:      u16
//! name:              [u8; name_length] + NUL
//! value:             [u8; value_length]
//! ```

use std::fmt;

const ENTRY_HEADER_LEN: usize = 8;

/// One extended attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedAttribute {
    pub name: String,
    pub value: Vec<u8>,
    pub flags: u8,
}

/// The EA buffer is inconsistent with its own offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEaBuffer(pub String);

impl fmt::Display for InvalidEaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid extended attribute buffer: {}", self.0)
    }
}

/// Decode a full `FILE_FULL_EA_INFORMATION` chain.
pub fn decode_extended_attributes(mut buf: &[u8]) -> Result<Vec<ExtendedAttribute>, InvalidEaBuffer> {
    let mut attributes = Vec::new();

    while !buf.is_empty() {
        if buf.len() < ENTRY_HEADER_LEN {
            return Err(InvalidEaBuffer(format!(
                "{} trailing bytes cannot hold an entry header",
                buf.len()
            )));
        }

        let next_offset = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let flags = buf[4];
        let name_len = buf[5] as usize;
        let value_len = u16::from_le_bytes([buf[6], buf[7]]) as usize;

        let name_start = ENTRY_HEADER_LEN;
        let value_start = name_start + name_len + 1;
        if value_start + value_len > buf.len() || next_offset > buf.len() {
            return Err(InvalidEaBuffer(format!(
                "entry needs {} bytes but {} remain",
                (value_start + value_len).max(next_offset),
                buf.len()
            )));
        }

        attributes.push(ExtendedAttribute {
            name: String::from_utf8_lossy(&buf[name_start..name_start + name_len]).into_owned(),
            value: buf[value_start..value_start + value_len].to_vec(),
            flags,
        });

        if next_offset == 0 {
            break;
        }
        buf = &buf[next_offset..];
    }

    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ea_buffer;

    #[test]
    fn test_decode_single() {
        let buf = ea_buffer(&[("USER.COMMENT", b"hello")]);
        let eas = decode_extended_attributes(&buf).unwrap();
        assert_eq!(eas.len(), 1);
        assert_eq!(eas[0].name, "USER.COMMENT");
        assert_eq!(eas[0].value, b"hello");
    }

    #[test]
    fn test_decode_chain() {
        let buf = ea_buffer(&[("A", b"1"), ("LONGER.NAME", b""), ("C", &[0, 1, 2, 3, 4])]);
        let eas = decode_extended_attributes(&buf).unwrap();
        let names: Vec<_> = eas.iter().map(|ea| ea.name.as_str()).collect();
        assert_eq!(names, vec!["A", "LONGER.NAME", "C"]);
        assert_eq!(eas[2].value, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_buffer() {
        assert!(decode_extended_attributes(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_value_past_end() {
        let mut buf = ea_buffer(&[("NAME", b"value")]);
        buf.truncate(12);
        assert!(decode_extended_attributes(&buf).is_err());
    }
}
