//! Binary encoding of a single identity record.
//!
//! Layout, all integers `u32` little-endian:
//!
//! ```text
//! name_len | name (UTF-8) | template_count | { template_len | template bytes } *
//! ```
//!
//! Every template carries its own length so records may mix template formats.

use thiserror::Error;

use crate::registry::domain::identity_record::IdentityRecord;
use crate::shared::template::Template;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated record: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("length tag {len} at offset {offset} overruns the record")]
    BadLength { offset: usize, len: u32 },
    #[error("display name is not valid UTF-8")]
    InvalidName,
    #[error("record has no templates")]
    EmptyRecord,
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

pub fn encode(record: &IdentityRecord) -> Vec<u8> {
    let name = record.display_name().as_bytes();
    let payload: usize = record.templates().iter().map(|t| 4 + t.len()).sum();
    let mut out = Vec::with_capacity(8 + name.len() + payload);

    put_u32(&mut out, name.len());
    out.extend_from_slice(name);
    put_u32(&mut out, record.len());
    for template in record.templates() {
        put_u32(&mut out, template.len());
        out.extend_from_slice(template.as_bytes());
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<IdentityRecord, DecodeError> {
    let mut reader = Reader { bytes, offset: 0 };

    let name = reader.block()?;
    let name = std::str::from_utf8(name).map_err(|_| DecodeError::InvalidName)?;

    let count = reader.u32()?;
    // Each template needs at least its 4-byte tag; reject absurd counts
    // before allocating.
    if count as usize > reader.remaining() / 4 {
        return Err(DecodeError::BadLength {
            offset: reader.offset - 4,
            len: count,
        });
    }
    let mut templates = Vec::with_capacity(count as usize);
    for _ in 0..count {
        templates.push(Template::from(reader.block()?));
    }

    if reader.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }

    IdentityRecord::from_parts(name.to_string(), templates).ok_or(DecodeError::EmptyRecord)
}

fn put_u32(out: &mut Vec<u8>, value: usize) {
    out.extend_from_slice(&(value as u32).to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::Truncated {
                offset: self.offset,
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes: &'a [u8] = self.bytes;
        let slice = &bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Length-prefixed byte block.
    fn block(&mut self) -> Result<&'a [u8], DecodeError> {
        let tag_offset = self.offset;
        let len = self.u32()?;
        if len as usize > self.remaining() {
            return Err(DecodeError::BadLength {
                offset: tag_offset,
                len,
            });
        }
        self.take(len as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record(name: &str, templates: &[&[u8]]) -> IdentityRecord {
        let templates = templates.iter().map(|t| Template::from(*t)).collect();
        IdentityRecord::from_parts(name.to_string(), templates).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode(&record("ab", &[&[7, 8, 9]]));
        assert_eq!(
            bytes,
            vec![2, 0, 0, 0, b'a', b'b', 1, 0, 0, 0, 3, 0, 0, 0, 7, 8, 9]
        );
    }

    #[rstest]
    #[case(record("alice", &[&[1, 2, 3, 4]]))]
    #[case(record("", &[&[]]))]
    #[case(record("José Ñ", &[&[1], &[2, 3], &[1]]))]
    #[case(record("varied", &[&[0; 2048], &[5; 3]]))]
    fn test_roundtrip(#[case] r: IdentityRecord) {
        assert_eq!(decode(&encode(&r)), Ok(r));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = encode(&record("alice", &[&[1, 2, 3, 4]]));
        for cut in [0, 3, 6, bytes.len() - 5] {
            assert!(
                decode(&bytes[..cut]).is_err(),
                "cut at {cut} should fail"
            );
        }
    }

    #[test]
    fn test_truncated_reports_offset() {
        let err = decode(&[5, 0]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                offset: 0,
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn test_name_length_overrun() {
        let err = decode(&[200, 0, 0, 0, b'a']).unwrap_err();
        assert_eq!(err, DecodeError::BadLength { offset: 0, len: 200 });
    }

    #[test]
    fn test_template_length_overrun() {
        let mut bytes = encode(&record("a", &[&[1, 2]]));
        let tag = bytes.len() - 6;
        bytes[tag] = 99;
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::BadLength { offset: tag, len: 99 })
        );
    }

    #[test]
    fn test_absurd_template_count() {
        let bytes = [0, 0, 0, 0, 255, 255, 255, 255];
        assert!(matches!(decode(&bytes), Err(DecodeError::BadLength { .. })));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode(&record("a", &[&[1]]));
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(decode(&bytes), Err(DecodeError::TrailingBytes(2)));
    }

    #[test]
    fn test_zero_templates_is_corrupt() {
        let bytes = [1, 0, 0, 0, b'a', 0, 0, 0, 0];
        assert_eq!(decode(&bytes), Err(DecodeError::EmptyRecord));
    }

    #[test]
    fn test_invalid_utf8_name() {
        let bytes = [1, 0, 0, 0, 0xFF, 1, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(decode(&bytes), Err(DecodeError::InvalidName));
    }
}
