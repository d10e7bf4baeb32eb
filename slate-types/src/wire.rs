//! The binary encoding of types.
//!
//! A type is one contiguous, self-describing buffer: a one-byte tag
//! followed by a kind-specific payload. Nested types are embedded as
//! length-prefixed byte blocks, so any subrange holding a type is itself a
//! complete encoding. Metadata (name and attributes) is a transparent
//! `ENRICHED` layer wrapping the encoding of the underlying type.
//!
//! All integers are little-endian `u32` unless noted otherwise. The
//! canonical form never contains an `ENRICHED` layer without a name and
//! without attributes, which makes byte equality coincide with type
//! equality.

use slate_error::{slate_bail, SlateExpect, SlateResult};

pub(crate) const TAG_NULL: u8 = 0;
pub(crate) const TAG_BOOL: u8 = 1;
pub(crate) const TAG_INT64: u8 = 2;
pub(crate) const TAG_UINT64: u8 = 3;
pub(crate) const TAG_DOUBLE: u8 = 4;
pub(crate) const TAG_DURATION: u8 = 5;
pub(crate) const TAG_TIME: u8 = 6;
pub(crate) const TAG_STRING: u8 = 7;
pub(crate) const TAG_BLOB: u8 = 8;
pub(crate) const TAG_IP: u8 = 9;
pub(crate) const TAG_SUBNET: u8 = 10;
pub(crate) const TAG_ENUMERATION: u8 = 11;
pub(crate) const TAG_LIST: u8 = 12;
pub(crate) const TAG_MAP: u8 = 13;
pub(crate) const TAG_RECORD: u8 = 14;
pub(crate) const TAG_ENRICHED: u8 = 15;

/// An append-only encoder for one type.
#[derive(Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn tag(&mut self, tag: u8) {
        self.buf.push(tag);
    }

    pub(crate) fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// A length-prefixed byte block (strings and nested type encodings).
    pub(crate) fn block(&mut self, bytes: &[u8]) {
        self.u32(u32::try_from(bytes.len()).slate_expect("block fits in u32"));
        self.buf.extend_from_slice(bytes);
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// A bounds-checked reader over one type encoding.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    pub(crate) fn u8(&mut self) -> SlateResult<u8> {
        let Some(&value) = self.buf.get(self.pos) else {
            slate_bail!(InvalidSerde: "type encoding truncated at offset {}", self.pos);
        };
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn u32(&mut self) -> SlateResult<u32> {
        let Some(bytes) = self.buf.get(self.pos..self.pos + 4) else {
            slate_bail!(InvalidSerde: "type encoding truncated at offset {}", self.pos);
        };
        self.pos += 4;
        let mut le = [0u8; 4];
        le.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(le))
    }

    pub(crate) fn bytes(&mut self, len: usize) -> SlateResult<&'a [u8]> {
        let Some(bytes) = self.buf.get(self.pos..self.pos + len) else {
            slate_bail!(InvalidSerde: "type encoding truncated at offset {}", self.pos);
        };
        self.pos += len;
        Ok(bytes)
    }

    /// Reads a length-prefixed block and returns its range within the
    /// underlying buffer.
    pub(crate) fn block(&mut self) -> SlateResult<std::ops::Range<usize>> {
        let len = self.u32()? as usize;
        let start = self.pos;
        self.bytes(len)?;
        Ok(start..start + len)
    }

    pub(crate) fn str_block(&mut self) -> SlateResult<&'a str> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s),
            Err(_) => slate_bail!(InvalidSerde: "type encoding contains invalid utf-8"),
        }
    }

    /// Reads a length-prefixed block and returns a cursor over it.
    pub(crate) fn sub_cursor(&mut self) -> SlateResult<Cursor<'a>> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        Ok(Cursor::new(bytes))
    }
}

/// Verifies that `buf` holds exactly one well-formed type encoding.
pub(crate) fn verify(buf: &[u8]) -> SlateResult<()> {
    let mut cursor = Cursor::new(buf);
    verify_one(&mut cursor)?;
    if !cursor.is_exhausted() {
        slate_bail!(InvalidSerde: "trailing bytes after type encoding");
    }
    Ok(())
}

fn verify_one(cursor: &mut Cursor<'_>) -> SlateResult<()> {
    match cursor.u8()? {
        TAG_NULL | TAG_BOOL | TAG_INT64 | TAG_UINT64 | TAG_DOUBLE | TAG_DURATION | TAG_TIME
        | TAG_STRING | TAG_BLOB | TAG_IP | TAG_SUBNET => Ok(()),
        TAG_ENUMERATION => {
            let count = cursor.u32()?;
            let mut previous_key = None;
            for _ in 0..count {
                let key = cursor.u32()?;
                if previous_key.is_some_and(|previous| previous >= key) {
                    slate_bail!(InvalidSerde: "enumeration keys must be sorted and unique");
                }
                previous_key = Some(key);
                cursor.str_block()?;
            }
            Ok(())
        }
        TAG_LIST => verify_block(cursor),
        TAG_MAP => {
            verify_block(cursor)?;
            verify_block(cursor)
        }
        TAG_RECORD => {
            let count = cursor.u32()?;
            if count == 0 {
                slate_bail!(InvalidSerde: "record types must have at least one field");
            }
            for _ in 0..count {
                cursor.str_block()?;
                verify_block(cursor)?;
            }
            Ok(())
        }
        TAG_ENRICHED => {
            verify_block(cursor)?;
            let has_name = cursor.u8()?;
            if has_name > 1 {
                slate_bail!(InvalidSerde: "invalid name marker in metadata layer");
            }
            if has_name == 1 {
                cursor.str_block()?;
            }
            let attr_count = cursor.u32()?;
            if has_name == 0 && attr_count == 0 {
                slate_bail!(InvalidSerde: "metadata layer without name or attributes");
            }
            for _ in 0..attr_count {
                cursor.str_block()?;
                let has_value = cursor.u8()?;
                if has_value > 1 {
                    slate_bail!(InvalidSerde: "invalid attribute value marker");
                }
                if has_value == 1 {
                    cursor.str_block()?;
                }
            }
            Ok(())
        }
        tag => slate_bail!(InvalidSerde: "unknown type tag {tag}"),
    }
}

fn verify_block(cursor: &mut Cursor<'_>) -> SlateResult<()> {
    let mut nested = cursor.sub_cursor()?;
    verify_one(&mut nested)?;
    if !nested.is_exhausted() {
        slate_bail!(InvalidSerde: "trailing bytes after nested type encoding");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_encoding() {
        assert!(verify(&[]).is_err());
        assert!(verify(&[TAG_LIST]).is_err());
        assert!(verify(&[TAG_LIST, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn scalar_encodings() {
        for tag in [TAG_NULL, TAG_BOOL, TAG_INT64, TAG_STRING, TAG_SUBNET] {
            assert!(verify(&[tag]).is_ok());
        }
        assert!(verify(&[99]).is_err());
        assert!(verify(&[TAG_NULL, TAG_NULL]).is_err());
    }

    #[test]
    fn empty_metadata_layer_is_rejected() {
        let mut writer = Writer::new();
        writer.tag(TAG_ENRICHED);
        writer.block(&[TAG_NULL]);
        writer.u8(0);
        writer.u32(0);
        assert!(verify(&writer.finish()).is_err());
    }
}
