use slate_error::SlateExpect;

use crate::wire::{self, Cursor, Writer};
use crate::Type;

/// A map type, an association from a key type to a value type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapType {
    ty: Type,
}

impl MapType {
    /// Constructs a map type from its key and value types.
    pub fn new(key_type: Type, value_type: Type) -> Self {
        let mut writer = Writer::new();
        writer.tag(wire::TAG_MAP);
        writer.block(key_type.as_bytes());
        writer.block(value_type.as_bytes());
        Self {
            ty: Type::from_encoding(writer.finish()),
        }
    }

    pub(crate) fn from_type_unchecked(ty: Type) -> Self {
        Self { ty }
    }

    /// The key type, as a zero-copy view into the same buffer.
    pub fn key_type(&self) -> Type {
        let bytes = self.ty.to_bytes();
        let mut cursor = Cursor::new(&bytes[1..]);
        let range = cursor.block().slate_expect("verified type encoding");
        Type::from_bytes_unverified(bytes.slice(1 + range.start..1 + range.end))
    }

    /// The value type, as a zero-copy view into the same buffer.
    pub fn value_type(&self) -> Type {
        let bytes = self.ty.to_bytes();
        let mut cursor = Cursor::new(&bytes[1..]);
        cursor.block().slate_expect("verified type encoding");
        let range = cursor.block().slate_expect("verified type encoding");
        Type::from_bytes_unverified(bytes.slice(1 + range.start..1 + range.end))
    }
}

impl From<MapType> for Type {
    fn from(value: MapType) -> Self {
        value.ty
    }
}
