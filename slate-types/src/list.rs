use slate_error::SlateExpect;

use crate::wire::{self, Cursor, Writer};
use crate::Type;

/// A list type, a variable-length sequence of one element type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListType {
    ty: Type,
}

impl ListType {
    /// Constructs a list type over the given element type.
    pub fn new(value_type: Type) -> Self {
        let mut writer = Writer::new();
        writer.tag(wire::TAG_LIST);
        writer.block(value_type.as_bytes());
        Self {
            ty: Type::from_encoding(writer.finish()),
        }
    }

    pub(crate) fn from_type_unchecked(ty: Type) -> Self {
        Self { ty }
    }

    /// The element type, as a zero-copy view into the same buffer.
    pub fn value_type(&self) -> Type {
        let bytes = self.ty.to_bytes();
        let mut cursor = Cursor::new(&bytes[1..]);
        let range = cursor.block().slate_expect("verified type encoding");
        Type::from_bytes_unverified(bytes.slice(1 + range.start..1 + range.end))
    }
}

impl From<ListType> for Type {
    fn from(value: ListType) -> Self {
        value.ty
    }
}
