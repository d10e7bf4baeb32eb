use slate_error::{slate_bail, SlateExpect, SlateResult};

use crate::wire::{self, Cursor, Writer};
use crate::Type;

/// A single variant of an enumeration type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnumerationField {
    /// The numeric key of the variant.
    pub key: u32,
    /// The human-readable name of the variant.
    pub name: String,
}

impl EnumerationField {
    /// Constructs an enumeration field.
    pub fn new(key: u32, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
        }
    }
}

/// An enumeration type with explicit numeric keys.
///
/// The canonical encoding stores variants sorted by key, so two
/// enumerations with the same variants are byte-identical regardless of
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnumerationType {
    ty: Type,
}

impl EnumerationType {
    /// Constructs an enumeration type. Fails if two variants share a key.
    pub fn new(fields: impl IntoIterator<Item = EnumerationField>) -> SlateResult<Self> {
        let mut fields: Vec<EnumerationField> = fields.into_iter().collect();
        fields.sort_by_key(|field| field.key);
        for pair in fields.windows(2) {
            if pair[0].key == pair[1].key {
                slate_bail!(
                    "duplicate enumeration key {} for variants `{}` and `{}`",
                    pair[0].key,
                    pair[0].name,
                    pair[1].name
                );
            }
        }
        let mut writer = Writer::new();
        writer.tag(wire::TAG_ENUMERATION);
        writer.u32(u32::try_from(fields.len()).slate_expect("variant count fits in u32"));
        for field in &fields {
            writer.u32(field.key);
            writer.block(field.name.as_bytes());
        }
        Ok(Self {
            ty: Type::from_encoding(writer.finish()),
        })
    }

    /// Constructs an enumeration from variant names, assigning keys `0..n`.
    pub fn from_names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> SlateResult<Self> {
        Self::new(
            names
                .into_iter()
                .enumerate()
                .map(|(key, name)| {
                    EnumerationField::new(
                        u32::try_from(key).slate_expect("variant count fits in u32"),
                        name,
                    )
                }),
        )
    }

    pub(crate) fn from_type_unchecked(ty: Type) -> Self {
        Self { ty }
    }

    /// All variants, sorted by key.
    pub fn fields(&self) -> Vec<EnumerationField> {
        let bytes = self.ty.as_bytes();
        let mut cursor = Cursor::new(&bytes[1..]);
        let count = cursor.u32().slate_expect("verified type encoding");
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let key = cursor.u32().slate_expect("verified type encoding");
            let name = cursor.str_block().slate_expect("verified type encoding");
            fields.push(EnumerationField::new(key, name));
        }
        fields
    }

    /// Resolves a numeric key to its variant name.
    pub fn field(&self, key: u32) -> Option<String> {
        self.fields()
            .into_iter()
            .find_map(|field| (field.key == key).then_some(field.name))
    }

    /// Resolves a variant name to its numeric key.
    pub fn key(&self, name: &str) -> Option<u32> {
        self.fields()
            .into_iter()
            .find_map(|field| (field.name == name).then_some(field.key))
    }
}

impl From<EnumerationType> for Type {
    fn from(value: EnumerationType) -> Self {
        value.ty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order() {
        let a = EnumerationType::new([
            EnumerationField::new(2, "baz"),
            EnumerationField::new(0, "foo"),
            EnumerationField::new(1, "bar"),
        ])
        .unwrap();
        let b = EnumerationType::from_names(["foo", "bar", "baz"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.field(1).as_deref(), Some("bar"));
        assert_eq!(a.key("baz"), Some(2));
        assert_eq!(a.field(3), None);
        assert_eq!(a.key("qux"), None);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let result = EnumerationType::new([
            EnumerationField::new(0, "a"),
            EnumerationField::new(0, "b"),
        ]);
        assert!(result.is_err());
    }
}
