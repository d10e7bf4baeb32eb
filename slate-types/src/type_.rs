use std::fmt::{Debug, Display, Formatter};

use bytes::Bytes;
use slate_error::{SlateExpect, SlateResult};

use crate::wire::{self, Cursor, Writer};
use crate::{EnumerationType, ListType, MapType, RecordType, TypeKind};

/// An immutable, reference-counted handle to a binary-encoded type.
///
/// The backing buffer holds exactly one self-describing encoding; nested
/// type accessors return zero-copy subrange views into the same buffer.
/// Metadata (a name plus key/value attributes) is a transparent layer over
/// the concrete type: structural accessors skip it, while [`Type::name`]
/// and [`Type::attribute`] consult only the metadata layer.
///
/// Two types are equal iff their canonical encodings are byte-identical,
/// which also yields a cheap total order usable for map keys.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Type {
    bytes: Bytes,
}

/// A named field of a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// The field name.
    pub name: String,
    /// The field type.
    pub ty: Type,
}

impl Field {
    /// Constructs a field.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl Type {
    /// The null type.
    pub fn null() -> Self {
        Self::scalar(wire::TAG_NULL)
    }

    /// The boolean type.
    pub fn bool_() -> Self {
        Self::scalar(wire::TAG_BOOL)
    }

    /// The 64-bit signed integer type.
    pub fn int64() -> Self {
        Self::scalar(wire::TAG_INT64)
    }

    /// The 64-bit unsigned integer type.
    pub fn uint64() -> Self {
        Self::scalar(wire::TAG_UINT64)
    }

    /// The double precision floating point type.
    pub fn double() -> Self {
        Self::scalar(wire::TAG_DOUBLE)
    }

    /// The duration type.
    pub fn duration() -> Self {
        Self::scalar(wire::TAG_DURATION)
    }

    /// The time type.
    pub fn time() -> Self {
        Self::scalar(wire::TAG_TIME)
    }

    /// The string type.
    pub fn string() -> Self {
        Self::scalar(wire::TAG_STRING)
    }

    /// The blob type.
    pub fn blob() -> Self {
        Self::scalar(wire::TAG_BLOB)
    }

    /// The IP address type.
    pub fn ip() -> Self {
        Self::scalar(wire::TAG_IP)
    }

    /// The subnet type.
    pub fn subnet() -> Self {
        Self::scalar(wire::TAG_SUBNET)
    }

    fn scalar(tag: u8) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(&[tag]),
        }
    }

    /// Wraps a verified encoding without copying.
    pub fn from_bytes(bytes: Bytes) -> SlateResult<Self> {
        wire::verify(&bytes)?;
        Ok(Self { bytes })
    }

    /// Wraps an encoding that is known to be well-formed.
    pub(crate) fn from_bytes_unverified(bytes: Bytes) -> Self {
        debug_assert!(wire::verify(&bytes).is_ok(), "malformed type encoding");
        Self { bytes }
    }

    pub(crate) fn from_encoding(encoding: Vec<u8>) -> Self {
        Self::from_bytes_unverified(Bytes::from(encoding))
    }

    /// The raw canonical encoding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The backing buffer, shared without copying.
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    fn outer_tag(&self) -> u8 {
        self.bytes[0]
    }

    /// Peels all metadata layers, returning the concrete structural type.
    pub fn pruned(&self) -> Type {
        let mut bytes = self.bytes.clone();
        while bytes[0] == wire::TAG_ENRICHED {
            let mut cursor = Cursor::new(&bytes[1..]);
            let range = cursor.block().slate_expect("verified type encoding");
            bytes = bytes.slice(1 + range.start..1 + range.end);
        }
        Type { bytes }
    }

    /// The concrete kind, skipping metadata layers.
    pub fn kind(&self) -> TypeKind {
        let mut slice: &[u8] = &self.bytes;
        while slice[0] == wire::TAG_ENRICHED {
            let mut cursor = Cursor::new(&slice[1..]);
            let range = cursor.block().slate_expect("verified type encoding");
            slice = &slice[1 + range.start..1 + range.end];
        }
        match slice[0] {
            wire::TAG_NULL => TypeKind::Null,
            wire::TAG_BOOL => TypeKind::Bool,
            wire::TAG_INT64 => TypeKind::Int64,
            wire::TAG_UINT64 => TypeKind::UInt64,
            wire::TAG_DOUBLE => TypeKind::Double,
            wire::TAG_DURATION => TypeKind::Duration,
            wire::TAG_TIME => TypeKind::Time,
            wire::TAG_STRING => TypeKind::String,
            wire::TAG_BLOB => TypeKind::Blob,
            wire::TAG_IP => TypeKind::Ip,
            wire::TAG_SUBNET => TypeKind::Subnet,
            wire::TAG_ENUMERATION => TypeKind::Enumeration,
            wire::TAG_LIST => TypeKind::List,
            wire::TAG_MAP => TypeKind::Map,
            wire::TAG_RECORD => TypeKind::Record,
            tag => unreachable!("verified encoding with unknown tag {tag}"),
        }
    }

    /// Parses the metadata layer, returning `(name, attributes)`.
    fn metadata(&self) -> (Option<&str>, Vec<(&str, Option<&str>)>) {
        if self.outer_tag() != wire::TAG_ENRICHED {
            return (None, Vec::new());
        }
        let mut cursor = Cursor::new(&self.bytes[1..]);
        cursor.block().slate_expect("verified type encoding");
        let has_name = cursor.u8().slate_expect("verified type encoding");
        let name = (has_name == 1)
            .then(|| cursor.str_block().slate_expect("verified type encoding"));
        let attr_count = cursor.u32().slate_expect("verified type encoding");
        let mut attributes = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            let key = cursor.str_block().slate_expect("verified type encoding");
            let has_value = cursor.u8().slate_expect("verified type encoding");
            let value = (has_value == 1)
                .then(|| cursor.str_block().slate_expect("verified type encoding"));
            attributes.push((key, value));
        }
        (name, attributes)
    }

    /// The name of the type, if it carries one.
    pub fn name(&self) -> Option<&str> {
        self.metadata().0
    }

    /// Looks up an attribute by key. `Some(None)` means the attribute is
    /// present without a value.
    pub fn attribute(&self, key: &str) -> Option<Option<&str>> {
        self.metadata()
            .1
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// All attributes of the type, in declaration order.
    pub fn attributes(&self) -> Vec<(&str, Option<&str>)> {
        self.metadata().1
    }

    /// Returns a copy of `self` carrying the given name.
    pub fn with_name(&self, name: impl AsRef<str>) -> Type {
        let (_, attributes) = self.metadata();
        let attributes = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect::<Vec<_>>();
        Self::enriched_owned(&self.pruned(), Some(name.as_ref().to_string()), attributes)
    }

    /// Returns a copy of `self` with `attributes` layered on. Existing
    /// attributes are kept unless shadowed by a new key.
    pub fn with_attributes(
        &self,
        attributes: impl IntoIterator<Item = (String, Option<String>)>,
    ) -> Type {
        let (name, existing) = self.metadata();
        let name = name.map(str::to_string);
        let mut merged: Vec<(String, Option<String>)> = attributes.into_iter().collect();
        for (k, v) in existing {
            if !merged.iter().any(|(mk, _)| mk == k) {
                merged.push((k.to_string(), v.map(str::to_string)));
            }
        }
        Self::enriched_owned(&self.pruned(), name, merged)
    }

    /// Constructs a type carrying metadata over `inner`.
    ///
    /// Metadata layers collapse into one canonical layer: an outer name
    /// shadows an inner one and outer attribute keys shadow inner keys, so
    /// byte equality stays meaningful.
    pub fn enriched<'a>(
        inner: &Type,
        name: Option<&str>,
        attributes: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> Type {
        let (inner_name, inner_attrs) = inner.metadata();
        let name = name.or(inner_name).map(str::to_string);
        let mut merged: Vec<(String, Option<String>)> = attributes
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect();
        for (k, v) in inner_attrs {
            if !merged.iter().any(|(mk, _)| mk == k) {
                merged.push((k.to_string(), v.map(str::to_string)));
            }
        }
        Self::enriched_owned(&inner.pruned(), name, merged)
    }

    fn enriched_owned(
        concrete: &Type,
        name: Option<String>,
        attributes: Vec<(String, Option<String>)>,
    ) -> Type {
        if name.is_none() && attributes.is_empty() {
            return concrete.clone();
        }
        let mut writer = Writer::new();
        writer.tag(wire::TAG_ENRICHED);
        writer.block(concrete.as_bytes());
        match &name {
            Some(name) => {
                writer.u8(1);
                writer.block(name.as_bytes());
            }
            None => writer.u8(0),
        }
        writer.u32(u32::try_from(attributes.len()).slate_expect("attribute count fits in u32"));
        for (key, value) in &attributes {
            writer.block(key.as_bytes());
            match value {
                Some(value) => {
                    writer.u8(1);
                    writer.block(value.as_bytes());
                }
                None => writer.u8(0),
            }
        }
        Type::from_encoding(writer.finish())
    }

    /// Copies the name and attributes (but not the structure) of `other`
    /// onto `self`. Used after structural transforms so the result regains
    /// its original schema name.
    pub fn assign_metadata(&mut self, other: &Type) {
        let (name, attributes) = other.metadata();
        let name = name.map(str::to_string);
        let attributes = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect();
        *self = Self::enriched_owned(&self.pruned(), name, attributes);
    }

    /// The record variant, if `self` is a record type.
    pub fn as_record(&self) -> Option<RecordType> {
        (self.kind() == TypeKind::Record).then(|| RecordType::from_type_unchecked(self.pruned()))
    }

    /// The list variant, if `self` is a list type.
    pub fn as_list(&self) -> Option<ListType> {
        (self.kind() == TypeKind::List).then(|| ListType::from_type_unchecked(self.pruned()))
    }

    /// The map variant, if `self` is a map type.
    pub fn as_map(&self) -> Option<MapType> {
        (self.kind() == TypeKind::Map).then(|| MapType::from_type_unchecked(self.pruned()))
    }

    /// The enumeration variant, if `self` is an enumeration type.
    pub fn as_enumeration(&self) -> Option<EnumerationType> {
        (self.kind() == TypeKind::Enumeration)
            .then(|| EnumerationType::from_type_unchecked(self.pruned()))
    }

    /// A short, stable identifier derived from the canonical encoding.
    pub fn fingerprint(&self) -> String {
        // FNV-1a, 64 bit.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.bytes.iter() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        format!("S{hash:016x}")
    }
}

/// Checks whether two types have the same shape, ignoring names and
/// attributes. The null type is a wildcard congruent with anything.
pub fn congruent(x: &Type, y: &Type) -> bool {
    match (x.kind(), y.kind()) {
        (TypeKind::Null, _) | (_, TypeKind::Null) => true,
        (TypeKind::Enumeration, TypeKind::Enumeration) => {
            let x = x.as_enumeration().slate_expect("kind checked");
            let y = y.as_enumeration().slate_expect("kind checked");
            x.fields().len() == y.fields().len()
                && x.fields()
                    .iter()
                    .zip(y.fields())
                    .all(|(a, b)| a.key == b.key)
        }
        (TypeKind::List, TypeKind::List) => {
            let x = x.as_list().slate_expect("kind checked");
            let y = y.as_list().slate_expect("kind checked");
            congruent(&x.value_type(), &y.value_type())
        }
        (TypeKind::Map, TypeKind::Map) => {
            let x = x.as_map().slate_expect("kind checked");
            let y = y.as_map().slate_expect("kind checked");
            congruent(&x.key_type(), &y.key_type())
                && congruent(&x.value_type(), &y.value_type())
        }
        (TypeKind::Record, TypeKind::Record) => {
            let x = x.as_record().slate_expect("kind checked");
            let y = y.as_record().slate_expect("kind checked");
            x.num_fields() == y.num_fields()
                && (0..x.num_fields()).all(|i| congruent(&x.field(i).ty, &y.field(i).ty))
        }
        (x, y) => x == y,
    }
}

/// Unifies two types, if possible.
///
/// The null type acts as an absorbing "unknown" that the other type
/// subsumes. Two records unify when their same-named fields unify
/// recursively; fields unique to either side are kept. Metadata is not
/// preserved.
pub fn unify(a: &Type, b: &Type) -> Option<Type> {
    match (a.kind(), b.kind()) {
        (TypeKind::Null, _) => Some(b.pruned()),
        (_, TypeKind::Null) => Some(a.pruned()),
        (TypeKind::List, TypeKind::List) => {
            let a = a.as_list().slate_expect("kind checked");
            let b = b.as_list().slate_expect("kind checked");
            Some(ListType::new(unify(&a.value_type(), &b.value_type())?).into())
        }
        (TypeKind::Map, TypeKind::Map) => {
            let a = a.as_map().slate_expect("kind checked");
            let b = b.as_map().slate_expect("kind checked");
            Some(
                MapType::new(
                    unify(&a.key_type(), &b.key_type())?,
                    unify(&a.value_type(), &b.value_type())?,
                )
                .into(),
            )
        }
        (TypeKind::Record, TypeKind::Record) => {
            let a = a.as_record().slate_expect("kind checked");
            let b = b.as_record().slate_expect("kind checked");
            let mut fields: Vec<Field> = a.fields().collect();
            for b_field in b.fields() {
                match fields.iter_mut().find(|f| f.name == b_field.name) {
                    Some(existing) => {
                        existing.ty = unify(&existing.ty, &b_field.ty)?;
                    }
                    None => fields.push(b_field),
                }
            }
            Some(RecordType::new(fields).into())
        }
        (a_kind, b_kind) if a_kind == b_kind => Some(a.pruned()),
        _ => None,
    }
}

impl Default for Type {
    fn default() -> Self {
        Self::null()
    }
}

impl Debug for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Type({name}: {self})"),
            None => write!(f, "Type({self})"),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            TypeKind::Enumeration => {
                let en = self.as_enumeration().slate_expect("kind checked");
                write!(f, "enum{{")?;
                for (i, field) in en.fields().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.key)?;
                }
                write!(f, "}}")
            }
            TypeKind::List => {
                let list = self.as_list().slate_expect("kind checked");
                write!(f, "list<{}>", list.value_type())
            }
            TypeKind::Map => {
                let map = self.as_map().slate_expect("kind checked");
                write!(f, "map<{}, {}>", map.key_type(), map.value_type())
            }
            TypeKind::Record => {
                let record = self.as_record().slate_expect("kind checked");
                write!(f, "record{{")?;
                for (i, field) in record.fields().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
            kind => f.write_str(kind.name()),
        }
    }
}
