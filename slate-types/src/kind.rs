use std::fmt::{Display, Formatter};

/// The closed set of concrete type kinds.
///
/// Every [`Type`](crate::Type) prunes to exactly one of these. The set is
/// deliberately closed; matches over it must stay exhaustive so that adding
/// a kind is a compile error everywhere it matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeKind {
    /// The null type, a single `null` value of unknown type.
    Null,
    /// A boolean value.
    Bool,
    /// A 64-bit signed integer.
    Int64,
    /// A 64-bit unsigned integer.
    UInt64,
    /// An IEEE 754 double precision value.
    Double,
    /// A signed duration with nanosecond resolution.
    Duration,
    /// A point in time with nanosecond resolution.
    Time,
    /// A UTF-8 string.
    String,
    /// An opaque byte sequence.
    Blob,
    /// An IPv4 or IPv6 address.
    Ip,
    /// An IP subnet (address and prefix length).
    Subnet,
    /// A named enumeration with explicit numeric keys.
    Enumeration,
    /// A variable-length sequence of a single element type.
    List,
    /// An association from a key type to a value type.
    Map,
    /// An ordered sequence of named fields.
    Record,
}

impl TypeKind {
    /// The name of the kind as it appears in type extractors and the schema
    /// language.
    pub fn name(&self) -> &'static str {
        match self {
            TypeKind::Null => "null",
            TypeKind::Bool => "bool",
            TypeKind::Int64 => "int64",
            TypeKind::UInt64 => "uint64",
            TypeKind::Double => "double",
            TypeKind::Duration => "duration",
            TypeKind::Time => "time",
            TypeKind::String => "string",
            TypeKind::Blob => "blob",
            TypeKind::Ip => "ip",
            TypeKind::Subnet => "subnet",
            TypeKind::Enumeration => "enumeration",
            TypeKind::List => "list",
            TypeKind::Map => "map",
            TypeKind::Record => "record",
        }
    }
}

impl Display for TypeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
