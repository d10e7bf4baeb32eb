//! The legacy type representation produced by the schema language.
//!
//! A [`LegacyType`] is a plain syntax tree: it may still contain named
//! references to other declarations and unresolved record algebra. The
//! symbol resolver in [`crate::schema`] eliminates both, after which
//! [`from_legacy`] converts into the binary-encoded [`Type`].

use slate_error::{slate_bail, SlateExpect, SlateResult};

use crate::{
    merge, EnumerationType, Field, ListType, MapType, MergeConflict, RecordType, Transformation,
    Type, TypeKind,
};

/// A legacy type: a structural kind plus optional name and attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyType {
    /// The structural kind.
    pub kind: LegacyKind,
    /// An optional alias name.
    pub name: Option<String>,
    /// Attributes as `(key, optional value)` pairs.
    pub attributes: Vec<(String, Option<String>)>,
}

/// The structural kind of a legacy type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LegacyKind {
    /// The null type.
    #[default]
    Null,
    /// A boolean value.
    Bool,
    /// A 64-bit signed integer.
    Int64,
    /// A 64-bit unsigned integer.
    UInt64,
    /// A double precision value.
    Double,
    /// A duration.
    Duration,
    /// A point in time.
    Time,
    /// A UTF-8 string.
    String,
    /// An opaque byte sequence.
    Blob,
    /// An IP address.
    Ip,
    /// An IP subnet.
    Subnet,
    /// A regular-expression pattern. The legacy language still parses
    /// it, but the binary encoding has no representation for it and
    /// conversion fails.
    Pattern,
    /// An enumeration; variants get keys `0..n` in declaration order.
    Enumeration(Vec<String>),
    /// A list of one element type.
    List(Box<LegacyType>),
    /// A map from a key type to a value type.
    Map(Box<LegacyType>, Box<LegacyType>),
    /// A record of named fields.
    Record(Vec<(String, LegacyType)>),
    /// A reference to another declaration, resolved by the symbol
    /// resolver.
    Reference(String),
    /// A record algebra expression: a base record combined left-to-right
    /// with further operands.
    Algebra(Box<LegacyType>, Vec<(AlgebraOp, AlgebraOperand)>),
}

/// A record algebra operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgebraOp {
    /// `+`: merge, failing on conflicting fields.
    Union,
    /// `<+`: merge, conflicts keep the left-hand side.
    PreferLeft,
    /// `+>`: merge, conflicts keep the right-hand side.
    PreferRight,
    /// `-`: remove a field by dotted path.
    Remove,
}

/// The right-hand side of a record algebra operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlgebraOperand {
    /// A record type to merge in (for `+`, `<+`, `+>`).
    Type(LegacyType),
    /// A dotted field path to remove (for `-`).
    Path(String),
}

impl LegacyType {
    /// A legacy type without name or attributes.
    pub fn from_kind(kind: LegacyKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

/// Converts a fully resolved legacy type into a binary-encoded type.
///
/// Fails on [`LegacyKind::Reference`]; run the symbol resolver first.
/// Record algebra over inline records is evaluated in place.
pub fn from_legacy(legacy: &LegacyType) -> SlateResult<Type> {
    convert(legacy, &mut |name| {
        slate_bail!(Parse: "unresolved reference to type `{name}`")
    })
}

/// The conversion worker shared with the symbol resolver, which supplies
/// the reference lookup.
pub(crate) fn convert(
    legacy: &LegacyType,
    resolve_reference: &mut dyn FnMut(&str) -> SlateResult<Type>,
) -> SlateResult<Type> {
    let base = match &legacy.kind {
        LegacyKind::Null => Type::null(),
        LegacyKind::Bool => Type::bool_(),
        LegacyKind::Int64 => Type::int64(),
        LegacyKind::UInt64 => Type::uint64(),
        LegacyKind::Double => Type::double(),
        LegacyKind::Duration => Type::duration(),
        LegacyKind::Time => Type::time(),
        LegacyKind::String => Type::string(),
        LegacyKind::Blob => Type::blob(),
        LegacyKind::Ip => Type::ip(),
        LegacyKind::Subnet => Type::subnet(),
        LegacyKind::Pattern => {
            slate_bail!(Parse: "pattern types are not supported")
        }
        LegacyKind::Enumeration(names) => {
            EnumerationType::from_names(names.iter().map(String::as_str))?.into()
        }
        LegacyKind::List(element) => ListType::new(convert(element, resolve_reference)?).into(),
        LegacyKind::Map(key, value) => MapType::new(
            convert(key, resolve_reference)?,
            convert(value, resolve_reference)?,
        )
        .into(),
        LegacyKind::Record(fields) => {
            if fields.is_empty() {
                slate_bail!(Parse: "record types must have at least one field");
            }
            let mut resolved = Vec::with_capacity(fields.len());
            for (name, field) in fields {
                resolved.push(Field::new(name, convert(field, resolve_reference)?));
            }
            RecordType::new(resolved).into()
        }
        LegacyKind::Reference(name) => resolve_reference(name)?,
        LegacyKind::Algebra(base, operations) => {
            evaluate_algebra(base, operations, resolve_reference)?
        }
    };
    Ok(Type::enriched(
        &base,
        legacy.name.as_deref(),
        legacy
            .attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref())),
    ))
}

fn evaluate_algebra(
    base: &LegacyType,
    operations: &[(AlgebraOp, AlgebraOperand)],
    resolve_reference: &mut dyn FnMut(&str) -> SlateResult<Type>,
) -> SlateResult<Type> {
    let base = convert(base, resolve_reference)?;
    let Some(mut accumulator) = base.as_record() else {
        slate_bail!(Parse: "record algebra requires record operands, got {base}");
    };
    for (op, operand) in operations {
        accumulator = match (op, operand) {
            (AlgebraOp::Remove, AlgebraOperand::Path(path)) => {
                let Some(offset) = accumulator.resolve_key(path) else {
                    slate_bail!(Parse: "cannot remove nonexistent field `{path}`");
                };
                match accumulator.transform(vec![Transformation::drop_field(offset)]) {
                    Some(result) => result,
                    None => {
                        slate_bail!(Parse: "removing field `{path}` leaves an empty record")
                    }
                }
            }
            (op, AlgebraOperand::Type(operand)) => {
                let operand = convert(operand, resolve_reference)?;
                let Some(operand) = operand.as_record() else {
                    slate_bail!(Parse: "record algebra requires record operands, got {operand}");
                };
                let conflict = match op {
                    AlgebraOp::Union => MergeConflict::Fail,
                    AlgebraOp::PreferLeft => MergeConflict::PreferLeft,
                    AlgebraOp::PreferRight => MergeConflict::PreferRight,
                    AlgebraOp::Remove => {
                        slate_bail!(Parse: "the `-` operator requires a field path operand")
                    }
                };
                merge(&accumulator, &operand, conflict)?
            }
            (_, AlgebraOperand::Path(path)) => {
                slate_bail!(Parse: "merge operators require a record operand, got path `{path}`")
            }
        };
    }
    Ok(accumulator.into())
}

/// Converts a binary-encoded type back into its legacy representation.
pub fn to_legacy(ty: &Type) -> LegacyType {
    let kind = match ty.kind() {
        TypeKind::Null => LegacyKind::Null,
        TypeKind::Bool => LegacyKind::Bool,
        TypeKind::Int64 => LegacyKind::Int64,
        TypeKind::UInt64 => LegacyKind::UInt64,
        TypeKind::Double => LegacyKind::Double,
        TypeKind::Duration => LegacyKind::Duration,
        TypeKind::Time => LegacyKind::Time,
        TypeKind::String => LegacyKind::String,
        TypeKind::Blob => LegacyKind::Blob,
        TypeKind::Ip => LegacyKind::Ip,
        TypeKind::Subnet => LegacyKind::Subnet,
        TypeKind::Enumeration => {
            let en = ty.as_enumeration().slate_expect("kind checked");
            LegacyKind::Enumeration(en.fields().into_iter().map(|f| f.name).collect())
        }
        TypeKind::List => {
            let list = ty.as_list().slate_expect("kind checked");
            LegacyKind::List(Box::new(to_legacy(&list.value_type())))
        }
        TypeKind::Map => {
            let map = ty.as_map().slate_expect("kind checked");
            LegacyKind::Map(
                Box::new(to_legacy(&map.key_type())),
                Box::new(to_legacy(&map.value_type())),
            )
        }
        TypeKind::Record => {
            let record = ty.as_record().slate_expect("kind checked");
            LegacyKind::Record(
                record
                    .fields()
                    .map(|field| (field.name, to_legacy(&field.ty)))
                    .collect(),
            )
        }
    };
    LegacyType {
        kind,
        name: ty.name().map(str::to_string),
        attributes: ty
            .attributes()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: Vec<(&str, LegacyKind)>) -> LegacyType {
        LegacyType::from_kind(LegacyKind::Record(
            fields
                .into_iter()
                .map(|(name, kind)| (name.to_string(), LegacyType::from_kind(kind)))
                .collect(),
        ))
    }

    #[test]
    fn round_trip_is_a_fixed_point() {
        let cases = [
            LegacyType::from_kind(LegacyKind::Bool),
            LegacyType {
                kind: LegacyKind::Ip,
                name: Some("address".into()),
                attributes: vec![("index".into(), Some("hash".into()))],
            },
            LegacyType::from_kind(LegacyKind::Enumeration(vec!["a".into(), "b".into()])),
            LegacyType::from_kind(LegacyKind::List(Box::new(LegacyType::from_kind(
                LegacyKind::String,
            )))),
            record(vec![("x", LegacyKind::Int64), ("y", LegacyKind::Double)]),
        ];
        for legacy in cases {
            let ty = from_legacy(&legacy).unwrap();
            assert_eq!(to_legacy(&ty), legacy);
        }
    }

    #[test]
    fn pattern_types_are_rejected() {
        let legacy = LegacyType::from_kind(LegacyKind::Pattern);
        assert!(from_legacy(&legacy).is_err());
    }

    #[test]
    fn references_must_be_resolved() {
        let legacy = LegacyType::from_kind(LegacyKind::Reference("a".into()));
        assert!(from_legacy(&legacy).is_err());
    }

    #[test]
    fn inline_algebra() {
        let legacy = LegacyType::from_kind(LegacyKind::Algebra(
            Box::new(record(vec![
                ("a", LegacyKind::Int64),
                ("b", LegacyKind::String),
            ])),
            vec![
                (
                    AlgebraOp::Union,
                    AlgebraOperand::Type(record(vec![("c", LegacyKind::Ip)])),
                ),
                (AlgebraOp::Remove, AlgebraOperand::Path("b".into())),
            ],
        ));
        let ty = from_legacy(&legacy).unwrap();
        let record = ty.as_record().unwrap();
        let names: Vec<_> = record.fields().map(|f| f.name).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn removing_the_last_field_fails() {
        let legacy = LegacyType::from_kind(LegacyKind::Algebra(
            Box::new(record(vec![("a", LegacyKind::Int64)])),
            vec![(AlgebraOp::Remove, AlgebraOperand::Path("a".into()))],
        ));
        assert!(from_legacy(&legacy).is_err());
    }
}
