//! Conversion of types into Arrow data types and schemas.
//!
//! The mapping is one-way: table slices keep the binary-encoded type next
//! to the Arrow batch, so nothing ever needs to reconstruct a `Type` from
//! an Arrow `DataType`. Conventions:
//!
//! - `ip` maps to a 16-byte fixed-size binary (IPv4 embedded as
//!   v4-mapped v6).
//! - `subnet` maps to a struct of `address` and `length`.
//! - `enumeration` maps to a dictionary of `uint32` keys over the variant
//!   names, ordered by key.
//! - `duration` and `time` use nanosecond resolution.
//!
//! All columns are nullable; every value can be null in the data model.

use std::sync::Arc;

use arrow_schema::{DataType, Field as ArrowField, Fields, Schema, TimeUnit};
use slate_error::SlateExpect;

use crate::{RecordType, Type, TypeKind};

/// The field name Arrow uses for list elements.
pub const LIST_ITEM: &str = "item";

/// Converts a type into the corresponding Arrow data type.
pub fn to_arrow_type(ty: &Type) -> DataType {
    match ty.kind() {
        TypeKind::Null => DataType::Null,
        TypeKind::Bool => DataType::Boolean,
        TypeKind::Int64 => DataType::Int64,
        TypeKind::UInt64 => DataType::UInt64,
        TypeKind::Double => DataType::Float64,
        TypeKind::Duration => DataType::Duration(TimeUnit::Nanosecond),
        TypeKind::Time => DataType::Timestamp(TimeUnit::Nanosecond, None),
        TypeKind::String => DataType::Utf8,
        TypeKind::Blob => DataType::Binary,
        TypeKind::Ip => DataType::FixedSizeBinary(16),
        TypeKind::Subnet => DataType::Struct(Fields::from(vec![
            ArrowField::new("address", DataType::FixedSizeBinary(16), true),
            ArrowField::new("length", DataType::UInt8, true),
        ])),
        TypeKind::Enumeration => DataType::Dictionary(
            Box::new(DataType::UInt32),
            Box::new(DataType::Utf8),
        ),
        TypeKind::List => {
            let list = ty.as_list().slate_expect("kind checked");
            DataType::List(Arc::new(to_arrow_field(LIST_ITEM, &list.value_type())))
        }
        TypeKind::Map => {
            let map = ty.as_map().slate_expect("kind checked");
            let entries = ArrowField::new(
                "entries",
                DataType::Struct(Fields::from(vec![
                    ArrowField::new("key", to_arrow_type(&map.key_type()), false),
                    to_arrow_field("value", &map.value_type()),
                ])),
                false,
            );
            DataType::Map(Arc::new(entries), false)
        }
        TypeKind::Record => {
            let record = ty.as_record().slate_expect("kind checked");
            DataType::Struct(
                record
                    .fields()
                    .map(|field| to_arrow_field(&field.name, &field.ty))
                    .collect(),
            )
        }
    }
}

/// Converts a type into a nullable Arrow field.
pub fn to_arrow_field(name: &str, ty: &Type) -> ArrowField {
    ArrowField::new(name, to_arrow_type(ty), true)
}

/// Converts a record type into an Arrow schema, one column per top-level
/// field.
pub fn to_arrow_schema(record: &RecordType) -> Schema {
    Schema::new(
        record
            .fields()
            .map(|field| to_arrow_field(&field.name, &field.ty))
            .collect::<Fields>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EnumerationType, Field, ListType};

    #[test]
    fn scalar_mappings() {
        assert_eq!(to_arrow_type(&Type::bool_()), DataType::Boolean);
        assert_eq!(to_arrow_type(&Type::ip()), DataType::FixedSizeBinary(16));
        assert_eq!(
            to_arrow_type(&Type::time()),
            DataType::Timestamp(TimeUnit::Nanosecond, None)
        );
        // Metadata does not affect the Arrow mapping.
        assert_eq!(
            to_arrow_type(&Type::uint64().with_name("port")),
            DataType::UInt64
        );
    }

    #[test]
    fn nested_mappings() {
        let record = RecordType::new([
            Field::new("tags", ListType::new(Type::string()).into()),
            Field::new(
                "level",
                EnumerationType::from_names(["low", "high"]).unwrap().into(),
            ),
        ]);
        let schema = to_arrow_schema(&record);
        assert_eq!(schema.fields().len(), 2);
        let DataType::List(item) = schema.field(0).data_type() else {
            panic!("expected a list");
        };
        assert_eq!(item.data_type(), &DataType::Utf8);
        assert!(matches!(
            schema.field(1).data_type(),
            DataType::Dictionary(_, _)
        ));
    }
}
