//! Row-wise construction of table slices for a schema known upfront.
//!
//! [`TableSliceBuilder`] exposes a per-leaf `add` API: one complete pass
//! over all leaves in depth-first order constitutes one row. The
//! per-kind [`ColumnBuilder`] underneath is shared with the adaptive
//! builder.

use std::sync::Arc;

use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, FixedSizeBinaryBuilder, Float64Builder, Int64Builder,
    PrimitiveBuilder, StringBuilder, UInt32Builder, UInt64Builder, UInt8Builder,
};
use arrow_array::types::{DurationNanosecondType, TimestampNanosecondType, UInt32Type};
use arrow_array::{ArrayRef, DictionaryArray, MapArray, NullArray, StringArray, StructArray};
use arrow_buffer::{NullBufferBuilder, OffsetBuffer, ScalarBuffer};
use arrow_schema::{DataType, Field as ArrowField, Fields};
use slate_error::{slate_bail, slate_err, slate_panic, SlateExpect, SlateResult, SlateUnwrap};
use slate_types::arrow::{to_arrow_field, to_arrow_type, LIST_ITEM};
use slate_types::{RecordType, Type, TypeKind};

use crate::slice::TableSlice;
use crate::value::{ip_to_bytes, Value};

/// An appendable column of one concrete type.
pub enum ColumnBuilder {
    /// A column of nulls.
    Null {
        /// The number of rows appended so far.
        len: usize,
    },
    /// A boolean column.
    Bool(BooleanBuilder),
    /// A 64-bit signed integer column.
    Int64(Int64Builder),
    /// A 64-bit unsigned integer column.
    UInt64(UInt64Builder),
    /// A double precision column.
    Double(Float64Builder),
    /// A nanosecond duration column.
    Duration(PrimitiveBuilder<DurationNanosecondType>),
    /// A nanosecond timestamp column.
    Time(PrimitiveBuilder<TimestampNanosecondType>),
    /// A UTF-8 string column.
    String(StringBuilder),
    /// A binary column.
    Blob(BinaryBuilder),
    /// A 16-byte IP address column.
    Ip(FixedSizeBinaryBuilder),
    /// A subnet column: address and prefix length children.
    Subnet {
        /// The network address child.
        address: FixedSizeBinaryBuilder,
        /// The prefix length child.
        length: UInt8Builder,
        /// The struct-level validity.
        validity: NullBufferBuilder,
    },
    /// An enumeration column: dictionary positions over the variant names.
    Enumeration {
        /// The dictionary keys, one per row.
        keys: UInt32Builder,
        /// The variant names in canonical key order.
        names: Vec<String>,
    },
    /// A list column.
    List {
        /// The element builder.
        values: Box<ColumnBuilder>,
        /// The element type.
        value_type: Type,
        /// Row boundaries into the element builder.
        offsets: Vec<i32>,
        /// The list-level validity.
        validity: NullBufferBuilder,
    },
    /// A map column.
    Map {
        /// The key builder; keys cannot be null.
        keys: Box<ColumnBuilder>,
        /// The key type.
        key_type: Type,
        /// The value builder.
        values: Box<ColumnBuilder>,
        /// The value type.
        value_type: Type,
        /// Row boundaries into the entry builders.
        offsets: Vec<i32>,
        /// The map-level validity.
        validity: NullBufferBuilder,
    },
    /// A nested record column.
    Record {
        /// The field builders in declaration order.
        children: Vec<(String, Type, ColumnBuilder)>,
        /// The struct-level validity.
        validity: NullBufferBuilder,
    },
}

impl ColumnBuilder {
    /// Creates a builder for one column of the given type.
    pub fn new(ty: &Type) -> Self {
        match ty.kind() {
            TypeKind::Null => ColumnBuilder::Null { len: 0 },
            TypeKind::Bool => ColumnBuilder::Bool(BooleanBuilder::new()),
            TypeKind::Int64 => ColumnBuilder::Int64(Int64Builder::new()),
            TypeKind::UInt64 => ColumnBuilder::UInt64(UInt64Builder::new()),
            TypeKind::Double => ColumnBuilder::Double(Float64Builder::new()),
            TypeKind::Duration => ColumnBuilder::Duration(PrimitiveBuilder::new()),
            TypeKind::Time => ColumnBuilder::Time(PrimitiveBuilder::new()),
            TypeKind::String => ColumnBuilder::String(StringBuilder::new()),
            TypeKind::Blob => ColumnBuilder::Blob(BinaryBuilder::new()),
            TypeKind::Ip => ColumnBuilder::Ip(FixedSizeBinaryBuilder::new(16)),
            TypeKind::Subnet => ColumnBuilder::Subnet {
                address: FixedSizeBinaryBuilder::new(16),
                length: UInt8Builder::new(),
                validity: NullBufferBuilder::new(0),
            },
            TypeKind::Enumeration => {
                let enumeration = ty.as_enumeration().slate_expect("kind checked");
                ColumnBuilder::Enumeration {
                    keys: UInt32Builder::new(),
                    names: enumeration
                        .fields()
                        .into_iter()
                        .map(|field| field.name)
                        .collect(),
                }
            }
            TypeKind::List => {
                let list = ty.as_list().slate_expect("kind checked");
                let value_type = list.value_type();
                ColumnBuilder::List {
                    values: Box::new(ColumnBuilder::new(&value_type)),
                    value_type,
                    offsets: vec![0],
                    validity: NullBufferBuilder::new(0),
                }
            }
            TypeKind::Map => {
                let map = ty.as_map().slate_expect("kind checked");
                let key_type = map.key_type();
                let value_type = map.value_type();
                ColumnBuilder::Map {
                    keys: Box::new(ColumnBuilder::new(&key_type)),
                    key_type,
                    values: Box::new(ColumnBuilder::new(&value_type)),
                    value_type,
                    offsets: vec![0],
                    validity: NullBufferBuilder::new(0),
                }
            }
            TypeKind::Record => {
                let record = ty.as_record().slate_expect("kind checked");
                ColumnBuilder::Record {
                    children: record
                        .fields()
                        .map(|field| {
                            let builder = ColumnBuilder::new(&field.ty);
                            (field.name, field.ty, builder)
                        })
                        .collect(),
                    validity: NullBufferBuilder::new(0),
                }
            }
        }
    }

    /// Appends one value, which must be null or match the column's kind.
    pub fn append(&mut self, value: &Value) -> SlateResult<()> {
        if value.is_null() {
            self.append_null();
            return Ok(());
        }
        match (self, value) {
            (ColumnBuilder::Bool(builder), Value::Bool(b)) => builder.append_value(*b),
            (ColumnBuilder::Int64(builder), Value::Int64(x)) => builder.append_value(*x),
            (ColumnBuilder::UInt64(builder), Value::UInt64(x)) => builder.append_value(*x),
            (ColumnBuilder::Double(builder), Value::Double(x)) => builder.append_value(*x),
            (ColumnBuilder::Duration(builder), Value::Duration(d)) => {
                builder.append_value(d.as_nanos().try_into().map_err(|_| {
                    slate_err!(InvalidArgument: "duration out of nanosecond range")
                })?);
            }
            (ColumnBuilder::Time(builder), Value::Time(t)) => {
                builder.append_value(t.as_nanosecond().try_into().map_err(|_| {
                    slate_err!(InvalidArgument: "timestamp out of nanosecond range")
                })?);
            }
            (ColumnBuilder::String(builder), Value::String(s)) => builder.append_value(s),
            (ColumnBuilder::Blob(builder), Value::Blob(b)) => builder.append_value(b),
            (ColumnBuilder::Ip(builder), Value::Ip(ip)) => {
                builder.append_value(ip_to_bytes(*ip))?;
            }
            (
                ColumnBuilder::Subnet {
                    address,
                    length,
                    validity,
                },
                Value::Subnet {
                    address: ip,
                    length: bits,
                },
            ) => {
                address.append_value(ip_to_bytes(*ip))?;
                length.append_value(*bits);
                validity.append(true);
            }
            (ColumnBuilder::Enumeration { keys, names }, Value::String(name)) => {
                let Some(position) = names.iter().position(|n| n == name) else {
                    slate_bail!(InvalidArgument: "`{name}` is not a variant of the enumeration");
                };
                keys.append_value(u32::try_from(position).slate_expect("variant count fits"));
            }
            (
                ColumnBuilder::List {
                    values,
                    offsets,
                    validity,
                    ..
                },
                Value::List(elements),
            ) => {
                for element in elements {
                    values.append(element)?;
                }
                push_offset(offsets, elements.len())?;
                validity.append(true);
            }
            (
                ColumnBuilder::Map {
                    keys,
                    values,
                    offsets,
                    validity,
                    ..
                },
                Value::Map(entries),
            ) => {
                for (key, value) in entries {
                    if key.is_null() {
                        slate_bail!(InvalidArgument: "map keys cannot be null");
                    }
                    keys.append(key)?;
                    values.append(value)?;
                }
                push_offset(offsets, entries.len())?;
                validity.append(true);
            }
            (ColumnBuilder::Record { children, validity }, Value::Record(fields)) => {
                if fields.len() != children.len() {
                    slate_bail!(
                        InvalidArgument: "record value has {} fields, expected {}",
                        fields.len(),
                        children.len()
                    );
                }
                for ((_, value), (_, _, builder)) in fields.iter().zip(children.iter_mut()) {
                    builder.append(value)?;
                }
                validity.append(true);
            }
            (builder, value) => {
                slate_bail!(
                    InvalidArgument: "a {} value does not fit a {} column",
                    value.kind_name(),
                    builder.kind().name()
                );
            }
        }
        Ok(())
    }

    /// Appends a null, recursing into children where the arrow layout
    /// requires placeholder slots.
    pub fn append_null(&mut self) {
        match self {
            ColumnBuilder::Null { len } => *len += 1,
            ColumnBuilder::Bool(builder) => builder.append_null(),
            ColumnBuilder::Int64(builder) => builder.append_null(),
            ColumnBuilder::UInt64(builder) => builder.append_null(),
            ColumnBuilder::Double(builder) => builder.append_null(),
            ColumnBuilder::Duration(builder) => builder.append_null(),
            ColumnBuilder::Time(builder) => builder.append_null(),
            ColumnBuilder::String(builder) => builder.append_null(),
            ColumnBuilder::Blob(builder) => builder.append_null(),
            ColumnBuilder::Ip(builder) => builder.append_null(),
            ColumnBuilder::Subnet {
                address,
                length,
                validity,
            } => {
                address.append_null();
                length.append_null();
                validity.append(false);
            }
            ColumnBuilder::Enumeration { keys, .. } => keys.append_null(),
            ColumnBuilder::List {
                offsets, validity, ..
            } => {
                let last = *offsets.last().slate_expect("offsets start non-empty");
                offsets.push(last);
                validity.append(false);
            }
            ColumnBuilder::Map {
                offsets, validity, ..
            } => {
                let last = *offsets.last().slate_expect("offsets start non-empty");
                offsets.push(last);
                validity.append(false);
            }
            ColumnBuilder::Record { children, validity } => {
                for (_, _, builder) in children.iter_mut() {
                    builder.append_null();
                }
                validity.append(false);
            }
        }
    }

    /// The kind of column this builder produces.
    pub fn kind(&self) -> TypeKind {
        match self {
            ColumnBuilder::Null { .. } => TypeKind::Null,
            ColumnBuilder::Bool(_) => TypeKind::Bool,
            ColumnBuilder::Int64(_) => TypeKind::Int64,
            ColumnBuilder::UInt64(_) => TypeKind::UInt64,
            ColumnBuilder::Double(_) => TypeKind::Double,
            ColumnBuilder::Duration(_) => TypeKind::Duration,
            ColumnBuilder::Time(_) => TypeKind::Time,
            ColumnBuilder::String(_) => TypeKind::String,
            ColumnBuilder::Blob(_) => TypeKind::Blob,
            ColumnBuilder::Ip(_) => TypeKind::Ip,
            ColumnBuilder::Subnet { .. } => TypeKind::Subnet,
            ColumnBuilder::Enumeration { .. } => TypeKind::Enumeration,
            ColumnBuilder::List { .. } => TypeKind::List,
            ColumnBuilder::Map { .. } => TypeKind::Map,
            ColumnBuilder::Record { .. } => TypeKind::Record,
        }
    }

    /// Finishes the column into an Arrow array.
    pub fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Null { len } => Arc::new(NullArray::new(std::mem::take(len))),
            ColumnBuilder::Bool(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Int64(builder) => Arc::new(builder.finish()),
            ColumnBuilder::UInt64(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Double(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Duration(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Time(builder) => Arc::new(builder.finish()),
            ColumnBuilder::String(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Blob(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Ip(builder) => Arc::new(builder.finish()),
            ColumnBuilder::Subnet {
                address,
                length,
                validity,
            } => {
                let fields = Fields::from(vec![
                    ArrowField::new("address", DataType::FixedSizeBinary(16), true),
                    ArrowField::new("length", DataType::UInt8, true),
                ]);
                let arrays: Vec<ArrayRef> =
                    vec![Arc::new(address.finish()), Arc::new(length.finish())];
                Arc::new(StructArray::new(fields, arrays, validity.finish()))
            }
            ColumnBuilder::Enumeration { keys, names } => {
                let values = Arc::new(StringArray::from_iter_values(names.iter()));
                // Keys are appended as positions into `names`, so the
                // dictionary invariant holds by construction.
                let dictionary =
                    DictionaryArray::<UInt32Type>::try_new(keys.finish(), values).slate_unwrap();
                Arc::new(dictionary)
            }
            ColumnBuilder::List {
                values,
                value_type,
                offsets,
                validity,
            } => {
                let item = Arc::new(to_arrow_field(LIST_ITEM, value_type));
                let offsets = OffsetBuffer::new(ScalarBuffer::from(std::mem::replace(
                    offsets,
                    vec![0],
                )));
                Arc::new(arrow_array::ListArray::new(
                    item,
                    offsets,
                    values.finish(),
                    validity.finish(),
                ))
            }
            ColumnBuilder::Map {
                keys,
                key_type,
                values,
                value_type,
                offsets,
                validity,
            } => {
                let entry_fields = Fields::from(vec![
                    ArrowField::new("key", to_arrow_type(key_type), false),
                    to_arrow_field("value", value_type),
                ]);
                let entries = StructArray::new(
                    entry_fields.clone(),
                    vec![keys.finish(), values.finish()],
                    None,
                );
                let entries_field = Arc::new(ArrowField::new(
                    "entries",
                    DataType::Struct(entry_fields),
                    false,
                ));
                let offsets = OffsetBuffer::new(ScalarBuffer::from(std::mem::replace(
                    offsets,
                    vec![0],
                )));
                Arc::new(MapArray::new(
                    entries_field,
                    offsets,
                    entries,
                    validity.finish(),
                    false,
                ))
            }
            ColumnBuilder::Record { children, validity } => {
                let fields: Fields = children
                    .iter()
                    .map(|(name, ty, _)| to_arrow_field(name, ty))
                    .collect();
                let arrays: Vec<ArrayRef> = children
                    .iter_mut()
                    .map(|(_, _, builder)| builder.finish())
                    .collect();
                Arc::new(StructArray::new(fields, arrays, validity.finish()))
            }
        }
    }
}

fn push_offset(offsets: &mut Vec<i32>, added: usize) -> SlateResult<()> {
    let last = *offsets.last().slate_expect("offsets start non-empty");
    let added = i32::try_from(added)
        .ok()
        .and_then(|added| last.checked_add(added))
        .ok_or_else(|| slate_err!(InvalidArgument: "list column exceeds the element limit"))?;
    offsets.push(added);
    Ok(())
}

/// Builds a table slice row by row for a schema known upfront.
pub struct TableSliceBuilder {
    schema: Type,
    record: RecordType,
    leaves: Vec<ColumnBuilder>,
    cursor: usize,
    rows: usize,
}

impl TableSliceBuilder {
    /// Creates a builder for the given record schema.
    pub fn new(schema: Type) -> SlateResult<Self> {
        let Some(record) = schema.as_record() else {
            slate_bail!(InvalidArgument: "a table slice schema must be a record type, got {schema}");
        };
        let leaves = record
            .leaves()
            .map(|leaf| ColumnBuilder::new(&leaf.field.ty))
            .collect();
        Ok(Self {
            schema,
            record,
            leaves,
            cursor: 0,
            rows: 0,
        })
    }

    /// The schema this builder produces slices of.
    pub fn schema(&self) -> &Type {
        &self.schema
    }

    /// The number of completed rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Appends the next leaf value in depth-first order. A full pass over
    /// all leaves completes one row.
    pub fn add(&mut self, value: &Value) -> SlateResult<()> {
        self.leaves[self.cursor].append(value)?;
        self.cursor += 1;
        if self.cursor == self.leaves.len() {
            self.cursor = 0;
            self.rows += 1;
        }
        Ok(())
    }

    /// Appends one complete row of leaf values.
    pub fn add_row(&mut self, values: &[Value]) -> SlateResult<()> {
        if values.len() != self.leaves.len() {
            slate_bail!(
                InvalidArgument: "row has {} values, expected {}",
                values.len(),
                self.leaves.len()
            );
        }
        for value in values {
            self.add(value)?;
        }
        Ok(())
    }

    /// Finishes the accumulated rows into a table slice.
    ///
    /// Panics when called mid-row; every started row must be completed.
    pub fn finish(mut self) -> SlateResult<TableSlice> {
        if self.cursor != 0 {
            slate_panic!(
                "cannot finish a table slice mid-row, {} of {} leaves added",
                self.cursor,
                self.leaves.len()
            );
        }
        let columns = {
            let mut arrays = self.leaves.iter_mut().map(ColumnBuilder::finish);
            assemble(&self.record, self.rows, &mut arrays)
        };
        TableSlice::new(self.schema, columns)
    }
}

/// Reassembles flat leaf arrays into the nested struct layout of
/// `record`. Nested structs are valid on every row; only leaves carry
/// nulls.
fn assemble(
    record: &RecordType,
    rows: usize,
    leaves: &mut dyn Iterator<Item = ArrayRef>,
) -> StructArray {
    let mut fields = Vec::new();
    let mut arrays: Vec<ArrayRef> = Vec::new();
    for field in record.fields() {
        let array: ArrayRef = match field.ty.as_record() {
            Some(nested) => Arc::new(assemble(&nested, rows, leaves)),
            None => leaves
                .next()
                .slate_expect("one finished array exists per leaf"),
        };
        fields.push(to_arrow_field(&field.name, &field.ty));
        arrays.push(array);
    }
    debug_assert!(arrays.iter().all(|a| a.len() == rows));
    StructArray::new(fields.into_iter().collect(), arrays, None)
}

#[cfg(test)]
mod tests {
    use slate_types::{EnumerationType, Field, ListType};

    use super::*;

    #[test]
    fn builds_nested_rows() {
        let schema: Type = RecordType::new([
            Field::new("x", Type::int64()),
            Field::new(
                "inner",
                RecordType::new([
                    Field::new("a", Type::string()),
                    Field::new("b", ListType::new(Type::int64()).into()),
                ])
                .into(),
            ),
        ])
        .into();
        let mut builder = TableSliceBuilder::new(schema.with_name("demo")).unwrap();
        builder.add(&Value::Int64(1)).unwrap();
        builder.add(&Value::String("p".into())).unwrap();
        builder
            .add(&Value::List(vec![Value::Int64(1), Value::Int64(2)]))
            .unwrap();
        builder
            .add_row(&[Value::Int64(2), Value::Null, Value::Null])
            .unwrap();
        assert_eq!(builder.rows(), 2);
        let slice = builder.finish().unwrap();
        assert_eq!(slice.rows(), 2);
        assert_eq!(slice.columns(), 3);
        assert_eq!(slice.schema().name(), Some("demo"));
        assert_eq!(
            slice.at(0, 2),
            Value::List(vec![Value::Int64(1), Value::Int64(2)])
        );
        assert_eq!(slice.at(1, 1), Value::Null);
        assert_eq!(slice.at(1, 2), Value::Null);
    }

    #[test]
    fn enumeration_and_ip_columns() {
        let schema: Type = RecordType::new([
            Field::new(
                "level",
                EnumerationType::from_names(["low", "high"]).unwrap().into(),
            ),
            Field::new("addr", Type::ip()),
        ])
        .into();
        let mut builder = TableSliceBuilder::new(schema).unwrap();
        builder
            .add_row(&[
                Value::String("high".into()),
                Value::Ip("192.168.0.1".parse().unwrap()),
            ])
            .unwrap();
        builder.add_row(&[Value::Null, Value::Null]).unwrap();
        assert!(builder.add(&Value::String("medium".into())).is_err());
        builder.add(&Value::String("low".into())).unwrap();
        builder.add(&Value::Null).unwrap();
        let slice = builder.finish().unwrap();
        assert_eq!(slice.rows(), 3);
        assert_eq!(slice.at(0, 0), Value::String("high".into()));
        assert_eq!(slice.at(0, 1), Value::Ip("192.168.0.1".parse().unwrap()));
        assert_eq!(slice.at(1, 0), Value::Null);
        assert_eq!(slice.at(2, 0), Value::String("low".into()));
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let schema: Type = RecordType::new([Field::new("x", Type::int64())]).into();
        let mut builder = TableSliceBuilder::new(schema).unwrap();
        assert!(builder.add(&Value::String("oops".into())).is_err());
    }

    #[test]
    #[should_panic(expected = "mid-row")]
    fn finishing_mid_row_panics() {
        let schema: Type = RecordType::new([
            Field::new("a", Type::int64()),
            Field::new("b", Type::int64()),
        ])
        .into();
        let mut builder = TableSliceBuilder::new(schema).unwrap();
        builder.add(&Value::Int64(1)).unwrap();
        let _ = builder.finish();
    }

    #[test]
    fn map_columns_round_trip() {
        let schema: Type = RecordType::new([Field::new(
            "m",
            slate_types::MapType::new(Type::string(), Type::int64()).into(),
        )])
        .into();
        let mut builder = TableSliceBuilder::new(schema).unwrap();
        builder
            .add(&Value::Map(vec![
                (Value::String("a".into()), Value::Int64(1)),
                (Value::String("b".into()), Value::Int64(2)),
            ]))
            .unwrap();
        let slice = builder.finish().unwrap();
        assert_eq!(
            slice.at(0, 0),
            Value::Map(vec![
                (Value::String("a".into()), Value::Int64(1)),
                (Value::String("b".into()), Value::Int64(2)),
            ])
        );
    }
}
