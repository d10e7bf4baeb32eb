//! Flattening and unflattening of table slices.
//!
//! Flattening decomposes nested record and list-of-record columns into a
//! single level, joining path components with a separator in the
//! synthesized names. A record nested inside a list flattens to one list
//! column per leaf, reusing the outer list's offsets; nested lists
//! collapse into one list by composing their offset buffers. Colliding
//! flat names are disambiguated with numeric suffixes in a second pass.
//!
//! Unflattening is the structural inverse: it groups column names by
//! shared separator-delimited prefixes and reconstructs nested struct and
//! list columns bottom-up. A name whose prefix also names a leaf column
//! is ambiguous and stays flat instead of guessing.

use std::collections::HashSet;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::{Array, ArrayRef, ListArray, StructArray};
use arrow_buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow_schema::Field as ArrowField;
use slate_error::SlateExpect;
use slate_types::arrow::{to_arrow_field, LIST_ITEM};
use slate_types::{Field, ListType, RecordType, Type, TypeKind};

use crate::slice::TableSlice;
use crate::transform::reassemble;

/// The result of flattening a slice: the flat slice plus the names that
/// had to be disambiguated, as (old, new) pairs.
#[derive(Debug)]
pub struct Flattened {
    /// The flattened slice.
    pub slice: TableSlice,
    /// Fields renamed to resolve post-flattening collisions.
    pub renamed: Vec<(String, String)>,
}

/// Flattens all nested record and list-of-record columns of a slice.
pub fn flatten(slice: &TableSlice, separator: &str) -> Flattened {
    let Some(record) = slice.record_type() else {
        return Flattened {
            slice: slice.clone(),
            renamed: Vec::new(),
        };
    };
    if slice.rows() == 0 {
        return Flattened {
            slice: slice.clone(),
            renamed: Vec::new(),
        };
    }
    let batch = slice.batch();
    let mut columns = Vec::new();
    for (i, field) in record.fields().enumerate() {
        flatten_column(separator, "", &[], field, batch.column(i).clone(), &mut columns);
    }
    let renamed = disambiguate(&mut columns);
    Flattened {
        slice: reassemble(slice, batch.len(), columns),
        renamed,
    }
}

fn flatten_column(
    separator: &str,
    prefix: &str,
    list_offsets: &[OffsetBuffer<i32>],
    field: Field,
    array: ArrayRef,
    out: &mut Vec<(Field, ArrayRef)>,
) {
    match field.ty.kind() {
        TypeKind::Record => {
            let record = field.ty.as_record().slate_expect("kind checked");
            let strukt = array.as_struct();
            let next_prefix = format!("{prefix}{}{separator}", field.name);
            for (i, nested) in record.fields().enumerate() {
                flatten_column(
                    separator,
                    &next_prefix,
                    list_offsets,
                    nested,
                    strukt.column(i).clone(),
                    out,
                );
            }
        }
        TypeKind::List => {
            let list_type = field.ty.as_list().slate_expect("kind checked");
            let list = array.as_list::<i32>();
            let mut list_offsets = list_offsets.to_vec();
            list_offsets.push(list.offsets().clone());
            flatten_column(
                separator,
                prefix,
                &list_offsets,
                Field::new(field.name, list_type.value_type()),
                list.values().clone(),
                out,
            );
        }
        _ => {
            let name = format!("{prefix}{}", field.name);
            if list_offsets.is_empty() {
                out.push((Field::new(name, field.ty), array));
                return;
            }
            let combined = combine_offsets(list_offsets);
            let item = Arc::new(to_arrow_field(LIST_ITEM, &field.ty));
            let wrapped = ListArray::new(item, combined, array, None);
            out.push((
                Field::new(name, ListType::new(field.ty).into()),
                Arc::new(wrapped),
            ));
        }
    }
}

/// Composes a stack of list offset buffers into one, replacing each
/// offset with its image under the next buffer. This is what collapses
/// nested lists into a single level.
fn combine_offsets(list_offsets: &[OffsetBuffer<i32>]) -> OffsetBuffer<i32> {
    let mut iter = list_offsets.iter();
    let mut result = iter
        .next()
        .slate_expect("offset combination requires at least one buffer")
        .clone();
    for next in iter {
        let combined: Vec<i32> = result
            .iter()
            .map(|&index| next[usize::try_from(index).slate_expect("offsets are non-negative")])
            .collect();
        result = OffsetBuffer::new(ScalarBuffer::from(combined));
    }
    result
}

/// Renames later occurrences of duplicated names with `_N` suffixes,
/// skipping suffixes that would collide with an original name.
fn disambiguate(columns: &mut [(Field, ArrayRef)]) -> Vec<(String, String)> {
    let originals: HashSet<String> = columns.iter().map(|(f, _)| f.name.clone()).collect();
    let mut used = HashSet::new();
    let mut renamed = Vec::new();
    for (field, _) in columns.iter_mut() {
        if used.insert(field.name.clone()) {
            continue;
        }
        let mut counter = 1;
        let unique = loop {
            let candidate = format!("{}_{counter}", field.name);
            if !used.contains(&candidate) && !originals.contains(&candidate) {
                break candidate;
            }
            counter += 1;
        };
        used.insert(unique.clone());
        renamed.push((std::mem::replace(&mut field.name, unique.clone()), unique));
    }
    renamed
}

/// A record column under reconstruction.
struct PendingRecord {
    len: usize,
    nulls: Option<NullBuffer>,
    fields: Vec<(String, PendingEntry)>,
}

enum PendingEntry {
    Column(ArrayRef, Type),
    Record(PendingRecord),
}

impl PendingRecord {
    fn new(len: usize, nulls: Option<NullBuffer>) -> Self {
        Self {
            len,
            nulls,
            fields: Vec::new(),
        }
    }

    fn realize(self) -> (StructArray, RecordType) {
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut arrow_fields = Vec::with_capacity(self.fields.len());
        let mut arrays = Vec::with_capacity(self.fields.len());
        for (name, entry) in self.fields {
            let (array, ty): (ArrayRef, Type) = match entry {
                PendingEntry::Column(array, ty) => (array, ty),
                PendingEntry::Record(record) => {
                    let (strukt, record_type) = record.realize();
                    (Arc::new(strukt), record_type.into())
                }
            };
            arrow_fields.push(to_arrow_field(&name, &ty));
            fields.push(Field::new(name, ty));
            arrays.push(array);
        }
        (
            StructArray::new(arrow_fields.into_iter().collect(), arrays, self.nulls),
            RecordType::new(fields),
        )
    }
}

/// Validity union: null only where both sides are null.
fn validity_or(a: Option<NullBuffer>, b: Option<&NullBuffer>) -> Option<NullBuffer> {
    match (a, b) {
        (Some(a), Some(b)) => Some(NullBuffer::new(a.inner() | b.inner())),
        _ => None,
    }
}

/// Rebuilds nested structure from separator-delimited column names.
pub fn unflatten(slice: &TableSlice, separator: &str) -> TableSlice {
    let Some(record) = slice.record_type() else {
        return slice.clone();
    };
    let batch = slice.batch();
    let mut root = PendingRecord::new(batch.len(), None);
    absorb(&mut root, batch, &record, separator);
    let (strukt, rebuilt) = root.realize();
    let columns = rebuilt
        .fields()
        .enumerate()
        .map(|(i, field)| (field, strukt.column(i).clone()))
        .collect();
    reassemble(slice, batch.len(), columns)
}

fn absorb(record: &mut PendingRecord, array: &StructArray, rt: &RecordType, separator: &str) {
    record.nulls = validity_or(record.nulls.take(), array.nulls());
    let names: Vec<String> = rt.fields().map(|field| field.name).collect();
    let ambiguous = ambiguous_names(&names, separator);
    for (i, field) in rt.fields().enumerate() {
        let column = array.column(i).clone();
        if ambiguous.contains(&field.name) {
            place(record, &field.name, make_entry(column, &field.ty, separator));
            continue;
        }
        let segments: Vec<&str> = if field.name.is_empty() {
            vec![""]
        } else {
            field.name.split(separator).collect()
        };
        if !insert(record, &segments, &column, &field.ty, separator) {
            place(record, &field.name, make_entry(column, &field.ty, separator));
        }
    }
}

/// Names that cannot be nested without guessing: one input name is a
/// segment-prefix of another.
fn ambiguous_names(names: &[String], separator: &str) -> HashSet<String> {
    let mut ambiguous = HashSet::new();
    for (i, a) in names.iter().enumerate() {
        for b in &names[i + 1..] {
            if a == b {
                continue;
            }
            if is_segment_prefix(a, b, separator) || is_segment_prefix(b, a, separator) {
                ambiguous.insert(a.clone());
                ambiguous.insert(b.clone());
            }
        }
    }
    ambiguous
}

fn is_segment_prefix(short: &str, long: &str, separator: &str) -> bool {
    long.strip_prefix(short)
        .is_some_and(|rest| rest.starts_with(separator))
}

/// Inserts or overwrites an entry under its literal name.
fn place(record: &mut PendingRecord, name: &str, entry: PendingEntry) {
    match record.fields.iter_mut().find(|(n, _)| n == name) {
        Some((_, slot)) => *slot = entry,
        None => record.fields.push((name.to_string(), entry)),
    }
}

/// Walks `segments` down the pending tree, creating intermediate records
/// as needed. Returns `false` when an existing entry blocks the walk, in
/// which case the caller keeps the flat name.
fn insert(
    record: &mut PendingRecord,
    segments: &[&str],
    column: &ArrayRef,
    ty: &Type,
    separator: &str,
) -> bool {
    let (head, rest) = segments
        .split_first()
        .slate_expect("a column name has at least one segment");
    let position = record.fields.iter().position(|(name, _)| name == *head);
    if rest.is_empty() {
        match position {
            None => {
                record
                    .fields
                    .push(((*head).to_string(), make_entry(column.clone(), ty, separator)));
                true
            }
            Some(p) => match &mut record.fields[p].1 {
                PendingEntry::Record(nested) => {
                    // Only a struct column can merge into an existing
                    // reconstructed record.
                    let Some(rt) = ty.as_record() else {
                        return false;
                    };
                    absorb(nested, column.as_struct(), &rt, separator);
                    true
                }
                slot @ PendingEntry::Column(..) => {
                    *slot = make_entry(column.clone(), ty, separator);
                    true
                }
            },
        }
    } else {
        let p = match position {
            Some(p) => match record.fields[p].1 {
                PendingEntry::Record(_) => p,
                PendingEntry::Column(..) => return false,
            },
            None => {
                record.fields.push((
                    (*head).to_string(),
                    PendingEntry::Record(PendingRecord::new(record.len, record.nulls.clone())),
                ));
                record.fields.len() - 1
            }
        };
        let PendingEntry::Record(nested) = &mut record.fields[p].1 else {
            return false;
        };
        insert(nested, rest, column, ty, separator)
    }
}

fn make_entry(column: ArrayRef, ty: &Type, separator: &str) -> PendingEntry {
    match ty.kind() {
        TypeKind::Record => {
            let rt = ty.as_record().slate_expect("kind checked");
            let strukt = column.as_struct();
            let mut nested = PendingRecord::new(strukt.len(), strukt.nulls().cloned());
            absorb(&mut nested, strukt, &rt, separator);
            PendingEntry::Record(nested)
        }
        TypeKind::List => {
            let (array, ty) = unflatten_list(&column, ty, separator);
            PendingEntry::Column(array, ty)
        }
        _ => PendingEntry::Column(column, ty.clone()),
    }
}

/// Unflattening a list means unflattening its values.
fn unflatten_list(column: &ArrayRef, ty: &Type, separator: &str) -> (ArrayRef, Type) {
    let list_type = ty.as_list().slate_expect("kind checked");
    let value_type = list_type.value_type();
    let list = column.as_list::<i32>();
    let (values, value_type): (ArrayRef, Type) = match value_type.kind() {
        TypeKind::Record => {
            let rt = value_type.as_record().slate_expect("kind checked");
            let strukt = list.values().as_struct();
            let mut nested = PendingRecord::new(strukt.len(), strukt.nulls().cloned());
            absorb(&mut nested, strukt, &rt, separator);
            let (rebuilt, rebuilt_type) = nested.realize();
            (Arc::new(rebuilt), rebuilt_type.into())
        }
        TypeKind::List => unflatten_list(&list.values().clone(), &value_type, separator),
        _ => (list.values().clone(), value_type),
    };
    let item = Arc::new(ArrowField::new(LIST_ITEM, values.data_type().clone(), true));
    let rebuilt = ListArray::new(item, list.offsets().clone(), values, list.nulls().cloned());
    (Arc::new(rebuilt), ListType::new(value_type).into())
}

#[cfg(test)]
mod tests {
    use arrow_array::Int64Array;
    use arrow_schema::Fields;
    use slate_types::Offset;

    use super::*;
    use crate::value::Value;

    fn list_of_int(values: Vec<Vec<i64>>) -> (ArrayRef, Type) {
        let mut offsets = vec![0i32];
        let mut flat = Vec::new();
        for row in &values {
            flat.extend_from_slice(row);
            offsets.push(flat.len() as i32);
        }
        let item = Arc::new(to_arrow_field(LIST_ITEM, &Type::int64()));
        let array = ListArray::new(
            item,
            OffsetBuffer::new(ScalarBuffer::from(offsets)),
            Arc::new(Int64Array::from(flat)),
            None,
        );
        (Arc::new(array), ListType::new(Type::int64()).into())
    }

    fn scenario_slice() -> TableSlice {
        let (arr, list_type) = list_of_int(vec![vec![1, 2], vec![3]]);
        let schema: Type = RecordType::new([
            Field::new("int", Type::int64()),
            Field::new("arr", list_type.clone()),
        ])
        .into();
        let fields: Fields = [
            to_arrow_field("int", &Type::int64()),
            to_arrow_field("arr", &list_type),
        ]
        .into_iter()
        .collect();
        let batch = StructArray::new(
            fields,
            vec![Arc::new(Int64Array::from(vec![5, 10])) as ArrayRef, arr],
            None,
        );
        TableSlice::new(schema.with_name("scenario"), batch).unwrap()
    }

    #[test]
    fn flat_slice_with_list_round_trips() {
        let slice = scenario_slice();
        let flattened = flatten(&slice, ".");
        assert!(flattened.renamed.is_empty());
        let restored = unflatten(&flattened.slice, ".");
        assert_eq!(restored.schema(), slice.schema());
        assert_eq!(restored.at(0, 0), Value::Int64(5));
        assert_eq!(
            restored.at(0, 1),
            Value::List(vec![Value::Int64(1), Value::Int64(2)])
        );
        assert_eq!(restored.at(1, 1), Value::List(vec![Value::Int64(3)]));
    }

    #[test]
    fn nested_records_flatten_to_dotted_names() {
        let inner: Type = RecordType::new([
            Field::new("a", Type::int64()),
            Field::new("b", Type::int64()),
        ])
        .into();
        let schema: Type = RecordType::new([Field::new("outer", inner.clone())]).into();
        let inner_fields: Fields = [
            to_arrow_field("a", &Type::int64()),
            to_arrow_field("b", &Type::int64()),
        ]
        .into_iter()
        .collect();
        let strukt = StructArray::new(
            inner_fields,
            vec![
                Arc::new(Int64Array::from(vec![1])) as ArrayRef,
                Arc::new(Int64Array::from(vec![2])),
            ],
            None,
        );
        let fields: Fields = [to_arrow_field("outer", &inner)].into_iter().collect();
        let batch = StructArray::new(fields, vec![Arc::new(strukt) as ArrayRef], None);
        let slice = TableSlice::new(schema.with_name("demo"), batch).unwrap();
        let flattened = flatten(&slice, ".");
        let record = flattened.slice.record_type().unwrap();
        assert_eq!(record.field(0).name, "outer.a");
        assert_eq!(record.field(1).name, "outer.b");
        assert_eq!(flattened.slice.at(0, 1), Value::Int64(2));
        let restored = unflatten(&flattened.slice, ".");
        assert_eq!(restored.schema(), slice.schema());
        assert_eq!(
            restored.values_of(&Offset::from(vec![0, 0])).next(),
            Some(Value::Int64(1))
        );
    }

    #[test]
    fn record_in_list_becomes_lists_per_leaf() {
        let element: Type = RecordType::new([
            Field::new("a", Type::int64()),
            Field::new("b", Type::int64()),
        ])
        .into();
        let list_type: Type = ListType::new(element.clone()).into();
        let element_fields: Fields = [
            to_arrow_field("a", &Type::int64()),
            to_arrow_field("b", &Type::int64()),
        ]
        .into_iter()
        .collect();
        let elements = StructArray::new(
            element_fields,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef,
                Arc::new(Int64Array::from(vec![4, 5, 6])),
            ],
            None,
        );
        let item = Arc::new(to_arrow_field(LIST_ITEM, &element));
        let list = ListArray::new(
            item,
            OffsetBuffer::new(ScalarBuffer::from(vec![0i32, 2, 3])),
            Arc::new(elements),
            None,
        );
        let schema: Type = RecordType::new([Field::new("xs", list_type.clone())]).into();
        let fields: Fields = [to_arrow_field("xs", &list_type)].into_iter().collect();
        let batch = StructArray::new(fields, vec![Arc::new(list) as ArrayRef], None);
        let slice = TableSlice::new(schema, batch).unwrap();
        let flattened = flatten(&slice, ".");
        let record = flattened.slice.record_type().unwrap();
        assert_eq!(record.num_fields(), 2);
        assert_eq!(record.field(0).name, "xs.a");
        assert_eq!(record.field(0).ty, ListType::new(Type::int64()).into());
        assert_eq!(
            flattened.slice.at(0, 0),
            Value::List(vec![Value::Int64(1), Value::Int64(2)])
        );
        assert_eq!(flattened.slice.at(1, 1), Value::List(vec![Value::Int64(6)]));
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let inner: Type = RecordType::new([Field::new("b", Type::int64())]).into();
        let schema: Type = RecordType::new([
            Field::new("a.b", Type::int64()),
            Field::new("a", inner.clone()),
        ])
        .into();
        let inner_fields: Fields = [to_arrow_field("b", &Type::int64())].into_iter().collect();
        let strukt = StructArray::new(
            inner_fields,
            vec![Arc::new(Int64Array::from(vec![2])) as ArrayRef],
            None,
        );
        let fields: Fields = [
            to_arrow_field("a.b", &Type::int64()),
            to_arrow_field("a", &inner),
        ]
        .into_iter()
        .collect();
        let batch = StructArray::new(
            fields,
            vec![
                Arc::new(Int64Array::from(vec![1])) as ArrayRef,
                Arc::new(strukt),
            ],
            None,
        );
        let slice = TableSlice::new(schema, batch).unwrap();
        let flattened = flatten(&slice, ".");
        let record = flattened.slice.record_type().unwrap();
        assert_eq!(record.field(0).name, "a.b");
        assert_eq!(record.field(1).name, "a.b_1");
        assert_eq!(flattened.renamed, vec![("a.b".to_string(), "a.b_1".to_string())]);
    }

    #[test]
    fn ambiguous_prefixes_stay_flat() {
        let schema: Type = RecordType::new([
            Field::new("a", Type::int64()),
            Field::new("a.b", Type::int64()),
        ])
        .into();
        let fields: Fields = [
            to_arrow_field("a", &Type::int64()),
            to_arrow_field("a.b", &Type::int64()),
        ]
        .into_iter()
        .collect();
        let batch = StructArray::new(
            fields,
            vec![
                Arc::new(Int64Array::from(vec![1])) as ArrayRef,
                Arc::new(Int64Array::from(vec![2])),
            ],
            None,
        );
        let slice = TableSlice::new(schema, batch).unwrap();
        let restored = unflatten(&slice, ".");
        let record = restored.record_type().unwrap();
        assert_eq!(record.field(0).name, "a");
        assert_eq!(record.field(1).name, "a.b");
        assert_eq!(restored.at(0, 1), Value::Int64(2));
    }
}
