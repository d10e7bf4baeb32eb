//! Column transformations over table slices.
//!
//! [`transform_columns`] is the data-level mirror of the type-level
//! transform on record types: one recursive descent over the column-array
//! tree and the parallel type tree, applying rewrites at matched offsets
//! and recursing into prefix matches. The two algorithms must stay in
//! lock-step; select, drop, rename, flatten, and enumeration resolution
//! are all expressed in terms of this primitive.

use std::iter::Peekable;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::UInt32Type;
use arrow_array::{Array, ArrayRef, StructArray};
use arrow_schema::Fields;
use slate_error::{slate_panic, SlateExpect, SlateResult};
use slate_types::arrow::to_arrow_field;
use slate_types::{Field, Offset, RecordType, Type, TypeKind};

use crate::slice::{column_of, TableSlice};

/// A single data-level rewrite: the function maps the field at `offset`
/// and its column to zero or more replacement columns.
pub struct ColumnTransformation {
    /// The offset of the column to rewrite.
    pub offset: Offset,
    pub(crate) fun: Box<dyn FnOnce(Field, ArrayRef) -> Vec<(Field, ArrayRef)>>,
}

impl ColumnTransformation {
    /// Creates a column transformation from a rewrite function.
    pub fn new(
        offset: impl Into<Offset>,
        fun: impl FnOnce(Field, ArrayRef) -> Vec<(Field, ArrayRef)> + 'static,
    ) -> Self {
        Self {
            offset: offset.into(),
            fun: Box::new(fun),
        }
    }

    /// A transformation that drops the column at `offset`.
    pub fn drop_column(offset: impl Into<Offset>) -> Self {
        Self::new(offset, |_, _| Vec::new())
    }

    /// A transformation that replaces the column at `offset`.
    pub fn assign(offset: impl Into<Offset>, columns: Vec<(Field, ArrayRef)>) -> Self {
        Self::new(offset, move |_, _| columns)
    }

    /// A transformation that renames the field at `offset`.
    pub fn rename(offset: impl Into<Offset>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(offset, move |field, array| {
            vec![(Field::new(name, field.ty), array)]
        })
    }
}

impl std::fmt::Debug for ColumnTransformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnTransformation")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// Applies a list of column rewrites in one depth-first pass over the
/// slice's type tree and array tree simultaneously.
///
/// Preconditions, checked in debug builds: the list is sorted by offset,
/// and no offset is a strict prefix of a later one. Returns `None` when
/// every column was dropped.
pub fn transform_columns(
    slice: &TableSlice,
    transformations: Vec<ColumnTransformation>,
) -> Option<TableSlice> {
    debug_assert!(
        transformations
            .windows(2)
            .all(|pair| pair[0].offset <= pair[1].offset),
        "transformations must be sorted by offset"
    );
    debug_assert!(
        !transformations
            .windows(2)
            .any(|pair| pair[0].offset.is_prefix_of(&pair[1].offset)),
        "transformation offsets must not overlap"
    );
    if transformations.is_empty() {
        return Some(slice.clone());
    }
    let record = slice.record_type()?;
    let batch = slice.batch();
    let layer: Vec<(Field, ArrayRef)> = record
        .fields()
        .enumerate()
        .map(|(i, field)| (field, batch.column(i).clone()))
        .collect();
    let mut current = transformations.into_iter().peekable();
    let layer = transform_columns_layer(layer, vec![0], &mut current);
    debug_assert!(current.peek().is_none(), "transformation offset out of bounds");
    if layer.is_empty() {
        return None;
    }
    Some(reassemble(slice, batch.len(), layer))
}

fn transform_columns_layer(
    layer: Vec<(Field, ArrayRef)>,
    index: Vec<usize>,
    current: &mut Peekable<std::vec::IntoIter<ColumnTransformation>>,
) -> Vec<(Field, ArrayRef)> {
    debug_assert!(!index.is_empty());
    let mut index = index;
    let mut result = Vec::with_capacity(layer.len());
    for (field, array) in layer {
        // Three cases per column: apply the rewrite on an exact offset
        // match, recurse on a prefix match, or keep the column as-is.
        let (is_prefix_match, is_exact_match) = match current.peek() {
            None => (false, false),
            Some(transformation) => {
                let shared = index
                    .iter()
                    .zip(transformation.offset.iter())
                    .take_while(|(a, b)| a == b)
                    .count();
                let is_prefix_match = shared == index.len();
                let is_exact_match = is_prefix_match && shared == transformation.offset.len();
                (is_prefix_match, is_exact_match)
            }
        };
        if is_exact_match {
            let transformation = current.next().slate_expect("peeked");
            result.extend((transformation.fun)(field, array));
        } else if is_prefix_match {
            let nested = field.ty.as_record().unwrap_or_else(|| {
                slate_panic!(
                    "transformation offset descends into non-record column `{}`",
                    field.name
                )
            });
            let strukt = array.as_struct();
            let nested_layer: Vec<(Field, ArrayRef)> = nested
                .fields()
                .enumerate()
                .map(|(i, field)| (field, strukt.column(i).clone()))
                .collect();
            let mut nested_index = index.clone();
            nested_index.push(0);
            let nested_layer = transform_columns_layer(nested_layer, nested_index, current);
            if !nested_layer.is_empty() {
                let mut nested_schema: Type =
                    RecordType::new(nested_layer.iter().map(|(f, _)| f.clone())).into();
                nested_schema.assign_metadata(&field.ty);
                let arrow_fields: Fields = nested_layer
                    .iter()
                    .map(|(f, _)| to_arrow_field(&f.name, &f.ty))
                    .collect();
                let arrays: Vec<ArrayRef> =
                    nested_layer.into_iter().map(|(_, a)| a).collect();
                let rebuilt = StructArray::new(arrow_fields, arrays, strukt.nulls().cloned());
                result.push((Field::new(field.name, nested_schema), Arc::new(rebuilt)));
            }
        } else {
            result.push((field, array));
        }
        *index.last_mut().slate_expect("index is non-empty") += 1;
    }
    result
}

/// Builds a slice from transformed top-level columns, carrying over the
/// input's name, attributes, offset, and import time.
pub(crate) fn reassemble(
    source: &TableSlice,
    rows: usize,
    columns: Vec<(Field, ArrayRef)>,
) -> TableSlice {
    let mut schema: Type =
        RecordType::new(columns.iter().map(|(f, _)| f.clone())).into();
    schema.assign_metadata(source.schema());
    let arrow_fields: Fields = columns
        .iter()
        .map(|(f, _)| to_arrow_field(&f.name, &f.ty))
        .collect();
    let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, a)| a).collect();
    debug_assert!(arrays.iter().all(|a| a.len() == rows));
    let batch = StructArray::new(arrow_fields, arrays, None);
    let mut result =
        TableSlice::new(schema, batch).slate_expect("transformed columns form a valid slice");
    if let Some(offset) = source.offset() {
        result.set_offset(offset);
    }
    if let Some(import_time) = source.import_time() {
        result.set_import_time(import_time);
    }
    result
}

/// Restricts a slice to the columns at the given offsets, preserving the
/// surrounding record structure.
///
/// Preconditions as for [`transform_columns`]: sorted, non-overlapping.
/// Returns `None` when the selection is empty.
pub fn select_columns(slice: &TableSlice, offsets: &[Offset]) -> Option<TableSlice> {
    debug_assert!(
        offsets.windows(2).all(|pair| pair[0] <= pair[1]),
        "selected offsets must be sorted"
    );
    debug_assert!(
        !offsets
            .windows(2)
            .any(|pair| pair[0].is_prefix_of(&pair[1])),
        "selected offsets must not overlap"
    );
    let record = slice.record_type()?;
    let batch = slice.batch();
    let layer: Vec<(Field, ArrayRef)> = record
        .fields()
        .enumerate()
        .map(|(i, field)| (field, batch.column(i).clone()))
        .collect();
    let mut current = offsets.iter().peekable();
    let layer = select_layer(layer, vec![0], &mut current);
    if layer.is_empty() {
        return None;
    }
    Some(reassemble(slice, batch.len(), layer))
}

fn select_layer<'a>(
    layer: Vec<(Field, ArrayRef)>,
    index: Vec<usize>,
    current: &mut Peekable<std::slice::Iter<'a, Offset>>,
) -> Vec<(Field, ArrayRef)> {
    let mut index = index;
    let mut result = Vec::new();
    for (field, array) in layer {
        let (is_prefix_match, is_exact_match) = match current.peek() {
            None => (false, false),
            Some(offset) => {
                let shared = index
                    .iter()
                    .zip(offset.iter())
                    .take_while(|(a, b)| a == b)
                    .count();
                let is_prefix_match = shared == index.len();
                let is_exact_match = is_prefix_match && shared == offset.len();
                (is_prefix_match, is_exact_match)
            }
        };
        if is_exact_match {
            current.next();
            result.push((field, array));
        } else if is_prefix_match {
            let nested = field.ty.as_record().unwrap_or_else(|| {
                slate_panic!("selected offset descends into non-record column `{}`", field.name)
            });
            let strukt = array.as_struct();
            let nested_layer: Vec<(Field, ArrayRef)> = nested
                .fields()
                .enumerate()
                .map(|(i, field)| (field, strukt.column(i).clone()))
                .collect();
            let mut nested_index = index.clone();
            nested_index.push(0);
            let nested_layer = select_layer(nested_layer, nested_index, current);
            if !nested_layer.is_empty() {
                let mut nested_schema: Type =
                    RecordType::new(nested_layer.iter().map(|(f, _)| f.clone())).into();
                nested_schema.assign_metadata(&field.ty);
                let arrow_fields: Fields = nested_layer
                    .iter()
                    .map(|(f, _)| to_arrow_field(&f.name, &f.ty))
                    .collect();
                let arrays: Vec<ArrayRef> =
                    nested_layer.into_iter().map(|(_, a)| a).collect();
                let rebuilt = StructArray::new(arrow_fields, arrays, strukt.nulls().cloned());
                result.push((Field::new(field.name, nested_schema), Arc::new(rebuilt)));
            }
        }
        *index.last_mut().slate_expect("index is non-empty") += 1;
    }
    result
}

/// Replaces every enumeration leaf with a plain string column holding the
/// variant names, preserving field metadata.
pub fn resolve_enumerations(slice: &TableSlice) -> SlateResult<TableSlice> {
    let Some(record) = slice.record_type() else {
        return Ok(slice.clone());
    };
    let mut transformations = Vec::new();
    for leaf in record.leaves() {
        if leaf.field.ty.kind() != TypeKind::Enumeration {
            continue;
        }
        let (_, array) = column_of(slice.batch(), &record, &leaf.offset);
        let dictionary = array.as_dictionary::<UInt32Type>();
        let resolved =
            arrow_select::take::take(dictionary.values().as_ref(), dictionary.keys(), None)?;
        let mut ty = Type::string();
        ty.assign_metadata(&leaf.field.ty);
        transformations.push(ColumnTransformation::assign(
            leaf.offset,
            vec![(Field::new(leaf.field.name, ty), resolved)],
        ));
    }
    if transformations.is_empty() {
        return Ok(slice.clone());
    }
    // Leaves come out in depth-first order, which is sorted by offset.
    Ok(transform_columns(slice, transformations)
        .slate_expect("resolving enumerations never drops columns"))
}

#[cfg(test)]
mod tests {
    use arrow_array::{Int64Array, StringArray, UInt32Array};
    use slate_types::EnumerationType;

    use super::*;
    use crate::value::Value;

    fn nested_slice() -> TableSlice {
        let schema: Type = RecordType::new([
            Field::new("x", Type::int64()),
            Field::new(
                "inner",
                RecordType::new([
                    Field::new("a", Type::string()),
                    Field::new("b", Type::int64()),
                ])
                .into(),
            ),
        ])
        .into();
        let inner_fields: Fields = [
            to_arrow_field("a", &Type::string()),
            to_arrow_field("b", &Type::int64()),
        ]
        .into_iter()
        .collect();
        let inner = StructArray::new(
            inner_fields,
            vec![
                Arc::new(StringArray::from(vec!["p", "q"])) as ArrayRef,
                Arc::new(Int64Array::from(vec![10, 20])),
            ],
            None,
        );
        let fields: Fields = [
            to_arrow_field("x", &Type::int64()),
            to_arrow_field("inner", &schema.as_record().unwrap().field(1).ty),
        ]
        .into_iter()
        .collect();
        let batch = StructArray::new(
            fields,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])) as ArrayRef,
                Arc::new(inner),
            ],
            None,
        );
        TableSlice::new(schema.with_name("nested"), batch).unwrap()
    }

    #[test]
    fn drop_a_nested_column() {
        let slice = nested_slice();
        let out = transform_columns(
            &slice,
            vec![ColumnTransformation::drop_column(vec![1, 0])],
        )
        .unwrap();
        assert_eq!(out.columns(), 2);
        assert_eq!(out.at(1, 1), Value::Int64(20));
        assert_eq!(out.schema().name(), Some("nested"));
        assert_eq!(out.rows(), 2);
    }

    #[test]
    fn dropping_everything_yields_none() {
        let slice = nested_slice();
        let out = transform_columns(
            &slice,
            vec![
                ColumnTransformation::drop_column(vec![0]),
                ColumnTransformation::drop_column(vec![1]),
            ],
        );
        assert!(out.is_none());
    }

    #[test]
    fn rename_keeps_data() {
        let slice = nested_slice();
        let out = transform_columns(
            &slice,
            vec![ColumnTransformation::rename(vec![0], "renamed")],
        )
        .unwrap();
        let record = out.record_type().unwrap();
        assert_eq!(record.field(0).name, "renamed");
        assert_eq!(out.at(0, 0), Value::Int64(1));
    }

    #[test]
    fn select_keeps_structure() {
        let slice = nested_slice();
        let out = select_columns(&slice, &[Offset::from(vec![1, 1])]).unwrap();
        let record = out.record_type().unwrap();
        assert_eq!(record.num_fields(), 1);
        assert_eq!(record.field(0).name, "inner");
        assert_eq!(out.columns(), 1);
        assert_eq!(out.at(0, 0), Value::Int64(10));
        assert!(select_columns(&slice, &[]).is_none());
    }

    #[test]
    fn enumeration_resolution() {
        let enumeration: Type = EnumerationType::from_names(["low", "high"]).unwrap().into();
        let schema: Type =
            RecordType::new([Field::new("level", enumeration.clone())]).into();
        let keys = UInt32Array::from(vec![Some(1), Some(0), None]);
        let values = Arc::new(StringArray::from(vec!["low", "high"]));
        let dictionary = arrow_array::DictionaryArray::new(keys, values);
        let fields: Fields = [to_arrow_field("level", &enumeration)].into_iter().collect();
        let batch = StructArray::new(fields, vec![Arc::new(dictionary) as ArrayRef], None);
        let slice = TableSlice::new(schema, batch).unwrap();
        let resolved = resolve_enumerations(&slice).unwrap();
        let record = resolved.record_type().unwrap();
        assert_eq!(record.field(0).ty, Type::string());
        assert_eq!(resolved.at(0, 0), Value::String("high".into()));
        assert_eq!(resolved.at(1, 0), Value::String("low".into()));
        assert_eq!(resolved.at(2, 0), Value::Null);
    }
}
