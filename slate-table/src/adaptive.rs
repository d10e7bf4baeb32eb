//! Row-wise construction without a schema known upfront.
//!
//! The adaptive builder discovers its record type incrementally as fields
//! are pushed by name. Fields may appear out of order and sparsely across
//! rows; absent fields are back-filled with nulls so every finished
//! column has uniform length. Nested records are adaptive builders
//! themselves, composed recursively. A row under construction is buffered
//! and only applied on commit, so cancelling a partial row is free.

use std::sync::Arc;

use arrow_array::{ArrayRef, NullArray, StructArray};
use arrow_buffer::NullBuffer;
use slate_error::{slate_bail, slate_err, SlateResult};
use slate_types::arrow::to_arrow_field;
use slate_types::{Field, RecordType, Type, TypeKind};

use crate::builders::ColumnBuilder;
use crate::slice::TableSlice;
use crate::value::{infer, Value};

/// Builds a table slice row by row, growing the schema as fields appear.
#[derive(Default)]
pub struct AdaptiveBuilder {
    fields: Vec<AdaptiveField>,
    rows: usize,
    pending: Vec<(String, Value)>,
}

struct AdaptiveField {
    name: String,
    column: AdaptiveColumn,
}

enum AdaptiveColumn {
    /// A concrete column. The null type marks a field that has only ever
    /// held nulls; it upgrades in place when the first real value
    /// arrives.
    Leaf { ty: Type, builder: ColumnBuilder },
    /// A nested record, adapting independently.
    Record {
        builder: AdaptiveBuilder,
        validity: Vec<bool>,
    },
}

impl AdaptiveBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of committed rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Whether no rows were committed and no row is in progress.
    pub fn is_empty(&self) -> bool {
        self.rows == 0 && self.pending.is_empty()
    }

    /// Stages a field of the current row, replacing an earlier value for
    /// the same name within this row.
    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.pending.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.pending.push((name, value)),
        }
    }

    /// Discards the row under construction. Committed rows are
    /// unaffected.
    pub fn cancel_row(&mut self) {
        self.pending.clear();
    }

    /// Commits the staged row: new fields are added with null back-fill,
    /// absent fields receive a null, and the staged values are appended.
    ///
    /// On error the staged row stays intact, so it can be amended or
    /// cancelled.
    pub fn commit_row(&mut self) -> SlateResult<()> {
        for (name, value) in &self.pending {
            self.check(name, value)?;
        }
        let pending = std::mem::take(&mut self.pending);
        let mut touched = Vec::with_capacity(pending.len());
        for (name, value) in pending {
            self.apply(&name, &value)?;
            touched.push(name);
        }
        for field in &mut self.fields {
            if !touched.iter().any(|name| *name == field.name) {
                field.column.append_null();
            }
        }
        self.rows += 1;
        Ok(())
    }

    /// Commits one whole row of (name, value) pairs.
    pub fn add_row<S: Into<String>>(
        &mut self,
        values: impl IntoIterator<Item = (S, Value)>,
    ) -> SlateResult<()> {
        for (name, value) in values {
            self.push(name, value);
        }
        self.commit_row()
    }

    fn check(&self, name: &str, value: &Value) -> SlateResult<()> {
        let Some(field) = self.fields.iter().find(|field| field.name == name) else {
            if !value.is_null() && infer(value).is_none() {
                slate_bail!(InvalidArgument: "cannot infer a type for field `{name}`");
            }
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        match &field.column {
            AdaptiveColumn::Leaf { ty, builder } => {
                let inferred = infer(value).ok_or_else(
                    || slate_err!(InvalidArgument: "cannot infer a type for field `{name}`"),
                )?;
                if matches!(builder, ColumnBuilder::Null { .. }) {
                    return Ok(());
                }
                match slate_types::unify(ty, &inferred) {
                    Some(unified) if unified == *ty => Ok(()),
                    _ => slate_bail!(
                        InvalidArgument: "field `{name}` holds {ty}, cannot append {inferred}"
                    ),
                }
            }
            AdaptiveColumn::Record { builder, .. } => {
                let Value::Record(entries) = value else {
                    slate_bail!(
                        InvalidArgument: "field `{name}` holds a record, cannot append a {} value",
                        value.kind_name()
                    );
                };
                for (nested_name, nested_value) in entries {
                    builder.check(nested_name, nested_value)?;
                }
                Ok(())
            }
        }
    }

    fn apply(&mut self, name: &str, value: &Value) -> SlateResult<()> {
        let rows = self.rows;
        let position = self.fields.iter().position(|field| field.name == name);
        let position = match position {
            Some(position) => position,
            None => {
                self.fields.push(AdaptiveField {
                    name: name.to_string(),
                    column: new_column(value, rows)?,
                });
                self.fields.len() - 1
            }
        };
        let column = &mut self.fields[position].column;
        // Upgrade an all-null column to the first real value's type.
        if let AdaptiveColumn::Leaf {
            builder: ColumnBuilder::Null { len },
            ..
        } = column
        {
            if !value.is_null() {
                let backfill = *len;
                *column = new_column(value, backfill)?;
            }
        }
        match column {
            AdaptiveColumn::Leaf { builder, .. } => builder.append(value),
            AdaptiveColumn::Record { builder, validity } => match value {
                Value::Null => {
                    builder.append_null_row();
                    validity.push(false);
                    Ok(())
                }
                Value::Record(entries) => {
                    for (nested_name, nested_value) in entries {
                        builder.push(nested_name.clone(), nested_value.clone());
                    }
                    builder.commit_row()?;
                    validity.push(true);
                    Ok(())
                }
                _ => slate_bail!(
                    InvalidArgument: "field `{name}` holds a record, cannot append a {} value",
                    value.kind_name()
                ),
            },
        }
    }

    /// Appends a full row of nulls, without staging.
    fn append_null_row(&mut self) {
        for field in &mut self.fields {
            field.column.append_null();
        }
        self.rows += 1;
    }

    /// Finishes the committed rows into a table slice. A builder that
    /// never saw a field yields the empty slice.
    pub fn finish(self) -> SlateResult<TableSlice> {
        debug_assert!(self.pending.is_empty(), "uncommitted row at finish");
        if self.fields.is_empty() {
            return Ok(TableSlice::empty());
        }
        let (fields, arrays, _) = self.realize();
        let schema: Type = RecordType::new(fields.clone()).into();
        let arrow_fields = fields
            .iter()
            .map(|field| to_arrow_field(&field.name, &field.ty))
            .collect();
        TableSlice::new(schema, StructArray::new(arrow_fields, arrays, None))
    }

    /// Finishes into a slice whose schema carries the given name.
    pub fn finish_named(self, name: &str) -> SlateResult<TableSlice> {
        debug_assert!(self.pending.is_empty(), "uncommitted row at finish");
        if self.fields.is_empty() {
            return Ok(TableSlice::empty());
        }
        let (fields, arrays, _) = self.realize();
        let schema = Type::from(RecordType::new(fields.clone())).with_name(name);
        let arrow_fields = fields
            .iter()
            .map(|field| to_arrow_field(&field.name, &field.ty))
            .collect();
        TableSlice::new(schema, StructArray::new(arrow_fields, arrays, None))
    }

    fn realize(self) -> (Vec<Field>, Vec<ArrayRef>, usize) {
        let rows = self.rows;
        let mut fields = Vec::with_capacity(self.fields.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            match field.column {
                AdaptiveColumn::Leaf { ty, mut builder } => {
                    fields.push(Field::new(field.name, ty));
                    arrays.push(builder.finish());
                }
                AdaptiveColumn::Record { builder, validity } => {
                    if builder.fields.is_empty() {
                        // Every value was a record without fields; nothing
                        // representable remains but the slot itself.
                        fields.push(Field::new(field.name, Type::null()));
                        arrays.push(Arc::new(NullArray::new(rows)));
                        continue;
                    }
                    let (nested_fields, nested_arrays, _) = builder.realize();
                    let record = RecordType::new(nested_fields.clone());
                    let arrow_fields = nested_fields
                        .iter()
                        .map(|f| to_arrow_field(&f.name, &f.ty))
                        .collect();
                    let nulls = NullBuffer::from(validity);
                    let strukt =
                        StructArray::new(arrow_fields, nested_arrays, Some(nulls));
                    fields.push(Field::new(field.name, record.into()));
                    arrays.push(Arc::new(strukt));
                }
            }
        }
        (fields, arrays, rows)
    }
}

impl AdaptiveColumn {
    fn append_null(&mut self) {
        match self {
            AdaptiveColumn::Leaf { builder, .. } => builder.append_null(),
            AdaptiveColumn::Record { builder, validity } => {
                builder.append_null_row();
                validity.push(false);
            }
        }
    }
}

/// Creates a column for a freshly discovered field, back-filling
/// `backfill` null rows so the column aligns with its siblings.
fn new_column(value: &Value, backfill: usize) -> SlateResult<AdaptiveColumn> {
    if value.is_null() {
        return Ok(AdaptiveColumn::Leaf {
            ty: Type::null(),
            builder: ColumnBuilder::Null { len: backfill },
        });
    }
    if matches!(value, Value::Record(_)) {
        let mut builder = AdaptiveBuilder::new();
        builder.rows = backfill;
        return Ok(AdaptiveColumn::Record {
            builder,
            validity: vec![false; backfill],
        });
    }
    let ty = infer(value)
        .ok_or_else(|| slate_err!(InvalidArgument: "cannot infer a type for a {} value", value.kind_name()))?;
    debug_assert!(ty.kind() != TypeKind::Record);
    let mut builder = ColumnBuilder::new(&ty);
    for _ in 0..backfill {
        builder.append_null();
    }
    Ok(AdaptiveColumn::Leaf { ty, builder })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_fields_backfill_nulls() {
        let mut builder = AdaptiveBuilder::new();
        builder.add_row([("a", Value::Int64(1))]).unwrap();
        builder
            .add_row([("a", Value::Int64(2)), ("b", Value::String("x".into()))])
            .unwrap();
        builder.add_row([("b", Value::String("y".into()))]).unwrap();
        let slice = builder.finish().unwrap();
        assert_eq!(slice.rows(), 3);
        assert_eq!(slice.columns(), 2);
        assert_eq!(slice.at(0, 1), Value::Null);
        assert_eq!(slice.at(2, 0), Value::Null);
        assert_eq!(slice.at(2, 1), Value::String("y".into()));
    }

    #[test]
    fn null_columns_upgrade_in_place() {
        let mut builder = AdaptiveBuilder::new();
        builder.add_row([("a", Value::Null)]).unwrap();
        builder.add_row([("a", Value::Int64(7))]).unwrap();
        let slice = builder.finish().unwrap();
        let record = slice.record_type().unwrap();
        assert_eq!(record.field(0).ty, Type::int64());
        assert_eq!(slice.at(0, 0), Value::Null);
        assert_eq!(slice.at(1, 0), Value::Int64(7));
    }

    #[test]
    fn nested_records_adapt_recursively() {
        let mut builder = AdaptiveBuilder::new();
        builder
            .add_row([(
                "inner",
                Value::Record(vec![("x".into(), Value::Int64(1))]),
            )])
            .unwrap();
        builder
            .add_row([(
                "inner",
                Value::Record(vec![("y".into(), Value::String("s".into()))]),
            )])
            .unwrap();
        let slice = builder.finish().unwrap();
        assert_eq!(slice.columns(), 2);
        assert_eq!(slice.at(0, 0), Value::Int64(1));
        assert_eq!(slice.at(0, 1), Value::Null);
        assert_eq!(slice.at(1, 1), Value::String("s".into()));
    }

    #[test]
    fn cancelling_discards_only_the_pending_row() {
        let mut builder = AdaptiveBuilder::new();
        builder.add_row([("a", Value::Int64(1))]).unwrap();
        builder.push("a", Value::Int64(2));
        builder.push("zzz", Value::Bool(true));
        builder.cancel_row();
        builder.add_row([("a", Value::Int64(3))]).unwrap();
        let slice = builder.finish().unwrap();
        assert_eq!(slice.rows(), 2);
        assert_eq!(slice.columns(), 1);
        assert_eq!(slice.at(1, 0), Value::Int64(3));
    }

    #[test]
    fn conflicting_types_leave_the_row_intact() {
        let mut builder = AdaptiveBuilder::new();
        builder.add_row([("a", Value::Int64(1))]).unwrap();
        builder.push("a", Value::String("oops".into()));
        assert!(builder.commit_row().is_err());
        builder.cancel_row();
        builder.add_row([("a", Value::Int64(2))]).unwrap();
        let slice = builder.finish().unwrap();
        assert_eq!(slice.rows(), 2);
    }

    #[test]
    fn empty_builder_finishes_to_the_empty_slice() {
        let builder = AdaptiveBuilder::new();
        assert!(builder.finish().unwrap().is_empty());
    }
}
