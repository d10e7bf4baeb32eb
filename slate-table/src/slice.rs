//! The table slice, an immutable batch of rows sharing one record type.

use std::sync::{Arc, OnceLock};

use arrow_array::cast::AsArray;
use arrow_array::{Array, ArrayRef, StructArray};
use bytes::Bytes;
use jiff::Timestamp;
use slate_error::{slate_bail, slate_panic, SlateExpect, SlateResult};
use slate_types::{congruent, Offset, RecordType, Type};

use crate::envelope;
use crate::value::{value_at, Value};

/// An immutable, reference-counted batch of rows that all conform to one
/// record type.
///
/// Slices are cheap to clone and to window: [`TableSlice::subslice`] and
/// friends share the underlying Arrow buffers. A slice deserialized with
/// [`TableSlice::deserialize`] decodes its batch lazily on first columnar
/// access.
#[derive(Clone)]
pub struct TableSlice {
    inner: Arc<Inner>,
}

struct Inner {
    schema: Type,
    /// Undecoded IPC payload; present only for lazily deserialized slices.
    ipc: Option<Bytes>,
    batch: OnceLock<StructArray>,
    offset: Option<u64>,
    import_time: Option<Timestamp>,
}

impl Clone for Inner {
    fn clone(&self) -> Self {
        let batch = OnceLock::new();
        if let Some(decoded) = self.batch.get() {
            let _ = batch.set(decoded.clone());
        }
        Self {
            schema: self.schema.clone(),
            ipc: self.ipc.clone(),
            batch,
            offset: self.offset,
            import_time: self.import_time,
        }
    }
}

impl TableSlice {
    /// Creates a table slice over an Arrow struct array.
    ///
    /// The schema must be a record type with as many fields as the batch
    /// has columns.
    pub fn new(schema: Type, batch: StructArray) -> SlateResult<Self> {
        let Some(record) = schema.as_record() else {
            slate_bail!(Incompatible: "table slice schema must be a record type, got {schema}");
        };
        if record.num_fields() != batch.num_columns() {
            slate_bail!(
                Incompatible: "schema {schema} has {} fields but the batch has {} columns",
                record.num_fields(),
                batch.num_columns()
            );
        }
        Ok(Self {
            inner: Arc::new(Inner {
                schema,
                ipc: None,
                batch: batch.into(),
                offset: None,
                import_time: None,
            }),
        })
    }

    /// The distinguished empty slice: no rows, no columns, and the null
    /// type as its schema.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                schema: Type::null(),
                ipc: None,
                batch: StructArray::new_empty_fields(0, None).into(),
                offset: None,
                import_time: None,
            }),
        }
    }

    /// Whether this is the empty slice produced by [`TableSlice::empty`].
    pub fn is_empty(&self) -> bool {
        self.inner.schema == Type::null()
    }

    /// Deserializes a slice from its envelope, verifying the header and
    /// the schema encoding but deferring the Arrow payload.
    ///
    /// Columnar access to a slice whose deferred payload turns out to be
    /// corrupt panics; use [`TableSlice::deserialize_verified`] for input
    /// that is not trusted end to end.
    pub fn deserialize(bytes: Bytes) -> SlateResult<Self> {
        let envelope = envelope::decode_header(&bytes)?;
        Ok(Self {
            inner: Arc::new(Inner {
                schema: envelope.schema,
                ipc: Some(envelope.ipc),
                batch: OnceLock::new(),
                offset: None,
                import_time: envelope.import_time,
            }),
        })
    }

    /// Deserializes a slice, eagerly decoding and checking the whole
    /// envelope. Invalid input degrades to the empty slice.
    pub fn deserialize_verified(bytes: Bytes) -> Self {
        let slice = envelope::decode_header(&bytes).and_then(|envelope| {
            let batch = envelope::decode_batch(&envelope.ipc)?;
            let mut slice = Self::new(envelope.schema, batch)?;
            Arc::make_mut(&mut slice.inner).import_time = envelope.import_time;
            Ok(slice)
        });
        match slice {
            Ok(slice) => slice,
            Err(e) => {
                log::warn!("discarding invalid table slice: {e}");
                Self::empty()
            }
        }
    }

    /// Serializes the slice into its envelope.
    pub fn serialize(&self) -> SlateResult<Bytes> {
        if self.is_empty() {
            slate_bail!(InvalidArgument: "cannot serialize the empty table slice");
        }
        envelope::encode(&self.inner.schema, self.inner.import_time, self.batch())
    }

    /// The slice's schema, a record type.
    pub fn schema(&self) -> &Type {
        &self.inner.schema
    }

    /// The schema as a record type, unless this is the empty slice.
    pub fn record_type(&self) -> Option<RecordType> {
        self.inner.schema.as_record()
    }

    /// The decoded Arrow batch.
    pub fn batch(&self) -> &StructArray {
        self.inner.batch.get_or_init(|| {
            let ipc = self
                .inner
                .ipc
                .as_ref()
                .slate_expect("a slice without a batch holds its serialized payload");
            match envelope::decode_batch(ipc) {
                Ok(batch) => batch,
                Err(e) => slate_panic!("corrupt table slice payload: {e}"),
            }
        })
    }

    /// The number of rows.
    pub fn rows(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        self.batch().len()
    }

    /// The number of leaf columns in the flattened schema.
    pub fn columns(&self) -> usize {
        self.record_type().map_or(0, |record| record.num_leaves())
    }

    /// The position of the first row within the slice's source, if known.
    pub fn offset(&self) -> Option<u64> {
        self.inner.offset
    }

    /// Sets the position of the first row. Copies on write when the slice
    /// is shared.
    pub fn set_offset(&mut self, offset: u64) {
        Arc::make_mut(&mut self.inner).offset = Some(offset);
    }

    /// The time the slice's data arrived, if assigned.
    pub fn import_time(&self) -> Option<Timestamp> {
        self.inner.import_time
    }

    /// Sets the import time. Copies on write when the slice is shared.
    pub fn set_import_time(&mut self, import_time: Timestamp) {
        Arc::make_mut(&mut self.inner).import_time = Some(import_time);
    }

    /// The cell at `row` in the flattened column `column`.
    pub fn at(&self, row: usize, column: usize) -> Value {
        let record = self
            .record_type()
            .slate_expect("cell access requires a non-empty slice");
        let offset = record.resolve_flat_index(column);
        let (ty, array) = column_of(self.batch(), &record, &offset);
        value_at(array.as_ref(), &ty, row)
    }

    /// Like [`TableSlice::at`], asserting that the column has the given
    /// type.
    pub fn at_typed(&self, row: usize, column: usize, ty: &Type) -> Value {
        let record = self
            .record_type()
            .slate_expect("cell access requires a non-empty slice");
        let offset = record.resolve_flat_index(column);
        let (actual, array) = column_of(self.batch(), &record, &offset);
        debug_assert!(
            congruent(&actual, ty),
            "column {column} has type {actual}, not {ty}"
        );
        value_at(array.as_ref(), &actual, row)
    }

    /// Iterates over all rows as record values.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        let schema = &self.inner.schema;
        (0..self.rows()).map(move |row| value_at(self.batch() as &dyn Array, schema, row))
    }

    /// Iterates over the cells of the column at `offset`, top to bottom.
    pub fn values_of(&self, offset: &Offset) -> impl Iterator<Item = Value> + '_ {
        let record = self
            .record_type()
            .slate_expect("column access requires a non-empty slice");
        let (ty, array) = column_of(self.batch(), &record, offset);
        (0..self.rows()).map(move |row| value_at(array.as_ref(), &ty, row))
    }

    /// Iterates over the leaf columns as (key, type, array) triples, in
    /// depth-first order.
    pub fn columns_of(&self) -> impl Iterator<Item = (String, Type, ArrayRef)> + '_ {
        let columns: Vec<_> = match self.record_type() {
            Some(record) => record
                .leaves()
                .map(|leaf| {
                    let key = record.key(&leaf.offset);
                    let (ty, array) = column_of(self.batch(), &record, &leaf.offset);
                    (key, ty, array)
                })
                .collect(),
            None => Vec::new(),
        };
        columns.into_iter()
    }

    /// Returns the window of rows in `begin..end`.
    ///
    /// The full window is the identity and shares the slice; an empty
    /// window yields the empty slice; everything else shares the Arrow
    /// buffers zero-copy, with the row offset adjusted accordingly.
    pub fn subslice(&self, begin: usize, end: usize) -> TableSlice {
        let rows = self.rows();
        if begin > end || end > rows {
            slate_panic!("invalid subslice window {begin}..{end} of {rows} rows");
        }
        if begin == 0 && end == rows {
            return self.clone();
        }
        if begin == end {
            return Self::empty();
        }
        Self {
            inner: Arc::new(Inner {
                schema: self.inner.schema.clone(),
                ipc: None,
                batch: self.batch().slice(begin, end - begin).into(),
                offset: self.inner.offset.map(|offset| offset + begin as u64),
                import_time: self.inner.import_time,
            }),
        }
    }

    /// The first `count` rows, or the whole slice if it is shorter.
    pub fn head(&self, count: usize) -> TableSlice {
        self.subslice(0, count.min(self.rows()))
    }

    /// The last `count` rows, or the whole slice if it is shorter.
    pub fn tail(&self, count: usize) -> TableSlice {
        let rows = self.rows();
        self.subslice(rows - count.min(rows), rows)
    }

    /// Splits the slice into its first `at` rows and the rest.
    pub fn split(&self, at: usize) -> (TableSlice, TableSlice) {
        let rows = self.rows();
        let at = at.min(rows);
        (self.subslice(0, at), self.subslice(at, rows))
    }
}

impl std::fmt::Debug for TableSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSlice")
            .field("schema", &self.inner.schema.to_string())
            .field("rows", &self.rows())
            .field("offset", &self.inner.offset)
            .field("import_time", &self.inner.import_time)
            .finish()
    }
}

impl PartialEq for TableSlice {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        self.inner.schema == other.inner.schema && self.batch() == other.batch()
    }
}

/// The total number of rows across `slices`.
pub fn rows(slices: &[TableSlice]) -> usize {
    slices.iter().map(TableSlice::rows).sum()
}

/// Concatenates slices of the same schema into one.
///
/// Empty inputs are dropped; concatenating nothing yields the empty
/// slice, and a single survivor is returned as-is. The result carries the
/// first survivor's import time and no row offset.
pub fn concatenate(slices: Vec<TableSlice>) -> SlateResult<TableSlice> {
    let mut slices: Vec<_> = slices.into_iter().filter(|s| s.rows() > 0).collect();
    match slices.len() {
        0 => return Ok(TableSlice::empty()),
        1 => return Ok(slices.remove(0)),
        _ => {}
    }
    let schema = slices[0].schema().clone();
    for slice in &slices[1..] {
        if *slice.schema() != schema {
            slate_bail!(
                Incompatible: "cannot concatenate slices of types {schema} and {}",
                slice.schema()
            );
        }
    }
    let import_time = slices[0].import_time();
    let batches: Vec<&dyn Array> = slices.iter().map(|s| s.batch() as &dyn Array).collect();
    let combined = arrow_select::concat::concat(&batches)?;
    let mut result = TableSlice::new(schema, combined.as_struct().clone())?;
    if let Some(import_time) = import_time {
        result.set_import_time(import_time);
    }
    Ok(result)
}

/// Resolves the column at `offset`, descending nested struct arrays.
pub(crate) fn column_of(
    batch: &StructArray,
    record: &RecordType,
    offset: &Offset,
) -> (Type, ArrayRef) {
    debug_assert!(!offset.is_empty(), "a column offset cannot be empty");
    let mut ty = Type::from(record.clone());
    let mut array: Option<ArrayRef> = None;
    for &index in offset.iter() {
        let record = ty
            .as_record()
            .slate_expect("a column offset descends through records");
        let next = match &array {
            None => batch.column(index).clone(),
            Some(parent) => parent.as_struct().column(index).clone(),
        };
        ty = record.field(index).ty;
        array = Some(next);
    }
    (
        ty,
        array.slate_expect("a column offset addresses at least one field"),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Int64Array, StringArray};
    use arrow_schema::Fields;
    use slate_types::arrow::to_arrow_field;
    use slate_types::Field;

    use super::*;

    fn sample_schema() -> Type {
        Type::from(RecordType::new([
            Field::new("x", Type::int64()),
            Field::new("s", Type::string()),
        ]))
        .with_name("demo")
    }

    fn sample_slice() -> TableSlice {
        let fields = Fields::from(vec![
            to_arrow_field("x", &Type::int64()),
            to_arrow_field("s", &Type::string()),
        ]);
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])),
            Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
        ];
        TableSlice::new(sample_schema(), StructArray::new(fields, arrays, None)).unwrap()
    }

    #[test]
    fn construction_and_access() {
        let slice = sample_slice();
        assert_eq!(slice.rows(), 3);
        assert_eq!(slice.columns(), 2);
        assert_eq!(slice.schema().name(), Some("demo"));
        assert_eq!(slice.at(0, 0), Value::Int64(1));
        assert_eq!(slice.at(1, 1), Value::Null);
        assert_eq!(slice.at(2, 1), Value::String("c".into()));
        let rows: Vec<_> = slice.values().collect();
        assert_eq!(
            rows[0],
            Value::Record(vec![
                ("x".into(), Value::Int64(1)),
                ("s".into(), Value::String("a".into())),
            ])
        );
    }

    #[test]
    fn mismatched_column_count_is_rejected() {
        let fields = Fields::from(vec![to_arrow_field("x", &Type::int64())]);
        let arrays: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(vec![1]))];
        let batch = StructArray::new(fields, arrays, None);
        assert!(TableSlice::new(sample_schema(), batch).is_err());
    }

    #[test]
    fn empty_sentinel() {
        let empty = TableSlice::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.rows(), 0);
        assert_eq!(empty.columns(), 0);
        assert!(empty.record_type().is_none());
        assert!(empty.serialize().is_err());
    }

    #[test]
    fn subslice_windows() {
        let slice = sample_slice();
        let identity = slice.subslice(0, 3);
        assert!(Arc::ptr_eq(&slice.inner, &identity.inner));
        let nothing = slice.subslice(1, 1);
        assert!(nothing.is_empty());
        let middle = slice.subslice(1, 3);
        assert_eq!(middle.rows(), 2);
        assert_eq!(middle.at(0, 0), Value::Int64(2));
        assert_eq!(middle.schema(), slice.schema());
    }

    #[test]
    fn subslice_adjusts_offset() {
        let mut slice = sample_slice();
        slice.set_offset(100);
        assert_eq!(slice.subslice(2, 3).offset(), Some(102));
    }

    #[test]
    fn split_and_concatenate_are_inverse() {
        let slice = sample_slice();
        let (head, tail) = slice.split(1);
        assert_eq!(head.rows(), 1);
        assert_eq!(tail.rows(), 2);
        let rejoined = concatenate(vec![head, tail]).unwrap();
        assert_eq!(rejoined, slice);
    }

    #[test]
    fn concatenate_drops_empty_and_checks_schemas() {
        assert!(concatenate(vec![]).unwrap().is_empty());
        let slice = sample_slice();
        let single = concatenate(vec![TableSlice::empty(), slice.clone()]).unwrap();
        assert_eq!(single, slice);
        let fields = Fields::from(vec![to_arrow_field("y", &Type::int64())]);
        let arrays: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(vec![7]))];
        let other = TableSlice::new(
            RecordType::new([Field::new("y", Type::int64())]).into(),
            StructArray::new(fields, arrays, None),
        )
        .unwrap();
        assert!(concatenate(vec![slice, other]).is_err());
    }

    #[test]
    fn serialization_round_trip() {
        let mut slice = sample_slice();
        slice.set_import_time("2024-05-01T00:00:00Z".parse().unwrap());
        let bytes = slice.serialize().unwrap();
        let deferred = TableSlice::deserialize(bytes.clone()).unwrap();
        assert_eq!(deferred.schema(), slice.schema());
        assert_eq!(deferred.import_time(), slice.import_time());
        assert_eq!(deferred, slice);
        let verified = TableSlice::deserialize_verified(bytes);
        assert_eq!(verified, slice);
    }

    #[test]
    fn invalid_envelopes_fail_or_degrade() {
        assert!(TableSlice::deserialize(Bytes::from_static(&[0, 1, 2])).is_err());
        assert!(TableSlice::deserialize_verified(Bytes::from_static(&[9, 9])).is_empty());
    }

    #[test]
    fn copy_on_write_metadata() {
        let slice = sample_slice();
        let mut other = slice.clone();
        other.set_offset(42);
        assert_eq!(other.offset(), Some(42));
        assert_eq!(slice.offset(), None);
        assert_eq!(other, slice);
    }

    #[test]
    fn column_iteration() {
        let slice = sample_slice();
        let columns: Vec<_> = slice.columns_of().collect();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].0, "x");
        assert_eq!(columns[0].1, Type::int64());
        assert_eq!(columns[1].0, "s");
        let cells: Vec<_> = slice.values_of(&Offset::from(vec![0])).collect();
        assert_eq!(cells, vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]);
    }
}
