use std::collections::HashSet;
use std::iter::Peekable;

use slate_error::{slate_bail, slate_panic, SlateExpect, SlateResult};

use crate::wire::{self, Cursor, Writer};
use crate::{congruent, ConceptRegistry, Field, Offset, Type, TypeKind};

/// A record type, an ordered sequence of named fields.
///
/// Records nest arbitrarily; a *leaf* is any non-record field reached by
/// depth-first descent. All traversal uses an explicit frame stack rather
/// than native recursion so that pathologically deep schemas cannot
/// exhaust the call stack.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordType {
    ty: Type,
}

/// A leaf of a record type: the field together with the offset that
/// addresses it from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafView {
    /// The leaf field.
    pub field: Field,
    /// The path of child indices from the root to the leaf.
    pub offset: Offset,
}

/// Conflict resolution policy for [`merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeConflict {
    /// Fail unless the conflicting types are congruent, in which case
    /// attributes are unioned and differing aliases rejected.
    Fail,
    /// Keep the left-hand side's type.
    PreferLeft,
    /// Keep the right-hand side's type.
    PreferRight,
}

/// A single rewrite applied by [`RecordType::transform`]: the function
/// maps the field at `offset` to zero or more replacement fields.
pub struct Transformation {
    /// The offset of the field to rewrite.
    pub offset: Offset,
    fun: Box<dyn FnOnce(Field) -> Vec<Field>>,
}

impl Transformation {
    /// An arbitrary n-to-m rewrite of the field at `offset`.
    pub fn new(
        offset: impl Into<Offset>,
        fun: impl FnOnce(Field) -> Vec<Field> + 'static,
    ) -> Self {
        Self {
            offset: offset.into(),
            fun: Box::new(fun),
        }
    }

    /// Removes the field at `offset`.
    pub fn drop_field(offset: impl Into<Offset>) -> Self {
        Self::new(offset, |_| Vec::new())
    }

    /// Replaces the field at `offset` with `fields`.
    pub fn assign(offset: impl Into<Offset>, fields: Vec<Field>) -> Self {
        Self::new(offset, move |_| fields)
    }

    /// Inserts `fields` before the field at `offset`.
    pub fn insert_before(offset: impl Into<Offset>, fields: Vec<Field>) -> Self {
        Self::new(offset, move |field| {
            let mut fields = fields;
            fields.push(field);
            fields
        })
    }

    /// Inserts `fields` after the field at `offset`.
    pub fn insert_after(offset: impl Into<Offset>, fields: Vec<Field>) -> Self {
        Self::new(offset, move |field| {
            let mut fields = fields;
            fields.insert(0, field);
            fields
        })
    }
}

impl std::fmt::Debug for Transformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformation")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl RecordType {
    /// Constructs a record type from its fields.
    ///
    /// Record types must not be empty; the canonical encoding has no
    /// representation for a record without fields.
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        let fields: Vec<Field> = fields.into_iter().collect();
        debug_assert!(!fields.is_empty(), "record types must not be empty");
        let mut writer = Writer::new();
        writer.tag(wire::TAG_RECORD);
        writer.u32(u32::try_from(fields.len()).slate_expect("field count fits in u32"));
        for field in &fields {
            writer.block(field.name.as_bytes());
            writer.block(field.ty.as_bytes());
        }
        Self {
            ty: Type::from_encoding(writer.finish()),
        }
    }

    pub(crate) fn from_type_unchecked(ty: Type) -> Self {
        Self { ty }
    }

    /// The number of top-level fields.
    pub fn num_fields(&self) -> usize {
        let bytes = self.ty.as_bytes();
        let mut cursor = Cursor::new(&bytes[1..]);
        cursor.u32().slate_expect("verified type encoding") as usize
    }

    /// The field at the given top-level index.
    ///
    /// Panics if `index` is out of bounds; callers are expected to stay
    /// within `num_fields()`.
    pub fn field(&self, index: usize) -> Field {
        let bytes = self.ty.to_bytes();
        let mut cursor = Cursor::new(&bytes[1..]);
        let count = cursor.u32().slate_expect("verified type encoding") as usize;
        if index >= count {
            slate_panic!("field index {index} out of bounds for record with {count} fields");
        }
        for _ in 0..index {
            cursor.sub_cursor().slate_expect("verified type encoding");
            cursor.sub_cursor().slate_expect("verified type encoding");
        }
        let name = cursor.str_block().slate_expect("verified type encoding");
        let range = cursor.block().slate_expect("verified type encoding");
        Field::new(
            name,
            Type::from_bytes_unverified(bytes.slice(1 + range.start..1 + range.end)),
        )
    }

    /// Iterates over the top-level fields in order.
    pub fn fields(&self) -> impl Iterator<Item = Field> {
        let bytes = self.ty.to_bytes();
        let mut cursor = Cursor::new(&bytes[1..]);
        let count = cursor.u32().slate_expect("verified type encoding") as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let name = cursor.str_block().slate_expect("verified type encoding");
            let range = cursor.block().slate_expect("verified type encoding");
            fields.push(Field::new(
                name,
                Type::from_bytes_unverified(bytes.slice(1 + range.start..1 + range.end)),
            ));
        }
        fields.into_iter()
    }

    /// The field addressed by `offset`, descending through nested records.
    ///
    /// Panics if the offset does not address a field.
    pub fn field_at(&self, offset: &Offset) -> Field {
        if offset.is_empty() {
            slate_panic!("offset must not be empty");
        }
        let mut record = self.clone();
        for &step in &offset[..offset.len() - 1] {
            let field = record.field(step);
            let Some(nested) = field.ty.as_record() else {
                slate_panic!("offset {offset} descends into non-record field `{}`", field.name);
            };
            record = nested;
        }
        record.field(offset[offset.len() - 1])
    }

    /// The dotted path of field names addressed by `offset`.
    pub fn key(&self, offset: &Offset) -> String {
        if offset.is_empty() {
            slate_panic!("offset must not be empty");
        }
        let mut result = String::new();
        let mut record = self.clone();
        for &step in &offset[..offset.len() - 1] {
            let field = record.field(step);
            result.push_str(&field.name);
            result.push('.');
            let Some(nested) = field.ty.as_record() else {
                slate_panic!("offset {offset} descends into non-record field `{}`", field.name);
            };
            record = nested;
        }
        result.push_str(&record.field(offset[offset.len() - 1]).name);
        result
    }

    /// Iterates over all leaves in depth-first order.
    pub fn leaves(&self) -> Leaves {
        Leaves {
            index: vec![0],
            history: vec![self.clone()],
        }
    }

    /// The number of leaves. Stable under metadata-only changes.
    pub fn num_leaves(&self) -> usize {
        self.leaves().count()
    }

    /// Converts a flat leaf index into the offset of that leaf.
    ///
    /// Panics if `flat_index` is out of bounds.
    pub fn resolve_flat_index(&self, flat_index: usize) -> Offset {
        self.leaves()
            .nth(flat_index)
            .map(|leaf| leaf.offset)
            .unwrap_or_else(|| slate_panic!("flat index {flat_index} out of bounds"))
    }

    /// Converts a leaf offset into its flat index.
    ///
    /// Panics if `offset` does not address a leaf.
    pub fn flat_index(&self, offset: &Offset) -> usize {
        self.leaves()
            .position(|leaf| leaf.offset == *offset)
            .unwrap_or_else(|| slate_panic!("offset {offset} does not address a leaf"))
    }

    /// Resolves a dotted key to the offset of the matching field, if any.
    ///
    /// Path components must align with field names exactly; a key may also
    /// address a nested record as a whole.
    pub fn resolve_key(&self, key: &str) -> Option<Offset> {
        let mut index: Vec<usize> = vec![0];
        let mut history: Vec<(RecordType, &str)> = vec![(self.clone(), key)];
        while let Some(&position) = index.last() {
            let (record, remaining) = history.last().cloned().slate_expect("history tracks depth");
            if position >= record.num_fields() || remaining.is_empty() {
                history.pop();
                index.pop();
                if let Some(back) = index.last_mut() {
                    *back += 1;
                }
                continue;
            }
            let field = record.field(position);
            match field.ty.kind() {
                TypeKind::Record => {
                    let shared = common_prefix(remaining, &field.name);
                    if shared == field.name.len() && shared == remaining.len() {
                        return Some(Offset::new(index));
                    }
                    if shared == field.name.len() && remaining.as_bytes().get(shared) == Some(&b'.')
                    {
                        let nested = field.ty.as_record().slate_expect("kind checked");
                        history.push((nested, &remaining[shared + 1..]));
                        index.push(0);
                    } else {
                        *index.last_mut().slate_expect("index is non-empty") += 1;
                    }
                }
                _ => {
                    if remaining == field.name {
                        return Some(Offset::new(index));
                    }
                    *index.last_mut().slate_expect("index is non-empty") += 1;
                }
            }
        }
        None
    }

    /// Resolves a key like [`RecordType::resolve_key`], falling back to the
    /// concept registry when no structural match exists.
    ///
    /// The fallback expands `key` as a concept into concrete keys, keeps
    /// those prefixed with `schema_name` followed by a dot, and resolves
    /// the remainder. The structural path yields at most one offset; the
    /// concept path may yield several.
    pub fn resolve_key_or_concept(
        &self,
        key: &str,
        schema_name: &str,
        concepts: &ConceptRegistry,
    ) -> Vec<Offset> {
        if let Some(offset) = self.resolve_key(key) {
            return vec![offset];
        }
        if schema_name.is_empty() {
            return Vec::new();
        }
        let mut results = Vec::new();
        for resolved in concepts.resolve(key) {
            let Some(stripped) = resolved
                .strip_prefix(schema_name)
                .and_then(|rest| rest.strip_prefix('.'))
            else {
                continue;
            };
            if let Some(offset) = self.resolve_key(stripped) {
                results.push(offset);
            }
        }
        results
    }

    /// Resolves all fields whose dotted key ends in `key`, aligned on
    /// field-name boundaries.
    ///
    /// `prefix` names an enclosing scope (usually the schema name): if a
    /// dotted suffix of `prefix` is also a prefix of `key`, the remainder
    /// of `key` is matched as well, so `resolve_key_suffix("conn.id.orig_h",
    /// "zeek.conn")` also finds `id.orig_h`.
    pub fn resolve_key_suffix(&self, key: &str, prefix: &str) -> Vec<Offset> {
        if key.is_empty() {
            return Vec::new();
        }
        // Seed candidate keys from dotted suffixes of the prefix.
        let mut root_keys: Vec<&str> = vec![key];
        let mut start = 0;
        while start < prefix.len() {
            let tail = &prefix[start..];
            let shared = common_prefix(tail, key);
            if shared == tail.len()
                && shared < key.len()
                && key.as_bytes()[shared] == b'.'
            {
                root_keys.push(&key[shared + 1..]);
            }
            match tail.find('.') {
                Some(dot) => start += dot + 1,
                None => break,
            }
        }
        let mut results = Vec::new();
        let mut index: Vec<usize> = vec![0];
        let mut history: Vec<(RecordType, Vec<&str>)> = vec![(self.clone(), root_keys.clone())];
        while let Some(&position) = index.last() {
            let (record, keys) = history.last().cloned().slate_expect("history tracks depth");
            if position >= record.num_fields() {
                history.pop();
                index.pop();
                if let Some(back) = index.last_mut() {
                    *back += 1;
                }
                continue;
            }
            let field = record.field(position);
            if field.ty.kind() == TypeKind::Record {
                // Records always descend; each nested layer restarts from
                // the root candidates plus any keys that consumed this
                // field's name as a path component.
                let mut next_keys = root_keys.clone();
                for key in &keys {
                    let shared = common_prefix(key, &field.name);
                    if shared == field.name.len()
                        && shared < key.len()
                        && key.as_bytes()[shared] == b'.'
                    {
                        next_keys.push(&key[shared + 1..]);
                    }
                }
                let nested = field.ty.as_record().slate_expect("kind checked");
                history.push((nested, next_keys));
                index.push(0);
            } else {
                for key in &keys {
                    let shared = common_suffix(&field.name, key);
                    // The match must cover the whole candidate key and end
                    // at a dot boundary within the field name (field names
                    // may themselves be dotted after flattening).
                    if shared >= key.len()
                        && (shared == field.name.len()
                            || field.name.as_bytes()[field.name.len() - shared - 1] == b'.')
                    {
                        results.push(Offset::new(index.clone()));
                        break;
                    }
                }
                *index.last_mut().slate_expect("index is non-empty") += 1;
            }
        }
        results
    }

    /// Resolves a type extractor like `:ip` to the offsets of all leaves
    /// whose kind or alias name matches.
    ///
    /// List and map fields never match by kind; record fields are
    /// descended into instead of matched.
    pub fn resolve_type_extractor(&self, extractor: &str) -> Vec<Offset> {
        let Some(extractor) = extractor.strip_prefix(':') else {
            return Vec::new();
        };
        if extractor.is_empty() {
            return Vec::new();
        }
        let mut results = Vec::new();
        let mut index: Vec<usize> = vec![0];
        let mut history: Vec<RecordType> = vec![self.clone()];
        while let Some(&position) = index.last() {
            let record = history.last().cloned().slate_expect("history tracks depth");
            if position >= record.num_fields() {
                history.pop();
                index.pop();
                if let Some(back) = index.last_mut() {
                    *back += 1;
                }
                continue;
            }
            let field = record.field(position);
            let matched_alias = field.ty.name() == Some(extractor);
            match field.ty.kind() {
                TypeKind::Record => {
                    history.push(field.ty.as_record().slate_expect("kind checked"));
                    index.push(0);
                }
                TypeKind::List | TypeKind::Map => {
                    *index.last_mut().slate_expect("index is non-empty") += 1;
                }
                kind => {
                    if matched_alias || extractor == kind.name() {
                        results.push(Offset::new(index.clone()));
                    }
                    *index.last_mut().slate_expect("index is non-empty") += 1;
                }
            }
        }
        results
    }

    /// Applies a list of rewrites in one depth-first pass.
    ///
    /// Preconditions, checked in debug builds: the list is sorted by
    /// offset, and no offset is a strict prefix of a later one. Returns
    /// `None` when every field was dropped; callers must treat that as an
    /// empty record.
    pub fn transform(&self, transformations: Vec<Transformation>) -> Option<RecordType> {
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
            return Some(self.clone());
        }
        let mut current = transformations.into_iter().peekable();
        let layer: Vec<Field> = self.fields().collect();
        let layer = transform_layer(layer, vec![0], &mut current);
        debug_assert!(current.peek().is_none(), "transformation offset out of bounds");
        if layer.is_empty() {
            return None;
        }
        Some(RecordType::new(layer))
    }
}

/// An iterator over the leaves of a record type, in depth-first order.
pub struct Leaves {
    index: Vec<usize>,
    history: Vec<RecordType>,
}

impl Iterator for Leaves {
    type Item = LeafView;

    fn next(&mut self) -> Option<LeafView> {
        while let Some(&position) = self.index.last() {
            let record = self.history.last().cloned().slate_expect("history tracks depth");
            if position >= record.num_fields() {
                self.history.pop();
                self.index.pop();
                if let Some(back) = self.index.last_mut() {
                    *back += 1;
                }
                continue;
            }
            let field = record.field(position);
            if field.ty.kind() == TypeKind::Record {
                self.history
                    .push(field.ty.as_record().slate_expect("kind checked"));
                self.index.push(0);
            } else {
                let offset = Offset::new(self.index.clone());
                *self.index.last_mut().slate_expect("index is non-empty") += 1;
                return Some(LeafView { field, offset });
            }
        }
        None
    }
}

fn transform_layer(
    layer: Vec<Field>,
    index: Vec<usize>,
    current: &mut Peekable<std::vec::IntoIter<Transformation>>,
) -> Vec<Field> {
    debug_assert!(!index.is_empty());
    let mut index = index;
    let mut result = Vec::with_capacity(layer.len());
    for field in layer {
        // Three cases per field: apply the rewrite on an exact offset
        // match, recurse on a prefix match, or keep the field as-is.
        let (is_prefix_match, is_exact_match) = match current.peek() {
            None => (false, false),
            Some(transformation) => {
                let shared = index
                    .iter()
                    .zip(transformation.offset.iter())
                    .take_while(|(a, b)| a == b)
                    .count();
                let is_prefix_match = shared == index.len();
                let is_exact_match =
                    is_prefix_match && shared == transformation.offset.len();
                (is_prefix_match, is_exact_match)
            }
        };
        if is_exact_match {
            let transformation = current.next().slate_expect("peeked");
            result.extend((transformation.fun)(field));
        } else if is_prefix_match {
            let nested = field
                .ty
                .as_record()
                .unwrap_or_else(|| {
                    slate_panic!("transformation offset descends into non-record field `{}`", field.name)
                });
            let nested_layer: Vec<Field> = nested.fields().collect();
            let mut nested_index = index.clone();
            nested_index.push(0);
            let nested_layer = transform_layer(nested_layer, nested_index, current);
            if !nested_layer.is_empty() {
                let mut nested_schema: Type = RecordType::new(nested_layer).into();
                nested_schema.assign_metadata(&field.ty);
                result.push(Field::new(field.name, nested_schema));
            }
        } else {
            result.push(field);
        }
        *index.last_mut().slate_expect("index is non-empty") += 1;
    }
    result
}

impl From<RecordType> for Type {
    fn from(value: RecordType) -> Self {
        value.ty
    }
}

/// Merges two record types under the given conflict policy.
///
/// Fields unique to `rhs` are appended after the last `lhs` field, so the
/// output lists all `lhs` fields first and then `rhs`-only additions in
/// their original relative order.
pub fn merge(
    lhs: &RecordType,
    rhs: &RecordType,
    conflict: MergeConflict,
) -> SlateResult<RecordType> {
    let mut transformations = Vec::new();
    let mut additions = Vec::new();
    for rfield in rhs.fields() {
        match lhs.resolve_key(&rfield.name) {
            Some(offset) => {
                let lfield = lhs.field_at(&offset);
                let merged = merge_field(&lfield, &rfield, conflict)?;
                transformations.push(Transformation::assign(
                    offset,
                    vec![Field::new(rfield.name, merged)],
                ));
            }
            None => additions.push(rfield),
        }
    }
    // Offsets follow rhs field order, not lhs structure; restore the sort
    // precondition before transforming.
    transformations.sort_by(|a, b| a.offset.cmp(&b.offset));
    let result = lhs
        .transform(transformations)
        .slate_expect("merge never drops fields");
    let result = result
        .transform(vec![Transformation::insert_after(
            vec![result.num_fields() - 1],
            additions,
        )])
        .slate_expect("merge never drops fields");
    Ok(result)
}

fn merge_field(lfield: &Field, rfield: &Field, conflict: MergeConflict) -> SlateResult<Type> {
    if let (Some(lrecord), Some(rrecord)) = (lfield.ty.as_record(), rfield.ty.as_record()) {
        let mut merged: Type = merge(&lrecord, &rrecord, conflict)?.into();
        merged.assign_metadata(&lfield.ty);
        return Ok(merged);
    }
    match conflict {
        MergeConflict::Fail => {
            if !congruent(&lfield.ty, &rfield.ty) {
                slate_bail!(
                    Incompatible: "conflicting field `{}`; failed to merge {} and {}",
                    rfield.name,
                    lfield.ty,
                    rfield.ty
                );
            }
            if lfield.ty.name() != rfield.ty.name() {
                slate_bail!(
                    Incompatible: "conflicting alias names `{}` and `{}` for field `{}`",
                    lfield.ty.name().unwrap_or_default(),
                    rfield.ty.name().unwrap_or_default(),
                    rfield.name
                );
            }
            let conflicting = lfield.ty.attributes().into_iter().any(|(key, value)| {
                rfield
                    .ty
                    .attribute(key)
                    .is_some_and(|other| other != value)
            });
            if conflicting {
                slate_bail!(
                    Incompatible: "conflicting attributes for field `{}`",
                    rfield.name
                );
            }
            let rhs_attributes = rfield
                .ty
                .attributes()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
                .collect::<Vec<_>>();
            Ok(lfield.ty.with_attributes(rhs_attributes))
        }
        MergeConflict::PreferLeft => Ok(lfield.ty.clone()),
        MergeConflict::PreferRight => Ok(rfield.ty.clone()),
    }
}

/// Replaces a record tree with a single-level record over its leaves,
/// using dotted leaf keys as field names.
///
/// Distinct paths can flatten to identical names (a field named `a.b`
/// next to a record `a` with field `b`); collisions are resolved
/// deterministically by appending `_1`, `_2`, ... until unique.
pub fn flatten(record: &RecordType) -> RecordType {
    let leaves: Vec<(String, Type)> = record
        .leaves()
        .map(|leaf| (record.key(&leaf.offset), leaf.field.ty))
        .collect();
    let original: HashSet<&str> = leaves.iter().map(|(name, _)| name.as_str()).collect();
    let mut used = HashSet::new();
    let mut fields = Vec::with_capacity(leaves.len());
    for (name, ty) in &leaves {
        let final_name = if used.insert(name.clone()) {
            name.clone()
        } else {
            let mut n = 1;
            loop {
                let candidate = format!("{name}_{n}");
                if !original.contains(candidate.as_str()) && used.insert(candidate.clone()) {
                    break candidate;
                }
                n += 1;
            }
        };
        fields.push(Field::new(final_name, ty.clone()));
    }
    RecordType::new(fields)
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.bytes()
        .zip(b.bytes())
        .take_while(|(a, b)| a == b)
        .count()
}

fn common_suffix(a: &str, b: &str) -> usize {
    a.bytes()
        .rev()
        .zip(b.bytes().rev())
        .take_while(|(a, b)| a == b)
        .count()
}
