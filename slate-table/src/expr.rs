//! Predicate expressions over table slices.
//!
//! An [`Expression`] references columns symbolically, by dotted key,
//! concept name, type extractor, or slice metadata. Before evaluation it
//! must be tailored to a concrete schema, which resolves the symbolic
//! extractors to structural offsets; an extractor matching several
//! columns distributes its predicate as a disjunction across all of
//! them, and one matching nothing becomes constant false.

use std::cmp::Ordering;
use std::net::IpAddr;

use jiff::Timestamp;
use slate_error::{slate_panic, SlateExpect};
use slate_types::{ConceptRegistry, Offset, Type};

use crate::slice::{column_of, concatenate, TableSlice};
use crate::value::{compare, ip_to_bytes, value_at, Value};

/// Metadata of a slice usable as a predicate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaExtractor {
    /// The schema name.
    Schema,
    /// The schema fingerprint.
    SchemaId,
    /// The import time.
    ImportTime,
    /// Whether the schema carries the `internal` attribute.
    Internal,
}

/// One side of a predicate.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A dotted key or concept name, resolved during tailoring.
    Field(String),
    /// A type extractor matching columns by kind or alias name.
    Type(String),
    /// Slice metadata.
    Meta(MetaExtractor),
    /// A constant.
    Value(Value),
    /// A resolved column; produced by tailoring.
    Column(Offset),
}

/// A relational operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less-than.
    Lt,
    /// Less-or-equal.
    Le,
    /// Greater-than.
    Gt,
    /// Greater-or-equal.
    Ge,
    /// Membership: element in list, or address in subnet.
    In,
    /// Negated membership.
    Ni,
}

/// A single comparison.
#[derive(Debug, Clone)]
pub struct Predicate {
    /// The left-hand operand.
    pub lhs: Operand,
    /// The operator.
    pub op: RelOp,
    /// The right-hand operand.
    pub rhs: Operand,
}

/// A boolean combination of predicates.
///
/// `And` of nothing is constant true, `Or` of nothing constant false.
#[derive(Debug, Clone)]
pub enum Expression {
    /// A single comparison.
    Predicate(Predicate),
    /// All operands must hold.
    And(Vec<Expression>),
    /// At least one operand must hold.
    Or(Vec<Expression>),
    /// The operand must not hold.
    Not(Box<Expression>),
}

impl Expression {
    /// Constant truth.
    pub fn always() -> Self {
        Expression::And(Vec::new())
    }

    /// Constant falsehood.
    pub fn never() -> Self {
        Expression::Or(Vec::new())
    }
}

/// Resolves the symbolic extractors of an expression against a concrete
/// schema.
///
/// Field operands resolve structurally first, then through the concept
/// registry, then by dotted suffix; type operands resolve by kind or
/// alias. A predicate whose extractor matches several columns becomes a
/// disjunction over all of them, and one that matches nothing becomes
/// constant false.
pub fn tailor(expr: &Expression, schema: &Type, concepts: &ConceptRegistry) -> Expression {
    match expr {
        Expression::Predicate(predicate) => tailor_predicate(predicate, schema, concepts),
        Expression::And(terms) => Expression::And(
            terms
                .iter()
                .map(|term| tailor(term, schema, concepts))
                .collect(),
        ),
        Expression::Or(terms) => Expression::Or(
            terms
                .iter()
                .map(|term| tailor(term, schema, concepts))
                .collect(),
        ),
        Expression::Not(term) => Expression::Not(Box::new(tailor(term, schema, concepts))),
    }
}

fn tailor_predicate(predicate: &Predicate, schema: &Type, concepts: &ConceptRegistry) -> Expression {
    // At most one side is an extractor in practice; resolve both anyway.
    let lhs = tailor_operand(&predicate.lhs, schema, concepts);
    let rhs = tailor_operand(&predicate.rhs, schema, concepts);
    let mut alternatives = Vec::new();
    for lhs in &lhs {
        for rhs in &rhs {
            alternatives.push(Expression::Predicate(Predicate {
                lhs: lhs.clone(),
                op: predicate.op,
                rhs: rhs.clone(),
            }));
        }
    }
    match alternatives.len() {
        0 => Expression::never(),
        1 => alternatives.pop().slate_expect("length checked"),
        _ => Expression::Or(alternatives),
    }
}

fn tailor_operand(operand: &Operand, schema: &Type, concepts: &ConceptRegistry) -> Vec<Operand> {
    let Some(record) = schema.as_record() else {
        return Vec::new();
    };
    let schema_name = schema.name().unwrap_or_default();
    match operand {
        Operand::Field(key) => {
            let mut offsets = record.resolve_key_or_concept(key, schema_name, concepts);
            if offsets.is_empty() {
                offsets = record.resolve_key_suffix(key, schema_name);
            }
            offsets.into_iter().map(Operand::Column).collect()
        }
        // `Operand::Type` carries the bare name; the resolver expects the
        // `:`-prefixed extractor syntax.
        Operand::Type(extractor) => record
            .resolve_type_extractor(&format!(":{extractor}"))
            .into_iter()
            .map(Operand::Column)
            .collect(),
        other => vec![other.clone()],
    }
}

/// Evaluates a tailored expression against one row of a slice.
pub fn evaluate(expr: &Expression, slice: &TableSlice, row: usize) -> bool {
    match expr {
        Expression::Predicate(predicate) => {
            let lhs = operand_value(&predicate.lhs, slice, row);
            let rhs = operand_value(&predicate.rhs, slice, row);
            test(predicate.op, &lhs, &rhs)
        }
        Expression::And(terms) => terms.iter().all(|term| evaluate(term, slice, row)),
        Expression::Or(terms) => terms.iter().any(|term| evaluate(term, slice, row)),
        Expression::Not(term) => !evaluate(term, slice, row),
    }
}

fn operand_value(operand: &Operand, slice: &TableSlice, row: usize) -> Value {
    match operand {
        Operand::Value(value) => value.clone(),
        Operand::Column(offset) => {
            let record = slice
                .record_type()
                .slate_expect("evaluation requires a non-empty slice");
            let (ty, array) = column_of(slice.batch(), &record, offset);
            value_at(array.as_ref(), &ty, row)
        }
        Operand::Meta(MetaExtractor::Schema) => slice
            .schema()
            .name()
            .map_or(Value::Null, |name| Value::String(name.to_string())),
        Operand::Meta(MetaExtractor::SchemaId) => Value::String(slice.schema().fingerprint()),
        Operand::Meta(MetaExtractor::ImportTime) => {
            slice.import_time().map_or(Value::Null, Value::Time)
        }
        Operand::Meta(MetaExtractor::Internal) => {
            Value::Bool(slice.schema().attribute("internal").is_some())
        }
        Operand::Field(key) => slate_panic!("untailored field extractor `{key}` in evaluation"),
        Operand::Type(extractor) => {
            slate_panic!("untailored type extractor `:{extractor}` in evaluation")
        }
    }
}

fn test(op: RelOp, lhs: &Value, rhs: &Value) -> bool {
    match op {
        RelOp::Eq => compare(lhs, rhs) == Some(Ordering::Equal),
        RelOp::Ne => compare(lhs, rhs) != Some(Ordering::Equal),
        RelOp::Lt => compare(lhs, rhs) == Some(Ordering::Less),
        RelOp::Le => matches!(
            compare(lhs, rhs),
            Some(Ordering::Less | Ordering::Equal)
        ),
        RelOp::Gt => compare(lhs, rhs) == Some(Ordering::Greater),
        RelOp::Ge => matches!(
            compare(lhs, rhs),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        RelOp::In => contains(rhs, lhs),
        RelOp::Ni => !contains(rhs, lhs),
    }
}

/// Membership: lists by element equality, strings by substring, subnets
/// by address containment.
fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::List(elements), _) => elements
            .iter()
            .any(|element| compare(element, needle) == Some(Ordering::Equal)),
        (Value::String(string), Value::String(substring)) => string.contains(substring),
        (Value::Subnet { address, length }, Value::Ip(ip)) => {
            subnet_contains(*address, *length, *ip)
        }
        _ => false,
    }
}

fn subnet_contains(address: IpAddr, length: u8, ip: IpAddr) -> bool {
    let network = ip_to_bytes(address);
    let candidate = ip_to_bytes(ip);
    // Prefix lengths address the 128-bit v4-mapped representation.
    let length = usize::from(length.min(128));
    let full = length / 8;
    if network[..full] != candidate[..full] {
        return false;
    }
    let rest = length % 8;
    if rest == 0 {
        return true;
    }
    let mask = !0u8 << (8 - rest);
    network[full] & mask == candidate[full] & mask
}

/// Evaluates a tailored expression over every row, yielding the slices of
/// contiguous matching rows in order.
pub fn select(slice: &TableSlice, expr: &Expression) -> Vec<TableSlice> {
    let rows = slice.rows();
    let mut results = Vec::new();
    let mut begin = None;
    for row in 0..rows {
        match (evaluate(expr, slice, row), begin) {
            (true, None) => begin = Some(row),
            (false, Some(start)) => {
                results.push(slice.subslice(start, row));
                begin = None;
            }
            _ => {}
        }
    }
    if let Some(start) = begin {
        results.push(slice.subslice(start, rows));
    }
    results
}

/// Concatenates the matching runs of [`select`] into one slice, or the
/// empty slice when nothing matches.
pub fn filter(slice: &TableSlice, expr: &Expression) -> TableSlice {
    concatenate(select(slice, expr)).slate_expect("selected runs share the slice's schema")
}

/// Counts the rows matching a tailored expression.
pub fn count_matching(slice: &TableSlice, expr: &Expression) -> usize {
    (0..slice.rows())
        .filter(|&row| evaluate(expr, slice, row))
        .count()
}

/// Whether an import time satisfies a comparison against a fixed point in
/// time; convenience for time-window pruning of whole slices.
pub fn import_time_matches(slice: &TableSlice, op: RelOp, time: Timestamp) -> bool {
    let lhs = slice.import_time().map_or(Value::Null, Value::Time);
    test(op, &lhs, &Value::Time(time))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{ArrayRef, Int64Array, StringArray, StructArray};
    use arrow_schema::Fields;
    use slate_types::arrow::to_arrow_field;
    use slate_types::{Field, RecordType};

    use super::*;

    fn sample_slice() -> TableSlice {
        let schema: Type = RecordType::new([
            Field::new("x", Type::int64()),
            Field::new("s", Type::string()),
        ])
        .into();
        let fields: Fields = [
            to_arrow_field("x", &Type::int64()),
            to_arrow_field("s", &Type::string()),
        ]
        .into_iter()
        .collect();
        let batch = StructArray::new(
            fields,
            vec![
                Arc::new(Int64Array::from(vec![1, 5, 3, 7])) as ArrayRef,
                Arc::new(StringArray::from(vec!["a", "b", "c", "d"])),
            ],
            None,
        );
        TableSlice::new(schema.with_name("demo"), batch).unwrap()
    }

    fn field_predicate(key: &str, op: RelOp, value: Value) -> Expression {
        Expression::Predicate(Predicate {
            lhs: Operand::Field(key.into()),
            op,
            rhs: Operand::Value(value),
        })
    }

    #[test]
    fn tailoring_resolves_fields_and_types() {
        let slice = sample_slice();
        let concepts = ConceptRegistry::default();
        let expr = tailor(
            &field_predicate("x", RelOp::Gt, Value::Int64(2)),
            slice.schema(),
            &concepts,
        );
        let Expression::Predicate(predicate) = &expr else {
            panic!("expected a predicate");
        };
        assert!(matches!(&predicate.lhs, Operand::Column(offset) if **offset == [0]));
        let unresolved = tailor(
            &field_predicate("missing", RelOp::Eq, Value::Int64(0)),
            slice.schema(),
            &concepts,
        );
        assert!(matches!(unresolved, Expression::Or(terms) if terms.is_empty()));
    }

    #[test]
    fn type_extractors_resolve_to_columns() {
        let slice = sample_slice();
        let concepts = ConceptRegistry::default();
        let expr = tailor(
            &Expression::Predicate(Predicate {
                lhs: Operand::Type("int64".into()),
                op: RelOp::Ge,
                rhs: Operand::Value(Value::Int64(3)),
            }),
            slice.schema(),
            &concepts,
        );
        let Expression::Predicate(predicate) = &expr else {
            panic!("expected a predicate");
        };
        assert!(matches!(&predicate.lhs, Operand::Column(offset) if **offset == [0]));
        assert!(count_matching(&slice, &expr) > 0);
    }

    #[test]
    fn concepts_distribute_predicates() {
        let slice = sample_slice();
        let mut concepts = ConceptRegistry::default();
        concepts.insert("anything", ["demo.x", "demo.s"]);
        let expr = tailor(
            &field_predicate("anything", RelOp::Eq, Value::Int64(5)),
            slice.schema(),
            &concepts,
        );
        let Expression::Or(terms) = &expr else {
            panic!("expected a disjunction");
        };
        assert_eq!(terms.len(), 2);
        assert_eq!(count_matching(&slice, &expr), 1);
    }

    #[test]
    fn select_yields_contiguous_runs() {
        let slice = sample_slice();
        let concepts = ConceptRegistry::default();
        // Rows 0 and 2..4 match; row 1 splits them into two runs.
        let expr = tailor(
            &field_predicate("x", RelOp::Ne, Value::Int64(5)),
            slice.schema(),
            &concepts,
        );
        let runs = select(&slice, &expr);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].rows(), 1);
        assert_eq!(runs[0].at(0, 0), Value::Int64(1));
        assert_eq!(runs[1].rows(), 2);
        assert_eq!(runs[1].at(0, 0), Value::Int64(3));
        let filtered = filter(&slice, &expr);
        assert_eq!(filtered.rows(), 3);
        assert_eq!(count_matching(&slice, &expr), 3);
        let contiguous = tailor(
            &field_predicate("x", RelOp::Ge, Value::Int64(3)),
            slice.schema(),
            &concepts,
        );
        assert_eq!(select(&slice, &contiguous).len(), 1);
    }

    #[test]
    fn boolean_connectives() {
        let slice = sample_slice();
        let concepts = ConceptRegistry::default();
        let expr = tailor(
            &Expression::And(vec![
                field_predicate("x", RelOp::Gt, Value::Int64(1)),
                Expression::Not(Box::new(field_predicate(
                    "s",
                    RelOp::Eq,
                    Value::String("b".into()),
                ))),
            ]),
            slice.schema(),
            &concepts,
        );
        assert_eq!(count_matching(&slice, &expr), 2);
        assert_eq!(count_matching(&slice, &Expression::always()), 4);
        assert_eq!(count_matching(&slice, &Expression::never()), 0);
    }

    #[test]
    fn meta_extractors() {
        let mut slice = sample_slice();
        slice.set_import_time("2024-05-01T00:00:00Z".parse().unwrap());
        let expr = Expression::Predicate(Predicate {
            lhs: Operand::Meta(MetaExtractor::Schema),
            op: RelOp::Eq,
            rhs: Operand::Value(Value::String("demo".into())),
        });
        assert_eq!(count_matching(&slice, &expr), 4);
        assert!(import_time_matches(
            &slice,
            RelOp::Gt,
            "2024-01-01T00:00:00Z".parse().unwrap()
        ));
        let internal = Expression::Predicate(Predicate {
            lhs: Operand::Meta(MetaExtractor::Internal),
            op: RelOp::Eq,
            rhs: Operand::Value(Value::Bool(false)),
        });
        assert_eq!(count_matching(&slice, &internal), 4);
    }

    #[test]
    fn membership() {
        assert!(test(
            RelOp::In,
            &Value::Int64(2),
            &Value::List(vec![Value::Int64(1), Value::Int64(2)])
        ));
        let subnet = Value::Subnet {
            address: "10.0.0.0".parse().unwrap(),
            length: 104,
        };
        assert!(test(RelOp::In, &Value::Ip("10.1.2.3".parse().unwrap()), &subnet));
        assert!(test(RelOp::Ni, &Value::Ip("11.0.0.1".parse().unwrap()), &subnet));
    }
}
