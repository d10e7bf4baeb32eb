#![cfg(test)]

use slate_table::{
    concatenate, count_matching, filter, flatten, resolve_enumerations, select, tailor,
    unflatten, AdaptiveBuilder, Expression, MetaExtractor, Operand, Predicate, RelOp,
    TableSlice, TableSliceBuilder, Value,
};
use slate_types::schema::{parse, resolve};
use slate_types::{ConceptRegistry, ModuleRegistry, Type};

const SCHEMA: &str = r#"
    type conn = record{
        uid: string,
        id: record{
            orig_h: ip,
            resp_h: ip,
        },
        duration: duration,
        proto: enum{tcp, udp},
        service: string,
    }
"#;

fn conn_type() -> Type {
    let symbols = parse(SCHEMA).unwrap();
    let module = resolve(&symbols, &ModuleRegistry::default()).unwrap();
    module.get("conn").unwrap().clone()
}

fn conn_slice() -> TableSlice {
    let mut builder = TableSliceBuilder::new(conn_type()).unwrap();
    for (uid, orig, resp, nanos, proto, service) in [
        ("C1", "10.0.0.1", "10.0.0.2", 1_000, "tcp", "http"),
        ("C2", "10.0.0.3", "192.168.1.1", 2_000, "udp", "dns"),
        ("C3", "10.0.0.1", "10.0.0.9", 3_000, "tcp", "ssh"),
    ] {
        builder.add(&Value::String(uid.into())).unwrap();
        builder.add(&Value::Ip(orig.parse().unwrap())).unwrap();
        builder.add(&Value::Ip(resp.parse().unwrap())).unwrap();
        builder
            .add(&Value::Duration(jiff::SignedDuration::from_nanos(nanos)))
            .unwrap();
        builder.add(&Value::String(proto.into())).unwrap();
        builder.add(&Value::String(service.into())).unwrap();
    }
    builder.finish().unwrap()
}

#[test]
fn schema_dsl_to_slice() {
    let slice = conn_slice();
    assert_eq!(slice.schema().name(), Some("conn"));
    assert_eq!(slice.rows(), 3);
    assert_eq!(slice.columns(), 6);
    assert_eq!(slice.at(0, 1), Value::Ip("10.0.0.1".parse().unwrap()));
    assert_eq!(slice.at(1, 4), Value::String("udp".into()));
}

#[test]
fn serialization_survives_the_envelope() {
    let mut slice = conn_slice();
    slice.set_import_time("2024-05-01T12:00:00Z".parse().unwrap());
    let bytes = slice.serialize().unwrap();
    let restored = TableSlice::deserialize(bytes.clone()).unwrap();
    assert_eq!(restored, slice);
    assert_eq!(restored.import_time(), slice.import_time());
    let verified = TableSlice::deserialize_verified(bytes);
    assert_eq!(verified.schema().name(), Some("conn"));
}

#[test]
fn filtering_with_field_and_concept_extractors() {
    let slice = conn_slice();
    let mut concepts = ConceptRegistry::default();
    concepts.insert("net.src", ["conn.id.orig_h"]);
    let expr = tailor(
        &Expression::Predicate(Predicate {
            lhs: Operand::Field("net.src".into()),
            op: RelOp::Eq,
            rhs: Operand::Value(Value::Ip("10.0.0.1".parse().unwrap())),
        }),
        slice.schema(),
        &concepts,
    );
    assert_eq!(count_matching(&slice, &expr), 2);
    let runs = select(&slice, &expr);
    assert_eq!(runs.len(), 2);
    let matched = filter(&slice, &expr);
    assert_eq!(matched.rows(), 2);
    assert_eq!(matched.at(1, 0), Value::String("C3".into()));
}

#[test]
fn type_extractors_distribute_over_columns() {
    let slice = conn_slice();
    let concepts = ConceptRegistry::default();
    let expr = tailor(
        &Expression::Predicate(Predicate {
            lhs: Operand::Type("ip".into()),
            op: RelOp::Eq,
            rhs: Operand::Value(Value::Ip("192.168.1.1".parse().unwrap())),
        }),
        slice.schema(),
        &concepts,
    );
    assert_eq!(count_matching(&slice, &expr), 1);
}

#[test]
fn meta_extractors_match_the_whole_slice() {
    let slice = conn_slice();
    let expr = Expression::Predicate(Predicate {
        lhs: Operand::Meta(MetaExtractor::Schema),
        op: RelOp::Eq,
        rhs: Operand::Value(Value::String("conn".into())),
    });
    assert_eq!(count_matching(&slice, &expr), slice.rows());
}

#[test]
fn flatten_unflatten_round_trip() {
    let slice = conn_slice();
    let flattened = flatten(&slice, ".");
    assert!(flattened.renamed.is_empty());
    let record = flattened.slice.record_type().unwrap();
    assert_eq!(record.num_fields(), 6);
    assert_eq!(record.field(1).name, "id.orig_h");
    let restored = unflatten(&flattened.slice, ".");
    assert_eq!(restored.schema(), slice.schema());
    assert_eq!(restored.at(2, 2), slice.at(2, 2));
}

#[test]
fn enumeration_resolution_yields_strings() {
    let slice = conn_slice();
    let resolved = resolve_enumerations(&slice).unwrap();
    let record = resolved.record_type().unwrap();
    assert_eq!(record.field(2).ty.kind(), slate_types::TypeKind::Duration);
    assert_eq!(record.field(3).ty, Type::string());
    assert_eq!(resolved.at(1, 4), Value::String("udp".into()));
}

#[test]
fn subslice_concatenate_inverse() {
    let slice = conn_slice();
    let (head, tail) = slice.split(2);
    assert_eq!(head.rows(), 2);
    assert_eq!(tail.rows(), 1);
    let rejoined = concatenate(vec![head, TableSlice::empty(), tail]).unwrap();
    assert_eq!(rejoined, slice);
    let identity = slice.subslice(0, slice.rows());
    assert_eq!(identity, slice);
    assert!(slice.subslice(1, 1).is_empty());
}

#[test]
fn adaptive_builder_discovers_the_conn_shape() {
    let mut builder = AdaptiveBuilder::new();
    builder
        .add_row([
            ("uid", Value::String("C1".into())),
            (
                "id",
                Value::Record(vec![(
                    "orig_h".into(),
                    Value::Ip("10.0.0.1".parse().unwrap()),
                )]),
            ),
        ])
        .unwrap();
    builder
        .add_row([
            ("uid", Value::String("C2".into())),
            ("service", Value::String("dns".into())),
        ])
        .unwrap();
    let slice = builder.finish_named("conn.discovered").unwrap();
    assert_eq!(slice.schema().name(), Some("conn.discovered"));
    assert_eq!(slice.rows(), 2);
    assert_eq!(slice.columns(), 3);
    assert_eq!(slice.at(1, 1), Value::Null);
    assert_eq!(slice.at(1, 2), Value::String("dns".into()));
}
