use std::cmp::Ordering;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use arrow_array::cast::AsArray;
use arrow_array::types::{
    DurationNanosecondType, Float64Type, Int64Type, TimestampNanosecondType, UInt32Type,
    UInt64Type, UInt8Type,
};
use arrow_array::Array;
use jiff::{SignedDuration, Timestamp};
use slate_error::SlateExpect;
use slate_types::{unify, Field, RecordType, Type, TypeKind};

/// A materialized view of a single cell.
///
/// Every concrete type kind has a value representation; enumeration cells
/// surface as the variant name. `Value` is also the row-wise input to the
/// builders, with [`infer`] recovering a type from a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A 64-bit signed integer.
    Int64(i64),
    /// A 64-bit unsigned integer.
    UInt64(u64),
    /// A double precision value.
    Double(f64),
    /// A signed duration.
    Duration(SignedDuration),
    /// A point in time.
    Time(Timestamp),
    /// A UTF-8 string; also the view of an enumeration variant.
    String(String),
    /// An opaque byte sequence.
    Blob(Vec<u8>),
    /// An IP address.
    Ip(IpAddr),
    /// An IP subnet.
    Subnet {
        /// The network address.
        address: IpAddr,
        /// The prefix length.
        length: u8,
    },
    /// A list of values.
    List(Vec<Value>),
    /// A map of key/value pairs in insertion order.
    Map(Vec<(Value, Value)>),
    /// A record of named values.
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Whether this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A short name for the value's variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int64",
            Value::UInt64(_) => "uint64",
            Value::Double(_) => "double",
            Value::Duration(_) => "duration",
            Value::Time(_) => "time",
            Value::String(_) => "string",
            Value::Blob(_) => "blob",
            Value::Ip(_) => "ip",
            Value::Subnet { .. } => "subnet",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }
}

/// Infers a type from a value.
///
/// Lists and maps unify their element types; `None` means the value has
/// no representable type (an empty record, or a list whose elements do
/// not unify).
pub fn infer(value: &Value) -> Option<Type> {
    match value {
        Value::Null => Some(Type::null()),
        Value::Bool(_) => Some(Type::bool_()),
        Value::Int64(_) => Some(Type::int64()),
        Value::UInt64(_) => Some(Type::uint64()),
        Value::Double(_) => Some(Type::double()),
        Value::Duration(_) => Some(Type::duration()),
        Value::Time(_) => Some(Type::time()),
        Value::String(_) => Some(Type::string()),
        Value::Blob(_) => Some(Type::blob()),
        Value::Ip(_) => Some(Type::ip()),
        Value::Subnet { .. } => Some(Type::subnet()),
        Value::List(elements) => {
            let mut element = Type::null();
            for value in elements {
                element = unify(&element, &infer(value)?)?;
            }
            Some(slate_types::ListType::new(element).into())
        }
        Value::Map(entries) => {
            let mut key = Type::null();
            let mut value_type = Type::null();
            for (k, v) in entries {
                key = unify(&key, &infer(k)?)?;
                value_type = unify(&value_type, &infer(v)?)?;
            }
            Some(slate_types::MapType::new(key, value_type).into())
        }
        Value::Record(fields) => {
            if fields.is_empty() {
                return None;
            }
            let mut inferred = Vec::with_capacity(fields.len());
            for (name, value) in fields {
                inferred.push(Field::new(name, infer(value)?));
            }
            Some(RecordType::new(inferred).into())
        }
    }
}

/// Compares two values, coercing across the numeric kinds.
///
/// Values of incomparable kinds (and composite values) yield `None`
/// except for equality, which composites support structurally.
pub fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
        (Value::UInt64(a), Value::UInt64(b)) => Some(a.cmp(b)),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::Int64(a), Value::UInt64(b)) => {
            let Ok(a) = u64::try_from(*a) else {
                return Some(Ordering::Less);
            };
            Some(a.cmp(b))
        }
        (Value::UInt64(a), Value::Int64(b)) => {
            let Ok(b) = u64::try_from(*b) else {
                return Some(Ordering::Greater);
            };
            Some(a.cmp(&b))
        }
        (Value::Int64(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
        (Value::Double(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
        (Value::UInt64(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
        (Value::Double(a), Value::UInt64(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
        (Value::Ip(a), Value::Ip(b)) => Some(a.cmp(b)),
        (
            Value::Subnet { address, length },
            Value::Subnet {
                address: other_address,
                length: other_length,
            },
        ) => Some(address.cmp(other_address).then(length.cmp(other_length))),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// Canonical 16-byte representation of an IP address, with IPv4 embedded
/// as a v4-mapped IPv6 address.
pub(crate) fn ip_to_bytes(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

pub(crate) fn ip_from_bytes(bytes: &[u8]) -> IpAddr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(bytes);
    let v6 = Ipv6Addr::from(octets);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

pub(crate) fn v4_mapped_null() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// Materializes the cell at `index` of `array`, interpreted as `ty`.
pub(crate) fn value_at(array: &dyn Array, ty: &Type, index: usize) -> Value {
    if array.is_null(index) {
        return Value::Null;
    }
    match ty.kind() {
        TypeKind::Null => Value::Null,
        TypeKind::Bool => Value::Bool(array.as_boolean().value(index)),
        TypeKind::Int64 => Value::Int64(array.as_primitive::<Int64Type>().value(index)),
        TypeKind::UInt64 => Value::UInt64(array.as_primitive::<UInt64Type>().value(index)),
        TypeKind::Double => Value::Double(array.as_primitive::<Float64Type>().value(index)),
        TypeKind::Duration => Value::Duration(SignedDuration::from_nanos(
            array.as_primitive::<DurationNanosecondType>().value(index),
        )),
        TypeKind::Time => Value::Time(
            Timestamp::from_nanosecond(i128::from(
                array.as_primitive::<TimestampNanosecondType>().value(index),
            ))
            .slate_expect("nanosecond timestamp in range"),
        ),
        TypeKind::String => Value::String(array.as_string::<i32>().value(index).to_string()),
        TypeKind::Blob => Value::Blob(array.as_binary::<i32>().value(index).to_vec()),
        TypeKind::Ip => Value::Ip(ip_from_bytes(array.as_fixed_size_binary().value(index))),
        TypeKind::Subnet => {
            let subnet = array.as_struct();
            let address = subnet.column(0).as_fixed_size_binary();
            let length = subnet.column(1).as_primitive::<UInt8Type>();
            Value::Subnet {
                address: if address.is_null(index) {
                    v4_mapped_null()
                } else {
                    ip_from_bytes(address.value(index))
                },
                length: length.value(index),
            }
        }
        TypeKind::Enumeration => {
            let dictionary = array.as_dictionary::<UInt32Type>();
            let values = dictionary.values().as_string::<i32>();
            let key = usize::try_from(dictionary.keys().value(index))
                .slate_expect("dictionary keys fit in memory");
            Value::String(values.value(key).to_string())
        }
        TypeKind::List => {
            let list_type = ty.as_list().slate_expect("kind checked");
            let element_type = list_type.value_type();
            let list = array.as_list::<i32>();
            let elements = list.value(index);
            Value::List(
                (0..elements.len())
                    .map(|i| value_at(elements.as_ref(), &element_type, i))
                    .collect(),
            )
        }
        TypeKind::Map => {
            let map_type = ty.as_map().slate_expect("kind checked");
            let key_type = map_type.key_type();
            let value_type = map_type.value_type();
            let map = array.as_map();
            let entries = map.value(index);
            let keys = entries.column(0);
            let values = entries.column(1);
            Value::Map(
                (0..entries.len())
                    .map(|i| {
                        (
                            value_at(keys.as_ref(), &key_type, i),
                            value_at(values.as_ref(), &value_type, i),
                        )
                    })
                    .collect(),
            )
        }
        TypeKind::Record => {
            let record = ty.as_record().slate_expect("kind checked");
            let strukt = array.as_struct();
            Value::Record(
                record
                    .fields()
                    .enumerate()
                    .map(|(i, field)| {
                        (
                            field.name.clone(),
                            value_at(strukt.column(i).as_ref(), &field.ty, index),
                        )
                    })
                    .collect(),
            )
        }
    }
}
