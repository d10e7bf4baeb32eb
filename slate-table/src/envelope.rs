//! The versioned serialized container for table slices.
//!
//! Layout: a one-byte version tag, the length-prefixed binary type
//! encoding of the schema, an optional import timestamp, and an Arrow IPC
//! stream holding the batch. Only the current version is decodable;
//! older encoding versions are recognized solely to fail loudly.

use std::io::Cursor;

use arrow_array::{RecordBatch, StructArray};
use arrow_ipc::reader::StreamReader;
use arrow_ipc::writer::StreamWriter;
use bytes::Bytes;
use jiff::Timestamp;
use slate_error::{slate_bail, slate_err, SlateResult};
use slate_types::Type;

/// Historical row-wise encodings, long unsupported.
const VERSION_LEGACY_MIN: u8 = 0;
const VERSION_LEGACY_MAX: u8 = 1;
/// The current columnar encoding.
const VERSION_ARROW_V2: u8 = 2;

pub(crate) struct Envelope {
    pub schema: Type,
    pub import_time: Option<Timestamp>,
    /// The Arrow IPC stream, shared zero-copy out of the input buffer.
    pub ipc: Bytes,
}

pub(crate) fn encode(
    schema: &Type,
    import_time: Option<Timestamp>,
    batch: &StructArray,
) -> SlateResult<Bytes> {
    let mut buf = Vec::new();
    buf.push(VERSION_ARROW_V2);
    let schema_bytes = schema.as_bytes();
    buf.extend_from_slice(&u32::try_from(schema_bytes.len()).map_err(|_| {
        slate_err!(InvalidSerde: "schema encoding exceeds the envelope size limit")
    })?.to_le_bytes());
    buf.extend_from_slice(schema_bytes);
    match import_time {
        Some(time) => {
            buf.push(1);
            let nanos = i64::try_from(time.as_nanosecond()).map_err(|_| {
                slate_err!(InvalidArgument: "import time out of range for serialization")
            })?;
            buf.extend_from_slice(&nanos.to_le_bytes());
        }
        None => buf.push(0),
    }
    let record_batch = RecordBatch::from(batch.clone());
    {
        let mut writer = StreamWriter::try_new(&mut buf, record_batch.schema_ref())?;
        writer.write(&record_batch)?;
        writer.finish()?;
    }
    Ok(Bytes::from(buf))
}

/// Parses the envelope header, verifying the version and the schema
/// encoding. The IPC payload is returned undecoded.
pub(crate) fn decode_header(bytes: &Bytes) -> SlateResult<Envelope> {
    let Some(&version) = bytes.first() else {
        slate_bail!(InvalidSerde: "empty table slice envelope");
    };
    if (VERSION_LEGACY_MIN..=VERSION_LEGACY_MAX).contains(&version) {
        slate_bail!(
            InvalidSerde: "table slice encoding version {version} is no longer supported"
        );
    }
    if version != VERSION_ARROW_V2 {
        slate_bail!(InvalidSerde: "unknown table slice encoding version {version}");
    }
    let mut pos = 1;
    let schema_len = read_u32(bytes, &mut pos)? as usize;
    if bytes.len() < pos + schema_len {
        slate_bail!(InvalidSerde: "truncated table slice envelope");
    }
    let schema = Type::from_bytes(bytes.slice(pos..pos + schema_len))?;
    if schema.as_record().is_none() {
        slate_bail!(InvalidSerde: "table slice schema must be a record type, got {schema}");
    }
    pos += schema_len;
    let Some(&has_import_time) = bytes.get(pos) else {
        slate_bail!(InvalidSerde: "truncated table slice envelope");
    };
    pos += 1;
    let import_time = match has_import_time {
        0 => None,
        1 => {
            let Some(raw) = bytes.get(pos..pos + 8) else {
                slate_bail!(InvalidSerde: "truncated table slice envelope");
            };
            let mut le = [0u8; 8];
            le.copy_from_slice(raw);
            pos += 8;
            let nanos = i64::from_le_bytes(le);
            Some(Timestamp::from_nanosecond(i128::from(nanos)).map_err(|e| {
                slate_err!(InvalidSerde: "invalid import time in table slice envelope: {e}")
            })?)
        }
        _ => slate_bail!(InvalidSerde: "invalid import time marker in table slice envelope"),
    };
    Ok(Envelope {
        schema,
        import_time,
        ipc: bytes.slice(pos..),
    })
}

pub(crate) fn decode_batch(ipc: &[u8]) -> SlateResult<StructArray> {
    let mut reader = StreamReader::try_new(Cursor::new(ipc), None)?;
    let Some(batch) = reader.next() else {
        slate_bail!(InvalidSerde: "table slice envelope contains no record batch");
    };
    Ok(StructArray::from(batch?))
}

fn read_u32(bytes: &Bytes, pos: &mut usize) -> SlateResult<u32> {
    let Some(raw) = bytes.get(*pos..*pos + 4) else {
        slate_bail!(InvalidSerde: "truncated table slice envelope");
    };
    let mut le = [0u8; 4];
    le.copy_from_slice(raw);
    *pos += 4;
    Ok(u32::from_le_bytes(le))
}
