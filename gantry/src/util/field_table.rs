use lapin::protocol::basic::AMQPProperties;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use std::collections::HashMap;

/// Renders the given byte-keyed headers as an AMQP [`FieldTable`], with every
/// value carried as a [`LongString`].
pub(crate) fn to_field_table(headers: &HashMap<String, Vec<u8>>) -> FieldTable {
    let mut table = FieldTable::default();

    for (key, value) in headers {
        table.insert(
            ShortString::from(key.as_str()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }

    table
}

/// Extracts byte-keyed headers from the given [`AMQPProperties`].
///
/// String-ish values are carried over as their bytes; values of other AMQP
/// types are not meaningful to this runtime and are skipped.
pub(crate) fn byte_headers(properties: &AMQPProperties) -> HashMap<String, Vec<u8>> {
    let mut headers = HashMap::new();

    if let Some(table) = properties.headers() {
        for (key, value) in table.inner() {
            let bytes = match value {
                AMQPValue::LongString(s) => s.as_bytes().to_vec(),
                AMQPValue::ShortString(s) => s.as_str().as_bytes().to_vec(),
                AMQPValue::ByteArray(s) => s.as_slice().to_vec(),
                _ => continue,
            };

            headers.insert(key.as_str().to_string(), bytes);
        }
    }

    headers
}
