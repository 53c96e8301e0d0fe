// Copyright 2024 Algorealm Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;

use parity_scale_codec::Decode;
use serde_json::Value;

use triggr_types::{EventDecl, EventSchema, ScalarType, MAX_SAFE_JSON_INT};
use triggr_utils::{Error, Result};

/// Decodes an emitted contract event payload against the project schema.
///
/// ink! puts the event's dispatch index in the first payload byte; the
/// remaining bytes are the declared fields as a SCALE tuple.
pub fn decode_contract_event(
    schema: &EventSchema,
    payload: &[u8],
) -> Result<(String, HashMap<String, Value>)> {
    let mut cursor = payload;
    let index = u8::decode(&mut cursor)
        .map_err(|e| Error::Chain(format!("missing event index byte: {e}")))?;
    let decl = schema.event_at(index as usize).ok_or_else(|| {
        Error::Chain(format!(
            "event index {index} outside the contract schema ({} events)",
            schema.events.len()
        ))
    })?;
    let fields = decode_event_fields(decl, cursor)?;
    Ok((decl.name.clone(), fields))
}

/// Decodes the field tuple of one declared event.
pub fn decode_event_fields(
    decl: &EventDecl,
    mut data: &[u8],
) -> Result<HashMap<String, Value>> {
    let mut fields = HashMap::with_capacity(decl.fields.len());
    for field in &decl.fields {
        let value = decode_scalar(field.ty, &mut data).map_err(|e| {
            Error::Chain(format!(
                "field {} of {}: {e}",
                field.name, decl.name
            ))
        })?;
        fields.insert(field.name.clone(), value);
    }
    Ok(fields)
}

fn decode_scalar(ty: ScalarType, data: &mut &[u8]) -> Result<Value> {
    let codec = |e: parity_scale_codec::Error| Error::Chain(e.to_string());
    let value = match ty {
        ScalarType::U8 => Value::from(u8::decode(data).map_err(codec)?),
        ScalarType::U16 => Value::from(u16::decode(data).map_err(codec)?),
        ScalarType::U32 => Value::from(u32::decode(data).map_err(codec)?),
        ScalarType::U64 => {
            unsigned_value(u64::decode(data).map_err(codec)? as u128)
        }
        ScalarType::U128 => {
            unsigned_value(u128::decode(data).map_err(codec)?)
        }
        ScalarType::I8 => Value::from(i8::decode(data).map_err(codec)?),
        ScalarType::I16 => Value::from(i16::decode(data).map_err(codec)?),
        ScalarType::I32 => Value::from(i32::decode(data).map_err(codec)?),
        ScalarType::I64 => {
            signed_value(i64::decode(data).map_err(codec)? as i128)
        }
        ScalarType::I128 => signed_value(i128::decode(data).map_err(codec)?),
        ScalarType::Bool => Value::Bool(bool::decode(data).map_err(codec)?),
        ScalarType::BytesFixed(len) => {
            let bytes = take(data, len as usize)?;
            hex_value(bytes)
        }
        ScalarType::Bytes => {
            let bytes = Vec::<u8>::decode(data).map_err(codec)?;
            match String::from_utf8(bytes) {
                Ok(text) => Value::String(text),
                Err(err) => hex_value(err.as_bytes()),
            }
        }
        ScalarType::Account => {
            let bytes = take(data, 32)?;
            hex_value(bytes)
        }
        ScalarType::Opaque => {
            // the length of an unresolved field is unknowable, so it
            // consumes the rest of the payload
            let rest = std::mem::take(data);
            hex_value(rest)
        }
    };
    Ok(value)
}

fn take<'a>(data: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if data.len() < len {
        return Err(Error::Chain(format!(
            "payload too short: wanted {len} bytes, have {}",
            data.len()
        )));
    }
    let (head, rest) = data.split_at(len);
    *data = rest;
    Ok(head)
}

fn hex_value(bytes: &[u8]) -> Value {
    Value::String(format!("0x{}", hex::encode(bytes)))
}

/// JSON numbers hold integers up to 53 bits; wider values are rendered
/// as decimal strings so nothing is silently rounded.
fn unsigned_value(v: u128) -> Value {
    if v <= MAX_SAFE_JSON_INT as u128 {
        Value::from(v as u64)
    } else {
        Value::String(v.to_string())
    }
}

fn signed_value(v: i128) -> Value {
    if v.unsigned_abs() <= MAX_SAFE_JSON_INT as u128 {
        Value::from(v as i64)
    } else {
        Value::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_scale_codec::Encode;
    use triggr_types::EventField;

    fn decl(fields: Vec<(&str, ScalarType)>) -> EventDecl {
        EventDecl {
            name: "E".into(),
            fields: fields
                .into_iter()
                .map(|(name, ty)| EventField {
                    name: name.into(),
                    ty,
                })
                .collect(),
        }
    }

    #[test]
    fn decodes_the_scalar_menagerie() {
        let decl = decl(vec![
            ("a", ScalarType::U8),
            ("b", ScalarType::U64),
            ("c", ScalarType::I32),
            ("d", ScalarType::Bool),
            ("e", ScalarType::Bytes),
            ("f", ScalarType::Account),
        ]);
        let mut payload = Vec::new();
        7u8.encode_to(&mut payload);
        1_000u64.encode_to(&mut payload);
        (-5i32).encode_to(&mut payload);
        true.encode_to(&mut payload);
        b"hello".to_vec().encode_to(&mut payload);
        payload.extend_from_slice(&[0xab; 32]);

        let fields = decode_event_fields(&decl, &payload).unwrap();
        assert_eq!(fields["a"], Value::from(7));
        assert_eq!(fields["b"], Value::from(1_000));
        assert_eq!(fields["c"], Value::from(-5));
        assert_eq!(fields["d"], Value::Bool(true));
        assert_eq!(fields["e"], Value::String("hello".into()));
        assert_eq!(
            fields["f"],
            Value::String(format!("0x{}", "ab".repeat(32)))
        );
    }

    #[test]
    fn wide_integers_become_decimal_strings() {
        let decl = decl(vec![("v", ScalarType::U128)]);
        let payload = u128::MAX.encode();
        let fields = decode_event_fields(&decl, &payload).unwrap();
        assert_eq!(
            fields["v"],
            Value::String("340282366920938463463374607431768211455".into())
        );

        let decl = decl_small();
        let payload = 42u128.encode();
        let fields = decode_event_fields(&decl, &payload).unwrap();
        assert_eq!(fields["v"], Value::from(42));
    }

    fn decl_small() -> EventDecl {
        decl(vec![("v", ScalarType::U128)])
    }

    #[test]
    fn non_utf8_bytes_fall_back_to_hex() {
        let decl = decl(vec![("blob", ScalarType::Bytes)]);
        let payload = vec![0xff_u8, 0xfe].encode();
        let fields = decode_event_fields(&decl, &payload).unwrap();
        assert_eq!(fields["blob"], Value::String("0xfffe".into()));
    }

    #[test]
    fn opaque_fields_consume_the_remaining_payload() {
        let decl = decl(vec![("n", ScalarType::U8), ("rest", ScalarType::Opaque)]);
        let payload = [1u8, 0xde, 0xad, 0xbe, 0xef];
        let fields = decode_event_fields(&decl, &payload).unwrap();
        assert_eq!(fields["n"], Value::from(1));
        assert_eq!(fields["rest"], Value::String("0xdeadbeef".into()));
    }

    #[test]
    fn dispatch_index_selects_the_event() {
        let schema = EventSchema {
            events: vec![
                decl(vec![("x", ScalarType::U8)]),
                EventDecl {
                    name: "Second".into(),
                    fields: vec![EventField {
                        name: "y".into(),
                        ty: ScalarType::U16,
                    }],
                },
            ],
        };
        let mut payload = vec![1u8];
        9u16.encode_to(&mut payload);
        let (name, fields) = decode_contract_event(&schema, &payload).unwrap();
        assert_eq!(name, "Second");
        assert_eq!(fields["y"], Value::from(9));

        let err = decode_contract_event(&schema, &[9u8]).unwrap_err();
        assert!(matches!(err, Error::Chain(_)));
    }

    #[test]
    fn truncated_payloads_error_cleanly() {
        let decl1 = decl(vec![("v", ScalarType::U64)]);
        let err = decode_event_fields(&decl1, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::Chain(_)));

        let decl2 = decl(vec![("acc", ScalarType::Account)]);
        let err = decode_event_fields(&decl2, &[0; 16]).unwrap_err();
        assert!(matches!(err, Error::Chain(_)));
    }
}
