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

use std::collections::HashSet;

use serde::Deserialize;

use triggr_types::{EventDecl, EventField, EventSchema, ScalarType};
use triggr_utils::{Error, Result};

/// The uploaded contract metadata descriptor.
///
/// Only the keys the node consumes are modeled; everything else in the
/// file is ignored. All five top-level keys are required; a descriptor
/// missing any of them is rejected at upload time.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractDescriptor {
    source: SourceSection,
    contract: ContractSection,
    spec: SpecSection,
    types: Vec<PortableType>,
    #[allow(dead_code)]
    version: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct SourceSection {
    hash: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ContractSection {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SpecSection {
    #[serde(default)]
    events: Vec<EventSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct EventSpec {
    label: String,
    #[serde(default)]
    args: Vec<EventArg>,
}

#[derive(Debug, Clone, Deserialize)]
struct EventArg {
    label: String,
    #[serde(rename = "type")]
    ty: TypeInfo,
}

#[derive(Debug, Clone, Deserialize)]
struct TypeInfo {
    #[serde(rename = "type")]
    type_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct PortableType {
    id: u32,
    #[serde(rename = "type")]
    ty: TypeEntry,
}

#[derive(Debug, Clone, Deserialize)]
struct TypeEntry {
    #[serde(default)]
    path: Vec<String>,
    #[serde(default)]
    def: TypeDef,
}

/// One `def` entry of the descriptor's type table. The ink! metadata
/// format keys the definition by kind; exactly one of these is set.
#[derive(Debug, Clone, Default, Deserialize)]
struct TypeDef {
    primitive: Option<String>,
    array: Option<ArrayDef>,
    sequence: Option<SequenceDef>,
    composite: Option<CompositeDef>,
    variant: Option<serde_json::Value>,
    tuple: Option<Vec<u32>>,
    compact: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ArrayDef {
    len: u32,
    #[serde(rename = "type")]
    type_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct SequenceDef {
    #[serde(rename = "type")]
    type_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct CompositeDef {
    #[serde(default)]
    fields: Vec<CompositeField>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompositeField {
    #[serde(rename = "type")]
    type_id: u32,
}

/// What the registry keeps from an uploaded descriptor.
#[derive(Debug, Clone)]
pub struct ParsedDescriptor {
    /// `source.hash`.
    pub contract_hash: String,
    /// `contract.name`.
    pub contract_name: String,
    /// The resolved event schema, in descriptor order.
    pub schema: EventSchema,
}

/// Parses a descriptor upload and resolves its event argument types.
///
/// Arguments that do not resolve to a supported scalar are recorded as
/// [`ScalarType::Opaque`] and decode to raw hex at runtime.
pub fn parse_descriptor(json: &str) -> Result<ParsedDescriptor> {
    let descriptor: ContractDescriptor = serde_json::from_str(json)
        .map_err(|e| Error::validation(format!("bad contract descriptor: {e}")))?;

    let events = descriptor
        .spec
        .events
        .iter()
        .map(|event| EventDecl {
            name: event.label.clone(),
            fields: event
                .args
                .iter()
                .map(|arg| EventField {
                    name: arg.label.clone(),
                    ty: resolve_type(
                        &descriptor.types,
                        arg.ty.type_id,
                        &mut HashSet::new(),
                    ),
                })
                .collect(),
        })
        .collect();

    Ok(ParsedDescriptor {
        contract_hash: descriptor.source.hash,
        contract_name: descriptor.contract.name,
        schema: EventSchema { events },
    })
}

/// Walks the type table from `type_id` down to a scalar. `seen` guards
/// against cyclic type references in a hostile descriptor.
fn resolve_type(
    types: &[PortableType],
    type_id: u32,
    seen: &mut HashSet<u32>,
) -> ScalarType {
    if !seen.insert(type_id) {
        return ScalarType::Opaque;
    }
    let Some(entry) = types.iter().find(|t| t.id == type_id) else {
        return ScalarType::Opaque;
    };
    let def = &entry.ty.def;

    if let Some(primitive) = &def.primitive {
        return match primitive.as_str() {
            "bool" => ScalarType::Bool,
            "u8" => ScalarType::U8,
            "u16" => ScalarType::U16,
            "u32" => ScalarType::U32,
            "u64" => ScalarType::U64,
            "u128" => ScalarType::U128,
            "i8" => ScalarType::I8,
            "i16" => ScalarType::I16,
            "i32" => ScalarType::I32,
            "i64" => ScalarType::I64,
            "i128" => ScalarType::I128,
            "str" => ScalarType::Bytes,
            _ => ScalarType::Opaque,
        };
    }
    if let Some(array) = &def.array {
        return match resolve_type(types, array.type_id, seen) {
            ScalarType::U8 => ScalarType::BytesFixed(array.len),
            _ => ScalarType::Opaque,
        };
    }
    if let Some(sequence) = &def.sequence {
        return match resolve_type(types, sequence.type_id, seen) {
            ScalarType::U8 => ScalarType::Bytes,
            _ => ScalarType::Opaque,
        };
    }
    if let Some(composite) = &def.composite {
        // account ids are a newtype over [u8; 32]
        if entry.ty.path.last().map(String::as_str) == Some("AccountId") {
            return ScalarType::Account;
        }
        // unwrap other single-field newtypes
        if let [field] = composite.fields.as_slice() {
            return resolve_type(types, field.type_id, seen);
        }
        return ScalarType::Opaque;
    }
    if def.variant.is_some() || def.tuple.is_some() || def.compact.is_some() {
        return ScalarType::Opaque;
    }
    ScalarType::Opaque
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A trimmed flipper-style descriptor: one `Transferred` event with
    /// an AccountId, a u128 and a Vec<u8> argument, plus an enum arg.
    const DESCRIPTOR: &str = r#"{
        "source": { "hash": "0x6de2", "language": "ink! 5.0.0" },
        "contract": { "name": "flipper", "version": "0.1.0" },
        "spec": {
            "constructors": [],
            "messages": [],
            "events": [
                {
                    "label": "Transferred",
                    "args": [
                        { "label": "to", "type": { "type": 0, "displayName": ["AccountId"] } },
                        { "label": "amount", "type": { "type": 2, "displayName": ["Balance"] } },
                        { "label": "memo", "type": { "type": 3 } },
                        { "label": "kind", "type": { "type": 5 } }
                    ]
                },
                { "label": "Flipped", "args": [ { "label": "flag", "type": { "type": 6 } } ] }
            ]
        },
        "types": [
            { "id": 0, "type": { "path": ["ink_primitives", "types", "AccountId"], "def": { "composite": { "fields": [ { "type": 1 } ] } } } },
            { "id": 1, "type": { "def": { "array": { "len": 32, "type": 4 } } } },
            { "id": 2, "type": { "def": { "primitive": "u128" } } },
            { "id": 3, "type": { "def": { "sequence": { "type": 4 } } } },
            { "id": 4, "type": { "def": { "primitive": "u8" } } },
            { "id": 5, "type": { "def": { "variant": { "variants": [] } } } },
            { "id": 6, "type": { "def": { "primitive": "bool" } } }
        ],
        "version": "5"
    }"#;

    #[test]
    fn resolves_event_argument_types() {
        let parsed = parse_descriptor(DESCRIPTOR).unwrap();
        assert_eq!(parsed.contract_hash, "0x6de2");
        assert_eq!(parsed.contract_name, "flipper");

        let transferred = parsed.schema.event("Transferred").unwrap();
        let types: Vec<_> = transferred.fields.iter().map(|f| f.ty).collect();
        assert_eq!(
            types,
            vec![
                ScalarType::Account,
                ScalarType::U128,
                ScalarType::Bytes,
                ScalarType::Opaque
            ]
        );

        let flipped = parsed.schema.event("Flipped").unwrap();
        assert_eq!(flipped.fields[0].ty, ScalarType::Bool);
        // dispatch index order follows the descriptor
        assert_eq!(parsed.schema.event_at(1).unwrap().name, "Flipped");
    }

    #[test]
    fn missing_top_level_keys_are_rejected() {
        for key in ["source", "contract", "spec", "types", "version"] {
            let mut value: serde_json::Value =
                serde_json::from_str(DESCRIPTOR).unwrap();
            value.as_object_mut().unwrap().remove(key);
            let err =
                parse_descriptor(&value.to_string()).unwrap_err();
            assert!(
                matches!(err, Error::Validation { .. }),
                "removing {key} should fail validation"
            );
        }
    }

    #[test]
    fn extra_keys_are_ignored() {
        let mut value: serde_json::Value =
            serde_json::from_str(DESCRIPTOR).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("storage".into(), serde_json::json!({"root": {}}));
        assert!(parse_descriptor(&value.to_string()).is_ok());
    }

    #[test]
    fn cyclic_types_resolve_to_opaque() {
        let descriptor = r#"{
            "source": { "hash": "0x00" },
            "contract": { "name": "loop" },
            "spec": { "events": [ { "label": "E", "args": [ { "label": "x", "type": { "type": 0 } } ] } ] },
            "types": [
                { "id": 0, "type": { "def": { "composite": { "fields": [ { "type": 0 } ] } } } }
            ],
            "version": "5"
        }"#;
        let parsed = parse_descriptor(descriptor).unwrap();
        assert_eq!(
            parsed.schema.event("E").unwrap().fields[0].ty,
            ScalarType::Opaque
        );
    }
}
