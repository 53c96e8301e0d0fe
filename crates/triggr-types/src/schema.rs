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

use serde::{Deserialize, Serialize};

/// The scalar types an event field can resolve to.
///
/// Anything the descriptor walker cannot resolve becomes [`ScalarType::Opaque`]
/// and is decoded to a raw hex string at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// Unsigned 128-bit integer.
    U128,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Signed 128-bit integer.
    I128,
    /// Boolean.
    Bool,
    /// Fixed-length byte array, rendered as hex.
    BytesFixed(u32),
    /// Variable-length byte string; UTF-8 when valid, hex otherwise.
    Bytes,
    /// 32-byte account identifier, rendered as hex.
    Account,
    /// Unresolvable type; decoded to the remaining payload as hex.
    Opaque,
}

/// The comparison class of a scalar type, used by the DSL type checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    /// Comparable with numeric operators and literals.
    Numeric,
    /// Comparable with string literals.
    Text,
    /// Comparable with boolean literals.
    Boolean,
}

impl ScalarType {
    /// The comparison class of this scalar.
    pub fn class(&self) -> TypeClass {
        match self {
            ScalarType::U8
            | ScalarType::U16
            | ScalarType::U32
            | ScalarType::U64
            | ScalarType::U128
            | ScalarType::I8
            | ScalarType::I16
            | ScalarType::I32
            | ScalarType::I64
            | ScalarType::I128 => TypeClass::Numeric,
            ScalarType::Bool => TypeClass::Boolean,
            ScalarType::BytesFixed(_)
            | ScalarType::Bytes
            | ScalarType::Account
            | ScalarType::Opaque => TypeClass::Text,
        }
    }
}

/// A single declared event field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventField {
    /// Field name.
    pub name: String,
    /// Resolved scalar type.
    pub ty: ScalarType,
}

/// One event declared by a contract, in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDecl {
    /// Event name (the descriptor's `label`).
    pub name: String,
    /// Declared fields, in payload order.
    pub fields: Vec<EventField>,
}

impl EventDecl {
    /// Looks up a declared field by name.
    pub fn field(&self, name: &str) -> Option<&EventField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The ordered event schema of a contract, resolved from its descriptor.
///
/// The position of an event in `events` is its dispatch index: the first
/// byte of an emitted payload selects the declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSchema {
    /// Declared events, in descriptor order.
    pub events: Vec<EventDecl>,
}

impl EventSchema {
    /// Looks up an event by name.
    pub fn event(&self, name: &str) -> Option<&EventDecl> {
        self.events.iter().find(|e| e.name == name)
    }

    /// Looks up an event by its dispatch index.
    pub fn event_at(&self, index: usize) -> Option<&EventDecl> {
        self.events.get(index)
    }
}
