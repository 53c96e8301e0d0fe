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

#![warn(missing_docs)]
//! # Triggr DSL Module 🕸️
//!
//! The trigger language frontend and evaluator.
//!
//! ## Overview
//!
//! A trigger program is a single `fn main(events) { ... }` with an
//! optional leading `const events = [ ... ]` declaration block. The
//! frontend strips comments, lexes, parses and validates the program
//! against the owning project's contract event schema, and compiles it to
//! a [`RuleTree`]; the evaluator executes a rule tree against a decoded
//! chain event through the [`Mutator`] seam.
//!
//! Compilation is deterministic: the same source always yields the same
//! rule tree, bitwise-identical in its serialized form.

use serde::{Deserialize, Serialize};

/// Statement/expression syntax tree, produced by the parser.
pub mod ast;
/// The rule-tree evaluator.
pub mod eval;
/// The recursive-descent parser.
pub mod parser;
/// Comment stripping.
pub mod strip;
/// The lexer.
pub mod token;
/// Schema validation and rule-tree compilation.
pub mod validate;

pub use ast::{CmpOp, Program};
pub use eval::{evaluate, Mutator};
pub use strip::strip_comments;

/// Maximum accepted DSL source length in bytes.
pub const MAX_SOURCE_LEN: usize = 32 * 1024;

/// A structured DSL error, carrying the line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {kind}")]
pub struct DslError {
    /// 1-based line number in the stripped source.
    pub line: u32,
    /// What went wrong.
    pub kind: ErrorKind,
}

impl DslError {
    pub(crate) fn new(line: u32, kind: ErrorKind) -> Self {
        Self { line, kind }
    }
}

/// The kinds of DSL compilation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// The raw source exceeds [`MAX_SOURCE_LEN`].
    #[error("source exceeds {max} bytes")]
    SourceTooLong {
        /// The limit that was exceeded.
        max: usize,
    },
    /// A character the lexer does not understand.
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
    /// A string literal without a closing quote.
    #[error("unterminated string literal")]
    UnterminatedString,
    /// A `/* ... */` block without a closing `*/`.
    #[error("unterminated block comment")]
    UnterminatedComment,
    /// An integer literal outside the 128-bit range.
    #[error("integer literal out of range")]
    IntOutOfRange,
    /// A closing delimiter without its opener, or vice versa.
    #[error("unbalanced {0:?}")]
    Unbalanced(char),
    /// The parser expected one thing and found another.
    #[error("expected {expected}, found {found}")]
    Expected {
        /// What the grammar required here.
        expected: String,
        /// What was actually present.
        found: String,
    },
    /// Two `const events` entries share a name.
    #[error("duplicate event {0}")]
    DuplicateEvent(String),
    /// A `const events` entry declares no fields.
    #[error("event {0} declares no fields")]
    EmptyEvent(String),
    /// `main` is missing, duplicated, or not the only function.
    #[error("{0}")]
    BadMain(String),
    /// A reference to an event the contract schema does not declare.
    #[error("unknown event {0}")]
    UnknownEvent(String),
    /// A reference to a field the event does not declare.
    #[error("unknown field {field} on event {event}")]
    UnknownField {
        /// The event that was referenced.
        event: String,
        /// The missing field.
        field: String,
    },
    /// A storage target whose collection name breaks the grammar.
    #[error("invalid collection name {0:?}, expected [a-z0-9_]+")]
    InvalidCollection(String),
    /// The program reads from more than one event.
    #[error("trigger references more than one event: {0} and {1}")]
    MultipleEvents(String, String),
    /// The program reads from no event at all, so it could never fire.
    #[error("trigger must reference exactly one event")]
    NoBoundEvent,
    /// Legacy `event.<field>` references with several candidate events.
    #[error("`event.{0}` is ambiguous, qualify it as events.<Name>.{0}")]
    AmbiguousEvent(String),
    /// A comparison across incompatible operand types.
    #[error("type mismatch: cannot compare {lhs} and {rhs}")]
    TypeMismatch {
        /// The left operand's class.
        lhs: String,
        /// The right operand's class.
        rhs: String,
    },
    /// An ordering comparison on boolean operands.
    #[error("booleans only support == and !=")]
    BadBoolComparison,
}

/// Where a compiled storage target's document id comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// A bareword literal id.
    Literal(String),
    /// The value of a field on the bound event, at execution time.
    EventField(String),
}

/// A compiled operand: a literal, or a field of the bound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Integer literal.
    Int(i128),
    /// String literal.
    Str(String),
    /// Boolean literal.
    Bool(bool),
    /// A field of the bound event, substituted at execution time.
    EventField(String),
}

/// A compiled comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cond {
    /// Left operand.
    pub lhs: Operand,
    /// Comparison operator.
    pub op: CmpOp,
    /// Right operand.
    pub rhs: Operand,
}

/// A node of the compiled rule tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleNode {
    /// Statements executing in textual order.
    Seq(Vec<RuleNode>),
    /// A conditional branch.
    If {
        /// The branch condition.
        cond: Cond,
        /// Executed when the condition holds.
        then: Box<RuleNode>,
        /// Executed otherwise, when present.
        otherwise: Option<Box<RuleNode>>,
    },
    /// Insert a document.
    Insert {
        /// Target collection.
        collection: String,
        /// Explicit document id; a fresh UUID is generated when absent.
        doc_id: Option<Target>,
        /// Field values, in source order.
        fields: Vec<(String, Operand)>,
    },
    /// Shallow-merge fields into a document.
    Update {
        /// Target collection.
        collection: String,
        /// Target document id.
        doc_id: Target,
        /// Field values, in source order.
        fields: Vec<(String, Operand)>,
    },
    /// Delete a document.
    Delete {
        /// Target collection.
        collection: String,
        /// Target document id.
        doc_id: Target,
    },
}

/// A compiled trigger program: the rule tree plus its bound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTree {
    /// The single event the program reads; the router's indexing key.
    pub bound_event: String,
    /// The program body.
    pub root: RuleNode,
}

impl RuleTree {
    /// The canonical serialized form, used for determinism checks.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("rule trees always serialize")
    }
}

/// Compiles DSL source against a contract event schema.
///
/// Returns the stripped source (what gets stored) and the rule tree.
pub fn compile(
    source: &str,
    schema: &triggr_types::EventSchema,
) -> Result<(String, RuleTree), DslError> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(DslError::new(
            1,
            ErrorKind::SourceTooLong {
                max: MAX_SOURCE_LEN,
            },
        ));
    }
    let stripped = strip::strip_comments(source)?;
    let tokens = token::lex(&stripped)?;
    let program = parser::parse(&tokens)?;
    let tree = validate::compile_program(&program, schema)?;
    Ok((stripped, tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use triggr_types::{EventDecl, EventField, EventSchema, ScalarType};

    fn schema() -> EventSchema {
        EventSchema {
            events: vec![EventDecl {
                name: "ValueChanged".into(),
                fields: vec![EventField {
                    name: "value".into(),
                    ty: ScalarType::U64,
                }],
            }],
        }
    }

    #[test]
    fn compile_is_deterministic() {
        let src = r#"
            fn main(events) {
                if (events.ValueChanged.value > 200) {
                    update @users:u1 { score: events.ValueChanged.value }
                } else {
                    delete @users:u9
                }
            }
        "#;
        let (_, first) = compile(src, &schema()).unwrap();
        let (_, second) = compile(src, &schema()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_canonical_bytes(), second.to_canonical_bytes());
        assert_eq!(first.bound_event, "ValueChanged");
    }

    #[test]
    fn oversized_source_is_rejected_whole() {
        let mut src = String::from("fn main(events) {}");
        src.push_str(&" ".repeat(MAX_SOURCE_LEN));
        let err = compile(&src, &schema()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::SourceTooLong { .. }));
    }
}
