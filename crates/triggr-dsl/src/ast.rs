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

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    /// Whether this operator orders its operands (rather than just
    /// testing equality).
    pub fn is_ordering(&self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge)
    }
}

/// A reference to an event field: `events.<Event>.<field>`, or the legacy
/// short form `event.<field>` with the event left implicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// The referenced event; `None` for the legacy `event.<field>` form.
    pub event: Option<String>,
    /// The referenced field.
    pub field: String,
    /// Source line of the reference.
    pub line: u32,
}

/// An expression: a literal or an event field reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Integer literal.
    Int(i128),
    /// String literal.
    Str(String),
    /// Boolean literal.
    Bool(bool),
    /// Event field reference.
    Field(FieldRef),
}

/// A document id position: a bareword literal or an event field reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdExpr {
    /// A literal id.
    Literal(String),
    /// An event field whose value becomes the id at execution time.
    Field(FieldRef),
}

/// A parsed comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondExpr {
    /// Left operand.
    pub lhs: Expr,
    /// Operator.
    pub op: CmpOp,
    /// Right operand.
    pub rhs: Expr,
    /// Source line of the comparison.
    pub line: u32,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// `insert @<coll>[:<id>] { ... }`
    Insert {
        /// Target collection.
        collection: String,
        /// Explicit id, when given.
        id: Option<IdExpr>,
        /// Field values, in source order.
        fields: Vec<(String, Expr)>,
        /// Source line.
        line: u32,
    },
    /// `update @<coll>:<id> { ... }`
    Update {
        /// Target collection.
        collection: String,
        /// Target id.
        id: IdExpr,
        /// Field values, in source order.
        fields: Vec<(String, Expr)>,
        /// Source line.
        line: u32,
    },
    /// `delete @<coll>:<id>`
    Delete {
        /// Target collection.
        collection: String,
        /// Target id.
        id: IdExpr,
        /// Source line.
        line: u32,
    },
    /// `if (<cond>) { ... } [else { ... }]`
    If {
        /// Branch condition.
        cond: CondExpr,
        /// The `then` body.
        then: Vec<Stmt>,
        /// The `else` body, when present.
        otherwise: Option<Vec<Stmt>>,
        /// Source line.
        line: u32,
    },
}

/// An entry of the optional `const events = [...]` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDeclAst {
    /// Declared event name.
    pub name: String,
    /// Declared field names.
    pub fields: Vec<String>,
    /// Source line of the declaration.
    pub line: u32,
}

/// A parsed trigger program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// The `const events` header, when present. Console-facing only; the
    /// schema check runs against the project's contract schema.
    pub event_decls: Vec<EventDeclAst>,
    /// The body of `main`, in source order.
    pub body: Vec<Stmt>,
}
