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

use async_trait::async_trait;
use serde_json::{Map, Value};

use triggr_types::{DecodedEvent, MAX_SAFE_JSON_INT};
use triggr_utils::{Error, Result};

use crate::ast::CmpOp;
use crate::{Cond, Operand, RuleNode, RuleTree, Target};

/// The storage seam the evaluator drives.
///
/// Implemented over the document store by the trigger router; tests plug
/// in recording mocks. Mutations apply immediately, one statement at a
/// time, so later statements observe the effects of earlier ones.
#[async_trait]
pub trait Mutator: Send + Sync {
    /// Insert a document; `doc_id` of `None` asks the store to generate
    /// a fresh UUID.
    async fn insert(
        &self,
        collection: &str,
        doc_id: Option<String>,
        fields: Map<String, Value>,
    ) -> Result<()>;

    /// Shallow-merge fields into an existing document.
    async fn update(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
    ) -> Result<()>;

    /// Delete a document.
    async fn delete(&self, collection: &str, doc_id: &str) -> Result<()>;
}

/// Executes a rule tree against a decoded event.
///
/// Statements run in textual order; the first failing statement aborts
/// the rest of the tree and surfaces its error to the caller.
pub async fn evaluate<M: Mutator>(
    tree: &RuleTree,
    event: &DecodedEvent,
    mutator: &M,
) -> Result<()> {
    eval_node(&tree.root, event, mutator).await
}

/// Boxed recursion keeps the future sizable for arbitrarily nested `if`s.
fn eval_node<'a, M: Mutator>(
    node: &'a RuleNode,
    event: &'a DecodedEvent,
    mutator: &'a M,
) -> futures::future::BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        match node {
            RuleNode::Seq(nodes) => {
                for node in nodes {
                    eval_node(node, event, mutator).await?;
                }
                Ok(())
            }
            RuleNode::If {
                cond,
                then,
                otherwise,
            } => {
                if eval_cond(cond, event)? {
                    eval_node(then, event, mutator).await
                } else if let Some(otherwise) = otherwise {
                    eval_node(otherwise, event, mutator).await
                } else {
                    Ok(())
                }
            }
            RuleNode::Insert {
                collection,
                doc_id,
                fields,
            } => {
                let doc_id = doc_id
                    .as_ref()
                    .map(|t| resolve_target(t, event))
                    .transpose()?;
                let fields = resolve_fields(fields, event)?;
                mutator.insert(collection, doc_id, fields).await
            }
            RuleNode::Update {
                collection,
                doc_id,
                fields,
            } => {
                let doc_id = resolve_target(doc_id, event)?;
                let fields = resolve_fields(fields, event)?;
                mutator.update(collection, &doc_id, fields).await
            }
            RuleNode::Delete { collection, doc_id } => {
                let doc_id = resolve_target(doc_id, event)?;
                mutator.delete(collection, &doc_id).await
            }
        }
    })
}

/// Substitutes an operand with its runtime JSON value.
///
/// Integer literals wider than 53 bits become decimal strings; decoded
/// event values pass through as the ingester produced them.
fn resolve_operand(operand: &Operand, event: &DecodedEvent) -> Result<Value> {
    match operand {
        Operand::Int(v) => Ok(int_to_value(*v)),
        Operand::Str(s) => Ok(Value::String(s.clone())),
        Operand::Bool(b) => Ok(Value::Bool(*b)),
        Operand::EventField(field) => {
            event.field(field).cloned().ok_or_else(|| {
                Error::validation(format!(
                    "event {} carries no field {field}",
                    event.name
                ))
            })
        }
    }
}

/// Renders an integer as a JSON value, falling back to a decimal string
/// beyond the 53-bit safe range.
pub fn int_to_value(v: i128) -> Value {
    if v.unsigned_abs() <= MAX_SAFE_JSON_INT as u128 {
        Value::Number((v as i64).into())
    } else {
        Value::String(v.to_string())
    }
}

fn resolve_target(target: &Target, event: &DecodedEvent) -> Result<String> {
    match target {
        Target::Literal(s) => Ok(s.clone()),
        Target::EventField(field) => {
            let value = event.field(field).ok_or_else(|| {
                Error::validation(format!(
                    "event {} carries no field {field}",
                    event.name
                ))
            })?;
            Ok(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }
    }
}

fn resolve_fields(
    fields: &[(String, Operand)],
    event: &DecodedEvent,
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (name, operand) in fields {
        out.insert(name.clone(), resolve_operand(operand, event)?);
    }
    Ok(out)
}

fn eval_cond(cond: &Cond, event: &DecodedEvent) -> Result<bool> {
    let lhs = resolve_operand(&cond.lhs, event)?;
    let rhs = resolve_operand(&cond.rhs, event)?;
    compare(&lhs, &rhs, cond.op)
}

/// Compares two runtime values under the statically checked class rules.
/// Numeric strings (the >53-bit renderings) participate in numeric
/// comparisons.
fn compare(lhs: &Value, rhs: &Value, op: CmpOp) -> Result<bool> {
    if let (Some(l), Some(r)) = (as_int(lhs), as_int(rhs)) {
        return Ok(match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        });
    }
    match (lhs, rhs) {
        (Value::String(l), Value::String(r)) => Ok(match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        }),
        (Value::Bool(l), Value::Bool(r)) => match op {
            CmpOp::Eq => Ok(l == r),
            CmpOp::Ne => Ok(l != r),
            _ => Err(Error::validation("booleans only support == and !=")),
        },
        _ => Err(Error::validation(format!(
            "cannot compare {lhs} and {rhs}"
        ))),
    }
}

fn as_int(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.parse::<i128>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use triggr_types::{EventDecl, EventField, EventSchema, ScalarType};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Insert(String, Option<String>, Map<String, Value>),
        Update(String, String, Map<String, Value>),
        Delete(String, String),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl Mutator for Recorder {
        async fn insert(
            &self,
            collection: &str,
            doc_id: Option<String>,
            fields: Map<String, Value>,
        ) -> Result<()> {
            self.record(Call::Insert(collection.into(), doc_id, fields))
        }

        async fn update(
            &self,
            collection: &str,
            doc_id: &str,
            fields: Map<String, Value>,
        ) -> Result<()> {
            self.record(Call::Update(collection.into(), doc_id.into(), fields))
        }

        async fn delete(&self, collection: &str, doc_id: &str) -> Result<()> {
            self.record(Call::Delete(collection.into(), doc_id.into()))
        }
    }

    impl Recorder {
        fn record(&self, call: Call) -> Result<()> {
            let mut calls = self.calls.lock();
            if self.fail_on == Some(calls.len()) {
                return Err(Error::Storage("boom".into()));
            }
            calls.push(call);
            Ok(())
        }
    }

    fn schema() -> EventSchema {
        EventSchema {
            events: vec![EventDecl {
                name: "ValueChanged".into(),
                fields: vec![EventField {
                    name: "value".into(),
                    ty: ScalarType::U128,
                }],
            }],
        }
    }

    fn event(value: Value) -> DecodedEvent {
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), value);
        DecodedEvent {
            project_id: "p".into(),
            name: "ValueChanged".into(),
            fields,
            block_number: 7,
            extrinsic_index: Some(0),
        }
    }

    #[tokio::test]
    async fn auto_id_insert_substitutes_event_fields() {
        let (_, tree) = compile(
            "fn main(events) { insert @transactions: { v: events.ValueChanged.value } }",
            &schema(),
        )
        .unwrap();
        let recorder = Recorder::default();
        evaluate(&tree, &event(Value::from(42)), &recorder)
            .await
            .unwrap();

        let calls = recorder.calls.lock();
        match &calls[0] {
            Call::Insert(coll, id, fields) => {
                assert_eq!(coll, "transactions");
                assert!(id.is_none());
                assert_eq!(fields["v"], Value::from(42));
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn conditional_update_and_else_delete() {
        let (_, tree) = compile(
            r#"
            fn main(events) {
                if (events.ValueChanged.value > 200) {
                    update @users:u1 { score: events.ValueChanged.value }
                } else { delete @users:u9 }
            }
            "#,
            &schema(),
        )
        .unwrap();

        let recorder = Recorder::default();
        evaluate(&tree, &event(Value::from(250)), &recorder)
            .await
            .unwrap();
        assert_eq!(
            recorder.calls.lock().as_slice(),
            &[Call::Update(
                "users".into(),
                "u1".into(),
                [("score".to_string(), Value::from(250))]
                    .into_iter()
                    .collect()
            )]
        );

        let recorder = Recorder::default();
        evaluate(&tree, &event(Value::from(10)), &recorder)
            .await
            .unwrap();
        assert_eq!(
            recorder.calls.lock().as_slice(),
            &[Call::Delete("users".into(), "u9".into())]
        );
    }

    #[tokio::test]
    async fn big_integers_compare_as_numbers() {
        // decoded u128 values beyond 53 bits arrive as decimal strings
        let (_, tree) = compile(
            r#"
            fn main(events) {
                if (events.ValueChanged.value > 9_007_199_254_740_993) {
                    insert @whales: { v: events.ValueChanged.value }
                }
            }
            "#,
            &schema(),
        )
        .unwrap();

        let big = Value::String("340282366920938463463374607431768211455".into());
        let recorder = Recorder::default();
        evaluate(&tree, &event(big.clone()), &recorder).await.unwrap();
        let calls = recorder.calls.lock();
        match &calls[0] {
            Call::Insert(_, _, fields) => assert_eq!(fields["v"], big),
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn statements_run_in_order_and_abort_on_failure() {
        let (_, tree) = compile(
            r#"
            fn main(events) {
                insert @log:a { v: events.ValueChanged.value }
                insert @log:b { v: 2 }
                insert @log:c { v: 3 }
            }
            "#,
            &schema(),
        )
        .unwrap();

        let recorder = Recorder {
            fail_on: Some(1),
            ..Default::default()
        };
        let err = evaluate(&tree, &event(Value::from(1)), &recorder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        // only the first statement committed
        let calls = recorder.calls.lock();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], Call::Insert(_, Some(ref id), _) if id == "a"));
    }

    #[tokio::test]
    async fn event_field_targets_resolve_to_ids() {
        let with_who = EventSchema {
            events: vec![EventDecl {
                name: "Removed".into(),
                fields: vec![EventField {
                    name: "who".into(),
                    ty: ScalarType::Bytes,
                }],
            }],
        };
        let (_, tree) = compile(
            "fn main(events) { delete @users:events.Removed.who }",
            &with_who,
        )
        .unwrap();

        let mut fields = HashMap::new();
        fields.insert("who".to_string(), Value::String("u42".into()));
        let event = DecodedEvent {
            project_id: "p".into(),
            name: "Removed".into(),
            fields,
            block_number: 1,
            extrinsic_index: None,
        };
        let recorder = Recorder::default();
        evaluate(&tree, &event, &recorder).await.unwrap();
        assert_eq!(
            recorder.calls.lock().as_slice(),
            &[Call::Delete("users".into(), "u42".into())]
        );
    }

    #[test]
    fn int_rendering_honors_the_safe_range() {
        assert_eq!(int_to_value(42), Value::from(42));
        assert_eq!(int_to_value(-42), Value::from(-42));
        assert_eq!(
            int_to_value(9_007_199_254_740_993),
            Value::String("9007199254740993".into())
        );
    }
}
