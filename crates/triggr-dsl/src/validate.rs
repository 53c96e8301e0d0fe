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

use triggr_types::{is_valid_collection_name, EventSchema, TypeClass};

use crate::ast::*;
use crate::{Cond, DslError, ErrorKind, Operand, RuleNode, RuleTree, Target};

/// Validates a parsed program against the project's contract schema and
/// compiles it to a [`RuleTree`].
///
/// The `const events` header, when present, is console tooling; schema
/// resolution runs against `schema` alone. The header only participates
/// as a fallback for naming the bound event when every reference uses the
/// legacy `event.<field>` form.
pub fn compile_program(
    program: &Program,
    schema: &EventSchema,
) -> Result<RuleTree, DslError> {
    let refs = collect_refs(&program.body);
    let bound_event = resolve_bound_event(program, schema, &refs)?;

    let ctx = Ctx {
        schema,
        bound_event: &bound_event,
    };
    let root = RuleNode::Seq(
        program
            .body
            .iter()
            .map(|stmt| ctx.compile_stmt(stmt))
            .collect::<Result<_, _>>()?,
    );
    Ok(RuleTree { bound_event, root })
}

struct Ctx<'a> {
    schema: &'a EventSchema,
    bound_event: &'a str,
}

impl Ctx<'_> {
    fn compile_stmt(&self, stmt: &Stmt) -> Result<RuleNode, DslError> {
        match stmt {
            Stmt::Insert {
                collection,
                id,
                fields,
                line,
            } => {
                self.check_collection(collection, *line)?;
                Ok(RuleNode::Insert {
                    collection: collection.clone(),
                    doc_id: id
                        .as_ref()
                        .map(|id| self.compile_id(id))
                        .transpose()?,
                    fields: self.compile_fields(fields)?,
                })
            }
            Stmt::Update {
                collection,
                id,
                fields,
                line,
            } => {
                self.check_collection(collection, *line)?;
                Ok(RuleNode::Update {
                    collection: collection.clone(),
                    doc_id: self.compile_id(id)?,
                    fields: self.compile_fields(fields)?,
                })
            }
            Stmt::Delete {
                collection,
                id,
                line,
            } => {
                self.check_collection(collection, *line)?;
                Ok(RuleNode::Delete {
                    collection: collection.clone(),
                    doc_id: self.compile_id(id)?,
                })
            }
            Stmt::If {
                cond,
                then,
                otherwise,
                ..
            } => {
                let cond = self.compile_cond(cond)?;
                let then = RuleNode::Seq(
                    then.iter()
                        .map(|s| self.compile_stmt(s))
                        .collect::<Result<_, _>>()?,
                );
                let otherwise = otherwise
                    .as_ref()
                    .map(|stmts| {
                        stmts
                            .iter()
                            .map(|s| self.compile_stmt(s))
                            .collect::<Result<Vec<_>, _>>()
                            .map(|nodes| Box::new(RuleNode::Seq(nodes)))
                    })
                    .transpose()?;
                Ok(RuleNode::If {
                    cond,
                    then: Box::new(then),
                    otherwise,
                })
            }
        }
    }

    fn check_collection(
        &self,
        collection: &str,
        line: u32,
    ) -> Result<(), DslError> {
        if is_valid_collection_name(collection) {
            Ok(())
        } else {
            Err(DslError::new(
                line,
                ErrorKind::InvalidCollection(collection.to_string()),
            ))
        }
    }

    /// Resolves a field reference against the bound event, yielding the
    /// field name the evaluator will substitute.
    fn resolve_ref(&self, fref: &FieldRef) -> Result<String, DslError> {
        let event_name = fref.event.as_deref().unwrap_or(self.bound_event);
        let decl = self.schema.event(event_name).ok_or_else(|| {
            DslError::new(
                fref.line,
                ErrorKind::UnknownEvent(event_name.to_string()),
            )
        })?;
        if decl.field(&fref.field).is_none() {
            return Err(DslError::new(
                fref.line,
                ErrorKind::UnknownField {
                    event: event_name.to_string(),
                    field: fref.field.clone(),
                },
            ));
        }
        Ok(fref.field.clone())
    }

    fn compile_id(&self, id: &IdExpr) -> Result<Target, DslError> {
        match id {
            IdExpr::Literal(s) => Ok(Target::Literal(s.clone())),
            IdExpr::Field(fref) => {
                Ok(Target::EventField(self.resolve_ref(fref)?))
            }
        }
    }

    fn compile_fields(
        &self,
        fields: &[(String, Expr)],
    ) -> Result<Vec<(String, Operand)>, DslError> {
        fields
            .iter()
            .map(|(name, expr)| {
                Ok((name.clone(), self.compile_expr(expr)?))
            })
            .collect()
    }

    fn compile_expr(&self, expr: &Expr) -> Result<Operand, DslError> {
        match expr {
            Expr::Int(v) => Ok(Operand::Int(*v)),
            Expr::Str(s) => Ok(Operand::Str(s.clone())),
            Expr::Bool(b) => Ok(Operand::Bool(*b)),
            Expr::Field(fref) => {
                Ok(Operand::EventField(self.resolve_ref(fref)?))
            }
        }
    }

    fn operand_class(&self, operand: &Operand) -> TypeClass {
        match operand {
            Operand::Int(_) => TypeClass::Numeric,
            Operand::Str(_) => TypeClass::Text,
            Operand::Bool(_) => TypeClass::Boolean,
            Operand::EventField(field) => self
                .schema
                .event(self.bound_event)
                .and_then(|e| e.field(field))
                .map(|f| f.ty.class())
                // resolve_ref already proved the field exists
                .unwrap_or(TypeClass::Text),
        }
    }

    fn compile_cond(&self, cond: &CondExpr) -> Result<Cond, DslError> {
        let lhs = self.compile_expr(&cond.lhs)?;
        let rhs = self.compile_expr(&cond.rhs)?;
        let (lc, rc) = (self.operand_class(&lhs), self.operand_class(&rhs));
        if lc != rc {
            return Err(DslError::new(
                cond.line,
                ErrorKind::TypeMismatch {
                    lhs: class_name(lc).into(),
                    rhs: class_name(rc).into(),
                },
            ));
        }
        if lc == TypeClass::Boolean && cond.op.is_ordering() {
            return Err(DslError::new(cond.line, ErrorKind::BadBoolComparison));
        }
        Ok(Cond {
            lhs,
            op: cond.op,
            rhs,
        })
    }
}

fn class_name(class: TypeClass) -> &'static str {
    match class {
        TypeClass::Numeric => "numeric",
        TypeClass::Text => "string",
        TypeClass::Boolean => "boolean",
    }
}

fn collect_refs(body: &[Stmt]) -> Vec<FieldRef> {
    let mut refs = Vec::new();
    fn push_expr(refs: &mut Vec<FieldRef>, expr: &Expr) {
        if let Expr::Field(fref) = expr {
            refs.push(fref.clone());
        }
    }
    fn push_id(refs: &mut Vec<FieldRef>, id: &IdExpr) {
        if let IdExpr::Field(fref) = id {
            refs.push(fref.clone());
        }
    }
    fn walk(refs: &mut Vec<FieldRef>, stmts: &[Stmt]) {
        for stmt in stmts {
            match stmt {
                Stmt::Insert { id, fields, .. } => {
                    if let Some(id) = id {
                        push_id(refs, id);
                    }
                    for (_, expr) in fields {
                        push_expr(refs, expr);
                    }
                }
                Stmt::Update { id, fields, .. } => {
                    push_id(refs, id);
                    for (_, expr) in fields {
                        push_expr(refs, expr);
                    }
                }
                Stmt::Delete { id, .. } => push_id(refs, id),
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                    ..
                } => {
                    push_expr(refs, &cond.lhs);
                    push_expr(refs, &cond.rhs);
                    walk(refs, then);
                    if let Some(stmts) = otherwise {
                        walk(refs, stmts);
                    }
                }
            }
        }
    }
    walk(&mut refs, body);
    refs
}

/// Picks the single event the program reads, which becomes the router's
/// indexing key.
fn resolve_bound_event(
    program: &Program,
    schema: &EventSchema,
    refs: &[FieldRef],
) -> Result<String, DslError> {
    // explicit `events.<E>` references are authoritative
    let mut explicit: Option<(&str, u32)> = None;
    for fref in refs {
        if let Some(event) = fref.event.as_deref() {
            match explicit {
                None => explicit = Some((event, fref.line)),
                Some((first, _)) if first != event => {
                    return Err(DslError::new(
                        fref.line,
                        ErrorKind::MultipleEvents(
                            first.to_string(),
                            event.to_string(),
                        ),
                    ))
                }
                Some(_) => {}
            }
        }
    }
    if let Some((event, line)) = explicit {
        if schema.event(event).is_none() {
            return Err(DslError::new(
                line,
                ErrorKind::UnknownEvent(event.to_string()),
            ));
        }
        return Ok(event.to_string());
    }

    // only legacy `event.<field>` references: the event must be nameable
    // from the header or an unambiguous schema
    let first_legacy = match refs.first() {
        Some(fref) => fref,
        None => return Err(DslError::new(1, ErrorKind::NoBoundEvent)),
    };
    if program.event_decls.len() == 1 {
        let name = &program.event_decls[0].name;
        if schema.event(name).is_none() {
            return Err(DslError::new(
                program.event_decls[0].line,
                ErrorKind::UnknownEvent(name.clone()),
            ));
        }
        return Ok(name.clone());
    }
    if schema.events.len() == 1 {
        return Ok(schema.events[0].name.clone());
    }
    Err(DslError::new(
        first_legacy.line,
        ErrorKind::AmbiguousEvent(first_legacy.field.clone()),
    ))
}
