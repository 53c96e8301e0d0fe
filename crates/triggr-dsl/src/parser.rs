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

use crate::ast::*;
use crate::token::{Tok, Token};
use crate::{DslError, ErrorKind};

/// Parses a token stream into a [`Program`].
///
/// Grammar, in source order:
///
/// ```text
/// program     := [ "const" "events" "=" "[" event_decls "]" ] fn_main
/// fn_main     := "fn" "main" "(" "events" ")" block
/// block       := "{" stmt* "}"
/// stmt        := insert | update | delete | if
/// insert      := "insert" "@" coll [":" id] ["with"] "{" fields "}"
/// update      := "update" "@" coll ":" id ["with"] "{" fields "}"
/// delete      := "delete" "@" coll ":" id
/// if          := "if" "(" expr cmp expr ")" block ["else" block]
/// ```
pub fn parse(tokens: &[Token]) -> Result<Program, DslError> {
    let mut p = Parser { tokens, pos: 0 };
    let program = p.program()?;
    Ok(program)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn line(&self) -> u32 {
        self.peek()
            .map(|t| t.line)
            .or_else(|| self.tokens.last().map(|t| t.line))
            .unwrap_or(1)
    }

    fn err(&self, expected: &str) -> DslError {
        let (line, found) = match self.peek() {
            Some(t) => (t.line, t.tok.to_string()),
            None => (self.line(), "end of input".to_string()),
        };
        DslError::new(
            line,
            ErrorKind::Expected {
                expected: expected.to_string(),
                found,
            },
        )
    }

    fn expect(&mut self, tok: &Tok, expected: &str) -> Result<u32, DslError> {
        match self.peek() {
            Some(t) if &t.tok == tok => {
                self.pos += 1;
                Ok(t.line)
            }
            _ => Err(self.err(expected)),
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<u32, DslError> {
        match self.peek() {
            Some(t) if t.tok == Tok::Ident(word.to_string()) => {
                self.pos += 1;
                Ok(t.line)
            }
            _ => Err(self.err(&format!("`{word}`"))),
        }
    }

    fn ident(&mut self, expected: &str) -> Result<(String, u32), DslError> {
        match self.peek() {
            Some(Token {
                tok: Tok::Ident(s),
                line,
            }) => {
                self.pos += 1;
                Ok((s.clone(), *line))
            }
            _ => Err(self.err(expected)),
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token { tok: Tok::Ident(s), .. }) if s == word)
    }

    fn program(&mut self) -> Result<Program, DslError> {
        let event_decls = if self.at_keyword("const") {
            self.const_events()?
        } else {
            Vec::new()
        };

        self.expect_keyword("fn")?;
        match self.ident("`main`")? {
            (name, _) if name == "main" => {}
            (name, line) => {
                return Err(DslError::new(
                    line,
                    ErrorKind::BadMain(format!(
                        "expected `fn main`, found `fn {name}`"
                    )),
                ))
            }
        }
        self.expect(&Tok::LParen, "`(`")?;
        match self.ident("parameter `events`")? {
            (param, _) if param == "events" => {}
            (param, line) => {
                return Err(DslError::new(
                    line,
                    ErrorKind::BadMain(format!(
                        "`main` takes a single parameter named `events`, found `{param}`"
                    )),
                ))
            }
        }
        self.expect(&Tok::RParen, "`)`")?;
        let body = self.block()?;

        if let Some(t) = self.peek() {
            if t.tok == Tok::Ident("fn".into()) {
                return Err(DslError::new(
                    t.line,
                    ErrorKind::BadMain(
                        "`main` must be the only top-level function".into(),
                    ),
                ));
            }
            return Err(self.err("end of program"));
        }
        Ok(Program { event_decls, body })
    }

    /// `const events = [ Name { f1, f2 }, ... ]`
    fn const_events(&mut self) -> Result<Vec<EventDeclAst>, DslError> {
        self.expect_keyword("const")?;
        self.expect_keyword("events")?;
        self.expect(&Tok::Assign, "`=`")?;
        self.expect(&Tok::LBracket, "`[`")?;

        let mut decls: Vec<EventDeclAst> = Vec::new();
        loop {
            if self.peek().map(|t| &t.tok) == Some(&Tok::RBracket) {
                self.next();
                break;
            }
            let (name, line) = self.ident("an event name")?;
            self.expect(&Tok::LBrace, "`{`")?;
            let mut fields = Vec::new();
            loop {
                match self.peek().map(|t| &t.tok) {
                    Some(Tok::RBrace) => {
                        self.next();
                        break;
                    }
                    Some(Tok::Ident(_)) => {
                        let (field, _) = self.ident("a field name")?;
                        fields.push(field);
                        if self.peek().map(|t| &t.tok) == Some(&Tok::Comma) {
                            self.next();
                        }
                    }
                    _ => return Err(self.err("a field name or `}`")),
                }
            }
            if fields.is_empty() {
                return Err(DslError::new(line, ErrorKind::EmptyEvent(name)));
            }
            if decls.iter().any(|d| d.name == name) {
                return Err(DslError::new(
                    line,
                    ErrorKind::DuplicateEvent(name),
                ));
            }
            decls.push(EventDeclAst { name, fields, line });

            if self.peek().map(|t| &t.tok) == Some(&Tok::Comma) {
                self.next();
            }
        }
        Ok(decls)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, DslError> {
        self.expect(&Tok::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Some(Token {
                    tok: Tok::RBrace, ..
                }) => {
                    self.next();
                    return Ok(stmts);
                }
                Some(_) => stmts.push(self.stmt()?),
                None => return Err(self.err("`}`")),
            }
        }
    }

    fn stmt(&mut self) -> Result<Stmt, DslError> {
        match self.peek() {
            Some(Token { tok: Tok::Ident(word), line }) => {
                let line = *line;
                match word.as_str() {
                    "insert" => self.insert_stmt(line),
                    "update" => self.update_stmt(line),
                    "delete" => self.delete_stmt(line),
                    "if" => self.if_stmt(line),
                    _ => Err(self.err(
                        "a statement (`insert`, `update`, `delete` or `if`)",
                    )),
                }
            }
            _ => Err(self
                .err("a statement (`insert`, `update`, `delete` or `if`)")),
        }
    }

    /// `@<coll>[:<id>]`; `id_required` distinguishes update/delete from
    /// insert.
    fn target(
        &mut self,
        id_required: bool,
    ) -> Result<(String, Option<IdExpr>), DslError> {
        self.expect(&Tok::At, "`@`")?;
        let (collection, _) = self.ident("a collection name")?;
        if self.peek().map(|t| &t.tok) == Some(&Tok::Colon) {
            self.next();
            // `insert @coll: { ... }` leaves the id slot empty
            if !id_required
                && self.peek().map(|t| &t.tok) == Some(&Tok::LBrace)
            {
                return Ok((collection, None));
            }
            let id = self.id_expr()?;
            Ok((collection, Some(id)))
        } else if id_required {
            Err(self.err("`:<id>`"))
        } else {
            Ok((collection, None))
        }
    }

    fn id_expr(&mut self) -> Result<IdExpr, DslError> {
        let (first, line) = self.ident("a document id")?;
        if self.peek().map(|t| &t.tok) == Some(&Tok::Dot) {
            let fref = self.field_ref(first, line)?;
            Ok(IdExpr::Field(fref))
        } else {
            Ok(IdExpr::Literal(first))
        }
    }

    /// Parses the dotted tail of `events.<E>.<f>` / `event.<f>`, with
    /// `head` already consumed.
    fn field_ref(
        &mut self,
        head: String,
        line: u32,
    ) -> Result<FieldRef, DslError> {
        self.expect(&Tok::Dot, "`.`")?;
        let (second, _) = self.ident("an event or field name")?;
        match head.as_str() {
            "events" => {
                self.expect(&Tok::Dot, "`.` (events.<Event>.<field>)")?;
                let (field, _) = self.ident("a field name")?;
                Ok(FieldRef {
                    event: Some(second),
                    field,
                    line,
                })
            }
            "event" => Ok(FieldRef {
                event: None,
                field: second,
                line,
            }),
            _ => Err(DslError::new(
                line,
                ErrorKind::Expected {
                    expected: "`events.<Event>.<field>` or `event.<field>`"
                        .into(),
                    found: format!("`{head}.{second}`"),
                },
            )),
        }
    }

    fn expr(&mut self) -> Result<Expr, DslError> {
        match self.peek() {
            Some(Token { tok: Tok::Int(v), .. }) => {
                let v = *v;
                self.next();
                Ok(Expr::Int(v))
            }
            Some(Token { tok: Tok::Str(s), .. }) => {
                let s = s.clone();
                self.next();
                Ok(Expr::Str(s))
            }
            Some(Token { tok: Tok::Ident(word), line }) => {
                let line = *line;
                match word.as_str() {
                    "true" => {
                        self.next();
                        Ok(Expr::Bool(true))
                    }
                    "false" => {
                        self.next();
                        Ok(Expr::Bool(false))
                    }
                    _ => {
                        let (head, _) = self.ident("an expression")?;
                        let fref = self.field_ref(head, line)?;
                        Ok(Expr::Field(fref))
                    }
                }
            }
            _ => Err(self.err("an expression")),
        }
    }

    /// `{ name: expr, ... }` with trailing commas permitted. An optional
    /// leading `with` keyword is accepted as a synonym.
    fn field_list(&mut self) -> Result<Vec<(String, Expr)>, DslError> {
        if self.at_keyword("with") {
            self.next();
        }
        self.expect(&Tok::LBrace, "`{`")?;
        let mut fields = Vec::new();
        loop {
            match self.peek().map(|t| &t.tok) {
                Some(Tok::RBrace) => {
                    self.next();
                    return Ok(fields);
                }
                Some(Tok::Ident(_)) => {
                    let (name, _) = self.ident("a field name")?;
                    self.expect(&Tok::Colon, "`:`")?;
                    let value = self.expr()?;
                    fields.push((name, value));
                    match self.peek().map(|t| &t.tok) {
                        Some(Tok::Comma) => {
                            self.next();
                        }
                        Some(Tok::RBrace) => {}
                        _ => return Err(self.err("`,` or `}`")),
                    }
                }
                _ => return Err(self.err("a field name or `}`")),
            }
        }
    }

    fn insert_stmt(&mut self, line: u32) -> Result<Stmt, DslError> {
        self.expect_keyword("insert")?;
        let (collection, id) = self.target(false)?;
        let fields = self.field_list()?;
        Ok(Stmt::Insert {
            collection,
            id,
            fields,
            line,
        })
    }

    fn update_stmt(&mut self, line: u32) -> Result<Stmt, DslError> {
        self.expect_keyword("update")?;
        let (collection, id) = self.target(true)?;
        let id = id.expect("target(true) always yields an id");
        let fields = self.field_list()?;
        Ok(Stmt::Update {
            collection,
            id,
            fields,
            line,
        })
    }

    fn delete_stmt(&mut self, line: u32) -> Result<Stmt, DslError> {
        self.expect_keyword("delete")?;
        let (collection, id) = self.target(true)?;
        let id = id.expect("target(true) always yields an id");
        Ok(Stmt::Delete {
            collection,
            id,
            line,
        })
    }

    fn if_stmt(&mut self, line: u32) -> Result<Stmt, DslError> {
        self.expect_keyword("if")?;
        self.expect(&Tok::LParen, "`(`")?;
        let cond_line = self.line();
        let lhs = self.expr()?;
        let op = match self.peek().map(|t| &t.tok) {
            Some(Tok::EqEq) => CmpOp::Eq,
            Some(Tok::Ne) => CmpOp::Ne,
            Some(Tok::Lt) => CmpOp::Lt,
            Some(Tok::Le) => CmpOp::Le,
            Some(Tok::Gt) => CmpOp::Gt,
            Some(Tok::Ge) => CmpOp::Ge,
            _ => return Err(self.err("a comparison operator")),
        };
        self.next();
        let rhs = self.expr()?;
        self.expect(&Tok::RParen, "`)`")?;
        let then = self.block()?;
        let otherwise = if self.at_keyword("else") {
            self.next();
            Some(self.block()?)
        } else {
            None
        };
        Ok(Stmt::If {
            cond: CondExpr {
                lhs,
                op,
                rhs,
                line: cond_line,
            },
            then,
            otherwise,
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::lex;

    fn parse_src(src: &str) -> Result<Program, DslError> {
        parse(&lex(src).unwrap())
    }

    #[test]
    fn parses_the_canonical_program() {
        let program = parse_src(
            r#"
            const events = [
                ValueChanged { value },
                Transferred { to, amount },
            ]

            fn main(events) {
                if (events.ValueChanged.value > 200) {
                    update @users:u1 { score: events.ValueChanged.value }
                } else {
                    delete @users:u9
                }
            }
            "#,
        )
        .unwrap();

        assert_eq!(program.event_decls.len(), 2);
        assert_eq!(program.event_decls[1].fields, vec!["to", "amount"]);
        assert_eq!(program.body.len(), 1);
        match &program.body[0] {
            Stmt::If { cond, then, otherwise, .. } => {
                assert_eq!(cond.op, CmpOp::Gt);
                assert_eq!(cond.rhs, Expr::Int(200));
                assert_eq!(then.len(), 1);
                assert_eq!(otherwise.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn insert_without_id_and_with_trailing_colon() {
        let program = parse_src(
            "fn main(events) {\n  insert @txs { v: 1 }\n  insert @txs: { v: 2 }\n}",
        )
        .unwrap();
        for stmt in &program.body {
            match stmt {
                Stmt::Insert { id, .. } => assert!(id.is_none()),
                other => panic!("expected insert, got {other:?}"),
            }
        }
    }

    #[test]
    fn with_is_accepted_before_the_field_list() {
        let program = parse_src(
            "fn main(events) { update @users:u1 with { score: 9 } }",
        )
        .unwrap();
        match &program.body[0] {
            Stmt::Update { fields, .. } => {
                assert_eq!(fields, &vec![("score".to_string(), Expr::Int(9))])
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn dotted_id_targets_parse_as_event_fields() {
        let program = parse_src(
            "fn main(events) { delete @users:events.Removed.who }",
        )
        .unwrap();
        match &program.body[0] {
            Stmt::Delete { id: IdExpr::Field(fref), .. } => {
                assert_eq!(fref.event.as_deref(), Some("Removed"));
                assert_eq!(fref.field, "who");
            }
            other => panic!("expected delete with field id, got {other:?}"),
        }
    }

    #[test]
    fn legacy_event_form_parses() {
        let program =
            parse_src("fn main(events) { insert @a { v: event.value } }")
                .unwrap();
        match &program.body[0] {
            Stmt::Insert { fields, .. } => match &fields[0].1 {
                Expr::Field(fref) => {
                    assert_eq!(fref.event, None);
                    assert_eq!(fref.field, "value");
                }
                other => panic!("expected field ref, got {other:?}"),
            },
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn update_requires_an_id() {
        let err =
            parse_src("fn main(events) { update @users { a: 1 } }").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Expected { .. }));
    }

    #[test]
    fn main_must_be_the_only_function() {
        let err = parse_src(
            "fn main(events) {}\nfn helper(events) {}",
        )
        .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BadMain(_)));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn main_parameter_must_be_events() {
        let err = parse_src("fn main(evt) {}").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BadMain(_)));
    }

    #[test]
    fn missing_main_is_rejected() {
        let err = parse_src("const events = [ A { x } ]").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Expected { .. }));
    }

    #[test]
    fn duplicate_and_empty_event_decls_are_rejected() {
        let err = parse_src(
            "const events = [ A { x }, A { y } ]\nfn main(events) {}",
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateEvent("A".into()));

        let err = parse_src(
            "const events = [ A { } ]\nfn main(events) {}",
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmptyEvent("A".into()));
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = parse_src(
            "fn main(events) {\n  insert @users\n  { v: }\n}",
        )
        .unwrap_err();
        assert_eq!(err.line, 3);
    }
}
