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

use crate::{DslError, ErrorKind};

/// Strips `// ...` and `/* ... */` comments from DSL source.
///
/// Newlines inside comments are preserved so that line numbers in later
/// diagnostics still refer to positions in the original program. Comment
/// markers inside string literals are left alone.
pub fn strip_comments(source: &str) -> Result<String, DslError> {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                line += 1;
                out.push('\n');
            }
            '"' | '\'' => {
                let quote = c;
                out.push(c);
                let mut escaped = false;
                loop {
                    match chars.next() {
                        Some('\n') | None => {
                            return Err(DslError::new(
                                line,
                                ErrorKind::UnterminatedString,
                            ))
                        }
                        Some(ch) => {
                            out.push(ch);
                            if escaped {
                                escaped = false;
                            } else if ch == '\\' {
                                escaped = true;
                            } else if ch == quote {
                                break;
                            }
                        }
                    }
                }
            }
            '/' => match chars.peek() {
                Some('/') => {
                    chars.next();
                    for ch in chars.by_ref() {
                        if ch == '\n' {
                            line += 1;
                            out.push('\n');
                            break;
                        }
                    }
                }
                Some('*') => {
                    let opened_on = line;
                    chars.next();
                    let mut closed = false;
                    while let Some(ch) = chars.next() {
                        match ch {
                            '\n' => {
                                line += 1;
                                out.push('\n');
                            }
                            '*' if chars.peek() == Some(&'/') => {
                                chars.next();
                                closed = true;
                                break;
                            }
                            _ => {}
                        }
                    }
                    if !closed {
                        return Err(DslError::new(
                            opened_on,
                            ErrorKind::UnterminatedComment,
                        ));
                    }
                }
                _ => out.push('/'),
            },
            _ => out.push(c),
        }
    }
    Ok(out)
}
