// crates/runbook-kernel-core/src/template.rs
// ============================================================================
// Module: Template Evaluator
// Description: Expansion of `{{ ... }}` references with a small function set.
// Purpose: Resolve step templates against the variable scope with strict and
//          lenient missing-reference behavior.
// Dependencies: crate::scope, serde_json
// ============================================================================

//! ## Overview
//! Templates reference scope values (`{{ .name }}`, `{{ .a.b.c }}`) and call
//! a fixed function set (`eq`, `ne`, `gt`, `lt`, `contains`, `hasPrefix`,
//! `hasSuffix`, `default`, `index`). Literal strings without `{{` pass
//! through unchanged. A template that is exactly one expression yields the
//! raw value; embedded expressions concatenate stringified results.
//!
//! Strict expansion rejects unresolved references; lenient expansion (used
//! for boolean guards) renders them as `<no value>`, which evaluates false.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::scope::Scope;
use crate::scope::descend;
use crate::scope::lookup_path;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Rendering of an unresolved reference in lenient mode.
pub const NO_VALUE: &str = "<no value>";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by template parsing and evaluation.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template text is malformed.
    #[error("template parse error: {message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },
    /// An expression failed to evaluate.
    #[error("template eval error: {message}")]
    Eval {
        /// Evaluator diagnostic.
        message: String,
    },
    /// A reference did not resolve in the scope.
    #[error("unresolved reference '.{reference}'")]
    Unresolved {
        /// Dotted reference path without the leading dot.
        reference: String,
    },
    /// An unknown template function was called.
    #[error("unknown template function '{name}'")]
    UnknownFunction {
        /// Function identifier.
        name: String,
    },
}

// ============================================================================
// SECTION: Expansion
// ============================================================================

/// Expands a template strictly; unresolved references are errors.
///
/// # Errors
///
/// Returns [`TemplateError`] on malformed syntax, unknown functions, or
/// unresolved references.
pub fn expand(template: &str, scope: &Scope) -> Result<Value, TemplateError> {
    expand_mode(template, scope, true)
}

/// Expands a template leniently; unresolved references render `<no value>`.
///
/// # Errors
///
/// Returns [`TemplateError`] on malformed syntax or unknown functions.
pub fn expand_lenient(template: &str, scope: &Scope) -> Result<Value, TemplateError> {
    expand_mode(template, scope, false)
}

/// Evaluates a template as a boolean guard.
///
/// An empty template is true. Expansion is lenient; the result is false for
/// an empty string, `"false"`, and `"<no value>"`, true otherwise.
///
/// # Errors
///
/// Returns [`TemplateError`] on malformed syntax or unknown functions.
pub fn eval_bool(template: &str, scope: &Scope) -> Result<bool, TemplateError> {
    if template.trim().is_empty() {
        return Ok(true);
    }
    let rendered = stringify(&expand_lenient(template, scope)?);
    Ok(!rendered.is_empty() && rendered != "false" && rendered != NO_VALUE)
}

/// Resolves all string leaves of a mapping against the scope.
///
/// Non-string values pass through; nested objects and arrays are resolved
/// recursively.
///
/// # Errors
///
/// Returns [`TemplateError`] when any string leaf fails strict expansion.
pub fn resolve_map(
    map: &BTreeMap<String, Value>,
    scope: &Scope,
) -> Result<BTreeMap<String, Value>, TemplateError> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, scope)?)))
        .collect()
}

/// Resolves string leaves of a single value.
fn resolve_value(value: &Value, scope: &Scope) -> Result<Value, TemplateError> {
    match value {
        Value::String(text) => expand(text, scope),
        Value::Array(items) => Ok(Value::Array(
            items.iter().map(|item| resolve_value(item, scope)).collect::<Result<_, _>>()?,
        )),
        Value::Object(map) => Ok(Value::Object(
            map.iter()
                .map(|(key, item)| Ok((key.clone(), resolve_value(item, scope)?)))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other.clone()),
    }
}

/// Returns the dotted path when the template is exactly one bare reference.
#[must_use]
pub fn direct_reference(template: &str) -> Option<&str> {
    let trimmed = template.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?.trim();
    let reference = inner.strip_prefix('.')?;
    if reference.is_empty() || reference.chars().any(char::is_whitespace) {
        return None;
    }
    Some(reference)
}

/// Collects every dotted reference path used by a template.
///
/// Malformed templates yield whatever references precede the malformation;
/// the validator reports parse errors separately through expansion.
#[must_use]
pub fn collect_references(template: &str) -> Vec<String> {
    let mut references = Vec::new();
    for expression in expressions(template) {
        for token in tokenize(expression).unwrap_or_default() {
            if let Token::Reference(path) = token {
                references.push(path);
            }
        }
    }
    references
}

/// Renders a value as the string form used in comparisons and embedding.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}

// ============================================================================
// SECTION: Expression Scanning
// ============================================================================

/// Yields the inner text of every `{{ ... }}` expression in order.
fn expressions(template: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        out.push(&after[..end]);
        rest = &after[end + 2..];
    }
    out
}

/// Core expansion with selectable missing-reference behavior.
fn expand_mode(template: &str, scope: &Scope, strict: bool) -> Result<Value, TemplateError> {
    if !template.contains("{{") {
        return Ok(Value::String(template.to_string()));
    }

    let mut rendered = String::new();
    let mut sole_value: Option<Value> = None;
    let mut pieces = 0_usize;
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let literal = &rest[..start];
        if !literal.is_empty() {
            rendered.push_str(literal);
            if !literal.trim().is_empty() {
                pieces += 1;
            }
        }
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(TemplateError::Parse {
                message: "unterminated '{{' expression".to_string(),
            });
        };
        let value = eval_expression(&after[..end], scope, strict)?;
        rendered.push_str(&stringify(&value));
        pieces += 1;
        sole_value = Some(value);
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        rendered.push_str(rest);
        if !rest.trim().is_empty() {
            pieces += 1;
        }
    }

    match (pieces, sole_value) {
        (1, Some(value)) if template.trim().starts_with("{{") => Ok(value),
        _ => Ok(Value::String(rendered)),
    }
}

// ============================================================================
// SECTION: Expression Evaluation
// ============================================================================

/// Lexical token within an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Dotted reference path without the leading dot.
    Reference(String),
    /// Quoted string literal.
    Quoted(String),
    /// Bare word (function name or literal).
    Bare(String),
}

/// Tokenizes an expression into references, quoted strings, and bare words.
fn tokenize(expression: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();
    while let Some(&next) = chars.peek() {
        if next.is_whitespace() {
            chars.next();
            continue;
        }
        if next == '"' {
            chars.next();
            let mut literal = String::new();
            let mut closed = false;
            loop {
                match chars.next() {
                    Some('"') => {
                        closed = true;
                        break;
                    }
                    Some('\\') => {
                        if let Some(escaped) = chars.next() {
                            literal.push(escaped);
                        }
                    }
                    Some(other) => literal.push(other),
                    None => break,
                }
            }
            if !closed {
                return Err(TemplateError::Parse {
                    message: "unterminated string literal".to_string(),
                });
            }
            tokens.push(Token::Quoted(literal));
            continue;
        }
        let mut word = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_whitespace() {
                break;
            }
            word.push(ch);
            chars.next();
        }
        if let Some(path) = word.strip_prefix('.') {
            if path.is_empty() {
                return Err(TemplateError::Parse {
                    message: "empty reference '.'".to_string(),
                });
            }
            tokens.push(Token::Reference(path.to_string()));
        } else {
            tokens.push(Token::Bare(word));
        }
    }
    Ok(tokens)
}

/// Evaluates a single expression.
fn eval_expression(expression: &str, scope: &Scope, strict: bool) -> Result<Value, TemplateError> {
    let tokens = tokenize(expression)?;
    match tokens.as_slice() {
        [] => Ok(Value::String(String::new())),
        [single] => eval_token(single, scope, strict),
        [Token::Bare(name), args @ ..] => eval_function(name, args, scope, strict),
        [first, ..] => Err(TemplateError::Parse {
            message: format!("expected function name, found {first:?}"),
        }),
    }
}

/// Evaluates one token to a value.
fn eval_token(token: &Token, scope: &Scope, strict: bool) -> Result<Value, TemplateError> {
    match token {
        Token::Reference(path) => match lookup_path(scope, path) {
            Some(value) => Ok(value.clone()),
            None if strict => Err(TemplateError::Unresolved {
                reference: path.clone(),
            }),
            None => Ok(Value::String(NO_VALUE.to_string())),
        },
        Token::Quoted(text) | Token::Bare(text) => Ok(Value::String(text.clone())),
    }
}

/// Evaluates a function call expression.
fn eval_function(
    name: &str,
    args: &[Token],
    scope: &Scope,
    strict: bool,
) -> Result<Value, TemplateError> {
    match name {
        "eq" | "ne" | "gt" | "lt" | "contains" | "hasPrefix" | "hasSuffix" => {
            let [left, right] = args else {
                return Err(TemplateError::Eval {
                    message: format!("{name} expects exactly two arguments"),
                });
            };
            let left = stringify(&eval_token(left, scope, strict)?);
            let right = stringify(&eval_token(right, scope, strict)?);
            let result = match name {
                "eq" => left == right,
                "ne" => left != right,
                "gt" => left > right,
                "lt" => left < right,
                "contains" => left.contains(&right),
                "hasPrefix" => left.starts_with(&right),
                _ => left.ends_with(&right),
            };
            Ok(Value::Bool(result))
        }
        "default" => {
            let [primary, fallback] = args else {
                return Err(TemplateError::Eval {
                    message: "default expects exactly two arguments".to_string(),
                });
            };
            let value = eval_token(primary, scope, false)?;
            let rendered = stringify(&value);
            if rendered.is_empty() || rendered == NO_VALUE {
                eval_token(fallback, scope, strict)
            } else {
                Ok(value)
            }
        }
        "index" => {
            let [collection, keys @ ..] = args else {
                return Err(TemplateError::Eval {
                    message: "index expects a collection argument".to_string(),
                });
            };
            if keys.is_empty() {
                return Err(TemplateError::Eval {
                    message: "index expects at least one key".to_string(),
                });
            }
            let mut current = eval_token(collection, scope, strict)?;
            for key in keys {
                let segment = stringify(&eval_token(key, scope, strict)?);
                match descend(&current, &segment) {
                    Some(value) => current = value.clone(),
                    None if strict => {
                        return Err(TemplateError::Eval {
                            message: format!("index: no element '{segment}'"),
                        });
                    }
                    None => return Ok(Value::String(NO_VALUE.to_string())),
                }
            }
            Ok(current)
        }
        other => Err(TemplateError::UnknownFunction {
            name: other.to_string(),
        }),
    }
}
