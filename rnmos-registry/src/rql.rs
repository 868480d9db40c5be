//! Resource Query Language
//!
//! `query.rql` carries a compact boolean/comparison DSL, e.g.
//!
//! ```text
//! and(eq(format,%22urn:x-nmos:format:video%22),matches(label,%22cam.*%22))
//! ```
//!
//! The string stays URI-encoded until it reaches [`parse`], because typed
//! values use encoded quotes. Field references are dotted paths evaluated
//! with the same array-searching extraction as the basic query engine, so a
//! comparison succeeds when any traversed element satisfies it.
//!
//! Supported operators: `eq`, `ne`, `gt`, `ge`, `lt`, `le`, `and`, `or`,
//! `not`, `matches` (regex), `contains`.

use crate::query;
use percent_encoding::percent_decode_str;
use rnmos_core::{ApiError, Result};
use serde_json::Value;

/// A parsed RQL expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// An operator call, e.g. `eq(label,"x")`
    Call { name: String, args: Vec<Expr> },
    /// A typed value: quoted string, number, boolean or null
    Literal(Value),
    /// A bare token; a field path or an unquoted string value by position
    Identifier(String),
}

/// Parse a URI-encoded RQL string
pub fn parse(encoded: &str) -> Result<Expr> {
    let decoded = percent_decode_str(encoded)
        .decode_utf8()
        .map_err(|e| ApiError::MalformedRequest(format!("bad query.rql encoding: {}", e)))?;
    let mut parser = Parser {
        input: decoded.chars().collect(),
        pos: 0,
    };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.input.len() {
        return Err(ApiError::MalformedRequest(format!(
            "trailing input in query.rql at offset {}",
            parser.pos
        )));
    }
    Ok(expr)
}

struct Parser {
    input: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        if self.peek() == Some('"') {
            return self.parse_string().map(Expr::Literal);
        }
        let token = self.parse_token()?;
        if self.peek() == Some('(') {
            self.bump();
            let mut args = Vec::new();
            if self.peek() == Some(')') {
                self.bump();
            } else {
                loop {
                    args.push(self.parse_expr()?);
                    match self.bump() {
                        Some(',') => continue,
                        Some(')') => break,
                        _ => {
                            return Err(ApiError::MalformedRequest(
                                "unterminated call in query.rql".to_string(),
                            ))
                        }
                    }
                }
            }
            Ok(Expr::Call { name: token, args })
        } else {
            Ok(typed_token(token))
        }
    }

    fn parse_token(&mut self) -> Result<String> {
        // tokens run until call/argument punctuation
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '(' | ')' | ',' | '"') {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ApiError::MalformedRequest(format!(
                "empty token in query.rql at offset {}",
                start
            )));
        }
        Ok(self.input[start..self.pos].iter().collect())
    }

    fn parse_string(&mut self) -> Result<Value> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(Value::String(out)),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(ApiError::MalformedRequest(
            "unterminated string in query.rql".to_string(),
        ))
    }
}

fn typed_token(token: String) -> Expr {
    if let Ok(n) = token.parse::<i64>() {
        return Expr::Literal(Value::from(n));
    }
    if let Ok(f) = token.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Expr::Literal(Value::Number(n));
        }
    }
    match token.as_str() {
        "true" => Expr::Literal(Value::Bool(true)),
        "false" => Expr::Literal(Value::Bool(false)),
        "null" => Expr::Literal(Value::Null),
        _ => Expr::Identifier(token),
    }
}

/// Evaluate an expression against a resource payload
pub fn evaluate(expr: &Expr, data: &Value) -> bool {
    match expr {
        Expr::Call { name, args } => match name.as_str() {
            "and" => args.iter().all(|a| evaluate(a, data)),
            "or" => args.iter().any(|a| evaluate(a, data)),
            "not" => args.len() == 1 && !evaluate(&args[0], data),
            "eq" => compare(args, data, |ord| ord == std::cmp::Ordering::Equal),
            "ne" => !compare(args, data, |ord| ord == std::cmp::Ordering::Equal),
            "gt" => compare(args, data, |ord| ord == std::cmp::Ordering::Greater),
            "ge" => compare(args, data, |ord| ord != std::cmp::Ordering::Less),
            "lt" => compare(args, data, |ord| ord == std::cmp::Ordering::Less),
            "le" => compare(args, data, |ord| ord != std::cmp::Ordering::Greater),
            "matches" => eval_matches(args, data),
            "contains" => eval_contains(args, data),
            other => {
                tracing::debug!(operator = other, "Unknown RQL operator");
                false
            }
        },
        // a bare expression is not a boolean query
        _ => false,
    }
}

fn field_of(arg: &Expr) -> Option<&str> {
    match arg {
        Expr::Identifier(s) => Some(s),
        Expr::Literal(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn value_of(arg: &Expr) -> Option<Value> {
    match arg {
        Expr::Literal(v) => Some(v.clone()),
        Expr::Identifier(s) => Some(Value::String(s.clone())),
        Expr::Call { .. } => None,
    }
}

/// Apply a predicate to the extracted field, accepting any array element
fn any_extracted(data: &Value, field: &str, pred: &impl Fn(&Value) -> bool) -> bool {
    let Some(extracted) = query::extract(data, field) else {
        return false;
    };
    any_value(&extracted, pred)
}

fn any_value(value: &Value, pred: &impl Fn(&Value) -> bool) -> bool {
    if pred(value) {
        return true;
    }
    match value {
        Value::Array(items) => items.iter().any(|item| any_value(item, pred)),
        _ => false,
    }
}

fn compare(args: &[Expr], data: &Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    let (Some(field), Some(rhs)) = (args.first().and_then(field_of), args.get(1).and_then(value_of))
    else {
        return false;
    };
    any_extracted(data, field, &|lhs| {
        order_values(lhs, &rhs).map(&accept).unwrap_or(false)
    })
}

fn order_values(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(std::cmp::Ordering::Equal),
        _ => None,
    }
}

fn eval_matches(args: &[Expr], data: &Value) -> bool {
    let (Some(field), Some(Value::String(pattern))) =
        (args.first().and_then(field_of), args.get(1).and_then(value_of))
    else {
        return false;
    };
    let Ok(re) = regex::Regex::new(&pattern) else {
        tracing::debug!(pattern = %pattern, "Bad RQL matches pattern");
        return false;
    };
    any_extracted(data, field, &|v| {
        v.as_str().map(|s| re.is_match(s)).unwrap_or(false)
    })
}

fn eval_contains(args: &[Expr], data: &Value) -> bool {
    let (Some(field), Some(needle)) =
        (args.first().and_then(field_of), args.get(1).and_then(value_of))
    else {
        return false;
    };
    any_extracted(data, field, &|v| match (v, &needle) {
        (Value::Array(items), _) => items.contains(&needle),
        (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(rql: &str, data: Value) -> bool {
        evaluate(&parse(rql).unwrap(), &data)
    }

    #[test]
    fn test_parse_call_shape() {
        let expr = parse("eq(label,%22x%22)").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                name: "eq".into(),
                args: vec![
                    Expr::Identifier("label".into()),
                    Expr::Literal(json!("x")),
                ],
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("eq(label").is_err());
        assert!(parse("eq(label,%22x%22)junk").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_eq_and_ne() {
        assert!(eval("eq(label,%22x%22)", json!({"label": "x"})));
        assert!(!eval("eq(label,%22x%22)", json!({"label": "y"})));
        assert!(eval("ne(label,%22x%22)", json!({"label": "y"})));
        assert!(eval("eq(tally,5)", json!({"tally": 5})));
    }

    #[test]
    fn test_comparisons() {
        let data = json!({"tally": 5});
        assert!(eval("gt(tally,3)", data.clone()));
        assert!(eval("ge(tally,5)", data.clone()));
        assert!(eval("lt(tally,10)", data.clone()));
        assert!(eval("le(tally,5)", data.clone()));
        assert!(!eval("gt(tally,5)", data));
    }

    #[test]
    fn test_boolean_composition() {
        let data = json!({"label": "x", "tally": 5});
        assert!(eval("and(eq(label,%22x%22),gt(tally,3))", data.clone()));
        assert!(!eval("and(eq(label,%22x%22),gt(tally,9))", data.clone()));
        assert!(eval("or(eq(label,%22y%22),gt(tally,3))", data.clone()));
        assert!(eval("not(eq(label,%22y%22))", data));
    }

    #[test]
    fn test_matches_regex() {
        assert!(eval("matches(label,%22al.%2a%22)", json!({"label": "alpha"})));
        assert!(!eval("matches(label,%22al.%2a%22)", json!({"label": "beta"})));
    }

    #[test]
    fn test_dotted_path_searches_arrays() {
        let data = json!({"interfaces": [{"name": "eth0"}, {"name": "eth1"}]});
        assert!(eval("eq(interfaces.name,%22eth1%22)", data.clone()));
        assert!(!eval("eq(interfaces.name,%22eth2%22)", data));
    }

    #[test]
    fn test_contains() {
        let data = json!({"tags": {"location": ["gallery", "studio"]}});
        assert!(eval("contains(tags.location,%22studio%22)", data.clone()));
        assert!(!eval("contains(tags.location,%22roof%22)", data));
        assert!(eval("contains(label,%22am%22)", json!({"label": "camera"})));
    }

    #[test]
    fn test_missing_field_is_false() {
        assert!(!eval("eq(nope,%22x%22)", json!({"label": "x"})));
        assert!(eval("ne(nope,%22x%22)", json!({"label": "x"})));
    }
}
