//! Query-string decoding and structural matching
//!
//! Filters arrive as URL query strings. The pipeline is the same for every
//! API that supports filtering:
//!
//! 1. [`value_from_query`] splits the string into a flat parameter object.
//!    Values are URL-decoded except `query.rql`, whose typed values (e.g.
//!    `%22quoted strings%22`) must survive until the RQL parser sees them.
//! 2. [`unflatten`] turns dotted keys into nested objects
//!    (`foo.bar=1` → `{"foo":{"bar":"1"}}`).
//! 3. [`ResourceQuery`] pulls out `paging.*` and `query.rql`, leaving the
//!    basic query object, and composes the whole thing into one predicate
//!    (basic match AND RQL).
//!
//! Basic matching is a recursive structural comparison: the query is a
//! template, and a candidate matches when every queried field is present
//! with a matching value. String scalars honor the substring and
//! case-insensitive modes used by the log search.

use crate::rql;
use percent_encoding::percent_decode_str;
use rnmos_core::{ApiError, Result};
use serde_json::{Map, Value};

/// Scalar string matching modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchFlags {
    /// The candidate may merely contain the query string
    pub substr: bool,
    /// Comparison is case-insensitive
    pub icase: bool,
}

impl MatchFlags {
    /// Exact matching (resource queries)
    pub const DEFAULT: MatchFlags = MatchFlags {
        substr: false,
        icase: false,
    };

    /// Substring, case-insensitive matching (log search)
    pub const SUBSTR_ICASE: MatchFlags = MatchFlags {
        substr: true,
        icase: true,
    };
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Split a query string into a flat parameter object
///
/// Terms are separated by `&` or `;`. Field names are decoded; values are
/// decoded except for `query.rql`.
pub fn value_from_query(query: &str) -> Map<String, Value> {
    let mut params = Map::new();
    for term in query.split(['&', ';']) {
        if term.is_empty() {
            continue;
        }
        let (field, value) = term.split_once('=').unwrap_or((term, ""));
        let field = decode(field);
        let value = if field == "query.rql" {
            value.to_string()
        } else {
            decode(value)
        };
        params.insert(field, Value::String(value));
    }
    params
}

/// Build nested objects from dotted keys
pub fn unflatten(flat: &Map<String, Value>) -> Value {
    let mut root = Map::new();
    for (key, value) in flat {
        insert_path(&mut root, key, value.clone());
    }
    Value::Object(root)
}

fn insert_path(object: &mut Map<String, Value>, key_path: &str, value: Value) {
    match key_path.split_once('.') {
        None => {
            object.insert(key_path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = object
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(sub) = entry {
                insert_path(sub, rest, value);
            }
        }
    }
}

/// Unflatten dotted keys inside an already-parsed JSON object
///
/// Subscription `params` arrive as JSON rather than a query string but use
/// the same dotted-key convention.
pub fn unflatten_value(value: &Value) -> Value {
    match value.as_object() {
        Some(map) => unflatten(map),
        None => value.clone(),
    }
}

/// Find a value by dotted path, searching any array elements on the way
///
/// Returns an array when arrays were traversed, otherwise the single value.
pub fn extract(value: &Value, key_path: &str) -> Option<Value> {
    let segments: Vec<&str> = key_path.split('.').collect();
    descend(value, &segments)
}

fn descend(value: &Value, segments: &[&str]) -> Option<Value> {
    if segments.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => map
            .get(segments[0])
            .and_then(|v| descend(v, &segments[1..])),
        Value::Array(items) => {
            let results: Vec<Value> = items
                .iter()
                .filter_map(|item| descend(item, segments))
                .collect();
            if results.is_empty() {
                None
            } else {
                Some(Value::Array(results))
            }
        }
        _ => None,
    }
}

/// Compare a candidate value against a query template
pub fn match_query(value: &Value, query: &Value, flags: MatchFlags) -> bool {
    match (query, value) {
        (Value::Object(q), Value::Object(v)) => q
            .iter()
            .all(|(key, qv)| v.get(key).map(|vv| match_query(vv, qv, flags)).unwrap_or(false)),
        (Value::Array(q), Value::Array(v)) => q
            .iter()
            .all(|qe| v.iter().any(|ve| match_query(ve, qe, flags))),
        (Value::String(q), Value::String(v)) => match_string(v, q, flags),
        _ => query == value,
    }
}

fn match_string(value: &str, query: &str, flags: MatchFlags) -> bool {
    let (value, query) = if flags.icase {
        (value.to_lowercase(), query.to_lowercase())
    } else {
        (value.to_string(), query.to_string())
    };
    if flags.substr {
        value.contains(&query)
    } else {
        value == query
    }
}

/// A parsed filter: basic query, optional RQL, paging window
#[derive(Debug, Clone)]
pub struct ResourceQuery {
    pub basic: Value,
    pub rql: Option<rql::Expr>,
    pub offset: usize,
    pub limit: usize,
    flags: MatchFlags,
}

impl ResourceQuery {
    /// Parse a filter from a URL query string
    pub fn from_query_string(query: &str, flags: MatchFlags) -> Result<Self> {
        let flat = value_from_query(query);
        let mut basic = unflatten(&flat);

        let mut offset = 0;
        let mut limit = usize::MAX;
        if let Some(paging) = basic.get("paging") {
            offset = paging_param(paging, "offset")?.unwrap_or(0);
            limit = paging_param(paging, "limit")?.unwrap_or(usize::MAX);
        }
        remove_field(&mut basic, "paging");

        let mut rql_expr = None;
        if let Some(encoded) = basic
            .get("query")
            .and_then(|q| q.get("rql"))
            .and_then(Value::as_str)
        {
            rql_expr = Some(rql::parse(encoded)?);
        }
        remove_field(&mut basic, "query");

        Ok(Self {
            basic,
            rql: rql_expr,
            offset,
            limit,
            flags,
        })
    }

    /// Parse a filter from a subscription `params` object
    pub fn from_params(params: &Value) -> Result<Self> {
        let mut basic = unflatten_value(params);
        let mut rql_expr = None;
        if let Some(encoded) = basic
            .get("query")
            .and_then(|q| q.get("rql"))
            .and_then(Value::as_str)
        {
            rql_expr = Some(rql::parse(encoded)?);
        }
        remove_field(&mut basic, "query");
        remove_field(&mut basic, "paging");

        Ok(Self {
            basic,
            rql: rql_expr,
            offset: 0,
            limit: usize::MAX,
            flags: MatchFlags::DEFAULT,
        })
    }

    /// Whether a payload satisfies both the basic query and the RQL
    pub fn matches(&self, data: &Value) -> bool {
        match_query(data, &self.basic, self.flags)
            && self
                .rql
                .as_ref()
                .map(|expr| rql::evaluate(expr, data))
                .unwrap_or(true)
    }
}

fn paging_param(paging: &Value, name: &str) -> Result<Option<usize>> {
    match paging.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => s
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ApiError::MalformedRequest(format!("bad paging.{}: {}", name, s))),
        Some(other) => Err(ApiError::MalformedRequest(format!(
            "bad paging.{}: {}",
            name, other
        ))),
    }
}

fn remove_field(value: &mut Value, field: &str) {
    if let Some(obj) = value.as_object_mut() {
        obj.remove(field);
    }
}

/// Filter and page a sequence, reporting the total match count
///
/// Returns the `offset`-th through `(offset + limit - 1)`-th matching
/// items and the number of items that matched overall.
pub fn filter_paged<'a, T>(
    items: impl Iterator<Item = &'a T>,
    mut pred: impl FnMut(&T) -> bool,
    offset: usize,
    limit: usize,
) -> (Vec<&'a T>, usize) {
    let mut total = 0;
    let mut page = Vec::new();
    for item in items {
        if pred(item) {
            if total >= offset && page.len() < limit {
                page.push(item);
            }
            total += 1;
        }
    }
    (page, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_from_query_decodes_all_but_rql() {
        let params = value_from_query("label=a%20b&query.rql=eq(label,%22x%22)");
        assert_eq!(params["label"], "a b");
        assert_eq!(params["query.rql"], "eq(label,%22x%22)");
    }

    #[test]
    fn test_unflatten_nested_keys() {
        let flat = value_from_query("foo.bar=1&foo.baz=2&top=3");
        let nested = unflatten(&flat);
        assert_eq!(nested, json!({"foo": {"bar": "1", "baz": "2"}, "top": "3"}));
    }

    #[test]
    fn test_match_query_recursive() {
        let candidate = json!({"label": "x", "caps": {"media_types": ["video/raw", "audio/L24"]}});
        assert!(match_query(
            &candidate,
            &json!({"caps": {"media_types": ["audio/L24"]}}),
            MatchFlags::DEFAULT
        ));
        assert!(!match_query(
            &candidate,
            &json!({"caps": {"media_types": ["audio/L16"]}}),
            MatchFlags::DEFAULT
        ));
        assert!(!match_query(&candidate, &json!({"missing": "x"}), MatchFlags::DEFAULT));
    }

    #[test]
    fn test_match_string_modes() {
        let candidate = json!({"message": "Registration Expired"});
        assert!(!match_query(
            &candidate,
            &json!({"message": "expired"}),
            MatchFlags::DEFAULT
        ));
        assert!(match_query(
            &candidate,
            &json!({"message": "expired"}),
            MatchFlags::SUBSTR_ICASE
        ));
        assert!(match_query(
            &candidate,
            &json!({"message": "registration expired"}),
            MatchFlags { substr: false, icase: true }
        ));
    }

    #[test]
    fn test_extract_traverses_arrays() {
        let value = json!({"interfaces": [{"name": "eth0"}, {"name": "eth1"}]});
        assert_eq!(
            extract(&value, "interfaces.name"),
            Some(json!(["eth0", "eth1"]))
        );
        assert_eq!(extract(&value, "interfaces.mac"), None);
        assert_eq!(extract(&json!({"a": {"b": 5}}), "a.b"), Some(json!(5)));
    }

    #[test]
    fn test_resource_query_paging_and_filter() {
        let q = ResourceQuery::from_query_string(
            "paging.offset=1&paging.limit=2&label=x",
            MatchFlags::DEFAULT,
        )
        .unwrap();
        assert_eq!(q.offset, 1);
        assert_eq!(q.limit, 2);
        assert_eq!(q.basic, json!({"label": "x"}));
        assert!(q.matches(&json!({"label": "x", "extra": 1})));
        assert!(!q.matches(&json!({"label": "y"})));
    }

    #[test]
    fn test_resource_query_bad_paging() {
        assert!(ResourceQuery::from_query_string("paging.limit=ten", MatchFlags::DEFAULT).is_err());
    }

    #[test]
    fn test_resource_query_combines_basic_and_rql() {
        let q = ResourceQuery::from_query_string(
            "label=x&query.rql=gt(tally,3)",
            MatchFlags::DEFAULT,
        )
        .unwrap();
        assert!(q.matches(&json!({"label": "x", "tally": 5})));
        assert!(!q.matches(&json!({"label": "x", "tally": 2})));
        assert!(!q.matches(&json!({"label": "y", "tally": 5})));
    }

    #[test]
    fn test_filter_paged_window_and_count() {
        let items: Vec<i32> = (0..10).collect();
        let (page, total) = filter_paged(items.iter(), |i| *i % 2 == 0, 1, 2);
        assert_eq!(page, vec![&2, &4]);
        assert_eq!(total, 5);
    }

    #[test]
    fn test_from_params_object() {
        let q = ResourceQuery::from_params(&json!({"format": "urn:x-nmos:format:video"})).unwrap();
        assert!(q.matches(&json!({"format": "urn:x-nmos:format:video", "label": "cam"})));
        assert!(!q.matches(&json!({"format": "urn:x-nmos:format:audio"})));
    }
}
