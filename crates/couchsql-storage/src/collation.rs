// CouchSQL - CouchDB document revision trees on SQL
// Copyright (C) 2025 CouchSQL Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.

//! CouchDB collation for JSON values
//!
//! Implements the view collation order:
//!
//! ```text
//! null < false < true < numbers < strings < arrays < objects
//! ```
//!
//! - **Numbers** compare numerically.
//! - **Strings** use the Unicode Collation Algorithm (root locale), so the
//!   comparison is case sensitive with lowercase first: `"a" < "A" < "aa" < "b"`.
//! - **Arrays** compare element by element; a shorter array sorts before a
//!   longer one sharing its prefix.
//! - **Objects** compare key/value pair by pair, then by size. Members are
//!   sorted before comparing, since decoded objects have no stable member
//!   order. This deviates from CouchDB, which compares in document order.
//!
//! [`compare_raw`] works on undecoded JSON text and only inspects the first
//! significant byte to classify a value, decoding just enough to order two
//! values of the same kind. The same function is registered with SQLite as
//! the `COUCHDB_UCI` collation.
//!
//! # Examples
//!
//! ```
//! use couchsql_storage::collation::compare_raw;
//! use std::cmp::Ordering;
//!
//! assert_eq!(compare_raw(b"null", b"false"), Ordering::Less);
//! assert_eq!(compare_raw(br#""a""#, br#""A""#), Ordering::Less);
//! assert_eq!(compare_raw(b"[1,2]", b"[1]"), Ordering::Greater);
//! ```

use feruca::Collator;
use serde_json::value::RawValue;
use serde_json::Value;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Name under which the collation is registered on every SQLite connection
pub const COLLATION_NAME: &str = "COUCHDB_UCI";

thread_local! {
    static COLLATOR: RefCell<Collator> = RefCell::new(Collator::default());
}

/// JSON value kinds in collation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JsonKind {
    /// `null`
    Null,
    /// `false` or `true`
    Boolean,
    /// Any number
    Number,
    /// A string
    String,
    /// An array
    Array,
    /// An object
    Object,
}

impl JsonKind {
    /// Classify raw JSON by its first significant byte
    pub fn of_raw(raw: &[u8]) -> Self {
        match first_significant(raw) {
            Some(b'"') => JsonKind::String,
            Some(b'[') => JsonKind::Array,
            Some(b'{') => JsonKind::Object,
            Some(b'n') | None => JsonKind::Null,
            Some(b't') | Some(b'f') => JsonKind::Boolean,
            Some(_) => JsonKind::Number,
        }
    }

    /// Classify a decoded value
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => JsonKind::Null,
            Value::Bool(_) => JsonKind::Boolean,
            Value::Number(_) => JsonKind::Number,
            Value::String(_) => JsonKind::String,
            Value::Array(_) => JsonKind::Array,
            Value::Object(_) => JsonKind::Object,
        }
    }
}

fn first_significant(raw: &[u8]) -> Option<u8> {
    raw.iter().copied().find(|b| !b.is_ascii_whitespace())
}

fn trim(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &raw[start..end]
}

/// Compare two strings with the Unicode Collation Algorithm
pub fn compare_strings(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    COLLATOR.with(|collator| collator.borrow_mut().collate(a, b))
}

/// Compare two undecoded JSON values.
///
/// Malformed input never panics: anything that fails to decode compares as
/// the smallest value of its kind.
pub fn compare_raw(a: &[u8], b: &[u8]) -> Ordering {
    let (a, b) = (trim(a), trim(b));
    if a == b {
        return Ordering::Equal;
    }
    let (ak, bk) = (JsonKind::of_raw(a), JsonKind::of_raw(b));
    if ak != bk {
        return ak.cmp(&bk);
    }
    match ak {
        JsonKind::Null => Ordering::Equal,
        // `f` < `t`
        JsonKind::Boolean => a.first().cmp(&b.first()),
        JsonKind::Number => compare_numbers(parse_number(a), parse_number(b)),
        JsonKind::String => {
            let av: String = serde_json::from_slice(a).unwrap_or_default();
            let bv: String = serde_json::from_slice(b).unwrap_or_default();
            compare_strings(&av, &bv)
        }
        JsonKind::Array => {
            let av: Vec<&RawValue> = serde_json::from_slice(a).unwrap_or_default();
            let bv: Vec<&RawValue> = serde_json::from_slice(b).unwrap_or_default();
            compare_sequences(&av, &bv, |x, y| {
                compare_raw(x.get().as_bytes(), y.get().as_bytes())
            })
        }
        JsonKind::Object => {
            let av = sorted_members(a);
            let bv = sorted_members(b);
            compare_sequences(&av, &bv, |x, y| compare_member(x, y))
        }
    }
}

/// Compare two decoded JSON values
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (ak, bk) = (JsonKind::of_value(a), JsonKind::of_value(b));
    if ak != bk {
        return ak.cmp(&bk);
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            compare_numbers(x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0))
        }
        (Value::String(x), Value::String(y)) => compare_strings(x, y),
        (Value::Array(x), Value::Array(y)) => compare_sequences(x, y, compare_values),
        (Value::Object(x), Value::Object(y)) => {
            let mut xs: Vec<(&String, &Value)> = x.iter().collect();
            let mut ys: Vec<(&String, &Value)> = y.iter().collect();
            let by_member = |p: &(&String, &Value), q: &(&String, &Value)| {
                compare_strings(p.0, q.0).then_with(|| compare_values(p.1, q.1))
            };
            xs.sort_by(by_member);
            ys.sort_by(by_member);
            compare_sequences(&xs, &ys, by_member)
        }
        _ => Ordering::Equal,
    }
}

fn parse_number(raw: &[u8]) -> f64 {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn compare_numbers(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn compare_sequences<T, F>(a: &[T], b: &[T], mut cmp: F) -> Ordering
where
    F: FnMut(&T, &T) -> Ordering,
{
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = cmp(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_member(a: &(String, &RawValue), b: &(String, &RawValue)) -> Ordering {
    compare_strings(&a.0, &b.0)
        .then_with(|| compare_raw(a.1.get().as_bytes(), b.1.get().as_bytes()))
}

fn sorted_members(raw: &[u8]) -> Vec<(String, &RawValue)> {
    let decoded: HashMap<String, &RawValue> = serde_json::from_slice(raw).unwrap_or_default();
    let mut members: Vec<(String, &RawValue)> = decoded.into_iter().collect();
    members.sort_by(compare_member);
    members
}
