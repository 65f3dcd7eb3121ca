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

//! Revision identifiers
//!
//! A revision string is `<rev>-<rev_id>`: a per-document generation counter
//! and a content hash. The zero [`Rev`] stands for "no revision".

use couchsql_storage::{StorageError, StorageResult};
use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A document revision
///
/// Ordering is by generation, then by `rev_id`, which is exactly the
/// tie-break used to pick the winning leaf.
///
/// # Examples
///
/// ```
/// use couchsql_revtree::Rev;
///
/// let rev: Rev = "1-9bb58f26192e4ba00f01e2e7b136bbd8".parse().unwrap();
/// assert_eq!(rev.rev, 1);
/// assert_eq!(rev.to_string(), "1-9bb58f26192e4ba00f01e2e7b136bbd8");
/// assert!(Rev::default().is_zero());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rev {
    /// Generation, starting at 1 for a root revision
    pub rev: i64,
    /// Content hash distinguishing revisions of the same generation
    pub id: String,
}

impl Rev {
    /// Create a revision
    pub fn new<S: Into<String>>(rev: i64, id: S) -> Self {
        Rev { rev, id: id.into() }
    }

    /// Parse a `<rev>-<rev_id>` string
    pub fn parse(s: &str) -> StorageResult<Self> {
        let invalid = || StorageError::bad_request(format!("invalid rev format: {:?}", s));
        let (rev, id) = s.split_once('-').ok_or_else(invalid)?;
        let rev: i64 = rev.parse().map_err(|_| invalid())?;
        if rev < 1 || id.is_empty() {
            return Err(invalid());
        }
        Ok(Rev::new(rev, id))
    }

    /// Parse an optional revision string; absent or empty means `None`
    pub fn parse_opt(s: Option<&str>) -> StorageResult<Option<Self>> {
        match s {
            None | Some("") => Ok(None),
            Some(s) => Self::parse(s).map(Some),
        }
    }

    /// Whether this is the "no revision" value
    pub fn is_zero(&self) -> bool {
        self.rev == 0 && self.id.is_empty()
    }
}

impl fmt::Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return Ok(());
        }
        write!(f, "{}-{}", self.rev, self.id)
    }
}

impl FromStr for Rev {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rev::parse(s)
    }
}

impl Serialize for Rev {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rev {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rev::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Revision history in the `_revisions` shape: the newest generation and
/// the chain of ids from newest to oldest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revisions {
    /// Generation of the first id
    pub start: i64,
    /// Ids, newest first
    pub ids: Vec<String>,
}

impl Revisions {
    /// Build from a chain of revisions ordered newest first
    pub fn from_chain(chain: &[Rev]) -> Self {
        Revisions {
            start: chain.first().map_or(0, |r| r.rev),
            ids: chain.iter().map(|r| r.id.clone()).collect(),
        }
    }

    /// Check the chain is usable: non-empty, no blank ids, and long enough
    /// generations that none drops below 1
    pub fn validate(&self) -> StorageResult<()> {
        if self.ids.is_empty() {
            return Err(StorageError::bad_request("_revisions.ids must not be empty"));
        }
        if self.ids.iter().any(|id| id.is_empty()) {
            return Err(StorageError::bad_request("_revisions.ids must not contain empty ids"));
        }
        if self.start < self.ids.len() as i64 {
            return Err(StorageError::bad_request(
                "_revisions.start must be at least the number of ids",
            ));
        }
        Ok(())
    }

    /// The chain as revisions, newest first
    pub fn revs(&self) -> Vec<Rev> {
        self.ids
            .iter()
            .enumerate()
            .map(|(i, id)| Rev::new(self.start - i as i64, id.clone()))
            .collect()
    }
}

/// Serialise a JSON value with object members sorted at every level
pub fn canonical_json(value: &Value) -> StorageResult<Vec<u8>> {
    let mut out = Vec::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> StorageResult<()> {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(member, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

/// Everything a revision id is derived from
#[derive(Debug)]
pub struct RevInput<'a> {
    /// Canonical body bytes, special members already removed
    pub body: &'a [u8],
    /// `(filename, raw digest)` of every attachment the revision carries
    pub attachments: Vec<(&'a str, Vec<u8>)>,
    /// Whether the revision is a tombstone
    pub deleted: bool,
    /// The revision this one extends
    pub parent: Option<&'a Rev>,
}

/// Compute the hex md5 revision id
///
/// A root revision without attachments hashes its body alone:
///
/// ```
/// use couchsql_revtree::rev::{calculate_rev_id, RevInput};
///
/// let id = calculate_rev_id(RevInput {
///     body: br#"{"foo":"bar"}"#,
///     attachments: Vec::new(),
///     deleted: false,
///     parent: None,
/// });
/// assert_eq!(id, "9bb58f26192e4ba00f01e2e7b136bbd8");
/// ```
pub fn calculate_rev_id(input: RevInput<'_>) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.body);

    let mut attachments = input.attachments;
    attachments.sort_by(|a, b| a.0.cmp(b.0));
    for (filename, digest) in &attachments {
        hasher.update(digest);
        hasher.update(filename.as_bytes());
        hasher.update([0u8]);
    }
    if input.deleted {
        hasher.update([0xffu8]);
    }
    if let Some(parent) = input.parent {
        hasher.update(parent.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_format() {
        let rev = Rev::parse("12-abc").unwrap();
        assert_eq!(rev, Rev::new(12, "abc"));
        assert_eq!(rev.to_string(), "12-abc");
        // the id may itself contain dashes
        assert_eq!(Rev::parse("3-a-b").unwrap().id, "a-b");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "abc", "1-", "-abc", "0-abc", "x-abc", "-1-abc"] {
            assert!(Rev::parse(bad).unwrap_err().is_bad_request(), "{}", bad);
        }
        assert_eq!(Rev::parse_opt(Some("")).unwrap(), None);
    }

    #[test]
    fn test_ordering_matches_winner_tiebreak() {
        let mut revs = vec![Rev::new(2, "aaa"), Rev::new(3, "000"), Rev::new(2, "bbb")];
        revs.sort();
        assert_eq!(revs.last().unwrap(), &Rev::new(3, "000"));
        assert!(Rev::new(2, "bbb") > Rev::new(2, "aaa"));
    }

    #[test]
    fn test_serde_as_string() {
        let rev = Rev::new(1, "x");
        assert_eq!(serde_json::to_value(&rev).unwrap(), json!("1-x"));
        let back: Rev = serde_json::from_value(json!("1-x")).unwrap();
        assert_eq!(back, rev);
        assert!(serde_json::from_value::<Rev>(json!("nope")).is_err());
    }

    #[test]
    fn test_revisions_chain() {
        let revisions = Revisions {
            start: 3,
            ids: vec!["ghi".into(), "def".into(), "abc".into()],
        };
        revisions.validate().unwrap();
        assert_eq!(
            revisions.revs(),
            vec![Rev::new(3, "ghi"), Rev::new(2, "def"), Rev::new(1, "abc")]
        );
        assert_eq!(Revisions::from_chain(&revisions.revs()), revisions);

        let short = Revisions { start: 1, ids: vec!["a".into(), "b".into()] };
        assert!(short.validate().unwrap_err().is_bad_request());
        let empty = Revisions { start: 1, ids: vec![] };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_canonical_json_sorts_members() {
        let value = json!({"b": 1, "a": {"d": [1, {"z": 0, "y": 1}], "c": null}});
        let bytes = canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"c":null,"d":[1,{"y":1,"z":0}]},"b":1}"#
        );
    }

    #[test]
    fn test_rev_id_inputs() {
        let body = br#"{"foo":"bar"}"#;
        let base = || RevInput { body, attachments: Vec::new(), deleted: false, parent: None };
        let plain = calculate_rev_id(base());
        assert_eq!(plain, "9bb58f26192e4ba00f01e2e7b136bbd8");

        let deleted = calculate_rev_id(RevInput { deleted: true, ..base() });
        let parent = Rev::new(1, plain.clone());
        let child = calculate_rev_id(RevInput { parent: Some(&parent), ..base() });
        let with_att = calculate_rev_id(RevInput {
            attachments: vec![("a.txt", vec![1, 2, 3])],
            ..base()
        });
        assert_ne!(deleted, plain);
        assert_ne!(child, plain);
        assert_ne!(with_att, plain);

        // attachment order does not matter
        let ab = calculate_rev_id(RevInput {
            attachments: vec![("a", vec![1]), ("b", vec![2])],
            ..base()
        });
        let ba = calculate_rev_id(RevInput {
            attachments: vec![("b", vec![2]), ("a", vec![1])],
            ..base()
        });
        assert_eq!(ab, ba);
    }
}
