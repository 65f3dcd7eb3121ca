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

//! Document envelopes
//!
//! Incoming documents carry special members (`_id`, `_rev`, `_deleted`,
//! `_attachments`, `_revisions`) next to the user's fields. [`prepare`]
//! splits them apart; [`Document`] is what reads hand back.

use crate::rev::{canonical_json, Rev, Revisions};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use couchsql_storage::{StorageError, StorageResult};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Members CouchDB returns on reads and silently ignores on writes
const READ_ONLY_MEMBERS: [&str; 5] = [
    "_conflicts",
    "_deleted_conflicts",
    "_local_seq",
    "_revs_info",
    "_attachments_since",
];

/// A document as returned by reads
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document id
    pub id: String,
    /// Revision this body belongs to
    pub rev: Rev,
    /// Full JSON body including `_id`, `_rev` and any requested metadata
    pub body: Value,
}

impl Document {
    /// Whether this revision is a tombstone
    pub fn is_deleted(&self) -> bool {
        self.body.get("_deleted").and_then(Value::as_bool).unwrap_or(false)
    }

    /// A member of the body
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

/// One `_attachments` entry of an incoming document
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentInput {
    /// Keep the content the parent revision has under this name
    Stub,
    /// New content
    Content {
        /// MIME type, when given
        content_type: Option<String>,
        /// Decoded bytes
        data: Vec<u8>,
    },
}

/// An incoming document split into its parts
#[derive(Debug, Clone)]
pub struct PreparedDoc {
    /// User fields only
    pub body: Map<String, Value>,
    /// `_rev`, if given
    pub rev: Option<Rev>,
    /// `_deleted`
    pub deleted: bool,
    /// `_attachments`, if given
    pub attachments: Option<BTreeMap<String, AttachmentInput>>,
    /// `_revisions`, if given
    pub revisions: Option<Revisions>,
}

impl PreparedDoc {
    /// An empty body carrying only the given flags
    pub fn tombstone() -> Self {
        PreparedDoc {
            body: Map::new(),
            rev: None,
            deleted: true,
            attachments: None,
            revisions: None,
        }
    }

    /// Body as stored: `{}` for a tombstone, otherwise the user fields
    pub fn stored_body(&self) -> Value {
        if self.deleted {
            Value::Object(Map::new())
        } else {
            Value::Object(self.body.clone())
        }
    }

    /// Canonical bytes of the stored body
    pub fn canonical_body(&self) -> StorageResult<Vec<u8>> {
        canonical_json(&self.stored_body())
    }
}

/// Check a document id
///
/// ```
/// use couchsql_revtree::document::validate_doc_id;
///
/// assert!(validate_doc_id("foo").is_ok());
/// assert!(validate_doc_id("_design/views").is_ok());
/// assert!(validate_doc_id("_secret").is_err());
/// ```
pub fn validate_doc_id(id: &str) -> StorageResult<()> {
    if id.is_empty() {
        return Err(StorageError::bad_request("document id must not be empty"));
    }
    if id.starts_with('_') && !id.starts_with("_design/") && !id.starts_with("_local/") {
        return Err(StorageError::bad_request(format!(
            "only reserved document ids may start with an underscore: {}",
            id
        )));
    }
    Ok(())
}

/// Split an incoming document for `doc_id`
pub fn prepare(doc_id: &str, doc: Value) -> StorageResult<PreparedDoc> {
    let Value::Object(members) = doc else {
        return Err(StorageError::bad_request("document must be a JSON object"));
    };

    let mut prepared = PreparedDoc {
        body: Map::new(),
        rev: None,
        deleted: false,
        attachments: None,
        revisions: None,
    };
    for (key, value) in members {
        if !key.starts_with('_') {
            prepared.body.insert(key, value);
            continue;
        }
        match key.as_str() {
            "_id" => match value.as_str() {
                Some(id) if id == doc_id => {}
                _ => {
                    return Err(StorageError::bad_request(format!(
                        "document id mismatch: {} vs {}",
                        value, doc_id
                    )))
                }
            },
            "_rev" => match &value {
                Value::String(s) => prepared.rev = Rev::parse_opt(Some(s.as_str()))?,
                Value::Null => {}
                _ => return Err(StorageError::bad_request("_rev must be a string")),
            },
            "_deleted" => match value {
                Value::Bool(deleted) => prepared.deleted = deleted,
                Value::Null => {}
                _ => return Err(StorageError::bad_request("_deleted must be a boolean")),
            },
            "_attachments" => prepared.attachments = Some(parse_attachments(value)?),
            "_revisions" => {
                let revisions: Revisions = serde_json::from_value(value)
                    .map_err(|e| StorageError::bad_request(format!("invalid _revisions: {}", e)))?;
                revisions.validate()?;
                prepared.revisions = Some(revisions);
            }
            k if READ_ONLY_MEMBERS.contains(&k) => {}
            k => {
                return Err(StorageError::bad_request(format!(
                    "bad special document member: {}",
                    k
                )))
            }
        }
    }
    Ok(prepared)
}

fn parse_attachments(value: Value) -> StorageResult<BTreeMap<String, AttachmentInput>> {
    let Value::Object(entries) = value else {
        return Err(StorageError::bad_request("_attachments must be an object"));
    };
    let mut parsed = BTreeMap::new();
    for (filename, entry) in entries {
        if filename.is_empty() {
            return Err(StorageError::bad_request("attachment name must not be empty"));
        }
        let Value::Object(entry) = entry else {
            return Err(StorageError::bad_request(format!(
                "attachment {} must be an object",
                filename
            )));
        };
        let input = if entry.get("stub").and_then(Value::as_bool).unwrap_or(false) {
            AttachmentInput::Stub
        } else {
            let data = entry
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    StorageError::bad_request(format!("attachment {} has no data", filename))
                })?;
            let data = BASE64.decode(data).map_err(|e| {
                StorageError::bad_request(format!("attachment {} is not base64: {}", filename, e))
            })?;
            AttachmentInput::Content {
                content_type: entry
                    .get("content_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                data,
            }
        };
        parsed.insert(filename, input);
    }
    Ok(parsed)
}
