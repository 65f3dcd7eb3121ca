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

//! Test fixture management.
//!
//! Document bodies and attachment content with known hashes.

use serde_json::{json, Value};

/// Test fixture management utilities.
pub struct TestFixtures;

impl TestFixtures {
    /// Attachment content with a known digest.
    pub const TEXT: &'static [u8] = b"This is a base64 encoding";

    /// [`TestFixtures::TEXT`] in base64.
    pub const TEXT_BASE64: &'static str = "VGhpcyBpcyBhIGJhc2U2NCBlbmNvZGluZw==";

    /// `md5-` digest of [`TestFixtures::TEXT`].
    pub const TEXT_DIGEST: &'static str = "md5-TmfHxaRgUrE9l3tkAn4s0Q==";

    /// `{"foo": "bar"}` always hashes to this first revision.
    pub const FOO_BAR_REV: &'static str = "1-9bb58f26192e4ba00f01e2e7b136bbd8";

    /// The body behind [`TestFixtures::FOO_BAR_REV`].
    pub fn foo_bar() -> Value {
        json!({"foo": "bar"})
    }

    /// A body carrying one inline text attachment.
    pub fn with_text_attachment(name: &str) -> Value {
        json!({
            "_attachments": {
                (name): {"content_type": "text/plain", "data": Self::TEXT_BASE64}
            }
        })
    }

    /// A replicated body with ancestry `start-ids[0]`, `start-1-ids[1]`, ...
    pub fn replicated_chain(start: i64, ids: &[&str]) -> Value {
        json!({"_revisions": {"start": start, "ids": ids}})
    }

    /// `{"id": [revs...]}` as used by revs-diff and purge.
    pub fn rev_request(entries: &[(&str, &[&str])]) -> Value {
        let map: serde_json::Map<String, Value> = entries
            .iter()
            .map(|(id, revs)| (id.to_string(), json!(revs)))
            .collect();
        Value::Object(map)
    }
}
