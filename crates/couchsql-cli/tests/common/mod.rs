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

//! Common test helpers for couchsql CLI tests.

#![allow(dead_code)]

#[allow(unused_imports)]
pub use couchsql_test_utils::{
    assert_engine_error, assert_error_mentions, assert_rev_generation, couchsql,
    CouchsqlCommand, TestFixtures, TestWorkspace,
};

use serde_json::Value;

/// Workspace holding database `db` with one document `doc` at `{"foo": "bar"}`.
pub fn workspace_with_doc(db: &str, doc: &str) -> (TestWorkspace, String) {
    let ws = TestWorkspace::with_database(db);
    let rev = ws.put(db, doc, &TestFixtures::foo_bar().to_string());
    (ws, rev)
}

/// Read a string member from a JSON result.
pub fn str_of<'a>(value: &'a Value, key: &str) -> &'a str {
    value[key]
        .as_str()
        .unwrap_or_else(|| panic!("{} has no string member {}", value, key))
}
