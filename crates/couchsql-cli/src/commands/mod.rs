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

// Command modules for the couchsql CLI
pub mod attach;
pub mod collate;
pub mod db;
pub mod doc;
pub mod index;
pub mod replication;

pub use attach::AttachCmd;
pub use collate::CollateCmd;
pub use db::DbCmd;
pub use doc::{CreateCmd, DeleteCmd, GetCmd, PutCmd, RevCmd};
pub use index::IndexCmd;
pub use replication::{ChangesCmd, OpenRevsCmd, PurgeCmd, ReplicateCmd, RevsDiffCmd};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

/// Parse a JSON command line argument.
pub(crate) fn parse_json(text: &str, what: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("{} is not valid JSON", what))
}

/// Parse an optional JSON option map into an options struct.
pub(crate) fn parse_options<T: DeserializeOwned + Default>(text: Option<&str>) -> Result<T> {
    match text {
        Some(text) => serde_json::from_str(text).context("--options is not a valid option map"),
        None => Ok(T::default()),
    }
}

/// Parse a `{"doc id": ["rev", ...]}` request.
pub(crate) fn parse_rev_map(text: &str) -> Result<BTreeMap<String, Vec<String>>> {
    serde_json::from_str(text)
        .context("expected a JSON object mapping document ids to arrays of revisions")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use couchsql_revtree::GetOptions;

    #[test]
    fn test_parse_options() {
        let options: GetOptions = parse_options(Some(r#"{"revs": true}"#)).unwrap();
        assert!(options.revs);
        let options: GetOptions = parse_options(None).unwrap();
        assert_eq!(options, GetOptions::default());
        assert!(parse_options::<GetOptions>(Some("[1]")).is_err());
    }

    #[test]
    fn test_parse_rev_map() {
        let map = parse_rev_map(r#"{"a": ["1-x", "2-y"]}"#).unwrap();
        assert_eq!(map["a"], vec!["1-x".to_string(), "2-y".to_string()]);
        assert!(parse_rev_map(r#"{"a": "1-x"}"#).is_err());
    }
}
