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

//! Temporary workspace for CLI integration tests.
//!
//! Owns a temporary directory holding a database file and any configuration
//! files a test writes next to it.

use crate::cli::CouchsqlCommand;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary directory with automatic cleanup.
///
/// # Example
/// ```ignore
/// use couchsql_test_utils::TestWorkspace;
///
/// let ws = TestWorkspace::with_database("inventory");
/// let rev = ws.put("inventory", "widget", r#"{"count": 1}"#);
/// assert!(rev.starts_with("1-"));
/// ```
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a workspace whose store already holds database `name`.
    pub fn with_database(name: &str) -> Self {
        let ws = Self::new();
        ws.command().args(&["db", "create", name]).run_success();
        ws
    }

    /// Get the path to the workspace directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The database file every command of this workspace uses.
    pub fn db_path(&self) -> PathBuf {
        self.temp_dir.path().join("couchsql.db")
    }

    /// A quiet couchsql command bound to this workspace's database file.
    pub fn command(&self) -> CouchsqlCommand {
        CouchsqlCommand::with_db(&self.db_path())
    }

    /// Run `args` against the workspace and parse the JSON result.
    pub fn json(&self, args: &[&str]) -> Value {
        self.command().args(args).json()
    }

    /// Store a document and return its new revision.
    pub fn put(&self, db: &str, id: &str, body: &str) -> String {
        let result = self.json(&["put", db, id, body]);
        result["rev"]
            .as_str()
            .unwrap_or_else(|| panic!("put returned no rev: {}", result))
            .to_string()
    }

    /// Write a file into the workspace and return its path.
    pub fn write_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Read a file from the workspace.
    pub fn read_file(&self, name: &str) -> Vec<u8> {
        fs::read(self.temp_dir.path().join(name)).expect("Failed to read file")
    }

    /// Get the path to a file in the workspace.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
