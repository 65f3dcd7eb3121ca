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

//! CLI command helpers for testing the couchsql binary.
//!
//! Provides convenient wrappers around assert_cmd.

use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;

/// Environment variables that would leak the caller's settings into a test
const CONFIG_VARS: [&str; 7] = [
    "COUCHSQL_STORAGE_PATH",
    "COUCHSQL_IN_MEMORY",
    "COUCHSQL_MAX_CONNECTIONS",
    "COUCHSQL_BUSY_TIMEOUT_MS",
    "COUCHSQL_LOG_LEVEL",
    "COUCHSQL_LOG_FORMAT",
    "COUCHSQL_SQL_QUERIES",
];

/// Creates a new couchsql Command with a clean `COUCHSQL_*` environment.
///
/// # Example
/// ```ignore
/// use couchsql_test_utils::couchsql;
///
/// couchsql()
///     .args(["collate", "1", "2"])
///     .assert()
///     .success();
/// ```
#[allow(deprecated)] // cargo_bin is deprecated but still works for our use case
pub fn couchsql() -> Command {
    let mut cmd = Command::cargo_bin("couchsql").expect("couchsql binary not found");
    for var in CONFIG_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// Fluent API wrapper for couchsql invocations against one database file.
pub struct CouchsqlCommand {
    cmd: Command,
}

impl CouchsqlCommand {
    /// A quiet command with no database file selected.
    pub fn new() -> Self {
        let mut cmd = couchsql();
        cmd.arg("-q");
        Self { cmd }
    }

    /// A quiet command working on `db_path`.
    pub fn with_db(db_path: &Path) -> Self {
        let mut command = Self::new();
        command.cmd.arg("--db-path").arg(db_path);
        command
    }

    /// Add an argument to the command.
    pub fn arg(mut self, arg: &str) -> Self {
        self.cmd.arg(arg);
        self
    }

    /// Add multiple arguments to the command.
    pub fn args(mut self, args: &[&str]) -> Self {
        self.cmd.args(args);
        self
    }

    /// Set an environment variable for this invocation.
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.cmd.env(key, value);
        self
    }

    /// Execute the command and assert success.
    pub fn run_success(mut self) -> assert_cmd::assert::Assert {
        self.cmd.assert().success()
    }

    /// Execute the command and assert failure.
    pub fn run_failure(mut self) -> assert_cmd::assert::Assert {
        self.cmd.assert().failure()
    }

    /// Execute the command, assert success and parse stdout as JSON.
    pub fn json(self) -> Value {
        let output = self.run_success().get_output().stdout.clone();
        serde_json::from_slice(&output).unwrap_or_else(|e| {
            panic!(
                "stdout is not JSON ({}): {}",
                e,
                String::from_utf8_lossy(&output)
            )
        })
    }

    /// Get the underlying Command for custom assertions.
    pub fn into_inner(self) -> Command {
        self.cmd
    }
}

impl Default for CouchsqlCommand {
    fn default() -> Self {
        Self::new()
    }
}
