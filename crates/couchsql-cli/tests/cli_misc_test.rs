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
#![allow(clippy::unwrap_used)]
//! Store-less commands, indexes and argument handling

mod common;

use common::*;
use predicates::prelude::*;
use serde_json::json;

/// No arguments prints usage and fails
#[test]
fn test_no_args() {
    couchsql()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

/// `--version` and `version` both report the package version
#[test]
fn test_version() {
    couchsql()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    CouchsqlCommand::new()
        .arg("version")
        .run_success()
        .stdout(predicate::str::contains("couchsql"));
}

/// Collation follows CouchDB view order
#[test]
fn test_collate() {
    let cases = [
        (r#""a""#, r#""B""#, -1),
        ("null", "false", -1),
        ("[1, 2]", "{}", -1),
        ("true", "1", -1),
        ("10", "9", 1),
        (r#"{"a": 1}"#, r#"{"a": 1}"#, 0),
    ];
    for (a, b, expected) in cases {
        let result = CouchsqlCommand::new().args(&["collate", a, b]).json();
        assert_eq!(result, json!(expected), "collate {} {}", a, b);
    }

    assert_error_mentions(
        CouchsqlCommand::new()
            .args(&["collate", "[", "1"])
            .run_failure(),
        "A is not valid JSON",
    );
}

/// Negative numbers are values, not flags
#[test]
fn test_collate_negative_numbers() {
    let result = CouchsqlCommand::new().args(&["collate", "-1", "-2"]).json();
    assert_eq!(result, json!(1));
}

/// Completion scripts are generated without touching a database
#[test]
fn test_completions() {
    CouchsqlCommand::new()
        .args(&["completions", "bash"])
        .run_success()
        .stdout(predicate::str::contains("couchsql"));
}

/// Create, list and delete a Mango index
#[test]
fn test_index_lifecycle() {
    let ws = TestWorkspace::with_database("db");
    let definition = r#"{"fields": ["name", {"age": "desc"}]}"#;

    let created = ws.json(&[
        "index", "create", "db", definition, "--ddoc", "people", "--name", "by-name",
    ]);
    assert_eq!(
        created,
        json!({"result": "created", "id": "_design/people", "name": "by-name"})
    );
    let again = ws.json(&[
        "index", "create", "db", definition, "--ddoc", "people", "--name", "by-name",
    ]);
    assert_eq!(again["result"], json!("exists"));

    let listed = ws.json(&["index", "list", "db"]);
    assert_eq!(listed["total_rows"], json!(2));
    assert_eq!(listed["indexes"][0]["name"], json!("_all_docs"));
    assert_eq!(listed["indexes"][1]["type"], json!("json"));
    assert_eq!(
        listed["indexes"][1]["def"],
        json!({"fields": [{"name": "asc"}, {"age": "desc"}]})
    );

    ws.json(&["index", "delete", "db", "people", "by-name"]);
    assert_eq!(ws.json(&["index", "list", "db"])["total_rows"], json!(1));
    assert_engine_error(
        ws.command()
            .args(&["index", "delete", "db", "people", "by-name"])
            .run_failure(),
        404,
    );
}

/// A malformed index definition is a bad request
#[test]
fn test_index_bad_definition() {
    let ws = TestWorkspace::with_database("db");
    assert_engine_error(
        ws.command()
            .args(&["index", "create", "db", r#"{"fields": "name"}"#])
            .run_failure(),
        400,
    );
}

/// A configuration file that does not validate stops the command
#[test]
fn test_invalid_config() {
    let ws = TestWorkspace::new();
    let config = ws.write_file("bad.toml", b"[storage]\nmax_connections = 0\n");
    assert_error_mentions(
        ws.command()
            .args(&["--config", config.to_str().unwrap(), "db", "list"])
            .run_failure(),
        "max_connections",
    );

    let config = ws.write_file("broken.toml", b"[storage\n");
    ws.command()
        .args(&["--config", config.to_str().unwrap(), "db", "list"])
        .run_failure();
}

/// Environment variables override the configuration
#[test]
fn test_env_override() {
    let ws = TestWorkspace::new();
    let db_file = ws.file_path("from-env.db");
    couchsql()
        .args(["-q", "db", "create", "envdb"])
        .env("COUCHSQL_STORAGE_PATH", &db_file)
        .assert()
        .success();
    assert!(db_file.exists());
}
