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

//! Shared output formatting for CLI commands.
//!
//! Results go to stdout as JSON so they can be piped into other tools.
//! Human-facing messages go to stderr.

use anyhow::Result;
use console::style;
use serde::Serialize;
use std::io::{self, Write};

/// Print a value as pretty JSON on stdout.
pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Print `{"ok": true}` plus any extra members.
pub fn ok(extra: serde_json::Value) -> Result<()> {
    let mut body = serde_json::json!({"ok": true});
    if let (Some(body), serde_json::Value::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }
    json(&body)
}

/// Write raw bytes to stdout.
pub fn bytes(data: &[u8]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(data)?;
    stdout.flush()?;
    Ok(())
}

/// Print an error message to stderr with a red marker.
pub fn error(msg: &str) {
    eprintln!("{} {}", style("error:").red().bold(), msg);
}

/// Print a warning message to stderr.
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("warning:").yellow().bold(), msg);
}

/// Print a key-value line to stdout.
pub fn detail(key: &str, value: &str) {
    println!("{}: {}", key, style(value).cyan());
}

