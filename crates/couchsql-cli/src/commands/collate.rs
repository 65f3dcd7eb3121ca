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
use super::parse_json;
use crate::output;
use anyhow::Result;
use clap::Parser;
use couchsql_storage::compare_values;
use std::cmp::Ordering;

/// Compare two JSON values in CouchDB view order
///
/// Prints -1, 0 or 1.
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    couchsql collate '\"a\"' '\"B\"'      # -1
    couchsql collate 'null' 'false'   # -1
    couchsql collate '[1, 2]' '{}'    # -1")]
pub struct CollateCmd {
    /// First value as JSON
    #[arg(value_name = "A", allow_hyphen_values = true)]
    pub a: String,

    /// Second value as JSON
    #[arg(value_name = "B", allow_hyphen_values = true)]
    pub b: String,
}

impl CollateCmd {
    pub fn execute(&self) -> Result<()> {
        let a = parse_json(&self.a, "A")?;
        let b = parse_json(&self.b, "B")?;
        let result = match compare_values(&a, &b) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        };
        output::json(&result)
    }
}
