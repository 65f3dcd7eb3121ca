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
use super::doc::read_options;
use super::{parse_json, parse_rev_map};
use crate::context::CliContext;
use crate::output;
use anyhow::Result;
use clap::Parser;
use couchsql_revtree::{replicate, OpenRev, OpenRevsSelector};
use serde_json::{json, Value};

/// Report which revisions a database is missing
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    couchsql revs-diff inventory '{\"widget\": [\"2-abc\", \"3-def\"], \"gadget\": [\"1-xyz\"]}'")]
pub struct RevsDiffCmd {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// JSON object mapping document ids to revision arrays
    #[arg(value_name = "REQUEST")]
    pub request: String,
}

impl RevsDiffCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let db = ctx.database(&self.db).await?;
        let request = parse_rev_map(&self.request)?;

        let mut results = serde_json::Map::new();
        let mut cursor = db.revs_diff(request)?;
        while let Some(entry) = cursor.next().await {
            let entry = entry?;
            let mut value = json!({"missing": entry.missing});
            if !entry.possible_ancestors.is_empty() {
                value["possible_ancestors"] = json!(entry.possible_ancestors);
            }
            results.insert(entry.id, value);
        }
        output::json(&results)
    }
}

/// Permanently remove leaf revisions
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    couchsql purge inventory '{\"widget\": [\"3-def\"]}'")]
pub struct PurgeCmd {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// JSON object mapping document ids to revision arrays
    #[arg(value_name = "REQUEST")]
    pub request: String,
}

impl PurgeCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let db = ctx.database(&self.db).await?;
        let request = parse_rev_map(&self.request)?;
        let requested: usize = request.values().map(Vec::len).sum();

        let purged = db.purge(request).await?;
        let removed: usize = purged.values().map(Vec::len).sum();
        if removed < requested {
            output::warning(&format!(
                "{} of {} revisions were unknown or not leaves and were skipped",
                requested - removed,
                requested
            ));
        }
        output::json(&json!({"purged": purged}))
    }
}

/// Read several revisions of a document at once
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    # Every leaf, conflicts included
    couchsql open-revs inventory widget

    # Specific revisions, each followed to its newest leaf
    couchsql open-revs inventory widget --revs '[\"1-abc\", \"2-def\"]' --latest")]
pub struct OpenRevsCmd {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Document id
    #[arg(value_name = "ID")]
    pub id: String,

    /// `"all"` or a JSON array of revisions
    #[arg(long, value_name = "JSON", default_value = "\"all\"")]
    pub revs: String,

    /// Follow each revision to the newest leaf of its branch
    #[arg(long)]
    pub latest: bool,

    /// Read options as JSON, applied to every returned document
    #[arg(long, value_name = "JSON")]
    pub options: Option<String>,
}

impl OpenRevsCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let db = ctx.database(&self.db).await?;
        let selector = OpenRevsSelector::from_value(&parse_json(&self.revs, "--revs")?)?;
        let mut options = read_options(None, self.options.as_deref())?;
        options.latest |= self.latest;

        let mut results: Vec<Value> = Vec::new();
        let mut cursor = db.open_revs(&self.id, selector, &options).await?;
        while let Some(item) = cursor.next().await {
            results.push(match item? {
                OpenRev::Ok(doc) => json!({"ok": doc}),
                OpenRev::Missing(rev) => json!({"missing": rev}),
            });
        }
        output::json(&results)
    }
}

/// List documents changed after a sequence
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    couchsql changes inventory
    couchsql changes inventory --since 42 --limit 10")]
pub struct ChangesCmd {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Only report changes after this sequence
    #[arg(long, default_value_t = 0)]
    pub since: i64,

    /// Report at most this many documents
    #[arg(long)]
    pub limit: Option<usize>,
}

impl ChangesCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let db = ctx.database(&self.db).await?;
        let mut results = Vec::new();
        let mut last_seq = self.since;
        let mut cursor = db.changes(self.since, self.limit);
        while let Some(change) = cursor.next().await {
            let change = change?;
            last_seq = change.seq;
            results.push(change);
        }
        output::json(&json!({"results": results, "last_seq": last_seq}))
    }
}

/// Copy changed documents from one database to another
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    couchsql replicate inventory inventory_backup

    # Resume from the last_seq of an earlier run
    couchsql replicate inventory inventory_backup --since 42")]
pub struct ReplicateCmd {
    /// Source database name
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Target database name
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Source sequence to start after
    #[arg(long, default_value_t = 0)]
    pub since: i64,

    /// Create the target database when it does not exist
    #[arg(long)]
    pub create_target: bool,
}

impl ReplicateCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let source = ctx.database(&self.source).await?;
        if self.create_target && !ctx.store.db_exists(&self.target).await? {
            ctx.store.create_db(&self.target).await?;
        }
        let target = ctx.database(&self.target).await?;
        let stats = replicate(&source, &target, self.since).await?;
        output::json(&stats)
    }
}
