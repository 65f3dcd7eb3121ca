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
use super::{parse_json, parse_options};
use crate::context::CliContext;
use crate::output;
use anyhow::{bail, Result};
use clap::Parser;
use couchsql_revtree::{GetOptions, PutOptions};
use serde_json::{json, Value};

/// Store a document revision
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    # Create a document
    couchsql put inventory widget '{\"count\": 3}'

    # Update it
    couchsql put inventory widget '{\"count\": 4}' --rev 1-6f1e2c...

    # Store a replicated revision as is
    couchsql put inventory widget '{\"_rev\": \"3-abc\", \"count\": 9}' --options '{\"new_edits\": false}'")]
pub struct PutCmd {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Document id
    #[arg(value_name = "ID")]
    pub id: String,

    /// Document body as JSON
    #[arg(value_name = "BODY")]
    pub body: String,

    /// Base revision
    #[arg(long, value_name = "REV")]
    pub rev: Option<String>,

    /// Put options as JSON (rev, new_edits, revisions)
    #[arg(long, value_name = "JSON")]
    pub options: Option<String>,
}

impl PutCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let db = ctx.database(&self.db).await?;
        let body = parse_json(&self.body, "BODY")?;
        let mut options: PutOptions = parse_options(self.options.as_deref())?;
        if self.rev.is_some() {
            options.rev.clone_from(&self.rev);
        }

        let rev = db.put(&self.id, body, options).await?;
        output::ok(json!({"id": self.id, "rev": rev}))
    }
}

/// Create a document with a generated id
#[derive(Parser, Debug)]
pub struct CreateCmd {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Document body as JSON; an `_id` member is used as the id
    #[arg(value_name = "BODY")]
    pub body: String,
}

impl CreateCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let db = ctx.database(&self.db).await?;
        let body = parse_json(&self.body, "BODY")?;
        if !ctx.config.engine.uuid_ids && body.get("_id").and_then(Value::as_str).is_none() {
            bail!("the document has no _id and generated ids are disabled (engine.uuid_ids)");
        }

        let (id, rev) = db.create_doc(body).await?;
        output::ok(json!({"id": id, "rev": rev}))
    }
}

/// Read a document
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    # Read the winning revision
    couchsql get inventory widget

    # Read a specific revision with its history
    couchsql get inventory widget --rev 1-6f1e2c... --options '{\"revs\": true}'

    # Show conflicts and revision status
    couchsql get inventory widget --options '{\"meta\": true}'")]
pub struct GetCmd {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Document id
    #[arg(value_name = "ID")]
    pub id: String,

    /// Revision to read instead of the winner
    #[arg(long, value_name = "REV")]
    pub rev: Option<String>,

    /// Read options as JSON (latest, conflicts, revs, revs_info, meta, ...)
    #[arg(long, value_name = "JSON")]
    pub options: Option<String>,
}

impl GetCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let db = ctx.database(&self.db).await?;
        let options = read_options(self.rev.as_deref(), self.options.as_deref())?;
        let doc = db.get(&self.id, &options).await?;
        output::json(&doc)
    }
}

/// Print the revision a read would return
#[derive(Parser, Debug)]
pub struct RevCmd {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Document id
    #[arg(value_name = "ID")]
    pub id: String,

    /// Revision to resolve instead of the winner
    #[arg(long, value_name = "REV")]
    pub rev: Option<String>,

    /// Follow the revision to the newest leaf of its branch
    #[arg(long)]
    pub latest: bool,
}

impl RevCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let db = ctx.database(&self.db).await?;
        let options = GetOptions {
            rev: self.rev.clone(),
            latest: self.latest,
            ..GetOptions::default()
        };
        let rev = db.get_rev(&self.id, &options).await?;
        output::json(&json!({"id": self.id, "rev": rev}))
    }
}

/// Delete a document by writing a tombstone
#[derive(Parser, Debug)]
pub struct DeleteCmd {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Document id
    #[arg(value_name = "ID")]
    pub id: String,

    /// Leaf revision to delete
    #[arg(long, value_name = "REV")]
    pub rev: Option<String>,
}

impl DeleteCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let db = ctx.database(&self.db).await?;
        let rev = db.delete(&self.id, self.rev.as_deref()).await?;
        output::ok(json!({"id": self.id, "rev": rev}))
    }
}

/// Merge `--rev` into the `--options` map
pub(crate) fn read_options(rev: Option<&str>, options: Option<&str>) -> Result<GetOptions> {
    let mut options: GetOptions = parse_options(options)?;
    if let Some(rev) = rev {
        options.rev = Some(rev.to_string());
    }
    Ok(options)
}
