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
use crate::context::CliContext;
use crate::output;
use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

/// Manage databases
///
/// Databases live side by side in one store. Each one gets its own set of
/// tables and every creation or deletion is recorded in the update log.
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    # Create a database
    couchsql db create inventory

    # List databases
    couchsql db list

    # Show the update log after sequence 10
    couchsql db updates --since 10

    # Remove a database and everything in it
    couchsql db destroy inventory")]
pub struct DbCmd {
    #[command(subcommand)]
    pub subcommand: DbSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum DbSubcommand {
    /// Create a database
    Create(NameOpts),

    /// Delete a database and all of its documents
    #[command(alias = "rm")]
    Destroy(NameOpts),

    /// List databases
    #[command(alias = "ls")]
    List,

    /// Show the database update log
    Updates(UpdatesOpts),
}

/// A database name
#[derive(Parser, Debug)]
pub struct NameOpts {
    /// Database name
    #[arg(value_name = "DB")]
    pub name: String,
}

/// Update log options
#[derive(Parser, Debug)]
pub struct UpdatesOpts {
    /// Only show entries after this sequence number
    #[arg(long, default_value_t = 0)]
    pub since: i64,
}

impl DbCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match &self.subcommand {
            DbSubcommand::Create(opts) => {
                ctx.store.create_db(&opts.name).await?;
                output::ok(json!({"db": opts.name}))
            }
            DbSubcommand::Destroy(opts) => {
                ctx.store.destroy_db(&opts.name).await?;
                output::ok(json!({"db": opts.name}))
            }
            DbSubcommand::List => output::json(&ctx.store.all_dbs().await?),
            DbSubcommand::Updates(opts) => self.updates(ctx, opts).await,
        }
    }

    async fn updates(&self, ctx: &CliContext, opts: &UpdatesOpts) -> Result<()> {
        let mut results = Vec::new();
        let mut cursor = ctx.store.db_updates(opts.since);
        while let Some(update) = cursor.next().await {
            let update = update?;
            results.push(json!({
                "seq": update.seq,
                "db_name": update.db_name,
                "type": update.kind,
            }));
        }
        let last_seq = ctx.store.last_update_seq().await?;
        output::json(&json!({"results": results, "last_seq": last_seq}))
    }
}
