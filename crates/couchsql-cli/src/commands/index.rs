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
use crate::context::CliContext;
use crate::output;
use anyhow::Result;
use clap::{Parser, Subcommand};

/// Manage Mango indexes
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    # Index two fields, the second descending
    couchsql index create inventory '{\"fields\": [\"name\", {\"price\": \"desc\"}]}' --ddoc shop --name by-price

    # Let the name be derived from the definition
    couchsql index create inventory '{\"fields\": [\"sku\"]}'

    couchsql index list inventory
    couchsql index delete inventory shop by-price")]
pub struct IndexCmd {
    #[command(subcommand)]
    pub subcommand: IndexSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum IndexSubcommand {
    /// Create an index
    Create(CreateOpts),

    /// List indexes
    #[command(alias = "ls")]
    List(ListOpts),

    /// Delete an index
    #[command(alias = "rm")]
    Delete(DeleteOpts),
}

/// Create an index
#[derive(Parser, Debug)]
pub struct CreateOpts {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Index definition as JSON, e.g. {"fields": ["name"]}
    #[arg(value_name = "DEFINITION")]
    pub definition: String,

    /// Design document (derived from the definition when omitted)
    #[arg(long, value_name = "DDOC", default_value = "")]
    pub ddoc: String,

    /// Index name (derived from the definition when omitted)
    #[arg(long, value_name = "NAME", default_value = "")]
    pub name: String,
}

/// List indexes
#[derive(Parser, Debug)]
pub struct ListOpts {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,
}

/// Delete an index
#[derive(Parser, Debug)]
pub struct DeleteOpts {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Design document, with or without the `_design/` prefix
    #[arg(value_name = "DDOC")]
    pub ddoc: String,

    /// Index name
    #[arg(value_name = "NAME")]
    pub name: String,
}

impl IndexCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match &self.subcommand {
            IndexSubcommand::Create(opts) => {
                let db = ctx.database(&opts.db).await?;
                let definition = parse_json(&opts.definition, "DEFINITION")?;
                let created = db.create_index(&opts.ddoc, &opts.name, &definition).await?;
                output::json(&created)
            }
            IndexSubcommand::List(opts) => {
                let db = ctx.database(&opts.db).await?;
                let indexes = db.get_indexes().await?;
                output::json(&serde_json::json!({
                    "total_rows": indexes.len(),
                    "indexes": indexes,
                }))
            }
            IndexSubcommand::Delete(opts) => {
                let db = ctx.database(&opts.db).await?;
                db.delete_index(&opts.ddoc, &opts.name).await?;
                output::ok(serde_json::json!({}))
            }
        }
    }
}
