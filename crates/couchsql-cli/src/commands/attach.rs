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
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tokio::fs;

/// Manage document attachments
///
/// Every change to an attachment creates a new revision of its document.
/// Older revisions keep seeing the content they were written with.
#[derive(Parser, Debug)]
#[command(after_help = "EXAMPLES:
    # Attach a file to the winning revision
    couchsql attach put inventory widget photo.png --file ./photo.png --rev 2-abc...

    # Attach inline text
    couchsql attach put inventory widget notes.txt --data 'hello' --content-type text/plain --rev 3-def...

    # Read an attachment as it was at an older revision
    couchsql attach get inventory widget notes.txt --rev 3-def...

    # Remove an attachment
    couchsql attach delete inventory widget notes.txt --rev 4-fed...")]
pub struct AttachCmd {
    #[command(subcommand)]
    pub subcommand: AttachSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum AttachSubcommand {
    /// Add or replace an attachment
    Put(PutOpts),

    /// Read an attachment
    Get(GetOpts),

    /// Remove an attachment
    #[command(alias = "rm")]
    Delete(DeleteOpts),
}

/// Add or replace an attachment
#[derive(Parser, Debug)]
pub struct PutOpts {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Document id
    #[arg(value_name = "ID")]
    pub id: String,

    /// Attachment name
    #[arg(value_name = "FILENAME")]
    pub filename: String,

    /// Read the content from this file
    #[arg(long, value_name = "PATH", conflicts_with = "data")]
    pub file: Option<PathBuf>,

    /// Use this text as the content
    #[arg(long, value_name = "TEXT")]
    pub data: Option<String>,

    /// MIME type (defaults to engine.default_attachment_content_type)
    #[arg(long, value_name = "TYPE")]
    pub content_type: Option<String>,

    /// Base revision; omit only for a new document
    #[arg(long, value_name = "REV")]
    pub rev: Option<String>,
}

/// Read an attachment
#[derive(Parser, Debug)]
pub struct GetOpts {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Document id
    #[arg(value_name = "ID")]
    pub id: String,

    /// Attachment name
    #[arg(value_name = "FILENAME")]
    pub filename: String,

    /// Revision to read at (defaults to the winner)
    #[arg(long, value_name = "REV")]
    pub rev: Option<String>,

    /// Print the metadata as JSON instead of the content
    #[arg(long)]
    pub meta: bool,

    /// Write the content to this file and print the metadata
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Remove an attachment
#[derive(Parser, Debug)]
pub struct DeleteOpts {
    /// Database name
    #[arg(value_name = "DB")]
    pub db: String,

    /// Document id
    #[arg(value_name = "ID")]
    pub id: String,

    /// Attachment name
    #[arg(value_name = "FILENAME")]
    pub filename: String,

    /// Leaf revision to remove it from
    #[arg(long, value_name = "REV")]
    pub rev: Option<String>,
}

impl AttachCmd {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match &self.subcommand {
            AttachSubcommand::Put(opts) => self.put(ctx, opts).await,
            AttachSubcommand::Get(opts) => self.get(ctx, opts).await,
            AttachSubcommand::Delete(opts) => self.delete(ctx, opts).await,
        }
    }

    async fn put(&self, ctx: &CliContext, opts: &PutOpts) -> Result<()> {
        let content = match (&opts.file, &opts.data) {
            (Some(path), _) => fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
            (None, Some(data)) => data.clone().into_bytes(),
            (None, None) => bail!("either --file or --data is required"),
        };

        let db = ctx.database(&opts.db).await?;
        let rev = db
            .put_attachment(
                &opts.id,
                &opts.filename,
                opts.content_type.as_deref(),
                content,
                opts.rev.as_deref(),
            )
            .await?;
        output::ok(json!({"id": opts.id, "rev": rev}))
    }

    async fn get(&self, ctx: &CliContext, opts: &GetOpts) -> Result<()> {
        let db = ctx.database(&opts.db).await?;
        if opts.meta {
            let meta = db
                .get_attachment_meta(&opts.id, &opts.filename, opts.rev.as_deref())
                .await?;
            return output::json(&meta);
        }

        let attachment = db
            .get_attachment(&opts.id, &opts.filename, opts.rev.as_deref())
            .await?;
        match &opts.output {
            Some(path) => {
                fs::write(path, &attachment.data)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                output::json(&attachment.meta)
            }
            None => output::bytes(&attachment.data),
        }
    }

    async fn delete(&self, ctx: &CliContext, opts: &DeleteOpts) -> Result<()> {
        let db = ctx.database(&opts.db).await?;
        let rev = db
            .delete_attachment(&opts.id, &opts.filename, opts.rev.as_deref())
            .await?;
        output::ok(json!({"id": opts.id, "rev": rev}))
    }
}
