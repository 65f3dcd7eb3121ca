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

mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use commands::*;
use context::{load_config, CliContext};
use couchsql_config::Config;
use couchsql_observability::{init_tracing_with_config, LogConfig, LogFormat};
use couchsql_storage::StorageError;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "couchsql")]
#[command(version, about = "CouchDB document revision trees on SQLite")]
#[command(
    long_about = "couchsql stores CouchDB-style documents, with their full revision trees,
conflicts and attachments, in a single SQLite file. Every command prints its result as JSON."
)]
#[command(propagate_version = true)]
#[command(author = "CouchSQL Contributors")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration
    #[arg(short = 'd', long, global = true, value_name = "FILE")]
    db_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Disable logging
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Colored output (always|auto|never)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage databases
    Db(DbCmd),

    /// Store a document revision
    Put(PutCmd),

    /// Create a document with a generated id
    Create(CreateCmd),

    /// Read a document
    Get(GetCmd),

    /// Print the revision a read would return
    Rev(RevCmd),

    /// Delete a document
    Delete(DeleteCmd),

    /// Manage attachments
    Attach(AttachCmd),

    /// Report revisions missing from a database
    #[command(name = "revs-diff")]
    RevsDiff(RevsDiffCmd),

    /// Permanently remove leaf revisions
    Purge(PurgeCmd),

    /// Read several revisions of a document
    #[command(name = "open-revs")]
    OpenRevs(OpenRevsCmd),

    /// List documents changed after a sequence
    Changes(ChangesCmd),

    /// Copy changed documents between databases
    Replicate(ReplicateCmd),

    /// Manage Mango indexes
    Index(IndexCmd),

    /// Compare two JSON values in view order
    Collate(CollateCmd),

    /// Show version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.color.as_str() {
        "never" => {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }
        "always" => {
            console::set_colors_enabled(true);
            console::set_colors_enabled_stderr(true);
        }
        "auto" => {}
        _ => {
            output::error(&format!("Invalid color option: {}", cli.color));
            std::process::exit(2);
        }
    }

    if let Err(e) = run(cli).await {
        report(&e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let command = match cli.command {
        Commands::Version => {
            print_version();
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "couchsql", &mut io::stdout());
            return Ok(());
        }
        Commands::Collate(cmd) => return cmd.execute(),
        command => command,
    };

    let config = load_config(cli.config.as_deref(), cli.db_path).await?;
    if !cli.quiet {
        init_logging(&config, cli.verbose)?;
    }

    let ctx = CliContext::open(config).await?;
    let result = match &command {
        Commands::Db(cmd) => cmd.execute(&ctx).await,
        Commands::Put(cmd) => cmd.execute(&ctx).await,
        Commands::Create(cmd) => cmd.execute(&ctx).await,
        Commands::Get(cmd) => cmd.execute(&ctx).await,
        Commands::Rev(cmd) => cmd.execute(&ctx).await,
        Commands::Delete(cmd) => cmd.execute(&ctx).await,
        Commands::Attach(cmd) => cmd.execute(&ctx).await,
        Commands::RevsDiff(cmd) => cmd.execute(&ctx).await,
        Commands::Purge(cmd) => cmd.execute(&ctx).await,
        Commands::OpenRevs(cmd) => cmd.execute(&ctx).await,
        Commands::Changes(cmd) => cmd.execute(&ctx).await,
        Commands::Replicate(cmd) => cmd.execute(&ctx).await,
        Commands::Index(cmd) => cmd.execute(&ctx).await,
        Commands::Collate(_) | Commands::Version | Commands::Completions { .. } => Ok(()),
    };
    ctx.close().await;
    result
}

fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let logging = &config.logging;
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let log_config = LogConfig::new()
        .with_format(logging.format.parse::<LogFormat>()?)
        .with_level(level)
        .with_color(console::colors_enabled_stderr())
        .with_sql_queries(logging.sql_queries);
    init_tracing_with_config(log_config)?;
    Ok(())
}

/// Print an error chain, tagging engine errors with their HTTP status
fn report(error: &anyhow::Error) {
    match error.downcast_ref::<StorageError>() {
        Some(engine) => output::error(&format!("{:#} (status {})", error, engine.status_code())),
        None => output::error(&format!("{:#}", error)),
    }
}

fn print_version() {
    output::detail("couchsql", env!("CARGO_PKG_VERSION"));
    output::detail("rust-version", env!("CARGO_PKG_RUST_VERSION"));
    output::detail("license", env!("CARGO_PKG_LICENSE"));
}
