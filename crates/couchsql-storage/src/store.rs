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

//! SQLite-backed store holding any number of databases

use crate::collation::{compare_raw, COLLATION_NAME};
use crate::cursor::{Cursor, PAGE_SIZE};
use crate::error::{StorageError, StorageResult};
use crate::schema::Tables;
use regex_lite::Regex;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Row, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

const DATABASES_TABLE: &str = "couchsql_databases";
const UPDATES_TABLE: &str = "couchsql_db_updates_log";

/// System databases accepted despite the leading underscore
pub const SYSTEM_DATABASES: [&str; 3] = ["_users", "_replicator", "_global_changes"];

/// Options for opening a [`Store`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Database file, or `None` for a private in-memory store
    pub path: Option<PathBuf>,
    /// Create the file when missing
    pub create_if_missing: bool,
    /// Upper bound on pooled connections (forced to 1 in memory)
    pub max_connections: u32,
    /// How long a connection waits on a locked database
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            path: None,
            create_if_missing: true,
            max_connections: 5,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl StoreOptions {
    /// Options for an in-memory store
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Options for a store kept in `path`
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        StoreOptions {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Set the maximum number of pooled connections
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Set the busy timeout
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Control whether a missing file is created
    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}

/// One entry of the database update log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbUpdate {
    /// Position in the log
    pub seq: i64,
    /// Affected database
    pub db_name: String,
    /// `created` or `deleted`
    pub kind: String,
}

/// A write transaction holding the store's write gate
///
/// Dropping it without [`WriteTransaction::commit`] rolls back.
pub struct WriteTransaction {
    tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

impl WriteTransaction {
    /// Connection to run statements on
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    /// Commit and release the write gate
    pub async fn commit(self) -> StorageResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Handle to an SQLite file (or memory) holding CouchSQL databases
///
/// Cloning is cheap; clones share the pool and the write gate.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl Store {
    /// Open a store
    pub async fn open(options: StoreOptions) -> StorageResult<Self> {
        let connect = match &options.path {
            Some(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(options.create_if_missing)
                .journal_mode(SqliteJournalMode::Wal),
            None => SqliteConnectOptions::from_str("sqlite::memory:")?,
        }
        .foreign_keys(true)
        .busy_timeout(options.busy_timeout)
        .collation(COLLATION_NAME, |a: &str, b: &str| {
            compare_raw(a.as_bytes(), b.as_bytes())
        });

        // every in-memory connection would be a separate database
        let pool_options = match options.path {
            Some(_) => SqlitePoolOptions::new().max_connections(options.max_connections),
            None => SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        };
        let pool = pool_options.connect_with(connect).await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY)",
            DATABASES_TABLE
        ))
        .execute(&pool)
        .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (seq INTEGER PRIMARY KEY AUTOINCREMENT, db_name TEXT NOT NULL, type TEXT NOT NULL)",
            UPDATES_TABLE
        ))
        .execute(&pool)
        .await?;

        match &options.path {
            Some(path) => info!(path = %path.display(), "Opened store"),
            None => debug!("Opened in-memory store"),
        }
        Ok(Store {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Open a private in-memory store
    pub async fn open_in_memory() -> StorageResult<Self> {
        Self::open(StoreOptions::in_memory()).await
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a mutating transaction.
    ///
    /// Waits for every other in-process writer to finish first.
    pub async fn begin_write(&self) -> StorageResult<WriteTransaction> {
        let gate = Arc::clone(&self.write_gate).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTransaction { tx, _gate: gate })
    }

    /// Begin a read-only snapshot
    pub async fn begin_read(&self) -> StorageResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Create database `name`
    pub async fn create_db(&self, name: &str) -> StorageResult<()> {
        validate_db_name(name)?;
        let mut tx = self.begin_write().await?;
        if exists_in(tx.conn(), name).await? {
            return Err(StorageError::precondition_failed(format!(
                "database {} already exists",
                name
            )));
        }
        for stmt in Tables::new(name).create_statements() {
            sqlx::query(&stmt).execute(tx.conn()).await?;
        }
        sqlx::query(&format!("INSERT INTO {} (name) VALUES (?)", DATABASES_TABLE))
            .bind(name)
            .execute(tx.conn())
            .await?;
        log_update(tx.conn(), name, "created").await?;
        tx.commit().await?;
        info!(db = %name, "Created database");
        Ok(())
    }

    /// Drop database `name` with all its documents
    pub async fn destroy_db(&self, name: &str) -> StorageResult<()> {
        let mut tx = self.begin_write().await?;
        if !exists_in(tx.conn(), name).await? {
            return Err(StorageError::not_found(format!("database {}", name)));
        }
        for stmt in Tables::new(name).drop_statements() {
            sqlx::query(&stmt).execute(tx.conn()).await?;
        }
        sqlx::query(&format!("DELETE FROM {} WHERE name = ?", DATABASES_TABLE))
            .bind(name)
            .execute(tx.conn())
            .await?;
        log_update(tx.conn(), name, "deleted").await?;
        tx.commit().await?;
        info!(db = %name, "Destroyed database");
        Ok(())
    }

    /// Whether database `name` exists
    pub async fn db_exists(&self, name: &str) -> StorageResult<bool> {
        let mut conn = self.pool.acquire().await?;
        exists_in(&mut conn, name).await
    }

    /// Names of all databases, sorted
    pub async fn all_dbs(&self) -> StorageResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT name FROM {} ORDER BY name",
            DATABASES_TABLE
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    /// Update log entries after `since`, oldest first
    ///
    /// Entries are read [`PAGE_SIZE`] at a time and no connection is held
    /// between pages.
    pub fn db_updates(&self, since: i64) -> Cursor<DbUpdate> {
        let pool = self.pool.clone();
        Cursor::from_stream(async_stream::try_stream! {
            let sql = format!(
                "SELECT seq, db_name, type FROM {} WHERE seq > ? ORDER BY seq LIMIT ?",
                UPDATES_TABLE
            );
            let mut after = since;
            loop {
                let rows = sqlx::query(&sql)
                    .bind(after)
                    .bind(PAGE_SIZE)
                    .fetch_all(&pool)
                    .await?;
                let short = (rows.len() as i64) < PAGE_SIZE;
                for row in rows {
                    let update = DbUpdate {
                        seq: row.try_get("seq")?,
                        db_name: row.try_get("db_name")?,
                        kind: row.try_get("type")?,
                    };
                    after = update.seq;
                    yield update;
                }
                if short {
                    break;
                }
            }
        })
    }

    /// Sequence of the latest update log entry, 0 when empty
    pub async fn last_update_seq(&self) -> StorageResult<i64> {
        let seq: Option<i64> =
            sqlx::query_scalar(&format!("SELECT MAX(seq) FROM {}", UPDATES_TABLE))
                .fetch_one(&self.pool)
                .await?;
        Ok(seq.unwrap_or(0))
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn exists_in(conn: &mut SqliteConnection, name: &str) -> StorageResult<bool> {
    let found: Option<String> = sqlx::query_scalar(&format!(
        "SELECT name FROM {} WHERE name = ?",
        DATABASES_TABLE
    ))
    .bind(name)
    .fetch_optional(conn)
    .await?;
    Ok(found.is_some())
}

async fn log_update(conn: &mut SqliteConnection, name: &str, kind: &str) -> StorageResult<()> {
    sqlx::query(&format!(
        "INSERT INTO {} (db_name, type) VALUES (?, ?)",
        UPDATES_TABLE
    ))
    .bind(name)
    .bind(kind)
    .execute(conn)
    .await?;
    Ok(())
}

fn db_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9_$()+/-]*$").unwrap_or_else(|e| unreachable!("{}", e))
    })
}

/// Check a database name against CouchDB's naming rules
///
/// ```
/// use couchsql_storage::store::validate_db_name;
///
/// assert!(validate_db_name("albums").is_ok());
/// assert!(validate_db_name("_users").is_ok());
/// assert!(validate_db_name("Albums").is_err());
/// ```
pub fn validate_db_name(name: &str) -> StorageResult<()> {
    if SYSTEM_DATABASES.contains(&name) || db_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(StorageError::bad_request(format!(
            "invalid database name: {:?}",
            name
        )))
    }
}
