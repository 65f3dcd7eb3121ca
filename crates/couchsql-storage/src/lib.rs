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

//! Storage layer for CouchSQL
//!
//! This crate owns everything below the revision engine:
//! - an SQLite [`Store`] holding any number of named databases
//! - the per-database schema, addressed through [`Tables`] by [`TableRole`]
//! - the CouchDB [`collation`] order, registered with SQLite as `COUCHDB_UCI`
//! - closable result [`Cursor`]s for streaming reads
//! - the shared [`StorageError`] taxonomy
//!
//! # Architecture
//!
//! A database is four tables: revision nodes, body snapshots, attachments
//! and Mango index definitions. Revision nodes form a forest per document
//! id through `(parent_rev, parent_rev_id)` pointers; nothing is kept in
//! memory between calls.
//!
//! Mutations run inside a [`WriteTransaction`], which also holds the store's
//! write gate. In-process writers therefore never interleave, and the
//! `UNIQUE (id, rev, rev_id)` constraint catches anyone else.
//!
//! # Examples
//!
//! ```no_run
//! use couchsql_storage::{Store, StoreOptions};
//!
//! #[tokio::main]
//! async fn main() -> couchsql_storage::StorageResult<()> {
//!     let store = Store::open(StoreOptions::file("couchsql.db")).await?;
//!
//!     if !store.db_exists("albums").await? {
//!         store.create_db("albums").await?;
//!     }
//!     println!("databases: {:?}", store.all_dbs().await?);
//!
//!     let mut updates = store.db_updates(0);
//!     while let Some(update) = updates.next().await {
//!         let update = update?;
//!         println!("{} {} {}", update.seq, update.db_name, update.kind);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Every fallible call returns [`StorageResult`]. SQL failures surface as
//! [`StorageError::Internal`]; the other variants carry CouchDB semantics:
//!
//! ```
//! use couchsql_storage::StorageError;
//!
//! let err = StorageError::conflict("document update conflict");
//! assert!(err.is_conflict());
//! assert_eq!(err.status_code(), 409);
//! ```

pub mod collation;
pub mod cursor;
pub mod error;
pub mod schema;
pub mod store;

pub use collation::{compare_raw, compare_values, COLLATION_NAME};
pub use cursor::{Cursor, CursorState, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use schema::{TableRole, Tables};
pub use store::{DbUpdate, Store, StoreOptions, WriteTransaction};

// Re-exported so dependents name the same driver types
pub use sqlx;
