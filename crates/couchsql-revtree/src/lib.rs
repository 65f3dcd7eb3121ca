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

//! Document revision trees for CouchSQL
//!
//! This crate implements the CouchDB document model on top of
//! [`couchsql_storage`]:
//! - Revision identifiers derived from canonical JSON content hashes
//! - Deterministic winning-revision selection across conflicting leaves
//! - Optimistic-concurrency writes, tombstones and replication-mode writes
//! - Per-revision attachments with stub / keep / remove semantics
//! - A changes feed plus RevsDiff, OpenRevs and Purge for replicators
//!
//! # Architecture
//!
//! Each document is a forest of revision nodes stored as flat rows with
//! parent pointers. Leaves are nodes without children; the winner is the
//! leaf picked by `(not deleted, highest rev, greatest rev_id)`. Every
//! ancestor and descendant walk is a recursive SQL query, so no tree is
//! ever held in memory.
//!
//! - **Writes** run in one transaction holding the store's write gate. A new
//!   child is inserted only while its parent is still a leaf, so two writers
//!   racing on the same base produce one success and one Conflict.
//! - **Attachments** are rows tied to the revision that introduced them and
//!   are never copied. Removal marks the row with the removing revision,
//!   which keeps it visible from older revisions and other branches.
//!
//! # Examples
//!
//! ```no_run
//! use couchsql_revtree::{Database, GetOptions, PutOptions};
//! use couchsql_storage::Store;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Store::open_in_memory().await?;
//!     let db = Database::create(&store, "albums").await?;
//!
//!     // Create a document, then update it on top of its revision
//!     let rev = db.put("foo", json!({"foo": "bar"}), PutOptions::default()).await?;
//!     println!("created {}", rev);
//!     let rev = db
//!         .put("foo", json!({"foo": "baz"}), PutOptions::with_rev(rev.to_string()))
//!         .await?;
//!
//!     // Read the winner with its history
//!     let options = GetOptions { revs: true, ..GetOptions::default() };
//!     let doc = db.get("foo", &options).await?;
//!     println!("{} at {}: {}", doc.id, doc.rev, doc.body);
//!
//!     db.delete("foo", Some(&rev.to_string())).await?;
//!     Ok(())
//! }
//! ```

pub mod attachments;
pub mod changes;
pub mod database;
pub mod document;
pub mod get;
pub mod indexes;
pub mod mutation;
pub mod options;
pub mod replication;
pub mod resolver;
pub mod rev;

pub use attachments::{digest, Attachment, AttachmentMeta};
pub use changes::Change;
pub use database::{Database, DEFAULT_CONTENT_TYPE};
pub use document::{prepare, validate_doc_id, AttachmentInput, Document, PreparedDoc};
pub use indexes::{CreateIndexResult, IndexField, IndexInfo, IndexOutcome, SortDirection};
pub use options::{GetOptions, PutOptions};
pub use replication::{
    replicate, OpenRev, OpenRevsSelector, ReplicationPeer, ReplicationStats, RevsDiffEntry,
};
pub use resolver::{HistoryEntry, Leaf, Node, RevStatus};
pub use rev::{calculate_rev_id, canonical_json, Rev, RevInput, Revisions};
