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

//! Winning revision and ancestry resolution
//!
//! All walks run as recursive queries over the revision table; nothing is
//! cached between calls.
//!
//! # Algorithm
//!
//! The winner is picked among the leaves that carry a body:
//! 1. non-deleted leaves before deleted ones
//! 2. then the highest generation
//! 3. then the greatest `rev_id`
//!
//! which is a single `ORDER BY deleted, rev DESC, rev_id DESC`.

use crate::database::Database;
use crate::rev::Rev;
use couchsql_storage::sqlx::{self, sqlite::SqliteConnection, Row};
use couchsql_storage::{StorageError, StorageResult, Tables};
use serde::Serialize;

const LEAVES_SQL: &str = r#"
SELECT r.rev AS rev, r.rev_id AS rev_id, d.deleted AS deleted
FROM {revs} r
JOIN {docs} d ON d.id = r.id AND d.rev = r.rev AND d.rev_id = r.rev_id
LEFT JOIN {revs} child
    ON child.id = r.id AND child.parent_rev = r.rev AND child.parent_rev_id = r.rev_id
WHERE r.id = ?1 AND child.id IS NULL
ORDER BY d.deleted ASC, r.rev DESC, r.rev_id DESC
"#;

const TREE_LEAVES_SQL: &str = r#"
SELECT r.rev AS rev, r.rev_id AS rev_id
FROM {revs} r
LEFT JOIN {revs} child
    ON child.id = r.id AND child.parent_rev = r.rev AND child.parent_rev_id = r.rev_id
WHERE r.id = ?1 AND child.id IS NULL
ORDER BY r.rev DESC, r.rev_id DESC
"#;

const NODE_SQL: &str = r#"
SELECT r.parent_rev AS parent_rev, r.parent_rev_id AS parent_rev_id,
    EXISTS (
        SELECT 1 FROM {revs} c
        WHERE c.id = r.id AND c.parent_rev = r.rev AND c.parent_rev_id = r.rev_id
    ) AS has_children
FROM {revs} r
WHERE r.id = ?1 AND r.rev = ?2 AND r.rev_id = ?3
"#;

const ANCESTORS_SQL: &str = r#"
WITH RECURSIVE ancestors (rev, rev_id, parent_rev, parent_rev_id) AS (
    SELECT rev, rev_id, parent_rev, parent_rev_id
    FROM {revs} WHERE id = ?1 AND rev = ?2 AND rev_id = ?3
    UNION ALL
    SELECT r.rev, r.rev_id, r.parent_rev, r.parent_rev_id
    FROM {revs} r
    JOIN ancestors a ON r.id = ?1 AND r.rev = a.parent_rev AND r.rev_id = a.parent_rev_id
)
SELECT a.rev AS rev, a.rev_id AS rev_id, d.deleted AS deleted
FROM ancestors a
LEFT JOIN {docs} d ON d.id = ?1 AND d.rev = a.rev AND d.rev_id = a.rev_id
ORDER BY a.rev DESC
"#;

const DESCENDANT_LEAVES_SQL: &str = r#"
WITH RECURSIVE descendants (rev, rev_id) AS (
    SELECT rev, rev_id FROM {revs} WHERE id = ?1 AND rev = ?2 AND rev_id = ?3
    UNION ALL
    SELECT r.rev, r.rev_id
    FROM {revs} r
    JOIN descendants s ON r.id = ?1 AND r.parent_rev = s.rev AND r.parent_rev_id = s.rev_id
)
SELECT s.rev AS rev, s.rev_id AS rev_id, d.deleted AS deleted
FROM descendants s
JOIN {docs} d ON d.id = ?1 AND d.rev = s.rev AND d.rev_id = s.rev_id
LEFT JOIN {revs} child
    ON child.id = ?1 AND child.parent_rev = s.rev AND child.parent_rev_id = s.rev_id
WHERE child.id IS NULL
ORDER BY d.deleted ASC, s.rev DESC, s.rev_id DESC
"#;

/// A leaf revision that carries a body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Leaf {
    /// The revision
    pub rev: Rev,
    /// Whether its body is a tombstone
    pub deleted: bool,
}

/// A revision node and its position in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// The revision
    pub rev: Rev,
    /// Its parent, when known
    pub parent: Option<Rev>,
    /// Whether no other node names it as parent
    pub is_leaf: bool,
}

/// Availability of a revision's body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RevStatus {
    /// Body stored
    Available,
    /// Body stored as a tombstone
    Deleted,
    /// Only the node is known
    Missing,
}

/// One step of a revision's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// The revision
    pub rev: Rev,
    /// Its body status
    pub status: RevStatus,
}

fn leaf_from_row(row: &sqlx::sqlite::SqliteRow) -> StorageResult<Leaf> {
    Ok(Leaf {
        rev: Rev::new(row.try_get::<i64, _>("rev")?, row.try_get::<String, _>("rev_id")?),
        deleted: row.try_get("deleted")?,
    })
}

/// Leaves with a body, winner first
pub(crate) async fn leaves(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
) -> StorageResult<Vec<Leaf>> {
    let rows = sqlx::query(&tables.render(LEAVES_SQL))
        .bind(id)
        .fetch_all(conn)
        .await?;
    rows.iter().map(leaf_from_row).collect()
}

/// The winning revision, if the document has any body
pub(crate) async fn winner(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
) -> StorageResult<Option<Leaf>> {
    let sql = format!("{} LIMIT 1", tables.render(LEAVES_SQL));
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    row.as_ref().map(leaf_from_row).transpose()
}

/// Every childless node, with or without a body, highest first
pub(crate) async fn tree_leaves(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
) -> StorageResult<Vec<Rev>> {
    let rows = sqlx::query(&tables.render(TREE_LEAVES_SQL))
        .bind(id)
        .fetch_all(conn)
        .await?;
    rows.iter()
        .map(|row| -> StorageResult<Rev> {
            Ok(Rev::new(row.try_get::<i64, _>("rev")?, row.try_get::<String, _>("rev_id")?))
        })
        .collect()
}

/// Look up one node
pub(crate) async fn node(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
) -> StorageResult<Option<Node>> {
    let row = sqlx::query(&tables.render(NODE_SQL))
        .bind(id)
        .bind(rev.rev)
        .bind(rev.id.as_str())
        .fetch_optional(conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let parent_rev: Option<i64> = row.try_get("parent_rev")?;
    let parent_rev_id: Option<String> = row.try_get("parent_rev_id")?;
    let has_children: i64 = row.try_get("has_children")?;
    Ok(Some(Node {
        rev: rev.clone(),
        parent: parent_rev.zip(parent_rev_id).map(|(r, i)| Rev::new(r, i)),
        is_leaf: has_children == 0,
    }))
}

/// `rev` and its ancestors, newest first
pub(crate) async fn history(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
) -> StorageResult<Vec<HistoryEntry>> {
    let rows = sqlx::query(&tables.render(ANCESTORS_SQL))
        .bind(id)
        .bind(rev.rev)
        .bind(rev.id.as_str())
        .fetch_all(conn)
        .await?;
    rows.iter()
        .map(|row| -> StorageResult<HistoryEntry> {
            let deleted: Option<bool> = row.try_get("deleted")?;
            Ok(HistoryEntry {
                rev: Rev::new(row.try_get::<i64, _>("rev")?, row.try_get::<String, _>("rev_id")?),
                status: match deleted {
                    Some(false) => RevStatus::Available,
                    Some(true) => RevStatus::Deleted,
                    None => RevStatus::Missing,
                },
            })
        })
        .collect()
}

async fn branch_leaves(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
) -> StorageResult<Vec<Leaf>> {
    sqlx::query(&tables.render(DESCENDANT_LEAVES_SQL))
        .bind(id)
        .bind(rev.rev)
        .bind(rev.id.as_str())
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(leaf_from_row)
        .collect()
}

/// Resolve `rev` to the newest live leaf below it.
///
/// Falls back to the document's live winner when the branch ends in
/// tombstones. `None` when `rev` is unknown or the document has no live
/// leaf at all.
pub(crate) async fn latest(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
) -> StorageResult<Option<Rev>> {
    let branch = branch_leaves(conn, tables, id, rev).await?;
    if let Some(live) = branch.iter().find(|leaf| !leaf.deleted) {
        return Ok(Some(live.rev.clone()));
    }
    if branch.is_empty() && node(conn, tables, id, rev).await?.is_none() {
        return Ok(None);
    }
    Ok(winner(conn, tables, id)
        .await?
        .filter(|win| !win.deleted)
        .map(|win| win.rev))
}

/// Leaf of the branch below `rev`: the newest live one, else the newest tombstone
pub(crate) async fn branch_leaf(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
) -> StorageResult<Option<Rev>> {
    Ok(branch_leaves(conn, tables, id, rev)
        .await?
        .into_iter()
        .next()
        .map(|leaf| leaf.rev))
}

/// Check that `rev` exists and is a leaf, the precondition for extending it
pub(crate) async fn require_leaf(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
) -> StorageResult<Node> {
    match node(conn, tables, id, rev).await? {
        Some(node) if node.is_leaf => Ok(node),
        _ => Err(StorageError::conflict("document update conflict")),
    }
}

impl Database {
    /// The winning revision of `doc_id`, tombstone or not
    pub async fn winner(&self, doc_id: &str) -> StorageResult<Option<Leaf>> {
        let mut tx = self.store().begin_read().await?;
        winner(&mut tx, self.tables(), doc_id).await
    }

    /// All leaves of `doc_id` that carry a body, winner first
    pub async fn leaves(&self, doc_id: &str) -> StorageResult<Vec<Leaf>> {
        let mut tx = self.store().begin_read().await?;
        leaves(&mut tx, self.tables(), doc_id).await
    }

    /// `rev` and its ancestors with their body status, newest first
    pub async fn history(&self, doc_id: &str, rev: &Rev) -> StorageResult<Vec<HistoryEntry>> {
        let mut tx = self.store().begin_read().await?;
        history(&mut tx, self.tables(), doc_id, rev).await
    }
}
