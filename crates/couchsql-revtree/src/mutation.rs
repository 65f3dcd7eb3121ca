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

//! Document mutation: Put, Delete and CreateDoc
//!
//! With `new_edits` (the default) a write must name a leaf as its base and
//! becomes that leaf's only child. The child insert is conditional on the
//! base still being childless, and `UNIQUE (id, rev, rev_id)` backs it up,
//! so of two writers racing on one base exactly one wins.
//!
//! Without `new_edits` the caller supplies the revision and its ancestry,
//! and the write is idempotent.

use crate::attachments::{self, AttachmentPlan};
use crate::database::Database;
use crate::document::{prepare, validate_doc_id, PreparedDoc};
use crate::options::PutOptions;
use crate::resolver::{self, Node};
use crate::rev::{calculate_rev_id, Rev, RevInput};
use couchsql_storage::sqlx::{self, sqlite::SqliteConnection};
use couchsql_storage::{StorageError, StorageResult, Tables};
use md5::{Digest, Md5};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

const INSERT_CHILD_SQL: &str = r#"
INSERT INTO {revs} (id, rev, rev_id, parent_rev, parent_rev_id)
SELECT ?1, ?2, ?3, ?4, ?5
WHERE ?4 IS NULL OR NOT EXISTS (
    SELECT 1 FROM {revs} WHERE id = ?1 AND parent_rev = ?4 AND parent_rev_id = ?5
)
"#;

const UPSERT_NODE_SQL: &str = r#"
INSERT INTO {revs} (id, rev, rev_id, parent_rev, parent_rev_id)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT (id, rev, rev_id) DO UPDATE
    SET parent_rev = excluded.parent_rev, parent_rev_id = excluded.parent_rev_id
    WHERE excluded.parent_rev IS NOT NULL
"#;

const INSERT_BODY_SQL: &str = r#"
INSERT INTO {docs} (id, rev, rev_id, doc, md5, deleted)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#;

const INSERT_BODY_IF_ABSENT_SQL: &str = r#"
INSERT INTO {docs} (id, rev, rev_id, doc, md5, deleted)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT (id, rev, rev_id) DO NOTHING
RETURNING seq
"#;

fn update_conflict() -> StorageError {
    StorageError::conflict("document update conflict")
}

/// Pick the parent for a new edit.
///
/// An explicit base must be a leaf. Without one the document must have no
/// live leaf; a fully deleted document is extended from its winning
/// tombstone.
pub(crate) async fn resolve_base(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    base: Option<&Rev>,
) -> StorageResult<Option<Rev>> {
    if let Some(base) = base {
        resolver::require_leaf(conn, tables, id, base).await?;
        return Ok(Some(base.clone()));
    }
    match resolver::winner(conn, tables, id).await? {
        None => Ok(None),
        Some(leaf) if leaf.deleted => Ok(Some(leaf.rev)),
        Some(_) => Err(update_conflict()),
    }
}

/// Like [`resolver::require_leaf`], but an unknown revision is NotFound
pub(crate) async fn require_existing_leaf(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
) -> StorageResult<Node> {
    match resolver::node(conn, tables, id, rev).await? {
        None => Err(StorageError::not_found(format!("{} at {}", id, rev))),
        Some(node) if !node.is_leaf => Err(update_conflict()),
        Some(node) => Ok(node),
    }
}

fn body_text(body: Vec<u8>) -> StorageResult<(String, String)> {
    let md5 = hex::encode(Md5::digest(&body));
    let text = String::from_utf8(body).map_err(StorageError::other)?;
    Ok((text, md5))
}

/// Append a new revision below `parent` (or a new root)
pub(crate) async fn write_child(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    parent: Option<&Rev>,
    mut prepared: PreparedDoc,
    default_content_type: &str,
) -> StorageResult<Rev> {
    let parent_visible = match parent {
        Some(parent) => attachments::visible(conn, tables, id, parent).await?,
        None => Vec::new(),
    };
    let plan = AttachmentPlan::build(
        prepared.attachments.take(),
        parent_visible,
        prepared.deleted,
        default_content_type,
    )?;
    let body = prepared.canonical_body()?;
    let rev_id = calculate_rev_id(RevInput {
        body: &body,
        attachments: plan.hash_inputs(),
        deleted: prepared.deleted,
        parent,
    });
    let rev = Rev::new(parent.map_or(1, |p| p.rev + 1), rev_id);

    let inserted = sqlx::query(&tables.render(INSERT_CHILD_SQL))
        .bind(id)
        .bind(rev.rev)
        .bind(rev.id.as_str())
        .bind(parent.map(|p| p.rev))
        .bind(parent.map(|p| p.id.as_str()))
        .execute(&mut *conn)
        .await
        .map_err(StorageError::from_insert)?;
    if inserted.rows_affected() == 0 {
        return Err(update_conflict());
    }

    let (text, md5) = body_text(body)?;
    sqlx::query(&tables.render(INSERT_BODY_SQL))
        .bind(id)
        .bind(rev.rev)
        .bind(rev.id.as_str())
        .bind(text)
        .bind(md5)
        .bind(prepared.deleted)
        .execute(&mut *conn)
        .await
        .map_err(StorageError::from_insert)?;

    plan.apply(conn, tables, id, &rev).await?;
    Ok(rev)
}

async fn upsert_node(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
    parent: Option<&Rev>,
) -> StorageResult<()> {
    sqlx::query(&tables.render(UPSERT_NODE_SQL))
        .bind(id)
        .bind(rev.rev)
        .bind(rev.id.as_str())
        .bind(parent.map(|p| p.rev))
        .bind(parent.map(|p| p.id.as_str()))
        .execute(conn)
        .await?;
    Ok(())
}

async fn put_new_edit(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    prepared: PreparedDoc,
    default_content_type: &str,
) -> StorageResult<Rev> {
    let mut base = prepared.rev.clone();
    if let Some(revisions) = &prepared.revisions {
        let chain = revisions.revs();
        for rev in &chain {
            if resolver::node(conn, tables, id, rev).await?.is_none() {
                return Err(update_conflict());
            }
        }
        if base.is_none() {
            base = chain.first().cloned();
        } else if base.as_ref() != chain.first() {
            return Err(StorageError::bad_request("_rev does not match _revisions"));
        }
    }
    let parent = resolve_base(conn, tables, id, base.as_ref()).await?;
    write_child(conn, tables, id, parent.as_ref(), prepared, default_content_type).await
}

async fn put_replicated(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    mut prepared: PreparedDoc,
    default_content_type: &str,
) -> StorageResult<Rev> {
    let leaf = match (&prepared.revisions, &prepared.rev) {
        (Some(revisions), rev) => {
            let chain = revisions.revs();
            let head = chain
                .first()
                .cloned()
                .ok_or_else(|| StorageError::bad_request("_revisions.ids must not be empty"))?;
            if rev.as_ref().is_some_and(|rev| rev != &head) {
                return Err(StorageError::bad_request("_rev does not match _revisions"));
            }
            // oldest first so every parent exists before its child
            for (i, rev) in chain.iter().enumerate().rev() {
                upsert_node(conn, tables, id, rev, chain.get(i + 1)).await?;
            }
            head
        }
        (None, Some(rev)) => {
            let rev = rev.clone();
            upsert_node(conn, tables, id, &rev, None).await?;
            rev
        }
        (None, None) => {
            return Err(StorageError::bad_request(
                "new_edits=false requires _rev or _revisions",
            ))
        }
    };

    let (text, md5) = body_text(prepared.canonical_body()?)?;
    let inserted = sqlx::query(&tables.render(INSERT_BODY_IF_ABSENT_SQL))
        .bind(id)
        .bind(leaf.rev)
        .bind(leaf.id.as_str())
        .bind(text)
        .bind(md5)
        .bind(prepared.deleted)
        .fetch_optional(&mut *conn)
        .await?;
    if inserted.is_none() {
        debug!(doc_id = %id, rev = %leaf, "Revision already stored");
        return Ok(leaf);
    }

    let parent = resolver::node(conn, tables, id, &leaf)
        .await?
        .and_then(|node| node.parent);
    let parent_visible = match &parent {
        Some(parent) => attachments::visible(conn, tables, id, parent).await?,
        None => Vec::new(),
    };
    AttachmentPlan::build(
        prepared.attachments.take(),
        parent_visible,
        prepared.deleted,
        default_content_type,
    )?
    .apply(conn, tables, id, &leaf)
    .await?;
    Ok(leaf)
}

impl Database {
    /// Store a document revision
    ///
    /// With `new_edits` the base revision comes from `_rev` or
    /// `options.rev` and must be a leaf; the new revision is its child.
    /// Without it, `_revisions` (or just `_rev`) is stored as given.
    ///
    /// # Errors
    ///
    /// - Conflict: stale or unknown base, or a live document and no base
    /// - BadRequest: id mismatch, malformed `_rev`/`_revisions`, or neither
    ///   given in replication mode
    /// - PreconditionFailed: an attachment stub with nothing to refer to
    pub async fn put(&self, doc_id: &str, doc: Value, options: PutOptions) -> StorageResult<Rev> {
        validate_doc_id(doc_id)?;
        let mut prepared = prepare(doc_id, doc)?;

        if let Some(option_rev) = Rev::parse_opt(options.rev.as_deref())? {
            if prepared.rev.is_none() {
                prepared.rev = Some(option_rev);
            } else if prepared.rev.as_ref() != Some(&option_rev) {
                return Err(StorageError::bad_request("_rev does not match the rev option"));
            }
        }
        if prepared.revisions.is_none() {
            if let Some(revisions) = options.revisions {
                revisions.validate()?;
                prepared.revisions = Some(revisions);
            }
        }

        let tables = self.tables();
        let mut tx = self.store().begin_write().await?;
        let rev = if options.new_edits {
            put_new_edit(tx.conn(), tables, doc_id, prepared, self.default_content_type()).await?
        } else {
            put_replicated(tx.conn(), tables, doc_id, prepared, self.default_content_type()).await?
        };
        tx.commit().await?;

        debug!(doc_id = %doc_id, rev = %rev, new_edits = options.new_edits, "Put document");
        Ok(rev)
    }

    /// Write a tombstone on top of leaf `rev`
    ///
    /// A missing `rev` is always a Conflict.
    pub async fn delete(&self, doc_id: &str, rev: Option<&str>) -> StorageResult<Rev> {
        let Some(base) = Rev::parse_opt(rev)? else {
            return Err(StorageError::conflict(
                "document update conflict: a revision is required",
            ));
        };
        let tables = self.tables();
        let mut tx = self.store().begin_write().await?;
        require_existing_leaf(tx.conn(), tables, doc_id, &base).await?;
        let rev = write_child(
            tx.conn(),
            tables,
            doc_id,
            Some(&base),
            PreparedDoc::tombstone(),
            self.default_content_type(),
        )
        .await?;
        tx.commit().await?;

        debug!(doc_id = %doc_id, rev = %rev, "Deleted document");
        Ok(rev)
    }

    /// Create a document, generating its id when `_id` is absent
    pub async fn create_doc(&self, doc: Value) -> StorageResult<(String, Rev)> {
        let id = match doc.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        let rev = self.put(&id, doc, PutOptions::default()).await?;
        Ok((id, rev))
    }
}
