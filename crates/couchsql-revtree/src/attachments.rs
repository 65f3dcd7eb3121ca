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

//! Attachment versioning
//!
//! Attachment rows are written once and never rewritten. A revision sees,
//! per filename, the newest row among itself and its ancestors, unless that
//! row's `deleted_rev` is itself or one of its ancestors. Removing an
//! attachment therefore only marks the row, and older revisions and other
//! branches keep seeing it.
//!
//! Every write computes one [`AttachmentPlan`]: for each filename the new
//! revision either adds content, keeps the parent's content (a stub), or
//! removes it.

use crate::database::Database;
use crate::document::{validate_doc_id, AttachmentInput, PreparedDoc};
use crate::mutation::{require_existing_leaf, resolve_base, write_child};
use crate::rev::Rev;
use crate::{get, resolver};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use couchsql_storage::sqlx::{self, sqlite::SqliteConnection, Row};
use couchsql_storage::{StorageError, StorageResult, Tables};
use md5::{Digest, Md5};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

const VISIBLE_SQL: &str = r#"
WITH RECURSIVE ancestors (rev, rev_id, parent_rev, parent_rev_id) AS (
    SELECT rev, rev_id, parent_rev, parent_rev_id
    FROM {revs} WHERE id = ?1 AND rev = ?2 AND rev_id = ?3
    UNION ALL
    SELECT r.rev, r.rev_id, r.parent_rev, r.parent_rev_id
    FROM {revs} r
    JOIN ancestors a ON r.id = ?1 AND r.rev = a.parent_rev AND r.rev_id = a.parent_rev_id
),
newest AS (
    SELECT att.pk, att.filename, att.content_type, att.length, att.digest, att.rev,
        att.deleted_rev, att.deleted_rev_id,
        ROW_NUMBER() OVER (PARTITION BY att.filename ORDER BY att.rev DESC, att.pk DESC) AS rn
    FROM {attachments} att
    JOIN ancestors a ON att.rev = a.rev AND att.rev_id = a.rev_id
    WHERE att.id = ?1
)
SELECT n.pk AS pk, n.filename AS filename, n.content_type AS content_type,
    n.length AS length, n.digest AS digest, n.rev AS revpos
FROM newest n
WHERE n.rn = 1 AND NOT EXISTS (
    SELECT 1 FROM ancestors a WHERE a.rev = n.deleted_rev AND a.rev_id = n.deleted_rev_id
)
ORDER BY n.filename
"#;

const DATA_SQL: &str = "SELECT data FROM {attachments} WHERE pk = ?1";

const INSERT_SQL: &str = r#"
INSERT INTO {attachments} (id, rev, rev_id, filename, content_type, length, digest, data)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#;

const MARK_REMOVED_SQL: &str = r#"
UPDATE {attachments} SET deleted_rev = ?1, deleted_rev_id = ?2
WHERE pk = ?3 AND deleted_rev IS NULL
"#;

const INSERT_REMOVED_SQL: &str = r#"
INSERT INTO {attachments}
    (id, rev, rev_id, filename, content_type, length, digest, data, deleted_rev, deleted_rev_id)
VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, x'', ?2, ?3)
"#;

/// Attachment metadata as seen from one revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentMeta {
    /// Attachment name
    pub filename: String,
    /// MIME type
    pub content_type: String,
    /// Size in bytes
    pub length: i64,
    /// `md5-<base64>`
    pub digest: String,
    /// Generation of the revision that wrote this content
    pub revpos: i64,
    #[serde(skip)]
    pub(crate) pk: i64,
}

/// Attachment metadata with its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Metadata
    pub meta: AttachmentMeta,
    /// Content
    pub data: Vec<u8>,
}

/// `md5-<base64>` digest of some content
///
/// ```
/// use couchsql_revtree::attachments::digest;
///
/// assert_eq!(digest(b"This is a base64 encoding"), "md5-TmfHxaRgUrE9l3tkAn4s0Q==");
/// ```
pub fn digest(data: &[u8]) -> String {
    format!("md5-{}", BASE64.encode(Md5::digest(data)))
}

fn raw_digest(digest: &str) -> Vec<u8> {
    digest
        .strip_prefix("md5-")
        .and_then(|b64| BASE64.decode(b64).ok())
        .unwrap_or_else(|| digest.as_bytes().to_vec())
}

/// Attachments visible at `rev`, by filename
pub(crate) async fn visible(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
) -> StorageResult<Vec<AttachmentMeta>> {
    let rows = sqlx::query(&tables.render(VISIBLE_SQL))
        .bind(id)
        .bind(rev.rev)
        .bind(rev.id.as_str())
        .fetch_all(conn)
        .await?;
    rows.iter()
        .map(|row| -> StorageResult<AttachmentMeta> {
            Ok(AttachmentMeta {
                filename: row.try_get("filename")?,
                content_type: row.try_get("content_type")?,
                length: row.try_get("length")?,
                digest: row.try_get("digest")?,
                revpos: row.try_get("revpos")?,
                pk: row.try_get("pk")?,
            })
        })
        .collect()
}

/// Content of one attachment row
pub(crate) async fn load_data(
    conn: &mut SqliteConnection,
    tables: &Tables,
    meta: &AttachmentMeta,
) -> StorageResult<Vec<u8>> {
    let data: Vec<u8> = sqlx::query_scalar(&tables.render(DATA_SQL))
        .bind(meta.pk)
        .fetch_one(conn)
        .await?;
    Ok(data)
}

/// What a new revision does with one filename
#[derive(Debug, Clone)]
pub(crate) enum AttachmentAction {
    /// Write new content
    Add {
        content_type: String,
        data: Vec<u8>,
        digest: String,
    },
    /// Keep what the parent sees
    Keep(AttachmentMeta),
    /// Hide what the parent sees
    Remove(AttachmentMeta),
}

/// The per-filename decisions for one new revision
#[derive(Debug, Clone, Default)]
pub(crate) struct AttachmentPlan {
    actions: BTreeMap<String, AttachmentAction>,
}

impl AttachmentPlan {
    /// Decide every filename the parent sees or the new document names.
    ///
    /// A tombstone drops everything. A stub must refer to an attachment
    /// visible at the parent.
    pub(crate) fn build(
        inputs: Option<BTreeMap<String, AttachmentInput>>,
        parent_visible: Vec<AttachmentMeta>,
        deleted: bool,
        default_content_type: &str,
    ) -> StorageResult<Self> {
        let mut inputs = if deleted { BTreeMap::new() } else { inputs.unwrap_or_default() };
        let mut actions = BTreeMap::new();

        for meta in parent_visible {
            let action = match inputs.remove(&meta.filename) {
                None => AttachmentAction::Remove(meta.clone()),
                Some(AttachmentInput::Stub) => AttachmentAction::Keep(meta.clone()),
                Some(AttachmentInput::Content { content_type, data }) => AttachmentAction::Add {
                    content_type: content_type.unwrap_or_else(|| default_content_type.to_string()),
                    digest: digest(&data),
                    data,
                },
            };
            actions.insert(meta.filename, action);
        }
        for (filename, input) in inputs {
            match input {
                AttachmentInput::Stub => {
                    return Err(StorageError::precondition_failed(format!(
                        "invalid attachment stub for {}",
                        filename
                    )))
                }
                AttachmentInput::Content { content_type, data } => {
                    actions.insert(
                        filename,
                        AttachmentAction::Add {
                            content_type: content_type
                                .unwrap_or_else(|| default_content_type.to_string()),
                            digest: digest(&data),
                            data,
                        },
                    );
                }
            }
        }
        Ok(AttachmentPlan { actions })
    }

    /// `(filename, raw digest)` of everything the new revision carries
    pub(crate) fn hash_inputs(&self) -> Vec<(&str, Vec<u8>)> {
        self.actions
            .iter()
            .filter_map(|(filename, action)| match action {
                AttachmentAction::Add { digest, .. } => Some((filename.as_str(), raw_digest(digest))),
                AttachmentAction::Keep(meta) => Some((filename.as_str(), raw_digest(&meta.digest))),
                AttachmentAction::Remove(_) => None,
            })
            .collect()
    }

    /// Write the plan for the freshly inserted revision `rev`
    pub(crate) async fn apply(
        self,
        conn: &mut SqliteConnection,
        tables: &Tables,
        id: &str,
        rev: &Rev,
    ) -> StorageResult<()> {
        for (filename, action) in self.actions {
            match action {
                AttachmentAction::Keep(_) => {}
                AttachmentAction::Add { content_type, data, digest } => {
                    sqlx::query(&tables.render(INSERT_SQL))
                        .bind(id)
                        .bind(rev.rev)
                        .bind(rev.id.as_str())
                        .bind(filename.as_str())
                        .bind(content_type)
                        .bind(data.len() as i64)
                        .bind(digest)
                        .bind(data)
                        .execute(&mut *conn)
                        .await?;
                }
                AttachmentAction::Remove(meta) => {
                    let marked = sqlx::query(&tables.render(MARK_REMOVED_SQL))
                        .bind(rev.rev)
                        .bind(rev.id.as_str())
                        .bind(meta.pk)
                        .execute(&mut *conn)
                        .await?;
                    // already hidden on another branch
                    if marked.rows_affected() == 0 {
                        sqlx::query(&tables.render(INSERT_REMOVED_SQL))
                            .bind(id)
                            .bind(rev.rev)
                            .bind(rev.id.as_str())
                            .bind(filename.as_str())
                            .bind(meta.content_type)
                            .bind(meta.digest)
                            .execute(&mut *conn)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Database {
    /// Add or replace one attachment, keeping everything else
    ///
    /// Without `rev` the document must not exist (or be deleted); it is
    /// then created with an empty body.
    pub async fn put_attachment(
        &self,
        doc_id: &str,
        filename: &str,
        content_type: Option<&str>,
        content: Vec<u8>,
        rev: Option<&str>,
    ) -> StorageResult<Rev> {
        validate_doc_id(doc_id)?;
        if filename.is_empty() {
            return Err(StorageError::bad_request("attachment name must not be empty"));
        }
        let base = Rev::parse_opt(rev)?;
        let tables = self.tables();

        let mut tx = self.store().begin_write().await?;
        let parent = resolve_base(tx.conn(), tables, doc_id, base.as_ref()).await?;
        let mut prepared = PreparedDoc {
            deleted: false,
            ..PreparedDoc::tombstone()
        };
        let mut inputs = BTreeMap::new();
        if let Some(parent) = &parent {
            if let Some(stored) = get::read_body(tx.conn(), tables, doc_id, parent).await? {
                if !stored.deleted {
                    prepared.body = stored.body;
                }
            }
            for meta in visible(tx.conn(), tables, doc_id, parent).await? {
                inputs.insert(meta.filename, AttachmentInput::Stub);
            }
        }
        inputs.insert(
            filename.to_string(),
            AttachmentInput::Content {
                content_type: content_type.map(str::to_string),
                data: content,
            },
        );
        prepared.attachments = Some(inputs);

        let new_rev = write_child(
            tx.conn(),
            tables,
            doc_id,
            parent.as_ref(),
            prepared,
            self.default_content_type(),
        )
        .await?;
        tx.commit().await?;
        debug!(doc_id = %doc_id, filename = %filename, rev = %new_rev, "Put attachment");
        Ok(new_rev)
    }

    /// Remove one attachment in a new revision
    pub async fn delete_attachment(
        &self,
        doc_id: &str,
        filename: &str,
        rev: Option<&str>,
    ) -> StorageResult<Rev> {
        let Some(base) = Rev::parse_opt(rev)? else {
            return Err(StorageError::conflict(
                "document update conflict: a revision is required",
            ));
        };
        let tables = self.tables();

        let mut tx = self.store().begin_write().await?;
        require_existing_leaf(tx.conn(), tables, doc_id, &base).await?;
        let current = visible(tx.conn(), tables, doc_id, &base).await?;
        if !current.iter().any(|meta| meta.filename == filename) {
            return Err(StorageError::not_found(format!("attachment {}", filename)));
        }
        let mut prepared = PreparedDoc {
            deleted: false,
            ..PreparedDoc::tombstone()
        };
        if let Some(stored) = get::read_body(tx.conn(), tables, doc_id, &base).await? {
            prepared.deleted = stored.deleted;
            prepared.body = stored.body;
        }
        prepared.attachments = Some(
            current
                .into_iter()
                .filter(|meta| meta.filename != filename)
                .map(|meta| (meta.filename, AttachmentInput::Stub))
                .collect(),
        );

        let new_rev = write_child(
            tx.conn(),
            tables,
            doc_id,
            Some(&base),
            prepared,
            self.default_content_type(),
        )
        .await?;
        tx.commit().await?;
        debug!(doc_id = %doc_id, filename = %filename, rev = %new_rev, "Deleted attachment");
        Ok(new_rev)
    }

    /// Metadata of one attachment at `rev` (default: the winner)
    pub async fn get_attachment_meta(
        &self,
        doc_id: &str,
        filename: &str,
        rev: Option<&str>,
    ) -> StorageResult<AttachmentMeta> {
        let mut tx = self.store().begin_read().await?;
        self.find_attachment(&mut tx, doc_id, filename, rev).await
    }

    /// One attachment with its content at `rev` (default: the winner)
    pub async fn get_attachment(
        &self,
        doc_id: &str,
        filename: &str,
        rev: Option<&str>,
    ) -> StorageResult<Attachment> {
        let mut tx = self.store().begin_read().await?;
        let meta = self.find_attachment(&mut tx, doc_id, filename, rev).await?;
        let data = load_data(&mut tx, self.tables(), &meta).await?;
        Ok(Attachment { meta, data })
    }

    async fn find_attachment(
        &self,
        conn: &mut SqliteConnection,
        doc_id: &str,
        filename: &str,
        rev: Option<&str>,
    ) -> StorageResult<AttachmentMeta> {
        let tables = self.tables();
        let target = match Rev::parse_opt(rev)? {
            Some(rev) => {
                if resolver::node(conn, tables, doc_id, &rev).await?.is_none() {
                    return Err(StorageError::not_found(format!("{} at {}", doc_id, rev)));
                }
                rev
            }
            None => match resolver::winner(conn, tables, doc_id).await? {
                Some(leaf) if !leaf.deleted => leaf.rev,
                _ => return Err(StorageError::not_found(doc_id)),
            },
        };
        visible(conn, tables, doc_id, &target)
            .await?
            .into_iter()
            .find(|meta| meta.filename == filename)
            .ok_or_else(|| StorageError::not_found(format!("attachment {}", filename)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(filename: &str) -> AttachmentMeta {
        AttachmentMeta {
            filename: filename.to_string(),
            content_type: "text/plain".to_string(),
            length: 3,
            digest: digest(b"abc"),
            revpos: 1,
            pk: 1,
        }
    }

    #[test]
    fn test_digest_format() {
        assert_eq!(digest(b""), "md5-1B2M2Y8AsgTpgAmY7PhCfg==");
        assert_eq!(raw_digest(&digest(b"")).len(), 16);
        assert_eq!(raw_digest("opaque"), b"opaque".to_vec());
    }

    #[test]
    fn test_plan_three_way() {
        let mut inputs = BTreeMap::new();
        inputs.insert("keep".to_string(), AttachmentInput::Stub);
        inputs.insert(
            "new".to_string(),
            AttachmentInput::Content { content_type: None, data: b"x".to_vec() },
        );
        let plan = AttachmentPlan::build(
            Some(inputs),
            vec![meta("keep"), meta("gone")],
            false,
            "application/octet-stream",
        )
        .unwrap();
        assert!(matches!(plan.actions["keep"], AttachmentAction::Keep(_)));
        assert!(matches!(plan.actions["gone"], AttachmentAction::Remove(_)));
        match &plan.actions["new"] {
            AttachmentAction::Add { content_type, .. } => {
                assert_eq!(content_type, "application/octet-stream")
            }
            other => panic!("unexpected {:?}", other),
        }
        let hashed: Vec<&str> = plan.hash_inputs().into_iter().map(|(f, _)| f).collect();
        assert_eq!(hashed, vec!["keep", "new"]);
    }

    #[test]
    fn test_plan_stub_without_parent() {
        let mut inputs = BTreeMap::new();
        inputs.insert("ghost".to_string(), AttachmentInput::Stub);
        let err = AttachmentPlan::build(Some(inputs), Vec::new(), false, "a/b").unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[test]
    fn test_plan_tombstone_drops_all() {
        let mut inputs = BTreeMap::new();
        inputs.insert("a".to_string(), AttachmentInput::Stub);
        let plan = AttachmentPlan::build(Some(inputs), vec![meta("a")], true, "a/b").unwrap();
        assert!(matches!(plan.actions["a"], AttachmentAction::Remove(_)));
        assert!(plan.hash_inputs().is_empty());
    }
}
