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

//! Reading documents: Get and GetRev

use crate::attachments::{self, AttachmentMeta};
use crate::database::Database;
use crate::document::Document;
use crate::options::GetOptions;
use crate::resolver::{self, RevStatus};
use crate::rev::{Rev, Revisions};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use couchsql_storage::sqlx::{self, sqlite::SqliteConnection, Row};
use couchsql_storage::{StorageError, StorageResult, Tables};
use serde_json::{json, Map, Value};

const BODY_SQL: &str = r#"
SELECT doc, deleted, seq FROM {docs} WHERE id = ?1 AND rev = ?2 AND rev_id = ?3
"#;

/// A stored body snapshot
#[derive(Debug, Clone)]
pub(crate) struct StoredBody {
    pub body: Map<String, Value>,
    pub deleted: bool,
    pub seq: i64,
}

/// Load the body stored for `rev`, if any
pub(crate) async fn read_body(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
) -> StorageResult<Option<StoredBody>> {
    let row = sqlx::query(&tables.render(BODY_SQL))
        .bind(id)
        .bind(rev.rev)
        .bind(rev.id.as_str())
        .fetch_optional(conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let raw: Vec<u8> = row.try_get("doc")?;
    let body = match serde_json::from_slice(&raw).map_err(StorageError::other)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(Some(StoredBody {
        body,
        deleted: row.try_get("deleted")?,
        seq: row.try_get("seq")?,
    }))
}

/// Work out which revision a read targets.
///
/// Without a revision that is the winner, and a deleted winner counts as
/// missing. With `latest` the requested revision is followed to its newest
/// live leaf. Malformed revisions anywhere in `options` are rejected before
/// anything is read.
pub(crate) async fn resolve_target(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    options: &GetOptions,
) -> StorageResult<Rev> {
    options.atts_since_generation()?;
    match options.target_rev()? {
        Some(rev) if options.latest => resolver::latest(conn, tables, id, &rev)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("{} at {}", id, rev))),
        Some(rev) => Ok(rev),
        None => match resolver::winner(conn, tables, id).await? {
            Some(leaf) if !leaf.deleted => Ok(leaf.rev),
            Some(_) => Err(StorageError::not_found(format!("{} (deleted)", id))),
            None => Err(StorageError::not_found(id)),
        },
    }
}

fn attachment_json(meta: &AttachmentMeta, data: Option<Vec<u8>>) -> Value {
    let mut entry = json!({
        "content_type": meta.content_type,
        "digest": meta.digest,
        "length": meta.length,
        "revpos": meta.revpos,
    });
    if let Value::Object(fields) = &mut entry {
        match data {
            Some(data) => fields.insert("data".into(), Value::String(BASE64.encode(data))),
            None => fields.insert("stub".into(), Value::Bool(true)),
        };
    }
    entry
}

fn rev_list(revs: impl IntoIterator<Item = Rev>) -> Value {
    Value::Array(revs.into_iter().map(|r| Value::String(r.to_string())).collect())
}

/// Read revision `rev` of `id` with the enrichments `options` asks for
pub(crate) async fn read_document(
    conn: &mut SqliteConnection,
    tables: &Tables,
    id: &str,
    rev: &Rev,
    options: &GetOptions,
) -> StorageResult<Document> {
    let stored = read_body(conn, tables, id, rev)
        .await?
        .ok_or_else(|| StorageError::not_found(format!("{} at {} (missing)", id, rev)))?;

    let mut body = stored.body;
    body.insert("_id".into(), Value::String(id.to_string()));
    body.insert("_rev".into(), Value::String(rev.to_string()));
    if stored.deleted {
        body.insert("_deleted".into(), Value::Bool(true));
    }

    let visible = attachments::visible(conn, tables, id, rev).await?;
    if !visible.is_empty() {
        let since = options.atts_since_generation()?;
        let mut entries = Map::new();
        for meta in &visible {
            let inline = options.attachments || since.is_some_and(|since| meta.revpos > since);
            let data = if inline {
                Some(attachments::load_data(conn, tables, meta).await?)
            } else {
                None
            };
            entries.insert(meta.filename.clone(), attachment_json(meta, data));
        }
        body.insert("_attachments".into(), Value::Object(entries));
    }

    if options.want_conflicts() || options.want_deleted_conflicts() {
        let (deleted, live): (Vec<_>, Vec<_>) = resolver::leaves(conn, tables, id)
            .await?
            .into_iter()
            .filter(|leaf| &leaf.rev != rev)
            .partition(|leaf| leaf.deleted);
        if options.want_conflicts() && !live.is_empty() {
            body.insert("_conflicts".into(), rev_list(live.into_iter().map(|l| l.rev)));
        }
        if options.want_deleted_conflicts() && !deleted.is_empty() {
            body.insert(
                "_deleted_conflicts".into(),
                rev_list(deleted.into_iter().map(|l| l.rev)),
            );
        }
    }

    if options.want_revs_info() || options.revs {
        let history = resolver::history(conn, tables, id, rev).await?;
        if options.want_revs_info() {
            let info: Vec<Value> = history
                .iter()
                .map(|entry| json!({"rev": entry.rev, "status": entry.status}))
                .collect();
            body.insert("_revs_info".into(), Value::Array(info));
        }
        if options.revs {
            let chain: Vec<Rev> = history.into_iter().map(|entry| entry.rev).collect();
            body.insert("_revisions".into(), json!(Revisions::from_chain(&chain)));
        }
    }

    if options.local_seq {
        body.insert("_local_seq".into(), json!(stored.seq));
    }

    Ok(Document {
        id: id.to_string(),
        rev: rev.clone(),
        body: Value::Object(body),
    })
}

impl Database {
    /// Read a document
    ///
    /// Without `options.rev` the winner is read, and a deleted winner is
    /// NotFound. An explicit revision is returned even when it is a
    /// tombstone.
    pub async fn get(&self, doc_id: &str, options: &GetOptions) -> StorageResult<Document> {
        let tables = self.tables();
        let mut tx = self.store().begin_read().await?;
        let rev = resolve_target(&mut tx, tables, doc_id, options).await?;
        read_document(&mut tx, tables, doc_id, &rev, options).await
    }

    /// Resolve the revision [`Database::get`] would read, without loading it
    pub async fn get_rev(&self, doc_id: &str, options: &GetOptions) -> StorageResult<Rev> {
        let tables = self.tables();
        let mut tx = self.store().begin_read().await?;
        let rev = resolve_target(&mut tx, tables, doc_id, options).await?;
        if resolver::node(&mut tx, tables, doc_id, &rev).await?.is_none() {
            return Err(StorageError::not_found(format!("{} at {}", doc_id, rev)));
        }
        Ok(rev)
    }

    /// Whether the revision is missing, deleted or available
    pub async fn rev_status(&self, doc_id: &str, rev: &Rev) -> StorageResult<Option<RevStatus>> {
        let mut tx = self.store().begin_read().await?;
        Ok(resolver::history(&mut tx, self.tables(), doc_id, rev)
            .await?
            .into_iter()
            .next()
            .map(|entry| entry.status))
    }
}
