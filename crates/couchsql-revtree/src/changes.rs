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
//! The changes feed over `docs.seq`
//!
//! Every stored body gets the next sequence number. A document appears in
//! the feed once, at the sequence of its newest body, reporting its current
//! winner. Pages of [`PAGE_SIZE`] rows are read with the connection handed
//! back in between, so a slow consumer never pins the pool.

use crate::database::Database;
use crate::resolver;
use crate::rev::Rev;
use couchsql_storage::sqlx::{self, Row};
use couchsql_storage::{Cursor, StorageResult, PAGE_SIZE};
use serde::Serialize;
use tracing::debug;

const CHANGED_DOCS_SQL: &str = "SELECT id, MAX(seq) AS seq FROM {docs} \
     GROUP BY id HAVING MAX(seq) > ?1 ORDER BY seq LIMIT ?2";

const LAST_SEQ_SQL: &str = "SELECT COALESCE(MAX(seq), 0) FROM {docs}";

/// One document in the changes feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    /// Sequence of the document's newest body
    pub seq: i64,
    /// Document id
    pub id: String,
    /// The winning revision
    pub changes: Vec<Rev>,
    /// Whether the winner is a tombstone
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl Database {
    /// Documents changed after `since`, oldest change first.
    ///
    /// At most `limit` entries are produced; a limit of zero counts as one.
    /// Documents whose every body was purged drop out of the feed.
    pub fn changes(&self, since: i64, limit: Option<usize>) -> Cursor<Change> {
        let db = self.clone();
        let mut remaining = limit.map(|n| n.max(1) as i64);

        Cursor::from_stream(async_stream::try_stream! {
            let sql = db.tables().render(CHANGED_DOCS_SQL);
            let mut after = since;
            loop {
                let page_size = remaining.map_or(PAGE_SIZE, |n| n.min(PAGE_SIZE));
                if page_size == 0 {
                    break;
                }
                let (page, fetched) = {
                    let mut conn = db.store().pool().acquire().await?;
                    let rows = sqlx::query(&sql)
                        .bind(after)
                        .bind(page_size)
                        .fetch_all(&mut *conn)
                        .await?;
                    let mut page = Vec::with_capacity(rows.len());
                    for row in &rows {
                        let id: String = row.try_get("id")?;
                        let seq: i64 = row.try_get("seq")?;
                        after = seq;
                        if let Some(winner) = resolver::winner(&mut conn, db.tables(), &id).await? {
                            page.push(Change { seq, id, changes: vec![winner.rev], deleted: winner.deleted });
                        }
                    }
                    (page, rows.len() as i64)
                };
                debug!(db = %db.name(), after, fetched, "Read changes page");
                for change in page {
                    yield change;
                }
                if let Some(n) = remaining.as_mut() {
                    *n -= fetched;
                }
                if fetched < page_size {
                    break;
                }
            }
        })
    }

    /// Sequence of the newest stored body, 0 for an empty database
    pub async fn last_seq(&self) -> StorageResult<i64> {
        let mut tx = self.store().begin_read().await?;
        let seq: i64 = sqlx::query_scalar(&self.tables().render(LAST_SEQ_SQL))
            .fetch_one(&mut *tx)
            .await?;
        Ok(seq)
    }
}
