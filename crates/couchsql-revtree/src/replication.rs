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

//! Replication primitives: RevsDiff, OpenRevs and Purge
//!
//! A replicator needs four things from each side: the changes feed of the
//! source, [`Database::revs_diff`] to learn what the target lacks,
//! [`Database::open_revs`] to fetch it from the source with `latest`, and
//! [`Database::put`] with `new_edits = false` to store it.
//! [`ReplicationPeer`] bundles all four so a replicator can run against any
//! implementation, and [`replicate`] is the minimal one-shot loop over it.

use crate::changes::Change;
use crate::database::Database;
use crate::document::Document;
use crate::get;
use crate::options::{GetOptions, PutOptions};
use crate::resolver;
use crate::rev::Rev;
use async_trait::async_trait;
use couchsql_storage::sqlx::{self, Row};
use couchsql_storage::{compare_values, Cursor, StorageError, StorageResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;
use tracing::{debug, info, warn};

const KNOWN_REVS_SQL: &str = "SELECT rev, rev_id FROM {revs} WHERE id = ?1";

const CLEAR_REMOVAL_SQL: &str = r#"
UPDATE {attachments} SET deleted_rev = NULL, deleted_rev_id = NULL
WHERE id = ?1 AND deleted_rev = ?2 AND deleted_rev_id = ?3
"#;

const PURGE_ATTACHMENTS_SQL: &str =
    "DELETE FROM {attachments} WHERE id = ?1 AND rev = ?2 AND rev_id = ?3";
const PURGE_BODY_SQL: &str = "DELETE FROM {docs} WHERE id = ?1 AND rev = ?2 AND rev_id = ?3";
const PURGE_NODE_SQL: &str = "DELETE FROM {revs} WHERE id = ?1 AND rev = ?2 AND rev_id = ?3";

/// Revisions of one document the database does not know
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevsDiffEntry {
    /// Document id
    pub id: String,
    /// Requested revisions with no node in the tree
    pub missing: Vec<Rev>,
    /// Known leaves older than the newest missing revision
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub possible_ancestors: Vec<Rev>,
}

/// Which revisions [`Database::open_revs`] returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRevsSelector {
    /// Every leaf that carries a body
    All,
    /// These revisions, as strings
    Revs(Vec<String>),
}

impl OpenRevsSelector {
    /// Parse the CouchDB form: `"all"` or a JSON array of revisions
    pub fn from_value(value: &Value) -> StorageResult<Self> {
        match value {
            Value::String(s) if s == "all" => Ok(OpenRevsSelector::All),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| StorageError::bad_request("open_revs entries must be strings"))
                })
                .collect::<StorageResult<Vec<_>>>()
                .map(OpenRevsSelector::Revs),
            _ => Err(StorageError::bad_request(
                "open_revs must be \"all\" or an array of revisions",
            )),
        }
    }
}

/// One result of [`Database::open_revs`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenRev {
    /// The revision's document
    Ok(Document),
    /// The revision has no body here
    Missing(Rev),
}

impl OpenRev {
    /// The document, when found
    pub fn document(&self) -> Option<&Document> {
        match self {
            OpenRev::Ok(doc) => Some(doc),
            OpenRev::Missing(_) => None,
        }
    }
}

fn parse_revs(revs: &[String]) -> StorageResult<Vec<Rev>> {
    revs.iter().map(|s| Rev::parse(s)).collect()
}

fn sorted_ids<'a>(ids: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut ids: Vec<String> = ids.cloned().collect();
    ids.sort_by(|a, b| compare_values(&Value::String(a.clone()), &Value::String(b.clone())));
    ids
}

impl Database {
    /// Report, per document, the requested revisions that are not in the tree.
    ///
    /// Every revision is parsed before anything is read, so a malformed one
    /// fails the whole call with BadRequest. Documents missing nothing are
    /// left out; the rest come in collation order of their ids.
    pub fn revs_diff(&self, request: BTreeMap<String, Vec<String>>) -> StorageResult<Cursor<RevsDiffEntry>> {
        let mut parsed = BTreeMap::new();
        for (id, revs) in &request {
            parsed.insert(id.clone(), parse_revs(revs)?);
        }
        let order = sorted_ids(parsed.keys());
        let db = self.clone();

        Ok(Cursor::from_stream(async_stream::try_stream! {
            for id in order {
                let requested = parsed.remove(&id).unwrap_or_default();
                let entry = {
                    let mut conn = db.store().pool().acquire().await?;
                    let known: HashSet<Rev> = sqlx::query(&db.tables().render(KNOWN_REVS_SQL))
                        .bind(id.as_str())
                        .fetch_all(&mut *conn)
                        .await?
                        .iter()
                        .map(|row| -> StorageResult<Rev> {
                            Ok(Rev::new(row.try_get::<i64, _>("rev")?, row.try_get::<String, _>("rev_id")?))
                        })
                        .collect::<StorageResult<_>>()?;

                    let mut missing: Vec<Rev> = Vec::new();
                    for rev in requested {
                        if !known.contains(&rev) && !missing.contains(&rev) {
                            missing.push(rev);
                        }
                    }
                    match missing.iter().map(|rev| rev.rev).max() {
                        Some(newest) => {
                            let possible_ancestors = resolver::tree_leaves(&mut conn, db.tables(), &id)
                                .await?
                                .into_iter()
                                .filter(|leaf| leaf.rev < newest)
                                .collect();
                            Some(RevsDiffEntry { id, missing, possible_ancestors })
                        }
                        None => None,
                    }
                };
                if let Some(entry) = entry {
                    yield entry;
                }
            }
        }))
    }

    /// Stream the requested leaves of `doc_id`.
    ///
    /// With [`OpenRevsSelector::All`] every leaf carrying a body is returned,
    /// highest first; a document without any is NotFound. Explicit revisions
    /// that have no body come back as [`OpenRev::Missing`]. With
    /// `options.latest` each explicit revision is first followed to the
    /// newest leaf of its branch, which may be a tombstone.
    pub async fn open_revs(
        &self,
        doc_id: &str,
        selector: OpenRevsSelector,
        options: &GetOptions,
    ) -> StorageResult<Cursor<OpenRev>> {
        options.atts_since_generation()?;
        let (targets, follow) = match selector {
            OpenRevsSelector::All => {
                let mut leaves: Vec<Rev> = self
                    .leaves(doc_id)
                    .await?
                    .into_iter()
                    .map(|leaf| leaf.rev)
                    .collect();
                if leaves.is_empty() {
                    return Err(StorageError::not_found(doc_id));
                }
                leaves.sort_by(|a, b| b.cmp(a));
                (leaves, false)
            }
            OpenRevsSelector::Revs(revs) => (parse_revs(&revs)?, options.latest),
        };

        let db = self.clone();
        let id = doc_id.to_string();
        let mut read_options = options.clone();
        read_options.rev = None;
        read_options.latest = false;

        Ok(Cursor::from_stream(async_stream::try_stream! {
            for rev in targets {
                let item = {
                    let mut conn = db.store().pool().acquire().await?;
                    let resolved = if follow {
                        resolver::branch_leaf(&mut conn, db.tables(), &id, &rev).await?
                    } else {
                        Some(rev.clone())
                    };
                    match resolved {
                        Some(target) => {
                            match get::read_document(&mut conn, db.tables(), &id, &target, &read_options).await {
                                Ok(doc) => OpenRev::Ok(doc),
                                Err(e) if e.is_not_found() => OpenRev::Missing(rev),
                                Err(e) => Err(e)?,
                            }
                        }
                        None => OpenRev::Missing(rev),
                    }
                };
                yield item;
            }
        }))
    }

    /// Hard-delete leaf revisions and their bodies.
    ///
    /// Entries naming an unknown or non-leaf revision are skipped. Returns
    /// the revisions actually removed, per document.
    pub async fn purge(
        &self,
        request: BTreeMap<String, Vec<String>>,
    ) -> StorageResult<BTreeMap<String, Vec<Rev>>> {
        let mut parsed = Vec::with_capacity(request.len());
        for (id, revs) in &request {
            parsed.push((id.clone(), parse_revs(revs)?));
        }

        let tables = self.tables();
        let mut tx = self.store().begin_write().await?;
        let mut purged: BTreeMap<String, Vec<Rev>> = BTreeMap::new();
        for (id, revs) in parsed {
            for rev in revs {
                match resolver::node(tx.conn(), tables, &id, &rev).await? {
                    None => {
                        debug!(doc_id = %id, rev = %rev, "Purge target unknown, skipping");
                        continue;
                    }
                    Some(node) if !node.is_leaf => {
                        warn!(doc_id = %id, rev = %rev, "Purge target is not a leaf, skipping");
                        continue;
                    }
                    Some(_) => {}
                }
                for sql in [
                    CLEAR_REMOVAL_SQL,
                    PURGE_ATTACHMENTS_SQL,
                    PURGE_BODY_SQL,
                    PURGE_NODE_SQL,
                ] {
                    sqlx::query(&tables.render(sql))
                        .bind(id.as_str())
                        .bind(rev.rev)
                        .bind(rev.id.as_str())
                        .execute(tx.conn())
                        .await?;
                }
                debug!(doc_id = %id, rev = %rev, "Purged revision");
                purged.entry(id.clone()).or_default().push(rev);
            }
        }
        tx.commit().await?;
        info!(db = %self.name(), docs = purged.len(), "Purge complete");
        Ok(purged)
    }
}

/// The replication surface of one side
#[async_trait]
pub trait ReplicationPeer: Send + Sync + Debug {
    /// Documents changed after `since`, each listing every leaf revision
    async fn changes(&self, since: i64) -> StorageResult<Vec<Change>>;

    /// Which of `request` this peer lacks
    async fn revs_diff(
        &self,
        request: BTreeMap<String, Vec<String>>,
    ) -> StorageResult<Vec<RevsDiffEntry>>;

    /// Latest leaves of `doc_id` below `revs`, with history and attachment data
    async fn open_revs(&self, doc_id: &str, revs: &[Rev]) -> StorageResult<Vec<OpenRev>>;

    /// Store a document exactly as the source has it
    async fn put_replicated(&self, doc: Document) -> StorageResult<Rev>;
}

#[async_trait]
impl ReplicationPeer for Database {
    async fn changes(&self, since: i64) -> StorageResult<Vec<Change>> {
        let mut changes = Database::changes(self, since, None).collect_all().await?;
        for change in &mut changes {
            let leaves = self.leaves(&change.id).await?;
            if !leaves.is_empty() {
                change.changes = leaves.into_iter().map(|leaf| leaf.rev).collect();
            }
        }
        Ok(changes)
    }

    async fn revs_diff(
        &self,
        request: BTreeMap<String, Vec<String>>,
    ) -> StorageResult<Vec<RevsDiffEntry>> {
        Database::revs_diff(self, request)?.collect_all().await
    }

    async fn open_revs(&self, doc_id: &str, revs: &[Rev]) -> StorageResult<Vec<OpenRev>> {
        let options = GetOptions {
            latest: true,
            revs: true,
            attachments: true,
            ..GetOptions::default()
        };
        let selector = OpenRevsSelector::Revs(revs.iter().map(Rev::to_string).collect());
        Database::open_revs(self, doc_id, selector, &options)
            .await?
            .collect_all()
            .await
    }

    async fn put_replicated(&self, doc: Document) -> StorageResult<Rev> {
        self.put(&doc.id, doc.body, PutOptions::replicated()).await
    }
}

/// Counters of one [`replicate`] run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStats {
    /// Source sequence to resume the next run from
    pub last_seq: i64,
    /// Documents with at least one missing revision
    pub docs_checked: usize,
    /// Revisions written to the target
    pub docs_written: usize,
    /// Revisions the source could not supply
    pub missing_found: usize,
}

/// Copy everything `source` changed after `since` to `target`
pub async fn replicate(
    source: &dyn ReplicationPeer,
    target: &dyn ReplicationPeer,
    since: i64,
) -> StorageResult<ReplicationStats> {
    let mut stats = ReplicationStats { last_seq: since, ..ReplicationStats::default() };
    let mut request: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for change in source.changes(since).await? {
        stats.last_seq = stats.last_seq.max(change.seq);
        request
            .entry(change.id)
            .or_default()
            .extend(change.changes.iter().map(Rev::to_string));
    }
    debug!(docs = request.len(), since, "Read source changes");

    for entry in target.revs_diff(request).await? {
        stats.docs_checked += 1;
        for result in source.open_revs(&entry.id, &entry.missing).await? {
            match result {
                OpenRev::Ok(doc) => {
                    let rev = target.put_replicated(doc).await?;
                    debug!(doc_id = %entry.id, rev = %rev, "Replicated revision");
                    stats.docs_written += 1;
                }
                OpenRev::Missing(rev) => {
                    warn!(doc_id = %entry.id, rev = %rev, "Source lacks revision");
                    stats.missing_found += 1;
                }
            }
        }
    }
    info!(
        written = stats.docs_written,
        last_seq = stats.last_seq,
        "Replication pass complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_selector_from_value() {
        assert_eq!(OpenRevsSelector::from_value(&json!("all")).unwrap(), OpenRevsSelector::All);
        assert_eq!(
            OpenRevsSelector::from_value(&json!(["1-a", "2-b"])).unwrap(),
            OpenRevsSelector::Revs(vec!["1-a".into(), "2-b".into()])
        );
        assert!(OpenRevsSelector::from_value(&json!("some")).is_err());
        assert!(OpenRevsSelector::from_value(&json!([1])).is_err());
    }

    #[test]
    fn test_ids_follow_collation() {
        let ids = ["b".to_string(), "B".to_string(), "a".to_string(), "A".to_string()];
        assert_eq!(sorted_ids(ids.iter()), vec!["a", "A", "b", "B"]);
    }

    #[test]
    fn test_diff_entry_omits_empty_ancestors() {
        let entry = RevsDiffEntry {
            id: "foo".into(),
            missing: vec![Rev::new(2, "x")],
            possible_ancestors: Vec::new(),
        };
        assert_eq!(serde_json::to_value(&entry).unwrap(), json!({"id": "foo", "missing": ["2-x"]}));
    }
}
