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
#![allow(clippy::unwrap_used)]
//! Changes feed integration tests

use couchsql_revtree::{Change, Database, PutOptions, Rev};
use couchsql_storage::{CursorState, Store, PAGE_SIZE};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

async fn memory_db() -> Database {
    let store = Store::open_in_memory().await.unwrap();
    Database::create(&store, "db").await.unwrap()
}

fn ids(changes: &[Change]) -> Vec<&str> {
    changes.iter().map(|c| c.id.as_str()).collect()
}

/// Each document appears once, at its newest sequence, with its winner
#[tokio::test]
async fn test_changes_one_entry_per_document() {
    let db = memory_db().await;
    let a1 = db.put("a", json!({"v": 1}), PutOptions::default()).await.unwrap();
    db.put("b", json!({}), PutOptions::default()).await.unwrap();
    let a2 = db
        .put("a", json!({"v": 2}), PutOptions::with_rev(a1.to_string()))
        .await
        .unwrap();

    let changes = db.changes(0, None).collect_all().await.unwrap();
    assert_eq!(ids(&changes), vec!["b", "a"]);
    assert_eq!(changes[0].seq, 2);
    assert_eq!(changes[1].seq, 3);
    assert_eq!(changes[1].changes, vec![a2]);
    assert!(!changes[1].deleted);
    assert_eq!(db.last_seq().await.unwrap(), 3);
}

/// `since` skips older changes and `limit` caps the feed
#[tokio::test]
async fn test_changes_since_and_limit() {
    let db = memory_db().await;
    for id in ["a", "b", "c", "d"] {
        db.put(id, json!({}), PutOptions::default()).await.unwrap();
    }

    let changes = db.changes(2, None).collect_all().await.unwrap();
    assert_eq!(ids(&changes), vec!["c", "d"]);

    let changes = db.changes(0, Some(3)).collect_all().await.unwrap();
    assert_eq!(ids(&changes), vec!["a", "b", "c"]);

    // zero counts as one
    let changes = db.changes(0, Some(0)).collect_all().await.unwrap();
    assert_eq!(ids(&changes), vec!["a"]);

    assert!(db.changes(4, None).collect_all().await.unwrap().is_empty());
}

/// Deletions are reported with the tombstone as the winner
#[tokio::test]
async fn test_changes_report_deletions() {
    let db = memory_db().await;
    let rev = db.put("doc", json!({}), PutOptions::default()).await.unwrap();
    let tombstone = db.delete("doc", Some(&rev.to_string())).await.unwrap();

    let changes = db.changes(0, None).collect_all().await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].changes, vec![tombstone]);
    assert!(changes[0].deleted);
}

/// A conflict on a losing branch still reports the winner
#[tokio::test]
async fn test_changes_report_winner_of_conflicts() {
    let db = memory_db().await;
    db.put("doc", json!({"_rev": "1-bbb"}), PutOptions::replicated()).await.unwrap();
    db.put("doc", json!({"_rev": "1-aaa"}), PutOptions::replicated()).await.unwrap();

    let changes = db.changes(0, None).collect_all().await.unwrap();
    assert_eq!(changes[0].seq, 2);
    assert_eq!(changes[0].changes, vec![Rev::new(1, "bbb")]);
}

/// Purged documents drop out of the feed
#[tokio::test]
async fn test_changes_skip_purged() {
    let db = memory_db().await;
    let rev = db.put("doc", json!({}), PutOptions::default()).await.unwrap();
    db.put("kept", json!({}), PutOptions::default()).await.unwrap();
    let mut request = BTreeMap::new();
    request.insert("doc".to_string(), vec![rev.to_string()]);
    db.purge(request).await.unwrap();

    let changes = db.changes(0, None).collect_all().await.unwrap();
    assert_eq!(ids(&changes), vec!["kept"]);
}

/// The feed pages through more documents than fit in one read
#[tokio::test]
async fn test_changes_span_pages() {
    let db = memory_db().await;
    let total = PAGE_SIZE as usize + 3;
    for i in 0..total {
        db.put(&format!("doc{:04}", i), json!({}), PutOptions::default()).await.unwrap();
    }

    let changes = db.changes(0, None).collect_all().await.unwrap();
    assert_eq!(changes.len(), total);
    assert!(changes.windows(2).all(|w| w[0].seq < w[1].seq));

    let limited = db.changes(0, Some(total - 1)).collect_all().await.unwrap();
    assert_eq!(limited.len(), total - 1);
}

/// An open feed does not hold the only pooled connection
#[tokio::test]
async fn test_open_changes_feed_allows_writes() {
    let db = memory_db().await;
    db.put("a", json!({}), PutOptions::default()).await.unwrap();
    db.put("b", json!({}), PutOptions::default()).await.unwrap();

    let mut feed = db.changes(0, None);
    assert_eq!(feed.next().await.unwrap().unwrap().id, "a");
    tokio::time::timeout(Duration::from_secs(5), db.put("c", json!({}), PutOptions::default()))
        .await
        .unwrap()
        .unwrap();
    feed.close();
    assert_eq!(feed.state(), CursorState::Closed);
}
