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
//! Put, Delete and CreateDoc integration tests
//!
//! Covers:
//! - Revision ids and the optimistic concurrency rules
//! - Tombstones
//! - Replication-mode writes and their idempotence
//! - Deterministic winner selection
//! - Racing writers

use couchsql_revtree::{Database, GetOptions, PutOptions, Rev, RevStatus};
use couchsql_storage::{sqlx, Store, StoreOptions, TableRole, Tables};
use serde_json::json;
use tempfile::TempDir;

async fn memory_db() -> Database {
    let store = Store::open_in_memory().await.unwrap();
    Database::create(&store, "db").await.unwrap()
}

async fn row_count(db: &Database, role: TableRole) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {}", Tables::new(db.name()).name(role));
    sqlx::query_scalar(&sql).fetch_one(db.store().pool()).await.unwrap()
}

/// The documented create / delete / get sequence
#[tokio::test]
async fn test_put_delete_get_scenario() {
    let db = memory_db().await;

    let rev1 = db.put("foo", json!({"foo": "bar"}), PutOptions::default()).await.unwrap();
    assert_eq!(rev1.to_string(), "1-9bb58f26192e4ba00f01e2e7b136bbd8");

    let rev2 = db.delete("foo", Some(&rev1.to_string())).await.unwrap();
    assert_eq!(rev2.rev, 2);

    let err = db.get("foo", &GetOptions::default()).await.unwrap_err();
    assert!(err.is_not_found());

    let doc = db.get("foo", &GetOptions::with_rev(rev2.to_string())).await.unwrap();
    assert_eq!(
        doc.body,
        json!({"_id": "foo", "_rev": rev2.to_string(), "_deleted": true})
    );
    assert!(doc.is_deleted());
}

/// A stored body comes back unchanged apart from `_id` and `_rev`
#[tokio::test]
async fn test_round_trip() {
    let db = memory_db().await;
    let input = json!({"name": "album", "tracks": [1, 2, 3], "meta": {"year": 1999}});
    let rev = db.put("album", input.clone(), PutOptions::default()).await.unwrap();

    let doc = db.get("album", &GetOptions::with_rev(rev.to_string())).await.unwrap();
    let mut expected = input;
    expected["_id"] = json!("album");
    expected["_rev"] = json!(rev.to_string());
    assert_eq!(doc.body, expected);
    assert_eq!(doc.rev, rev);
}

/// Each update advances the winner by one generation on top of the previous one
#[tokio::test]
async fn test_updates_chain_on_winner() {
    let db = memory_db().await;
    let mut rev = db.put("doc", json!({"n": 0}), PutOptions::default()).await.unwrap();
    for n in 1..5 {
        let next = db
            .put("doc", json!({"_rev": rev.to_string(), "n": n}), PutOptions::default())
            .await
            .unwrap();
        assert_eq!(next.rev, rev.rev + 1);
        let history = db.history("doc", &next).await.unwrap();
        assert_eq!(history[1].rev, rev);
        rev = next;
    }
    let winner = db.winner("doc").await.unwrap().unwrap();
    assert_eq!(winner.rev, rev);
    assert_eq!(db.get("doc", &GetOptions::default()).await.unwrap().body["n"], json!(4));
}

/// Stale, missing and unknown bases are rejected
#[tokio::test]
async fn test_conflicts() {
    let db = memory_db().await;
    let rev1 = db.put("doc", json!({"v": 1}), PutOptions::default()).await.unwrap();
    let rev2 = db
        .put("doc", json!({"v": 2}), PutOptions::with_rev(rev1.to_string()))
        .await
        .unwrap();

    // no base on a live document
    let err = db.put("doc", json!({"v": 3}), PutOptions::default()).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(err.status_code(), 409);

    // stale base
    let err = db
        .put("doc", json!({"v": 3}), PutOptions::with_rev(rev1.to_string()))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    // unknown base
    let err = db
        .put("doc", json!({"_rev": "2-ffff", "v": 3}), PutOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    // nothing changed
    assert_eq!(db.winner("doc").await.unwrap().unwrap().rev, rev2);
}

/// Malformed input is BadRequest
#[tokio::test]
async fn test_bad_requests() {
    let db = memory_db().await;
    let cases = [
        json!({"_id": "other"}),
        json!({"_rev": "nope"}),
        json!({"_revisions": {"start": 1, "ids": []}}),
        json!({"_unknown": true}),
    ];
    for doc in cases {
        let err = db.put("doc", doc.clone(), PutOptions::default()).await.unwrap_err();
        assert!(err.is_bad_request(), "{}", doc);
    }
    assert!(db.put("", json!({}), PutOptions::default()).await.unwrap_err().is_bad_request());

    let rev = db.put("doc", json!({}), PutOptions::default()).await.unwrap();
    let options = PutOptions::with_rev("1-0000");
    let err = db
        .put("doc", json!({"_rev": rev.to_string()}), options)
        .await
        .unwrap_err();
    assert!(err.is_bad_request());
}

/// Delete needs a revision, and an existing document
#[tokio::test]
async fn test_delete_rules() {
    let db = memory_db().await;
    assert!(db.delete("doc", None).await.unwrap_err().is_conflict());
    assert!(db.delete("doc", Some("1-abc")).await.unwrap_err().is_not_found());

    let rev1 = db.put("doc", json!({"a": 1}), PutOptions::default()).await.unwrap();
    assert!(db.delete("doc", None).await.unwrap_err().is_conflict());

    // deleting a tombstone again yields another tombstone
    let rev2 = db.delete("doc", Some(&rev1.to_string())).await.unwrap();
    let rev3 = db.delete("doc", Some(&rev2.to_string())).await.unwrap();
    assert_eq!(rev3.rev, 3);
    assert!(db.winner("doc").await.unwrap().unwrap().deleted);
}

/// Writing without a base on a deleted document resurrects it on top of the tombstone
#[tokio::test]
async fn test_recreate_after_delete() {
    let db = memory_db().await;
    let rev1 = db.put("doc", json!({"a": 1}), PutOptions::default()).await.unwrap();
    let rev2 = db.delete("doc", Some(&rev1.to_string())).await.unwrap();

    let rev3 = db.put("doc", json!({"a": 2}), PutOptions::default()).await.unwrap();
    assert_eq!(rev3.rev, 3);
    let history = db.history("doc", &rev3).await.unwrap();
    assert_eq!(history[1].rev, rev2);
    assert_eq!(history[1].status, RevStatus::Deleted);
    assert_eq!(db.get("doc", &GetOptions::default()).await.unwrap().body["a"], json!(2));
}

/// CreateDoc generates an id when none is given
#[tokio::test]
async fn test_create_doc() {
    let db = memory_db().await;
    let (id, rev) = db.create_doc(json!({"kind": "generated"})).await.unwrap();
    assert_eq!(id.len(), 32);
    assert_eq!(rev.rev, 1);

    let (id, _) = db.create_doc(json!({"_id": "named"})).await.unwrap();
    assert_eq!(id, "named");
    assert!(db.create_doc(json!({"_id": "named"})).await.unwrap_err().is_conflict());
}

/// A full `_revisions` chain creates every ancestor, and only the leaf has a body
#[tokio::test]
async fn test_replicated_chain() {
    let db = memory_db().await;
    let doc = json!({
        "_rev": "3-ghi",
        "_revisions": {"start": 3, "ids": ["ghi", "def", "abc"]},
        "value": true
    });
    let rev = db.put("doc", doc, PutOptions::replicated()).await.unwrap();
    assert_eq!(rev, Rev::new(3, "ghi"));

    let history = db.history("doc", &rev).await.unwrap();
    let revs: Vec<String> = history.iter().map(|h| h.rev.to_string()).collect();
    assert_eq!(revs, vec!["3-ghi", "2-def", "1-abc"]);
    let statuses: Vec<RevStatus> = history.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        vec![RevStatus::Available, RevStatus::Missing, RevStatus::Missing]
    );

    assert_eq!(row_count(&db, TableRole::Revs).await, 3);
    assert_eq!(row_count(&db, TableRole::Docs).await, 1);

    let err = db.get("doc", &GetOptions::with_rev("2-def")).await.unwrap_err();
    assert!(err.is_not_found());
}

/// Replaying a replicated write is a no-op returning the same revision
#[tokio::test]
async fn test_replicated_replay_is_idempotent() {
    let db = memory_db().await;
    let doc = json!({
        "_revisions": {"start": 2, "ids": ["bbb", "aaa"]},
        "value": 1
    });
    let first = db.put("doc", doc.clone(), PutOptions::replicated()).await.unwrap();
    let second = db.put("doc", doc, PutOptions::replicated()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(row_count(&db, TableRole::Revs).await, 2);
    assert_eq!(row_count(&db, TableRole::Docs).await, 1);

    // extending the known chain links onto the existing nodes
    let longer = json!({
        "_revisions": {"start": 3, "ids": ["ccc", "bbb", "aaa"]},
        "value": 2
    });
    let rev = db.put("doc", longer, PutOptions::replicated()).await.unwrap();
    assert_eq!(rev.to_string(), "3-ccc");
    assert_eq!(row_count(&db, TableRole::Revs).await, 3);
    assert_eq!(db.leaves("doc").await.unwrap().len(), 1);
}

/// Replication mode needs to be told which revision it is storing
#[tokio::test]
async fn test_replicated_requires_rev() {
    let db = memory_db().await;
    let err = db.put("doc", json!({"a": 1}), PutOptions::replicated()).await.unwrap_err();
    assert!(err.is_bad_request());

    let rev = db
        .put("doc", json!({"_rev": "5-abc", "a": 1}), PutOptions::replicated())
        .await
        .unwrap();
    assert_eq!(rev.to_string(), "5-abc");
}

/// Leaves tied on generation are ordered by rev id, and live beats deleted
#[tokio::test]
async fn test_winner_tie_break() {
    let db = memory_db().await;
    for id in ["aaa", "ccc", "bbb"] {
        db.put("doc", json!({"_rev": format!("1-{}", id), "from": id}), PutOptions::replicated())
            .await
            .unwrap();
    }
    let winner = db.winner("doc").await.unwrap().unwrap();
    assert_eq!(winner.rev.to_string(), "1-ccc");
    assert_eq!(db.get("doc", &GetOptions::default()).await.unwrap().body["from"], json!("ccc"));

    // a higher tombstone still loses to a live leaf
    db.delete("doc", Some("1-ccc")).await.unwrap();
    let winner = db.winner("doc").await.unwrap().unwrap();
    assert_eq!(winner.rev.to_string(), "1-bbb");
    assert!(!winner.deleted);

    // the order is reproducible
    for _ in 0..3 {
        let leaves = db.leaves("doc").await.unwrap();
        let revs: Vec<String> = leaves.iter().map(|l| l.rev.to_string()).collect();
        assert_eq!(revs[..2], ["1-bbb".to_string(), "1-aaa".to_string()]);
        assert!(leaves[2].deleted);
    }
}

/// A losing conflict leaf may be updated directly
#[tokio::test]
async fn test_update_losing_leaf() {
    let db = memory_db().await;
    db.put("doc", json!({"_rev": "1-aaa"}), PutOptions::replicated()).await.unwrap();
    db.put("doc", json!({"_rev": "1-bbb"}), PutOptions::replicated()).await.unwrap();

    let rev = db
        .put("doc", json!({"_rev": "1-aaa", "fixed": true}), PutOptions::default())
        .await
        .unwrap();
    assert_eq!(rev.rev, 2);
    assert_eq!(db.winner("doc").await.unwrap().unwrap().rev, rev);
}

/// Two writers racing on one base: one succeeds, the other gets Conflict
#[tokio::test]
async fn test_concurrent_writers() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(StoreOptions::file(dir.path().join("race.db"))).await.unwrap();
    let db = Database::create(&store, "race").await.unwrap();
    let base = db.put("doc", json!({"v": 0}), PutOptions::default()).await.unwrap();

    let mut handles = Vec::new();
    for writer in 0..2 {
        let db = db.clone();
        let base = base.to_string();
        handles.push(tokio::spawn(async move {
            db.put("doc", json!({"writer": writer}), PutOptions::with_rev(base)).await
        }));
    }
    let mut successes = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) if e.is_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!((successes, conflicts), (1, 1));
    assert_eq!(db.leaves("doc").await.unwrap().len(), 1);
}
