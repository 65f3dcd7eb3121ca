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
//! RevsDiff, OpenRevs, Purge and replication round trips

use couchsql_revtree::{
    replicate, Database, GetOptions, OpenRev, OpenRevsSelector, PutOptions, Rev, RevsDiffEntry,
};
use couchsql_storage::{CursorState, Store};
use serde_json::json;
use std::collections::BTreeMap;

async fn memory_db() -> Database {
    let store = Store::open_in_memory().await.unwrap();
    Database::create(&store, "db").await.unwrap()
}

fn request(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(id, revs)| (id.to_string(), revs.iter().map(|r| r.to_string()).collect()))
        .collect()
}

async fn chain(db: &Database) {
    let doc = json!({"_revisions": {"start": 3, "ids": ["ghi", "def", "abc"]}});
    db.put("doc", doc, PutOptions::replicated()).await.unwrap();
}

/// Known nodes, leaf or not, are never reported missing
#[tokio::test]
async fn test_revs_diff() {
    let db = memory_db().await;
    chain(&db).await;

    let diff = db
        .revs_diff(request(&[
            ("doc", &["1-abc", "2-def", "4-jkl", "3-xyz", "4-jkl"]),
            ("other", &["1-a"]),
            ("known", &[]),
        ]))
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    assert_eq!(
        diff,
        vec![
            RevsDiffEntry {
                id: "doc".into(),
                missing: vec![Rev::new(4, "jkl"), Rev::new(3, "xyz")],
                possible_ancestors: vec![Rev::new(3, "ghi")],
            },
            RevsDiffEntry {
                id: "other".into(),
                missing: vec![Rev::new(1, "a")],
                possible_ancestors: Vec::new(),
            },
        ]
    );
}

/// Documents with nothing missing are left out, and ids follow collation order
#[tokio::test]
async fn test_revs_diff_order_and_omission() {
    let db = memory_db().await;
    chain(&db).await;
    let diff = db
        .revs_diff(request(&[("b", &["1-x"]), ("A", &["1-x"]), ("a", &["1-x"]), ("doc", &["3-ghi"])]))
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let ids: Vec<&str> = diff.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "A", "b"]);
}

/// A malformed revision fails the whole request
#[tokio::test]
async fn test_revs_diff_bad_rev() {
    let db = memory_db().await;
    let err = db.revs_diff(request(&[("doc", &["1-a", "oops"])])).unwrap_err();
    assert!(err.is_bad_request());
}

/// Closing a cursor early is explicit and idempotent
#[tokio::test]
async fn test_revs_diff_close() {
    let db = memory_db().await;
    let mut cursor = db
        .revs_diff(request(&[("a", &["1-x"]), ("b", &["1-x"]), ("c", &["1-x"])]))
        .unwrap();
    assert_eq!(cursor.next().await.unwrap().unwrap().id, "a");
    cursor.close();
    cursor.close();
    assert_eq!(cursor.state(), CursorState::Closed);
    assert!(cursor.next().await.is_none());

    // the store is still usable afterwards
    db.put("a", json!({}), PutOptions::default()).await.unwrap();
}

/// `all` returns every leaf with a body, highest first
#[tokio::test]
async fn test_open_revs_all() {
    let db = memory_db().await;
    assert!(db
        .open_revs("doc", OpenRevsSelector::All, &GetOptions::default())
        .await
        .unwrap_err()
        .is_not_found());

    for id in ["aaa", "bbb"] {
        db.put("doc", json!({"_rev": format!("1-{}", id)}), PutOptions::replicated())
            .await
            .unwrap();
    }
    let tombstone = db.delete("doc", Some("1-aaa")).await.unwrap();

    let results = db
        .open_revs("doc", OpenRevsSelector::All, &GetOptions::default())
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let revs: Vec<Rev> = results
        .iter()
        .map(|r| r.document().unwrap().rev.clone())
        .collect();
    assert_eq!(revs, vec![tombstone, Rev::new(1, "bbb")]);
    assert!(results[0].document().unwrap().is_deleted());
}

/// Explicit revisions come back as documents or as missing markers
#[tokio::test]
async fn test_open_revs_explicit() {
    let db = memory_db().await;
    let rev1 = db.put("doc", json!({"v": 1}), PutOptions::default()).await.unwrap();
    let rev2 = db
        .put("doc", json!({"v": 2}), PutOptions::with_rev(rev1.to_string()))
        .await
        .unwrap();

    let selector = OpenRevsSelector::Revs(vec![rev1.to_string(), "9-zzz".into()]);
    let results = db
        .open_revs("doc", selector.clone(), &GetOptions::default())
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document().unwrap().body["v"], json!(1));
    assert_eq!(results[1], OpenRev::Missing(Rev::new(9, "zzz")));

    let options = GetOptions { latest: true, revs: true, ..GetOptions::default() };
    let results = db
        .open_revs("doc", selector, &options)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let doc = results[0].document().unwrap();
    assert_eq!(doc.rev, rev2);
    assert_eq!(doc.body["_revisions"]["start"], json!(2));
    assert_eq!(results[1], OpenRev::Missing(Rev::new(9, "zzz")));

    let err = db
        .open_revs("doc", OpenRevsSelector::Revs(vec!["bad".into()]), &options)
        .await
        .unwrap_err();
    assert!(err.is_bad_request());
}

/// `latest` still hands replication the tombstone ending a branch
#[tokio::test]
async fn test_open_revs_latest_reaches_tombstone() {
    let db = memory_db().await;
    let rev1 = db.put("doc", json!({"v": 1}), PutOptions::default()).await.unwrap();
    let tombstone = db.delete("doc", Some(&rev1.to_string())).await.unwrap();

    let options = GetOptions { latest: true, ..GetOptions::default() };
    let results = db
        .open_revs("doc", OpenRevsSelector::Revs(vec![rev1.to_string()]), &options)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let doc = results[0].document().unwrap();
    assert_eq!(doc.rev, tombstone);
    assert!(doc.is_deleted());
}

/// Malformed `atts_since` entries are rejected before any leaf is read
#[tokio::test]
async fn test_open_revs_atts_since_malformed() {
    let db = memory_db().await;
    db.put("doc", json!({}), PutOptions::default()).await.unwrap();
    let options = GetOptions { atts_since: vec!["nope".into()], ..GetOptions::default() };
    let err = db
        .open_revs("doc", OpenRevsSelector::All, &options)
        .await
        .unwrap_err();
    assert!(err.is_bad_request());
}

/// Only leaves are purged; other entries are skipped quietly
#[tokio::test]
async fn test_purge() {
    let db = memory_db().await;
    let rev1 = db.put("doc", json!({"v": 1}), PutOptions::default()).await.unwrap();
    let rev2 = db
        .put("doc", json!({"v": 2}), PutOptions::with_rev(rev1.to_string()))
        .await
        .unwrap();

    let r1 = rev1.to_string();
    let r2 = rev2.to_string();
    let purged = db
        .purge(request(&[("doc", &[r1.as_str(), r2.as_str()]), ("ghost", &["1-abc"])]))
        .await
        .unwrap();
    let mut expected = BTreeMap::new();
    expected.insert("doc".to_string(), vec![rev2.clone()]);
    assert_eq!(purged, expected);

    // the parent is the leaf again
    assert_eq!(db.winner("doc").await.unwrap().unwrap().rev, rev1);
    assert!(db.get("doc", &GetOptions::with_rev(r2.clone())).await.unwrap_err().is_not_found());

    // purging again is harmless
    assert!(db.purge(request(&[("doc", &[r2.as_str()])])).await.unwrap().is_empty());

    db.purge(request(&[("doc", &[r1.as_str()])])).await.unwrap();
    assert!(db.winner("doc").await.unwrap().is_none());
    assert!(db.get("doc", &GetOptions::default()).await.unwrap_err().is_not_found());

    let err = db.purge(request(&[("doc", &["broken"])])).await.unwrap_err();
    assert!(err.is_bad_request());
}

/// Purging the branch that removed an attachment makes it visible again from the parent's view
#[tokio::test]
async fn test_purge_restores_attachment_visibility() {
    let db = memory_db().await;
    let rev1 = db.put_attachment("doc", "a", None, b"a".to_vec(), None).await.unwrap();
    let rev2 = db
        .put("doc", json!({"_rev": rev1.to_string()}), PutOptions::default())
        .await
        .unwrap();
    assert!(db.get_attachment("doc", "a", None).await.unwrap_err().is_not_found());

    db.purge(request(&[("doc", &[rev2.to_string().as_str()])])).await.unwrap();
    assert_eq!(db.get_attachment("doc", "a", None).await.unwrap().data, b"a");

    // and a new edit on the parent can remove it again
    db.put("doc", json!({"_rev": rev1.to_string()}), PutOptions::default())
        .await
        .unwrap();
    assert!(db.get_attachment("doc", "a", None).await.unwrap_err().is_not_found());
}

/// The four replication primitives are enough to copy documents between databases
#[tokio::test]
async fn test_replicate_between_databases() {
    let store = Store::open_in_memory().await.unwrap();
    let source = Database::create(&store, "source").await.unwrap();
    let target = Database::create(&store, "target").await.unwrap();

    let rev1 = source.put("doc", json!({"v": 1}), PutOptions::default()).await.unwrap();
    let rev2 = source
        .put_attachment("doc", "a.txt", Some("text/plain"), b"hello".to_vec(), Some(&rev1.to_string()))
        .await
        .unwrap();
    let gone = source.put("gone", json!({}), PutOptions::default()).await.unwrap();
    let gone = source.delete("gone", Some(&gone.to_string())).await.unwrap();

    let stats = replicate(&source, &target, 0).await.unwrap();
    assert_eq!(stats.docs_checked, 2);
    assert_eq!(stats.docs_written, 2);
    assert_eq!(stats.missing_found, 0);
    assert_eq!(stats.last_seq, source.last_seq().await.unwrap());

    let doc = target.get("doc", &GetOptions::default()).await.unwrap();
    assert_eq!(doc.rev, rev2);
    assert_eq!(doc.body["v"], json!(1));
    assert_eq!(target.get_attachment("doc", "a.txt", None).await.unwrap().data, b"hello");
    assert_eq!(target.history("doc", &rev2).await.unwrap()[1].rev, rev1);
    assert!(target.get("gone", &GetOptions::default()).await.unwrap_err().is_not_found());
    assert_eq!(target.winner("gone").await.unwrap().unwrap().rev, gone);
    assert!(target.winner("gone").await.unwrap().unwrap().deleted);

    // a second run from the start finds nothing to do
    let stats = replicate(&source, &target, 0).await.unwrap();
    assert_eq!(stats.docs_checked, 0);

    // resuming from the checkpoint only sees new edits
    let checkpoint = stats.last_seq;
    source.put("late", json!({}), PutOptions::default()).await.unwrap();
    let stats = replicate(&source, &target, checkpoint).await.unwrap();
    assert_eq!(stats.docs_checked, 1);
    assert_eq!(stats.docs_written, 1);
    assert!(stats.last_seq > checkpoint);
}

/// Conflicting leaves travel together with the winner
#[tokio::test]
async fn test_replicate_carries_conflicts() {
    let store = Store::open_in_memory().await.unwrap();
    let source = Database::create(&store, "source").await.unwrap();
    let target = Database::create(&store, "target").await.unwrap();
    for side in ["aaa", "bbb"] {
        source
            .put("doc", json!({"_rev": format!("1-{}", side)}), PutOptions::replicated())
            .await
            .unwrap();
    }

    let stats = replicate(&source, &target, 0).await.unwrap();
    assert_eq!(stats.docs_written, 2);
    let leaves: Vec<Rev> = target.leaves("doc").await.unwrap().into_iter().map(|l| l.rev).collect();
    assert_eq!(leaves, vec![Rev::new(1, "bbb"), Rev::new(1, "aaa")]);
}
