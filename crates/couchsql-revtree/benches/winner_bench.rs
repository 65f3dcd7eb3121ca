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

//! Winner resolution and write path benchmarks

use couchsql_revtree::{Database, GetOptions, PutOptions};
use couchsql_storage::Store;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::hint::black_box;
use tokio::runtime::Runtime;

/// A document with `depth` revisions on one branch plus `conflicts` extra roots
async fn seeded(depth: i64, conflicts: usize) -> Database {
    let store = Store::open_in_memory().await.expect("store");
    let db = Database::create(&store, "bench").await.expect("database");
    let mut rev = db
        .put("doc", json!({"n": 0}), PutOptions::default())
        .await
        .expect("root");
    for n in 1..depth {
        rev = db
            .put("doc", json!({"n": n}), PutOptions::with_rev(rev.to_string()))
            .await
            .expect("update");
    }
    for i in 0..conflicts {
        db.put(
            "doc",
            json!({"_rev": format!("1-conflict{:04}", i)}),
            PutOptions::replicated(),
        )
        .await
        .expect("conflict");
    }
    db
}

fn bench_winner(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("winner");
    for (depth, conflicts) in [(1, 0), (50, 0), (50, 20)] {
        let db = rt.block_on(seeded(depth, conflicts));
        let id = format!("{}x{}", depth, conflicts);
        group.bench_with_input(BenchmarkId::from_parameter(id), &db, |bench, db| {
            bench
                .to_async(&rt)
                .iter(|| async { black_box(db.winner("doc").await.expect("winner")) })
        });
    }
    group.finish();
}

fn bench_get_meta(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let db = rt.block_on(seeded(50, 20));
    let options = GetOptions {
        meta: true,
        revs: true,
        ..GetOptions::default()
    };
    c.bench_function("get/meta", |bench| {
        bench
            .to_async(&rt)
            .iter(|| async { black_box(db.get("doc", &options).await.expect("get")) })
    });
}

fn bench_update(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let db = rt.block_on(seeded(1, 0));
    let mut rev = rt
        .block_on(db.get_rev("doc", &GetOptions::default()))
        .expect("rev");
    let mut n = 0u64;
    c.bench_function("put/update", |bench| {
        bench.iter(|| {
            n += 1;
            rev = rt
                .block_on(db.put("doc", json!({"n": n}), PutOptions::with_rev(rev.to_string())))
                .expect("put");
        })
    });
}

criterion_group!(benches, bench_winner, bench_get_meta, bench_update);
criterion_main!(benches);
