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

//! Custom test assertions for CouchSQL tests.

use assert_cmd::assert::Assert;
use predicates::prelude::*;

/// Assert that `rev` is a well-formed revision of generation `generation`.
pub fn assert_rev_generation(rev: &str, generation: i64) {
    let (gen, hash) = rev
        .split_once('-')
        .unwrap_or_else(|| panic!("{} is not a revision", rev));
    assert_eq!(
        gen.parse::<i64>().ok(),
        Some(generation),
        "{} should be generation {}",
        rev,
        generation
    );
    assert!(!hash.is_empty(), "{} has an empty hash", rev);
}

/// Assert that a failed CLI run reported an engine error with `status`.
pub fn assert_engine_error(assert: Assert, status: u16) -> Assert {
    assert
        .failure()
        .stderr(predicate::str::contains(format!("(status {})", status)))
}

/// Assert that a failed CLI run mentioned `text` on stderr.
pub fn assert_error_mentions(assert: Assert, text: &str) -> Assert {
    assert.failure().stderr(predicate::str::contains(text))
}
