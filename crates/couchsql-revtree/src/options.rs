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

//! Per-call options
//!
//! Both option types deserialise from CouchDB-style option maps, so
//! `{"new_edits": false}` or `{"rev": "2-x", "conflicts": true}` work as is.

use crate::rev::{Rev, Revisions};
use couchsql_storage::StorageResult;
use serde::{Deserialize, Serialize};

/// Options for [`Database::put`](crate::Database::put)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PutOptions {
    /// Base revision; must agree with `_rev` when both are given
    pub rev: Option<String>,
    /// `false` stores revisions exactly as given (replication mode)
    pub new_edits: bool,
    /// Ancestry of the stored revision; `_revisions` in the body wins
    pub revisions: Option<Revisions>,
}

impl Default for PutOptions {
    fn default() -> Self {
        PutOptions {
            rev: None,
            new_edits: true,
            revisions: None,
        }
    }
}

impl PutOptions {
    /// Options with a base revision
    pub fn with_rev<S: Into<String>>(rev: S) -> Self {
        PutOptions {
            rev: Some(rev.into()),
            ..Self::default()
        }
    }

    /// Replication-mode options
    pub fn replicated() -> Self {
        PutOptions {
            new_edits: false,
            ..Self::default()
        }
    }
}

/// Options for reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetOptions {
    /// Read this revision instead of the winner
    pub rev: Option<String>,
    /// Follow `rev` to its newest leaf
    pub latest: bool,
    /// Add `_conflicts`
    pub conflicts: bool,
    /// Add `_deleted_conflicts`
    pub deleted_conflicts: bool,
    /// Add `_revs_info`
    pub revs_info: bool,
    /// Add `_revisions`
    pub revs: bool,
    /// Shorthand for `conflicts`, `deleted_conflicts` and `revs_info`
    pub meta: bool,
    /// Add `_local_seq`
    pub local_seq: bool,
    /// Inline attachment content instead of stubs
    pub attachments: bool,
    /// Inline only attachments newer than all of these revisions
    pub atts_since: Vec<String>,
}

impl GetOptions {
    /// Options reading a specific revision
    pub fn with_rev<S: Into<String>>(rev: S) -> Self {
        GetOptions {
            rev: Some(rev.into()),
            ..Self::default()
        }
    }

    pub(crate) fn target_rev(&self) -> StorageResult<Option<Rev>> {
        Rev::parse_opt(self.rev.as_deref())
    }

    pub(crate) fn want_conflicts(&self) -> bool {
        self.conflicts || self.meta
    }

    pub(crate) fn want_deleted_conflicts(&self) -> bool {
        self.deleted_conflicts || self.meta
    }

    pub(crate) fn want_revs_info(&self) -> bool {
        self.revs_info || self.meta
    }

    /// Highest generation listed in `atts_since`.
    ///
    /// Every entry must be a well-formed revision; the first malformed one
    /// is a BadRequest.
    pub(crate) fn atts_since_generation(&self) -> StorageResult<Option<i64>> {
        let mut highest = None;
        for entry in &self.atts_since {
            let rev = Rev::parse(entry)?;
            highest = highest.max(Some(rev.rev));
        }
        Ok(highest)
    }
}
