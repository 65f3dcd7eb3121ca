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

//! Error taxonomy shared by the store and the revision engine

use thiserror::Error;

/// Result type alias for storage and document operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or mutating a database
///
/// Every mutating operation runs inside one transaction; returning any of
/// these variants drops that transaction, which rolls it back.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Stale base revision, delete without a revision, or a lost write race
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database, document, revision or attachment does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed revision string, `_id` mismatch, malformed `_revisions`,
    /// invalid document body or database name
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Database already exists, or an attachment stub has nothing to refer to
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Failure reported by the SQL layer, surfaced unchanged
    #[error("database error: {0}")]
    Internal(#[from] sqlx::Error),

    /// Transparent error delegation for wrapped error types
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Create a Conflict error
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        StorageError::Conflict(msg.into())
    }

    /// Create a NotFound error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        StorageError::NotFound(what.into())
    }

    /// Create a BadRequest error
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        StorageError::BadRequest(msg.into())
    }

    /// Create a PreconditionFailed error
    pub fn precondition_failed<S: Into<String>>(msg: S) -> Self {
        StorageError::PreconditionFailed(msg.into())
    }

    /// Create a generic error from any error type that can convert to anyhow::Error
    pub fn other<E: Into<anyhow::Error>>(error: E) -> Self {
        StorageError::Other(error.into())
    }

    /// Map an error raised while inserting a revision node.
    ///
    /// A unique-constraint violation on `(id, rev, rev_id)` means another
    /// writer got there first, which callers see as a Conflict.
    pub fn from_insert(error: sqlx::Error) -> Self {
        let unique = error
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);
        if unique {
            StorageError::conflict("document update conflict")
        } else {
            StorageError::Internal(error)
        }
    }

    /// Check if this is a Conflict error
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Check if this is a BadRequest error
    pub fn is_bad_request(&self) -> bool {
        matches!(self, StorageError::BadRequest(_))
    }

    /// Check if this is a PreconditionFailed error
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, StorageError::PreconditionFailed(_))
    }

    /// HTTP status CouchDB reports for this kind of failure
    pub fn status_code(&self) -> u16 {
        match self {
            StorageError::Conflict(_) => 409,
            StorageError::NotFound(_) => 404,
            StorageError::BadRequest(_) => 400,
            StorageError::PreconditionFailed(_) => 412,
            StorageError::Internal(_) | StorageError::Other(_) => 500,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        StorageError::BadRequest(format!("invalid JSON: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StorageError::not_found("foo");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: foo");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StorageError::conflict("x").status_code(), 409);
        assert_eq!(StorageError::not_found("x").status_code(), 404);
        assert_eq!(StorageError::bad_request("x").status_code(), 400);
        assert_eq!(StorageError::precondition_failed("x").status_code(), 412);
        assert_eq!(StorageError::other(anyhow::anyhow!("boom")).status_code(), 500);
    }

    #[test]
    fn test_json_error_is_bad_request() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StorageError::from(json_err);
        assert!(err.is_bad_request());
    }

    #[test]
    fn test_non_unique_insert_error_is_internal() {
        let err = StorageError::from_insert(sqlx::Error::RowNotFound);
        assert!(matches!(err, StorageError::Internal(_)));
    }
}
