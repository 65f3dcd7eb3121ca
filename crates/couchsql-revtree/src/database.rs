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

//! Handle on one database inside a [`Store`]

use couchsql_storage::{StorageError, StorageResult, Store, Tables};
use std::sync::Arc;

/// Content type recorded for attachments uploaded without one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A named database of revision trees
///
/// Cheap to clone; clones share the store's pool and write gate.
#[derive(Debug, Clone)]
pub struct Database {
    store: Store,
    tables: Arc<Tables>,
    default_content_type: String,
}

impl Database {
    /// Open an existing database
    pub async fn open(store: &Store, name: &str) -> StorageResult<Self> {
        if !store.db_exists(name).await? {
            return Err(StorageError::not_found(format!("database {}", name)));
        }
        Ok(Self::handle(store, name))
    }

    /// Create a database and open it
    pub async fn create(store: &Store, name: &str) -> StorageResult<Self> {
        store.create_db(name).await?;
        Ok(Self::handle(store, name))
    }

    /// Open `name`, creating it first when missing
    pub async fn open_or_create(store: &Store, name: &str) -> StorageResult<Self> {
        match Self::open(store, name).await {
            Err(e) if e.is_not_found() => Self::create(store, name).await,
            other => other,
        }
    }

    fn handle(store: &Store, name: &str) -> Self {
        Database {
            store: store.clone(),
            tables: Arc::new(Tables::new(name)),
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    /// Use `content_type` for attachments uploaded without one
    pub fn with_default_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    /// Database name
    pub fn name(&self) -> &str {
        self.tables.db_name()
    }

    /// The store this database lives in
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn tables(&self) -> &Tables {
        &self.tables
    }

    pub(crate) fn default_content_type(&self) -> &str {
        &self.default_content_type
    }
}
