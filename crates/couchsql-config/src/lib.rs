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
//! Configuration for CouchSQL
//!
//! Settings come from TOML, YAML or JSON files, picked by extension, and can be
//! overridden with `COUCHSQL_*` environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `COUCHSQL_STORAGE_PATH` | `storage.path` |
//! | `COUCHSQL_IN_MEMORY` | `storage.in_memory` |
//! | `COUCHSQL_MAX_CONNECTIONS` | `storage.max_connections` |
//! | `COUCHSQL_BUSY_TIMEOUT_MS` | `storage.busy_timeout_ms` |
//! | `COUCHSQL_LOG_LEVEL` | `logging.level` |
//! | `COUCHSQL_LOG_FORMAT` | `logging.format` |
//! | `COUCHSQL_SQL_QUERIES` | `logging.sql_queries` |
//!
//! # Example
//!
//! ```no_run
//! use couchsql_config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let loader = ConfigLoader::new();
//!     let config = loader.load_with_overrides("couchsql.toml").await?;
//!
//!     println!("Database file: {}", config.storage.path.display());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

// Re-export commonly used items
pub use error::{ConfigError, ConfigResult};
pub use loader::{apply_overrides, ConfigFormat, ConfigLoader};
pub use schema::*;
pub use validation::Validator;
