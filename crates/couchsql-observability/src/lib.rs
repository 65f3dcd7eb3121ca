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
//! Logging setup for CouchSQL
//!
//! Wraps `tracing-subscriber` so binaries can pick an output format, a level
//! directive and whether sqlx statement logging is on.
//!
//! # Example
//!
//! ```no_run
//! use couchsql_observability::{init_tracing_with_config, LogConfig, LogFormat};
//!
//! let config = LogConfig::new().with_format(LogFormat::Pretty).with_level("info");
//! init_tracing_with_config(config).unwrap();
//! tracing::info!("ready");
//! ```

pub mod config;
pub mod initialization;

pub use config::{LogConfig, LogError, LogFormat, LogOutput};
pub use initialization::{init_tracing, init_tracing_with_config};
