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

//! # CouchSQL Test Utilities
//!
//! Shared test utilities for CouchSQL crates providing:
//! - CLI command helpers for testing the couchsql binary
//! - A temporary workspace holding a database file
//! - Document and attachment fixtures
//! - Custom assertions for revisions and CLI errors

pub mod assertions;
pub mod cli;
pub mod fixtures;
pub mod workspace;

// Re-export commonly used items at crate root
pub use assertions::*;
pub use cli::{couchsql, CouchsqlCommand};
pub use fixtures::TestFixtures;
pub use workspace::TestWorkspace;
