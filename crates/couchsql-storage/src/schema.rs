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

//! Per-database schema and table naming
//!
//! Every database owns four tables, one per [`TableRole`]. A [`Tables`] value
//! computes their quoted names once; queries are written as templates with
//! `{docs}`, `{revs}`, `{attachments}` and `{mango}` placeholders and
//! expanded with [`Tables::render`].
//!
//! ```
//! use couchsql_storage::{TableRole, Tables};
//!
//! let tables = Tables::new("albums");
//! assert_eq!(tables.name(TableRole::Docs), r#""couchsql$albums""#);
//! assert_eq!(
//!     tables.render("SELECT rev FROM {revs} WHERE id = ?"),
//!     r#"SELECT rev FROM "couchsql$albums$revs" WHERE id = ?"#
//! );
//! ```

use md5::{Digest, Md5};

const PREFIX: &str = "couchsql$";

/// Logical role of a per-database table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableRole {
    /// Revision nodes and their parent pointers
    Revs,
    /// One body snapshot per revision node that has one
    Docs,
    /// Versioned attachment content
    Attachments,
    /// Mango index definitions
    MangoIndexes,
}

impl TableRole {
    /// All roles in creation order
    pub const ALL: [TableRole; 4] = [
        TableRole::Revs,
        TableRole::Docs,
        TableRole::Attachments,
        TableRole::MangoIndexes,
    ];

    fn placeholder(self) -> &'static str {
        match self {
            TableRole::Revs => "{revs}",
            TableRole::Docs => "{docs}",
            TableRole::Attachments => "{attachments}",
            TableRole::MangoIndexes => "{mango}",
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            TableRole::Revs => "$revs",
            TableRole::Docs => "",
            TableRole::Attachments => "$attachments",
            TableRole::MangoIndexes => "$mango",
        }
    }
}

/// Quoted table names for one database
#[derive(Debug, Clone)]
pub struct Tables {
    db_name: String,
    revs: String,
    docs: String,
    attachments: String,
    mango: String,
}

impl Tables {
    /// Compute the table names of database `db_name`
    pub fn new(db_name: &str) -> Self {
        let quoted = |role: TableRole| quote_ident(&format!("{}{}{}", PREFIX, db_name, role.suffix()));
        Tables {
            db_name: db_name.to_string(),
            revs: quoted(TableRole::Revs),
            docs: quoted(TableRole::Docs),
            attachments: quoted(TableRole::Attachments),
            mango: quoted(TableRole::MangoIndexes),
        }
    }

    /// Name of the database these tables belong to
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Quoted name of the table playing `role`
    pub fn name(&self, role: TableRole) -> &str {
        match role {
            TableRole::Revs => &self.revs,
            TableRole::Docs => &self.docs,
            TableRole::Attachments => &self.attachments,
            TableRole::MangoIndexes => &self.mango,
        }
    }

    /// Expand table placeholders in an SQL template
    pub fn render(&self, template: &str) -> String {
        TableRole::ALL
            .iter()
            .fold(template.to_string(), |sql, role| {
                sql.replace(role.placeholder(), self.name(*role))
            })
    }

    /// Statements creating every table and index of the database
    pub fn create_statements(&self) -> Vec<String> {
        let revs_parent = self.index_name("revs_parent");
        let atts_lookup = self.index_name("attachments_lookup");
        let docs_id = self.index_name("docs_id");
        vec![
            self.render(
                r#"CREATE TABLE {revs} (
    id TEXT NOT NULL,
    rev INTEGER NOT NULL,
    rev_id TEXT NOT NULL,
    parent_rev INTEGER,
    parent_rev_id TEXT,
    UNIQUE (id, rev, rev_id),
    FOREIGN KEY (id, parent_rev, parent_rev_id) REFERENCES {revs} (id, rev, rev_id) ON DELETE CASCADE
)"#,
            ),
            self.render(&format!(
                "CREATE INDEX {} ON {{revs}} (id, parent_rev, parent_rev_id)",
                revs_parent
            )),
            self.render(
                r#"CREATE TABLE {docs} (
    seq INTEGER PRIMARY KEY,
    id TEXT NOT NULL,
    rev INTEGER NOT NULL,
    rev_id TEXT NOT NULL,
    doc BLOB NOT NULL,
    md5 TEXT NOT NULL,
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    UNIQUE (id, rev, rev_id),
    FOREIGN KEY (id, rev, rev_id) REFERENCES {revs} (id, rev, rev_id) ON DELETE CASCADE
)"#,
            ),
            self.render(&format!("CREATE INDEX {} ON {{docs}} (id)", docs_id)),
            self.render(
                r#"CREATE TABLE {attachments} (
    pk INTEGER PRIMARY KEY,
    id TEXT NOT NULL,
    rev INTEGER NOT NULL,
    rev_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    content_type TEXT NOT NULL,
    length INTEGER NOT NULL,
    digest TEXT NOT NULL,
    data BLOB NOT NULL,
    deleted_rev INTEGER,
    deleted_rev_id TEXT,
    FOREIGN KEY (id, rev, rev_id) REFERENCES {revs} (id, rev, rev_id) ON DELETE CASCADE
)"#,
            ),
            self.render(&format!(
                "CREATE INDEX {} ON {{attachments}} (id, filename)",
                atts_lookup
            )),
            self.render(
                r#"CREATE TABLE {mango} (
    ddoc TEXT NOT NULL,
    name TEXT NOT NULL,
    index_def TEXT NOT NULL,
    PRIMARY KEY (ddoc, name)
)"#,
            ),
        ]
    }

    /// Statements dropping every table of the database, dependents first
    pub fn drop_statements(&self) -> Vec<String> {
        [
            TableRole::MangoIndexes,
            TableRole::Attachments,
            TableRole::Docs,
            TableRole::Revs,
        ]
        .iter()
        .map(|role| format!("DROP TABLE IF EXISTS {}", self.name(*role)))
        .collect()
    }

    /// Quoted name of the SQL index backing Mango index `ddoc`/`name`
    ///
    /// The full md5 of `ddoc/name` keeps distinct Mango indexes from ever
    /// sharing one SQL index.
    pub fn mango_index_name(&self, ddoc: &str, name: &str) -> String {
        let digest = hex::encode(Md5::digest(format!("{}/{}", ddoc, name).as_bytes()));
        self.index_name(&format!("mango_{}", digest))
    }

    /// Statement creating the expression index for a Mango field list
    ///
    /// Each field is a dotted path such as `address.city`, paired with
    /// whether it sorts descending.
    pub fn mango_index_ddl(&self, ddoc: &str, name: &str, fields: &[(&str, bool)]) -> String {
        let columns: Vec<String> = fields
            .iter()
            .map(|(field, descending)| {
                let order = if *descending { " DESC" } else { "" };
                format!("json_extract(doc, '{}'){}", json_path(field), order)
            })
            .collect();
        self.render(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {{docs}} ({})",
            self.mango_index_name(ddoc, name),
            columns.join(", ")
        ))
    }

    fn index_name(&self, suffix: &str) -> String {
        quote_ident(&format!("{}{}${}", PREFIX, self.db_name, suffix))
    }
}

/// Quote an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite JSON path for a dotted field name, quoted for use in a string literal
///
/// ```
/// assert_eq!(couchsql_storage::schema::json_path("a.b"), r#"$."a"."b""#);
/// ```
pub fn json_path(field: &str) -> String {
    let mut path = String::from("$");
    for segment in field.split('.') {
        path.push_str(".\"");
        path.push_str(&segment.replace('"', "\\\""));
        path.push('"');
    }
    path.replace('\'', "''")
}
