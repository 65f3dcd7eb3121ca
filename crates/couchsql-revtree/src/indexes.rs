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

//! Mango index bookkeeping
//!
//! An index is a row in the Mango table plus an SQLite expression index over
//! `json_extract(doc, ...)` for each field. Query planning is not done here.

use crate::database::Database;
use crate::rev::canonical_json;
use couchsql_storage::sqlx::{self, Row};
use couchsql_storage::{StorageError, StorageResult};
use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::info;

const DESIGN_PREFIX: &str = "_design/";

/// Sort direction of one index field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

/// One field of an index, as a dotted path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    /// Dotted field path
    pub path: String,
    /// Sort direction
    pub direction: SortDirection,
}

/// Whether [`Database::create_index`] created anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOutcome {
    /// A new index was stored
    Created,
    /// An index with that design document and name already existed
    Exists,
}

/// Result of [`Database::create_index`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateIndexResult {
    /// Created or already present
    pub result: IndexOutcome,
    /// Design document id
    pub id: String,
    /// Index name
    pub name: String,
}

/// An index as listed by [`Database::get_indexes`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    /// Design document id; `None` for the built-in index
    pub ddoc: Option<String>,
    /// Index name
    pub name: String,
    /// `special` or `json`
    #[serde(rename = "type")]
    pub kind: String,
    /// Normalised definition
    pub def: Value,
}

/// Normalise an index definition to its field list.
///
/// Accepts `{"fields": ["a.b", {"c": "desc"}]}`; a bare string is ascending.
pub fn parse_fields(definition: &Value) -> StorageResult<Vec<IndexField>> {
    let fields = definition
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| StorageError::bad_request("index definition needs a fields array"))?;
    if fields.is_empty() {
        return Err(StorageError::bad_request("index fields must not be empty"));
    }
    fields.iter().map(parse_field).collect()
}

fn parse_field(field: &Value) -> StorageResult<IndexField> {
    match field {
        Value::String(path) if !path.is_empty() => Ok(IndexField {
            path: path.clone(),
            direction: SortDirection::Asc,
        }),
        Value::Object(map) if map.len() == 1 => {
            let (path, direction) = map
                .iter()
                .next()
                .ok_or_else(|| StorageError::bad_request("empty index field"))?;
            let direction = match direction.as_str() {
                Some("asc") => SortDirection::Asc,
                Some("desc") => SortDirection::Desc,
                _ => {
                    return Err(StorageError::bad_request(format!(
                        "invalid sort direction for {}",
                        path
                    )))
                }
            };
            Ok(IndexField {
                path: path.clone(),
                direction,
            })
        }
        other => Err(StorageError::bad_request(format!("invalid index field: {}", other))),
    }
}

fn fields_json(fields: &[IndexField]) -> Value {
    let list: Vec<Value> = fields
        .iter()
        .map(|field| {
            let mut entry = Map::new();
            entry.insert(field.path.clone(), json!(field.direction));
            Value::Object(entry)
        })
        .collect();
    json!({ "fields": list })
}

impl Database {
    /// Store a Mango index and build its SQL index
    ///
    /// Empty `ddoc` or `name` are derived from the md5 of the normalised
    /// definition. `ddoc` gets the `_design/` prefix when it lacks one.
    pub async fn create_index(
        &self,
        ddoc: &str,
        name: &str,
        definition: &Value,
    ) -> StorageResult<CreateIndexResult> {
        let fields = parse_fields(definition)?;
        let def = fields_json(&fields);
        let derived = hex::encode(Md5::digest(canonical_json(&def)?));
        let ddoc = match ddoc {
            "" => format!("{}{}", DESIGN_PREFIX, derived),
            d if d.starts_with(DESIGN_PREFIX) => d.to_string(),
            d => format!("{}{}", DESIGN_PREFIX, d),
        };
        let name = if name.is_empty() { derived } else { name.to_string() };

        let tables = self.tables();
        let mut tx = self.store().begin_write().await?;
        let exists: Option<i64> =
            sqlx::query_scalar(&tables.render("SELECT 1 FROM {mango} WHERE ddoc = ?1 AND name = ?2"))
                .bind(ddoc.as_str())
                .bind(name.as_str())
                .fetch_optional(tx.conn())
                .await?;
        if exists.is_some() {
            return Ok(CreateIndexResult {
                result: IndexOutcome::Exists,
                id: ddoc,
                name,
            });
        }

        sqlx::query(&tables.render("INSERT INTO {mango} (ddoc, name, index_def) VALUES (?1, ?2, ?3)"))
            .bind(ddoc.as_str())
            .bind(name.as_str())
            .bind(def.to_string())
            .execute(tx.conn())
            .await?;
        let columns: Vec<(&str, bool)> = fields
            .iter()
            .map(|field| (field.path.as_str(), field.direction == SortDirection::Desc))
            .collect();
        sqlx::query(&tables.mango_index_ddl(&ddoc, &name, &columns))
            .execute(tx.conn())
            .await?;
        tx.commit().await?;
        info!(db = %self.name(), ddoc = %ddoc, name = %name, "Created index");
        Ok(CreateIndexResult {
            result: IndexOutcome::Created,
            id: ddoc,
            name,
        })
    }

    /// The built-in `_all_docs` index followed by the stored ones
    pub async fn get_indexes(&self) -> StorageResult<Vec<IndexInfo>> {
        let rows = sqlx::query(
            &self
                .tables()
                .render("SELECT ddoc, name, index_def FROM {mango} ORDER BY ddoc, name"),
        )
        .fetch_all(self.store().pool())
        .await?;

        let mut indexes = vec![IndexInfo {
            ddoc: None,
            name: "_all_docs".to_string(),
            kind: "special".to_string(),
            def: json!({"fields": [{"_id": "asc"}]}),
        }];
        for row in rows {
            let def: String = row.try_get("index_def")?;
            indexes.push(IndexInfo {
                ddoc: Some(row.try_get("ddoc")?),
                name: row.try_get("name")?,
                kind: "json".to_string(),
                def: serde_json::from_str(&def).map_err(StorageError::other)?,
            });
        }
        Ok(indexes)
    }

    /// Drop a stored index
    pub async fn delete_index(&self, ddoc: &str, name: &str) -> StorageResult<()> {
        let ddoc = if ddoc.starts_with(DESIGN_PREFIX) {
            ddoc.to_string()
        } else {
            format!("{}{}", DESIGN_PREFIX, ddoc)
        };
        let tables = self.tables();
        let mut tx = self.store().begin_write().await?;
        let deleted = sqlx::query(&tables.render("DELETE FROM {mango} WHERE ddoc = ?1 AND name = ?2"))
            .bind(ddoc.as_str())
            .bind(name)
            .execute(tx.conn())
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StorageError::not_found(format!("index {}/{}", ddoc, name)));
        }
        sqlx::query(&format!(
            "DROP INDEX IF EXISTS {}",
            tables.mango_index_name(&ddoc, name)
        ))
        .execute(tx.conn())
        .await?;
        tx.commit().await?;
        info!(db = %self.name(), ddoc = %ddoc, name = %name, "Deleted index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields_normalises() {
        let fields = parse_fields(&json!({"fields": ["a.b", {"c": "desc"}]})).unwrap();
        assert_eq!(
            fields,
            vec![
                IndexField { path: "a.b".into(), direction: SortDirection::Asc },
                IndexField { path: "c".into(), direction: SortDirection::Desc },
            ]
        );
        assert_eq!(
            fields_json(&fields),
            json!({"fields": [{"a.b": "asc"}, {"c": "desc"}]})
        );
    }

    #[test]
    fn test_parse_fields_rejects_malformed() {
        for bad in [
            json!({}),
            json!({"fields": []}),
            json!({"fields": [""]}),
            json!({"fields": [{"a": "up"}]}),
            json!({"fields": [{"a": "asc", "b": "asc"}]}),
            json!({"fields": [3]}),
        ] {
            assert!(parse_fields(&bad).unwrap_err().is_bad_request(), "{}", bad);
        }
    }
}
