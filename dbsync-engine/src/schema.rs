use std::collections::HashMap;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Error, Result};
use crate::value::ColumnType;

/// One field of a synchronized table, as reported by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub cid: i32,
    pub name: String,
    pub kind: ColumnType,
    pub primary_key: bool,
}

/// Per-table column lists, loaded once via `PRAGMA table_info` and memoized
/// for the engine's lifetime. Primary-key membership never changes after the
/// first load.
#[derive(Debug, Default)]
pub struct SchemaCache {
    tables: HashMap<String, Vec<Column>>,
}

impl SchemaCache {
    pub fn columns(&mut self, conn: &Connection, table: &str) -> Result<&[Column]> {
        if !self.tables.contains_key(table) {
            let columns = load_columns(conn, table)?;
            if columns.is_empty() {
                return Err(Error::UnknownTable(table.to_owned()));
            }
            debug!(table, columns = columns.len(), "loaded table schema");
            self.tables.insert(table.to_owned(), columns);
        }
        Ok(&self.tables[table])
    }

    /// Cached lookup only; fails with `UnknownTable` when the table has never
    /// been loaded.
    pub fn cached(&self, table: &str) -> Result<&[Column]> {
        self.tables
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownTable(table.to_owned()))
    }

    pub fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .cached(table)?
            .iter()
            .filter(|column| column.primary_key)
            .map(|column| column.name.clone())
            .collect())
    }
}

fn load_columns(conn: &Connection, table: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        let declared: String = row.get(2)?;
        columns.push(Column {
            cid: row.get(0)?,
            name: row.get(1)?,
            kind: ColumnType::from_declared(&declared),
            primary_key: row.get::<_, i32>(5)? > 0,
        });
    }
    Ok(columns)
}

/// Fetch the table's original creation statement from the catalog; the
/// shadow-table DDL is derived from it.
pub fn table_create_statement(conn: &Connection, table: &str) -> Result<String> {
    let mut stmt =
        conn.prepare("SELECT sql FROM sqlite_master WHERE type='table' AND name=?1;")?;
    let mut rows = stmt.query([table])?;
    match rows.next()? {
        Some(row) => {
            let sql: String = row.get(0)?;
            Ok(sql)
        }
        None => Err(Error::SchemaUnavailable {
            table: table.to_owned(),
            reason: "no creation statement in sqlite_master".into(),
        }),
    }
}
