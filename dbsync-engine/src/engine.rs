use std::collections::HashMap;
use std::fs;
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::delta::{DeltaKind, ResultSink};
use crate::error::{Error, Result};
use crate::query::{self, PK_FIELD_PREFIX};
use crate::schema::{self, Column, SchemaCache};
use crate::value::{row_to_document, Row, Value};

/// Suffix of the temporary mirror table a diff pass stages reported rows in.
pub const SHADOW_TABLE_SUFFIX: &str = "_shadow";

/// Storage backend selector; anything but the SQLite variant fails at
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Sqlite3,
    Undefined,
}

/// How the update phase of a diff pass renders its statements. The literal
/// mode reproduces the observed engine's string-built SQL and exists for
/// compatibility only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    #[default]
    Parameterized,
    LegacyLiteral,
}

pub fn create_engine(kind: EngineKind, path: &Path, ddl: &str) -> Result<SqliteEngine> {
    match kind {
        EngineKind::Sqlite3 => SqliteEngine::open(path, ddl),
        EngineKind::Undefined => Err(Error::UnknownEngineType),
    }
}

pub fn shadow_table_name(table: &str) -> String {
    format!("{}{}", table, SHADOW_TABLE_SUFFIX)
}

/// Change-detection engine over one SQLite connection.
///
/// The engine performs no internal locking: the caller guards every
/// operation against one logical database handle with a single mutex, and
/// the background sync loop acquires the same mutex per pass.
#[derive(Debug)]
pub struct SqliteEngine {
    conn: Connection,
    schema: SchemaCache,
    max_rows: HashMap<String, u64>,
    update_mode: UpdateMode,
}

impl SqliteEngine {
    /// Open (recreating any existing file) and apply the schema DDL.
    pub fn open(path: &Path, ddl: &str) -> Result<Self> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn, ddl)
    }

    pub fn open_in_memory(ddl: &str) -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?, ddl)
    }

    fn initialize(conn: Connection, ddl: &str) -> Result<Self> {
        conn.execute_batch("PRAGMA temp_store = memory; PRAGMA synchronous = OFF;")?;
        conn.execute_batch(ddl)?;
        Ok(Self {
            conn,
            schema: SchemaCache::default(),
            max_rows: HashMap::new(),
            update_mode: UpdateMode::default(),
        })
    }

    pub fn set_update_mode(&mut self, mode: UpdateMode) {
        self.update_mode = mode;
    }

    /// Configure the row-count ceiling for a table; enforced before any
    /// further insert is accepted.
    pub fn set_table_max_rows(&mut self, table: &str, ceiling: u64) -> Result<()> {
        self.table_columns(table)?;
        self.max_rows.insert(table.to_owned(), ceiling);
        Ok(())
    }

    pub fn primary_keys(&mut self, table: &str) -> Result<Vec<String>> {
        self.table_columns(table)?;
        self.schema.primary_keys(table)
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<Column>> {
        Ok(self.schema.columns(&self.conn, table)?.to_vec())
    }

    /// Insert caller-supplied row documents outside any diff pass.
    pub fn insert_rows(&mut self, table: &str, rows: &[JsonValue]) -> Result<()> {
        let columns = self.table_columns(table)?;
        self.ensure_capacity(table, rows.len() as u64)?;
        self.insert_documents(table, &columns, rows)
    }

    /// Delete rows identified by the primary-key fields of each document.
    pub fn delete_rows(&mut self, table: &str, rows: &[JsonValue]) -> Result<()> {
        let columns = self.table_columns(table)?;
        let primary_keys = self.schema.primary_keys(table)?;
        if primary_keys.is_empty() {
            return Err(Error::NoPrimaryKey(table.to_owned()));
        }
        let key_columns = key_columns(&columns, &primary_keys);
        let sql = query::delete_sql(table, &primary_keys);
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for doc in rows {
                let params: Vec<SqlValue> = key_columns
                    .iter()
                    .map(|column| bind_field(column, doc))
                    .collect();
                if let Err(err) = stmt.execute(params_from_iter(params)) {
                    warn!(table, %err, "row delete failed, skipping row");
                }
            }
        }
        tx.commit()
            .map_err(|err| Error::TransactionFailure(err.to_string()))
    }

    /// Current rows of a table as documents, optionally projected to a field
    /// list. Fields that are not columns of the table are ignored.
    pub fn select_rows(&mut self, table: &str, fields: Option<&[String]>) -> Result<Vec<JsonValue>> {
        let columns = self.table_columns(table)?;
        let selected: Vec<Column> = match fields {
            Some(fields) => columns
                .iter()
                .filter(|column| fields.iter().any(|f| f == &column.name))
                .cloned()
                .collect(),
            None => columns,
        };
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<&str> = selected.iter().map(|c| c.name.as_str()).collect();
        let sql = format!("SELECT {} FROM {};", names.join(","), table);
        let rows = self.collect_rows(&sql, &selected)?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    /// One full diff pass: stage `reported` in a shadow table, compute the
    /// deleted/modified/inserted sets, apply each to the main table, and
    /// notify every affected row through `sink`. The shadow table is dropped
    /// even when the pass fails partway.
    pub fn run_diff_pass(
        &mut self,
        table: &str,
        reported: &[JsonValue],
        sink: &mut ResultSink<'_>,
    ) -> Result<()> {
        let columns = self.table_columns(table)?;
        let primary_keys = self.schema.primary_keys(table)?;
        if primary_keys.is_empty() {
            return Err(Error::NoPrimaryKey(table.to_owned()));
        }
        let shadow = shadow_table_name(table);
        let result = self.create_shadow(table, &shadow).and_then(|()| {
            self.diff_and_apply(table, &shadow, &columns, &primary_keys, reported, sink)
        });
        // A cleanup failure cannot un-fail an already-failed pass.
        if let Err(err) = self
            .conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {};", shadow))
        {
            warn!(table, %err, "failed to drop shadow table");
        }
        result
    }

    fn create_shadow(&mut self, table: &str, shadow: &str) -> Result<()> {
        let create = schema::table_create_statement(&self.conn, table)?;
        let ddl = create.replacen(
            &format!("CREATE TABLE {}", table),
            &format!("CREATE TEMP TABLE {}", shadow),
            1,
        );
        if ddl == create {
            return Err(Error::SchemaUnavailable {
                table: table.to_owned(),
                reason: "creation statement does not name the table".into(),
            });
        }
        self.conn
            .execute_batch(&ddl)
            .map_err(|err| Error::SchemaUnavailable {
                table: table.to_owned(),
                reason: err.to_string(),
            })
    }

    fn diff_and_apply(
        &mut self,
        table: &str,
        shadow: &str,
        columns: &[Column],
        primary_keys: &[String],
        reported: &[JsonValue],
        sink: &mut ResultSink<'_>,
    ) -> Result<()> {
        // Population failure aborts the pass; phase failures below only
        // abort their own phase, the next interval retries from current
        // state.
        self.insert_documents(shadow, columns, reported)?;

        match self.collect_deleted_rows(table, shadow, columns, primary_keys) {
            Ok(deleted) if !deleted.is_empty() => {
                match self.apply_deletes(table, primary_keys, &deleted) {
                    Ok(()) => notify_rows(sink, DeltaKind::Deleted, &deleted),
                    Err(err) => warn!(table, %err, "delete phase failed"),
                }
            }
            Ok(_) => {}
            Err(err) => warn!(table, %err, "failed to compute deleted set"),
        }

        match self.collect_modified_rows(table, shadow, columns, primary_keys) {
            Ok(modified) if !modified.is_empty() => {
                match self.apply_updates(table, primary_keys, &modified) {
                    Ok(()) => notify_rows(sink, DeltaKind::Modified, &modified),
                    Err(err) => warn!(table, %err, "update phase failed"),
                }
            }
            Ok(_) => {}
            Err(err) => warn!(table, %err, "failed to compute modified set"),
        }

        let inserted_sql = query::left_only_sql(shadow, table, primary_keys, false);
        match self.collect_rows(&inserted_sql, columns) {
            Ok(inserted) if !inserted.is_empty() => {
                match self.insert_row_batch(table, columns, &inserted) {
                    Ok(()) => notify_rows(sink, DeltaKind::Inserted, &inserted),
                    Err(err) => warn!(table, %err, "insert phase failed"),
                }
            }
            Ok(_) => {}
            Err(err) => warn!(table, %err, "failed to compute inserted set"),
        }

        Ok(())
    }

    fn insert_documents(
        &mut self,
        target: &str,
        columns: &[Column],
        rows: &[JsonValue],
    ) -> Result<()> {
        let sql = query::insert_sql(target, columns.len());
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for doc in rows {
                let params: Vec<SqlValue> =
                    columns.iter().map(|column| bind_field(column, doc)).collect();
                if let Err(err) = stmt.execute(params_from_iter(params)) {
                    warn!(table = target, %err, "row insert failed, skipping row");
                }
            }
        }
        tx.commit()
            .map_err(|err| Error::TransactionFailure(err.to_string()))
    }

    fn insert_row_batch(&mut self, table: &str, columns: &[Column], rows: &[Row]) -> Result<()> {
        self.ensure_capacity(table, rows.len() as u64)?;
        let sql = query::insert_sql(table, columns.len());
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                let params: Vec<SqlValue> = columns
                    .iter()
                    .map(|column| match row.get(&column.name) {
                        Some(value) => value.to_sql_value(),
                        None => SqlValue::Null,
                    })
                    .collect();
                if let Err(err) = stmt.execute(params_from_iter(params)) {
                    warn!(table, %err, "row insert failed, skipping row");
                }
            }
        }
        tx.commit()
            .map_err(|err| Error::TransactionFailure(err.to_string()))
    }

    fn apply_deletes(&mut self, table: &str, primary_keys: &[String], rows: &[Row]) -> Result<()> {
        let sql = query::delete_sql(table, primary_keys);
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                let params: Vec<SqlValue> = primary_keys
                    .iter()
                    .map(|key| match row.get(key) {
                        Some(value) => value.to_sql_value(),
                        None => SqlValue::Null,
                    })
                    .collect();
                if let Err(err) = stmt.execute(params_from_iter(params)) {
                    warn!(table, %err, "row delete failed, skipping row");
                }
            }
        }
        tx.commit()
            .map_err(|err| Error::TransactionFailure(err.to_string()))
    }

    /// Each modified column may differ across rows, so the update phase
    /// executes one statement per changed column per row, all inside one
    /// transaction with a single commit.
    fn apply_updates(&mut self, table: &str, primary_keys: &[String], rows: &[Row]) -> Result<()> {
        let mode = self.update_mode;
        let tx = self.conn.transaction()?;
        for row in rows {
            for (field, value) in row {
                if field.starts_with(PK_FIELD_PREFIX) {
                    continue;
                }
                let outcome = match mode {
                    UpdateMode::Parameterized => {
                        let mut params = vec![value.to_sql_value()];
                        let mut missing_key = false;
                        for key in primary_keys {
                            match row.get(&format!("{}{}", PK_FIELD_PREFIX, key)) {
                                Some(key_value) => params.push(key_value.to_sql_value()),
                                None => missing_key = true,
                            }
                        }
                        if missing_key {
                            warn!(table, field = %field, "modified row is missing a key field");
                            continue;
                        }
                        let sql = query::update_sql(table, field, primary_keys);
                        tx.execute(&sql, params_from_iter(params))
                    }
                    UpdateMode::LegacyLiteral => {
                        match query::update_sql_literal(table, field, value, primary_keys, row) {
                            Some(sql) => tx.execute(&sql, []),
                            None => {
                                warn!(table, field = %field, "modified row is missing a key field");
                                continue;
                            }
                        }
                    }
                };
                if let Err(err) = outcome {
                    warn!(table, field = %field, %err, "column update failed, skipping");
                }
            }
        }
        tx.commit()
            .map_err(|err| Error::TransactionFailure(err.to_string()))
    }

    /// Key-only anti-join for the deleted set, re-expanded into full rows
    /// from the main table before mutation and notification.
    fn collect_deleted_rows(
        &mut self,
        table: &str,
        shadow: &str,
        columns: &[Column],
        primary_keys: &[String],
    ) -> Result<Vec<Row>> {
        let key_cols = key_columns(columns, primary_keys);
        let sql = query::left_only_sql(table, shadow, primary_keys, true);
        let mut keys = Vec::new();
        {
            let mut stmt = self.conn.prepare(&sql)?;
            let mut result = stmt.query([])?;
            while let Some(row) = result.next()? {
                let mut key = Vec::with_capacity(key_cols.len());
                for (idx, column) in key_cols.iter().enumerate() {
                    if let Some(value) = Value::from_cell(column.kind, row.get_ref(idx)?)? {
                        key.push(value);
                    }
                }
                keys.push(key);
            }
        }

        let expand_sql = query::select_by_key_sql(table, primary_keys);
        let mut rows = Vec::with_capacity(keys.len());
        let mut stmt = self.conn.prepare(&expand_sql)?;
        for key in keys {
            let params: Vec<SqlValue> = key.iter().map(Value::to_sql_value).collect();
            let mut result = stmt.query(params_from_iter(params))?;
            if let Some(row) = result.next()? {
                rows.push(read_full_row(row, columns));
            }
        }
        Ok(rows)
    }

    /// Rows present in both tables with at least one differing non-key
    /// column. Primary keys come back `PK_`-prefixed; unchanged columns are
    /// omitted from the row.
    fn collect_modified_rows(
        &mut self,
        table: &str,
        shadow: &str,
        columns: &[Column],
        primary_keys: &[String],
    ) -> Result<Vec<Row>> {
        let key_cols = key_columns(columns, primary_keys);
        let sql = query::modified_rows_sql(table, shadow, primary_keys, columns);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut result = stmt.query([])?;
        let mut rows = Vec::new();
        while let Some(row) = result.next()? {
            let mut record = Row::new();
            for (idx, column) in key_cols.iter().enumerate() {
                if let Some(value) = Value::from_cell(column.kind, row.get_ref(idx)?)? {
                    record.insert(format!("{}{}", PK_FIELD_PREFIX, column.name), value);
                }
            }
            let base = key_cols.len();
            for (idx, column) in columns.iter().enumerate() {
                match Value::from_cell(column.kind, row.get_ref(base + idx)?) {
                    Ok(Some(value)) => {
                        record.insert(column.name.clone(), value);
                    }
                    Ok(None) => {}
                    Err(err) => debug!(column = %column.name, %err, "skipping column"),
                }
            }
            // A row is modified only when some derived column materialized.
            if record.keys().any(|name| !name.starts_with(PK_FIELD_PREFIX)) {
                rows.push(record);
            }
        }
        Ok(rows)
    }

    fn collect_rows(&self, sql: &str, columns: &[Column]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut result = stmt.query([])?;
        let mut rows = Vec::new();
        while let Some(row) = result.next()? {
            rows.push(read_full_row(row, columns));
        }
        Ok(rows)
    }

    fn ensure_capacity(&self, table: &str, incoming: u64) -> Result<()> {
        let Some(&ceiling) = self.max_rows.get(table) else {
            return Ok(());
        };
        let current: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {};", table), [], |row| {
                    row.get(0)
                })?;
        let current = current as u64;
        if current + incoming > ceiling {
            return Err(Error::MaxRowsExceeded {
                table: table.to_owned(),
                current,
                incoming,
                ceiling,
            });
        }
        Ok(())
    }
}

fn key_columns<'a>(columns: &'a [Column], primary_keys: &[String]) -> Vec<&'a Column> {
    primary_keys
        .iter()
        .filter_map(|key| columns.iter().find(|column| &column.name == key))
        .collect()
}

/// Bind one document field to its column's declared type; binding errors are
/// logged and the column is left NULL rather than failing the row.
fn bind_field(column: &Column, doc: &JsonValue) -> SqlValue {
    match Value::from_json(column.kind, doc.get(&column.name)) {
        Ok(value) => value.to_sql_value(),
        Err(err) => {
            warn!(column = %column.name, %err, "cannot bind column, leaving NULL");
            SqlValue::Null
        }
    }
}

fn read_full_row(row: &rusqlite::Row<'_>, columns: &[Column]) -> Row {
    let mut out = Row::new();
    for (idx, column) in columns.iter().enumerate() {
        let cell = match row.get_ref(idx) {
            Ok(cell) => cell,
            Err(err) => {
                warn!(column = %column.name, %err, "cannot read column");
                continue;
            }
        };
        match Value::from_cell(column.kind, cell) {
            Ok(Some(value)) => {
                out.insert(column.name.clone(), value);
            }
            Ok(None) => match Value::default_for(column.kind) {
                Ok(value) => {
                    out.insert(column.name.clone(), value);
                }
                Err(err) => debug!(column = %column.name, %err, "skipping column"),
            },
            Err(err) => debug!(column = %column.name, %err, "skipping column"),
        }
    }
    out
}

fn notify_rows(sink: &mut ResultSink<'_>, kind: DeltaKind, rows: &[Row]) {
    for row in rows {
        sink.emit(kind, row_to_document(row));
    }
}
