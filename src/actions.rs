// ABOUTME: JSON configuration and action documents driving the engine from the CLI
// ABOUTME: Actions mirror the agent's document shapes: insert_data, sync_data, delete_rows, set_max_rows

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dbsync_engine::scheduler::SyncScheduler;
use dbsync_engine::{create_engine, DeltaSet, EngineKind, ResultSink, SqliteEngine};
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Engine setup document: database location, backend type, schema DDL, and
/// the tables participating in periodic synchronization.
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    pub db_name: PathBuf,
    #[serde(default = "default_db_type")]
    pub db_type: String,
    pub sql_statement: String,
    #[serde(default)]
    pub sync: Vec<SyncEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SyncEntry {
    pub sync_id: String,
    pub table: String,
    #[serde(default)]
    pub config: JsonValue,
    /// Row ceiling applied to the table before the scheduler starts.
    #[serde(default)]
    pub max_rows: Option<u64>,
}

fn default_db_type() -> String {
    "sqlite3".to_owned()
}

/// One step applied against the engine.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    InsertData { table: String, data: Vec<JsonValue> },
    SyncData { table: String, data: Vec<JsonValue> },
    DeleteRows { table: String, data: Vec<JsonValue> },
    SetMaxRows { table: String, max_rows: u64 },
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::InsertData { .. } => "insert_data",
            Action::SyncData { .. } => "sync_data",
            Action::DeleteRows { .. } => "delete_rows",
            Action::SetMaxRows { .. } => "set_max_rows",
        }
    }
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn open_engine(config: &EngineConfig) -> Result<SqliteEngine> {
    let kind = match config.db_type.as_str() {
        "sqlite3" => EngineKind::Sqlite3,
        _ => EngineKind::Undefined,
    };
    create_engine(kind, &config.db_name, &config.sql_statement).with_context(|| {
        format!(
            "failed to create a '{}' engine at {}",
            config.db_type,
            config.db_name.display()
        )
    })
}

fn load_action(path: &Path) -> Result<Action> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read action file {}", path.display()))?;
    // Both a single action object and a one-element list are accepted.
    let doc: JsonValue = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse action file {}", path.display()))?;
    let doc = match doc {
        JsonValue::Array(mut list) if !list.is_empty() => list.remove(0),
        JsonValue::Array(_) => bail!("action file {} is an empty list", path.display()),
        other => other,
    };
    serde_json::from_value(doc)
        .with_context(|| format!("unrecognized action in {}", path.display()))
}

fn apply(engine: &mut SqliteEngine, action: &Action) -> Result<JsonValue> {
    match action {
        Action::InsertData { table, data } => {
            engine.insert_rows(table, data)?;
            Ok(serde_json::json!({"status": "ok", "inserted": data.len()}))
        }
        Action::SyncData { table, data } => {
            let mut delta = DeltaSet::default();
            engine.run_diff_pass(table, data, &mut ResultSink::Accumulate(&mut delta))?;
            Ok(delta.to_json())
        }
        Action::DeleteRows { table, data } => {
            engine.delete_rows(table, data)?;
            Ok(serde_json::json!({"status": "ok", "deleted": data.len()}))
        }
        Action::SetMaxRows { table, max_rows } => {
            engine.set_table_max_rows(table, *max_rows)?;
            Ok(serde_json::json!({"status": "ok", "max_rows": max_rows}))
        }
    }
}

/// Apply each action file in order, writing the per-action result documents
/// into `output`.
pub fn run_actions(config: &Path, action_files: &[PathBuf], output: &Path) -> Result<()> {
    let config = load_config(config)?;
    let mut engine = open_engine(&config)?;

    fs::create_dir_all(output)
        .with_context(|| format!("failed to create output directory {}", output.display()))?;

    for (idx, file) in action_files.iter().enumerate() {
        tracing::info!("processing action file {}", file.display());
        let action = load_action(file)?;
        let result = apply(&mut engine, &action)
            .with_context(|| format!("action {} failed", file.display()))?;

        let result_path = output.join(format!("{:03}_{}.json", idx, action.name()));
        fs::write(&result_path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("failed to write {}", result_path.display()))?;
    }

    tracing::info!("result documents written to {}", output.display());
    Ok(())
}

/// Register the configured tables and run the scheduler until the duration
/// elapses or stdin closes. Payloads go to stdout; the agent's transport is
/// out of scope here.
pub fn watch(config: &Path, interval_seconds: u64, duration_seconds: Option<u64>) -> Result<()> {
    let config = load_config(config)?;
    if config.sync.is_empty() {
        bail!("config declares no sync registrations");
    }

    let engine = Arc::new(Mutex::new(open_engine(&config)?));
    for entry in &config.sync {
        if let Some(ceiling) = entry.max_rows {
            engine
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .set_table_max_rows(&entry.table, ceiling)?;
        }
    }

    let mut scheduler = SyncScheduler::new(engine);
    for entry in &config.sync {
        scheduler.register(
            &entry.sync_id,
            &entry.table,
            &entry.config,
            Box::new(|payload| println!("{}", payload)),
        )?;
    }

    scheduler.start(Duration::from_secs(interval_seconds.max(1)));
    match duration_seconds {
        Some(seconds) => std::thread::sleep(Duration::from_secs(seconds)),
        None => {
            tracing::info!("watching; close stdin or press Ctrl-D to stop");
            for line in std::io::stdin().lock().lines() {
                if line.is_err() {
                    break;
                }
            }
        }
    }
    scheduler.stop();
    Ok(())
}
