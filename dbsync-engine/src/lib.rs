//! Change-detection and synchronization engine over an embedded SQLite
//! store. Maintains a relational snapshot of observed host state, computes
//! the inserted/modified/deleted delta against freshly reported rows, applies
//! it transactionally, and periodically publishes serialized table state
//! through registered sync sinks.

pub mod delta;
pub mod engine;
pub mod error;
pub mod query;
pub mod schema;
pub mod scheduler;
pub mod value;

pub use delta::{DeltaKind, DeltaSet, ResultSink};
pub use engine::{create_engine, EngineKind, SqliteEngine, UpdateMode, SHADOW_TABLE_SUFFIX};
pub use error::{Error, Result};
pub use scheduler::{SchedulerState, SyncConfig, SyncScheduler};
pub use value::{ColumnType, Row, Value};
