use serde_json::{json, Value as JsonValue};

use dbsync_engine::{DeltaKind, DeltaSet, Error, ResultSink, SqliteEngine, UpdateMode};

const DDL: &str =
    "CREATE TABLE processes (pid BIGINT, name TEXT, path TEXT, PRIMARY KEY (pid));";

fn engine() -> SqliteEngine {
    SqliteEngine::open_in_memory(DDL).unwrap()
}

fn diff(engine: &mut SqliteEngine, reported: &[JsonValue]) -> DeltaSet {
    let mut delta = DeltaSet::default();
    engine
        .run_diff_pass("processes", reported, &mut ResultSink::Accumulate(&mut delta))
        .unwrap();
    delta
}

#[test]
fn empty_table_and_empty_report_is_an_empty_delta() {
    let mut engine = engine();
    assert!(diff(&mut engine, &[]).is_empty());
}

#[test]
fn round_trip_of_inserted_rows_yields_empty_delta() {
    let mut engine = engine();
    let rows = [
        json!({"pid": 1, "name": "init", "path": "/sbin/init"}),
        json!({"pid": 2, "name": "cron", "path": "/usr/sbin/cron"}),
    ];
    engine.insert_rows("processes", &rows).unwrap();
    assert!(diff(&mut engine, &rows).is_empty());
}

#[test]
fn new_reported_rows_are_detected_as_inserted() {
    let mut engine = engine();
    let reported = [
        json!({"pid": 1, "name": "init", "path": "/sbin/init"}),
        json!({"pid": 2, "name": "cron", "path": "/usr/sbin/cron"}),
    ];
    let delta = diff(&mut engine, &reported);

    assert_eq!(delta.inserted.len(), 2);
    assert!(delta.modified.is_empty());
    assert!(delta.deleted.is_empty());
    assert!(delta
        .inserted
        .contains(&json!({"pid": 1, "name": "init", "path": "/sbin/init"})));

    // The delta was applied, not just reported.
    assert_eq!(engine.select_rows("processes", None).unwrap().len(), 2);
}

#[test]
fn an_empty_report_deletes_the_entire_table() {
    let mut engine = engine();
    engine
        .insert_rows(
            "processes",
            &[
                json!({"pid": 1, "name": "init", "path": "/sbin/init"}),
                json!({"pid": 2, "name": "cron", "path": "/usr/sbin/cron"}),
            ],
        )
        .unwrap();

    let delta = diff(&mut engine, &[]);

    assert!(delta.inserted.is_empty());
    assert!(delta.modified.is_empty());
    assert_eq!(delta.deleted.len(), 2);
    // Deleted rows are full rows, every column populated.
    assert!(delta
        .deleted
        .contains(&json!({"pid": 1, "name": "init", "path": "/sbin/init"})));
    assert!(engine.select_rows("processes", None).unwrap().is_empty());
}

#[test]
fn changed_rows_carry_keys_and_only_the_changed_columns() {
    let mut engine = engine();
    engine
        .insert_rows(
            "processes",
            &[json!({"pid": 1, "name": "a", "path": "/bin/a"})],
        )
        .unwrap();

    let delta = diff(&mut engine, &[json!({"pid": 1, "name": "b", "path": "/bin/a"})]);

    assert!(delta.inserted.is_empty());
    assert!(delta.deleted.is_empty());
    assert_eq!(delta.modified, vec![json!({"PK_pid": 1, "name": "b"})]);

    // The update was applied to the main table.
    let rows = engine.select_rows("processes", None).unwrap();
    assert_eq!(rows, vec![json!({"pid": 1, "name": "b", "path": "/bin/a"})]);
}

#[test]
fn legacy_literal_update_mode_applies_the_same_delta() {
    let mut engine = engine();
    engine.set_update_mode(UpdateMode::LegacyLiteral);
    engine
        .insert_rows(
            "processes",
            &[json!({"pid": 1, "name": "a", "path": "/bin/a"})],
        )
        .unwrap();

    let delta = diff(&mut engine, &[json!({"pid": 1, "name": "b", "path": "/bin/a"})]);

    assert_eq!(delta.modified, vec![json!({"PK_pid": 1, "name": "b"})]);
    let rows = engine.select_rows("processes", None).unwrap();
    assert_eq!(rows, vec![json!({"pid": 1, "name": "b", "path": "/bin/a"})]);
}

#[test]
fn a_second_identical_pass_is_idempotent() {
    let mut engine = engine();
    let reported = [
        json!({"pid": 1, "name": "init", "path": "/sbin/init"}),
        json!({"pid": 2, "name": "cron", "path": "/usr/sbin/cron"}),
    ];
    assert!(!diff(&mut engine, &reported).is_empty());
    assert!(diff(&mut engine, &reported).is_empty());
}

#[test]
fn one_pass_can_mix_all_three_kinds() {
    let mut engine = engine();
    engine
        .insert_rows(
            "processes",
            &[
                json!({"pid": 1, "name": "init", "path": "/sbin/init"}),
                json!({"pid": 2, "name": "cron", "path": "/usr/sbin/cron"}),
            ],
        )
        .unwrap();

    let delta = diff(
        &mut engine,
        &[
            json!({"pid": 1, "name": "systemd", "path": "/sbin/init"}),
            json!({"pid": 3, "name": "sshd", "path": "/usr/sbin/sshd"}),
        ],
    );

    assert_eq!(delta.modified, vec![json!({"PK_pid": 1, "name": "systemd"})]);
    assert_eq!(
        delta.inserted,
        vec![json!({"pid": 3, "name": "sshd", "path": "/usr/sbin/sshd"})]
    );
    assert_eq!(
        delta.deleted,
        vec![json!({"pid": 2, "name": "cron", "path": "/usr/sbin/cron"})]
    );
}

#[test]
fn callback_mode_streams_each_row_with_its_kind() {
    let mut engine = engine();
    engine
        .insert_rows(
            "processes",
            &[json!({"pid": 2, "name": "cron", "path": "/usr/sbin/cron"})],
        )
        .unwrap();

    let mut seen = Vec::new();
    let mut callback = |kind: DeltaKind, row: &JsonValue| {
        seen.push((kind, row.clone()));
    };
    engine
        .run_diff_pass(
            "processes",
            &[json!({"pid": 3, "name": "sshd", "path": "/usr/sbin/sshd"})],
            &mut ResultSink::Callback(&mut callback),
        )
        .unwrap();

    assert_eq!(
        seen,
        vec![
            (
                DeltaKind::Deleted,
                json!({"pid": 2, "name": "cron", "path": "/usr/sbin/cron"})
            ),
            (
                DeltaKind::Inserted,
                json!({"pid": 3, "name": "sshd", "path": "/usr/sbin/sshd"})
            ),
        ]
    );
}

#[test]
fn composite_keys_join_on_every_key_column() {
    const COMPOSITE_DDL: &str = "CREATE TABLE ports (inode BIGINT, port INTEGER, proto TEXT, \
                                 PRIMARY KEY (inode, port));";
    let mut engine = SqliteEngine::open_in_memory(COMPOSITE_DDL).unwrap();
    engine
        .insert_rows(
            "ports",
            &[
                json!({"inode": 10, "port": 22, "proto": "tcp"}),
                json!({"inode": 10, "port": 53, "proto": "udp"}),
            ],
        )
        .unwrap();

    let mut delta = DeltaSet::default();
    engine
        .run_diff_pass(
            "ports",
            &[
                json!({"inode": 10, "port": 22, "proto": "tcp6"}),
                json!({"inode": 10, "port": 53, "proto": "udp"}),
            ],
            &mut ResultSink::Accumulate(&mut delta),
        )
        .unwrap();

    assert!(delta.inserted.is_empty());
    assert!(delta.deleted.is_empty());
    assert_eq!(
        delta.modified,
        vec![json!({"PK_inode": 10, "PK_port": 22, "proto": "tcp6"})]
    );
}

#[test]
fn tables_without_a_primary_key_are_rejected() {
    let mut engine = SqliteEngine::open_in_memory("CREATE TABLE logs (line TEXT);").unwrap();
    let mut delta = DeltaSet::default();
    let err = engine
        .run_diff_pass("logs", &[], &mut ResultSink::Accumulate(&mut delta))
        .unwrap_err();
    assert!(matches!(err, Error::NoPrimaryKey(_)));
}

#[test]
fn no_shadow_table_remains_after_a_pass() {
    let mut engine = engine();
    diff(&mut engine, &[json!({"pid": 1, "name": "init", "path": "/sbin/init"})]);
    assert!(matches!(
        engine.select_rows("processes_shadow", None),
        Err(Error::UnknownTable(_))
    ));
}

#[test]
fn a_pass_that_cannot_stage_a_shadow_fails_clean() {
    // The quoted name keeps the stored creation statement from being reused
    // for the shadow DDL, so the pass fails before any mutation.
    let mut engine = SqliteEngine::open_in_memory(
        "CREATE TABLE \"processes\" (pid BIGINT, name TEXT, path TEXT, PRIMARY KEY (pid));",
    )
    .unwrap();
    engine
        .insert_rows("processes", &[json!({"pid": 1, "name": "init", "path": "/sbin/init"})])
        .unwrap();

    let mut delta = DeltaSet::default();
    let err = engine
        .run_diff_pass(
            "processes",
            &[json!({"pid": 2, "name": "cron", "path": "/usr/sbin/cron"})],
            &mut ResultSink::Accumulate(&mut delta),
        )
        .unwrap_err();

    assert!(matches!(err, Error::SchemaUnavailable { .. }));
    assert!(delta.is_empty());
    // No shadow survives the failed pass and the table is untouched.
    assert!(matches!(
        engine.select_rows("processes_shadow", None),
        Err(Error::UnknownTable(_))
    ));
    assert_eq!(engine.select_rows("processes", None).unwrap().len(), 1);
}

#[test]
fn ceiling_blocks_the_insert_phase_but_not_the_pass() {
    let mut engine = engine();
    engine.set_table_max_rows("processes", 1).unwrap();

    let mut delta = DeltaSet::default();
    engine
        .run_diff_pass(
            "processes",
            &[
                json!({"pid": 1, "name": "a", "path": "/bin/a"}),
                json!({"pid": 2, "name": "b", "path": "/bin/b"}),
            ],
            &mut ResultSink::Accumulate(&mut delta),
        )
        .unwrap();

    // The batch exceeded the ceiling: rejected as a whole, nothing notified.
    assert!(delta.is_empty());
    assert!(engine.select_rows("processes", None).unwrap().is_empty());

    // A report that fits the ceiling goes through on the next pass.
    let delta = diff(&mut engine, &[json!({"pid": 1, "name": "a", "path": "/bin/a"})]);
    assert_eq!(delta.inserted.len(), 1);
}

#[test]
fn direct_insert_past_the_ceiling_is_reported_not_dropped() {
    let mut engine = engine();
    engine.set_table_max_rows("processes", 2).unwrap();
    engine
        .insert_rows(
            "processes",
            &[
                json!({"pid": 1, "name": "a", "path": "/bin/a"}),
                json!({"pid": 2, "name": "b", "path": "/bin/b"}),
            ],
        )
        .unwrap();
    let err = engine
        .insert_rows("processes", &[json!({"pid": 3, "name": "c", "path": "/bin/c"})])
        .unwrap_err();
    assert!(matches!(err, Error::MaxRowsExceeded { .. }));
}
