//! SQL text builders for the diff and mutation paths. Table and column
//! names come from the schema cache, never from row payloads.

use crate::schema::Column;
use crate::value::{Row, Value};

/// Prefix carried by primary-key fields inside a modified-set row so they are
/// not treated as changed payload.
pub const PK_FIELD_PREFIX: &str = "PK_";

/// Prefix of the derived difference columns in the modified-rows query.
pub const DIF_FIELD_PREFIX: &str = "DIF_";

/// `INSERT INTO <table> VALUES (?, ?, ...)` with one placeholder per column.
pub fn insert_sql(table: &str, column_count: usize) -> String {
    let placeholders = vec!["?"; column_count].join(",");
    format!("INSERT INTO {} VALUES ({});", table, placeholders)
}

/// `DELETE FROM <table> WHERE pk1=? AND pk2=? ...`
pub fn delete_sql(table: &str, primary_keys: &[String]) -> String {
    let filter = primary_keys
        .iter()
        .map(|key| format!("{}=?", key))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("DELETE FROM {} WHERE {};", table, filter)
}

/// Anti-join: rows of `t1` whose key tuple has no match in `t2`. With
/// `keys_only` set the projection is restricted to the primary-key columns.
pub fn left_only_sql(t1: &str, t2: &str, primary_keys: &[String], keys_only: bool) -> String {
    let fields = if keys_only {
        primary_keys
            .iter()
            .map(|key| format!("t1.{}", key))
            .collect::<Vec<_>>()
            .join(",")
    } else {
        "t1.*".to_owned()
    };
    let on_match = primary_keys
        .iter()
        .map(|key| format!("t1.{} = t2.{}", key, key))
        .collect::<Vec<_>>()
        .join(" AND ");
    let null_filter = primary_keys
        .iter()
        .map(|key| format!("t2.{} IS NULL", key))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "SELECT {} FROM {} t1 LEFT JOIN {} t2 ON {} WHERE {};",
        fields, t1, t2, on_match, null_filter
    )
}

/// Modified-set query: the union of main table and shadow, tagged with its
/// origin, inner-joined back onto the main table on key equality and filtered
/// to the shadow's rows. Every column yields a derived `DIF_` field holding
/// the shadow's value when it differs from the main table's, NULL otherwise;
/// primary keys are projected first.
pub fn modified_rows_sql(table: &str, shadow: &str, primary_keys: &[String], columns: &[Column]) -> String {
    let mut fields: Vec<String> = primary_keys
        .iter()
        .map(|key| format!("t1.{}", key))
        .collect();
    for column in columns {
        fields.push(format!(
            "CASE WHEN t1.{name}<>t2.{name} THEN t1.{name} ELSE NULL END AS {prefix}{name}",
            name = column.name,
            prefix = DIF_FIELD_PREFIX,
        ));
    }
    let on_match = primary_keys
        .iter()
        .map(|key| format!("t1.{} = t2.{}", key, key))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "SELECT {fields} FROM (SELECT *,'{table}' AS val FROM {table} UNION ALL \
         SELECT *,'{shadow}' AS val FROM {shadow}) t1 INNER JOIN {table} t2 ON {on_match} \
         WHERE t1.val = '{shadow}';",
        fields = fields.join(","),
    )
}

/// `SELECT * FROM <table> WHERE pk1=? ...` to re-expand an anti-join key into
/// a full row.
pub fn select_by_key_sql(table: &str, primary_keys: &[String]) -> String {
    let filter = primary_keys
        .iter()
        .map(|key| format!("{}=?", key))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("SELECT * FROM {} WHERE {};", table, filter)
}

/// Parameterized single-column update, the default path.
pub fn update_sql(table: &str, column: &str, primary_keys: &[String]) -> String {
    let filter = primary_keys
        .iter()
        .map(|key| format!("{}=?", key))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!("UPDATE {} SET {}=? WHERE {};", table, column, filter)
}

/// Literal-building single-column update kept for compatibility with the
/// observed engine. Values are rendered inline; text ends up single-quoted
/// without escaping (see `Value::to_sql_literal`). Returns `None` when the
/// row is missing a primary-key field.
pub fn update_sql_literal(
    table: &str,
    column: &str,
    value: &Value,
    primary_keys: &[String],
    row: &Row,
) -> Option<String> {
    let mut filters = Vec::with_capacity(primary_keys.len());
    for key in primary_keys {
        let key_value = row.get(&format!("{}{}", PK_FIELD_PREFIX, key))?;
        filters.push(format!("{}={}", key, key_value.to_sql_literal()));
    }
    Some(format!(
        "UPDATE {} SET {}={} WHERE {};",
        table,
        column,
        value.to_sql_literal(),
        filters.join(" AND ")
    ))
}
