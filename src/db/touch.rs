//! Shared `updated_at` maintenance.
//!
//! Every table carrying `created_at`/`updated_at` is registered once in
//! [`MUTABLE_TABLES`]. Setup renders one trigger per entry from the same
//! body, and teardown drops the same set, so a table cannot get one without
//! the other.

/// Tables whose rows are mutable and carry `created_at`/`updated_at`.
pub const MUTABLE_TABLES: &[&str] = &["users", "smoking_logs"];

/// Current UTC time in the store's text layout (`YYYY-MM-DD HH:MM:SS.sss`).
pub const NOW_EXPR: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

/// New `updated_at` for a row: now, or one millisecond past the old value
/// when the clock has not moved beyond it.
pub fn touch_expr() -> String {
    format!(
        "CASE WHEN OLD.updated_at IS NULL OR {now} > OLD.updated_at \
         THEN {now} \
         ELSE strftime('%Y-%m-%d %H:%M:%f', OLD.updated_at, '+0.001 seconds') END",
        now = NOW_EXPR
    )
}

pub fn trigger_name(table: &str) -> String {
    format!("update_{}_updated_at", table)
}

/// Trigger applying the shared touch to `table`. It also pins `created_at`
/// to its inserted value.
pub fn create_trigger_sql(table: &str) -> String {
    format!(
        "CREATE TRIGGER IF NOT EXISTS {name}
         AFTER UPDATE ON {table}
         FOR EACH ROW
         BEGIN
             UPDATE {table}
             SET updated_at = {touch},
                 created_at = OLD.created_at
             WHERE rowid = NEW.rowid;
         END;",
        name = trigger_name(table),
        table = table,
        touch = touch_expr(),
    )
}

pub fn drop_trigger_sql(table: &str) -> String {
    format!("DROP TRIGGER IF EXISTS {};", trigger_name(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_one_trigger_per_mutable_table() {
        for table in MUTABLE_TABLES {
            let sql = create_trigger_sql(table);
            assert!(sql.contains(&format!("update_{}_updated_at", table)));
            assert!(sql.contains(&format!("AFTER UPDATE ON {}", table)));
            assert!(drop_trigger_sql(table).contains(&trigger_name(table)));
        }
    }

    #[test]
    fn test_touch_applies_to_any_registered_shape() {
        // A table unrelated to the app schema gets the same behavior.
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "CREATE TABLE widgets (
                 name TEXT PRIMARY KEY,
                 created_at TEXT DEFAULT ({now}),
                 updated_at TEXT DEFAULT ({now})
             );
             {trigger}",
            now = NOW_EXPR,
            trigger = create_trigger_sql("widgets"),
        ))
        .unwrap();

        conn.execute(
            "INSERT INTO widgets (name, created_at, updated_at)
             VALUES ('a', '2000-01-01 00:00:00.000', '2999-01-01 00:00:00.000')",
            [],
        )
        .unwrap();
        conn.execute(
            "UPDATE widgets SET created_at = '1999-01-01 00:00:00.000' WHERE name = 'a'",
            [],
        )
        .unwrap();

        let (created, updated): (String, String) = conn
            .query_row(
                "SELECT created_at, updated_at FROM widgets WHERE name = 'a'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        // created_at restored; future updated_at still moves forward by 1ms
        assert_eq!(created, "2000-01-01 00:00:00.000");
        assert_eq!(updated, "2999-01-01 00:00:00.001");
    }
}
