use super::touch::{self, MUTABLE_TABLES, NOW_EXPR};

/// Value of `PRAGMA user_version` after a successful setup.
pub const SCHEMA_VERSION: i32 = 1;

pub const SUMMARY_VIEW: &str = "daily_smoking_summary";

pub const INDEXES: &[&str] = &["idx_smoking_logs_discord_id", "idx_smoking_logs_smoked_at"];

/// Dependency order for dropping: logs reference both other tables.
pub const TABLES_TEARDOWN_ORDER: &[&str] = &["smoking_logs", "smoking_types", "users"];

/// (type_name, description) rows present after setup.
pub const SEED_TYPES: &[(&str, &str)] = &[("traditional", "紙タバコ"), ("iqos", "IQOS")];

fn tables_sql() -> String {
    format!(
        "
        CREATE TABLE IF NOT EXISTS users (
            discord_id VARCHAR(20) PRIMARY KEY CHECK (length(discord_id) <= 20),
            username VARCHAR(100) NOT NULL CHECK (length(username) <= 100),
            created_at TIMESTAMPTZ DEFAULT ({now}),
            updated_at TIMESTAMPTZ DEFAULT ({now})
        );

        CREATE TABLE IF NOT EXISTS smoking_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type_name VARCHAR(50) NOT NULL CHECK (length(type_name) <= 50),
            description TEXT,
            created_at TIMESTAMP DEFAULT ({now})
        );

        CREATE TABLE IF NOT EXISTS smoking_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            discord_id VARCHAR(20) NOT NULL REFERENCES users (discord_id),
            smoking_type_id INTEGER NOT NULL REFERENCES smoking_types (id),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            smoked_at TIMESTAMPTZ NOT NULL DEFAULT ({now}) CHECK (date(smoked_at) IS NOT NULL),
            created_at TIMESTAMPTZ DEFAULT ({now}),
            updated_at TIMESTAMPTZ DEFAULT ({now})
        );
        ",
        now = NOW_EXPR
    )
}

const INDEXES_SQL: &str = "
    CREATE INDEX IF NOT EXISTS idx_smoking_logs_discord_id ON smoking_logs (discord_id);
    CREATE INDEX IF NOT EXISTS idx_smoking_logs_smoked_at ON smoking_logs (smoked_at);
";

const VIEW_SQL: &str = "
    CREATE VIEW IF NOT EXISTS daily_smoking_summary AS
    SELECT
        sl.discord_id AS discord_id,
        u.username AS username,
        date(sl.smoked_at) AS smoke_date,
        st.type_name AS type_name,
        SUM(sl.quantity) AS total_quantity
    FROM smoking_logs sl
    JOIN users u ON sl.discord_id = u.discord_id
    JOIN smoking_types st ON sl.smoking_type_id = st.id
    GROUP BY
        sl.discord_id,
        u.username,
        date(sl.smoked_at),
        st.type_name;
";

fn seed_sql() -> String {
    SEED_TYPES
        .iter()
        .map(|(name, description)| {
            format!(
                "INSERT INTO smoking_types (type_name, description)
                 SELECT '{name}', '{description}'
                 WHERE NOT EXISTS (SELECT 1 FROM smoking_types WHERE type_name = '{name}');\n",
            )
        })
        .collect()
}

/// Full forward migration. Safe to run repeatedly.
pub fn setup_sql() -> String {
    let triggers: String = MUTABLE_TABLES
        .iter()
        .map(|table| touch::create_trigger_sql(table) + "\n")
        .collect();

    format!(
        "{tables}\n{indexes}\n{triggers}\n{view}\n{seed}\nPRAGMA user_version = {version};",
        tables = tables_sql(),
        indexes = INDEXES_SQL,
        triggers = triggers,
        view = VIEW_SQL,
        seed = seed_sql(),
        version = SCHEMA_VERSION,
    )
}

/// Reverse migration as named steps, dependents first.
pub fn teardown_steps() -> Vec<(String, String)> {
    let mut steps = vec![(
        format!("drop view {}", SUMMARY_VIEW),
        format!("DROP VIEW IF EXISTS {};", SUMMARY_VIEW),
    )];

    for table in MUTABLE_TABLES {
        steps.push((
            format!("drop trigger {}", touch::trigger_name(table)),
            touch::drop_trigger_sql(table),
        ));
    }
    for index in INDEXES {
        steps.push((
            format!("drop index {}", index),
            format!("DROP INDEX IF EXISTS {};", index),
        ));
    }
    for table in TABLES_TEARDOWN_ORDER {
        steps.push((
            format!("drop table {}", table),
            format!("DROP TABLE IF EXISTS {};", table),
        ));
    }
    steps.push((
        "reset schema version".to_string(),
        "PRAGMA user_version = 0;".to_string(),
    ));
    steps
}
