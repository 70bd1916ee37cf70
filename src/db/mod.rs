pub mod error;
pub mod models;
pub mod schema;
pub mod touch;

use crate::config::Config;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use error::{ConstraintKind, StoreError};
pub use models::{
    DailySummary, NewSmokingLog, SmokingLog, SmokingLogUpdate, SmokingType, SummaryFilter, User,
};

use models::{
    date_column, format_timestamp, optional_timestamp_column, timestamp_column,
};

const USER_COLUMNS: &str = "discord_id, username, created_at, updated_at";
const TYPE_COLUMNS: &str = "id, type_name, description, created_at";
const LOG_COLUMNS: &str =
    "id, discord_id, smoking_type_id, quantity, smoked_at, created_at, updated_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        discord_id: row.get(0)?,
        username: row.get(1)?,
        created_at: optional_timestamp_column(row, 2)?,
        updated_at: optional_timestamp_column(row, 3)?,
    })
}

fn smoking_type_from_row(row: &Row<'_>) -> rusqlite::Result<SmokingType> {
    Ok(SmokingType {
        id: row.get(0)?,
        type_name: row.get(1)?,
        description: row.get(2)?,
        created_at: optional_timestamp_column(row, 3)?,
    })
}

fn smoking_log_from_row(row: &Row<'_>) -> rusqlite::Result<SmokingLog> {
    Ok(SmokingLog {
        id: row.get(0)?,
        discord_id: row.get(1)?,
        smoking_type_id: row.get(2)?,
        quantity: row.get(3)?,
        smoked_at: timestamp_column(row, 4)?,
        created_at: optional_timestamp_column(row, 5)?,
        updated_at: optional_timestamp_column(row, 6)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<DailySummary> {
    Ok(DailySummary {
        discord_id: row.get(0)?,
        username: row.get(1)?,
        smoke_date: date_column(row, 2)?,
        type_name: row.get(3)?,
        total_quantity: row.get(4)?,
    })
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let conn = Connection::open(&config.database_url)?;
        conn.busy_timeout(Duration::from_millis(config.database_busy_timeout_ms))?;
        // Off by default in SQLite; every connection must opt in.
        conn.pragma_update(None, "foreign_keys", true)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Runs `f` on the blocking pool so async callers never hold the
    /// connection lock on a runtime thread.
    pub async fn run_blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    // --- Migrations ---

    pub fn setup(&self) -> Result<(), StoreError> {
        info!("Database: Running schema setup...");
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(&schema::setup_sql())
            .map_err(|e| StoreError::migration("setup", e))?;
        tx.commit()?;
        debug!("Database: Schema at version {}", schema::SCHEMA_VERSION);
        Ok(())
    }

    pub fn teardown(&self) -> Result<(), StoreError> {
        info!("Database: Tearing down schema...");
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (step, sql) in schema::teardown_steps() {
            debug!("Database: teardown step `{}`", step);
            if let Err(e) = tx.execute_batch(&sql) {
                warn!("Database: teardown step `{}` failed: {}", step, e);
                return Err(StoreError::migration(step, e));
            }
        }
        tx.commit()?;
        info!("Database: Schema removed");
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32, StoreError> {
        let conn = self.lock()?;
        let version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(version)
    }

    // --- Users ---

    fn select_user(conn: &Connection, discord_id: &str) -> Result<Option<User>, StoreError> {
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE discord_id = ?1"),
                [discord_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Inserts the user, or renames it when the stored username differs.
    /// An identical repeat call returns the stored row untouched.
    pub fn upsert_user(&self, discord_id: &str, username: &str) -> Result<User, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        match Self::select_user(&tx, discord_id)? {
            Some(user) if user.username == username => {
                tx.commit()?;
                return Ok(user);
            }
            Some(_) => {
                debug!("Database: Renaming user {} to {}", discord_id, username);
                tx.execute(
                    "UPDATE users SET username = ?2 WHERE discord_id = ?1",
                    params![discord_id, username],
                )?;
            }
            None => {
                debug!("Database: Creating user {} ({})", discord_id, username);
                tx.execute(
                    "INSERT INTO users (discord_id, username) VALUES (?1, ?2)",
                    params![discord_id, username],
                )?;
            }
        }

        let user = Self::select_user(&tx, discord_id)?.ok_or_else(|| StoreError::NotFound {
            entity: "user",
            key: discord_id.to_string(),
        })?;
        tx.commit()?;
        Ok(user)
    }

    pub fn create_user(&self, discord_id: &str, username: &str) -> Result<User, StoreError> {
        let conn = self.lock()?;
        let user = conn.query_row(
            &format!(
                "INSERT INTO users (discord_id, username) VALUES (?1, ?2) RETURNING {USER_COLUMNS}"
            ),
            params![discord_id, username],
            user_from_row,
        )?;
        Ok(user)
    }

    pub fn get_user(&self, discord_id: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock()?;
        Self::select_user(&conn, discord_id)
    }

    pub fn user_exists(&self, discord_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let exists = conn
            .prepare("SELECT 1 FROM users WHERE discord_id = ?1")?
            .exists([discord_id])?;
        Ok(exists)
    }

    /// Fails with a foreign-key violation while any log references the user.
    pub fn delete_user(&self, discord_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        match conn.execute("DELETE FROM users WHERE discord_id = ?1", [discord_id]) {
            Ok(count) => Ok(count),
            Err(e) => {
                let err = StoreError::from(e);
                if err.constraint_kind() == Some(ConstraintKind::ForeignKey) {
                    warn!("Database: Refusing to delete user {} with existing logs", discord_id);
                }
                Err(err)
            }
        }
    }

    // --- Smoking types ---

    pub fn list_smoking_types(&self) -> Result<Vec<SmokingType>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {TYPE_COLUMNS} FROM smoking_types ORDER BY id"))?;
        let rows = stmt.query_map([], smoking_type_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn get_smoking_type(&self, id: i32) -> Result<Option<SmokingType>, StoreError> {
        let conn = self.lock()?;
        let smoking_type = conn
            .query_row(
                &format!("SELECT {TYPE_COLUMNS} FROM smoking_types WHERE id = ?1"),
                [id],
                smoking_type_from_row,
            )
            .optional()?;
        Ok(smoking_type)
    }

    pub fn smoking_type_exists(&self, id: i32) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let exists = conn
            .prepare("SELECT 1 FROM smoking_types WHERE id = ?1")?
            .exists([id])?;
        Ok(exists)
    }

    // --- Smoking logs ---

    fn select_log(conn: &Connection, id: i64) -> Result<Option<SmokingLog>, StoreError> {
        let log = conn
            .query_row(
                &format!("SELECT {LOG_COLUMNS} FROM smoking_logs WHERE id = ?1"),
                [id],
                smoking_log_from_row,
            )
            .optional()?;
        Ok(log)
    }

    pub fn insert_smoking_log(&self, new_log: &NewSmokingLog) -> Result<SmokingLog, StoreError> {
        debug!(
            "Database: Logging {} x type {} for user {}",
            new_log.quantity, new_log.smoking_type_id, new_log.discord_id
        );
        let conn = self.lock()?;
        let smoked_at = new_log.smoked_at.as_ref().map(format_timestamp);
        let log = conn.query_row(
            &format!(
                "INSERT INTO smoking_logs (discord_id, smoking_type_id, quantity, smoked_at)
                 VALUES (?1, ?2, ?3, COALESCE(?4, {now}))
                 RETURNING {LOG_COLUMNS}",
                now = touch::NOW_EXPR
            ),
            params![
                new_log.discord_id,
                new_log.smoking_type_id,
                new_log.quantity,
                smoked_at
            ],
            smoking_log_from_row,
        )?;
        Ok(log)
    }

    pub fn log_smoking(
        &self,
        discord_id: &str,
        smoking_type_id: i32,
        quantity: i32,
    ) -> Result<SmokingLog, StoreError> {
        self.insert_smoking_log(&NewSmokingLog::new(discord_id, smoking_type_id, quantity))
    }

    pub fn get_smoking_log(&self, id: i64) -> Result<Option<SmokingLog>, StoreError> {
        let conn = self.lock()?;
        Self::select_log(&conn, id)
    }

    /// Newest first.
    pub fn list_smoking_logs(
        &self,
        discord_id: &str,
        limit: usize,
    ) -> Result<Vec<SmokingLog>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM smoking_logs
             WHERE discord_id = ?1
             ORDER BY smoked_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![discord_id, limit], smoking_log_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn update_smoking_log(
        &self,
        id: i64,
        update: &SmokingLogUpdate,
    ) -> Result<SmokingLog, StoreError> {
        let not_found = || StoreError::NotFound {
            entity: "smoking log",
            key: id.to_string(),
        };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let current = Self::select_log(&tx, id)?.ok_or_else(not_found)?;
        if update.is_empty() {
            tx.commit()?;
            return Ok(current);
        }

        let mut assignments = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(type_id) = update.smoking_type_id {
            params.push(Box::new(type_id));
            assignments.push(format!("smoking_type_id = ?{}", params.len()));
        }
        if let Some(quantity) = update.quantity {
            params.push(Box::new(quantity));
            assignments.push(format!("quantity = ?{}", params.len()));
        }
        if let Some(smoked_at) = update.smoked_at.as_ref() {
            params.push(Box::new(format_timestamp(smoked_at)));
            assignments.push(format!("smoked_at = ?{}", params.len()));
        }
        params.push(Box::new(id));
        let sql = format!(
            "UPDATE smoking_logs SET {} WHERE id = ?{}",
            assignments.join(", "),
            params.len()
        );

        let params_slice: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        tx.execute(&sql, &params_slice[..])?;

        // Re-read so the trigger's updated_at is included.
        let log = Self::select_log(&tx, id)?.ok_or_else(not_found)?;
        tx.commit()?;
        debug!("Database: Updated smoking log {}", id);
        Ok(log)
    }

    pub fn delete_smoking_log(&self, id: i64) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count = conn.execute("DELETE FROM smoking_logs WHERE id = ?1", [id])?;
        Ok(count)
    }

    // --- Daily summary ---

    pub fn daily_summary(&self, filter: &SummaryFilter) -> Result<Vec<DailySummary>, StoreError> {
        let mut sql = format!(
            "SELECT discord_id, username, smoke_date, type_name, total_quantity
             FROM {} WHERE 1 = 1",
            schema::SUMMARY_VIEW
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(discord_id) = &filter.discord_id {
            sql.push_str(" AND discord_id = ?");
            params.push(Box::new(discord_id.clone()));
        }
        if let Some(from) = filter.from_date {
            sql.push_str(" AND smoke_date >= ?");
            params.push(Box::new(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = filter.to_date {
            sql.push_str(" AND smoke_date <= ?");
            params.push(Box::new(to.format("%Y-%m-%d").to_string()));
        }
        if let Some(type_name) = &filter.type_name {
            sql.push_str(" AND type_name = ?");
            params.push(Box::new(type_name.clone()));
        }
        sql.push_str(" ORDER BY smoke_date, discord_id, type_name");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let params_slice: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(&params_slice[..], summary_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        debug!("Database: Summary returned {} rows", results.len());
        Ok(results)
    }

    pub fn daily_summary_for(
        &self,
        discord_id: &str,
        date: chrono::NaiveDate,
    ) -> Result<Vec<DailySummary>, StoreError> {
        self.daily_summary(&SummaryFilter::default().with_user(discord_id).on(date))
    }
}
