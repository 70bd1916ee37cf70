use rusqlite::ffi;
use rusqlite::ErrorCode;
use std::fmt;
use thiserror::Error;

/// Which integrity rule rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    ForeignKey,
    Check,
    NotNull,
    PrimaryKey,
    Unique,
    Other,
}

impl ConstraintKind {
    fn from_extended_code(code: i32) -> Self {
        match code {
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
            ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
            ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::PrimaryKey,
            ffi::SQLITE_CONSTRAINT_UNIQUE => ConstraintKind::Unique,
            _ => ConstraintKind::Other,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::Check => "check",
            ConstraintKind::NotNull => "not-null",
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::Other => "integrity",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the store. Nothing here is retried internally.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} constraint violated: {message}")]
    Constraint {
        kind: ConstraintKind,
        message: String,
    },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("migration step `{step}` failed: {source}")]
    Migration {
        step: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("blocking database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            StoreError::Constraint { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub(crate) fn migration(step: impl Into<String>, source: rusqlite::Error) -> Self {
        StoreError::Migration {
            step: step.into(),
            source,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(e, message)
                if e.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint {
                    kind: ConstraintKind::from_extended_code(e.extended_code),
                    message: message.unwrap_or_else(|| e.to_string()),
                }
            }
            other => StoreError::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(extended_code: i32, message: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            ffi::Error::new(extended_code),
            Some(message.to_string()),
        )
    }

    #[test]
    fn test_constraint_classification() {
        let err: StoreError = sqlite_failure(
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
            "FOREIGN KEY constraint failed",
        )
        .into();
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::ForeignKey));
        assert_eq!(
            err.to_string(),
            "foreign key constraint violated: FOREIGN KEY constraint failed"
        );

        let err: StoreError =
            sqlite_failure(ffi::SQLITE_CONSTRAINT_CHECK, "CHECK constraint failed").into();
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::Check));

        let err: StoreError =
            sqlite_failure(ffi::SQLITE_CONSTRAINT_NOTNULL, "NOT NULL constraint failed").into();
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::NotNull));

        let err: StoreError =
            sqlite_failure(ffi::SQLITE_CONSTRAINT_PRIMARYKEY, "UNIQUE constraint failed").into();
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::PrimaryKey));
    }

    #[test]
    fn test_non_constraint_errors_pass_through() {
        let err: StoreError = sqlite_failure(ffi::SQLITE_BUSY, "database is locked").into();
        assert!(matches!(err, StoreError::Database(_)));
        assert_eq!(err.constraint_kind(), None);

        let err: StoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
