use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;

/// Text layout of every stored timestamp (UTC, millisecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub discord_id: String,
    pub username: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokingType {
    pub id: i32,
    pub type_name: String,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokingLog {
    pub id: i64,
    pub discord_id: String,
    pub smoking_type_id: i32,
    pub quantity: i32,
    pub smoked_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Row of the `daily_smoking_summary` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySummary {
    pub discord_id: String,
    pub username: String,
    pub smoke_date: NaiveDate,
    pub type_name: String,
    pub total_quantity: i64,
}

#[derive(Debug, Clone)]
pub struct NewSmokingLog {
    pub discord_id: String,
    pub smoking_type_id: i32,
    pub quantity: i32,
    /// Defaults to the time of the write.
    pub smoked_at: Option<DateTime<Utc>>,
}

impl NewSmokingLog {
    pub fn new(discord_id: impl Into<String>, smoking_type_id: i32, quantity: i32) -> Self {
        Self {
            discord_id: discord_id.into(),
            smoking_type_id,
            quantity,
            smoked_at: None,
        }
    }

    pub fn at(mut self, smoked_at: DateTime<Utc>) -> Self {
        self.smoked_at = Some(smoked_at);
        self
    }
}

/// Fields to change on an existing log. `None` leaves a column as is.
#[derive(Debug, Clone, Default)]
pub struct SmokingLogUpdate {
    pub smoking_type_id: Option<i32>,
    pub quantity: Option<i32>,
    pub smoked_at: Option<DateTime<Utc>>,
}

impl SmokingLogUpdate {
    pub fn is_empty(&self) -> bool {
        self.smoking_type_id.is_none() && self.quantity.is_none() && self.smoked_at.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    pub discord_id: Option<String>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub type_name: Option<String>,
}

impl SummaryFilter {
    pub fn with_user(mut self, discord_id: impl Into<String>) -> Self {
        self.discord_id = Some(discord_id.into());
        self
    }

    pub fn with_from_date(mut self, from: NaiveDate) -> Self {
        self.from_date = Some(from);
        self
    }

    pub fn with_to_date(mut self, to: NaiveDate) -> Self {
        self.to_date = Some(to);
        self
    }

    pub fn on(self, date: NaiveDate) -> Self {
        self.with_from_date(date).with_to_date(date)
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

fn conversion_error(idx: usize, raw: &str, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("invalid {what}: {raw}").into())
}

pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| conversion_error(idx, &raw, "timestamp"))
}

pub(crate) fn optional_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, &raw, "timestamp")),
        None => Ok(None),
    }
}

pub(crate) fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| conversion_error(idx, &raw, "date"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_layout_matches_sqlite() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 5).unwrap();
        assert_eq!(format_timestamp(&ts), "2025-01-01 09:30:05.000");
        assert_eq!(parse_timestamp("2025-01-01 09:30:05.000"), Some(ts));
        // Second precision, as written by CURRENT_TIMESTAMP
        assert_eq!(parse_timestamp("2025-01-01 09:30:05"), Some(ts));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_summary_filter_builder() {
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let filter = SummaryFilter::default().with_user("42").on(day).with_type("iqos");
        assert_eq!(filter.discord_id.as_deref(), Some("42"));
        assert_eq!(filter.from_date, Some(day));
        assert_eq!(filter.to_date, Some(day));
        assert_eq!(filter.type_name.as_deref(), Some("iqos"));
    }
}
