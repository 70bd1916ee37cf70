use crate::db::{
    DailySummary, Database, NewSmokingLog, SmokingLog, SmokingLogUpdate, SmokingType,
    StoreError, SummaryFilter,
};
use chrono::{DateTime, Utc};
use tracing::info;

/// Result of recording one smoking event.
#[derive(Debug)]
pub struct Recorded {
    pub log: SmokingLog,
    /// The user's totals for the calendar date of the event.
    pub daily_summary: Vec<DailySummary>,
}

pub struct SmokingTracker {
    db: Database,
}

impl SmokingTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers (or renames) the user, logs the event, and returns the
    /// user's summary for that day.
    pub async fn record(
        &self,
        discord_id: u64,
        username: &str,
        smoking_type_id: i32,
        quantity: i32,
        smoked_at: Option<DateTime<Utc>>,
    ) -> Result<Recorded, StoreError> {
        let discord_id = discord_id.to_string();
        let username = username.to_string();
        let recorded = self
            .db
            .run_blocking(move |db| {
                let user = db.upsert_user(&discord_id, &username)?;
                let mut new_log = NewSmokingLog::new(user.discord_id, smoking_type_id, quantity);
                new_log.smoked_at = smoked_at;
                let log = db.insert_smoking_log(&new_log)?;
                let daily_summary =
                    db.daily_summary_for(&log.discord_id, log.smoked_at.date_naive())?;
                Ok(Recorded { log, daily_summary })
            })
            .await?;

        info!(
            "Recorded {} x type {} for user {}",
            recorded.log.quantity, recorded.log.smoking_type_id, recorded.log.discord_id
        );
        Ok(recorded)
    }

    pub async fn correct(
        &self,
        log_id: i64,
        update: SmokingLogUpdate,
    ) -> Result<SmokingLog, StoreError> {
        self.db
            .run_blocking(move |db| db.update_smoking_log(log_id, &update))
            .await
    }

    pub async fn smoking_types(&self) -> Result<Vec<SmokingType>, StoreError> {
        self.db.run_blocking(|db| db.list_smoking_types()).await
    }

    pub async fn summary(&self, filter: SummaryFilter) -> Result<Vec<DailySummary>, StoreError> {
        self.db
            .run_blocking(move |db| db.daily_summary(&filter))
            .await
    }
}

/// One `<type>: <n>` line per summary row.
pub fn format_daily_summary(daily_summary: &[DailySummary]) -> String {
    daily_summary
        .iter()
        .map(|summary| format!("{}: {}", summary.type_name, summary.total_quantity))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::{NaiveDate, TimeZone};

    fn tracker() -> (SmokingTracker, Database) {
        let db = Database::new(&Config::in_memory()).unwrap();
        db.setup().unwrap();
        (SmokingTracker::new(db.clone()), db)
    }

    #[tokio::test]
    async fn test_record_accumulates_daily_totals() {
        let (tracker, db) = tracker();
        let types = tracker.smoking_types().await.unwrap();
        let traditional = types.iter().find(|t| t.type_name == "traditional").unwrap().id;
        let iqos = types.iter().find(|t| t.type_name == "iqos").unwrap().id;
        let morning = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();

        let first = tracker
            .record(42, "alice", traditional, 3, Some(morning))
            .await
            .unwrap();
        assert_eq!(first.daily_summary.len(), 1);
        assert_eq!(first.daily_summary[0].total_quantity, 3);

        tracker
            .record(42, "alice", traditional, 2, Some(morning))
            .await
            .unwrap();
        let third = tracker
            .record(42, "alice_renamed", iqos, 1, Some(morning))
            .await
            .unwrap();

        assert_eq!(format_daily_summary(&third.daily_summary), "iqos: 1\ntraditional: 5");
        assert!(third.daily_summary.iter().all(|s| s.username == "alice_renamed"));
        assert_eq!(db.get_user("42").unwrap().unwrap().username, "alice_renamed");
    }

    #[tokio::test]
    async fn test_record_rejects_invalid_events() {
        let (tracker, db) = tracker();

        let err = tracker.record(42, "alice", 999, 1, None).await.unwrap_err();
        assert_eq!(err.constraint_kind(), Some(crate::db::ConstraintKind::ForeignKey));

        let err = tracker.record(42, "alice", 1, 0, None).await.unwrap_err();
        assert_eq!(err.constraint_kind(), Some(crate::db::ConstraintKind::Check));

        // The upsert is not rolled back by a failed log; the user still exists
        assert!(db.user_exists("42").unwrap());
        assert!(db.list_smoking_logs("42", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_correct_and_summary() {
        let (tracker, _db) = tracker();
        let day = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 3, 20, 0, 0).unwrap();
        let recorded = tracker.record(1, "bob", 1, 4, Some(at)).await.unwrap();

        let update = SmokingLogUpdate {
            quantity: Some(2),
            ..Default::default()
        };
        let corrected = tracker.correct(recorded.log.id, update).await.unwrap();
        assert_eq!(corrected.quantity, 2);

        let rows = tracker
            .summary(SummaryFilter::default().with_user("1").on(day))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_quantity, 2);

        let err = tracker
            .correct(9999, SmokingLogUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_format_empty_summary() {
        assert_eq!(format_daily_summary(&[]), "");
    }
}
