use anyhow::Context as _;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use smokelog::config::Config;
use smokelog::db::{Database, SummaryFilter};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Smoking log store: schema management and reporting.
#[derive(Parser, Debug)]
#[command(name = "smokelog")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables, triggers, the summary view and seed data
    Setup,
    /// Drop everything `setup` created
    Teardown,
    /// List smoking types
    Types,
    /// Show daily totals
    Summary(SummaryArgs),
}

#[derive(Parser, Debug)]
struct SummaryArgs {
    /// Only this Discord user
    #[arg(long)]
    user: Option<String>,
    /// First day (UTC, inclusive); defaults to SUMMARY_DEFAULT_DAYS ago
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day (UTC, inclusive)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Only this type name (e.g. traditional, iqos)
    #[arg(long = "type")]
    type_name: Option<String>,
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    if config.database_url != ":memory:" {
        if let Some(parent) = Path::new(&config.database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
    }
    Database::new(config).with_context(|| format!("Failed to open {}", config.database_url))
}

fn summary_filter(args: &SummaryArgs, config: &Config) -> anyhow::Result<SummaryFilter> {
    let from = match args.from {
        Some(from) => from,
        None => Duration::try_days(config.summary_default_days)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .map(|start| start.date_naive())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "summary window of {} days is out of range",
                    config.summary_default_days
                )
            })?,
    };
    let mut filter = SummaryFilter::default().with_from_date(from);
    if let Some(to) = args.to {
        filter = filter.with_to_date(to);
    }
    if let Some(user) = &args.user {
        filter = filter.with_user(user.clone());
    }
    if let Some(type_name) = &args.type_name {
        filter = filter.with_type(type_name.clone());
    }
    Ok(filter)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging, info unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let db = open_database(&config)?;

    match cli.command {
        Command::Setup => {
            db.setup()?;
            info!("Schema ready at {}", config.database_url);
        }
        Command::Teardown => {
            db.teardown()?;
            info!("Schema removed from {}", config.database_url);
        }
        Command::Types => {
            for smoking_type in db.list_smoking_types()? {
                println!(
                    "{}\t{}\t{}",
                    smoking_type.id,
                    smoking_type.type_name,
                    smoking_type.description.unwrap_or_default()
                );
            }
        }
        Command::Summary(args) => {
            let rows = db.daily_summary(&summary_filter(&args, &config)?)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No smoking logged in this range.");
            } else {
                for row in rows {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        row.smoke_date, row.discord_id, row.username, row.type_name, row.total_quantity
                    );
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_args() -> SummaryArgs {
        SummaryArgs {
            user: None,
            from: None,
            to: None,
            type_name: None,
            json: false,
        }
    }

    #[test]
    fn test_summary_filter_default_window() {
        let config = Config::in_memory();
        let filter = summary_filter(&summary_args(), &config).unwrap();
        let expected = (Utc::now() - Duration::days(7)).date_naive();
        assert!(filter.from_date == Some(expected) || filter.from_date == expected.succ_opt());
        assert_eq!(filter.to_date, None);
    }

    #[test]
    fn test_summary_filter_rejects_oversized_window() {
        let mut config = Config::in_memory();
        config.summary_default_days = 100_000_000;
        assert!(summary_filter(&summary_args(), &config).is_err());

        config.summary_default_days = i64::MAX;
        assert!(summary_filter(&summary_args(), &config).is_err());

        // An explicit --from never touches the window
        let mut args = summary_args();
        args.from = NaiveDate::from_ymd_opt(2025, 1, 1);
        let filter = summary_filter(&args, &config).unwrap();
        assert_eq!(filter.from_date, NaiveDate::from_ymd_opt(2025, 1, 1));
    }
}
