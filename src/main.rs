use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDate};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod analytics;
mod db;
mod models;
mod report;
mod sessions;

use models::ClassFilter;
use report::ReportFormat;

#[derive(Parser)]
#[command(name = "attendance-analytics")]
#[command(about = "QR attendance sessions and attendance analytics", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import attendance marks from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List known classes
    Classes,
    /// Print overview counters, per-class stats and the 7-day trend
    Stats {
        /// "all" or a class id
        #[arg(long, default_value = "all")]
        class: ClassFilter,
        /// Treat this date as today (defaults to the local date)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// List the most recent attendance marks
    Recent {
        #[arg(long, default_value = "all")]
        class: ClassFilter,
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(1..))]
        limit: u16,
    },
    /// Write an analytics report
    Report {
        #[arg(long, default_value = "all")]
        class: ClassFilter,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,
        #[arg(long, default_value = "attendance-report.md")]
        out: PathBuf,
    },
    /// Open an attendance session and print its QR payload
    OpenSession {
        #[arg(long)]
        class: Uuid,
        #[arg(
            long,
            default_value_t = 10,
            value_parser = clap::value_parser!(i64).range(1..=sessions::MAX_TTL_MINUTES)
        )]
        ttl_minutes: i64,
    },
    /// Mark a student present from a scanned QR payload
    Mark {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        student: Uuid,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_as_of(as_of: Option<NaiveDate>) -> anyhow::Result<DateTime<Local>> {
    match as_of {
        None => Ok(Local::now()),
        Some(date) => analytics::as_of_date(date, &Local)
            .with_context(|| format!("cannot resolve {date} in the local time zone")),
    }
}

async fn load_snapshot(
    pool: &sqlx::PgPool,
    class: ClassFilter,
    as_of: Option<NaiveDate>,
) -> anyhow::Result<models::AnalyticsSnapshot> {
    let as_of = resolve_as_of(as_of)?;
    let classes = db::fetch_classes(pool).await?;
    let records = db::fetch_attendance(pool).await?;

    if let ClassFilter::Class(id) = class {
        if !classes.iter().any(|c| c.id == id) {
            warn!(%id, "class filter does not match a known class");
        }
    }

    debug!(records = records.len(), classes = classes.len(), %class, "aggregating");
    Ok(analytics::aggregate(&records, &classes, class, as_of))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} new marks).");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} attendance marks from {}.", csv.display());
        }
        Commands::Classes => {
            let classes = db::fetch_classes(&pool).await?;
            if classes.is_empty() {
                println!("No classes found.");
                return Ok(());
            }
            for class in classes {
                println!("{}  {}", class.id, class.name);
            }
        }
        Commands::Stats { class, as_of } => {
            let snapshot = load_snapshot(&pool, class, as_of).await?;
            let overall = &snapshot.overall;

            println!("{} (as of {})", snapshot.filter_label, snapshot.as_of);
            println!(
                "Students {} | Sessions {} | Attendance {} | Avg rate {:.1}%",
                overall.total_students,
                overall.total_sessions,
                overall.total_attendance,
                overall.avg_attendance_rate
            );

            if snapshot.per_class.is_empty() {
                println!("No attendance recorded yet.");
            } else {
                println!("By class:");
                for stats in snapshot.per_class.iter() {
                    println!(
                        "- {}: {} marks, {} sessions, {:.2} per session",
                        stats.class_name,
                        stats.total_attendance,
                        stats.total_sessions,
                        stats.attendance_rate
                    );
                }
            }

            println!("Last 7 days:");
            for point in snapshot.trend.iter() {
                println!("- {:>6}: {}", point.label, point.count);
            }
        }
        Commands::Recent { class, limit } => {
            let records = db::fetch_attendance(&pool).await?;
            let recent: Vec<_> = records
                .iter()
                .filter(|record| class.matches(record.class_id))
                .take(usize::from(limit))
                .collect();

            if recent.is_empty() {
                println!("No attendance marks match this filter.");
                return Ok(());
            }

            for record in recent {
                println!(
                    "- {} ({}) in {} at {} [{}]",
                    record.student_name,
                    record.roll_number,
                    record.class_name,
                    record.marked_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    record.id
                );
            }
        }
        Commands::Report {
            class,
            as_of,
            format,
            out,
        } => {
            let snapshot = load_snapshot(&pool, class, as_of).await?;
            let rendered = report::render(&snapshot, format)?;
            std::fs::write(&out, rendered)
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(path = %out.display(), "report written");
            println!("Report written to {}.", out.display());
        }
        Commands::OpenSession { class, ttl_minutes } => {
            let session = db::create_session(&pool, class, ttl_minutes).await?;
            println!("Session {} open until {}.", session.id, session.expires_at);
            println!("{}", sessions::scan_payload(&session));
        }
        Commands::Mark { payload, student } => {
            let payload = sessions::parse_scan_payload(&payload)?;
            let marked_at = db::record_mark(&pool, &payload, student).await?;
            println!("Marked {student} present at {marked_at}.");
        }
    }

    Ok(())
}
