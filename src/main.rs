use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

mod calendar;
mod db;
mod error;
mod graduation;
mod loader;
mod models;
mod progress;
mod report;
mod risk;
mod snapshot;

use calendar::PeriodCalendar;
use graduation::GraduationPolicy;
use models::{FeatureRow, GradeRecord, RunSummary};
use risk::{RiskBand, RiskThresholds};

#[derive(Parser)]
#[command(name = "academic-timeline")]
#[command(about = "On-time graduation labels and semester snapshots from grade exports", long_about = None)]
struct Cli {
    /// Log filter directive (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "TIMELINE_LOG", default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Export directory (Periodo_*/Carrera_*/...) or flat transcript CSV
    #[arg(long)]
    transcripts: Option<PathBuf>,
    /// Read grade records previously imported into Postgres
    #[arg(long)]
    from_db: bool,
}

#[derive(Args)]
struct CalendarArgs {
    /// CSV of `period_id,name` rows in chronological order
    #[arg(long)]
    calendar: Option<PathBuf>,
}

#[derive(Args)]
struct PolicyArgs {
    #[arg(long, default_value_t = 10)]
    program_semesters: u32,
    /// Regular periods an on-time student needs
    #[arg(long, default_value_t = 10)]
    ideal_duration: usize,
    /// Extra regular periods still counted as on time
    #[arg(long, default_value_t = 4)]
    tolerance: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import grade exports into Postgres
    Import {
        #[arg(long)]
        transcripts: PathBuf,
    },
    /// Write the list of students who graduated on time
    Graduates {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        calendar: CalendarArgs,
        #[command(flatten)]
        policy: PolicyArgs,
        #[arg(long, default_value = "graduados.txt")]
        out: PathBuf,
    },
    /// Build the per-semester snapshot table from a graduates list
    Snapshots {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        calendar: CalendarArgs,
        #[arg(long, default_value = "graduados.txt")]
        graduates: PathBuf,
        #[arg(long, default_value = "snapshots.csv")]
        out: PathBuf,
    },
    /// Classify graduates, build snapshots and write a report in one pass
    Run {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        calendar: CalendarArgs,
        #[command(flatten)]
        policy: PolicyArgs,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Also store the run's artifacts in Postgres
        #[arg(long)]
        persist: bool,
    },
    /// Map a predicted graduation probability to a risk band
    Band {
        #[arg(long)]
        probability: f64,
        #[arg(long, default_value_t = 0.70)]
        favorable: f64,
        #[arg(long, default_value_t = 0.40)]
        borderline: f64,
        /// JSON feature row the probability was predicted for
        #[arg(long)]
        features: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct BandResult {
    probability: f64,
    band: RiskBand,
    color: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    features: Option<FeatureRow>,
}

fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

impl CalendarArgs {
    fn load(&self) -> anyhow::Result<PeriodCalendar> {
        let calendar = match &self.calendar {
            Some(path) => PeriodCalendar::from_csv(path)
                .with_context(|| format!("failed to load calendar {}", path.display()))?,
            None => PeriodCalendar::default_calendar()?,
        };
        let periods = calendar.periods();
        tracing::debug!(
            "Period calendar has {} periods ({} regular) from {} to {}",
            calendar.len(),
            periods.iter().filter(|period| period.is_regular).count(),
            periods.first().map(|period| period.name.as_str()).unwrap_or("-"),
            periods.last().map(|period| period.name.as_str()).unwrap_or("-")
        );
        Ok(calendar)
    }
}

impl PolicyArgs {
    fn policy(&self) -> GraduationPolicy {
        GraduationPolicy {
            program_semesters: self.program_semesters,
            ideal_duration: self.ideal_duration,
            tolerance: self.tolerance,
        }
    }
}

impl SourceArgs {
    async fn load(&self) -> anyhow::Result<(Vec<GradeRecord>, String)> {
        match (&self.transcripts, self.from_db) {
            (Some(path), _) => {
                let records = loader::load_transcripts(path)
                    .with_context(|| format!("failed to load transcripts from {}", path.display()))?;
                Ok((records, path.display().to_string()))
            }
            (None, true) => {
                let pool = connect().await?;
                let records = db::fetch_grade_records(&pool).await?;
                tracing::info!("Fetched {} grade records from Postgres", records.len());
                Ok((records, "postgres".to_string()))
            }
            (None, false) => anyhow::bail!("pass --transcripts <PATH> or --from-db"),
        }
    }
}

fn write_text(path: &Path, contents: &str) -> anyhow::Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { transcripts } => {
            let records = loader::load_transcripts(&transcripts)?;
            let pool = connect().await?;
            let inserted = db::import_records(&pool, &records).await?;
            println!(
                "Inserted {inserted} of {} grade records from {}.",
                records.len(),
                transcripts.display()
            );
        }
        Commands::Graduates {
            source,
            calendar,
            policy,
            out,
        } => {
            let calendar = calendar.load()?;
            let (records, _) = source.load().await?;
            let index = progress::build_progress(&records, &calendar)?;
            let outcome = graduation::classify(&index, &calendar, &policy.policy())?;
            for decision in &outcome.decisions {
                tracing::debug!(
                    "{}: graduated via {:?}, careers {:?}",
                    decision.student_id,
                    decision.qualifying_career,
                    decision.careers
                );
            }
            graduation::write_graduates(&out, &outcome.graduates)?;
            println!(
                "{} of {} students graduated on time; list written to {}.",
                outcome.graduates.len(),
                outcome.decisions.len(),
                out.display()
            );
        }
        Commands::Snapshots {
            source,
            calendar,
            graduates,
            out,
        } => {
            let calendar = calendar.load()?;
            let graduates = graduation::read_graduates(&graduates)?;
            let (records, _) = source.load().await?;
            let snapshots = snapshot::build_snapshots(&records, &graduates, &calendar)?;
            snapshot::write_snapshots(&out, &snapshots)?;
            println!("Wrote {} snapshots to {}.", snapshots.len(), out.display());
        }
        Commands::Run {
            source,
            calendar,
            policy,
            out_dir,
            persist,
        } => {
            let calendar = calendar.load()?;
            let policy = policy.policy();
            let (records, source_label) = source.load().await?;

            let index = progress::build_progress(&records, &calendar)?;
            let outcome = graduation::classify(&index, &calendar, &policy)?;
            let snapshots = snapshot::build_snapshots(&records, &outcome.graduates, &calendar)?;

            let students: BTreeSet<&str> = records.iter().map(|r| r.student_id.as_str()).collect();
            let summary = RunSummary {
                run_id: Uuid::new_v4(),
                generated_at: Utc::now(),
                source: source_label,
                calendar_periods: calendar.len(),
                policy,
                grade_records: records.len(),
                students: students.len(),
                graduates: outcome.graduates.len(),
                anomalies: outcome.anomalies.clone(),
                snapshots: snapshots.len(),
            };

            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("failed to create {}", out_dir.display()))?;
            graduation::write_graduates(&out_dir.join("graduados.txt"), &outcome.graduates)?;
            snapshot::write_snapshots(&out_dir.join("snapshots.csv"), &snapshots)?;
            write_text(
                &out_dir.join("report.md"),
                &report::build_report(&summary, &snapshots),
            )?;
            write_text(
                &out_dir.join("summary.json"),
                &serde_json::to_string_pretty(&summary)?,
            )?;

            if persist {
                let pool = connect().await?;
                db::save_run(&pool, &summary, &outcome.graduates, &snapshots).await?;
                println!("Run {} stored in Postgres.", summary.run_id);
            }

            println!(
                "{} graduates, {} snapshots; artifacts written to {}.",
                summary.graduates,
                summary.snapshots,
                out_dir.display()
            );
        }
        Commands::Band {
            probability,
            favorable,
            borderline,
            features,
        } => {
            let thresholds = RiskThresholds::new(favorable, borderline)?;
            let features = match features {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    Some(serde_json::from_str::<FeatureRow>(&raw)?)
                }
                None => None,
            };
            let band = thresholds.classify(probability);
            tracing::info!("Probability {probability:.2} falls in the {band} band");
            let result = BandResult {
                probability,
                band,
                color: band.color(),
                features,
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn source_flags_are_mutually_exclusive() {
        let parsed = Cli::try_parse_from([
            "academic-timeline",
            "graduates",
            "--transcripts",
            "exports",
            "--from-db",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from(["academic-timeline", "graduates"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn policy_flags_default_to_ten_plus_four() {
        let cli = Cli::try_parse_from(["academic-timeline", "run", "--from-db"]).unwrap();
        match cli.command {
            Commands::Run { policy, .. } => {
                assert_eq!(policy.policy(), GraduationPolicy::default());
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn band_result_serializes_lowercase_band() {
        let result = BandResult {
            probability: 0.5,
            band: RiskBand::Borderline,
            color: RiskBand::Borderline.color(),
            features: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["band"], "borderline");
        assert_eq!(json["color"], "yellow");
        assert!(json.get("features").is_none());
    }
}
