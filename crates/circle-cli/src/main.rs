use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use circle_engine::schedule::{self, end_date_for_weeks};
use circle_engine::time::{self as circle_time, describe_local, LocalInstant};
use circle_engine::{EditGuard, LifecycleSettings, ScheduleState};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod settings;
mod simulate;

#[derive(Parser)]
#[command(name = "circles", version, about = "Learning circle schedule tools")]
struct Cli {
    /// Settings file (defaults to ./circles.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the weekly meetings a series would generate
    Schedule(ScheduleArgs),
    /// Report whether a published group's schedule can still be edited
    Lock(LockArgs),
    /// Replay a JSON scenario of lifecycle actions (use - for stdin)
    Simulate {
        /// Scenario file
        input: PathBuf,
    },
}

#[derive(Args)]
struct ScheduleArgs {
    #[arg(long)]
    start_date: NaiveDate,

    #[arg(long, conflicts_with = "weeks", required_unless_present = "weeks")]
    end_date: Option<NaiveDate>,

    #[arg(long)]
    weeks: Option<u32>,

    /// Local time-of-day, HH:MM or HH:MM:SS
    #[arg(long, value_parser = parse_time)]
    meeting_time: NaiveTime,

    #[arg(long, default_value = "UTC")]
    timezone: String,

    /// Meeting length in minutes (defaults to the configured value)
    #[arg(long)]
    duration: Option<u32>,
}

#[derive(Args)]
struct LockArgs {
    /// Current instant, RFC 3339
    #[arg(long)]
    now: DateTime<Utc>,

    /// Date of the earliest active meeting; omit if there are none
    #[arg(long)]
    first_meeting: Option<NaiveDate>,

    #[arg(long, value_parser = parse_time, default_value = "00:00")]
    meeting_time: NaiveTime,

    #[arg(long, default_value = "UTC")]
    timezone: String,

    #[arg(long)]
    draft: bool,
}

fn parse_time(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(s, "%H:%M:%S").or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let settings = settings::load(cli.config.as_deref()).context("failed to load settings")?;
    tracing::debug!(?settings, "settings loaded");

    match cli.command {
        Command::Schedule(args) => print_json(&schedule_report(&args, &settings)?),
        Command::Lock(args) => print_json(&lock_report(&args, &settings)?),
        Command::Simulate { input } => {
            let scenario = read_scenario(&input)?;
            print_json(&simulate::run(scenario, settings))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── schedule ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ScheduleReport {
    start_date: NaiveDate,
    end_date: NaiveDate,
    weeks: u32,
    day: String,
    timezone: String,
    meetings: Vec<MeetingPreview>,
}

#[derive(Serialize)]
struct MeetingPreview {
    number: usize,
    meeting_date: NaiveDate,
    meeting_time: NaiveTime,
    starts: LocalInstant,
    ends_at: DateTime<Utc>,
}

fn schedule_report(args: &ScheduleArgs, settings: &LifecycleSettings) -> Result<ScheduleReport> {
    let end_date = match (args.end_date, args.weeks) {
        (Some(end_date), _) => end_date,
        (None, Some(weeks)) => {
            if weeks == 0 || weeks > settings.max_weeks {
                bail!("--weeks must be between 1 and {}", settings.max_weeks);
            }
            end_date_for_weeks(args.start_date, weeks)?
        }
        (None, None) => bail!("either --end-date or --weeks is required"),
    };
    let weeks = schedule::weeks_between(args.start_date, end_date);
    if weeks > settings.max_weeks {
        bail!("a series may run at most {} weeks, this one runs {weeks}", settings.max_weeks);
    }

    let duration = args.duration.unwrap_or(settings.default_duration_minutes);
    let slots = schedule::generate(args.start_date, end_date, args.meeting_time)?;

    let meetings = slots
        .iter()
        .enumerate()
        .map(|(index, slot)| -> circle_engine::Result<MeetingPreview> {
            Ok(MeetingPreview {
                number: index + 1,
                meeting_date: slot.meeting_date,
                meeting_time: slot.meeting_time,
                starts: describe_local(slot.meeting_date, slot.meeting_time, &args.timezone)?,
                ends_at: slot.ends_at(&args.timezone, duration)?,
            })
        })
        .collect::<circle_engine::Result<Vec<_>>>()?;

    Ok(ScheduleReport {
        start_date: args.start_date,
        end_date,
        weeks,
        day: circle_time::day_name(args.start_date),
        timezone: args.timezone.clone(),
        meetings,
    })
}

// ── lock ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct LockReport {
    state: ScheduleState,
    can_edit: bool,
    lock_window_hours: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_meeting_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    locks_at: Option<DateTime<Utc>>,
}

fn lock_report(args: &LockArgs, settings: &LifecycleSettings) -> Result<LockReport> {
    let guard = EditGuard::from_settings(settings);
    let first_meeting_at = args
        .first_meeting
        .map(|date| circle_time::localize(date, args.meeting_time, &args.timezone))
        .transpose()?;

    let state = guard.classify(args.now, args.draft, first_meeting_at);
    tracing::info!(?state, now = %args.now, "classified schedule");

    Ok(LockReport {
        state,
        can_edit: state.allows_schedule_edit(),
        lock_window_hours: settings.edit_lock_hours,
        first_meeting_at,
        locks_at: first_meeting_at.map(|at| at - guard.lock_window()),
    })
}

// ── simulate ────────────────────────────────────────────────────────────────

fn read_scenario(input: &Path) -> Result<simulate::Scenario> {
    let text = if input.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read scenario from stdin")?;
        text
    } else {
        fs::read_to_string(input)
            .with_context(|| format!("failed to read scenario {}", input.display()))?
    };
    serde_json::from_str(&text).context("invalid scenario")
}
