use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use trainlog_core::summary::write_summary_csv;
use trainlog_core::*;

#[derive(Parser)]
#[command(name = "trainlog")]
#[command(about = "Workout log with optimistic sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Whose records to work on
    #[arg(long, global = true, default_value = "default")]
    user: String,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show records by date in display order
    List {
        #[arg(long)]
        from: NaiveDate,

        /// Last date to show (defaults to --from)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Add a record
    Add {
        #[arg(long)]
        date: NaiveDate,

        #[arg(long)]
        name: String,

        #[arg(long, value_enum)]
        kind: KindArg,

        /// Duration of a timed record
        #[arg(long, default_value_t = 30)]
        minutes: u32,

        /// Number of sets of a set-based record
        #[arg(long, default_value_t = 3)]
        sets: u32,

        #[arg(long, default_value_t = 0.0)]
        weight: f64,

        #[arg(long, default_value_t = 10)]
        reps: u32,

        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Apply a JSONL script of UI actions through the sync engine
    Replay {
        script: PathBuf,
    },

    /// Per-day completion counts
    Summary {
        #[arg(long)]
        from: NaiveDate,

        #[arg(long)]
        to: NaiveDate,

        /// Also write the summaries to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Show or change the rest interval offered after completing a set
    Rest {
        #[arg(long)]
        seconds: Option<u32>,

        /// Turn the rest prompt off
        #[arg(long, conflicts_with = "on")]
        off: bool,

        /// Turn the rest prompt back on
        #[arg(long)]
        on: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Timed,
    Sets,
    Text,
}

/// One line of a replay script
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum UiCommand {
    Load {
        from: NaiveDate,
        to: Option<NaiveDate>,
    },
    Add {
        date: NaiveDate,
        name: String,
        kind: RecordKind,
        #[serde(default)]
        notes: String,
    },
    EditSet {
        date: NaiveDate,
        index: usize,
        set: usize,
        weight: Option<f64>,
        reps: Option<u32>,
    },
    AddSet {
        date: NaiveDate,
        index: usize,
    },
    RemoveSet {
        date: NaiveDate,
        index: usize,
        set: usize,
    },
    Notes {
        date: NaiveDate,
        index: usize,
        text: String,
    },
    Duration {
        date: NaiveDate,
        index: usize,
        minutes: u32,
    },
    ToggleSet {
        date: NaiveDate,
        index: usize,
        set: usize,
        done: bool,
    },
    ToggleAll {
        date: NaiveDate,
        index: usize,
        done: bool,
    },
    ToggleRecord {
        date: NaiveDate,
        index: usize,
        done: bool,
    },
    Reorder {
        date: NaiveDate,
        from: usize,
        to: usize,
    },
    Copy {
        date: NaiveDate,
        index: usize,
        to_date: NaiveDate,
    },
    Move {
        date: NaiveDate,
        index: usize,
        to_date: NaiveDate,
    },
    Delete {
        date: NaiveDate,
        index: usize,
    },
    /// Let `ms` milliseconds of wall time pass
    Wait {
        ms: u64,
    },
    /// Wait for every queued write to finish
    Settle,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    trainlog_core::logging::init_with_level(trainlog_core::logging::level_for_verbosity(
        cli.verbose,
    ));

    let config = Config::load()?;
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    std::fs::create_dir_all(&data_dir)?;

    let user = UserId::new(cli.user.clone());
    let service = Arc::new(
        JsonFileService::new(data_dir.join("records.json")).with_default_rest(RestSettings {
            enabled: true,
            seconds: config.rest.default_seconds,
        }),
    );

    match cli.command {
        Commands::List { from, to } => cmd_list(&service, &config, user, from, to).await,
        Commands::Add {
            date,
            name,
            kind,
            minutes,
            sets,
            weight,
            reps,
            notes,
        } => {
            let kind = match kind {
                KindArg::Timed => RecordKind::Timed {
                    duration_minutes: minutes,
                },
                KindArg::Sets => RecordKind::SetBased {
                    sets: (1..=sets)
                        .map(|n| SetEntry::unsaved(n, weight, reps))
                        .collect(),
                },
                KindArg::Text => RecordKind::FreeText,
            };
            let draft = RecordDraft {
                user_id: user.clone(),
                date,
                name,
                kind,
                notes,
            };
            cmd_add(&service, &config, user, draft).await
        }
        Commands::Replay { script } => cmd_replay(&service, &config, user, &script).await,
        Commands::Summary { from, to, csv } => {
            cmd_summary(&service, &config, user, from, to, csv.as_deref()).await
        }
        Commands::Rest { seconds, off, on } => cmd_rest(&service, &user, seconds, off, on).await,
    }
}

fn engine(
    service: &Arc<JsonFileService>,
    config: &Config,
    user: UserId,
) -> (SyncEngine, tokio::sync::mpsc::UnboundedReceiver<EngineEvent>) {
    let service: Arc<dyn WorkoutService> = Arc::clone(service) as Arc<dyn WorkoutService>;
    SyncEngine::new(user, service, config)
}

async fn cmd_list(
    service: &Arc<JsonFileService>,
    config: &Config,
    user: UserId,
    from: NaiveDate,
    to: Option<NaiveDate>,
) -> Result<()> {
    let (engine, _events) = engine(service, config, user);
    let range = DateRange::new(from, to.unwrap_or(from));
    let count = engine.load_range(range).await?;

    if count == 0 {
        println!("No records between {} and {}.", range.start, range.end);
        return Ok(());
    }
    print_records(&engine.records());
    Ok(())
}

async fn cmd_add(
    service: &Arc<JsonFileService>,
    config: &Config,
    user: UserId,
    draft: RecordDraft,
) -> Result<()> {
    let (engine, _events) = engine(service, config, user);
    let created = engine.add_record(draft).await?;
    engine.settle().await;

    println!("✓ Added {} on {}", created.name, created.date);
    println!("  id: {}", created.id);
    Ok(())
}

async fn cmd_summary(
    service: &Arc<JsonFileService>,
    config: &Config,
    user: UserId,
    from: NaiveDate,
    to: NaiveDate,
    csv: Option<&Path>,
) -> Result<()> {
    let (engine, _events) = engine(service, config, user);
    engine.load_range(DateRange::new(from, to)).await?;
    let days = summarize(&engine.records());

    if days.is_empty() {
        println!("No records between {} and {}.", from, to);
    }
    for day in &days {
        let mark = if day.is_complete() { "✓" } else { " " };
        println!("{} {}  {}/{}", mark, day.date, day.completed, day.total);
    }

    if let Some(path) = csv {
        let rows = write_summary_csv(&days, path)?;
        println!("✓ Wrote {} days to {}", rows, path.display());
    }
    Ok(())
}

async fn cmd_rest(
    service: &Arc<JsonFileService>,
    user: &UserId,
    seconds: Option<u32>,
    off: bool,
    on: bool,
) -> Result<()> {
    let mut settings = service.rest_interval_settings(user).await?;
    if seconds.is_some() || off || on {
        if let Some(seconds) = seconds {
            settings.seconds = seconds;
        }
        if off {
            settings.enabled = false;
        }
        if on {
            settings.enabled = true;
        }
        service.set_rest_settings(user, settings)?;
    }

    let state = if settings.enabled { "on" } else { "off" };
    println!(
        "Rest prompt: {} ({})",
        state,
        RestCountdown::new(settings.seconds).label()
    );
    Ok(())
}

async fn cmd_replay(
    service: &Arc<JsonFileService>,
    config: &Config,
    user: UserId,
    script: &Path,
) -> Result<()> {
    let content = std::fs::read_to_string(script)?;
    let (engine, mut events) = engine(service, config, user);

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command: UiCommand = serde_json::from_str(line)
            .map_err(|e| Error::Other(format!("{}:{}: {}", script.display(), line_no + 1, e)))?;
        tracing::debug!("replaying {:?}", command);

        if let Err(e) = apply(&engine, command).await {
            println!("error on line {}: {}", line_no + 1, e);
        }
        // Show events as they happen, the way a UI would react to them
        while let Ok(event) = events.try_recv() {
            print_event(&event);
        }
    }

    engine.settle().await;
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    println!();
    print_records(&engine.records());
    Ok(())
}

fn record_at(engine: &SyncEngine, date: NaiveDate, index: usize) -> Result<RecordId> {
    engine
        .records_on(date)
        .get(index)
        .map(|r| r.id.clone())
        .ok_or_else(|| Error::NotFound(format!("{} #{}", date, index)))
}

async fn apply(engine: &SyncEngine, command: UiCommand) -> Result<()> {
    let applied = match command {
        UiCommand::Load { from, to } => {
            engine
                .load_range(DateRange::new(from, to.unwrap_or(from)))
                .await?;
            true
        }
        UiCommand::Add {
            date,
            name,
            kind,
            notes,
        } => {
            let draft = RecordDraft {
                user_id: engine.user_id().clone(),
                date,
                name,
                kind,
                notes,
            };
            engine.add_record(draft).await?;
            true
        }
        UiCommand::EditSet {
            date,
            index,
            set,
            weight,
            reps,
        } => engine.edit_set(
            &record_at(engine, date, index)?,
            set,
            SetPatch { weight, reps },
        ),
        UiCommand::AddSet { date, index } => engine.add_set(&record_at(engine, date, index)?),
        UiCommand::RemoveSet { date, index, set } => {
            engine.remove_set(&record_at(engine, date, index)?, set)
        }
        UiCommand::Notes { date, index, text } => {
            engine.edit_notes(&record_at(engine, date, index)?, text)
        }
        UiCommand::Duration {
            date,
            index,
            minutes,
        } => engine.edit_duration(&record_at(engine, date, index)?, minutes),
        UiCommand::ToggleSet {
            date,
            index,
            set,
            done,
        } => engine.toggle_set(&record_at(engine, date, index)?, set, done),
        UiCommand::ToggleAll { date, index, done } => {
            engine.toggle_all_sets(&record_at(engine, date, index)?, done)
        }
        UiCommand::ToggleRecord { date, index, done } => {
            engine.toggle_record(&record_at(engine, date, index)?, done)
        }
        UiCommand::Reorder { date, from, to } => match engine.reorder(date, from, to).await {
            ReorderOutcome::Persisted { verification } => {
                if verification != Verification::Matched {
                    println!("reorder of {} not confirmed: {:?}", date, verification);
                }
                true
            }
            ReorderOutcome::RolledBack => true,
            ReorderOutcome::Unchanged | ReorderOutcome::Busy => false,
        },
        UiCommand::Copy {
            date,
            index,
            to_date,
        } => {
            let id = record_at(engine, date, index)?;
            engine.copy_to_date(&id, to_date).await?;
            true
        }
        UiCommand::Move {
            date,
            index,
            to_date,
        } => engine.move_to_date(&record_at(engine, date, index)?, to_date),
        UiCommand::Delete { date, index } => {
            let id = record_at(engine, date, index)?;
            engine.delete_record(&id).await?;
            true
        }
        UiCommand::Wait { ms } => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            true
        }
        UiCommand::Settle => {
            engine.settle().await;
            true
        }
    };

    if !applied {
        println!("no change");
    }
    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Render => {}
        EngineEvent::Celebrate { date } => println!("🎉 Every workout on {} is done!", date),
        EngineEvent::RestPrompt { seconds } => {
            println!("rest {}", RestCountdown::new(*seconds).label())
        }
        EngineEvent::SaveFailed { record_id, message } => {
            println!("save failed for {}: {}", record_id, message)
        }
        EngineEvent::ReorderFailed { group, message } => {
            println!("reorder failed for {}: {}", group, message)
        }
        EngineEvent::DeleteFailed { record_id, message } => {
            println!("delete failed for {}: {}", record_id, message)
        }
    }
}

fn print_records(records: &[WorkoutRecord]) {
    let mut by_date: BTreeMap<NaiveDate, Vec<&WorkoutRecord>> = BTreeMap::new();
    for record in records {
        by_date.entry(record.date).or_default().push(record);
    }

    for (date, mut day) in by_date {
        day.sort_by_key(|r| r.display_order);
        println!("{}", date);
        for record in day {
            let mark = if record.is_complete() { "x" } else { " " };
            println!(
                "  {}. [{}] {}{}",
                record.display_order,
                mark,
                record.name,
                describe_kind(record)
            );
            if !record.notes.is_empty() {
                println!("       {}", record.notes);
            }
        }
    }
}

fn describe_kind(record: &WorkoutRecord) -> String {
    match &record.kind {
        RecordKind::Timed { duration_minutes } => format!(" ({} min)", duration_minutes),
        RecordKind::SetBased { sets } => {
            let done = sets.iter().filter(|s| s.completed).count();
            let detail: Vec<String> = sets
                .iter()
                .map(|s| format!("{}x{}", s.weight, s.reps))
                .collect();
            format!(" [{}] {}/{} sets", detail.join(", "), done, sets.len())
        }
        RecordKind::FreeText => String::new(),
    }
}
