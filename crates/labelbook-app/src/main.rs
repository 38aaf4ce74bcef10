//! Labelbook application binary - composition root.
//!
//! Ties the Labelbook crates into a single executable:
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing (CLI > RUST_LOG > config file)
//! 3. Build the store and open a session for this process
//! 4. Dispatch the subcommand and print its outcome
//!
//! Migration runs on its own worker thread with its own handle, the same
//! way the printing UI runs it in the background.

mod cli;

use std::error::Error;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use labelbook_core::config::{LabelbookConfig, SearchConfig};
use labelbook_core::types::{
    LabelMetadataRecord, LabelPatch, Outcome, ShipAction, ShippingLogEntry, ShippingLogPatch,
};
use labelbook_storage::{FilterQuery, LabelbookStore, StoreSession};

use cli::{CliArgs, Command, FilterArgs, Target};

type AppResult<T> = Result<T, Box<dyn Error>>;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Config is read before tracing exists; a load failure is reported once
    // the subscriber is up.
    let config_file = args.resolve_config_path();
    let (mut config, config_error) = if config_file.exists() {
        match LabelbookConfig::load(&config_file) {
            Ok(config) => (config, None),
            Err(e) => (LabelbookConfig::default(), Some(e)),
        }
    } else {
        (LabelbookConfig::default(), None)
    };
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_root = dir;
    }

    // Tracing. Diagnostics go to stderr so stdout stays machine-readable.
    let filter = args.resolve_log_filter(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Labelbook v{}", env!("CARGO_PKG_VERSION"));
    match config_error {
        Some(e) => warn!(path = %config_file.display(), error = %e, "Invalid config file, using defaults"),
        None => info!(path = %config_file.display(), "Configuration resolved"),
    }

    let store = LabelbookStore::new(config);
    info!(root = %store.paths().root().display(), "Data root");

    match run(&args, &store) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &CliArgs, store: &LabelbookStore) -> AppResult<ExitCode> {
    let json = args.json;
    let search = &store.config().search;

    match &args.command {
        Command::Init => emit(json, store.initialize(), |_| {
            println!("Initialized store under {}", store.paths().root().display());
        }),

        Command::Migrate => {
            let worker_store = store.clone();
            let worker = std::thread::Builder::new()
                .name("migration".into())
                .spawn(move || worker_store.run_migration())?;
            let outcome = worker.join().map_err(|_| "migration worker panicked")?;
            emit(json, outcome, |report| print!("{}", report))
        }

        command => {
            let session = store.open_session()?;
            let code = run_session(command, &session, search, json)?;
            session.close()?;
            Ok(code)
        }
    }
}

fn run_session(
    command: &Command,
    session: &StoreSession,
    search: &SearchConfig,
    json: bool,
) -> AppResult<ExitCode> {
    match command {
        Command::Log {
            action,
            status,
            tracking,
            sku,
            details,
        } => {
            let outcome = match action.parse::<ShipAction>() {
                Ok(action) => session.log_event(
                    action,
                    status,
                    tracking.as_deref(),
                    sku.as_deref(),
                    details.as_deref(),
                ),
                Err(e) => Outcome::failed(e.to_string()),
            };
            emit(json, outcome, |id| println!("Logged shipping event {}", id))
        }

        Command::List {
            target,
            filter,
            limit,
            all,
            offset,
        } => {
            let query = filter_query(filter);
            let limit = search.page_limit(*limit, *all);
            match target {
                Target::Logs => emit(json, session.list_logs(&query, limit, *offset), |rows| {
                    rows.iter().for_each(print_log)
                }),
                Target::Labels => {
                    emit(json, session.list_labels(&query, limit, *offset), |rows| {
                        rows.iter().for_each(print_label)
                    })
                }
            }
        }

        Command::Count { target, filter } => {
            let query = filter_query(filter);
            let outcome = match target {
                Target::Logs => session.count_logs(&query),
                Target::Labels => session.count_labels(&query),
            };
            emit(json, outcome, |n| println!("{}", n))
        }

        Command::Update { target, id, set } => {
            let fields: serde_json::Map<String, serde_json::Value> = set
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            let fields = serde_json::Value::Object(fields);
            let outcome = match target {
                Target::Logs => match serde_json::from_value::<ShippingLogPatch>(fields) {
                    Ok(patch) => session.update_log(*id, &patch),
                    Err(e) => Outcome::failed(format!("Invalid update: {}", e)),
                },
                Target::Labels => match serde_json::from_value::<LabelPatch>(fields) {
                    Ok(patch) => session.update_label(*id, &patch),
                    Err(e) => Outcome::failed(format!("Invalid update: {}", e)),
                },
            };
            emit(json, outcome, |_| println!("Updated record {}", id))
        }

        Command::Delete { target, id } => {
            let outcome = match target {
                Target::Logs => session.delete_log(*id),
                Target::Labels => session.delete_label(*id),
            };
            emit(json, outcome, |_| println!("Deleted record {}", id))
        }

        Command::Values { target, field } => {
            let outcome = match target {
                Target::Logs => session.distinct_log_values(field),
                Target::Labels => session.distinct_label_values(field),
            };
            emit(json, outcome, |values| values.iter().for_each(|v| println!("{}", v)))
        }

        Command::Export {
            target,
            path,
            filter,
        } => {
            let query = filter_query(filter);
            let outcome = match target {
                Target::Logs => session.export_logs(path, &query),
                Target::Labels => session.export_labels(path, &query),
            };
            emit(json, outcome, |n| {
                println!("Exported {} records to {}", n, path.display())
            })
        }

        Command::ImportLabels { path, replace } => {
            emit(json, session.import_labels(path, *replace), |summary| {
                println!(
                    "Imported {} labels from {} ({} skipped)",
                    summary.imported,
                    display_name(path),
                    summary.skipped
                )
            })
        }

        Command::Notes { id, notes, sync } => {
            emit(json, session.update_label_notes(*id, notes, *sync), |n| {
                println!("Notes updated on {} label(s)", n)
            })
        }

        Command::Init | Command::Migrate => Ok(ExitCode::SUCCESS),
    }
}

fn filter_query(args: &FilterArgs) -> FilterQuery {
    FilterQuery {
        search_term: args.search.clone(),
        field: args.field.clone(),
        start_date: args.from,
        end_date: args.to,
    }
}

/// Print an outcome as JSON or through `human`, and map it to an exit code.
fn emit<T: Serialize>(json: bool, outcome: Outcome<T>, human: impl FnOnce(&T)) -> AppResult<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        match (&outcome.value, outcome.success) {
            (Some(value), true) => human(value),
            _ => eprintln!(
                "error: {}",
                outcome.message.as_deref().unwrap_or("operation failed")
            ),
        }
    }
    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_log(entry: &ShippingLogEntry) {
    println!(
        "{:>6}  {}  {:<8}  {:<22}  {:<16}  {}",
        entry.id,
        entry.timestamp,
        entry.action,
        entry.tracking_number.as_deref().unwrap_or("-"),
        entry.sku.as_deref().unwrap_or("-"),
        entry.status
    );
}

fn print_label(label: &LabelMetadataRecord) {
    println!(
        "{:>6}  {:<16}  {:<14}  {}",
        label.id,
        label.sku.as_deref().unwrap_or("-"),
        label.color.as_deref().unwrap_or("-"),
        label.label_name.as_deref().unwrap_or("-")
    );
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
