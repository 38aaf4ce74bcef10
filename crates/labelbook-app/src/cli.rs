//! CLI argument definitions for the Labelbook application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Labelbook - shipping log and label metadata store for the label printer.
#[derive(Parser, Debug)]
#[command(name = "labelbook", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data root holding the `database/` and `logs/` directories.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Print results as JSON.
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Which record store a command targets.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Logs,
    Labels,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the store files and their schema.
    Init,

    /// Record a shipping event.
    Log {
        /// print, log_only or unknown.
        #[arg(long, default_value = "print")]
        action: String,
        #[arg(long, default_value = "success")]
        status: String,
        #[arg(long)]
        tracking: Option<String>,
        #[arg(long)]
        sku: Option<String>,
        #[arg(long)]
        details: Option<String>,
    },

    /// List one page of records.
    List {
        target: Target,
        #[command(flatten)]
        filter: FilterArgs,
        /// Page size (defaults to the configured page size).
        #[arg(long, conflicts_with = "all")]
        limit: Option<u64>,
        /// List every matching record.
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },

    /// Count matching records.
    Count {
        target: Target,
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Change fields of one record, e.g. `--set status=shipped`.
    Update {
        target: Target,
        id: i64,
        #[arg(long = "set", value_name = "FIELD=VALUE", required = true, value_parser = parse_assignment)]
        set: Vec<(String, String)>,
    },

    /// Delete one record.
    Delete { target: Target, id: i64 },

    /// Distinct values of one field.
    Values { target: Target, field: String },

    /// Export matching records to a CSV file.
    Export {
        target: Target,
        path: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Import label metadata from a spreadsheet CSV export.
    ImportLabels {
        path: PathBuf,
        /// Remove every existing label first.
        #[arg(long)]
        replace: bool,
    },

    /// Set notes on a label.
    Notes {
        id: i64,
        notes: String,
        /// Also apply to labels sharing the variant number prefix.
        #[arg(long)]
        sync: bool,
    },

    /// Copy legacy shipping records into the shipping log store.
    Migrate,
}

/// Search options shared by list, count and export.
#[derive(Args, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Free-text search; words are matched as substrings.
    #[arg(short = 's', long)]
    pub search: Option<String>,
    /// Restrict the search to one field.
    #[arg(short = 'f', long)]
    pub field: Option<String>,
    /// First day to include (YYYY-MM-DD).
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// Last day to include (YYYY-MM-DD).
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected FIELD=VALUE, got '{}'", raw)),
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > LABELBOOK_CONFIG env var > platform default (~/.labelbook/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("LABELBOOK_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > LABELBOOK_DATA_DIR env var > config file value.
    /// Returns `None` if neither is overridden (use config default).
    pub fn resolve_data_dir(&self) -> Option<String> {
        if let Some(ref p) = self.data_dir {
            return Some(p.to_string_lossy().to_string());
        }
        std::env::var("LABELBOOK_DATA_DIR").ok()
    }

    /// Resolve the log filter.
    ///
    /// Priority: --log-level flag > RUST_LOG > config file value.
    pub fn resolve_log_filter(&self, config_level: &str) -> String {
        if let Some(ref level) = self.log_level {
            return level.clone();
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            if !filter.trim().is_empty() {
                return filter;
            }
        }
        config_level.to_string()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".labelbook").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".labelbook").join("config.toml");
    }
    PathBuf::from("config.toml")
}
