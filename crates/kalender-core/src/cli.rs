use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::appointment::{JobCategory, JobStatus, RecurringType};
use crate::grid::Granularity;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "kalender",
    version,
    about = "Appointment calendar for tradespeople: appointments, customers, recurrences",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "kalenderrc", global = true)]
    pub kalenderrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the calendar around a date (default: today, configured view)
    Show {
        date: Option<String>,

        #[arg(long, value_enum)]
        view: Option<Granularity>,

        /// Move forward this many views
        #[arg(long, default_value_t = 0, conflicts_with = "prev")]
        next: u32,

        /// Move back this many views
        #[arg(long, default_value_t = 0)]
        prev: u32,
    },
    /// Day view for today
    Today,
    /// Create an appointment
    Add(AppointmentArgs),
    /// Replace an appointment; unspecified fields keep their stored value
    Edit {
        id: String,

        #[command(flatten)]
        fields: AppointmentArgs,

        /// Turn a recurring appointment into a one-off
        #[arg(long, conflicts_with = "repeat")]
        no_repeat: bool,

        /// Let a recurring appointment repeat without an end date
        #[arg(long, conflicts_with = "until")]
        no_until: bool,
    },
    /// Add a material line to an appointment
    MaterialAdd {
        id: String,
        name: String,

        #[arg(long)]
        quantity: Option<String>,
    },
    /// Remove a material line by its position in `info`
    MaterialRemove { id: String, position: usize },
    /// Delete an appointment
    Delete {
        id: String,

        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show one appointment
    Info { id: String },
    /// Search appointments by customer or task
    Search { term: String },
    /// List customers, optionally filtered
    Customers { term: Option<String> },
    /// Create a customer
    CustomerAdd(CustomerArgs),
    /// Replace a customer; unspecified fields keep their stored value
    CustomerEdit {
        id: String,

        #[command(flatten)]
        fields: CustomerArgs,
    },
    /// Show a customer with their appointments
    CustomerInfo { id: String },
    /// Delete a customer (and, by default, their appointments)
    CustomerDelete {
        id: String,

        #[arg(short = 'y', long)]
        yes: bool,

        /// Keep the customer's appointments regardless of configuration
        #[arg(long)]
        keep_appointments: bool,
    },
    /// Install sample customers and appointments into an empty calendar
    Seed,
    /// Print all stored data as JSON
    Export,
}

#[derive(Args, Debug, Clone, Default)]
pub struct AppointmentArgs {
    #[arg(long)]
    pub date: Option<String>,

    #[arg(long)]
    pub time: Option<String>,

    #[arg(long)]
    pub task: Option<String>,

    /// Duration in hours
    #[arg(long)]
    pub duration: Option<f64>,

    #[arg(long)]
    pub customer: Option<String>,

    #[arg(long, value_enum)]
    pub repeat: Option<RecurringType>,

    /// Last day a recurring appointment may occur on
    #[arg(long)]
    pub until: Option<String>,

    #[arg(long, value_enum)]
    pub status: Option<JobStatus>,

    #[arg(long, value_enum)]
    pub category: Option<JobCategory>,

    /// Free-text notes; an empty value clears them
    #[arg(long)]
    pub notes: Option<String>,

    /// Hours actually worked
    #[arg(long)]
    pub hours: Option<f64>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct CustomerArgs {
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub company: Option<String>,

    #[arg(long)]
    pub street: Option<String>,

    #[arg(long = "plz")]
    pub postal_code: Option<String>,

    #[arg(long)]
    pub city: Option<String>,

    #[arg(long)]
    pub phone: Option<String>,

    #[arg(long)]
    pub email: Option<String>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                rest.split_once(':')
                    .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
