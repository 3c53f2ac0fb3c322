use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::filter::StatusFilter;
use crate::task::{TaskMeta, TaskPatch};

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
    name = "smarttask",
    version,
    about = "SmartTask: an ordered task list with a persistent activity log"
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a task to the end of the list
    Add {
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Change a task's title or metadata
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        meta: MetaArgs,
        #[arg(long)]
        clear_description: bool,
        #[arg(long)]
        clear_due: bool,
        #[arg(long)]
        clear_priority: bool,
    },
    /// Flip a task between pending and done
    #[command(alias = "done")]
    Toggle { id: String },
    /// Delete a task
    #[command(alias = "rm")]
    Delete { id: String },
    /// Delete every done task
    ClearCompleted,
    /// Move a task before another one, or to the end
    Move {
        id: String,
        #[arg(long)]
        before: Option<String>,
    },
    /// Show tasks in list order
    #[command(alias = "ls")]
    List {
        #[arg(long, value_enum, default_value_t = StatusFilter::All)]
        status: StatusFilter,
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Show total, done and pending counts
    Stats,
    /// Show the activity log, newest first
    Log {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Write tasks and activity log as a JSON document
    Export {
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Replace all tasks from a JSON document (`-` reads stdin)
    Import { path: PathBuf },
}

#[derive(Args, Debug, Clone, Default)]
pub struct MetaArgs {
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long)]
    pub priority: Option<String>,
}

impl MetaArgs {
    pub fn into_meta(self) -> TaskMeta {
        TaskMeta {
            description: self.description,
            due_date: self.due,
            priority: self.priority,
        }
    }
}

pub fn build_patch(
    title: Option<String>,
    meta: MetaArgs,
    clear_description: bool,
    clear_due: bool,
    clear_priority: bool,
) -> TaskPatch {
    fn field(value: Option<String>, clear: bool) -> Option<Option<String>> {
        if clear { Some(None) } else { value.map(Some) }
    }

    TaskPatch {
        title,
        description: field(meta.description, clear_description),
        due_date: field(meta.due, clear_due),
        priority: field(meta.priority, clear_priority),
    }
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
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the raw
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
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
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
