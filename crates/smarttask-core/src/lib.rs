pub mod activity;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod persistence;
pub mod render;
pub mod store;
pub mod task;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::cli::Command;
use crate::filter::StatusFilter;
use crate::persistence::{
  DirBlobStore,
  PersistenceAdapter
};
use crate::store::TaskStore;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting smarttask CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let backend =
    DirBlobStore::open(&data_dir)
      .with_context(|| {
        format!(
          "failed to open storage at \
           {}",
          data_dir.display()
        )
      })?;
  let options = cfg.store_options()?;

  let mut store = TaskStore::open(
    PersistenceAdapter::new(backend),
    options
  );
  let changes =
    commands::ChangeLog::attach(
      &mut store
    );

  let renderer =
    render::Renderer::new(&cfg)?;
  let command = cli.command.unwrap_or(
    Command::List {
      status: StatusFilter::All,
      search: String::new()
    }
  );

  commands::dispatch(
    &mut store,
    &changes,
    &renderer,
    command
  )?;

  info!("done");
  Ok(())
}
