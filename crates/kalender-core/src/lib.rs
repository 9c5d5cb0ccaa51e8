pub mod appointment;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod grid;
pub mod recurrence;
pub mod render;
pub mod search;
pub mod state;
pub mod store;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

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
    "starting kalender"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.kalenderrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let tz = datetime::resolve_timezone(
    cfg.get("timezone").as_deref()
  );
  let today = datetime::today(&tz);
  debug!(%tz, %today, "resolved local date");

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let mut store =
    datastore::DataStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let renderer =
    render::Renderer::new(&cfg, today)?;
  let command =
    cli.command.unwrap_or(
      cli::Command::Show {
        date: None,
        view: None,
        next: 0,
        prev: 0
      }
    );

  let stdout = std::io::stdout();
  let mut out = stdout.lock();
  let mut ctx =
    commands::CommandContext {
      store: &mut store,
      cfg: &cfg,
      renderer: &renderer,
      today,
      out: &mut out
    };
  commands::dispatch(
    &mut ctx, command
  )?;

  info!("done");
  Ok(())
}
