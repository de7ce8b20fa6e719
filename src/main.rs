mod commands;
mod core;
mod graph;
mod lock;
mod orchestrator;
mod pin;
mod plan;
mod registry;
mod state;
mod ui;
mod vcs;
mod workspace;

use clap::{Parser, Subcommand};
use commands::plan::PlanFormat;
use core::error::{ConvoyError, print_error};
use std::path::PathBuf;

/// Monorepo release orchestration: what to publish, in what order,
/// resumable after a crash
#[derive(Parser)]
#[command(name = "convoy")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(styles = get_styles())]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compute and show the release plan for the current commit
  Plan {
    /// JSON file of externally-computed version bumps
    #[arg(long)]
    versions: Option<PathBuf>,
    /// Exclude a package from publishing (repeatable)
    #[arg(long)]
    exclude: Vec<String>,
    /// Output the plan in JSON format
    #[arg(long)]
    json: bool,
    /// Output the plan as tab-separated values
    #[arg(long, conflicts_with = "json")]
    tsv: bool,
  },

  /// Publish the plan's packages in dependency order (dry-run by default)
  Publish {
    /// JSON file of externally-computed version bumps
    #[arg(long)]
    versions: Option<PathBuf>,
    /// Exclude a package from publishing (repeatable)
    #[arg(long)]
    exclude: Vec<String>,
    /// Actually publish (default: dry-run showing the plan)
    #[arg(long)]
    apply: bool,
    /// Packages published concurrently within one level
    #[arg(long)]
    concurrency: Option<usize>,
    /// Seconds to wait after each publish for registry propagation
    #[arg(long)]
    delay: Option<u64>,
    /// Retry packages that failed in the interrupted run being resumed
    #[arg(long)]
    retry_failed: bool,
  },

  /// Show run state and lock for this workspace
  Status {
    /// Output status in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Remove a stale workspace lock
  Unlock {
    /// Remove the lock even if it looks live
    #[arg(long)]
    force: bool,
  },
}

fn get_styles() -> clap::builder::Styles {
  clap::builder::Styles::styled()
    .usage(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .header(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
    .invalid(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .error(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .valid(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
    )
    .placeholder(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))))
}

fn main() {
  // Diagnostics go to stderr; stdout stays parseable (--json/--tsv)
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let result = match cli.command {
    Commands::Plan {
      versions,
      exclude,
      json,
      tsv,
    } => {
      let format = if json {
        PlanFormat::Json
      } else if tsv {
        PlanFormat::Tsv
      } else {
        PlanFormat::Table
      };
      commands::run_plan(versions, exclude, format)
    }

    Commands::Publish {
      versions,
      exclude,
      apply,
      concurrency,
      delay,
      retry_failed,
    } => commands::run_publish(versions, exclude, apply, concurrency, delay, retry_failed),

    Commands::Status { json } => commands::run_status(json),

    Commands::Unlock { force } => commands::run_unlock(force),
  };

  if let Err(err) = result {
    handle_error(err);
  }
}

fn handle_error(err: ConvoyError) -> ! {
  print_error(&err);
  std::process::exit(err.exit_code().as_i32());
}
