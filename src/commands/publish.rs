//! Publish command implementation
//!
//! Dry-run by default: without `--apply` the command stops after printing
//! the plan. With `--apply` the orchestrator takes over and the run is
//! guarded by the workspace lock, tracked in durable state, and resumable
//! after a crash.

use crate::commands::build_plan_context;
use crate::core::error::{ConvoyError, ConvoyResult};
use crate::orchestrator::{CargoPublisher, Orchestrator, RunOptions};
use crate::registry::TagRegistry;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Run the publish command
pub fn run_publish(
  versions: Option<PathBuf>,
  exclude: Vec<String>,
  apply: bool,
  concurrency: Option<usize>,
  delay: Option<u64>,
  retry_failed: bool,
) -> ConvoyResult<()> {
  let root = env::current_dir()?;
  let ctx = build_plan_context(&root, &exclude, versions.as_deref())?;

  print!("{}", ctx.plan.render_table());
  println!();

  let included: Vec<_> = ctx.plan.included().collect();
  if included.is_empty() {
    println!("✅ Nothing to publish at this commit");
    return Ok(());
  }

  if !apply {
    println!("💡 This was a dry-run. Use --apply to publish {} package(s).", included.len());
    return Ok(());
  }

  let options = RunOptions {
    concurrency: concurrency.unwrap_or(ctx.config.concurrency),
    publish_delay: Duration::from_secs(delay.unwrap_or(ctx.config.publish_delay_secs)),
    stale_lock_timeout: Duration::from_secs(ctx.config.stale_lock_timeout_secs),
    retry_failed,
  };

  println!(
    "📦 Publishing {} of {} package(s) in dependency order",
    included.len(),
    ctx.plan.summary().total()
  );
  println!();

  let publisher = Arc::new(CargoPublisher::new(ctx.git.clone()));
  let registry = Arc::new(TagRegistry::new(ctx.git.clone()));
  let orchestrator = Orchestrator::new(&root, ctx.packages, ctx.workspace.clone(), publisher, registry, options);
  let outcome = orchestrator.run(&ctx.plan, &ctx.sha)?;

  println!();
  for name in &outcome.published {
    match ctx.plan.entry(name) {
      Some(entry) => println!("✅ Published {} {}", name, entry.next_version),
      None => println!("✅ Published {}", name),
    }
  }
  for name in &outcome.failed {
    println!("❌ Failed {}", name);
  }
  for name in &outcome.blocked {
    println!("⏸️  Blocked {} (dependency failed)", name);
  }

  if outcome.complete {
    println!();
    println!("🎉 Release complete: {} package(s) published", outcome.published.len());
    Ok(())
  } else {
    Err(ConvoyError::with_help(
      format!(
        "Release incomplete: {} failed, {} blocked",
        outcome.failed.len(),
        outcome.blocked.len()
      ),
      "Inspect failures with `convoy status`, then resume with \
       `convoy publish --apply --retry-failed` once the cause is fixed.",
    ))
  }
}
