//! Plan command implementation

use crate::commands::build_plan_context;
use crate::core::error::ConvoyResult;
use std::env;
use std::path::PathBuf;

/// Output format for `convoy plan`
pub enum PlanFormat {
  Table,
  Json,
  Tsv,
}

/// Run the plan command
pub fn run_plan(versions: Option<PathBuf>, exclude: Vec<String>, format: PlanFormat) -> ConvoyResult<()> {
  let root = env::current_dir()?;
  let ctx = build_plan_context(&root, &exclude, versions.as_deref())?;

  match format {
    PlanFormat::Json => println!("{}", ctx.plan.to_json()?),
    PlanFormat::Tsv => print!("{}", ctx.plan.to_tsv()),
    PlanFormat::Table => {
      print!("{}", ctx.plan.render_table());
      let summary = ctx.plan.summary();
      if summary.included == 0 {
        println!("\n✅ Nothing to publish at this commit");
      } else {
        println!("\nTo execute this plan:");
        println!("  convoy publish --apply");
      }
    }
  }

  Ok(())
}
