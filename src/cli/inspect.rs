use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde_json::json;

use super::CliContext;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Path to a .so/.dylib/.dll, .wasm or .wat module
    pub module: PathBuf,
}

pub async fn execute(args: InspectArgs, context: &CliContext) -> anyhow::Result<()> {
    let kind = context
        .host
        .load_module(&args.module)
        .with_context(|| format!("could not load {}", args.module.display()))?;
    let metadata = context.host.metadata(&kind)?;

    let report = json!({
        "kind": kind,
        "metadata": metadata,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
