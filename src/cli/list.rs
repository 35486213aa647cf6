use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use super::CliContext;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Directory to scan instead of the configured plugin directory
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

pub async fn execute(args: ListArgs, context: &CliContext) -> anyhow::Result<()> {
    let dir = args.dir.unwrap_or_else(|| context.config.plugin_dir.clone());
    let kinds = context
        .host
        .load_directory(&dir)
        .await
        .with_context(|| format!("could not read plugin directory {}", dir.display()))?;

    if kinds.is_empty() {
        println!("No plugins found in {}", dir.display());
        return Ok(());
    }

    for kind in kinds {
        let metadata = context.host.metadata(&kind)?;
        let inputs: Vec<&str> = metadata.inputs.iter().map(|p| p.name.as_str()).collect();
        let outputs: Vec<&str> = metadata.outputs.iter().map(|p| p.name.as_str()).collect();
        println!(
            "{kind}\n    in: [{}]  out: [{}]  categories: [{}]",
            inputs.join(", "),
            outputs.join(", "),
            metadata.categories.join(", ")
        );
        if let Some(description) = &metadata.description {
            println!("    {description}");
        }
    }
    Ok(())
}
