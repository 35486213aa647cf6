use std::path::PathBuf;

use clap::Args;
use tracing::warn;

use super::CliContext;
use nodekit::schema::write_schema;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Where to write the schemas
    #[arg(long, default_value = "./schemas")]
    pub out_dir: PathBuf,
}

pub async fn execute(args: SchemaArgs, context: &CliContext) -> anyhow::Result<()> {
    let plugin_dir = &context.config.plugin_dir;
    if plugin_dir.is_dir() {
        context.host.load_directory(plugin_dir).await?;
    } else {
        warn!("plugin dir {} does not exist, writing contract schemas only", plugin_dir.display());
    }

    let written = write_schema(&args.out_dir, &context.host)?;
    for file in &written {
        println!("  {file}");
    }
    println!("Schemas written to {}", args.out_dir.display());
    Ok(())
}
