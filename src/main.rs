use clap::Parser;
use nodekit::{config::HostConfig, logger::init_tracing};

mod cli;

use cli::{Cli, CliContext};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, notes) = HostConfig::load(cli.env_file.as_deref());
    cli.apply_overrides(&mut config);
    init_tracing(&config.log_level, config.log_dir.as_deref())?;
    for note in &notes {
        note.emit();
    }

    let context = CliContext::new(config)?;
    let result = cli::execute(&context, cli.command).await;
    context.host.shutdown();
    result
}
