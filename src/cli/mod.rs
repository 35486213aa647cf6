use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

pub mod connect;
pub mod inspect;
pub mod list;
pub mod run;
pub mod schema;

use connect::ConnectArgs;
use inspect::InspectArgs;
use list::ListArgs;
use run::RunArgs;
use schema::SchemaArgs;

use nodekit::{config::HostConfig, registry::NodeHost};

#[derive(Parser, Debug)]
#[command(
    name = "nodekit",
    about = "Load, inspect and drive stream-processing node plugins",
    version = "0.2.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Read this env file instead of ./.env
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Directory holding plugin modules (overrides NODEKIT_PLUGIN_DIR)
    #[arg(long, global = true)]
    pub plugin_dir: Option<PathBuf>,

    /// Log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Also write rolling log files here
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

impl Cli {
    /// Flags win over the environment.
    pub fn apply_overrides(&self, config: &mut HostConfig) {
        if let Some(dir) = &self.plugin_dir {
            config.plugin_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a module's metadata
    Inspect(InspectArgs),

    /// Load every module in the plugin directory and list the kinds
    List(ListArgs),

    /// Check whether an output pin can feed an input pin
    Connect(ConnectArgs),

    /// Push one audio packet through a node and print what comes out
    Run(RunArgs),

    /// Emit JSON‐Schema
    Schema(SchemaArgs),
}

pub struct CliContext {
    pub config: HostConfig,
    pub host: Arc<NodeHost>,
}

impl CliContext {
    pub fn new(config: HostConfig) -> anyhow::Result<Self> {
        let host = NodeHost::new(&config).context("could not start the plugin host")?;
        Ok(Self { config, host: Arc::new(host) })
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Inspect(args) => inspect::execute(args, context).await,
        Commands::List(args) => list::execute(args, context).await,
        Commands::Connect(args) => connect::execute(args, context).await,
        Commands::Run(args) => run::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
    }
}
