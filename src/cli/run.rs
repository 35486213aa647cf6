use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Args;
use node_plugin::CallResult;
use node_plugin::packet::{AudioFrame, OwnedPacket, Packet};
use serde::Serialize;
use tracing::info;

use super::CliContext;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to a .so/.dylib/.dll, .wasm or .wat module
    pub module: PathBuf,

    /// JSON params passed at creation
    #[arg(long)]
    pub params: Option<String>,

    /// JSON params applied after the first packet; the packet is then sent again
    #[arg(long)]
    pub update: Option<String>,

    /// Interleaved samples, comma separated
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub samples: Vec<f32>,

    #[arg(long, default_value_t = 48_000)]
    pub sample_rate: u32,

    #[arg(long, default_value_t = 1)]
    pub channels: u16,

    /// Input pin to feed
    #[arg(long, default_value = "in")]
    pub pin: String,
}

#[derive(Serialize)]
struct Emitted {
    stage: &'static str,
    pin: String,
    packet: OwnedPacket,
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    let host = &context.host;
    let kind = host
        .load_module(&args.module)
        .with_context(|| format!("could not load {}", args.module.display()))?;
    let id = host.create_instance(&kind, args.params.as_deref())?;
    info!(%kind, %id, "running one packet through the node");

    let packet = Packet::Audio(AudioFrame::new(args.sample_rate, args.channels, &args.samples));
    let mut emitted = Vec::new();

    let mut outputs: Vec<(String, OwnedPacket)> = Vec::new();
    check("process", host.process(id, &args.pin, &packet, &mut outputs)?)?;
    collect(&mut emitted, "process", &mut outputs);

    if let Some(update) = args.update.as_deref() {
        check("update_params", host.update_params(id, Some(update))?)?;
        check("process", host.process(id, &args.pin, &packet, &mut outputs)?)?;
        collect(&mut emitted, "after_update", &mut outputs);
    }

    check("flush", host.flush(id, &mut outputs)?)?;
    collect(&mut emitted, "flush", &mut outputs);
    host.destroy(id)?;

    println!("{}", serde_json::to_string_pretty(&emitted)?);
    Ok(())
}

fn check(stage: &str, result: CallResult) -> anyhow::Result<()> {
    match result.into_result() {
        Ok(()) => Ok(()),
        Err(message) => bail!("{stage} failed: {message}"),
    }
}

fn collect(
    emitted: &mut Vec<Emitted>,
    stage: &'static str,
    outputs: &mut Vec<(String, OwnedPacket)>,
) {
    emitted.extend(outputs.drain(..).map(|(pin, packet)| Emitted { stage, pin, packet }));
}
