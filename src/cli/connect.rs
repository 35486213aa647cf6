use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Args;
use nodekit::HostError;

use super::CliContext;

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Module producing the output
    pub from: PathBuf,
    pub out_pin: String,
    /// Module receiving the input
    pub to: PathBuf,
    pub in_pin: String,
}

pub async fn execute(args: ConnectArgs, context: &CliContext) -> anyhow::Result<()> {
    let from_kind = context
        .host
        .load_module(&args.from)
        .with_context(|| format!("could not load {}", args.from.display()))?;
    let to_kind = if args.to == args.from {
        from_kind.clone()
    } else {
        context
            .host
            .load_module(&args.to)
            .with_context(|| format!("could not load {}", args.to.display()))?
    };

    match context.host.connect(&from_kind, &args.out_pin, &to_kind, &args.in_pin) {
        Ok(()) => {
            println!("✅ {from_kind}.{} can feed {to_kind}.{}", args.out_pin, args.in_pin);
            Ok(())
        }
        Err(err @ HostError::IncompatiblePins { .. }) => bail!("❌ {err}"),
        Err(err) => Err(err.into()),
    }
}
