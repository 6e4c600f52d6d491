use std::path::PathBuf;

use miette::{Context as _, IntoDiagnostic};

use crate::common::Config;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Where to write the config scaffold
    #[arg(long, default_value = "treeline.toml")]
    output: PathBuf,
}

pub fn run(args: &Args) -> miette::Result<()> {
    let config = Config::default();

    let serialized = toml::to_string_pretty(&config).into_diagnostic()?;

    std::fs::write(&args.output, serialized)
        .into_diagnostic()
        .context("writing config scaffold")?;

    println!("config scaffold written to {}", args.output.display());

    Ok(())
}
