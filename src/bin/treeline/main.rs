use clap::Parser;
use miette::{IntoDiagnostic, Result};

mod common;
mod devnet;
mod init;

#[derive(Parser)]
#[clap(name = "Treeline")]
#[clap(bin_name = "treeline")]
#[clap(author, version, about, long_about = None)]
enum Treeline {
    Init(init::Args),
    Devnet(devnet::Args),
}

fn main() -> Result<()> {
    let args = Treeline::parse();

    match args {
        Treeline::Init(x) => init::run(&x)?,
        Treeline::Devnet(x) => {
            let config = common::load_config(&x.config)?;
            common::setup_tracing(&config.logging)?;
            devnet::run(config, &x).into_diagnostic()?;
        }
    };

    Ok(())
}
