use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use treeline::prelude::*;

use crate::common::{open_antispam_store, Config};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Path to the configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Interval between synthetic submissions (ms)
    #[arg(long, default_value_t = 100)]
    pub submit_interval_ms: u64,
}

#[tokio::main]
pub async fn run(config: Config, args: &Args) -> Result<(), Error> {
    let exit = CancellationToken::new();
    let cancel = CancelTokenImpl(exit.clone());

    let driver = EphemeralLog::new(config.storage.clone());
    let mut options = AppendOptions::new(config.queue.clone());

    options = options.with_decorator(dedup::decorator(config.dedup.capacity));

    if config.antispam.enabled {
        let store = open_antispam_store(&config)?;

        options = options
            .with_decorator(antispam::decorator(store.clone()))
            .with_follower(antispam::follower(store, config.follower.clone()));
    }

    let (appender, shutdown, _reader) = assemble(&driver, options, cancel.clone())?;

    // integration and checkpoint publishing
    let integrator = tokio::spawn(driver.clone().run(cancel.clone()));

    // synthetic personality: one counter leaf per interval
    let submitter = {
        let appender = appender.clone();
        let interval = Duration::from_millis(args.submit_interval_ms);

        tokio::spawn(async move {
            let mut next = 0u64;

            loop {
                tokio::time::sleep(interval).await;

                let leaf = format!("devnet-leaf-{next}");
                next += 1;

                let future = appender.add(Entry::new(leaf.into_bytes())).await;

                tokio::spawn(async move {
                    match future.assignment().await {
                        Ok(assignment) => {
                            info!(
                                index = assignment.index,
                                is_dup = assignment.is_dup,
                                "leaf sequenced"
                            )
                        }
                        Err(err) => warn!(%err, "leaf rejected"),
                    }
                });
            }
        })
    };

    info!("devnet running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    submitter.abort();

    // hold shutdown until a published checkpoint covers every index that was
    // handed out, then stop the background tasks
    shutdown.shutdown(cancel.clone()).await?;
    exit.cancel();
    let _ = integrator.await;

    info!("done");

    Ok(())
}
