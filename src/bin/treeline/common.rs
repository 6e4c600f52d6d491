use std::path::PathBuf;

use miette::{Context as _, IntoDiagnostic};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{filter::Targets, prelude::*};

use treeline::adapters::AntispamStoreAdapter;
use treeline::prelude::*;
use treeline_redb::RedbAntispam;

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Maximum level to emit (trace, debug, info, warn, error)
    pub max_level: Option<String>,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct AntispamConfig {
    pub enabled: bool,

    /// Directory for the persistent identity index. In-memory when unset.
    pub path: Option<PathBuf>,
}

impl Default for AntispamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: EphemeralLogConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub antispam: AntispamConfig,

    #[serde(default)]
    pub follower: FollowerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

pub fn load_config(explicit_file: &Option<PathBuf>) -> miette::Result<Config> {
    let mut s = config::Config::builder();

    s = match explicit_file {
        Some(path) => s.add_source(config::File::with_name(path.to_str().unwrap()).required(true)),
        None => s.add_source(config::File::with_name("treeline.toml").required(false)),
    };

    s = s.add_source(config::Environment::with_prefix("TREELINE"));

    s.build()
        .into_diagnostic()?
        .try_deserialize()
        .into_diagnostic()
        .context("loading config")
}

pub fn setup_tracing(config: &LoggingConfig) -> miette::Result<()> {
    let level = config
        .max_level
        .as_deref()
        .map(|value| value.parse::<Level>())
        .transpose()
        .into_diagnostic()
        .context("parsing log level")?
        .unwrap_or(Level::INFO);

    let filter = Targets::new().with_target("treeline", level);

    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish()
        .with(filter)
        .init();

    Ok(())
}

pub fn open_antispam_store(config: &Config) -> Result<AntispamStoreAdapter, Error> {
    let store = match &config.antispam.path {
        Some(path) => {
            std::fs::create_dir_all(path).map_err(Error::storage)?;
            RedbAntispam::open(path.join("antispam"))?.into()
        }
        None => treeline_core::builtin::EphemeralAntispam::new().into(),
    };

    Ok(store)
}
