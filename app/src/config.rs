use std::collections::HashMap;

use anyhow::{Context, Result};
use log::*;
use r2d2::Pool;
use r2d2_postgres::{PostgresConnectionManager, TlsMode};
use serde::{Deserialize, Serialize};
use url::Url;

use infra::persistence::DocumentConnectionManager;

const ENV_PREFIX: &str = "COSTBOOK_POSTGRES_";

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
pub struct Config {
    pub postgres: PostgresConfig,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
pub struct PostgresConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub pool_size: Option<u32>,
}

/// Settings that may come from the environment instead of the file.
#[derive(Deserialize, Debug, Default)]
struct PostgresEnv {
    url: Option<String>,
    pool_size: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Config {
    /// Lets `COSTBOOK_POSTGRES_URL` and `COSTBOOK_POSTGRES_POOL_SIZE` override
    /// the file.
    pub fn apply_env(&mut self) -> Result<()> {
        let env = envy::prefixed(ENV_PREFIX)
            .from_env::<PostgresEnv>()
            .context("read environment")?;
        self.postgres.apply(env);
        Ok(())
    }
}

impl PostgresConfig {
    fn apply(&mut self, env: PostgresEnv) {
        if let Some(url) = env.url {
            self.url = url;
        }
        if let Some(size) = env.pool_size {
            self.pool_size = Some(size);
        }
    }

    /// The url with any password masked, fit for logs.
    pub fn redacted_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    // Only fails for urls that cannot carry a password at all.
                    let _ = url.set_password(Some("********"));
                }
                url.to_string()
            }
            Err(_) => "<unparseable url>".to_string(),
        }
    }

    pub(crate) fn build(&self) -> Result<Pool<DocumentConnectionManager>> {
        if self.url.is_empty() {
            anyhow::bail!("No postgres url configured; set [postgres] url or ${}URL", ENV_PREFIX);
        }
        debug!("Build pool for {}", self.redacted_url());

        let manager = PostgresConnectionManager::new(&*self.url, TlsMode::None)
            .with_context(|| format!("postgres manager for {}", self.redacted_url()))?;

        let mut builder = r2d2::Pool::builder();
        if let Some(size) = self.pool_size {
            builder = builder.max_size(size);
        }
        debug!("Pool builder: {:?}", builder);
        let pool = builder
            .build(DocumentConnectionManager::new(manager))
            .context("build pool")?;

        Ok(pool)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct EnvLogger {
    #[serde(default)]
    level: Option<LogLevel>,
    #[serde(default)]
    modules: HashMap<String, LogLevel>,
    #[serde(default)]
    timestamp_nanos: bool,
}

impl LogLevel {
    fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl EnvLogger {
    pub fn builder(&self) -> env_logger::Builder {
        let mut b = env_logger::Builder::from_default_env();
        if let Some(level) = self.level {
            b.filter_level(level.to_filter());
        }

        for (module, level) in self.modules.iter() {
            b.filter_module(module, level.to_filter());
        }

        if self.timestamp_nanos {
            b.format_timestamp_nanos();
        }

        b
    }
}
