use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser};
use serde::{Deserialize, Serialize};

use lib_dispatch::loggers::setup_logging;
use lib_dispatch::DispatchConfig;

/// Options shared by every dispatch binary.
///
/// Precedence: defaults, then the JSON5 config file, then `DISPATCH_*`
/// environment variables, then these flags.
#[derive(Args, Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommonArgs {
    #[arg(long, env = "DISPATCH_CONFIG_PATH", help = "Path to the JSON5 configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "DISPATCH_SERVICE_ADDRESS", help = "Base address of the processing service.")]
    pub service_address: Option<String>,

    #[arg(long, env = "DISPATCH_MAX_CONCURRENCY", help = "Maximum concurrently running jobs (0 = unbounded).")]
    pub max_concurrency: Option<usize>,

    #[arg(long, env = "DISPATCH_WS_RETRIES", help = "Channel open retries after the first attempt.")]
    pub ws_retries: Option<u32>,

    #[arg(long, env = "DISPATCH_JOB_RETRIES", help = "Per-job connect/send retries after the first attempt.")]
    pub job_retries: Option<u32>,

    #[arg(long, env = "DISPATCH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "DISPATCH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

/// Loads a `.env` file into the environment and then parses `argv`, so values
/// from `.env` reach the `env` fallbacks of the flags below.
///
/// `env_file` defaults to a `.env` found from the working directory upwards.
/// Returns the parsed arguments and the path of the `.env` that was loaded.
pub fn parse_with_dotenv<P, I, T>(env_file: Option<&Path>, argv: I) -> Result<(P, Option<PathBuf>), clap::Error>
where
    P: Parser,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let loaded = match env_file {
        Some(path) => dotenvy::from_path(path).ok().map(|_| path.to_path_buf()),
        None => dotenvy::dotenv().ok(),
    };
    P::try_parse_from(argv).map(|parsed| (parsed, loaded))
}

impl CommonArgs {
    // 'other' overrides 'self' for Some values
    pub fn merge(self, other: CommonArgs) -> CommonArgs {
        CommonArgs {
            config_path: other.config_path.or(self.config_path),
            service_address: other.service_address.or(self.service_address),
            max_concurrency: other.max_concurrency.or(self.max_concurrency),
            ws_retries: other.ws_retries.or(self.ws_retries),
            job_retries: other.job_retries.or(self.job_retries),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    fn defaults() -> CommonArgs {
        CommonArgs {
            config_path: Some(PathBuf::from("dispatch.json5")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    /// Builds the dispatch configuration from every layer.
    pub fn resolve(&self) -> Result<DispatchConfig> {
        let args = Self::defaults().merge(self.clone());
        let mut config = DispatchConfig::load(args.config_path.as_deref()).context("loading dispatch configuration")?;

        if let Some(v) = args.service_address {
            config.service_address = v;
        }
        if let Some(v) = args.max_concurrency {
            config.max_concurrency = v;
        }
        if let Some(v) = args.ws_retries {
            config.ws_retries = v;
        }
        if let Some(v) = args.job_retries {
            config.job_retries = v;
        }
        Ok(config)
    }

    /// Installs the stdout + file logger for `app_name`.
    pub fn init_logging(&self, app_name: &str) -> Result<()> {
        let args = Self::defaults().merge(self.clone());
        let log_dir = args.log_dir.unwrap_or_else(|| PathBuf::from("./logs"));
        let log_level = args.log_level.unwrap_or_else(|| "info".to_string());
        let path = setup_logging(app_name, &log_dir, &log_level).context("setting up logging")?;
        log::debug!("Logging to {}", path.display());
        Ok(())
    }
}
