use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use pagelog_components::adapters::StreamingConfiguration;
use pagelog_config::{ConfigurationError, ConfigurationLoader, GenericConfiguration};
use pagelog_core::{PartitionKey, SourceType, TransformConfiguration};
use pagelog_error::GenericError;
use serde::{Deserialize, Serialize};

/// Prefix for environment variable overrides, such as `PAGELOG_DATA_DIR`.
pub const ENVIRONMENT_PREFIX: &str = "PAGELOG";

#[derive(Parser)]
#[command(about, version)]
pub struct Cli {
    /// Path to a YAML or JSON configuration file.
    ///
    /// Files ending in `.json` are read as JSON; anything else is read as YAML. Environment variables prefixed with
    /// `PAGELOG_` override values from the file.
    #[arg(global = true, short = 'c', long = "config")]
    pub config_file: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand)]
pub enum Action {
    /// Validate, flatten and partition NDJSON log events.
    Stream(StreamConfig),

    /// Aggregate committed partitions into per-page metrics.
    Aggregate(AggregateConfig),

    /// Print the effective configuration.
    Config,
}

#[derive(Args, Clone, Debug)]
pub struct StreamConfig {
    /// NDJSON input file. Reads standard input when omitted or set to `-`.
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,

    /// Overrides the configured source type stamped on every row.
    #[arg(long, value_parser = parse_source_type)]
    pub source_type: Option<SourceType>,
}

#[derive(Args, Clone, Debug)]
pub struct AggregateConfig {
    /// First partition of the window, such as `2024-04-20`, `2024-04-20T01` or `year=2024/month=04/day=20`.
    #[arg(long)]
    pub from: PartitionKey,

    /// Last partition of the window, inclusive. Defaults to `--from`.
    #[arg(long)]
    pub to: Option<PartitionKey>,
}

fn parse_source_type(value: &str) -> Result<SourceType, String> {
    match value {
        "stream" => Ok(SourceType::Stream),
        "batch" => Ok(SourceType::Batch),
        other => Err(format!("unknown source type '{}', expected 'stream' or 'batch'", other)),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Storage layout for a pipeline run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PipelineConfiguration {
    /// Root directory holding structured partitions, quarantined records and aggregates.
    ///
    /// Defaults to `./data`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl PipelineConfiguration {
    /// Creates a new `PipelineConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration holds an invalid `data_dir`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }

    pub fn structured_dir(&self) -> PathBuf {
        self.data_dir.join("structured")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.data_dir.join("quarantine")
    }

    pub fn aggregates_dir(&self) -> PathBuf {
        self.data_dir.join("aggregates")
    }
}

/// Every setting the pipeline runs with, after defaults, file and environment have been merged.
#[derive(Debug, Serialize)]
pub struct EffectiveConfiguration {
    #[serde(flatten)]
    pub pipeline: PipelineConfiguration,

    #[serde(flatten)]
    pub transform: TransformConfiguration,

    #[serde(flatten)]
    pub streaming: StreamingConfiguration,
}

impl EffectiveConfiguration {
    /// Resolves the effective configuration.
    ///
    /// # Errors
    ///
    /// If any section is invalid, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        Ok(Self {
            pipeline: PipelineConfiguration::from_configuration(config)?,
            transform: TransformConfiguration::from_configuration(config)?,
            streaming: StreamingConfiguration::from_configuration(config)?,
        })
    }
}

/// Loads configuration from an optional file and the environment.
///
/// # Errors
///
/// If the file cannot be read or parsed, an error is returned.
pub fn load_configuration(config_file: Option<&Path>) -> Result<GenericConfiguration, GenericError> {
    let mut loader = ConfigurationLoader::default();

    if let Some(path) = config_file {
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        loader = if is_json {
            loader.from_json(path)?
        } else {
            loader.from_yaml(path)?
        };
    }

    let loader = loader.from_environment(ENVIRONMENT_PREFIX)?;
    Ok(loader.into_generic())
}
