use std::fmt;

use pagelog_config::{ConfigurationError, GenericConfiguration};
use serde::{Deserialize, Serialize};

/// Time granularity used when deriving partition keys.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionGranularity {
    /// One partition per UTC calendar day.
    #[default]
    Day,

    /// One partition per UTC hour.
    Hour,
}

/// Which path produced a structured record.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Records pulled from the live event stream.
    #[default]
    Stream,

    /// Records replayed from historical data.
    Batch,
}

impl SourceType {
    /// Returns the canonical lowercase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SourceType::Stream => "stream",
            SourceType::Batch => "batch",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transform engine configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TransformConfiguration {
    /// Granularity of partition keys.
    ///
    /// Defaults to `day`.
    #[serde(default)]
    pub partition_granularity: PartitionGranularity,

    /// Value substituted for an absent `tti`.
    ///
    /// Defaults to 0.
    #[serde(default)]
    pub default_tti: u64,

    /// Value substituted for an absent `ttar`.
    ///
    /// Defaults to 0.
    #[serde(default)]
    pub default_ttar: u64,

    /// Source type stamped on records produced through [`TransformEngine::process`][crate::TransformEngine::process].
    ///
    /// Defaults to `stream`.
    #[serde(default)]
    pub source_type: SourceType,
}

impl TransformConfiguration {
    /// Creates a new `TransformConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If any recognized option is present with an invalid value, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }

    /// Creates a new `TransformConfiguration` with default values.
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Sets the partition granularity.
    pub fn with_partition_granularity(mut self, granularity: PartitionGranularity) -> Self {
        self.partition_granularity = granularity;
        self
    }

    /// Sets the source type.
    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }
}
