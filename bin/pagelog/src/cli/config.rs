use pagelog_config::GenericConfiguration;
use pagelog_error::{ErrorContext as _, GenericError};

use crate::config::EffectiveConfiguration;

/// Handles the `config` subcommand.
///
/// Writes the effective configuration to standard output as YAML.
pub fn handle_config_command(config: &GenericConfiguration) -> Result<(), GenericError> {
    let effective = EffectiveConfiguration::from_configuration(config)?;
    let yaml = serde_yaml::to_string(&effective).error_context("Failed to render configuration as YAML.")?;
    print!("{}", yaml);
    Ok(())
}
