//! Configuration inspection command

use reservoir_core::ReservoirConfig;

/// Implementation of the config command
pub fn execute_config(config: &ReservoirConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
