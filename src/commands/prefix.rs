use crate::config::Config;
use crate::exit_code::{ExitCodeError, EXIT_CONFIG};
use anyhow::Result;

pub async fn execute() -> Result<()> {
    let config = Config::load()
        .map_err(|error| ExitCodeError::with_message(EXIT_CONFIG, format!("{:#}", error)))?;
    let prefix = config
        .path_prefix()
        .map_err(|error| ExitCodeError::with_message(EXIT_CONFIG, format!("{:#}", error)))?;
    println!("{prefix}");
    Ok(())
}
