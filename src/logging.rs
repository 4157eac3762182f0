//! Process-wide `tracing` subscriber.
//!
//! `RUST_LOG` takes precedence over `logging.level`. With `logging.logfile`
//! set, output is appended to that file instead of stderr.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{CatalogError, Result};

pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;

    let installed = match &config.logfile {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init(),
    };

    installed.map_err(|e| CatalogError::config(format!("cannot install subscriber: {}", e)))
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            CatalogError::config(format!("invalid logging level '{}': {}", config.level, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive_is_validated() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let good = LoggingConfig { level: "geocatalog=debug,warn".to_string(), logfile: None };
        assert!(env_filter(&good).is_ok());

        let bad = LoggingConfig { level: "geocatalog=loud".to_string(), logfile: None };
        assert!(env_filter(&bad).is_err());
    }
}
