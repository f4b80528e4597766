use crate::common::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Backend configuration: an opaque string map handed to the backend factory.
pub type BackendConfig = HashMap<String, String>;

/// Load a backend configuration from a TOML file of `key = "value"` pairs.
pub fn backend_config_from_file(path: &str) -> Result<BackendConfig> {
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path, e)))
}

/// Map a numeric log level to a tracing level. Levels follow the usual
/// convention: 0 = trace, 1 = debug, 2 = info, 3 = warn, 4+ = error.
pub fn tracing_level(loglevel: u8) -> tracing::Level {
    match loglevel {
        0 => tracing::Level::TRACE,
        1 => tracing::Level::DEBUG,
        2 => tracing::Level::INFO,
        3 => tracing::Level::WARN,
        _ => tracing::Level::ERROR,
    }
}

/// Initialize tracing for a server process. When a logfile is given, output
/// goes there without ANSI escapes; otherwise it goes to stderr.
/// `RUST_LOG` overrides the numeric level when set.
pub fn init_logging(logfile: Option<&str>, loglevel: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level(loglevel).to_string()));
    match logfile {
        Some(path) => {
            let file = fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .with_target(true)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .init();
        }
    }
    Ok(())
}
