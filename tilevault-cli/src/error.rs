//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;

use tilevault::{CacheError, FetchError};

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// A cache operation failed
    Cache(CacheError),
    /// The tile source could not be set up
    Source(FetchError),
    /// Interactive prompt failed
    Prompt(String),
    /// Failed to write output file
    FileWrite { path: String, error: std::io::Error },
}

impl CliError {
    /// Print the error and exit with a non-zero status.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Cache(CacheError::NoSource) | CliError::Source(_) => {
                eprintln!();
                eprintln!("Set a tile URL template with --url or in ~/.tilevault/config.ini:");
                eprintln!("  [source]");
                eprintln!("  url = https://tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png");
            }
            CliError::Cache(CacheError::ZoomOutOfRange { max, .. }) => {
                eprintln!();
                eprintln!(
                    "Lower --max-zoom, or raise max_zoom in the [download] section (currently {}).",
                    max
                );
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Cache(e) => write!(f, "{}", e),
            CliError::Source(e) => write!(f, "Tile source error: {}", e),
            CliError::Prompt(msg) => write!(f, "Prompt failed: {}", msg),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path, error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Cache(e) => Some(e),
            CliError::Source(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::Cache(e)
    }
}

impl From<FetchError> for CliError {
    fn from(e: FetchError) -> Self {
        CliError::Source(e)
    }
}
