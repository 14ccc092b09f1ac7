use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    TileSize,
    RetryCap,
    Timeout,
    ProcessingTimeout,
    BandIndices,
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TileSize => write!(f, "tile_size must be a positive finite number"),
            ConfigError::RetryCap => write!(f, "max_attempts must be at least 1"),
            ConfigError::Timeout => write!(f, "timeout_secs must be greater than zero"),
            ConfigError::ProcessingTimeout => {
                write!(f, "processing_timeout_ms must be greater than zero")
            }
            ConfigError::BandIndices => {
                write!(f, "red_band and nir_band must be different band indices")
            }
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Json(e) => write!(f, "Failed to parse JSON: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> ConfigError {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> ConfigError {
        ConfigError::Json(err)
    }
}
