use serde::Deserialize;
use serde::Deserializer;
use serde::de::Error;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

pub mod error;
pub use error::ConfigError;

/// Parameters for the remote imagery service (an ArcGIS-style ImageServer
/// export endpoint).
#[derive(Debug, Deserialize, Clone)]
pub struct ImageryConfig {
    pub endpoint: String,
    /// EPSG code the service expects bounding boxes in.
    pub request_crs: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NdviConfig {
    /// Zero-based band index of the red channel in the fetched imagery.
    pub red_band: usize,
    /// Zero-based band index of the near-infrared channel.
    pub nir_band: usize,
    pub nodata_value: f32,
}

#[derive(Debug, Clone)]
pub struct Config {
    regions_file: String,
    tile_size: f64,
    output_directory: String,
    processing_timeout_ms: u64,
    imagery: ImageryConfig,
    ndvi: NdviConfig,
}

// This function deserializes a Config object from a deserializer, rejecting
// values that would make a run meaningless (zero-sized tiles, a retry cap of
// zero, a zero processing time bound, identical band indices).
impl<'de> Deserialize<'de> for Config {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ConfigHelper {
            regions_file: String,
            tile_size: f64,
            output_directory: String,
            processing_timeout_ms: u64,
            imagery: ImageryConfig,
            ndvi: NdviConfig,
        }

        let helper = ConfigHelper::deserialize(deserializer)?;

        if !helper.tile_size.is_finite() || helper.tile_size <= 0.0 {
            return Err(D::Error::custom(ConfigError::TileSize));
        }

        if helper.imagery.max_attempts < 1 {
            return Err(D::Error::custom(ConfigError::RetryCap));
        }

        if helper.imagery.timeout_secs == 0 {
            return Err(D::Error::custom(ConfigError::Timeout));
        }

        if helper.processing_timeout_ms == 0 {
            return Err(D::Error::custom(ConfigError::ProcessingTimeout));
        }

        if helper.ndvi.red_band == helper.ndvi.nir_band {
            return Err(D::Error::custom(ConfigError::BandIndices));
        }

        Ok(Config {
            regions_file: helper.regions_file,
            tile_size: helper.tile_size,
            output_directory: helper.output_directory,
            processing_timeout_ms: helper.processing_timeout_ms,
            imagery: helper.imagery,
            ndvi: helper.ndvi,
        })
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let config: Config = serde_json::from_reader(reader).map_err(ConfigError::from)?;

        Ok(config)
    }

    pub fn regions_file(&self) -> &str {
        &self.regions_file
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    pub fn output_directory(&self) -> &str {
        &self.output_directory
    }

    /// Upper bound on the decode/compute/persist phase of a single tile.
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn imagery(&self) -> &ImageryConfig {
        &self.imagery
    }

    pub fn ndvi(&self) -> &NdviConfig {
        &self.ndvi
    }
}

impl ImageryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn config_json(tile_size: &str, max_attempts: &str, nir_band: &str) -> String {
        config_json_with_timeout(tile_size, max_attempts, nir_band, "30000")
    }

    fn config_json_with_timeout(
        tile_size: &str,
        max_attempts: &str,
        nir_band: &str,
        processing_timeout_ms: &str,
    ) -> String {
        format!(
            r#"
    {{
        "regions_file": "./data/inputs/parks.json",
        "tile_size": {tile_size},
        "output_directory": "./data/outputs",
        "processing_timeout_ms": {processing_timeout_ms},
        "imagery": {{
            "endpoint": "https://imagery.example.com/exportImage",
            "request_crs": 3857,
            "image_width": 512,
            "image_height": 512,
            "timeout_secs": 60,
            "max_attempts": {max_attempts},
            "backoff_ms": 250
        }},
        "ndvi": {{
            "red_band": 0,
            "nir_band": {nir_band},
            "nodata_value": -9999.0
        }}
    }}
    "#
        )
    }

    #[test]
    fn test_from_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("config.json");
        let mut file = File::create(&file_path).unwrap();

        file.write_all(config_json("500.0", "3", "3").as_bytes())
            .unwrap();

        let config = Config::from_file(file_path).unwrap();

        assert_eq!(config.tile_size(), 500.0);
        assert_eq!(config.imagery().max_attempts, 3);
        assert_eq!(config.imagery().request_crs, 3857);
        assert_eq!(config.ndvi().nir_band, 3);
        assert_eq!(config.imagery().timeout(), Duration::from_secs(60));
        assert_eq!(config.processing_timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_zero_tile_size_is_rejected() {
        let result: Result<Config, _> = serde_json::from_str(&config_json("0.0", "3", "3"));
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_tile_size_is_rejected() {
        let result: Result<Config, _> = serde_json::from_str(&config_json("-100.0", "3", "3"));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let result: Result<Config, _> = serde_json::from_str(&config_json("500.0", "0", "3"));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_processing_timeout_is_rejected() {
        let result: Result<Config, _> =
            serde_json::from_str(&config_json_with_timeout("500.0", "3", "3", "0"));
        assert!(result.is_err());
    }

    #[test]
    fn test_identical_band_indices_are_rejected() {
        let result: Result<Config, _> = serde_json::from_str(&config_json("500.0", "3", "0"));
        assert!(result.is_err());
    }
}
