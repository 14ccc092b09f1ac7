use std::fmt;

use crate::bbox::Bbox;
use crate::config::ImageryConfig;
use crate::raster;
use crate::tiling::TileSpec;

pub mod http;
pub use http::HttpImageryClient;

/// Accepted relative difference between the aspect ratio of a tile's bounds
/// and the aspect ratio of the raster the service actually returned.
const ASPECT_TOLERANCE: f64 = 0.1;

#[derive(Debug)]
pub enum FetchError {
    Transport(String),
    Status(u16),
    Timeout,
    EmptyPayload,
    InvalidPayload(String),
    AspectRatio { expected: f64, actual: f64 },
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport(e) => write!(f, "Network error: {}", e),
            FetchError::Status(code) => write!(f, "Imagery service returned HTTP {}", code),
            FetchError::Timeout => write!(f, "Imagery request timed out"),
            FetchError::EmptyPayload => write!(f, "Imagery response was empty"),
            FetchError::InvalidPayload(e) => write!(f, "Imagery payload is not a valid raster: {}", e),
            FetchError::AspectRatio { expected, actual } => write!(
                f,
                "Imagery aspect ratio {:.3} does not match requested extent {:.3}",
                actual, expected
            ),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Transient failures are worth another attempt; everything else fails
    /// the tile immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout => true,
            FetchError::Status(code) => {
                matches!(code, 408 | 429) || (500..=599).contains(code)
            }
            _ => false,
        }
    }
}

/// Outcome of fetching one tile. Carries either the raster payload or the
/// error that exhausted the attempts, never both.
#[derive(Debug)]
pub struct FetchResult {
    pub tile: TileSpec,
    pub outcome: Result<Vec<u8>, FetchError>,
}

/// Bounded-extent image request, expressed in the CRS the service expects.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub bbox: Bbox,
    pub crs: u32,
    pub width: u32,
    pub height: u32,
}

/// Transport seam: the pipeline only needs something that can turn an
/// [`ImageRequest`] into raster bytes, so tests can swap in a stub.
pub trait ImageryClient {
    fn export_image(&self, request: &ImageRequest) -> Result<Vec<u8>, FetchError>;
}

/// Fetches imagery for tiles with retry and exponential backoff. Failure is
/// data here: `fetch` never panics or propagates, one tile's trouble stays
/// in its own [`FetchResult`].
pub struct ImageryFetcher<C: ImageryClient> {
    client: C,
    config: ImageryConfig,
}

impl<C: ImageryClient> ImageryFetcher<C> {
    pub fn new(client: C, config: ImageryConfig) -> Self {
        Self { client, config }
    }

    #[cfg(test)]
    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    pub fn fetch(&self, tile: &TileSpec) -> FetchResult {
        let request = ImageRequest {
            bbox: tile.bounds,
            crs: self.config.request_crs,
            width: self.config.image_width,
            height: self.config.image_height,
        };

        let mut attempt = 1;
        let outcome = loop {
            match self.try_fetch(&request, tile) {
                Ok(bytes) => break Ok(bytes),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let backoff = self.config.backoff() * (1u32 << (attempt - 1).min(16));
                    tracing::warn!(
                        "Fetch attempt {}/{} for {} failed ({}), retrying in {:?}",
                        attempt,
                        self.config.max_attempts,
                        tile,
                        e,
                        backoff
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("Fetch for {} failed after {} attempt(s): {}", tile, attempt, e);
                    break Err(e);
                }
            }
        };

        FetchResult {
            tile: tile.clone(),
            outcome,
        }
    }

    fn try_fetch(&self, request: &ImageRequest, tile: &TileSpec) -> Result<Vec<u8>, FetchError> {
        let bytes = self.client.export_image(request)?;
        validate_payload(&bytes, &tile.bounds)?;
        Ok(bytes)
    }
}

/// A successful HTTP response is not necessarily usable imagery: the payload
/// must be non-empty, decode as a raster, and match the requested extent's
/// shape within tolerance.
fn validate_payload(bytes: &[u8], bounds: &Bbox) -> Result<(), FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::EmptyPayload);
    }

    let grid = raster::decode(bytes).map_err(|e| FetchError::InvalidPayload(e.to_string()))?;

    let expected = bounds.aspect_ratio();
    let actual = grid.aspect_ratio();
    if ((actual - expected) / expected).abs() > ASPECT_TOLERANCE {
        return Err(FetchError::AspectRatio { expected, actual });
    }

    Ok(())
}
