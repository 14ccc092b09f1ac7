use super::{FetchError, ImageRequest, ImageryClient};
use crate::config::ImageryConfig;

/// Imagery transport backed by an ArcGIS-style ImageServer `exportImage`
/// endpoint, e.g. the USGS NAIP service. The request asks for a georeferenced
/// TIFF covering the tile bounds at a fixed pixel size.
pub struct HttpImageryClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpImageryClient {
    pub fn new(config: &ImageryConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("verdant/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

impl ImageryClient for HttpImageryClient {
    fn export_image(&self, request: &ImageRequest) -> Result<Vec<u8>, FetchError> {
        let crs = request.crs.to_string();
        let params = [
            ("bbox", request.bbox.to_string()),
            ("bboxSR", crs.clone()),
            ("imageSR", crs),
            ("size", format!("{},{}", request.width, request.height)),
            ("adjustAspectRatio", "true".to_string()),
            ("format", "tiff".to_string()),
            ("f", "image".to_string()),
            ("dpi", "96".to_string()),
        ];

        tracing::debug!("GET {} bbox={}", self.endpoint, request.bbox);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(format!("Failed to read response body: {}", e))
            }
        })?;

        Ok(bytes.to_vec())
    }
}
