use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::config::Config;
use crate::fetch::{FetchError, ImageryClient, ImageryFetcher};
use crate::ndvi::{self, PersistError};
use crate::raster::{self, RasterFormatError};
use crate::region::{InvalidRegionError, Region};
use crate::tiling::{self, TileSpec};

pub mod report;
pub use report::RunReport;

/// Lifecycle of one tile inside a run. States only move forward except for
/// the fetcher's bounded retry loop, which is internal to `Fetching`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TileState {
    Pending,
    Fetching,
    Fetched,
    Processing,
    Done,
    Failed,
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TileState::Pending => "PENDING",
            TileState::Fetching => "FETCHING",
            TileState::Fetched => "FETCHED",
            TileState::Processing => "PROCESSING",
            TileState::Done => "DONE",
            TileState::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Anything that can fail a single tile without failing the run.
#[derive(Debug)]
pub enum TileError {
    Fetch(FetchError),
    Raster(RasterFormatError),
    Persist(PersistError),
    Timeout(Duration),
}

impl fmt::Display for TileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileError::Fetch(e) => write!(f, "{}", e),
            TileError::Raster(e) => write!(f, "{}", e),
            TileError::Persist(e) => write!(f, "{}", e),
            TileError::Timeout(elapsed) => {
                write!(f, "Tile processing exceeded its time bound ({:?} elapsed)", elapsed)
            }
        }
    }
}

impl std::error::Error for TileError {}

impl TileError {
    /// Stable category string used in reports and summaries.
    pub fn category(&self) -> &'static str {
        match self {
            TileError::Fetch(FetchError::Timeout) => "timeout",
            TileError::Fetch(_) => "fetch",
            TileError::Raster(_) => "raster",
            TileError::Persist(_) => "persist",
            TileError::Timeout(_) => "timeout",
        }
    }
}

/// Mutable per-tile bookkeeping owned by the pipeline while a run is active.
#[derive(Debug)]
pub struct TileRecord {
    pub tile: TileSpec,
    pub state: TileState,
    pub error: Option<TileError>,
    pub output: Option<PathBuf>,
}

impl TileRecord {
    fn new(tile: TileSpec) -> Self {
        TileRecord {
            tile,
            state: TileState::Pending,
            error: None,
            output: None,
        }
    }

    // All state changes go through here so the lifecycle is traceable in one
    // place.
    fn transition(&mut self, next: TileState) {
        tracing::debug!("{}: {} -> {}", self.tile, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, error: TileError) {
        tracing::warn!("{} failed ({}): {}", self.tile, error.category(), error);
        self.error = Some(error);
        self.transition(TileState::Failed);
    }
}

/// Drives every tile of a region through Fetch -> Process and folds the
/// outcomes into a [`RunReport`].
///
/// Tiles are independent: `run_tile` borrows the pipeline immutably and
/// touches no shared state, so a later parallel dispatcher only has to fan
/// tiles out over workers and collect the returned records.
pub struct TilePipeline<C: ImageryClient> {
    fetcher: ImageryFetcher<C>,
    config: Config,
}

impl<C: ImageryClient> TilePipeline<C> {
    pub fn new(client: C, config: Config) -> Self {
        let fetcher = ImageryFetcher::new(client, config.imagery().clone());
        TilePipeline { fetcher, config }
    }

    /// Run the full pipeline for one region. Only region validation can fail
    /// here; per-tile failures end up in the report, not in `Err`.
    pub fn run(&self, region: &Region) -> Result<RunReport, InvalidRegionError> {
        // The fetcher labels requests with the service CRS and the writer
        // stamps outputs with the region CRS; they must be the same code or
        // the geokeys would misgeoreference every tile.
        let request_crs = self.config.imagery().request_crs;
        if region.crs != request_crs {
            return Err(InvalidRegionError::CrsMismatch {
                region_crs: region.crs,
                request_crs,
            });
        }

        let tiles = tiling::generate_tiles(region, self.config.tile_size())?;
        let started_at = Utc::now();

        tracing::info!(
            "Starting run for region {} ({}): {} tiles of {}x{}",
            region.id,
            region.name,
            tiles.len(),
            self.config.tile_size(),
            self.config.tile_size()
        );

        let records: Vec<TileRecord> = tiles
            .into_iter()
            .map(|tile| self.run_tile(region, tile))
            .collect();

        let report = RunReport::new(region, started_at, Utc::now(), records);

        tracing::info!(
            "Run for region {} finished: {} done, {} failed",
            region.id,
            report.done_count(),
            report.failed_count()
        );

        Ok(report)
    }

    /// Fetch and process a single tile to a terminal state. Never panics and
    /// never returns an error: failure is recorded on the tile itself.
    fn run_tile(&self, region: &Region, tile: TileSpec) -> TileRecord {
        let mut record = TileRecord::new(tile);

        record.transition(TileState::Fetching);
        let fetched = self.fetcher.fetch(&record.tile);

        let bytes = match fetched.outcome {
            Ok(bytes) => bytes,
            Err(e) => {
                record.fail(TileError::Fetch(e));
                return record;
            }
        };
        record.transition(TileState::Fetched);

        record.transition(TileState::Processing);
        match self.process_tile(region, &record.tile, &bytes, Instant::now()) {
            Ok(path) => {
                record.output = Some(path);
                record.transition(TileState::Done);
            }
            Err(e) => {
                if let TileError::Persist(ref persist_err) = e {
                    // A failing write usually means disk trouble that will
                    // hit every tile, not just this one.
                    tracing::error!("Persistence failure on {}: {}", record.tile, persist_err);
                }
                record.fail(e);
            }
        }

        record
    }

    /// `started` marks the beginning of the processing phase; the deadline is
    /// checked between steps so a stuck decode or a slow disk cannot hold a
    /// tile open past the configured bound.
    fn process_tile(
        &self,
        region: &Region,
        tile: &TileSpec,
        bytes: &[u8],
        started: Instant,
    ) -> Result<PathBuf, TileError> {
        let grid = raster::decode(bytes).map_err(TileError::Raster)?;
        self.check_processing_deadline(started)?;

        let ndvi_raster = ndvi::compute_ndvi(&grid, tile, region.crs, self.config.ndvi())
            .map_err(TileError::Raster)?;
        self.check_processing_deadline(started)?;

        let output_dir = Path::new(self.config.output_directory());
        let path =
            ndvi::persist(&ndvi_raster, &region.name, output_dir).map_err(TileError::Persist)?;
        self.check_processing_deadline(started)?;

        Ok(path)
    }

    fn check_processing_deadline(&self, started: Instant) -> Result<(), TileError> {
        let elapsed = started.elapsed();
        if elapsed > self.config.processing_timeout() {
            return Err(TileError::Timeout(elapsed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ImageRequest;
    use crate::raster::test_support;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn test_config(output_dir: &Path) -> Config {
        let json = format!(
            r#"
    {{
        "regions_file": "unused.json",
        "tile_size": 500.0,
        "output_directory": "{}",
        "processing_timeout_ms": 5000,
        "imagery": {{
            "endpoint": "https://imagery.example.com/exportImage",
            "request_crs": 3857,
            "image_width": 2,
            "image_height": 2,
            "timeout_secs": 5,
            "max_attempts": 2,
            "backoff_ms": 1
        }},
        "ndvi": {{
            "red_band": 0,
            "nir_band": 3,
            "nodata_value": -9999.0
        }}
    }}
    "#,
            output_dir.display()
        );
        serde_json::from_str(&json).unwrap()
    }

    fn square_region() -> Region {
        Region {
            id: 1,
            name: "Test Park".to_string(),
            crs: 3857,
            geometry: vec![vec![
                [0.0, 0.0],
                [1000.0, 0.0],
                [1000.0, 1000.0],
                [0.0, 1000.0],
            ]],
        }
    }

    /// Returns the same fixed tile payload for every request, optionally
    /// failing permanently on one scripted call index.
    struct ScriptedClient {
        calls: RefCell<u32>,
        fail_on_call: Option<u32>,
        payload: Vec<u8>,
    }

    impl ScriptedClient {
        fn always_ok() -> Self {
            ScriptedClient {
                calls: RefCell::new(0),
                fail_on_call: None,
                payload: test_support::uniform_tile_bytes(25, 75),
            }
        }

        fn failing_on(call: u32) -> Self {
            ScriptedClient {
                fail_on_call: Some(call),
                ..Self::always_ok()
            }
        }
    }

    impl ImageryClient for ScriptedClient {
        fn export_image(&self, _request: &ImageRequest) -> Result<Vec<u8>, FetchError> {
            *self.calls.borrow_mut() += 1;
            if Some(*self.calls.borrow()) == self.fail_on_call {
                // 404 is permanent, so one call maps to one tile
                return Err(FetchError::Status(404));
            }
            Ok(self.payload.clone())
        }
    }

    #[test]
    fn test_all_tiles_reach_done() {
        let dir = TempDir::new().unwrap();
        let pipeline = TilePipeline::new(ScriptedClient::always_ok(), test_config(dir.path()));

        let report = pipeline.run(&square_region()).unwrap();

        assert_eq!(report.done_count(), 4);
        assert_eq!(report.failed_count(), 0);
        for tile in &report.tiles {
            assert_eq!(tile.state, TileState::Done);
            assert!(tile.output.as_ref().unwrap().exists());
        }
    }

    #[test]
    fn test_output_files_are_deterministic_across_runs() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let region = square_region();

        let pipeline = TilePipeline::new(ScriptedClient::always_ok(), config.clone());
        let first = pipeline.run(&region).unwrap();
        let first_bytes: Vec<Vec<u8>> = first
            .tiles
            .iter()
            .map(|t| std::fs::read(t.output.as_ref().unwrap()).unwrap())
            .collect();

        let pipeline = TilePipeline::new(ScriptedClient::always_ok(), config);
        let second = pipeline.run(&region).unwrap();
        let second_bytes: Vec<Vec<u8>> = second
            .tiles
            .iter()
            .map(|t| std::fs::read(t.output.as_ref().unwrap()).unwrap())
            .collect();

        assert_eq!(first_bytes, second_bytes);

        // Identical band inputs give bitwise-identical NDVI values in every
        // tile, even though the georeferencing tags differ per tile.
        let pixel_values: Vec<Vec<u8>> = first_bytes
            .iter()
            .map(|bytes| {
                let grid = raster::decode(bytes).unwrap();
                (0..grid.pixel_count())
                    .flat_map(|p| grid.sample(0, p).to_le_bytes())
                    .collect()
            })
            .collect();
        assert!(pixel_values.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_one_failing_tile_does_not_poison_the_run() {
        let dir = TempDir::new().unwrap();
        let pipeline = TilePipeline::new(ScriptedClient::failing_on(2), test_config(dir.path()));

        let report = pipeline.run(&square_region()).unwrap();

        assert_eq!(report.done_count(), 3);
        assert_eq!(report.failed_count(), 1);

        let failure = report.failures().next().unwrap();
        assert_eq!(failure.key, "1_000_001");
        assert_eq!(failure.error_category.as_deref(), Some("fetch"));
    }

    #[test]
    fn test_processing_failure_is_isolated_too() {
        // Single-band payload decodes fine (so it survives fetch validation)
        // but has no NIR band to compute with.
        let mut buffer = std::io::Cursor::new(Vec::new());
        let mut encoder = tiff::encoder::TiffEncoder::new(&mut buffer).unwrap();
        encoder
            .write_image::<tiff::encoder::colortype::Gray8>(2, 2, &[1, 2, 3, 4])
            .unwrap();

        let client = ScriptedClient {
            calls: RefCell::new(0),
            fail_on_call: None,
            payload: buffer.into_inner(),
        };

        let dir = TempDir::new().unwrap();
        let pipeline = TilePipeline::new(client, test_config(dir.path()));
        let report = pipeline.run(&square_region()).unwrap();

        assert_eq!(report.done_count(), 0);
        assert_eq!(report.failed_count(), 4);
        for failure in report.failures() {
            assert_eq!(failure.error_category.as_deref(), Some("raster"));
        }
    }

    #[test]
    fn test_every_tile_reaches_a_terminal_state() {
        let dir = TempDir::new().unwrap();
        let pipeline = TilePipeline::new(ScriptedClient::failing_on(3), test_config(dir.path()));

        let report = pipeline.run(&square_region()).unwrap();

        assert_eq!(report.tiles.len(), 4);
        for tile in &report.tiles {
            assert!(matches!(tile.state, TileState::Done | TileState::Failed));
        }
    }

    #[test]
    fn test_region_crs_must_match_request_crs() {
        let dir = TempDir::new().unwrap();
        let pipeline = TilePipeline::new(ScriptedClient::always_ok(), test_config(dir.path()));

        // NAD83 / Conus Albers region against a Web Mercator service
        let mut region = square_region();
        region.crs = 5070;

        let result = pipeline.run(&region);
        assert!(matches!(
            result,
            Err(InvalidRegionError::CrsMismatch {
                region_crs: 5070,
                request_crs: 3857,
            })
        ));
        assert_eq!(*pipeline.fetcher.client().calls.borrow(), 0);
    }

    #[test]
    fn test_exhausted_processing_deadline_fails_the_tile_as_timeout() {
        let dir = TempDir::new().unwrap();
        let pipeline = TilePipeline::new(ScriptedClient::always_ok(), test_config(dir.path()));
        let region = square_region();
        let tile = tiling::generate_tiles(&region, 500.0).unwrap().remove(0);

        let backdated = Instant::now() - Duration::from_secs(60);
        let result = pipeline.process_tile(
            &region,
            &tile,
            &test_support::uniform_tile_bytes(25, 75),
            backdated,
        );

        let error = result.unwrap_err();
        assert_eq!(error.category(), "timeout");

        let mut record = TileRecord::new(tile);
        record.transition(TileState::Processing);
        record.fail(error);
        assert_eq!(record.state, TileState::Failed);
        assert!(matches!(record.error, Some(TileError::Timeout(_))));
    }

    #[test]
    fn test_fresh_processing_clock_stays_within_deadline() {
        let dir = TempDir::new().unwrap();
        let pipeline = TilePipeline::new(ScriptedClient::always_ok(), test_config(dir.path()));
        let region = square_region();
        let tile = tiling::generate_tiles(&region, 500.0).unwrap().remove(0);

        let result = pipeline.process_tile(
            &region,
            &tile,
            &test_support::uniform_tile_bytes(25, 75),
            Instant::now(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_region_aborts_before_any_tile_work() {
        let dir = TempDir::new().unwrap();
        let pipeline = TilePipeline::new(ScriptedClient::always_ok(), test_config(dir.path()));

        let mut region = square_region();
        region.geometry.clear();

        assert!(pipeline.run(&region).is_err());
        assert_eq!(*pipeline.fetcher.client().calls.borrow(), 0);
    }

    #[test]
    fn test_report_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let pipeline = TilePipeline::new(ScriptedClient::failing_on(1), test_config(dir.path()));

        let report = pipeline.run(&square_region()).unwrap();
        let path = report.write_json(dir.path()).unwrap();

        let written: serde_json::Value =
            serde_json::from_reader(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(written["region_id"], 1);
        assert_eq!(written["tiles"].as_array().unwrap().len(), 4);
        assert_eq!(written["tiles"][0]["state"], "FAILED");
        assert_eq!(written["tiles"][1]["state"], "DONE");
    }
}
