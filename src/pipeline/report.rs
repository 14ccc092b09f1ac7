use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{TileRecord, TileState};
use crate::region::Region;

/// Final state of one tile as surfaced to the caller.
#[derive(Debug, Serialize)]
pub struct TileSummary {
    pub key: String,
    pub row: u32,
    pub col: u32,
    pub state: TileState,
    pub error_category: Option<String>,
    pub error_detail: Option<String>,
    pub output: Option<PathBuf>,
}

/// Aggregate outcome of one orchestration run over a region; the single
/// source of truth for what succeeded and what failed. Read-only once built.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub region_id: u32,
    pub region_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tiles: Vec<TileSummary>,
}

impl RunReport {
    pub fn new(
        region: &Region,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        records: Vec<TileRecord>,
    ) -> Self {
        let tiles = records
            .into_iter()
            .map(|record| TileSummary {
                key: record.tile.key(),
                row: record.tile.row,
                col: record.tile.col,
                state: record.state,
                error_category: record.error.as_ref().map(|e| e.category().to_string()),
                error_detail: record.error.as_ref().map(|e| e.to_string()),
                output: record.output,
            })
            .collect();

        RunReport {
            region_id: region.id,
            region_name: region.name.clone(),
            started_at,
            finished_at,
            tiles,
        }
    }

    pub fn done_count(&self) -> usize {
        self.tiles
            .iter()
            .filter(|t| t.state == TileState::Done)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.tiles
            .iter()
            .filter(|t| t.state == TileState::Failed)
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TileSummary> {
        self.tiles.iter().filter(|t| t.state == TileState::Failed)
    }

    /// Serialize the report as JSON next to the rasters it describes.
    pub fn write_json(&self, output_dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!("run_report_{}.json", self.region_id));
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(path)
    }
}
