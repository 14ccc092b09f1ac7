use serde::Serialize;

use crate::bbox::Bbox;
use crate::region::{InvalidRegionError, Region};

/// One cell of the regular grid laid over a region's bounding box.
///
/// Rows count down from the top of the box (row 0 touches `maxy`), matching
/// the top-down pixel ordering of north-up rasters. Columns count left to
/// right from `minx`. Edge tiles are clamped to the bounding box, so the
/// tiles of a region cover the box exactly with no gaps or overlaps beyond
/// shared edges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileSpec {
    pub region_id: u32,
    pub row: u32,
    pub col: u32,
    pub bounds: Bbox,
    pub tile_size: f64,
}

impl TileSpec {
    /// Stable identity of a tile within a run; output paths derive from it,
    /// so re-runs overwrite rather than duplicate.
    pub fn key(&self) -> String {
        format!("{}_{:03}_{:03}", self.region_id, self.row, self.col)
    }
}

impl std::fmt::Display for TileSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tile {} (region {}, row {}, col {})",
            self.key(),
            self.region_id,
            self.row,
            self.col
        )
    }
}

/// Partition a region's bounding box into a row-major grid of tiles.
///
/// Pure function of its inputs: identical inputs yield the identical ordered
/// sequence, which is what makes tile indices usable for resuming a partial
/// run. Fails with [`InvalidRegionError`] before any tile is emitted when the
/// tile size is not positive or the bounding box is degenerate.
pub fn generate_tiles(region: &Region, tile_size: f64) -> Result<Vec<TileSpec>, InvalidRegionError> {
    if !tile_size.is_finite() || tile_size <= 0.0 {
        return Err(InvalidRegionError::BadTileSize(tile_size));
    }

    let bbox = region.bounding_box()?;

    let (rows, cols) = grid_shape(&bbox, tile_size);

    // Capacity in usize: the per-axis counts fit u32 but their product can
    // exceed it.
    let mut tiles = Vec::with_capacity(rows as usize * cols as usize);

    for row in 0..rows {
        for col in 0..cols {
            let minx = bbox.minx + col as f64 * tile_size;
            let maxy = bbox.maxy - row as f64 * tile_size;
            let maxx = (minx + tile_size).min(bbox.maxx);
            let miny = (maxy - tile_size).max(bbox.miny);

            // Constructor cannot fail here: the grid math keeps min <= max
            // and the source box is already validated as finite.
            let bounds = Bbox::new(minx, miny, maxx, maxy).map_err(InvalidRegionError::BadBounds)?;

            tiles.push(TileSpec {
                region_id: region.id,
                row,
                col,
                bounds,
                tile_size,
            });
        }
    }

    Ok(tiles)
}

/// Number of (rows, cols) needed to cover `bbox` with square tiles of
/// `tile_size`, each axis rounded up.
fn grid_shape(bbox: &Bbox, tile_size: f64) -> (u32, u32) {
    let rows = (bbox.height() / tile_size).ceil() as u32;
    let cols = (bbox.width() / tile_size).ceil() as u32;
    (rows, cols)
}
