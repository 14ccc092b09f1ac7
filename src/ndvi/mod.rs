use crate::config::NdviConfig;
use crate::raster::{RasterFormatError, RasterGrid};
use crate::tiling::TileSpec;

pub mod writer;
pub use writer::{PersistError, persist};

/// A computed NDVI grid for one tile, ready to be written out. Written once;
/// a re-run produces a fresh write of the same bytes rather than editing the
/// file in place.
#[derive(Debug)]
pub struct NdviRaster {
    pub tile: TileSpec,
    pub width: u32,
    pub height: u32,
    /// EPSG code of the projected CRS the tile bounds are expressed in.
    pub crs: u32,
    pub nodata: f32,
    pub values: Vec<f32>,
}

/// Compute per-pixel NDVI, `(NIR - RED) / (NIR + RED)`, from a fetched tile.
///
/// Pixels where the denominator is zero get the configured nodata value
/// instead of NaN or an infinity, so downstream tools can tell "no
/// measurement" apart from a true zero index. Values are otherwise left
/// unclamped.
pub fn compute_ndvi(
    grid: &RasterGrid,
    tile: &TileSpec,
    crs: u32,
    config: &NdviConfig,
) -> Result<NdviRaster, RasterFormatError> {
    grid.check_band(config.red_band)?;
    grid.check_band(config.nir_band)?;

    let mut values = Vec::with_capacity(grid.pixel_count());

    for pixel in 0..grid.pixel_count() {
        let red = grid.sample(config.red_band, pixel);
        let nir = grid.sample(config.nir_band, pixel);
        let sum = nir + red;

        if sum == 0.0 {
            values.push(config.nodata_value);
        } else {
            values.push((nir - red) / sum);
        }
    }

    Ok(NdviRaster {
        tile: tile.clone(),
        width: grid.width,
        height: grid.height,
        crs,
        nodata: config.nodata_value,
        values,
    })
}
