use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;

use super::NdviRaster;

// GeoTIFF tag IDs (not named in the tiff crate)
const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
const GEOTIFF_MODELTIEPOINT: u16 = 33922;
const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

// GeoKey IDs and values for a projected CRS
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const RASTER_PIXEL_IS_AREA: u16 = 1;

#[derive(Debug)]
pub enum PersistError {
    Io(std::io::Error),
    Encode(String),
    CrsCode(u32),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Io(e) => write!(f, "I/O error writing raster: {}", e),
            PersistError::Encode(e) => write!(f, "TIFF encoding error: {}", e),
            PersistError::CrsCode(code) => {
                write!(f, "CRS code {} does not fit a GeoTIFF geokey", code)
            }
        }
    }
}

impl std::error::Error for PersistError {}

impl From<std::io::Error> for PersistError {
    fn from(err: std::io::Error) -> PersistError {
        PersistError::Io(err)
    }
}

impl From<tiff::TiffError> for PersistError {
    fn from(err: tiff::TiffError) -> PersistError {
        PersistError::Encode(err.to_string())
    }
}

/// Convert a region name into a filesystem-safe slug: non-alphanumeric runs
/// become `_`, leading/trailing underscores are stripped, and the result is
/// lowercased.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_sep = false;

    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            slug.extend(c.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }

    slug.trim_matches('_').to_string()
}

/// Deterministic output filename for a tile's NDVI raster, derived from the
/// region name and the tile's grid position.
pub fn output_filename(region_name: &str, ndvi: &NdviRaster) -> String {
    format!(
        "{}_{:03}_{:03}_ndvi.tif",
        slugify(region_name),
        ndvi.tile.row,
        ndvi.tile.col
    )
}

/// Write an NDVI raster as a single-band float GeoTIFF into `output_dir`.
///
/// The file carries the tile's geotransform (pixel scale + tiepoint at the
/// top-left corner), the projected CRS code, and the nodata value, so any
/// GeoTIFF-aware tool can georeference it and mask missing pixels. The write
/// is uncompressed and carries no timestamps, so re-persisting identical
/// input produces a byte-identical file (truncating create, not an in-place
/// edit).
pub fn persist(
    ndvi: &NdviRaster,
    region_name: &str,
    output_dir: &Path,
) -> Result<PathBuf, PersistError> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join(output_filename(region_name, ndvi));
    let file = File::create(&path)?;
    let writer = BufWriter::new(file);

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<Gray32Float>(ndvi.width, ndvi.height)?;
    write_geotiff_tags(image.encoder(), ndvi)?;
    image.write_data(&ndvi.values)?;

    tracing::info!("NDVI raster saved to {}", path.display());

    Ok(path)
}

/// GeoTIFF geokey values are 16-bit. Well-known ESRI aliases of Web Mercator
/// are mapped to the EPSG code readers expect; any other code that does not
/// fit is rejected rather than truncated.
fn geokey_crs(crs: u32) -> Result<u16, PersistError> {
    match crs {
        102100 | 102113 | 900913 => Ok(3857),
        code if code <= u16::MAX as u32 => Ok(code as u16),
        code => Err(PersistError::CrsCode(code)),
    }
}

fn write_geotiff_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    ndvi: &NdviRaster,
) -> Result<(), PersistError> {
    let bounds = &ndvi.tile.bounds;
    let crs_code = geokey_crs(ndvi.crs)?;

    // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
    let pixel_scale = [
        bounds.width() / ndvi.width as f64,
        bounds.height() / ndvi.height as f64,
        0.0,
    ];
    dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), pixel_scale.as_slice())?;

    // ModelTiepoint: pixel (0, 0) sits at the top-left corner (minx, maxy)
    let tiepoint = [0.0, 0.0, 0.0, bounds.minx, bounds.maxy, 0.0];
    dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice())?;

    // GeoKeyDirectory: header + model type, raster type, projected CRS code
    let geokeys: [u16; 16] = [
        1,
        1,
        0,
        3,
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        MODEL_TYPE_PROJECTED,
        GT_RASTER_TYPE_GEO_KEY,
        0,
        1,
        RASTER_PIXEL_IS_AREA,
        PROJECTED_CS_TYPE_GEO_KEY,
        0,
        1,
        crs_code,
    ];
    dir.write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), geokeys.as_slice())?;

    // GDAL's nodata convention: the value as an ASCII string
    let nodata = ndvi.nodata.to_string();
    dir.write_tag(Tag::Unknown(GDAL_NODATA), nodata.as_bytes())?;

    Ok(())
}
