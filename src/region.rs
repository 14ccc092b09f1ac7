use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::bbox::Bbox;

/// A polygonal region of interest, already reprojected by the upstream vector
/// pipeline into a linear-unit CRS. `geometry` holds one exterior ring per
/// polygon part (a single-element vec for a plain polygon).
#[derive(Debug, Clone, Deserialize)]
pub struct Region {
    pub id: u32,
    pub name: String,
    /// EPSG code of the projected CRS the ring coordinates are expressed in.
    pub crs: u32,
    pub geometry: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug)]
pub enum InvalidRegionError {
    EmptyGeometry,
    NonFiniteCoordinate,
    DegenerateExtent { width: f64, height: f64 },
    CrsMismatch { region_crs: u32, request_crs: u32 },
    BadBounds(String),
    BadTileSize(f64),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for InvalidRegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidRegionError::EmptyGeometry => write!(f, "Region has no vertices"),
            InvalidRegionError::NonFiniteCoordinate => {
                write!(f, "Region contains a non-finite coordinate")
            }
            InvalidRegionError::DegenerateExtent { width, height } => write!(
                f,
                "Region bounding box is degenerate: width={}, height={}",
                width, height
            ),
            InvalidRegionError::CrsMismatch {
                region_crs,
                request_crs,
            } => write!(
                f,
                "Region CRS EPSG:{} does not match the imagery request CRS EPSG:{}",
                region_crs, request_crs
            ),
            InvalidRegionError::BadBounds(e) => write!(f, "Invalid region bounds: {}", e),
            InvalidRegionError::BadTileSize(s) => {
                write!(f, "Tile size must be a positive finite number, got {}", s)
            }
            InvalidRegionError::Io(e) => write!(f, "I/O error reading regions: {}", e),
            InvalidRegionError::Json(e) => write!(f, "Failed to parse regions JSON: {}", e),
        }
    }
}

impl std::error::Error for InvalidRegionError {}

impl From<std::io::Error> for InvalidRegionError {
    fn from(err: std::io::Error) -> InvalidRegionError {
        InvalidRegionError::Io(err)
    }
}

impl From<serde_json::Error> for InvalidRegionError {
    fn from(err: serde_json::Error) -> InvalidRegionError {
        InvalidRegionError::Json(err)
    }
}

impl Region {
    /// Load regions from a JSON file produced by the vector preprocessing
    /// step (an array of region objects).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Vec<Region>, InvalidRegionError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let regions: Vec<Region> = serde_json::from_reader(reader)?;
        Ok(regions)
    }

    /// Minimal axis-aligned rectangle containing every vertex of the region.
    pub fn bounding_box(&self) -> Result<Bbox, InvalidRegionError> {
        let mut vertices = self.geometry.iter().flatten();

        let Some(first) = vertices.next() else {
            return Err(InvalidRegionError::EmptyGeometry);
        };

        let (mut minx, mut miny) = (first[0], first[1]);
        let (mut maxx, mut maxy) = (first[0], first[1]);

        for [x, y] in std::iter::once(first).chain(vertices) {
            if !x.is_finite() || !y.is_finite() {
                return Err(InvalidRegionError::NonFiniteCoordinate);
            }
            minx = minx.min(*x);
            miny = miny.min(*y);
            maxx = maxx.max(*x);
            maxy = maxy.max(*y);
        }

        let bbox = Bbox::new(minx, miny, maxx, maxy).map_err(InvalidRegionError::BadBounds)?;

        if bbox.is_degenerate() {
            return Err(InvalidRegionError::DegenerateExtent {
                width: bbox.width(),
                height: bbox.height(),
            });
        }

        Ok(bbox)
    }
}
