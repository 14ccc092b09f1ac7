use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in a projected, linear-unit CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl Bbox {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Result<Self, String> {
        if ![minx, miny, maxx, maxy].iter().all(|v| v.is_finite()) {
            return Err("Bounding box coordinates must be finite".to_string());
        }

        if minx > maxx || miny > maxy {
            return Err("Min values must be <= max values".to_string());
        }

        Ok(Bbox {
            minx,
            miny,
            maxx,
            maxy,
        })
    }

    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// A box with zero width or height cannot be tiled.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Width over height, used to sanity-check fetched imagery.
    pub fn aspect_ratio(&self) -> f64 {
        self.width() / self.height()
    }
}

impl std::fmt::Display for Bbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{},{},{}", self.minx, self.miny, self.maxx, self.maxy)
    }
}
