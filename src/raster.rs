use std::fmt;
use std::io::Cursor;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

#[derive(Debug)]
pub enum RasterFormatError {
    Decode(String),
    TooFewBands(usize),
    BandOutOfRange { band: usize, bands: usize },
    UnsupportedSampleFormat,
}

impl fmt::Display for RasterFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterFormatError::Decode(e) => write!(f, "Failed to decode raster: {}", e),
            RasterFormatError::TooFewBands(n) => {
                write!(f, "Raster has {} band(s), at least 2 are required", n)
            }
            RasterFormatError::BandOutOfRange { band, bands } => write!(
                f,
                "Band index {} is out of range for a {}-band raster",
                band, bands
            ),
            RasterFormatError::UnsupportedSampleFormat => {
                write!(f, "Unsupported pixel sample format")
            }
        }
    }
}

impl std::error::Error for RasterFormatError {}

/// A decoded raster held as interleaved f32 samples (band-interleaved by
/// pixel, the TIFF chunky layout).
#[derive(Debug)]
pub struct RasterGrid {
    pub width: u32,
    pub height: u32,
    pub bands: usize,
    samples: Vec<f32>,
}

impl RasterGrid {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Sample of `band` at flat pixel index `pixel` (row-major, top-down).
    pub fn sample(&self, band: usize, pixel: usize) -> f32 {
        self.samples[pixel * self.bands + band]
    }

    pub fn check_band(&self, band: usize) -> Result<(), RasterFormatError> {
        if self.bands < 2 {
            return Err(RasterFormatError::TooFewBands(self.bands));
        }
        if band >= self.bands {
            return Err(RasterFormatError::BandOutOfRange {
                band,
                bands: self.bands,
            });
        }
        Ok(())
    }

    /// Pixel width over height, for comparison against the requested extent.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Decode an in-memory TIFF payload into a [`RasterGrid`], widening all
/// integer sample formats to f32.
pub fn decode(bytes: &[u8]) -> Result<RasterGrid, RasterFormatError> {
    let reader = Cursor::new(bytes);

    let mut decoder =
        Decoder::new(reader).map_err(|e| RasterFormatError::Decode(format!("{}", e)))?;

    let (width, height) = decoder
        .dimensions()
        .map_err(|e| RasterFormatError::Decode(format!("Failed to get dimensions: {}", e)))?;

    // SamplesPerPixel defaults to 1 when the tag is absent.
    let bands = decoder
        .find_tag(Tag::SamplesPerPixel)
        .map_err(|e| RasterFormatError::Decode(format!("Failed to read tag: {}", e)))?
        .map(|v| v.into_u16())
        .transpose()
        .map_err(|e| RasterFormatError::Decode(format!("Bad SamplesPerPixel: {}", e)))?
        .unwrap_or(1) as usize;

    let samples: Vec<f32> = match decoder
        .read_image()
        .map_err(|e| RasterFormatError::Decode(format!("Failed to read image: {}", e)))?
    {
        DecodingResult::U8(data) => data.iter().map(|&x| x as f32).collect(),
        DecodingResult::U16(data) => data.iter().map(|&x| x as f32).collect(),
        DecodingResult::U32(data) => data.iter().map(|&x| x as f32).collect(),
        DecodingResult::I8(data) => data.iter().map(|&x| x as f32).collect(),
        DecodingResult::I16(data) => data.iter().map(|&x| x as f32).collect(),
        DecodingResult::I32(data) => data.iter().map(|&x| x as f32).collect(),
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.iter().map(|&x| x as f32).collect(),
        _ => return Err(RasterFormatError::UnsupportedSampleFormat),
    };

    let expected = width as usize * height as usize * bands;
    if samples.len() != expected {
        return Err(RasterFormatError::Decode(format!(
            "Sample count {} does not match {}x{}x{} bands",
            samples.len(),
            width,
            height,
            bands
        )));
    }

    Ok(RasterGrid {
        width,
        height,
        bands,
        samples,
    })
}

#[cfg(test)]
pub mod test_support {
    use tiff::encoder::{TiffEncoder, colortype};

    /// Encode an interleaved RGBA8 buffer into TIFF bytes, standing in for
    /// the 4-band imagery (R, G, B, NIR) the imagery service returns.
    pub fn rgba_tiff_bytes(width: u32, height: u32, samples: &[u8]) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut buffer).unwrap();
        encoder
            .write_image::<colortype::RGBA8>(width, height, samples)
            .unwrap();
        buffer.into_inner()
    }

    /// A 2x2 RGBA tile where every pixel has the given red and NIR values.
    pub fn uniform_tile_bytes(red: u8, nir: u8) -> Vec<u8> {
        let pixel = [red, 0, 0, nir];
        let samples: Vec<u8> = pixel.iter().copied().cycle().take(16).collect();
        rgba_tiff_bytes(2, 2, &samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rgba_payload() {
        let samples: Vec<u8> = (0..2 * 3 * 4).map(|i| i as u8).collect();
        let bytes = test_support::rgba_tiff_bytes(2, 3, &samples);

        let grid = decode(&bytes).unwrap();
        assert_eq!(grid.width, 2);
        assert_eq!(grid.height, 3);
        assert_eq!(grid.bands, 4);
        assert_eq!(grid.pixel_count(), 6);

        // First pixel: samples 0..4
        assert_eq!(grid.sample(0, 0), 0.0);
        assert_eq!(grid.sample(3, 0), 3.0);
        // Second pixel starts at sample 4
        assert_eq!(grid.sample(0, 1), 4.0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode(b"not a tiff at all");
        assert!(matches!(result, Err(RasterFormatError::Decode(_))));
    }

    #[test]
    fn test_check_band_bounds() {
        let bytes = test_support::uniform_tile_bytes(10, 20);
        let grid = decode(&bytes).unwrap();

        assert!(grid.check_band(0).is_ok());
        assert!(grid.check_band(3).is_ok());
        assert!(matches!(
            grid.check_band(4),
            Err(RasterFormatError::BandOutOfRange { band: 4, bands: 4 })
        ));
    }

    #[test]
    fn test_aspect_ratio() {
        let samples = vec![0u8; 4 * 2 * 4];
        let bytes = test_support::rgba_tiff_bytes(4, 2, &samples);
        let grid = decode(&bytes).unwrap();
        assert_eq!(grid.aspect_ratio(), 2.0);
    }
}
