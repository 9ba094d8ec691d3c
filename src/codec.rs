use image::{codecs::jpeg::JpegEncoder, ExtendedColorType, ImageEncoder, RgbImage};
use thiserror::Error;

pub const DEFAULT_JPEG_QUALITY: u8 = 75;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JPEG quality must be within 1..=100, got {0}")]
    InvalidQuality(u8),
    #[error("Failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Lossy transport encoding for the envelope image field.
pub trait ImageCodec: Send + Sync {
    fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, CodecError>;
}

#[derive(Debug, Clone, Copy)]
pub struct JpegCodec {
    quality: u8,
}

impl JpegCodec {
    pub fn new(quality: u8) -> Result<Self, CodecError> {
        if !(1..=100).contains(&quality) {
            return Err(CodecError::InvalidQuality(quality));
        }
        Ok(Self { quality })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl ImageCodec for JpegCodec {
    fn encode(&self, image: &RgbImage) -> Result<Vec<u8>, CodecError> {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, self.quality).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_encode_produces_jpeg() {
        let img = RgbImage::from_pixel(32, 32, Rgb([12, 200, 40]));
        let bytes = JpegCodec::default().encode(&img).unwrap();

        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let img = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]));
        let high = JpegCodec::new(95).unwrap().encode(&img).unwrap();
        let low = JpegCodec::new(10).unwrap().encode(&img).unwrap();

        assert!(low.len() < high.len());
    }

    #[test]
    fn test_rejects_out_of_range_quality() {
        assert!(matches!(JpegCodec::new(0), Err(CodecError::InvalidQuality(0))));
        assert!(matches!(
            JpegCodec::new(101),
            Err(CodecError::InvalidQuality(101))
        ));
    }
}
