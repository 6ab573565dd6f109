use std::borrow::Cow;

use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, codecs::jpeg::JpegEncoder};

use super::Roi;
use crate::core::errors::{Error, Result};

const JPEG_QUALITY: u8 = 90;
const MARK_STROKE: u32 = 3;
const MARK_RGB: [u8; 3] = [0x00, 0xFF, 0x00];
const MARK_LUMA: u8 = 0x96;

/// Interleaved 8-bit pixels plus the region of the original frame they
/// were cut from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    buffer: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    crop: Roi,
}

impl RawImage {
    pub fn new(buffer: Vec<u8>, width: u32, height: u32, channels: u8) -> Result<Self> {
        if !(1..=4).contains(&channels) {
            return Err(Error::InvalidImage(format!(
                "unsupported channel count {channels}"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if buffer.len() != expected {
            return Err(Error::InvalidImage(format!(
                "buffer holds {} bytes, {width}x{height}x{channels} needs {expected}",
                buffer.len()
            )));
        }

        Ok(Self {
            buffer,
            width,
            height,
            channels,
            crop: Roi::new(0, 0, width, height),
        })
    }

    /// Decodes a JPEG frame. Grayscale stays single channel, everything
    /// else becomes RGB.
    pub fn from_jpeg(data: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
        let (width, height) = (decoded.width(), decoded.height());
        let (buffer, channels) = match decoded {
            DynamicImage::ImageLuma8(gray) => (gray.into_raw(), 1),
            other => (other.to_rgb8().into_raw(), 3),
        };
        Self::new(buffer, width, height, channels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Where this image sits in the frame it was first created from.
    pub fn crop_data(&self) -> Roi {
        self.crop
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Encodes to JPEG, dropping any alpha channel. An empty image encodes
    /// to an empty buffer.
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }

        let (pixels, color) = match self.channels {
            1 => (Cow::Borrowed(self.buffer.as_slice()), ExtendedColorType::L8),
            2 => (Cow::Owned(strip_alpha(&self.buffer, 2)), ExtendedColorType::L8),
            3 => (Cow::Borrowed(self.buffer.as_slice()), ExtendedColorType::Rgb8),
            _ => (Cow::Owned(strip_alpha(&self.buffer, 4)), ExtendedColorType::Rgb8),
        };

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).write_image(
            &pixels,
            self.width,
            self.height,
            color,
        )?;
        Ok(out)
    }

    /// Copies a sub-region into a new image.
    pub fn roi(&self, roi: &Roi) -> Result<RawImage> {
        self.check_bounds(roi)?;

        let channels = self.channels as usize;
        let row_len = roi.width as usize * channels;
        let mut buffer = Vec::with_capacity(row_len * roi.height as usize);
        for y in roi.top..roi.top + roi.height {
            let start = (y as usize * self.width as usize + roi.left as usize) * channels;
            buffer.extend_from_slice(&self.buffer[start..start + row_len]);
        }

        let mut crop = self.crop;
        crop.add(roi);
        Ok(RawImage {
            buffer,
            width: roi.width,
            height: roi.height,
            channels: self.channels,
            crop,
        })
    }

    /// Crops in place.
    pub fn crop(&mut self, roi: &Roi) -> Result<()> {
        *self = self.roi(roi)?;
        Ok(())
    }

    /// Outlines `roi` with a green stroke, clipped to the image.
    pub fn mark_roi(&mut self, roi: &Roi) {
        if roi.is_empty() || self.buffer.is_empty() {
            return;
        }

        let roi_right = roi.left.saturating_add(roi.width);
        let roi_bottom = roi.top.saturating_add(roi.height);
        let stroke = MARK_STROKE.min(roi.width).min(roi.height);

        for y in roi.top..roi_bottom.min(self.height) {
            for x in roi.left..roi_right.min(self.width) {
                let on_edge = x < roi.left + stroke
                    || y < roi.top + stroke
                    || x + stroke >= roi_right
                    || y + stroke >= roi_bottom;
                if on_edge {
                    self.paint(x, y);
                }
            }
        }
    }

    /// Releases the pixel buffer.
    pub fn clear(&mut self) {
        self.buffer = Vec::new();
        self.width = 0;
        self.height = 0;
        self.channels = 0;
    }

    fn paint(&mut self, x: u32, y: u32) {
        let channels = self.channels as usize;
        let at = (y as usize * self.width as usize + x as usize) * channels;
        let pixel = &mut self.buffer[at..at + channels];
        if channels < 3 {
            pixel[0] = MARK_LUMA;
        } else {
            pixel[..3].copy_from_slice(&MARK_RGB);
        }
        if channels % 2 == 0 {
            pixel[channels - 1] = u8::MAX;
        }
    }

    fn check_bounds(&self, roi: &Roi) -> Result<()> {
        if roi.fits_within(self.width, self.height) {
            Ok(())
        } else {
            Err(Error::RoiOutOfBounds {
                roi: *roi,
                width: self.width,
                height: self.height,
            })
        }
    }
}

fn strip_alpha(buffer: &[u8], channels: usize) -> Vec<u8> {
    buffer
        .chunks_exact(channels)
        .flat_map(|pixel| &pixel[..channels - 1])
        .copied()
        .collect()
}
