// THEORY:
// The `Region` module is the bridge between raw frame bytes and the analyzers. A `Region` is
// a "dumb" data container: a width, a height, a channel count and the interleaved 8-bit
// samples. It knows how to present itself in the two forms the extractors consume
// (grayscale luma and RGB) and how to cut a section's pixels out of a larger frame, but it
// makes no judgement about what those pixels mean.
//
// Key architectural principles:
// 1.  **Validated at the door**: every constructor checks the buffer length against the
//     declared dimensions, so no extractor ever indexes out of bounds. Invalid input becomes
//     a `RegionError`, which the engine turns into a canned "input error" result.
// 2.  **Layout agnostic**: 1 (gray), 2 (gray+alpha), 3 (RGB) and 4 (RGBA) channel buffers
//     are accepted. Grayscale is always available; an RGB view is only available for layouts
//     that actually carry color or plain gray.
// 3.  **Geometry extraction**: rectangles are clipped crops; quadrilaterals are warped
//     plane-by-plane through a projective transform into an upright rectangle.

use crate::core_modules::pixel::Pixel;
use crate::core_modules::section::SectionGeometry;
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use thiserror::Error;

pub const MAX_CHANNELS: u8 = 4;

/// Why a buffer or geometry could not be turned into an analyzable region.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegionError {
    #[error("region buffer is empty")]
    Empty,
    #[error("buffer holds {actual} bytes but {width}x{height}x{channels} needs {expected}")]
    LengthMismatch {
        width: u32,
        height: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },
    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u8),
    #[error("region {width}x{height} is below the {min}px minimum")]
    TooSmall { width: u32, height: u32, min: u32 },
    #[error("section geometry is degenerate")]
    DegenerateGeometry,
    #[error("section geometry lies outside the {frame_width}x{frame_height} frame")]
    OutOfFrame { frame_width: u32, frame_height: u32 },
}

/// A block of interleaved 8-bit pixels, either a full frame or one section of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl Region {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self, RegionError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(RegionError::UnsupportedChannels(channels));
        }
        let expected = width as usize * height as usize * channels as usize;
        if expected == 0 || data.is_empty() {
            return Err(RegionError::Empty);
        }
        if data.len() != expected {
            return Err(RegionError::LengthMismatch {
                width,
                height,
                channels,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// A region where every pixel holds the same sample values.
    pub fn filled(width: u32, height: u32, sample: &[u8]) -> Result<Self, RegionError> {
        let pixel_count = width as usize * height as usize;
        let data = sample.repeat(pixel_count);
        Self::new(width, height, sample.len() as u8, data)
    }

    pub fn from_gray(image: GrayImage) -> Result<Self, RegionError> {
        let (width, height) = image.dimensions();
        Self::new(width, height, 1, image.into_raw())
    }

    pub fn from_rgb(image: RgbImage) -> Result<Self, RegionError> {
        let (width, height) = image.dimensions();
        Self::new(width, height, 3, image.into_raw())
    }

    /// Converts a decoded image, keeping its layout when it is 8-bit and falling back to RGBA.
    pub fn from_dynamic(image: &DynamicImage) -> Result<Self, RegionError> {
        let (width, height) = (image.width(), image.height());
        match image {
            DynamicImage::ImageLuma8(buffer) => Self::new(width, height, 1, buffer.as_raw().clone()),
            DynamicImage::ImageLumaA8(buffer) => Self::new(width, height, 2, buffer.as_raw().clone()),
            DynamicImage::ImageRgb8(buffer) => Self::new(width, height, 3, buffer.as_raw().clone()),
            other => Self::new(width, height, 4, other.to_rgba8().into_raw()),
        }
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

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Rejects regions whose width or height is below `min`.
    pub fn ensure_min_size(&self, min: u32) -> Result<(), RegionError> {
        if self.width < min || self.height < min {
            return Err(RegionError::TooSmall {
                width: self.width,
                height: self.height,
                min,
            });
        }
        Ok(())
    }

    fn pixel_at_index(&self, index: usize) -> Pixel {
        let start = index * self.channels as usize;
        let sample = &self.data[start..start + self.channels as usize];
        match self.channels {
            1 | 2 => Pixel::gray(sample[0]),
            _ => Pixel::new(sample[0], sample[1], sample[2]),
        }
    }

    /// Rec. 601 luma view. Available for every supported layout.
    pub fn to_gray(&self) -> GrayImage {
        let luma: Vec<u8> = match self.channels {
            1 => self.data.clone(),
            2 => self.data.chunks_exact(2).map(|s| s[0]).collect(),
            _ => (0..self.pixel_count())
                .map(|i| self.pixel_at_index(i).luma_byte())
                .collect(),
        };
        GrayImage::from_raw(self.width, self.height, luma)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    /// RGB view. Gray input is replicated across channels; gray+alpha input has no
    /// meaningful color and is rejected.
    pub fn to_rgb(&self) -> Result<RgbImage, RegionError> {
        let rgb: Vec<u8> = match self.channels {
            1 => self.data.iter().flat_map(|&v| [v, v, v]).collect(),
            3 => self.data.clone(),
            4 => self
                .data
                .chunks_exact(4)
                .flat_map(|s| [s[0], s[1], s[2]])
                .collect(),
            other => return Err(RegionError::UnsupportedChannels(other)),
        };
        RgbImage::from_raw(self.width, self.height, rgb).ok_or(RegionError::LengthMismatch {
            width: self.width,
            height: self.height,
            channels: 3,
            expected: self.pixel_count() * 3,
            actual: 0,
        })
    }

    /// Copies out an axis-aligned block, clipped to this region's bounds.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Region, RegionError> {
        if x >= self.width || y >= self.height {
            return Err(RegionError::OutOfFrame {
                frame_width: self.width,
                frame_height: self.height,
            });
        }
        let clipped_width = width.min(self.width - x);
        let clipped_height = height.min(self.height - y);
        if clipped_width == 0 || clipped_height == 0 {
            return Err(RegionError::DegenerateGeometry);
        }

        let stride = self.width as usize * self.channels as usize;
        let row_bytes = clipped_width as usize * self.channels as usize;
        let mut data = Vec::with_capacity(row_bytes * clipped_height as usize);
        for row in y..y + clipped_height {
            let start = row as usize * stride + x as usize * self.channels as usize;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        Region::new(clipped_width, clipped_height, self.channels, data)
    }

    /// Cuts the pixels described by `geometry` out of this frame.
    pub fn extract(&self, geometry: &SectionGeometry) -> Result<Region, RegionError> {
        match geometry {
            SectionGeometry::Rect {
                x,
                y,
                width,
                height,
            } => self.crop(*x, *y, *width, *height),
            SectionGeometry::Quad { corners } => {
                let finite = corners.iter().all(|c| c.x.is_finite() && c.y.is_finite());
                if !finite || geometry.area() < 1.0 {
                    return Err(RegionError::DegenerateGeometry);
                }
                let inside = corners.iter().any(|c| {
                    c.x >= 0.0 && c.y >= 0.0 && c.x < self.width as f32 && c.y < self.height as f32
                });
                if !inside {
                    return Err(RegionError::OutOfFrame {
                        frame_width: self.width,
                        frame_height: self.height,
                    });
                }

                // A quad reaching far past the frame is resampled down to at most frame size.
                let (out_width, out_height) = geometry.output_size();
                let (out_width, out_height) = (out_width.min(self.width), out_height.min(self.height));
                if out_width == 0 || out_height == 0 {
                    return Err(RegionError::DegenerateGeometry);
                }
                let from = corners.map(|c| (c.x, c.y));
                let (w, h) = (out_width as f32, out_height as f32);
                let to = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
                let projection =
                    Projection::from_control_points(from, to).ok_or(RegionError::DegenerateGeometry)?;
                self.warp_planes(&projection, out_width, out_height)
            }
        }
    }

    /// Warps each channel plane separately and re-interleaves the result.
    fn warp_planes(
        &self,
        projection: &Projection,
        out_width: u32,
        out_height: u32,
    ) -> Result<Region, RegionError> {
        let channels = self.channels as usize;
        let mut warped_planes = Vec::with_capacity(channels);
        for channel in 0..channels {
            let plane: Vec<u8> = self.data.iter().skip(channel).step_by(channels).copied().collect();
            let plane = GrayImage::from_raw(self.width, self.height, plane).ok_or(RegionError::Empty)?;
            let mut out = GrayImage::new(out_width, out_height);
            warp_into(&plane, projection, Interpolation::Bilinear, Luma([0u8]), &mut out);
            warped_planes.push(out.into_raw());
        }

        let pixel_count = out_width as usize * out_height as usize;
        let mut data = Vec::with_capacity(pixel_count * channels);
        for i in 0..pixel_count {
            for plane in &warped_planes {
                data.push(plane[i]);
            }
        }
        Region::new(out_width, out_height, self.channels, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::section::FramePoint;

    #[test]
    fn rejects_mismatched_buffers() {
        let err = Region::new(4, 4, 3, vec![0; 10]).unwrap_err();
        assert!(matches!(err, RegionError::LengthMismatch { expected: 48, actual: 10, .. }));
        assert_eq!(Region::new(0, 4, 3, vec![]).unwrap_err(), RegionError::Empty);
        assert_eq!(
            Region::new(2, 2, 5, vec![0; 20]).unwrap_err(),
            RegionError::UnsupportedChannels(5)
        );
    }

    #[test]
    fn gray_view_uses_luma() {
        let region = Region::filled(3, 2, &[255, 0, 0]).unwrap();
        let gray = region.to_gray();
        assert_eq!(gray.dimensions(), (3, 2));
        assert_eq!(gray.get_pixel(0, 0)[0], Pixel::new(255, 0, 0).luma_byte());
    }

    #[test]
    fn gray_alpha_has_no_rgb_view() {
        let region = Region::filled(4, 4, &[128, 255]).unwrap();
        assert_eq!(region.to_gray().get_pixel(1, 1)[0], 128);
        assert_eq!(region.to_rgb().unwrap_err(), RegionError::UnsupportedChannels(2));
    }

    #[test]
    fn crop_clips_to_frame() {
        let mut data = Vec::new();
        for y in 0..10u8 {
            for x in 0..10u8 {
                data.push(y * 10 + x);
            }
        }
        let frame = Region::new(10, 10, 1, data).unwrap();
        let crop = frame.crop(8, 7, 5, 5).unwrap();
        assert_eq!((crop.width(), crop.height()), (2, 3));
        assert_eq!(crop.data()[0], 78);
        assert!(matches!(frame.crop(10, 0, 2, 2), Err(RegionError::OutOfFrame { .. })));
    }

    #[test]
    fn quad_extraction_flattens_to_output_size() {
        let frame = Region::filled(200, 200, &[90, 120, 200]).unwrap();
        let geometry = SectionGeometry::Quad {
            corners: [
                FramePoint::new(20.0, 30.0),
                FramePoint::new(140.0, 20.0),
                FramePoint::new(150.0, 110.0),
                FramePoint::new(25.0, 100.0),
            ],
        };
        let section = frame.extract(&geometry).unwrap();
        assert_eq!((section.width(), section.height()), geometry.output_size());
        assert_eq!(section.channels(), 3);
        let centre = section.to_rgb().unwrap();
        let (w, h) = centre.dimensions();
        let sample = centre.get_pixel(w / 2, h / 2).0;
        for (got, want) in sample.iter().zip([90u8, 120, 200]) {
            assert!(got.abs_diff(want) <= 1, "{sample:?}");
        }
    }

    #[test]
    fn oversized_quad_is_bounded_by_frame() {
        let frame = Region::filled(100, 100, &[60, 60, 60]).unwrap();
        let geometry = SectionGeometry::Quad {
            corners: [
                FramePoint::new(10.0, 10.0),
                FramePoint::new(1e6, 10.0),
                FramePoint::new(1e6, 1e6),
                FramePoint::new(10.0, 1e6),
            ],
        };
        match frame.extract(&geometry) {
            Ok(section) => assert_eq!((section.width(), section.height()), (100, 100)),
            Err(err) => assert_eq!(err, RegionError::DegenerateGeometry),
        }

        let nan = SectionGeometry::Quad {
            corners: [
                FramePoint::new(10.0, 10.0),
                FramePoint::new(f32::NAN, 10.0),
                FramePoint::new(50.0, 50.0),
                FramePoint::new(10.0, 50.0),
            ],
        };
        assert_eq!(frame.extract(&nan).unwrap_err(), RegionError::DegenerateGeometry);
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        let frame = Region::filled(50, 50, &[0]).unwrap();
        let p = FramePoint::new(10.0, 10.0);
        let geometry = SectionGeometry::Quad { corners: [p, p, p, p] };
        assert_eq!(frame.extract(&geometry).unwrap_err(), RegionError::DegenerateGeometry);
    }
}
