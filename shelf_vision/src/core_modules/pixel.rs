// THEORY:
// The `Pixel` module is the smallest unit of the engine: a "dumb" container for one RGB
// sample plus the handful of single-pixel heuristics the region analyzers need. Nothing
// here looks at neighbors; anything spatial (gradients, histograms, contours) lives in the
// extractors that consume regions.
//
// Only three heuristic families survive from the wider color toolbox because only they feed
// shelf decisions:
// - Brightness: Rec. 601 luma, the grayscale every intensity-based extractor works on.
// - Color strength: chroma and HSV saturation, used to ignore near-gray pixels when
//   measuring hue diversity.
// - Hue: angle on the color wheel, bucketed to estimate how many product colors are present.

pub type Channel = u8;
pub type Luminance = f64;
pub type Hue = f32;
pub type Chroma = f32;
pub type SaturationHSV = f32;

/// A single 8-bit RGB sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pixel {
    /// The red channel value (0-255).
    pub red: Channel,
    /// The green channel value (0-255).
    pub green: Channel,
    /// The blue channel value (0-255).
    pub blue: Channel,
}

impl Pixel {
    pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
        Self { red, green, blue }
    }

    /// A gray pixel with all three channels set to `value`.
    pub fn gray(value: Channel) -> Self {
        Self::new(value, value, value)
    }

    /// Luminance estimate (Rec. 601 luma) on the 0..255 scale.
    pub fn luminance(&self) -> Luminance {
        0.299_f64 * self.red as f64 + 0.587_f64 * self.green as f64 + 0.114_f64 * self.blue as f64
    }

    /// Luma rounded back into a byte, the value written into grayscale buffers.
    pub fn luma_byte(&self) -> u8 {
        self.luminance().round().clamp(0.0, 255.0) as u8
    }

    fn normalized(&self) -> (f32, f32, f32) {
        (
            self.red as f32 / 255.0,
            self.green as f32 / 255.0,
            self.blue as f32 / 255.0,
        )
    }

    /// Chroma: max(R,G,B) - min(R,G,B) on normalized channels.
    pub fn chroma(&self) -> Chroma {
        let (r, g, b) = self.normalized();
        r.max(g.max(b)) - r.min(g.min(b))
    }

    /// Saturation (HSV): chroma divided by value. Zero for black.
    pub fn saturation_hsv(&self) -> SaturationHSV {
        let (r, g, b) = self.normalized();
        let maximum_channel = r.max(g.max(b));
        if maximum_channel <= 1e-6 {
            return 0.0;
        }
        self.chroma() / maximum_channel
    }

    /// Hue angle in degrees [0, 360). Gray pixels report 0.
    pub fn hue(&self) -> Hue {
        let (r, g, b) = self.normalized();
        let maximum_channel = r.max(g.max(b));
        let chroma = self.chroma();
        if chroma <= 1e-6 {
            return 0.0;
        }

        let (base_difference, sector_offset) = if maximum_channel == r {
            (g - b, 0.0)
        } else if maximum_channel == g {
            (b - r, 2.0)
        } else {
            (r - g, 4.0)
        };

        let mut hue_degrees = (base_difference / chroma + sector_offset) * 60.0;
        if hue_degrees < 0.0 {
            hue_degrees += 360.0;
        }
        hue_degrees
    }
}

impl From<[u8; 3]> for Pixel {
    fn from(bytes: [u8; 3]) -> Self {
        Pixel::new(bytes[0], bytes[1], bytes[2])
    }
}

impl From<image::Rgb<u8>> for Pixel {
    fn from(rgb: image::Rgb<u8>) -> Self {
        Pixel::from(rgb.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luminance_weights_green_heaviest() {
        assert_eq!(Pixel::gray(240).luma_byte(), 240);
        assert!(Pixel::new(0, 255, 0).luminance() > Pixel::new(255, 0, 0).luminance());
        assert!(Pixel::new(255, 0, 0).luminance() > Pixel::new(0, 0, 255).luminance());
    }

    #[test]
    fn hue_lands_in_expected_sectors() {
        assert!(Pixel::new(255, 0, 0).hue().abs() < 1e-3);
        assert!((Pixel::new(0, 255, 0).hue() - 120.0).abs() < 1e-3);
        assert!((Pixel::new(0, 0, 255).hue() - 240.0).abs() < 1e-3);
        assert_eq!(Pixel::gray(90).hue(), 0.0);
    }

    #[test]
    fn gray_has_no_saturation() {
        assert_eq!(Pixel::gray(200).saturation_hsv(), 0.0);
        assert_eq!(Pixel::gray(0).saturation_hsv(), 0.0);
        assert!((Pixel::new(200, 0, 0).saturation_hsv() - 1.0).abs() < 1e-6);
    }
}
