// Edge density: the fraction of pixels Canny marks as edges. imageproc blurs with sigma 1.4
// before taking Sobel gradients, so the hysteresis thresholds are on that smoothed scale.

use super::{ExtractError, Method, finite, inverse_score};
use crate::config::ExtractorConfig;
use image::GrayImage;
use imageproc::edges::canny;

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMeasure {
    pub edge_pixels: usize,
    pub density: f64,
    pub score: f64,
}

pub fn measure(gray: &GrayImage, config: &ExtractorConfig) -> Result<EdgeMeasure, ExtractError> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return Err(ExtractError::RegionTooSmall {
            method: Method::EdgeDensity,
            min: 3,
        });
    }

    let edges = canny(gray, config.canny_low, config.canny_high);
    let edge_pixels = edges.pixels().filter(|p| p[0] > 0).count();
    let area = width as f64 * height as f64;
    let density = finite(Method::EdgeDensity, edge_pixels as f64 / area)?;

    Ok(EdgeMeasure {
        edge_pixels,
        density,
        score: inverse_score(density, config.max_edge_density),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn flat_region_has_no_edges() {
        let gray = GrayImage::from_pixel(80, 80, Luma([128]));
        let m = measure(&gray, &ExtractorConfig::default()).unwrap();
        assert_eq!(m.edge_pixels, 0);
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn dense_stripes_saturate_the_score() {
        let gray = GrayImage::from_fn(120, 120, |x, _| {
            if (x / 6) % 2 == 0 { Luma([30]) } else { Luma([220]) }
        });
        let m = measure(&gray, &ExtractorConfig::default()).unwrap();
        assert!(m.density > 0.05, "density {}", m.density);
        assert_eq!(m.score, 0.0);
    }

    #[test]
    fn tiny_input_is_rejected() {
        let gray = GrayImage::from_pixel(2, 2, Luma([0]));
        assert!(matches!(
            measure(&gray, &ExtractorConfig::default()),
            Err(ExtractError::RegionTooSmall { .. })
        ));
    }
}
