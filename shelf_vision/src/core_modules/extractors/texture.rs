// Texture energy from Sobel gradient magnitude. The spread of the magnitude dominates; its
// mean is added at a tenth of the weight so a uniformly grainy surface still registers.

use super::{ExtractError, Method, finite, inverse_score, mean_variance};
use crate::config::ExtractorConfig;
use image::GrayImage;
use imageproc::filter::filter3x3;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

const MEAN_WEIGHT: f64 = 0.1;
const LAPLACIAN: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

#[derive(Debug, Clone, PartialEq)]
pub struct TextureMeasure {
    pub gradient_mean: f64,
    pub gradient_std: f64,
    pub energy: f64,
    /// Variance of the Laplacian response. Reported, not scored.
    pub laplacian_variance: f64,
    pub score: f64,
}

pub fn measure(gray: &GrayImage, config: &ExtractorConfig) -> Result<TextureMeasure, ExtractError> {
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);
    let magnitudes = gx.pixels().zip(gy.pixels()).map(|(h, v)| {
        let (h, v) = (h[0] as f64, v[0] as f64);
        (h * h + v * v).sqrt()
    });
    let (gradient_mean, gradient_variance) = mean_variance(magnitudes);
    let gradient_std = gradient_variance.sqrt();
    let energy = finite(Method::Texture, gradient_std + MEAN_WEIGHT * gradient_mean)?;

    let laplacian: Vec<f32> = filter3x3(gray, &LAPLACIAN).into_raw();
    let (_, laplacian_variance) = mean_variance(laplacian.iter().map(|&v| v as f64));

    Ok(TextureMeasure {
        gradient_mean,
        gradient_std,
        energy,
        laplacian_variance,
        score: inverse_score(energy, config.max_texture),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn smooth_surface_has_no_texture() {
        let gray = GrayImage::from_pixel(64, 64, Luma([90]));
        let m = measure(&gray, &ExtractorConfig::default()).unwrap();
        assert_eq!(m.energy, 0.0);
        assert_eq!(m.laplacian_variance, 0.0);
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn noisy_surface_is_textured() {
        let gray = GrayImage::from_fn(64, 64, |x, y| {
            Luma([((x * 37 + y * 91) % 7 * 30) as u8])
        });
        let m = measure(&gray, &ExtractorConfig::default()).unwrap();
        assert!(m.energy > 50.0, "energy {}", m.energy);
        assert_eq!(m.score, 0.0);
        assert!(m.laplacian_variance > 0.0);
    }
}
