// THEORY:
// Global variance alone is fooled by lighting gradients: a bare shelf lit from one side has a
// large global spread but every small neighborhood is flat. Averaging the global variance with
// the mean variance of half-overlapping local patches keeps a smooth gradient "uniform" while
// a field of distinct products stays "varied" at both scales.

use super::{ExtractError, Method, finite, inverse_score, mean_variance};
use crate::config::ExtractorConfig;
use image::GrayImage;

const MAX_PATCH: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct UniformityMeasure {
    pub global_variance: f64,
    pub local_variance: f64,
    pub effective_variance: f64,
    pub score: f64,
}

fn patch_variance(gray: &GrayImage, x0: u32, y0: u32, size: u32) -> f64 {
    let values = (y0..y0 + size)
        .flat_map(|y| (x0..x0 + size).map(move |x| (x, y)))
        .map(|(x, y)| gray.get_pixel(x, y)[0] as f64);
    mean_variance(values).1
}

/// Mean variance over half-overlapping square patches, or `None` if no patch fits.
fn mean_local_variance(gray: &GrayImage) -> Option<f64> {
    let (width, height) = gray.dimensions();
    let size = MAX_PATCH.min(height / 4).min(width / 4);
    if size < 2 {
        return None;
    }
    let stride = (size / 2).max(1);

    let mut total = 0.0;
    let mut patches = 0usize;
    let mut y = 0;
    while y + size <= height {
        let mut x = 0;
        while x + size <= width {
            total += patch_variance(gray, x, y, size);
            patches += 1;
            x += stride;
        }
        y += stride;
    }
    (patches > 0).then(|| total / patches as f64)
}

pub fn measure(gray: &GrayImage, config: &ExtractorConfig) -> Result<UniformityMeasure, ExtractError> {
    let (_, global_variance) = mean_variance(gray.pixels().map(|p| p[0] as f64));
    let local_variance = mean_local_variance(gray).unwrap_or(global_variance);
    let effective_variance = finite(Method::Uniformity, (global_variance + local_variance) / 2.0)?;

    Ok(UniformityMeasure {
        global_variance,
        local_variance,
        effective_variance,
        score: inverse_score(effective_variance, config.max_variance),
    })
}
