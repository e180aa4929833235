// THEORY:
// Structure is the closest the heuristics come to counting objects. The region is binarized
// with Otsu's threshold and the foreground is split into 8-connected blobs; every blob big
// enough to be more than noise counts as a candidate object.
//
// Otsu always finds *some* split, even on a flat surface, so regions whose gray range is below
// `min_contrast` are declared structureless before thresholding.

use super::{ExtractError, Method, finite, inverse_score};
use crate::config::ExtractorConfig;
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{Connectivity, connected_components};
use std::collections::HashMap;

const COUNT_WEIGHT: f64 = 0.1;
const DENSITY_COUNT_WEIGHT: f64 = 0.2;
const DENSITY_AREA_WEIGHT: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct StructureMeasure {
    pub contrast: u8,
    pub blob_count: usize,
    /// Summed blob area over region area.
    pub area_fraction: f64,
    pub complexity: f64,
    /// Object-density estimate used for fullness when no detector is present.
    pub object_density: f64,
    pub score: f64,
}

impl StructureMeasure {
    fn structureless(contrast: u8) -> Self {
        Self {
            contrast,
            blob_count: 0,
            area_fraction: 0.0,
            complexity: 0.0,
            object_density: 0.0,
            score: 1.0,
        }
    }
}

/// Pixel count of every foreground blob.
fn blob_areas(binary: &GrayImage) -> Vec<u32> {
    let labels = connected_components(binary, Connectivity::Eight, Luma([0u8]));
    let mut areas: HashMap<u32, u32> = HashMap::new();
    for label in labels.pixels().map(|p| p[0]).filter(|&label| label != 0) {
        *areas.entry(label).or_insert(0) += 1;
    }
    areas.into_values().collect()
}

pub fn measure(gray: &GrayImage, config: &ExtractorConfig) -> Result<StructureMeasure, ExtractError> {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    let contrast = max.saturating_sub(min);
    if contrast < config.min_contrast {
        return Ok(StructureMeasure::structureless(contrast));
    }

    let level = otsu_level(gray);
    let mut binary = gray.clone();
    for p in binary.pixels_mut() {
        *p = if p[0] > level { Luma([255]) } else { Luma([0]) };
    }

    let areas: Vec<f64> = blob_areas(&binary)
        .into_iter()
        .map(f64::from)
        .filter(|&area| area >= config.min_blob_area)
        .collect();

    let (width, height) = gray.dimensions();
    let region_area = width as f64 * height as f64;
    let blob_count = areas.len();
    let area_fraction = finite(Method::Structure, areas.iter().sum::<f64>() / region_area)?;
    let complexity = (blob_count as f64 * COUNT_WEIGHT + area_fraction) / 2.0;
    let object_density =
        (blob_count as f64 * DENSITY_COUNT_WEIGHT + area_fraction * DENSITY_AREA_WEIGHT).min(1.0);

    Ok(StructureMeasure {
        contrast,
        blob_count,
        area_fraction,
        complexity,
        object_density,
        score: inverse_score(complexity, config.max_structure_complexity),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_contrast_is_structureless() {
        let gray = GrayImage::from_fn(60, 60, |x, _| Luma([100 + (x % 5) as u8]));
        let m = measure(&gray, &ExtractorConfig::default()).unwrap();
        assert_eq!(m.blob_count, 0);
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn bright_blocks_are_counted() {
        let gray = GrayImage::from_fn(120, 120, |x, y| {
            let in_block = (10..50).contains(&y) && ((10..40).contains(&x) || (60..100).contains(&x));
            if in_block { Luma([220]) } else { Luma([30]) }
        });
        let m = measure(&gray, &ExtractorConfig::default()).unwrap();
        assert_eq!(m.blob_count, 2);
        assert!(m.area_fraction > 0.1);
        assert!(m.score < 0.7);
        assert!(m.object_density > 0.4);
    }

    #[test]
    fn specks_below_min_area_are_ignored() {
        let gray = GrayImage::from_fn(80, 80, |x, y| {
            if x % 20 == 5 && y % 20 == 5 { Luma([250]) } else { Luma([10]) }
        });
        let m = measure(&gray, &ExtractorConfig::default()).unwrap();
        assert_eq!(m.blob_count, 0);
        assert_eq!(m.score, 1.0);
    }
}
