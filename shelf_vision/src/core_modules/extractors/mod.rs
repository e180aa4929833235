// THEORY:
// The extractors are the "senses" of the engine. Each one looks at a region through a single
// classical image statistic and answers the same question on the same scale: how empty does
// this region look, from 0 (clearly stocked) to 1 (clearly bare)?
//
// - Uniformity: a bare shelf is one flat surface, so its gray variance is low.
// - Edge density: products have outlines; bare shelves have few edges.
// - Color concentration: packaging is colorful; a bare shelf is one dominant color.
// - Texture: gradient energy is low on a smooth empty surface.
// - Structure: foreground blobs after Otsu thresholding stand in for objects.
//
// Every extractor is a pure function of (region, config). A failure is reported as an
// `ExtractError` inside the `FeatureSet` instead of aborting the frame; the aggregator
// treats a failed method as "no opinion".

pub mod color;
pub mod edges;
pub mod structure;
pub mod texture;
pub mod uniformity;

use crate::config::ExtractorConfig;
use crate::core_modules::region::Region;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use color::ColorMeasure;
pub use edges::EdgeMeasure;
pub use structure::StructureMeasure;
pub use texture::TextureMeasure;
pub use uniformity::UniformityMeasure;

/// One of the five heuristic measurement methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Uniformity,
    EdgeDensity,
    ColorConcentration,
    Texture,
    Structure,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Uniformity => "uniformity",
            Method::EdgeDensity => "edge_density",
            Method::ColorConcentration => "color_concentration",
            Method::Texture => "texture",
            Method::Structure => "structure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("{method} cannot run on {channels}-channel input")]
    UnsupportedChannels { method: Method, channels: u8 },
    #[error("{method} needs at least {min}x{min} pixels")]
    RegionTooSmall { method: Method, min: u32 },
    #[error("{method} produced a non-finite statistic")]
    NonFinite { method: Method },
}

impl ExtractError {
    pub fn method(&self) -> Method {
        match self {
            ExtractError::UnsupportedChannels { method, .. }
            | ExtractError::RegionTooSmall { method, .. }
            | ExtractError::NonFinite { method } => *method,
        }
    }
}

/// Maps a raw statistic onto an emptiness score: 1 at zero, 0 at or above `max`.
pub(crate) fn inverse_score(value: f64, max: f64) -> f64 {
    1.0 - (value / max).clamp(0.0, 1.0)
}

pub(crate) fn finite(method: Method, value: f64) -> Result<f64, ExtractError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ExtractError::NonFinite { method })
    }
}

/// Population mean and variance of a sample stream.
pub(crate) fn mean_variance<I>(values: I) -> (f64, f64)
where
    I: IntoIterator<Item = f64>,
{
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in values {
        count += 1;
        sum += v;
        sum_sq += v * v;
    }
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    (mean, variance)
}

/// All single-frame measurements for one region.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub uniformity: Result<UniformityMeasure, ExtractError>,
    pub edges: Result<EdgeMeasure, ExtractError>,
    pub color: Result<ColorMeasure, ExtractError>,
    pub texture: Result<TextureMeasure, ExtractError>,
    pub structure: Result<StructureMeasure, ExtractError>,
}

impl FeatureSet {
    /// Emptiness score for `method`, or `None` when that method failed.
    pub fn score(&self, method: Method) -> Option<f64> {
        match method {
            Method::Uniformity => self.uniformity.as_ref().ok().map(|m| m.score),
            Method::EdgeDensity => self.edges.as_ref().ok().map(|m| m.score),
            Method::ColorConcentration => self.color.as_ref().ok().map(|m| m.score),
            Method::Texture => self.texture.as_ref().ok().map(|m| m.score),
            Method::Structure => self.structure.as_ref().ok().map(|m| m.score),
        }
    }

    pub fn degraded(&self) -> Vec<Method> {
        ALL_METHODS
            .iter()
            .copied()
            .filter(|m| self.score(*m).is_none())
            .collect()
    }
}

pub const ALL_METHODS: [Method; 5] = [
    Method::Uniformity,
    Method::EdgeDensity,
    Method::ColorConcentration,
    Method::Texture,
    Method::Structure,
];

fn logged<T>(section: &str, result: Result<T, ExtractError>) -> Result<T, ExtractError> {
    if let Err(err) = &result {
        warn!("section {section}: {} degraded: {err}", err.method());
    }
    result
}

/// Runs every extractor over `region`. The grayscale view is computed once and shared.
pub fn extract_all(region: &Region, config: &ExtractorConfig, section: &str) -> FeatureSet {
    let gray = region.to_gray();
    FeatureSet {
        uniformity: logged(section, uniformity::measure(&gray, config)),
        edges: logged(section, edges::measure(&gray, config)),
        color: logged(section, color::measure(region, config)),
        texture: logged(section, texture::measure(&gray, config)),
        structure: logged(section, structure::measure(&gray, config)),
    }
}
