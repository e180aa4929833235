// THEORY:
// An object detector is the strongest single signal of fullness, but it is also an optional,
// external, possibly failing collaborator. This module isolates it behind a capability trait
// so the engine never depends on a particular model:
//
// - `ObjectEvidenceProvider` is what a host implements (or wraps with `FnProvider`). It returns
//   raw labelled boxes in region coordinates.
// - `ObjectEvidenceAdapter` owns a provider and turns raw detections into `ObjectEvidence`:
//   only allow-listed product labels above the confidence threshold survive, and their clipped
//   box area becomes a coverage ratio.
//
// Absence and failure are the same thing to the aggregator: `available == false`, and the
// classification falls back to heuristics alone. The adapter itself never fails.

use crate::config::ObjectEvidenceConfig;
use crate::core_modules::region::Region;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An axis-aligned box in region pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Area of the part of this box that lies inside a `width` x `height` region.
    pub fn clipped_area(&self, width: f64, height: f64) -> f64 {
        let left = self.x.max(0.0);
        let top = self.y.max(0.0);
        let right = (self.x + self.width).min(width);
        let bottom = (self.y + self.height).min(height);
        (right - left).max(0.0) * (bottom - top).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// A source of object detections for a region.
pub trait ObjectEvidenceProvider: Send {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    fn detect(&mut self, region: &Region) -> anyhow::Result<Vec<Detection>>;
}

/// Provider used when no detector is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProvider;

impl ObjectEvidenceProvider for NullProvider {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn detect(&mut self, _region: &Region) -> anyhow::Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

/// Wraps a closure as a provider.
pub struct FnProvider<F> {
    name: String,
    detect_fn: F,
}

impl<F> FnProvider<F>
where
    F: FnMut(&Region) -> anyhow::Result<Vec<Detection>> + Send,
{
    pub fn new(name: impl Into<String>, detect_fn: F) -> Self {
        Self {
            name: name.into(),
            detect_fn,
        }
    }
}

impl<F> ObjectEvidenceProvider for FnProvider<F>
where
    F: FnMut(&Region) -> anyhow::Result<Vec<Detection>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&mut self, region: &Region) -> anyhow::Result<Vec<Detection>> {
        (self.detect_fn)(region)
    }
}

/// Filtered detector output for one region.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectEvidence {
    pub available: bool,
    pub product_count: usize,
    /// Clipped product box area over region area, in [0, 1].
    pub coverage_ratio: f64,
    pub mean_confidence: f64,
    pub detections: Vec<Detection>,
}

impl ObjectEvidence {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

pub struct ObjectEvidenceAdapter {
    provider: Box<dyn ObjectEvidenceProvider>,
    product_classes: HashSet<String>,
    confidence_threshold: f64,
}

impl ObjectEvidenceAdapter {
    pub fn new(provider: Box<dyn ObjectEvidenceProvider>, config: &ObjectEvidenceConfig) -> Self {
        Self {
            provider,
            product_classes: config
                .product_classes
                .iter()
                .map(|label| label.to_lowercase())
                .collect(),
            confidence_threshold: config.confidence_threshold,
        }
    }

    pub fn without_detector(config: &ObjectEvidenceConfig) -> Self {
        Self::new(Box::new(NullProvider), config)
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn is_product(&self, detection: &Detection) -> bool {
        detection.confidence > self.confidence_threshold
            && self.product_classes.contains(&detection.label.to_lowercase())
    }

    pub fn evaluate(&mut self, region: &Region, section: &str) -> ObjectEvidence {
        if !self.provider.is_available() {
            return ObjectEvidence::unavailable();
        }
        let raw = match self.provider.detect(region) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    "section {section}: detector {} failed, using heuristics only: {err:#}",
                    self.provider.name()
                );
                return ObjectEvidence::unavailable();
            }
        };

        let products: Vec<Detection> = raw.into_iter().filter(|d| self.is_product(d)).collect();
        let (width, height) = (region.width() as f64, region.height() as f64);
        let covered: f64 = products
            .iter()
            .map(|d| d.bbox.clipped_area(width, height))
            .sum();
        let coverage_ratio = (covered / (width * height)).clamp(0.0, 1.0);
        let mean_confidence = if products.is_empty() {
            0.0
        } else {
            products.iter().map(|d| d.confidence).sum::<f64>() / products.len() as f64
        };
        debug!(
            "section {section}: {} products, coverage {coverage_ratio:.3}",
            products.len()
        );

        ObjectEvidence {
            available: true,
            product_count: products.len(),
            coverage_ratio,
            mean_confidence,
            detections: products,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn region() -> Region {
        Region::filled(100, 100, &[50, 50, 50]).unwrap()
    }

    #[test]
    fn null_provider_is_unavailable() {
        let mut adapter = ObjectEvidenceAdapter::without_detector(&ObjectEvidenceConfig::default());
        assert_eq!(adapter.evaluate(&region(), "s"), ObjectEvidence::unavailable());
    }

    #[test]
    fn filters_labels_and_confidence() {
        let provider = FnProvider::new("fixed", |_: &Region| {
            Ok(vec![
                Detection::new("Bottle", 0.9, BoundingBox::new(0.0, 0.0, 50.0, 20.0)),
                Detection::new("person", 0.9, BoundingBox::new(0.0, 0.0, 100.0, 100.0)),
                Detection::new("cup", 0.1, BoundingBox::new(0.0, 0.0, 100.0, 100.0)),
                Detection::new("cup", 0.5, BoundingBox::new(80.0, 80.0, 40.0, 40.0)),
            ])
        });
        let mut adapter =
            ObjectEvidenceAdapter::new(Box::new(provider), &ObjectEvidenceConfig::default());
        let evidence = adapter.evaluate(&region(), "s");
        assert!(evidence.available);
        assert_eq!(evidence.product_count, 2);
        assert!((evidence.coverage_ratio - 0.14).abs() < 1e-9);
        assert!((evidence.mean_confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn provider_error_degrades_to_unavailable() {
        let provider = FnProvider::new("broken", |_: &Region| Err(anyhow!("model not loaded")));
        let mut adapter =
            ObjectEvidenceAdapter::new(Box::new(provider), &ObjectEvidenceConfig::default());
        assert!(!adapter.evaluate(&region(), "s").available);
    }

    #[test]
    fn coverage_is_capped() {
        let provider = FnProvider::new("overlap", |_: &Region| {
            Ok(vec![
                Detection::new("book", 0.8, BoundingBox::new(0.0, 0.0, 100.0, 100.0)),
                Detection::new("book", 0.8, BoundingBox::new(0.0, 0.0, 100.0, 100.0)),
            ])
        });
        let mut adapter =
            ObjectEvidenceAdapter::new(Box::new(provider), &ObjectEvidenceConfig::default());
        assert_eq!(adapter.evaluate(&region(), "s").coverage_ratio, 1.0);
    }
}
