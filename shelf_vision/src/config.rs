// THEORY:
// Every tunable number the engine uses lives here, grouped by the stage that consumes it.
// Configuration is injected once at construction; nothing reads files or environment at
// analysis time. A config can come from three places:
// - `MonitorConfig::default()`: representative calibration for a fixed overhead camera.
// - `MonitorConfig::from_toml_str` / `MonitorConfig::load`: a TOML document in which every
//   field is optional and missing fields fall back to the defaults.
// - Direct construction by a host application.
//
// Whatever the source, `sanitized()` is applied before the engine uses the values. Out-of-range
// settings are clamped into their valid range and each correction is logged, so a bad config
// degrades behavior instead of aborting the monitor.

use crate::core_modules::section::Section;
use anyhow::Context;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MIN_SENSITIVITY: f64 = 0.1;
pub const MAX_SENSITIVITY: f64 = 1.0;
pub const MIN_HISTORY_CAPACITY: usize = 5;
pub const MAX_OBJECT_INDICATOR_WEIGHT: u32 = 5;

/// Thresholds and normalizers for the five heuristic extractors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Effective gray variance at which the uniformity score reaches 0.
    pub max_variance: f64,
    /// Canny hysteresis thresholds, on imageproc's pre-blurred gradient scale.
    pub canny_low: f32,
    pub canny_high: f32,
    /// Edge-pixel fraction at which the edge score reaches 0.
    pub max_edge_density: f64,
    /// Half-width, in histogram bins, of the window around each channel peak.
    pub histogram_peak_window: usize,
    pub color_amplification: f64,
    /// Gradient energy at which the texture score reaches 0.
    pub max_texture: f64,
    /// Gray dynamic range below which a region is treated as structureless.
    pub min_contrast: u8,
    pub min_blob_area: f64,
    pub max_structure_complexity: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_variance: 2000.0,
            canny_low: 20.0,
            canny_high: 60.0,
            max_edge_density: 0.05,
            histogram_peak_window: 20,
            color_amplification: 1.1,
            max_texture: 50.0,
            min_contrast: 15,
            min_blob_area: 50.0,
            max_structure_complexity: 0.5,
        }
    }
}

/// Per-method emptiness score at or above which the method votes "empty".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorThresholds {
    pub uniformity: f64,
    pub edge_density: f64,
    pub color_concentration: f64,
    pub texture: f64,
    pub structure: f64,
}

impl Default for IndicatorThresholds {
    fn default() -> Self {
        Self {
            uniformity: 0.75,
            edge_density: 0.75,
            color_concentration: 0.80,
            texture: 0.70,
            structure: 0.70,
        }
    }
}

/// Confidence assigned once the weighted indicator count reaches `min_indicators`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub min_indicators: u32,
    pub base: f64,
    /// Added per indicator above `min_indicators`.
    #[serde(default)]
    pub step: f64,
    #[serde(default = "default_band_cap")]
    pub cap: f64,
}

fn default_band_cap() -> f64 {
    0.99
}

impl ConfidenceBand {
    pub fn new(min_indicators: u32, base: f64, step: f64) -> Self {
        Self {
            min_indicators,
            base,
            step,
            cap: default_band_cap(),
        }
    }
}

/// Fullness blend weights. Defaults sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullnessWeights {
    pub object_density: f64,
    pub color_richness: f64,
    pub texture_richness: f64,
    pub structure_richness: f64,
}

impl Default for FullnessWeights {
    fn default() -> Self {
        Self {
            object_density: 0.4,
            color_richness: 0.3,
            texture_richness: 0.2,
            structure_richness: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub indicators: IndicatorThresholds,
    /// Weighted indicator count at which a region is classified empty.
    pub min_empty_indicators: u32,
    /// Weight of each detector-based indicator (`no_products`, `low_coverage`).
    pub object_indicator_weight: u32,
    pub low_coverage_threshold: f64,
    /// Share of detector density in the blended object density.
    pub object_evidence_weight: f64,
    /// Sorted descending by `min_indicators` during sanitization.
    pub bands: Vec<ConfidenceBand>,
    /// Confidence used when the count is empty-worthy but below every band.
    pub unbanded_confidence: f64,
    /// Sensitivity gain `k` in `band * (1 + s * k)`.
    pub sensitivity_gain: f64,
    /// Confidence added per unit of recent empty share, before sensitivity.
    pub temporal_consistency_weight: f64,
    /// A count one vote short of `min_empty_indicators` still reads empty when the temporal
    /// boost exceeds this.
    pub temporal_promotion_boost: f64,
    pub fullness_weights: FullnessWeights,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            indicators: IndicatorThresholds::default(),
            min_empty_indicators: 2,
            object_indicator_weight: 2,
            low_coverage_threshold: 0.12,
            object_evidence_weight: 0.6,
            bands: vec![
                ConfidenceBand::new(6, 0.90, 0.02),
                ConfidenceBand::new(4, 0.75, 0.05),
                ConfidenceBand::new(3, 0.55, 0.0),
                ConfidenceBand::new(2, 0.35, 0.0),
            ],
            unbanded_confidence: 0.2,
            sensitivity_gain: 0.2,
            temporal_consistency_weight: 0.3,
            temporal_promotion_boost: 0.2,
            fullness_weights: FullnessWeights::default(),
        }
    }
}

/// Detector labels that count as products on a shelf.
pub const DEFAULT_PRODUCT_CLASSES: &[&str] = &[
    "bottle", "cup", "bowl", "banana", "apple", "sandwich", "orange", "broccoli", "carrot",
    "hot dog", "pizza", "donut", "cake", "potted plant", "vase", "scissors", "toothbrush", "book",
    "cell phone", "laptop", "mouse", "remote", "keyboard", "microwave", "oven", "toaster", "sink",
    "refrigerator", "clock", "teddy bear", "hair drier", "wine glass", "fork", "knife", "spoon",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectEvidenceConfig {
    /// Detections at or below this confidence are ignored.
    pub confidence_threshold: f64,
    /// Case-insensitive allowlist of product labels.
    pub product_classes: Vec<String>,
}

impl Default for ObjectEvidenceConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.2,
            product_classes: DEFAULT_PRODUCT_CLASSES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    pub history_capacity: usize,
    /// How many of the newest records stability and trend look at.
    pub window: usize,
    pub trend_min_records: usize,
    /// Mean-fullness change that separates a trend from `Stable`.
    pub trend_delta: f64,
    /// How many previous records the temporal boost looks at. No boost until that many exist.
    pub consistency_window: usize,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10,
            window: 5,
            trend_min_records: 3,
            trend_delta: 0.1,
            consistency_window: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub threshold: f64,
    pub min_stability: u32,
    pub cooldown_seconds: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: 0.65,
            min_stability: 3,
            cooldown_seconds: 2.0,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Smallest width and height, in pixels, a region may have.
    pub min_region_size: u32,
    /// Global sensitivity in [0.1, 1.0]. Sections may override it.
    pub sensitivity: f64,
    pub extractors: ExtractorConfig,
    pub aggregator: AggregatorConfig,
    pub object_evidence: ObjectEvidenceConfig,
    pub stabilizer: StabilizerConfig,
    pub alerts: AlertConfig,
    /// Worker count for the sharded host. `None` means one per CPU.
    pub workers: Option<usize>,
    pub sections: Vec<Section>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_region_size: 30,
            sensitivity: 0.7,
            extractors: ExtractorConfig::default(),
            aggregator: AggregatorConfig::default(),
            object_evidence: ObjectEvidenceConfig::default(),
            stabilizer: StabilizerConfig::default(),
            alerts: AlertConfig::default(),
            workers: None,
            sections: Vec::new(),
        }
    }
}

fn clamp_logged(name: &str, value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        warn!("config: {name} is NaN, using {min}");
        return min;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("config: {name}={value} out of range [{min}, {max}], clamped to {clamped}");
    }
    clamped
}

fn within<T: PartialOrd + Copy + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> T {
    if value < min || value > max {
        let clamped = if value < min { min } else { max };
        warn!("config: {name}={value} out of range [{min}, {max}], clamped to {clamped}");
        return clamped;
    }
    value
}

fn at_least<T: PartialOrd + Copy + std::fmt::Display>(name: &str, value: T, min: T) -> T {
    if value < min {
        warn!("config: {name}={value} below minimum {min}, raised");
        return min;
    }
    value
}

pub fn clamp_sensitivity(value: f64) -> f64 {
    clamp_logged("sensitivity", value, MIN_SENSITIVITY, MAX_SENSITIVITY)
}

pub fn clamp_threshold(value: f64) -> f64 {
    clamp_logged("section.threshold", value, 0.0, 1.0)
}

impl MonitorConfig {
    /// Parses a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: MonitorConfig = toml::from_str(text).context("invalid monitor config")?;
        Ok(config.sanitized())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("serializing monitor config")
    }

    /// Returns a copy with every numeric setting clamped into its valid range.
    pub fn sanitized(mut self) -> Self {
        self.min_region_size = at_least("min_region_size", self.min_region_size, 1);
        self.sensitivity = clamp_sensitivity(self.sensitivity);
        if let Some(workers) = self.workers {
            self.workers = Some(at_least("workers", workers, 1));
        }

        let ex = &mut self.extractors;
        ex.max_variance = clamp_logged("max_variance", ex.max_variance, 1.0, f64::MAX);
        ex.canny_low = clamp_logged("canny_low", ex.canny_low as f64, 0.0, 10_000.0) as f32;
        ex.canny_high =
            clamp_logged("canny_high", ex.canny_high as f64, ex.canny_low as f64, 10_000.0) as f32;
        ex.max_edge_density = clamp_logged("max_edge_density", ex.max_edge_density, 1e-4, 1.0);
        ex.histogram_peak_window = ex.histogram_peak_window.min(255);
        ex.color_amplification =
            clamp_logged("color_amplification", ex.color_amplification, 0.1, 10.0);
        ex.max_texture = clamp_logged("max_texture", ex.max_texture, 1e-3, f64::MAX);
        ex.min_blob_area = clamp_logged("min_blob_area", ex.min_blob_area, 0.0, f64::MAX);
        ex.max_structure_complexity =
            clamp_logged("max_structure_complexity", ex.max_structure_complexity, 1e-3, 10.0);

        let agg = &mut self.aggregator;
        let ind = &mut agg.indicators;
        ind.uniformity = clamp_logged("indicators.uniformity", ind.uniformity, 0.0, 1.0);
        ind.edge_density = clamp_logged("indicators.edge_density", ind.edge_density, 0.0, 1.0);
        ind.color_concentration =
            clamp_logged("indicators.color_concentration", ind.color_concentration, 0.0, 1.0);
        ind.texture = clamp_logged("indicators.texture", ind.texture, 0.0, 1.0);
        ind.structure = clamp_logged("indicators.structure", ind.structure, 0.0, 1.0);
        agg.min_empty_indicators = at_least("min_empty_indicators", agg.min_empty_indicators, 1);
        agg.object_indicator_weight = within(
            "object_indicator_weight",
            agg.object_indicator_weight,
            1,
            MAX_OBJECT_INDICATOR_WEIGHT,
        );
        agg.low_coverage_threshold =
            clamp_logged("low_coverage_threshold", agg.low_coverage_threshold, 0.0, 1.0);
        agg.object_evidence_weight =
            clamp_logged("object_evidence_weight", agg.object_evidence_weight, 0.0, 1.0);
        agg.unbanded_confidence =
            clamp_logged("unbanded_confidence", agg.unbanded_confidence, 0.0, 1.0);
        agg.sensitivity_gain = clamp_logged("sensitivity_gain", agg.sensitivity_gain, 0.0, 1.0);
        agg.temporal_consistency_weight = clamp_logged(
            "temporal_consistency_weight",
            agg.temporal_consistency_weight,
            0.0,
            1.0,
        );
        agg.temporal_promotion_boost =
            clamp_logged("temporal_promotion_boost", agg.temporal_promotion_boost, 0.0, 1.0);
        for band in agg.bands.iter_mut() {
            band.base = clamp_logged("band.base", band.base, 0.0, 1.0);
            band.step = clamp_logged("band.step", band.step, 0.0, 1.0);
            band.cap = clamp_logged("band.cap", band.cap, band.base, 1.0);
        }
        agg.bands
            .sort_by(|a, b| b.min_indicators.cmp(&a.min_indicators));
        let w = &mut agg.fullness_weights;
        w.object_density = clamp_logged("weights.object_density", w.object_density, 0.0, 1.0);
        w.color_richness = clamp_logged("weights.color_richness", w.color_richness, 0.0, 1.0);
        w.texture_richness = clamp_logged("weights.texture_richness", w.texture_richness, 0.0, 1.0);
        w.structure_richness =
            clamp_logged("weights.structure_richness", w.structure_richness, 0.0, 1.0);

        let obj = &mut self.object_evidence;
        obj.confidence_threshold =
            clamp_logged("confidence_threshold", obj.confidence_threshold, 0.0, 1.0);

        let st = &mut self.stabilizer;
        st.history_capacity = at_least("history_capacity", st.history_capacity, MIN_HISTORY_CAPACITY);
        st.window = at_least("stabilizer.window", st.window, 1).min(st.history_capacity);
        st.trend_min_records = at_least("trend_min_records", st.trend_min_records, 2);
        st.trend_delta = clamp_logged("trend_delta", st.trend_delta, 0.0, 1.0);
        st.consistency_window =
            at_least("consistency_window", st.consistency_window, 1).min(st.history_capacity);

        let al = &mut self.alerts;
        al.threshold = clamp_logged("alerts.threshold", al.threshold, 0.0, 1.0);
        al.cooldown_seconds = clamp_logged("cooldown_seconds", al.cooldown_seconds, 0.0, f64::MAX);

        for section in self.sections.iter_mut() {
            section.sanitize_overrides();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::section::SectionGeometry;

    #[test]
    fn defaults_survive_sanitizing() {
        let config = MonitorConfig::default();
        assert_eq!(config.clone().sanitized(), config);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = MonitorConfig::from_toml_str(
            r#"
            sensitivity = 0.9

            [alerts]
            cooldown_seconds = 5.0

            [[sections]]
            name = "Dairy"
            geometry = { kind = "rect", x = 0, y = 0, width = 120, height = 80 }
            threshold = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.sensitivity, 0.9);
        assert_eq!(config.alerts.cooldown_seconds, 5.0);
        assert_eq!(config.alerts.min_stability, 3);
        assert_eq!(config.stabilizer.history_capacity, 10);
        assert_eq!(config.sections.len(), 1);
        assert_eq!(
            config.sections[0].geometry,
            SectionGeometry::Rect { x: 0, y: 0, width: 120, height: 80 }
        );
        assert_eq!(config.sections[0].threshold, Some(0.8));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut config = MonitorConfig::default();
        config.sensitivity = 3.0;
        config.stabilizer.history_capacity = 2;
        config.alerts.threshold = -1.0;
        config.aggregator.bands.reverse();
        let config = config.sanitized();
        assert_eq!(config.sensitivity, MAX_SENSITIVITY);
        assert_eq!(config.stabilizer.history_capacity, MIN_HISTORY_CAPACITY);
        assert_eq!(config.alerts.threshold, 0.0);
        assert_eq!(config.aggregator.bands[0].min_indicators, 6);
    }

    #[test]
    fn object_vote_weight_stays_small() {
        let mut config = MonitorConfig::default();
        config.aggregator.object_indicator_weight = 4_000_000_000;
        assert_eq!(
            config.sanitized().aggregator.object_indicator_weight,
            MAX_OBJECT_INDICATOR_WEIGHT
        );
        let mut config = MonitorConfig::default();
        config.aggregator.object_indicator_weight = 0;
        assert_eq!(config.sanitized().aggregator.object_indicator_weight, 1);
    }

    #[test]
    fn section_overrides_are_clamped() {
        let mut config = MonitorConfig::default();
        config.sections.push(
            Section::new("A", SectionGeometry::Rect { x: 0, y: 0, width: 50, height: 50 })
                .with_sensitivity(0.0)
                .with_threshold(1.5),
        );
        let config = config.sanitized();
        assert_eq!(config.sections[0].sensitivity, Some(MIN_SENSITIVITY));
        assert_eq!(config.sections[0].threshold, Some(1.0));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(MonitorConfig::from_toml_str("sensitivity = \"high\"").is_err());
    }
}
