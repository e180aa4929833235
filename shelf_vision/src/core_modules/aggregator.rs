// THEORY:
// The aggregator turns many weak opinions into one decision. It does not average scores;
// it counts votes. Each heuristic method votes "empty" when its score clears its indicator
// threshold, and a working detector casts two heavier votes (no products, low coverage).
// The weighted vote count `N` decides emptiness, and a band table maps `N` to a base confidence.
//
// When the votes say "not empty", confidence comes from the other direction: a fullness blend
// of how rich the region looks (object density, color, texture, structure). Sensitivity then
// nudges the result: up on the empty side, down on the fullness side, so turning sensitivity up
// can only make a section look emptier.
//
// History smooths the empty side. When most of a section's previous frames were empty, the
// share of them adds a temporal boost to the empty confidence, and a frame one vote short of
// the empty threshold still reads empty if that boost is strong enough. A single clean frame
// inside a run of empty ones therefore does not flip the verdict.
//
// Degraded methods never vote and are left out of the fullness blend.

use crate::config::{AggregatorConfig, ConfidenceBand};
use crate::core_modules::extractors::{ALL_METHODS, FeatureSet, Method};
use crate::core_modules::object_evidence::ObjectEvidence;
use serde::{Deserialize, Serialize};

const DETECTOR_COUNT_WEIGHT: f64 = 0.3;
const DETECTOR_COVERAGE_WEIGHT: f64 = 1.5;

/// Single-frame scores, all in [0, 1]. Higher means emptier, except `object_coverage`,
/// which is the raw detector coverage (higher means fuller).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodScores {
    pub uniformity: f64,
    pub edge_density: f64,
    pub color_concentration: f64,
    pub texture: f64,
    pub structure: f64,
    pub object_coverage: f64,
}

/// A reason to believe a region is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    IsUniform,
    FewEdges,
    LowColorDiversity,
    LowTexture,
    MinimalStructure,
    NoProducts,
    LowCoverage,
}

impl Indicator {
    fn for_method(method: Method) -> Self {
        match method {
            Method::Uniformity => Indicator::IsUniform,
            Method::EdgeDensity => Indicator::FewEdges,
            Method::ColorConcentration => Indicator::LowColorDiversity,
            Method::Texture => Indicator::LowTexture,
            Method::Structure => Indicator::MinimalStructure,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_empty: bool,
    pub empty_confidence: f64,
    pub fullness_score: f64,
    pub method_scores: MethodScores,
    /// Weighted vote count `N`.
    pub indicator_count: u32,
    pub indicators: Vec<Indicator>,
    pub degraded_methods: Vec<Method>,
}

pub struct ConfidenceAggregator {
    config: AggregatorConfig,
}

impl ConfidenceAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn threshold(&self, method: Method) -> f64 {
        let t = &self.config.indicators;
        match method {
            Method::Uniformity => t.uniformity,
            Method::EdgeDensity => t.edge_density,
            Method::ColorConcentration => t.color_concentration,
            Method::Texture => t.texture,
            Method::Structure => t.structure,
        }
    }

    /// Base confidence for `count` votes, from the first band it reaches.
    pub fn band_confidence(&self, count: u32) -> f64 {
        let band = self
            .config
            .bands
            .iter()
            .find(|band: &&ConfidenceBand| count >= band.min_indicators);
        match band {
            Some(band) => {
                let extra = (count - band.min_indicators) as f64;
                (band.base + extra * band.step).min(band.cap)
            }
            None => self.config.unbanded_confidence,
        }
    }

    fn object_density(&self, features: &FeatureSet, evidence: &ObjectEvidence) -> Option<f64> {
        let structural = features.structure.as_ref().ok().map(|m| m.object_density);
        if !evidence.available {
            return structural;
        }
        let detector = (evidence.product_count as f64 * DETECTOR_COUNT_WEIGHT
            + evidence.coverage_ratio * DETECTOR_COVERAGE_WEIGHT)
            .min(1.0);
        let w = self.config.object_evidence_weight;
        Some(match structural {
            Some(structural) => structural * (1.0 - w) + detector * w,
            None => detector,
        })
    }

    /// Weighted richness blend over the signals that are present.
    fn fullness(&self, features: &FeatureSet, evidence: &ObjectEvidence) -> f64 {
        let w = &self.config.fullness_weights;
        let richness = |method| features.score(method).map(|score| 1.0 - score);
        let terms = [
            (w.object_density, self.object_density(features, evidence)),
            (w.color_richness, richness(Method::ColorConcentration)),
            (w.texture_richness, richness(Method::Texture)),
            (w.structure_richness, richness(Method::Structure)),
        ];
        let (weighted, total_weight) = terms
            .iter()
            .filter_map(|(weight, value)| value.map(|v| (weight * v, *weight)))
            .fold((0.0, 0.0), |(sum, total), (wv, w)| (sum + wv, total + w));
        if total_weight <= 0.0 {
            return 0.0;
        }
        (weighted / total_weight).clamp(0.0, 1.0)
    }

    /// `recent_empty_share` is the fraction of the section's previous frames judged empty, or
    /// `None` when there is not enough history for it to mean anything.
    pub fn classify(
        &self,
        features: &FeatureSet,
        evidence: &ObjectEvidence,
        sensitivity: f64,
        recent_empty_share: Option<f64>,
    ) -> Classification {
        let score_or_zero = |method| features.score(method).unwrap_or(0.0);
        let method_scores = MethodScores {
            uniformity: score_or_zero(Method::Uniformity),
            edge_density: score_or_zero(Method::EdgeDensity),
            color_concentration: score_or_zero(Method::ColorConcentration),
            texture: score_or_zero(Method::Texture),
            structure: score_or_zero(Method::Structure),
            object_coverage: if evidence.available { evidence.coverage_ratio } else { 0.0 },
        };

        // Stage 1: heuristic votes.
        let mut indicators = Vec::new();
        let mut count = 0u32;
        for method in ALL_METHODS {
            if let Some(score) = features.score(method) {
                if score >= self.threshold(method) {
                    indicators.push(Indicator::for_method(method));
                    count = count.saturating_add(1);
                }
            }
        }

        // Stage 2: detector votes.
        if evidence.available {
            let weight = self.config.object_indicator_weight;
            if evidence.product_count == 0 {
                indicators.push(Indicator::NoProducts);
                count = count.saturating_add(weight);
            }
            if evidence.coverage_ratio < self.config.low_coverage_threshold {
                indicators.push(Indicator::LowCoverage);
                count = count.saturating_add(weight);
            }
        }

        // Stage 3: decision, temporal boost and sensitivity.
        let weight = self.config.temporal_consistency_weight;
        let temporal_boost = recent_empty_share.map_or(0.0, |share| share.clamp(0.0, 1.0) * weight);
        let one_vote_short = count > 0 && count.saturating_add(1) == self.config.min_empty_indicators;
        let is_empty = count >= self.config.min_empty_indicators
            || (one_vote_short && temporal_boost > self.config.temporal_promotion_boost);
        let (empty_confidence, fullness_score) = if is_empty {
            let base = self.band_confidence(count) + temporal_boost;
            let boosted = base * (1.0 + sensitivity * self.config.sensitivity_gain);
            let confidence = boosted.clamp(0.0, 1.0);
            (confidence, 1.0 - confidence)
        } else {
            let fullness = (self.fullness(features, evidence) * (2.0 - sensitivity)).clamp(0.0, 1.0);
            (1.0 - fullness, fullness)
        };

        Classification {
            is_empty,
            empty_confidence,
            fullness_score,
            method_scores,
            indicator_count: count,
            indicators,
            degraded_methods: features.degraded(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::extractors::{
        ColorMeasure, EdgeMeasure, ExtractError, StructureMeasure, TextureMeasure, UniformityMeasure,
    };

    fn features(scores: [f64; 5], object_density: f64) -> FeatureSet {
        FeatureSet {
            uniformity: Ok(UniformityMeasure {
                global_variance: 0.0,
                local_variance: 0.0,
                effective_variance: 0.0,
                score: scores[0],
            }),
            edges: Ok(EdgeMeasure { edge_pixels: 0, density: 0.0, score: scores[1] }),
            color: Ok(ColorMeasure { concentration: 0.0, hue_richness: 0.0, score: scores[2] }),
            texture: Ok(TextureMeasure {
                gradient_mean: 0.0,
                gradient_std: 0.0,
                energy: 0.0,
                laplacian_variance: 0.0,
                score: scores[3],
            }),
            structure: Ok(StructureMeasure {
                contrast: 0,
                blob_count: 0,
                area_fraction: 0.0,
                complexity: 0.0,
                object_density,
                score: scores[4],
            }),
        }
    }

    fn aggregator() -> ConfidenceAggregator {
        ConfidenceAggregator::new(AggregatorConfig::default())
    }

    #[test]
    fn bands_follow_vote_count() {
        let agg = aggregator();
        assert_eq!(agg.band_confidence(2), 0.35);
        assert_eq!(agg.band_confidence(3), 0.55);
        assert!((agg.band_confidence(5) - 0.80).abs() < 1e-9);
        assert!((agg.band_confidence(7) - 0.92).abs() < 1e-9);
        assert_eq!(agg.band_confidence(40), 0.99);
    }

    #[test]
    fn all_heuristics_agreeing_is_empty() {
        let c = aggregator().classify(&features([1.0; 5], 0.0), &ObjectEvidence::unavailable(), 0.7, None);
        assert!(c.is_empty);
        assert_eq!(c.indicator_count, 5);
        assert!((c.empty_confidence - 0.80 * 1.14).abs() < 1e-9);
        assert!((c.fullness_score + c.empty_confidence - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rich_region_is_full() {
        let c = aggregator().classify(&features([0.1; 5], 1.0), &ObjectEvidence::unavailable(), 0.7, None);
        assert!(!c.is_empty);
        assert_eq!(c.indicator_count, 0);
        // (0.4 + 0.9 * 0.6) * 1.3, clamped
        assert_eq!(c.fullness_score, 1.0);
        assert_eq!(c.empty_confidence, 0.0);
    }

    #[test]
    fn detector_votes_are_weighted() {
        let evidence = ObjectEvidence {
            available: true,
            ..ObjectEvidence::default()
        };
        let c = aggregator().classify(&features([0.0; 5], 0.5), &evidence, 0.5, None);
        assert_eq!(c.indicators, vec![Indicator::NoProducts, Indicator::LowCoverage]);
        assert_eq!(c.indicator_count, 4);
        assert!(c.is_empty);
    }

    #[test]
    fn sensitivity_only_pushes_towards_empty() {
        let agg = aggregator();
        let empty = features([1.0, 1.0, 1.0, 0.0, 0.0], 0.0);
        let low = agg.classify(&empty, &ObjectEvidence::unavailable(), 0.3, None);
        let high = agg.classify(&empty, &ObjectEvidence::unavailable(), 0.9, None);
        assert!(high.empty_confidence >= low.empty_confidence);

        let full = features([0.3; 5], 0.4);
        let low = agg.classify(&full, &ObjectEvidence::unavailable(), 0.3, None);
        let high = agg.classify(&full, &ObjectEvidence::unavailable(), 0.9, None);
        assert!(!low.is_empty && !high.is_empty);
        assert!(high.fullness_score <= low.fullness_score);
    }

    #[test]
    fn empty_history_carries_a_borderline_frame() {
        let agg = aggregator();
        let borderline = features([1.0, 0.0, 0.0, 0.0, 0.0], 0.1);
        let alone = agg.classify(&borderline, &ObjectEvidence::unavailable(), 0.5, None);
        assert!(!alone.is_empty);

        let after_empty = agg.classify(&borderline, &ObjectEvidence::unavailable(), 0.5, Some(1.0));
        assert!(after_empty.is_empty);
        assert_eq!(after_empty.indicator_count, 1);
        // (unbanded 0.2 + boost 0.3) * (1 + 0.5 * 0.2)
        assert!((after_empty.empty_confidence - 0.55).abs() < 1e-9);

        // One of three previous frames empty: boost 0.1 stays under the promotion bar.
        let mixed = agg.classify(&borderline, &ObjectEvidence::unavailable(), 0.5, Some(1.0 / 3.0));
        assert!(!mixed.is_empty);
    }

    #[test]
    fn empty_history_raises_empty_confidence() {
        let agg = aggregator();
        let empty = features([1.0, 1.0, 1.0, 0.0, 0.0], 0.0);
        let fresh = agg.classify(&empty, &ObjectEvidence::unavailable(), 0.5, None);
        let settled = agg.classify(&empty, &ObjectEvidence::unavailable(), 0.5, Some(1.0));
        assert!(fresh.is_empty && settled.is_empty);
        assert!((fresh.empty_confidence - 0.55 * 1.1).abs() < 1e-9);
        assert!((settled.empty_confidence - 0.85 * 1.1).abs() < 1e-9);
    }

    #[test]
    fn degraded_method_neither_votes_nor_scores() {
        let mut f = features([1.0, 0.0, 1.0, 0.0, 0.0], 0.2);
        f.color = Err(ExtractError::UnsupportedChannels {
            method: Method::ColorConcentration,
            channels: 2,
        });
        let c = aggregator().classify(&f, &ObjectEvidence::unavailable(), 0.7, None);
        assert_eq!(c.indicator_count, 1);
        assert!(!c.is_empty);
        assert_eq!(c.method_scores.color_concentration, 0.0);
        assert_eq!(c.degraded_methods, vec![Method::ColorConcentration]);
    }
}
