// THEORY:
// The `pipeline` module is the top-level API of the engine. `ShelfMonitor` wires the stages
// together and owns every piece of per-section runtime state, so a host only ever deals with
// one value:
//
//   region -> extractors (+ object evidence) -> aggregator -> stabilizer -> alert policy
//
// The monitor is synchronous and does no I/O. Each call to `analyze` takes one region and one
// section name and returns a fixed-schema `AnalysisResult`; inputs that cannot be analysed
// (too small, malformed) produce a canned rejection result rather than an error, and leave the
// section's history untouched.

use crate::config::{MonitorConfig, clamp_sensitivity};
use crate::core_modules::aggregator::{Classification, ConfidenceAggregator, MethodScores};
use crate::core_modules::alert_policy::{AlertLevel, AlertPolicy, AlertSink, VisualState};
use crate::core_modules::extractors::{Method, extract_all};
use crate::core_modules::object_evidence::{ObjectEvidenceAdapter, ObjectEvidenceProvider};
use crate::core_modules::region::{Region, RegionError};
use crate::core_modules::section::Section;
use crate::core_modules::stabilizer::{HistoryRecord, SectionState, SectionStatistics, Trend};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

// Re-export key data structures for the public API.
pub use crate::core_modules::alert_policy::AlertEvent;

/// Why a region was not analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Below the minimum region size.
    TooSmall,
    /// Malformed buffer, or geometry that does not map onto the frame.
    InvalidRegion,
}

impl From<&RegionError> for Rejection {
    fn from(err: &RegionError) -> Self {
        match err {
            RegionError::TooSmall { .. } => Rejection::TooSmall,
            _ => Rejection::InvalidRegion,
        }
    }
}

/// The result of analysing one section in one frame. Every field is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub section: String,
    pub is_empty: bool,
    pub empty_confidence: f64,
    pub fullness_score: f64,
    pub should_alert: bool,
    pub stability: u32,
    pub trend: Trend,
    pub method_scores: MethodScores,
    pub visual_state: VisualState,
    pub alert_level: AlertLevel,
    pub object_evidence_available: bool,
    pub product_count: usize,
    pub indicator_count: u32,
    pub degraded_methods: Vec<Method>,
    pub rejection: Option<Rejection>,
    pub frame_count: u64,
    pub timestamp: f64,
}

fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The caller's timestamp, or the wall clock when it is missing or not finite.
pub(crate) fn resolve_timestamp(timestamp: Option<f64>) -> f64 {
    match timestamp {
        Some(t) if t.is_finite() => t,
        Some(t) => {
            warn!("timestamp {t} is not finite, using wall clock");
            wall_clock_seconds()
        }
        None => wall_clock_seconds(),
    }
}

/// The empty-shelf classification engine.
pub struct ShelfMonitor {
    config: MonitorConfig,
    sensitivity: f64,
    aggregator: ConfidenceAggregator,
    alert_policy: AlertPolicy,
    evidence: ObjectEvidenceAdapter,
    alert_sink: Option<Box<dyn AlertSink>>,
    sections: Vec<Section>,
    states: HashMap<String, SectionState>,
}

impl ShelfMonitor {
    /// Builds a monitor without an object detector. Sections listed in the config are registered.
    pub fn new(config: MonitorConfig) -> Self {
        let config = config.sanitized();
        Self {
            sensitivity: config.sensitivity,
            aggregator: ConfidenceAggregator::new(config.aggregator.clone()),
            alert_policy: AlertPolicy::new(config.alerts.clone()),
            evidence: ObjectEvidenceAdapter::without_detector(&config.object_evidence),
            alert_sink: None,
            sections: config.sections.clone(),
            states: HashMap::new(),
            config,
        }
    }

    pub fn with_provider(mut self, provider: Box<dyn ObjectEvidenceProvider>) -> Self {
        self.evidence = ObjectEvidenceAdapter::new(provider, &self.config.object_evidence);
        self
    }

    pub fn with_alert_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn detector_name(&self) -> &str {
        self.evidence.provider_name()
    }

    // --- Section registry ---

    /// Registers a section, replacing any section with the same name. Existing history is kept.
    pub fn register_section(&mut self, mut section: Section) -> Option<Section> {
        section.sanitize_overrides();
        match self.sections.iter_mut().find(|s| s.name == section.name) {
            Some(existing) => Some(std::mem::replace(existing, section)),
            None => {
                self.sections.push(section);
                None
            }
        }
    }

    /// Removes a section together with its history and alert cooldown.
    pub fn remove_section(&mut self, name: &str) -> Option<Section> {
        self.states.remove(name);
        let index = self.sections.iter().position(|s| s.name == name)?;
        Some(self.sections.remove(index))
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    // --- Runtime controls ---

    pub fn update_sensitivity(&mut self, sensitivity: f64) {
        self.sensitivity = clamp_sensitivity(sensitivity);
        info!("sensitivity set to {:.2}", self.sensitivity);
    }

    /// Clears one section's state, or every section's when `section` is `None`.
    pub fn reset_history(&mut self, section: Option<&str>) {
        match section {
            Some(name) => {
                self.states.remove(name);
            }
            None => self.states.clear(),
        }
    }

    pub fn statistics(&self, section: &str) -> Option<SectionStatistics> {
        self.states
            .get(section)
            .map(|state| state.statistics(&self.config.stabilizer))
    }

    // --- Analysis ---

    fn rejected(&self, section: &str, rejection: Rejection, now: f64) -> AnalysisResult {
        AnalysisResult {
            section: section.to_string(),
            is_empty: true,
            empty_confidence: 1.0,
            fullness_score: 0.0,
            should_alert: false,
            stability: 0,
            trend: Trend::Unknown,
            method_scores: MethodScores::default(),
            visual_state: VisualState::Uncertain,
            alert_level: AlertLevel::None,
            object_evidence_available: false,
            product_count: 0,
            indicator_count: 0,
            degraded_methods: Vec::new(),
            rejection: Some(rejection),
            frame_count: self.states.get(section).map_or(0, |s| s.frame_count()),
            timestamp: now,
        }
    }

    /// Classifies `region` as the current view of `section_name`.
    ///
    /// `timestamp` is in seconds; the wall clock is used when it is `None` or not finite.
    pub fn analyze(&mut self, region: &Region, section_name: &str, timestamp: Option<f64>) -> AnalysisResult {
        let now = resolve_timestamp(timestamp);
        if let Err(err) = region.ensure_min_size(self.config.min_region_size) {
            debug!("section {section_name}: {err}");
            return self.rejected(section_name, Rejection::from(&err), now);
        }

        let section = self.section(section_name);
        let sensitivity = section.and_then(|s| s.sensitivity).unwrap_or(self.sensitivity);
        let threshold = section.and_then(|s| s.threshold);

        // Stage 1: single-frame evidence.
        let features = extract_all(region, &self.config.extractors, section_name);
        let evidence = self.evidence.evaluate(region, section_name);

        // Stage 2: decision, smoothed by the section's previous frames.
        let recent_empty_share = self
            .states
            .get(section_name)
            .and_then(|state| state.recent_empty_share(self.config.stabilizer.consistency_window));
        let Classification {
            is_empty,
            empty_confidence,
            fullness_score,
            method_scores,
            indicator_count,
            indicators,
            degraded_methods,
        } = self
            .aggregator
            .classify(&features, &evidence, sensitivity, recent_empty_share);
        let visual_state = VisualState::classify(is_empty, empty_confidence);

        // Stage 3: temporal smoothing.
        let capacity = self.config.stabilizer.history_capacity;
        let state = self
            .states
            .entry(section_name.to_string())
            .or_insert_with(|| SectionState::new(capacity));
        state.push(HistoryRecord {
            timestamp: now,
            is_empty,
            empty_confidence,
            fullness_score,
            visual_state,
            method_scores,
        });
        let stability = state.stability(self.config.stabilizer.window);
        let trend = state.trend(&self.config.stabilizer);

        // Stage 4: alerting.
        let alert = self.alert_policy.evaluate(
            state,
            section_name,
            is_empty,
            empty_confidence,
            stability,
            now,
            threshold,
        );
        let frame_count = state.frame_count();

        debug!(
            "section {section_name}: empty={is_empty} conf={empty_confidence:.3} fullness={fullness_score:.3} \
             N={indicator_count} {indicators:?} stability={stability} trend={trend:?}"
        );
        if !degraded_methods.is_empty() {
            debug!("section {section_name}: degraded methods {degraded_methods:?}");
        }
        let should_alert = alert.is_some();
        if let (Some(event), Some(sink)) = (alert.as_ref(), self.alert_sink.as_mut()) {
            sink.deliver(event);
        }

        AnalysisResult {
            section: section_name.to_string(),
            is_empty,
            empty_confidence,
            fullness_score,
            should_alert,
            stability,
            trend,
            method_scores,
            visual_state,
            alert_level: AlertLevel::classify(is_empty, empty_confidence),
            object_evidence_available: evidence.available,
            product_count: evidence.product_count,
            indicator_count,
            degraded_methods,
            rejection: None,
            frame_count,
            timestamp: now,
        }
    }

    /// Cuts every registered section out of `frame` and analyses it, in registration order.
    pub fn analyze_frame(&mut self, frame: &Region, timestamp: Option<f64>) -> Vec<AnalysisResult> {
        let now = resolve_timestamp(timestamp);
        let sections: Vec<Section> = self.sections.clone();
        sections
            .iter()
            .map(|section| match frame.extract(&section.geometry) {
                Ok(region) => self.analyze(&region, &section.name, Some(now)),
                Err(err) => {
                    warn!("section {}: cannot extract region: {err}", section.name);
                    self.rejected(&section.name, Rejection::from(&err), now)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_region(size: u32, value: u8) -> Region {
        Region::filled(size, size, &[value, value, value]).unwrap()
    }

    #[test]
    fn too_small_region_is_rejected_without_state() {
        let mut monitor = ShelfMonitor::new(MonitorConfig::default());
        let result = monitor.analyze(&gray_region(10, 240), "Tiny", Some(1.0));
        assert!(result.is_empty);
        assert_eq!(result.empty_confidence, 1.0);
        assert_eq!(result.rejection, Some(Rejection::TooSmall));
        assert!(!result.should_alert);
        assert!(monitor.statistics("Tiny").is_none());
    }

    #[test]
    fn sensitivity_is_clamped() {
        let mut monitor = ShelfMonitor::new(MonitorConfig::default());
        monitor.update_sensitivity(5.0);
        assert_eq!(monitor.sensitivity(), 1.0);
        monitor.update_sensitivity(0.0);
        assert_eq!(monitor.sensitivity(), 0.1);
    }

    #[test]
    fn register_replaces_by_name() {
        let mut monitor = ShelfMonitor::new(MonitorConfig::default());
        assert!(monitor.register_section(Section::rect("A", 0, 0, 50, 50)).is_none());
        let previous = monitor.register_section(Section::rect("A", 10, 10, 50, 50).with_sensitivity(9.0));
        assert_eq!(previous.unwrap().geometry, Section::rect("A", 0, 0, 50, 50).geometry);
        assert_eq!(monitor.sections().len(), 1);
        assert_eq!(monitor.sections()[0].sensitivity, Some(1.0));
    }

    #[test]
    fn register_clamps_threshold_override() {
        let mut monitor = ShelfMonitor::new(MonitorConfig::default());
        monitor.register_section(Section::rect("A", 0, 0, 50, 50).with_threshold(1.8));
        monitor.register_section(Section::rect("B", 0, 0, 50, 50).with_threshold(-0.3));
        assert_eq!(monitor.sections()[0].threshold, Some(1.0));
        assert_eq!(monitor.sections()[1].threshold, Some(0.0));
    }

    #[test]
    fn non_finite_timestamp_falls_back_to_wall_clock() {
        let mut monitor = ShelfMonitor::new(MonitorConfig::default());
        let result = monitor.analyze(&gray_region(60, 200), "A", Some(f64::NAN));
        assert!(result.timestamp.is_finite());
        assert!(result.timestamp > 1_000_000_000.0);
        let result = monitor.analyze(&gray_region(60, 200), "A", Some(f64::INFINITY));
        assert!(result.timestamp.is_finite());
        assert_eq!(resolve_timestamp(Some(3.5)), 3.5);
    }

    #[test]
    fn reset_clears_selected_history() {
        let mut monitor = ShelfMonitor::new(MonitorConfig::default());
        let region = gray_region(60, 200);
        monitor.analyze(&region, "A", Some(0.0));
        monitor.analyze(&region, "B", Some(0.0));
        monitor.reset_history(Some("A"));
        assert!(monitor.statistics("A").is_none());
        assert!(monitor.statistics("B").is_some());
        monitor.reset_history(None);
        assert!(monitor.statistics("B").is_none());
    }
}
