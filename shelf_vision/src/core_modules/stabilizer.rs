// THEORY:
// A single frame is a noisy witness: a shopper's arm, a reflection or a lighting flicker can
// flip a classification for one frame. The stabilizer gives each section a short memory so the
// rest of the engine can ask "has this been true for a while?" instead of "is this true now?".
//
// Each section owns a bounded `VecDeque` of `HistoryRecord`s (oldest evicted first) and derives:
// - stability: how many of the newest records agree with the newest record's verdict.
// - trend: whether mean fullness is rising, falling or flat across the recent window.
// - recent empty share: the fraction of the last few records judged empty, which the
//   aggregator turns into a temporal boost for the next frame.
//
// The state also carries the alert bookkeeping (`last_alert_timestamp`) and a frame counter,
// so that clearing a section is a single operation on a single value.

use crate::config::StabilizerConfig;
use crate::core_modules::aggregator::MethodScores;
use crate::core_modules::alert_policy::VisualState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Upper bound on the reported stability.
pub const MAX_STABILITY: u32 = 5;

/// One analysed frame, as remembered by the stabilizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: f64,
    pub is_empty: bool,
    pub empty_confidence: f64,
    pub fullness_score: f64,
    pub visual_state: VisualState,
    pub method_scores: MethodScores,
}

/// Direction of recent fullness change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Filling,
    Emptying,
    Stable,
    /// Not enough history yet.
    Unknown,
}

/// Read-only summary of a section's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionStatistics {
    pub history_length: usize,
    /// Percentage (0-100) of remembered frames classified empty.
    pub empty_percentage: f64,
    pub average_confidence: f64,
    pub average_fullness: f64,
    pub last_timestamp: Option<f64>,
    pub last_alert_timestamp: Option<f64>,
    pub frame_count: u64,
    /// How full the history buffer is, in [0, 1].
    pub fill_ratio: f64,
    pub stability: u32,
    pub trend: Trend,
}

/// Everything the engine remembers about one section.
#[derive(Debug, Clone)]
pub struct SectionState {
    // --- History ---
    history: VecDeque<HistoryRecord>,
    capacity: usize,

    // --- Alerting ---
    /// Time of the last fired alert. `None` means no alert has fired.
    pub last_alert_timestamp: Option<f64>,

    // --- Bookkeeping ---
    frame_count: u64,
}

impl SectionState {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            last_alert_timestamp: None,
            frame_count: 0,
        }
    }

    pub fn history(&self) -> &VecDeque<HistoryRecord> {
        &self.history
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Appends a record, evicting the oldest when full.
    pub fn push(&mut self, record: HistoryRecord) {
        self.history.push_back(record);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self.frame_count += 1;
    }

    fn recent(&self, window: usize) -> impl Iterator<Item = &HistoryRecord> {
        let skip = self.history.len().saturating_sub(window);
        self.history.iter().skip(skip)
    }

    /// Fraction of the newest `window` records classified empty. `None` until that many exist.
    pub fn recent_empty_share(&self, window: usize) -> Option<f64> {
        if window == 0 || self.history.len() < window {
            return None;
        }
        let empty = self.recent(window).filter(|r| r.is_empty).count();
        Some(empty as f64 / window as f64)
    }

    /// Number of the newest `window` records that share the newest record's verdict.
    pub fn stability(&self, window: usize) -> u32 {
        let Some(newest) = self.history.back() else {
            return 0;
        };
        let agreeing = self
            .recent(window)
            .filter(|r| r.is_empty == newest.is_empty)
            .count() as u32;
        agreeing.min(MAX_STABILITY)
    }

    pub fn trend(&self, config: &StabilizerConfig) -> Trend {
        let fullness: Vec<f64> = self.recent(config.window).map(|r| r.fullness_score).collect();
        let n = fullness.len();
        if n < config.trend_min_records {
            return Trend::Unknown;
        }
        let half = n.div_ceil(2);
        let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
        let earlier = mean(&fullness[..half]);
        let later = mean(&fullness[n - half..]);
        let delta = later - earlier;
        if delta > config.trend_delta {
            Trend::Filling
        } else if delta < -config.trend_delta {
            Trend::Emptying
        } else {
            Trend::Stable
        }
    }

    pub fn statistics(&self, config: &StabilizerConfig) -> SectionStatistics {
        let len = self.history.len();
        let (empty, confidence, fullness) = self.history.iter().fold(
            (0usize, 0.0, 0.0),
            |(empty, confidence, fullness), r| {
                (
                    empty + usize::from(r.is_empty),
                    confidence + r.empty_confidence,
                    fullness + r.fullness_score,
                )
            },
        );
        let average = |total: f64| if len == 0 { 0.0 } else { total / len as f64 };

        SectionStatistics {
            history_length: len,
            empty_percentage: average(empty as f64) * 100.0,
            average_confidence: average(confidence),
            average_fullness: average(fullness),
            last_timestamp: self.history.back().map(|r| r.timestamp),
            last_alert_timestamp: self.last_alert_timestamp,
            frame_count: self.frame_count,
            fill_ratio: len as f64 / self.capacity as f64,
            stability: self.stability(config.window),
            trend: self.trend(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(t: f64, is_empty: bool, fullness: f64) -> HistoryRecord {
        HistoryRecord {
            timestamp: t,
            is_empty,
            empty_confidence: 1.0 - fullness,
            fullness_score: fullness,
            visual_state: if is_empty { VisualState::MostlyEmpty } else { VisualState::WellStocked },
            method_scores: MethodScores::default(),
        }
    }

    #[test]
    fn history_is_bounded() {
        let mut state = SectionState::new(10);
        for i in 0..15 {
            state.push(record(i as f64, true, 0.2));
        }
        assert_eq!(state.history().len(), 10);
        assert_eq!(state.history().front().unwrap().timestamp, 5.0);
        assert_eq!(state.frame_count(), 15);
    }

    #[test]
    fn stability_counts_agreeing_recent_records() {
        let mut state = SectionState::new(10);
        assert_eq!(state.stability(5), 0);
        for verdict in [true, true, false, true, true, true] {
            state.push(record(0.0, verdict, 0.5));
        }
        assert_eq!(state.stability(5), 4);
        for _ in 0..6 {
            state.push(record(0.0, true, 0.5));
        }
        assert_eq!(state.stability(5), MAX_STABILITY);
    }

    #[test]
    fn empty_share_needs_a_full_window() {
        let mut state = SectionState::new(10);
        state.push(record(0.0, false, 0.8));
        state.push(record(1.0, true, 0.1));
        assert_eq!(state.recent_empty_share(3), None);
        state.push(record(2.0, true, 0.1));
        assert_eq!(state.recent_empty_share(3), Some(2.0 / 3.0));
        state.push(record(3.0, true, 0.1));
        assert_eq!(state.recent_empty_share(3), Some(1.0));
    }

    #[test]
    fn trend_needs_enough_records() {
        let config = StabilizerConfig::default();
        let mut state = SectionState::new(10);
        state.push(record(0.0, false, 0.9));
        state.push(record(1.0, false, 0.2));
        assert_eq!(state.trend(&config), Trend::Unknown);
    }

    #[test]
    fn trend_compares_early_and_late_halves() {
        let config = StabilizerConfig::default();
        let mut emptying = SectionState::new(10);
        for (i, f) in [0.9, 0.85, 0.6, 0.3, 0.2].iter().enumerate() {
            emptying.push(record(i as f64, false, *f));
        }
        assert_eq!(emptying.trend(&config), Trend::Emptying);

        let mut filling = SectionState::new(10);
        for (i, f) in [0.1, 0.2, 0.6].iter().enumerate() {
            filling.push(record(i as f64, false, *f));
        }
        assert_eq!(filling.trend(&config), Trend::Filling);

        let mut flat = SectionState::new(10);
        for i in 0..4 {
            flat.push(record(i as f64, false, 0.5));
        }
        assert_eq!(flat.trend(&config), Trend::Stable);
    }

    #[test]
    fn statistics_summarize_history() {
        let mut state = SectionState::new(10);
        state.push(record(1.0, true, 0.2));
        state.push(record(2.0, false, 0.8));
        state.last_alert_timestamp = Some(1.0);
        let stats = state.statistics(&StabilizerConfig::default());
        assert_eq!(stats.history_length, 2);
        assert_eq!(stats.empty_percentage, 50.0);
        assert!((stats.average_confidence - 0.5).abs() < 1e-12);
        assert_eq!(stats.last_timestamp, Some(2.0));
        assert_eq!(stats.last_alert_timestamp, Some(1.0));
        assert_eq!(stats.fill_ratio, 0.2);
        assert_eq!(stats.trend, Trend::Unknown);
    }
}
