// THEORY:
// The alert policy is the last gate between a classification and a human being told to refill a
// shelf. An alert needs an empty verdict above the confidence threshold that has held for
// several frames, and a section that just alerted stays quiet for a cooldown period.
//
// Per-section alert state is two-valued and derived on demand from `last_alert_timestamp`:
// - Idle: never alerted, or the cooldown has elapsed.
// - CoolingDown: alerted less than `cooldown_seconds` ago.
//
// The policy also owns the human-facing labels (`VisualState`, `AlertLevel`) because both are
// pure functions of the same (is_empty, confidence) pair it gates on. Delivery of a fired alert
// is delegated to an `AlertSink`; the engine works the same with or without one.

use crate::config::AlertConfig;
use crate::core_modules::stabilizer::SectionState;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Operator-facing description of how empty a section looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualState {
    WellStocked,
    CriticallyEmpty,
    MostlyEmpty,
    PartiallyEmpty,
    LowStock,
    Uncertain,
}

impl VisualState {
    pub fn classify(is_empty: bool, confidence: f64) -> Self {
        if !is_empty {
            return VisualState::WellStocked;
        }
        match confidence {
            c if c >= 0.85 => VisualState::CriticallyEmpty,
            c if c >= 0.70 => VisualState::MostlyEmpty,
            c if c >= 0.55 => VisualState::PartiallyEmpty,
            c if c >= 0.40 => VisualState::LowStock,
            _ => VisualState::Uncertain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    None,
    Critical,
    High,
    Medium,
    Low,
}

impl AlertLevel {
    pub fn classify(is_empty: bool, confidence: f64) -> Self {
        if !is_empty {
            return AlertLevel::None;
        }
        match confidence {
            c if c >= 0.85 => AlertLevel::Critical,
            c if c >= 0.70 => AlertLevel::High,
            c if c >= 0.55 => AlertLevel::Medium,
            _ => AlertLevel::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    CoolingDown,
}

/// A fired refill alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub section: String,
    pub confidence: f64,
    pub timestamp: f64,
    pub alert_level: AlertLevel,
    pub message: String,
}

impl AlertEvent {
    pub fn refill_message(section: &str) -> String {
        format!("Refill {section} Section")
    }
}

/// Receives alerts as they fire. Delivery must not block the engine.
pub trait AlertSink: Send {
    fn deliver(&mut self, event: &AlertEvent);
}

/// Writes alerts to the log at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn deliver(&mut self, event: &AlertEvent) {
        info!(
            "ALERT [{:?}] {} (confidence {:.2}, t={:.2})",
            event.alert_level, event.message, event.confidence, event.timestamp
        );
    }
}

/// Forwards alerts into a tokio channel for an async consumer.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    sender: mpsc::UnboundedSender<AlertEvent>,
}

impl ChannelAlertSink {
    pub fn new(sender: mpsc::UnboundedSender<AlertEvent>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AlertEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl AlertSink for ChannelAlertSink {
    fn deliver(&mut self, event: &AlertEvent) {
        // A closed receiver only means nobody is listening any more.
        let _ = self.sender.send(event.clone());
    }
}

pub struct AlertPolicy {
    config: AlertConfig,
}

impl AlertPolicy {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn phase(&self, state: &SectionState, now: f64) -> AlertPhase {
        let Some(last) = state.last_alert_timestamp else {
            return AlertPhase::Idle;
        };
        // An elapsed time that cannot be measured never ends a cooldown.
        let elapsed = now - last;
        if elapsed.is_nan() || elapsed < self.config.cooldown_seconds {
            AlertPhase::CoolingDown
        } else {
            AlertPhase::Idle
        }
    }

    /// Decides whether to alert and, if so, records the alert time on `state`.
    pub fn evaluate(
        &self,
        state: &mut SectionState,
        section: &str,
        is_empty: bool,
        confidence: f64,
        stability: u32,
        now: f64,
        threshold: Option<f64>,
    ) -> Option<AlertEvent> {
        let threshold = threshold.unwrap_or(self.config.threshold);
        let fire = is_empty
            && confidence >= threshold
            && stability >= self.config.min_stability
            && self.phase(state, now) == AlertPhase::Idle;
        if !fire {
            return None;
        }

        state.last_alert_timestamp = Some(now);
        Some(AlertEvent {
            section: section.to_string(),
            confidence,
            timestamp: now,
            alert_level: AlertLevel::classify(is_empty, confidence),
            message: AlertEvent::refill_message(section),
        })
    }
}
