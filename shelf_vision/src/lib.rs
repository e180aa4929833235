// THEORY:
// This file is the main entry point for the `shelf_vision` library crate.
// It exposes two ways to run the empty-shelf classification engine:
// - `pipeline::ShelfMonitor`: a synchronous engine that owns every section's state.
// - `parallel_pipeline::ShardedMonitor`: a pool of tokio workers, each owning a shard of
//   sections, for hosts that monitor many sections at once.
//
// The analyzers in `core_modules` are public so hosts can run a single stage (for example a
// custom detector provider or a single extractor) but most consumers only need the re-exports
// below.

pub mod config;
pub mod core_modules;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::MonitorConfig;
pub use core_modules::alert_policy::{
    AlertEvent, AlertLevel, AlertSink, ChannelAlertSink, LogAlertSink, VisualState,
};
pub use core_modules::object_evidence::{
    BoundingBox, Detection, FnProvider, NullProvider, ObjectEvidenceProvider,
};
pub use core_modules::region::{Region, RegionError};
pub use core_modules::section::{FramePoint, Section, SectionGeometry};
pub use core_modules::stabilizer::{SectionStatistics, Trend};
pub use parallel_pipeline::ShardedMonitor;
pub use pipeline::{AnalysisResult, Rejection, ShelfMonitor};
