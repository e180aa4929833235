// Stages of the engine, leaf-first: pixels and regions, single-frame extractors, detector
// evidence, vote aggregation, temporal history, alerting.

pub mod pixel;
pub mod region;
pub mod section;

pub mod extractors;
pub mod object_evidence;

pub mod aggregator;
pub mod alert_policy;
pub mod stabilizer;
