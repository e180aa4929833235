// THEORY:
// `ShardedMonitor` runs many sections in parallel without sharing any section state.
// It spawns a pool of tokio worker tasks; each worker owns a complete `ShelfMonitor` and
// therefore exclusively owns every section routed to it. A section is always routed to the
// same worker by a stable hash of its name, so its history is only ever touched by one task
// and no lock guards it.
//
// Requests travel to workers over unbounded mpsc channels and answers come back on oneshot
// channels. Whole-frame analysis is broadcast to every worker (each analyses its own
// sections) and fanned in with `join_all`. Sensitivity changes and resets are broadcast too.

use crate::config::MonitorConfig;
use crate::core_modules::alert_policy::ChannelAlertSink;
use crate::core_modules::object_evidence::{NullProvider, ObjectEvidenceProvider};
use crate::core_modules::region::Region;
use crate::core_modules::section::Section;
use crate::core_modules::stabilizer::SectionStatistics;
use crate::pipeline::{AnalysisResult, ShelfMonitor, resolve_timestamp};
use anyhow::{Context, anyhow};
use futures::future::join_all;
use log::{debug, info};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum Command {
    Analyze {
        region: Region,
        section: String,
        timestamp: Option<f64>,
        reply: oneshot::Sender<AnalysisResult>,
    },
    AnalyzeFrame {
        frame: Arc<Region>,
        timestamp: f64,
        reply: oneshot::Sender<Vec<AnalysisResult>>,
    },
    Statistics {
        section: String,
        reply: oneshot::Sender<Option<SectionStatistics>>,
    },
    Register(Section),
    Remove {
        section: String,
        reply: oneshot::Sender<Option<Section>>,
    },
    UpdateSensitivity(f64),
    Reset(Option<String>),
}

fn shard_index(section: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    section.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

async fn run_worker(mut monitor: ShelfMonitor, mut receiver: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = receiver.recv().await {
        match command {
            Command::Analyze {
                region,
                section,
                timestamp,
                reply,
            } => {
                let _ = reply.send(monitor.analyze(&region, &section, timestamp));
            }
            Command::AnalyzeFrame {
                frame,
                timestamp,
                reply,
            } => {
                let _ = reply.send(monitor.analyze_frame(&frame, Some(timestamp)));
            }
            Command::Statistics { section, reply } => {
                let _ = reply.send(monitor.statistics(&section));
            }
            Command::Register(section) => {
                monitor.register_section(section);
            }
            Command::Remove { section, reply } => {
                let _ = reply.send(monitor.remove_section(&section));
            }
            Command::UpdateSensitivity(value) => monitor.update_sensitivity(value),
            Command::Reset(section) => monitor.reset_history(section.as_deref()),
        }
    }
}

pub struct ShardedMonitor {
    shards: Vec<mpsc::UnboundedSender<Command>>,
    workers: Vec<JoinHandle<()>>,
    /// Registration order, for ordering whole-frame results.
    sections: Vec<String>,
}

impl ShardedMonitor {
    /// Spawns workers without an object detector. Must be called inside a tokio runtime.
    pub fn new(config: MonitorConfig) -> Self {
        Self::spawn(config, || Box::new(NullProvider) as Box<dyn ObjectEvidenceProvider>, None)
    }

    /// Spawns `config.workers` (default: one per CPU) workers. Each worker gets its own
    /// provider from `provider_factory` and, if given, a clone of `alerts`.
    pub fn spawn<F>(config: MonitorConfig, provider_factory: F, alerts: Option<ChannelAlertSink>) -> Self
    where
        F: Fn() -> Box<dyn ObjectEvidenceProvider>,
    {
        let config = config.sanitized();
        let worker_count = config.workers.unwrap_or_else(num_cpus::get).max(1);
        let mut shards = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let (sender, receiver) = mpsc::unbounded_channel();
            let mut worker_config = config.clone();
            worker_config.sections.clear();
            let mut monitor = ShelfMonitor::new(worker_config).with_provider(provider_factory());
            if let Some(sink) = &alerts {
                monitor = monitor.with_alert_sink(Box::new(sink.clone()));
            }
            workers.push(tokio::spawn(run_worker(monitor, receiver)));
            shards.push(sender);
        }
        info!("sharded monitor started with {worker_count} workers");

        let mut sharded = Self {
            shards,
            workers,
            sections: Vec::new(),
        };
        for section in config.sections {
            sharded.register_section(section);
        }
        sharded
    }

    pub fn worker_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, section: &str) -> &mpsc::UnboundedSender<Command> {
        &self.shards[shard_index(section, self.shards.len())]
    }

    fn send(&self, shard: &mpsc::UnboundedSender<Command>, command: Command) -> anyhow::Result<()> {
        shard
            .send(command)
            .map_err(|_| anyhow!("monitor worker has stopped"))
    }

    fn broadcast(&self, make: impl Fn() -> Command) -> anyhow::Result<()> {
        for shard in &self.shards {
            self.send(shard, make())?;
        }
        Ok(())
    }

    pub fn register_section(&mut self, section: Section) {
        if !self.sections.contains(&section.name) {
            self.sections.push(section.name.clone());
        }
        let shard = self.shard_for(&section.name).clone();
        if self.send(&shard, Command::Register(section)).is_err() {
            debug!("register ignored: worker stopped");
        }
    }

    pub async fn remove_section(&mut self, section: &str) -> anyhow::Result<Option<Section>> {
        self.sections.retain(|name| name != section);
        let (reply, answer) = oneshot::channel();
        self.send(
            self.shard_for(section),
            Command::Remove {
                section: section.to_string(),
                reply,
            },
        )?;
        answer.await.context("monitor worker dropped remove request")
    }

    pub async fn analyze(
        &self,
        region: Region,
        section: &str,
        timestamp: Option<f64>,
    ) -> anyhow::Result<AnalysisResult> {
        let (reply, answer) = oneshot::channel();
        self.send(
            self.shard_for(section),
            Command::Analyze {
                region,
                section: section.to_string(),
                timestamp,
                reply,
            },
        )?;
        answer.await.context("monitor worker dropped analysis request")
    }

    /// Analyses a batch of (region, section) pairs concurrently across workers.
    pub async fn analyze_batch(
        &self,
        batch: Vec<(Region, String)>,
        timestamp: Option<f64>,
    ) -> Vec<anyhow::Result<AnalysisResult>> {
        let requests = batch
            .into_iter()
            .map(|(region, section)| async move { self.analyze(region, &section, timestamp).await });
        join_all(requests).await
    }

    /// Analyses every registered section of `frame`, in registration order.
    pub async fn analyze_frame(
        &self,
        frame: Region,
        timestamp: Option<f64>,
    ) -> anyhow::Result<Vec<AnalysisResult>> {
        let now = resolve_timestamp(timestamp);
        let frame = Arc::new(frame);
        let mut answers = Vec::with_capacity(self.shards.len());
        for shard in &self.shards {
            let (reply, answer) = oneshot::channel();
            self.send(
                shard,
                Command::AnalyzeFrame {
                    frame: Arc::clone(&frame),
                    timestamp: now,
                    reply,
                },
            )?;
            answers.push(answer);
        }

        let mut results = Vec::new();
        for answer in join_all(answers).await {
            results.extend(answer.context("monitor worker dropped frame request")?);
        }
        results.sort_by_key(|r| {
            self.sections
                .iter()
                .position(|name| *name == r.section)
                .unwrap_or(usize::MAX)
        });
        Ok(results)
    }

    pub async fn statistics(&self, section: &str) -> anyhow::Result<Option<SectionStatistics>> {
        let (reply, answer) = oneshot::channel();
        self.send(
            self.shard_for(section),
            Command::Statistics {
                section: section.to_string(),
                reply,
            },
        )?;
        answer.await.context("monitor worker dropped statistics request")
    }

    pub fn update_sensitivity(&self, sensitivity: f64) -> anyhow::Result<()> {
        self.broadcast(|| Command::UpdateSensitivity(sensitivity))
    }

    pub fn reset_history(&self, section: Option<&str>) -> anyhow::Result<()> {
        match section {
            Some(name) => self.send(self.shard_for(name), Command::Reset(Some(name.to_string()))),
            None => self.broadcast(|| Command::Reset(None)),
        }
    }

    /// Closes every worker channel and waits for the workers to drain.
    pub async fn shutdown(self) {
        drop(self.shards);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_stable() {
        let first = shard_index("Beverages", 4);
        for _ in 0..10 {
            assert_eq!(shard_index("Beverages", 4), first);
        }
        assert!(first < 4);
        assert_eq!(shard_index("anything", 1), 0);
    }

    #[tokio::test]
    async fn sections_keep_history_on_their_shard() {
        let mut config = MonitorConfig::default();
        config.workers = Some(3);
        let monitor = ShardedMonitor::new(config);
        assert_eq!(monitor.worker_count(), 3);

        for t in 0..4 {
            let region = Region::filled(60, 60, &[240, 240, 240]).unwrap();
            monitor.analyze(region, "Dairy", Some(t as f64)).await.unwrap();
        }
        let stats = monitor.statistics("Dairy").await.unwrap().unwrap();
        assert_eq!(stats.history_length, 4);
        assert_eq!(stats.frame_count, 4);

        monitor.reset_history(None).unwrap();
        assert!(monitor.statistics("Dairy").await.unwrap().is_none());
        monitor.shutdown().await;
    }
}
