//! Running one discovery stage under a deadline

use lanscope_core::Technique;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{timeout, Duration, Instant};
use tracing::{info, warn};

use crate::adapter::{ScanContext, TechniqueAdapter};
use crate::aggregator::DeviceAggregator;
use crate::progress::{EventStatus, ProgressReporter};

/// A step of the scan pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Discover(Technique),
    Enrichment,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Discover(technique) => technique.as_str(),
            StageId::Enrichment => "enrichment",
        }
    }
}

impl Serialize for StageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StageId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "enrichment" {
            return Ok(StageId::Enrichment);
        }
        s.parse::<Technique>()
            .map(StageId::Discover)
            .map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Error,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: StageId,
    pub status: StageStatus,
    pub observation_count: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Runs stages one after the other and tracks how far the scan has come
pub struct StageRunner<'a> {
    reporter: &'a mut ProgressReporter,
    completed: usize,
    total: usize,
}

impl<'a> StageRunner<'a> {
    pub fn new(reporter: &'a mut ProgressReporter, total: usize) -> Self {
        Self {
            reporter,
            completed: 0,
            total: total.max(1),
        }
    }

    pub fn percentage(&self) -> u8 {
        ((self.completed * 100) / self.total).min(100) as u8
    }

    pub fn reporter(&mut self) -> &mut ProgressReporter {
        self.reporter
    }

    /// Invoke `adapter` and hand its observations to `aggregator`.
    ///
    /// Adapter failure and deadline overrun are reported and returned as
    /// outcomes; neither stops the scan. On overrun the adapter future is
    /// dropped, but processes it spawned are left to finish on their own.
    pub async fn run(
        &mut self,
        stage: StageId,
        adapter: Option<&Arc<dyn TechniqueAdapter>>,
        ctx: &ScanContext,
        deadline: Duration,
        aggregator: &mut DeviceAggregator,
    ) -> StageOutcome {
        let step = stage.as_str();
        let command = adapter.map(|a| a.command());
        let started = Instant::now();

        self.reporter
            .emit(
                step,
                EventStatus::Start,
                format!("Running {}", step),
                self.percentage(),
                None,
                command.clone(),
            )
            .await;

        let Some(adapter) = adapter else {
            return self
                .finish(stage, StageStatus::Error, 0, started, Some("no adapter registered".to_string()), command)
                .await;
        };

        match timeout(deadline, adapter.invoke(ctx)).await {
            Ok(Ok(observations)) => {
                let count = observations.len();
                aggregator.merge(observations);
                info!(stage = %stage, observations = count, devices = aggregator.len(), "Stage complete");
                self.finish(stage, StageStatus::Success, count, started, None, command).await
            }
            Ok(Err(e)) => {
                warn!(stage = %stage, error = %e, "Stage failed");
                self.finish(stage, StageStatus::Error, 0, started, Some(e.to_string()), command)
                    .await
            }
            Err(_) => {
                warn!(stage = %stage, deadline_ms = deadline.as_millis() as u64, "Stage timed out");
                let message = format!("{} timed out after {} ms", step, deadline.as_millis());
                self.finish(stage, StageStatus::Timeout, 0, started, Some(message), command)
                    .await
            }
        }
    }

    /// Count a stage as done and emit its closing event
    pub async fn finish(
        &mut self,
        stage: StageId,
        status: StageStatus,
        observation_count: usize,
        started: Instant,
        message: Option<String>,
        command: Option<String>,
    ) -> StageOutcome {
        self.completed += 1;
        let outcome = StageOutcome {
            stage,
            status,
            observation_count,
            duration_ms: started.elapsed().as_millis() as u64,
            message,
        };

        let (event_status, text) = match status {
            StageStatus::Success => (
                EventStatus::Success,
                format!("{}: {} observations", stage, observation_count),
            ),
            StageStatus::Error | StageStatus::Timeout => (
                EventStatus::Error,
                outcome.message.clone().unwrap_or_else(|| format!("{} failed", stage)),
            ),
        };

        let data = serde_json::to_value(&outcome).ok();
        self.reporter
            .emit(stage.as_str(), event_status, text, self.percentage(), data, command)
            .await;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::progress::{progress_channel, ProgressEvent};
    use crate::scanner::ScanMode;
    use async_trait::async_trait;
    use lanscope_core::RawObservation;
    use uuid::Uuid;

    enum Behaviour {
        Ok(Vec<&'static str>),
        Fail,
        Hang,
    }

    struct Fake(Behaviour);

    #[async_trait]
    impl TechniqueAdapter for Fake {
        fn technique(&self) -> Technique {
            Technique::ArpTable
        }

        fn command(&self) -> String {
            "fake".to_string()
        }

        async fn invoke(&self, _ctx: &ScanContext) -> Result<Vec<RawObservation>, AdapterError> {
            match &self.0 {
                Behaviour::Ok(ips) => Ok(ips
                    .iter()
                    .map(|ip| RawObservation::new(*ip, Technique::ArpTable))
                    .collect()),
                Behaviour::Fail => Err(AdapterError::Parse("garbled".to_string())),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn ctx() -> ScanContext {
        ScanContext {
            mode: ScanMode::Fast,
            local: None,
            target: None,
            known_ips: Vec::new(),
        }
    }

    async fn run_one(behaviour: Behaviour) -> (StageOutcome, DeviceAggregator, Vec<ProgressEvent>) {
        let (tx, mut rx) = progress_channel(16);
        let mut reporter = ProgressReporter::new(Uuid::new_v4(), tx);
        let mut aggregator = DeviceAggregator::new();
        let adapter: Arc<dyn TechniqueAdapter> = Arc::new(Fake(behaviour));

        let outcome = {
            let mut runner = StageRunner::new(&mut reporter, 2);
            runner
                .run(
                    StageId::Discover(Technique::ArpTable),
                    Some(&adapter),
                    &ctx(),
                    Duration::from_millis(50),
                    &mut aggregator,
                )
                .await
        };
        drop(reporter);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, aggregator, events)
    }

    #[tokio::test]
    async fn test_success_forwards_observations() {
        let (outcome, aggregator, events) =
            run_one(Behaviour::Ok(vec!["192.168.1.2", "192.168.1.3", "224.0.0.1"])).await;

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.observation_count, 3);
        assert_eq!(aggregator.len(), 2);

        let statuses: Vec<EventStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![EventStatus::Start, EventStatus::Success]);
        assert_eq!(events[0].percentage, 0);
        assert_eq!(events[1].percentage, 50);
        assert_eq!(events[0].command.as_deref(), Some("fake"));
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let (outcome, aggregator, events) = run_one(Behaviour::Fail).await;

        assert_eq!(outcome.status, StageStatus::Error);
        assert!(outcome.message.unwrap().contains("garbled"));
        assert!(aggregator.is_empty());
        assert_eq!(events.last().unwrap().status, EventStatus::Error);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let (outcome, _, events) = run_one(Behaviour::Hang).await;

        assert_eq!(outcome.status, StageStatus::Timeout);
        assert!(outcome.duration_ms >= 50);
        assert_eq!(events.last().unwrap().status, EventStatus::Error);
        assert!(events.last().unwrap().message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_adapter_is_an_error() {
        let (tx, _rx) = progress_channel(16);
        let mut reporter = ProgressReporter::new(Uuid::new_v4(), tx);
        let mut aggregator = DeviceAggregator::new();
        let mut runner = StageRunner::new(&mut reporter, 1);

        let outcome = runner
            .run(
                StageId::Discover(Technique::ReverseDns),
                None,
                &ctx(),
                Duration::from_secs(1),
                &mut aggregator,
            )
            .await;
        assert_eq!(outcome.status, StageStatus::Error);
        assert_eq!(runner.percentage(), 100);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(StageId::Discover(Technique::PingSweep).to_string(), "ping-sweep");
        assert_eq!(StageId::Enrichment.to_string(), "enrichment");
        assert_eq!(
            serde_json::to_value(StageId::Discover(Technique::ArpTable)).unwrap(),
            "arp-table"
        );
        let parsed: StageId = serde_json::from_str("\"reverse-dns\"").unwrap();
        assert_eq!(parsed, StageId::Discover(Technique::ReverseDns));
    }
}
