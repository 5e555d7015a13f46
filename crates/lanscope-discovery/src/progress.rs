//! Progress events streamed to whoever started a scan

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Default capacity of the progress channel
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Start,
    Info,
    Success,
    Error,
    Complete,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Start => "start",
            EventStatus::Info => "info",
            EventStatus::Success => "success",
            EventStatus::Error => "error",
            EventStatus::Complete => "complete",
        }
    }
}

/// One step of scan progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub scan_id: Uuid,
    /// Stage identifier, or "scan" for whole-scan events
    pub step: String,
    pub status: EventStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// 0 ..= 100, never decreasing within a scan
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Producer half of a scan's progress stream.
///
/// Sending waits for channel capacity, so events are delivered in order and
/// none are dropped while the receiver is alive. A dropped receiver is not
/// an error: the scan simply runs unobserved.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

/// Create a bounded progress channel
pub fn progress_channel(capacity: usize) -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx: Some(tx) }, rx)
}

impl ProgressSender {
    /// A sender that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                trace!("Progress receiver dropped");
            }
        }
    }
}

/// Stamps events for one scan and keeps the percentage from going backwards
#[derive(Debug)]
pub struct ProgressReporter {
    scan_id: Uuid,
    sender: ProgressSender,
    last_percentage: u8,
}

impl ProgressReporter {
    pub fn new(scan_id: Uuid, sender: ProgressSender) -> Self {
        Self {
            scan_id,
            sender,
            last_percentage: 0,
        }
    }

    pub fn scan_id(&self) -> Uuid {
        self.scan_id
    }

    pub async fn emit(
        &mut self,
        step: &str,
        status: EventStatus,
        message: impl Into<String>,
        percentage: u8,
        data: Option<serde_json::Value>,
        command: Option<String>,
    ) {
        self.last_percentage = self.last_percentage.max(percentage.min(100));
        let event = ProgressEvent {
            scan_id: self.scan_id,
            step: step.to_string(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
            percentage: self.last_percentage,
            data,
            command,
        };
        self.sender.send(event).await;
    }

    pub fn percentage(&self) -> u8 {
        self.last_percentage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_percentage_never_decreases() {
        let (tx, mut rx) = progress_channel(8);
        let mut reporter = ProgressReporter::new(Uuid::new_v4(), tx);

        reporter.emit("a", EventStatus::Start, "a", 40, None, None).await;
        reporter.emit("b", EventStatus::Start, "b", 20, None, None).await;
        reporter.emit("c", EventStatus::Complete, "c", 250, None, None).await;
        drop(reporter);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event.percentage);
        }
        assert_eq!(seen, vec![40, 40, 100]);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_ignored() {
        let (tx, rx) = progress_channel(1);
        drop(rx);
        let mut reporter = ProgressReporter::new(Uuid::new_v4(), tx);
        reporter.emit("scan", EventStatus::Info, "nobody listens", 0, None, None).await;
        assert_eq!(reporter.percentage(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = ProgressEvent {
            scan_id: Uuid::nil(),
            step: "arp-table".to_string(),
            status: EventStatus::Success,
            message: "3 hosts".to_string(),
            timestamp: Utc::now(),
            percentage: 25,
            data: None,
            command: Some("ip neigh show".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["command"], "ip neigh show");
        assert!(json.get("data").is_none());
    }
}
