//! Application state management

use lanscope_core::DeviceRecord;
use lanscope_discovery::{progress_channel, ProgressEvent, ScanMode, Scanner};
use lanscope_discovery::progress::PROGRESS_CHANNEL_CAPACITY;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("A scan is already running")]
    InProgress,
}

/// Shared application state
pub struct AppState {
    /// Scanner shared by every request
    pub scanner: Arc<Scanner>,
    /// Configuration
    pub config: Config,
    /// Progress of every scan, for WebSocket clients
    pub events: broadcast::Sender<ProgressEvent>,
    /// Result of the most recent finished scan
    devices: RwLock<Vec<DeviceRecord>>,
    /// Held for the duration of a scan
    scan_lock: Mutex<()>,
}

impl AppState {
    /// Create new application state backed by the system scanner
    pub fn new(config: Config) -> Arc<Self> {
        let scanner = Scanner::with_system_adapters(config.to_scanner_config());
        Self::with_scanner(config, scanner)
    }

    pub fn with_scanner(config: Config, scanner: Scanner) -> Arc<Self> {
        let (events, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Arc::new(Self {
            scanner: Arc::new(scanner),
            config,
            events,
            devices: RwLock::new(Vec::new()),
            scan_lock: Mutex::new(()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.read().await.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_lock.try_lock().is_err()
    }

    /// Run one scan, relaying its progress to subscribers.
    ///
    /// Only one scan runs at a time; a second request is refused rather
    /// than queued.
    pub async fn run_scan(&self, mode: Option<ScanMode>) -> Result<Vec<DeviceRecord>, ScanError> {
        let _guard = self.scan_lock.try_lock().map_err(|_| ScanError::InProgress)?;
        let mode = mode.unwrap_or(self.config.daemon.default_mode);
        info!(mode = %mode, "Scan requested");

        let (tx, mut rx) = progress_channel(PROGRESS_CHANNEL_CAPACITY);
        let events = self.events.clone();
        let relay = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // No subscribers is fine
                let _ = events.send(event);
            }
        });

        let records = self.scanner.run_scan(mode, tx).await;
        if let Err(e) = relay.await {
            debug!(error = %e, "Progress relay ended abnormally");
        }

        *self.devices.write().await = records.clone();
        Ok(records)
    }
}
