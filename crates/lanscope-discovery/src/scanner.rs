//! Scan orchestration: fixed stage lists, deadlines, ranking and enrichment

use lanscope_core::validate::is_valid_host_ip;
use lanscope_core::{DeviceRecord, RawObservation, Technique};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{ScanContext, TechniqueAdapter};
use crate::aggregator::DeviceAggregator;
use crate::arp::ArpTableAdapter;
use crate::enrichment::{
    EnrichmentCoordinator, EnrichmentSummary, DEFAULT_BATCH_SIZE, DEFAULT_LOOKUP_TIMEOUT,
};
use crate::mdns::ServiceDiscoveryAdapter;
use crate::netinfo::{LocalHost, NetworkInfo, Subnet, SystemNetworkInfo};
use crate::probe::{PingSweepAdapter, DEFAULT_MAX_SWEEP_HOSTS};
use crate::progress::{EventStatus, ProgressReporter, ProgressSender};
use crate::resolve::ReverseDnsAdapter;
use crate::route::RouteTableAdapter;
use crate::scoring::{pin_local, prioritize};
use crate::stage::{StageId, StageOutcome, StageRunner, StageStatus};
use crate::vendor::{ManufacturerIdentifier, OuiIdentifier};

/// Step name used for whole-scan events
pub const SCAN_STEP: &str = "scan";

/// How long the terminal event may wait for room once the deadline is spent
const FINAL_EVENT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Fast,
    Complete,
}

const FAST_TECHNIQUES: &[Technique] = &[
    Technique::ArpTable,
    Technique::RouteTable,
    Technique::PingSweep,
];

const COMPLETE_TECHNIQUES: &[Technique] = &[
    Technique::ArpTable,
    Technique::RouteTable,
    Technique::ReverseDns,
    Technique::PingSweep,
    Technique::ServiceDiscovery,
];

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Fast => "fast",
            ScanMode::Complete => "complete",
        }
    }

    /// Discovery techniques in execution order
    pub fn techniques(&self) -> &'static [Technique] {
        match self {
            ScanMode::Fast => FAST_TECHNIQUES,
            ScanMode::Complete => COMPLETE_TECHNIQUES,
        }
    }

    /// Every stage of the mode, enrichment last
    pub fn stages(&self) -> Vec<StageId> {
        self.techniques()
            .iter()
            .map(|&t| StageId::Discover(t))
            .chain(std::iter::once(StageId::Enrichment))
            .collect()
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(ScanMode::Fast),
            "complete" => Ok(ScanMode::Complete),
            other => Err(format!("unknown scan mode '{}' (expected fast or complete)", other)),
        }
    }
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Network to sweep instead of the local interface's subnet
    pub subnet: Option<Ipv4Addr>,
    pub prefix_len: Option<u8>,
    /// Address to treat as the scanning host
    pub local_ip: Option<Ipv4Addr>,
    /// Preferred interface when several are up
    pub interface: Option<String>,
    pub max_sweep_hosts: usize,
    pub fast_stage_timeout_ms: u64,
    pub complete_stage_timeout_ms: u64,
    pub fast_scan_timeout_ms: u64,
    pub complete_scan_timeout_ms: u64,
    pub enrichment_timeout_ms: u64,
    pub lookup_timeout_ms: u64,
    pub ping_timeout_secs: u64,
    pub batch_size: usize,
    /// Extra OUI entries on top of the built-in table
    pub oui_file: Option<PathBuf>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            subnet: None,
            prefix_len: None,
            local_ip: None,
            interface: None,
            max_sweep_hosts: DEFAULT_MAX_SWEEP_HOSTS,
            fast_stage_timeout_ms: 10_000,
            complete_stage_timeout_ms: 30_000,
            fast_scan_timeout_ms: 60_000,
            complete_scan_timeout_ms: 180_000,
            enrichment_timeout_ms: 20_000,
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64,
            ping_timeout_secs: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            oui_file: None,
        }
    }
}

impl ScannerConfig {
    pub fn stage_timeout(&self, mode: ScanMode) -> Duration {
        Duration::from_millis(match mode {
            ScanMode::Fast => self.fast_stage_timeout_ms,
            ScanMode::Complete => self.complete_stage_timeout_ms,
        })
    }

    pub fn scan_timeout(&self, mode: ScanMode) -> Duration {
        Duration::from_millis(match mode {
            ScanMode::Fast => self.fast_scan_timeout_ms,
            ScanMode::Complete => self.complete_scan_timeout_ms,
        })
    }

    /// Configured sweep target, if both halves are set
    pub fn target_override(&self) -> Option<Subnet> {
        match (self.subnet, self.prefix_len) {
            (Some(subnet), Some(prefix_len)) => Some(Subnet::new(subnet, prefix_len)),
            (Some(subnet), None) => Some(Subnet::new(subnet, 24)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Running,
    Complete,
    Error,
}

/// What one scan produced besides the device list
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub stages: Vec<StageOutcome>,
    pub enrichment: EnrichmentSummary,
}

/// Runs discovery scans. Holds no device state between scans.
pub struct Scanner {
    config: ScannerConfig,
    adapters: HashMap<Technique, Arc<dyn TechniqueAdapter>>,
    identifier: Arc<dyn ManufacturerIdentifier>,
    network: Arc<dyn NetworkInfo>,
    state: Arc<RwLock<ScanState>>,
}

impl Scanner {
    /// A scanner with no technique adapters registered
    pub fn new(
        config: ScannerConfig,
        identifier: Arc<dyn ManufacturerIdentifier>,
        network: Arc<dyn NetworkInfo>,
    ) -> Self {
        Self {
            config,
            adapters: HashMap::new(),
            identifier,
            network,
            state: Arc::new(RwLock::new(ScanState::Idle)),
        }
    }

    /// A scanner backed by the host's own tools and interfaces
    pub fn with_system_adapters(config: ScannerConfig) -> Self {
        let mut oui = OuiIdentifier::builtin();
        if let Some(path) = &config.oui_file {
            match oui.clone().with_file(path) {
                Ok(extended) => oui = extended,
                Err(e) => warn!(error = %e, "Ignoring OUI file"),
            }
        }

        let network = SystemNetworkInfo::new(config.interface.clone());
        let ping = PingSweepAdapter::new(config.ping_timeout_secs, config.max_sweep_hosts);

        Self::new(config, Arc::new(oui), Arc::new(network))
            .with_adapter(Arc::new(ArpTableAdapter))
            .with_adapter(Arc::new(RouteTableAdapter))
            .with_adapter(Arc::new(ReverseDnsAdapter))
            .with_adapter(Arc::new(ping))
            .with_adapter(Arc::new(ServiceDiscoveryAdapter))
    }

    /// Register an adapter under its technique, replacing any previous one
    pub fn with_adapter(mut self, adapter: Arc<dyn TechniqueAdapter>) -> Self {
        self.adapters.insert(adapter.technique(), adapter);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn techniques(&self) -> Vec<Technique> {
        let mut techniques: Vec<Technique> = self.adapters.keys().copied().collect();
        techniques.sort();
        techniques
    }

    pub async fn state(&self) -> ScanState {
        *self.state.read().await
    }

    /// The scanning host as the scanner would see it right now
    pub async fn local_host(&self) -> Option<LocalHost> {
        let detected = self.network.local_host().await;
        let Some(ip) = self.config.local_ip else {
            return detected;
        };

        match detected {
            Some(host) if host.ip == ip => Some(host),
            other => Some(LocalHost {
                ip,
                mac: None,
                interface: other
                    .map(|h| h.interface)
                    .unwrap_or_else(|| "configured".to_string()),
                prefix_len: self.config.prefix_len.unwrap_or(24),
            }),
        }
    }

    /// Run a complete scan and return the ranked device list.
    ///
    /// Stage failures are reported and skipped. If the mode's overall
    /// deadline passes, a single `error` event is sent and the result is
    /// empty; otherwise a single `complete` event carries the devices.
    /// A receiver that never reads delays the return by at most
    /// `FINAL_EVENT_GRACE` past the deadline; the terminal event is then lost.
    pub async fn run_scan(&self, mode: ScanMode, progress: ProgressSender) -> Vec<DeviceRecord> {
        let scan_id = Uuid::new_v4();
        let mut reporter = ProgressReporter::new(scan_id, progress);
        let deadline = self.config.scan_timeout(mode);
        *self.state.write().await = ScanState::Running;

        info!(scan_id = %scan_id, mode = %mode, "Starting scan");
        let started = Instant::now();

        match timeout(deadline, self.pipeline(mode, &mut reporter)).await {
            Ok((records, report)) => {
                let data = serde_json::json!({
                    "count": records.len(),
                    "devices": records,
                    "stages": report.stages,
                    "enrichment": report.enrichment,
                });
                let message = format!("Scan complete: {} devices", records.len());
                let emit = reporter.emit(SCAN_STEP, EventStatus::Complete, message, 100, Some(data), None);
                let limit = deadline.saturating_sub(started.elapsed()).max(FINAL_EVENT_GRACE);
                if timeout(limit, emit).await.is_err() {
                    warn!(scan_id = %scan_id, "Progress receiver stalled, completion event dropped");
                }
                *self.state.write().await = ScanState::Complete;
                info!(
                    scan_id = %scan_id,
                    devices = records.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Scan complete"
                );
                records
            }
            Err(_) => {
                warn!(scan_id = %scan_id, deadline_ms = deadline.as_millis() as u64, "Scan timed out");
                let percentage = reporter.percentage();
                let message = format!("{} scan timed out after {} ms", mode, deadline.as_millis());
                let emit = reporter.emit(SCAN_STEP, EventStatus::Error, message, percentage, None, None);
                if timeout(FINAL_EVENT_GRACE, emit).await.is_err() {
                    warn!(scan_id = %scan_id, "Progress receiver stalled, timeout event dropped");
                }
                *self.state.write().await = ScanState::Error;
                Vec::new()
            }
        }
    }

    async fn pipeline(
        &self,
        mode: ScanMode,
        reporter: &mut ProgressReporter,
    ) -> (Vec<DeviceRecord>, ScanReport) {
        let stages = mode.stages();
        let local = self.local_host().await;
        let local_ip = local.as_ref().map(|h| h.ip);
        let target = self
            .config
            .target_override()
            .or_else(|| local.as_ref().map(LocalHost::subnet));

        let mut aggregator = DeviceAggregator::new();
        if let Some(host) = &local {
            aggregator.merge(vec![local_observation(host)]);
        }

        reporter
            .emit(
                SCAN_STEP,
                EventStatus::Start,
                format!("Starting {} scan", mode),
                0,
                Some(serde_json::json!({
                    "mode": mode,
                    "stages": stages,
                    "local": local,
                    "target": target,
                })),
                None,
            )
            .await;

        let stage_deadline = self.config.stage_timeout(mode);
        let mut runner = StageRunner::new(reporter, stages.len());
        let mut report = ScanReport::default();

        for &technique in mode.techniques() {
            let ctx = ScanContext {
                mode,
                local: local.clone(),
                target,
                known_ips: aggregator.known_ips(),
            };
            let outcome = runner
                .run(
                    StageId::Discover(technique),
                    self.adapters.get(&technique),
                    &ctx,
                    stage_deadline,
                    &mut aggregator,
                )
                .await;
            report.stages.push(outcome);
        }

        let records: Vec<DeviceRecord> = aggregator
            .into_records()
            .into_iter()
            .filter(|r| is_valid_host_ip(r.ip))
            .collect();
        let records = pin_local(prioritize(records), local_ip);

        let (records, outcome, summary) = self.enrichment_stage(&mut runner, records).await;
        report.stages.push(outcome);
        report.enrichment = summary;

        let records = pin_local(prioritize(records), local_ip);
        debug!(devices = records.len(), "Ranked devices");
        (records, report)
    }

    async fn enrichment_stage(
        &self,
        runner: &mut StageRunner<'_>,
        records: Vec<DeviceRecord>,
    ) -> (Vec<DeviceRecord>, StageOutcome, EnrichmentSummary) {
        let stage = StageId::Enrichment;
        let started = Instant::now();
        let percentage = runner.percentage();
        runner
            .reporter()
            .emit(
                stage.as_str(),
                EventStatus::Start,
                format!("Identifying manufacturers for {} devices", records.len()),
                percentage,
                None,
                None,
            )
            .await;

        if records.is_empty() {
            let outcome = runner
                .finish(stage, StageStatus::Success, 0, started, None, None)
                .await;
            return (records, outcome, EnrichmentSummary::default());
        }

        let coordinator = EnrichmentCoordinator::new(
            self.identifier.clone(),
            self.config.batch_size,
            Duration::from_millis(self.config.lookup_timeout_ms),
        );
        let (records, summary) = coordinator
            .enrich(records, Duration::from_millis(self.config.enrichment_timeout_ms))
            .await;

        let percentage = runner.percentage();
        runner
            .reporter()
            .emit(
                stage.as_str(),
                EventStatus::Info,
                format!(
                    "{} of {} lookups identified a manufacturer",
                    summary.identified, summary.attempted
                ),
                percentage,
                serde_json::to_value(&summary).ok(),
                None,
            )
            .await;

        let message = summary
            .deadline_reached
            .then(|| "enrichment deadline reached".to_string());
        let outcome = runner
            .finish(stage, StageStatus::Success, summary.identified, started, message, None)
            .await;
        (records, outcome, summary)
    }
}

fn local_observation(host: &LocalHost) -> RawObservation {
    let obs = RawObservation::new(host.ip.to_string(), Technique::LocalInterface)
        .active()
        .local();
    match &host.mac {
        Some(mac) => obs.with_mac(mac.clone()),
        None => obs,
    }
}
