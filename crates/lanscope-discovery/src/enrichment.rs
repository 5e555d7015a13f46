//! Batched manufacturer lookups over discovered devices

use lanscope_core::DeviceRecord;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, info, warn};

use crate::vendor::ManufacturerIdentifier;

/// Lookups started together
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Upper bound for a single lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Counts reported once enrichment finishes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    /// Records with a usable MAC that were looked up
    pub attempted: usize,
    pub identified: usize,
    /// Lookups that errored or ran out of time
    pub failed: usize,
    /// Records without a usable MAC, or left over when the deadline hit
    pub skipped: usize,
    pub deadline_reached: bool,
}

enum Lookup {
    Done(lanscope_core::Identification),
    Failed(&'static str),
}

pub struct EnrichmentCoordinator {
    identifier: Arc<dyn ManufacturerIdentifier>,
    batch_size: usize,
    lookup_timeout: Duration,
}

impl EnrichmentCoordinator {
    pub fn new(
        identifier: Arc<dyn ManufacturerIdentifier>,
        batch_size: usize,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            identifier,
            batch_size: batch_size.max(1),
            lookup_timeout,
        }
    }

    /// Attach manufacturer data to every record with a usable MAC, giving up
    /// on whatever is left once `deadline` has elapsed
    pub async fn enrich(
        &self,
        mut records: Vec<DeviceRecord>,
        deadline: Duration,
    ) -> (Vec<DeviceRecord>, EnrichmentSummary) {
        let deadline_at = Instant::now() + deadline;
        let mut summary = EnrichmentSummary::default();

        let mut selected = Vec::new();
        for (idx, record) in records.iter_mut().enumerate() {
            if record.has_mac() {
                selected.push(idx);
            } else {
                record.mark_unidentified("invalid-mac");
                summary.skipped += 1;
            }
        }

        debug!(
            candidates = selected.len(),
            batch_size = self.batch_size,
            "Starting enrichment"
        );

        for (batch_no, batch) in selected.chunks(self.batch_size).enumerate() {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let left = selected.len() - batch_no * self.batch_size;
                warn!(unprocessed = left, "Enrichment deadline reached");
                summary.deadline_reached = true;
                summary.skipped += left;
                break;
            }

            let per_lookup = self.lookup_timeout.min(remaining);
            let mut tasks = JoinSet::new();

            // Each index appears in exactly one batch, so no two lookups
            // ever write the same record
            for &idx in batch {
                let identifier = self.identifier.clone();
                let mac = records[idx].mac.clone();
                tasks.spawn(async move {
                    let outcome = match timeout(per_lookup, identifier.identify(&mac)).await {
                        Ok(Ok(id)) => Lookup::Done(id),
                        Ok(Err(e)) => {
                            debug!(mac = %mac, error = %e, "Manufacturer lookup failed");
                            Lookup::Failed("lookup-failed")
                        }
                        Err(_) => Lookup::Failed("lookup-timeout"),
                    };
                    (idx, outcome)
                });
            }

            let mut finished = Vec::with_capacity(batch.len());
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(result) => finished.push(result),
                    Err(e) => warn!(error = %e, "Lookup task panicked"),
                }
            }

            summary.attempted += batch.len();
            for &idx in batch {
                match finished.iter().find(|(i, _)| *i == idx).map(|(_, o)| o) {
                    Some(Lookup::Done(id)) => {
                        records[idx].apply_identification(id);
                        if id.identified {
                            summary.identified += 1;
                        }
                    }
                    Some(Lookup::Failed(reason)) => {
                        records[idx].mark_unidentified(reason);
                        summary.failed += 1;
                    }
                    None => {
                        records[idx].mark_unidentified("lookup-failed");
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            attempted = summary.attempted,
            identified = summary.identified,
            failed = summary.failed,
            skipped = summary.skipped,
            "Enrichment finished"
        );

        (records, summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IdentifyError;
    use async_trait::async_trait;
    use lanscope_core::{Identification, RawObservation, Technique};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Identifies everything, fails on a chosen MAC, hangs on another
    struct FakeIdentifier {
        fail_on: &'static str,
        hang_on: &'static str,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeIdentifier {
        fn new(fail_on: &'static str, hang_on: &'static str) -> Self {
            Self {
                fail_on,
                hang_on,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ManufacturerIdentifier for FakeIdentifier {
        async fn identify(&self, mac: &str) -> Result<Identification, IdentifyError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            if mac == self.hang_on {
                std::future::pending::<()>().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if mac == self.fail_on {
                return Err(IdentifyError::Lookup("boom".to_string()));
            }
            Ok(Identification {
                identified: true,
                manufacturer: Some(format!("Vendor {}", &mac[15..])),
                device_type: None,
                confidence: 0.8,
                source: "fake".to_string(),
            })
        }
    }

    fn device(last: u8, mac: &str) -> DeviceRecord {
        let ip = Ipv4Addr::new(192, 168, 1, last);
        DeviceRecord::from_observation(
            ip,
            &RawObservation::new(ip.to_string(), Technique::ArpTable).with_mac(mac),
        )
    }

    #[tokio::test]
    async fn test_failures_are_per_record() {
        let identifier = Arc::new(FakeIdentifier::new("aa:bb:cc:dd:ee:02", "none"));
        let coordinator = EnrichmentCoordinator::new(identifier, 2, Duration::from_secs(1));

        let records = vec![
            device(1, "aa:bb:cc:dd:ee:01"),
            device(2, "aa:bb:cc:dd:ee:02"),
            device(3, "unknown"),
            device(4, "aa:bb:cc:dd:ee:04"),
        ];
        let (records, summary) = coordinator.enrich(records, Duration::from_secs(5)).await;

        assert!(records[0].manufacturer_identified);
        assert_eq!(records[0].manufacturer, "Vendor 01");
        assert!(!records[1].manufacturer_identified);
        assert_eq!(records[1].manufacturer_source.as_deref(), Some("lookup-failed"));
        assert_eq!(records[1].mac, "aa:bb:cc:dd:ee:02");
        assert!(!records[2].manufacturer_identified);
        assert_eq!(records[2].manufacturer_source.as_deref(), Some("invalid-mac"));
        assert!(records[3].manufacturer_identified);

        assert_eq!(
            summary,
            EnrichmentSummary {
                attempted: 3,
                identified: 2,
                failed: 1,
                skipped: 1,
                deadline_reached: false,
            }
        );
    }

    #[tokio::test]
    async fn test_batches_bound_concurrency() {
        let identifier = Arc::new(FakeIdentifier::new("none", "none"));
        let coordinator =
            EnrichmentCoordinator::new(identifier.clone(), 3, Duration::from_secs(1));
        let records = (1..=10)
            .map(|i| device(i, &format!("aa:bb:cc:dd:ee:{:02x}", i)))
            .collect();

        let (_, summary) = coordinator.enrich(records, Duration::from_secs(5)).await;
        assert_eq!(summary.identified, 10);
        assert!(identifier.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out_alone() {
        let identifier = Arc::new(FakeIdentifier::new("none", "aa:bb:cc:dd:ee:01"));
        let coordinator =
            EnrichmentCoordinator::new(identifier, 4, Duration::from_millis(100));
        let records = vec![device(1, "aa:bb:cc:dd:ee:01"), device(2, "aa:bb:cc:dd:ee:02")];

        let (records, summary) = coordinator.enrich(records, Duration::from_secs(5)).await;
        assert!(!records[0].manufacturer_identified);
        assert_eq!(records[0].manufacturer_source.as_deref(), Some("lookup-timeout"));
        assert!(records[1].manufacturer_identified);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_overall_deadline_stops_later_batches() {
        let identifier = Arc::new(FakeIdentifier::new("none", "aa:bb:cc:dd:ee:01"));
        let coordinator = EnrichmentCoordinator::new(identifier, 1, Duration::from_secs(10));
        let records = vec![
            device(1, "aa:bb:cc:dd:ee:01"),
            device(2, "aa:bb:cc:dd:ee:02"),
            device(3, "aa:bb:cc:dd:ee:03"),
        ];

        let (records, summary) = coordinator.enrich(records, Duration::from_millis(100)).await;
        assert!(summary.deadline_reached);
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.skipped, 2);
        assert!(records.iter().all(|r| !r.manufacturer_identified));
        assert_eq!(records[1].manufacturer_source, None);
    }
}
