//! Fan-out of metric points to in-scope sinks.
//!
//! Every sink is attempted independently under its own timeout. A sink
//! that fails gets the whole point set written to retention; nothing is
//! raised to the caller.

mod retention;

pub use retention::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::db::{Sink, Store};
use crate::perfdata::PointSet;
use crate::realm::RealmResolver;
use crate::sink::{PointBatch, SinkError, SinkKind, Transports};

/// A sink that did not accept a point set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkFailure {
    pub sink_id: i64,
    pub reason: String,
}

/// Outcome of one `deliver` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    /// Number of points in the set.
    pub points: usize,
    /// Sinks a transmission was attempted to.
    pub attempted: usize,
    pub delivered: usize,
    pub failed: Vec<SinkFailure>,
    /// Retention records written.
    pub retained: usize,
}

/// Sends point sets to sinks and retains what they refuse.
#[derive(Clone)]
pub struct DeliveryEngine {
    store: Arc<Store>,
    resolver: RealmResolver,
    transports: Transports,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<Store>,
        transports: Transports,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            resolver: RealmResolver::new(store.clone()),
            store,
            transports,
            timeout,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Deliver `points` measured on `host`/`service` in `realm_id` to every
    /// in-scope sink of both kinds.
    pub async fn deliver(
        &self,
        points: PointSet,
        realm_id: i64,
        host: &str,
        service: &str,
        timestamp: DateTime<Utc>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport {
            points: points.len(),
            ..Default::default()
        };

        if points.is_empty() {
            tracing::debug!(host = %host, service = %service, "No points to deliver");
            return report;
        }

        let realm = match self.resolver.path_label(realm_id) {
            Ok(label) if !label.is_empty() => label,
            Ok(_) => {
                tracing::warn!(realm = realm_id, host = %host, "Unknown realm, points dropped");
                return report;
            }
            Err(e) => {
                tracing::error!(realm = realm_id, "Failed to resolve realm: {}", e);
                return report;
            }
        };

        let sinks = self.sinks_in_scope(realm_id);
        if sinks.is_empty() {
            tracing::debug!(realm = %realm, "No sink in scope");
            return report;
        }

        let batch = Arc::new(PointBatch {
            realm,
            host: host.to_string(),
            service: service.to_string(),
            timestamp,
            points,
        });

        let mut handles = Vec::with_capacity(sinks.len());
        for sink in sinks {
            let transport = self.transports.for_kind(sink.kind);
            let semaphore = self.semaphore.clone();
            let batch = batch.clone();
            let timeout = self.timeout;
            let target = sink.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| SinkError::Connection(e.to_string()))?;
                match tokio::time::timeout(timeout, transport.send(&target, &batch)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout(timeout)),
                }
            });
            handles.push((sink, handle));
        }

        report.attempted = handles.len();

        for (sink, handle) in handles {
            let reason = match handle.await {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    tracing::debug!(sink = sink.id, points = batch.points.len(), "Points delivered");
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => format!("delivery task failed: {}", e),
            };

            tracing::warn!(
                sink = sink.id,
                name = %sink.name,
                transport = self.transports.for_kind(sink.kind).name(),
                host = %batch.host,
                "Delivery failed, retaining points: {}",
                reason
            );

            match retain(&self.store, &sink, &batch) {
                Ok(n) => report.retained += n,
                Err(e) => tracing::error!(sink = sink.id, "Failed to write retention: {}", e),
            }
            report.failed.push(SinkFailure {
                sink_id: sink.id,
                reason,
            });
        }

        report
    }

    fn sinks_in_scope(&self, realm_id: i64) -> Vec<Sink> {
        let mut sinks = Vec::new();
        for kind in SinkKind::ALL {
            match self.resolver.in_scope_sinks(realm_id, kind) {
                Ok(found) => sinks.extend(found),
                Err(e) => {
                    tracing::error!(realm = realm_id, kind = kind.as_str(), "Failed to load sinks: {}", e)
                }
            }
        }
        sinks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perfdata::parse;
    use crate::sink::SinkTransport;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(i64, PointBatch)>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<(i64, PointBatch)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SinkTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, sink: &Sink, batch: &PointBatch) -> Result<(), SinkError> {
            self.sent.lock().unwrap().push((sink.id, batch.clone()));
            Ok(())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl SinkTransport for FailingTransport {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, sink: &Sink, _batch: &PointBatch) -> Result<(), SinkError> {
            Err(SinkError::Connection(format!("{} refused", sink.address)))
        }
    }

    struct SlowTransport;

    #[async_trait]
    impl SinkTransport for SlowTransport {
        fn name(&self) -> &str {
            "slow"
        }

        async fn send(&self, _sink: &Sink, _batch: &PointBatch) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    struct Fixture {
        _tmp: NamedTempFile,
        store: Arc<Store>,
        all: i64,
        a: i64,
        a1: i64,
    }

    fn fixture() -> Fixture {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let all = store.add_realm("All", None).unwrap();
        let a = store.add_realm("All A", Some(all)).unwrap();
        let a1 = store.add_realm("All A1", Some(a)).unwrap();
        Fixture { _tmp: tmp, store, all, a, a1 }
    }

    fn add_sink(store: &Store, name: &str, kind: SinkKind, realm_id: i64, sub_realm: bool) -> i64 {
        let mut sink = Sink {
            id: 0,
            name: name.to_string(),
            kind,
            realm_id,
            sub_realm,
            address: format!("{}.local", name),
            prefix: String::new(),
        };
        store.add_sink(&mut sink).unwrap()
    }

    fn delivery_engine(
        store: &Arc<Store>,
        push: Arc<dyn SinkTransport>,
        pull: Arc<dyn SinkTransport>,
        timeout: Duration,
    ) -> DeliveryEngine {
        DeliveryEngine::new(store.clone(), Transports::new(push, pull), timeout, 8)
    }

    fn points() -> PointSet {
        parse("rta=0.083000ms;10.000000;15.000000;0.000000 pl=0%;10;;")
    }

    #[tokio::test]
    async fn test_delivers_to_every_sink_in_scope() {
        let f = fixture();
        let graphite = add_sink(&f.store, "graphite", SinkKind::Push, f.all, true);
        let influx = add_sink(&f.store, "influx", SinkKind::Pull, f.a, false);
        add_sink(&f.store, "influx a1", SinkKind::Pull, f.a1, false);

        let push = Arc::new(RecordingTransport::default());
        let pull = Arc::new(RecordingTransport::default());
        let engine = delivery_engine(&f.store, push.clone(), pull.clone(), Duration::from_secs(1));

        let report = engine.deliver(points(), f.a, "srv001", "ping", Utc::now()).await;
        assert_eq!(report.points, 8);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.retained, 0);

        let sent = push.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, graphite);
        assert_eq!(sent[0].1.realm, "All.All A");
        assert_eq!(sent[0].1.host, "srv001");
        assert_eq!(sent[0].1.service, "ping");
        assert_eq!(sent[0].1.points, points());

        let sent = pull.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, influx);
        assert_eq!(f.store.get_status_counts().unwrap().retention, 0);
    }

    #[tokio::test]
    async fn test_failed_sink_is_retained_and_others_still_delivered() {
        let f = fixture();
        let graphite = add_sink(&f.store, "graphite", SinkKind::Push, f.all, true);
        add_sink(&f.store, "influx", SinkKind::Pull, f.all, true);

        let pull = Arc::new(RecordingTransport::default());
        let engine = delivery_engine(&f.store, Arc::new(FailingTransport), pull.clone(), Duration::from_secs(1));

        let report = engine.deliver(points(), f.a1, "srv002", "", Utc::now()).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].sink_id, graphite);
        assert!(report.failed[0].reason.contains("refused"));
        assert_eq!(report.retained, 8);
        assert_eq!(pull.sent().len(), 1);

        let retained = f.store.list_retention().unwrap();
        assert_eq!(retained.len(), 8);
        assert!(retained.iter().all(|r| r.sink_id == graphite && r.sink_kind == SinkKind::Push));
        assert!(retained.iter().all(|r| r.realm == "All.All A.All A1" && r.host == "srv002"));
        let names: Vec<&str> = retained.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["rta", "rta_warning", "rta_critical", "rta_min", "pl", "pl_warning", "pl_min", "pl_max"]
        );
    }

    #[tokio::test]
    async fn test_one_record_per_point_and_failed_sink() {
        let f = fixture();
        let first = add_sink(&f.store, "graphite 1", SinkKind::Push, f.all, true);
        let second = add_sink(&f.store, "graphite 2", SinkKind::Push, f.a, true);

        let engine = delivery_engine(
            &f.store,
            Arc::new(FailingTransport),
            Arc::new(RecordingTransport::default()),
            Duration::from_secs(1),
        );
        let report = engine.deliver(parse("load1=0.5 load5=0.7"), f.a, "srv003", "load", Utc::now()).await;
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.retained, 4);

        let retained = f.store.list_retention().unwrap();
        assert_eq!(retained.iter().filter(|r| r.sink_id == first).count(), 2);
        assert_eq!(retained.iter().filter(|r| r.sink_id == second).count(), 2);
    }

    #[tokio::test]
    async fn test_slow_sinks_are_bounded_by_timeout() {
        let f = fixture();
        for i in 0..4 {
            add_sink(&f.store, &format!("graphite {}", i), SinkKind::Push, f.all, true);
        }
        add_sink(&f.store, "influx", SinkKind::Pull, f.all, false);

        let pull = Arc::new(RecordingTransport::default());
        let timeout = Duration::from_millis(100);
        let engine = delivery_engine(&f.store, Arc::new(SlowTransport), pull.clone(), timeout);

        let start = Instant::now();
        let report = engine.deliver(points(), f.all, "srv001", "", Utc::now()).await;
        let elapsed = start.elapsed();

        assert!(elapsed < timeout * 5 * 2, "took {:?}", elapsed);
        assert_eq!(report.attempted, 5);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 4);
        assert!(report.failed.iter().all(|failure| failure.reason.contains("timed out")));
        assert_eq!(report.retained, 4 * 8);
        assert_eq!(pull.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_do() {
        let f = fixture();
        add_sink(&f.store, "graphite", SinkKind::Push, f.all, true);
        let push = Arc::new(RecordingTransport::default());
        let engine = delivery_engine(&f.store, push.clone(), Arc::new(FailingTransport), Duration::from_secs(1));

        // Empty point set
        let report = engine.deliver(PointSet::new(), f.all, "srv001", "", Utc::now()).await;
        assert_eq!(report, DeliveryReport::default());

        // Unknown realm
        let report = engine.deliver(points(), 999, "srv001", "", Utc::now()).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.points, 8);

        // Non-inheriting sink at an intermediate realm
        let f2 = fixture();
        add_sink(&f2.store, "graphite", SinkKind::Push, f2.a, false);
        let engine = delivery_engine(&f2.store, push.clone(), Arc::new(FailingTransport), Duration::from_secs(1));
        let report = engine.deliver(points(), f2.a1, "srv001", "", Utc::now()).await;
        assert_eq!(report.attempted, 0);

        assert!(push.sent().is_empty());
        assert_eq!(f.store.get_status_counts().unwrap().retention, 0);
    }
}
