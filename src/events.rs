//! Entity events and the hooks they trigger.
//!
//! The update path reports what happened as an [`Event`]; the
//! [`Dispatcher`] runs the overall-state engine or the perfdata delivery
//! for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{DbError, Host, Service};
use crate::delivery::{DeliveryEngine, DeliveryReport};
use crate::perfdata;
use crate::state::{EntityKind, HostState, LiveStateUpdate, OverallStateEngine, ServiceState};

/// Failure of a hook.
#[derive(Error, Debug)]
pub enum HookError {
    /// Malformed or incomplete input; nothing was written.
    #[error("invalid data: {0}")]
    Data(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: i64 },
    /// The entity changed between read and write, so its write was not
    /// applied. On a service update a host conflict arrives after the
    /// service write has landed; replaying the same update is safe.
    #[error("{kind} {id} was modified concurrently")]
    Conflict { kind: EntityKind, id: i64 },
    #[error("store error: {0}")]
    Store(#[source] DbError),
}

impl HookError {
    /// Whether the caller may retry the same update.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HookError::Conflict { .. })
    }
}

/// A persisted check result carrying raw perfdata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub host_name: String,
    /// Empty for a host check.
    #[serde(default)]
    pub service_name: String,
    pub realm_id: i64,
    #[serde(default)]
    pub perf_data: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_check: DateTime<Utc>,
}

/// Something that happened on the update path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ServiceUpdated {
        id: i64,
        changes: LiveStateUpdate<ServiceState>,
    },
    HostUpdated {
        id: i64,
        changes: LiveStateUpdate<HostState>,
    },
    CheckResultInserted(CheckResult),
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Service(Service),
    Host(Host),
    Delivered(DeliveryReport),
}

/// Routes events to the engines.
#[derive(Clone)]
pub struct Dispatcher {
    states: OverallStateEngine,
    delivery: DeliveryEngine,
}

impl Dispatcher {
    pub fn new(states: OverallStateEngine, delivery: DeliveryEngine) -> Self {
        Self { states, delivery }
    }

    pub async fn dispatch(&self, event: Event) -> Result<Outcome, HookError> {
        match event {
            Event::ServiceUpdated { id, changes } => {
                self.on_service_updated(id, &changes).map(Outcome::Service)
            }
            Event::HostUpdated { id, changes } => {
                self.on_host_updated(id, &changes).map(Outcome::Host)
            }
            Event::CheckResultInserted(record) => Ok(Outcome::Delivered(
                self.on_checkresult_inserted(&record).await,
            )),
        }
    }

    /// Recompute a service and its host after a live-state change.
    pub fn on_service_updated(
        &self,
        id: i64,
        changes: &LiveStateUpdate<ServiceState>,
    ) -> Result<Service, HookError> {
        self.states
            .on_service_updated(id, changes)
            .inspect_err(|e| log_failure(EntityKind::Service, id, e))
    }

    /// Recompute a host after a live-state change.
    pub fn on_host_updated(
        &self,
        id: i64,
        changes: &LiveStateUpdate<HostState>,
    ) -> Result<Host, HookError> {
        self.states
            .on_host_updated(id, changes)
            .inspect_err(|e| log_failure(EntityKind::Host, id, e))
    }

    /// Extract the perfdata of a check result and deliver it.
    pub async fn on_checkresult_inserted(&self, record: &CheckResult) -> DeliveryReport {
        let points = perfdata::parse(&record.perf_data);
        tracing::debug!(
            host = %record.host_name,
            service = %record.service_name,
            points = points.len(),
            perfdata = %points.to_perfdata(),
            "Check result perfdata parsed"
        );

        let report = self
            .delivery
            .deliver(
                points,
                record.realm_id,
                &record.host_name,
                &record.service_name,
                record.last_check,
            )
            .await;

        if !report.failed.is_empty() {
            tracing::info!(
                host = %record.host_name,
                failed = report.failed.len(),
                retained = report.retained,
                "Check result partially delivered"
            );
        }
        report
    }
}

fn log_failure(kind: EntityKind, id: i64, err: &HookError) {
    match err {
        HookError::Data(_) | HookError::NotFound { .. } => {
            tracing::warn!(%kind, id, "Update ignored: {}", err)
        }
        HookError::Conflict { .. } => tracing::info!(%kind, id, "Update rejected, retryable: {}", err),
        HookError::Store(_) => tracing::error!(%kind, id, "Update failed: {}", err),
    }
}
