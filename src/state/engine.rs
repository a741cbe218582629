//! Overall-state recomputation for hosts and services.
//!
//! A HARD service update persists the service's new code and then
//! recomputes its host from the last persisted codes of the host's
//! services. SOFT updates persist the live fields only.

use std::sync::Arc;

use super::{aggregate_host_state, EntityKind, LiveStateUpdate, OverallState, StateType};
use super::{HostState, ServiceState};
use crate::db::{DbError, Host, Service, Store};
use crate::events::HookError;

/// Computes and persists `overall_state_id` on hosts and services.
#[derive(Clone)]
pub struct OverallStateEngine {
    store: Arc<Store>,
}

impl OverallStateEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Apply a live-state update to a service.
    ///
    /// On a HARD update the service's code is written together with the
    /// live fields, then the owning host is recomputed. The service write
    /// is complete before the host reads its services' codes, and is kept
    /// when the host recompute fails.
    pub fn on_service_updated(
        &self,
        id: i64,
        update: &LiveStateUpdate<ServiceState>,
    ) -> Result<Service, HookError> {
        let service = self
            .store
            .get_service(id)
            .map_err(lift(EntityKind::Service, id))?;
        let live = service.live.apply(update).map_err(HookError::Data)?;

        let overall_state_id = match live.state_type {
            StateType::Hard => live.overall_state().id(),
            StateType::Soft => service.overall_state_id,
        };

        let version = self
            .store
            .update_service_live(id, service.version, &live, overall_state_id)
            .map_err(lift(EntityKind::Service, id))?;

        let updated = Service {
            live,
            overall_state_id,
            version,
            ..service
        };

        if live.state_type == StateType::Hard {
            tracing::debug!(
                service = id,
                overall_state_id,
                "Service overall state recomputed"
            );
            self.recompute_host(updated.host_id)?;
        }

        Ok(updated)
    }

    /// Apply a live-state update to a host.
    ///
    /// A HARD update recomputes the host from its own state and the last
    /// persisted codes of its services; services are not re-evaluated.
    pub fn on_host_updated(
        &self,
        id: i64,
        update: &LiveStateUpdate<HostState>,
    ) -> Result<Host, HookError> {
        let host = self
            .store
            .get_host(id)
            .map_err(lift(EntityKind::Host, id))?;
        let live = host.live.apply(update).map_err(HookError::Data)?;

        let overall_state_id = match live.state_type {
            StateType::Hard => {
                let services = self.service_states(id)?;
                aggregate_host_state(live.overall_state(), services).id()
            }
            StateType::Soft => host.overall_state_id,
        };

        let version = self
            .store
            .update_host_live(id, host.version, &live, overall_state_id)
            .map_err(lift(EntityKind::Host, id))?;

        Ok(Host {
            live,
            overall_state_id,
            version,
            ..host
        })
    }

    /// Recompute a host's code from its last HARD state and its services'
    /// persisted codes. Writes only when the code changes.
    pub fn recompute_host(&self, id: i64) -> Result<Host, HookError> {
        let host = self
            .store
            .get_host(id)
            .map_err(lift(EntityKind::Host, id))?;
        let services = self.service_states(id)?;
        let overall_state_id = aggregate_host_state(host.live.overall_state(), services).id();

        if overall_state_id == host.overall_state_id {
            return Ok(host);
        }

        let version = self
            .store
            .update_host_overall(id, host.version, overall_state_id)
            .map_err(lift(EntityKind::Host, id))?;

        tracing::debug!(host = id, overall_state_id, "Host overall state recomputed");

        Ok(Host {
            overall_state_id,
            version,
            ..host
        })
    }

    fn service_states(&self, host_id: i64) -> Result<Vec<OverallState>, HookError> {
        let codes = self
            .store
            .get_service_overall_states(host_id)
            .map_err(lift(EntityKind::Host, host_id))?;

        codes
            .into_iter()
            .map(|code| {
                OverallState::from_id(code).ok_or_else(|| {
                    HookError::Data(format!(
                        "host {} has a service with overall state {}",
                        host_id, code
                    ))
                })
            })
            .collect()
    }
}

/// Map a store error on one entity into the hook error taxonomy.
fn lift(kind: EntityKind, id: i64) -> impl Fn(DbError) -> HookError {
    move |err| match err {
        DbError::NotFound => HookError::NotFound { kind, id },
        DbError::Conflict { .. } => HookError::Conflict { kind, id },
        other => HookError::Store(other),
    }
}
