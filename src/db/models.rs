//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sink::SinkKind;
use crate::state::{HostState, LiveState, ServiceState};

/// A node of the realm tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    pub id: i64,
    pub name: String,
    /// `None` for the root realm.
    pub parent_id: Option<i64>,
}

/// A monitored host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub realm_id: i64,
    #[serde(flatten)]
    pub live: LiveState<HostState>,
    pub overall_state_id: u8,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
}

/// A monitored service, owned by one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub host_id: i64,
    pub realm_id: i64,
    #[serde(flatten)]
    pub live: LiveState<ServiceState>,
    pub overall_state_id: u8,
    pub version: i64,
}

/// A configured time-series destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sink {
    pub id: i64,
    pub name: String,
    pub kind: SinkKind,
    pub realm_id: i64,
    /// Whether the sink also receives points from descendant realms.
    pub sub_realm: bool,
    pub address: String,
    #[serde(default)]
    pub prefix: String,
}

/// A metric point that could not be delivered to one sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionRecord {
    /// Realm path label, e.g. `All.All A`.
    pub realm: String,
    /// Metric name.
    pub name: String,
    pub host: String,
    pub service: String,
    pub sink_id: i64,
    pub sink_kind: SinkKind,
    /// Point value rounded to the nearest integer.
    pub value: i64,
    pub timestamp: DateTime<Utc>,
}

/// Row counts for the status page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub realms: i64,
    pub hosts: i64,
    pub services: i64,
    pub sinks: i64,
    pub retention: i64,
}
