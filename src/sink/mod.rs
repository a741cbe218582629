//! Time-series sinks.
//!
//! Two kinds of destination are supported: push sinks receive carbon
//! plaintext lines over TCP, pull sinks receive a JSON document over HTTP.

mod carbon;
mod http;

pub use carbon::*;
pub use http::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::db::Sink;
use crate::perfdata::PointSet;

/// Sink error types.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("sink rejected the points: {0}")]
    Rejected(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned for an unknown sink kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown sink kind '{0}'")]
pub struct ParseSinkKindError(pub String);

/// Delivery style of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Push,
    Pull,
}

impl SinkKind {
    pub const ALL: [SinkKind; 2] = [SinkKind::Push, SinkKind::Pull];

    pub fn as_str(self) -> &'static str {
        match self {
            SinkKind::Push => "push",
            SinkKind::Pull => "pull",
        }
    }
}

impl FromStr for SinkKind {
    type Err = ParseSinkKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(SinkKind::Push),
            "pull" => Ok(SinkKind::Pull),
            other => Err(ParseSinkKindError(other.to_string())),
        }
    }
}

/// A point set together with the labels every sink needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PointBatch {
    /// Realm path label, e.g. `All.All A`.
    pub realm: String,
    pub host: String,
    /// Empty for host check results.
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub points: PointSet,
}

/// Transmits a point batch to one sink.
#[async_trait]
pub trait SinkTransport: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &str;

    async fn send(&self, sink: &Sink, batch: &PointBatch) -> Result<(), SinkError>;
}

/// One transport per sink kind.
#[derive(Clone)]
pub struct Transports {
    pub push: Arc<dyn SinkTransport>,
    pub pull: Arc<dyn SinkTransport>,
}

impl Transports {
    pub fn new(push: Arc<dyn SinkTransport>, pull: Arc<dyn SinkTransport>) -> Self {
        Self { push, pull }
    }

    pub fn for_kind(&self, kind: SinkKind) -> Arc<dyn SinkTransport> {
        match kind {
            SinkKind::Push => self.push.clone(),
            SinkKind::Pull => self.pull.clone(),
        }
    }
}

/// Select the sinks that receive points from `realm_id`.
///
/// A sink applies when it is bound to the realm itself, or to one of
/// `ancestors` with `sub_realm` enabled.
pub fn select_in_scope(sinks: &[Sink], realm_id: i64, ancestors: &[i64]) -> Vec<Sink> {
    sinks
        .iter()
        .filter(|sink| {
            sink.realm_id == realm_id || (sink.sub_realm && ancestors.contains(&sink.realm_id))
        })
        .cloned()
        .collect()
}

/// Make one segment of a dotted metric path safe: dots and whitespace
/// inside the segment become `_`.
pub fn path_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == '.' || c.is_whitespace() { '_' } else { c })
        .collect()
}
