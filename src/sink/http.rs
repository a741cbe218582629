//! HTTP JSON transport for pull sinks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{PointBatch, SinkError, SinkTransport};
use crate::db::Sink;
use crate::perfdata::PointSet;

/// Body posted to a pull sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpPayload {
    pub realm: String,
    pub host: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub prefix: String,
    pub points: PointSet,
}

impl HttpPayload {
    pub fn new(sink: &Sink, batch: &PointBatch) -> Self {
        Self {
            realm: batch.realm.clone(),
            host: batch.host.clone(),
            service: batch.service.clone(),
            timestamp: batch.timestamp,
            prefix: sink.prefix.clone(),
            points: batch.points.clone(),
        }
    }
}

/// Posts point batches as JSON.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Connection(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, e: reqwest::Error) -> SinkError {
        if e.is_timeout() {
            SinkError::Timeout(self.timeout)
        } else {
            SinkError::Connection(e.to_string())
        }
    }
}

#[async_trait]
impl SinkTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, sink: &Sink, batch: &PointBatch) -> Result<(), SinkError> {
        let url = if sink.address.starts_with("http://") || sink.address.starts_with("https://") {
            sink.address.clone()
        } else {
            format!("http://{}", sink.address)
        };

        let response = self
            .client
            .post(&url)
            .json(&HttpPayload::new(sink, batch))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(format!("{} returned {}", url, status)));
        }
        Ok(())
    }
}
