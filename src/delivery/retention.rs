//! Retention of points a sink did not accept.

use crate::db::{DbError, RetentionRecord, Sink, Store};
use crate::sink::PointBatch;

/// One retention record per point of `batch`, tagged with `sink`.
pub fn retention_records(sink: &Sink, batch: &PointBatch) -> Vec<RetentionRecord> {
    batch
        .points
        .iter()
        .map(|point| RetentionRecord {
            realm: batch.realm.clone(),
            name: point.name.clone(),
            host: batch.host.clone(),
            service: batch.service.clone(),
            sink_id: sink.id,
            sink_kind: sink.kind,
            value: point.value.as_f64().round() as i64,
            timestamp: batch.timestamp,
        })
        .collect()
}

/// Persist the points of `batch` for a later re-delivery to `sink`.
///
/// Returns the number of records written.
pub fn retain(store: &Store, sink: &Sink, batch: &PointBatch) -> Result<usize, DbError> {
    let records = retention_records(sink, batch);
    store.add_retention_records(&records)?;
    Ok(records.len())
}
