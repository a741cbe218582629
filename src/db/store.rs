//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::sink::SinkKind;
use crate::state::{CheckState, HostState, LiveState, ServiceState};

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    /// The row exists but its version no longer matches the one read.
    #[error("Version conflict on {table} {id}")]
    Conflict { table: &'static str, id: i64 },
    #[error("Database lock poisoned")]
    Poisoned,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const HOST_COLUMNS: &str = "id, name, realm_id, ls_state, ls_state_type, ls_acknowledged, \
     ls_downtimed, ls_last_hard_state, overall_state_id, version";

const SERVICE_COLUMNS: &str = "id, name, host_id, realm_id, ls_state, ls_state_type, \
     ls_acknowledged, ls_downtimed, ls_last_hard_state, overall_state_id, version";

const SINK_COLUMNS: &str = "id, name, kind, realm_id, sub_realm, address, prefix";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Realms ---

    /// Add a realm and return its ID.
    pub fn add_realm(&self, name: &str, parent_id: Option<i64>) -> Result<i64, DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO realms (name, parent_id) VALUES (?1, ?2)",
            params![name, parent_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a realm by ID.
    #[cfg(test)]
    pub fn get_realm(&self, id: i64) -> Result<Realm, DbError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, parent_id FROM realms WHERE id = ?1",
            params![id],
            realm_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Get all realms.
    pub fn get_realms(&self) -> Result<Vec<Realm>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, parent_id FROM realms ORDER BY id")?;
        let realms = stmt
            .query_map([], realm_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(realms)
    }

    /// Find a realm by name under the given parent.
    pub fn find_realm(&self, name: &str, parent_id: Option<i64>) -> Result<Option<Realm>, DbError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, name, parent_id FROM realms WHERE name = ?1 AND parent_id IS ?2",
                params![name, parent_id],
                realm_from_row,
            )
            .optional()?)
    }

    // --- Hosts ---

    /// Add a never-checked host and return its ID.
    pub fn add_host(&self, name: &str, realm_id: i64) -> Result<i64, DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO hosts (name, realm_id) VALUES (?1, ?2)",
            params![name, realm_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a host by ID.
    pub fn get_host(&self, id: i64) -> Result<Host, DbError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM hosts WHERE id = ?1", HOST_COLUMNS),
            params![id],
            host_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Find a host by its unique name.
    pub fn find_host_by_name(&self, name: &str) -> Result<Option<Host>, DbError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM hosts WHERE name = ?1", HOST_COLUMNS),
                params![name],
                host_from_row,
            )
            .optional()?)
    }

    /// Write a host's live state and overall state if its version still
    /// matches. Returns the new version.
    pub fn update_host_live(
        &self,
        id: i64,
        expected_version: i64,
        live: &LiveState<HostState>,
        overall_state_id: u8,
    ) -> Result<i64, DbError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE hosts SET ls_state=?1, ls_state_type=?2, ls_acknowledged=?3, ls_downtimed=?4,
             ls_last_hard_state=?5, overall_state_id=?6, version=version+1
             WHERE id=?7 AND version=?8",
            params![
                live.state.as_str(),
                live.state_type.as_str(),
                live.acknowledged,
                live.downtimed,
                live.last_hard_state.as_str(),
                overall_state_id,
                id,
                expected_version,
            ],
        )?;
        settle_guarded_write(&conn, "hosts", id, changed)?;
        Ok(expected_version + 1)
    }

    /// Write only a host's overall state, guarded by version.
    pub fn update_host_overall(
        &self,
        id: i64,
        expected_version: i64,
        overall_state_id: u8,
    ) -> Result<i64, DbError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE hosts SET overall_state_id=?1, version=version+1 WHERE id=?2 AND version=?3",
            params![overall_state_id, id, expected_version],
        )?;
        settle_guarded_write(&conn, "hosts", id, changed)?;
        Ok(expected_version + 1)
    }

    // --- Services ---

    /// Add a never-checked service and return its ID.
    pub fn add_service(&self, name: &str, host_id: i64, realm_id: i64) -> Result<i64, DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO services (name, host_id, realm_id) VALUES (?1, ?2, ?3)",
            params![name, host_id, realm_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a service by ID.
    pub fn get_service(&self, id: i64) -> Result<Service, DbError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM services WHERE id = ?1", SERVICE_COLUMNS),
            params![id],
            service_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Find a service by name on the given host.
    pub fn find_service(&self, host_id: i64, name: &str) -> Result<Option<Service>, DbError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM services WHERE host_id = ?1 AND name = ?2",
                    SERVICE_COLUMNS
                ),
                params![host_id, name],
                service_from_row,
            )
            .optional()?)
    }

    /// Get the services owned by a host, ordered by ID.
    pub fn get_services_for_host(&self, host_id: i64) -> Result<Vec<Service>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM services WHERE host_id = ?1 ORDER BY id",
            SERVICE_COLUMNS
        ))?;
        let services = stmt
            .query_map(params![host_id], service_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(services)
    }

    /// Get the last persisted overall state of every service of a host.
    pub fn get_service_overall_states(&self, host_id: i64) -> Result<Vec<u8>, DbError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT overall_state_id FROM services WHERE host_id = ?1 ORDER BY id")?;
        let codes = stmt
            .query_map(params![host_id], |row| row.get(0))?
            .collect::<SqlResult<Vec<u8>>>()?;
        Ok(codes)
    }

    /// Write a service's live state and overall state if its version still
    /// matches. Returns the new version.
    pub fn update_service_live(
        &self,
        id: i64,
        expected_version: i64,
        live: &LiveState<ServiceState>,
        overall_state_id: u8,
    ) -> Result<i64, DbError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE services SET ls_state=?1, ls_state_type=?2, ls_acknowledged=?3, ls_downtimed=?4,
             ls_last_hard_state=?5, overall_state_id=?6, version=version+1
             WHERE id=?7 AND version=?8",
            params![
                live.state.as_str(),
                live.state_type.as_str(),
                live.acknowledged,
                live.downtimed,
                live.last_hard_state.as_str(),
                overall_state_id,
                id,
                expected_version,
            ],
        )?;
        settle_guarded_write(&conn, "services", id, changed)?;
        Ok(expected_version + 1)
    }

    // --- Sinks ---

    /// Add a sink and return its ID.
    pub fn add_sink(&self, sink: &mut Sink) -> Result<i64, DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sinks (name, kind, realm_id, sub_realm, address, prefix) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sink.name,
                sink.kind.as_str(),
                sink.realm_id,
                sink.sub_realm,
                sink.address,
                sink.prefix,
            ],
        )?;
        let id = conn.last_insert_rowid();
        sink.id = id;
        Ok(id)
    }

    /// Get all sinks.
    #[cfg(test)]
    pub fn get_sinks(&self) -> Result<Vec<Sink>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM sinks ORDER BY id", SINK_COLUMNS))?;
        let sinks = stmt
            .query_map([], sink_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sinks)
    }

    /// Get all sinks of one kind.
    pub fn get_sinks_by_kind(&self, kind: SinkKind) -> Result<Vec<Sink>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sinks WHERE kind = ?1 ORDER BY id",
            SINK_COLUMNS
        ))?;
        let sinks = stmt
            .query_map(params![kind.as_str()], sink_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sinks)
    }

    /// Find a sink by name.
    pub fn find_sink_by_name(&self, name: &str) -> Result<Option<Sink>, DbError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM sinks WHERE name = ?1", SINK_COLUMNS),
                params![name],
                sink_from_row,
            )
            .optional()?)
    }

    // --- Timeseries retention ---

    /// Append retention records in batch.
    pub fn add_retention_records(&self, records: &[RetentionRecord]) -> Result<(), DbError> {
        if records.is_empty() {
            return Ok(());
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO timeseries_retention (realm, name, host, service, sink_id, sink_kind, value, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;

            for r in records {
                stmt.execute(params![
                    r.realm,
                    r.name,
                    r.host,
                    r.service,
                    r.sink_id,
                    r.sink_kind.as_str(),
                    r.value,
                    r.timestamp.format(TIME_FORMAT).to_string(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Get all retention records in insertion order.
    pub fn list_retention(&self) -> Result<Vec<RetentionRecord>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT realm, name, host, service, sink_id, sink_kind, value, timestamp
             FROM timeseries_retention ORDER BY id",
        )?;

        let records = stmt
            .query_map([], |row| {
                let time_str: String = row.get(7)?;
                Ok(RetentionRecord {
                    realm: row.get(0)?,
                    name: row.get(1)?,
                    host: row.get(2)?,
                    service: row.get(3)?,
                    sink_id: row.get(4)?,
                    sink_kind: parse_column(row, 5)?,
                    value: row.get(6)?,
                    timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }

    // --- Status Page Stats ---

    /// Get row counts of every table.
    pub fn get_status_counts(&self) -> Result<StatusCounts, DbError> {
        let conn = self.lock()?;
        let count = |table: &str| -> SqlResult<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        };
        Ok(StatusCounts {
            realms: count("realms")?,
            hosts: count("hosts")?,
            services: count("services")?,
            sinks: count("sinks")?,
            retention: count("timeseries_retention")?,
        })
    }
}

/// Turn the affected-row count of a version-guarded UPDATE into a result.
fn settle_guarded_write(
    conn: &Connection,
    table: &'static str,
    id: i64,
    changed: usize,
) -> Result<(), DbError> {
    if changed > 0 {
        return Ok(());
    }

    let exists: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table),
        params![id],
        |row| row.get(0),
    )?;

    if exists == 0 {
        Err(DbError::NotFound)
    } else {
        Err(DbError::Conflict { table, id })
    }
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> SqlResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn realm_from_row(row: &Row<'_>) -> SqlResult<Realm> {
    Ok(Realm {
        id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
    })
}

fn host_from_row(row: &Row<'_>) -> SqlResult<Host> {
    Ok(Host {
        id: row.get(0)?,
        name: row.get(1)?,
        realm_id: row.get(2)?,
        live: LiveState {
            state: parse_column(row, 3)?,
            state_type: parse_column(row, 4)?,
            acknowledged: row.get(5)?,
            downtimed: row.get(6)?,
            last_hard_state: parse_column(row, 7)?,
        },
        overall_state_id: row.get(8)?,
        version: row.get(9)?,
    })
}

fn service_from_row(row: &Row<'_>) -> SqlResult<Service> {
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        host_id: row.get(2)?,
        realm_id: row.get(3)?,
        live: LiveState {
            state: parse_column(row, 4)?,
            state_type: parse_column(row, 5)?,
            acknowledged: row.get(6)?,
            downtimed: row.get(7)?,
            last_hard_state: parse_column(row, 8)?,
        },
        overall_state_id: row.get(9)?,
        version: row.get(10)?,
    })
}

fn sink_from_row(row: &Row<'_>) -> SqlResult<Sink> {
    Ok(Sink {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: parse_column(row, 2)?,
        realm_id: row.get(3)?,
        sub_realm: row.get(4)?,
        address: row.get(5)?,
        prefix: row.get(6)?,
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
