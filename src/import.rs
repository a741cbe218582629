//! Inventory import from a JSON document.
//!
//! Entities reference each other by name. Applying the same inventory
//! twice creates nothing the second time.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::db::{DbError, Sink, Store};
use crate::sink::SinkKind;

/// Name of the realm created on an empty store.
pub const ROOT_REALM: &str = "All";

/// Import error types.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("{kind} '{name}' references unknown {missing} '{target}'")]
    UnknownReference {
        kind: &'static str,
        name: String,
        missing: &'static str,
        target: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub realms: Vec<RealmEntry>,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub sinks: Vec<SinkEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealmEntry {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEntry {
    pub name: String,
    pub realm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub host: String,
    /// Defaults to the host's realm.
    #[serde(default)]
    pub realm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkEntry {
    pub name: String,
    pub kind: SinkKind,
    pub realm: String,
    #[serde(default)]
    pub sub_realm: bool,
    pub address: String,
    #[serde(default)]
    pub prefix: String,
}

/// Number of entities created by an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub realms: usize,
    pub hosts: usize,
    pub services: usize,
    pub sinks: usize,
}

/// Read an inventory file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Inventory, ImportError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Create the root realm when the store has no realm yet. Returns the
/// root realm's ID.
pub fn ensure_root_realm(store: &Store) -> Result<i64, DbError> {
    if let Some(root) = store.get_realms()?.into_iter().find(|r| r.parent_id.is_none()) {
        return Ok(root.id);
    }
    let id = store.add_realm(ROOT_REALM, None)?;
    tracing::info!(realm = id, "Created root realm '{}'", ROOT_REALM);
    Ok(id)
}

/// Apply an inventory to the store.
///
/// All references are checked before anything is written, so an
/// inventory with a dangling reference leaves the store untouched.
pub fn apply(store: &Store, inventory: &Inventory) -> Result<ImportSummary, ImportError> {
    validate(store, inventory)?;

    let mut summary = ImportSummary::default();
    let mut realm_ids: HashMap<String, i64> = store
        .get_realms()?
        .into_iter()
        .map(|r| (r.name, r.id))
        .collect();

    for entry in &inventory.realms {
        let parent_id = match &entry.parent {
            Some(parent) => Some(resolve(&realm_ids, "realm", &entry.name, parent)?),
            None => None,
        };
        let id = match store.find_realm(&entry.name, parent_id)? {
            Some(realm) => realm.id,
            None => {
                summary.realms += 1;
                store.add_realm(&entry.name, parent_id)?
            }
        };
        realm_ids.insert(entry.name.clone(), id);
    }

    for entry in &inventory.hosts {
        if store.find_host_by_name(&entry.name)?.is_some() {
            continue;
        }
        let realm_id = resolve(&realm_ids, "host", &entry.name, &entry.realm)?;
        store.add_host(&entry.name, realm_id)?;
        summary.hosts += 1;
    }

    for entry in &inventory.services {
        let Some(host) = store.find_host_by_name(&entry.host)? else {
            continue;
        };
        if store.find_service(host.id, &entry.name)?.is_some() {
            continue;
        }
        let realm_id = match &entry.realm {
            Some(realm) => resolve(&realm_ids, "service", &entry.name, realm)?,
            None => host.realm_id,
        };
        store.add_service(&entry.name, host.id, realm_id)?;
        summary.services += 1;
    }

    for entry in &inventory.sinks {
        if store.find_sink_by_name(&entry.name)?.is_some() {
            continue;
        }
        let mut sink = Sink {
            id: 0,
            name: entry.name.clone(),
            kind: entry.kind,
            realm_id: resolve(&realm_ids, "sink", &entry.name, &entry.realm)?,
            sub_realm: entry.sub_realm,
            address: entry.address.clone(),
            prefix: entry.prefix.clone(),
        };
        store.add_sink(&mut sink)?;
        summary.sinks += 1;
    }

    tracing::info!(
        realms = summary.realms,
        hosts = summary.hosts,
        services = summary.services,
        sinks = summary.sinks,
        "Inventory imported"
    );
    Ok(summary)
}

fn unknown(kind: &'static str, name: &str, missing: &'static str, target: &str) -> ImportError {
    ImportError::UnknownReference {
        kind,
        name: name.to_string(),
        missing,
        target: target.to_string(),
    }
}

fn resolve(
    realm_ids: &HashMap<String, i64>,
    kind: &'static str,
    name: &str,
    realm: &str,
) -> Result<i64, ImportError> {
    realm_ids
        .get(realm)
        .copied()
        .ok_or_else(|| unknown(kind, name, "realm", realm))
}

fn validate(store: &Store, inventory: &Inventory) -> Result<(), ImportError> {
    let mut realms: HashSet<String> = store.get_realms()?.into_iter().map(|r| r.name).collect();
    for entry in &inventory.realms {
        if let Some(parent) = &entry.parent {
            if !realms.contains(parent) {
                return Err(unknown("realm", &entry.name, "realm", parent));
            }
        }
        realms.insert(entry.name.clone());
    }

    let mut hosts = HashSet::new();
    for entry in &inventory.hosts {
        if !realms.contains(&entry.realm) {
            return Err(unknown("host", &entry.name, "realm", &entry.realm));
        }
        hosts.insert(entry.name.as_str());
    }

    for entry in &inventory.services {
        if !hosts.contains(entry.host.as_str()) && store.find_host_by_name(&entry.host)?.is_none() {
            return Err(unknown("service", &entry.name, "host", &entry.host));
        }
        if let Some(realm) = &entry.realm {
            if !realms.contains(realm) {
                return Err(unknown("service", &entry.name, "realm", realm));
            }
        }
    }

    for entry in &inventory.sinks {
        if !realms.contains(&entry.realm) {
            return Err(unknown("sink", &entry.name, "realm", &entry.realm));
        }
    }

    Ok(())
}
