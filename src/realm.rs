//! Realm tree walks: path labels and sink scoping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::db::{DbError, Realm, Sink, Store};
use crate::sink::{select_in_scope, SinkKind};

/// Deepest parent chain that is followed before giving up.
pub const MAX_REALM_DEPTH: usize = 64;

/// Resolves realm labels and in-scope sinks from the store.
#[derive(Clone)]
pub struct RealmResolver {
    store: Arc<Store>,
}

impl RealmResolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Chain of realms from `realm_id` up to the root, the realm itself first.
    ///
    /// Unknown ids, dangling parents and cycles yield an empty chain.
    pub fn ancestry(&self, realm_id: i64) -> Result<Vec<Realm>, DbError> {
        let realms: HashMap<i64, Realm> = self
            .store
            .get_realms()?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(realm_id);

        while let Some(id) = next {
            if !seen.insert(id) || chain.len() >= MAX_REALM_DEPTH {
                tracing::warn!(realm = realm_id, at = id, "Malformed realm parent chain");
                return Ok(Vec::new());
            }
            let Some(realm) = realms.get(&id) else {
                tracing::warn!(realm = realm_id, missing = id, "Unknown realm in parent chain");
                return Ok(Vec::new());
            };
            next = realm.parent_id;
            chain.push(realm.clone());
        }

        Ok(chain)
    }

    /// Dotted label of a realm, root first, e.g. `All.All A.All A1`.
    ///
    /// Empty when the realm cannot be resolved.
    pub fn path_label(&self, realm_id: i64) -> Result<String, DbError> {
        let chain = self.ancestry(realm_id)?;
        Ok(label_of(&chain))
    }

    /// Sinks of `kind` that receive points from entities in `realm_id`.
    pub fn in_scope_sinks(&self, realm_id: i64, kind: SinkKind) -> Result<Vec<Sink>, DbError> {
        let chain = self.ancestry(realm_id)?;
        if chain.is_empty() {
            return Ok(Vec::new());
        }
        let ancestors: Vec<i64> = chain[1..].iter().map(|r| r.id).collect();
        let sinks = self.store.get_sinks_by_kind(kind)?;
        Ok(select_in_scope(&sinks, realm_id, &ancestors))
    }
}

fn label_of(chain: &[Realm]) -> String {
    chain
        .iter()
        .rev()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    struct Tree {
        _tmp: NamedTempFile,
        store: Arc<Store>,
        all: i64,
        a: i64,
        a1: i64,
        b: i64,
    }

    fn tree() -> Tree {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let all = store.add_realm("All", None).unwrap();
        let a = store.add_realm("All A", Some(all)).unwrap();
        let a1 = store.add_realm("All A1", Some(a)).unwrap();
        let b = store.add_realm("All B", Some(all)).unwrap();
        Tree { _tmp: tmp, store, all, a, a1, b }
    }

    fn add_sink(store: &Store, name: &str, kind: SinkKind, realm_id: i64, sub_realm: bool) -> i64 {
        let mut sink = Sink {
            id: 0,
            name: name.to_string(),
            kind,
            realm_id,
            sub_realm,
            address: "localhost".to_string(),
            prefix: String::new(),
        };
        store.add_sink(&mut sink).unwrap()
    }

    fn names(sinks: &[Sink]) -> Vec<&str> {
        sinks.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_path_label() {
        let t = tree();
        let resolver = RealmResolver::new(t.store.clone());

        assert_eq!(resolver.path_label(t.all).unwrap(), "All");
        assert_eq!(resolver.path_label(t.a).unwrap(), "All.All A");
        assert_eq!(resolver.path_label(t.a1).unwrap(), "All.All A.All A1");
        assert_eq!(resolver.path_label(t.b).unwrap(), "All.All B");
        assert_eq!(resolver.path_label(999).unwrap(), "");
    }

    /// Point a realm at any parent, bypassing the foreign key.
    fn set_parent(tmp: &NamedTempFile, id: i64, parent_id: i64) {
        let conn = rusqlite::Connection::open(tmp.path()).unwrap();
        conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        conn.execute(
            "UPDATE realms SET parent_id = ?1 WHERE id = ?2",
            rusqlite::params![parent_id, id],
        )
        .unwrap();
    }

    #[test]
    fn test_dangling_parent_gives_empty_label() {
        let t = tree();
        let orphan = t.store.add_realm("Orphan", Some(t.all)).unwrap();
        set_parent(&t._tmp, orphan, 12345);
        let resolver = RealmResolver::new(t.store.clone());

        assert!(resolver.ancestry(orphan).unwrap().is_empty());
        assert_eq!(resolver.path_label(orphan).unwrap(), "");
        // Siblings are unaffected
        assert_eq!(resolver.path_label(t.a1).unwrap(), "All.All A.All A1");
    }

    #[test]
    fn test_cycle_gives_empty_label() {
        let t = tree();
        add_sink(&t.store, "graphite all", SinkKind::Push, t.all, true);
        let first = t.store.add_realm("loop a", Some(t.all)).unwrap();
        let second = t.store.add_realm("loop b", Some(first)).unwrap();
        set_parent(&t._tmp, first, second);
        let resolver = RealmResolver::new(t.store.clone());

        assert!(resolver.ancestry(first).unwrap().is_empty());
        assert_eq!(resolver.path_label(first).unwrap(), "");
        assert_eq!(resolver.path_label(second).unwrap(), "");
        assert!(resolver.in_scope_sinks(second, SinkKind::Push).unwrap().is_empty());
        assert_eq!(resolver.in_scope_sinks(t.a, SinkKind::Push).unwrap().len(), 1);
    }

    #[test]
    fn test_self_parent_gives_empty_label() {
        let t = tree();
        set_parent(&t._tmp, t.b, t.b);
        let resolver = RealmResolver::new(t.store.clone());

        assert_eq!(resolver.path_label(t.b).unwrap(), "");
        assert_eq!(resolver.path_label(t.a).unwrap(), "All.All A");
    }

    #[test]
    fn test_in_scope_sinks_follow_sub_realm_flag() {
        let t = tree();
        add_sink(&t.store, "graphite all", SinkKind::Push, t.all, true);
        add_sink(&t.store, "graphite all only", SinkKind::Push, t.all, false);
        add_sink(&t.store, "graphite a", SinkKind::Push, t.a, false);
        add_sink(&t.store, "influx a", SinkKind::Pull, t.a, true);
        let resolver = RealmResolver::new(t.store.clone());

        assert_eq!(
            names(&resolver.in_scope_sinks(t.all, SinkKind::Push).unwrap()),
            vec!["graphite all", "graphite all only"]
        );
        assert_eq!(
            names(&resolver.in_scope_sinks(t.a, SinkKind::Push).unwrap()),
            vec!["graphite all", "graphite a"]
        );
        // Non-inheriting sink at an intermediate realm stops there
        assert_eq!(
            names(&resolver.in_scope_sinks(t.a1, SinkKind::Push).unwrap()),
            vec!["graphite all"]
        );
        assert_eq!(
            names(&resolver.in_scope_sinks(t.a1, SinkKind::Pull).unwrap()),
            vec!["influx a"]
        );
        assert!(resolver.in_scope_sinks(t.b, SinkKind::Pull).unwrap().is_empty());
        assert!(resolver.in_scope_sinks(999, SinkKind::Push).unwrap().is_empty());
    }
}
