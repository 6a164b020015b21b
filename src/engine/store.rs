//! In-memory record and edge storage.
//!
//! Collections are id-keyed ordered maps, so scans are deterministic
//! without an explicit ordering. Relations are edge lists kept in
//! insertion order. The store is deliberately dumb: matching, patching
//! and snapshot semantics live in the evaluator.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::schema::ID_FIELD;

/// One edge of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRecord {
    pub from_id: String,
    pub to_id: String,
}

/// Heap-backed storage for records and edges.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    edges: BTreeMap<String, Vec<EdgeRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh record id. Ids are opaque; nothing may parse them.
    pub fn allocate_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Inserts or replaces the record under `id`.
    pub fn put(&mut self, collection: &str, id: &str, record: Value) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), record);
    }

    /// Seeds a record, reusing its id field when present. Returns the id
    /// the record is stored under.
    pub fn seed(&mut self, collection: &str, mut record: Value) -> String {
        let id = record
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.allocate_id());
        if let Value::Object(fields) = &mut record {
            fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        }
        self.put(collection, &id, record);
        id
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<&Value> {
        self.collections.get(collection)?.get(id)
    }

    pub fn remove(&mut self, collection: &str, id: &str) -> Option<Value> {
        self.collections.get_mut(collection)?.remove(id)
    }

    /// All records of a collection in id order.
    pub fn records(&self, collection: &str) -> Vec<Value> {
        self.collections
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids of all records of a collection, in order.
    pub fn ids(&self, collection: &str) -> Vec<String> {
        self.collections
            .get(collection)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record_count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn add_edge(&mut self, relation: &str, from_id: &str, to_id: &str) {
        self.edges
            .entry(relation.to_string())
            .or_default()
            .push(EdgeRecord {
                from_id: from_id.to_string(),
                to_id: to_id.to_string(),
            });
    }

    /// Edges of a relation in insertion order.
    pub fn edges(&self, relation: &str) -> &[EdgeRecord] {
        self.edges.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Removes every edge the predicate matches, preserving the order of
    /// the rest. Returns how many were removed.
    pub fn remove_edges(
        &mut self,
        relation: &str,
        mut matches: impl FnMut(&EdgeRecord) -> bool,
    ) -> usize {
        let Some(edges) = self.edges.get_mut(relation) else {
            return 0;
        };
        let before = edges.len();
        edges.retain(|edge| !matches(edge));
        before - edges.len()
    }

    /// Removes the first edge the predicate matches. Returns whether one
    /// was removed.
    pub fn remove_first_edge(
        &mut self,
        relation: &str,
        mut matches: impl FnMut(&EdgeRecord) -> bool,
    ) -> bool {
        let Some(edges) = self.edges.get_mut(relation) else {
            return false;
        };
        match edges.iter().position(|edge| matches(edge)) {
            Some(index) => {
                edges.remove(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seeding_preserves_explicit_ids_and_mints_missing_ones() {
        let mut store = InMemoryStore::new();
        let explicit = store.seed("users", json!({"_id": "u1", "name": "ada"}));
        assert_eq!(explicit, "u1");

        let minted = store.seed("users", json!({"name": "eda"}));
        assert_ne!(minted, "u1");
        assert_eq!(
            store.get("users", &minted).and_then(|r| r.get("_id")),
            Some(&json!(minted))
        );
    }

    #[test]
    fn test_scans_come_back_in_id_order() {
        let mut store = InMemoryStore::new();
        store.seed("users", json!({"_id": "b", "n": 2}));
        store.seed("users", json!({"_id": "a", "n": 1}));
        store.seed("users", json!({"_id": "c", "n": 3}));
        let ns: Vec<_> = store
            .records("users")
            .into_iter()
            .map(|r| r["n"].clone())
            .collect();
        assert_eq!(ns, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_edges_keep_insertion_order() {
        let mut store = InMemoryStore::new();
        store.add_edge("rel", "a", "x");
        store.add_edge("rel", "b", "y");
        store.add_edge("rel", "a", "z");
        let tos: Vec<_> = store
            .edges("rel")
            .iter()
            .filter(|e| e.from_id == "a")
            .map(|e| e.to_id.clone())
            .collect();
        assert_eq!(tos, vec!["x", "z"]);
    }

    #[test]
    fn test_remove_first_edge_takes_only_one() {
        let mut store = InMemoryStore::new();
        store.add_edge("rel", "a", "x");
        store.add_edge("rel", "a", "x");
        assert!(store.remove_first_edge("rel", |e| e.from_id == "a"));
        assert_eq!(store.edges("rel").len(), 1);
    }

    #[test]
    fn test_missing_collections_read_as_empty() {
        let store = InMemoryStore::new();
        assert!(store.records("ghosts").is_empty());
        assert_eq!(store.record_count("ghosts"), 0);
        assert!(store.edges("ghost_rel").is_empty());
    }
}
