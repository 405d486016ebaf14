//! StateStore — redb-backed state persistence for Baragon.
//!
//! Provides typed CRUD operations over service records, node outcomes,
//! and request records. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use baragon_core::NodeOutcome;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
        txn.open_table(REQUESTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic table access ───────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    fn delete(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service record.
    pub fn put_service(&self, record: &ServiceRecord) -> StateResult<()> {
        self.put(SERVICES, record.table_key(), record)?;
        debug!(service = %record.table_key(), upstreams = record.upstreams.len(), "service stored");
        Ok(())
    }

    /// Get a service record by service id.
    pub fn get_service(&self, service_id: &str) -> StateResult<Option<ServiceRecord>> {
        self.get(SERVICES, service_id)
    }

    /// List all service records, ordered by service id.
    pub fn list_services(&self) -> StateResult<Vec<ServiceRecord>> {
        self.list(SERVICES)
    }

    /// Delete a service record. Returns true if it existed.
    pub fn delete_service(&self, service_id: &str) -> StateResult<bool> {
        let existed = self.delete(SERVICES, service_id)?;
        debug!(service = %service_id, existed, "service deleted");
        Ok(existed)
    }

    // ── Outcomes ───────────────────────────────────────────────────

    /// Record the outcome of applying a request on this node.
    pub fn put_outcome(&self, outcome: &NodeOutcome) -> StateResult<()> {
        self.put(OUTCOMES, &outcome.request_id, outcome)
    }

    /// Previously recorded outcome for a request, if any.
    pub fn get_outcome(&self, request_id: &str) -> StateResult<Option<NodeOutcome>> {
        self.get(OUTCOMES, request_id)
    }

    pub fn list_outcomes(&self) -> StateResult<Vec<NodeOutcome>> {
        self.list(OUTCOMES)
    }

    // ── Requests ───────────────────────────────────────────────────

    /// Insert or update a request record.
    pub fn put_request(&self, record: &RequestRecord) -> StateResult<()> {
        self.put(REQUESTS, record.table_key(), record)
    }

    pub fn get_request(&self, request_id: &str) -> StateResult<Option<RequestRecord>> {
        self.get(REQUESTS, request_id)
    }

    pub fn list_requests(&self) -> StateResult<Vec<RequestRecord>> {
        self.list(REQUESTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baragon_core::*;

    fn test_record(service_id: &str, upstreams: &[&str]) -> ServiceRecord {
        ServiceRecord {
            service: BaragonService::new(service_id, &["edge"]),
            upstreams: upstreams.iter().map(|u| UpstreamInfo::new(u)).collect(),
            request_id: "r1".to_string(),
            updated_at: 1000,
        }
    }

    fn test_request_record(request_id: &str) -> RequestRecord {
        let request =
            BaragonRequest::new(request_id, BaragonService::new("api", &["edge"]), vec![], vec![])
                .unwrap();
        RequestRecord {
            request,
            groups: vec!["edge".to_string()],
            status: AggregateStatus::queued(request_id),
        }
    }

    // ── Service CRUD ───────────────────────────────────────────────

    #[test]
    fn service_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let record = test_record("checkout", &["10.0.0.1:80", "10.0.0.2:80"]);

        store.put_service(&record).unwrap();
        let retrieved = store.get_service("checkout").unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[test]
    fn service_update_overwrites() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&test_record("checkout", &["10.0.0.1:80"])).unwrap();
        store
            .put_service(&test_record("checkout", &["10.0.0.3:80", "10.0.0.4:80"]))
            .unwrap();

        let retrieved = store.get_service("checkout").unwrap().unwrap();
        assert_eq!(retrieved.upstreams.len(), 2);
        assert_eq!(store.list_services().unwrap().len(), 1);
    }

    #[test]
    fn service_list_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_service(&test_record("b", &[])).unwrap();
        store.put_service(&test_record("a", &[])).unwrap();

        let ids: Vec<_> = store
            .list_services()
            .unwrap()
            .into_iter()
            .map(|r| r.service.service_id)
            .collect();
        assert_eq!(ids, ["a", "b"]);

        assert!(store.delete_service("a").unwrap());
        assert!(!store.delete_service("a").unwrap());
        assert!(store.get_service("a").unwrap().is_none());
    }

    // ── Outcome ledger ─────────────────────────────────────────────

    #[test]
    fn outcome_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let outcome = NodeOutcome::failed("node-1", "r7", FailureKind::ReloadFailed, "exit 1");

        store.put_outcome(&outcome).unwrap();

        assert_eq!(store.get_outcome("r7").unwrap(), Some(outcome));
        assert!(store.get_outcome("r8").unwrap().is_none());
        assert_eq!(store.list_outcomes().unwrap().len(), 1);
    }

    // ── Request records ────────────────────────────────────────────

    #[test]
    fn request_put_get_and_update_status() {
        let store = StateStore::open_in_memory().unwrap();
        let mut record = test_request_record("r1");
        store.put_request(&record).unwrap();

        record.status.phase = RequestPhase::Completed;
        record.status.result = Some(OverallResult::Success);
        store.put_request(&record).unwrap();

        let retrieved = store.get_request("r1").unwrap().unwrap();
        assert_eq!(retrieved.status.result, Some(OverallResult::Success));
        assert_eq!(retrieved.request.request_id(), "r1");
        assert_eq!(store.list_requests().unwrap().len(), 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_service(&test_record("checkout", &["10.0.0.1:80"])).unwrap();
            store
                .put_outcome(&NodeOutcome::success("node-1", "r1", None))
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let record = store.get_service("checkout").unwrap();
        assert_eq!(record.unwrap().upstreams.len(), 1);
        assert!(store.get_outcome("r1").unwrap().unwrap().is_success());
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_services().unwrap().is_empty());
        assert!(store.list_outcomes().unwrap().is_empty());
        assert!(store.list_requests().unwrap().is_empty());
        assert!(store.get_request("nope").unwrap().is_none());
        assert!(!store.delete_service("nope").unwrap());
    }
}
