use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use netpol_controller_core::{IndexName, IndexedStore, Record, StoreError};
use parking_lot::RwLock;
use tracing::{debug, trace};

/// Computes the values under which a record is indexed.
pub type Indexer = fn(&Record) -> Vec<String>;

/// An in-memory collection of records with secondary indices.
///
/// Every write updates the primary map and all indices under a single lock, so readers never
/// observe a record whose index entries are only partially updated.
#[derive(Debug)]
pub struct Store {
    name: &'static str,
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, Record>,
    indices: HashMap<IndexName, Index>,
}

struct Index {
    indexer: Indexer,
    by_value: HashMap<String, HashSet<String>>,
}

// === impl Store ===

impl Store {
    pub fn new(
        name: &'static str,
        indexers: impl IntoIterator<Item = (IndexName, Indexer)>,
    ) -> Self {
        let indices = indexers
            .into_iter()
            .map(|(index_name, indexer)| {
                let index = Index {
                    indexer,
                    by_value: HashMap::default(),
                };
                (index_name, index)
            })
            .collect();
        Self {
            name,
            state: RwLock::new(State {
                records: HashMap::default(),
                indices,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Creates or replaces a record.
    pub fn apply(&self, record: Record) {
        let mut state = self.state.write();
        state.insert(record);
    }

    /// Removes the record with the given key, returning it if it existed.
    pub fn delete(&self, key: &str) -> Option<Record> {
        let mut state = self.state.write();
        let record = state.remove(key);
        if record.is_none() {
            debug!(store = %self.name, %key, "Record does not exist");
        }
        record
    }

    /// Replaces the entire contents of the store.
    pub fn reset(&self, records: impl IntoIterator<Item = Record>) {
        let mut state = self.state.write();
        state.records.clear();
        for index in state.indices.values_mut() {
            index.by_value.clear();
        }
        for record in records {
            state.insert(record);
        }
        debug!(store = %self.name, records = state.records.len(), "Reset");
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }
}

impl IndexedStore for Store {
    fn list(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.state.read().records.values().cloned().collect())
    }

    fn get(&self, key: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.state.read().records.get(key).cloned())
    }

    fn get_by_index(&self, index: IndexName, value: &str) -> Result<Vec<Record>, StoreError> {
        let state = self.state.read();
        let idx = state
            .indices
            .get(&index)
            .ok_or(StoreError::UnknownIndex(index))?;
        let records = idx
            .by_value
            .get(value)
            .into_iter()
            .flatten()
            .filter_map(|key| state.records.get(key).cloned())
            .collect::<Vec<_>>();
        trace!(store = %self.name, %index, %value, records = records.len());
        Ok(records)
    }
}

// === impl Index ===

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("values", &self.by_value.len())
            .finish_non_exhaustive()
    }
}

// === impl State ===

impl State {
    fn insert(&mut self, record: Record) {
        let key = record.key().to_string();
        if let Some(prior) = self.records.remove(&key) {
            self.unindex(&key, &prior);
        }
        for index in self.indices.values_mut() {
            for value in (index.indexer)(&record) {
                index.by_value.entry(value).or_default().insert(key.clone());
            }
        }
        self.records.insert(key, record);
    }

    fn remove(&mut self, key: &str) -> Option<Record> {
        let record = self.records.remove(key)?;
        self.unindex(key, &record);
        Some(record)
    }

    fn unindex(&mut self, key: &str, record: &Record) {
        for index in self.indices.values_mut() {
            for value in (index.indexer)(record) {
                if let Some(keys) = index.by_value.get_mut(&value) {
                    keys.remove(key);
                    if keys.is_empty() {
                        index.by_value.remove(&value);
                    }
                }
            }
        }
    }
}
