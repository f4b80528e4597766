//! Model records and the name-to-record table.
//!
//! A record's `config`, `signature` and `size` are written once, by the call
//! that inserted the record, while it still holds the record lock; nothing
//! mutates them afterwards. The payload is backend-specific and changes only
//! under the record lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, MutexGuard};

/// Mutable state of a model, guarded by the per-record lock. The lock is
/// held across one bulk transfer or one remote region call.
#[derive(Debug, Default)]
pub struct ModelState<P> {
    pub config: String,
    pub signature: String,
    pub size: u64,
    pub payload: P,
}

/// One named model. The name is immutable and equals the table key.
#[derive(Debug)]
pub struct ModelRecord<P> {
    name: String,
    state: Mutex<ModelState<P>>,
}

impl<P: Default> ModelRecord<P> {
    fn new(name: &str) -> Self {
        ModelRecord {
            name: name.to_owned(),
            state: Mutex::new(ModelState::default()),
        }
    }
}

impl<P> ModelRecord<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn lock(&self) -> MutexGuard<'_, ModelState<P>> {
        self.state.lock().await
    }
}

/// Name-to-record mapping under a readers-writer lock. The table lock is
/// held only over map operations, never across a bulk transfer; callers
/// clone the record handle out and then take the record lock.
#[derive(Debug)]
pub struct ModelTable<P> {
    models: RwLock<HashMap<String, Arc<ModelRecord<P>>>>,
}

impl<P: Default> ModelTable<P> {
    pub fn new() -> Self {
        ModelTable {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a model by name.
    pub fn find(&self, name: &str) -> Option<Arc<ModelRecord<P>>> {
        let models = self.models.read().expect("model table lock poisoned");
        models.get(name).cloned()
    }

    /// Look up a model by name, inserting a fresh record if absent. The
    /// returned flag is true iff the record was newly inserted; a fresh
    /// record carries only its name and the caller fills the state under
    /// the record's own lock.
    pub fn find_or_create(&self, name: &str) -> (Arc<ModelRecord<P>>, bool) {
        let mut models = self.models.write().expect("model table lock poisoned");
        match models.get(name) {
            Some(model) => (model.clone(), false),
            None => {
                let model = Arc::new(ModelRecord::new(name));
                models.insert(name.to_owned(), model.clone());
                (model, true)
            }
        }
    }

    /// Remove a record. Used to roll back a registration whose backing
    /// setup failed.
    pub fn remove(&self, name: &str) -> Option<Arc<ModelRecord<P>>> {
        let mut models = self.models.write().expect("model table lock poisoned");
        models.remove(name)
    }

    pub fn len(&self) -> usize {
        self.models.read().expect("model table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<P: Default> Default for ModelTable<P> {
    fn default() -> Self {
        Self::new()
    }
}
