//! State-scope loading contract.
//!
//! Persistent storage lives outside the kernel. The only thing a state slot
//! ever does is ask a [`StateLoader`] for the value stored under its key.

use crate::declaration::FragmentClass;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one state slot: the declaring fragment class and slot name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub fragment: FragmentClass,
    pub slot: String,
}

impl StateKey {
    pub fn new(fragment: impl Into<FragmentClass>, slot: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            slot: slot.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.fragment, self.slot)
    }
}

pub trait StateLoader: Send + Sync {
    /// `Ok(None)` when nothing is stored; `Err` carries the backend's message.
    fn load_state(&self, key: &StateKey) -> Result<Option<Value>, String>;
}

/// Loader for assemblies without persistent state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStateLoader;

impl StateLoader for NoStateLoader {
    fn load_state(&self, _key: &StateKey) -> Result<Option<Value>, String> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStateLoader {
    values: RwLock<BTreeMap<StateKey, Value>>,
}

impl MemoryStateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, key: StateKey, value: Value) {
        self.values.write().insert(key, value);
    }
}

impl StateLoader for MemoryStateLoader {
    fn load_state(&self, key: &StateKey) -> Result<Option<Value>, String> {
        Ok(self.values.read().get(key).cloned())
    }
}
