//! Named per-entry functions run by `Execute` on the primary owner.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

/// Maps `(current value, argument)` to the new value; `None` removes the entry.
pub type EntryFunction = Arc<dyn Fn(Option<&Bytes>, &Bytes) -> Option<Bytes> + Send + Sync>;

#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, EntryFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(Option<&Bytes>, &Bytes) -> Option<Bytes> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<EntryFunction> {
        self.functions.get(name).map(|f| Arc::clone(f.value()))
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}
