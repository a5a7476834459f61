//! Reference store: logical reference name → provider identifier.
//!
//! Resources that declare a `ref` register their identifier here once they
//! are provisioned; later resources point at them through a `ResourceTarget`.
//! Lookups accept both `name` and `[[name]]`.

use super::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// True if a string is written in reference form (`[[name]]`).
pub fn is_ref(s: &str) -> bool {
    s.contains('[')
}

/// Strip `[[` / `]]` delimiters.
pub fn normalize(reference: &str) -> String {
    reference.replace("[[", "").replace("]]", "")
}

/// Read side of a reference map.
pub trait RefLookup {
    /// Exact-key lookup.
    fn get(&self, key: &str) -> Option<String>;

    /// Literal key first, then the bracket-stripped form.
    fn resolve(&self, reference: &str) -> Result<String> {
        if let Some(id) = self.get(reference) {
            debug!("Ref {} resolved to {}", reference, id);
            return Ok(id);
        }
        let normalized = normalize(reference);
        if normalized != reference {
            if let Some(id) = self.get(&normalized) {
                debug!("Ref {} resolved to {}", reference, id);
                return Ok(id);
            }
        }
        debug!("Ref {} could not be resolved", reference);
        Err(Error::UndefinedRef(reference.to_string()))
    }
}

/// Lock-protected store shared by every resource operation of a run.
#[derive(Debug, Default)]
pub struct RefStore {
    entries: RwLock<HashMap<String, String>>,
}

impl RefStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, reference: &str, id: &str) {
        debug!("Setting ref {} to {}", reference, id);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(reference.to_string(), id.to_string());
    }

    pub fn remove(&self, reference: &str) {
        debug!("Removing ref {}", reference);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(reference);
    }

    /// Copy of every entry, for reporting.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RefLookup for RefStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl RefLookup for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).filter(|v| !v.is_empty()).cloned()
    }
}

/// A scratch map layered over the global store.
///
/// Used while a gateway builds its integrations: routes can target an
/// integration created moments earlier before anything is committed globally.
pub struct ScopedRefs<'a> {
    pub local: &'a HashMap<String, String>,
    pub global: &'a RefStore,
}

impl RefLookup for ScopedRefs<'_> {
    fn get(&self, key: &str) -> Option<String> {
        RefLookup::get(self.local, key).or_else(|| self.global.get(key))
    }
}
