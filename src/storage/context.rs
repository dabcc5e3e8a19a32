//! Per-call storage context.

use std::fmt;
use std::sync::Arc;

use crate::storage::Module;

/// Resolves a cooperating storage module by name.
///
/// Lets a module delegate to another one (e.g. a caching module in front of
/// a remote one) without knowing how the platform wires modules together.
pub trait ModuleLookup: Send + Sync {
    /// Returns the module registered under `name`, if any.
    fn lookup(&self, name: &str) -> Option<Module>;
}

/// Caller-owned context passed by reference into every module operation.
///
/// Modules only read from it, and only use the fields they document needing.
/// The filesystem module needs none.
#[derive(Clone, Default)]
pub struct StorageContext {
    modules: Option<Arc<dyn ModuleLookup>>,
}

impl StorageContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a module lookup callback.
    #[must_use]
    pub fn with_module_lookup(mut self, lookup: Arc<dyn ModuleLookup>) -> Self {
        self.modules = Some(lookup);
        self
    }

    /// Resolve another module by name through the attached lookup.
    ///
    /// Returns `None` when no lookup is attached or the name is unknown.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<Module> {
        self.modules.as_ref().and_then(|lookup| lookup.lookup(name))
    }

    #[must_use]
    pub fn has_module_lookup(&self) -> bool {
        self.modules.is_some()
    }
}

impl fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContext")
            .field("module_lookup", &self.modules.is_some())
            .finish()
    }
}
