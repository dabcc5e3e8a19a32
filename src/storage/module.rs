//! Protocol-tagged modules, construction and lookup by name.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::storage::local::{LocalStorageModule, WriteMode};
use crate::storage::{
    AtomicPut, CapabilitySet, Handle, ModuleLookup, ReadStream, Statistics, StorageContext,
    StorageError, StorageModule, StorageResult, Ticketing,
};

/// Write protocol a module exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Single-call `put`.
    Atomic,
    /// `new_data` followed by `assign`.
    #[default]
    Ticketing,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Atomic => "atomic",
            Self::Ticketing => "ticketing",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atomic" => Ok(Self::Atomic),
            "ticketing" => Ok(Self::Ticketing),
            other => Err(StorageError::Configuration(format!(
                "Unknown protocol: {other} (expected 'atomic' or 'ticketing')"
            ))),
        }
    }
}

/// A storage module tagged with the write protocol it exposes.
///
/// The shared operations dispatch to either variant. Protocol-specific calls
/// on the wrong variant fail with `StorageError::NotImplemented`.
#[derive(Clone)]
pub enum Module {
    Atomic(Arc<dyn AtomicPut>),
    Ticketing(Arc<dyn Ticketing>),
}

macro_rules! dispatch {
    ($module:expr, $m:ident => $call:expr) => {
        match $module {
            Module::Atomic($m) => $call,
            Module::Ticketing($m) => $call,
        }
    };
}

impl Module {
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Atomic(_) => Protocol::Atomic,
            Self::Ticketing(_) => Protocol::Ticketing,
        }
    }

    #[must_use]
    pub fn backend_type(&self) -> &'static str {
        dispatch!(self, m => m.backend_type())
    }

    #[must_use]
    pub fn capabilities(&self, ctx: &StorageContext) -> CapabilitySet {
        dispatch!(self, m => m.capabilities(ctx))
    }

    #[must_use]
    pub fn available(&self, ctx: &StorageContext, handle: &Handle) -> bool {
        dispatch!(self, m => m.available(ctx, handle))
    }

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the handle is not available.
    pub fn get_read_stream(
        &self,
        ctx: &StorageContext,
        handle: &Handle,
    ) -> StorageResult<Box<dyn ReadStream>> {
        dispatch!(self, m => m.get_read_stream(ctx, handle))
    }

    /// # Errors
    ///
    /// Returns an error only if the medium refuses to remove existing content.
    pub fn delete(&self, ctx: &StorageContext, handle: &Handle) -> StorageResult<()> {
        dispatch!(self, m => m.delete(ctx, handle))
    }

    #[must_use]
    pub fn statistics(&self, ctx: &StorageContext) -> Statistics {
        dispatch!(self, m => m.statistics(ctx))
    }

    /// # Errors
    ///
    /// Returns `StorageError::NotImplemented` if the module has no
    /// server-side copy, or `StorageError::NotFound` for a missing source.
    pub fn copy(&self, ctx: &StorageContext, handle: &Handle) -> StorageResult<Handle> {
        dispatch!(self, m => m.copy(ctx, handle))
    }

    /// Atomic write.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotImplemented` on a ticketing module, otherwise
    /// whatever [`AtomicPut::put`] returns.
    pub fn put(&self, ctx: &StorageContext, stream: &mut dyn Read) -> StorageResult<Handle> {
        match self {
            Self::Atomic(m) => m.put(ctx, stream),
            Self::Ticketing(_) => Err(StorageError::NotImplemented("put")),
        }
    }

    /// Ticketing reservation.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotImplemented` on an atomic module.
    pub fn new_data(&self, ctx: &StorageContext) -> StorageResult<Handle> {
        match self {
            Self::Ticketing(m) => m.new_data(ctx),
            Self::Atomic(_) => Err(StorageError::NotImplemented("new_data")),
        }
    }

    /// Ticketing write.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotImplemented` on an atomic module, otherwise
    /// whatever [`Ticketing::assign`] returns.
    pub fn assign(
        &self,
        ctx: &StorageContext,
        handle: &Handle,
        stream: &mut dyn Read,
    ) -> StorageResult<()> {
        match self {
            Self::Ticketing(m) => m.assign(ctx, handle, stream),
            Self::Atomic(_) => Err(StorageError::NotImplemented("assign")),
        }
    }

    /// # Errors
    ///
    /// Returns `StorageError::NotImplemented` on an atomic module, or
    /// `StorageError::NotFound` if the handle is not available.
    pub fn get_size(&self, ctx: &StorageContext, handle: &Handle) -> StorageResult<u64> {
        match self {
            Self::Ticketing(m) => m.get_size(ctx, handle),
            Self::Atomic(_) => Err(StorageError::NotImplemented("get_size")),
        }
    }

    /// Store `stream` through whichever protocol this module exposes.
    ///
    /// # Errors
    ///
    /// Propagates the failure of `put`, `new_data` or `assign`.
    pub fn store(&self, ctx: &StorageContext, stream: &mut dyn Read) -> StorageResult<Handle> {
        match self {
            Self::Atomic(m) => m.put(ctx, stream),
            Self::Ticketing(m) => {
                let handle = m.new_data(ctx)?;
                m.assign(ctx, &handle, stream)?;
                Ok(handle)
            }
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("backend", &self.backend_type())
            .field("protocol", &self.protocol())
            .finish()
    }
}

/// Modules registered by name, usable as a context's module lookup.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Module>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: &str, module: Module) -> Option<Module> {
        self.modules.insert(name.to_string(), module)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl ModuleLookup for ModuleRegistry {
    fn lookup(&self, name: &str) -> Option<Module> {
        self.modules.get(name).cloned()
    }
}

/// Builds a module from a backend name and string options.
///
/// Recognised options for the `local` backend: `root` (required),
/// `protocol` (`ticketing` by default) and `write_mode` (`direct` by
/// default).
pub struct ModuleBuilder {
    backend_type: String,
    options: HashMap<String, String>,
}

impl ModuleBuilder {
    #[must_use]
    pub fn new(backend_type: &str) -> Self {
        Self {
            backend_type: backend_type.to_string(),
            options: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_root(self, root: impl Into<PathBuf>) -> Self {
        self.with_option("root", &root.into().to_string_lossy())
    }

    #[must_use]
    pub fn with_protocol(self, protocol: Protocol) -> Self {
        self.with_option("protocol", protocol.as_str())
    }

    #[must_use]
    pub fn with_write_mode(self, mode: WriteMode) -> Self {
        self.with_option("write_mode", mode.as_str())
    }

    /// # Errors
    ///
    /// Returns `StorageError::Configuration` for an unknown backend, a
    /// missing root, or an unparseable option.
    pub fn build(self) -> StorageResult<Module> {
        let protocol = self
            .options
            .get("protocol")
            .map(|p| p.parse::<Protocol>())
            .transpose()?
            .unwrap_or_default();

        match self.backend_type.as_str() {
            "local" | "filesystem" | "file" => {
                let root = self
                    .options
                    .get("root")
                    .ok_or_else(|| StorageError::Configuration("root is required".into()))?;
                let mode = self
                    .options
                    .get("write_mode")
                    .map(|m| m.parse::<WriteMode>())
                    .transpose()?
                    .unwrap_or_default();

                let module =
                    Arc::new(LocalStorageModule::new(PathBuf::from(root)).with_write_mode(mode));
                Ok(match protocol {
                    Protocol::Atomic => Module::Atomic(module),
                    Protocol::Ticketing => Module::Ticketing(module),
                })
            }
            unknown => Err(StorageError::Configuration(format!(
                "Unknown backend type: {unknown}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn protocol_parsing() {
        assert_eq!("atomic".parse::<Protocol>().unwrap(), Protocol::Atomic);
        assert_eq!("ticketing".parse::<Protocol>().unwrap(), Protocol::Ticketing);
        assert!("both".parse::<Protocol>().is_err());
    }

    #[test]
    fn builder_accepts_only_config_protocol_names() {
        for name in ["put", "assign", "Atomic"] {
            let result = ModuleBuilder::new("local")
                .with_root("/tmp")
                .with_option("protocol", name)
                .build();
            assert!(
                matches!(result, Err(StorageError::Configuration(_))),
                "{name} should be rejected"
            );

            let from_config: Result<crate::config::Config, _> =
                toml::from_str(&format!("[storage]\nprotocol = \"{name}\"\n"));
            assert!(from_config.is_err(), "{name} should be rejected by config");
        }
    }

    #[test]
    fn builder_defaults_to_ticketing() {
        let module = ModuleBuilder::new("local").with_root("/tmp/vendorstore").build().unwrap();
        assert_eq!(module.protocol(), Protocol::Ticketing);
        assert_eq!(module.backend_type(), "local");
    }

    #[test]
    fn builder_requires_root() {
        let result = ModuleBuilder::new("local").build();
        assert!(matches!(result, Err(StorageError::Configuration(msg)) if msg.contains("root")));
    }

    #[test]
    fn builder_unknown_backend() {
        let result = ModuleBuilder::new("s3").with_root("/tmp").build();
        assert!(
            matches!(result, Err(StorageError::Configuration(msg)) if msg.contains("Unknown backend type"))
        );
    }

    #[test]
    fn builder_rejects_bad_write_mode() {
        let result = ModuleBuilder::new("local")
            .with_root("/tmp")
            .with_option("write_mode", "eventually")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn wrong_protocol_calls_are_not_implemented() {
        let dir = TempDir::new().unwrap();
        let ctx = StorageContext::default();

        let atomic = ModuleBuilder::new("local")
            .with_root(dir.path())
            .with_protocol(Protocol::Atomic)
            .build()
            .unwrap();
        assert!(matches!(atomic.new_data(&ctx), Err(StorageError::NotImplemented("new_data"))));
        assert!(matches!(
            atomic.get_size(&ctx, &Handle::from("x")),
            Err(StorageError::NotImplemented("get_size"))
        ));

        let ticketing = ModuleBuilder::new("local").with_root(dir.path()).build().unwrap();
        let mut stream = Cursor::new(b"data".to_vec());
        assert!(matches!(
            ticketing.put(&ctx, &mut stream),
            Err(StorageError::NotImplemented("put"))
        ));
    }

    #[test]
    fn store_uses_declared_protocol() {
        let dir = TempDir::new().unwrap();
        let ctx = StorageContext::default();

        for protocol in [Protocol::Atomic, Protocol::Ticketing] {
            let module = ModuleBuilder::new("local")
                .with_root(dir.path())
                .with_protocol(protocol)
                .build()
                .unwrap();
            let handle = module.store(&ctx, &mut Cursor::new(b"hello".to_vec())).unwrap();
            assert!(module.available(&ctx, &handle));
        }
    }

    #[test]
    fn registry_resolves_through_context() {
        let dir = TempDir::new().unwrap();
        let module = ModuleBuilder::new("local").with_root(dir.path()).build().unwrap();

        let mut registry = ModuleRegistry::new();
        registry.register("primary", module);

        let ctx = StorageContext::new().with_module_lookup(Arc::new(registry));
        let resolved = ctx.module("primary").unwrap();
        assert_eq!(resolved.backend_type(), "local");
        assert!(ctx.module("secondary").is_none());
    }
}
