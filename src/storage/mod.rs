//! Storage module contract and implementations.
//!
//! Every backend implements [`StorageModule`] for the operations shared by
//! both write protocols, plus one (or both) of the protocol traits:
//!
//! - [`AtomicPut`]: the backend consumes a stream and hands back a handle in
//!   one call.
//! - [`Ticketing`]: the caller reserves a handle with
//!   [`new_data`](Ticketing::new_data) before streaming content into it with
//!   [`assign`](Ticketing::assign).
//!
//! Callers that do not care which protocol a backend speaks hold a
//! [`Module`], which tags the backend with the protocol it exposes.

pub mod context;
pub mod handle;
pub mod local;
pub mod module;
pub mod stats;

use std::io::{self, Read};
use std::path::PathBuf;

pub use context::{ModuleLookup, StorageContext};
pub use handle::Handle;
pub use module::{Module, ModuleBuilder, ModuleRegistry, Protocol};
pub use stats::{Capacity, CapabilitySet, Statistics};

/// Result type for storage module operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage module operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No content is available for the handle.
    #[error("No content available for handle: {0}")]
    NotFound(Handle),

    /// The medium or the caller's stream failed while writing. Any partial
    /// content has already been removed.
    #[error("Write failed for handle {handle}: {source}")]
    WriteFailure {
        handle: Handle,
        #[source]
        source: io::Error,
    },

    /// The physical resource backing the module cannot be reached.
    ///
    /// Never returned from [`StorageModule::statistics`], which reports
    /// [`Capacity::UNREACHABLE`] instead.
    #[error("Storage medium unreachable: {}", .0.display())]
    MediumUnreachable(PathBuf),

    /// The module does not implement this optional operation.
    #[error("Operation not implemented by this module: {0}")]
    NotImplemented(&'static str),

    /// The handle was not issued by this module.
    #[error("Handle not recognised by this module: {0}")]
    InvalidHandle(Handle),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Returns true for errors that only say "nothing is stored there".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A stream over stored content, handed to the caller by
/// [`StorageModule::get_read_stream`].
///
/// Only sequential reads are supported. The caller owns the stream until it
/// calls [`close`](ReadStream::close) or drops it.
pub trait ReadStream: Read + Send {
    /// Release the underlying resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to release the resource.
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

/// Operations shared by every storage module regardless of write protocol.
pub trait StorageModule: Send + Sync {
    /// Short name of the backend (e.g. "local").
    fn backend_type(&self) -> &'static str;

    /// Static description of the module's optional features.
    ///
    /// Must not have side effects and must be callable before any data
    /// operation.
    fn capabilities(&self, ctx: &StorageContext) -> CapabilitySet;

    /// Returns true iff content for `handle` can currently be read.
    ///
    /// Never fails: unknown, reserved-but-unassigned and deleted handles all
    /// report `false`.
    fn available(&self, ctx: &StorageContext, handle: &Handle) -> bool;

    /// Open a stream positioned at the start of the stored content.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the handle is not available.
    fn get_read_stream(
        &self,
        ctx: &StorageContext,
        handle: &Handle,
    ) -> StorageResult<Box<dyn ReadStream>>;

    /// Destroy the content stored for `handle`.
    ///
    /// Deleting a handle that was never assigned or is already deleted is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error only if the medium refuses to remove existing content.
    fn delete(&self, ctx: &StorageContext, handle: &Handle) -> StorageResult<()>;

    /// Capacity snapshot of the backing medium.
    ///
    /// Best effort: an unreachable medium yields [`Capacity::UNREACHABLE`].
    fn statistics(&self, ctx: &StorageContext) -> Statistics;

    /// Copy stored content into a freshly issued handle without streaming it
    /// through the caller.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotImplemented` unless the module advertises
    /// the `server_side_copy` capability.
    fn copy(&self, ctx: &StorageContext, handle: &Handle) -> StorageResult<Handle> {
        let _ = (ctx, handle);
        Err(StorageError::NotImplemented("copy"))
    }
}

/// Atomic protocol: write and commit in a single call.
pub trait AtomicPut: StorageModule {
    /// Consume `stream` fully and store it under a fresh handle.
    ///
    /// On success [`available`](StorageModule::available) reports `true` for
    /// the returned handle straight away.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::WriteFailure` if the medium or the stream
    /// fails. No handle is issued and no partial content remains visible.
    fn put(&self, ctx: &StorageContext, stream: &mut dyn Read) -> StorageResult<Handle>;
}

/// Ticketing protocol: reserve a handle, then stream content into it.
pub trait Ticketing: StorageModule {
    /// Reserve a fresh handle with no content.
    ///
    /// # Errors
    ///
    /// Returns an error if the module cannot issue a handle.
    fn new_data(&self, ctx: &StorageContext) -> StorageResult<Handle>;

    /// Bind the full content of `stream` to a reserved handle.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::WriteFailure` if the medium or the stream
    /// fails; the handle is left unavailable.
    fn assign(
        &self,
        ctx: &StorageContext,
        handle: &Handle,
        stream: &mut dyn Read,
    ) -> StorageResult<()>;

    /// Byte length of the stored content.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the handle is not available.
    fn get_size(&self, ctx: &StorageContext, handle: &Handle) -> StorageResult<u64>;
}
