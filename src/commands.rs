//! Command implementations behind the CLI.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::Config;
use crate::conformance::local::LocalFixture;
use crate::conformance::{Conformance, ConformanceReport};
use crate::storage::{
    CapabilitySet, Handle, Module, Protocol, ReadStream, Statistics, StorageContext,
    StorageError,
};

/// An opened module plus the context every call receives.
#[derive(Debug)]
pub struct Session {
    pub module: Module,
    pub ctx: StorageContext,
    pub root: PathBuf,
}

impl Session {
    /// Open the module described by `config`, with CLI overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured backend is unknown.
    pub fn open(
        mut config: Config,
        root: Option<PathBuf>,
        protocol: Option<Protocol>,
    ) -> anyhow::Result<Self> {
        if let Some(root) = root {
            config.storage.root = root.to_string_lossy().into_owned();
        }
        if let Some(protocol) = protocol {
            config.storage.protocol = protocol;
        }

        let module = config.storage.open()?;
        Ok(Self {
            module,
            ctx: StorageContext::default(),
            root: config.root(),
        })
    }
}

/// Parse a handle passed on the command line.
///
/// Surrounding whitespace is dropped so `$(vendorstore new)` can be passed
/// straight back in.
///
/// # Errors
///
/// Returns an error if the handle is empty.
pub fn parse_handle(raw: &str) -> anyhow::Result<Handle> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("Handle cannot be empty");
    }
    Ok(Handle::from(trimmed))
}

fn open_input(file: Option<&Path>) -> anyhow::Result<Box<dyn Read>> {
    match file {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("opening input {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdin().lock())),
    }
}

fn protocol_hint(err: StorageError, needed: Protocol) -> anyhow::Error {
    match err {
        StorageError::NotImplemented(op) => anyhow::anyhow!(
            "{op} needs the {needed} protocol; pass --protocol {needed} or change storage.protocol"
        ),
        other => other.into(),
    }
}

/// Store `file` (or stdin) in one call.
///
/// # Errors
///
/// Returns an error if the module is not atomic or the write fails.
pub fn put(session: &Session, file: Option<&Path>) -> anyhow::Result<Handle> {
    let mut input = open_input(file)?;
    session
        .module
        .put(&session.ctx, &mut input)
        .map_err(|e| protocol_hint(e, Protocol::Atomic))
}

/// Reserve a handle.
///
/// # Errors
///
/// Returns an error if the module is not a ticketing module.
pub fn new_data(session: &Session) -> anyhow::Result<Handle> {
    session
        .module
        .new_data(&session.ctx)
        .map_err(|e| protocol_hint(e, Protocol::Ticketing))
}

/// Store `file` (or stdin) under a reserved handle.
///
/// # Errors
///
/// Returns an error if the module is not a ticketing module or the write
/// fails.
pub fn assign(session: &Session, handle: &Handle, file: Option<&Path>) -> anyhow::Result<()> {
    let mut input = open_input(file)?;
    session
        .module
        .assign(&session.ctx, handle, &mut input)
        .map_err(|e| protocol_hint(e, Protocol::Ticketing))
}

/// Copy stored content into `out`, returning the number of bytes copied.
///
/// # Errors
///
/// Returns an error if nothing is stored for `handle` or the copy fails.
pub fn get(session: &Session, handle: &Handle, out: &mut dyn Write) -> anyhow::Result<u64> {
    let stream = session.module.get_read_stream(&session.ctx, handle)?;
    copy_out(stream, out)
}

/// Copy stored content into a new file at `path`.
///
/// The file is only created once the content has been found.
///
/// # Errors
///
/// Returns an error if nothing is stored for `handle`, or if the file cannot
/// be created or written.
pub fn get_to_file(session: &Session, handle: &Handle, path: &Path) -> anyhow::Result<u64> {
    let stream = session.module.get_read_stream(&session.ctx, handle)?;
    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    copy_out(stream, &mut file)
}

fn copy_out(mut stream: Box<dyn ReadStream>, out: &mut dyn Write) -> anyhow::Result<u64> {
    let copied = io::copy(&mut stream, out).context("copying stored content")?;
    out.flush()?;
    stream.close()?;
    Ok(copied)
}

#[must_use]
pub fn available(session: &Session, handle: &Handle) -> bool {
    session.module.available(&session.ctx, handle)
}

/// # Errors
///
/// Returns an error if the module is not a ticketing module or nothing is
/// stored for `handle`.
pub fn size(session: &Session, handle: &Handle) -> anyhow::Result<u64> {
    session
        .module
        .get_size(&session.ctx, handle)
        .map_err(|e| protocol_hint(e, Protocol::Ticketing))
}

/// # Errors
///
/// Returns an error if the medium refuses the delete.
pub fn delete(session: &Session, handle: &Handle) -> anyhow::Result<()> {
    session.module.delete(&session.ctx, handle)?;
    Ok(())
}

/// # Errors
///
/// Returns an error if the module cannot copy or nothing is stored for
/// `handle`.
pub fn copy(session: &Session, handle: &Handle) -> anyhow::Result<Handle> {
    Ok(session.module.copy(&session.ctx, handle)?)
}

#[must_use]
pub fn stats(session: &Session) -> Statistics {
    session.module.statistics(&session.ctx)
}

#[must_use]
pub fn capabilities(session: &Session) -> CapabilitySet {
    session.module.capabilities(&session.ctx)
}

/// Run the conformance checks against the session's module.
///
/// # Errors
///
/// Returns an error if the backend has no fixture.
pub fn check(session: &Session, payload_size: usize) -> anyhow::Result<ConformanceReport> {
    if session.module.backend_type() != "local" {
        anyhow::bail!(
            "No conformance fixture for backend: {}",
            session.module.backend_type()
        );
    }

    let fixture = LocalFixture::new(session.root.clone());
    Ok(Conformance::new(&session.module, &fixture)
        .with_payload_len(payload_size)
        .run())
}
