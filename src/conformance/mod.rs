//! Backend-agnostic conformance checks for storage modules.
//!
//! A [`Conformance`] run drives a [`Module`] through the contract using
//! whichever write protocol the module exposes. Checking what actually landed
//! on the medium is backend-specific, so the caller supplies a [`Fixture`]
//! that can inspect the backing resource directly.
//!
//! ```no_run
//! use vendorstore::conformance::{Conformance, local::LocalFixture};
//! use vendorstore::storage::ModuleBuilder;
//!
//! let module = ModuleBuilder::new("local").with_root("/srv/store").build()?;
//! let fixture = LocalFixture::new("/srv/store");
//! let report = Conformance::new(&module, &fixture).run();
//! assert!(report.passed(), "{report}");
//! # Ok::<(), vendorstore::storage::StorageError>(())
//! ```

pub mod local;

use std::fmt;
use std::io::{self, Cursor, Read};

use anyhow::{Context, bail, ensure};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::storage::{Handle, Module, Protocol, StorageContext, StorageError};

/// Payload size for the large write checks.
pub const LARGE_PAYLOAD_LEN: usize = 1024 * 1024;

/// Payload size for the delete checks.
pub const SMALL_PAYLOAD_LEN: usize = 1024;

/// Backend-specific hooks the checks rely on.
pub trait Fixture {
    /// Context passed to every module call.
    fn context(&self) -> StorageContext {
        StorageContext::default()
    }

    /// Returns true if the medium holds exactly `expected` for `handle`.
    ///
    /// Implementations may load the stored content into memory.
    fn verify(&self, handle: &Handle, expected: &[u8]) -> bool;

    /// Returns true if the backing resource for `handle` no longer exists.
    fn was_deleted(&self, handle: &Handle) -> bool;

    /// A handle the module never issued.
    fn unknown_handle(&self) -> Handle {
        Handle::from("never-issued")
    }

    /// Number of resources currently on the medium, or `None` if the fixture
    /// cannot count them.
    fn artifact_count(&self) -> Option<usize> {
        None
    }
}

/// Random payload of ASCII letters and digits.
#[must_use]
pub fn random_payload(len: usize) -> Vec<u8> {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .collect()
}

/// Stream that yields `remaining` bytes and then fails, standing in for a
/// caller whose upload breaks off.
#[derive(Debug)]
pub struct FailingStream {
    remaining: usize,
}

impl FailingStream {
    #[must_use]
    pub fn new(fail_after: usize) -> Self {
        Self {
            remaining: fail_after,
        }
    }
}

impl Read for FailingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "upload interrupted",
            ));
        }
        let n = buf.len().min(self.remaining);
        buf[..n].fill(b'z');
        self.remaining -= n;
        Ok(n)
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(&'static str),
}

/// One line of a [`ConformanceReport`].
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub outcome: Outcome,
}

/// Results of a full conformance run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub backend: &'static str,
    pub protocol: Protocol,
    pub checks: Vec<CheckResult>,
}

impl ConformanceReport {
    fn new(backend: &'static str, protocol: Protocol) -> Self {
        Self {
            backend,
            protocol,
            checks: Vec::new(),
        }
    }

    fn record(&mut self, name: &'static str, result: anyhow::Result<()>) {
        let outcome = match result {
            Ok(()) => Outcome::Passed,
            Err(e) => Outcome::Failed(format!("{e:#}")),
        };
        self.checks.push(CheckResult { name, outcome });
    }

    fn skip(&mut self, name: &'static str, reason: &'static str) {
        self.checks.push(CheckResult {
            name,
            outcome: Outcome::Skipped(reason),
        });
    }

    /// True if no check failed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| matches!(c.outcome, Outcome::Failed(_)))
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} module ({} protocol)", self.backend, self.protocol)?;
        for check in &self.checks {
            match &check.outcome {
                Outcome::Passed => writeln!(f, "  ok    {}", check.name)?,
                Outcome::Failed(reason) => writeln!(f, "  FAIL  {}: {reason}", check.name)?,
                Outcome::Skipped(reason) => writeln!(f, "  skip  {} ({reason})", check.name)?,
            }
        }
        let failed = self.failures().count();
        write!(f, "{} checks, {failed} failed", self.checks.len())
    }
}

/// Contract checks against one module.
pub struct Conformance<'a, F: Fixture> {
    module: &'a Module,
    fixture: &'a F,
    ctx: StorageContext,
    payload_len: usize,
}

impl<'a, F: Fixture> Conformance<'a, F> {
    #[must_use]
    pub fn new(module: &'a Module, fixture: &'a F) -> Self {
        Self {
            module,
            fixture,
            ctx: fixture.context(),
            payload_len: LARGE_PAYLOAD_LEN,
        }
    }

    /// Override the size of the large payload.
    #[must_use]
    pub fn with_payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = payload_len;
        self
    }

    /// Run every check that applies to the module's protocol.
    #[must_use]
    pub fn run(&self) -> ConformanceReport {
        let protocol = self.module.protocol();
        let mut report = ConformanceReport::new(self.module.backend_type(), protocol);

        report.record("capabilities_are_stable", self.capabilities_are_stable());
        report.record("large_payload_write", self.large_payload_write());
        report.record("write_then_read", self.write_then_read());
        report.record("available_after_write", self.available_after_write());
        report.record(
            "not_available_when_unassigned",
            self.not_available_when_unassigned(),
        );
        report.record("delete_then_recheck", self.delete_then_recheck());
        report.record("idempotent_delete", self.idempotent_delete());
        report.record("failed_write_rolls_back", self.failed_write_rolls_back());
        report.record("statistics_shape", self.statistics_shape());

        if protocol == Protocol::Ticketing {
            report.record("size_consistency", self.size_consistency());
            report.record("handle_lifecycle", self.handle_lifecycle());
        } else {
            report.skip("size_consistency", "ticketing only");
            report.skip("handle_lifecycle", "ticketing only");
        }

        report
    }

    /// Store `payload`, run `check` against the handle, then delete it
    /// whatever the check returned.
    fn with_stored<R>(
        &self,
        payload: &[u8],
        check: impl FnOnce(&Handle) -> anyhow::Result<R>,
    ) -> anyhow::Result<R> {
        let handle = self
            .module
            .store(&self.ctx, &mut Cursor::new(payload))
            .with_context(|| format!("storing {} bytes", payload.len()))?;

        let result = check(&handle);
        let cleanup = self.module.delete(&self.ctx, &handle);

        let value = result?;
        cleanup.with_context(|| format!("deleting {handle}"))?;
        Ok(value)
    }

    fn read_back(&self, handle: &Handle) -> anyhow::Result<Vec<u8>> {
        let mut stream = self
            .module
            .get_read_stream(&self.ctx, handle)
            .with_context(|| format!("opening read stream for {handle}"))?;
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        stream.close()?;
        Ok(data)
    }

    /// Capabilities can be queried before any data operation, do not change
    /// between calls and leave nothing on the medium.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation.
    pub fn capabilities_are_stable(&self) -> anyhow::Result<()> {
        let before = self.fixture.artifact_count();
        let first = self.module.capabilities(&self.ctx);
        let second = self.module.capabilities(&self.ctx);
        let after = self.fixture.artifact_count();

        ensure!(first == second, "capabilities changed between calls");
        if let (Some(before), Some(after)) = (before, after) {
            ensure!(
                before == after,
                "querying capabilities changed the medium from {before} to {after} artifacts"
            );
        }
        Ok(())
    }

    /// A large random payload lands on the medium unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation.
    pub fn large_payload_write(&self) -> anyhow::Result<()> {
        let payload = random_payload(self.payload_len);
        self.with_stored(&payload, |handle| {
            ensure!(
                self.fixture.verify(handle, &payload),
                "stored content for {handle} does not match the {} bytes written",
                payload.len()
            );
            Ok(())
        })
    }

    /// A fresh read stream reproduces exactly what was written.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation.
    pub fn write_then_read(&self) -> anyhow::Result<()> {
        let payload = random_payload(self.payload_len);
        self.with_stored(&payload, |handle| {
            ensure!(
                self.fixture.verify(handle, &payload),
                "initial content for {handle} does not match the data written"
            );
            let read = self.read_back(handle)?;
            ensure!(
                read == payload,
                "read back {} bytes, expected {}",
                read.len(),
                payload.len()
            );
            Ok(())
        })
    }

    /// Content is available as soon as the write returns.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation.
    pub fn available_after_write(&self) -> anyhow::Result<()> {
        let payload = random_payload(self.payload_len);
        self.with_stored(&payload, |handle| {
            ensure!(
                self.module.available(&self.ctx, handle),
                "{handle} not available after a successful write"
            );
            Ok(())
        })
    }

    /// Reserved and unknown handles report unavailable instead of failing.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation.
    pub fn not_available_when_unassigned(&self) -> anyhow::Result<()> {
        let unknown = self.fixture.unknown_handle();
        ensure!(
            !self.module.available(&self.ctx, &unknown),
            "never-issued handle {unknown} reported available"
        );

        if self.module.protocol() == Protocol::Ticketing {
            let reserved = self.module.new_data(&self.ctx)?;
            ensure!(
                !self.module.available(&self.ctx, &reserved),
                "reserved handle {reserved} reported available before assign"
            );
        }
        Ok(())
    }

    /// Deleted content is unavailable and gone from the medium.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation.
    pub fn delete_then_recheck(&self) -> anyhow::Result<()> {
        let payload = random_payload(SMALL_PAYLOAD_LEN);
        let handle = self
            .module
            .store(&self.ctx, &mut Cursor::new(&payload[..]))?;
        ensure!(
            self.fixture.verify(&handle, &payload),
            "stored content for {handle} does not match"
        );

        self.module.delete(&self.ctx, &handle)?;

        ensure!(
            !self.module.available(&self.ctx, &handle),
            "{handle} still available after delete"
        );
        ensure!(
            self.fixture.was_deleted(&handle),
            "backing resource for {handle} still exists after delete"
        );
        Ok(())
    }

    /// Deleting twice, or deleting something never stored, is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation.
    pub fn idempotent_delete(&self) -> anyhow::Result<()> {
        let payload = random_payload(SMALL_PAYLOAD_LEN);
        let handle = self
            .module
            .store(&self.ctx, &mut Cursor::new(&payload[..]))?;

        self.module.delete(&self.ctx, &handle).context("first delete")?;
        self.module.delete(&self.ctx, &handle).context("second delete")?;
        ensure!(
            !self.module.available(&self.ctx, &handle),
            "{handle} available after repeated delete"
        );

        let unknown = self.fixture.unknown_handle();
        self.module
            .delete(&self.ctx, &unknown)
            .context("deleting a never-issued handle")?;

        if self.module.protocol() == Protocol::Ticketing {
            let reserved = self.module.new_data(&self.ctx)?;
            self.module
                .delete(&self.ctx, &reserved)
                .context("deleting a reserved handle")?;
            ensure!(
                !self.module.available(&self.ctx, &reserved),
                "reserved handle {reserved} available after delete"
            );
        }
        Ok(())
    }

    /// A stream that breaks off mid-write surfaces as an error and leaves
    /// nothing readable behind.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation.
    pub fn failed_write_rolls_back(&self) -> anyhow::Result<()> {
        let fail_after = SMALL_PAYLOAD_LEN / 2;

        match self.module.protocol() {
            Protocol::Ticketing => {
                let handle = self.module.new_data(&self.ctx)?;
                let result =
                    self.module
                        .assign(&self.ctx, &handle, &mut FailingStream::new(fail_after));
                ensure!(result.is_err(), "assign succeeded on a failing stream");
                ensure!(
                    !self.module.available(&self.ctx, &handle),
                    "{handle} available after a failed assign"
                );
                ensure!(
                    self.fixture.was_deleted(&handle),
                    "partial content for {handle} left on the medium"
                );
                match self.module.get_read_stream(&self.ctx, &handle) {
                    Err(StorageError::NotFound(_)) => {}
                    Err(e) => bail!("reading a rolled-back handle failed with {e}, expected NotFound"),
                    Ok(_) => bail!("rolled-back handle {handle} is readable"),
                }
            }
            Protocol::Atomic => {
                let result = self
                    .module
                    .put(&self.ctx, &mut FailingStream::new(fail_after));
                match result {
                    Err(StorageError::WriteFailure { handle, .. }) => {
                        ensure!(
                            !self.module.available(&self.ctx, &handle),
                            "{handle} available after a failed put"
                        );
                        ensure!(
                            self.fixture.was_deleted(&handle),
                            "partial content for {handle} left on the medium"
                        );
                    }
                    Err(e) => bail!("put on a failing stream returned {e}, expected a write failure"),
                    Ok(handle) => {
                        self.module.delete(&self.ctx, &handle)?;
                        bail!("put succeeded on a failing stream");
                    }
                }
            }
        }
        Ok(())
    }

    /// The statistics encoding always carries integer `total`, `free` and
    /// `used`, with `-1` only ever in all three at once.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation.
    pub fn statistics_shape(&self) -> anyhow::Result<()> {
        let value = serde_json::to_value(self.module.statistics(&self.ctx))?;
        let capacity = value
            .get("capacity")
            .context("statistics missing 'capacity'")?;

        let mut fields = Vec::with_capacity(3);
        for key in ["total", "free", "used"] {
            let field = capacity
                .get(key)
                .and_then(serde_json::Value::as_i64)
                .with_context(|| format!("capacity.{key} missing or not an integer"))?;
            fields.push(field);
        }

        let sentinels = fields.iter().filter(|&&v| v == -1).count();
        ensure!(
            sentinels == 0 || sentinels == 3,
            "partial unreachable sentinel in {capacity}"
        );
        ensure!(
            fields.iter().all(|&v| v >= -1),
            "negative capacity in {capacity}"
        );
        Ok(())
    }

    /// `get_size` reports the exact byte count written.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation, or if the module is not a
    /// ticketing module.
    pub fn size_consistency(&self) -> anyhow::Result<()> {
        ensure!(
            self.module.protocol() == Protocol::Ticketing,
            "size consistency needs a ticketing module"
        );
        let payload = random_payload(self.payload_len);
        self.with_stored(&payload, |handle| {
            let size = self.module.get_size(&self.ctx, handle)?;
            ensure!(
                size == payload.len() as u64,
                "get_size returned {size}, expected {}",
                payload.len()
            );
            Ok(())
        })
    }

    /// RESERVED -> ASSIGNED -> DELETED, with only ASSIGNED available and no
    /// way back.
    ///
    /// # Errors
    ///
    /// Returns an error describing the violation, or if the module is not a
    /// ticketing module.
    pub fn handle_lifecycle(&self) -> anyhow::Result<()> {
        ensure!(
            self.module.protocol() == Protocol::Ticketing,
            "handle lifecycle needs a ticketing module"
        );

        let handle = self.module.new_data(&self.ctx)?;
        let other = self.module.new_data(&self.ctx)?;
        ensure!(handle != other, "new_data issued {handle} twice");
        ensure!(
            !self.module.available(&self.ctx, &handle),
            "RESERVED handle reported available"
        );

        let payload = random_payload(SMALL_PAYLOAD_LEN);
        self.module
            .assign(&self.ctx, &handle, &mut Cursor::new(&payload[..]))?;
        ensure!(
            self.module.available(&self.ctx, &handle),
            "ASSIGNED handle reported unavailable"
        );

        self.module.delete(&self.ctx, &handle)?;
        ensure!(
            !self.module.available(&self.ctx, &handle),
            "DELETED handle reported available"
        );
        ensure!(
            self.module
                .get_read_stream(&self.ctx, &handle)
                .is_err_and(|e| e.is_not_found()),
            "DELETED handle did not fail with NotFound on read"
        );
        ensure!(
            self.module
                .get_size(&self.ctx, &handle)
                .is_err_and(|e| e.is_not_found()),
            "DELETED handle did not fail with NotFound on get_size"
        );
        ensure!(
            !self.module.available(&self.ctx, &handle),
            "DELETED handle became available again"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_payload_is_alphanumeric() {
        let payload = random_payload(4096);
        assert_eq!(payload.len(), 4096);
        assert!(payload.iter().all(u8::is_ascii_alphanumeric));
    }

    #[test]
    fn failing_stream_breaks_after_limit() {
        let mut stream = FailingStream::new(10);
        let mut buf = [0u8; 64];

        assert_eq!(stream.read(&mut buf).unwrap(), 10);
        let err = stream.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn report_summary() {
        let mut report = ConformanceReport::new("local", Protocol::Atomic);
        report.record("good", Ok(()));
        report.record("bad", Err(anyhow::anyhow!("boom")));
        report.skip("other", "ticketing only");

        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);

        let text = report.to_string();
        assert!(text.contains("ok    good"));
        assert!(text.contains("FAIL  bad: boom"));
        assert!(text.contains("skip  other (ticketing only)"));
        assert!(text.ends_with("3 checks, 1 failed"));
    }
}
