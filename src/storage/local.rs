//! Local filesystem storage module.
//!
//! Content lives in flat files directly under a root directory that must
//! already exist. Handles are `<32 hex digits>.dat`, generated from 128
//! random bits.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::storage::{
    AtomicPut, Capacity, CapabilitySet, Handle, ReadStream, Statistics, StorageContext,
    StorageError, StorageModule, StorageResult, Ticketing,
};

/// Size of each read from an incoming stream.
pub const CHUNK_SIZE: usize = 64 * 1024;

const HANDLE_SUFFIX: &str = ".dat";
const HANDLE_HEX_LEN: usize = 32;

/// How content reaches its final path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Create-or-truncate the target and write in place. A crash mid-write
    /// can leave a truncated file that reports as available.
    #[default]
    Direct,
    /// Write to a hidden staging file and rename it into place once the
    /// stream is exhausted. A failed write also removes any earlier content
    /// at the target.
    Staged,
}

impl WriteMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Staged => "staged",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "staged" => Ok(Self::Staged),
            other => Err(StorageError::Configuration(format!(
                "Unknown write mode: {other} (expected 'direct' or 'staged')"
            ))),
        }
    }
}

/// Storage module backed by a local directory.
///
/// Implements both [`AtomicPut`] and [`Ticketing`].
#[derive(Debug, Clone)]
pub struct LocalStorageModule {
    root: PathBuf,
    write_mode: WriteMode,
}

impl LocalStorageModule {
    /// Create a module rooted at `root`.
    ///
    /// The directory is not created or checked here; a missing root shows up
    /// as failed writes and an unreachable capacity report.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            write_mode: WriteMode::default(),
        }
    }

    #[must_use]
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Returns true if `handle` has the shape this module issues.
    #[must_use]
    pub fn is_local_handle(handle: &Handle) -> bool {
        handle
            .as_str()
            .strip_suffix(HANDLE_SUFFIX)
            .is_some_and(|hex| {
                hex.len() == HANDLE_HEX_LEN
                    && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            })
    }

    /// Path of the file holding content for `handle`.
    ///
    /// Returns `None` for handles this module could not have issued, so a
    /// foreign handle can never address anything outside the root.
    #[must_use]
    pub fn content_path(&self, handle: &Handle) -> Option<PathBuf> {
        Self::is_local_handle(handle).then(|| self.root.join(handle.as_str()))
    }

    fn issue_handle() -> Handle {
        Handle::new(format!(
            "{:0width$x}{HANDLE_SUFFIX}",
            rand::random::<u128>(),
            width = HANDLE_HEX_LEN
        ))
    }

    fn write_stream(&self, handle: &Handle, stream: &mut dyn Read) -> StorageResult<u64> {
        let target = self
            .content_path(handle)
            .ok_or_else(|| StorageError::InvalidHandle(handle.clone()))?;

        let result = PendingWrite::create(target, self.write_mode).and_then(|mut pending| {
            let written = pending.copy_from(stream)?;
            pending.commit()?;
            Ok(written)
        });

        match result {
            Ok(written) => {
                debug!(%handle, bytes = written, mode = %self.write_mode, "stored content");
                Ok(written)
            }
            Err(source) => {
                error!(%handle, error = %source, "exception storing file data");
                Err(StorageError::WriteFailure {
                    handle: handle.clone(),
                    source,
                })
            }
        }
    }

    fn probe_capacity(&self) -> StorageResult<Capacity> {
        if !self.root.is_dir() {
            return Err(StorageError::MediumUnreachable(self.root.clone()));
        }

        let unreachable = |e: io::Error| {
            debug!(root = %self.root.display(), error = %e, "statvfs failed");
            StorageError::MediumUnreachable(self.root.clone())
        };
        let total = fs2::total_space(&self.root).map_err(unreachable)?;
        let free = fs2::available_space(&self.root).map_err(unreachable)?;

        Ok(Capacity::from_space(total, free))
    }

    fn open_content(&self, handle: &Handle) -> StorageResult<File> {
        let path = self
            .content_path(handle)
            .ok_or_else(|| StorageError::NotFound(handle.clone()))?;

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(handle.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        if !file.metadata()?.is_file() {
            return Err(StorageError::NotFound(handle.clone()));
        }
        Ok(file)
    }
}

impl StorageModule for LocalStorageModule {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn capabilities(&self, _ctx: &StorageContext) -> CapabilitySet {
        CapabilitySet::new()
            .with("protocols", vec!["atomic", "ticketing"])
            .with("server_side_copy", true)
            .with("crash_atomic", self.write_mode == WriteMode::Staged)
            .with("write_mode", self.write_mode.as_str())
            .with("chunk_size", CHUNK_SIZE)
            .with("handle_format", "<32 hex digits>.dat")
    }

    fn available(&self, _ctx: &StorageContext, handle: &Handle) -> bool {
        self.content_path(handle).is_some_and(|path| path.is_file())
    }

    fn get_read_stream(
        &self,
        _ctx: &StorageContext,
        handle: &Handle,
    ) -> StorageResult<Box<dyn ReadStream>> {
        let file = self.open_content(handle)?;
        Ok(Box::new(LocalReadStream {
            inner: BufReader::with_capacity(CHUNK_SIZE, file),
        }))
    }

    fn delete(&self, _ctx: &StorageContext, handle: &Handle) -> StorageResult<()> {
        let Some(path) = self.content_path(handle) else {
            return Ok(());
        };

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%handle, "deleted content");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn statistics(&self, _ctx: &StorageContext) -> Statistics {
        match self.probe_capacity() {
            Ok(capacity) => Statistics::new(capacity),
            Err(e) => {
                error!(root = %self.root.display(), error = %e, "mount point doesn't exist");
                Statistics::unreachable()
            }
        }
    }

    fn copy(&self, _ctx: &StorageContext, handle: &Handle) -> StorageResult<Handle> {
        let mut source = self.open_content(handle)?;
        let copy = Self::issue_handle();
        self.write_stream(&copy, &mut source)?;
        Ok(copy)
    }
}

impl AtomicPut for LocalStorageModule {
    fn put(&self, _ctx: &StorageContext, stream: &mut dyn Read) -> StorageResult<Handle> {
        let handle = Self::issue_handle();
        self.write_stream(&handle, stream)?;
        Ok(handle)
    }
}

impl Ticketing for LocalStorageModule {
    fn new_data(&self, _ctx: &StorageContext) -> StorageResult<Handle> {
        Ok(Self::issue_handle())
    }

    fn assign(
        &self,
        _ctx: &StorageContext,
        handle: &Handle,
        stream: &mut dyn Read,
    ) -> StorageResult<()> {
        self.write_stream(handle, stream).map(|_| ())
    }

    fn get_size(&self, _ctx: &StorageContext, handle: &Handle) -> StorageResult<u64> {
        let file = self.open_content(handle)?;
        Ok(file.metadata()?.len())
    }
}

/// Read stream over a stored file.
struct LocalReadStream {
    inner: BufReader<File>,
}

impl Read for LocalReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl ReadStream for LocalReadStream {}

/// Destination file for one write.
///
/// Whatever was written is removed on drop unless [`commit`](Self::commit)
/// succeeded.
struct PendingWrite {
    target: PathBuf,
    staging: Option<PathBuf>,
    file: Option<File>,
    committed: bool,
}

impl PendingWrite {
    fn create(target: PathBuf, mode: WriteMode) -> io::Result<Self> {
        let staging = match mode {
            WriteMode::Direct => None,
            WriteMode::Staged => Some(staging_path(&target)),
        };
        let file = File::create(staging.as_deref().unwrap_or(&target))?;

        Ok(Self {
            target,
            staging,
            file: Some(file),
            committed: false,
        })
    }

    fn written_path(&self) -> &Path {
        self.staging.as_deref().unwrap_or(&self.target)
    }

    /// Copy `stream` in `CHUNK_SIZE` reads until it is exhausted.
    fn copy_from(&mut self, stream: &mut dyn Read) -> io::Result<u64> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("write already finished"))?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            file.write_all(&buf[..n])?;
            written += n as u64;
        }
        Ok(written)
    }

    fn commit(mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        if let Some(staging) = &self.staging {
            fs::rename(staging, &self.target)?;
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());

        // A failed staged re-assign must not leave the previous content
        // available either.
        remove_orphan(self.written_path());
        if self.staging.is_some() {
            remove_orphan(&self.target);
        }
    }
}

fn remove_orphan(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not clean up orphan file");
        }
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.partial"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    /// Yields `good` bytes of data, then fails.
    struct FailAfter {
        good: usize,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.good == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"));
            }
            let n = buf.len().min(self.good);
            buf[..n].fill(b'x');
            self.good -= n;
            Ok(n)
        }
    }

    /// Interrupts every other read.
    struct Flaky {
        inner: Cursor<Vec<u8>>,
        interrupt: bool,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    fn setup(mode: WriteMode) -> (TempDir, LocalStorageModule, StorageContext) {
        let temp_dir = TempDir::new().unwrap();
        let module = LocalStorageModule::new(temp_dir.path().to_path_buf()).with_write_mode(mode);
        (temp_dir, module, StorageContext::default())
    }

    fn read_all(module: &LocalStorageModule, ctx: &StorageContext, handle: &Handle) -> Vec<u8> {
        let mut stream = module.get_read_stream(ctx, handle).unwrap();
        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();
        stream.close().unwrap();
        data
    }

    #[test]
    fn issued_handles_are_well_formed_and_distinct() {
        let a = LocalStorageModule::issue_handle();
        let b = LocalStorageModule::issue_handle();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), HANDLE_HEX_LEN + HANDLE_SUFFIX.len());
        assert!(LocalStorageModule::is_local_handle(&a));
    }

    #[test]
    fn foreign_handles_are_rejected() {
        for raw in [
            "",
            "abc.dat",
            "../../etc/passwd",
            "0123456789abcdef0123456789abcdef",
            "0123456789ABCDEF0123456789ABCDEF.dat",
            "0123456789abcdef0123456789abcde/.dat",
        ] {
            assert!(
                !LocalStorageModule::is_local_handle(&Handle::from(raw)),
                "{raw} should not be accepted"
            );
        }
    }

    #[test]
    fn assign_then_read() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let handle = module.new_data(&ctx).unwrap();

        module
            .assign(&ctx, &handle, &mut Cursor::new(b"hello world".to_vec()))
            .unwrap();

        assert!(module.available(&ctx, &handle));
        assert_eq!(module.get_size(&ctx, &handle).unwrap(), 11);
        assert_eq!(read_all(&module, &ctx, &handle), b"hello world");
    }

    #[test]
    fn new_data_touches_nothing() {
        let (dir, module, ctx) = setup(WriteMode::Direct);
        let handle = module.new_data(&ctx).unwrap();

        assert!(!module.available(&ctx, &handle));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn put_spanning_several_chunks() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let data: Vec<u8> = (0..CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();

        let handle = module.put(&ctx, &mut Cursor::new(data.clone())).unwrap();

        assert!(module.available(&ctx, &handle));
        assert_eq!(read_all(&module, &ctx, &handle), data);
    }

    #[test]
    fn empty_stream_stores_empty_content() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let handle = module.put(&ctx, &mut io::empty()).unwrap();

        assert!(module.available(&ctx, &handle));
        assert_eq!(module.get_size(&ctx, &handle).unwrap(), 0);
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let mut stream = Flaky {
            inner: Cursor::new(b"retry me".to_vec()),
            interrupt: false,
        };

        let handle = module.put(&ctx, &mut stream).unwrap();
        assert_eq!(read_all(&module, &ctx, &handle), b"retry me");
    }

    #[test]
    fn failed_assign_leaves_nothing_behind() {
        for mode in [WriteMode::Direct, WriteMode::Staged] {
            let (dir, module, ctx) = setup(mode);
            let handle = module.new_data(&ctx).unwrap();

            let result = module.assign(&ctx, &handle, &mut FailAfter { good: CHUNK_SIZE * 2 });

            assert!(matches!(result, Err(StorageError::WriteFailure { .. })));
            assert!(!module.available(&ctx, &handle));
            assert_eq!(
                fs::read_dir(dir.path()).unwrap().count(),
                0,
                "partial file left behind in {mode} mode"
            );
        }
    }

    #[test]
    fn failed_put_issues_no_handle() {
        let (dir, module, ctx) = setup(WriteMode::Direct);
        let result = module.put(&ctx, &mut FailAfter { good: 10 });

        let Err(StorageError::WriteFailure { handle, source }) = result else {
            panic!("expected a write failure");
        };
        assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
        assert!(!module.available(&ctx, &handle));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn assign_to_foreign_handle_is_invalid() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let handle = Handle::from("../escape.dat");

        let result = module.assign(&ctx, &handle, &mut Cursor::new(b"x".to_vec()));
        assert!(matches!(result, Err(StorageError::InvalidHandle(_))));
    }

    #[test]
    fn write_into_missing_root_fails() {
        let temp_dir = TempDir::new().unwrap();
        let module = LocalStorageModule::new(temp_dir.path().join("not-mounted"));
        let ctx = StorageContext::default();

        let result = module.put(&ctx, &mut Cursor::new(b"x".to_vec()));
        assert!(matches!(result, Err(StorageError::WriteFailure { .. })));
    }

    #[test]
    fn failed_reassign_leaves_handle_unavailable() {
        for mode in [WriteMode::Direct, WriteMode::Staged] {
            let (dir, module, ctx) = setup(mode);
            let handle = module.new_data(&ctx).unwrap();
            module.assign(&ctx, &handle, &mut Cursor::new(b"v1".to_vec())).unwrap();

            let result = module.assign(&ctx, &handle, &mut FailAfter { good: 10 });

            assert!(
                matches!(result, Err(StorageError::WriteFailure { .. })),
                "re-assign should fail in {mode} mode"
            );
            assert!(
                !module.available(&ctx, &handle),
                "{handle} still available after failed re-assign in {mode} mode"
            );
            assert!(module.get_read_stream(&ctx, &handle).is_err());
            assert_eq!(
                fs::read_dir(dir.path()).unwrap().count(),
                0,
                "files left behind in {mode} mode"
            );
        }
    }

    #[test]
    fn reassign_overwrites() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let handle = module.new_data(&ctx).unwrap();

        module.assign(&ctx, &handle, &mut Cursor::new(b"first version".to_vec())).unwrap();
        module.assign(&ctx, &handle, &mut Cursor::new(b"second".to_vec())).unwrap();

        assert_eq!(read_all(&module, &ctx, &handle), b"second");
    }

    #[test]
    fn staged_mode_commits_by_rename() {
        let (dir, module, ctx) = setup(WriteMode::Staged);
        let handle = module.put(&ctx, &mut Cursor::new(b"staged".to_vec())).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![handle.to_string()]);
        assert_eq!(read_all(&module, &ctx, &handle), b"staged");
    }

    #[test]
    fn staging_files_are_not_available() {
        let (dir, module, ctx) = setup(WriteMode::Staged);
        let handle = module.new_data(&ctx).unwrap();
        let target = module.content_path(&handle).unwrap();
        fs::write(staging_path(&target), b"half written").unwrap();

        assert!(!module.available(&ctx, &handle));
        assert!(dir.path().join(format!(".{handle}.partial")).exists());
    }

    #[test]
    fn read_and_size_of_missing_content() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let handle = module.new_data(&ctx).unwrap();

        assert!(matches!(
            module.get_read_stream(&ctx, &handle),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            module.get_size(&ctx, &handle),
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            module.get_size(&ctx, &Handle::from("not-ours")),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let (dir, module, ctx) = setup(WriteMode::Direct);
        let handle = module.put(&ctx, &mut Cursor::new(vec![7u8; 1024])).unwrap();

        module.delete(&ctx, &handle).unwrap();
        module.delete(&ctx, &handle).unwrap();
        module.delete(&ctx, &Handle::from("never-issued")).unwrap();

        assert!(!module.available(&ctx, &handle));
        assert!(!dir.path().join(handle.as_str()).exists());
    }

    #[test]
    fn copy_creates_independent_content() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let original = module.put(&ctx, &mut Cursor::new(b"copy me".to_vec())).unwrap();

        let copy = StorageModule::copy(&module, &ctx, &original).unwrap();
        assert_ne!(copy, original);

        module.delete(&ctx, &original).unwrap();
        assert!(module.available(&ctx, &copy));
        assert_eq!(read_all(&module, &ctx, &copy), b"copy me");
    }

    #[test]
    fn copy_of_missing_content() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let handle = module.new_data(&ctx).unwrap();

        let result = StorageModule::copy(&module, &ctx, &handle);
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn statistics_for_existing_root() {
        let (_dir, module, ctx) = setup(WriteMode::Direct);
        let capacity = module.statistics(&ctx).capacity;

        assert!(!capacity.is_unreachable());
        assert!(capacity.total > 0);
        assert!(capacity.free >= 0);
        assert_eq!(capacity.used, capacity.total - capacity.free);
    }

    #[test]
    fn statistics_for_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let module = LocalStorageModule::new(temp_dir.path().join("gone"));

        let stats = module.statistics(&StorageContext::default());
        assert_eq!(stats.capacity, Capacity::UNREACHABLE);
    }

    #[test]
    fn capabilities_reflect_write_mode() {
        let (_dir, direct, ctx) = setup(WriteMode::Direct);
        let (_dir2, staged, _) = setup(WriteMode::Staged);

        let caps = direct.capabilities(&ctx);
        assert!(caps.supports("server_side_copy"));
        assert!(!caps.supports("crash_atomic"));
        assert_eq!(caps.get("chunk_size"), Some(&serde_json::json!(CHUNK_SIZE)));

        assert!(staged.capabilities(&ctx).supports("crash_atomic"));
    }

    #[test]
    fn write_mode_parsing() {
        assert_eq!("direct".parse::<WriteMode>().unwrap(), WriteMode::Direct);
        assert_eq!("staged".parse::<WriteMode>().unwrap(), WriteMode::Staged);
        assert!("fast".parse::<WriteMode>().is_err());
    }
}
