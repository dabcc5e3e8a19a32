//! Fixture for running the conformance checks against the local module.

use std::fs;
use std::path::PathBuf;

use crate::conformance::Fixture;
use crate::storage::Handle;

/// Inspects the module's root directory directly.
#[derive(Debug, Clone)]
pub struct LocalFixture {
    root: PathBuf,
}

impl LocalFixture {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, handle: &Handle) -> PathBuf {
        self.root.join(handle.as_str().trim_matches('/'))
    }
}

impl Fixture for LocalFixture {
    fn verify(&self, handle: &Handle, expected: &[u8]) -> bool {
        fs::read(self.path_for(handle)).is_ok_and(|written| written == expected)
    }

    fn was_deleted(&self, handle: &Handle) -> bool {
        !self.path_for(handle).exists()
    }

    fn unknown_handle(&self) -> Handle {
        Handle::from("00000000000000000000000000000000.dat")
    }

    fn artifact_count(&self) -> Option<usize> {
        fs::read_dir(&self.root).ok().map(Iterator::count)
    }
}
