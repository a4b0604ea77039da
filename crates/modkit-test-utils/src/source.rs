//! In-memory bundle source.

use std::sync::{Arc, Mutex};

use modkit_core::{BundleHandle, BundleManifest, BundleSource, Payload, SourceError};

use crate::events::EventLog;
use crate::fixture::BundleFixture;

#[derive(Debug, Default)]
struct Shelf {
    /// `(origin, fixture)` in the order bundles were added.
    bundles: Vec<(BundleHandle, BundleFixture)>,
    manifest_reads: usize,
}

/// Bundle source backed by shared in-memory fixtures.
///
/// Clones share the same shelf, so a test can keep a handle, pass a clone
/// to the engine and change what the engine will read next.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    shelf: Arc<Mutex<Shelf>>,
    log: EventLog,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Origin handle used for a bundle name.
    pub fn handle(name: &str) -> BundleHandle {
        BundleHandle::new(format!("mem://{name}"))
    }

    /// Add (or replace) a bundle, returning its origin.
    pub fn add(&self, fixture: BundleFixture) -> BundleHandle {
        let handle = Self::handle(&fixture.name);
        let mut shelf = self.shelf.lock().unwrap();
        if let Some(slot) = shelf.bundles.iter_mut().find(|(h, _)| h == &handle) {
            slot.1 = fixture;
        } else {
            shelf.bundles.push((handle.clone(), fixture));
        }
        handle
    }

    /// Add a bundle under an explicit origin.
    pub fn add_at(&self, origin: &str, fixture: BundleFixture) -> BundleHandle {
        let handle = BundleHandle::new(origin);
        self.shelf
            .lock()
            .unwrap()
            .bundles
            .push((handle.clone(), fixture));
        handle
    }

    pub fn remove(&self, name: &str) {
        let handle = Self::handle(name);
        self.shelf.lock().unwrap().bundles.retain(|(h, _)| h != &handle);
    }

    /// Behaviors created from this source record into this log.
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// How many manifests have been read.
    pub fn manifest_reads(&self) -> usize {
        self.shelf.lock().unwrap().manifest_reads
    }

    fn fixture(&self, handle: &BundleHandle) -> Result<BundleFixture, SourceError> {
        self.shelf
            .lock()
            .unwrap()
            .bundles
            .iter()
            .find(|(h, _)| h == handle)
            .map(|(_, f)| f.clone())
            .ok_or_else(|| SourceError::NotFound(handle.to_string()))
    }
}

impl BundleSource for MemorySource {
    fn list_bundles(&self) -> Result<Vec<BundleHandle>, SourceError> {
        Ok(self
            .shelf
            .lock()
            .unwrap()
            .bundles
            .iter()
            .map(|(h, _)| h.clone())
            .collect())
    }

    fn read_manifest(&self, handle: &BundleHandle) -> Result<BundleManifest, SourceError> {
        let fixture = self.fixture(handle)?;
        self.shelf.lock().unwrap().manifest_reads += 1;
        Ok(fixture.manifest())
    }

    fn load_payload(
        &self,
        handle: &BundleHandle,
        _manifest: &BundleManifest,
    ) -> Result<Payload, SourceError> {
        let fixture = self.fixture(handle)?;
        if let Some(reason) = fixture.payload_error {
            return Err(SourceError::Payload {
                origin: handle.to_string(),
                reason,
            });
        }
        Ok(fixture.payload(&self.log))
    }
}
