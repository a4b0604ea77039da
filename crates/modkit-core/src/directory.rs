//! Bundle source reading `<root>/<bundle>/bundle.toml` directories.

use std::fs;
use std::path::{Path, PathBuf};

use crate::manifest::{MANIFEST_FILE, ManifestDocument};
use crate::model::BundleHandle;
use crate::services::{BundleManifest, BundleSource, Payload, SourceError};

/// Declarative bundles laid out one per subdirectory.
///
/// Each bundle's origin is its directory path. Subdirectories without a
/// manifest are ignored.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(handle: &BundleHandle) -> PathBuf {
        Path::new(handle.as_str()).join(MANIFEST_FILE)
    }

    fn document(handle: &BundleHandle) -> Result<ManifestDocument, SourceError> {
        let path = Self::manifest_path(handle);
        if !path.is_file() {
            return Err(SourceError::NotFound(handle.to_string()));
        }
        ManifestDocument::from_path(&path)
    }
}

impl BundleSource for DirectorySource {
    fn list_bundles(&self) -> Result<Vec<BundleHandle>, SourceError> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() && path.join(MANIFEST_FILE).is_file() {
                dirs.push(path);
            }
        }
        dirs.sort();
        tracing::debug!(root = %self.root.display(), count = dirs.len(), "Discovered bundles");
        Ok(dirs
            .into_iter()
            .map(|p| BundleHandle::new(p.display().to_string()))
            .collect())
    }

    fn read_manifest(&self, handle: &BundleHandle) -> Result<BundleManifest, SourceError> {
        Ok(Self::document(handle)?.bundle)
    }

    fn load_payload(
        &self,
        handle: &BundleHandle,
        manifest: &BundleManifest,
    ) -> Result<Payload, SourceError> {
        Ok(Self::document(handle)?.to_payload(manifest.name.clone()))
    }
}
