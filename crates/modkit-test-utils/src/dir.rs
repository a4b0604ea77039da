//! Temporary bundle directories in the `<root>/<bundle>/bundle.toml` layout.
//!
//! # Example
//!
//! ```rust,no_run
//! use modkit_test_utils::BundleDir;
//!
//! let dir = BundleDir::new();
//! dir.write_bundle("core", "[bundle]\nname = \"core\"\nversion = \"1.0\"\n");
//! assert!(dir.bundle_path("core").join("bundle.toml").exists());
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use modkit_core::MANIFEST_FILE;
use tempfile::TempDir;

/// A temporary directory holding bundles plus a separate state directory.
pub struct BundleDir {
    dir: TempDir,
}

impl Default for BundleDir {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleDir {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("bundles")).unwrap();
        fs::create_dir_all(dir.path().join("state")).unwrap();
        Self { dir }
    }

    /// Directory whose subdirectories are bundles.
    pub fn bundles_root(&self) -> PathBuf {
        self.dir.path().join("bundles")
    }

    /// Directory for gadget config and enabled flags.
    pub fn state_root(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn bundle_path(&self, name: &str) -> PathBuf {
        self.bundles_root().join(name)
    }

    /// Write `manifest` as the manifest of bundle directory `name`.
    pub fn write_bundle(&self, name: &str, manifest: &str) -> PathBuf {
        let dir = self.bundle_path(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        dir
    }

    /// Write a minimal manifest with one gadget per entry of `gadgets`.
    ///
    /// Each entry is `(gadget, dependencies)`.
    pub fn write_simple(&self, name: &str, version: &str, gadgets: &[(&str, &[&str])]) -> PathBuf {
        let mut manifest = format!("[bundle]\nname = \"{name}\"\nversion = \"{version}\"\n");
        for (gadget, deps) in gadgets {
            manifest.push_str(&format!("\n[[gadgets]]\nname = \"{gadget}\"\n"));
            if !deps.is_empty() {
                let deps: Vec<String> = deps
                    .iter()
                    .map(|d| format!("{{ gadget = \"{d}\" }}"))
                    .collect();
                manifest.push_str(&format!("dependencies = [{}]\n", deps.join(", ")));
            }
        }
        self.write_bundle(name, &manifest)
    }

    /// Write `content` as the config of `bundle:gadget`.
    pub fn write_gadget_config(&self, bundle: &str, gadget: &str, content: &str) -> PathBuf {
        let dir = self.state_root().join(bundle);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{gadget}.toml"));
        fs::write(&path, content).unwrap();
        path
    }
}
