//! Background symbol preloading.
//!
//! One blocking task is spawned per payload as soon as its bundle is
//! read; all of them are joined before the next pass runs. The runtime is
//! private to the preloader and created on first use.

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

use crate::services::{PayloadModule, SourceError, SymbolLoader, SymbolTable};

/// Outcome of one preload, keyed by bundle name.
pub type PreloadResult = (String, Result<SymbolTable, String>);

#[derive(Default)]
pub struct SymbolPreloader {
    runtime: Option<Runtime>,
    pending: Vec<(String, JoinHandle<Result<SymbolTable, SourceError>>)>,
}

impl SymbolPreloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start loading `module`'s symbols for `bundle`.
    pub fn spawn(
        &mut self,
        bundle: impl Into<String>,
        module: PayloadModule,
        loader: Arc<dyn SymbolLoader>,
    ) -> std::io::Result<()> {
        let runtime = match &mut self.runtime {
            Some(runtime) => runtime,
            slot => slot.insert(Builder::new_current_thread().build()?),
        };
        let handle = runtime.spawn_blocking(move || loader.load_symbols(&module));
        self.pending.push((bundle.into(), handle));
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every outstanding preload.
    ///
    /// Must not be called from within an async runtime.
    pub fn join_all(&mut self) -> Vec<PreloadResult> {
        let pending = std::mem::take(&mut self.pending);
        let Some(runtime) = &self.runtime else {
            return Vec::new();
        };

        runtime.block_on(async move {
            let mut results = Vec::with_capacity(pending.len());
            for (bundle, handle) in pending {
                let result = match handle.await {
                    Ok(Ok(table)) => Ok(table),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(format!("symbol task failed: {e}")),
                };
                results.push((bundle, result));
            }
            results
        })
    }
}

impl std::fmt::Debug for SymbolPreloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolPreloader")
            .field("started", &self.runtime.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}
