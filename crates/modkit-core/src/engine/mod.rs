//! The load-order engine.
//!
//! [`LoadOrderEngine`] owns the [`GadgetRegistry`], the dependency tree
//! derived from it and the queue of gadgets waiting for the next pass. It
//! provides these operations:
//! - **load**: read bundles from the source and activate their gadgets
//!   ([`load_all`](LoadOrderEngine::load_all),
//!   [`load_bundle`](LoadOrderEngine::load_bundle))
//! - **unload / reload / refresh**: cascade over everything that depends on
//!   a bundle
//! - **set_enabled**: change intent for a gadget or bundle and apply it
//!
//! Loading many bundles at once is done in a batch: bundles are read and
//! queued, and a single pass runs when the batch finishes.
//!
//! The engine is synchronous. Symbol preloading runs on a private runtime,
//! so the engine must not be driven from inside an async runtime.

mod cascade;
mod pass;

use std::collections::HashMap;
use std::sync::Arc;

use modkit_graph::{DependencyTree, NodeId, TopologicalSorter, Version, VersionRequirement};

use crate::Result;
use crate::catalog::Catalog;
use crate::config::{EngineConfig, MemoryConfigStore};
use crate::conflicts::{ConflictReport, detect_conflicts};
use crate::declared::DeclaredInterception;
use crate::error::Error;
use crate::model::{Bundle, BundleHandle, Gadget, GadgetDependency, GadgetId, GadgetState};
use crate::registry::GadgetRegistry;
use crate::report::PassReport;
use crate::services::{
    BundleSource, ConfigStore, DependencyDecl, ExtensionRegistry, InterceptionService, SymbolLoader,
};
use crate::symbols::SymbolPreloader;

pub use cascade::Toggle;

/// Value stored in the engine's dependency tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TreeNode {
    /// Synthetic parent of every gadget without dependencies.
    Root,
    Gadget(GadgetId),
}

impl TreeNode {
    pub fn gadget(&self) -> Option<&GadgetId> {
        match self {
            Self::Root => None,
            Self::Gadget(id) => Some(id),
        }
    }
}

#[derive(Debug, Default)]
struct Batch {
    /// Bundles read since the batch began, in read order.
    bundles: Vec<String>,
}

/// Builder for [`LoadOrderEngine`].
///
/// Collaborators default to the in-memory implementations shipped with
/// this crate.
pub struct EngineBuilder {
    config: EngineConfig,
    source: Box<dyn BundleSource>,
    interception: Box<dyn InterceptionService>,
    config_store: Box<dyn ConfigStore>,
    extensions: Box<dyn ExtensionRegistry>,
    symbol_loader: Option<Arc<dyn SymbolLoader>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interception(mut self, interception: impl InterceptionService + 'static) -> Self {
        self.interception = Box::new(interception);
        self
    }

    pub fn config_store(mut self, store: impl ConfigStore + 'static) -> Self {
        self.config_store = Box::new(store);
        self
    }

    pub fn extensions(mut self, registry: impl ExtensionRegistry + 'static) -> Self {
        self.extensions = Box::new(registry);
        self
    }

    pub fn symbol_loader(mut self, loader: impl SymbolLoader + 'static) -> Self {
        self.symbol_loader = Some(Arc::new(loader));
        self
    }

    /// Build the engine, seeding enabled intent from the config store.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted enabled flags cannot be read.
    pub fn build(self) -> Result<LoadOrderEngine> {
        let mut registry = GadgetRegistry::new();
        registry.seed_flags(self.config_store.enabled_flags()?);

        let mut tree = DependencyTree::new();
        let root = tree.insert(TreeNode::Root);

        Ok(LoadOrderEngine {
            config: self.config,
            source: self.source,
            interception: self.interception,
            config_store: self.config_store,
            extensions: self.extensions,
            symbol_loader: self.symbol_loader,
            registry,
            tree,
            root,
            nodes: HashMap::new(),
            queue: Vec::new(),
            batch: None,
            preloader: SymbolPreloader::new(),
            pending_warnings: Vec::new(),
            last_report: PassReport::default(),
            next_sequence: 0,
            flags_dirty: false,
        })
    }
}

/// Engine driving bundles and gadgets through the activation pipeline.
pub struct LoadOrderEngine {
    config: EngineConfig,
    source: Box<dyn BundleSource>,
    interception: Box<dyn InterceptionService>,
    config_store: Box<dyn ConfigStore>,
    extensions: Box<dyn ExtensionRegistry>,
    symbol_loader: Option<Arc<dyn SymbolLoader>>,
    registry: GadgetRegistry,
    /// Dependency edges between gadgets; a gadget is a child of each gadget
    /// it depends on.
    tree: DependencyTree<TreeNode>,
    root: NodeId,
    nodes: HashMap<GadgetId, NodeId>,
    /// Gadgets waiting for the next pass. Cleared by every pass.
    queue: Vec<GadgetId>,
    batch: Option<Batch>,
    preloader: SymbolPreloader,
    /// Non-fatal problems to attach to the next pass report.
    pending_warnings: Vec<String>,
    last_report: PassReport,
    next_sequence: u64,
    /// Intent or the set of loaded bundles changed since flags were last
    /// written.
    flags_dirty: bool,
}

impl LoadOrderEngine {
    /// Start building an engine that reads bundles from `source`.
    pub fn builder(source: impl BundleSource + 'static) -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            source: Box::new(source),
            interception: Box::new(DeclaredInterception::new()),
            config_store: Box::new(MemoryConfigStore::new()),
            extensions: Box::new(Catalog::new()),
            symbol_loader: None,
        }
    }

    // --- accessors ---

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &GadgetRegistry {
        &self.registry
    }

    pub fn tree(&self) -> &DependencyTree<TreeNode> {
        &self.tree
    }

    pub fn tree_root(&self) -> NodeId {
        self.root
    }

    pub fn node_of(&self, id: &GadgetId) -> Option<NodeId> {
        self.nodes.get(id).copied()
    }

    pub fn interception(&self) -> &dyn InterceptionService {
        self.interception.as_ref()
    }

    pub fn extensions(&self) -> &dyn ExtensionRegistry {
        self.extensions.as_ref()
    }

    pub fn config_store(&self) -> &dyn ConfigStore {
        self.config_store.as_ref()
    }

    /// Report of the most recent pass.
    pub fn last_report(&self) -> &PassReport {
        &self.last_report
    }

    pub fn gadget(&self, id: &GadgetId) -> Option<&Gadget> {
        self.registry.gadget(id)
    }

    pub fn bundle(&self, name: &str) -> Option<&Bundle> {
        self.registry.bundle(name)
    }

    pub fn state_of(&self, id: &GadgetId) -> Option<GadgetState> {
        self.registry.gadget(id).map(Gadget::state)
    }

    pub fn is_active(&self, id: &GadgetId) -> bool {
        self.registry.is_active(id)
    }

    /// Gadgets waiting for the next pass.
    pub fn queued(&self) -> &[GadgetId] {
        &self.queue
    }

    pub fn in_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Every loaded gadget in activation order.
    ///
    /// Dependencies always precede their dependents; gadgets with no
    /// ordering constraint between them keep load order.
    pub fn load_order(&self) -> Vec<GadgetId> {
        self.tree
            .flatten_breadth_first(self.root, true)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|node| self.tree.value(node).and_then(TreeNode::gadget).cloned())
            .collect()
    }

    /// Conflicts among the overrides currently installed.
    pub fn list_conflicts(&self) -> ConflictReport {
        detect_conflicts(&self.interception.installed_points())
    }

    // --- loading ---

    /// Read every bundle the source lists and run one pass over them.
    ///
    /// Bundles already loaded from the same origin are skipped. A bundle
    /// that fails to read is reported as a warning and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot list bundles, or a cycle error
    /// if the new bundles introduce a dependency cycle; in that case none of
    /// them stay loaded.
    pub fn load_all(&mut self) -> Result<&PassReport> {
        let handles = self.source.list_bundles()?;
        tracing::info!(count = handles.len(), "Loading bundles");

        self.batched(|engine| {
            for handle in &handles {
                if engine.registry.bundle_by_origin(handle).is_some() {
                    tracing::debug!(origin = %handle, "Bundle already loaded; skipping");
                    continue;
                }
                if let Err(err) = engine.read_bundle(handle) {
                    tracing::warn!(origin = %handle, error = %err, "Skipping bundle");
                    engine.pending_warnings.push(err.to_string());
                }
            }
            Ok(())
        })?;
        Ok(&self.last_report)
    }

    /// Read one bundle and, outside a batch, run a pass for its gadgets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] or [`Error::DuplicateBundle`] when the
    /// bundle cannot be read, or a cycle error when it introduces one.
    pub fn load_bundle(&mut self, handle: &BundleHandle) -> Result<&Bundle> {
        let name = self.batched(|engine| engine.read_bundle(handle))?;
        self.registry
            .bundle(&name)
            .ok_or(Error::UnknownBundle(name))
    }

    // --- batching ---

    /// Defer passes until [`finish_batch`](Self::finish_batch).
    pub fn begin_batch(&mut self) {
        if self.batch.is_none() {
            tracing::debug!("Batch started");
            self.batch = Some(Batch::default());
        }
    }

    /// Run one pass over everything queued since the batch began.
    ///
    /// # Errors
    ///
    /// Returns a cycle error if the loaded bundles contain a dependency
    /// cycle. Every bundle read during the batch is then removed again.
    pub fn finish_batch(&mut self) -> Result<&PassReport> {
        let batch = self.batch.take().unwrap_or_default();
        self.collect_symbols();
        if self.config.retry_dormant {
            self.requeue_dormant();
        }

        if let Err(err) = self.rebuild_tree() {
            if err.is_cycle() {
                tracing::warn!(bundles = ?batch.bundles, error = %err, "Rolling back batch");
                for name in batch.bundles.iter().rev() {
                    self.registry.remove_bundle(name);
                }
                self.queue.clear();
                self.rebuild_tree()?;
                self.drain_events();
            }
            return Err(err);
        }

        self.run_pass();
        self.drain_events();
        Ok(&self.last_report)
    }

    /// Run `f` inside a batch, starting and finishing one unless a batch
    /// is already open.
    fn batched<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.batch.is_some() {
            return f(self);
        }
        self.begin_batch();
        let result = f(self);
        let finished = self.finish_batch().map(|_| ());
        let value = result?;
        finished?;
        Ok(value)
    }

    // --- bundle reading ---

    /// Read, validate and register one bundle, queueing its runnable
    /// gadgets. Returns the bundle name.
    fn read_bundle(&mut self, handle: &BundleHandle) -> Result<String> {
        let origin = handle.to_string();
        if let Some(existing) = self.registry.bundle_by_origin(handle) {
            return Err(Error::DuplicateBundle {
                name: existing.name().to_string(),
                origin,
            });
        }

        let manifest = self
            .source
            .read_manifest(handle)
            .map_err(|e| Error::structural(&origin, e.to_string()))?;
        let version = Version::parse(&manifest.version)
            .map_err(|e| Error::structural(&origin, e.to_string()))?;
        if manifest.name.is_empty() || manifest.name.contains(':') {
            return Err(Error::structural(
                &origin,
                format!("invalid bundle name '{}'", manifest.name),
            ));
        }
        if self.registry.contains_bundle(&manifest.name) {
            return Err(Error::DuplicateBundle {
                name: manifest.name,
                origin,
            });
        }

        let payload = self
            .source
            .load_payload(handle, &manifest)
            .map_err(|e| Error::structural(&origin, e.to_string()))?;

        let mut ids: Vec<GadgetId> = Vec::with_capacity(payload.gadgets.len());
        let mut gadgets = Vec::with_capacity(payload.gadgets.len());
        for declaration in payload.gadgets {
            if declaration.name.is_empty() || declaration.name.contains(':') {
                return Err(Error::structural(
                    &origin,
                    format!("invalid gadget name '{}'", declaration.name),
                ));
            }
            let id = GadgetId::new(&manifest.name, &declaration.name);
            if ids.contains(&id) {
                return Err(Error::structural(
                    &origin,
                    format!("duplicate gadget '{}'", declaration.name),
                ));
            }

            let dependencies = declaration
                .dependencies
                .iter()
                .map(|decl| self.dependency(decl))
                .collect::<Result<Vec<_>>>()
                .map_err(|e| Error::structural(&origin, format!("gadget '{}': {e}", id.gadget)))?;
            let target_engine = declaration
                .target_engine
                .as_deref()
                .map(|v| {
                    Version::parse(v).map(|version| {
                        VersionRequirement::new(
                            version,
                            declaration
                                .target_specificity
                                .unwrap_or(self.config.default_specificity),
                        )
                    })
                })
                .transpose()
                .map_err(|e| Error::structural(&origin, format!("gadget '{}': {e}", id.gadget)))?;

            let mut gadget = Gadget::new(id.clone(), dependencies, target_engine, declaration.factory);
            gadget.enabled = self.registry.gadget_intent(&id);
            ids.push(id);
            gadgets.push(gadget);
        }

        let name = manifest.name;
        let module = payload.module;
        let bundle = Bundle {
            name: name.clone(),
            origin: handle.clone(),
            version,
            dependencies: manifest.dependencies,
            gadgets: ids.clone(),
            module: module.clone(),
            enabled: self.registry.bundle_intent(&name),
            symbols: None,
            sequence: self.next_sequence,
        };
        self.registry.insert_bundle(bundle, gadgets)?;
        self.next_sequence += 1;

        if self.config.preload_symbols {
            if let Some(loader) = &self.symbol_loader {
                if let Err(err) = self.preloader.spawn(name.clone(), module, loader.clone()) {
                    tracing::warn!(bundle = %name, error = %err, "Could not start symbol preload");
                    self.pending_warnings
                        .push(format!("symbols for '{name}' not preloaded: {err}"));
                }
            }
        }

        for id in &ids {
            if self.registry.is_runnable(id) {
                self.queue.push(id.clone());
            } else {
                tracing::debug!(gadget = %id, "Gadget disabled by intent; not queued");
            }
        }
        if let Some(batch) = &mut self.batch {
            batch.bundles.push(name.clone());
        }

        tracing::info!(bundle = %name, %version, origin = %handle, gadgets = ids.len(), "Read bundle");
        Ok(name)
    }

    fn dependency(&self, decl: &DependencyDecl) -> Result<GadgetDependency> {
        if decl.gadget.is_empty() {
            return Err(Error::structural("dependency", "empty dependency target"));
        }
        let requirement = decl
            .version
            .as_deref()
            .map(|v| {
                Version::parse(v).map(|version| {
                    VersionRequirement::new(
                        version,
                        decl.specificity.unwrap_or(self.config.default_specificity),
                    )
                })
            })
            .transpose()?;
        Ok(GadgetDependency {
            target: decl.gadget.clone(),
            requirement,
        })
    }

    fn collect_symbols(&mut self) {
        for (bundle, result) in self.preloader.join_all() {
            match result {
                Ok(table) => {
                    tracing::debug!(bundle = %bundle, symbols = table.len(), "Symbols loaded");
                    if let Some(b) = self.registry.bundle_mut(&bundle) {
                        b.symbols = Some(Arc::new(table));
                    }
                }
                Err(err) => {
                    tracing::warn!(bundle = %bundle, error = %err, "Symbol preload failed");
                    self.pending_warnings
                        .push(format!("symbols for '{bundle}' not loaded: {err}"));
                }
            }
        }
    }

    // --- tree ---

    /// Dependency edges `(dependency, dependent)` over every loaded gadget.
    ///
    /// A bundle-level dependency makes each of the bundle's gadgets depend
    /// on every gadget of the required bundle.
    fn dependency_edges(&self) -> Vec<(GadgetId, GadgetId)> {
        let mut edges = Vec::new();
        for gadget in self.registry.gadgets() {
            for dep in gadget.dependencies() {
                if let Some(target) = self.registry.resolve(&dep.target) {
                    edges.push((target, gadget.id().clone()));
                }
            }
            let Some(bundle) = self.registry.bundle(gadget.bundle()) else {
                continue;
            };
            for required in bundle.dependencies() {
                if let Some(required) = self.registry.bundle(required) {
                    for target in required.gadgets() {
                        edges.push((target.clone(), gadget.id().clone()));
                    }
                }
            }
        }
        edges
    }

    /// Rebuild the dependency tree from a fresh topological pass.
    ///
    /// The tree is only replaced when the registry is acyclic.
    fn rebuild_tree(&mut self) -> Result<()> {
        let edges = self.dependency_edges();
        let mut sorter = TopologicalSorter::new();
        for gadget in self.registry.gadgets() {
            sorter.add_node(gadget.id().clone());
        }
        for (from, to) in &edges {
            sorter.add_edge(from.clone(), to.clone());
        }
        let order = sorter.sort()?;

        let mut tree = DependencyTree::new();
        let root = tree.insert(TreeNode::Root);
        let mut nodes = HashMap::with_capacity(order.len());
        for id in &order {
            nodes.insert(id.clone(), tree.insert(TreeNode::Gadget(id.clone())));
        }
        for (from, to) in &edges {
            if let (Some(&parent), Some(&child)) = (nodes.get(from), nodes.get(to)) {
                tree.add_child(parent, child)?;
            }
        }
        for id in &order {
            let Some(&node) = nodes.get(id) else {
                continue;
            };
            if tree.parents(node).is_empty() {
                tree.add_child(root, node)?;
            }
        }

        let registry = &self.registry;
        let rank = |value: &TreeNode| match value {
            TreeNode::Root => (0, 0),
            TreeNode::Gadget(id) => registry.rank(id),
        };
        tree.sort_children_by(root, |a, b| rank(a).cmp(&rank(b)))?;
        for &node in nodes.values() {
            tree.sort_children_by(node, |a, b| rank(a).cmp(&rank(b)))?;
        }

        tracing::debug!(gadgets = order.len(), edges = edges.len(), "Rebuilt dependency tree");
        self.tree = tree;
        self.root = root;
        self.nodes = nodes;
        Ok(())
    }

    fn drain_events(&mut self) {
        for event in self.registry.drain_events() {
            tracing::trace!(?event, "Registry event");
            self.flags_dirty |= event.changes_flags();
        }
    }
}
