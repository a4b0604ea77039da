//! Builders describing bundles and gadgets for tests.

use std::sync::Arc;

use modkit_core::{
    BundleManifest, DeclaredPatch, DeclaredPatches, DependencyDecl, GadgetBehavior,
    GadgetDeclaration, GadgetFactory, GadgetId, Payload, PayloadModule, Specificity,
};

use crate::events::{EventLog, Hook, RecordingBehavior};

/// A gadget to be exposed by a [`BundleFixture`].
#[derive(Debug, Clone)]
pub struct GadgetFixture {
    pub name: String,
    pub dependencies: Vec<DependencyDecl>,
    pub target_engine: Option<(String, Option<Specificity>)>,
    pub patches: Vec<DeclaredPatch>,
    pub registrations: Vec<(String, String)>,
    pub fail_at: Option<Hook>,
}

impl GadgetFixture {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            dependencies: Vec::new(),
            target_engine: None,
            patches: Vec::new(),
            registrations: Vec::new(),
            fail_at: None,
        }
    }

    /// Depend on `target` without a version requirement.
    pub fn depends_on(mut self, target: &str) -> Self {
        self.dependencies.push(DependencyDecl::on(target));
        self
    }

    /// Depend on `target` at `version` under `specificity`.
    pub fn requires(mut self, target: &str, version: &str, specificity: Specificity) -> Self {
        self.dependencies.push(
            DependencyDecl::on(target)
                .with_version(version)
                .with_specificity(specificity),
        );
        self
    }

    pub fn targets_engine(mut self, version: &str, specificity: Specificity) -> Self {
        self.target_engine = Some((version.to_string(), Some(specificity)));
        self
    }

    /// Install a plain override on `point`.
    pub fn patches(mut self, point: &str) -> Self {
        self.patches.push(DeclaredPatch::new(point));
        self
    }

    /// Install a short-circuiting override on `point`.
    pub fn short_circuits(mut self, point: &str) -> Self {
        self.patches.push(DeclaredPatch::new(point).short_circuiting());
        self
    }

    pub fn with_patch(mut self, patch: DeclaredPatch) -> Self {
        self.patches.push(patch);
        self
    }

    /// Register `kind`/`key` during the register hook.
    pub fn registers(mut self, kind: &str, key: &str) -> Self {
        self.registrations.push((kind.to_string(), key.to_string()));
        self
    }

    pub fn fails_at(mut self, hook: Hook) -> Self {
        self.fail_at = Some(hook);
        self
    }

    fn declaration(&self, bundle: &str, log: &EventLog) -> GadgetDeclaration {
        let id = GadgetId::new(bundle, &self.name);
        let log = log.clone();
        let fail_at = self.fail_at;
        let registrations = self.registrations.clone();
        let factory: GadgetFactory = Arc::new(move || {
            Box::new(
                RecordingBehavior::new(id.clone(), log.clone())
                    .failing_at(fail_at)
                    .registering(registrations.clone()),
            ) as Box<dyn GadgetBehavior>
        });

        GadgetDeclaration {
            name: self.name.clone(),
            dependencies: self.dependencies.clone(),
            target_engine: self.target_engine.as_ref().map(|(v, _)| v.clone()),
            target_specificity: self.target_engine.as_ref().and_then(|(_, s)| *s),
            factory,
        }
    }
}

/// A bundle served by a [`MemorySource`](crate::MemorySource).
#[derive(Debug, Clone)]
pub struct BundleFixture {
    pub name: String,
    pub version: String,
    pub dependencies: Vec<String>,
    pub gadgets: Vec<GadgetFixture>,
    /// When set, `load_payload` fails with this reason.
    pub payload_error: Option<String>,
}

impl BundleFixture {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            dependencies: Vec::new(),
            gadgets: Vec::new(),
            payload_error: None,
        }
    }

    pub fn depends_on_bundle(mut self, bundle: &str) -> Self {
        self.dependencies.push(bundle.to_string());
        self
    }

    pub fn gadget(mut self, gadget: GadgetFixture) -> Self {
        self.gadgets.push(gadget);
        self
    }

    pub fn broken_payload(mut self, reason: &str) -> Self {
        self.payload_error = Some(reason.to_string());
        self
    }

    pub fn manifest(&self) -> BundleManifest {
        BundleManifest {
            name: self.name.clone(),
            version: self.version.clone(),
            dependencies: self.dependencies.clone(),
            payload: None,
        }
    }

    pub fn payload(&self, log: &EventLog) -> Payload {
        let mut patches = DeclaredPatches::new();
        let gadgets = self
            .gadgets
            .iter()
            .map(|g| {
                patches.insert(g.name.clone(), g.patches.clone());
                g.declaration(&self.name, log)
            })
            .collect();
        Payload {
            module: PayloadModule::new(self.name.clone(), patches),
            gadgets,
        }
    }
}
