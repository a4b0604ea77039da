//! One pipeline pass over the queued gadgets.
//!
//! Stages run in a fixed order, each over every gadget still live:
//! admission, config, pre-patch, patch, conflict detection, register,
//! initialize. A failure disables the gadget, tears down whatever it had
//! already installed and disables every active dependent with it.

use std::collections::{HashMap, HashSet};

use super::LoadOrderEngine;
use crate::behavior::{GadgetBehavior, GadgetResult, Registrar};
use crate::conflicts::detect_conflicts;
use crate::model::{GadgetId, GadgetState, PatchStats, Stage};
use crate::report::{AdmissionFailure, FailureKind, GadgetFailure, PassReport};
use crate::services::PointOutcome;

type StageResult = std::result::Result<(), String>;

impl LoadOrderEngine {
    /// Drive every queued gadget through the pipeline and clear the queue.
    pub(super) fn run_pass(&mut self) {
        let mut report = PassReport {
            warnings: std::mem::take(&mut self.pending_warnings),
            ..PassReport::default()
        };

        let mut queued = std::mem::take(&mut self.queue);
        let mut seen = HashSet::new();
        queued.retain(|id| {
            seen.insert(id.clone())
                && self.registry.gadget(id).is_some()
                && !self.registry.is_active(id)
        });
        let order = self.load_order();
        let position: HashMap<&GadgetId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        queued.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));

        if !queued.is_empty() {
            tracing::info!(queued = queued.len(), "Starting pass");
        }
        for id in &queued {
            if let Some(gadget) = self.registry.gadget_mut(id) {
                gadget.state = GadgetState::Queued;
                gadget.patch_stats = PatchStats::default();
                gadget.last_failure = None;
            }
        }

        let mut live = Vec::with_capacity(queued.len());
        for id in queued {
            match self.admit(&id) {
                Ok(()) => {
                    tracing::debug!(gadget = %id, "Admitted");
                    self.registry.activate(&id);
                    live.push(id);
                }
                Err(reason) => {
                    self.disable(&id, Stage::Admission, FailureKind::Admission(reason), &mut report);
                }
            }
        }

        for stage in [Stage::Config, Stage::PrePatch, Stage::Patch] {
            self.run_stage(stage, &mut live, &mut report);
        }

        report.conflicts = detect_conflicts(&self.interception.installed_points());
        for point in &report.conflicts.points {
            for pair in &point.pairs {
                tracing::warn!(
                    point = %point.point,
                    overriding = %pair.overriding,
                    other = %pair.other,
                    "Unresolved override conflict"
                );
            }
        }

        for stage in [Stage::Register, Stage::Initialize] {
            self.run_stage(stage, &mut live, &mut report);
        }

        report.activated = live;
        self.drain_events();
        if self.config.persist_flags && self.flags_dirty {
            self.persist_flags(&mut report.warnings);
        }

        if !report.activated.is_empty() || !report.failures.is_empty() {
            tracing::info!(
                activated = report.activated.len(),
                failed = report.failures.len(),
                conflicts = report.conflicts.pair_count(),
                "Pass complete"
            );
        }
        self.last_report = report;
    }

    fn run_stage(&mut self, stage: Stage, live: &mut Vec<GadgetId>, report: &mut PassReport) {
        for id in live.iter() {
            // Disabled earlier in this stage as a dependent of another failure
            if !self.registry.is_active(id) {
                continue;
            }
            let outcome = match stage {
                Stage::Admission => Ok(()),
                Stage::Config => self.configure(id),
                Stage::PrePatch => self.with_behavior(id, |b| b.pre_patch()),
                Stage::Patch => self.patch(id, report),
                Stage::Register => self.register(id),
                Stage::Initialize => self.with_behavior(id, |b| b.initialize()),
            };
            match outcome {
                Ok(()) => {
                    if let Some(gadget) = self.registry.gadget_mut(id) {
                        gadget.state = stage.completed_state();
                    }
                    tracing::debug!(gadget = %id, stage = %stage, "Stage complete");
                }
                Err(message) => self.disable(id, stage, FailureKind::Stage(message), report),
            }
        }
        live.retain(|id| self.registry.is_active(id));
    }

    /// Check every requirement a gadget has on the rest of the registry.
    fn admit(&self, id: &GadgetId) -> std::result::Result<(), AdmissionFailure> {
        let (Some(gadget), Some(bundle)) = (self.registry.gadget(id), self.registry.bundle(&id.bundle))
        else {
            return Err(AdmissionFailure::MissingBundle {
                bundle: id.bundle.clone(),
            });
        };

        for required in bundle.dependencies() {
            match self.registry.bundle(required) {
                None => {
                    return Err(AdmissionFailure::MissingBundle {
                        bundle: required.clone(),
                    });
                }
                Some(b) if !b.is_enabled() => {
                    return Err(AdmissionFailure::BundleDisabled {
                        bundle: required.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        if let Some(required) = gadget.target_engine() {
            if !required.satisfied_by(&self.config.engine_version) {
                return Err(AdmissionFailure::IncompatibleEngine {
                    required: *required,
                    actual: self.config.engine_version,
                });
            }
        }

        for dep in gadget.dependencies() {
            let target = self
                .registry
                .resolve(&dep.target)
                .ok_or_else(|| AdmissionFailure::MissingDependency {
                    target: dep.target.clone(),
                })?;
            if !self.registry.is_active(&target) {
                return Err(AdmissionFailure::DependencyInactive { target });
            }
            if let Some(required) = &dep.requirement {
                let Some(actual) = self.registry.bundle(&target.bundle).map(|b| *b.version()) else {
                    return Err(AdmissionFailure::MissingDependency {
                        target: dep.target.clone(),
                    });
                };
                if !required.satisfied_by(&actual) {
                    return Err(AdmissionFailure::IncompatibleVersion {
                        target,
                        required: *required,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    fn with_behavior<F>(&mut self, id: &GadgetId, hook: F) -> StageResult
    where
        F: FnOnce(&mut dyn GadgetBehavior) -> GadgetResult,
    {
        let gadget = self
            .registry
            .gadget_mut(id)
            .ok_or_else(|| format!("gadget {id} is no longer loaded"))?;
        hook(gadget.behavior.as_mut()).map_err(|e| e.to_string())
    }

    fn configure(&mut self, id: &GadgetId) -> StageResult {
        let config = self.config_store.load(id).map_err(|e| e.to_string())?;
        self.with_behavior(id, |b| b.load_config(&config))
    }

    fn patch(&mut self, id: &GadgetId, report: &mut PassReport) -> StageResult {
        let module = self
            .registry
            .bundle(&id.bundle)
            .map(|b| b.module().clone())
            .ok_or_else(|| format!("bundle '{}' is no longer loaded", id.bundle))?;
        let outcome = self
            .interception
            .install_overrides(id, &module)
            .map_err(|e| e.to_string())?;

        for (point, result) in &outcome.points {
            match result {
                PointOutcome::Installed => {}
                PointOutcome::MissingTarget => {
                    tracing::debug!(gadget = %id, point = %point, "Extension point not found; skipped");
                }
                PointOutcome::Failed(reason) => {
                    tracing::warn!(gadget = %id, point = %point, reason = %reason, "Override not installed");
                }
            }
        }

        let stats = outcome.stats();
        if let Some(gadget) = self.registry.gadget_mut(id) {
            gadget.patch_stats = stats;
        }
        report.patch_stats.insert(id.clone(), stats);
        Ok(())
    }

    fn register(&mut self, id: &GadgetId) -> StageResult {
        let Self {
            registry,
            extensions,
            ..
        } = self;
        let gadget = registry
            .gadget_mut(id)
            .ok_or_else(|| format!("gadget {id} is no longer loaded"))?;
        let mut registrar = Registrar::new(id, extensions.as_mut());
        gadget
            .behavior
            .register(&mut registrar)
            .map_err(|e| e.to_string())
    }

    /// Disable `id` after a failure in `stage`, together with every active
    /// gadget that depends on it.
    pub(super) fn disable(
        &mut self,
        id: &GadgetId,
        stage: Stage,
        kind: FailureKind,
        report: &mut PassReport,
    ) {
        let dependents: Vec<GadgetId> = self
            .dependents_of(id)
            .into_iter()
            .filter(|d| self.registry.is_active(d))
            .collect();

        // Dependents go down first, deepest first
        for dependent in dependents.iter().rev() {
            self.teardown_one(dependent, None);
        }
        self.teardown_one(id, Some(stage));

        self.record_failure(
            GadgetFailure {
                gadget: id.clone(),
                stage,
                kind,
            },
            report,
        );
        for dependent in dependents {
            let failure = GadgetFailure::admission(
                dependent,
                stage,
                AdmissionFailure::DependencyInactive { target: id.clone() },
            );
            self.record_failure(failure, report);
        }
    }

    /// Undo whatever `id` installed and mark it disabled.
    ///
    /// `failed_stage` is the stage that just failed, whose partial effects
    /// must be undone even though the state never advanced past it.
    fn teardown_one(&mut self, id: &GadgetId, failed_stage: Option<Stage>) {
        let Some(gadget) = self.registry.gadget_mut(id) else {
            return;
        };
        let state = gadget.state;
        if state == GadgetState::Initialized {
            gadget.behavior.uninitialize();
        }
        gadget.state = GadgetState::Disabled;

        if state.has_reached(GadgetState::Registered) || failed_stage == Some(Stage::Register) {
            let removed = self.extensions.unregister_all_from(id);
            tracing::debug!(gadget = %id, removed, "Unregistered entries");
        }
        if state.has_reached(GadgetState::Patched) || failed_stage == Some(Stage::Patch) {
            self.interception.remove_overrides(id);
        }
        self.registry.deactivate(id);
    }

    fn record_failure(&mut self, failure: GadgetFailure, report: &mut PassReport) {
        tracing::warn!(
            gadget = %failure.gadget,
            stage = %failure.stage,
            reason = %failure.kind,
            "Gadget disabled"
        );
        if let Some(gadget) = self.registry.gadget_mut(&failure.gadget) {
            gadget.last_failure = Some(failure.clone());
        }
        report.failures.push(failure);
    }

    /// Write enabled flags, leaving them dirty on failure so the next pass
    /// tries again.
    pub(super) fn persist_flags(&mut self, warnings: &mut Vec<String>) {
        let flags = self.registry.enabled_flags();
        match self.config_store.persist_enabled_flags(&flags) {
            Ok(()) => self.flags_dirty = false,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to persist enabled flags");
                warnings.push(format!("enabled flags not persisted: {err}"));
            }
        }
    }

    /// Re-queue gadgets that failed admission for a reason that may have
    /// gone away, once every target they need is present.
    ///
    /// Repeats until nothing new is queued, so a dormant gadget whose
    /// target is itself dormant follows it in.
    pub(super) fn requeue_dormant(&mut self) {
        let mut dormant: Vec<GadgetId> = self
            .registry
            .gadgets()
            .into_iter()
            .filter(|g| {
                g.state() == GadgetState::Disabled
                    && g.last_failure().is_some_and(|f| {
                        matches!(&f.kind, FailureKind::Admission(reason) if reason.is_retryable())
                    })
            })
            .map(|g| g.id().clone())
            .filter(|id| !self.queue.contains(id) && self.registry.is_runnable(id))
            .collect();

        loop {
            let (ready, waiting): (Vec<GadgetId>, Vec<GadgetId>) = dormant
                .into_iter()
                .partition(|id| self.targets_available(id));
            if ready.is_empty() {
                break;
            }
            for id in ready {
                tracing::debug!(gadget = %id, "Re-queueing dormant gadget");
                self.queue.push(id);
            }
            dormant = waiting;
        }
    }

    /// Every dependency is active or queued, and every required bundle is
    /// loaded and enabled.
    fn targets_available(&self, id: &GadgetId) -> bool {
        let (Some(gadget), Some(bundle)) = (self.registry.gadget(id), self.registry.bundle(&id.bundle))
        else {
            return false;
        };
        let bundles_ready = bundle
            .dependencies()
            .iter()
            .all(|name| self.registry.bundle(name).is_some_and(|b| b.is_enabled()));
        bundles_ready
            && gadget.dependencies().iter().all(|dep| {
                self.registry
                    .resolve(&dep.target)
                    .is_some_and(|t| self.registry.is_active(&t) || self.queue.contains(&t))
            })
    }
}
