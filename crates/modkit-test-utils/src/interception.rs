//! Interception service with injectable failures.

use std::collections::BTreeSet;

use modkit_core::{
    DeclaredInterception, GadgetId, InstalledPoint, InterceptionError, InterceptionService,
    PatchOutcome, PayloadModule, PointOutcome,
};

/// [`DeclaredInterception`] that can be told to fail.
///
/// Gadgets listed with [`fail_gadget`](Self::fail_gadget) get an `Err` from
/// `install_overrides` after their first point was installed, so the
/// engine has a partial install to clean up. Points listed with
/// [`fail_point`](Self::fail_point) report a per-point failure instead.
#[derive(Debug, Clone, Default)]
pub struct FlakyInterception {
    inner: DeclaredInterception,
    failing_gadgets: BTreeSet<String>,
    failing_points: BTreeSet<String>,
}

impl FlakyInterception {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known_points<I, S>(points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: DeclaredInterception::with_known_points(points),
            ..Self::default()
        }
    }

    /// Fail every install for the gadget named `gadget` (bare or qualified).
    pub fn fail_gadget(mut self, gadget: &str) -> Self {
        self.failing_gadgets.insert(gadget.to_string());
        self
    }

    pub fn fail_point(mut self, point: &str) -> Self {
        self.failing_points.insert(point.to_string());
        self
    }
}

impl InterceptionService for FlakyInterception {
    fn install_overrides(
        &mut self,
        gadget: &GadgetId,
        module: &PayloadModule,
    ) -> Result<PatchOutcome, InterceptionError> {
        let mut outcome = self.inner.install_overrides(gadget, module)?;

        if self.failing_gadgets.iter().any(|key| gadget.matches(key)) {
            return Err(InterceptionError::Failed {
                gadget: gadget.clone(),
                reason: format!("injected failure after {} points", outcome.points.len()),
            });
        }

        for (point, result) in &mut outcome.points {
            let failing = self.failing_points.contains(point.as_str());
            if failing && *result == PointOutcome::Installed {
                *result = PointOutcome::Failed("injected point failure".to_string());
            }
        }
        Ok(outcome)
    }

    fn remove_overrides(&mut self, gadget: &GadgetId) {
        self.inner.remove_overrides(gadget);
    }

    fn installed_points(&self) -> Vec<InstalledPoint> {
        self.inner.installed_points()
    }
}
