//! Conflict detection over installed extension points.
//!
//! A conflict is a pair of contributors on the same point where at least
//! one of them short-circuits and nothing they declared says which of
//! them wins. Conflicts are diagnostics; nothing is disabled because of
//! them.

use serde::Serialize;

use crate::model::GadgetId;
use crate::services::{Contributor, InstalledPoint};

/// Two contributors with no declared relation on one point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictPair {
    /// The short-circuiting contributor. When both short-circuit, the
    /// smaller id.
    pub overriding: GadgetId,
    pub other: GadgetId,
}

impl ConflictPair {
    pub fn involves(&self, id: &GadgetId) -> bool {
        &self.overriding == id || &self.other == id
    }
}

/// Conflicts found on a single extension point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointConflicts {
    pub point: String,
    pub pairs: Vec<ConflictPair>,
}

/// Conflicts grouped by extension point, sorted by point name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub points: Vec<PointConflicts>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn pair_count(&self) -> usize {
        self.points.iter().map(|p| p.pairs.len()).sum()
    }

    pub fn for_point(&self, point: &str) -> Option<&PointConflicts> {
        self.points.iter().find(|p| p.point == point)
    }

    /// Every pair naming `id`, with the point it was found on.
    pub fn involving<'a>(&'a self, id: &'a GadgetId) -> impl Iterator<Item = (&'a str, &'a ConflictPair)> {
        self.points.iter().flat_map(move |p| {
            p.pairs
                .iter()
                .filter(move |pair| pair.involves(id))
                .map(move |pair| (p.point.as_str(), pair))
        })
    }
}

/// Scan every installed point for unresolved short-circuiting overrides.
pub fn detect_conflicts(points: &[InstalledPoint]) -> ConflictReport {
    let mut report = ConflictReport::default();

    for installed in points {
        let mut pairs: Vec<ConflictPair> = Vec::new();
        for overriding in installed.contributors.iter().filter(|c| c.short_circuits) {
            for other in &installed.contributors {
                if other.owner == overriding.owner
                    || declares_relation(overriding, other)
                    || ordered_safely(overriding, other)
                {
                    continue;
                }

                let pair = if other.short_circuits && other.owner < overriding.owner {
                    ConflictPair {
                        overriding: other.owner.clone(),
                        other: overriding.owner.clone(),
                    }
                } else {
                    ConflictPair {
                        overriding: overriding.owner.clone(),
                        other: other.owner.clone(),
                    }
                };
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }

        if !pairs.is_empty() {
            report.points.push(PointConflicts {
                point: installed.point.clone(),
                pairs,
            });
        }
    }

    report.points.sort_by(|a, b| a.point.cmp(&b.point));
    report
}

fn names(list: &[String], id: &GadgetId) -> bool {
    list.iter().any(|key| id.matches(key))
}

/// Either side declared it overrides, or is overridden by, the other.
fn declares_relation(a: &Contributor, b: &Contributor) -> bool {
    names(&a.hints.overrides, &b.owner)
        || names(&a.hints.overridden_by, &b.owner)
        || names(&b.hints.overrides, &a.owner)
        || names(&b.hints.overridden_by, &a.owner)
}

/// Explicit ordering exists between the two contributors.
fn ordered_safely(a: &Contributor, b: &Contributor) -> bool {
    a.hints.priority != b.hints.priority
        || names(&a.hints.before, &b.owner)
        || names(&a.hints.after, &b.owner)
        || names(&b.hints.before, &a.owner)
        || names(&b.hints.after, &a.owner)
}
