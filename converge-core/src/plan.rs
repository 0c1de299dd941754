//! Plan - Actions chosen by reconciliation
//!
//! A Plan collects the action each resource needs, computed without any
//! side effects. Replacements are destructive and reported separately from
//! in-place updates so callers can warn before applying.

use std::fmt;

use crate::differ::Diff;
use crate::resource::ResourceId;

/// Kind of change a reconciliation pass makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    NoOp,
    Created,
    Updated,
    /// Destroy then recreate because a force-replace field changed
    Replaced,
    Deleted,
}

impl Action {
    /// Whether the action destroys a remote object
    pub fn is_destructive(&self) -> bool {
        matches!(self, Action::Replaced | Action::Deleted)
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Action::NoOp)
    }

    /// Single-character marker used when displaying plans
    pub fn symbol(&self) -> &'static str {
        match self {
            Action::NoOp => " ",
            Action::Created => "+",
            Action::Updated => "~",
            Action::Replaced => "-/+",
            Action::Deleted => "-",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::NoOp => "no-op",
            Action::Created => "create",
            Action::Updated => "update",
            Action::Replaced => "replace",
            Action::Deleted => "delete",
        };
        f.write_str(s)
    }
}

/// Planned change for one resource
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub id: ResourceId,
    pub action: Action,
    pub diff: Diff,
}

impl PlannedChange {
    pub fn new(id: ResourceId, action: Action, diff: Diff) -> Self {
        Self { id, action, diff }
    }
}

/// Plan containing the changes for a set of resources
#[derive(Debug, Clone, Default)]
pub struct Plan {
    changes: Vec<PlannedChange>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, change: PlannedChange) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[PlannedChange] {
        &self.changes
    }

    /// Whether no resource needs a change
    pub fn is_empty(&self) -> bool {
        self.mutation_count() == 0
    }

    /// Number of changes that mutate remote state
    pub fn mutation_count(&self) -> usize {
        self.changes.iter().filter(|c| c.action.is_change()).count()
    }

    /// Changes that destroy remote objects
    pub fn destructive(&self) -> impl Iterator<Item = &PlannedChange> {
        self.changes.iter().filter(|c| c.action.is_destructive())
    }

    /// Generate a summary of the Plan for display
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match change.action {
                Action::NoOp => summary.unchanged += 1,
                Action::Created => summary.create += 1,
                Action::Updated => summary.update += 1,
                Action::Replaced => summary.replace += 1,
                Action::Deleted => summary.delete += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub unchanged: usize,
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to replace, {} to delete",
            self.create, self.update, self.replace, self.delete
        )
    }
}
