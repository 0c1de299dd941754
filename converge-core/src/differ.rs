//! Differ - Compare desired state with observed state
//!
//! Field comparison is driven by the schema's field table: computed fields
//! are never compared against desired state, `IgnoreOnUpdate` fields are
//! compared against the value carried over from the last pass and only
//! matter when they force a replacement, `Normalized` fields compare their
//! normalized forms, and a change to a `force_replace` field is reported as
//! a replacement.

use std::collections::BTreeMap;

use crate::resource::{Attributes, Value};
use crate::schema::{Comparison, ResourceSchema};

/// Comparison result for one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDiff {
    Unchanged,
    /// Can be applied in place
    Changed {
        old: Option<Value>,
        new: Option<Value>,
    },
    /// Requires destroy and recreate
    ForceReplace {
        old: Option<Value>,
        new: Option<Value>,
    },
}

impl FieldDiff {
    pub fn is_change(&self) -> bool {
        !matches!(self, FieldDiff::Unchanged)
    }
}

/// Field name -> comparison result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    fields: BTreeMap<String, FieldDiff>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, field: FieldDiff) {
        self.fields.insert(name.into(), field);
    }

    pub fn get(&self, name: &str) -> Option<&FieldDiff> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldDiff> {
        &self.fields
    }

    /// Fields whose value changed
    pub fn changes(&self) -> impl Iterator<Item = (&str, &FieldDiff)> {
        self.fields
            .iter()
            .filter(|(_, f)| f.is_change())
            .map(|(k, f)| (k.as_str(), f))
    }

    pub fn changed_fields(&self) -> Vec<&str> {
        self.changes().map(|(k, _)| k).collect()
    }

    /// Whether no field changed
    pub fn is_empty(&self) -> bool {
        self.changes().next().is_none()
    }

    /// Whether any change requires replacing the resource
    pub fn requires_replace(&self) -> bool {
        self.fields
            .values()
            .any(|f| matches!(f, FieldDiff::ForceReplace { .. }))
    }
}

/// Compare desired attributes with observed attributes
///
/// Only attributes present in the desired state are compared; an optional
/// attribute left out by the caller keeps whatever value the remote system
/// holds.
pub fn diff(schema: &ResourceSchema, desired: &Attributes, observed: &Attributes) -> Diff {
    let mut result = Diff::new();

    for attr in schema.caller_attributes() {
        let Some(new) = desired.get(&attr.name) else {
            continue;
        };

        if matches!(attr.comparison, Comparison::IgnoreOnUpdate) {
            // The remote never returns these; without a carried value there is nothing to compare
            let field = match observed.get(&attr.name) {
                Some(old) if old != new && attr.force_replace => FieldDiff::ForceReplace {
                    old: Some(old.clone()),
                    new: Some(new.clone()),
                },
                _ => FieldDiff::Unchanged,
            };
            result.insert(&attr.name, field);
            continue;
        }

        let old = observed.get(&attr.name);
        let field = match old {
            Some(old) if attr.comparison.equivalent(new, old) => FieldDiff::Unchanged,
            _ if attr.force_replace => FieldDiff::ForceReplace {
                old: old.cloned(),
                new: Some(new.clone()),
            },
            _ => FieldDiff::Changed {
                old: old.cloned(),
                new: Some(new.clone()),
            },
        };
        result.insert(&attr.name, field);
    }

    result
}

/// Compare two observations of the same resource, computed fields included
pub fn diff_observed(schema: &ResourceSchema, previous: &Attributes, current: &Attributes) -> Diff {
    let mut result = Diff::new();

    for attr in schema.attributes.values() {
        if matches!(attr.comparison, Comparison::IgnoreOnUpdate) {
            continue;
        }

        let field = match (previous.get(&attr.name), current.get(&attr.name)) {
            (None, None) => continue,
            (Some(a), Some(b)) if attr.comparison.equivalent(a, b) => FieldDiff::Unchanged,
            (old, new) => FieldDiff::Changed {
                old: old.cloned(),
                new: new.cloned(),
            },
        };
        result.insert(&attr.name, field);
    }

    result
}
