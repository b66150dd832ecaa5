//! Pure decision logic.
//!
//! Nothing in this module performs I/O. Each policy takes the current label
//! set (plus whatever configuration it needs) and returns the
//! [`LabelMutation`]s that move the pull request to the desired state.

pub mod colors;
pub mod labels;
pub mod review;
pub mod security;

use std::fmt;

use crate::pr::LabelSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelAction {
    Add,
    Remove,
}

/// A single label change on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMutation {
    pub action: LabelAction,
    pub label: String,
}

impl LabelMutation {
    pub fn add(label: impl Into<String>) -> Self {
        Self {
            action: LabelAction::Add,
            label: label.into(),
        }
    }

    pub fn remove(label: impl Into<String>) -> Self {
        Self {
            action: LabelAction::Remove,
            label: label.into(),
        }
    }
}

impl fmt::Display for LabelMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            LabelAction::Add => write!(f, "add label `{}`", self.label),
            LabelAction::Remove => write!(f, "remove label `{}`", self.label),
        }
    }
}

/// Drop mutations that would not change `labels`, applying the rest.
///
/// Mutations are evaluated in order against the running set, so an add
/// followed by a remove of the same label keeps both.
pub fn apply_effective(labels: &mut LabelSet, mutations: Vec<LabelMutation>) -> Vec<LabelMutation> {
    mutations.into_iter().filter(|m| labels.apply(m)).collect()
}
