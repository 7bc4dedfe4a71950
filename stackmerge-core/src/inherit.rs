//! Bookkeeping for emitters derived from a parent emitter.

use tracing::{info, warn};

use crate::emitter::Emitter;
use crate::merge::{MergeError, MergeManager, MergeOptions, MergeResult, MergeStatus};

/// An emitter together with the parent it inherits from.
#[derive(Clone, Debug, PartialEq)]
pub struct InheritedEmitter {
    /// The derived emitter.
    pub instance: Emitter,
    /// The current parent.
    pub parent: Option<Emitter>,
    /// A copy of the parent as it was when changes were last merged in.
    pub parent_at_last_merge: Option<Emitter>,
}

impl InheritedEmitter {
    /// An emitter with no parent.
    pub fn new(instance: Emitter) -> Self {
        Self {
            instance,
            parent: None,
            parent_at_last_merge: None,
        }
    }

    /// A fresh instance of `parent`, synchronized with it.
    pub fn derive(parent: &Emitter, unique_name: impl Into<smol_str::SmolStr>) -> Self {
        let mut instance = parent.duplicate();
        instance.unique_name = unique_name.into();
        Self {
            instance,
            parent: Some(parent.clone()),
            parent_at_last_merge: Some(parent.duplicate()),
        }
    }

    /// Whether the parent has not changed since the last merge.
    pub fn is_synchronized_with_parent(&self) -> bool {
        match (&self.parent, &self.parent_at_last_merge) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(parent), Some(last)) => parent.change_id == last.change_id,
        }
    }

    /// Merges the parent's changes into the instance.
    ///
    /// On success the instance is replaced by the merged emitter and the
    /// snapshot is refreshed. On failure nothing changes.
    pub fn merge_changes_from_parent(&mut self, options: &MergeOptions) -> MergeResult {
        let Some(parent) = &self.parent else {
            return MergeResult {
                status: MergeStatus::FailedToDiff,
                merged: None,
                modified_graph: false,
                errors: vec![MergeError::NoParent.to_string()],
            };
        };

        let mut manager = MergeManager::with_options(*options);
        let result = manager.merge_emitter(parent, self.parent_at_last_merge.as_ref(), &self.instance);
        match result.status {
            MergeStatus::NoDifferences => {}
            MergeStatus::SucceededDifferencesApplied => {
                if let Some(merged) = &result.merged {
                    self.instance = merged.clone();
                }
                info!(emitter = %self.instance.unique_name, "instance updated from parent");
            }
            _ => {
                warn!(
                    emitter = %self.instance.unique_name,
                    status = %result.status,
                    errors = ?result.errors,
                    "merging changes from parent failed"
                );
                return result;
            }
        }
        self.parent_at_last_merge = Some(parent.duplicate());
        result
    }
}
