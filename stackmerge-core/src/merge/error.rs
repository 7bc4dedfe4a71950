//! Messages accumulated by the diff and apply phases.

use smol_str::SmolStr;
use thiserror::Error;

use crate::graph::GraphError;
use crate::ids::{NodeId, RendererId, UsageId};
use crate::reflect::PropertyDiffError;
use crate::usage::ScriptUsage;

/// Which side of a diff a value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum DiffSide {
    /// The diff base.
    #[display("base")]
    Base,
    /// The other side.
    #[display("other")]
    Other,
}

/// A failure while diffing or applying a diff.
///
/// Diffs and merges do not stop at the first failure. They collect these
/// and report them as strings through [`MergeError::to_string`].
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum MergeError {
    /// Matched modules refer to incompatible definitions.
    #[error(
        "Function scripts for function {function} did not match. Parent: {parent} Child: {child}. \
         This can be fixed by removing the module from the parent, merging the removal to the child, \
         then removing it from the child, and then re-adding it to the parent and merging again."
    )]
    FunctionScriptMismatch {
        /// The module name.
        function: SmolStr,
        /// The base definition.
        parent: String,
        /// The other definition.
        child: String,
    },
    /// Two overrides of an input could not be compared.
    #[error("Failed to diff function inputs. Function name: {function} Input Name: {input}")]
    InputDiffFailed {
        /// The module name.
        function: SmolStr,
        /// The input name.
        input: SmolStr,
    },
    /// A fixed stack could not be read.
    #[error("One of the {} script stacks was invalid.", .usage.display_name().to_lowercase())]
    InvalidStack {
        /// The stack usage.
        usage: ScriptUsage,
    },
    /// An event handler stack could not be read.
    #[error("Failed to diff event handlers, the {side} event handler was invalid. Script Usage Id: {usage_id}")]
    InvalidEventHandler {
        /// The side with the invalid handler.
        side: DiffSide,
        /// The handler.
        usage_id: UsageId,
    },
    /// A simulation stage stack could not be read.
    #[error("Failed to diff simulation stages, the {side} simulation stage was invalid. Script Usage Id: {usage_id}")]
    InvalidSimulationStage {
        /// The side with the invalid stage.
        side: DiffSide,
        /// The stage.
        usage_id: UsageId,
    },
    /// Header of the errors of one stack.
    #[error("Failed to diff {stack} script stack. {count} Errors:")]
    StackDiffFailed {
        /// Name of the stack.
        stack: String,
        /// Number of following errors.
        count: usize,
    },
    /// Reflected properties could not be diffed or copied.
    #[error(transparent)]
    Property(#[from] PropertyDiffError),
    /// A graph edit failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A removed module was not in the target.
    #[error("Failed to remove module {module} while applying diff.")]
    RemoveModuleFailed {
        /// The module.
        module: NodeId,
    },
    /// An added module has no definition.
    #[error("Can not add module {0} because it's script was missing.")]
    MissingModuleScript(SmolStr),
    /// A removed override could not be removed.
    #[error("Failed to remove input override because it was invalid.")]
    RemoveInputOverrideInvalid,
    /// An added override could not be created.
    #[error("Failed to add input override because it was invalid.")]
    AddInputOverrideInvalid,
    /// An added dynamic input has no definition.
    #[error("Failed to add input override because it's dynamic function call's function script was null.")]
    InvalidDynamicInput,
    /// The pin for an added override is still bound.
    #[error("Failed to add input override because the target override pin was still linked to other nodes.")]
    OverridePinStillLinked,
    /// No static switch with the override's name.
    #[error("Failed to add static switch input override because a matching pin could not be found.")]
    StaticSwitchNotFound,
    /// The static switch with the override's name has another type.
    #[error("Failed to add static switch input override because the type of the pin matched by name did not match.")]
    StaticSwitchWrongType,
    /// A fast-iteration override has no stored value.
    #[error("Failed to add input override {0} because its fast iteration value was missing.")]
    RapidValueMissing(SmolStr),
    /// The module owning an override is not in the target.
    #[error("Failed to apply input override {input} because its module {module} was not found.")]
    OwnerNotFound {
        /// The module.
        module: NodeId,
        /// The input.
        input: SmolStr,
    },
    /// The stack to apply a diff to is missing or invalid.
    #[error("Apply diff failed. The target {0} script stack was invalid.")]
    TargetStackInvalid(String),
    /// An enabled change targets a module not in the target.
    #[error("Failed to change the enabled state of module {module} because it was not found.")]
    EnableModuleFailed {
        /// The module.
        module: NodeId,
    },
    /// A diff removes entries that cannot be removed.
    #[error("Apply diff failed, removed {kind}s are currently unsupported.")]
    RemovedEntriesUnsupported {
        /// The kind of entry.
        kind: &'static str,
    },
    /// A modified entry is not in the target.
    #[error("Apply diff failed. The modified {kind} with id: {usage_id} was missing.")]
    EntryNotFound {
        /// The kind of entry.
        kind: &'static str,
        /// The entry.
        usage_id: UsageId,
    },
    /// An entry's script is missing.
    #[error("Apply diff failed. The {kind} with id: {usage_id} was missing its script.")]
    EntryScriptMissing {
        /// The kind of entry.
        kind: &'static str,
        /// The entry.
        usage_id: UsageId,
    },
    /// A modified renderer is not in the target.
    #[error("Apply diff failed. The modified renderer with id: {0} was missing.")]
    RendererNotFound(RendererId),
    /// The emitter has no parent to merge from.
    #[error("This emitter has no 'Parent' so changes can't be merged in.")]
    NoParent,
    /// A reset could not diff the instance against its base.
    #[error("Failed to reset {what} back to it's base value. It couldn't be diffed successfully. Emitter: {emitter} Input:{item}")]
    ResetNotDiffable {
        /// What was reset.
        what: &'static str,
        /// The emitter.
        emitter: SmolStr,
        /// The reset item.
        item: String,
    },
    /// A reset found nothing to reset.
    #[error("Failed to reset {what} back to it's base value. It wasn't different from the base. Emitter: {emitter} Input:{item}")]
    ResetNotDifferent {
        /// What was reset.
        what: &'static str,
        /// The emitter.
        emitter: SmolStr,
        /// The reset item.
        item: String,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stack_messages_name_the_usage() {
        let err = MergeError::InvalidStack {
            usage: ScriptUsage::ParticleSpawn,
        };
        assert_eq!(err.to_string(), "One of the particle spawn script stacks was invalid.");
        let err = MergeError::RemovedEntriesUnsupported {
            kind: "event handler",
        };
        assert_eq!(
            err.to_string(),
            "Apply diff failed, removed event handlers are currently unsupported."
        );
    }
}
