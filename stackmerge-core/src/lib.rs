//! Structural three-way merge of emitter script stacks.
//!
//! An [`Emitter`] owns ordered stacks of module calls, one per
//! [`ScriptUsage`], plus event handlers, simulation stages, renderers and
//! editable settings. Emitters derived from a parent inherit all of this and
//! may change any of it locally. When the parent changes, the
//! [`merge::MergeManager`] carries the local changes over onto the new
//! parent.
//!
//! ```
//! use stackmerge_core::builder::{EmitterBuilder, ModuleBuilder};
//! use stackmerge_core::merge::{MergeManager, MergeStatus};
//! use stackmerge_core::usage::{ScriptUsage, UsageKey};
//!
//! let update = UsageKey::fixed(ScriptUsage::ParticleUpdate);
//! let snapshot = EmitterBuilder::new("Template")
//!     .module(update, ModuleBuilder::asset("Drag", "/Modules/Drag"))
//!     .build()
//!     .unwrap();
//!
//! // The instance adds a module, and the parent changes independently.
//! let mut instance = snapshot.duplicate();
//! instance.add_module(update, 1, ModuleBuilder::asset("Gravity", "/Modules/Gravity")).unwrap();
//! let mut parent = snapshot.duplicate();
//! parent.properties.local_space = true;
//! parent.update_change_id("local space");
//!
//! let result = MergeManager::new().merge_emitter(&parent, Some(&snapshot), &instance);
//! assert_eq!(result.status, MergeStatus::SucceededDifferencesApplied);
//! let merged = result.merged.unwrap();
//! assert!(merged.properties.local_space);
//! assert!(merged.find_module(update, "Gravity").is_some());
//! ```

pub mod builder;
pub mod emitter;
pub mod graph;
pub mod ids;
pub mod inherit;
pub mod merge;
pub mod reflect;
pub mod usage;

pub use crate::emitter::Emitter;
pub use crate::graph::{GraphError, ScriptGraph};
pub use crate::ids::{ChangeId, NodeId, ParameterHandle};
pub use crate::merge::{MergeManager, MergeOptions, MergeResult, MergeStatus};
pub use crate::usage::{ScriptUsage, UsageKey};
