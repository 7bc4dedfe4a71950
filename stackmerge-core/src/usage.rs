//! Script usages: which output a script stack feeds.

use derive_more::Display;

use crate::ids::UsageId;

/// The usage domain of a script stack.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[non_exhaustive]
pub enum ScriptUsage {
    /// Runs once when the emitter starts.
    EmitterSpawn,
    /// Runs every tick for the emitter.
    EmitterUpdate,
    /// Runs for every spawned particle.
    ParticleSpawn,
    /// Runs every tick for every particle.
    ParticleUpdate,
    /// Runs for particles in response to an event.
    ParticleEvent,
    /// Runs as one stage of a multi-stage simulation.
    SimulationStage,
}

impl ScriptUsage {
    /// The four usages every emitter has exactly one stack for, in diff order.
    pub const FIXED: [ScriptUsage; 4] = [
        ScriptUsage::EmitterSpawn,
        ScriptUsage::EmitterUpdate,
        ScriptUsage::ParticleSpawn,
        ScriptUsage::ParticleUpdate,
    ];

    /// Human readable name, used in diagnostics.
    pub fn display_name(&self) -> &'static str {
        match self {
            ScriptUsage::EmitterSpawn => "Emitter Spawn",
            ScriptUsage::EmitterUpdate => "Emitter Update",
            ScriptUsage::ParticleSpawn => "Particle Spawn",
            ScriptUsage::ParticleUpdate => "Particle Update",
            ScriptUsage::ParticleEvent => "Particle Event",
            ScriptUsage::SimulationStage => "Simulation Stage",
        }
    }

    /// Whether the usage is one of [`ScriptUsage::FIXED`].
    pub fn is_fixed(&self) -> bool {
        Self::FIXED.contains(self)
    }
}

/// A usage together with the id that distinguishes multiple stacks of the
/// same usage.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, serde::Serialize, serde::Deserialize,
)]
#[display("{}({usage_id})", usage.display_name())]
pub struct UsageKey {
    /// The usage domain.
    pub usage: ScriptUsage,
    /// Id of the usage instance; nil for fixed usages.
    pub usage_id: UsageId,
}

impl UsageKey {
    /// Key for one of the fixed usages.
    pub const fn fixed(usage: ScriptUsage) -> Self {
        Self {
            usage,
            usage_id: UsageId::nil(),
        }
    }

    /// Key for an event handler stack.
    pub const fn event(usage_id: UsageId) -> Self {
        Self {
            usage: ScriptUsage::ParticleEvent,
            usage_id,
        }
    }

    /// Key for a simulation stage stack.
    pub const fn simulation_stage(usage_id: UsageId) -> Self {
        Self {
            usage: ScriptUsage::SimulationStage,
            usage_id,
        }
    }
}

impl From<ScriptUsage> for UsageKey {
    fn from(usage: ScriptUsage) -> Self {
        Self::fixed(usage)
    }
}
