//! Stable identifiers and parameter handles.

use derive_more::Display;
use smol_str::SmolStr;
use uuid::Uuid;

/// Declares a `Copy` newtype around a [`Uuid`].
macro_rules! impl_uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The nil identifier, used where no identifier has been assigned.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Builds an identifier from a fixed value.
            pub const fn from_u128(v: u128) -> Self {
                Self(Uuid::from_u128(v))
            }

            /// Whether this is the nil identifier.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// The underlying uuid.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

impl_uuid_id!(
    /// Identifier of a graph node. Persists across save, duplication and merge.
    NodeId
);
impl_uuid_id!(
    /// Opaque change token. Downstream caches compare these to detect staleness.
    ChangeId
);
impl_uuid_id!(
    /// Identity of a locally authored step definition.
    DefinitionId
);
impl_uuid_id!(
    /// Identifies a script usage instance, such as one event handler or
    /// simulation stage. Fixed usages use the nil id.
    UsageId
);
impl_uuid_id!(
    /// Merge identity of a renderer.
    RendererId
);
impl_uuid_id!(
    /// Identity of a module annotation.
    MessageId
);
impl_uuid_id!(
    /// Object identity of an emitter. Duplicates receive a fresh one.
    EmitterId
);

/// A qualified parameter name of the form `Namespace.Name`.
///
/// The namespace is everything before the first `.`; a handle without a `.`
/// has an empty namespace.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ParameterHandle(SmolStr);

impl ParameterHandle {
    /// Creates a handle from its namespace and name parts.
    pub fn new(namespace: impl AsRef<str>, name: impl AsRef<str>) -> Self {
        Self(format!("{}.{}", namespace.as_ref(), name.as_ref()).into())
    }

    /// Wraps an already qualified handle string.
    pub fn from_qualified(handle: impl Into<SmolStr>) -> Self {
        Self(handle.into())
    }

    /// The namespace part.
    pub fn namespace(&self) -> &str {
        self.0.split_once('.').map_or("", |(ns, _)| ns)
    }

    /// The name part.
    pub fn name(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(_, n)| n)
    }

    /// The full handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
