//! Enumeration of the editable fields of a type.
//!
//! Types describe their fields with the [`impl_reflect`] macro, which
//! implements [`Reflect`] (read access to each field as a typed
//! [`FieldValue`]) and [`CopyField`] (copying a single named field between two
//! values). Property diffing in [`crate::merge::property_diff`] is built on
//! top of these.

use std::borrow::Cow;
use std::collections::BTreeMap;

use indexmap::IndexMap;
use smol_str::SmolStr;
use thiserror::Error;

/// Annotations on a reflected field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldFlags {
    /// The field is user editable and takes part in property diffs.
    pub editable: bool,
    /// The field is editable but excluded from merging.
    pub no_merge: bool,
}

impl FieldFlags {
    /// An editable, mergeable field.
    pub const EDITABLE: FieldFlags = FieldFlags {
        editable: true,
        no_merge: false,
    };
    /// An editable field excluded from merging.
    pub const NO_MERGE: FieldFlags = FieldFlags {
        editable: true,
        no_merge: true,
    };
    /// A field that is not user editable.
    pub const HIDDEN: FieldFlags = FieldFlags {
        editable: false,
        no_merge: false,
    };

    /// Whether the field takes part in property diffs.
    pub fn is_diffable(&self) -> bool {
        self.editable && !self.no_merge
    }
}

/// The value of a reflected field, tagged by comparator kind.
#[derive(Clone, Debug)]
pub enum FieldValue<'a> {
    /// A boolean leaf.
    Bool(bool),
    /// An integer leaf.
    Int(i128),
    /// A floating point leaf, compared bitwise.
    Float(f64),
    /// A string leaf, also used for unit enums.
    Str(Cow<'a, str>),
    /// A nested reflected struct, compared field by field.
    Struct(&'a dyn Reflect),
    /// An ordered sequence.
    Array(Vec<FieldValue<'a>>),
    /// A map from names to values.
    Map(Vec<(Cow<'a, str>, FieldValue<'a>)>),
    /// A value with no registered comparator.
    Opaque(&'static str),
}

impl FieldValue<'_> {
    /// Name of the comparator kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
            FieldValue::Struct(_) => "struct",
            FieldValue::Array(_) => "array",
            FieldValue::Map(_) => "map",
            FieldValue::Opaque(ty) => ty,
        }
    }
}

/// A reflected field.
#[derive(Clone, Debug)]
pub struct Field<'a> {
    /// Field name.
    pub name: &'static str,
    /// Field annotations.
    pub flags: FieldFlags,
    /// Current value.
    pub value: FieldValue<'a>,
}

/// Read access to the fields of a value.
pub trait Reflect: std::fmt::Debug {
    /// Name of the reflected type.
    fn type_name(&self) -> &'static str;
    /// Every field, editable or not, in declaration order.
    fn fields(&self) -> Vec<Field<'_>>;
}

/// Copies named fields from one value to another of the same type.
pub trait CopyField {
    /// Copies `field` from `source` into `self`.
    fn copy_field(&mut self, source: &Self, field: &str) -> Result<(), PropertyDiffError>;
}

/// Conversion of a field type into a [`FieldValue`].
pub trait AsFieldValue {
    /// The value as seen by the property diff.
    fn as_field_value(&self) -> FieldValue<'_>;
}

/// Errors from reflecting or diffing properties.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PropertyDiffError {
    /// An editable field has a kind without a comparator.
    #[error("Editable field {type_name}.{field} has kind {kind}, which has no registered comparator.")]
    UnsupportedField {
        /// The reflected type.
        type_name: &'static str,
        /// The field.
        field: &'static str,
        /// The field kind.
        kind: &'static str,
    },
    /// The field does not exist on the type.
    #[error("Type {type_name} has no field named {field}.")]
    UnknownField {
        /// The reflected type.
        type_name: &'static str,
        /// The requested field.
        field: String,
    },
}

/// Implements [`Reflect`], [`CopyField`] and [`AsFieldValue`] for a struct
/// from a list of `field: flags` entries.
macro_rules! impl_reflect {
    ($ty:ident { $($field:ident : $flags:expr),* $(,)? }) => {
        impl $crate::reflect::Reflect for $ty {
            fn type_name(&self) -> &'static str {
                stringify!($ty)
            }

            fn fields(&self) -> Vec<$crate::reflect::Field<'_>> {
                vec![$(
                    $crate::reflect::Field {
                        name: stringify!($field),
                        flags: $flags,
                        value: $crate::reflect::AsFieldValue::as_field_value(&self.$field),
                    }
                ),*]
            }
        }

        impl $crate::reflect::CopyField for $ty {
            fn copy_field(
                &mut self,
                source: &Self,
                field: &str,
            ) -> Result<(), $crate::reflect::PropertyDiffError> {
                match field {
                    $(stringify!($field) => {
                        self.$field = source.$field.clone();
                        Ok(())
                    })*
                    _ => Err($crate::reflect::PropertyDiffError::UnknownField {
                        type_name: stringify!($ty),
                        field: field.to_string(),
                    }),
                }
            }
        }

        impl $crate::reflect::AsFieldValue for $ty {
            fn as_field_value(&self) -> $crate::reflect::FieldValue<'_> {
                $crate::reflect::FieldValue::Struct(self)
            }
        }
    };
}
pub(crate) use impl_reflect;

/// Implements [`AsFieldValue`] for unit enums deriving `strum::IntoStaticStr`.
macro_rules! impl_enum_field {
    ($($ty:ty),* $(,)?) => {
        $(impl $crate::reflect::AsFieldValue for $ty {
            fn as_field_value(&self) -> $crate::reflect::FieldValue<'_> {
                let name: &'static str = self.into();
                $crate::reflect::FieldValue::Str(name.into())
            }
        })*
    };
}
pub(crate) use impl_enum_field;

impl AsFieldValue for bool {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Bool(*self)
    }
}

macro_rules! impl_int_field {
    ($($ty:ty),*) => {
        $(impl AsFieldValue for $ty {
            fn as_field_value(&self) -> FieldValue<'_> {
                FieldValue::Int(i128::from(*self))
            }
        })*
    };
}
impl_int_field!(i32, u32, i64, u64);

impl AsFieldValue for f32 {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Float(f64::from(*self))
    }
}

impl AsFieldValue for f64 {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Float(*self)
    }
}

impl AsFieldValue for String {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Str(self.as_str().into())
    }
}

impl AsFieldValue for SmolStr {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Str(self.as_str().into())
    }
}

impl<T: AsFieldValue> AsFieldValue for Option<T> {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Array(self.iter().map(AsFieldValue::as_field_value).collect())
    }
}

impl<T: AsFieldValue> AsFieldValue for Vec<T> {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Array(self.iter().map(AsFieldValue::as_field_value).collect())
    }
}

impl<T: AsFieldValue, const N: usize> AsFieldValue for [T; N] {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Array(self.iter().map(AsFieldValue::as_field_value).collect())
    }
}

impl<K: AsRef<str>, V: AsFieldValue> AsFieldValue for BTreeMap<K, V> {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Map(
            self.iter()
                .map(|(k, v)| (k.as_ref().into(), v.as_field_value()))
                .collect(),
        )
    }
}

impl<K: AsRef<str>, V: AsFieldValue> AsFieldValue for IndexMap<K, V> {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Map(
            self.iter()
                .map(|(k, v)| (k.as_ref().into(), v.as_field_value()))
                .collect(),
        )
    }
}

impl AsFieldValue for serde_json::Value {
    fn as_field_value(&self) -> FieldValue<'_> {
        FieldValue::Opaque("json")
    }
}
