//! Diffs of the editable fields of reflected types.

use crate::reflect::{CopyField, FieldValue, PropertyDiffError, Reflect};

/// Names of the mergeable fields whose values differ between `base` and
/// `other`.
pub fn diff_properties<T: Reflect + ?Sized>(
    base: &T,
    other: &T,
) -> Result<Vec<&'static str>, PropertyDiffError> {
    let type_name = base.type_name();
    let mut different = Vec::new();
    for (b, o) in base.fields().into_iter().zip(other.fields()) {
        if !b.flags.is_diffable() {
            continue;
        }
        if !values_equal(type_name, b.name, &b.value, &o.value)? {
            different.push(b.name);
        }
    }
    Ok(different)
}

/// Copies the named fields from `source` into `target`.
pub fn copy_properties<T: CopyField>(
    target: &mut T,
    source: &T,
    fields: &[&str],
) -> Result<(), PropertyDiffError> {
    fields
        .iter()
        .try_for_each(|field| target.copy_field(source, field))
}

fn values_equal(
    type_name: &'static str,
    field: &'static str,
    a: &FieldValue<'_>,
    b: &FieldValue<'_>,
) -> Result<bool, PropertyDiffError> {
    let unsupported = |kind| PropertyDiffError::UnsupportedField {
        type_name,
        field,
        kind,
    };
    Ok(match (a, b) {
        (FieldValue::Opaque(kind), _) | (_, FieldValue::Opaque(kind)) => {
            return Err(unsupported(*kind));
        }
        (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
        (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
        (FieldValue::Float(a), FieldValue::Float(b)) => a.to_bits() == b.to_bits(),
        (FieldValue::Str(a), FieldValue::Str(b)) => a == b,
        (FieldValue::Struct(a), FieldValue::Struct(b)) => {
            // Nested structs compare every editable field, mergeable or not.
            let (fa, fb) = (a.fields(), b.fields());
            if a.type_name() != b.type_name() || fa.len() != fb.len() {
                return Ok(false);
            }
            for (x, y) in fa.iter().zip(&fb) {
                if x.flags.editable && !values_equal(a.type_name(), x.name, &x.value, &y.value)? {
                    return Ok(false);
                }
            }
            true
        }
        (FieldValue::Array(a), FieldValue::Array(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (x, y) in a.iter().zip(b) {
                if !values_equal(type_name, field, x, y)? {
                    return Ok(false);
                }
            }
            true
        }
        (FieldValue::Map(a), FieldValue::Map(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for ((ka, x), (kb, y)) in a.iter().zip(b) {
                if ka != kb || !values_equal(type_name, field, x, y)? {
                    return Ok(false);
                }
            }
            true
        }
        _ => false,
    })
}
