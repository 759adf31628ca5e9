// step.rs — Element stride resolution
//
// Each buffer is walked with a byte stride. The driver always supplies one
// (input strides in the driver-info record, the output stride as the
// `outstep` argument), but when the element type's size is known here the
// stride can be a compile-time constant instead. Substitution is
// conservative: any type whose in-memory size might differ between this
// module's layout and the driver's keeps the dynamic stride.

use serde::Serialize;

use crate::ir::Value;
use crate::types::{Layout, PointerWidth, Type};

/// Stride used to advance through one buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum StepValue {
    /// Element allocation size in bytes.
    Static(u64),
    /// Stride read at run time (an `i32` value).
    Dynamic(Value),
}

impl StepValue {
    /// The stride as an `i32` operand.
    pub fn as_value(&self) -> Value {
        match self {
            StepValue::Static(bytes) => Value::i32(*bytes as i64),
            StepValue::Dynamic(v) => v.clone(),
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            StepValue::Static(bytes) => StepKind::Static { bytes: *bytes },
            StepValue::Dynamic(_) => StepKind::Dynamic,
        }
    }
}

/// Which resolution a stride got, without the IR operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepKind {
    Static { bytes: u64 },
    Dynamic,
}

/// Constant stride for elements addressed through `pointer_type`, if one
/// may be substituted.
pub fn static_step(layout: &Layout<'_>, enabled: bool, pointer_type: &Type) -> Option<u64> {
    if !enabled || layout.pointer_width != PointerWidth::W64 {
        return None;
    }
    let pointee = pointer_type.pointee()?;
    if pointee.is_int(8) || pointee.is_int(128) || !layout.is_sized(pointee) {
        return None;
    }
    if pointee
        .struct_name()
        .is_some_and(|name| name.contains("coerce"))
    {
        return None;
    }
    if let Type::Vector(elem, 2) = pointee {
        if elem.is_int(64) {
            return None;
        }
    }
    layout
        .alloc_size(pointee)
        .filter(|&bytes| bytes <= i32::MAX as u64)
}

/// Resolve the stride for `pointer_type`, producing the dynamic stride only
/// when no constant can be used.
pub fn resolve_step(
    layout: &Layout<'_>,
    enabled: bool,
    pointer_type: &Type,
    dynamic: impl FnOnce() -> Value,
) -> StepValue {
    match static_step(layout, enabled, pointer_type) {
        Some(bytes) => StepValue::Static(bytes),
        None => StepValue::Dynamic(dynamic()),
    }
}
