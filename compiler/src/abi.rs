// abi.rs — ABI shape of kernel formals
//
// Calling-convention lowering may turn a by-value aggregate parameter into a
// pointer to a caller-owned copy. The expanded function must then hand the
// kernel a private copy of the element, never the buffer address itself.
// Classification is a pure function of the formal type and kernel style.

use serde::Serialize;

use crate::signature::KernelStyle;
use crate::types::Type;

/// How a kernel formal receives its element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbiShape {
    /// The formal is a pointer the kernel may use to address the element.
    PlainPointer,
    /// The formal is the element value itself.
    PlainValue,
    /// The formal was declared by value but lowered to a pointer to an
    /// aggregate; it must point at a private copy.
    HiddenPointerToAggregate,
}

/// Classify one data formal of a kernel of the given style.
pub fn classify(formal: &Type, style: KernelStyle) -> AbiShape {
    match (style, formal.is_pointer()) {
        (KernelStyle::Value, true) => AbiShape::HiddenPointerToAggregate,
        (KernelStyle::Legacy, true) => AbiShape::PlainPointer,
        (_, false) => AbiShape::PlainValue,
    }
}
