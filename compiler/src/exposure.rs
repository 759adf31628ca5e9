// exposure.rs — Can user code reach raw buffer element pointers?
//
// Kernel buffer accesses may only be typed apart from every other memory
// access in the module if the expanded functions are the sole producers of
// pointers into buffers. Two things break that: a legacy kernel (it receives
// the element pointers themselves) and a reference to one of the runtime
// element accessors (they return or take raw element addresses).
//
// Preconditions: none.
// Postconditions: the verdict does not depend on function or export order.
// Side effects: none.

use serde::Serialize;
use tracing::debug;

use crate::ir::{KernelExport, Module, TbaaDomain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Exposure {
    Exposed,
    NotExposed,
}

impl Exposure {
    /// Aliasing domain the kernel accesses may use under this verdict.
    pub fn tbaa_domain(self) -> TbaaDomain {
        match self {
            Exposure::Exposed => TbaaDomain::Distinct,
            Exposure::NotExposed => TbaaDomain::Shared,
        }
    }
}

/// Runtime entry points that hand out or consume raw element addresses:
/// get/set element at a 1-, 2- or 3-D index and the planar YUV samplers.
pub const DEFAULT_ACCESSORS: [&str; 9] = [
    "_Z14rsGetElementAt13rs_allocationj",
    "_Z14rsGetElementAt13rs_allocationjj",
    "_Z14rsGetElementAt13rs_allocationjjj",
    "_Z14rsSetElementAt13rs_allocationPvj",
    "_Z14rsSetElementAt13rs_allocationPvjj",
    "_Z14rsSetElementAt13rs_allocationPvjjj",
    "_Z25rsGetElementAtYuv_uchar_Y13rs_allocationjj",
    "_Z25rsGetElementAtYuv_uchar_U13rs_allocationjj",
    "_Z25rsGetElementAtYuv_uchar_V13rs_allocationjj",
];

pub fn default_accessors() -> Vec<String> {
    DEFAULT_ACCESSORS.iter().map(|s| s.to_string()).collect()
}

/// Decide whether buffer element pointers escape to user code.
///
/// `kernels` is the export list the pass worked from; entries naming a
/// function absent from the module are ignored.
pub fn analyze(module: &Module, kernels: &[KernelExport], accessors: &[String]) -> Exposure {
    if let Some(k) = kernels
        .iter()
        .find(|k| !k.signature.is_value_kernel() && module.function(&k.name).is_some())
    {
        debug!(kernel = %k.name, "legacy kernel exposes buffer pointers");
        return Exposure::Exposed;
    }
    for name in accessors {
        let uses = module.use_count(name);
        if uses > 0 {
            debug!(accessor = %name, uses, "element accessor referenced");
            return Exposure::Exposed;
        }
    }
    Exposure::NotExposed
}
