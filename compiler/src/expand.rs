// expand.rs — Kernel expansion pass
//
// For every exported kernel, in registration order, appends a function
//
//   define void @<kernel>.expand(%struct.KernelDriverInfoPfx* %info,
//                                i32 %start, i32 %end, i32 %outstep)
//
// that calls the kernel once per index in [start, end), feeding it elements
// of the buffers described by `info`. Afterwards the exposure verdict decides
// the module's aliasing domain.
//
// Preconditions: the module verifies.
// Postconditions: on success the module verifies, every expanded function
//                 has exactly four parameters and external linkage, and each
//                 expanded kernel is internal unless it is also invokable.
// Failure modes: `ExpandError`; the caller's module is left untouched.
// Side effects: none beyond the module passed in.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::builder::FunctionBuilder;
use crate::driver_info::{self, ConflictingStruct, DRIVER_SLOTS};
use crate::exposure::{self, Exposure};
use crate::ir::{Function, KernelExport, Linkage, Module, Param, TbaaDomain, Value};
use crate::loops::LoopBlocks;
use crate::marshal::{InputSummary, MarshalOptions, Marshaller, OutputSummary, END_ARG, START_ARG};
use crate::signature::{KernelParameterPlan, KernelStyle, PlanError, SignatureBits, SpecialParam};
use crate::types::Type;
use crate::verify::{verify_module, VerifyError};

/// Name of the function a pre-signature module exposes as its only kernel.
pub const UNREGISTERED_ROOT: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpandOptions {
    /// Replace driver-supplied strides with element sizes where legal.
    pub static_steps: bool,
    /// Attach type-based alias tags and allow the shared aliasing domain.
    pub tbaa: bool,
    /// Largest number of input buffers a kernel may take (at most
    /// `DRIVER_SLOTS`).
    pub input_limit: usize,
    /// Mangled names of runtime functions that expose element pointers.
    pub accessors: Vec<String>,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            static_steps: true,
            tbaa: true,
            input_limit: DRIVER_SLOTS,
            accessors: exposure::default_accessors(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("input module is malformed: {}", first_message(.0))]
    Malformed(Vec<VerifyError>),
    #[error("exported kernel '@{0}' has no definition")]
    MissingKernel(String),
    #[error("cannot add '@{0}': a function with that name already exists")]
    NameTaken(String),
    #[error("kernel '@{0}' appears more than once in the export list")]
    DuplicateExport(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    DriverInfo(#[from] ConflictingStruct),
    #[error("kernel '{kernel}': {what} element type '{ty}' has no known size")]
    UnsizedElement { kernel: String, what: String, ty: Type },
    #[error("expanded module failed verification: {}", first_message(.0))]
    BrokenOutput(Vec<VerifyError>),
}

fn first_message(errors: &[VerifyError]) -> String {
    match errors {
        [] => String::new(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

/// What the pass did to one kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpandedKernel {
    pub kernel: String,
    pub expanded: String,
    pub signature: SignatureBits,
    pub style: KernelStyle,
    pub inputs: Vec<InputSummary>,
    pub output: OutputSummary,
    pub specials: Vec<SpecialParam>,
    /// The kernel's linkage was downgraded to internal.
    pub internalized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpandSummary {
    pub kernels: Vec<ExpandedKernel>,
    /// Exported kernels left as they were.
    pub skipped: Vec<String>,
    pub exposure: Exposure,
    pub tbaa: TbaaDomain,
}

#[derive(Debug, Clone, Default)]
pub struct ExpandPass {
    pub options: ExpandOptions,
}

impl ExpandPass {
    pub fn new(options: ExpandOptions) -> Self {
        Self { options }
    }

    /// Expand every kernel of `module`. All-or-nothing: on error `module` is
    /// unchanged.
    pub fn run(&self, module: &mut Module) -> Result<ExpandSummary, ExpandError> {
        verify_module(module).map_err(ExpandError::Malformed)?;

        let kernels = kernel_list(module);
        for (i, export) in kernels.iter().enumerate() {
            if kernels[..i].iter().any(|k| k.name == export.name) {
                return Err(ExpandError::DuplicateExport(export.name.clone()));
            }
        }
        let mut staged = module.clone();
        let mut expanded = Vec::with_capacity(kernels.len());
        let mut skipped = Vec::new();

        if !kernels.is_empty() {
            let info_ty = driver_info::declare(&mut staged)?;
            for export in &kernels {
                match self.expand_kernel(&mut staged, export, &info_ty)? {
                    Some(k) => {
                        debug!(
                            kernel = %k.kernel,
                            expanded = %k.expanded,
                            inputs = k.inputs.len(),
                            internalized = k.internalized,
                            "kernel expanded"
                        );
                        expanded.push(k);
                    }
                    None => skipped.push(export.name.clone()),
                }
            }
        }

        let verdict = exposure::analyze(&staged, &kernels, &self.options.accessors);
        if self.options.tbaa {
            staged.tbaa = verdict.tbaa_domain();
        }
        info!(exposure = ?verdict, tbaa = ?staged.tbaa, "allocation exposure");

        verify_module(&staged).map_err(ExpandError::BrokenOutput)?;

        let summary = ExpandSummary {
            kernels: expanded,
            skipped,
            exposure: verdict,
            tbaa: staged.tbaa,
        };
        *module = staged;
        Ok(summary)
    }

    fn expand_kernel(
        &self,
        staged: &mut Module,
        export: &KernelExport,
        info_ty: &Type,
    ) -> Result<Option<ExpandedKernel>, ExpandError> {
        let name = export.name.as_str();
        let bits = export.signature;
        let Some(kernel) = staged.function(name).filter(|f| !f.is_declaration()) else {
            return Err(ExpandError::MissingKernel(name.to_string()));
        };
        if !bits.is_value_kernel() && !kernel.ret.is_void() {
            // Called directly by the host; keeps its linkage.
            warn!(kernel = name, ret = %kernel.ret, "legacy kernel returns a value, not expanded");
            return Ok(None);
        }
        let formals = kernel.param_types();
        let ret = kernel.ret.clone();

        let expanded_name = format!("{}.expand", name);
        if staged.function(&expanded_name).is_some() {
            return Err(ExpandError::NameTaken(expanded_name));
        }

        let plan = KernelParameterPlan::build(name, &formals, &ret, bits)?;
        let limit = self.options.input_limit.min(DRIVER_SLOTS);
        if plan.input_count() > limit {
            return Err(PlanError::TooManyInputs {
                kernel: name.to_string(),
                count: plan.input_count(),
                max: limit,
            }
            .into());
        }

        let mut func = Function::new(expanded_name.clone(), expanded_params(info_ty), Type::Void);
        let (inputs, output) = {
            let layout = staged.layout();
            let mut b = FunctionBuilder::new(&mut func, layout);
            let blocks = LoopBlocks::create(&mut b);
            let marshaller = Marshaller::prepare(
                &mut b,
                &layout,
                name,
                &ret,
                &plan,
                MarshalOptions {
                    static_steps: self.options.static_steps,
                    tbaa: self.options.tbaa,
                },
            )?;
            let lp = blocks.open(&mut b, Value::Arg(START_ARG), Value::Arg(END_ARG));
            marshaller.emit_iteration(&mut b, lp.iv.clone());
            lp.close(&mut b);
            (marshaller.input_summaries(), marshaller.output_summary())
        };
        assert_eq!(func.params.len(), 4, "expanded function must take four parameters");
        assert_eq!(func.linkage, Linkage::External);

        let internalized = !staged.is_invokable(name);
        if internalized {
            if let Some(k) = staged.function_mut(name) {
                k.linkage = Linkage::Internal;
            }
        }
        staged.functions.push(func);

        Ok(Some(ExpandedKernel {
            kernel: name.to_string(),
            expanded: expanded_name,
            signature: bits,
            style: plan.style,
            inputs,
            output,
            specials: plan.specials(),
            internalized,
        }))
    }
}

/// Kernels to expand, in registration order. A module without an export
/// list exposes its `root` function, if defined, with every formal treated
/// as a data pointer.
pub fn kernel_list(module: &Module) -> Vec<KernelExport> {
    match &module.exports {
        Some(exports) => exports.clone(),
        None => module
            .function(UNREGISTERED_ROOT)
            .filter(|f| !f.is_declaration())
            .map(|root| KernelExport {
                name: root.name.clone(),
                signature: SignatureBits::for_unregistered_root(root.params.len()),
            })
            .into_iter()
            .collect(),
    }
}

// ── Verification ─────────────────────────────────────────────────────────────

/// Machine-checkable evidence for expansion postconditions (X1-X3).
#[derive(Debug, Clone)]
pub struct ExpandCert {
    /// X1: Every expanded function takes (info*, i32, i32, i32), returns void
    /// and is external.
    pub x1_contract: bool,
    /// X2: Expanded kernels are internal exactly when not invokable.
    pub x2_kernel_linkage: bool,
    /// X3: The module verifies.
    pub x3_module_verifies: bool,
}

impl crate::pass::StageCert for ExpandCert {
    fn all_pass(&self) -> bool {
        self.x1_contract && self.x2_kernel_linkage && self.x3_module_verifies
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("X1_contract", self.x1_contract),
            ("X2_kernel_linkage", self.x2_kernel_linkage),
            ("X3_module_verifies", self.x3_module_verifies),
        ]
    }
}

/// Verify expansion postconditions against the summary `run` returned.
pub fn verify_expansion(module: &Module, summary: &ExpandSummary) -> ExpandCert {
    let info_ptr = Type::named(driver_info::DRIVER_INFO_STRUCT).ptr_to();
    let x1 = summary.kernels.iter().all(|k| {
        module.function(&k.expanded).is_some_and(|f| {
            f.param_types() == [info_ptr.clone(), Type::i32(), Type::i32(), Type::i32()]
                && f.ret.is_void()
                && f.linkage == Linkage::External
                && !f.is_declaration()
        })
    });
    let x2 = summary.kernels.iter().all(|k| {
        module.function(&k.kernel).is_some_and(|f| {
            let internal = f.linkage == Linkage::Internal;
            internal == k.internalized && internal != module.is_invokable(&k.kernel)
        })
    });
    ExpandCert {
        x1_contract: x1,
        x2_kernel_linkage: x2,
        x3_module_verifies: verify_module(module).is_ok(),
    }
}

fn expanded_params(info_ty: &Type) -> Vec<Param> {
    [
        ("info", info_ty.clone().ptr_to()),
        ("start", Type::i32()),
        ("end", Type::i32()),
        ("outstep", Type::i32()),
    ]
    .into_iter()
    .map(|(name, ty)| Param {
        name: name.to_string(),
        ty,
    })
    .collect()
}
