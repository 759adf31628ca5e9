// signature.rs — Kernel signature bits and the per-kernel parameter plan
//
// The front-end validator records, for every exported kernel, a small
// bitset describing which parameter roles the kernel declares. Together with
// the kernel's formal parameter types and return type it determines how each
// formal is fed by the expanded function: as an input element, the output
// location, user data, or one of the special parameters.
//
// Preconditions: formals and return type come from the kernel's definition.
// Postconditions: a plan names exactly one role per formal, specials last in
//                 the fixed order Context, X, Y, Z.
// Failure modes: formal lists that contradict the signature bits produce
//                `PlanError`.
// Side effects: none.

use std::fmt;
use std::ops::BitOr;

use serde::Serialize;
use thiserror::Error;

use crate::driver_info::DRIVER_SLOTS;
use crate::types::Type;

// ── Signature bits ──────────────────────────────────────────────────────────

/// Parameter-role bitset recorded by the front-end for an exported kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct SignatureBits(u32);

impl SignatureBits {
    pub const INPUT: Self = Self(0x01);
    pub const OUTPUT: Self = Self(0x02);
    pub const USR_DATA: Self = Self(0x04);
    pub const X: Self = Self(0x08);
    pub const Y: Self = Self(0x10);
    pub const VALUE_KERNEL: Self = Self(0x20);
    pub const Z: Self = Self(0x40);
    pub const CONTEXT: Self = Self(0x80);

    pub fn from_raw(bits: u32) -> Self {
        Self(bits)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_value_kernel(self) -> bool {
        self.contains(Self::VALUE_KERNEL)
    }

    /// Signature assumed for a `root` function in a module without an
    /// export list: every role up to the formal count is present.
    pub fn for_unregistered_root(formal_count: usize) -> Self {
        let bits = 1u32
            .checked_shl(formal_count as u32)
            .map_or(u32::MAX, |b| b - 1);
        Self(bits)
    }

    /// Special parameters present, in formal-parameter order.
    pub fn special_params(self) -> Vec<SpecialParam> {
        SpecialParam::ORDER
            .into_iter()
            .filter(|s| self.contains(s.flag()))
            .collect()
    }
}

impl BitOr for SignatureBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for SignatureBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ── Special parameters ──────────────────────────────────────────────────────

/// Parameters whose value comes from the launch rather than from a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialParam {
    Context,
    X,
    Y,
    Z,
}

impl SpecialParam {
    const ORDER: [SpecialParam; 4] = [
        SpecialParam::Context,
        SpecialParam::X,
        SpecialParam::Y,
        SpecialParam::Z,
    ];

    pub fn flag(self) -> SignatureBits {
        match self {
            SpecialParam::Context => SignatureBits::CONTEXT,
            SpecialParam::X => SignatureBits::X,
            SpecialParam::Y => SignatureBits::Y,
            SpecialParam::Z => SignatureBits::Z,
        }
    }
}

impl fmt::Display for SpecialParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecialParam::Context => write!(f, "context"),
            SpecialParam::X => write!(f, "x"),
            SpecialParam::Y => write!(f, "y"),
            SpecialParam::Z => write!(f, "z"),
        }
    }
}

// ── Parameter plan ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStyle {
    /// Every data parameter is a pointer into a buffer element.
    Legacy,
    /// Inputs are passed by value; the output is returned (or written through
    /// a hidden struct-return pointer).
    Value,
}

/// Where one kernel formal gets its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    /// Element of input buffer `slot`.
    Input { slot: usize },
    /// Address of the output element.
    Output,
    UsrData,
    Special(SpecialParam),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedParam {
    pub role: ParamRole,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParameterPlan {
    pub style: KernelStyle,
    /// One entry per formal, in declaration order.
    pub params: Vec<PlannedParam>,
    /// Type of the value a value kernel returns as its output element.
    pub returned_output: Option<Type>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("kernel '{kernel}' has {formals} parameters but its signature names {specials} special parameters")]
    TooFewFormals {
        kernel: String,
        formals: usize,
        specials: usize,
    },
    #[error("kernel '{kernel}': data parameter {index} of a legacy kernel must be a pointer, found '{ty}'")]
    NonPointerData {
        kernel: String,
        index: usize,
        ty: Type,
    },
    #[error("kernel '{kernel}': special parameter '{param}' cannot have type '{ty}'")]
    BadSpecialType {
        kernel: String,
        param: SpecialParam,
        ty: Type,
    },
    #[error("kernel '{kernel}': value kernels cannot take user data")]
    UsrDataInValueKernel { kernel: String },
    #[error("kernel '{kernel}' has {count} inputs, at most {max} are supported")]
    TooManyInputs {
        kernel: String,
        count: usize,
        max: usize,
    },
    #[error("kernel '{kernel}': input flag disagrees with its {count} input parameters")]
    InputMismatch { kernel: String, count: usize },
    #[error("kernel '{kernel}': output flag disagrees with its parameters and return type")]
    OutputMismatch { kernel: String },
}

impl KernelParameterPlan {
    /// Build the plan for kernel `kernel` with the given formals and return type.
    pub fn build(
        kernel: &str,
        formals: &[Type],
        ret: &Type,
        bits: SignatureBits,
    ) -> Result<Self, PlanError> {
        let specials = bits.special_params();
        if formals.len() < specials.len() {
            return Err(PlanError::TooFewFormals {
                kernel: kernel.to_string(),
                formals: formals.len(),
                specials: specials.len(),
            });
        }
        let data_count = formals.len() - specials.len();
        let (data, special_formals) = formals.split_at(data_count);

        let mut params = Vec::with_capacity(formals.len());
        let returned_output = if bits.is_value_kernel() {
            plan_value_data(kernel, data, ret, bits, &mut params)?
        } else {
            plan_legacy_data(kernel, data, ret, bits, &mut params)?;
            None
        };

        for (param, ty) in specials.into_iter().zip(special_formals) {
            let ok = match param {
                SpecialParam::Context => ty.is_pointer(),
                SpecialParam::X | SpecialParam::Y | SpecialParam::Z => ty.is_int(32),
            };
            if !ok {
                return Err(PlanError::BadSpecialType {
                    kernel: kernel.to_string(),
                    param,
                    ty: ty.clone(),
                });
            }
            params.push(PlannedParam {
                role: ParamRole::Special(param),
                ty: ty.clone(),
            });
        }

        Ok(Self {
            style: if bits.is_value_kernel() {
                KernelStyle::Value
            } else {
                KernelStyle::Legacy
            },
            params,
            returned_output,
        })
    }

    /// Input formals as `(formal index, slot, type)`, in slot order.
    pub fn inputs(&self) -> impl Iterator<Item = (usize, usize, &Type)> + '_ {
        self.params
            .iter()
            .enumerate()
            .filter_map(|(i, p)| match p.role {
                ParamRole::Input { slot } => Some((i, slot, &p.ty)),
                _ => None,
            })
    }

    pub fn input_count(&self) -> usize {
        self.inputs().count()
    }

    /// Formal index and type of the pointer-passed output, if any.
    pub fn output_param(&self) -> Option<(usize, &Type)> {
        self.params
            .iter()
            .enumerate()
            .find(|(_, p)| p.role == ParamRole::Output)
            .map(|(i, p)| (i, &p.ty))
    }

    /// True when the kernel produces an output element in either form.
    pub fn has_output(&self) -> bool {
        self.returned_output.is_some() || self.output_param().is_some()
    }

    pub fn specials(&self) -> Vec<SpecialParam> {
        self.params
            .iter()
            .filter_map(|p| match p.role {
                ParamRole::Special(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

/// Legacy layout: inputs, output pointer, user data; all pointers.
fn plan_legacy_data(
    kernel: &str,
    data: &[Type],
    ret: &Type,
    bits: SignatureBits,
    params: &mut Vec<PlannedParam>,
) -> Result<(), PlanError> {
    let has_output = bits.contains(SignatureBits::OUTPUT);
    let has_usr = bits.contains(SignatureBits::USR_DATA);
    let fixed = has_output as usize + has_usr as usize;
    if data.len() < fixed || !ret.is_void() {
        return Err(PlanError::OutputMismatch {
            kernel: kernel.to_string(),
        });
    }
    for (index, ty) in data.iter().enumerate() {
        if !ty.is_pointer() {
            return Err(PlanError::NonPointerData {
                kernel: kernel.to_string(),
                index,
                ty: ty.clone(),
            });
        }
    }

    let input_count = data.len() - fixed;
    check_inputs(kernel, input_count, bits)?;

    let mut formals = data.iter();
    for (slot, ty) in formals.by_ref().take(input_count).enumerate() {
        params.push(PlannedParam {
            role: ParamRole::Input { slot },
            ty: ty.clone(),
        });
    }
    if has_output {
        if let Some(ty) = formals.next() {
            params.push(PlannedParam {
                role: ParamRole::Output,
                ty: ty.clone(),
            });
        }
    }
    if has_usr {
        if let Some(ty) = formals.next() {
            params.push(PlannedParam {
                role: ParamRole::UsrData,
                ty: ty.clone(),
            });
        }
    }
    Ok(())
}

/// Value layout: optional hidden struct-return pointer, then by-value inputs.
fn plan_value_data(
    kernel: &str,
    data: &[Type],
    ret: &Type,
    bits: SignatureBits,
    params: &mut Vec<PlannedParam>,
) -> Result<Option<Type>, PlanError> {
    if bits.contains(SignatureBits::USR_DATA) {
        return Err(PlanError::UsrDataInValueKernel {
            kernel: kernel.to_string(),
        });
    }
    let has_output = bits.contains(SignatureBits::OUTPUT);
    let mut inputs = data;
    let returned = match (has_output, ret.is_void()) {
        (true, false) => Some(ret.clone()),
        (false, true) => None,
        (true, true) => {
            // Struct-return lowering moved the result into the first formal.
            let Some((sret, rest)) = data.split_first().filter(|(t, _)| t.is_pointer()) else {
                return Err(PlanError::OutputMismatch {
                    kernel: kernel.to_string(),
                });
            };
            params.push(PlannedParam {
                role: ParamRole::Output,
                ty: sret.clone(),
            });
            inputs = rest;
            None
        }
        (false, false) => {
            return Err(PlanError::OutputMismatch {
                kernel: kernel.to_string(),
            })
        }
    };

    check_inputs(kernel, inputs.len(), bits)?;
    for (slot, ty) in inputs.iter().enumerate() {
        params.push(PlannedParam {
            role: ParamRole::Input { slot },
            ty: ty.clone(),
        });
    }
    Ok(returned)
}

fn check_inputs(kernel: &str, count: usize, bits: SignatureBits) -> Result<(), PlanError> {
    if bits.contains(SignatureBits::INPUT) != (count > 0) {
        return Err(PlanError::InputMismatch {
            kernel: kernel.to_string(),
            count,
        });
    }
    if count > DRIVER_SLOTS {
        return Err(PlanError::TooManyInputs {
            kernel: kernel.to_string(),
            count,
            max: DRIVER_SLOTS,
        });
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr(ty: Type) -> Type {
        ty.ptr_to()
    }

    #[test]
    fn bit_values() {
        let all = SignatureBits::INPUT
            | SignatureBits::OUTPUT
            | SignatureBits::USR_DATA
            | SignatureBits::X
            | SignatureBits::Y
            | SignatureBits::VALUE_KERNEL
            | SignatureBits::Z
            | SignatureBits::CONTEXT;
        assert_eq!(all.raw(), 0xff);
        assert_eq!(SignatureBits::from_raw(0x23).to_string(), "0x23");
        assert!(SignatureBits::from_raw(0x23).is_value_kernel());
    }

    #[test]
    fn unregistered_root_signature() {
        assert_eq!(SignatureBits::for_unregistered_root(0).raw(), 0);
        assert_eq!(SignatureBits::for_unregistered_root(2).raw(), 0x3);
        assert_eq!(SignatureBits::for_unregistered_root(5).raw(), 0x1f);
        assert_eq!(SignatureBits::for_unregistered_root(40).raw(), u32::MAX);
    }

    #[test]
    fn special_order_is_fixed() {
        let bits = SignatureBits::Z | SignatureBits::X | SignatureBits::CONTEXT;
        assert_eq!(
            bits.special_params(),
            vec![SpecialParam::Context, SpecialParam::X, SpecialParam::Z]
        );
    }

    #[test]
    fn legacy_in_out_usr_x_y() {
        let bits = SignatureBits::from_raw(0x1f);
        let formals = vec![
            ptr(Type::Float),
            ptr(Type::Float),
            Type::byte_ptr(),
            Type::i32(),
            Type::i32(),
        ];
        let plan = KernelParameterPlan::build("root", &formals, &Type::Void, bits).unwrap();
        assert_eq!(plan.style, KernelStyle::Legacy);
        let roles: Vec<_> = plan.params.iter().map(|p| p.role).collect();
        assert_eq!(
            roles,
            vec![
                ParamRole::Input { slot: 0 },
                ParamRole::Output,
                ParamRole::UsrData,
                ParamRole::Special(SpecialParam::X),
                ParamRole::Special(SpecialParam::Y),
            ]
        );
        assert_eq!(plan.output_param(), Some((1, &ptr(Type::Float))));
        assert!(plan.returned_output.is_none());
    }

    #[test]
    fn legacy_multiple_inputs() {
        let bits = SignatureBits::INPUT | SignatureBits::OUTPUT;
        let formals = vec![ptr(Type::i32()), ptr(Type::Float), ptr(Type::Double)];
        let plan = KernelParameterPlan::build("k", &formals, &Type::Void, bits).unwrap();
        let inputs: Vec<_> = plan.inputs().map(|(i, slot, _)| (i, slot)).collect();
        assert_eq!(inputs, vec![(0, 0), (1, 1)]);
        assert_eq!(plan.output_param().map(|(i, _)| i), Some(2));
    }

    #[test]
    fn legacy_rejects_by_value_data() {
        let bits = SignatureBits::INPUT | SignatureBits::OUTPUT;
        let err = KernelParameterPlan::build("k", &[Type::Float, ptr(Type::Float)], &Type::Void, bits)
            .unwrap_err();
        assert!(matches!(err, PlanError::NonPointerData { index: 0, .. }));
    }

    #[test]
    fn value_kernel_returning_output() {
        let bits = SignatureBits::from_raw(0x23);
        let plan = KernelParameterPlan::build("k", &[Type::i32()], &Type::i32(), bits).unwrap();
        assert_eq!(plan.style, KernelStyle::Value);
        assert_eq!(plan.returned_output, Some(Type::i32()));
        assert_eq!(plan.input_count(), 1);
        assert!(plan.output_param().is_none());
        assert!(plan.has_output());
    }

    #[test]
    fn value_kernel_with_struct_return_pointer() {
        let bits = SignatureBits::from_raw(0x23);
        let big = Type::named("struct.Big");
        let formals = vec![big.clone().ptr_to(), big.clone().ptr_to()];
        let plan = KernelParameterPlan::build("k", &formals, &Type::Void, bits).unwrap();
        assert_eq!(plan.params[0].role, ParamRole::Output);
        assert_eq!(plan.params[1].role, ParamRole::Input { slot: 0 });
        assert!(plan.returned_output.is_none());
    }

    #[test]
    fn value_kernel_rejects_user_data() {
        let bits = SignatureBits::from_raw(0x27);
        let err = KernelParameterPlan::build("k", &[Type::i32()], &Type::i32(), bits).unwrap_err();
        assert_eq!(
            err,
            PlanError::UsrDataInValueKernel {
                kernel: "k".to_string()
            }
        );
    }

    #[test]
    fn value_kernel_input_limit() {
        let bits = SignatureBits::from_raw(0x23);
        let formals = vec![Type::i32(); DRIVER_SLOTS + 1];
        let err = KernelParameterPlan::build("k", &formals, &Type::i32(), bits).unwrap_err();
        assert!(matches!(err, PlanError::TooManyInputs { count: 9, max: 8, .. }));
    }

    #[test]
    fn value_kernel_with_specials() {
        let bits = SignatureBits::VALUE_KERNEL
            | SignatureBits::INPUT
            | SignatureBits::OUTPUT
            | SignatureBits::CONTEXT
            | SignatureBits::X
            | SignatureBits::Y;
        let ctx = Type::named("struct.ctx").ptr_to();
        let formals = vec![Type::Float, ctx.clone(), Type::i32(), Type::i32()];
        let plan = KernelParameterPlan::build("k", &formals, &Type::Float, bits).unwrap();
        assert_eq!(
            plan.specials(),
            vec![SpecialParam::Context, SpecialParam::X, SpecialParam::Y]
        );
        assert_eq!(plan.params[1].ty, ctx);
    }

    #[test]
    fn special_types_are_checked() {
        let bits = SignatureBits::VALUE_KERNEL | SignatureBits::X;
        let err = KernelParameterPlan::build("k", &[Type::Float], &Type::Void, bits).unwrap_err();
        assert!(matches!(
            err,
            PlanError::BadSpecialType {
                param: SpecialParam::X,
                ..
            }
        ));
    }

    #[test]
    fn too_few_formals_for_specials() {
        let bits = SignatureBits::X | SignatureBits::Y;
        let err = KernelParameterPlan::build("k", &[Type::i32()], &Type::Void, bits).unwrap_err();
        assert!(matches!(err, PlanError::TooFewFormals { formals: 1, specials: 2, .. }));
    }

    #[test]
    fn input_flag_must_match() {
        let bits = SignatureBits::VALUE_KERNEL | SignatureBits::OUTPUT;
        let err = KernelParameterPlan::build("k", &[Type::i32()], &Type::i32(), bits).unwrap_err();
        assert!(matches!(err, PlanError::InputMismatch { count: 1, .. }));
    }

    #[test]
    fn plan_error_messages() {
        let err = PlanError::NonPointerData {
            kernel: "root".to_string(),
            index: 0,
            ty: Type::Float,
        };
        assert_eq!(
            err.to_string(),
            "kernel 'root': data parameter 0 of a legacy kernel must be a pointer, found 'float'"
        );
    }
}
