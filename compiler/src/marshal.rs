// marshal.rs — Feeding kernel formals from the driver-info record
//
// Runs in two phases against one expanded function. `prepare` emits the
// loop-invariant part into the entry block: buffer base pointers, strides,
// aggregate copy slots, user data, context and the Y/Z coordinates.
// `emit_iteration` emits the per-element part into the loop body: element
// addresses, operand loads or copies, the kernel call and the store of a
// returned output.
//
// Element address for input `i` at iteration `iv`:
//
//   inPtr[i] + (iv - start) * step_i
//
// and likewise for the output with `outPtr[0]` and the output step.
//
// Preconditions: the builder is positioned in the entry block; the plan was
//                built for the kernel named here.
// Postconditions: the call passes one argument per formal, in declared order.
// Failure modes: element types without a known size produce
//                `ExpandError::UnsizedElement`.
// Side effects: none.

use serde::Serialize;

use crate::abi::{self, AbiShape};
use crate::builder::FunctionBuilder;
use crate::driver_info::{dims_field, field};
use crate::expand::ExpandError;
use crate::ir::{BinOp, MemTags, TbaaTag, Value};
use crate::signature::{KernelParameterPlan, ParamRole, SpecialParam};
use crate::step::{resolve_step, StepKind, StepValue};
use crate::types::{Layout, Type};

/// Parameter positions of every expanded function.
pub const INFO_ARG: u32 = 0;
pub const START_ARG: u32 = 1;
pub const END_ARG: u32 = 2;
pub const OUTSTEP_ARG: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshalOptions {
    pub static_steps: bool,
    pub tbaa: bool,
}

/// Metadata attached to emitted memory accesses.
#[derive(Debug, Clone, Copy)]
struct Tagging {
    tbaa: bool,
}

impl Tagging {
    /// Buffer element accesses.
    fn element(self) -> MemTags {
        MemTags {
            tbaa: self.tbaa.then_some(TbaaTag::Allocation),
            arg_scope: true,
        }
    }

    /// Loads of buffer base pointers.
    fn base_pointer(self) -> MemTags {
        MemTags {
            tbaa: self.tbaa.then_some(TbaaTag::Pointer),
            arg_scope: true,
        }
    }

    /// Other reads of the driver-info record.
    fn record(self) -> MemTags {
        MemTags {
            tbaa: None,
            arg_scope: true,
        }
    }
}

struct AggregateCopy {
    slot: Value,
    raw: Value,
    len: u64,
    align: u64,
}

struct InputFeed {
    slot: usize,
    formal_ty: Type,
    shape: AbiShape,
    base: Value,
    step: StepValue,
    /// Type the raw element address is cast to.
    elem_ptr: Type,
    copy: Option<AggregateCopy>,
}

struct OutputFeed {
    base: Value,
    step: StepValue,
    ptr_ty: Type,
}

/// Per-input decisions, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSummary {
    pub slot: usize,
    #[serde(rename = "type")]
    pub ty: String,
    pub shape: AbiShape,
    pub step: StepKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "form", rename_all = "lowercase")]
pub enum OutputSummary {
    None,
    /// Written by the kernel through a pointer formal.
    Pointer { step: StepKind },
    /// Returned by the kernel and stored by the expanded function.
    Returned { step: StepKind },
}

pub struct Marshaller<'p> {
    kernel: &'p str,
    kernel_ret: &'p Type,
    plan: &'p KernelParameterPlan,
    tags: Tagging,
    inputs: Vec<InputFeed>,
    output: Option<OutputFeed>,
    /// Loop-invariant argument per formal (user data, context, Y, Z).
    invariant: Vec<Option<Value>>,
}

impl<'p> Marshaller<'p> {
    /// Emit the loop-invariant setup at the builder's position.
    pub fn prepare(
        b: &mut FunctionBuilder<'_, '_>,
        layout: &Layout<'_>,
        kernel: &'p str,
        kernel_ret: &'p Type,
        plan: &'p KernelParameterPlan,
        options: MarshalOptions,
    ) -> Result<Self, ExpandError> {
        let info = Value::Arg(INFO_ARG);
        let tags = Tagging { tbaa: options.tbaa };

        let mut inputs = Vec::with_capacity(plan.input_count());
        let mut base_table: Option<Value> = None;
        let mut stride_table: Option<Value> = None;
        for (_, slot, ty) in plan.inputs() {
            let shape = abi::classify(ty, plan.style);
            let elem_ptr = match shape {
                AbiShape::PlainValue => ty.clone().ptr_to(),
                AbiShape::PlainPointer | AbiShape::HiddenPointerToAggregate => ty.clone(),
            };
            if shape == AbiShape::PlainValue && !layout.is_sized(ty) {
                return Err(unsized_element(kernel, format!("input {}", slot), ty));
            }

            let table = base_table
                .get_or_insert_with(|| b.field_addr(info.clone(), field::IN_PTR, "in.ptrs"))
                .clone();
            let addr = b.elem_addr(table, slot as u32, &format!("in{}.ptr.addr", slot));
            let base = b.load(addr, tags.base_pointer(), &format!("in{}.base", slot));

            let step = resolve_step(layout, options.static_steps, &elem_ptr, || {
                let table = stride_table
                    .get_or_insert_with(|| {
                        b.field_addr(info.clone(), field::IN_STRIDE, "in.strides")
                    })
                    .clone();
                let addr = b.elem_addr(table, slot as u32, &format!("in{}.stride.addr", slot));
                b.load(addr, tags.record(), &format!("in{}.stride", slot))
            });

            let copy = match (shape, elem_ptr.pointee()) {
                (AbiShape::HiddenPointerToAggregate, Some(pointee)) => {
                    let (Some(len), Some(align)) =
                        (layout.store_size(pointee), layout.abi_align(pointee))
                    else {
                        return Err(unsized_element(kernel, format!("input {}", slot), pointee));
                    };
                    let slot_ptr = b.alloca(pointee.clone(), align, &format!("in{}.copy", slot));
                    let raw = b.bitcast(
                        slot_ptr.clone(),
                        Type::byte_ptr(),
                        &format!("in{}.copy.raw", slot),
                    );
                    Some(AggregateCopy {
                        slot: slot_ptr,
                        raw,
                        len,
                        align,
                    })
                }
                _ => None,
            };

            inputs.push(InputFeed {
                slot,
                formal_ty: ty.clone(),
                shape,
                base,
                step,
                elem_ptr,
                copy,
            });
        }

        let out_ptr_ty = plan
            .output_param()
            .map(|(_, ty)| ty.clone())
            .or_else(|| plan.returned_output.clone().map(Type::ptr_to));
        let output = match out_ptr_ty {
            Some(ptr_ty) => {
                if let Some(elem) = &plan.returned_output {
                    if !layout.is_sized(elem) {
                        return Err(unsized_element(kernel, "output".to_string(), elem));
                    }
                }
                let table = b.field_addr(info.clone(), field::OUT_PTR, "out.ptrs");
                let addr = b.elem_addr(table, 0, "out.ptr.addr");
                let base = b.load(addr, tags.base_pointer(), "out.base");
                let step = resolve_step(layout, options.static_steps, &ptr_ty, || {
                    Value::Arg(OUTSTEP_ARG)
                });
                Some(OutputFeed { base, step, ptr_ty })
            }
            None => None,
        };

        let mut current: Option<Value> = None;
        let mut invariant = Vec::with_capacity(plan.params.len());
        for p in &plan.params {
            let value = match p.role {
                ParamRole::UsrData => {
                    let addr = b.field_addr(info.clone(), field::USR, "usr.addr");
                    let raw = b.load(addr, tags.base_pointer(), "usr.raw");
                    Some(b.bitcast(raw, p.ty.clone(), "usr"))
                }
                ParamRole::Special(SpecialParam::Context) => {
                    Some(b.bitcast(info.clone(), p.ty.clone(), "ctx"))
                }
                ParamRole::Special(axis @ (SpecialParam::Y | SpecialParam::Z)) => {
                    let (index, name) = match axis {
                        SpecialParam::Y => (dims_field::Y, "y"),
                        _ => (dims_field::Z, "z"),
                    };
                    let dims = current
                        .get_or_insert_with(|| b.field_addr(info.clone(), field::CURRENT, "current"))
                        .clone();
                    let addr = b.field_addr(dims, index, &format!("{}.addr", name));
                    Some(b.load(addr, tags.record(), name))
                }
                ParamRole::Input { .. }
                | ParamRole::Output
                | ParamRole::Special(SpecialParam::X) => None,
            };
            invariant.push(value);
        }

        Ok(Self {
            kernel,
            kernel_ret,
            plan,
            tags,
            inputs,
            output,
            invariant,
        })
    }

    /// Emit one element's worth of work at the builder's position; `iv` is
    /// the current index.
    pub fn emit_iteration(&self, b: &mut FunctionBuilder<'_, '_>, iv: Value) {
        let idx = b.binary(BinOp::Sub, iv.clone(), Value::Arg(START_ARG), false, "idx");

        let out_ptr = self.output.as_ref().map(|out| {
            let off = b.binary(BinOp::Mul, idx.clone(), out.step.as_value(), false, "out.off");
            let raw = b.byte_offset(out.base.clone(), off, "out.addr");
            b.bitcast(raw, out.ptr_ty.clone(), "out.ptr")
        });

        let mut args = Vec::with_capacity(self.plan.params.len());
        for (p, invariant) in self.plan.params.iter().zip(&self.invariant) {
            let arg = match (p.role, invariant) {
                (_, Some(v)) => v.clone(),
                (ParamRole::Input { slot }, None) => self.input_arg(b, &self.inputs[slot], &idx),
                (ParamRole::Output, None) => match &out_ptr {
                    Some(ptr) => ptr.clone(),
                    None => unreachable!("output formal without an output feed"),
                },
                (ParamRole::Special(SpecialParam::X), None) => iv.clone(),
                (role, None) => unreachable!("{:?} has no loop-invariant value", role),
            };
            args.push(arg);
        }

        let result = b.call(self.kernel, self.kernel_ret.clone(), args, "result");
        if self.plan.returned_output.is_some() {
            if let (Some(value), Some(ptr)) = (result, out_ptr) {
                b.store(value, ptr, self.tags.element());
            }
        }
    }

    fn input_arg(&self, b: &mut FunctionBuilder<'_, '_>, feed: &InputFeed, idx: &Value) -> Value {
        let slot = feed.slot;
        let off = b.binary(
            BinOp::Mul,
            idx.clone(),
            feed.step.as_value(),
            false,
            &format!("in{}.off", slot),
        );
        let raw = b.byte_offset(feed.base.clone(), off, &format!("in{}.addr", slot));
        match (&feed.shape, &feed.copy) {
            (AbiShape::HiddenPointerToAggregate, Some(copy)) => {
                b.memcpy(copy.raw.clone(), raw, copy.len, copy.align, self.tags.element());
                copy.slot.clone()
            }
            (AbiShape::PlainValue, _) => {
                let ptr = b.bitcast(raw, feed.elem_ptr.clone(), &format!("in{}.ptr", slot));
                b.load(ptr, self.tags.element(), &format!("in{}", slot))
            }
            _ => b.bitcast(raw, feed.elem_ptr.clone(), &format!("in{}.ptr", slot)),
        }
    }

    pub fn input_summaries(&self) -> Vec<InputSummary> {
        self.inputs
            .iter()
            .map(|f| InputSummary {
                slot: f.slot,
                ty: f.formal_ty.to_string(),
                shape: f.shape,
                step: f.step.kind(),
            })
            .collect()
    }

    pub fn output_summary(&self) -> OutputSummary {
        match &self.output {
            None => OutputSummary::None,
            Some(out) if self.plan.returned_output.is_some() => OutputSummary::Returned {
                step: out.step.kind(),
            },
            Some(out) => OutputSummary::Pointer {
                step: out.step.kind(),
            },
        }
    }
}

fn unsized_element(kernel: &str, what: String, ty: &Type) -> ExpandError {
    ExpandError::UnsizedElement {
        kernel: kernel.to_string(),
        what,
        ty: ty.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, InstKind, Module, Param};
    use crate::loops::LoopBlocks;
    use crate::signature::SignatureBits;
    use crate::types::PointerWidth;

    /// Expand `kernel_ty -> ret` by hand and return the expanded function.
    fn expand_by_hand(formals: Vec<Type>, ret: Type, bits: u32, options: MarshalOptions) -> Function {
        let mut module = Module::new(PointerWidth::W64);
        module.ensure_struct("struct.Big", vec![Type::i64(), Type::i64(), Type::i64()]);
        let info = crate::driver_info::declare(&mut module).unwrap();
        let plan = KernelParameterPlan::build("k", &formals, &ret, SignatureBits::from_raw(bits)).unwrap();
        let params = [
            ("info", info.ptr_to()),
            ("start", Type::i32()),
            ("end", Type::i32()),
            ("outstep", Type::i32()),
        ]
        .into_iter()
        .map(|(n, ty)| Param {
            name: n.to_string(),
            ty,
        })
        .collect();
        let mut f = Function::new("k.expand", params, Type::Void);
        let layout = module.layout();
        let mut b = FunctionBuilder::new(&mut f, layout);
        let blocks = LoopBlocks::create(&mut b);
        let m = Marshaller::prepare(&mut b, &layout, "k", &ret, &plan, options).unwrap();
        let lp = blocks.open(&mut b, Value::Arg(START_ARG), Value::Arg(END_ARG));
        m.emit_iteration(&mut b, lp.iv.clone());
        lp.close(&mut b);
        f
    }

    fn kinds_in(f: &Function, block: &str) -> Vec<&'static str> {
        let body = f.body.as_ref().unwrap();
        let id = body.block_by_name(block).unwrap();
        body.block(id)
            .insts
            .iter()
            .map(|i| match &body.inst(*i).kind {
                InstKind::Load { .. } => "load",
                InstKind::Store { .. } => "store",
                InstKind::MemCpy { .. } => "memcpy",
                InstKind::Alloca { .. } => "alloca",
                InstKind::Call { .. } => "call",
                InstKind::BitCast { .. } => "bitcast",
                InstKind::ByteOffset { .. } => "byteoffset",
                InstKind::FieldAddr { .. } => "fieldaddr",
                InstKind::ElemAddr { .. } => "elemaddr",
                InstKind::Binary { .. } => "binary",
                _ => "other",
            })
            .collect()
    }

    const ON: MarshalOptions = MarshalOptions {
        static_steps: true,
        tbaa: true,
    };

    #[test]
    fn value_kernel_loads_and_stores() {
        let f = expand_by_hand(vec![Type::i32()], Type::i32(), 0x23, ON);
        let body = kinds_in(&f, "loop.body");
        assert_eq!(
            body,
            [
                "binary", "binary", "byteoffset", "bitcast", "binary", "byteoffset", "bitcast",
                "load", "call", "store", "binary", "other"
            ]
        );
    }

    #[test]
    fn aggregate_is_copied_into_entry_slot() {
        let big = Type::named("struct.Big").ptr_to();
        let f = expand_by_hand(vec![big], Type::i32(), 0x23, ON);
        let entry = kinds_in(&f, "entry");
        assert!(entry.contains(&"alloca"));
        assert!(kinds_in(&f, "loop.body").contains(&"memcpy"));
        assert!(!kinds_in(&f, "loop.body").contains(&"alloca"));
    }

    #[test]
    fn dynamic_strides_are_loop_invariant_loads() {
        let off = MarshalOptions {
            static_steps: false,
            tbaa: true,
        };
        let f = expand_by_hand(vec![Type::i32()], Type::i32(), 0x23, off);
        let body = f.body.as_ref().unwrap();
        let stride_in_entry = body.blocks[0]
            .insts
            .iter()
            .any(|i| body.inst(*i).name.as_deref() == Some("in0.stride"));
        assert!(stride_in_entry);
    }

    #[test]
    fn pointer_loads_carry_pointer_tag() {
        let f = expand_by_hand(vec![Type::i32()], Type::i32(), 0x23, ON);
        let body = f.body.as_ref().unwrap();
        let base = body
            .insts
            .iter()
            .find(|i| i.name.as_deref() == Some("in0.base"))
            .unwrap();
        assert_eq!(base.tags.tbaa, Some(TbaaTag::Pointer));
        assert!(base.tags.arg_scope);
        let elem = body
            .insts
            .iter()
            .find(|i| i.name.as_deref() == Some("in0"))
            .unwrap();
        assert_eq!(elem.tags.tbaa, Some(TbaaTag::Allocation));
    }

    #[test]
    fn tbaa_off_keeps_scope_only() {
        let off = MarshalOptions {
            static_steps: true,
            tbaa: false,
        };
        let f = expand_by_hand(vec![Type::i32()], Type::i32(), 0x23, off);
        let body = f.body.as_ref().unwrap();
        for inst in body.insts.iter().filter(|i| i.kind.is_memory_access()) {
            assert_eq!(inst.tags.tbaa, None);
            assert!(inst.tags.arg_scope);
        }
    }

    #[test]
    fn y_is_loaded_once_before_the_loop() {
        // in, x, y
        let f = expand_by_hand(
            vec![Type::i32(), Type::i32(), Type::i32()],
            Type::i32(),
            0x23 | 0x08 | 0x10,
            ON,
        );
        let body = f.body.as_ref().unwrap();
        let y_loads: Vec<_> = body
            .iter_insts()
            .filter(|(_, i)| i.name.as_deref() == Some("y"))
            .collect();
        assert_eq!(y_loads.len(), 1);
        assert!(body.blocks[0].insts.contains(&y_loads[0].0));
    }
}
