// interp.rs — Reference interpreter for IR modules
//
// Executes functions of a verified module against a flat little-endian byte
// memory, recording every call it makes. Used to check expanded functions
// against concrete driver-info records: which kernel invocations happen, with
// which arguments, and what ends up in the buffers.
//
// Preconditions: the module verifies.
// Postconditions: `calls()` lists every call executed, in order, including
//                 the outermost one.
// Failure modes: out-of-range memory accesses, calls to declarations,
//                missing phi arms, fuel exhaustion and runaway recursion
//                produce `InterpError`.
// Side effects: none outside the interpreter's own memory.

use thiserror::Error;

use crate::driver_info::DriverInfo;
use crate::id::BlockId;
use crate::ir::{BinOp, CmpPred, Function, InstKind, Module, Value};
use crate::types::{Layout, Type};

/// First address handed out; keeps 0 free for null.
const HEAP_BASE: u64 = 0x1000;
/// Addresses of functions taken as values.
const FUNCTION_BASE: u64 = 0xF000_0000;
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpError {
    #[error("no function named '@{0}'")]
    UnknownFunction(String),
    #[error("call to external function '@{0}'")]
    External(String),
    #[error("'@{function}' takes {expected} arguments, {found} given")]
    ArgCount {
        function: String,
        expected: usize,
        found: usize,
    },
    #[error("access of {len} bytes at {addr:#x} is outside memory")]
    OutOfBounds { addr: u64, len: u64 },
    #[error("in '@{function}': {message}")]
    BadOperand { function: String, message: String },
    #[error("type '{0}' has no known size")]
    Unsized(Type),
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),
    #[error("call depth limit exceeded")]
    CallDepth,
}

/// A run-time value.
#[derive(Debug, Clone, PartialEq)]
pub enum RtValue {
    Int { bits: u32, value: u64 },
    F32(f32),
    F64(f64),
    Ptr(u64),
    /// Raw bytes of a vector or aggregate.
    Bytes(Vec<u8>),
}

impl RtValue {
    pub fn i32(value: u32) -> RtValue {
        RtValue::Int {
            bits: 32,
            value: value as u64,
        }
    }

    /// Integer or pointer payload.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RtValue::Int { value, .. } | RtValue::Ptr(value) => Some(*value),
            _ => None,
        }
    }
}

fn mask(bits: u32, value: u64) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

fn sign_extend(bits: u32, value: u64) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

// ── Memory ──────────────────────────────────────────────────────────────────

/// Bump-allocated byte memory starting at `HEAP_BASE`.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    /// Reserve `size` zeroed bytes aligned to `align`; never returns null.
    pub fn alloc(&mut self, size: u64, align: u64) -> u64 {
        let align = align.max(1);
        let end = HEAP_BASE + self.bytes.len() as u64;
        let addr = end.div_ceil(align) * align;
        let new_len = (addr - HEAP_BASE + size.max(1)) as usize;
        self.bytes.resize(new_len, 0);
        addr
    }

    /// Allocate and fill a region.
    pub fn place(&mut self, data: &[u8], align: u64) -> u64 {
        let addr = self.alloc(data.len() as u64, align);
        let start = (addr - HEAP_BASE) as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        addr
    }

    fn range(&self, addr: u64, len: u64) -> Result<std::ops::Range<usize>, InterpError> {
        let oob = InterpError::OutOfBounds { addr, len };
        let start = addr.checked_sub(HEAP_BASE).ok_or(oob.clone())?;
        let end = start.checked_add(len).ok_or(oob.clone())?;
        if end > self.bytes.len() as u64 {
            return Err(oob);
        }
        Ok(start as usize..end as usize)
    }

    pub fn read(&self, addr: u64, len: u64) -> Result<&[u8], InterpError> {
        let r = self.range(addr, len)?;
        Ok(&self.bytes[r])
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), InterpError> {
        let r = self.range(addr, data.len() as u64)?;
        self.bytes[r].copy_from_slice(data);
        Ok(())
    }

    pub fn read_u32s(&self, addr: u64, count: usize) -> Result<Vec<u32>, InterpError> {
        let raw = self.read(addr, 4 * count as u64)?;
        Ok(raw
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn place_u32s(&mut self, values: &[u32]) -> u64 {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.place(&data, 4)
    }
}

// ── Interpreter ─────────────────────────────────────────────────────────────

/// One executed call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub function: String,
    pub args: Vec<RtValue>,
}

enum Flow {
    Next,
    Jump(BlockId),
    Return(Option<RtValue>),
}

struct Frame<'f> {
    func: &'f Function,
    args: Vec<RtValue>,
    values: Vec<Option<RtValue>>,
}

pub struct Interpreter<'m> {
    module: &'m Module,
    pub memory: Memory,
    calls: Vec<CallRecord>,
    steps: u64,
    step_limit: u64,
    depth: usize,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            memory: Memory::default(),
            calls: Vec::new(),
            steps: 0,
            step_limit: 1_000_000,
            depth: 0,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    /// Calls to `name`, in execution order.
    pub fn calls_to<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a CallRecord> + 'a {
        self.calls.iter().filter(move |c| c.function == name)
    }

    fn layout(&self) -> Layout<'m> {
        self.module.layout()
    }

    /// Place `info` in memory and run expanded function `name` over
    /// `[start, end)`. Returns the driver-info record's address.
    pub fn run_expanded(
        &mut self,
        name: &str,
        info: &DriverInfo,
        start: u32,
        end: u32,
        outstep: u32,
    ) -> Result<u64, InterpError> {
        let image = info.encode(self.module.pointer_width);
        let addr = self.memory.place(&image, 8);
        self.call(
            name,
            vec![
                RtValue::Ptr(addr),
                RtValue::i32(start),
                RtValue::i32(end),
                RtValue::i32(outstep),
            ],
        )?;
        Ok(addr)
    }

    /// Call function `name` with `args`.
    pub fn call(&mut self, name: &str, args: Vec<RtValue>) -> Result<Option<RtValue>, InterpError> {
        let module = self.module;
        let func = module
            .function(name)
            .ok_or_else(|| InterpError::UnknownFunction(name.to_string()))?;
        if args.len() != func.params.len() {
            return Err(InterpError::ArgCount {
                function: name.to_string(),
                expected: func.params.len(),
                found: args.len(),
            });
        }
        self.calls.push(CallRecord {
            function: name.to_string(),
            args: args.clone(),
        });
        if func.is_declaration() {
            return Err(InterpError::External(name.to_string()));
        }
        if self.depth >= MAX_DEPTH {
            return Err(InterpError::CallDepth);
        }
        self.depth += 1;
        let result = self.execute(func, args);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, func: &'m Function, args: Vec<RtValue>) -> Result<Option<RtValue>, InterpError> {
        let Some(body) = &func.body else {
            return Err(InterpError::External(func.name.clone()));
        };
        let mut frame = Frame {
            func,
            args,
            values: vec![None; body.insts.len()],
        };
        let mut current = BlockId(0);
        let mut prev: Option<BlockId> = None;
        loop {
            let block = body
                .blocks
                .get(current.index())
                .ok_or_else(|| bad(func, format!("no block {}", current.index())))?;

            // Phis read their inputs simultaneously on block entry.
            let phi_count = block
                .insts
                .iter()
                .take_while(|id| matches!(body.inst(**id).kind, InstKind::Phi { .. }))
                .count();
            let mut incoming_values = Vec::with_capacity(phi_count);
            for id in &block.insts[..phi_count] {
                let InstKind::Phi { incoming } = &body.inst(*id).kind else {
                    continue;
                };
                let from = prev.ok_or_else(|| bad(func, "phi in entry block".to_string()))?;
                let (v, _) = incoming
                    .iter()
                    .find(|(_, b)| *b == from)
                    .ok_or_else(|| bad(func, format!("phi has no arm for block {}", from.index())))?;
                incoming_values.push((*id, self.operand(&frame, v)?));
            }
            for (id, v) in incoming_values {
                frame.values[id.index()] = Some(v);
            }

            let mut next = None;
            for id in &block.insts[phi_count..] {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(InterpError::StepLimit(self.step_limit));
                }
                match self.step(&mut frame, *id)? {
                    Flow::Next => {}
                    Flow::Jump(target) => {
                        next = Some(target);
                        break;
                    }
                    Flow::Return(v) => return Ok(v),
                }
            }
            let Some(target) = next else {
                return Err(bad(func, format!("block '{}' fell through", block.name)));
            };
            prev = Some(current);
            current = target;
        }
    }

    fn step(&mut self, frame: &mut Frame<'m>, id: crate::id::InstId) -> Result<Flow, InterpError> {
        let func = frame.func;
        let Some(body) = &func.body else {
            return Err(InterpError::External(func.name.clone()));
        };
        let inst = body.inst(id);
        let layout = self.layout();
        let result = match &inst.kind {
            InstKind::Binary { op, lhs, rhs, .. } => {
                let (l, r) = (self.operand(frame, lhs)?, self.operand(frame, rhs)?);
                Some(binary(func, *op, l, r)?)
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                let l = self.int_operand(frame, lhs)?;
                let r = self.int_operand(frame, rhs)?;
                let holds = match pred {
                    CmpPred::Eq => l == r,
                    CmpPred::Ne => l != r,
                    CmpPred::Ult => l < r,
                    CmpPred::Ule => l <= r,
                };
                Some(RtValue::Int {
                    bits: 1,
                    value: holds as u64,
                })
            }
            InstKind::Alloca { ty, align } => {
                let size = layout
                    .alloc_size(ty)
                    .ok_or_else(|| InterpError::Unsized(ty.clone()))?;
                Some(RtValue::Ptr(self.memory.alloc(size, *align)))
            }
            InstKind::Load { ptr } => {
                let addr = self.int_operand(frame, ptr)?;
                Some(self.read_typed(&inst.ty, addr)?)
            }
            InstKind::Store { value, ptr } => {
                let ty = func.value_type(value);
                let v = self.operand(frame, value)?;
                let addr = self.int_operand(frame, ptr)?;
                self.write_typed(&ty, addr, &v)?;
                None
            }
            InstKind::MemCpy { dst, src, len, .. } => {
                let d = self.int_operand(frame, dst)?;
                let s = self.int_operand(frame, src)?;
                let data = self.memory.read(s, *len)?.to_vec();
                self.memory.write(d, &data)?;
                None
            }
            InstKind::FieldAddr { base, field } => {
                let b = self.int_operand(frame, base)?;
                let record = func.value_type(base);
                let offset = record
                    .pointee()
                    .and_then(|r| layout.field_offset(r, *field as usize))
                    .ok_or_else(|| bad(func, format!("fieldaddr {} of '{}'", field, record)))?;
                Some(RtValue::Ptr(b.wrapping_add(offset)))
            }
            InstKind::ElemAddr { base, index } => {
                let b = self.int_operand(frame, base)?;
                let array = func.value_type(base);
                let stride = match array.pointee() {
                    Some(Type::Array(elem, _)) => layout.alloc_size(elem),
                    _ => None,
                }
                .ok_or_else(|| bad(func, format!("elemaddr {} of '{}'", index, array)))?;
                Some(RtValue::Ptr(b.wrapping_add(stride * *index as u64)))
            }
            InstKind::ByteOffset { base, offset } => {
                let b = self.int_operand(frame, base)?;
                let bits = match func.value_type(offset) {
                    Type::Int(bits) => bits,
                    other => return Err(bad(func, format!("byteoffset by '{}'", other))),
                };
                let off = sign_extend(bits, self.int_operand(frame, offset)?);
                Some(RtValue::Ptr(b.wrapping_add_signed(off)))
            }
            InstKind::BitCast { value } => {
                let v = self.operand(frame, value)?;
                Some(bitcast(func, v, &inst.ty)?)
            }
            InstKind::Phi { .. } => return Err(bad(func, "phi after non-phi".to_string())),
            InstKind::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|a| self.operand(frame, a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(callee, args)?
            }
            InstKind::Br { target } => return Ok(Flow::Jump(*target)),
            InstKind::CondBr {
                cond,
                then_block,
                else_block,
            } => {
                let taken = if self.int_operand(frame, cond)? != 0 {
                    *then_block
                } else {
                    *else_block
                };
                return Ok(Flow::Jump(taken));
            }
            InstKind::Ret { value } => {
                let v = value.as_ref().map(|v| self.operand(frame, v)).transpose()?;
                return Ok(Flow::Return(v));
            }
        };
        if let Some(v) = result {
            frame.values[id.index()] = Some(v);
        }
        Ok(Flow::Next)
    }

    fn operand(&self, frame: &Frame<'_>, v: &Value) -> Result<RtValue, InterpError> {
        Ok(match v {
            Value::Arg(i) => frame
                .args
                .get(*i as usize)
                .cloned()
                .ok_or_else(|| bad(frame.func, format!("no argument {}", i)))?,
            Value::Inst(id) => frame
                .values
                .get(id.index())
                .cloned()
                .flatten()
                .ok_or_else(|| bad(frame.func, format!("value %{} used before definition", id.index())))?,
            Value::Int { bits, value } => RtValue::Int {
                bits: *bits,
                value: mask(*bits, *value as u64),
            },
            Value::Float { double: true, value } => RtValue::F64(*value),
            Value::Float { double: false, value } => RtValue::F32(*value as f32),
            Value::Null(_) => RtValue::Ptr(0),
            Value::Global(name) => {
                let index = self
                    .module
                    .functions
                    .iter()
                    .position(|f| &f.name == name)
                    .ok_or_else(|| InterpError::UnknownFunction(name.clone()))?;
                RtValue::Ptr(FUNCTION_BASE + 16 * index as u64)
            }
        })
    }

    fn int_operand(&self, frame: &Frame<'_>, v: &Value) -> Result<u64, InterpError> {
        self.operand(frame, v)?
            .as_u64()
            .ok_or_else(|| bad(frame.func, "expected an integer or pointer operand".to_string()))
    }

    fn read_typed(&self, ty: &Type, addr: u64) -> Result<RtValue, InterpError> {
        let layout = self.layout();
        let size = layout
            .store_size(ty)
            .ok_or_else(|| InterpError::Unsized(ty.clone()))?;
        let raw = self.memory.read(addr, size)?;
        let mut word = [0u8; 8];
        let n = raw.len().min(8);
        word[..n].copy_from_slice(&raw[..n]);
        let scalar = u64::from_le_bytes(word);
        Ok(match ty {
            Type::Int(bits) => RtValue::Int {
                bits: *bits,
                value: mask(*bits, scalar),
            },
            Type::Float => RtValue::F32(f32::from_bits(scalar as u32)),
            Type::Double => RtValue::F64(f64::from_bits(scalar)),
            Type::Ptr(_) => RtValue::Ptr(scalar),
            _ => RtValue::Bytes(raw.to_vec()),
        })
    }

    fn write_typed(&mut self, ty: &Type, addr: u64, v: &RtValue) -> Result<(), InterpError> {
        let size = self
            .layout()
            .store_size(ty)
            .ok_or_else(|| InterpError::Unsized(ty.clone()))? as usize;
        let data = match v {
            RtValue::Int { value, .. } | RtValue::Ptr(value) => value.to_le_bytes()[..size.min(8)].to_vec(),
            RtValue::F32(f) => f.to_le_bytes().to_vec(),
            RtValue::F64(f) => f.to_le_bytes().to_vec(),
            RtValue::Bytes(bytes) => bytes.clone(),
        };
        self.memory.write(addr, &data)
    }
}

fn bad(func: &Function, message: String) -> InterpError {
    InterpError::BadOperand {
        function: func.name.clone(),
        message,
    }
}

fn binary(func: &Function, op: BinOp, l: RtValue, r: RtValue) -> Result<RtValue, InterpError> {
    Ok(match (op, l, r) {
        (BinOp::FAdd, RtValue::F32(a), RtValue::F32(b)) => RtValue::F32(a + b),
        (BinOp::FMul, RtValue::F32(a), RtValue::F32(b)) => RtValue::F32(a * b),
        (BinOp::FAdd, RtValue::F64(a), RtValue::F64(b)) => RtValue::F64(a + b),
        (BinOp::FMul, RtValue::F64(a), RtValue::F64(b)) => RtValue::F64(a * b),
        (op, RtValue::Int { bits, value: a }, RtValue::Int { value: b, .. }) => {
            let value = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::FAdd | BinOp::FMul => {
                    return Err(bad(func, format!("{} on integers", op.mnemonic())))
                }
            };
            RtValue::Int {
                bits,
                value: mask(bits, value),
            }
        }
        (op, l, r) => {
            return Err(bad(
                func,
                format!("{} on {:?} and {:?}", op.mnemonic(), l, r),
            ))
        }
    })
}

fn bitcast(func: &Function, v: RtValue, to: &Type) -> Result<RtValue, InterpError> {
    Ok(match (v, to) {
        (RtValue::Ptr(p), Type::Ptr(_)) => RtValue::Ptr(p),
        (RtValue::Int { value, .. }, Type::Float) => RtValue::F32(f32::from_bits(value as u32)),
        (RtValue::Int { value, .. }, Type::Double) => RtValue::F64(f64::from_bits(value)),
        (RtValue::F32(f), Type::Int(bits)) => RtValue::Int {
            bits: *bits,
            value: f.to_bits() as u64,
        },
        (RtValue::F64(f), Type::Int(bits)) => RtValue::Int {
            bits: *bits,
            value: f.to_bits(),
        },
        (v @ (RtValue::Int { .. } | RtValue::F32(_) | RtValue::F64(_)), _) => v,
        (v, to) => return Err(bad(func, format!("bitcast of {:?} to '{}'", v, to))),
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::resolve::resolve;

    fn load(source: &str) -> Module {
        let parsed = parse(source);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let resolved = resolve(&parsed.module.unwrap());
        assert!(resolved.diagnostics.is_empty(), "{:#?}", resolved.diagnostics);
        resolved.module
    }

    #[test]
    fn memory_never_hands_out_null() {
        let mut m = Memory::default();
        let a = m.alloc(0, 1);
        let b = m.alloc(4, 16);
        assert!(a >= HEAP_BASE);
        assert!(b > a);
        assert_eq!(b % 16, 0);
        assert!(m.read(0, 1).is_err());
    }

    #[test]
    fn counting_loop() {
        let m = load(
            "\
define i32 @count(i32 %n) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %i.next = add i32 %i, 1
  %more = icmp ult i32 %i.next, %n
  br i1 %more, label %loop, label %done
done:
  ret i32 %i.next
}
",
        );
        let mut interp = Interpreter::new(&m);
        let r = interp.call("count", vec![RtValue::i32(5)]).unwrap();
        assert_eq!(r, Some(RtValue::i32(5)));
    }

    #[test]
    fn loads_stores_and_fields() {
        let m = load(
            "\
%struct.P = type { i8, i32 }

define i32 @bump(%struct.P* %p) {
entry:
  %f = fieldaddr %struct.P* %p, 1
  %v = load i32, i32* %f
  %w = add i32 %v, 1
  store i32 %w, i32* %f
  ret i32 %w
}
",
        );
        let mut interp = Interpreter::new(&m);
        let p = interp.memory.place_u32s(&[0, 41]);
        let r = interp.call("bump", vec![RtValue::Ptr(p)]).unwrap();
        assert_eq!(r, Some(RtValue::i32(42)));
        assert_eq!(interp.memory.read_u32s(p, 2).unwrap(), [0, 42]);
    }

    #[test]
    fn negative_byte_offset() {
        let m = load(
            "\
define i8* @back(i8* %p) {
entry:
  %q = byteoffset i8* %p, i32 -4
  ret i8* %q
}
",
        );
        let mut interp = Interpreter::new(&m);
        let r = interp.call("back", vec![RtValue::Ptr(0x2000)]).unwrap();
        assert_eq!(r, Some(RtValue::Ptr(0x1ffc)));
    }

    #[test]
    fn external_calls_are_errors() {
        let m = load("declare void @ext(i32 %x)\n");
        let mut interp = Interpreter::new(&m);
        assert_eq!(
            interp.call("ext", vec![RtValue::i32(1)]),
            Err(InterpError::External("ext".to_string()))
        );
        assert_eq!(interp.calls().len(), 1);
    }

    #[test]
    fn runaway_loop_hits_step_limit() {
        let m = load(
            "\
define void @spin() {
entry:
  br label %entry.loop
entry.loop:
  br label %entry.loop
}
",
        );
        let mut interp = Interpreter::new(&m).with_step_limit(100);
        assert_eq!(interp.call("spin", vec![]), Err(InterpError::StepLimit(100)));
    }
}
