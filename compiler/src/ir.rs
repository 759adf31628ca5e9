// ir.rs — SSA module model the expansion pass reads and extends
//
// A `Module` owns named struct declarations, functions (definitions and
// declarations), the kernel export list produced by the front-end validator,
// and the module-wide aliasing domain of kernel memory accesses.
//
// Function bodies are arenas: instructions live in `Body::insts` and blocks
// hold ordered `InstId` lists. Every finished block ends with exactly one
// terminator (`br`, conditional `br`, or `ret`); `verify` checks this.

use std::collections::HashSet;

use serde::Serialize;

use crate::id::{BlockId, InstId};
use crate::signature::SignatureBits;
use crate::types::{Layout, PointerWidth, StructDef, StructTable, Type};

// ── Values ─────────────────────────────────────────────────────────────────

/// An SSA operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Formal parameter of the enclosing function, by position.
    Arg(u32),
    /// Result of an instruction in the enclosing function.
    Inst(InstId),
    /// Integer constant of the given bit width. Stored sign-extended.
    Int { bits: u32, value: i64 },
    /// Floating-point constant (`float` when `double` is false).
    Float { double: bool, value: f64 },
    /// Null pointer of the given pointer type.
    Null(Type),
    /// Address of a function in the module, by name.
    Global(String),
}

impl Value {
    pub fn i32(value: i64) -> Value {
        Value::Int { bits: 32, value }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int { value, .. } => Some(*value),
            _ => None,
        }
    }
}

// ── Instructions ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    FAdd,
    FMul,
}

impl BinOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::FAdd => "fadd",
            BinOp::FMul => "fmul",
        }
    }
}

/// Integer comparison predicates (unsigned where ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
}

impl CmpPred {
    pub fn mnemonic(self) -> &'static str {
        match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Ult => "ult",
            CmpPred::Ule => "ule",
        }
    }
}

/// Type-based alias analysis tag attached to a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TbaaTag {
    /// Access to element data inside a kernel buffer.
    Allocation,
    /// Load of a buffer base pointer from the driver info record.
    Pointer,
}

/// Aliasing metadata on loads, stores and copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemTags {
    pub tbaa: Option<TbaaTag>,
    /// Access belongs to the kernel-argument alias scope.
    pub arg_scope: bool,
}

impl MemTags {
    pub fn is_empty(&self) -> bool {
        self.tbaa.is_none() && !self.arg_scope
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Binary {
        op: BinOp,
        lhs: Value,
        rhs: Value,
        /// No-unsigned-wrap: the interpreter traps on unsigned overflow.
        nuw: bool,
    },
    ICmp {
        pred: CmpPred,
        lhs: Value,
        rhs: Value,
    },
    /// Stack slot of `ty`; result is `ty*`.
    Alloca {
        ty: Type,
        align: u64,
    },
    Load {
        ptr: Value,
    },
    Store {
        value: Value,
        ptr: Value,
    },
    MemCpy {
        dst: Value,
        src: Value,
        len: u64,
        align: u64,
    },
    /// Address of field `field` of the struct `base` points to.
    FieldAddr {
        base: Value,
        field: u32,
    },
    /// Address of element `index` of the array `base` points to.
    ElemAddr {
        base: Value,
        index: u32,
    },
    /// `base` advanced by `offset` bytes (offset zero-extended to pointer width).
    ByteOffset {
        base: Value,
        offset: Value,
    },
    /// Reinterpret `value` as the instruction's result type.
    BitCast {
        value: Value,
    },
    Phi {
        incoming: Vec<(Value, BlockId)>,
    },
    Call {
        callee: String,
        args: Vec<Value>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret {
        value: Option<Value>,
    },
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret { .. }
        )
    }

    /// True for instructions that read or write memory through a pointer operand.
    pub fn is_memory_access(&self) -> bool {
        matches!(
            self,
            InstKind::Load { .. } | InstKind::Store { .. } | InstKind::MemCpy { .. }
        )
    }

    /// All value operands, in printing order.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::ICmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Alloca { .. } | InstKind::Br { .. } => Vec::new(),
            InstKind::Load { ptr } => vec![ptr],
            InstKind::Store { value, ptr } => vec![value, ptr],
            InstKind::MemCpy { dst, src, .. } => vec![dst, src],
            InstKind::FieldAddr { base, .. } | InstKind::ElemAddr { base, .. } => vec![base],
            InstKind::ByteOffset { base, offset } => vec![base, offset],
            InstKind::BitCast { value } => vec![value],
            InstKind::Phi { incoming } => incoming.iter().map(|(v, _)| v).collect(),
            InstKind::Call { args, .. } => args.iter().collect(),
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Ret { value } => value.iter().collect(),
        }
    }

    /// Successor blocks of a terminator (empty for non-terminators and `ret`).
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br { target } => vec![*target],
            InstKind::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    /// SSA name without the `%` sigil; `None` for unnamed or void results.
    pub name: Option<String>,
    /// Result type (`void` for stores, branches, void calls).
    pub ty: Type,
    pub kind: InstKind,
    pub tags: MemTags,
}

// ── Blocks and functions ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub insts: Vec<InstId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    pub blocks: Vec<Block>,
    pub insts: Vec<Inst>,
}

impl Body {
    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.name == name)
            .map(|i| BlockId(i as u32))
    }

    /// Last instruction of a block, if it is a terminator.
    pub fn terminator(&self, block: BlockId) -> Option<&Inst> {
        let last = *self.block(block).insts.last()?;
        let inst = self.inst(last);
        inst.kind.is_terminator().then_some(inst)
    }

    /// All instructions in block order.
    pub fn iter_insts(&self) -> impl Iterator<Item = (InstId, &Inst)> + '_ {
        self.blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .map(move |id| (*id, self.inst(*id)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub linkage: Linkage,
    /// `None` for declarations.
    pub body: Option<Body>,
}

impl Function {
    /// New external definition with an empty body (no blocks yet).
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            linkage: Linkage::External,
            body: Some(Body::default()),
        }
    }

    /// New external declaration.
    pub fn declare(name: impl Into<String>, param_types: Vec<Type>, ret: Type) -> Self {
        let params = param_types
            .into_iter()
            .enumerate()
            .map(|(i, ty)| Param {
                name: format!("arg{}", i),
                ty,
            })
            .collect();
        Self {
            name: name.into(),
            params,
            ret,
            linkage: Linkage::External,
            body: None,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn param_types(&self) -> Vec<Type> {
        self.params.iter().map(|p| p.ty.clone()).collect()
    }

    /// Static type of an operand in this function.
    pub fn value_type(&self, value: &Value) -> Type {
        match value {
            Value::Arg(i) => self
                .params
                .get(*i as usize)
                .map(|p| p.ty.clone())
                .unwrap_or(Type::Void),
            Value::Inst(id) => self
                .body
                .as_ref()
                .and_then(|b| b.insts.get(id.index()))
                .map(|inst| inst.ty.clone())
                .unwrap_or(Type::Void),
            Value::Int { bits, .. } => Type::Int(*bits),
            Value::Float { double: true, .. } => Type::Double,
            Value::Float { double: false, .. } => Type::Float,
            Value::Null(ty) => ty.clone(),
            Value::Global(_) => Type::byte_ptr(),
        }
    }

    /// Every SSA name already bound in this function (parameters and instructions).
    pub fn bound_names(&self) -> HashSet<String> {
        let mut names: HashSet<String> = self.params.iter().map(|p| p.name.clone()).collect();
        if let Some(body) = &self.body {
            names.extend(body.insts.iter().filter_map(|i| i.name.clone()));
        }
        names
    }
}

// ── Kernel exports ─────────────────────────────────────────────────────────

/// One entry of the front-end's exported kernel list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelExport {
    pub name: String,
    pub signature: SignatureBits,
}

/// Aliasing relationship between kernel buffer accesses and ordinary C/C++
/// accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TbaaDomain {
    /// Kernel TBAA tree has its own root; everything may alias.
    #[default]
    Distinct,
    /// Kernel TBAA tree hangs under the C/C++ root; buffer accesses are
    /// distinguishable from every other access in the module.
    Shared,
}

// ── Module ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub pointer_width: PointerWidth,
    pub structs: StructTable,
    pub functions: Vec<Function>,
    /// Kernel export list in registration order. `None` for modules produced
    /// before signatures were recorded.
    pub exports: Option<Vec<KernelExport>>,
    /// Functions callable directly by the host besides kernel launches.
    pub invokables: Vec<String>,
    pub tbaa: TbaaDomain,
}

impl Module {
    pub fn new(pointer_width: PointerWidth) -> Self {
        Self {
            pointer_width,
            ..Self::default()
        }
    }

    pub fn layout(&self) -> Layout<'_> {
        Layout::new(self.pointer_width, &self.structs)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    /// Register a named struct unless one with that name already exists.
    pub fn ensure_struct(&mut self, name: &str, fields: Vec<Type>) {
        self.structs
            .entry(name.to_string())
            .or_insert(StructDef::Body(fields));
    }

    pub fn is_invokable(&self, name: &str) -> bool {
        self.invokables.iter().any(|n| n == name)
    }

    /// Number of places in the module that reference function `name`, either
    /// as a call target or as an address operand.
    pub fn use_count(&self, name: &str) -> usize {
        let mut uses = 0;
        for func in &self.functions {
            let Some(body) = &func.body else { continue };
            for inst in &body.insts {
                if let InstKind::Call { callee, .. } = &inst.kind {
                    if callee == name {
                        uses += 1;
                    }
                }
                uses += inst
                    .kind
                    .operands()
                    .into_iter()
                    .filter(|v| matches!(v, Value::Global(g) if g == name))
                    .count();
            }
        }
        uses
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn caller_of(callee: &str) -> Function {
        let mut f = Function::new("caller", vec![], Type::Void);
        let body = f.body.as_mut().unwrap();
        body.insts.push(Inst {
            name: None,
            ty: Type::Void,
            kind: InstKind::Call {
                callee: callee.to_string(),
                args: vec![],
            },
            tags: MemTags::default(),
        });
        body.insts.push(Inst {
            name: None,
            ty: Type::Void,
            kind: InstKind::Ret { value: None },
            tags: MemTags::default(),
        });
        body.blocks.push(Block {
            name: "entry".to_string(),
            insts: vec![InstId(0), InstId(1)],
        });
        f
    }

    #[test]
    fn use_count_sees_calls_and_address_operands() {
        let mut m = Module::new(PointerWidth::W64);
        m.functions.push(Function::declare("target", vec![], Type::Void));
        m.functions.push(caller_of("target"));
        assert_eq!(m.use_count("target"), 1);
        assert_eq!(m.use_count("other"), 0);

        let body = m.functions[1].body.as_mut().unwrap();
        body.insts[1].kind = InstKind::Ret {
            value: Some(Value::Global("target".to_string())),
        };
        assert_eq!(m.use_count("target"), 2);
    }

    #[test]
    fn terminator_lookup() {
        let f = caller_of("x");
        let body = f.body.as_ref().unwrap();
        let term = body.terminator(BlockId(0)).unwrap();
        assert!(matches!(term.kind, InstKind::Ret { value: None }));
    }

    #[test]
    fn value_types() {
        let f = Function::new(
            "k",
            vec![Param {
                name: "in".to_string(),
                ty: Type::Float,
            }],
            Type::Void,
        );
        assert_eq!(f.value_type(&Value::Arg(0)), Type::Float);
        assert_eq!(f.value_type(&Value::i32(3)), Type::i32());
        assert_eq!(f.value_type(&Value::Global("g".into())), Type::byte_ptr());
    }
}
