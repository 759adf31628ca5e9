// AST node types for kernel IR (.kir) text.
//
// A direct syntactic image of the textual module form: names are still
// strings and operand types are as written. `resolve` turns this into an
// `ir::Module`, binding names to arena ids and checking every reference.
// Every node that can be the subject of an error carries a `SimpleSpan`.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::ir::{BinOp, CmpPred};
use crate::types::{PointerWidth, Type};

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// A name with its source location (sigil stripped).
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Root ──

/// A complete module: a sequence of top-level items.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleAst {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// `target ptr32|ptr64`
    Target(PointerWidth),
    /// `tbaa shared`
    TbaaShared,
    /// `%name = type { ... }` or `%name = type opaque` (`None`).
    StructDecl { name: Ident, body: Option<Vec<Type>> },
    /// `export foreach @name <bits>`
    ExportKernel { name: Ident, bits: u32 },
    /// `export func @name`
    ExportFunc { name: Ident },
    /// `define ...` or `declare ...`
    Function(FunctionAst),
}

// ── Functions ──

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionAst {
    pub name: Ident,
    pub internal: bool,
    pub ret: Type,
    pub params: Vec<ParamAst>,
    /// `None` for `declare`.
    pub blocks: Option<Vec<BlockAst>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamAst {
    pub ty: Type,
    /// Declarations may omit parameter names.
    pub name: Option<Ident>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockAst {
    pub label: Ident,
    pub insts: Vec<InstAst>,
}

// ── Instructions ──

#[derive(Debug, Clone, PartialEq)]
pub struct InstAst {
    pub result: Option<Ident>,
    pub op: OpAst,
    /// Metadata suffixes (`tbaa.allocation`, `scope.args`, ...).
    pub tags: Vec<Ident>,
    pub span: Span,
}

/// Operand as written, before its type is known.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandKind {
    Local(String),
    Global(String),
    Int(i64),
    Float(f64),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub kind: OperandKind,
    pub span: Span,
}

/// Operand with an explicit type written in front of it.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedOperand {
    pub ty: Type,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpAst {
    Binary {
        op: BinOp,
        nuw: bool,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    ICmp {
        pred: CmpPred,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
    },
    Alloca {
        ty: Type,
        align: u64,
    },
    Load {
        ty: Type,
        ptr: TypedOperand,
    },
    Store {
        value: TypedOperand,
        ptr: TypedOperand,
    },
    MemCpy {
        dst: TypedOperand,
        src: TypedOperand,
        len: u64,
        align: u64,
    },
    FieldAddr {
        base: TypedOperand,
        index: u32,
    },
    ElemAddr {
        base: TypedOperand,
        index: u32,
    },
    ByteOffset {
        base: TypedOperand,
        offset: TypedOperand,
    },
    BitCast {
        value: TypedOperand,
        to: Type,
    },
    Phi {
        ty: Type,
        incoming: Vec<(Operand, Ident)>,
    },
    Call {
        ret: Type,
        callee: Ident,
        args: Vec<TypedOperand>,
    },
    Br {
        target: Ident,
    },
    CondBr {
        cond: TypedOperand,
        then_label: Ident,
        else_label: Ident,
    },
    /// `ret void` has `value: None`.
    Ret {
        ty: Type,
        value: Option<Operand>,
    },
}
