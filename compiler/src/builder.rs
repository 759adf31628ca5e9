// builder.rs — Imperative construction of function bodies
//
// `FunctionBuilder` appends instructions at the end of a current block and
// infers each result type from its operands, so callers only name the
// operation. Value and block names are made unique within the function by
// suffixing `.1`, `.2`, ... on collision.
//
// Preconditions: the function being built has a body (is a definition).
// Postconditions: every instruction is appended to exactly one block.
// Failure modes: misuse (no current block, loading through a non-pointer,
//                field index out of range) is a construction bug and panics.
// Side effects: none.

use std::collections::HashSet;

use crate::id::{BlockId, InstId};
use crate::ir::{BinOp, Block, Body, CmpPred, Function, Inst, InstKind, MemTags, Value};
use crate::types::{Layout, Type};

pub struct FunctionBuilder<'f, 'l> {
    func: &'f mut Function,
    layout: Layout<'l>,
    value_names: HashSet<String>,
    block_names: HashSet<String>,
    current: Option<BlockId>,
}

fn unique(taken: &mut HashSet<String>, base: &str) -> String {
    let mut name = base.to_string();
    let mut n = 0;
    while taken.contains(&name) {
        n += 1;
        name = format!("{}.{}", base, n);
    }
    taken.insert(name.clone());
    name
}

impl<'f, 'l> FunctionBuilder<'f, 'l> {
    pub fn new(func: &'f mut Function, layout: Layout<'l>) -> Self {
        assert!(func.body.is_some(), "builder needs a function definition");
        let value_names = func.bound_names();
        let block_names = func
            .body
            .iter()
            .flat_map(|b| b.blocks.iter().map(|blk| blk.name.clone()))
            .collect();
        Self {
            func,
            layout,
            value_names,
            block_names,
            current: None,
        }
    }

    fn body(&mut self) -> &mut Body {
        self.func
            .body
            .as_mut()
            .expect("builder needs a function definition")
    }

    pub fn function(&self) -> &Function {
        self.func
    }

    /// Append an empty block; the builder's position does not change.
    pub fn append_block(&mut self, name: &str) -> BlockId {
        let name = unique(&mut self.block_names, name);
        let body = self.body();
        let id = BlockId(body.blocks.len() as u32);
        body.blocks.push(Block {
            name,
            insts: Vec::new(),
        });
        id
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> BlockId {
        self.current.expect("builder has no current block")
    }

    pub fn value_type(&self, value: &Value) -> Type {
        self.func.value_type(value)
    }

    fn push(&mut self, name: Option<&str>, ty: Type, kind: InstKind, tags: MemTags) -> InstId {
        let block = self.current_block();
        let name = name.map(|n| unique(&mut self.value_names, n));
        let body = self.body();
        let id = InstId(body.insts.len() as u32);
        body.insts.push(Inst {
            name,
            ty,
            kind,
            tags,
        });
        body.blocks[block.index()].insts.push(id);
        id
    }

    fn push_value(&mut self, name: &str, ty: Type, kind: InstKind, tags: MemTags) -> Value {
        Value::Inst(self.push(Some(name), ty, kind, tags))
    }

    fn pointee_of(&self, ptr: &Value) -> Type {
        self.value_type(ptr)
            .pointee()
            .cloned()
            .expect("operand is not a pointer")
    }

    // ── Arithmetic ──

    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value, nuw: bool, name: &str) -> Value {
        let ty = self.value_type(&lhs);
        self.push_value(
            name,
            ty,
            InstKind::Binary { op, lhs, rhs, nuw },
            MemTags::default(),
        )
    }

    pub fn icmp(&mut self, pred: CmpPred, lhs: Value, rhs: Value, name: &str) -> Value {
        self.push_value(
            name,
            Type::i1(),
            InstKind::ICmp { pred, lhs, rhs },
            MemTags::default(),
        )
    }

    // ── Memory ──

    pub fn alloca(&mut self, ty: Type, align: u64, name: &str) -> Value {
        let ptr = ty.clone().ptr_to();
        self.push_value(name, ptr, InstKind::Alloca { ty, align }, MemTags::default())
    }

    pub fn load(&mut self, ptr: Value, tags: MemTags, name: &str) -> Value {
        let ty = self.pointee_of(&ptr);
        self.push_value(name, ty, InstKind::Load { ptr }, tags)
    }

    pub fn store(&mut self, value: Value, ptr: Value, tags: MemTags) -> InstId {
        self.push(None, Type::Void, InstKind::Store { value, ptr }, tags)
    }

    pub fn memcpy(&mut self, dst: Value, src: Value, len: u64, align: u64, tags: MemTags) -> InstId {
        self.push(
            None,
            Type::Void,
            InstKind::MemCpy {
                dst,
                src,
                len,
                align,
            },
            tags,
        )
    }

    // ── Addressing ──

    pub fn field_addr(&mut self, base: Value, field: u32, name: &str) -> Value {
        let record = self.pointee_of(&base);
        let ty = self
            .layout
            .field_type(&record, field as usize)
            .cloned()
            .expect("field index out of range");
        self.push_value(
            name,
            ty.ptr_to(),
            InstKind::FieldAddr { base, field },
            MemTags::default(),
        )
    }

    pub fn elem_addr(&mut self, base: Value, index: u32, name: &str) -> Value {
        let elem = match self.pointee_of(&base) {
            Type::Array(elem, _) => *elem,
            other => panic!("elemaddr through non-array '{}'", other),
        };
        self.push_value(
            name,
            elem.ptr_to(),
            InstKind::ElemAddr { base, index },
            MemTags::default(),
        )
    }

    pub fn byte_offset(&mut self, base: Value, offset: Value, name: &str) -> Value {
        let ty = self.value_type(&base);
        self.push_value(
            name,
            ty,
            InstKind::ByteOffset { base, offset },
            MemTags::default(),
        )
    }

    /// Reinterpret `value` as `ty`; returns `value` unchanged when it
    /// already has that type.
    pub fn bitcast(&mut self, value: Value, ty: Type, name: &str) -> Value {
        if self.value_type(&value) == ty {
            return value;
        }
        self.push_value(name, ty, InstKind::BitCast { value }, MemTags::default())
    }

    // ── Control flow ──

    pub fn phi(&mut self, ty: Type, name: &str) -> Value {
        self.push_value(
            name,
            ty,
            InstKind::Phi {
                incoming: Vec::new(),
            },
            MemTags::default(),
        )
    }

    pub fn add_incoming(&mut self, phi: &Value, value: Value, block: BlockId) {
        let Value::Inst(id) = phi else {
            panic!("add_incoming on a non-instruction value")
        };
        let id = *id;
        match &mut self.body().insts[id.index()].kind {
            InstKind::Phi { incoming } => incoming.push((value, block)),
            _ => panic!("add_incoming on a non-phi instruction"),
        }
    }

    /// Direct call. Returns the result value, or `None` for void callees.
    pub fn call(&mut self, callee: &str, ret: Type, args: Vec<Value>, name: &str) -> Option<Value> {
        let kind = InstKind::Call {
            callee: callee.to_string(),
            args,
        };
        if ret.is_void() {
            self.push(None, Type::Void, kind, MemTags::default());
            None
        } else {
            Some(self.push_value(name, ret, kind, MemTags::default()))
        }
    }

    pub fn br(&mut self, target: BlockId) {
        self.push(None, Type::Void, InstKind::Br { target }, MemTags::default());
    }

    pub fn cond_br(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) {
        self.push(
            None,
            Type::Void,
            InstKind::CondBr {
                cond,
                then_block,
                else_block,
            },
            MemTags::default(),
        );
    }

    pub fn ret(&mut self, value: Option<Value>) {
        self.push(None, Type::Void, InstKind::Ret { value }, MemTags::default());
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Param;
    use crate::types::{PointerWidth, StructDef, StructTable};

    fn table() -> StructTable {
        let mut t = StructTable::new();
        t.insert(
            "struct.P".to_string(),
            StructDef::Body(vec![Type::Float, Type::Array(Box::new(Type::i32()), 2)]),
        );
        t
    }

    #[test]
    fn names_are_made_unique() {
        let t = table();
        let mut f = Function::new(
            "f",
            vec![Param {
                name: "x".to_string(),
                ty: Type::i32(),
            }],
            Type::Void,
        );
        let mut b = FunctionBuilder::new(&mut f, Layout::new(PointerWidth::W64, &t));
        let entry = b.append_block("entry");
        let again = b.append_block("entry");
        b.position_at_end(entry);
        let x1 = b.binary(BinOp::Add, Value::Arg(0), Value::i32(1), false, "x");
        let x2 = b.binary(BinOp::Add, x1, Value::i32(1), false, "x");
        b.ret(None);
        let _ = (again, x2);

        let body = f.body.as_ref().unwrap();
        assert_eq!(body.blocks[1].name, "entry.1");
        assert_eq!(body.insts[0].name.as_deref(), Some("x.1"));
        assert_eq!(body.insts[1].name.as_deref(), Some("x.2"));
        assert_eq!(body.insts[2].name, None);
        assert_eq!(body.blocks[0].insts.len(), 3);
    }

    #[test]
    fn result_types_are_inferred() {
        let t = table();
        let p = Type::named("struct.P");
        let mut f = Function::new(
            "f",
            vec![Param {
                name: "p".to_string(),
                ty: p.clone().ptr_to(),
            }],
            Type::Void,
        );
        let mut b = FunctionBuilder::new(&mut f, Layout::new(PointerWidth::W64, &t));
        let entry = b.append_block("entry");
        b.position_at_end(entry);
        let arr = b.field_addr(Value::Arg(0), 1, "arr");
        let e = b.elem_addr(arr.clone(), 1, "e");
        let v = b.load(e.clone(), MemTags::default(), "v");
        let raw = b.bitcast(e.clone(), Type::byte_ptr(), "raw");
        let same = b.bitcast(raw.clone(), Type::byte_ptr(), "same");
        assert_eq!(b.value_type(&arr), Type::Array(Box::new(Type::i32()), 2).ptr_to());
        assert_eq!(b.value_type(&e), Type::i32().ptr_to());
        assert_eq!(b.value_type(&v), Type::i32());
        assert_eq!(same, raw);
    }

    #[test]
    fn phi_incoming_is_appended() {
        let t = table();
        let mut f = Function::new("f", vec![], Type::Void);
        let mut b = FunctionBuilder::new(&mut f, Layout::new(PointerWidth::W64, &t));
        let entry = b.append_block("entry");
        let next = b.append_block("next");
        b.position_at_end(entry);
        b.br(next);
        b.position_at_end(next);
        let iv = b.phi(Type::i32(), "iv");
        b.add_incoming(&iv, Value::i32(0), entry);
        b.ret(None);

        let body = f.body.as_ref().unwrap();
        assert_eq!(
            body.insts[1].kind,
            InstKind::Phi {
                incoming: vec![(Value::i32(0), BlockId(0))]
            }
        );
    }

    #[test]
    fn void_call_has_no_result() {
        let t = table();
        let mut f = Function::new("f", vec![], Type::Void);
        let mut b = FunctionBuilder::new(&mut f, Layout::new(PointerWidth::W64, &t));
        let entry = b.append_block("entry");
        b.position_at_end(entry);
        assert!(b.call("g", Type::Void, vec![], "r").is_none());
        assert!(b.call("h", Type::i32(), vec![], "r").is_some());
    }
}
