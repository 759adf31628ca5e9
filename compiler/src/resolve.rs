// resolve.rs — Name resolution for kernel IR text
//
// Walks the parsed AST and builds an `ir::Module`: binds value, block,
// function and struct names to their definitions, types every literal
// operand from the type written in front of it, and checks that each named
// operand's definition has the type the text claims.
//
// Preconditions: `ast` is a well-formed AST from the parser.
// Postconditions: returns the module plus all accumulated diagnostics. The
//                 module is only meaningful when no error was reported.
// Failure modes: unknown names, duplicate definitions, operand type mismatches
//                and misplaced metadata produce `Diagnostic` entries.
//                Resolution continues past errors.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::*;
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::id::{BlockId, InstId};
use crate::ir::{
    Block, Body, Function, Inst, InstKind, KernelExport, Linkage, MemTags, Module, Param,
    TbaaDomain, TbaaTag, Value,
};
use crate::signature::SignatureBits;
use crate::types::{Layout, StructDef, Type};

// ── Public types ────────────────────────────────────────────────────────────

/// Result of name resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Resolve all names in a parsed module.
pub fn resolve(ast: &ModuleAst) -> ResolveResult {
    let mut ctx = ResolveCtx::new();

    // Pass 1: module header, structs, function signatures, exports
    ctx.collect_globals(ast);

    // Pass 2: function bodies
    ctx.resolve_bodies(ast);

    ResolveResult {
        module: ctx.module,
        diagnostics: ctx.diagnostics,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

struct ResolveCtx {
    module: Module,
    diagnostics: Vec<Diagnostic>,
    /// Function name → span of its first definition.
    function_spans: HashMap<String, Span>,
    struct_spans: HashMap<String, Span>,
}

/// Names visible inside one function body.
struct Scope {
    values: HashMap<String, (Value, Type)>,
    blocks: HashMap<String, BlockId>,
}

impl ResolveCtx {
    fn new() -> Self {
        ResolveCtx {
            module: Module::default(),
            diagnostics: Vec::new(),
            function_spans: HashMap::new(),
            struct_spans: HashMap::new(),
        }
    }

    fn error(&mut self, code: DiagCode, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::error(span, message).with_code(code));
    }

    // ── Pass 1: collect globals ─────────────────────────────────────────

    fn collect_globals(&mut self, ast: &ModuleAst) {
        for item in &ast.items {
            match &item.kind {
                ItemKind::Target(width) => self.module.pointer_width = *width,
                ItemKind::TbaaShared => self.module.tbaa = TbaaDomain::Shared,
                ItemKind::StructDecl { name, body } => {
                    if let Some(first) = self.struct_spans.get(&name.name).copied() {
                        self.diagnostics.push(
                            Diagnostic::error(name.span, format!("duplicate struct '%{}'", name.name))
                                .with_code(codes::E0200)
                                .with_related(first, "first declared here"),
                        );
                        continue;
                    }
                    self.struct_spans.insert(name.name.clone(), name.span);
                    let def = match body {
                        Some(fields) => StructDef::Body(fields.clone()),
                        None => StructDef::Opaque,
                    };
                    self.module.structs.insert(name.name.clone(), def);
                }
                ItemKind::Function(f) => self.collect_function(f),
                ItemKind::ExportKernel { .. } | ItemKind::ExportFunc { .. } => {}
            }
        }

        // Exports may precede the functions they name.
        let mut kernels = Vec::new();
        for item in &ast.items {
            match &item.kind {
                ItemKind::ExportKernel { name, bits } => {
                    if !self.check_function_exists(name) {
                        continue;
                    }
                    if kernels.iter().any(|k: &KernelExport| k.name == name.name) {
                        self.error(
                            codes::E0200,
                            name.span,
                            format!("kernel '@{}' exported twice", name.name),
                        );
                        continue;
                    }
                    kernels.push(KernelExport {
                        name: name.name.clone(),
                        signature: SignatureBits::from_raw(*bits),
                    });
                }
                ItemKind::ExportFunc { name } => {
                    if self.check_function_exists(name) && !self.module.is_invokable(&name.name) {
                        self.module.invokables.push(name.name.clone());
                    }
                }
                _ => {}
            }
        }
        if !kernels.is_empty() {
            self.module.exports = Some(kernels);
        }

        // Struct references are checked once every declaration is known.
        for item in &ast.items {
            match &item.kind {
                ItemKind::StructDecl {
                    body: Some(fields),
                    ..
                } => {
                    for field in fields {
                        self.check_type(field, item.span);
                    }
                }
                ItemKind::Function(f) => {
                    self.check_type(&f.ret, f.name.span);
                    for p in &f.params {
                        self.check_type(&p.ty, p.name.as_ref().map_or(f.name.span, |n| n.span));
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_function(&mut self, f: &FunctionAst) {
        if let Some(first) = self.function_spans.get(&f.name.name).copied() {
            self.diagnostics.push(
                Diagnostic::error(f.name.span, format!("duplicate function '@{}'", f.name.name))
                    .with_code(codes::E0200)
                    .with_related(first, "first defined here"),
            );
            return;
        }
        self.function_spans.insert(f.name.name.clone(), f.name.span);

        let params = f
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| Param {
                name: p
                    .name
                    .as_ref()
                    .map_or_else(|| format!("arg{}", i), |n| n.name.clone()),
                ty: p.ty.clone(),
            })
            .collect();
        self.module.functions.push(Function {
            name: f.name.name.clone(),
            params,
            ret: f.ret.clone(),
            linkage: if f.internal {
                Linkage::Internal
            } else {
                Linkage::External
            },
            body: f.blocks.as_ref().map(|_| Body::default()),
        });
    }

    fn check_function_exists(&mut self, name: &Ident) -> bool {
        if self.module.function(&name.name).is_some() {
            return true;
        }
        self.error(
            codes::E0202,
            name.span,
            format!("undefined function '@{}'", name.name),
        );
        false
    }

    /// Report every named struct in `ty` that has no declaration.
    fn check_type(&mut self, ty: &Type, span: Span) {
        match ty {
            Type::Named(name) => {
                if !self.module.structs.contains_key(name) {
                    self.error(codes::E0203, span, format!("undefined struct '%{}'", name));
                }
            }
            Type::Ptr(inner) | Type::Vector(inner, _) | Type::Array(inner, _) => {
                self.check_type(inner, span)
            }
            Type::Struct(fields) => {
                for field in fields {
                    self.check_type(field, span);
                }
            }
            Type::Void | Type::Int(_) | Type::Float | Type::Double => {}
        }
    }

    // ── Pass 2: function bodies ─────────────────────────────────────────

    fn resolve_bodies(&mut self, ast: &ModuleAst) {
        for item in &ast.items {
            let ItemKind::Function(f) = &item.kind else {
                continue;
            };
            let Some(blocks) = &f.blocks else { continue };
            // Only the first definition of a name was registered.
            if self.function_spans.get(&f.name.name) != Some(&f.name.span) {
                continue;
            }
            let body = self.resolve_function(f, blocks);
            if let Some(func) = self.module.function_mut(&f.name.name) {
                func.body = Some(body);
            }
        }
    }

    fn resolve_function(&mut self, f: &FunctionAst, blocks: &[BlockAst]) -> Body {
        let mut scope = Scope {
            values: HashMap::new(),
            blocks: HashMap::new(),
        };

        for (i, block) in blocks.iter().enumerate() {
            if scope.blocks.contains_key(&block.label.name) {
                self.error(
                    codes::E0200,
                    block.label.span,
                    format!("duplicate block label '{}'", block.label.name),
                );
                continue;
            }
            scope
                .blocks
                .insert(block.label.name.clone(), BlockId(i as u32));
        }

        for (i, p) in f.params.iter().enumerate() {
            let Some(name) = &p.name else { continue };
            if scope.values.contains_key(&name.name) {
                self.error(
                    codes::E0200,
                    name.span,
                    format!("duplicate value '%{}'", name.name),
                );
                continue;
            }
            scope
                .values
                .insert(name.name.clone(), (Value::Arg(i as u32), p.ty.clone()));
        }

        // Result types are known from the text alone, so every name can be
        // bound before any operand is resolved (phis refer forward).
        let mut result_types = Vec::new();
        let mut next = 0u32;
        for inst in blocks.iter().flat_map(|b| b.insts.iter()) {
            let id = InstId(next);
            next += 1;
            let (ty, typed) = match result_type(&self.module.layout(), &inst.op) {
                Ok(ty) => (ty, true),
                Err(message) => {
                    self.error(codes::E0206, inst.span, message);
                    (Type::Void, false)
                }
            };
            self.check_op_types(&inst.op, inst.span);
            if let Some(result) = &inst.result {
                if !typed {
                    // Already reported; leave the name unbound.
                } else if ty.is_void() {
                    self.error(
                        codes::E0206,
                        result.span,
                        format!("'%{}' names an instruction that produces no value", result.name),
                    );
                } else if scope.values.contains_key(&result.name) {
                    self.error(
                        codes::E0200,
                        result.span,
                        format!("duplicate value '%{}'", result.name),
                    );
                } else {
                    scope
                        .values
                        .insert(result.name.clone(), (Value::Inst(id), ty.clone()));
                }
            }
            result_types.push(ty);
        }

        let mut body = Body::default();
        let mut types = result_types.into_iter();
        for block in blocks {
            let mut ids = Vec::with_capacity(block.insts.len());
            for inst in &block.insts {
                let ty = types.next().unwrap_or(Type::Void);
                let kind = self.resolve_op(&scope, &inst.op, &f.ret);
                let tags = self.resolve_tags(inst, &kind);
                ids.push(InstId(body.insts.len() as u32));
                body.insts.push(Inst {
                    name: inst.result.as_ref().map(|r| r.name.clone()),
                    ty,
                    kind,
                    tags,
                });
            }
            body.blocks.push(Block {
                name: block.label.name.clone(),
                insts: ids,
            });
        }
        body
    }

    /// Struct references inside the types an instruction writes.
    fn check_op_types(&mut self, op: &OpAst, span: Span) {
        let written: Vec<&Type> = match op {
            OpAst::Binary { ty, .. } | OpAst::ICmp { ty, .. } | OpAst::Phi { ty, .. } => vec![ty],
            OpAst::Alloca { ty, .. } => vec![ty],
            OpAst::Load { ty, ptr } => vec![ty, &ptr.ty],
            OpAst::Store { value, ptr } => vec![&value.ty, &ptr.ty],
            OpAst::MemCpy { dst, src, .. } => vec![&dst.ty, &src.ty],
            OpAst::FieldAddr { base, .. } | OpAst::ElemAddr { base, .. } => vec![&base.ty],
            OpAst::ByteOffset { base, offset } => vec![&base.ty, &offset.ty],
            OpAst::BitCast { value, to } => vec![&value.ty, to],
            OpAst::Call { ret, args, .. } => {
                let mut tys = vec![ret];
                tys.extend(args.iter().map(|a| &a.ty));
                tys
            }
            OpAst::CondBr { cond, .. } => vec![&cond.ty],
            OpAst::Ret { ty, .. } => vec![ty],
            OpAst::Br { .. } => Vec::new(),
        };
        for ty in written {
            self.check_type(ty, span);
        }
    }

    fn resolve_op(&mut self, scope: &Scope, op: &OpAst, fn_ret: &Type) -> InstKind {
        match op {
            OpAst::Binary {
                op,
                nuw,
                ty,
                lhs,
                rhs,
            } => InstKind::Binary {
                op: *op,
                lhs: self.operand(scope, lhs, ty),
                rhs: self.operand(scope, rhs, ty),
                nuw: *nuw,
            },
            OpAst::ICmp { pred, ty, lhs, rhs } => InstKind::ICmp {
                pred: *pred,
                lhs: self.operand(scope, lhs, ty),
                rhs: self.operand(scope, rhs, ty),
            },
            OpAst::Alloca { ty, align } => InstKind::Alloca {
                ty: ty.clone(),
                align: *align,
            },
            OpAst::Load { ptr, .. } => InstKind::Load {
                ptr: self.typed(scope, ptr),
            },
            OpAst::Store { value, ptr } => InstKind::Store {
                value: self.typed(scope, value),
                ptr: self.typed(scope, ptr),
            },
            OpAst::MemCpy {
                dst,
                src,
                len,
                align,
            } => InstKind::MemCpy {
                dst: self.typed(scope, dst),
                src: self.typed(scope, src),
                len: *len,
                align: *align,
            },
            OpAst::FieldAddr { base, index } => InstKind::FieldAddr {
                base: self.typed(scope, base),
                field: *index,
            },
            OpAst::ElemAddr { base, index } => InstKind::ElemAddr {
                base: self.typed(scope, base),
                index: *index,
            },
            OpAst::ByteOffset { base, offset } => InstKind::ByteOffset {
                base: self.typed(scope, base),
                offset: self.typed(scope, offset),
            },
            OpAst::BitCast { value, .. } => InstKind::BitCast {
                value: self.typed(scope, value),
            },
            OpAst::Phi { ty, incoming } => InstKind::Phi {
                incoming: incoming
                    .iter()
                    .map(|(v, label)| (self.operand(scope, v, ty), self.block(scope, label)))
                    .collect(),
            },
            OpAst::Call { ret, callee, args } => {
                self.check_call(callee, ret, args);
                InstKind::Call {
                    callee: callee.name.clone(),
                    args: args.iter().map(|a| self.typed(scope, a)).collect(),
                }
            }
            OpAst::Br { target } => InstKind::Br {
                target: self.block(scope, target),
            },
            OpAst::CondBr {
                cond,
                then_label,
                else_label,
            } => InstKind::CondBr {
                cond: self.typed(scope, cond),
                then_block: self.block(scope, then_label),
                else_block: self.block(scope, else_label),
            },
            OpAst::Ret { ty, value } => {
                let span = value.as_ref().map(|v| v.span);
                if ty != fn_ret {
                    if let Some(span) = span {
                        self.error(
                            codes::E0204,
                            span,
                            format!("return of '{}' from a function returning '{}'", ty, fn_ret),
                        );
                    }
                }
                InstKind::Ret {
                    value: value.as_ref().map(|v| self.operand(scope, v, ty)),
                }
            }
        }
    }

    fn check_call(&mut self, callee: &Ident, ret: &Type, args: &[TypedOperand]) {
        let Some(target) = self.module.function(&callee.name) else {
            self.error(
                codes::E0202,
                callee.span,
                format!("undefined function '@{}'", callee.name),
            );
            return;
        };
        let expected = target.param_types();
        let target_ret = target.ret.clone();
        if *ret != target_ret {
            self.error(
                codes::E0204,
                callee.span,
                format!(
                    "call expects '{}' but '@{}' returns '{}'",
                    ret, callee.name, target_ret
                ),
            );
        }
        if expected.len() != args.len() {
            self.error(
                codes::E0204,
                callee.span,
                format!(
                    "'@{}' takes {} arguments, {} given",
                    callee.name,
                    expected.len(),
                    args.len()
                ),
            );
            return;
        }
        for (arg, want) in args.iter().zip(&expected) {
            if arg.ty != *want {
                self.error(
                    codes::E0204,
                    arg.value.span,
                    format!("argument of type '{}' where '{}' is expected", arg.ty, want),
                );
            }
        }
    }

    fn typed(&mut self, scope: &Scope, operand: &TypedOperand) -> Value {
        self.operand(scope, &operand.value, &operand.ty)
    }

    /// Resolve an operand written with type `ty`. On error a placeholder is
    /// returned after reporting.
    fn operand(&mut self, scope: &Scope, operand: &Operand, ty: &Type) -> Value {
        let placeholder = Value::Null(ty.clone());
        match &operand.kind {
            OperandKind::Local(name) => match scope.values.get(name) {
                Some((value, actual)) => {
                    if actual != ty {
                        self.error(
                            codes::E0204,
                            operand.span,
                            format!("'%{}' has type '{}', written as '{}'", name, actual, ty),
                        );
                    }
                    value.clone()
                }
                None => {
                    self.error(
                        codes::E0201,
                        operand.span,
                        format!("undefined value '%{}'", name),
                    );
                    placeholder
                }
            },
            OperandKind::Global(name) => {
                if self.module.function(name).is_none() {
                    self.error(
                        codes::E0202,
                        operand.span,
                        format!("undefined function '@{}'", name),
                    );
                    return placeholder;
                }
                if !ty.is_byte_ptr() {
                    self.error(
                        codes::E0204,
                        operand.span,
                        format!("function address '@{}' must be written as 'i8*'", name),
                    );
                }
                Value::Global(name.clone())
            }
            OperandKind::Int(v) => match ty {
                Type::Int(bits) => Value::Int {
                    bits: *bits,
                    value: *v,
                },
                _ => {
                    self.error(
                        codes::E0204,
                        operand.span,
                        format!("integer constant written as '{}'", ty),
                    );
                    placeholder
                }
            },
            OperandKind::Float(v) => match ty {
                Type::Float | Type::Double => Value::Float {
                    double: *ty == Type::Double,
                    value: *v,
                },
                _ => {
                    self.error(
                        codes::E0204,
                        operand.span,
                        format!("floating-point constant written as '{}'", ty),
                    );
                    placeholder
                }
            },
            OperandKind::Null => {
                if !ty.is_pointer() {
                    self.error(
                        codes::E0204,
                        operand.span,
                        format!("'null' written as non-pointer '{}'", ty),
                    );
                }
                placeholder
            }
        }
    }

    fn block(&mut self, scope: &Scope, label: &Ident) -> BlockId {
        match scope.blocks.get(&label.name) {
            Some(id) => *id,
            None => {
                self.error(
                    codes::E0201,
                    label.span,
                    format!("undefined block '%{}'", label.name),
                );
                BlockId(0)
            }
        }
    }

    fn resolve_tags(&mut self, inst: &InstAst, kind: &InstKind) -> MemTags {
        let mut tags = MemTags::default();
        if inst.tags.is_empty() {
            return tags;
        }
        if !kind.is_memory_access() {
            self.error(
                codes::E0205,
                inst.span,
                "metadata is only allowed on load, store and memcpy".to_string(),
            );
            return tags;
        }
        for tag in &inst.tags {
            match tag.name.as_str() {
                "tbaa.allocation" => tags.tbaa = Some(TbaaTag::Allocation),
                "tbaa.pointer" => tags.tbaa = Some(TbaaTag::Pointer),
                "scope.args" => tags.arg_scope = true,
                other => self.error(
                    codes::E0205,
                    tag.span,
                    format!("unknown metadata '!{}'", other),
                ),
            }
        }
        tags
    }
}

/// Result type of an operation, derived from the types written in the text.
fn result_type(layout: &Layout<'_>, op: &OpAst) -> Result<Type, String> {
    Ok(match op {
        OpAst::Binary { ty, .. } | OpAst::Load { ty, .. } | OpAst::Phi { ty, .. } => ty.clone(),
        OpAst::ICmp { .. } => Type::i1(),
        OpAst::Alloca { ty, .. } => ty.clone().ptr_to(),
        OpAst::FieldAddr { base, index } => {
            let field = base
                .ty
                .pointee()
                .and_then(|s| layout.field_type(s, *index as usize))
                .ok_or_else(|| {
                    format!("fieldaddr: '{}' has no struct field {}", base.ty, index)
                })?;
            field.clone().ptr_to()
        }
        OpAst::ElemAddr { base, index } => match base.ty.pointee() {
            Some(Type::Array(elem, n)) if index < n => (**elem).clone().ptr_to(),
            _ => return Err(format!("elemaddr: '{}' has no element {}", base.ty, index)),
        },
        OpAst::ByteOffset { base, .. } => {
            if !base.ty.is_pointer() {
                return Err(format!("byteoffset: base '{}' is not a pointer", base.ty));
            }
            base.ty.clone()
        }
        OpAst::BitCast { to, .. } => to.clone(),
        OpAst::Call { ret, .. } => ret.clone(),
        OpAst::Store { .. }
        | OpAst::MemCpy { .. }
        | OpAst::Br { .. }
        | OpAst::CondBr { .. }
        | OpAst::Ret { .. } => Type::Void,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn resolve_src(source: &str) -> ResolveResult {
        let parsed = parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        resolve(&parsed.module.expect("module"))
    }

    fn resolve_ok(source: &str) -> Module {
        let result = resolve_src(source);
        assert!(
            result.diagnostics.is_empty(),
            "unexpected diagnostics: {:#?}",
            result.diagnostics
        );
        result.module
    }

    fn codes_of(source: &str) -> Vec<DiagCode> {
        resolve_src(source)
            .diagnostics
            .iter()
            .filter_map(|d| d.code)
            .collect()
    }

    #[test]
    fn kernel_module() {
        let m = resolve_ok(
            "target ptr32\nexport foreach @root 0x23\nexport func @helper\n\
             define i32 @root(i32 %in) {\nentry:\n  %r = mul i32 %in, 2\n  ret i32 %r\n}\n\
             define void @helper() {\nentry:\n  ret void\n}\n",
        );
        assert_eq!(m.pointer_width, crate::types::PointerWidth::W32);
        let exports = m.exports.as_ref().unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].signature.raw(), 0x23);
        assert!(m.is_invokable("helper"));

        let root = m.function("root").unwrap();
        let body = root.body.as_ref().unwrap();
        assert_eq!(body.insts.len(), 2);
        assert_eq!(
            body.insts[0].kind,
            InstKind::Binary {
                op: crate::ir::BinOp::Mul,
                lhs: Value::Arg(0),
                rhs: Value::i32(2),
                nuw: false,
            }
        );
        assert_eq!(
            body.insts[1].kind,
            InstKind::Ret {
                value: Some(Value::Inst(InstId(0)))
            }
        );
    }

    #[test]
    fn no_foreach_exports_means_pre_signature_module() {
        let m = resolve_ok("define void @root() {\nentry:\n  ret void\n}\n");
        assert!(m.exports.is_none());
    }

    #[test]
    fn phi_refers_forward() {
        let m = resolve_ok(
            "define void @f(i32 %s, i32 %e) {\n\
             entry:\n  br label %cond\n\
             cond:\n  %iv = phi i32 [ %s, %entry ], [ %n, %body ]\n\
               %c = icmp ult i32 %iv, %e\n  br i1 %c, label %body, label %exit\n\
             body:\n  %n = add nuw i32 %iv, 1\n  br label %cond\n\
             exit:\n  ret void\n}",
        );
        let body = m.function("f").unwrap().body.as_ref().unwrap();
        let InstKind::Phi { incoming } = &body.insts[1].kind else {
            panic!("expected phi")
        };
        assert_eq!(incoming[1], (Value::Inst(InstId(4)), BlockId(2)));
        assert_eq!(body.insts[2].ty, Type::i1());
    }

    #[test]
    fn field_and_element_address_types() {
        let m = resolve_ok(
            "%struct.P = type { float, [4 x i32] }\n\
             define void @f(%struct.P* %p) {\nentry:\n\
               %a = fieldaddr %struct.P* %p, 1\n  %b = elemaddr [4 x i32]* %a, 3\n  ret void\n}",
        );
        let body = m.function("f").unwrap().body.as_ref().unwrap();
        assert_eq!(body.insts[0].ty, Type::Array(Box::new(Type::i32()), 4).ptr_to());
        assert_eq!(body.insts[1].ty, Type::i32().ptr_to());
    }

    #[test]
    fn memory_tags() {
        let m = resolve_ok(
            "define void @f(float* %p) {\nentry:\n\
               %v = load float, float* %p !tbaa.allocation !scope.args\n  ret void\n}",
        );
        let body = m.function("f").unwrap().body.as_ref().unwrap();
        assert_eq!(
            body.insts[0].tags,
            MemTags {
                tbaa: Some(TbaaTag::Allocation),
                arg_scope: true
            }
        );
    }

    #[test]
    fn unnamed_declaration_params_get_positional_names() {
        let m = resolve_ok("declare void @ext(i32, float)");
        let f = m.function("ext").unwrap();
        assert!(f.is_declaration());
        assert_eq!(f.params[1].name, "arg1");
    }

    #[test]
    fn undefined_value() {
        let c = codes_of("define void @f() {\nentry:\n  %x = add i32 %nope, 1\n  ret void\n}");
        assert_eq!(c, vec![codes::E0201]);
    }

    #[test]
    fn undefined_block() {
        let c = codes_of("define void @f() {\nentry:\n  br label %nowhere\n}");
        assert_eq!(c, vec![codes::E0201]);
    }

    #[test]
    fn undefined_export_target() {
        let c = codes_of("export foreach @missing 0x3\n");
        assert_eq!(c, vec![codes::E0202]);
    }

    #[test]
    fn undefined_struct() {
        let c = codes_of("declare void @f(%struct.Missing*)");
        assert_eq!(c, vec![codes::E0203]);
    }

    #[test]
    fn duplicate_function() {
        let result = resolve_src("declare void @f()\ndeclare void @f()\n");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].code, Some(codes::E0200));
        assert_eq!(result.diagnostics[0].related_spans.len(), 1);
        assert_eq!(result.module.functions.len(), 1);
    }

    #[test]
    fn operand_type_mismatch() {
        let c = codes_of("define void @f(float %a) {\nentry:\n  %x = add i32 %a, 1\n  ret void\n}");
        assert_eq!(c, vec![codes::E0204]);
    }

    #[test]
    fn call_arity_mismatch() {
        let c = codes_of(
            "declare void @g(i32)\ndefine void @f() {\nentry:\n  call void @g()\n  ret void\n}",
        );
        assert_eq!(c, vec![codes::E0204]);
    }

    #[test]
    fn metadata_on_arithmetic_is_rejected() {
        let c = codes_of(
            "define void @f(i32 %a) {\nentry:\n  %x = add i32 %a, 1 !scope.args\n  ret void\n}",
        );
        assert_eq!(c, vec![codes::E0205]);
    }

    #[test]
    fn naming_a_store_is_rejected() {
        let c = codes_of(
            "define void @f(i32* %p) {\nentry:\n  %s = store i32 1, i32* %p\n  ret void\n}",
        );
        assert_eq!(c, vec![codes::E0206]);
    }

    #[test]
    fn bad_field_index() {
        let c = codes_of(
            "%struct.P = type { float }\n\
             define void @f(%struct.P* %p) {\nentry:\n  %a = fieldaddr %struct.P* %p, 1\n  ret void\n}",
        );
        assert_eq!(c, vec![codes::E0206]);
    }
}
