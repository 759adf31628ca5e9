// verify.rs — IR well-formedness checks
//
// Checks the structural and typing invariants every stage relies on:
// terminated blocks, phis grouped at block starts and matching the block's
// predecessors, operand references in range, definitions dominating their
// uses, operand types agreeing with each operation, calls matching their
// callee, and the export list naming defined functions.
//
// Preconditions: none; any module may be verified.
// Postconditions: `Ok(())` means the module is safe to expand, print and
//                 interpret.
// Failure modes: every violation found is reported as a `VerifyError`.
// Side effects: none.

use std::collections::{BTreeSet, HashSet};

use thiserror::Error;

use crate::id::{BlockId, InstId};
use crate::ir::{BinOp, Body, Function, InstKind, Module, Value};
use crate::types::{Layout, Type};

/// One well-formedness violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{}", location(.function), .message)]
pub struct VerifyError {
    pub function: Option<String>,
    pub message: String,
}

fn location(function: &Option<String>) -> String {
    function
        .as_ref()
        .map(|f| format!("in @{}: ", f))
        .unwrap_or_default()
}

/// Verify a whole module.
pub fn verify_module(module: &Module) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();
    let layout = module.layout();

    let mut seen = HashSet::new();
    for func in &module.functions {
        if !seen.insert(func.name.as_str()) {
            errors.push(VerifyError {
                function: None,
                message: format!("function '@{}' defined twice", func.name),
            });
        }
        let mut ctx = FunctionVerifier {
            module,
            layout,
            func,
            errors: Vec::new(),
        };
        ctx.run();
        errors.extend(ctx.errors);
    }

    for k in module.exports.iter().flatten() {
        match module.function(&k.name) {
            Some(f) if !f.is_declaration() => {}
            _ => errors.push(VerifyError {
                function: None,
                message: format!("exported kernel '@{}' has no definition", k.name),
            }),
        }
    }
    for name in &module.invokables {
        if module.function(name).is_none() {
            errors.push(VerifyError {
                function: None,
                message: format!("invokable '@{}' is not declared", name),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

struct FunctionVerifier<'a> {
    module: &'a Module,
    layout: Layout<'a>,
    func: &'a Function,
    errors: Vec<VerifyError>,
}

impl FunctionVerifier<'_> {
    fn error(&mut self, message: String) {
        self.errors.push(VerifyError {
            function: Some(self.func.name.clone()),
            message,
        });
    }

    fn run(&mut self) {
        let func = self.func;
        let Some(body) = &func.body else { return };
        if body.blocks.is_empty() {
            self.error("definition has no blocks".to_string());
            return;
        }

        let mut names = HashSet::new();
        for p in &func.params {
            if !names.insert(p.name.as_str()) {
                self.error(format!("duplicate value name '%{}'", p.name));
            }
        }
        for inst in &body.insts {
            if let Some(n) = &inst.name {
                if !names.insert(n.as_str()) {
                    self.error(format!("duplicate value name '%{}'", n));
                }
            }
        }

        if !self.check_structure(body) {
            return;
        }
        let preds = predecessors(body);
        let placement = placement(body);
        let doms = dominators(body, &preds);

        for (b, block) in body.blocks.iter().enumerate() {
            let block_id = BlockId(b as u32);
            for (pos, id) in block.insts.iter().enumerate() {
                let inst = body.inst(*id);
                let operand_ok = inst
                    .kind
                    .operands()
                    .into_iter()
                    .all(|v| self.check_reference(body, v));
                if !operand_ok {
                    continue;
                }
                self.check_types(body, *id);
                if let InstKind::Phi { incoming } = &inst.kind {
                    let from: BTreeSet<BlockId> = incoming.iter().map(|(_, b)| *b).collect();
                    let expected: BTreeSet<BlockId> = preds[b].iter().copied().collect();
                    if from != expected || from.len() != incoming.len() {
                        self.error(format!(
                            "phi in '{}' does not have one entry per predecessor",
                            block.name
                        ));
                    }
                    for (v, pred) in incoming {
                        if let Value::Inst(def) = v {
                            let (def_block, _) = placement[def.index()];
                            if !doms[pred.index()].contains(&def_block) {
                                self.error(format!(
                                    "phi operand does not dominate the edge from '{}'",
                                    body.block(*pred).name
                                ));
                            }
                        }
                    }
                } else {
                    for v in inst.kind.operands() {
                        let Value::Inst(def) = v else { continue };
                        let (def_block, def_pos) = placement[def.index()];
                        let dominates = if def_block == block_id {
                            def_pos < pos
                        } else {
                            doms[b].contains(&def_block)
                        };
                        if !dominates {
                            self.error(format!(
                                "use of '{}' in '{}' is not dominated by its definition",
                                describe(body, *def),
                                block.name
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Terminators, phi placement, branch targets and instruction ownership.
    /// Returns false when later checks cannot run safely.
    fn check_structure(&mut self, body: &Body) -> bool {
        let mut ok = true;
        let mut owned = vec![0usize; body.insts.len()];
        for block in &body.blocks {
            let Some(last) = block.insts.last() else {
                self.error(format!("block '{}' is empty", block.name));
                ok = false;
                continue;
            };
            let mut phis_done = false;
            for id in &block.insts {
                let Some(slot) = owned.get_mut(id.index()) else {
                    self.error(format!("block '{}' lists a missing instruction", block.name));
                    ok = false;
                    continue;
                };
                *slot += 1;
                let kind = &body.inst(*id).kind;
                if kind.is_terminator() && id != last {
                    self.error(format!("terminator in the middle of '{}'", block.name));
                    ok = false;
                }
                match kind {
                    InstKind::Phi { .. } if phis_done => {
                        self.error(format!("phi after non-phi in '{}'", block.name));
                    }
                    InstKind::Phi { .. } => {}
                    _ => phis_done = true,
                }
                for target in kind.successors() {
                    if target.index() >= body.blocks.len() {
                        self.error(format!("branch to missing block in '{}'", block.name));
                        ok = false;
                    }
                }
                if let InstKind::Phi { incoming } = kind {
                    if incoming.iter().any(|(_, b)| b.index() >= body.blocks.len()) {
                        self.error(format!("phi names a missing block in '{}'", block.name));
                        ok = false;
                    }
                }
            }
            if body
                .insts
                .get(last.index())
                .is_some_and(|i| !i.kind.is_terminator())
            {
                self.error(format!("block '{}' does not end in a terminator", block.name));
                ok = false;
            }
        }
        if owned.iter().any(|n| *n != 1) {
            self.error("instruction not placed in exactly one block".to_string());
            ok = false;
        }
        ok
    }

    fn check_reference(&mut self, body: &Body, v: &Value) -> bool {
        match v {
            Value::Arg(i) if *i as usize >= self.func.params.len() => {
                self.error(format!("argument {} out of range", i));
                false
            }
            Value::Inst(id) if id.index() >= body.insts.len() => {
                self.error(format!("reference to missing instruction {}", id.index()));
                false
            }
            Value::Inst(id) if body.inst(*id).ty.is_void() => {
                self.error(format!("use of '{}' which produces no value", describe(body, *id)));
                false
            }
            Value::Global(name) if self.module.function(name).is_none() => {
                self.error(format!("reference to undefined function '@{}'", name));
                false
            }
            _ => true,
        }
    }

    fn check_types(&mut self, body: &Body, id: InstId) {
        let inst = body.inst(id);
        let ty_of = |v: &Value| self.func.value_type(v);
        let problem: Option<String> = match &inst.kind {
            InstKind::Binary { op, lhs, rhs, .. } => {
                let (l, r) = (ty_of(lhs), ty_of(rhs));
                let class_ok = match op {
                    BinOp::Add | BinOp::Sub | BinOp::Mul => matches!(l, Type::Int(_)),
                    BinOp::FAdd | BinOp::FMul => matches!(l, Type::Float | Type::Double),
                };
                (l != r || !class_ok || inst.ty != l)
                    .then(|| format!("{} on '{}' and '{}'", op.mnemonic(), l, r))
            }
            InstKind::ICmp { lhs, rhs, .. } => {
                let (l, r) = (ty_of(lhs), ty_of(rhs));
                (l != r || !matches!(l, Type::Int(_)) || inst.ty != Type::i1())
                    .then(|| format!("icmp on '{}' and '{}'", l, r))
            }
            InstKind::Alloca { ty, .. } => (!self.layout.is_sized(ty) || inst.ty != ty.clone().ptr_to())
                .then(|| format!("alloca of unsized or mistyped '{}'", ty)),
            InstKind::Load { ptr } => {
                let p = ty_of(ptr);
                (p.pointee() != Some(&inst.ty) || !self.layout.is_sized(&inst.ty))
                    .then(|| format!("load of '{}' through '{}'", inst.ty, p))
            }
            InstKind::Store { value, ptr } => {
                let (v, p) = (ty_of(value), ty_of(ptr));
                (p.pointee() != Some(&v)).then(|| format!("store of '{}' through '{}'", v, p))
            }
            InstKind::MemCpy { dst, src, .. } => {
                let (d, s) = (ty_of(dst), ty_of(src));
                (!d.is_pointer() || !s.is_pointer())
                    .then(|| format!("memcpy between '{}' and '{}'", d, s))
            }
            InstKind::FieldAddr { base, field } => {
                let b = ty_of(base);
                let expected = b
                    .pointee()
                    .and_then(|s| self.layout.field_type(s, *field as usize))
                    .map(|t| t.clone().ptr_to());
                (expected.as_ref() != Some(&inst.ty))
                    .then(|| format!("fieldaddr {} of '{}'", field, b))
            }
            InstKind::ElemAddr { base, index } => {
                let b = ty_of(base);
                let expected = match b.pointee() {
                    Some(Type::Array(elem, n)) if index < n => Some((**elem).clone().ptr_to()),
                    _ => None,
                };
                (expected.as_ref() != Some(&inst.ty))
                    .then(|| format!("elemaddr {} of '{}'", index, b))
            }
            InstKind::ByteOffset { base, offset } => {
                let (b, o) = (ty_of(base), ty_of(offset));
                (!b.is_pointer() || !matches!(o, Type::Int(_)) || inst.ty != b)
                    .then(|| format!("byteoffset of '{}' by '{}'", b, o))
            }
            InstKind::BitCast { value } => {
                let from = ty_of(value);
                let ok = if from.is_pointer() || inst.ty.is_pointer() {
                    from.is_pointer() && inst.ty.is_pointer()
                } else {
                    from.is_scalar()
                        && inst.ty.is_scalar()
                        && self.layout.store_size(&from) == self.layout.store_size(&inst.ty)
                };
                (!ok).then(|| format!("bitcast from '{}' to '{}'", from, inst.ty))
            }
            InstKind::Phi { incoming } => incoming
                .iter()
                .map(|(v, _)| ty_of(v))
                .find(|t| *t != inst.ty)
                .map(|t| format!("phi of '{}' has '{}' operand", inst.ty, t)),
            InstKind::Call { callee, args } => match self.module.function(callee) {
                None => Some(format!("call to undefined function '@{}'", callee)),
                Some(target) => {
                    let arg_types: Vec<Type> = args.iter().map(&ty_of).collect();
                    (arg_types != target.param_types() || inst.ty != target.ret)
                        .then(|| format!("call to '@{}' does not match its signature", callee))
                }
            },
            InstKind::CondBr { cond, .. } => {
                let c = ty_of(cond);
                (c != Type::i1()).then(|| format!("branch on '{}'", c))
            }
            InstKind::Ret { value } => {
                let returned = value.as_ref().map_or(Type::Void, &ty_of);
                (returned != self.func.ret).then(|| {
                    format!("ret of '{}' from function returning '{}'", returned, self.func.ret)
                })
            }
            InstKind::Br { .. } => None,
        };
        if let Some(message) = problem {
            self.error(message);
        }
    }
}

fn describe(body: &Body, id: InstId) -> String {
    match &body.inst(id).name {
        Some(n) => format!("%{}", n),
        None => format!("%{}", id.index()),
    }
}

/// Predecessor blocks of every block.
pub(crate) fn predecessors(body: &Body) -> Vec<Vec<BlockId>> {
    let mut preds = vec![Vec::new(); body.blocks.len()];
    for (b, _) in body.blocks.iter().enumerate() {
        if let Some(term) = body.terminator(BlockId(b as u32)) {
            for succ in term.kind.successors() {
                if !preds[succ.index()].contains(&BlockId(b as u32)) {
                    preds[succ.index()].push(BlockId(b as u32));
                }
            }
        }
    }
    preds
}

/// Block and position of every instruction.
fn placement(body: &Body) -> Vec<(BlockId, usize)> {
    let mut at = vec![(BlockId(0), 0); body.insts.len()];
    for (b, block) in body.blocks.iter().enumerate() {
        for (pos, id) in block.insts.iter().enumerate() {
            at[id.index()] = (BlockId(b as u32), pos);
        }
    }
    at
}

/// Dominator sets by the iterative dataflow algorithm. Unreachable blocks
/// are dominated by every block.
fn dominators(body: &Body, preds: &[Vec<BlockId>]) -> Vec<BTreeSet<BlockId>> {
    let n = body.blocks.len();
    let all: BTreeSet<BlockId> = (0..n as u32).map(BlockId).collect();
    let mut doms = vec![all; n];
    doms[0] = [BlockId(0)].into_iter().collect();
    let mut changed = true;
    while changed {
        changed = false;
        for b in 1..n {
            let mut next: Option<BTreeSet<BlockId>> = None;
            for p in &preds[b] {
                next = Some(match next {
                    None => doms[p.index()].clone(),
                    Some(acc) => acc.intersection(&doms[p.index()]).copied().collect(),
                });
            }
            let mut next = next.unwrap_or_else(|| doms[b].clone());
            next.insert(BlockId(b as u32));
            if next != doms[b] {
                doms[b] = next;
                changed = true;
            }
        }
    }
    doms
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::resolve::resolve;

    fn load(source: &str) -> Module {
        let parsed = parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        let resolved = resolve(&parsed.module.expect("module"));
        assert!(resolved.diagnostics.is_empty(), "{:#?}", resolved.diagnostics);
        resolved.module
    }

    fn messages(source: &str) -> Vec<String> {
        match verify_module(&load(source)) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.into_iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn well_formed_loop() {
        let m = load(
            "define void @f(i32 %s, i32 %e) {\n\
             entry:\n  br label %cond\n\
             cond:\n  %iv = phi i32 [ %s, %entry ], [ %n, %body ]\n\
               %c = icmp ult i32 %iv, %e\n  br i1 %c, label %body, label %exit\n\
             body:\n  %n = add nuw i32 %iv, 1\n  br label %cond\n\
             exit:\n  ret void\n}",
        );
        assert_eq!(verify_module(&m), Ok(()));
    }

    #[test]
    fn missing_terminator() {
        let msgs = messages("define void @f(i32 %a) {\nentry:\n  %b = add i32 %a, 1\n}");
        assert_eq!(msgs, vec!["in @f: block 'entry' does not end in a terminator"]);
    }

    #[test]
    fn phi_must_cover_predecessors() {
        let msgs = messages(
            "define void @f(i32 %s) {\n\
             entry:\n  br label %next\n\
             next:\n  %x = phi i32 [ %s, %entry ], [ %s, %next ]\n  ret void\n}",
        );
        assert_eq!(
            msgs,
            vec!["in @f: phi in 'next' does not have one entry per predecessor"]
        );
    }

    #[test]
    fn use_before_definition() {
        let msgs = messages(
            "define void @f(i32 %a) {\n\
             entry:\n  br label %b1\n\
             b1:\n  %x = add i32 %y, 1\n  %y = add i32 %a, 1\n  ret void\n}",
        );
        assert_eq!(
            msgs,
            vec!["in @f: use of '%y' in 'b1' is not dominated by its definition"]
        );
    }

    #[test]
    fn definition_in_sibling_branch_does_not_dominate() {
        let msgs = messages(
            "define void @f(i1 %c, i32 %a) {\n\
             entry:\n  br i1 %c, label %l, label %r\n\
             l:\n  %x = add i32 %a, 1\n  br label %join\n\
             r:\n  br label %join\n\
             join:\n  %y = add i32 %x, 1\n  ret void\n}",
        );
        assert_eq!(
            msgs,
            vec!["in @f: use of '%x' in 'join' is not dominated by its definition"]
        );
    }

    #[test]
    fn type_rules() {
        let msgs = messages(
            "define i32 @f(float* %p, i32 %a) {\n\
             entry:\n  %x = fadd i32 %a, %a\n  %y = bitcast i32 %a to double\n  ret void\n}",
        );
        assert_eq!(
            msgs,
            vec![
                "in @f: fadd on 'i32' and 'i32'",
                "in @f: bitcast from 'i32' to 'double'",
                "in @f: ret of 'void' from function returning 'i32'",
            ]
        );
    }

    #[test]
    fn exports_need_definitions() {
        let msgs = messages("export foreach @k 0x3\ndeclare void @k(i32* %a, i32* %b)\n");
        assert_eq!(msgs, vec!["exported kernel '@k' has no definition"]);
    }
}
