// print.rs — Textual form of IR modules
//
// `Display` for `Module` and `Function` writes the kernel IR text accepted by
// `parser` + `resolve`; printing a resolved module and reading it back yields
// an equal module as long as every value-producing instruction is named.
// Unnamed results print as `%<inst index>`.

use std::fmt::{self, Write};

use crate::ir::{Function, Inst, InstKind, Linkage, Module, TbaaDomain, TbaaTag, Value};
use crate::types::Type;

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "target {}", self.pointer_width)?;
        if self.tbaa == TbaaDomain::Shared {
            writeln!(f, "tbaa shared")?;
        }

        if !self.structs.is_empty() {
            writeln!(f)?;
            for (name, def) in &self.structs {
                match def {
                    crate::types::StructDef::Opaque => writeln!(f, "%{} = type opaque", name)?,
                    crate::types::StructDef::Body(fields) => {
                        writeln!(f, "%{} = type {}", name, Type::Struct(fields.clone()))?
                    }
                }
            }
        }

        let kernels = self.exports.as_deref().unwrap_or_default();
        if !kernels.is_empty() || !self.invokables.is_empty() {
            writeln!(f)?;
            for k in kernels {
                writeln!(f, "export foreach @{} {}", k.name, k.signature)?;
            }
            for name in &self.invokables {
                writeln!(f, "export func @{}", name)?;
            }
        }

        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| format!("{} %{}", p.ty, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        let Some(body) = &self.body else {
            return writeln!(f, "declare {} @{}({})", self.ret, self.name, params);
        };
        let linkage = match self.linkage {
            Linkage::Internal => "internal ",
            Linkage::External => "",
        };
        writeln!(
            f,
            "define {}{} @{}({}) {{",
            linkage, self.ret, self.name, params
        )?;
        for block in &body.blocks {
            writeln!(f, "{}:", block.name)?;
            for id in &block.insts {
                writeln!(f, "  {}", InstPrinter { func: self, inst: body.inst(*id), index: id.index() })?;
            }
        }
        writeln!(f, "}}")
    }
}

/// One instruction in the context of its function (for operand names).
struct InstPrinter<'a> {
    func: &'a Function,
    inst: &'a Inst,
    index: usize,
}

impl InstPrinter<'_> {
    fn value(&self, v: &Value) -> String {
        match v {
            Value::Arg(i) => match self.func.params.get(*i as usize) {
                Some(p) => format!("%{}", p.name),
                None => format!("%arg{}", i),
            },
            Value::Inst(id) => {
                let name = self
                    .func
                    .body
                    .as_ref()
                    .and_then(|b| b.insts.get(id.index()))
                    .and_then(|inst| inst.name.clone());
                match name {
                    Some(n) => format!("%{}", n),
                    None => format!("%{}", id.index()),
                }
            }
            Value::Int { value, .. } => value.to_string(),
            Value::Float { value, .. } => format!("{:?}", value),
            Value::Null(_) => "null".to_string(),
            Value::Global(name) => format!("@{}", name),
        }
    }

    fn typed(&self, v: &Value) -> String {
        format!("{} {}", self.func.value_type(v), self.value(v))
    }

    fn block(&self, id: crate::id::BlockId) -> String {
        let name = self
            .func
            .body
            .as_ref()
            .and_then(|b| b.blocks.get(id.index()))
            .map_or("?", |b| b.name.as_str());
        format!("%{}", name)
    }
}

impl fmt::Display for InstPrinter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inst = self.inst;
        let mut line = String::new();
        if !inst.ty.is_void() {
            let name = inst
                .name
                .clone()
                .unwrap_or_else(|| self.index.to_string());
            write!(line, "%{} = ", name)?;
        }
        match &inst.kind {
            InstKind::Binary { op, lhs, rhs, nuw } => {
                let nuw = if *nuw { " nuw" } else { "" };
                write!(
                    line,
                    "{}{} {} {}, {}",
                    op.mnemonic(),
                    nuw,
                    self.func.value_type(lhs),
                    self.value(lhs),
                    self.value(rhs)
                )?;
            }
            InstKind::ICmp { pred, lhs, rhs } => write!(
                line,
                "icmp {} {} {}, {}",
                pred.mnemonic(),
                self.func.value_type(lhs),
                self.value(lhs),
                self.value(rhs)
            )?,
            InstKind::Alloca { ty, align } => write!(line, "alloca {}, align {}", ty, align)?,
            InstKind::Load { ptr } => write!(line, "load {}, {}", inst.ty, self.typed(ptr))?,
            InstKind::Store { value, ptr } => {
                write!(line, "store {}, {}", self.typed(value), self.typed(ptr))?
            }
            InstKind::MemCpy {
                dst,
                src,
                len,
                align,
            } => write!(
                line,
                "memcpy {}, {}, {}, align {}",
                self.typed(dst),
                self.typed(src),
                len,
                align
            )?,
            InstKind::FieldAddr { base, field } => {
                write!(line, "fieldaddr {}, {}", self.typed(base), field)?
            }
            InstKind::ElemAddr { base, index } => {
                write!(line, "elemaddr {}, {}", self.typed(base), index)?
            }
            InstKind::ByteOffset { base, offset } => write!(
                line,
                "byteoffset {}, {}",
                self.typed(base),
                self.typed(offset)
            )?,
            InstKind::BitCast { value } => {
                write!(line, "bitcast {} to {}", self.typed(value), inst.ty)?
            }
            InstKind::Phi { incoming } => {
                let arms = incoming
                    .iter()
                    .map(|(v, b)| format!("[ {}, {} ]", self.value(v), self.block(*b)))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(line, "phi {} {}", inst.ty, arms)?;
            }
            InstKind::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|a| self.typed(a))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(line, "call {} @{}({})", inst.ty, callee, args)?;
            }
            InstKind::Br { target } => write!(line, "br label {}", self.block(*target))?,
            InstKind::CondBr {
                cond,
                then_block,
                else_block,
            } => write!(
                line,
                "br {}, label {}, label {}",
                self.typed(cond),
                self.block(*then_block),
                self.block(*else_block)
            )?,
            InstKind::Ret { value: None } => line.push_str("ret void"),
            InstKind::Ret { value: Some(v) } => write!(line, "ret {}", self.typed(v))?,
        }
        match inst.tags.tbaa {
            Some(TbaaTag::Allocation) => line.push_str(" !tbaa.allocation"),
            Some(TbaaTag::Pointer) => line.push_str(" !tbaa.pointer"),
            None => {}
        }
        if inst.tags.arg_scope {
            line.push_str(" !scope.args");
        }
        f.write_str(&line)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::ir::Module;
    use crate::parser::parse;
    use crate::resolve::resolve;

    fn load(source: &str) -> Module {
        let parsed = parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        let resolved = resolve(&parsed.module.expect("module"));
        assert!(
            resolved.diagnostics.is_empty(),
            "diagnostics: {:#?}",
            resolved.diagnostics
        );
        resolved.module
    }

    const SAMPLE: &str = "\
target ptr64
tbaa shared

%struct.P = type { float, [4 x i32] }
%struct.ctx = type opaque

export foreach @root 0x23
export func @helper

define internal i32 @root(i32 %in) {
entry:
  %r = mul i32 %in, 2
  ret i32 %r
}

declare void @helper(%struct.ctx* %arg0)

define void @walk(%struct.P* %p, i32 %n, i8* %raw) {
entry:
  %slot = alloca %struct.P, align 4
  %a = fieldaddr %struct.P* %p, 1
  %e = elemaddr [4 x i32]* %a, 2
  %v = load i32, i32* %e !tbaa.allocation !scope.args
  %q = byteoffset i8* %raw, i32 %n
  %f = bitcast i8* %q to float*
  store float 1.5, float* %f !tbaa.allocation
  %d = bitcast %struct.P* %slot to i8*
  %s = bitcast %struct.P* %p to i8*
  memcpy i8* %d, i8* %s, 20, align 4 !scope.args
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %i.next = add nuw i32 %i, 1
  %c = icmp ult i32 %i.next, %n
  br i1 %c, label %loop, label %done
done:
  call void @helper(%struct.ctx* null)
  ret void
}
";

    #[test]
    fn print_is_stable_text() {
        let m = load(SAMPLE);
        assert_eq!(m.to_string(), SAMPLE);
    }

    #[test]
    fn round_trip_preserves_module() {
        let m = load(SAMPLE);
        let again = load(&m.to_string());
        assert_eq!(m, again);
    }

    #[test]
    fn minimal_module() {
        let m = Module::default();
        assert_eq!(m.to_string(), "target ptr64\n");
    }
}
