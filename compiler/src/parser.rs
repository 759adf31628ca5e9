// Parser for kernel IR (.kir) text.
//
// Parses a token stream (from the lexer) into a `ModuleAst`. Uses chumsky
// combinators. The grammar is the textual form written by `print`:
//
//   module   := item*
//   item     := 'target' ('ptr32'|'ptr64') | 'tbaa' 'shared'
//             | LOCAL '=' 'type' ('opaque' | '{' types '}')
//             | 'export' 'foreach' GLOBAL INT | 'export' 'func' GLOBAL
//             | 'define' 'internal'? type GLOBAL '(' params ')' '{' block* '}'
//             | 'declare' type GLOBAL '(' params ')'
//   block    := WORD ':' inst*
//   inst     := (LOCAL '=')? op META*
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::ir::{BinOp, CmpPred};
use crate::lexer::Token;
use crate::types::{PointerWidth, Type};

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub module: Option<ModuleAst>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a kernel IR source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = module_parser();
    let (module, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        module,
        errors: all_errors,
    }
}

/// Map a bare type word (`void`, `float`, `double`, `iN`) to its type.
fn primitive_type(word: &str) -> Option<Type> {
    match word {
        "void" => Some(Type::Void),
        "float" => Some(Type::Float),
        "double" => Some(Type::Double),
        _ => {
            let bits: u32 = word.strip_prefix('i')?.parse().ok()?;
            (1..=128).contains(&bits).then_some(Type::Int(bits))
        }
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `module_parser` so the shared leaf
// parsers (names, types, operands) are constructed once and cloned into
// each rule.

fn module_parser<'tokens, I>(
) -> impl Parser<'tokens, I, ModuleAst, extra::Err<Rich<'tokens, Token, SimpleSpan>>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let kw = |word: &'static str| just(Token::Word(word.to_string())).ignored();
    let comma = just(Token::Comma).ignored();

    // ── Names and literals ──

    let local = select! { Token::Local(name) = e => Ident { name, span: e.span() } };
    let global = select! { Token::Global(name) = e => Ident { name, span: e.span() } };
    let word = select! { Token::Word(w) => w };
    let uint = select! { Token::Int(v) if v >= 0 => v as u64 };
    let count = select! { Token::Int(v) if (0..=u32::MAX as i64).contains(&v) => v as u32 };

    // ── Types ──

    let ty = recursive(|ty| {
        let prim = word.clone().try_map(|w, span| {
            primitive_type(&w)
                .ok_or_else(|| Rich::custom(span, format!("expected type, found '{w}'")))
        });
        let named = select! { Token::Local(name) => Type::Named(name) };
        let vector = count
            .clone()
            .then_ignore(kw("x"))
            .then(ty.clone())
            .delimited_by(just(Token::Lt), just(Token::Gt))
            .map(|(n, elem)| Type::Vector(Box::new(elem), n));
        let array = count
            .clone()
            .then_ignore(kw("x"))
            .then(ty.clone())
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(|(n, elem)| Type::Array(Box::new(elem), n));
        let literal = ty
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(Type::Struct);
        choice((prim, named, vector, array, literal))
            .foldl(just(Token::Star).repeated(), |inner, _| inner.ptr_to())
    })
    .boxed();

    // ── Operands ──

    let operand = select! {
        Token::Local(n) => OperandKind::Local(n),
        Token::Global(n) => OperandKind::Global(n),
        Token::Int(v) => OperandKind::Int(v),
        Token::Float(v) => OperandKind::Float(v),
        Token::Word(w) if w == "null" => OperandKind::Null,
    }
    .map_with(|kind, e| Operand {
        kind,
        span: e.span(),
    });

    let typed = ty
        .clone()
        .then(operand.clone())
        .map(|(ty, value)| TypedOperand { ty, value });

    // ── Operations ──

    let binop = select! {
        Token::Word(w) if w == "add" => BinOp::Add,
        Token::Word(w) if w == "sub" => BinOp::Sub,
        Token::Word(w) if w == "mul" => BinOp::Mul,
        Token::Word(w) if w == "fadd" => BinOp::FAdd,
        Token::Word(w) if w == "fmul" => BinOp::FMul,
    };
    let binary = binop
        .then(kw("nuw").or_not().map(|n| n.is_some()))
        .then(ty.clone())
        .then(operand.clone())
        .then_ignore(comma.clone())
        .then(operand.clone())
        .map(|((((op, nuw), ty), lhs), rhs)| OpAst::Binary {
            op,
            nuw,
            ty,
            lhs,
            rhs,
        });

    let pred = select! {
        Token::Word(w) if w == "eq" => CmpPred::Eq,
        Token::Word(w) if w == "ne" => CmpPred::Ne,
        Token::Word(w) if w == "ult" => CmpPred::Ult,
        Token::Word(w) if w == "ule" => CmpPred::Ule,
    };
    let icmp = kw("icmp")
        .ignore_then(pred)
        .then(ty.clone())
        .then(operand.clone())
        .then_ignore(comma.clone())
        .then(operand.clone())
        .map(|(((pred, ty), lhs), rhs)| OpAst::ICmp { pred, ty, lhs, rhs });

    let alloca = kw("alloca")
        .ignore_then(ty.clone())
        .then_ignore(comma.clone())
        .then_ignore(kw("align"))
        .then(uint.clone())
        .map(|(ty, align)| OpAst::Alloca { ty, align });

    let load = kw("load")
        .ignore_then(ty.clone())
        .then_ignore(comma.clone())
        .then(typed.clone())
        .map(|(ty, ptr)| OpAst::Load { ty, ptr });

    let store = kw("store")
        .ignore_then(typed.clone())
        .then_ignore(comma.clone())
        .then(typed.clone())
        .map(|(value, ptr)| OpAst::Store { value, ptr });

    let memcpy = kw("memcpy")
        .ignore_then(typed.clone())
        .then_ignore(comma.clone())
        .then(typed.clone())
        .then_ignore(comma.clone())
        .then(uint.clone())
        .then_ignore(comma.clone())
        .then_ignore(kw("align"))
        .then(uint.clone())
        .map(|(((dst, src), len), align)| OpAst::MemCpy {
            dst,
            src,
            len,
            align,
        });

    let fieldaddr = kw("fieldaddr")
        .ignore_then(typed.clone())
        .then_ignore(comma.clone())
        .then(count.clone())
        .map(|(base, index)| OpAst::FieldAddr { base, index });

    let elemaddr = kw("elemaddr")
        .ignore_then(typed.clone())
        .then_ignore(comma.clone())
        .then(count.clone())
        .map(|(base, index)| OpAst::ElemAddr { base, index });

    let byteoffset = kw("byteoffset")
        .ignore_then(typed.clone())
        .then_ignore(comma.clone())
        .then(typed.clone())
        .map(|(base, offset)| OpAst::ByteOffset { base, offset });

    let bitcast = kw("bitcast")
        .ignore_then(typed.clone())
        .then_ignore(kw("to"))
        .then(ty.clone())
        .map(|(value, to)| OpAst::BitCast { value, to });

    let phi = kw("phi")
        .ignore_then(ty.clone())
        .then(
            operand
                .clone()
                .then_ignore(comma.clone())
                .then(local.clone())
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .separated_by(comma.clone())
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(|(ty, incoming)| OpAst::Phi { ty, incoming });

    let call = kw("call")
        .ignore_then(ty.clone())
        .then(global.clone())
        .then(
            typed
                .clone()
                .separated_by(comma.clone())
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map(|((ret, callee), args)| OpAst::Call { ret, callee, args });

    let br = kw("br").ignore_then(choice((
        kw("label")
            .ignore_then(local.clone())
            .map(|target| OpAst::Br { target }),
        typed
            .clone()
            .then_ignore(comma.clone())
            .then_ignore(kw("label"))
            .then(local.clone())
            .then_ignore(comma.clone())
            .then_ignore(kw("label"))
            .then(local.clone())
            .map(|((cond, then_label), else_label)| OpAst::CondBr {
                cond,
                then_label,
                else_label,
            }),
    )));

    let ret = kw("ret")
        .ignore_then(ty.clone())
        .then(operand.or_not())
        .map(|(ty, value)| OpAst::Ret { ty, value });

    let op = choice((
        binary, icmp, alloca, load, store, memcpy, fieldaddr, elemaddr, byteoffset, bitcast, phi,
        call, br, ret,
    ))
    .boxed();

    let tag = select! { Token::Meta(name) = e => Ident { name, span: e.span() } };

    let inst = local
        .clone()
        .then_ignore(just(Token::Equals))
        .or_not()
        .then(op)
        .then(tag.repeated().collect::<Vec<_>>())
        .map_with(|((result, op), tags), e| InstAst {
            result,
            op,
            tags,
            span: e.span(),
        });

    // ── Functions ──

    let label = word
        .clone()
        .map_with(|name, e| Ident {
            name,
            span: e.span(),
        })
        .then_ignore(just(Token::Colon));

    let block = label
        .then(inst.repeated().collect::<Vec<_>>())
        .map(|(label, insts)| BlockAst { label, insts });

    let params = ty
        .clone()
        .then(local.or_not())
        .map(|(ty, name)| ParamAst { ty, name })
        .separated_by(comma.clone())
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let define = kw("define")
        .ignore_then(kw("internal").or_not().map(|i| i.is_some()))
        .then(ty.clone())
        .then(global.clone())
        .then(params.clone())
        .then(
            block
                .repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|((((internal, ret), name), params), blocks), e| {
            ItemKind::Function(FunctionAst {
                name,
                internal,
                ret,
                params,
                blocks: Some(blocks),
                span: e.span(),
            })
        });

    let declare = kw("declare")
        .ignore_then(ty.clone())
        .then(global.clone())
        .then(params)
        .map_with(|((ret, name), params), e| {
            ItemKind::Function(FunctionAst {
                name,
                internal: false,
                ret,
                params,
                blocks: None,
                span: e.span(),
            })
        });

    // ── Module-level items ──

    let target = kw("target")
        .ignore_then(select! {
            Token::Word(w) if w == "ptr32" => PointerWidth::W32,
            Token::Word(w) if w == "ptr64" => PointerWidth::W64,
        })
        .map(ItemKind::Target);

    let tbaa = kw("tbaa")
        .ignore_then(kw("shared"))
        .to(ItemKind::TbaaShared);

    let struct_body = ty.clone().try_map(|t, span| match t {
        Type::Struct(fields) => Ok(Some(fields)),
        other => Err(Rich::custom(
            span,
            format!("expected struct body, found '{other}'"),
        )),
    });
    let struct_decl = local
        .clone()
        .then_ignore(just(Token::Equals))
        .then_ignore(kw("type"))
        .then(kw("opaque").to(None).or(struct_body))
        .map(|(name, body)| ItemKind::StructDecl { name, body });

    let bits = select! {
        Token::Hex(v) if (0..=u32::MAX as i64).contains(&v) => v as u32,
        Token::Int(v) if (0..=u32::MAX as i64).contains(&v) => v as u32,
    };
    let export = kw("export").ignore_then(choice((
        kw("foreach")
            .ignore_then(global.clone())
            .then(bits)
            .map(|(name, bits)| ItemKind::ExportKernel { name, bits }),
        kw("func")
            .ignore_then(global.clone())
            .map(|name| ItemKind::ExportFunc { name }),
    )));

    let item = choice((target, tbaa, struct_decl, export, define, declare)).map_with(|kind, e| Item {
        kind,
        span: e.span(),
    });

    item.repeated()
        .collect::<Vec<_>>()
        .map_with(|items, e| ModuleAst {
            items,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> ModuleAst {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.module.expect("expected module")
    }

    fn only_function(source: &str) -> FunctionAst {
        let module = parse_ok(source);
        let mut funcs = module.items.into_iter().filter_map(|i| match i.kind {
            ItemKind::Function(f) => Some(f),
            _ => None,
        });
        let f = funcs.next().expect("expected a function");
        assert!(funcs.next().is_none(), "expected exactly one function");
        f
    }

    fn first_op(source: &str) -> OpAst {
        let f = only_function(source);
        let blocks = f.blocks.expect("expected a definition");
        blocks[0].insts[0].op.clone()
    }

    #[test]
    fn empty_module() {
        let module = parse_ok("");
        assert!(module.items.is_empty());
    }

    #[test]
    fn header_items() {
        let module = parse_ok(
            "target ptr32\ntbaa shared\n%struct.ctx = type opaque\n\
             %struct.Pixel = type { float, i8 }\nexport foreach @root 0x23\nexport func @helper\n",
        );
        let kinds: Vec<_> = module.items.into_iter().map(|i| i.kind).collect();
        assert_eq!(kinds[0], ItemKind::Target(PointerWidth::W32));
        assert_eq!(kinds[1], ItemKind::TbaaShared);
        assert!(matches!(&kinds[2], ItemKind::StructDecl { name, body: None } if name.name == "struct.ctx"));
        assert!(matches!(
            &kinds[3],
            ItemKind::StructDecl { body: Some(fields), .. } if *fields == vec![Type::Float, Type::i8()]
        ));
        assert!(matches!(&kinds[4], ItemKind::ExportKernel { name, bits: 0x23 } if name.name == "root"));
        assert!(matches!(&kinds[5], ItemKind::ExportFunc { name } if name.name == "helper"));
    }

    #[test]
    fn declare_without_param_names() {
        let f = only_function("declare i8* @ext(i32, %struct.ctx*)");
        assert!(f.blocks.is_none());
        assert_eq!(f.ret, Type::byte_ptr());
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1].ty, Type::named("struct.ctx").ptr_to());
        assert!(f.params[0].name.is_none());
    }

    #[test]
    fn define_with_blocks() {
        let f = only_function(
            "define internal i32 @root(i32 %in) {\n\
             entry:\n  %r = mul i32 %in, 2\n  br label %done\n\
             done:\n  ret i32 %r\n}\n",
        );
        assert!(f.internal);
        let blocks = f.blocks.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].label.name, "entry");
        assert_eq!(blocks[0].insts.len(), 2);
        assert_eq!(blocks[0].insts[0].result.as_ref().unwrap().name, "r");
        assert!(matches!(
            &blocks[1].insts[0].op,
            OpAst::Ret { ty: Type::Int(32), value: Some(_) }
        ));
    }

    #[test]
    fn nested_types() {
        let op = first_op(
            "define void @f() {\nentry:\n  %p = alloca [2 x <4 x float>]*, align 8\n  ret void\n}",
        );
        let OpAst::Alloca { ty, align } = op else {
            panic!("expected alloca")
        };
        assert_eq!(align, 8);
        assert_eq!(ty.to_string(), "[2 x <4 x float>]*");
    }

    #[test]
    fn binary_with_nuw() {
        let op = first_op(
            "define void @f(i32 %a) {\nentry:\n  %b = add nuw i32 %a, 1\n  ret void\n}",
        );
        assert!(matches!(
            op,
            OpAst::Binary { op: BinOp::Add, nuw: true, .. }
        ));
    }

    #[test]
    fn memory_ops_with_tags() {
        let f = only_function(
            "define void @f(i8* %d, i8* %s) {\nentry:\n\
             memcpy i8* %d, i8* %s, 16, align 4 !tbaa.allocation !scope.args\n  ret void\n}",
        );
        let inst = &f.blocks.unwrap()[0].insts[0];
        assert!(inst.result.is_none());
        assert!(matches!(inst.op, OpAst::MemCpy { len: 16, align: 4, .. }));
        let tags: Vec<_> = inst.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tags, vec!["tbaa.allocation", "scope.args"]);
    }

    #[test]
    fn phi_and_conditional_branch() {
        let f = only_function(
            "define void @f(i32 %s, i32 %e) {\n\
             entry:\n  br label %cond\n\
             cond:\n  %iv = phi i32 [ %s, %entry ], [ %n, %body ]\n\
               %c = icmp ult i32 %iv, %e\n  br i1 %c, label %body, label %exit\n\
             body:\n  %n = add nuw i32 %iv, 1\n  br label %cond\n\
             exit:\n  ret void\n}",
        );
        let blocks = f.blocks.unwrap();
        let OpAst::Phi { incoming, .. } = &blocks[1].insts[0].op else {
            panic!("expected phi")
        };
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[1].1.name, "body");
        assert!(matches!(&blocks[1].insts[2].op, OpAst::CondBr { then_label, .. } if then_label.name == "body"));
    }

    #[test]
    fn call_with_null_and_global_args() {
        let op = first_op(
            "define void @f() {\nentry:\n  call void @g(i8* null, i8* @f, float 1.5)\n  ret void\n}",
        );
        let OpAst::Call { callee, args, .. } = op else {
            panic!("expected call")
        };
        assert_eq!(callee.name, "g");
        assert_eq!(args[0].value.kind, OperandKind::Null);
        assert_eq!(args[1].value.kind, OperandKind::Global("f".to_string()));
        assert_eq!(args[2].value.kind, OperandKind::Float(1.5));
    }

    #[test]
    fn bitcast_and_byteoffset() {
        let f = only_function(
            "define void @f(i8* %p) {\nentry:\n\
             %q = byteoffset i8* %p, i32 4\n  %r = bitcast i8* %q to float*\n  ret void\n}",
        );
        let blocks = f.blocks.unwrap();
        assert!(matches!(&blocks[0].insts[0].op, OpAst::ByteOffset { .. }));
        assert!(matches!(&blocks[0].insts[1].op, OpAst::BitCast { to, .. } if *to == Type::Float.ptr_to()));
    }

    #[test]
    fn unknown_type_word_is_an_error() {
        let result = parse("declare quux @f()");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn missing_brace_is_an_error() {
        let result = parse("define void @f() {\nentry:\n  ret void\n");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn primitive_words() {
        assert_eq!(primitive_type("i1"), Some(Type::i1()));
        assert_eq!(primitive_type("i128"), Some(Type::Int(128)));
        assert_eq!(primitive_type("i0"), None);
        assert_eq!(primitive_type("int"), None);
        assert_eq!(primitive_type("double"), Some(Type::Double));
    }
}
