// Lexer for kernel IR (.kir) text.
//
// Tokenizes the textual module form printed by `print` and read back by
// `parser`. Uses the `logos` crate for DFA-based lexing. Mnemonics, type
// names and block labels are all bare words; the parser gives them meaning.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Kernel IR token types.
///
/// Sigil-prefixed names carry their text without the sigil. Newlines are
/// insignificant; `;` starts a comment running to end of line.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|;[^\n]*")]
pub enum Token {
    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("*")]
    Star,
    #[token(":")]
    Colon,

    // ── Literals ──
    //
    // Hex must appear before the decimal integer so `0x23` is one token.
    /// Hexadecimal integer literal (e.g. `0x23`), used for signature bits.
    #[regex(r"0x[0-9a-fA-F]+", parse_hex)]
    Hex(i64),

    /// Floating-point literal: requires a fraction or an exponent.
    #[regex(r"-?[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", parse_float)]
    #[regex(r"-?[0-9]+[eE][+-]?[0-9]+", parse_float)]
    Float(f64),

    /// Decimal integer literal, optionally negative.
    #[regex(r"-?[0-9]+", parse_int)]
    Int(i64),

    // ── Names ──
    /// Local value, block or struct name: `%in`, `%loop.cond`, `%struct.Pixel`.
    #[regex(r"%[-a-zA-Z0-9_.$]+", strip_sigil)]
    Local(String),

    /// Function name: `@root`, `@_Z14rsGetElementAt13rs_allocationj`.
    #[regex(r"@[-a-zA-Z0-9_.$]+", strip_sigil)]
    Global(String),

    /// Metadata tag on a memory access: `!tbaa.allocation`, `!scope.args`.
    #[regex(r"![a-zA-Z_][a-zA-Z0-9_.]*", strip_sigil)]
    Meta(String),

    /// Bare word: keyword, mnemonic, type name or block label.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.]*", |lex| lex.slice().to_string())]
    Word(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Comma => write!(f, ","),
            Token::Equals => write!(f, "="),
            Token::Star => write!(f, "*"),
            Token::Colon => write!(f, ":"),
            Token::Hex(v) => write!(f, "{v:#x}"),
            Token::Float(v) => write!(f, "{v:?}"),
            Token::Int(v) => write!(f, "{v}"),
            Token::Local(s) => write!(f, "%{s}"),
            Token::Global(s) => write!(f, "@{s}"),
            Token::Meta(s) => write!(f, "!{s}"),
            Token::Word(s) => write!(f, "{s}"),
        }
    }
}

// ── Callbacks ──

fn parse_hex(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    i64::from_str_radix(&lex.slice()[2..], 16).ok()
}

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn strip_sigil(lex: &mut logos::Lexer<'_, Token>) -> String {
    lex.slice()[1..].to_string()
}

// ── Public API ──

/// Lex a kernel IR source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn symbols() {
        let tokens = lex_ok("( ) { } [ ] < > , = * :");
        assert_eq!(
            tokens,
            vec![
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::LBracket,
                Token::RBracket,
                Token::Lt,
                Token::Gt,
                Token::Comma,
                Token::Equals,
                Token::Star,
                Token::Colon,
            ]
        );
    }

    #[test]
    fn sigils_strip_prefix() {
        let tokens = lex_ok("%loop.cond @_Z3fooi !tbaa.allocation");
        assert_eq!(
            tokens,
            vec![
                Token::Local("loop.cond".to_string()),
                Token::Global("_Z3fooi".to_string()),
                Token::Meta("tbaa.allocation".to_string()),
            ]
        );
    }

    #[test]
    fn numbers() {
        let tokens = lex_ok("42 -7 0x23 2.5 -1.5e3 1e300");
        assert_eq!(
            tokens,
            vec![
                Token::Int(42),
                Token::Int(-7),
                Token::Hex(0x23),
                Token::Float(2.5),
                Token::Float(-1500.0),
                Token::Float(1e300),
            ]
        );
    }

    #[test]
    fn type_words_and_pointer_stars() {
        let tokens = lex_ok("i32** <4 x float>");
        assert_eq!(
            tokens,
            vec![
                word("i32"),
                Token::Star,
                Token::Star,
                Token::Lt,
                Token::Int(4),
                word("x"),
                word("float"),
                Token::Gt,
            ]
        );
    }

    #[test]
    fn label_definition() {
        let tokens = lex_ok("loop.body:");
        assert_eq!(tokens, vec![word("loop.body"), Token::Colon]);
    }

    #[test]
    fn comments_and_newlines_skipped() {
        let tokens = lex_ok("ret void ; done\n\n  ; whole line\n}");
        assert_eq!(tokens, vec![word("ret"), word("void"), Token::RBrace]);
    }

    #[test]
    fn bad_character_is_reported_and_skipped() {
        let result = lex("ret # void");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 4, end: 5 });
        assert_eq!(result.tokens.len(), 2);
    }

    #[test]
    fn display_restores_sigils() {
        assert_eq!(Token::Local("x".into()).to_string(), "%x");
        assert_eq!(Token::Global("f".into()).to_string(), "@f");
        assert_eq!(Token::Hex(0x23).to_string(), "0x23");
    }
}
