// kxc — Kernel expansion compiler
//
// Library root. Text front-end (lexer, parser, resolve), IR (ir, types,
// builder, print, verify), the expansion pass and its parts, and a reference
// interpreter for checking generated code.

pub mod abi;
pub mod ast;
pub mod builder;
pub mod diag;
pub mod driver_info;
pub mod expand;
pub mod exposure;
pub mod id;
pub mod interp;
pub mod ir;
pub mod lexer;
pub mod loops;
pub mod marshal;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod print;
pub mod report;
pub mod resolve;
pub mod signature;
pub mod step;
pub mod types;
pub mod verify;
