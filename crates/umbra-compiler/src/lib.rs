//! Umbra compiler front half: token and AST definitions (the interface the
//! external parser produces), the bytecode code generator, and a
//! disassembler.

pub mod ast;
pub mod codegen;
pub mod disasm;
pub mod token;
