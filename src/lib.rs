//! `flatc`: an ahead-of-time compiler from a small statically-typed,
//! C-like language straight to a freestanding Windows x64 PE executable,
//! with no external linker.
//!
//! The pipeline is leaves-first: [`lexer`]/[`parser`] produce an
//! [`ast::Module`], [`semantic`] resolves names and overloads against a
//! [`types::TypeRegistry`], [`codegen`] walks the validated tree emitting
//! x86-64 machine code, and [`linker`]/[`pe`] assemble the result into a
//! PE32+ image.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod linker;
pub mod parser;
pub mod pe;
pub mod semantic;
pub mod token;
pub mod types;

use error::{Error, Position};
use linker::Linker;
use parser::Parser;
use types::TypeRegistry;

/// Compiles a single source text into a freestanding Windows x64 PE image.
///
/// Runs the whole pipeline: lex and parse into an AST, semantically
/// validate it (type inference, overload resolution, call mangling),
/// then assemble the PE image by running the code emitter and PE writer
/// twice against the linker — once to lay out every symbol's address,
/// once to emit bytes that reference them.
pub fn compile(source: &str) -> Result<Vec<u8>, Error> {
    let mut module = Parser::new(source).parse_module()?;
    let mut registry = TypeRegistry::new(64);
    let table = semantic::analyze(&mut module, &mut registry, source)?;

    let has_entry_point = table
        .entries
        .get("main")
        .map(|sigs| sigs.iter().any(|s| s.param_types.is_empty()))
        .unwrap_or(false);
    if !has_entry_point {
        return Err(Error::Semantic {
            at: Position::default(),
            msg: "no entry point: expected a parameterless 'main' function".to_string(),
        });
    }

    let mut linker = Linker::new(pe::IMAGE_BASE);
    for is_layout_pass in [true, false] {
        linker.begin_pass(is_layout_pass);
        pe::writer::write_image(&module, &registry, "main()", &mut linker)?;
    }
    Ok(linker.data().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_program_compiles_to_a_pe_image() {
        let bytes = compile("fn main(): i64 { return 0 }").unwrap();
        assert_eq!(&bytes[0..2], b"MZ");
    }

    #[test]
    fn missing_entry_point_is_a_fatal_error() {
        let err = compile("fn helper(): i64 { return 0 }").unwrap_err();
        assert!(format!("{}", err).contains("no entry point"));
    }

    #[test]
    fn overload_resolution_end_to_end() {
        let src = "fn f(x: i32): i32 { return 0 } \
                   fn f(x: i64): i64 { return x } \
                   fn main(): i64 { return f(1) }";
        assert!(compile(src).is_ok());
    }

    #[test]
    fn redeclaration_is_rejected() {
        let src = "fn f(x: i64): i64 { return x } \
                   fn f(x: i64): i64 { return x } \
                   fn main(): i64 { return 0 }";
        let err = compile(src).unwrap_err();
        assert!(format!("{}", err).contains("already defined"));
    }

    #[test]
    fn while_condition_must_be_boolean() {
        let src = "fn main(): i64 { while (1) { return 0 } }";
        let err = compile(src).unwrap_err();
        assert!(format!("{}", err).contains("While condition has to be of boolean type"));
    }

    #[test]
    fn array_indexing_end_to_end() {
        let src = "fn g(a: i64[]): i64 { return a[0] } fn main(): i64 { return 0 }";
        assert!(compile(src).is_ok());
    }

    #[test]
    fn return_type_mismatch_is_rejected() {
        let src = "fn h(): i32 { return 0 } fn main(): i64 { return 0 }";
        let err = compile(src).unwrap_err();
        assert!(format!("{}", err).contains("Return expression has to be of function result type"));
    }
}
