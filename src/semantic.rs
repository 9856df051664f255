//! The two-phase semantic pass: collect function signatures, then walk
//! every body assigning types, resolving overloads, and writing mangled
//! call targets back onto `Call` nodes.
//!
//! No global mutable state: "current locals" and "current result type" are
//! passed explicitly through the walk as a per-function [`FunctionContext`]
//! rather than held as fields on the pass itself.

use std::collections::HashMap;

use log::debug;

use crate::ast::*;
use crate::error::{snippet, Error, Position};
use crate::types::{TypeHandle, TypeKind, TypeRegistry};

/// A registered overload: the parameter types that distinguish it from
/// sibling declarations sharing the same unqualified name.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub param_types: Vec<TypeHandle>,
    pub return_type: TypeHandle,
    pub decl_index: usize,
}

/// Unqualified name -> every overload registered under it.
#[derive(Debug, Default)]
pub struct FunctionTable {
    pub entries: HashMap<String, Vec<FuncSig>>,
}

impl FunctionTable {
    fn find<'a>(
        &'a self,
        registry: &TypeRegistry,
        name: &str,
        arg_types: &[TypeHandle],
        source: &str,
        span: Span,
    ) -> Result<&'a FuncSig, Error> {
        if let Some(sigs) = self.entries.get(name) {
            for sig in sigs {
                if sig.param_types.len() != arg_types.len() {
                    continue;
                }
                let mut all_same = true;
                for (p, a) in sig.param_types.iter().zip(arg_types.iter()) {
                    if !registry.are_same(*p, *a)? {
                        all_same = false;
                        break;
                    }
                }
                if all_same {
                    return Ok(sig);
                }
            }
        }
        Err(Error::Semantic {
            at: Position::at(source, span.begin),
            msg: format!(
                "No matching overload for '{}({})' in `{}`",
                name,
                arg_types
                    .iter()
                    .map(|t| registry.to_string(*t))
                    .collect::<Vec<_>>()
                    .join(","),
                snippet(source, span)
            ),
        })
    }
}

/// Reserved unqualified function name each operator resolves overloads
/// against. Bitwise-NOT gets its own name rather than sharing
/// bitwise-OR's `__bitor__`, which would make the two operators
/// indistinguishable during overload resolution.
fn unary_reserved_name(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Positive => "__positive__",
        UnaryOp::Negative => "__negative__",
        UnaryOp::Not => "__not__",
        UnaryOp::BitNot => "__bitnot__",
    }
}

fn binary_reserved_name(op: BinaryOp) -> Option<&'static str> {
    Some(match op {
        BinaryOp::Add => "__add__",
        BinaryOp::Subtract => "__subtract__",
        BinaryOp::Multiply => "__multiply__",
        BinaryOp::Divide => "__divide__",
        BinaryOp::Modulo => "__modulo__",
        BinaryOp::BitAnd => "__bitand__",
        BinaryOp::BitOr => "__bitor__",
        BinaryOp::BitXor => "__bitxor__",
        BinaryOp::Shl => "__lshift__",
        BinaryOp::Shr => "__rshift__",
        BinaryOp::Equal => "__equal__",
        BinaryOp::NotEqual => "__notequal__",
        BinaryOp::Less => "__less__",
        BinaryOp::Greater => "__greater__",
        BinaryOp::LessOrEqual => "__lessorequal__",
        BinaryOp::GreaterOrEqual => "__greaterorequal__",
        BinaryOp::And => "__and__",
        BinaryOp::Or => "__or__",
        BinaryOp::Assign => return None,
    })
}

/// Scalar builtins `+ - * / %` and bitwise/shift operators apply to, and the
/// comparisons that yield `bool` for them.
const INTEGER_BUILTINS: &[&str] = &["i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "char"];

const ARITHMETIC_OPS: &[&str] = &[
    "__add__",
    "__subtract__",
    "__multiply__",
    "__divide__",
    "__modulo__",
    "__bitand__",
    "__bitor__",
    "__bitxor__",
    "__lshift__",
    "__rshift__",
];

const COMPARISON_OPS: &[&str] = &[
    "__equal__",
    "__notequal__",
    "__less__",
    "__greater__",
    "__lessorequal__",
    "__greaterorequal__",
];

/// Registers the built-in operator overloads every scalar program relies
/// on: arithmetic/bitwise ops close over each integer builtin, comparisons
/// take two of the same integer builtin and yield `bool`, and `bool` gets
/// its own equality and logical connectives. There is no user syntax to
/// declare these, so they are seeded directly into the table rather than
/// collected from `FunctionDecl`s; `decl_index` is unused for them.
fn seed_operator_overloads(registry: &mut TypeRegistry, table: &mut FunctionTable) {
    let boolh = registry.named("bool");
    for &name in INTEGER_BUILTINS {
        let ty = registry.named(name);
        for &op in ARITHMETIC_OPS {
            table.entries.entry(op.to_string()).or_default().push(FuncSig {
                param_types: vec![ty, ty],
                return_type: ty,
                decl_index: usize::MAX,
            });
        }
        for &op in COMPARISON_OPS {
            table.entries.entry(op.to_string()).or_default().push(FuncSig {
                param_types: vec![ty, ty],
                return_type: boolh,
                decl_index: usize::MAX,
            });
        }
        for &op in &["__positive__", "__negative__", "__bitnot__"] {
            table.entries.entry(op.to_string()).or_default().push(FuncSig {
                param_types: vec![ty],
                return_type: ty,
                decl_index: usize::MAX,
            });
        }
    }
    for &op in &["__equal__", "__notequal__", "__and__", "__or__"] {
        table.entries.entry(op.to_string()).or_default().push(FuncSig {
            param_types: vec![boolh, boolh],
            return_type: boolh,
            decl_index: usize::MAX,
        });
    }
    table.entries.entry("__not__".to_string()).or_default().push(FuncSig {
        param_types: vec![boolh],
        return_type: boolh,
        decl_index: usize::MAX,
    });
}

fn type_expr_to_handle(registry: &mut TypeRegistry, type_expr: &TypeExpr) -> TypeHandle {
    match type_expr {
        TypeExpr::Named(name) => registry.named(name),
        TypeExpr::Pointer(base) => {
            let base = type_expr_to_handle(registry, base);
            registry.pointer_of(base)
        }
        TypeExpr::Array(base) => {
            let base = type_expr_to_handle(registry, base);
            registry.array_of(base)
        }
    }
}

/// Builds the comma-separated mangled name `name(t1,t2,...)` with no
/// trailing comma after the last parameter type.
fn mangle(registry: &TypeRegistry, name: &str, arg_types: &[TypeHandle]) -> String {
    let joined = arg_types
        .iter()
        .map(|t| registry.to_string(*t))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}({})", name, joined)
}

struct FunctionContext {
    locals: Vec<(String, TypeHandle)>,
    result_type: TypeHandle,
}

impl FunctionContext {
    fn lookup(&self, name: &str) -> Option<TypeHandle> {
        self.locals
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }
}

pub fn analyze(module: &mut Module, registry: &mut TypeRegistry, source: &str) -> Result<FunctionTable, Error> {
    let table = collect(module, registry, source)?;
    debug!("collected {} function name(s)", table.entries.len());
    for decl in &mut module.decls {
        validate(decl, registry, &table, source)?;
    }
    debug!("validated {} function declaration(s)", module.decls.len());
    Ok(table)
}

/// Phase 1 — collect: registers each `FunctionDecl` under its unqualified
/// name, rejecting any whose parameter-type list already exists in the
/// cluster, and writes the mangled signature-qualified name back onto the
/// declaration (the symbol the code emitter and linker will use).
fn collect(module: &mut Module, registry: &mut TypeRegistry, source: &str) -> Result<FunctionTable, Error> {
    let mut table = FunctionTable::default();
    seed_operator_overloads(registry, &mut table);
    for (decl_index, decl) in module.decls.iter_mut().enumerate() {
        let param_types: Vec<TypeHandle> = decl
            .params
            .iter()
            .map(|p| type_expr_to_handle(registry, &p.type_expr))
            .collect();
        let return_type = type_expr_to_handle(registry, &decl.result_type);

        let existing = table.entries.entry(decl.name.clone()).or_default();
        for sig in existing.iter() {
            if sig.param_types.len() == param_types.len() {
                let mut all_same = true;
                for (a, b) in sig.param_types.iter().zip(param_types.iter()) {
                    if !registry.are_same(*a, *b)? {
                        all_same = false;
                        break;
                    }
                }
                if all_same {
                    return Err(Error::Semantic {
                        at: Position::at(source, decl.span.begin),
                        msg: format!(
                            "Function is already defined: {} (`{}`)",
                            decl.name,
                            snippet(source, decl.span)
                        ),
                    });
                }
            }
        }

        decl.mangled_name = Some(mangle(registry, &decl.name, &param_types));
        existing.push(FuncSig {
            param_types,
            return_type,
            decl_index,
        });
    }
    Ok(table)
}

/// Phase 2 — validate: installs parameters into a fresh local-variable
/// map, saves the return type as the current expected result, and walks
/// the body.
fn validate(
    decl: &mut FunctionDecl,
    registry: &mut TypeRegistry,
    table: &FunctionTable,
    source: &str,
) -> Result<(), Error> {
    let mut locals = Vec::new();
    for param in &decl.params {
        let ty = type_expr_to_handle(registry, &param.type_expr);
        locals.push((param.name.clone(), ty));
    }
    let result_type = type_expr_to_handle(registry, &decl.result_type);
    let mut ctx = FunctionContext { locals, result_type };

    walk_stmt(&mut decl.body, registry, table, &mut ctx, source)?;

    decl.locals = ctx.locals;
    Ok(())
}

fn bool_handle(registry: &mut TypeRegistry) -> TypeHandle {
    registry.named("bool")
}

fn i64_handle(registry: &mut TypeRegistry) -> TypeHandle {
    registry.named("i64")
}

fn walk_stmt(
    stmt: &mut Stmt,
    registry: &mut TypeRegistry,
    table: &FunctionTable,
    ctx: &mut FunctionContext,
    source: &str,
) -> Result<(), Error> {
    match stmt {
        Stmt::Block { stmts, .. } => {
            for s in stmts {
                walk_stmt(s, registry, table, ctx, source)?;
            }
            Ok(())
        }
        Stmt::Var { names, inits, span } => {
            for (name, init) in names.iter().zip(inits.iter_mut()) {
                let ty = infer_expr(init, registry, table, ctx, source)?;
                if ctx.lookup(name).is_some() {
                    return Err(Error::Semantic {
                        at: Position::at(source, span.begin),
                        msg: format!(
                            "Variable '{}' is already declared (`{}`)",
                            name,
                            snippet(source, *span)
                        ),
                    });
                }
                ctx.locals.push((name.clone(), ty));
            }
            Ok(())
        }
        Stmt::Return { expr, span } => {
            let ty = infer_expr(expr, registry, table, ctx, source)?;
            if !registry.are_same(ty, ctx.result_type)? {
                return Err(Error::Semantic {
                    at: Position::at(source, span.begin),
                    msg: format!(
                        "Return expression has to be of function result type (`{}`)",
                        snippet(source, *span)
                    ),
                });
            }
            Ok(())
        }
        Stmt::While { cond, body, span } => {
            let ty = infer_expr(cond, registry, table, ctx, source)?;
            let boolh = bool_handle(registry);
            if !registry.are_same(ty, boolh)? {
                return Err(Error::Semantic {
                    at: Position::at(source, span.begin),
                    msg: format!(
                        "While condition has to be of boolean type (`{}`)",
                        snippet(source, cond.span())
                    ),
                });
            }
            walk_stmt(body, registry, table, ctx, source)
        }
        Stmt::If { cond, then_branch, else_branch, span } => {
            let ty = infer_expr(cond, registry, table, ctx, source)?;
            let boolh = bool_handle(registry);
            if !registry.are_same(ty, boolh)? {
                return Err(Error::Semantic {
                    at: Position::at(source, span.begin),
                    msg: format!(
                        "If condition has to be of boolean type (`{}`)",
                        snippet(source, cond.span())
                    ),
                });
            }
            walk_stmt(then_branch, registry, table, ctx, source)?;
            if let Some(else_branch) = else_branch {
                walk_stmt(else_branch, registry, table, ctx, source)?;
            }
            Ok(())
        }
        Stmt::Expr { expr, .. } => {
            infer_expr(expr, registry, table, ctx, source)?;
            Ok(())
        }
    }
}

fn infer_expr(
    expr: &mut Expr,
    registry: &mut TypeRegistry,
    table: &FunctionTable,
    ctx: &mut FunctionContext,
    source: &str,
) -> Result<TypeHandle, Error> {
    let span = expr.span();
    let ty = match expr {
        Expr::Integer { .. } => i64_handle(registry),
        Expr::Identifier { text, .. } => ctx.lookup(text).ok_or_else(|| Error::Semantic {
            at: Position::at(source, span.begin),
            msg: format!("Undefined identifier '{}'", text),
        })?,
        Expr::Unary { op, operand, .. } => {
            let operand_ty = infer_expr(operand, registry, table, ctx, source)?;
            let name = unary_reserved_name(*op);
            table.find(registry, name, &[operand_ty], source, span)?.return_type
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            let lty = infer_expr(lhs, registry, table, ctx, source)?;
            let rty = infer_expr(rhs, registry, table, ctx, source)?;
            match binary_reserved_name(*op) {
                None => {
                    // `=` requires identical types; result is the lhs type.
                    if !registry.are_same(lty, rty)? {
                        return Err(Error::Semantic {
                            at: Position::at(source, span.begin),
                            msg: format!(
                                "type mismatch in assignment (`{}`)",
                                snippet(source, span)
                            ),
                        });
                    }
                    lty
                }
                Some(name) => table.find(registry, name, &[lty, rty], source, span)?.return_type,
            }
        }
        Expr::Call { callee, args, mangled_name, .. } => {
            let mut arg_types = Vec::with_capacity(args.len());
            for arg in args.iter_mut() {
                arg_types.push(infer_expr(arg, registry, table, ctx, source)?);
            }
            let name = match callee.as_ref() {
                Expr::Identifier { text, .. } => text.clone(),
                _ => {
                    return Err(Error::Unsupported("indirect call (__call__)".to_string()));
                }
            };
            let mangled = mangle(registry, &name, &arg_types);
            *mangled_name = Some(mangled.clone());
            table.find(registry, &name, &arg_types, source, span)?.return_type
        }
        Expr::Index { value, args, .. } => {
            let vty = infer_expr(value, registry, table, ctx, source)?;
            match registry.kind(vty).clone() {
                TypeKind::Array { base } => {
                    if args.len() != 1 {
                        return Err(Error::Semantic {
                            at: Position::at(source, span.begin),
                            msg: format!("Invalid index type (`{}`)", snippet(source, span)),
                        });
                    }
                    let arg_ty = infer_expr(&mut args[0], registry, table, ctx, source)?;
                    let i64h = i64_handle(registry);
                    if !registry.are_same(arg_ty, i64h)? {
                        return Err(Error::Semantic {
                            at: Position::at(source, span.begin),
                            msg: format!("Invalid index type (`{}`)", snippet(source, span)),
                        });
                    }
                    base
                }
                TypeKind::Named { .. } => {
                    for arg in args.iter_mut() {
                        infer_expr(arg, registry, table, ctx, source)?;
                    }
                    return Err(Error::Unsupported("indexed overload (__index__)".to_string()));
                }
                _ => {
                    for arg in args.iter_mut() {
                        infer_expr(arg, registry, table, ctx, source)?;
                    }
                    return Err(Error::Semantic {
                        at: Position::at(source, span.begin),
                        msg: format!("Invalid index type (`{}`)", snippet(source, span)),
                    });
                }
            }
        }
    };
    expr.set_ty(ty);
    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn analyze_src(src: &str) -> Result<(Module, FunctionTable, TypeRegistry), Error> {
        let mut module = Parser::new(src).parse_module().unwrap();
        let mut registry = TypeRegistry::new(64);
        let table = analyze(&mut module, &mut registry, src)?;
        Ok((module, table, registry))
    }

    #[test]
    fn redeclaration_with_identical_signature_is_rejected() {
        let src = "fn f(x: i64): i64 { return x } fn f(x: i64): i64 { return x }";
        let err = analyze_src(src).unwrap_err();
        assert!(matches!(err, Error::Semantic { .. }));
        assert!(format!("{}", err).contains("already defined"));
    }

    #[test]
    fn overload_resolves_to_i64_for_integer_literal() {
        let src = "fn f(x: i32): i32 { return 0 } fn f(x: i64): i64 { return x } fn main(): i64 { return f(1) }";
        let (module, _table, registry) = analyze_src(src).unwrap();
        let main = module.decls.iter().find(|d| d.name == "main").unwrap();
        match &main.body {
            Stmt::Block { stmts, .. } => match &stmts[0] {
                Stmt::Return { expr, .. } => match expr {
                    Expr::Call { mangled_name, .. } => {
                        assert_eq!(mangled_name.as_deref(), Some("f(i64)"));
                    }
                    other => panic!("expected Call, got {:?}", other),
                },
                other => panic!("expected Return, got {:?}", other),
            },
            other => panic!("expected Block body, got {:?}", other),
        }
        let _ = registry;
    }

    #[test]
    fn while_requires_bool_condition() {
        let src = "fn main(): i64 { while (1) { return 0 } }";
        let err = analyze_src(src).unwrap_err();
        assert!(format!("{}", err).contains("While condition has to be of boolean type"));
    }

    #[test]
    fn return_type_mismatch_is_rejected() {
        let src = "fn h(): i32 { return 0 }";
        let err = analyze_src(src).unwrap_err();
        assert!(format!("{}", err).contains("Return expression has to be of function result type"));
    }

    #[test]
    fn array_index_with_bool_is_rejected() {
        let src = "fn g(a: i64[]): i64 { return a[1 == 1] }";
        let err = analyze_src(src).unwrap_err();
        assert!(format!("{}", err).contains("Invalid index type"));
    }

    #[test]
    fn array_index_with_i64_succeeds() {
        let src = "fn g(a: i64[]): i64 { return a[0] }";
        assert!(analyze_src(src).is_ok());
    }

    #[test]
    fn builtin_arithmetic_type_checks_without_user_declarations() {
        let src = "fn main(): i64 { return 1 + 2 * 3 }";
        assert!(analyze_src(src).is_ok());
    }

    #[test]
    fn builtin_comparison_yields_bool() {
        let src = "fn main(): i64 { while (1 == 1) { return 0 } return 1 }";
        assert!(analyze_src(src).is_ok());
    }
}
