//! The code emitter: a tree-walking pass over the semantically validated
//! AST that emits x86-64 machine code into the linker's byte buffer using
//! a strict stack-machine evaluation model (every expression leaves its
//! result as a single 8-byte value on the CPU stack).

pub mod x64;

use log::debug;

use crate::ast::*;
use crate::error::{Error, Position};
use crate::linker::Linker;
use crate::types::{TypeHandle, TypeRegistry};
use x64::Reg;

/// Per-function emission context: "current locals" and "current return
/// type" are threaded explicitly through the walk rather than held as
/// mutable fields on the emitter.
struct FunctionCtx<'a> {
    /// name -> (stack offset from RBP, in bytes; positive, subtracted)
    locals: Vec<(&'a str, i32)>,
    epilogue_label: String,
    label_counter: u32,
}

impl<'a> FunctionCtx<'a> {
    fn offset_of(&self, name: &str) -> i32 {
        self.locals
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, o)| *o)
            .expect("semantic pass guarantees every identifier resolves to a local")
    }

    fn fresh_label(&mut self, prefix: &str, function_name: &str) -> String {
        let n = self.label_counter;
        self.label_counter += 1;
        format!("__label_{}_{}_{}", function_name, prefix, n)
    }
}

const POINTER_SIZE: i32 = 8;
/// 8 pushed callee-saved registers (`RDI,RSI,RBX,RBP,R12,R13,R14,R15`), 64 bytes.
const CALLEE_SAVED: &[Reg] = &[
    Reg::Rdi,
    Reg::Rsi,
    Reg::Rbx,
    Reg::Rbp,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];
const PARAM_REGS: &[Reg] = &[Reg::Rcx, Reg::Rdx, Reg::R8, Reg::R9];

/// Displacement for a `rel32`-encoded instruction, computed relative to the
/// byte immediately following the displacement field (i.e. the start of
/// the next instruction): `target - (address_of_disp_field + 4)`.
pub(crate) fn rel32(linker: &Linker, opcode_len: u64, target: u64) -> i32 {
    let disp_field_addr = linker.current_address() + opcode_len;
    (target as i64 - (disp_field_addr as i64 + 4)) as i32
}

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Emits every function declaration in the module, in declaration order.
/// Called once per linker pass (layout, then emit); the sequence of
/// `symbol`/`push` calls must be identical across both for offsets to
/// agree.
pub fn emit_module(
    module: &Module,
    registry: &TypeRegistry,
    linker: &mut Linker,
) -> Result<(), Error> {
    for decl in &module.decls {
        emit_function(decl, registry, linker)?;
    }
    Ok(())
}

fn emit_function(
    decl: &FunctionDecl,
    registry: &TypeRegistry,
    linker: &mut Linker,
) -> Result<(), Error> {
    let mangled_name = decl
        .mangled_name
        .as_ref()
        .expect("semantic pass writes mangled_name on every FunctionDecl");
    debug!("emitting function '{}'", mangled_name);
    linker.symbol(mangled_name);

    // Per-local stack slots: each local gets a pointer-size-aligned slot
    // sized to ceil(bit_size/8) rounded up to pointer size, assigned in
    // declaration order (parameters first, then body locals).
    let mut locals = Vec::with_capacity(decl.locals.len());
    let mut offset = 0i32;
    for (name, ty) in &decl.locals {
        let bits = size_of_local(registry, *ty)?;
        let size = round_up(bits.div_ceil(8), POINTER_SIZE as u32) as i32;
        offset += size;
        locals.push((name.as_str(), offset));
    }
    let raw_stack_space = offset as u32;
    // `max(4, num_params)` being even adds 8 bytes to restore 16-byte
    // alignment after the 8 callee-saved pushes; computed once here so the
    // prologue and epilogue agree on exactly how much was reserved.
    let num_params = decl.params.len().max(4);
    let stack_space = if num_params % 2 == 0 {
        raw_stack_space + 8
    } else {
        raw_stack_space
    };

    let epilogue_label = format!("__epilogue_{}", mangled_name);
    let mut ctx = FunctionCtx {
        locals,
        epilogue_label,
        label_counter: 0,
    };

    emit_prologue(decl, &mut ctx, stack_space, linker);
    emit_stmt(&decl.body, decl, registry, linker, &mut ctx)?;
    linker.symbol(&ctx.epilogue_label);
    emit_epilogue(&ctx, stack_space, linker);
    Ok(())
}

fn size_of_local(registry: &TypeRegistry, ty: TypeHandle) -> Result<u32, Error> {
    let bits = registry.bit_size(ty)?;
    if bits > registry.pointer_bits() {
        return Err(Error::Unsupported(
            "local variables larger than pointer size".to_string(),
        ));
    }
    Ok(bits)
}

/// Fixed prologue sequence: spill the first four register parameters into
/// the caller's 32-byte home area, push the 8 callee-saved registers, then
/// reserve local stack space (padded by 8 bytes when needed to keep 16-byte
/// alignment after the pushes).
fn emit_prologue(decl: &FunctionDecl, _ctx: &mut FunctionCtx, stack_space: u32, linker: &mut Linker) {
    for (i, _param) in decl.params.iter().enumerate().take(4) {
        let home_offset: u8 = 8 * (i as u8 + 1);
        linker.push_bytes(&x64::mov_rsp_disp8_from_reg(home_offset, PARAM_REGS[i]));
    }
    for &reg in CALLEE_SAVED {
        linker.push_bytes(&x64::push_reg(reg));
    }
    if stack_space > 0 {
        linker.push_bytes(&x64::sub_rsp_imm32(stack_space));
    }
}

/// Undoes the prologue in reverse: restore stack space, pop the callee-saved
/// registers in reverse order, `ret`.
fn emit_epilogue(_ctx: &FunctionCtx, stack_space: u32, linker: &mut Linker) {
    linker.push_bytes(&x64::add_rsp_imm32(stack_space));
    for &reg in CALLEE_SAVED.iter().rev() {
        linker.push_bytes(&x64::pop_reg(reg));
    }
    linker.push_bytes(&x64::ret());
}

fn emit_stmt(
    stmt: &Stmt,
    decl: &FunctionDecl,
    registry: &TypeRegistry,
    linker: &mut Linker,
    ctx: &mut FunctionCtx,
) -> Result<(), Error> {
    match stmt {
        Stmt::Block { stmts, .. } => {
            for s in stmts {
                emit_stmt(s, decl, registry, linker, ctx)?;
            }
            Ok(())
        }
        Stmt::Var { names, inits, .. } => {
            for (name, init) in names.iter().zip(inits.iter()) {
                emit_expr(init, decl, registry, linker, ctx)?;
                let offset = ctx.offset_of(name);
                linker.push_bytes(&x64::pop_reg(Reg::Rax));
                linker.push_bytes(&x64::mov_rbp_disp_from_reg(-offset, Reg::Rax));
            }
            Ok(())
        }
        Stmt::Return { expr, .. } => {
            emit_expr(expr, decl, registry, linker, ctx)?;
            linker.push_bytes(&x64::pop_reg(Reg::Rax));
            let opcode_len = 1; // 0xE9
            let target = linker.get_symbol(&ctx.epilogue_label)?;
            let disp = rel32(linker, opcode_len, target);
            linker.push_bytes(&x64::jmp_rel32(disp));
            Ok(())
        }
        Stmt::While { cond, body, .. } => {
            let top_label = ctx.fresh_label("while_top", &decl.mangled_name.clone().unwrap());
            let end_label = ctx.fresh_label("while_end", &decl.mangled_name.clone().unwrap());
            linker.symbol(&top_label);
            emit_expr(cond, decl, registry, linker, ctx)?;
            linker.push_bytes(&x64::pop_reg(Reg::Rax));
            linker.push_bytes(&x64::test_reg_reg(Reg::Rax));
            let opcode_len = 2; // 0F 84
            let target = linker.get_symbol(&end_label)?;
            let disp = rel32(linker, opcode_len, target);
            linker.push_bytes(&x64::jz_rel32(disp));
            emit_stmt(body, decl, registry, linker, ctx)?;
            let opcode_len = 1; // 0xE9
            let target = linker.get_symbol(&top_label)?;
            let disp = rel32(linker, opcode_len, target);
            linker.push_bytes(&x64::jmp_rel32(disp));
            linker.symbol(&end_label);
            Ok(())
        }
        Stmt::If { cond, then_branch, else_branch, .. } => {
            let else_label = ctx.fresh_label("if_else", &decl.mangled_name.clone().unwrap());
            let end_label = ctx.fresh_label("if_end", &decl.mangled_name.clone().unwrap());
            emit_expr(cond, decl, registry, linker, ctx)?;
            linker.push_bytes(&x64::pop_reg(Reg::Rax));
            linker.push_bytes(&x64::test_reg_reg(Reg::Rax));
            let opcode_len = 2;
            let target = linker.get_symbol(&else_label)?;
            let disp = rel32(linker, opcode_len, target);
            linker.push_bytes(&x64::jz_rel32(disp));
            emit_stmt(then_branch, decl, registry, linker, ctx)?;
            let opcode_len = 1;
            let target = linker.get_symbol(&end_label)?;
            let disp = rel32(linker, opcode_len, target);
            linker.push_bytes(&x64::jmp_rel32(disp));
            linker.symbol(&else_label);
            if let Some(else_branch) = else_branch {
                emit_stmt(else_branch, decl, registry, linker, ctx)?;
            }
            linker.symbol(&end_label);
            Ok(())
        }
        Stmt::Expr { expr, .. } => {
            emit_expr(expr, decl, registry, linker, ctx)?;
            // discard the value a bare expression statement leaves behind
            linker.push_bytes(&x64::pop_reg(Reg::Rax));
            Ok(())
        }
    }
}

fn emit_expr(
    expr: &Expr,
    decl: &FunctionDecl,
    registry: &TypeRegistry,
    linker: &mut Linker,
    ctx: &mut FunctionCtx,
) -> Result<(), Error> {
    match expr {
        Expr::Integer { text, .. } => {
            let value: i64 = text.parse().map_err(|_| Error::Semantic {
                at: Position::default(),
                msg: format!("Invalid integer literal '{}'", text),
            })?;
            linker.push_bytes(&x64::mov_reg_imm64(Reg::Rax, value as u64));
            linker.push_bytes(&x64::push_reg(Reg::Rax));
            Ok(())
        }
        Expr::Identifier { text, ty, .. } => {
            let bits = registry.bit_size(ty.expect("typed by semantic pass"))?;
            if bits > registry.pointer_bits() {
                return Err(Error::Unsupported(
                    "loading a local larger than pointer size".to_string(),
                ));
            }
            let offset = ctx.offset_of(text);
            linker.push_bytes(&x64::mov_reg_from_rbp_disp(Reg::Rax, -offset));
            linker.push_bytes(&x64::push_reg(Reg::Rax));
            Ok(())
        }
        Expr::Unary { op, operand, .. } => {
            emit_expr(operand, decl, registry, linker, ctx)?;
            linker.push_bytes(&x64::pop_reg(Reg::Rax));
            match op {
                UnaryOp::Positive => {}
                UnaryOp::Negative => linker.push_bytes(&x64::neg_reg(Reg::Rax)),
                UnaryOp::Not => linker.push_bytes(&x64::xor_al_imm8(1)),
                UnaryOp::BitNot => linker.push_bytes(&x64::not_reg(Reg::Rax)),
            };
            linker.push_bytes(&x64::push_reg(Reg::Rax));
            Ok(())
        }
        Expr::Binary { op, lhs, rhs, .. } => emit_binary(*op, lhs, rhs, decl, registry, linker, ctx),
        Expr::Call { callee, args, mangled_name, .. } => {
            emit_call(callee, args, mangled_name.as_ref().unwrap(), decl, registry, linker, ctx)
        }
        Expr::Index { .. } => {
            // Array indexing only ever appears as `Array(base)` after the
            // semantic pass (anything else is rejected there), reduced to
            // pointer arithmetic: base_address + index * element_size.
            emit_index(expr, decl, registry, linker, ctx)
        }
    }
}

fn emit_index(
    expr: &Expr,
    decl: &FunctionDecl,
    registry: &TypeRegistry,
    linker: &mut Linker,
    ctx: &mut FunctionCtx,
) -> Result<(), Error> {
    let (value, args, ty) = match expr {
        Expr::Index { value, args, ty, .. } => (value, args, ty),
        _ => unreachable!(),
    };
    let element_ty = ty.expect("typed by semantic pass");
    let element_bits = registry.bit_size(element_ty)?;
    if element_bits > registry.pointer_bits() {
        return Err(Error::Unsupported(
            "indexing an element larger than pointer size".to_string(),
        ));
    }
    let element_size = (element_bits / 8).max(1) as i64;

    emit_expr(value, decl, registry, linker, ctx)?;
    emit_expr(&args[0], decl, registry, linker, ctx)?;
    linker.push_bytes(&x64::pop_reg(Reg::Rcx)); // index
    linker.push_bytes(&x64::pop_reg(Reg::Rax)); // array base
    linker.push_bytes(&x64::mov_reg_imm64(Reg::Rbx, element_size as u64));
    linker.push_bytes(&x64::imul_reg_reg(Reg::Rcx, Reg::Rbx));
    linker.push_bytes(&x64::add_reg_reg(Reg::Rax, Reg::Rcx));
    linker.push_bytes(&x64::mov_reg_from_mem_reg(Reg::Rax, Reg::Rax));
    linker.push_bytes(&x64::push_reg(Reg::Rax));
    Ok(())
}

fn emit_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    decl: &FunctionDecl,
    registry: &TypeRegistry,
    linker: &mut Linker,
    ctx: &mut FunctionCtx,
) -> Result<(), Error> {
    if op == BinaryOp::Assign {
        // The lvalue must be an identifier; emit the rvalue, store into its
        // slot, and leave the stored value as the expression's result.
        let name = match lhs {
            Expr::Identifier { text, .. } => text.as_str(),
            _ => {
                return Err(Error::Unsupported(
                    "assignment to a non-identifier lvalue".to_string(),
                ));
            }
        };
        emit_expr(rhs, decl, registry, linker, ctx)?;
        let offset = ctx.offset_of(name);
        linker.push_bytes(&x64::pop_reg(Reg::Rax));
        linker.push_bytes(&x64::mov_rbp_disp_from_reg(-offset, Reg::Rax));
        linker.push_bytes(&x64::push_reg(Reg::Rax));
        return Ok(());
    }

    emit_expr(lhs, decl, registry, linker, ctx)?;
    emit_expr(rhs, decl, registry, linker, ctx)?;
    linker.push_bytes(&x64::pop_reg(Reg::Rcx));
    linker.push_bytes(&x64::pop_reg(Reg::Rax));

    match op {
        BinaryOp::Add => linker.push_bytes(&x64::add_reg_reg(Reg::Rax, Reg::Rcx)),
        BinaryOp::Subtract => linker.push_bytes(&x64::sub_reg_reg(Reg::Rax, Reg::Rcx)),
        BinaryOp::Multiply => linker.push_bytes(&x64::imul_reg_reg(Reg::Rax, Reg::Rcx)),
        BinaryOp::Divide => {
            linker.push_bytes(&x64::cqo());
            linker.push_bytes(&x64::idiv_reg(Reg::Rcx));
        }
        // the quotient lands in RAX and the remainder in RDX from the same
        // IDIV — take RDX.
        BinaryOp::Modulo => {
            linker.push_bytes(&x64::cqo());
            linker.push_bytes(&x64::idiv_reg(Reg::Rcx));
            linker.push_bytes(&x64::mov_reg_reg(Reg::Rax, Reg::Rdx));
        }
        BinaryOp::BitAnd | BinaryOp::And => linker.push_bytes(&x64::and_reg_reg(Reg::Rax, Reg::Rcx)),
        BinaryOp::BitOr | BinaryOp::Or => linker.push_bytes(&x64::or_reg_reg(Reg::Rax, Reg::Rcx)),
        BinaryOp::BitXor => linker.push_bytes(&x64::xor_reg_reg(Reg::Rax, Reg::Rcx)),
        BinaryOp::Shl => {
            linker.push_bytes(&x64::mov_reg_reg(Reg::Rbx, Reg::Rax));
            linker.push_bytes(&x64::mov_reg_reg(Reg::Rcx, Reg::Rcx));
            linker.push_bytes(&x64::shl_reg_cl(Reg::Rbx));
            linker.push_bytes(&x64::mov_reg_reg(Reg::Rax, Reg::Rbx));
        }
        BinaryOp::Shr => {
            linker.push_bytes(&x64::mov_reg_reg(Reg::Rbx, Reg::Rax));
            linker.push_bytes(&x64::sar_reg_cl(Reg::Rbx));
            linker.push_bytes(&x64::mov_reg_reg(Reg::Rax, Reg::Rbx));
        }
        BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::Less
        | BinaryOp::Greater
        | BinaryOp::LessOrEqual
        | BinaryOp::GreaterOrEqual => {
            linker.push_bytes(&x64::mov_reg_reg(Reg::Rbx, Reg::Rax));
            linker.push_bytes(&x64::xor_reg_reg(Reg::Rax, Reg::Rax));
            linker.push_bytes(&x64::cmp_reg_reg(Reg::Rbx, Reg::Rcx));
            let cc = match op {
                BinaryOp::Equal => x64::Cc::Equal,
                BinaryOp::NotEqual => x64::Cc::NotEqual,
                BinaryOp::Less => x64::Cc::Less,
                BinaryOp::Greater => x64::Cc::Greater,
                BinaryOp::LessOrEqual => x64::Cc::LessOrEqual,
                BinaryOp::GreaterOrEqual => x64::Cc::GreaterOrEqual,
                _ => unreachable!(),
            };
            linker.push_bytes(&x64::setcc_al(cc));
        }
        BinaryOp::Assign => unreachable!("handled above"),
    }

    linker.push_bytes(&x64::push_reg(Reg::Rax));
    Ok(())
}

/// Shadow space reserved, arguments emitted in reverse source order, the
/// first four popped into `RCX,RDX,R8,R9`, then a symbolic RIP-relative
/// call; afterwards the shadow space is restored with `add rsp,32` — using
/// `sub` here instead would grow the stack on every call rather than
/// unwinding it.
fn emit_call(
    callee: &Expr,
    args: &[Expr],
    mangled_name: &str,
    decl: &FunctionDecl,
    registry: &TypeRegistry,
    linker: &mut Linker,
    ctx: &mut FunctionCtx,
) -> Result<(), Error> {
    let _ = callee;
    linker.push_bytes(&x64::sub_rsp_imm8(32));
    for arg in args.iter().rev() {
        emit_expr(arg, decl, registry, linker, ctx)?;
    }
    for &reg in PARAM_REGS.iter().take(args.len().min(4)) {
        linker.push_bytes(&x64::pop_reg(reg));
    }
    let opcode_len = 1; // 0xE8
    let target = linker.get_symbol(mangled_name)?;
    let disp = rel32(linker, opcode_len, target);
    linker.push_bytes(&x64::call_rel32(disp));
    linker.push_bytes(&x64::add_rsp_imm8(32));
    linker.push_bytes(&x64::push_reg(Reg::Rax));
    Ok(())
}
