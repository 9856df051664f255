//! Whole-pipeline integration tests: source text in, either a validated PE
//! image or a specific diagnostic message out. Each test exercises the
//! compiler the way a user would — through [`flatc::compile`] only, never
//! poking at an internal stage directly.

fn compile_ok(source: &str) -> Vec<u8> {
    flatc::compile(source).unwrap_or_else(|err| panic!("expected success, got: {}", err))
}

fn compile_err(source: &str) -> String {
    match flatc::compile(source) {
        Ok(_) => panic!("expected a compile error, got a PE image"),
        Err(err) => err.to_string(),
    }
}

fn assert_valid_pe(bytes: &[u8]) {
    assert_eq!(&bytes[0..2], b"MZ", "missing DOS signature");
    let e_lfanew = u32::from_le_bytes(bytes[0x3c..0x40].try_into().unwrap()) as usize;
    assert_eq!(&bytes[e_lfanew..e_lfanew + 4], b"PE\0\0", "missing PE signature");
    let machine = u16::from_le_bytes(bytes[e_lfanew + 4..e_lfanew + 6].try_into().unwrap());
    assert_eq!(machine, 0x8664, "expected IMAGE_FILE_MACHINE_AMD64");
}

/// The smallest possible program compiles to a well-formed image.
#[test]
fn identity_program_is_a_valid_pe_image() {
    let bytes = compile_ok("fn main(): i64 { return 0 }");
    assert_valid_pe(&bytes);
}

/// A call picks the overload whose parameter type matches the argument's
/// inferred type, here `i64` for a bare integer literal.
#[test]
fn call_resolves_the_matching_overload() {
    let src = "\
        fn f(x: i32): i32 { return x } \
        fn f(x: i64): i64 { return x } \
        fn main(): i64 { return f(1) }";
    assert_valid_pe(&compile_ok(src));
}

/// Two declarations with identical name and parameter types are rejected,
/// regardless of return type.
#[test]
fn redeclaration_with_identical_parameters_is_rejected() {
    let src = "\
        fn f(x: i64): i64 { return x } \
        fn f(x: i64): i32 { return 0 } \
        fn main(): i64 { return 0 }";
    assert!(compile_err(src).contains("already defined"));
}

/// `while`'s condition must be `bool`; a bare integer is not implicitly
/// converted.
#[test]
fn while_condition_must_be_boolean() {
    let src = "fn main(): i64 { while (1) { return 0 } return 1 }";
    assert!(compile_err(src).contains("While condition has to be of boolean type"));
}

/// A comparison expression does satisfy the `while` condition's `bool` requirement.
#[test]
fn while_condition_accepts_a_comparison() {
    let src = "\
        fn main(): i64 { \
            let i = 0 \
            while (i < 3) { i = i + 1 } \
            return i \
        }";
    assert_valid_pe(&compile_ok(src));
}

/// Indexing an array with an `i64` expression succeeds; indexing it with
/// anything else is rejected, including a `bool`-typed expression.
#[test]
fn array_index_requires_i64() {
    let ok = "fn g(a: i64[]): i64 { return a[0] } fn main(): i64 { return 0 }";
    assert_valid_pe(&compile_ok(ok));

    let bad = "fn g(a: i64[]): i64 { return a[1 == 1] } fn main(): i64 { return 0 }";
    assert!(compile_err(bad).contains("Invalid index type"));
}

/// A `return` expression must match the enclosing function's result type
/// exactly.
#[test]
fn return_type_must_match_result_type() {
    let src = "fn h(): i32 { return 0 } fn main(): i64 { return 0 }";
    assert!(compile_err(src).contains("Return expression has to be of function result type"));
}

/// No parameterless `main` — nothing for the PE entry stub to call.
#[test]
fn missing_entry_point_is_rejected() {
    let src = "fn helper(x: i64): i64 { return x }";
    assert!(compile_err(src).contains("no entry point"));
}

/// A parameterless `main` is required; an overload that takes arguments
/// does not satisfy it even if one also exists with no parameters.
#[test]
fn main_with_parameters_does_not_count_as_the_entry_point_alone() {
    let src = "fn main(x: i64): i64 { return x }";
    assert!(compile_err(src).contains("no entry point"));
}

/// Builtin arithmetic, bitwise, and unary operators type-check and emit
/// without any user-declared operator overloads.
#[test]
fn arithmetic_and_bitwise_expressions_compile() {
    let src = "\
        fn main(): i64 { \
            let a = 1 + 2 * 3 - 4 / 2 \
            let b = a & 1 | 2 ^ 3 \
            let c = ~b + -a \
            return c \
        }";
    assert_valid_pe(&compile_ok(src));
}

/// `if`/`else` both branch; the function still reaches a `return` on
/// either path.
#[test]
fn if_else_both_branches_compile() {
    let src = "\
        fn main(): i64 { \
            let x = 5 \
            if (x < 10) { return 1 } else { return 0 } \
        }";
    assert_valid_pe(&compile_ok(src));
}

/// Array indexing reduces to pointer arithmetic over a pointer-sized
/// element; passing an array parameter by value and indexing it round-trips.
#[test]
fn array_parameter_indexing_compiles() {
    let src = "\
        fn sum_first_two(a: i64[]): i64 { return a[0] + a[1] } \
        fn main(): i64 { return 0 }";
    assert_valid_pe(&compile_ok(src));
}

/// A function call nested inside arithmetic emits a call and keeps
/// evaluating the rest of the expression against its result.
#[test]
fn nested_call_in_arithmetic_compiles() {
    let src = "\
        fn double(x: i64): i64 { return x * 2 } \
        fn main(): i64 { return double(21) + 0 }";
    assert_valid_pe(&compile_ok(src));
}
