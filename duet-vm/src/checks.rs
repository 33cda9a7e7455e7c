//! Runtime self-check suite.
//!
//! The algebraic properties of the expression layer, compiled into the
//! engine so `QCE_CHECK=1` can execute them inside a live session (the
//! emulator environment differs enough from a test runner that this has
//! caught real bugs). The `#[cfg(test)]` suites reuse these same functions.
//!
//! Checks assert; a violated property is a bug in the engine, not an input
//! error, so panicking is the point.
#![allow(clippy::unwrap_used)]

use duet_ir::Width;
use tracing::debug;

use crate::{
    expr::{self, Expr, Pred},
    solver::{Prove, SmtSolver},
};

/// Width-dependent boundary constants, as sign-extended 64-bit payloads.
struct Bounds {
    min: i64,
    max: i64,
}

fn bounds(width: Width) -> Bounds {
    match width {
        Width::W32 => Bounds {
            min: i64::from(i32::MIN),
            max: i64::from(i32::MAX),
        },
        Width::W64 => Bounds {
            min: i64::MIN,
            max: i64::MAX,
        },
    }
}

fn assert_concrete(result: &Expr, expected: i64, what: &str) {
    match result.concrete_value() {
        Some(value) => assert_eq!(value, expected, "{what}"),
        None => panic!("{what}: expected concrete {expected}, got symbolic"),
    }
}

fn assert_equiv(solver: &SmtSolver, lhs: &Expr, rhs: &Expr, what: &str) {
    match expr::eq(solver, lhs, rhs).unwrap() {
        Pred::Concrete(true) => {}
        Pred::Concrete(false) => panic!("{what}: sides are provably distinct"),
        Pred::Symbolic(_) => panic!("{what}: sides are not forced equal"),
    }
}

fn assert_pred_equiv(solver: &SmtSolver, lhs: Pred, rhs: Pred, what: &str) {
    match (lhs, rhs) {
        (Pred::Concrete(a), Pred::Concrete(b)) => assert_eq!(a, b, "{what}"),
        (Pred::Symbolic(a), Pred::Symbolic(b)) => {
            assert_eq!(solver.prove_equiv(&a, &b), Prove::Proved, "{what}")
        }
        (a, b) => panic!("{what}: mixed modes {a:?} vs {b:?}"),
    }
}

fn assert_pred_false(pred: Pred, what: &str) {
    match pred {
        Pred::Concrete(false) => {}
        other => panic!("{what}: expected constant false, got {other:?}"),
    }
}

/// Additive and multiplicative identities over symbolic operands.
pub fn check_arith_identities(solver: &SmtSolver, width: Width) {
    let a = Expr::symbolic(width, solver.fresh_var(width));
    let b = Expr::symbolic(width, solver.fresh_var(width));
    let zero = Expr::concrete(width, 0);

    let sum = expr::add(solver, &a, &zero).unwrap();
    assert_equiv(solver, &sum, &a, "a + 0 = a");

    let diff = expr::sub(solver, &a, &a).unwrap();
    assert_concrete(&diff, 0, "a - a = 0");

    let diff = expr::sub(solver, &a, &zero).unwrap();
    assert_equiv(solver, &diff, &a, "a - 0 = a");

    let ab = expr::add(solver, &a, &b).unwrap();
    let ba = expr::add(solver, &b, &a).unwrap();
    assert_equiv(solver, &ab, &ba, "a + b = b + a");

    let product = expr::mul(solver, &a, &zero).unwrap();
    assert_concrete(&product, 0, "a * 0 = 0");

    let ab = expr::mul(solver, &a, &b).unwrap();
    let ba = expr::mul(solver, &b, &a).unwrap();
    assert_equiv(solver, &ab, &ba, "a * b = b * a");
}

/// Bitwise identities over symbolic operands.
pub fn check_bitwise_identities(solver: &SmtSolver, width: Width) {
    let a = Expr::symbolic(width, solver.fresh_var(width));
    let zero = Expr::concrete(width, 0);
    let ones = Expr::concrete(width, -1);

    assert_concrete(
        &expr::and(solver, &a, &zero).unwrap(),
        0,
        "a & 0 = 0",
    );
    assert_equiv(
        solver,
        &expr::and(solver, &a, &ones).unwrap(),
        &a,
        "a & -1 = a",
    );
    assert_equiv(
        solver,
        &expr::and(solver, &a, &a).unwrap(),
        &a,
        "a & a = a",
    );

    assert_equiv(
        solver,
        &expr::or(solver, &a, &zero).unwrap(),
        &a,
        "a | 0 = a",
    );
    assert_concrete(
        &expr::or(solver, &a, &ones).unwrap(),
        -1,
        "a | -1 = -1",
    );
    assert_equiv(
        solver,
        &expr::or(solver, &a, &a).unwrap(),
        &a,
        "a | a = a",
    );

    let complement = expr::not(solver, &a).unwrap();
    assert_equiv(
        solver,
        &expr::xor(solver, &a, &zero).unwrap(),
        &a,
        "a ^ 0 = a",
    );
    assert_equiv(
        solver,
        &expr::xor(solver, &a, &ones).unwrap(),
        &complement,
        "a ^ -1 = !a",
    );
    assert_concrete(
        &expr::xor(solver, &a, &a).unwrap(),
        0,
        "a ^ a = 0",
    );

    assert_equiv(
        solver,
        &expr::nand(solver, &a, &ones).unwrap(),
        &complement,
        "a nand -1 = !a",
    );
}

/// Comparison symmetries and width boundaries.
pub fn check_compare_properties(solver: &SmtSolver, width: Width) {
    let a = Expr::symbolic(width, solver.fresh_var(width));
    let b = Expr::symbolic(width, solver.fresh_var(width));

    assert_pred_equiv(
        solver,
        expr::slt(solver, &a, &b).unwrap(),
        expr::sgt(solver, &b, &a).unwrap(),
        "a <s b iff b >s a",
    );
    assert_pred_equiv(
        solver,
        expr::sle(solver, &a, &b).unwrap(),
        expr::sge(solver, &b, &a).unwrap(),
        "a <=s b iff b >=s a",
    );
    assert_pred_equiv(
        solver,
        expr::ult(solver, &a, &b).unwrap(),
        expr::ugt(solver, &b, &a).unwrap(),
        "a <u b iff b >u a",
    );
    assert_pred_equiv(
        solver,
        expr::ule(solver, &a, &b).unwrap(),
        expr::uge(solver, &b, &a).unwrap(),
        "a <=u b iff b >=u a",
    );
    assert_pred_equiv(
        solver,
        expr::eq(solver, &a, &b).unwrap(),
        expr::eq(solver, &b, &a).unwrap(),
        "a = b iff b = a",
    );

    let Bounds { min, max } = bounds(width);
    let int_min = Expr::concrete(width, min);
    let int_max = Expr::concrete(width, max);
    let zero = Expr::concrete(width, 0);
    let umax = Expr::concrete(width, -1);

    assert_pred_false(
        expr::slt(solver, &a, &int_min).unwrap(),
        "x <s INT_MIN is false",
    );
    assert_pred_equiv(
        solver,
        expr::slt(solver, &a, &int_max).unwrap(),
        expr::ne(solver, &a, &int_max).unwrap(),
        "x <s INT_MAX iff x != INT_MAX",
    );
    assert_pred_false(
        expr::ult(solver, &a, &zero).unwrap(),
        "x <u 0 is false",
    );
    assert_pred_equiv(
        solver,
        expr::ult(solver, &a, &umax).unwrap(),
        expr::ne(solver, &a, &umax).unwrap(),
        "x <u UINT_MAX iff x != UINT_MAX",
    );

    // >=-side duals of the boundaries
    assert_pred_equiv(
        solver,
        expr::sge(solver, &a, &int_min).unwrap(),
        Pred::Concrete(true),
        "x >=s INT_MIN is true",
    );
    assert_pred_equiv(
        solver,
        expr::uge(solver, &a, &zero).unwrap(),
        Pred::Concrete(true),
        "x >=u 0 is true",
    );
    assert_pred_equiv(
        solver,
        expr::sle(solver, &a, &int_max).unwrap(),
        Pred::Concrete(true),
        "x <=s INT_MAX is true",
    );
    assert_pred_equiv(
        solver,
        expr::ule(solver, &a, &umax).unwrap(),
        Pred::Concrete(true),
        "x <=u UINT_MAX is true",
    );
}

/// Wide-operation boundary cases.
pub fn check_wide_ops(solver: &SmtSolver, width: Width) {
    let Bounds { min, max } = bounds(width);
    let zero = Expr::concrete(width, 0);
    let one = Expr::concrete(width, 1);
    let int_min = Expr::concrete(width, min);
    let int_max = Expr::concrete(width, max);

    let (lo, hi) = expr::add2(solver, &one, &zero, &int_max, &zero).unwrap();
    assert_concrete(&lo, min, "add2(1, INT_MAX) low");
    assert_concrete(&hi, 0, "add2(1, INT_MAX) high");

    let (lo, hi) = expr::add2(solver, &int_min, &zero, &int_min, &zero).unwrap();
    assert_concrete(&lo, 0, "add2(INT_MIN, INT_MIN) low");
    assert_concrete(&hi, 1, "add2(INT_MIN, INT_MIN) high");

    let a = Expr::symbolic(width, solver.fresh_var(width));
    let b = Expr::symbolic(width, solver.fresh_var(width));
    let (lo, hi) = expr::sub2(solver, &a, &b, &a, &b).unwrap();
    assert_concrete(&lo, 0, "sub2(a, a) low");
    assert_concrete(&hi, 0, "sub2(a, a) high");

    let (lo, hi) = expr::muls2(solver, &int_max, &int_max).unwrap();
    match width {
        Width::W32 => {
            assert_concrete(&lo, 1, "muls2(INT32_MAX, INT32_MAX) low");
            assert_concrete(&hi, 1073741823, "muls2(INT32_MAX, INT32_MAX) high");
        }
        Width::W64 => {
            assert_concrete(&lo, 1, "muls2(INT64_MAX, INT64_MAX) low");
            assert_concrete(
                &hi,
                4611686018427387903,
                "muls2(INT64_MAX, INT64_MAX) high",
            );
        }
    }
}

/// Partial load/store round-trips.
pub fn check_partial_ops(solver: &SmtSolver, width: Width) {
    let parts: &[u32] = match width {
        Width::W32 => &[8, 16],
        Width::W64 => &[8, 16, 32],
    };
    for &n in parts {
        let x = Expr::symbolic(width, solver.fresh_var(width));
        let y = Expr::symbolic(width, solver.fresh_var(width));

        // ld{n}u(st{n}(x, y)) = x zero-extended
        let stored = expr::st_part(solver, &x, &y, n).unwrap();
        let loaded = expr::ld_part(solver, &stored, n, false).unwrap();
        let x_low = expr::ld_part(solver, &x, n, false).unwrap();
        assert_equiv(solver, &loaded, &x_low, "ld_u(st(x, y)) = zext(x)");

        // st{n}(ld{n}u(x), x) = x
        let back = expr::st_part(solver, &x_low, &x, n).unwrap();
        assert_equiv(solver, &back, &x, "st(ld_u(x), x) = x");
    }
}

/// Concrete spot checks of the signed algebra.
pub fn check_concrete_spots(solver: &SmtSolver, width: Width) {
    let value = |v: i64| Expr::concrete(width, v);

    assert_concrete(
        &expr::add(solver, &value(1), &value(2)).unwrap(),
        3,
        "1 + 2",
    );
    assert_concrete(
        &expr::add(solver, &value(-1), &value(3)).unwrap(),
        2,
        "-1 + 3",
    );
    assert_concrete(
        &expr::sub(solver, &value(-1), &value(-3)).unwrap(),
        2,
        "-1 - (-3)",
    );
    assert_concrete(
        &expr::or(solver, &value(1), &value(2)).unwrap(),
        3,
        "1 | 2",
    );
    assert_concrete(
        &expr::xor(solver, &value(1), &value(2)).unwrap(),
        3,
        "1 ^ 2",
    );
    assert_concrete(
        &expr::and(solver, &value(-1), &value(-3)).unwrap(),
        -3,
        "-1 & -3",
    );
    assert_concrete(
        &expr::nand(solver, &value(1), &value(2)).unwrap(),
        -1,
        "1 nand 2",
    );
}

/// Run every check group at both widths.
pub fn run_all() {
    for width in [Width::W32, Width::W64] {
        debug!(?width, "self-check");
        let solver = SmtSolver::new();
        check_arith_identities(&solver, width);
        check_bitwise_identities(&solver, width);
        check_compare_properties(&solver, width);
        check_wide_ops(&solver, width);
        check_partial_ops(&solver, width);
        check_concrete_spots(&solver, width);
    }
    debug!("self-check completed");
}
