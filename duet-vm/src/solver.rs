//! Typed facade over the bit-vector SMT solver.
//!
//! The engine only relies on decidability over `QF_ABV` restricted to 32/64
//! bit-vectors plus a byte array indexed by 64-bit offsets. Every produced
//! term goes through an eager simplify pass. `probe_*` answers are
//! best-effort: an `unknown` keeps the term symbolic. `prove` on a path
//! query, by contrast, must be decidable; the caller treats `Unknown` as
//! fatal.
//!
//! One Z3 context backs the whole process. The engine is a process-wide
//! singleton and terms escape into machine-state cells that live as long as
//! a session, so the context is created once and leaked; per-session scoping
//! is carried by the `Solver` object and the blob declarations, which are
//! created at session start and dropped on teardown.

use std::cell::Cell;

use duet_ir::Width;
use z3::{
    ast::{Array, Ast, Bool, Dynamic, BV},
    Config, Context, SatResult, Solver, Sort,
};

use crate::{
    consts::BLOB_SIZE_MAX,
    error::{EngineError, EngineResult},
};

/// A bit-vector term of the session's solver context.
pub type Term = BV<'static>;

/// A boolean term of the session's solver context.
pub type BoolTerm = Bool<'static>;

thread_local! {
    static CONTEXT: &'static Context = Box::leak(Box::new(Context::new(&Config::new())));
}

fn context() -> &'static Context {
    CONTEXT.with(|ctx| *ctx)
}

/// Outcome of a `prove` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prove {
    /// The proposition holds on every model of the current constraints.
    Proved,
    /// The proposition fails on at least one model (or on all of them).
    Refuted,
    /// The solver could not decide; fatal on path queries.
    Unknown,
}

/// The session-scoped solver state: constraint set plus the three global
/// symbolic declarations `addr`, `size` and `blob`.
pub struct SmtSolver {
    ctx: &'static Context,
    solver: Solver<'static>,
    blob_addr: Term,
    blob_size: Term,
    blob: Array<'static>,
    var_count: Cell<u64>,
}

impl Default for SmtSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver {
    /// Create a fresh constraint set and blob declarations.
    ///
    /// The blob size is bounded to `[0, BLOB_SIZE_MAX]` up front; harnesses
    /// that would access beyond the bound are rejected when the access is
    /// validated.
    pub fn new() -> Self {
        let ctx = context();
        let solver = Solver::new(ctx);
        let blob_addr = BV::new_const(ctx, "addr", 64);
        let blob_size = BV::new_const(ctx, "size", 64);
        let blob = Array::new_const(
            ctx,
            "blob",
            &Sort::bitvector(ctx, 64),
            &Sort::bitvector(ctx, 8),
        );

        solver.assert(&blob_size.bvule(&BV::from_u64(ctx, BLOB_SIZE_MAX, 64)));

        SmtSolver {
            ctx,
            solver,
            blob_addr,
            blob_size,
            blob,
            var_count: Cell::new(0),
        }
    }

    /// The symbolic blob address.
    pub fn blob_addr(&self) -> &Term {
        &self.blob_addr
    }

    /// The symbolic blob size.
    pub fn blob_size(&self) -> &Term {
        &self.blob_size
    }

    /// A constant term of the given width.
    pub fn value(&self, width: Width, val: i64) -> Term {
        BV::from_i64(self.ctx, val, width.bits())
    }

    /// A fresh unconstrained variable of the given width.
    pub fn fresh_var(&self, width: Width) -> Term {
        let n = self.var_count.get();
        self.var_count.set(n + 1);
        BV::new_const(self.ctx, format!("v{n}"), width.bits())
    }

    /// Extend the path constraint set.
    pub fn assert(&self, prop: &BoolTerm) {
        self.solver.assert(prop);
    }

    fn simplified(&self, term: Term) -> Term {
        term.simplify()
    }

    // -- arithmetic and bitwise operators ------------------------------------

    /// Wrapping addition.
    pub fn bv_add(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvadd(b))
    }

    /// Wrapping subtraction.
    pub fn bv_sub(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvsub(b))
    }

    /// Wrapping multiplication.
    pub fn bv_mul(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvmul(b))
    }

    /// Signed division.
    pub fn bv_div(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvsdiv(b))
    }

    /// Logical shift left.
    pub fn bv_shl(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvshl(b))
    }

    /// Logical shift right.
    pub fn bv_shr(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvlshr(b))
    }

    /// Arithmetic shift right.
    pub fn bv_sar(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvashr(b))
    }

    /// Bitwise and.
    pub fn bv_and(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvand(b))
    }

    /// Bitwise or.
    pub fn bv_or(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvor(b))
    }

    /// Bitwise exclusive-or.
    pub fn bv_xor(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvxor(b))
    }

    /// `a & !b`.
    pub fn bv_andc(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvand(&b.bvnot()))
    }

    /// `a | !b`.
    pub fn bv_orc(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvor(&b.bvnot()))
    }

    /// `!(a & b)`.
    pub fn bv_nand(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvnand(b))
    }

    /// `!(a | b)`.
    pub fn bv_nor(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvnor(b))
    }

    /// `!(a ^ b)`.
    pub fn bv_eqv(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvxnor(b))
    }

    /// Unsigned remainder.
    pub fn bv_urem(&self, a: &Term, b: &Term) -> Term {
        self.simplified(a.bvurem(b))
    }

    /// Two's-complement negation.
    pub fn bv_neg(&self, a: &Term) -> Term {
        self.simplified(a.bvneg())
    }

    /// Bitwise complement.
    pub fn bv_not(&self, a: &Term) -> Term {
        self.simplified(a.bvnot())
    }

    // -- comparisons ---------------------------------------------------------

    /// Equality.
    pub fn bv_eq(&self, a: &Term, b: &Term) -> BoolTerm {
        a._eq(b).simplify()
    }

    /// Inequality.
    pub fn bv_ne(&self, a: &Term, b: &Term) -> BoolTerm {
        a._eq(b).not().simplify()
    }

    /// Signed less-than.
    pub fn bv_slt(&self, a: &Term, b: &Term) -> BoolTerm {
        a.bvslt(b).simplify()
    }

    /// Signed less-or-equal.
    pub fn bv_sle(&self, a: &Term, b: &Term) -> BoolTerm {
        a.bvsle(b).simplify()
    }

    /// Signed greater-or-equal.
    pub fn bv_sge(&self, a: &Term, b: &Term) -> BoolTerm {
        a.bvsge(b).simplify()
    }

    /// Signed greater-than.
    pub fn bv_sgt(&self, a: &Term, b: &Term) -> BoolTerm {
        a.bvsgt(b).simplify()
    }

    /// Unsigned less-than.
    pub fn bv_ult(&self, a: &Term, b: &Term) -> BoolTerm {
        a.bvult(b).simplify()
    }

    /// Unsigned less-or-equal.
    pub fn bv_ule(&self, a: &Term, b: &Term) -> BoolTerm {
        a.bvule(b).simplify()
    }

    /// Unsigned greater-or-equal.
    pub fn bv_uge(&self, a: &Term, b: &Term) -> BoolTerm {
        a.bvuge(b).simplify()
    }

    /// Unsigned greater-than.
    pub fn bv_ugt(&self, a: &Term, b: &Term) -> BoolTerm {
        a.bvugt(b).simplify()
    }

    /// Boolean negation.
    pub fn bool_not(&self, p: &BoolTerm) -> BoolTerm {
        p.not().simplify()
    }

    /// Conditional select.
    pub fn bv_ite(&self, cond: &BoolTerm, then: &Term, otherwise: &Term) -> Term {
        self.simplified(cond.ite(then, otherwise))
    }

    // -- wide operations -----------------------------------------------------

    /// Double-word addition: carry from the low halves propagates into the
    /// high result.
    pub fn bv_add2(
        &self,
        width: Width,
        a_lo: &Term,
        a_hi: &Term,
        b_lo: &Term,
        b_hi: &Term,
    ) -> (Term, Term) {
        let lo = a_lo.bvadd(b_lo);
        let carry = lo
            .bvult(a_lo)
            .ite(&self.value(width, 1), &self.value(width, 0));
        let hi = a_hi.bvadd(b_hi).bvadd(&carry);
        (self.simplified(lo), self.simplified(hi))
    }

    /// Double-word subtraction: borrow from the low halves propagates into
    /// the high result.
    pub fn bv_sub2(
        &self,
        width: Width,
        a_lo: &Term,
        a_hi: &Term,
        b_lo: &Term,
        b_hi: &Term,
    ) -> (Term, Term) {
        let lo = a_lo.bvsub(b_lo);
        let borrow = a_lo
            .bvult(b_lo)
            .ite(&self.value(width, 1), &self.value(width, 0));
        let hi = a_hi.bvsub(b_hi).bvsub(&borrow);
        (self.simplified(lo), self.simplified(hi))
    }

    /// Signed widening multiplication; the high half is the arithmetic shift
    /// of the 2N-bit product.
    pub fn bv_muls2(&self, width: Width, a: &Term, b: &Term) -> (Term, Term) {
        let n = width.bits();
        let product = a.sign_ext(n).bvmul(&b.sign_ext(n));
        let lo = product.extract(n - 1, 0);
        let hi = product.extract(2 * n - 1, n);
        (self.simplified(lo), self.simplified(hi))
    }

    // -- extract / concat / partial words ------------------------------------

    /// Low 32-bit half of a 64-bit term.
    pub fn extract_low(&self, a: &Term) -> Term {
        self.simplified(a.extract(31, 0))
    }

    /// High 32-bit half of a 64-bit term.
    pub fn extract_high(&self, a: &Term) -> Term {
        self.simplified(a.extract(63, 32))
    }

    /// Concatenate two terms, `high` above `low`.
    pub fn concat(&self, high: &Term, low: &Term) -> Term {
        self.simplified(high.concat(low))
    }

    /// Keep the low `n` bits of `val` and extend them to `width`.
    pub fn bv_ld_part(&self, width: Width, n: u32, signed: bool, val: &Term) -> Term {
        let low = val.extract(n - 1, 0);
        let pad = width.bits() - n;
        let extended = if signed {
            low.sign_ext(pad)
        } else {
            low.zero_ext(pad)
        };
        self.simplified(extended)
    }

    /// Replace the low `n` bits of `dst` with the low `n` bits of `src`.
    pub fn bv_st_part(&self, width: Width, n: u32, src: &Term, dst: &Term) -> Term {
        let high = dst.extract(width.bits() - 1, n);
        let low = src.extract(n - 1, 0);
        self.simplified(high.concat(&low))
    }

    /// One byte of the blob array at a (possibly symbolic) offset.
    pub fn blob_byte(&self, offset: &Term) -> EngineResult<Term> {
        self.blob
            .select(offset)
            .as_bv()
            .map(|byte| self.simplified(byte))
            .ok_or(EngineError::Solver("blob select produced a non-bv term"))
    }

    // -- probing -------------------------------------------------------------

    /// Check whether the constraint set forces a unique boolean value.
    ///
    /// `Ok(None)` means the predicate is genuinely bistable (or the solver
    /// answered unknown on this speculative query); both directions
    /// infeasible means the path itself is inconsistent, which is fatal.
    pub fn probe_bool(&self, pred: &BoolTerm) -> EngineResult<Option<bool>> {
        let pred = pred.simplify();
        if let Some(val) = pred.as_bool() {
            return Ok(Some(val));
        }

        let positive = self.solver.check_assumptions(&[pred.clone()]);
        let negative = self.solver.check_assumptions(&[pred.not()]);
        match (positive, negative) {
            (SatResult::Sat, SatResult::Sat) => Ok(None),
            (SatResult::Sat, SatResult::Unsat) => Ok(Some(true)),
            (SatResult::Unsat, SatResult::Sat) => Ok(Some(false)),
            (SatResult::Unsat, SatResult::Unsat) => {
                Err(EngineError::Solver("logically infeasible predicate"))
            }
            _ => Ok(None),
        }
    }

    /// Check whether the constraint set forces a 32-bit term to a single
    /// model; the returned payload is raw bits, reinterpreted by the caller
    /// per the operation's signedness.
    pub fn probe_bv32(&self, term: &Term) -> EngineResult<Option<u32>> {
        Ok(self.probe_bv(term)?.map(|wide| wide as u32))
    }

    /// Check whether the constraint set forces a 64-bit term to a single
    /// model.
    pub fn probe_bv64(&self, term: &Term) -> EngineResult<Option<u64>> {
        self.probe_bv(term)
    }

    fn probe_bv(&self, term: &Term) -> EngineResult<Option<u64>> {
        let term = term.simplify();
        // constant-only queries never go to the solver
        if let Some(val) = term.as_u64() {
            return Ok(Some(val));
        }

        match self.solver.check() {
            SatResult::Sat => {}
            SatResult::Unsat => {
                return Err(EngineError::Solver("model evaluation on an infeasible path"))
            }
            SatResult::Unknown => return Ok(None),
        }
        let model = self
            .solver
            .get_model()
            .ok_or(EngineError::Solver("satisfiable check produced no model"))?;
        let candidate = model
            .eval(&term, true)
            .and_then(|evaluated| evaluated.as_u64())
            .ok_or(EngineError::Solver("model evaluation failed"))?;

        let width = term.get_size();
        let distinct = term._eq(&BV::from_u64(self.ctx, candidate, width)).not();
        match self.solver.check_assumptions(&[distinct]) {
            SatResult::Unsat => Ok(Some(candidate)),
            _ => Ok(None),
        }
    }

    // -- proving -------------------------------------------------------------

    /// Establish or refute a proposition under the current constraints.
    pub fn prove(&self, prop: &BoolTerm) -> Prove {
        match self.solver.check_assumptions(&[prop.clone()]) {
            SatResult::Unknown => return Prove::Unknown,
            // the claim itself is inconsistent with the path
            SatResult::Unsat => return Prove::Refuted,
            SatResult::Sat => {}
        }
        match self.solver.check_assumptions(&[prop.not()]) {
            SatResult::Unknown => Prove::Unknown,
            // the negation is inconsistent, the claim holds everywhere
            SatResult::Unsat => Prove::Proved,
            SatResult::Sat => Prove::Refuted,
        }
    }

    /// Prove that two propositions imply each other.
    pub fn prove_equiv(&self, a: &BoolTerm, b: &BoolTerm) -> Prove {
        match self.prove(&a.implies(b)) {
            Prove::Proved => {}
            other => return other,
        }
        self.prove(&b.implies(a))
    }

    // -- model extraction ----------------------------------------------------

    /// Evaluate a predicate under the given concrete blob model.
    pub fn concretize_bool(
        &self,
        blob_addr: u64,
        blob_size: u64,
        blob: &[u8],
        pred: &BoolTerm,
    ) -> EngineResult<bool> {
        let addr_val = BV::from_u64(self.ctx, blob_addr, 64);
        let size_val = BV::from_u64(self.ctx, blob_size, 64);
        let mut blob_val = Array::const_array(
            self.ctx,
            &Sort::bitvector(self.ctx, 64),
            &BV::from_u64(self.ctx, 0, 8),
        );
        for (offset, byte) in blob.iter().enumerate() {
            blob_val = blob_val.store(
                &BV::from_u64(self.ctx, offset as u64, 64),
                &BV::from_u64(self.ctx, u64::from(*byte), 8),
            );
        }

        let substitutions = [
            (
                Dynamic::from_ast(&self.blob_addr),
                Dynamic::from_ast(&addr_val),
            ),
            (
                Dynamic::from_ast(&self.blob_size),
                Dynamic::from_ast(&size_val),
            ),
            (Dynamic::from_ast(&self.blob), Dynamic::from_ast(&blob_val)),
        ];
        let pairs: Vec<(&Dynamic, &Dynamic)> =
            substitutions.iter().map(|(from, to)| (from, to)).collect();

        Dynamic::from_ast(pred)
            .substitute(&pairs)
            .simplify()
            .as_bool()
            .and_then(|reduced| reduced.as_bool())
            .ok_or(EngineError::Solver(
                "predicate did not reduce to a literal under the blob model",
            ))
    }

    /// Produce a concrete blob under which `cond` holds, alongside the
    /// current path constraints.
    pub fn solve_for(&self, cond: &BoolTerm) -> EngineResult<Vec<u8>> {
        self.solver.push();
        let result = self.solve_for_inner(cond);
        self.solver.pop(1);
        result
    }

    fn solve_for_inner(&self, cond: &BoolTerm) -> EngineResult<Vec<u8>> {
        self.solver.assert(cond);
        match self.solver.check() {
            SatResult::Sat => {}
            SatResult::Unsat => {
                return Err(EngineError::Solver("refuted an expected-satisfiable query"))
            }
            SatResult::Unknown => {
                return Err(EngineError::Solver("unknown on a path query"))
            }
        }
        let model = self
            .solver
            .get_model()
            .ok_or(EngineError::Solver("satisfiable check produced no model"))?;

        let size = model
            .eval(&self.blob_size, true)
            .and_then(|evaluated| evaluated.as_u64())
            .ok_or(EngineError::Solver("model evaluation failed on blob size"))?;
        let size = size.min(BLOB_SIZE_MAX) as usize;

        let mut out = Vec::with_capacity(size);
        for offset in 0..size {
            let cell = self
                .blob
                .select(&BV::from_u64(self.ctx, offset as u64, 64))
                .as_bv()
                .ok_or(EngineError::Solver("blob select produced a non-bv term"))?;
            let byte = model
                .eval(&cell, true)
                .and_then(|evaluated| evaluated.as_u64())
                .ok_or(EngineError::Solver("model evaluation failed on blob byte"))?;
            out.push(byte as u8);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for SmtSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtSolver")
            .field("vars", &self.var_count.get())
            .finish_non_exhaustive()
    }
}
