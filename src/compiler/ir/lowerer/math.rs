//! Math builtins
//!
//! The IR has no math instructions. `abs sign min max clamp saturate` and
//! the rounding family are compare-and-jump sequences over hidden locals.
//! Roots use a fixed number of Newton steps. `exp`, `log`, `pow` and the
//! trigonometric functions use truncated series, so float results are close
//! to the host's but not bit-identical.

use super::{IrLowerer, LocalMap};
use crate::compiler::ir::instruction::IrOpcode;
use crate::parser::{Call, Expr};
use crate::types::numeric::{self, ArithmeticOp, ComparisonOp, NumericWidth, OperandKind};
use crate::{Error, Result};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Operand of a compare-and-select sequence
#[derive(Debug, Clone, Copy)]
pub(super) enum Operand {
    Local(u32),
    Const(i64),
}

fn series_terms(width: NumericWidth, f64_terms: usize, f32_terms: usize) -> usize {
    if width == NumericWidth::F64 {
        f64_terms
    } else {
        f32_terms
    }
}

impl<'a> IrLowerer<'a> {
    fn load_operand(&mut self, width: NumericWidth, operand: Operand) {
        match operand {
            Operand::Local(index) => self.load_local(index),
            Operand::Const(v) => self.push_const(width, v),
        }
    }

    /// `lhs <op> rhs ? then : otherwise`
    fn emit_select(
        &mut self,
        width: NumericWidth,
        op: ComparisonOp,
        (lhs, rhs): (Operand, Operand),
        then: Operand,
        otherwise: Operand,
    ) {
        self.load_operand(width, lhs);
        self.load_operand(width, rhs);
        self.emit_op(IrOpcode::compare(op, width));
        let to_else = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        self.load_operand(width, then);
        let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
        self.patch_jump_here(to_else);
        self.load_operand(width, otherwise);
        self.patch_jump_here(to_end);
    }

    fn spill(&mut self, expr: &Expr, locals: &LocalMap, width: NumericWidth) -> Result<Operand> {
        self.emit_operand_as(expr, locals, width)?;
        Ok(Operand::Local(self.store_temp()))
    }

    /// Pop the top of stack into a fresh slot
    fn store_temp(&mut self) -> u32 {
        let slot = self.alloc_local();
        self.store_local(slot);
        slot
    }

    fn arith(&mut self, op: ArithmeticOp, width: NumericWidth) {
        self.emit_op(IrOpcode::arithmetic(op, width));
    }

    /// Math builtin call; the result kind comes from the operand widths
    pub(super) fn emit_math(&mut self, call: &Call, locals: &LocalMap) -> Result<OperandKind> {
        let from = self.current_path();
        let mut kinds = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            kinds.push(self.infer_kind(arg, locals, &from)?);
        }
        let width = numeric::resolve_math_builtin(&call.name, &kinds)?;
        let unsigned = width == NumericWidth::U64;
        let zero = Operand::Const(0);
        let one = Operand::Const(1);

        match call.name.as_str() {
            "abs" => {
                let x = self.spill(&call.args[0], locals, width)?;
                if unsigned {
                    self.load_operand(width, x);
                } else {
                    self.load_operand(width, x);
                    self.push_const(width, 0);
                    self.emit_op(IrOpcode::compare(ComparisonOp::Less, width));
                    let to_positive = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
                    self.load_operand(width, x);
                    if let Some(neg) = IrOpcode::negate(width) {
                        self.emit_op(neg);
                    }
                    let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
                    self.patch_jump_here(to_positive);
                    self.load_operand(width, x);
                    self.patch_jump_here(to_end);
                }
            }
            "sign" => {
                let x = self.spill(&call.args[0], locals, width)?;
                if unsigned {
                    self.emit_select(width, ComparisonOp::Greater, (x, zero), one, zero);
                } else {
                    self.load_operand(width, x);
                    self.push_const(width, 0);
                    self.emit_op(IrOpcode::compare(ComparisonOp::Less, width));
                    let to_non_negative = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
                    self.push_const(width, -1);
                    let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
                    self.patch_jump_here(to_non_negative);
                    self.emit_select(width, ComparisonOp::Greater, (x, zero), one, zero);
                    self.patch_jump_here(to_end);
                }
            }
            "min" | "max" => {
                let a = self.spill(&call.args[0], locals, width)?;
                let b = self.spill(&call.args[1], locals, width)?;
                let op = if call.name == "min" {
                    ComparisonOp::Less
                } else {
                    ComparisonOp::Greater
                };
                self.emit_select(width, op, (a, b), a, b);
            }
            "clamp" | "saturate" => {
                let x = self.spill(&call.args[0], locals, width)?;
                let (lo, hi) = if call.name == "clamp" {
                    (
                        self.spill(&call.args[1], locals, width)?,
                        self.spill(&call.args[2], locals, width)?,
                    )
                } else {
                    (zero, one)
                };
                self.load_operand(width, x);
                self.load_operand(width, lo);
                self.emit_op(IrOpcode::compare(ComparisonOp::Less, width));
                let to_upper = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
                self.load_operand(width, lo);
                let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
                self.patch_jump_here(to_upper);
                self.emit_select(width, ComparisonOp::Greater, (x, hi), hi, x);
                self.patch_jump_here(to_end);
            }
            "floor" | "ceil" | "round" | "trunc" | "fract" => {
                self.emit_operand_as(&call.args[0], locals, width)?;
                let x = self.store_temp();
                match (width.is_float(), call.name.as_str()) {
                    (false, "fract") => self.push_const(width, 0),
                    (false, _) => self.load_local(x),
                    (true, "floor") => self.emit_floor(width, x),
                    (true, "ceil") => self.emit_ceil(width, x),
                    (true, "trunc") => self.emit_trunc(width, x),
                    (true, "round") => self.emit_round(width, x),
                    (true, _) => {
                        self.emit_floor(width, x);
                        let floor = self.store_temp();
                        self.load_local(x);
                        self.load_local(floor);
                        self.arith(ArithmeticOp::Minus, width);
                    }
                }
            }
            "pow" => {
                self.emit_operand_as(&call.args[0], locals, width)?;
                let base = self.store_temp();
                self.emit_operand_as(&call.args[1], locals, width)?;
                let exponent = self.store_temp();
                if width.is_float() {
                    self.emit_float_pow(width, base, exponent);
                } else {
                    self.emit_int_pow(width, base, exponent);
                }
            }
            "sqrt" | "cbrt" | "exp" | "log" | "sin" | "cos" | "tan" => {
                self.emit_operand_as(&call.args[0], locals, width)?;
                let x = self.store_temp();
                match call.name.as_str() {
                    "sqrt" => self.emit_sqrt(width, x),
                    "cbrt" => self.emit_cbrt(width, x),
                    "exp" => self.emit_exp(width, x),
                    "log" => self.emit_log(width, x),
                    name => self.emit_trig(width, x, name),
                }
            }
            other => return Err(Error::type_error(format!("unknown math builtin: {}", other))),
        }
        Ok(OperandKind::Value(width.value_kind()))
    }

    // =========================================================================
    // ROUNDING
    // =========================================================================

    /// Round toward zero through the matching integer width
    fn emit_trunc(&mut self, width: NumericWidth, x: u32) {
        self.load_local(x);
        if width == NumericWidth::F32 {
            self.emit_op(IrOpcode::ConvertF32ToI32);
            self.emit_op(IrOpcode::ConvertI32ToF32);
        } else {
            self.emit_op(IrOpcode::ConvertF64ToI64);
            self.emit_op(IrOpcode::ConvertI64ToF64);
        }
    }

    /// `trunc(x)`, moved by one toward `op` when it lies on the wrong side of `x`
    fn emit_adjusted_trunc(&mut self, width: NumericWidth, x: u32, wrong_side: ComparisonOp, op: ArithmeticOp) {
        self.emit_trunc(width, x);
        let t = self.store_temp();
        self.load_local(t);
        self.load_local(x);
        self.emit_op(IrOpcode::compare(wrong_side, width));
        let to_keep = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        self.load_local(t);
        self.push_float(width, 1.0);
        self.arith(op, width);
        let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
        self.patch_jump_here(to_keep);
        self.load_local(t);
        self.patch_jump_here(to_end);
    }

    fn emit_floor(&mut self, width: NumericWidth, x: u32) {
        self.emit_adjusted_trunc(width, x, ComparisonOp::Greater, ArithmeticOp::Minus);
    }

    fn emit_ceil(&mut self, width: NumericWidth, x: u32) {
        self.emit_adjusted_trunc(width, x, ComparisonOp::Less, ArithmeticOp::Plus);
    }

    /// Half away from zero
    fn emit_round(&mut self, width: NumericWidth, x: u32) {
        self.load_local(x);
        self.push_float(width, 0.0);
        self.emit_op(IrOpcode::compare(ComparisonOp::Less, width));
        let to_positive = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        self.load_local(x);
        self.push_float(width, 0.5);
        self.arith(ArithmeticOp::Minus, width);
        let shifted = self.store_temp();
        self.emit_ceil(width, shifted);
        let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
        self.patch_jump_here(to_positive);
        self.load_local(x);
        self.push_float(width, 0.5);
        self.arith(ArithmeticOp::Plus, width);
        let shifted = self.store_temp();
        self.emit_floor(width, shifted);
        self.patch_jump_here(to_end);
    }

    // =========================================================================
    // ROOTS, EXP AND LOG
    // =========================================================================

    /// When `x <op> 0`, push what `result` pushes and skip to the returned jump
    fn emit_special_case(
        &mut self,
        width: NumericWidth,
        x: u32,
        op: ComparisonOp,
        result: impl FnOnce(&mut Self),
    ) -> usize {
        self.load_local(x);
        self.push_float(width, 0.0);
        self.emit_op(IrOpcode::compare(op, width));
        let to_next = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        result(self);
        let to_end = self.emit_jump_placeholder(IrOpcode::Jump);
        self.patch_jump_here(to_next);
        to_end
    }

    fn push_nan(&mut self, width: NumericWidth) {
        self.push_float(width, 0.0);
        self.push_float(width, 0.0);
        self.arith(ArithmeticOp::Divide, width);
    }

    /// Newton steps `x = (x + v / x) / 2`; negative input gives NaN
    fn emit_sqrt(&mut self, width: NumericWidth, v: u32) {
        let zero = self.emit_special_case(width, v, ComparisonOp::Equal, |l| l.push_float(width, 0.0));
        let negative = self.emit_special_case(width, v, ComparisonOp::Less, |l| l.push_nan(width));
        self.load_local(v);
        let x = self.store_temp();
        for _ in 0..series_terms(width, 8, 6) {
            self.load_local(x);
            self.load_local(v);
            self.load_local(x);
            self.arith(ArithmeticOp::Divide, width);
            self.arith(ArithmeticOp::Plus, width);
            self.push_float(width, 0.5);
            self.arith(ArithmeticOp::Multiply, width);
            self.store_local(x);
        }
        self.load_local(x);
        self.patch_jump_here(zero);
        self.patch_jump_here(negative);
    }

    /// Newton steps `x = (2x + v / x²) / 3`
    fn emit_cbrt(&mut self, width: NumericWidth, v: u32) {
        let zero = self.emit_special_case(width, v, ComparisonOp::Equal, |l| l.push_float(width, 0.0));
        self.load_local(v);
        let x = self.store_temp();
        for _ in 0..series_terms(width, 10, 8) {
            self.load_local(x);
            self.push_float(width, 2.0);
            self.arith(ArithmeticOp::Multiply, width);
            self.load_local(v);
            self.load_local(x);
            self.load_local(x);
            self.arith(ArithmeticOp::Multiply, width);
            self.arith(ArithmeticOp::Divide, width);
            self.arith(ArithmeticOp::Plus, width);
            self.push_float(width, 3.0);
            self.arith(ArithmeticOp::Divide, width);
            self.store_local(x);
        }
        self.load_local(x);
        self.patch_jump_here(zero);
    }

    /// Taylor series `1 + v + v²/2! + ...`
    fn emit_exp(&mut self, width: NumericWidth, v: u32) {
        self.push_float(width, 1.0);
        let term = self.store_temp();
        self.push_float(width, 1.0);
        let sum = self.store_temp();
        for n in 1..=series_terms(width, 12, 10) {
            self.load_local(term);
            self.load_local(v);
            self.arith(ArithmeticOp::Multiply, width);
            self.push_float(width, n as f64);
            self.arith(ArithmeticOp::Divide, width);
            self.store_local(term);
            self.load_local(sum);
            self.load_local(term);
            self.arith(ArithmeticOp::Plus, width);
            self.store_local(sum);
        }
        self.load_local(sum);
    }

    /// `2 * (z + z³/3 + ... + z⁹/9)` with `z = (v - 1) / (v + 1)`
    fn emit_log(&mut self, width: NumericWidth, v: u32) {
        let negative = self.emit_special_case(width, v, ComparisonOp::Less, |l| l.push_nan(width));
        let zero = self.emit_special_case(width, v, ComparisonOp::Equal, |l| {
            l.push_float(width, -1.0);
            l.push_float(width, 0.0);
            l.arith(ArithmeticOp::Divide, width);
        });
        self.load_local(v);
        self.push_float(width, 1.0);
        self.arith(ArithmeticOp::Minus, width);
        self.load_local(v);
        self.push_float(width, 1.0);
        self.arith(ArithmeticOp::Plus, width);
        self.arith(ArithmeticOp::Divide, width);
        let z = self.store_temp();
        self.load_local(z);
        self.load_local(z);
        self.arith(ArithmeticOp::Multiply, width);
        let z2 = self.store_temp();
        self.load_local(z);
        let term = self.store_temp();
        self.load_local(z);
        let sum = self.store_temp();
        for divisor in [3.0, 5.0, 7.0, 9.0] {
            self.load_local(term);
            self.load_local(z2);
            self.arith(ArithmeticOp::Multiply, width);
            self.store_local(term);
            self.load_local(sum);
            self.load_local(term);
            self.push_float(width, 1.0 / divisor);
            self.arith(ArithmeticOp::Multiply, width);
            self.arith(ArithmeticOp::Plus, width);
            self.store_local(sum);
        }
        self.load_local(sum);
        self.push_float(width, 2.0);
        self.arith(ArithmeticOp::Multiply, width);
        self.patch_jump_here(negative);
        self.patch_jump_here(zero);
    }

    // =========================================================================
    // POW
    // =========================================================================

    /// Repeated multiplication; a negative signed exponent fails at run time
    fn emit_int_pow(&mut self, width: NumericWidth, base: u32, exponent: u32) {
        if width != NumericWidth::U64 {
            self.load_local(exponent);
            self.push_const(width, 0);
            self.emit_op(IrOpcode::compare(ComparisonOp::Less, width));
            let to_ok = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
            self.emit_runtime_failure("pow exponent must be non-negative");
            self.patch_jump_here(to_ok);
        }
        self.push_const(width, 1);
        let out = self.store_temp();
        let check = self.here();
        self.load_local(exponent);
        self.push_const(width, 0);
        self.emit_op(IrOpcode::compare(ComparisonOp::Greater, width));
        let to_end = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        self.load_local(out);
        self.load_local(base);
        self.arith(ArithmeticOp::Multiply, width);
        self.store_local(out);
        self.load_local(exponent);
        self.push_const(width, 1);
        self.arith(ArithmeticOp::Minus, width);
        self.store_local(exponent);
        self.emit(IrOpcode::Jump, check as u64);
        self.patch_jump_here(to_end);
        self.load_local(out);
    }

    /// `exp(y * log(x))`; zero and negative bases are special-cased
    fn emit_float_pow(&mut self, width: NumericWidth, base: u32, exponent: u32) {
        let negative = self.emit_special_case(width, base, ComparisonOp::Less, |l| l.push_nan(width));
        let zero_base = self.emit_special_case(width, base, ComparisonOp::Equal, |l| {
            let one = l.emit_special_case(width, exponent, ComparisonOp::Equal, |l| l.push_float(width, 1.0));
            let inf = l.emit_special_case(width, exponent, ComparisonOp::Less, |l| {
                l.push_float(width, 1.0);
                l.push_float(width, 0.0);
                l.arith(ArithmeticOp::Divide, width);
            });
            l.push_float(width, 0.0);
            l.patch_jump_here(one);
            l.patch_jump_here(inf);
        });
        self.emit_log(width, base);
        self.load_local(exponent);
        self.arith(ArithmeticOp::Multiply, width);
        let scaled = self.store_temp();
        self.emit_exp(width, scaled);
        self.patch_jump_here(negative);
        self.patch_jump_here(zero_base);
    }

    // =========================================================================
    // TRIGONOMETRY
    // =========================================================================

    /// Reduce into `[-π/2, π/2]`, then Taylor polynomials for sine and cosine
    fn emit_trig(&mut self, width: NumericWidth, v: u32, name: &str) {
        // x -= floor(x / τ) * τ, then into (-π, π]
        self.load_local(v);
        self.push_float(width, TAU);
        self.arith(ArithmeticOp::Divide, width);
        let turns = self.store_temp();
        self.emit_floor(width, turns);
        self.push_float(width, TAU);
        self.arith(ArithmeticOp::Multiply, width);
        let whole = self.store_temp();
        self.load_local(v);
        self.load_local(whole);
        self.arith(ArithmeticOp::Minus, width);
        let x = self.store_temp();
        self.emit_fold(width, x, ComparisonOp::Greater, PI, None);

        // Mirror around ±π/2; cosine changes sign
        self.push_float(width, 1.0);
        let cos_sign = self.store_temp();
        self.emit_fold(width, x, ComparisonOp::Greater, FRAC_PI_2, Some((PI, cos_sign)));
        self.emit_fold(width, x, ComparisonOp::Less, -FRAC_PI_2, Some((-PI, cos_sign)));

        self.load_local(x);
        self.load_local(x);
        self.arith(ArithmeticOp::Multiply, width);
        let x2 = self.store_temp();

        match name {
            "sin" => self.emit_sin_poly(width, x, x2),
            "cos" => self.emit_cos_poly(width, x2, cos_sign),
            _ => {
                self.emit_sin_poly(width, x, x2);
                self.emit_cos_poly(width, x2, cos_sign);
                self.arith(ArithmeticOp::Divide, width);
            }
        }
    }

    /// When `x <op> limit`: with a mirror `(m, sign)` set `x = m - x` and
    /// negate `sign`, otherwise set `x = x - τ`
    fn emit_fold(&mut self, width: NumericWidth, x: u32, op: ComparisonOp, limit: f64, mirror: Option<(f64, u32)>) {
        self.load_local(x);
        self.push_float(width, limit);
        self.emit_op(IrOpcode::compare(op, width));
        let to_end = self.emit_jump_placeholder(IrOpcode::JumpIfZero);
        match mirror {
            Some((m, sign)) => {
                self.push_float(width, m);
                self.load_local(x);
                self.arith(ArithmeticOp::Minus, width);
                self.store_local(x);
                self.push_float(width, -1.0);
                self.store_local(sign);
            }
            None => {
                self.load_local(x);
                self.push_float(width, TAU);
                self.arith(ArithmeticOp::Minus, width);
                self.store_local(x);
            }
        }
        self.patch_jump_here(to_end);
    }

    /// Push `c0 + c1·x2 + c2·x2² + ...` by Horner's rule
    fn emit_poly(&mut self, width: NumericWidth, x2: u32, coefficients: &[f64]) {
        let mut rev = coefficients.iter().rev();
        if let Some(last) = rev.next() {
            self.push_float(width, *last);
        }
        for c in rev {
            self.load_local(x2);
            self.arith(ArithmeticOp::Multiply, width);
            self.push_float(width, *c);
            self.arith(ArithmeticOp::Plus, width);
        }
    }

    /// `x - x³/3! + x⁵/5! - x⁷/7!`
    fn emit_sin_poly(&mut self, width: NumericWidth, x: u32, x2: u32) {
        self.emit_poly(width, x2, &[1.0, -1.0 / 6.0, 1.0 / 120.0, -1.0 / 5040.0]);
        self.load_local(x);
        self.arith(ArithmeticOp::Multiply, width);
    }

    /// `(1 - x²/2! + x⁴/4! - x⁶/6!) * sign`
    fn emit_cos_poly(&mut self, width: NumericWidth, x2: u32, sign: u32) {
        self.emit_poly(width, x2, &[1.0, -0.5, 1.0 / 24.0, -1.0 / 720.0]);
        self.load_local(sign);
        self.arith(ArithmeticOp::Multiply, width);
    }
}
