//! Arithmetic simplifier.
//!
//! A single bottom-up sweep folding constant subtrees and the cheap
//! algebraic identities. This is deliberately not a full symbolic engine:
//! passes call [`simplify`] on index and bound expressions so that obvious
//! constants surface, and leave everything else alone.

use std::convert::Infallible;
use std::rc::Rc;

use tenrec_dtype::DType;

use crate::expr::Expr;
use crate::ops::{is_const_int, is_const_true, is_zero};
use crate::types::{BinaryOp, UnaryOp};
use crate::visit::{Mutator, into_ok, remap_expr};

/// Simplify an expression. Pure; the input is never mutated.
pub fn simplify(expr: &Rc<Expr>) -> Rc<Expr> {
    into_ok(Simplifier.mutate_expr(expr))
}

struct Simplifier;

impl Mutator for Simplifier {
    type Error = Infallible;

    fn mutate_expr(&mut self, expr: &Rc<Expr>) -> Result<Rc<Expr>, Infallible> {
        let expr = remap_expr(self, expr)?;
        Ok(fold(&expr))
    }
}

/// Fold one node whose children are already simplified.
fn fold(expr: &Rc<Expr>) -> Rc<Expr> {
    match expr.as_ref() {
        Expr::Binary { op, a, b } => {
            if let Some(folded) = fold_binary(*op, a, b) {
                return folded;
            }
            fold_identity(*op, a, b).unwrap_or_else(|| expr.clone())
        }
        Expr::Unary { op, value } => fold_unary(*op, value).unwrap_or_else(|| expr.clone()),
        Expr::Cast { dtype, value } => fold_cast(*dtype, value).unwrap_or_else(|| expr.clone()),
        _ => expr.clone(),
    }
}

/// Scalar integer constant, with its dtype.
fn const_operand(expr: &Expr) -> Option<(DType, i64)> {
    match expr {
        Expr::IntConst { dtype, value } if dtype.is_scalar() && dtype.is_int() => Some((*dtype, *value)),
        _ => None,
    }
}

/// Re-narrow a folded value to the range of `dtype`.
fn wrap_to(dtype: DType, value: i64) -> i64 {
    if dtype.is_bool() {
        return (value != 0) as i64;
    }
    let bits = dtype.scalar().bits() as u32;
    if bits >= 64 {
        return value;
    }
    if dtype.is_unsigned() {
        (value as u64 & ((1u64 << bits) - 1)) as i64
    } else {
        // Sign-extend the low `bits` bits.
        (value << (64 - bits)) >> (64 - bits)
    }
}

fn bool_const(value: bool) -> Rc<Expr> {
    Expr::int_const(DType::bool_(), value as i64)
}

fn fold_binary(op: BinaryOp, a: &Rc<Expr>, b: &Rc<Expr>) -> Option<Rc<Expr>> {
    let (dtype_a, va) = const_operand(a)?;
    let (dtype_b, vb) = const_operand(b)?;
    if dtype_a != dtype_b {
        return None;
    }
    let dtype = dtype_a;

    // Unsigned dtypes fold with wrapping u64 semantics so that shape
    // products computed in uint64 cannot go negative halfway through.
    let unsigned = dtype.is_unsigned();
    let (ua, ub) = (va as u64, vb as u64);

    let arith = |value: i64| Some(Expr::int_const(dtype, wrap_to(dtype, value)));
    match op {
        BinaryOp::Add => arith(if unsigned { ua.wrapping_add(ub) as i64 } else { va.wrapping_add(vb) }),
        BinaryOp::Sub => arith(if unsigned { ua.wrapping_sub(ub) as i64 } else { va.wrapping_sub(vb) }),
        BinaryOp::Mul => arith(if unsigned { ua.wrapping_mul(ub) as i64 } else { va.wrapping_mul(vb) }),
        BinaryOp::Div => {
            if vb == 0 {
                return None;
            }
            arith(if unsigned { (ua / ub) as i64 } else { va.wrapping_div(vb) })
        }
        BinaryOp::Mod => {
            if vb == 0 {
                return None;
            }
            arith(if unsigned { (ua % ub) as i64 } else { va.wrapping_rem(vb) })
        }
        BinaryOp::Min => arith(if unsigned { ua.min(ub) as i64 } else { va.min(vb) }),
        BinaryOp::Max => arith(if unsigned { ua.max(ub) as i64 } else { va.max(vb) }),
        BinaryOp::Eq => Some(bool_const(va == vb)),
        BinaryOp::Ne => Some(bool_const(va != vb)),
        BinaryOp::Lt => Some(bool_const(if unsigned { ua < ub } else { va < vb })),
        BinaryOp::Le => Some(bool_const(if unsigned { ua <= ub } else { va <= vb })),
        BinaryOp::Gt => Some(bool_const(if unsigned { ua > ub } else { va > vb })),
        BinaryOp::Ge => Some(bool_const(if unsigned { ua >= ub } else { va >= vb })),
        BinaryOp::And => Some(bool_const(va != 0 && vb != 0)),
        BinaryOp::Or => Some(bool_const(va != 0 || vb != 0)),
    }
}

fn fold_identity(op: BinaryOp, a: &Rc<Expr>, b: &Rc<Expr>) -> Option<Rc<Expr>> {
    match op {
        BinaryOp::Add => {
            if is_zero(a) {
                Some(b.clone())
            } else if is_zero(b) {
                Some(a.clone())
            } else {
                None
            }
        }
        BinaryOp::Sub if is_zero(b) => Some(a.clone()),
        BinaryOp::Mul => {
            if is_zero(a) || is_const_int(b, 1) {
                Some(a.clone())
            } else if is_zero(b) || is_const_int(a, 1) {
                Some(b.clone())
            } else {
                None
            }
        }
        BinaryOp::Div if is_const_int(b, 1) => Some(a.clone()),
        BinaryOp::And => {
            if is_const_true(a) {
                Some(b.clone())
            } else if is_const_true(b) {
                Some(a.clone())
            } else if is_zero(a) {
                Some(a.clone())
            } else if is_zero(b) {
                Some(b.clone())
            } else {
                None
            }
        }
        BinaryOp::Or => {
            if is_zero(a) {
                Some(b.clone())
            } else if is_zero(b) {
                Some(a.clone())
            } else if is_const_true(a) {
                Some(a.clone())
            } else if is_const_true(b) {
                Some(b.clone())
            } else {
                None
            }
        }
        _ => None,
    }
}

fn fold_unary(op: UnaryOp, value: &Rc<Expr>) -> Option<Rc<Expr>> {
    match op {
        UnaryOp::Neg => match value.as_ref() {
            Expr::IntConst { dtype, value } if dtype.is_scalar() && dtype.is_signed() => {
                Some(Expr::int_const(*dtype, wrap_to(*dtype, value.wrapping_neg())))
            }
            Expr::FloatConst { dtype, value } if dtype.is_scalar() => Some(Expr::float_const(*dtype, -value)),
            _ => None,
        },
        UnaryOp::Not => {
            let (_, v) = const_operand(value)?;
            Some(bool_const(v == 0))
        }
    }
}

fn fold_cast(dtype: DType, value: &Rc<Expr>) -> Option<Rc<Expr>> {
    if !dtype.is_scalar() || !dtype.is_int() {
        return None;
    }
    let (_, v) = const_operand(value)?;
    Some(Expr::int_const(dtype, wrap_to(dtype, v)))
}
