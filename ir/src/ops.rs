//! Constant helpers and intrinsic builders.

use std::rc::Rc;

use tenrec_dtype::DType;

use crate::expr::{Expr, Var};
use crate::intrinsic;
use crate::types::CallKind;

/// A constant of the given dtype. Vector dtypes broadcast the scalar.
pub fn make_const(dtype: DType, value: i64) -> Rc<Expr> {
    let scalar = DType::scalar_of(dtype.scalar());
    let elem = if scalar.is_float() { Expr::float_const(scalar, value as f64) } else { Expr::int_const(scalar, value) };
    if dtype.is_scalar() { elem } else { Expr::broadcast(&elem, dtype.lanes()) }
}

pub fn make_zero(dtype: DType) -> Rc<Expr> {
    make_const(dtype, 0)
}

/// The all-true predicate of a load or store with `lanes` lanes.
pub fn const_true(lanes: u16) -> Rc<Expr> {
    make_const(DType::bool_().with_lanes(lanes), 1)
}

/// Value of a scalar integer constant.
pub fn get_const_int(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::IntConst { dtype, value } if dtype.is_scalar() => Some(*value),
        _ => None,
    }
}

pub fn is_const_int(expr: &Expr, value: i64) -> bool {
    get_const_int(expr) == Some(value)
}

pub fn is_zero(expr: &Expr) -> bool {
    match expr {
        Expr::IntConst { dtype, value } if dtype.is_scalar() => *value == 0,
        Expr::FloatConst { dtype, value } if dtype.is_scalar() => *value == 0.0,
        _ => false,
    }
}

/// True for a scalar constant that is provably negative. Unsigned constants
/// are never negative, whatever their bit pattern.
pub fn is_negative_const(expr: &Expr) -> bool {
    match expr {
        Expr::IntConst { dtype, value } if dtype.is_scalar() => dtype.is_signed() && *value < 0,
        Expr::FloatConst { dtype, value } if dtype.is_scalar() => *value < 0.0,
        _ => false,
    }
}

/// True for a scalar boolean constant holding `true`.
pub fn is_const_true(expr: &Expr) -> bool {
    match expr {
        Expr::IntConst { dtype, value } if dtype.is_scalar() && dtype.is_bool() => *value != 0,
        _ => false,
    }
}

/// Zero-valued expression whose only purpose is carrying a dtype, used as
/// the first argument of `access_ptr`.
pub fn type_annotation(dtype: DType) -> Rc<Expr> {
    make_zero(dtype)
}

/// `access_ptr(dtype, buffer, offset, extent, rw_mask)` - exposes a region
/// of `buffer` as an opaque handle for the code generator. Bit 0 of
/// `rw_mask` marks the region read, bit 1 marks it written.
pub fn access_ptr(elem: DType, buffer: &Rc<Var>, offset: &Rc<Expr>, extent: &Rc<Expr>, rw_mask: i64) -> Rc<Expr> {
    let args = vec![
        type_annotation(elem),
        Expr::var(buffer),
        offset.clone(),
        extent.clone(),
        make_const(DType::int32(), rw_mask),
    ];
    Expr::call(DType::handle(), intrinsic::ACCESS_PTR, args, CallKind::Intrinsic)
}

/// `context_id()` - the identity of the executing context.
pub fn context_id() -> Rc<Expr> {
    Expr::call(DType::int32(), intrinsic::CONTEXT_ID, Vec::new(), CallKind::PureIntrinsic)
}

/// `if_then_else(cond, then_value, else_value)` - lazily evaluated select.
pub fn if_then_else(cond: &Rc<Expr>, then_value: &Rc<Expr>, else_value: &Rc<Expr>) -> Rc<Expr> {
    let dtype = then_value.dtype();
    let args = vec![cond.clone(), then_value.clone(), else_value.clone()];
    Expr::call(dtype, intrinsic::IF_THEN_ELSE, args, CallKind::PureIntrinsic)
}
