//! Generic traversal over the IR tree.
//!
//! Two traits mirror the usual read/rewrite split:
//!
//! - [`Visitor`] walks a tree without rebuilding it.
//! - [`Mutator`] rebuilds a tree bottom-up, carrying a pass-specific error
//!   type. The provided [`remap_expr`]/[`remap_stmt`] helpers return the
//!   original `Rc` whenever no child changed, so unaffected subtrees stay
//!   structurally shared.
//!
//! A pass overrides `visit_*`/`mutate_*` with a `match` on the node kinds it
//! cares about and falls back to the `walk_*`/`remap_*` helper for the rest,
//! which keeps unknown node kinds transparent.

use std::convert::Infallible;
use std::rc::Rc;

use crate::expr::Expr;
use crate::stmt::Stmt;

/// Unwrap the result of a mutator whose error type is uninhabited.
pub fn into_ok<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

/// Read-only traversal.
pub trait Visitor {
    fn visit_expr(&mut self, expr: &Rc<Expr>) {
        walk_expr(self, expr);
    }

    fn visit_stmt(&mut self, stmt: &Rc<Stmt>) {
        walk_stmt(self, stmt);
    }
}

/// Visit every direct sub-expression of `expr`.
pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Rc<Expr>) {
    for child in expr.children() {
        v.visit_expr(child);
    }
}

/// Visit every direct sub-expression and sub-statement of `stmt`.
pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Rc<Stmt>) {
    match stmt.as_ref() {
        Stmt::LetStmt { value, body, .. } => {
            v.visit_expr(value);
            v.visit_stmt(body);
        }
        Stmt::AttrStmt { value, body, .. } => {
            v.visit_expr(value);
            v.visit_stmt(body);
        }
        Stmt::AssertStmt { condition, message, body } => {
            v.visit_expr(condition);
            v.visit_expr(message);
            v.visit_stmt(body);
        }
        Stmt::Store { value, index, predicate, .. } => {
            v.visit_expr(value);
            v.visit_expr(index);
            v.visit_expr(predicate);
        }
        Stmt::Allocate { extents, condition, body, new_expr, .. } => {
            for extent in extents {
                v.visit_expr(extent);
            }
            v.visit_expr(condition);
            if let Some(new_expr) = new_expr {
                v.visit_expr(new_expr);
            }
            v.visit_stmt(body);
        }
        Stmt::For { min, extent, body, .. } => {
            v.visit_expr(min);
            v.visit_expr(extent);
            v.visit_stmt(body);
        }
        Stmt::IfThenElse { condition, then_case, else_case } => {
            v.visit_expr(condition);
            v.visit_stmt(then_case);
            if let Some(else_case) = else_case {
                v.visit_stmt(else_case);
            }
        }
        Stmt::Block { first, rest } => {
            v.visit_stmt(first);
            v.visit_stmt(rest);
        }
        Stmt::Evaluate(expr) => v.visit_expr(expr),
        Stmt::Provide { value, args, .. } => {
            v.visit_expr(value);
            for arg in args {
                v.visit_expr(arg);
            }
        }
    }
}

/// Rebuilding traversal with a pass-specific error type.
pub trait Mutator {
    type Error;

    fn mutate_expr(&mut self, expr: &Rc<Expr>) -> Result<Rc<Expr>, Self::Error> {
        remap_expr(self, expr)
    }

    fn mutate_stmt(&mut self, stmt: &Rc<Stmt>) -> Result<Rc<Stmt>, Self::Error> {
        remap_stmt(self, stmt)
    }
}

fn all_same(old: &[Rc<Expr>], new: &[Rc<Expr>]) -> bool {
    old.iter().zip(new).all(|(a, b)| Rc::ptr_eq(a, b))
}

/// Rebuild `expr` with mutated children, sharing it when nothing changed.
///
/// The buffer variable of a `Load` is an identity, not a sub-expression;
/// it is left alone here, as is the annotated node of an `AttrStmt` in
/// [`remap_stmt`].
pub fn remap_expr<M: Mutator + ?Sized>(m: &mut M, expr: &Rc<Expr>) -> Result<Rc<Expr>, M::Error> {
    match expr.as_ref() {
        Expr::IntConst { .. } | Expr::FloatConst { .. } | Expr::StringConst(_) | Expr::Var(_) => Ok(expr.clone()),
        Expr::Cast { dtype, value } => {
            let new_value = m.mutate_expr(value)?;
            if Rc::ptr_eq(&new_value, value) { Ok(expr.clone()) } else { Ok(Expr::cast(*dtype, &new_value)) }
        }
        Expr::Binary { op, a, b } => {
            let new_a = m.mutate_expr(a)?;
            let new_b = m.mutate_expr(b)?;
            if Rc::ptr_eq(&new_a, a) && Rc::ptr_eq(&new_b, b) {
                Ok(expr.clone())
            } else {
                Ok(Expr::binary(*op, &new_a, &new_b))
            }
        }
        Expr::Unary { op, value } => {
            let new_value = m.mutate_expr(value)?;
            if Rc::ptr_eq(&new_value, value) { Ok(expr.clone()) } else { Ok(Expr::unary(*op, &new_value)) }
        }
        Expr::Load { dtype, buffer, index, predicate } => {
            let new_index = m.mutate_expr(index)?;
            let new_predicate = m.mutate_expr(predicate)?;
            if Rc::ptr_eq(&new_index, index) && Rc::ptr_eq(&new_predicate, predicate) {
                Ok(expr.clone())
            } else {
                Ok(Expr::load(*dtype, buffer, &new_index, &new_predicate))
            }
        }
        Expr::Ramp { base, stride, lanes } => {
            let new_base = m.mutate_expr(base)?;
            let new_stride = m.mutate_expr(stride)?;
            if Rc::ptr_eq(&new_base, base) && Rc::ptr_eq(&new_stride, stride) {
                Ok(expr.clone())
            } else {
                Ok(Expr::ramp(&new_base, &new_stride, *lanes))
            }
        }
        Expr::Broadcast { value, lanes } => {
            let new_value = m.mutate_expr(value)?;
            if Rc::ptr_eq(&new_value, value) { Ok(expr.clone()) } else { Ok(Expr::broadcast(&new_value, *lanes)) }
        }
        Expr::Call { dtype, name, args, kind } => {
            let new_args = args.iter().map(|arg| m.mutate_expr(arg)).collect::<Result<Vec<_>, _>>()?;
            if all_same(args, &new_args) {
                Ok(expr.clone())
            } else {
                Ok(Expr::call(*dtype, name.clone(), new_args, *kind))
            }
        }
    }
}

/// Rebuild `stmt` with mutated children, sharing it when nothing changed.
///
/// Bound variables (`LetStmt` var, `For` loop var, `Allocate` buffer,
/// `Store` buffer) are identities and are left alone; a pass that rebinds
/// them matches those variants itself.
pub fn remap_stmt<M: Mutator + ?Sized>(m: &mut M, stmt: &Rc<Stmt>) -> Result<Rc<Stmt>, M::Error> {
    match stmt.as_ref() {
        Stmt::LetStmt { var, value, body } => {
            let new_value = m.mutate_expr(value)?;
            let new_body = m.mutate_stmt(body)?;
            if Rc::ptr_eq(&new_value, value) && Rc::ptr_eq(&new_body, body) {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::let_stmt(var, &new_value, &new_body))
            }
        }
        Stmt::AttrStmt { node, key, value, body } => {
            let new_value = m.mutate_expr(value)?;
            let new_body = m.mutate_stmt(body)?;
            if Rc::ptr_eq(&new_value, value) && Rc::ptr_eq(&new_body, body) {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::attr(node.clone(), key.clone(), &new_value, &new_body))
            }
        }
        Stmt::AssertStmt { condition, message, body } => {
            let new_condition = m.mutate_expr(condition)?;
            let new_message = m.mutate_expr(message)?;
            let new_body = m.mutate_stmt(body)?;
            if Rc::ptr_eq(&new_condition, condition) && Rc::ptr_eq(&new_message, message) && Rc::ptr_eq(&new_body, body)
            {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::assert_stmt(&new_condition, &new_message, &new_body))
            }
        }
        Stmt::Store { buffer, value, index, predicate } => {
            let new_value = m.mutate_expr(value)?;
            let new_index = m.mutate_expr(index)?;
            let new_predicate = m.mutate_expr(predicate)?;
            if Rc::ptr_eq(&new_value, value) && Rc::ptr_eq(&new_index, index) && Rc::ptr_eq(&new_predicate, predicate) {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::store(buffer, &new_value, &new_index, &new_predicate))
            }
        }
        Stmt::Allocate { buffer, dtype, extents, condition, body, new_expr, free_function } => {
            let new_extents = extents.iter().map(|extent| m.mutate_expr(extent)).collect::<Result<Vec<_>, _>>()?;
            let new_condition = m.mutate_expr(condition)?;
            let new_new_expr = new_expr.as_ref().map(|e| m.mutate_expr(e)).transpose()?;
            let new_body = m.mutate_stmt(body)?;
            let unchanged = all_same(extents, &new_extents)
                && Rc::ptr_eq(&new_condition, condition)
                && match (&new_new_expr, new_expr) {
                    (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                }
                && Rc::ptr_eq(&new_body, body);
            if unchanged {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::allocate(buffer, *dtype, new_extents, &new_condition, &new_body, new_new_expr, free_function.clone()))
            }
        }
        Stmt::For { loop_var, min, extent, kind, body } => {
            let new_min = m.mutate_expr(min)?;
            let new_extent = m.mutate_expr(extent)?;
            let new_body = m.mutate_stmt(body)?;
            if Rc::ptr_eq(&new_min, min) && Rc::ptr_eq(&new_extent, extent) && Rc::ptr_eq(&new_body, body) {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::for_(loop_var, &new_min, &new_extent, *kind, &new_body))
            }
        }
        Stmt::IfThenElse { condition, then_case, else_case } => {
            let new_condition = m.mutate_expr(condition)?;
            let new_then = m.mutate_stmt(then_case)?;
            let new_else = else_case.as_ref().map(|e| m.mutate_stmt(e)).transpose()?;
            let unchanged = Rc::ptr_eq(&new_condition, condition)
                && Rc::ptr_eq(&new_then, then_case)
                && match (&new_else, else_case) {
                    (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                };
            if unchanged {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::if_then_else(&new_condition, &new_then, new_else.as_ref()))
            }
        }
        Stmt::Block { first, rest } => {
            let new_first = m.mutate_stmt(first)?;
            let new_rest = m.mutate_stmt(rest)?;
            if Rc::ptr_eq(&new_first, first) && Rc::ptr_eq(&new_rest, rest) {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::block(&new_first, &new_rest))
            }
        }
        Stmt::Evaluate(expr) => {
            let new_expr = m.mutate_expr(expr)?;
            if Rc::ptr_eq(&new_expr, expr) { Ok(stmt.clone()) } else { Ok(Stmt::evaluate(&new_expr)) }
        }
        Stmt::Provide { func, value, args } => {
            let new_value = m.mutate_expr(value)?;
            let new_args = args.iter().map(|arg| m.mutate_expr(arg)).collect::<Result<Vec<_>, _>>()?;
            if Rc::ptr_eq(&new_value, value) && all_same(args, &new_args) {
                Ok(stmt.clone())
            } else {
                Ok(Stmt::provide(func.clone(), &new_value, new_args))
            }
        }
    }
}
