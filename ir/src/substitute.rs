//! Variable substitution.
//!
//! Replaces occurrences of variables by expressions, keyed by identity.
//! Binding sites are not renamed: substituting a variable that is also
//! rebound somewhere in the tree replaces its uses but leaves the binding;
//! callers that replicate subtrees run [`crate::ssa::convert_ssa`] afterwards
//! to restore unique bindings.

use std::collections::HashMap;
use std::convert::Infallible;
use std::rc::Rc;

use crate::expr::{Expr, VarId};
use crate::stmt::Stmt;
use crate::visit::{Mutator, into_ok, remap_expr};

/// Replacement map keyed by variable identity.
pub type VarMap = HashMap<VarId, Rc<Expr>>;

/// Substitute variables in a statement.
pub fn substitute(stmt: &Rc<Stmt>, map: &VarMap) -> Rc<Stmt> {
    if map.is_empty() {
        return stmt.clone();
    }
    into_ok(Substituter { map }.mutate_stmt(stmt))
}

/// Substitute variables in an expression.
pub fn substitute_expr(expr: &Rc<Expr>, map: &VarMap) -> Rc<Expr> {
    if map.is_empty() {
        return expr.clone();
    }
    into_ok(Substituter { map }.mutate_expr(expr))
}

struct Substituter<'a> {
    map: &'a VarMap,
}

impl Mutator for Substituter<'_> {
    type Error = Infallible;

    fn mutate_expr(&mut self, expr: &Rc<Expr>) -> Result<Rc<Expr>, Infallible> {
        if let Expr::Var(var) = expr.as_ref()
            && let Some(replacement) = self.map.get(&var.id())
        {
            return Ok(replacement.clone());
        }
        remap_expr(self, expr)
    }
}
