//! SSA re-canonicalisation.
//!
//! Passes that replicate subtrees (loop unrolling, virtual-thread
//! injection) leave the same variable bound at several sites. This pass
//! restores uniqueness: the first binding of a variable keeps its identity,
//! every later binding gets a fresh variable of the same name and dtype,
//! and uses inside the rebound region are redirected. Semantics are
//! preserved because uses always resolve to the innermost enclosing
//! binding.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::rc::Rc;

use crate::expr::{Expr, Var, VarId};
use crate::stmt::{AttrNode, Stmt};
use crate::visit::{Mutator, into_ok, remap_expr, remap_stmt};

/// Rename duplicate binding sites so that every variable is bound once.
pub fn convert_ssa(stmt: &Rc<Stmt>) -> Rc<Stmt> {
    into_ok(SsaConverter::default().mutate_stmt(stmt))
}

#[derive(Default)]
struct SsaConverter {
    /// Active replacements, innermost last.
    scope: HashMap<VarId, Vec<Rc<Var>>>,
    /// Variables that already have a surviving binding site.
    defined: HashSet<VarId>,
}

impl SsaConverter {
    fn replacement(&self, var: &Rc<Var>) -> Option<Rc<Var>> {
        self.scope.get(&var.id()).and_then(|stack| stack.last()).cloned()
    }

    /// Rebind `var` around `body`: fresh variable if this is a repeated
    /// binding, the variable itself otherwise. Returns the variable to bind
    /// and the converted body.
    fn with_binding(&mut self, var: &Rc<Var>, body: &Rc<Stmt>) -> (Rc<Var>, Rc<Stmt>) {
        if self.defined.contains(&var.id()) {
            let fresh = Var::new(var.name().to_string(), var.dtype());
            tracing::trace!(var = var.name(), "renaming repeated binding site");
            self.scope.entry(var.id()).or_default().push(fresh.clone());
            let body = into_ok(self.mutate_stmt(body));
            if let Some(stack) = self.scope.get_mut(&var.id()) {
                stack.pop();
            }
            (fresh, body)
        } else {
            self.defined.insert(var.id());
            (var.clone(), into_ok(self.mutate_stmt(body)))
        }
    }
}

impl Mutator for SsaConverter {
    type Error = Infallible;

    fn mutate_expr(&mut self, expr: &Rc<Expr>) -> Result<Rc<Expr>, Infallible> {
        match expr.as_ref() {
            Expr::Var(var) => match self.replacement(var) {
                Some(replacement) => Ok(Expr::var(&replacement)),
                None => Ok(expr.clone()),
            },
            Expr::Load { dtype, buffer, index, predicate } => {
                let new_index = self.mutate_expr(index)?;
                let new_predicate = self.mutate_expr(predicate)?;
                match self.replacement(buffer) {
                    Some(buffer) => Ok(Expr::load(*dtype, &buffer, &new_index, &new_predicate)),
                    None if Rc::ptr_eq(&new_index, index) && Rc::ptr_eq(&new_predicate, predicate) => Ok(expr.clone()),
                    None => Ok(Expr::load(*dtype, buffer, &new_index, &new_predicate)),
                }
            }
            _ => remap_expr(self, expr),
        }
    }

    fn mutate_stmt(&mut self, stmt: &Rc<Stmt>) -> Result<Rc<Stmt>, Infallible> {
        match stmt.as_ref() {
            Stmt::LetStmt { var, value, body } => {
                let value = self.mutate_expr(value)?;
                let (var, body) = self.with_binding(var, body);
                Ok(Stmt::let_stmt(&var, &value, &body))
            }
            Stmt::For { loop_var, min, extent, kind, body } => {
                let min = self.mutate_expr(min)?;
                let extent = self.mutate_expr(extent)?;
                let (loop_var, body) = self.with_binding(loop_var, body);
                Ok(Stmt::for_(&loop_var, &min, &extent, *kind, &body))
            }
            Stmt::Allocate { buffer, dtype, extents, condition, body, new_expr, free_function } => {
                let extents = extents.iter().map(|e| self.mutate_expr(e)).collect::<Result<Vec<_>, _>>()?;
                let condition = self.mutate_expr(condition)?;
                let new_expr = new_expr.as_ref().map(|e| self.mutate_expr(e)).transpose()?;
                let (buffer, body) = self.with_binding(buffer, body);
                Ok(Stmt::allocate(&buffer, *dtype, extents, &condition, &body, new_expr, free_function.clone()))
            }
            Stmt::Store { buffer, value, index, predicate } => {
                let value = self.mutate_expr(value)?;
                let index = self.mutate_expr(index)?;
                let predicate = self.mutate_expr(predicate)?;
                let buffer = self.replacement(buffer).unwrap_or_else(|| buffer.clone());
                Ok(Stmt::store(&buffer, &value, &index, &predicate))
            }
            Stmt::AttrStmt { node, key, value, body } => {
                let value = self.mutate_expr(value)?;
                let body = self.mutate_stmt(body)?;
                let node = match node {
                    AttrNode::Var(var) => AttrNode::Var(self.replacement(var).unwrap_or_else(|| var.clone())),
                    other => other.clone(),
                };
                Ok(Stmt::attr(node, key.clone(), &value, &body))
            }
            _ => remap_stmt(self, stmt),
        }
    }
}
