//! Statement nodes.

use std::rc::Rc;

use tenrec_dtype::DType;

use crate::expr::{Expr, IterVar, Var};
use crate::types::ForKind;

/// Node annotated by an [`Stmt::AttrStmt`].
#[derive(Debug, Clone)]
pub enum AttrNode {
    Var(Rc<Var>),
    IterVar(Rc<IterVar>),
    None,
}

impl AttrNode {
    pub fn as_var(&self) -> Option<&Rc<Var>> {
        match self {
            Self::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_iter_var(&self) -> Option<&Rc<IterVar>> {
        match self {
            Self::IterVar(iv) => Some(iv),
            _ => None,
        }
    }
}

/// Statement node.
///
/// Like expressions, statements are immutable `Rc` trees; a `Block` is a
/// right-leaning pair, so a sequence of statements nests in `rest`.
#[derive(Debug)]
pub enum Stmt {
    LetStmt {
        var: Rc<Var>,
        value: Rc<Expr>,
        body: Rc<Stmt>,
    },
    /// Opaque annotation over `body`; `key` strings are listed in
    /// [`crate::attr`].
    AttrStmt {
        node: AttrNode,
        key: String,
        value: Rc<Expr>,
        body: Rc<Stmt>,
    },
    AssertStmt {
        condition: Rc<Expr>,
        message: Rc<Expr>,
        body: Rc<Stmt>,
    },
    /// Write of `value` to `buffer` at `index`, masked by `predicate`.
    Store {
        buffer: Rc<Var>,
        value: Rc<Expr>,
        index: Rc<Expr>,
        predicate: Rc<Expr>,
    },
    Allocate {
        buffer: Rc<Var>,
        dtype: DType,
        extents: Vec<Rc<Expr>>,
        condition: Rc<Expr>,
        body: Rc<Stmt>,
        /// External storage expression; when present the allocation is not
        /// owned by this statement and cannot be replicated.
        new_expr: Option<Rc<Expr>>,
        free_function: Option<String>,
    },
    For {
        loop_var: Rc<Var>,
        min: Rc<Expr>,
        extent: Rc<Expr>,
        kind: ForKind,
        body: Rc<Stmt>,
    },
    IfThenElse {
        condition: Rc<Expr>,
        then_case: Rc<Stmt>,
        else_case: Option<Rc<Stmt>>,
    },
    Block {
        first: Rc<Stmt>,
        rest: Rc<Stmt>,
    },
    Evaluate(Rc<Expr>),
    /// Pre-flattening multi-dimensional store. Only exists so late passes
    /// can reject IR that skipped the flattening stage.
    Provide {
        func: String,
        value: Rc<Expr>,
        args: Vec<Rc<Expr>>,
    },
}

impl Stmt {
    pub fn let_stmt(var: &Rc<Var>, value: &Rc<Expr>, body: &Rc<Stmt>) -> Rc<Self> {
        Rc::new(Self::LetStmt { var: var.clone(), value: value.clone(), body: body.clone() })
    }

    pub fn attr(node: AttrNode, key: impl Into<String>, value: &Rc<Expr>, body: &Rc<Stmt>) -> Rc<Self> {
        Rc::new(Self::AttrStmt { node, key: key.into(), value: value.clone(), body: body.clone() })
    }

    pub fn assert_stmt(condition: &Rc<Expr>, message: &Rc<Expr>, body: &Rc<Stmt>) -> Rc<Self> {
        Rc::new(Self::AssertStmt { condition: condition.clone(), message: message.clone(), body: body.clone() })
    }

    pub fn store(buffer: &Rc<Var>, value: &Rc<Expr>, index: &Rc<Expr>, predicate: &Rc<Expr>) -> Rc<Self> {
        Rc::new(Self::Store {
            buffer: buffer.clone(),
            value: value.clone(),
            index: index.clone(),
            predicate: predicate.clone(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn allocate(
        buffer: &Rc<Var>,
        dtype: DType,
        extents: Vec<Rc<Expr>>,
        condition: &Rc<Expr>,
        body: &Rc<Stmt>,
        new_expr: Option<Rc<Expr>>,
        free_function: Option<String>,
    ) -> Rc<Self> {
        Rc::new(Self::Allocate {
            buffer: buffer.clone(),
            dtype,
            extents,
            condition: condition.clone(),
            body: body.clone(),
            new_expr,
            free_function,
        })
    }

    pub fn for_(loop_var: &Rc<Var>, min: &Rc<Expr>, extent: &Rc<Expr>, kind: ForKind, body: &Rc<Stmt>) -> Rc<Self> {
        Rc::new(Self::For {
            loop_var: loop_var.clone(),
            min: min.clone(),
            extent: extent.clone(),
            kind,
            body: body.clone(),
        })
    }

    pub fn if_then_else(condition: &Rc<Expr>, then_case: &Rc<Stmt>, else_case: Option<&Rc<Stmt>>) -> Rc<Self> {
        Rc::new(Self::IfThenElse {
            condition: condition.clone(),
            then_case: then_case.clone(),
            else_case: else_case.cloned(),
        })
    }

    pub fn block(first: &Rc<Stmt>, rest: &Rc<Stmt>) -> Rc<Self> {
        Rc::new(Self::Block { first: first.clone(), rest: rest.clone() })
    }

    pub fn evaluate(expr: &Rc<Expr>) -> Rc<Self> {
        Rc::new(Self::Evaluate(expr.clone()))
    }

    pub fn provide(func: impl Into<String>, value: &Rc<Expr>, args: Vec<Rc<Expr>>) -> Rc<Self> {
        Rc::new(Self::Provide { func: func.into(), value: value.clone(), args })
    }

    /// Right-leaning sequence of statements. Panics on an empty slice.
    pub fn seq(stmts: &[Rc<Stmt>]) -> Rc<Self> {
        let (last, init) = stmts.split_last().expect("seq of at least one statement");
        init.iter().rev().fold(last.clone(), |rest, first| Self::block(first, &rest))
    }
}
