//! Pretty printer.
//!
//! Compact single-line expressions, indented multi-line statements. The
//! output is for diagnostics and test failure messages; it is not a parseable
//! or stable surface.

use std::fmt::{self, Display, Formatter};

use crate::expr::Expr;
use crate::ops::is_const_true;
use crate::stmt::{AttrNode, Stmt};
use crate::types::{BinaryOp, UnaryOp};

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntConst { value, .. } => write!(f, "{value}"),
            Self::FloatConst { value, .. } => write!(f, "{value:?}"),
            Self::StringConst(s) => write!(f, "{s:?}"),
            Self::Var(var) => f.write_str(var.name()),
            Self::Cast { dtype, value } => write!(f, "{dtype}({value})"),
            Self::Binary { op, a, b } => match op {
                BinaryOp::Min | BinaryOp::Max => write!(f, "{}({a}, {b})", op.symbol()),
                _ => write!(f, "({a} {} {b})", op.symbol()),
            },
            Self::Unary { op, value } => match op {
                UnaryOp::Neg => write!(f, "(-{value})"),
                UnaryOp::Not => write!(f, "!{value}"),
            },
            Self::Load { buffer, index, predicate, .. } => {
                if trivially_true(predicate) {
                    write!(f, "{}[{index}]", buffer.name())
                } else {
                    write!(f, "{}[{index} if {predicate}]", buffer.name())
                }
            }
            Self::Ramp { base, stride, lanes } => write!(f, "ramp({base}, {stride}, {lanes})"),
            Self::Broadcast { value, lanes } => write!(f, "x{lanes}({value})"),
            Self::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Constant-true predicate, scalar or broadcast.
fn trivially_true(predicate: &Expr) -> bool {
    match predicate {
        Expr::Broadcast { value, .. } => is_const_true(value),
        _ => is_const_true(predicate),
    }
}

impl Display for AttrNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(var) => f.write_str(var.name()),
            Self::IterVar(iv) => write!(f, "{}:{}", iv.var().name(), iv.thread_tag()),
            Self::None => f.write_str("_"),
        }
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

fn pad(f: &mut Formatter<'_>, indent: usize) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    Ok(())
}

fn write_stmt(f: &mut Formatter<'_>, stmt: &Stmt, indent: usize) -> fmt::Result {
    // A block is a sequence, not a scope: both halves print at this level.
    if let Stmt::Block { first, rest } = stmt {
        write_stmt(f, first, indent)?;
        return write_stmt(f, rest, indent);
    }

    pad(f, indent)?;
    match stmt {
        Stmt::Block { .. } => unreachable!("handled above"),
        Stmt::LetStmt { var, value, body } => {
            writeln!(f, "let {} = {value}", var.name())?;
            write_stmt(f, body, indent)
        }
        Stmt::AttrStmt { node, key, value, body } => {
            writeln!(f, "// attr [{node}] {key} = {value}")?;
            write_stmt(f, body, indent)
        }
        Stmt::AssertStmt { condition, message, body } => {
            writeln!(f, "assert({condition}, {message})")?;
            write_stmt(f, body, indent)
        }
        Stmt::Store { buffer, value, index, predicate } => {
            if trivially_true(predicate) {
                writeln!(f, "{}[{index}] = {value}", buffer.name())
            } else {
                writeln!(f, "{}[{index}] = {value} if {predicate}", buffer.name())
            }
        }
        Stmt::Allocate { buffer, dtype, extents, condition, body, .. } => {
            write!(f, "allocate {}[{dtype}", buffer.name())?;
            for extent in extents {
                write!(f, " * {extent}")?;
            }
            f.write_str("]")?;
            if !is_const_true(condition) {
                write!(f, " if {condition}")?;
            }
            writeln!(f)?;
            write_stmt(f, body, indent)
        }
        Stmt::For { loop_var, min, extent, kind, body } => {
            writeln!(f, "for {kind:?} ({}, {min}, {extent}) {{", loop_var.name())?;
            write_stmt(f, body, indent + 1)?;
            pad(f, indent)?;
            writeln!(f, "}}")
        }
        Stmt::IfThenElse { condition, then_case, else_case } => {
            writeln!(f, "if ({condition}) {{")?;
            write_stmt(f, then_case, indent + 1)?;
            pad(f, indent)?;
            match else_case {
                Some(else_case) => {
                    writeln!(f, "}} else {{")?;
                    write_stmt(f, else_case, indent + 1)?;
                    pad(f, indent)?;
                    writeln!(f, "}}")
                }
                None => writeln!(f, "}}"),
            }
        }
        Stmt::Evaluate(expr) => writeln!(f, "{expr}"),
        Stmt::Provide { func, value, args } => {
            write!(f, "{func}(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{arg}")?;
            }
            writeln!(f, ") = {value}")
        }
    }
}
