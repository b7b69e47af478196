//! Low-level imperative IR for the tenrec compiler.
//!
//! The IR is a tree of immutable [`std::rc::Rc`]-shared nodes describing
//! nested loops, buffer allocations, loads, stores, conditionals, and
//! intrinsic calls. Transformations are pure functions over the tree:
//! they rebuild the spine above a change and share every untouched subtree.
//!
//! # Module Organization
//!
//! - [`expr`] / [`stmt`] - node kinds and builder constructors
//! - [`types`] - operator and kind enums
//! - [`visit`] - generic [`Visitor`]/[`Mutator`] traversal
//! - [`ops`] - constant helpers and intrinsic builders
//! - [`simplify`] - bottom-up constant folding
//! - [`substitute`] - identity-keyed variable substitution
//! - [`ssa`] - re-canonicalisation after subtree replication
//! - [`fmt`] - diagnostic pretty printer
//!
//! Variables are compared by identity, never by name: each [`Var`] carries
//! an id from a thread-local counter, so cloning the `Rc` preserves the
//! variable while constructing a new `Var` makes a distinct one.

pub mod expr;
pub mod fmt;
pub mod ops;
pub mod simplify;
pub mod ssa;
pub mod stmt;
pub mod substitute;
pub mod types;
pub mod visit;

#[cfg(test)]
pub mod test;

pub use expr::{Expr, IterVar, Var, VarId};
pub use ops::{
    access_ptr, const_true, context_id, get_const_int, if_then_else, is_const_int, is_const_true, is_negative_const,
    is_zero, make_const, make_zero, type_annotation,
};
pub use simplify::simplify;
pub use ssa::convert_ssa;
pub use stmt::{AttrNode, Stmt};
pub use substitute::{VarMap, substitute, substitute_expr};
pub use types::{BinaryOp, CallKind, ForKind, UnaryOp};
pub use visit::{Mutator, Visitor, into_ok, remap_expr, remap_stmt, walk_expr, walk_stmt};

// Re-export so downstream crates name one dtype.
pub use tenrec_dtype::{DType, ScalarType};

/// Attribute keys understood by the transform passes.
///
/// These strings are a wire format of sorts: producers and passes must
/// agree on them byte for byte.
pub mod attr {
    /// Binds a buffer variable to a scalar expression denoting its byte
    /// extent.
    pub const BUFFER_BOUND: &str = "buffer_bound";
    /// Marks a subtree for virtual-thread injection; the node is an
    /// `IterVar` and the value the thread count.
    pub const VIRTUAL_THREAD: &str = "virtual_thread";
    /// Co-processor micro-op region; not shareable across thread
    /// identities.
    pub const COPROC_UOP_SCOPE: &str = "coproc_uop_scope";
    /// Co-processor region; not shareable across thread identities.
    pub const COPROC_SCOPE: &str = "coproc_scope";
}

/// Intrinsic call names.
pub mod intrinsic {
    /// `if_then_else(cond, a, b)` - lazily evaluated select.
    pub const IF_THEN_ELSE: &str = "if_then_else";
    /// `access_ptr(dtype, buffer, offset, extent, rw_mask)` - opaque
    /// region handle for the code generator.
    pub const ACCESS_PTR: &str = "access_ptr";
    /// `context_id()` - identity of the executing context.
    pub const CONTEXT_ID: &str = "context_id";
}
