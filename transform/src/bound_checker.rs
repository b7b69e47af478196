//! Bound-check instrumentation.
//!
//! Wraps every instrumentable store with a dynamic range check over the
//! indices it and its loads touch, so that an out-of-range access aborts at
//! run time instead of corrupting memory.
//!
//! Two traversals:
//!
//! 1. [`BoundCollector`] gathers `buffer_bound` attributes into a
//!    buffer-to-byte-extent map.
//! 2. [`BoundChecker`] rewrites each eligible `Store` into
//!    `if cond { store } else { assert(cond, "OUT OF THE BOUNDS") }`, where
//!    `cond` range-checks the store index and every load index collected
//!    while rewriting the store's operands.
//!
//! The pass is total: IR it cannot instrument (no bound binding, exotic
//! index shape, `if_then_else` guards in the store value) passes through
//! unchanged.

use std::collections::HashMap;
use std::convert::Infallible;
use std::rc::Rc;

use smallvec::SmallVec;
use tenrec_dtype::DType;
use tenrec_ir::visit::{Mutator, Visitor, into_ok, remap_expr, remap_stmt, walk_stmt};
use tenrec_ir::{Expr, Stmt, Var, VarId, attr, intrinsic, is_negative_const, make_const, make_zero, simplify};

/// Message carried by the assert on the failure branch. Byte-exact; runtimes
/// and tests grep for it.
pub const OUT_OF_BOUNDS_MESSAGE: &str = "OUT OF THE BOUNDS";

/// Instrument every eligible buffer access in `stmt` with a bound check.
///
/// Total: input the pass cannot instrument is returned unchanged.
pub fn instrument_bound_checks(stmt: &Rc<Stmt>) -> Rc<Stmt> {
    let mut collector = BoundCollector::default();
    collector.visit_stmt(stmt);
    tracing::debug!(bound_buffers = collector.mem_to_shape.len(), "instrumenting bound checks");
    into_ok(BoundChecker::new(collector.mem_to_shape).mutate_stmt(stmt))
}

/// Pre-order scan for `buffer_bound` attributes.
///
/// A later attribute for the same buffer overwrites an earlier one, so the
/// checker sees the last binding in traversal order.
#[derive(Default)]
struct BoundCollector {
    mem_to_shape: HashMap<VarId, Rc<Expr>>,
}

impl Visitor for BoundCollector {
    fn visit_stmt(&mut self, stmt: &Rc<Stmt>) {
        if let Stmt::AttrStmt { node, key, value, .. } = stmt.as_ref()
            && key == attr::BUFFER_BOUND
            && let Some(buffer) = node.as_var()
        {
            self.mem_to_shape.insert(buffer.id(), value.clone());
        }
        walk_stmt(self, stmt);
    }
}

struct BoundChecker {
    /// Whether we are rewriting the operands of a store.
    process_store: bool,
    /// Whether an `if_then_else` intrinsic appeared in those operands. The
    /// intrinsic may be an isolation guard making a neighbouring access
    /// conditionally dead; a check would fire false positives.
    unsafe_rewritten: bool,
    /// Index/byte-extent pairs collected for the current store.
    pending: SmallVec<[(Rc<Expr>, Rc<Expr>); 4]>,
    mem_to_shape: HashMap<VarId, Rc<Expr>>,
}

impl BoundChecker {
    fn new(mem_to_shape: HashMap<VarId, Rc<Expr>>) -> Self {
        Self { process_store: false, unsafe_rewritten: false, pending: SmallVec::new(), mem_to_shape }
    }

    /// Refresh the byte extent of a bound buffer from its allocation:
    /// `uint64(lanes) * uint64(extent_0) * … * uint64(extent_n-1)`.
    ///
    /// Unsigned 64-bit arithmetic forestalls overflow while multiplying;
    /// the final comparison happens in signed 64-bit. Extents that are
    /// non-scalar or provably negative leave the attribute binding as is.
    fn update_shape(&mut self, buffer: &Rc<Var>, extents: &[Rc<Expr>], dtype: DType) {
        if extents.is_empty() {
            return;
        }
        for extent in extents {
            if !extent.dtype().is_scalar() || is_negative_const(extent) {
                return;
            }
        }
        let uint64 = DType::uint64();
        let mut shape = make_const(uint64, i64::from(dtype.lanes()));
        for extent in extents {
            shape = shape.mul(&Expr::cast(uint64, extent));
        }
        self.mem_to_shape.insert(buffer.id(), shape);
    }

    /// Scalar indices and well-formed ramps are checkable; anything else is
    /// passed through.
    fn index_is_valid(index: &Expr) -> bool {
        match index {
            Expr::Ramp { base, stride, lanes } => {
                base.dtype().is_scalar() && stride.dtype().is_scalar() && *lanes > 0
            }
            _ => true,
        }
    }

    fn can_instrument(&self, index: &Expr, buffer: &Var) -> bool {
        self.mem_to_shape.contains_key(&buffer.id()) && Self::index_is_valid(index) && !self.unsafe_rewritten
    }

    fn collect(&mut self, index: &Rc<Expr>, buffer: &Var) {
        let shape = self.mem_to_shape[&buffer.id()].clone();
        self.pending.push((index.clone(), shape));
    }

    /// Conjoin `(idx >= 0) && (idx < upper)` over every collected pair.
    ///
    /// A ramp index checks its largest element `base + stride*(lanes-1)`;
    /// the lower end is `base`, which is non-negative after normalisation
    /// (negative-stride ramps do not reach this pass). Index and bound are
    /// simplified and compared as signed 64-bit so an underflowed extent
    /// shows up negative and fails the check.
    fn make_condition(&self) -> Option<Rc<Expr>> {
        let mut condition: Option<Rc<Expr>> = None;
        for (index, upper_bound) in &self.pending {
            let index = match index.as_ref() {
                Expr::Ramp { base, stride, lanes } => {
                    base.add(&stride.mul(&make_const(stride.dtype(), i64::from(*lanes) - 1)))
                }
                _ => index.clone(),
            };
            let index = simplify(&index);
            let upper_bound = simplify(upper_bound);

            let int64 = DType::int64();
            let index = Expr::cast(int64, &index);
            let upper_bound = Expr::cast(int64, &upper_bound);
            let lower_bound = make_zero(int64);

            let current = index.ge(&lower_bound).and(&index.lt(&upper_bound));
            condition = Some(match condition {
                Some(accumulated) => accumulated.and(&current),
                None => current,
            });
        }
        // A condition reduced to a bare literal carries no check.
        condition.filter(|c| !matches!(c.as_ref(), Expr::IntConst { .. } | Expr::StringConst(_)))
    }
}

impl Mutator for BoundChecker {
    type Error = Infallible;

    fn mutate_expr(&mut self, expr: &Rc<Expr>) -> Result<Rc<Expr>, Infallible> {
        match expr.as_ref() {
            Expr::Call { name, .. } if self.process_store && name == intrinsic::IF_THEN_ELSE => {
                self.unsafe_rewritten = true;
                remap_expr(self, expr)
            }
            Expr::Load { buffer, index, .. } => {
                if self.can_instrument(index, buffer) {
                    self.collect(index, buffer);
                }
                remap_expr(self, expr)
            }
            _ => remap_expr(self, expr),
        }
    }

    fn mutate_stmt(&mut self, stmt: &Rc<Stmt>) -> Result<Rc<Stmt>, Infallible> {
        match stmt.as_ref() {
            Stmt::Allocate { buffer, dtype, extents, .. } => {
                if self.mem_to_shape.contains_key(&buffer.id()) {
                    self.update_shape(buffer, extents, *dtype);
                }
                remap_stmt(self, stmt)
            }
            Stmt::Store { buffer, index, .. } => {
                let buffer = buffer.clone();
                let index = index.clone();

                self.pending.clear();
                self.process_store = true;
                self.unsafe_rewritten = false;
                let store = remap_stmt(self, stmt)?;
                self.process_store = false;

                if self.can_instrument(&index, &buffer) {
                    self.collect(&index, &buffer);
                }
                if !self.pending.is_empty()
                    && let Some(condition) = self.make_condition()
                {
                    tracing::trace!(buffer = buffer.name(), checks = self.pending.len(), "guarding store");
                    let nop = Stmt::evaluate(&make_const(DType::int32(), 1));
                    let message = Expr::string_const(OUT_OF_BOUNDS_MESSAGE);
                    let failure = Stmt::assert_stmt(&condition, &message, &nop);
                    return Ok(Stmt::if_then_else(&condition, &store, Some(&failure)));
                }
                Ok(store)
            }
            _ => remap_stmt(self, stmt),
        }
    }
}
