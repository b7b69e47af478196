//! Expression nodes.
//!
//! Expressions are immutable trees of [`Rc`]-shared nodes. Transformations
//! never mutate a node in place: they rebuild the spine above a change and
//! keep `Rc` clones of every untouched subtree.

use std::cell::Cell;
use std::rc::Rc;

use smallvec::SmallVec;
use tenrec_dtype::DType;

use crate::types::{BinaryOp, CallKind, UnaryOp};

/// Identity token of a variable.
///
/// Allocated from a thread-local counter and never reused, so two `Var`s
/// denote the same variable iff their ids are equal. Cloning the `Rc`
/// preserves identity; constructing a new `Var` with the same name does not.
pub type VarId = u64;

// Thread-local counter for variable identities.
//
// Cell is !Send + !Sync, so ids stay unique without atomics; passes are
// single-threaded and the IR is not shared across threads.
thread_local! {
    static VAR_ID_COUNTER: Cell<VarId> = const { Cell::new(0) };
}

fn next_var_id() -> VarId {
    VAR_ID_COUNTER.with(|counter| {
        let id = counter.get();
        counter.set(id + 1);
        id
    })
}

/// A named variable with a stable identity.
///
/// Buffer variables carry a `Handle` dtype; scalar variables carry the dtype
/// of their value. The name is a hint for printing only and need not be
/// unique.
#[derive(Debug)]
pub struct Var {
    id: VarId,
    name: String,
    dtype: DType,
}

impl Var {
    pub fn new(name: impl Into<String>, dtype: DType) -> Rc<Self> {
        Rc::new(Self { id: next_var_id(), name: name.into(), dtype })
    }

    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Identity comparison. Name and dtype equality are irrelevant.
    pub fn same_as(&self, other: &Var) -> bool {
        self.id == other.id
    }
}

/// An iteration variable annotated with a thread tag (`"vthread"`,
/// `"cthread"`, …). Appears as the node of scheduling attributes.
#[derive(Debug)]
pub struct IterVar {
    var: Rc<Var>,
    thread_tag: String,
}

impl IterVar {
    pub fn new(var: &Rc<Var>, thread_tag: impl Into<String>) -> Rc<Self> {
        Rc::new(Self { var: var.clone(), thread_tag: thread_tag.into() })
    }

    pub fn var(&self) -> &Rc<Var> {
        &self.var
    }

    pub fn thread_tag(&self) -> &str {
        &self.thread_tag
    }
}

/// Expression node.
///
/// The variants mirror the low-level imperative IR: scalar/vector arithmetic,
/// memory reads, and intrinsic calls. Node kinds a pass does not know are
/// traversed transparently by the [`crate::visit`] helpers.
#[derive(Debug)]
pub enum Expr {
    IntConst {
        dtype: DType,
        /// Unsigned dtypes reinterpret these 64 bits.
        value: i64,
    },
    FloatConst {
        dtype: DType,
        value: f64,
    },
    StringConst(String),
    Var(Rc<Var>),
    Cast {
        dtype: DType,
        value: Rc<Expr>,
    },
    Binary {
        op: BinaryOp,
        a: Rc<Expr>,
        b: Rc<Expr>,
    },
    Unary {
        op: UnaryOp,
        value: Rc<Expr>,
    },
    /// Read of `lanes(dtype)` elements from `buffer` at `index`, masked by
    /// `predicate`.
    Load {
        dtype: DType,
        buffer: Rc<Var>,
        index: Rc<Expr>,
        predicate: Rc<Expr>,
    },
    /// The index sequence `base, base+stride, …, base+stride*(lanes-1)`.
    Ramp {
        base: Rc<Expr>,
        stride: Rc<Expr>,
        lanes: u16,
    },
    /// A scalar replicated across `lanes` lanes.
    Broadcast {
        value: Rc<Expr>,
        lanes: u16,
    },
    Call {
        dtype: DType,
        name: String,
        args: Vec<Rc<Expr>>,
        kind: CallKind,
    },
}

impl Expr {
    pub fn int_const(dtype: DType, value: i64) -> Rc<Self> {
        Rc::new(Self::IntConst { dtype, value })
    }

    pub fn float_const(dtype: DType, value: f64) -> Rc<Self> {
        Rc::new(Self::FloatConst { dtype, value })
    }

    pub fn string_const(value: impl Into<String>) -> Rc<Self> {
        Rc::new(Self::StringConst(value.into()))
    }

    pub fn var(var: &Rc<Var>) -> Rc<Self> {
        Rc::new(Self::Var(var.clone()))
    }

    pub fn cast(dtype: DType, value: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self::Cast { dtype, value: value.clone() })
    }

    pub fn binary(op: BinaryOp, a: &Rc<Self>, b: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self::Binary { op, a: a.clone(), b: b.clone() })
    }

    pub fn unary(op: UnaryOp, value: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self::Unary { op, value: value.clone() })
    }

    pub fn load(dtype: DType, buffer: &Rc<Var>, index: &Rc<Self>, predicate: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self::Load { dtype, buffer: buffer.clone(), index: index.clone(), predicate: predicate.clone() })
    }

    pub fn ramp(base: &Rc<Self>, stride: &Rc<Self>, lanes: u16) -> Rc<Self> {
        debug_assert!(base.dtype().is_scalar(), "ramp base must be scalar");
        debug_assert!(stride.dtype().is_scalar(), "ramp stride must be scalar");
        debug_assert!(lanes > 0);
        Rc::new(Self::Ramp { base: base.clone(), stride: stride.clone(), lanes })
    }

    pub fn broadcast(value: &Rc<Self>, lanes: u16) -> Rc<Self> {
        debug_assert!(value.dtype().is_scalar(), "broadcast value must be scalar");
        debug_assert!(lanes > 0);
        Rc::new(Self::Broadcast { value: value.clone(), lanes })
    }

    pub fn call(dtype: DType, name: impl Into<String>, args: Vec<Rc<Self>>, kind: CallKind) -> Rc<Self> {
        Rc::new(Self::Call { dtype, name: name.into(), args, kind })
    }

    pub fn add(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Add, self, rhs)
    }

    pub fn sub(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Sub, self, rhs)
    }

    pub fn mul(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Mul, self, rhs)
    }

    pub fn div(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Div, self, rhs)
    }

    pub fn rem(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Mod, self, rhs)
    }

    pub fn min(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Min, self, rhs)
    }

    pub fn max(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Max, self, rhs)
    }

    pub fn eq(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn ne(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Ne, self, rhs)
    }

    pub fn lt(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn le(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Le, self, rhs)
    }

    pub fn gt(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Gt, self, rhs)
    }

    pub fn ge(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Ge, self, rhs)
    }

    pub fn and(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::And, self, rhs)
    }

    pub fn or(self: &Rc<Self>, rhs: &Rc<Self>) -> Rc<Self> {
        Self::binary(BinaryOp::Or, self, rhs)
    }

    pub fn not(self: &Rc<Self>) -> Rc<Self> {
        Self::unary(UnaryOp::Not, self)
    }

    pub fn neg(self: &Rc<Self>) -> Rc<Self> {
        Self::unary(UnaryOp::Neg, self)
    }

    /// The variable behind a bare `Var` node, if this is one.
    pub fn as_var(&self) -> Option<&Rc<Var>> {
        match self {
            Self::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Computed type of this expression.
    pub fn dtype(&self) -> DType {
        match self {
            Self::IntConst { dtype, .. } | Self::FloatConst { dtype, .. } => *dtype,
            Self::StringConst(_) => DType::handle(),
            Self::Var(v) => v.dtype(),
            Self::Cast { dtype, .. } => *dtype,
            Self::Binary { op, a, .. } => {
                if op.is_comparison() || op.is_logical() {
                    DType::bool_().with_lanes(a.dtype().lanes())
                } else {
                    a.dtype()
                }
            }
            Self::Unary { op, value } => match op {
                UnaryOp::Neg => value.dtype(),
                UnaryOp::Not => DType::bool_().with_lanes(value.dtype().lanes()),
            },
            Self::Load { dtype, .. } => *dtype,
            Self::Ramp { base, lanes, .. } => base.dtype().with_lanes(*lanes),
            Self::Broadcast { value, lanes } => value.dtype().with_lanes(*lanes),
            Self::Call { dtype, .. } => *dtype,
        }
    }

    /// Direct sub-expressions, for generic traversal.
    ///
    /// Buffer variables of `Load` are identities, not sub-expressions, and
    /// are not listed; passes that care about them match on `Load` directly.
    pub fn children(&self) -> SmallVec<[&Rc<Expr>; 4]> {
        match self {
            Self::IntConst { .. } | Self::FloatConst { .. } | Self::StringConst(_) | Self::Var(_) => SmallVec::new(),
            Self::Cast { value, .. } | Self::Unary { value, .. } | Self::Broadcast { value, .. } => {
                SmallVec::from_slice(&[value])
            }
            Self::Binary { a, b, .. } => SmallVec::from_slice(&[a, b]),
            Self::Load { index, predicate, .. } => SmallVec::from_slice(&[index, predicate]),
            Self::Ramp { base, stride, .. } => SmallVec::from_slice(&[base, stride]),
            Self::Call { args, .. } => args.iter().collect(),
        }
    }
}
