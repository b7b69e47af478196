//! Transform passes for the tenrec IR.
//!
//! Two independent passes, each a pure function over the statement tree:
//!
//! - [`instrument_bound_checks`] wraps every indexed buffer access with a
//!   dynamic range check that aborts when the linearised index falls
//!   outside the buffer's byte extent.
//! - [`inject_virtual_thread`] lowers `virtual_thread` annotations into
//!   unrolled blocks or serial loops, widening the allocations the logical
//!   threads would otherwise share.
//!
//! Both passes treat the IR as immutable persistent data: rewrites return
//! new nodes and unaffected subtrees stay structurally shared. Fatal
//! malformed-IR conditions surface as [`Error`]; everything else passes
//! through unchanged.

pub mod bound_checker;
pub mod error;
pub mod virtual_thread;

#[cfg(test)]
pub mod test;

pub use bound_checker::{OUT_OF_BOUNDS_MESSAGE, instrument_bound_checks};
pub use error::{Error, Result};
pub use virtual_thread::inject_virtual_thread;
