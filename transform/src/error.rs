use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Malformed-IR conditions that abort a pass.
///
/// Everything else the passes cannot handle is skippable: the offending
/// node passes through unchanged and no error is raised.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// `access_ptr` must have exactly 5 arguments.
    #[snafu(display("access_ptr expects 5 arguments, got {got}"))]
    AccessPtrArity { got: usize },

    /// The read/write mask of `access_ptr` must be known at compile time.
    #[snafu(display("access_ptr read/write mask must be a constant integer"))]
    NonConstantRwMask,

    /// The second argument of `access_ptr` must be a buffer variable.
    #[snafu(display("access_ptr buffer argument must be a variable"))]
    AccessPtrBufferNotVar,

    /// A `Provide` node reached the virtual-thread pass; the caller skipped
    /// the storage-flattening stage.
    #[snafu(display("provide nodes must be flattened to stores before virtual thread injection"))]
    UnflattenedProvide,

    /// A widened buffer handle was observed as a bare variable; rewriting
    /// the allocation would silently change aliasing.
    #[snafu(display("buffer {name:?} address may get rewritten in virtual thread"))]
    BufferEscapes { name: String },

    /// Loops reaching the virtual-thread rewriter are normalised to start
    /// at zero.
    #[snafu(display("virtual thread injection requires loops starting at zero"))]
    NonZeroLoopBase,

    /// The `virtual_thread` attribute value must be a positive integer
    /// constant.
    #[snafu(display("virtual_thread attribute needs a positive constant thread extent"))]
    MissingThreadExtent,

    /// The `virtual_thread` attribute must annotate an iteration variable.
    #[snafu(display("virtual_thread attribute must annotate an iteration variable"))]
    MalformedThreadAttr,
}
