//! Element types for the tenrec IR.
//!
//! A [`DType`] is a scalar element type plus a SIMD lane count. `lanes == 1`
//! is a scalar value; `lanes > 1` is a vector of that many elements, as
//! produced by `Ramp`/`Broadcast` index expressions.

use std::fmt;


/// Scalar element type of an IR value.
///
/// `Handle` is an opaque pointer type used for buffer variables and string
/// payloads; it has the size of a machine pointer and no arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter)]
pub enum ScalarType {
    Bool,

    Int8,
    Int16,
    Int32,
    Int64,

    UInt8,
    UInt16,
    UInt32,
    UInt64,

    Float16,
    Float32,
    Float64,

    /// Opaque pointer (buffer handles).
    Handle,
}

impl ScalarType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 4,
            Self::Int64 => 8,
            Self::UInt8 => 1,
            Self::UInt16 => 2,
            Self::UInt32 => 4,
            Self::UInt64 => 8,
            Self::Float16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
            Self::Handle => 8,
        }
    }

    pub const fn bits(&self) -> usize {
        self.bytes() * 8
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    /// Integer in the wide sense: bool counts, handles and floats do not.
    pub const fn is_int(&self) -> bool {
        self.is_bool() || self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }

    pub const fn is_handle(&self) -> bool {
        matches!(self, Self::Handle)
    }

    pub const fn c_style(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "signed char",
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::UInt8 => "unsigned char",
            Self::UInt16 => "unsigned short",
            Self::UInt32 => "unsigned int",
            Self::UInt64 => "unsigned long",
            Self::Float16 => "half",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::Handle => "void*",
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Handle => "handle",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type plus SIMD lane count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DType {
    scalar: ScalarType,
    lanes: u16,
}

impl DType {
    pub const fn new(scalar: ScalarType, lanes: u16) -> Self {
        Self { scalar, lanes }
    }

    pub const fn scalar_of(scalar: ScalarType) -> Self {
        Self { scalar, lanes: 1 }
    }

    pub const fn scalar(&self) -> ScalarType {
        self.scalar
    }

    pub const fn lanes(&self) -> u16 {
        self.lanes
    }

    /// Same element type with a different lane count.
    pub const fn with_lanes(&self, lanes: u16) -> Self {
        Self { scalar: self.scalar, lanes }
    }

    pub const fn is_scalar(&self) -> bool {
        self.lanes == 1
    }

    pub const fn is_vector(&self) -> bool {
        self.lanes > 1
    }

    /// Total byte size: element size times lane count.
    pub const fn bytes(&self) -> usize {
        self.scalar.bytes() * self.lanes as usize
    }

    pub const fn is_bool(&self) -> bool {
        self.scalar.is_bool()
    }

    pub const fn is_signed(&self) -> bool {
        self.scalar.is_signed()
    }

    pub const fn is_unsigned(&self) -> bool {
        self.scalar.is_unsigned()
    }

    pub const fn is_int(&self) -> bool {
        self.scalar.is_int()
    }

    pub const fn is_float(&self) -> bool {
        self.scalar.is_float()
    }

    pub const fn is_handle(&self) -> bool {
        self.scalar.is_handle()
    }

    pub const fn bool_() -> Self {
        Self::scalar_of(ScalarType::Bool)
    }

    pub const fn int8() -> Self {
        Self::scalar_of(ScalarType::Int8)
    }

    pub const fn int16() -> Self {
        Self::scalar_of(ScalarType::Int16)
    }

    pub const fn int32() -> Self {
        Self::scalar_of(ScalarType::Int32)
    }

    pub const fn int64() -> Self {
        Self::scalar_of(ScalarType::Int64)
    }

    pub const fn uint8() -> Self {
        Self::scalar_of(ScalarType::UInt8)
    }

    pub const fn uint16() -> Self {
        Self::scalar_of(ScalarType::UInt16)
    }

    pub const fn uint32() -> Self {
        Self::scalar_of(ScalarType::UInt32)
    }

    pub const fn uint64() -> Self {
        Self::scalar_of(ScalarType::UInt64)
    }

    pub const fn float16() -> Self {
        Self::scalar_of(ScalarType::Float16)
    }

    pub const fn float32() -> Self {
        Self::scalar_of(ScalarType::Float32)
    }

    pub const fn float64() -> Self {
        Self::scalar_of(ScalarType::Float64)
    }

    pub const fn handle() -> Self {
        Self::scalar_of(ScalarType::Handle)
    }
}

impl From<ScalarType> for DType {
    fn from(scalar: ScalarType) -> Self {
        Self::scalar_of(scalar)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lanes == 1 { write!(f, "{}", self.scalar) } else { write!(f, "{}x{}", self.scalar, self.lanes) }
    }
}
