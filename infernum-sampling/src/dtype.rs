//! Data types for tensor and buffer elements

use std::fmt;

/// Supported data types for tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point
    F32,
    /// 16-bit floating point (IEEE 754)
    F16,
    /// Brain floating point (16-bit)
    BF16,
    /// 32-bit unsigned integer
    U32,
    /// 32-bit signed integer (token ids, lengths)
    I32,
    /// 64-bit unsigned integer (random-generator state)
    U64,
    /// Byte-sized boolean flags (`finished`, skip flags)
    Bool,
}

impl DType {
    /// Size of the dtype in bytes
    #[must_use]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 | Self::U32 | Self::I32 => 4,
            Self::F16 | Self::BF16 => 2,
            Self::U64 => 8,
            Self::Bool => 1,
        }
    }

    /// Whether this dtype can hold logits.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F16 | Self::BF16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32 => write!(f, "f32"),
            Self::F16 => write!(f, "f16"),
            Self::BF16 => write!(f, "bf16"),
            Self::U32 => write!(f, "u32"),
            Self::I32 => write!(f, "i32"),
            Self::U64 => write!(f, "u64"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// Trait for types that can be used as tensor elements
pub trait TensorDType: bytemuck::Pod + Default + Send + Sync + 'static {
    /// The corresponding `DType` enum value
    const DTYPE: DType;
}

impl TensorDType for f32 {
    const DTYPE: DType = DType::F32;
}

impl TensorDType for half::f16 {
    const DTYPE: DType = DType::F16;
}

impl TensorDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
}

impl TensorDType for u32 {
    const DTYPE: DType = DType::U32;
}

impl TensorDType for i32 {
    const DTYPE: DType = DType::I32;
}

impl TensorDType for u64 {
    const DTYPE: DType = DType::U64;
}

impl TensorDType for u8 {
    const DTYPE: DType = DType::Bool;
}

/// Floating-point element type the sampling layer is instantiated with.
///
/// The layer is generic over this type; it is bound once when the layer is
/// constructed. Kernels compute in f32 and convert at the boundary.
pub trait LogitDType: TensorDType + PartialOrd {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
    /// Most negative finite value, used to mask a logit out.
    fn lowest() -> Self;
    /// Largest finite value, used to force a logit in.
    fn highest() -> Self;
}

impl LogitDType for f32 {
    fn to_f32(self) -> f32 {
        self
    }
    fn from_f32(v: f32) -> Self {
        v
    }
    fn lowest() -> Self {
        f32::MIN
    }
    fn highest() -> Self {
        f32::MAX
    }
}

impl LogitDType for half::f16 {
    fn to_f32(self) -> f32 {
        half::f16::to_f32(self)
    }
    fn from_f32(v: f32) -> Self {
        half::f16::from_f32(v)
    }
    fn lowest() -> Self {
        half::f16::MIN
    }
    fn highest() -> Self {
        half::f16::MAX
    }
}

impl LogitDType for half::bf16 {
    fn to_f32(self) -> f32 {
        half::bf16::to_f32(self)
    }
    fn from_f32(v: f32) -> Self {
        half::bf16::from_f32(v)
    }
    fn lowest() -> Self {
        half::bf16::MIN
    }
    fn highest() -> Self {
        half::bf16::MAX
    }
}
