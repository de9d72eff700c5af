use thiserror::Error;

pub type Result<T> = std::result::Result<T, AbiError>;

/// Ways a flat value can fail to decode or encode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("memory access out of bounds: addr={addr}, len={len}, memory_size={size}")]
    OutOfBounds { addr: u32, len: u32, size: usize },

    #[error("misaligned access: addr={addr} is not {align}-byte aligned")]
    Misaligned { addr: u32, align: u32 },

    #[error("element index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: u32, len: u32 },

    #[error("invalid option discriminant: {0}")]
    InvalidDiscriminant(u32),

    #[error("string at addr={addr} is not valid UTF-8")]
    InvalidUtf8 { addr: u32 },

    #[error("length {0} does not fit in a 32-bit linear memory")]
    LengthOverflow(usize),
}
