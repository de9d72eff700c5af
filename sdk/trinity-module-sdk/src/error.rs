use thiserror::Error;
use trinity_abi::{AbiError, Export};

/// Boundary protocol violations detected by the guest.
///
/// On wasm every one of these traps the instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestError {
    #[error(transparent)]
    Abi(#[from] AbiError),

    #[error("`{requested}` called while the result of `{pending}` has not been released")]
    CallInFlight { pending: Export, requested: Export },

    #[error("post-return for `{0}` invoked with no pending result")]
    NothingPending(Export),

    #[error("post-return for `{got}` but the pending result belongs to `{expected}`")]
    WrongPostReturn { expected: Export, got: Export },

    #[error("post-return for `{export}` got area {got:#x}, expected {expected:#x}")]
    ForeignArea { export: Export, expected: u32, got: u32 },

    #[error("module re-entered while a call is in progress")]
    Reentered,
}
