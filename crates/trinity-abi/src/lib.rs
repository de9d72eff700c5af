//! Flat memory layout shared by trinity modules and the host that drives them.
//!
//! Every value crossing the boundary lives in the guest's linear memory as
//! little-endian 32-bit words at fixed offsets. Both sides decode those words
//! with the same code so the layout is defined exactly once.

pub mod contract;
pub mod error;
pub mod flat;
pub mod memory;
pub mod message;

pub use contract::{
    Export, LogLevel, LOG_MODULE, MEMORY_EXPORT, RAND_U64_IMPORT, REALLOC_EXPORT, SYS_MODULE,
};
pub use error::{AbiError, Result};
pub use flat::{
    byte_len_for, lift_option_string, load_option_string, option_string_words,
    store_option_string, FlatList, FlatMessage, FlatString, OPTION_STRING_SIZE,
};
pub use memory::{load_u32, store_u32, LinearMemory};
pub use message::Message;
