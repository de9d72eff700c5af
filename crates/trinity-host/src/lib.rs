//! Host runtime for trinity modules.
//!
//! Loads wasm modules with wasmtime, provides their `log` and `sys`
//! imports, and drives each call through argument lowering, the export
//! itself, result decoding and the module's post-return cleanup.

pub mod config;
pub mod dispatch;
pub mod logging;
pub mod manager;
pub mod memory;
pub mod wasm_host;

pub use config::HostConfig;
pub use dispatch::{handle_message, Incoming};
pub use logging::init_logging;
pub use manager::ModuleManager;
pub use trinity_abi::Message;
pub use wasm_host::{ModuleState, WasmHost};
