//! Host functions a module can call.
//!
//! Inside wasm these are the `log` and `sys` imports. Built natively they
//! fall back to `tracing` and `rand` so handlers can be exercised in tests.

use trinity_abi::LogLevel;

#[cfg(target_arch = "wasm32")]
mod host {
    #[link(wasm_import_module = "log")]
    extern "C" {
        #[link_name = "trace"]
        pub fn log_trace(ptr: i32, len: i32);
        #[link_name = "debug"]
        pub fn log_debug(ptr: i32, len: i32);
        #[link_name = "info"]
        pub fn log_info(ptr: i32, len: i32);
        #[link_name = "warn"]
        pub fn log_warn(ptr: i32, len: i32);
        #[link_name = "error"]
        pub fn log_error(ptr: i32, len: i32);
    }

    #[link(wasm_import_module = "sys")]
    extern "C" {
        #[link_name = "rand-u64"]
        pub fn rand_u64() -> i64;
    }
}

/// Send one log line to the host at `level`.
#[cfg(target_arch = "wasm32")]
pub fn log(level: LogLevel, msg: &str) {
    let ptr = msg.as_ptr() as i32;
    let len = msg.len() as i32;
    // SAFETY: the host only reads `len` bytes at `ptr` during the call.
    unsafe {
        match level {
            LogLevel::Trace => host::log_trace(ptr, len),
            LogLevel::Debug => host::log_debug(ptr, len),
            LogLevel::Info => host::log_info(ptr, len),
            LogLevel::Warn => host::log_warn(ptr, len),
            LogLevel::Error => host::log_error(ptr, len),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn log(level: LogLevel, msg: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(target: "trinity_module", "{}", msg),
        LogLevel::Debug => tracing::debug!(target: "trinity_module", "{}", msg),
        LogLevel::Info => tracing::info!(target: "trinity_module", "{}", msg),
        LogLevel::Warn => tracing::warn!(target: "trinity_module", "{}", msg),
        LogLevel::Error => tracing::error!(target: "trinity_module", "{}", msg),
    }
}

/// 64 random bits from the host.
#[cfg(target_arch = "wasm32")]
pub fn rand_u64() -> u64 {
    // SAFETY: no arguments, plain integer result.
    unsafe { host::rand_u64() as u64 }
}

#[cfg(not(target_arch = "wasm32"))]
pub fn rand_u64() -> u64 {
    rand::random()
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    #[test]
    fn test_rand_varies() {
        let draws: std::collections::HashSet<u64> = (0..8).map(|_| rand_u64()).collect();
        assert!(draws.len() > 1);
    }

    #[test]
    fn test_log_every_level() {
        for level in LogLevel::ALL {
            log(level, "hello");
        }
        crate::info!("formatted {}", 42);
    }
}
