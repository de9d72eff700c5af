//! Leveled logging macros for module code.
//!
//! Each macro formats its arguments and hands the line to the host's `log`
//! import, which records it with the module's name attached.
//!
//! ```ignore
//! trinity_module_sdk::info!("greeted {}", author_id);
//! ```

/// Very detailed tracing, usually only enabled during development.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::imports::log($crate::LogLevel::Trace, &msg);
    }};
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::imports::log($crate::LogLevel::Debug, &msg);
    }};
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::imports::log($crate::LogLevel::Info, &msg);
    }};
}

/// Something looks off but the module keeps working.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::imports::log($crate::LogLevel::Warn, &msg);
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        $crate::imports::log($crate::LogLevel::Error, &msg);
    }};
}
