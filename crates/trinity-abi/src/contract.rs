//! Names and signatures that make up the boundary between host and module.

use std::fmt;

/// Exported linear memory.
pub const MEMORY_EXPORT: &str = "memory";

/// `(ptr, old_size, align, new_size) -> ptr`
pub const REALLOC_EXPORT: &str = "cabi_realloc";

/// Import module holding the log emitters, one function per [`LogLevel`].
pub const LOG_MODULE: &str = "log";

/// Import module holding system helpers.
pub const SYS_MODULE: &str = "sys";

/// `() -> i64`, 64 random bits.
pub const RAND_U64_IMPORT: &str = "rand-u64";

/// Entry points a module exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Export {
    /// `() -> ()`
    Init,
    /// `(tag, ptr, len) -> ret_area`
    Help,
    /// `(cmd_ptr, cmd_len, author_ptr, author_len) -> ret_area`
    Admin,
    /// `(content, author_id, author_name, room as ptr/len pairs) -> ret_area`
    OnMsg,
}

impl Export {
    pub const ALL: [Export; 4] = [Export::Init, Export::Help, Export::Admin, Export::OnMsg];

    pub fn name(&self) -> &'static str {
        match self {
            Export::Init => "init",
            Export::Help => "help",
            Export::Admin => "admin",
            Export::OnMsg => "on-msg",
        }
    }

    /// Name of the cleanup hook for exports that return heap data.
    pub fn post_return_name(&self) -> Option<&'static str> {
        match self {
            Export::Init => None,
            Export::Help => Some("cabi_post_help"),
            Export::Admin => Some("cabi_post_admin"),
            Export::OnMsg => Some("cabi_post_on-msg"),
        }
    }
}

impl fmt::Display for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity of a `log` import call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    /// Function name inside [`LOG_MODULE`].
    pub fn import_name(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_return_names_derive_from_export_names() {
        for export in Export::ALL {
            if let Some(post) = export.post_return_name() {
                assert_eq!(post, format!("cabi_post_{}", export.name()));
            }
        }
        assert_eq!(Export::Init.post_return_name(), None);
    }

    #[test]
    fn test_log_import_names() {
        let names: Vec<_> = LogLevel::ALL.iter().map(|l| l.import_name()).collect();
        assert_eq!(names, ["trace", "debug", "info", "warn", "error"]);
    }
}
