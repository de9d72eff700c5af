//! Guest SDK for building trinity modules.
//!
//! A module is a small wasm plugin answering four calls from the host:
//! `init`, `help`, `admin` and `on-msg`. Module authors:
//!
//! 1. Implement [`TrinityModule`].
//! 2. Call [`export_module!`] with the type to generate the flat exports,
//!    the `cabi_post_*` cleanup hooks and `cabi_realloc`.
//! 3. Build for `wasm32-unknown-unknown`.
//!
//! # Example
//!
//! ```rust,ignore
//! use trinity_module_sdk::{export_module, HelpText, Message, TrinityModule};
//!
//! struct Echo;
//!
//! impl TrinityModule for Echo {
//!     fn help(_topic: Option<&str>) -> HelpText {
//!         "repeats what you say".into()
//!     }
//!
//!     fn admin(_cmd: &str, _author_id: &str) -> Vec<Message> {
//!         Vec::new()
//!     }
//!
//!     fn on_msg(content: &str, author_id: &str, _author_name: &str, _room: &str) -> Vec<Message> {
//!         vec![Message::new(content, author_id)]
//!     }
//! }
//!
//! export_module!(Echo);
//! ```
//!
//! Handlers only see typed values. Everything a handler returns is copied
//! into fresh guest allocations, handed to the host through the return area,
//! and released by the matching `cabi_post_*` hook once the host has read it.

pub mod alloc;
pub mod error;
pub mod exports;
pub mod imports;
pub mod logging;
pub mod macros;
pub mod owned;
pub mod tracking;

#[cfg(target_arch = "wasm32")]
#[doc(hidden)]
pub mod wasm;

pub use alloc::GuestMemory;
pub use error::GuestError;
pub use exports::Guest;
pub use owned::{GuestString, HelpText, MessageList, OwnedMessage, OwnedString};
pub use tracking::TrackingHeap;
pub use trinity_abi as abi;
pub use trinity_abi::{Export, LogLevel, Message};

/// Trait that module authors implement.
///
/// Arguments are borrowed from the host for the duration of the call only.
/// Every handler must return a well-formed value; there is no error channel
/// back to the host.
pub trait TrinityModule {
    /// Called once after the host instantiates the module.
    fn init() {}

    /// Help text, optionally about a specific `topic`.
    ///
    /// Returning a `&'static str` hands the host a view of the module's data
    /// segment and allocates nothing.
    fn help(topic: Option<&str>) -> HelpText;

    /// React to an administrator command.
    fn admin(cmd: &str, author_id: &str) -> Vec<Message>;

    /// React to an incoming chat message.
    fn on_msg(content: &str, author_id: &str, author_name: &str, room: &str) -> Vec<Message>;
}
