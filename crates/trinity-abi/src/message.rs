use serde::{Deserialize, Serialize};

/// An outgoing chat message produced by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    /// Recipient id.
    pub to: String,
}

impl Message {
    pub fn new(content: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            to: to.into(),
        }
    }
}
