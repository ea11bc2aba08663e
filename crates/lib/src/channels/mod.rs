//! Chat side of the bridge.
//!
//! [`Relay`] is the outbound chat contract; [`TelegramRelay`] implements it over the Bot API.
//! [`RelayBridge`] turns inbound SMPP deliveries into relay lines.

mod inbound;
mod telegram;

pub use inbound::{relay_line, RelayBridge};
pub use telegram::{FormValue, TelegramRelay};

use async_trait::async_trait;
use thiserror::Error;

/// Best-effort delivery of a text line to the configured chat.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Deliver `text`. Failures are logged by the implementation, never returned.
    async fn relay(&self, text: &str);
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected answer ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("reading attachment {path}: {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
