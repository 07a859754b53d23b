//! Outbound SMS gateway abstraction.
//!
//! Implementations never return transport or protocol problems as panics or
//! nested error types: every failure collapses into a [`GatewayFailure`]
//! carrying a human-readable message that is stored on the notification log.

pub mod serwersms;

use async_trait::async_trait;
use thiserror::Error;

pub use serwersms::SerwerSmsClient;

/// Successful hand-off of one message to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsReceipt {
    /// Gateway message id, or `"queued"` when the gateway only reported a count
    pub message_id: String,
    pub parts: u32,
    pub status: String,
}

impl SmsReceipt {
    /// Receipt synthesized for the asynchronous "queued" acceptance shape.
    pub fn queued() -> Self {
        Self {
            message_id: "queued".to_string(),
            parts: 1,
            status: "queued".to_string(),
        }
    }
}

/// Any failure to hand a message to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GatewayFailure {
    pub message: String,
}

impl GatewayFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Sends a single text message.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    /// `phone` is expected in the compact `+48DDDDDDDDD` form.
    async fn send_sms(&self, phone: &str, text: &str) -> Result<SmsReceipt, GatewayFailure>;
}
