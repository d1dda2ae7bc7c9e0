//! # Toolbelt Gateway
//!
//! HTTP gateway in front of hosted model APIs, with per-client rate
//! limits, an optional access-token gate and credit accounting.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod credits;
pub mod dispatch;
pub mod error;
pub mod middleware;
mod server;

pub use access::AccessPolicy;
pub use credits::{CreditDecision, CreditGate, DailyCredits, Unmetered};
pub use dispatch::{AiGateway, AiReply, ChunkCallback};
pub use error::{AiError, AiErrorCode, classify};
pub use server::{Gateway, GatewayBuilder, GatewayConfig, GatewayState, router};

use toolbelt_core::Config;

/// Start the gateway server.
///
/// # Errors
///
/// Returns error if the configuration is invalid or the server fails.
pub async fn start(config: &Config) -> Result<(), GatewayError> {
    let gateway = Gateway::from_app_config(config)?;
    gateway.run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
