//! Destination delivery
//!
//! The engine delivers canonical text to the messaging network through the
//! [`DestinationSender`] trait. Implementations classify every failure as
//! either a network problem or an outright rejection so callers can decide
//! on retries without parsing error strings.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::DeliveryError;

pub mod http;

// Mock sender is available for all builds (not just tests) to support integration tests
pub mod mock;

pub use http::HttpSender;
pub use mock::MockSender;

/// Delivers canonical text to a destination chat
#[async_trait]
pub trait DestinationSender: Send + Sync {
    /// Send `text` using the destination `token`
    ///
    /// # Errors
    ///
    /// - `DeliveryError::Network` for transport failures, timeouts and
    ///   server-side errors
    /// - `DeliveryError::Rejected` when the destination refuses the content or
    ///   the token
    async fn send(&self, token: &SecretString, text: &str) -> Result<(), DeliveryError>;
}
