//! Relaycast - cross-posting engine for chat destinations
//!
//! This library provides the distribution engine behind the Relaycast
//! daemons: a retrying scheduler for campaign content and a filtered,
//! rate-limited router for live messages observed on source channels.

pub mod config;
pub mod credentials;
pub mod db;
pub mod destination;
pub mod error;
pub mod events;
pub mod formatter;
pub mod logging;
pub mod periodic;
pub mod queue;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialResolver, SealedSecretResolver};
pub use db::Database;
pub use destination::DestinationSender;
pub use error::{RelaycastError, Result};
pub use queue::OutboundQueue;
pub use router::EventRouter;
pub use scheduler::Scheduler;
pub use types::{Campaign, ContentItem, ContentStatus, InboundEvent, Route, SourcePlatform};
