//! Storage contracts consumed by the engine
//!
//! The scheduler and router never talk to SQLite directly. They depend on
//! [`ContentStore`] and [`RouteStore`], implemented by
//! [`Database`](crate::db::Database) for the daemons and by [`MemoryStore`]
//! for embedding and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Campaign, ContentItem, Route, SourcePlatform};

pub mod memory;

pub use memory::MemoryStore;

/// A due content item joined with its owning campaign
#[derive(Debug, Clone, PartialEq)]
pub struct DueContent {
    pub item: ContentItem,
    /// `None` when the campaign no longer exists
    pub campaign: Option<Campaign>,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// All pending items scheduled at or before `now`, oldest first
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<DueContent>>;

    /// Persist the delivery bookkeeping of `item`
    ///
    /// # Errors
    ///
    /// Fails when the item does not exist or is already posted; posted items
    /// are never rewritten.
    async fn update(&self, item: &ContentItem) -> Result<()>;
}

#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Active routes listening on `channel_id` of `platform`
    async fn find_active_by_source(
        &self,
        platform: SourcePlatform,
        channel_id: &str,
    ) -> Result<Vec<Route>>;

    async fn get(&self, id: &str) -> Result<Option<Route>>;

    /// Persist `route`, bookkeeping included
    async fn update(&self, route: &Route) -> Result<()>;
}
