//! In-memory store
//!
//! Implements both storage contracts over plain collections. Writes can be
//! made to fail on demand to exercise the engine's persistence-error path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ContentStore, DueContent, RouteStore};
use crate::error::{DbError, RelaycastError, Result};
use crate::types::{Campaign, ContentItem, ContentStatus, Route, SourcePlatform};

#[derive(Default)]
struct Tables {
    campaigns: HashMap<String, Campaign>,
    content: Vec<ContentItem>,
    routes: Vec<Route>,
}

/// Cheap to clone; clones share the same tables
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update` fail until switched off again
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn insert_campaign(&self, campaign: Campaign) {
        let mut tables = self.tables.lock().await;
        tables.campaigns.insert(campaign.id.clone(), campaign);
    }

    pub async fn remove_campaign(&self, id: &str) -> Option<Campaign> {
        self.tables.lock().await.campaigns.remove(id)
    }

    pub async fn insert_content(&self, item: ContentItem) {
        self.tables.lock().await.content.push(item);
    }

    pub async fn content(&self, id: &str) -> Option<ContentItem> {
        let tables = self.tables.lock().await;
        tables.content.iter().find(|c| c.id == id).cloned()
    }

    pub async fn insert_route(&self, route: Route) {
        self.tables.lock().await.routes.push(route);
    }

    pub async fn remove_route(&self, id: &str) {
        self.tables.lock().await.routes.retain(|r| r.id != id);
    }

    pub async fn route(&self, id: &str) -> Option<Route> {
        let tables = self.tables.lock().await;
        tables.routes.iter().find(|r| r.id == id).cloned()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "writes disabled",
            ))
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<DueContent>> {
        let tables = self.tables.lock().await;
        let mut due: Vec<DueContent> = tables
            .content
            .iter()
            .filter(|item| item.is_due(now))
            .map(|item| DueContent {
                item: item.clone(),
                campaign: tables.campaigns.get(&item.campaign_id).cloned(),
            })
            .collect();
        due.sort_by_key(|d| d.item.scheduled_time);
        Ok(due)
    }

    async fn update(&self, item: &ContentItem) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let stored = tables
            .content
            .iter_mut()
            .find(|c| {
                c.id == item.id
                    && c.status != ContentStatus::Posted
                    && c.attempts <= item.attempts
            })
            .ok_or_else(|| {
                RelaycastError::InvalidInput(format!(
                    "content item {} not found, already posted or attempts would decrease",
                    item.id
                ))
            })?;
        *stored = item.clone();
        Ok(())
    }
}

#[async_trait]
impl RouteStore for MemoryStore {
    async fn find_active_by_source(
        &self,
        platform: SourcePlatform,
        channel_id: &str,
    ) -> Result<Vec<Route>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .routes
            .iter()
            .filter(|r| r.is_active() && r.platform == platform && r.source_channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Route>> {
        Ok(self.route(id).await)
    }

    async fn update(&self, route: &Route) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.lock().await;
        let stored = tables
            .routes
            .iter_mut()
            .find(|r| r.id == route.id)
            .ok_or_else(|| RelaycastError::InvalidInput(format!("route {} not found", route.id)))?;
        *stored = route.clone();
        Ok(())
    }
}
