//! Core types for Relaycast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Campaign content
// ============================================================================

/// Delivery status of a scheduled content item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Pending,
    Posted,
    Failed,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Posted => "posted",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "posted" => Ok(Self::Posted),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown content status: {}", other)),
        }
    }
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of scheduled text owned by a campaign
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub campaign_id: String,
    pub text: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: ContentStatus,
    /// Number of delivery attempts made so far, never decreases
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(campaign_id: String, text: String, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            campaign_id,
            text,
            scheduled_time,
            status: ContentStatus::Pending,
            attempts: 0,
            last_error: None,
            last_attempt: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the scheduler should pick this item up at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ContentStatus::Pending && self.scheduled_time <= now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown campaign status: {}", other)),
        }
    }
}

/// Owner of scheduled content and of the destination credential used to post it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    /// Sealed destination credential, opened by a `CredentialResolver`
    pub credential: String,
    pub status: CampaignStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn new(owner_id: String, name: String, credential: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            name,
            credential,
            status: CampaignStatus::Active,
            start_date: Utc::now(),
            end_date: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Platforms live messages are observed on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourcePlatform {
    Discord,
    Telegram,
    Twitter,
}

impl SourcePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Telegram => "telegram",
            Self::Twitter => "twitter",
        }
    }

    /// Name used in canonical text headers
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Discord => "Discord",
            Self::Telegram => "Telegram",
            Self::Twitter => "Twitter",
        }
    }
}

impl FromStr for SourcePlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discord" => Ok(Self::Discord),
            "telegram" => Ok(Self::Telegram),
            "twitter" => Ok(Self::Twitter),
            other => Err(format!(
                "unknown platform: '{}'. Valid options: discord, telegram, twitter",
                other
            )),
        }
    }
}

impl std::fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    Active,
    Paused,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

impl FromStr for RouteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown route status: {}", other)),
        }
    }
}

/// Per-route filter settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouteFilters {
    /// Allow-list; when non-empty at least one keyword must appear in the text
    pub keywords: Vec<String>,
    pub include_links: bool,
    pub include_images: bool,
    pub include_replies: bool,
    pub include_reposts: bool,
}

impl Default for RouteFilters {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            include_links: true,
            include_images: true,
            include_replies: false,
            include_reposts: false,
        }
    }
}

/// A standing rule forwarding one source channel to one destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub platform: SourcePlatform,
    pub source_channel_id: String,
    /// Only forward messages from this author when set
    pub source_username: Option<String>,
    /// Sealed destination credential
    pub credential: String,
    pub status: RouteStatus,
    pub filters: RouteFilters,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: u32,
    pub last_check: Option<DateTime<Utc>>,
    /// Id of the last source message delivered through this route
    pub cursor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Route {
    pub fn new(
        owner_id: String,
        name: String,
        platform: SourcePlatform,
        source_channel_id: String,
        credential: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            name,
            platform,
            source_channel_id,
            source_username: None,
            credential,
            status: RouteStatus::Active,
            filters: RouteFilters::default(),
            last_sync: None,
            last_error: None,
            error_count: 0,
            last_check: None,
            cursor: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RouteStatus::Active
    }

    /// Record a successful forward
    pub fn record_success(&mut self, now: DateTime<Utc>, source_message_id: Option<&str>) {
        self.last_sync = Some(now);
        self.last_check = Some(now);
        self.last_error = None;
        self.error_count = 0;
        if let Some(id) = source_message_id {
            self.cursor = Some(id.to_string());
        }
    }

    /// Record a failed forward; the route stays active
    pub fn record_failure(&mut self, now: DateTime<Utc>, error: &str) {
        self.last_check = Some(now);
        self.last_error = Some(error.to_string());
        self.error_count = self.error_count.saturating_add(1);
    }
}

// ============================================================================
// Inbound events
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Document,
    File,
    Embed,
    Sticker,
    Link,
}

/// Media or embed carried by an inbound message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventAttachment {
    pub kind: AttachmentKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl EventAttachment {
    pub fn new(kind: AttachmentKind, url: Option<&str>, name: Option<&str>) -> Self {
        Self {
            kind,
            url: url.map(str::to_string),
            name: name.map(str::to_string),
        }
    }
}

/// Normalized message event emitted by source adapters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub platform: SourcePlatform,
    pub source_channel_id: String,
    #[serde(default)]
    pub source_message_id: Option<String>,
    /// Server, group or account the channel belongs to
    #[serde(default)]
    pub origin_name: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub timestamp_utc: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<EventAttachment>,
    #[serde(default)]
    pub is_edit: bool,
    #[serde(default)]
    pub is_delete: bool,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default)]
    pub is_repost: bool,
}

impl InboundEvent {
    /// A plain text message with no attachments
    pub fn message(
        platform: SourcePlatform,
        source_channel_id: &str,
        author_name: &str,
        text: &str,
    ) -> Self {
        Self {
            platform,
            source_channel_id: source_channel_id.to_string(),
            source_message_id: None,
            origin_name: None,
            channel_name: None,
            author_id: author_name.to_string(),
            author_name: author_name.to_string(),
            timestamp_utc: Utc::now(),
            text: text.to_string(),
            attachments: Vec::new(),
            is_edit: false,
            is_delete: false,
            is_reply: false,
            is_repost: false,
        }
    }
}
