//! Database operations for Relaycast
//!
//! Instants are stored as unix milliseconds, route filters as JSON text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, RelaycastError, Result};
use crate::store::{ContentStore, DueContent, RouteStore};
use crate::types::{
    Campaign, CampaignStatus, ContentItem, ContentStatus, Route, RouteFilters, RouteStatus,
    SourcePlatform,
};

const CONTENT_COLUMNS: &str = "c.id, c.campaign_id, c.text, c.scheduled_time, c.status, \
     c.attempts, c.last_error, c.last_attempt, c.created_at";

const ROUTE_COLUMNS: &str = "id, owner_id, name, platform, source_channel_id, source_username, \
     credential, status, filters, last_sync, last_error, error_count, last_check, cursor, created_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // mode=rwc creates the file on first use
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_campaign(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, owner_id, name, credential, status, start_date, end_date)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.owner_id)
        .bind(&campaign.name)
        .bind(&campaign.credential)
        .bind(campaign.status.as_str())
        .bind(to_millis(campaign.start_date))
        .bind(campaign.end_date.map(to_millis))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, name, credential, status, start_date, end_date
            FROM campaigns WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| campaign_from_row(&r, "")).transpose()
    }

    /// Pause or resume a campaign
    pub async fn set_campaign_status(&self, id: &str, status: CampaignStatus) -> Result<()> {
        let result = sqlx::query("UPDATE campaigns SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(RelaycastError::InvalidInput(format!("campaign {} not found", id)));
        }
        Ok(())
    }

    pub async fn delete_campaign(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn create_content(&self, item: &ContentItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_items
                (id, campaign_id, text, scheduled_time, status, attempts, last_error, last_attempt, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.campaign_id)
        .bind(&item.text)
        .bind(to_millis(item.scheduled_time))
        .bind(item.status.as_str())
        .bind(i64::from(item.attempts))
        .bind(&item.last_error)
        .bind(item.last_attempt.map(to_millis))
        .bind(to_millis(item.created_at))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_content(&self, id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_items c WHERE c.id = ?",
            CONTENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| content_from_row(&r)).transpose()
    }

    pub async fn create_route(&self, route: &Route) -> Result<()> {
        let filters = serde_json::to_string(&route.filters).map_err(DbError::Encoding)?;

        sqlx::query(&format!(
            "INSERT INTO routes ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ROUTE_COLUMNS
        ))
        .bind(&route.id)
        .bind(&route.owner_id)
        .bind(&route.name)
        .bind(route.platform.as_str())
        .bind(&route.source_channel_id)
        .bind(&route.source_username)
        .bind(&route.credential)
        .bind(route.status.as_str())
        .bind(filters)
        .bind(route.last_sync.map(to_millis))
        .bind(&route.last_error)
        .bind(i64::from(route.error_count))
        .bind(route.last_check.map(to_millis))
        .bind(&route.cursor)
        .bind(to_millis(route.created_at))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_route(&self, id: &str) -> Result<Option<Route>> {
        let row = sqlx::query(&format!("SELECT {} FROM routes WHERE id = ?", ROUTE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| route_from_row(&r)).transpose()
    }

    pub async fn delete_route(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM routes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for Database {
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<DueContent>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {},
                   p.id AS p_id, p.owner_id AS p_owner_id, p.name AS p_name,
                   p.credential AS p_credential, p.status AS p_status,
                   p.start_date AS p_start_date, p.end_date AS p_end_date
            FROM content_items c
            LEFT JOIN campaigns p ON p.id = c.campaign_id
            WHERE c.status = 'pending' AND c.scheduled_time <= ?
            ORDER BY c.scheduled_time ASC
            "#,
            CONTENT_COLUMNS
        ))
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|row| {
                let item = content_from_row(row)?;
                let campaign_id: Option<String> = column(row, "p_id")?;
                let campaign = match campaign_id {
                    Some(_) => Some(campaign_from_row(row, "p_")?),
                    None => None,
                };
                Ok(DueContent { item, campaign })
            })
            .collect()
    }

    async fn update(&self, item: &ContentItem) -> Result<()> {
        // Posted rows are final and attempts never go backwards
        let result = sqlx::query(
            r#"
            UPDATE content_items
            SET scheduled_time = ?, status = ?, attempts = ?, last_error = ?, last_attempt = ?
            WHERE id = ? AND status != 'posted' AND attempts <= ?
            "#,
        )
        .bind(to_millis(item.scheduled_time))
        .bind(item.status.as_str())
        .bind(i64::from(item.attempts))
        .bind(&item.last_error)
        .bind(item.last_attempt.map(to_millis))
        .bind(&item.id)
        .bind(i64::from(item.attempts))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(RelaycastError::InvalidInput(format!(
                "content item {} not found or no longer updatable",
                item.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RouteStore for Database {
    async fn find_active_by_source(
        &self,
        platform: SourcePlatform,
        channel_id: &str,
    ) -> Result<Vec<Route>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM routes
            WHERE platform = ? AND source_channel_id = ? AND status = 'active'
            ORDER BY created_at ASC
            "#,
            ROUTE_COLUMNS
        ))
        .bind(platform.as_str())
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(route_from_row).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Route>> {
        self.get_route(id).await
    }

    async fn update(&self, route: &Route) -> Result<()> {
        let filters = serde_json::to_string(&route.filters).map_err(DbError::Encoding)?;

        let result = sqlx::query(
            r#"
            UPDATE routes
            SET name = ?, source_username = ?, credential = ?, status = ?, filters = ?,
                last_sync = ?, last_error = ?, error_count = ?, last_check = ?, cursor = ?
            WHERE id = ?
            "#,
        )
        .bind(&route.name)
        .bind(&route.source_username)
        .bind(&route.credential)
        .bind(route.status.as_str())
        .bind(filters)
        .bind(route.last_sync.map(to_millis))
        .bind(&route.last_error)
        .bind(i64::from(route.error_count))
        .bind(route.last_check.map(to_millis))
        .bind(&route.cursor)
        .bind(&route.id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(RelaycastError::InvalidInput(format!("route {} not found", route.id)));
        }
        Ok(())
    }
}

fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn from_millis(column: &'static str, millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        DbError::Malformed {
            column,
            value: millis.to_string(),
        }
        .into()
    })
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| DbError::SqlxError(e).into())
}

fn counter(column_name: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        DbError::Malformed {
            column: column_name,
            value: value.to_string(),
        }
        .into()
    })
}

fn parse_enum<T: std::str::FromStr>(column_name: &'static str, value: String) -> Result<T> {
    value
        .parse()
        .map_err(|_| DbError::Malformed { column: column_name, value }.into())
}

fn content_from_row(row: &SqliteRow) -> Result<ContentItem> {
    let last_attempt: Option<i64> = column(row, "last_attempt")?;
    Ok(ContentItem {
        id: column(row, "id")?,
        campaign_id: column(row, "campaign_id")?,
        text: column(row, "text")?,
        scheduled_time: from_millis("scheduled_time", column(row, "scheduled_time")?)?,
        status: parse_enum::<ContentStatus>("status", column(row, "status")?)?,
        attempts: counter("attempts", column(row, "attempts")?)?,
        last_error: column(row, "last_error")?,
        last_attempt: last_attempt
            .map(|ms| from_millis("last_attempt", ms))
            .transpose()?,
        created_at: from_millis("created_at", column(row, "created_at")?)?,
    })
}

/// Read a campaign whose columns carry `prefix`
fn campaign_from_row(row: &SqliteRow, prefix: &str) -> Result<Campaign> {
    let name = |field: &str| format!("{}{}", prefix, field);
    let end_date: Option<i64> = column(row, &name("end_date"))?;
    Ok(Campaign {
        id: column(row, &name("id"))?,
        owner_id: column(row, &name("owner_id"))?,
        name: column(row, &name("name"))?,
        credential: column(row, &name("credential"))?,
        status: parse_enum::<CampaignStatus>("campaigns.status", column(row, &name("status"))?)?,
        start_date: from_millis("start_date", column(row, &name("start_date"))?)?,
        end_date: end_date.map(|ms| from_millis("end_date", ms)).transpose()?,
    })
}

fn route_from_row(row: &SqliteRow) -> Result<Route> {
    let platform: String = column(row, "platform")?;
    let filters: String = column(row, "filters")?;
    let last_sync: Option<i64> = column(row, "last_sync")?;
    let last_check: Option<i64> = column(row, "last_check")?;

    Ok(Route {
        id: column(row, "id")?,
        owner_id: column(row, "owner_id")?,
        name: column(row, "name")?,
        platform: parse_enum::<SourcePlatform>("platform", platform)?,
        source_channel_id: column(row, "source_channel_id")?,
        source_username: column(row, "source_username")?,
        credential: column(row, "credential")?,
        status: parse_enum::<RouteStatus>("routes.status", column(row, "status")?)?,
        filters: serde_json::from_str::<RouteFilters>(&filters).map_err(DbError::Encoding)?,
        last_sync: last_sync.map(|ms| from_millis("last_sync", ms)).transpose()?,
        last_error: column(row, "last_error")?,
        error_count: counter("error_count", column(row, "error_count")?)?,
        last_check: last_check.map(|ms| from_millis("last_check", ms)).transpose()?,
        cursor: column(row, "cursor")?,
        created_at: from_millis("created_at", column(row, "created_at")?)?,
    })
}
