//! End-to-end scheduler tests against a real SQLite database
//!
//! These tests verify the campaign path from stored content to destination:
//! - Successful delivery marks content posted
//! - Transient failures re-arm with exponential backoff
//! - The third failure is final
//! - Paused and deleted campaigns

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use librelaycast::credentials::SealedSecretResolver;
use librelaycast::db::Database;
use librelaycast::destination::MockSender;
use librelaycast::error::DeliveryError;
use librelaycast::scheduler::{Scheduler, TickOutcome, TickReport};
use librelaycast::types::{Campaign, CampaignStatus, ContentItem, ContentStatus};
use secrecy::SecretString;
use std::sync::Arc;
use tempfile::TempDir;

const MASTER_KEY: &str = "end-to-end-master-key";

/// Helper to create a test database
async fn create_test_db() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("relay.db");
    let db = Database::new(&db_path.to_string_lossy()).await?;
    Ok((temp_dir, db))
}

fn resolver() -> SealedSecretResolver {
    SealedSecretResolver::new(SecretString::from(MASTER_KEY.to_string())).unwrap()
}

/// Fixed tick instant; whole seconds survive millisecond storage exactly
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 10, 14, 0, 0).unwrap()
}

async fn active_campaign(db: &Database, token: &str) -> Result<Campaign> {
    let mut campaign = Campaign::new(
        "owner-42".to_string(),
        "product launch".to_string(),
        resolver().seal(token)?,
    );
    campaign.start_date = now() - Duration::days(7);
    db.create_campaign(&campaign).await?;
    Ok(campaign)
}

async fn due_content(db: &Database, campaign: &Campaign, attempts: u32) -> Result<ContentItem> {
    let mut item = ContentItem::new(
        campaign.id.clone(),
        "Launch day! Check out the new release.".to_string(),
        now() - Duration::minutes(1),
    );
    item.attempts = attempts;
    db.create_content(&item).await?;
    Ok(item)
}

fn scheduler(db: &Database, sender: &MockSender) -> Scheduler {
    Scheduler::new(
        Arc::new(db.clone()),
        Arc::new(resolver()),
        Arc::new(sender.clone()),
    )
}

fn completed(outcome: TickOutcome) -> TickReport {
    match outcome {
        TickOutcome::Completed(report) => report,
        TickOutcome::Skipped => panic!("tick should not be skipped"),
    }
}

#[tokio::test]
async fn test_due_content_is_posted() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let sender = MockSender::success();
    let campaign = active_campaign(&db, "dest-bot-token").await?;
    let item = due_content(&db, &campaign, 0).await?;

    let report = completed(scheduler(&db, &sender).tick_at(now()).await);
    assert_eq!(report.posted, 1);
    assert_eq!(report.store_errors, 0);

    let stored = db.get_content(&item.id).await?.unwrap();
    assert_eq!(stored.status, ContentStatus::Posted);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.last_attempt, Some(now()));

    let sent = sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].token, "dest-bot-token");
    assert_eq!(sent[0].text, item.text);

    // Posted content is never picked up again
    scheduler(&db, &sender).tick_at(now() + Duration::hours(1)).await;
    assert_eq!(sender.send_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_transient_failure_rearms_two_minutes_out() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let sender = MockSender::failing(DeliveryError::Network("connection refused".to_string()));
    let campaign = active_campaign(&db, "t").await?;
    let item = due_content(&db, &campaign, 0).await?;

    let report = completed(scheduler(&db, &sender).tick_at(now()).await);
    assert_eq!(report.retried, 1);

    let stored = db.get_content(&item.id).await?.unwrap();
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.status, ContentStatus::Pending);
    assert_eq!(stored.scheduled_time, now() + Duration::minutes(2));
    assert_eq!(
        stored.last_error.as_deref(),
        Some("Network error: connection refused")
    );

    Ok(())
}

#[tokio::test]
async fn test_third_failure_is_final() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let sender = MockSender::failing(DeliveryError::Network("timeout".to_string()));
    let campaign = active_campaign(&db, "t").await?;
    let item = due_content(&db, &campaign, 2).await?;

    let report = completed(scheduler(&db, &sender).tick_at(now()).await);
    assert_eq!(report.failed, 1);

    let stored = db.get_content(&item.id).await?.unwrap();
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.status, ContentStatus::Failed);
    assert_eq!(stored.scheduled_time, item.scheduled_time);

    Ok(())
}

#[tokio::test]
async fn test_backoff_progression_until_failure() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let sender = MockSender::failing(DeliveryError::Rejected("HTTP 400: bad request".to_string()));
    let campaign = active_campaign(&db, "t").await?;
    let item = due_content(&db, &campaign, 0).await?;
    let scheduler = scheduler(&db, &sender);

    // First failure: +2m
    scheduler.tick_at(now()).await;
    let first = db.get_content(&item.id).await?.unwrap();
    assert_eq!(first.scheduled_time, now() + Duration::minutes(2));

    // Second failure at the re-armed time: +4m
    let second_tick = first.scheduled_time;
    scheduler.tick_at(second_tick).await;
    let second = db.get_content(&item.id).await?.unwrap();
    assert_eq!(second.attempts, 2);
    assert_eq!(second.scheduled_time, second_tick + Duration::minutes(4));
    assert!(second.attempts >= first.attempts);

    // Third failure is terminal
    scheduler.tick_at(second.scheduled_time).await;
    let third = db.get_content(&item.id).await?.unwrap();
    assert_eq!(third.attempts, 3);
    assert_eq!(third.status, ContentStatus::Failed);

    scheduler.tick_at(now() + Duration::days(30)).await;
    assert_eq!(sender.send_count(), 3);

    Ok(())
}

#[tokio::test]
async fn test_paused_campaign_content_waits() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let sender = MockSender::success();
    let campaign = active_campaign(&db, "t").await?;
    let item = due_content(&db, &campaign, 0).await?;
    db.set_campaign_status(&campaign.id, CampaignStatus::Paused).await?;

    let report = completed(scheduler(&db, &sender).tick_at(now()).await);
    assert_eq!(report.skipped, 1);
    assert_eq!(sender.send_count(), 0);

    let stored = db.get_content(&item.id).await?.unwrap();
    assert_eq!(stored.status, ContentStatus::Pending);
    assert_eq!(stored.attempts, 0);

    // Resuming the campaign releases the item on the next tick
    db.set_campaign_status(&campaign.id, CampaignStatus::Active).await?;
    let report = completed(scheduler(&db, &sender).tick_at(now()).await);
    assert_eq!(report.posted, 1);

    Ok(())
}

#[tokio::test]
async fn test_deleted_campaign_fails_content() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let sender = MockSender::success();
    let campaign = active_campaign(&db, "t").await?;
    let item = due_content(&db, &campaign, 0).await?;
    db.delete_campaign(&campaign.id).await?;

    completed(scheduler(&db, &sender).tick_at(now()).await);

    let stored = db.get_content(&item.id).await?.unwrap();
    assert_eq!(stored.status, ContentStatus::Failed);
    assert_eq!(stored.last_error.as_deref(), Some("campaign not found"));
    assert_eq!(stored.attempts, 1);
    assert_eq!(sender.send_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_credential_sealed_under_other_key_fails() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let sender = MockSender::success();

    let foreign = SealedSecretResolver::new(SecretString::from("some-other-master-key".to_string()))?;
    let mut campaign = Campaign::new("o".to_string(), "c".to_string(), foreign.seal("token")?);
    campaign.start_date = now();
    db.create_campaign(&campaign).await?;
    let item = due_content(&db, &campaign, 0).await?;

    let report = completed(scheduler(&db, &sender).tick_at(now()).await);
    assert_eq!(report.failed, 1);
    assert_eq!(sender.send_count(), 0);

    let stored = db.get_content(&item.id).await?.unwrap();
    assert_eq!(stored.status, ContentStatus::Failed);
    assert!(stored.last_error.unwrap().contains("decrypt"));

    Ok(())
}

#[tokio::test]
async fn test_future_content_is_left_alone() -> Result<()> {
    let (_temp_dir, db) = create_test_db().await?;
    let sender = MockSender::success();
    let campaign = active_campaign(&db, "t").await?;
    let item = ContentItem::new(campaign.id.clone(), "tomorrow".to_string(), now() + Duration::days(1));
    db.create_content(&item).await?;

    let report = completed(scheduler(&db, &sender).tick_at(now()).await);
    assert_eq!(report.processed(), 0);
    assert_eq!(sender.send_count(), 0);

    let stored = db.get_content(&item.id).await?.unwrap();
    assert_eq!(stored.status, ContentStatus::Pending);
    assert_eq!(stored.attempts, 0);
    assert_eq!(stored.scheduled_time, item.scheduled_time);

    Ok(())
}
