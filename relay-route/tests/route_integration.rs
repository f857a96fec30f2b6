//! Integration tests for relay-route daemon

use assert_cmd::Command;
use httpmock::Method::POST;
use httpmock::MockServer;
use librelaycast::credentials::SealedSecretResolver;
use librelaycast::types::{Route, SourcePlatform};
use librelaycast::Database;
use predicates::prelude::*;
use secrecy::SecretString;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

const MASTER_KEY: &str = "route-test-master-key";

/// Setup test environment with config and database
async fn setup_test_env(endpoint: &str) -> (TempDir, String, Database) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("relay.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[queue]
drain_interval = "1s"

[destination]
endpoint = "{}"
timeout = "2s"
"#,
        db_path.display().to_string().replace('\\', "/"),
        endpoint
    );
    fs::write(&config_path, config_content).unwrap();

    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();

    (temp_dir, config_path.to_str().unwrap().to_string(), db)
}

fn relay_route(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("relay-route").unwrap();
    cmd.env("RELAYCAST_CONFIG", config_path)
        .env("RELAYCAST_SECRET_KEY", MASTER_KEY)
        .env_remove("RELAYCAST_DB_PATH")
        .args(["--drain-interval", "100ms"]);
    cmd
}

async fn discord_route(db: &Database, token: &str) -> Route {
    let resolver = SealedSecretResolver::new(SecretString::from(MASTER_KEY.to_string())).unwrap();
    let route = Route::new(
        "owner-1".to_string(),
        "mirror".to_string(),
        SourcePlatform::Discord,
        "9001".to_string(),
        resolver.seal(token).unwrap(),
    );
    db.create_route(&route).await.unwrap();
    route
}

fn event_line(message_id: &str, text: &str) -> String {
    format!(
        r#"{{"platform":"discord","sourceChannelId":"9001","sourceMessageId":"{}","authorId":"1","authorName":"alice","timestampUtc":"2025-01-01T00:00:00Z","text":"{}"}}"#,
        message_id, text
    )
}

#[tokio::test]
async fn test_help_describes_daemon() {
    Command::cargo_bin("relay-route")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--drain-interval"));
}

#[tokio::test]
async fn test_missing_endpoint_exits_with_code_2() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n",
            temp_dir.path().join("relay.db").display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    relay_route(config_path.to_str().unwrap())
        .write_stdin("")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("destination.endpoint"));
}

#[tokio::test]
async fn test_empty_input_exits_cleanly() {
    let server = MockServer::start_async().await;
    let messages = server.mock(|when, then| {
        when.method(POST).path("/messages");
        then.status(200);
    });
    let (_temp_dir, config_path, _db) = setup_test_env(&server.url("/messages")).await;

    relay_route(&config_path).write_stdin("").assert().success();
    messages.assert_calls(0);
}

#[tokio::test]
async fn test_events_are_delivered_before_exit() {
    let server = MockServer::start_async().await;
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/messages")
            .header("authorization", "Bearer bot-token-9001")
            .json_body(json!({"text": "[Discord | 9001]\nalice: hello"}));
        then.status(200);
    });
    let second = server.mock(|when, then| {
        when.method(POST)
            .path("/messages")
            .header("authorization", "Bearer bot-token-9001")
            .json_body(json!({"text": "[Discord | 9001]\nalice: second"}));
        then.status(200);
    });

    let (_temp_dir, config_path, db) = setup_test_env(&server.url("/messages")).await;
    let route = discord_route(&db, "bot-token-9001").await;

    let input = format!(
        "{}\n{}\n",
        event_line("m-1", "hello"),
        event_line("m-2", "second")
    );
    relay_route(&config_path).write_stdin(input).assert().success();

    first.assert_calls(1);
    second.assert_calls(1);

    let stored = db.get_route(&route.id).await.unwrap().unwrap();
    assert_eq!(stored.cursor.as_deref(), Some("m-2"));
    assert!(stored.last_sync.is_some());
    assert_eq!(stored.error_count, 0);
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let server = MockServer::start_async().await;
    let messages = server.mock(|when, then| {
        when.method(POST)
            .path("/messages")
            .json_body(json!({"text": "[Discord | 9001]\nalice: still here"}));
        then.status(200);
    });
    let (_temp_dir, config_path, db) = setup_test_env(&server.url("/messages")).await;
    let route = discord_route(&db, "t-9001-abc").await;

    let input = format!("not json at all\n\n{}\n", event_line("m-1", "still here"));
    relay_route(&config_path).write_stdin(input).assert().success();

    messages.assert_calls(1);
    let stored = db.get_route(&route.id).await.unwrap().unwrap();
    assert_eq!(stored.cursor.as_deref(), Some("m-1"));
    assert_eq!(stored.error_count, 0);
}

#[tokio::test]
async fn test_unmatched_events_are_not_sent() {
    let server = MockServer::start_async().await;
    let messages = server.mock(|when, then| {
        when.method(POST).path("/messages");
        then.status(200);
    });
    let (_temp_dir, config_path, db) = setup_test_env(&server.url("/messages")).await;
    discord_route(&db, "t-9001-abc").await;

    let telegram = r#"{"platform":"telegram","sourceChannelId":"9001","authorId":"1","authorName":"bob","timestampUtc":"2025-01-01T00:00:00Z","text":"hi"}"#;
    relay_route(&config_path)
        .write_stdin(format!("{}\n", telegram))
        .assert()
        .success();

    messages.assert_calls(0);
}

#[tokio::test]
async fn test_failed_delivery_is_recorded_on_route() {
    let server = MockServer::start_async().await;
    let messages = server.mock(|when, then| {
        when.method(POST).path("/messages");
        then.status(503).body("maintenance");
    });
    let (_temp_dir, config_path, db) = setup_test_env(&server.url("/messages")).await;
    let route = discord_route(&db, "t-9001-abc").await;

    relay_route(&config_path)
        .write_stdin(format!("{}\n", event_line("m-1", "hello")))
        .assert()
        .success();

    // Failed forwards are discarded, never retried
    messages.assert_calls(1);
    let stored = db.get_route(&route.id).await.unwrap().unwrap();
    assert_eq!(stored.error_count, 1);
    assert_eq!(
        stored.last_error.as_deref(),
        Some("Network error: HTTP 503: maintenance")
    );
    assert!(stored.cursor.is_none());
    assert!(stored.is_active());
}
