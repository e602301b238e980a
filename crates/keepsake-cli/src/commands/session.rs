//! Session inspection commands.

use chrono::{DateTime, Local, Utc};
use keepsake_core::record::expires_at;
use keepsake_core::{Config, SessionData};
use keepsake_session::{SessionInventory, SessionStore};
use serde_json::Value;

use super::open_store;

/// Format an expiry for display.
fn format_expiry(expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match expires {
        None => "never".to_string(),
        Some(at) => {
            let local: DateTime<Local> = at.with_timezone(&Local);
            let stamp = local.format("%Y-%m-%d %H:%M").to_string();
            if at < now {
                format!("{} (expired)", stamp)
            } else {
                stamp
            }
        }
    }
}

/// Parse a payload argument; sessions must be JSON objects.
fn parse_payload(raw: &str) -> anyhow::Result<SessionData> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Session payload must be a JSON object, got: {}", other),
    }
}

pub async fn get(config: &Config, sid: &str) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    match store.get(sid).await? {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => println!("No session '{}'.", sid),
    }
    Ok(())
}

pub async fn set(config: &Config, sid: &str, raw: &str) -> anyhow::Result<()> {
    let data = parse_payload(raw)?;
    let store = open_store(config).await?;
    store.set(sid, &data).await?;
    println!(
        "Stored session '{}' (expires: {}).",
        sid,
        format_expiry(expires_at(&data), Utc::now())
    );
    Ok(())
}

pub async fn destroy(config: &Config, sid: &str) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    store.destroy(sid).await?;
    println!("Destroyed session '{}'.", sid);
    Ok(())
}

pub async fn list(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let sessions = store.all().await?;

    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    let now = Utc::now();
    println!("Sessions ({}):", sessions.len());
    println!();
    for (sid, data) in &sessions {
        println!("  {}  expires: {}", sid, format_expiry(expires_at(data), now));
    }
    Ok(())
}

pub async fn count(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    println!("{}", store.length().await?);
    Ok(())
}

pub async fn clear(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let before = store.length().await?;
    store.clear().await?;
    println!("Removed {} session(s).", before);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_payload_requires_object() {
        assert!(parse_payload(r#"{"user":"alice"}"#).is_ok());
        assert!(parse_payload("[1,2]").is_err());
        assert!(parse_payload("not json").is_err());
    }

    #[test]
    fn test_format_expiry() {
        let now = Utc::now();
        assert_eq!(format_expiry(None, now), "never");
        assert!(format_expiry(Some(now - Duration::minutes(1)), now).ends_with("(expired)"));
        assert!(!format_expiry(Some(now + Duration::minutes(1)), now).contains("expired"));
    }

    #[tokio::test]
    async fn test_set_get_destroy_against_temp_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.storage_location = dir.path().join("cli.db");

        set(&config, "abc", r#"{"cookie":{"_expires":"2999-01-01T00:00:00Z"}}"#)
            .await
            .unwrap();
        let store = open_store(&config).await.unwrap();
        assert!(store.get("abc").await.unwrap().is_some());
        drop(store);

        destroy(&config, "abc").await.unwrap();
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.length().await.unwrap(), 0);
    }
}
