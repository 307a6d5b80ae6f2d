use std::time::Duration;

use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When unset the service runs on the
    /// in-memory store.
    pub database_url: Option<String>,
    pub mqtt: MqttConfig,
    pub server_host: String,
    pub server_port: u16,
    /// Periodic merge interval in seconds.
    pub merge_interval_secs: u64,
    /// Near-duplicate window used by the periodic merge.
    pub merge_window_ms: i64,
    /// Periodic automation snapshot check interval in seconds.
    pub automation_check_interval_secs: u64,
    /// Buffered readings older than this are left out of composite snapshots.
    pub buffer_max_age: Option<Duration>,
    pub webhook: Option<WebhookConfig>,
    /// Format: `"a@example.com,b@example.com"`.
    pub alert_recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    /// Root of every topic, e.g. `greenhouse` in `greenhouse/sensors/soil`.
    pub topic_prefix: String,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
    /// Upper bound on one relay request, connect included.
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            mqtt: MqttConfig::from_env()?,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            merge_interval_secs: optional("MERGE_INTERVAL_SECS", "300")
                .parse()
                .context("MERGE_INTERVAL_SECS must be a positive integer")?,
            merge_window_ms: optional("MERGE_WINDOW_MS", "60000")
                .parse()
                .context("MERGE_WINDOW_MS must be an integer number of milliseconds")?,
            automation_check_interval_secs: optional("AUTOMATION_CHECK_INTERVAL_SECS", "60")
                .parse()
                .context("AUTOMATION_CHECK_INTERVAL_SECS must be a positive integer")?,
            buffer_max_age: parse_max_age(&optional("BUFFER_MAX_AGE_SECS", ""))?,
            webhook: webhook_from_env()?,
            alert_recipients: parse_recipients(&optional("ALERT_RECIPIENTS", "")),
        })
    }
}

impl MqttConfig {
    fn from_env() -> Result<Self> {
        let credentials = match (std::env::var("MQTT_USERNAME"), std::env::var("MQTT_PASSWORD")) {
            (Ok(user), Ok(pass)) => Some((user, pass)),
            (Ok(_), Err(_)) => anyhow::bail!("MQTT_USERNAME is set but MQTT_PASSWORD is missing"),
            _ => None,
        };
        Ok(Self {
            host: optional("MQTT_HOST", "localhost"),
            port: optional("MQTT_PORT", "1883")
                .parse()
                .context("MQTT_PORT must be a valid port number")?,
            client_id: optional("MQTT_CLIENT_ID", "greenhouse-server"),
            credentials,
            topic_prefix: optional("MQTT_TOPIC_PREFIX", "greenhouse")
                .trim_end_matches('/')
                .to_owned(),
        })
    }
}

fn webhook_from_env() -> Result<Option<WebhookConfig>> {
    match std::env::var("NOTIFY_WEBHOOK_URL") {
        Ok(url) if !url.is_empty() => Ok(Some(WebhookConfig {
            url,
            secret: required("NOTIFY_WEBHOOK_SECRET")?,
            timeout: Duration::from_secs(
                optional("NOTIFY_WEBHOOK_TIMEOUT_SECS", "10")
                    .parse()
                    .context("NOTIFY_WEBHOOK_TIMEOUT_SECS must be a positive integer")?,
            ),
        })),
        _ => Ok(None),
    }
}

/// Empty means no age bound.
fn parse_max_age(raw: &str) -> Result<Option<Duration>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("BUFFER_MAX_AGE_SECS must be a positive integer, got: {raw:?}"))?;
    Ok(Some(Duration::from_secs(secs)))
}

fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
