use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Runtime configuration, environment-driven. Every knob has a default so a
/// bare `SENSE_MQTT_URL` or `SENSE_DATABASE_URL` is enough to get a sink.
#[derive(Debug, Clone)]
pub struct Config {
    pub credential_file: PathBuf,
    /// Base production noise threshold, watts. Zero disables the correction.
    pub production_threshold_watts: f64,
    pub mqtt: Option<MqttConfig>,
    pub timescale: Option<TimescaleConfig>,
    /// Log every decoded sample through tracing (debug sink).
    pub log_samples: bool,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct TimescaleConfig {
    pub database_url: String,
    pub pool_size: u32,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let credential_file = PathBuf::from(env_string(
            "SENSE_CREDENTIAL_FILE",
            Some("/var/lib/sense-relay/credentials.json".to_string()),
        )?);
        let production_threshold_watts = env_f64("SENSE_PRODUCTION_THRESHOLD_WATTS", Some(0.0))?;

        let mqtt = match env_optional("SENSE_MQTT_URL") {
            Some(raw) => Some(mqtt_from_url(&raw)?),
            None => None,
        };

        let timescale = match env_optional("SENSE_DATABASE_URL") {
            Some(database_url) => Some(TimescaleConfig {
                database_url,
                pool_size: env_u64("SENSE_DB_POOL_SIZE", Some(4))? as u32,
                batch_size: env_u64("SENSE_DB_BATCH_SIZE", Some(100))? as usize,
                flush_interval: Duration::from_millis(env_u64(
                    "SENSE_DB_FLUSH_INTERVAL_MS",
                    Some(1000),
                )?),
            }),
            None => None,
        };

        let log_samples = env_bool("SENSE_LOG_SAMPLES", false)?;

        Ok(Self {
            credential_file,
            production_threshold_watts,
            mqtt,
            timescale,
            log_samples,
        })
    }
}

fn mqtt_from_url(raw: &str) -> Result<MqttConfig> {
    let url = Url::parse(raw).context("invalid SENSE_MQTT_URL")?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("SENSE_MQTT_URL missing host"))?
        .to_string();
    let port = url.port().unwrap_or(1883);

    let username = env_optional("SENSE_MQTT_USERNAME");
    let password = env_optional("SENSE_MQTT_PASSWORD");
    let topic = env_string("SENSE_MQTT_TOPIC", Some("sense/realtime".to_string()))?;
    let client_id = env_string("SENSE_MQTT_CLIENT_ID", Some("sense-relay".to_string()))?;

    Ok(MqttConfig {
        host,
        port,
        username,
        password,
        topic,
        client_id,
    })
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_f64(key: &str, default: Option<f64>) -> Result<f64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(value) => match value.trim() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => Err(anyhow!("invalid {key}: {other:?}")),
        },
        Err(_) => Ok(default),
    }
}
