use anyhow::Result;
use sense_relay::sink::LogSink;
use sense_relay::{diag, mqtt, timescale, Config, Credentials, Fanout, SessionManager};
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sense_relay=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing()?;

    let creds = Credentials::load(&config.credential_file)?;
    tracing::info!(
        monitor_id = creds.monitor_id,
        time_zone = %creds.time_zone,
        "loaded credentials"
    );

    let (diag_handle, _diag_task) = diag::spawn();

    let mut fanout = Fanout::new();
    if let Some(mqtt_config) = &config.mqtt {
        fanout.register(Box::new(mqtt::spawn(mqtt_config, diag_handle.clone())));
        tracing::info!(host = %mqtt_config.host, topic = %mqtt_config.topic, "MQTT sink enabled");
    }
    if let Some(ts_config) = &config.timescale {
        let pool = timescale::build_pool(&ts_config.database_url, ts_config.pool_size).await?;
        timescale::ensure_schema(&pool).await?;
        fanout.register(Box::new(timescale::spawn(
            pool,
            creds.monitor_id,
            ts_config,
            diag_handle.clone(),
        )));
        tracing::info!("timescale sink enabled");
    }
    if config.log_samples {
        fanout.register(Box::new(LogSink::new()));
    }
    if fanout.is_empty() {
        tracing::warn!("no sinks configured, samples will be decoded and discarded");
    }

    let cancel = CancellationToken::new();
    let manager = SessionManager::new(
        &creds,
        config.production_threshold_watts,
        fanout,
        diag_handle,
        cancel.clone(),
    );
    let run = tokio::spawn(manager.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();
    run.await?;

    Ok(())
}
