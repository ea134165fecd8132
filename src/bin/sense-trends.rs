use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use sense_relay::{timescale, Config, Credentials, Scale};

/// Reconstruct historical trend records for one monitor and window.
///
/// Prints each record as a JSON line. When a database is configured the
/// records are also inserted; existing rows are left untouched.
#[derive(Parser, Debug)]
#[command(name = "sense-trends", version)]
struct Args {
    /// Granularity: HOUR, DAY, WEEK, MONTH or YEAR.
    #[arg(long, default_value = "DAY")]
    scale: Scale,

    /// Window start, RFC 3339. Defaults to now minus --offset-secs.
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Seconds to subtract from now when --start is absent.
    #[arg(long, default_value_t = 0)]
    offset_secs: i64,

    /// Skip the database write even when one is configured.
    #[arg(long)]
    no_store: bool,
}

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
    let args = Args::parse();
    let config = Config::from_env()?;
    init_tracing()?;

    let creds = Credentials::load(&config.credential_file)?;
    let start = args
        .start
        .unwrap_or_else(|| Utc::now() - Duration::seconds(args.offset_secs));

    let http = reqwest::Client::new();
    let records = sense_relay::trend::fetch_trend(
        &http,
        &creds,
        args.scale,
        start,
        config.production_threshold_watts,
    )
    .await
    .context("trend fetch failed")?;

    tracing::info!(
        scale = %args.scale,
        start = %start,
        count = records.len(),
        "reconstructed trend records"
    );

    use std::io::Write;
    let mut stdout = std::io::stdout().lock();
    for record in &records {
        serde_json::to_writer(&mut stdout, record)?;
        writeln!(stdout)?;
    }

    if let Some(ts_config) = &config.timescale {
        if !args.no_store {
            let pool = timescale::build_pool(&ts_config.database_url, ts_config.pool_size).await?;
            timescale::ensure_schema(&pool).await?;
            let inserted =
                timescale::write_trend_records(&pool, creds.monitor_id, &records).await?;
            tracing::info!(inserted, "stored trend records");
        }
    }

    Ok(())
}
