use crate::config::TimescaleConfig;
use crate::diag::DiagHandle;
use crate::realtime::RealtimeSample;
use crate::sink::{QueuedSink, SinkCommand};
use crate::trend::TrendRecord;
use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tokio::sync::mpsc;

const QUEUE_DEPTH: usize = 1024;

pub async fn build_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Create the two tables this crate writes if they do not exist yet.
/// Converting them to hypertables is left to the operator.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS realtime_samples (
            monitor_id BIGINT NOT NULL,
            ts TIMESTAMPTZ NOT NULL,
            voltage_a DOUBLE PRECISION NOT NULL,
            voltage_b DOUBLE PRECISION NOT NULL,
            frequency DOUBLE PRECISION NOT NULL,
            consumption_channel_a DOUBLE PRECISION NOT NULL,
            consumption_channel_b DOUBLE PRECISION NOT NULL,
            production_channel_a DOUBLE PRECISION NOT NULL,
            production_channel_b DOUBLE PRECISION NOT NULL,
            consumption DOUBLE PRECISION NOT NULL,
            production DOUBLE PRECISION NOT NULL,
            production_raw DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (monitor_id, ts)
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS trend_records (
            monitor_id BIGINT NOT NULL,
            ts TIMESTAMPTZ NOT NULL,
            scale TEXT NOT NULL,
            consumption DOUBLE PRECISION NOT NULL,
            production DOUBLE PRECISION NOT NULL,
            production_raw DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (monitor_id, scale, ts)
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Timescale sink: bounded queue into a batch-insert worker. Flushes on
/// batch size and on an interval, whichever comes first. A failed flush is
/// reported and the batch is discarded; the live feed will produce more.
pub fn spawn(pool: PgPool, monitor_id: i64, config: &TimescaleConfig, diag: DiagHandle) -> QueuedSink {
    let (tx, mut rx) = mpsc::channel::<SinkCommand>(QUEUE_DEPTH);
    let batch_size = config.batch_size;
    let flush_interval = config.flush_interval;

    tokio::spawn(async move {
        let mut buffer: Vec<RealtimeSample> = Vec::with_capacity(batch_size);
        let mut ticker = tokio::time::interval(flush_interval.max(Duration::from_millis(100)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    flush(&pool, monitor_id, &mut buffer, &diag).await;
                }
                command = rx.recv() => {
                    match command {
                        Some(SinkCommand::Sample(sample)) => {
                            buffer.push(sample);
                            if buffer.len() >= batch_size {
                                flush(&pool, monitor_id, &mut buffer, &diag).await;
                            }
                        }
                        Some(SinkCommand::Shutdown) | None => {
                            flush(&pool, monitor_id, &mut buffer, &diag).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    QueuedSink::new("timescale", tx)
}

async fn flush(pool: &PgPool, monitor_id: i64, buffer: &mut Vec<RealtimeSample>, diag: &DiagHandle) {
    if buffer.is_empty() {
        return;
    }
    let items = std::mem::take(buffer);
    let len = items.len();

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO realtime_samples (monitor_id, ts, voltage_a, voltage_b, frequency, \
         consumption_channel_a, consumption_channel_b, production_channel_a, \
         production_channel_b, consumption, production, production_raw) ",
    );
    builder.push_values(items.iter(), |mut b, sample| {
        b.push_bind(monitor_id)
            .push_bind(sample.timestamp)
            .push_bind(sample.voltage[0])
            .push_bind(sample.voltage[1])
            .push_bind(sample.frequency)
            .push_bind(sample.channels[0])
            .push_bind(sample.channels[1])
            .push_bind(sample.channels[2])
            .push_bind(sample.channels[3])
            .push_bind(sample.consumption)
            .push_bind(sample.production)
            .push_bind(sample.production_raw);
    });
    builder.push(" ON CONFLICT DO NOTHING");

    match builder.build().execute(pool).await {
        Ok(result) => {
            tracing::debug!(len, inserted = result.rows_affected(), "flushed realtime batch");
        }
        Err(err) => {
            tracing::debug!(lost = len, "discarding realtime batch after failed flush");
            diag.report("timescale", &err);
        }
    }
}

/// One-shot blocking write used by the trends binary.
pub async fn write_trend_records(
    pool: &PgPool,
    monitor_id: i64,
    records: &[TrendRecord],
) -> Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO trend_records (monitor_id, ts, scale, consumption, production, production_raw) ",
    );
    builder.push_values(records.iter(), |mut b, record| {
        b.push_bind(monitor_id)
            .push_bind(record.timestamp)
            .push_bind(record.scale.as_str())
            .push_bind(record.consumption)
            .push_bind(record.production)
            .push_bind(record.production_raw);
    });
    builder.push(" ON CONFLICT DO NOTHING");
    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}
