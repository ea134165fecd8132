use crate::realtime::RealtimeSample;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A downstream destination for live samples.
///
/// `accept` must return quickly: a sink whose transport is saturated queues
/// or drops internally, it never blocks the ingest task. `release` is
/// idempotent and best-effort.
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;
    fn accept(&self, sample: &RealtimeSample);
    fn release(&self);

    /// Samples this sink has dropped since startup.
    fn dropped(&self) -> u64 {
        0
    }
}

/// Ordered set of sinks. Publishing iterates registration order; closing is
/// best-effort and continues past individual failures. Transport retry is a
/// sink-internal concern, never the fan-out's.
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Box<dyn Sink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn publish(&self, sample: &RealtimeSample) {
        for sink in &self.sinks {
            sink.accept(sample);
        }
    }

    pub fn close(&self) {
        for sink in &self.sinks {
            sink.release();
        }
    }

    /// Per-sink drop counters, in registration order.
    pub fn drop_counts(&self) -> Vec<(&'static str, u64)> {
        self.sinks
            .iter()
            .map(|sink| (sink.name(), sink.dropped()))
            .collect()
    }
}

/// Commands flowing into a queued sink's worker task.
#[derive(Debug)]
pub enum SinkCommand {
    Sample(RealtimeSample),
    Shutdown,
}

/// `Sink` front half for transports that run behind a bounded worker queue.
///
/// `accept` is a `try_send`: when the worker falls behind and the queue
/// fills, the sample is dropped and counted rather than propagating
/// backpressure to ingestion.
pub struct QueuedSink {
    name: &'static str,
    tx: mpsc::Sender<SinkCommand>,
    dropped: AtomicU64,
}

impl QueuedSink {
    pub fn new(name: &'static str, tx: mpsc::Sender<SinkCommand>) -> Self {
        Self {
            name,
            tx,
            dropped: AtomicU64::new(0),
        }
    }
}

impl Sink for QueuedSink {
    fn name(&self) -> &'static str {
        self.name
    }

    fn accept(&self, sample: &RealtimeSample) {
        match self.tx.try_send(SinkCommand::Sample(sample.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(sink = self.name, dropped, "sink queue full, dropped sample");
            }
        }
    }

    fn release(&self) {
        // Worker exits on the first Shutdown it sees; later ones are no-ops.
        let _ = self.tx.try_send(SinkCommand::Shutdown);
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Debug sink: logs each sample through tracing. Useful when bringing a
/// monitor up without a broker or database around.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn accept(&self, sample: &RealtimeSample) {
        tracing::info!(
            consumption = sample.consumption,
            production = sample.production,
            frequency = sample.frequency,
            "realtime sample"
        );
    }

    fn release(&self) {}
}
