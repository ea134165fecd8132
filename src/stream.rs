use crate::credentials::Credentials;
use crate::diag::DiagHandle;
use crate::limit::TokenBucket;
use crate::realtime::FrameDecoder;
use crate::scale::Threshold;
use crate::sink::Fanout;
use anyhow::{Context, Result};
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Burst of connection attempts allowed before the refill rate takes over.
const RECONNECT_BURST: f64 = 3.0;
/// Sustained redial rate: one attempt per 30 seconds, so continuous failure
/// never exceeds 3 attempts in any 30-second window.
const RECONNECT_PER_SEC: f64 = 1.0 / 30.0;

fn feed_url(creds: &Credentials) -> String {
    format!(
        "wss://clientrt.sense.com/monitors/{}/realtimefeed?access_token={}",
        creds.monitor_id, creds.token
    )
}

/// Owns the live ingestion loop.
///
/// The feed disconnects unceremoniously every so often, so the manager loops
/// `Idle -> Connecting -> Streaming -> Idle` for the lifetime of the process:
/// wait for a redial token, dial, read frames until any failure (a clean
/// remote close included), go back to Idle. Transient and permanent failures
/// are treated alike; the token bucket keeps repeated immediate failures
/// from turning into a hot spin. Cancellation is checked at every state
/// transition, during the token wait, and while dialing or reading.
pub struct SessionManager {
    url: String,
    monitor_id: i64,
    decoder: FrameDecoder,
    threshold: Threshold,
    fanout: Fanout,
    diag: DiagHandle,
    limiter: TokenBucket,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(
        creds: &Credentials,
        base_threshold_watts: f64,
        fanout: Fanout,
        diag: DiagHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            url: feed_url(creds),
            monitor_id: creds.monitor_id,
            decoder: FrameDecoder::new(),
            threshold: Threshold::realtime(base_threshold_watts),
            fanout,
            diag,
            limiter: TokenBucket::new(RECONNECT_BURST, RECONNECT_PER_SEC),
            cancel,
        }
    }

    /// Run until cancelled. Closes the sinks on the way out.
    pub async fn run(mut self) {
        loop {
            if !self.limiter.acquire(&self.cancel).await {
                break;
            }
            if let Err(err) = self.run_session().await {
                self.diag.report("stream", &format_args!("{err:#}"));
            }
            if self.cancel.is_cancelled() {
                break;
            }
            tracing::info!(
                monitor_id = self.monitor_id,
                dropped_frames = self.decoder.dropped(),
                dropped_samples = ?self.fanout.drop_counts(),
                "session ended, redialing"
            );
        }
        tracing::info!(
            monitor_id = self.monitor_id,
            dropped_frames = self.decoder.dropped(),
            dropped_samples = ?self.fanout.drop_counts(),
            "ingestion stopped"
        );
        self.fanout.close();
    }

    /// One websocket session: dial, then read frames until the first failure.
    async fn run_session(&self) -> Result<()> {
        tracing::info!(monitor_id = self.monitor_id, "connecting to realtime feed");

        let connect = tokio_tungstenite::connect_async(self.url.as_str());
        let (ws, _) = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            dialed = connect => dialed.context("websocket dial")?,
        };
        tracing::info!(monitor_id = self.monitor_id, "realtime feed connected");

        let (_, mut frames) = ws.split();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                frame = frames.next() => {
                    // Stream exhaustion is a clean close; both end the session.
                    let Some(frame) = frame else { return Ok(()) };
                    let message = frame.context("websocket read")?;
                    self.handle_frame(message);
                }
            }
        }
    }

    fn handle_frame(&self, message: Message) {
        // Only text frames qualify; pings and binary frames are not relevant.
        let Message::Text(text) = message else {
            return;
        };
        let Some(sample) = self.decoder.decode(&text) else {
            return;
        };
        let sample = sample.normalized(&self.threshold);
        self.fanout.publish(&sample);
    }
}
