use crate::scale::Threshold;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Discriminator value of frames carrying live meter readings. Every other
/// frame type on the feed (hello, monitor_info, device detection chatter) is
/// irrelevant here.
pub const REALTIME_UPDATE_TAG: &str = "realtime_update";

/// The meter reports the two solar channels with the sign opposite to the
/// consumption channels. This is a vendor convention of the Sense monitor,
/// not a physical property; keep it in one place in case it changes.
pub const SOLAR_CHANNEL_SIGN: f64 = -1.0;

/// One decoded live reading. Immutable once built; handed to each sink by
/// reference.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeSample {
    /// Per-phase line voltage, volts.
    pub voltage: [f64; 2],
    /// Line frequency, Hz.
    pub frequency: f64,
    /// Four CT channel readings, watts. Channels 2 and 3 are the solar legs,
    /// sign-corrected so production reads positive.
    pub channels: [f64; 4],
    /// Total consumption, watts.
    pub consumption: f64,
    /// Solar production after the noise-floor correction, watts.
    pub production: f64,
    /// Solar production exactly as the meter reported it, watts.
    pub production_raw: f64,
    /// Capture time, microsecond precision.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
}

impl RealtimeSample {
    /// Rewrite the cooked production below the noise floor; the raw reading
    /// stays untouched.
    pub fn normalized(mut self, threshold: &Threshold) -> Self {
        self.production = threshold.apply(self.production_raw);
        self
    }
}

#[derive(Deserialize)]
struct Tag {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct Envelope {
    payload: Payload,
}

#[derive(Deserialize)]
struct Payload {
    voltage: [f64; 2],
    channels: [f64; 4],
    hz: f64,
    w: f64,
    solar_w: f64,
}

/// Parses raw text frames from the realtime feed.
///
/// Decode failures are absorbed, not propagated: availability of the stream
/// matters more than completeness of any single sample. Dropped frames are
/// counted so operators can see the rate.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    dropped: AtomicU64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames dropped due to a parse failure since startup. Frames of an
    /// irrelevant type are not drops.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Decode one text frame into at most one sample.
    ///
    /// Returns `None` both for irrelevant frame types (silently) and for
    /// malformed realtime frames (counted).
    pub fn decode(&self, frame: &str) -> Option<RealtimeSample> {
        let Ok(tag) = serde_json::from_str::<Tag>(frame) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if tag.kind != REALTIME_UPDATE_TAG {
            return None;
        }

        let envelope: Envelope = match serde_json::from_str(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(error=%err, "dropped malformed realtime frame");
                return None;
            }
        };
        let payload = envelope.payload;

        let mut channels = payload.channels;
        channels[2] *= SOLAR_CHANNEL_SIGN;
        channels[3] *= SOLAR_CHANNEL_SIGN;

        Some(RealtimeSample {
            voltage: payload.voltage,
            frequency: payload.hz,
            channels,
            consumption: payload.w,
            production: payload.solar_w,
            production_raw: payload.solar_w,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &str = r#"{"type":"realtime_update","payload":{"voltage":[120.1,120.3],"channels":[1.0,2.0,-3.0,-4.0],"hz":60.0,"w":500.0,"solar_w":10.0}}"#;

    #[test]
    fn decodes_a_valid_frame_with_solar_channels_negated() {
        let decoder = FrameDecoder::new();
        let sample = decoder.decode(FRAME).expect("frame should decode");
        assert_eq!(sample.voltage, [120.1, 120.3]);
        assert_eq!(sample.frequency, 60.0);
        assert_eq!(sample.channels, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(sample.consumption, 500.0);
        assert_eq!(sample.production, 10.0);
        assert_eq!(sample.production_raw, 10.0);
        assert_eq!(decoder.dropped(), 0);
    }

    #[test]
    fn irrelevant_frame_types_are_ignored_not_dropped() {
        let decoder = FrameDecoder::new();
        assert!(decoder
            .decode(r#"{"type":"monitor_info","payload":{"serial":"x"}}"#)
            .is_none());
        assert_eq!(decoder.dropped(), 0);
    }

    #[test]
    fn malformed_payload_drops_the_whole_frame() {
        let decoder = FrameDecoder::new();
        // voltage has the wrong arity, so every extraction is abandoned.
        let frame = r#"{"type":"realtime_update","payload":{"voltage":[120.1],"channels":[1,2,3,4],"hz":60.0,"w":1.0,"solar_w":1.0}}"#;
        assert!(decoder.decode(frame).is_none());
        assert_eq!(decoder.dropped(), 1);
    }

    #[test]
    fn non_json_frames_are_counted_as_drops() {
        let decoder = FrameDecoder::new();
        assert!(decoder.decode("not json at all").is_none());
        assert_eq!(decoder.dropped(), 1);
    }

    #[test]
    fn normalization_keeps_the_raw_reading() {
        let decoder = FrameDecoder::new();
        let sample = decoder.decode(FRAME).unwrap();
        let threshold = Threshold::realtime(50.0);
        let cooked = sample.normalized(&threshold);
        assert_eq!(cooked.production, 0.0);
        assert_eq!(cooked.production_raw, 10.0);
    }
}
