//! Relay for the Sense home energy monitor.
//!
//! Two independent flows share this crate:
//!
//! - The live path: a continuously-reconnecting websocket session reads
//!   realtime frames from the Sense feed, decodes them into
//!   [`realtime::RealtimeSample`]s and fans them out to the configured sinks
//!   (MQTT, Timescale, log) without ever letting a slow sink stall ingestion.
//! - The batch path: [`trend::fetch_trend`] issues one authenticated request
//!   against the historical trends endpoint and reconstructs a dense,
//!   timestamped record sequence from the sparse response.

pub mod config;
pub mod credentials;
pub mod diag;
mod limit;
pub mod mqtt;
pub mod realtime;
pub mod scale;
pub mod sink;
pub mod stream;
pub mod timescale;
pub mod trend;

pub use config::Config;
pub use credentials::Credentials;
pub use realtime::{FrameDecoder, RealtimeSample};
pub use scale::{Scale, Threshold};
pub use sink::{Fanout, Sink};
pub use stream::SessionManager;
pub use trend::{TrendError, TrendRecord};
