//! Live sensor events: change feed, bridge, and subscriber fan-out.

mod bridge;
mod feed;
mod hub;

pub use bridge::{dispatch, BridgeState, RealtimeBridge, ReconnectPolicy};
pub use feed::{
    ChangeFeed, ChangeOperation, ChangePayload, ChangeRecord, FeedError, FeedSource, MemoryFeed,
    PgFeed,
};
pub use hub::{AnomalyReport, Envelope, EventData, Hub, ANOMALY_CHANNEL, READING_CHANNEL};
