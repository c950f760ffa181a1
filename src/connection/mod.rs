// src/connection/mod.rs
mod manager;
mod retry;
mod subscription;
mod transport;

pub use manager::{
    ConnectionState, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECONNECT_CEILING, DEFAULT_RECONNECT_FLOOR, LiveClient,
    Timings,
};
pub use retry::ReconnectBackoff;
pub use subscription::SubscriptionRegistry;
pub use transport::{Connector, FrameSink, FrameStream, Transport, WsConnector, endpoint_url};
