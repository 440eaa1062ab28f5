pub mod client;
pub mod config;
pub mod dispatch;
pub mod heartbeat;
pub mod session;

pub use client::StompClient;
pub use config::ClientConfig;
pub use dispatch::{Dispatcher, Inbound, MessageAck, NoopHandler, Outcome, SessionHandler};
pub use heartbeat::{HeartbeatAction, HeartbeatTimers};
pub use session::{Connection, SessionOptions};
