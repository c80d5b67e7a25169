//! HTTP and WebSocket endpoints of the bridge.

pub mod send;
pub mod stats;
pub mod ws;

pub use send::send_message;
pub use stats::bridge_stats;
pub use ws::viewer_socket;
