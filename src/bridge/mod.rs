//! Broadcast bridge: mirrors bus traffic to browser viewers and lets them
//! post back into the room.

pub mod api;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;

pub use registry::{ChannelSink, FanOutReport, ViewerId, ViewerPushError, ViewerRegistry, ViewerSink};
pub use relay::Bridge;
pub use router::create_app_router;
pub use server::{run_bridge, run_bridge_subscribed, BridgeServerConfig};
