//! Core module - agent identity and the response policy.
//!
//! This is where an agent decides, per envelope, whether a reply is owed.

pub mod identity;
pub mod policy;

pub use identity::AgentIdentity;
pub use policy::{evaluate, should_respond, Decision};
