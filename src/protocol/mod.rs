//! Wire protocol for the agent chatroom.
//!
//! - Envelopes with message/conversation correlation IDs
//! - JSON codec tolerant of older producers
//! - Human submissions from the bridge

pub mod envelope;
pub mod submission;

pub use envelope::{decode, encode, DecodeError, Envelope};
pub use submission::{Submission, DEFAULT_SENDER};
