//! Host-graph-agnostic halves of the TCP audio bridge: wire constants, CLI
//! definitions, the sender's reconnect/net loop, and the receiver's session
//! registry, parser drive, resampler driver and rate controller.
//!
//! Nothing here knows about `jack`; `streamjack-jack` binds the pieces below
//! to real ports and process callbacks.

pub mod cli;
pub mod config;
pub mod rate;
pub mod receiver;
pub mod sender;

pub use config::SharedState;
