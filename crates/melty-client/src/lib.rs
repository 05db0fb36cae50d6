//! UI-side client for the melty bridge.
//!
//! Wraps one transport end in a typed call facade plus a broadcast stream of
//! host pushes, so an editor frontend drives the host without ever touching
//! raw frames.

pub mod client;

pub use client::MeltyClient;
pub use melty_rpc::CallError;
