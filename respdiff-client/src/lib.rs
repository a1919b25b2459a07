//! # respdiff-client
//!
//! Pipelined RESP client for the comparison engine.
//! Wire codec, single connections with reconnect-and-retry, slot-routed
//! cluster dispatch, and the batched probe surface (`pipe_*`) the
//! verifiers are built on.

pub mod client;
pub mod cluster;
pub mod codec;
pub mod conn;
pub mod endpoint;
pub mod resp;
pub mod testing;

pub use client::{PipeSlot, StoreClient};
pub use conn::Connection;
pub use endpoint::BaseInfo;
pub use resp::{Command, Reply};
