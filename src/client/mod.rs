//! # Client Components
//!
//! A small protocol client for the relay ([`client`]). It speaks the same
//! text protocol as the voice clients and decodes the relay's events.

pub mod client;

pub use client::{CommandSender, EventReceiver, RelayClient};
