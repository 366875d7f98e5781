pub mod client;
pub mod common;
pub mod server;

pub use client::RelayClient;
pub use common::messages::{Command, Event};
pub use server::{RelayConfig, RelayServer};
