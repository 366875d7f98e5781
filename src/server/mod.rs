//! # Relay Server Components
//!
//! - [`registry`]: Shared store of connected clients, by connection and identity
//! - [`router`]: Language-aware fan-out of commands to events
//! - [`handler`]: Per-connection read loop
//! - [`server`]: Accept loop and lifetime owner of the registry
//! - [`config`]: TOML configuration

pub mod config;
pub mod handler;
pub mod registry;
pub mod router;
pub mod server;

pub use config::RelayConfig;
pub use registry::{ClientRecord, ClientRegistry};
pub use router::{Dispatch, Router};
pub use server::RelayServer;
