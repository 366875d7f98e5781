//! # Common Components
//!
//! Shared utilities and data structures used by both client and server components.
//!
//! ## Modules
//!
//! - [`messages`]: Wire protocol commands and events
//! - [`framing`]: Splitting the byte stream into messages
//! - [`connection`]: Shared write handle of one client connection
//! - [`config`]: Configuration parsing utilities
//! - [`error`]: Typed protocol, validation and I/O failures

pub mod config;
pub mod connection;
pub mod error;
pub mod framing;
pub mod messages;
