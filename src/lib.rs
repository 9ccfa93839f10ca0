//! # Conduit
//!
//! Event bus, workflow engine, and WebSocket fan-out provider for backend
//! application services.
//!
//! ```toml
//! [dependencies]
//! conduit = "0.1"
//! ```
//!
//! See [`conduit_core`] for the full module layout; this crate only
//! re-exports it under the `conduit` name so downstream `Cargo.toml`s read
//! naturally.

pub use conduit_core::*;
