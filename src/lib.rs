//! Nueva RT - real-time mixing core for a digital audio workstation
//!
//! The crate is split along the two execution contexts of an audio host:
//!
//! - The **control context** (UI, scripting) edits tracks, drives the
//!   transport and adjusts mix settings through [`engine::TransportCoordinator`]
//!   and [`engine::TrackList`]. These calls may allocate, log and fail.
//! - The **real-time context** (the host audio callback) owns an
//!   [`engine::EngineProcessor`] and renders one block at a time. That path
//!   never allocates, locks, logs or returns errors.
//!
//! Both sides share an [`engine::EngineContext`] holding lock-free state.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;

pub use config::EngineConfig;
pub use error::{NuevaError, Result};
