//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media engine:
//! - Logging and tracing infrastructure
//! - Engine-wide event bus
//!
//! ## Overview
//!
//! This crate contains the runtime utilities every other engine crate
//! depends on. It establishes the logging conventions and the broadcast
//! channel that mirrors per-session events for observers.

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
