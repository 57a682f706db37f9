//! # Host Bridge Traits
//!
//! Capabilities the media engine requires from the host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the engine core and the
//! platform glue (Android JNI, iOS Swift, desktop shells). Each trait is a
//! capability the core consumes but that must be implemented per platform.
//!
//! ## Traits
//!
//! ### Playback Output
//! - [`RenderSurface`](render::RenderSurface) - Target that presents converted RGBA frames
//! - [`AudioOutput`](audio::AudioOutput) - PCM sink with route/device state reporting
//! - [`SessionListener`](listener::SessionListener) - Ordered per-session lifecycle callbacks
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Monotonic time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Ownership Rules
//!
//! The engine never owns a render target's lifetime. Sessions keep a weak
//! reference to the surface handed to them, so a host dropping its `Arc`
//! detaches the surface without any further call.
//!
//! ## Error Handling
//!
//! Bridge implementations report failures with [`BridgeError`](error::BridgeError).
//! A failing surface or audio output never tears down a session; the engine
//! logs the failure and drops the frame or chunk.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` (via
//! [`PlatformSendSync`](platform::PlatformSendSync)) because they are invoked
//! from the decode worker and the event dispatcher threads.

pub mod audio;
pub mod error;
pub mod listener;
pub mod platform;
pub mod render;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use audio::{AudioChunk, AudioOutput, AudioRouteState};
pub use listener::{NoopListener, SessionListener};
pub use render::{PixelBuffer, RenderSurface};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
