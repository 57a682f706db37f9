//! # Media Engine Service
//!
//! Host-facing facade over the playback, metadata and runtime crates.
//!
//! ## Overview
//!
//! [`MediaEngine`] owns the handle registry of live playback sessions and
//! the stateless thumbnail/metadata pipelines. Hosts initialise it once per
//! process with [`MediaEngine::initialize`] and then address sessions by
//! the opaque `u64` handle returned from `prepare`.
//!
//! ```no_run
//! use core_service::{EngineConfig, MediaEngine};
//! use bridge_traits::NoopListener;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let engine = MediaEngine::initialize(EngineConfig::default()).unwrap();
//! let handle = engine.prepare(Path::new("/media/clip.mp4"), Arc::new(NoopListener));
//! engine.play(handle).unwrap();
//! engine.release(handle);
//! ```
//!
//! ## Features
//!
//! | Feature | Effect |
//! |---------|--------|
//! | `core-decoder` (default) | Symphonia backend |
//! | `ffmpeg` | FFmpeg backend for video containers |
//! | `ffi` | `uniffi` exports for Kotlin and Swift hosts |

pub mod config;
pub mod engine;
pub mod error;

#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

pub use config::{EngineConfig, EngineConfigBuilder};
pub use core_metadata::{MetadataResult, VideoMetadata};
pub use core_playback::{Handle, SessionConfig, SessionState};
pub use engine::MediaEngine;
pub use error::{EngineError, Result};
