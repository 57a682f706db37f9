//! Workspace umbrella crate.
//!
//! Re-exports the engine facade and maps the workspace feature flags
//! (`core-decoder`, `ffmpeg`, `ffi`) onto `core-service`, so hosts can
//! depend on a single crate.

pub use core_service::*;
