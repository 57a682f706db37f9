//! # Metadata & Thumbnail Module
//!
//! Stateless, single-call pipelines that run beside playback sessions.
//!
//! ## Overview
//!
//! This module handles:
//! - Header-only metadata probing with a versioned JSON form
//! - Container duration lookup
//! - Exact-seek thumbnail extraction to RGBA
//!
//! Both pipelines open their own short-lived decode core per call and
//! never share state with a live session.

pub mod error;
pub mod prober;
pub mod thumbnail;

pub use error::{MetadataError, Result};
pub use prober::{MetadataProber, MetadataResult, VideoMetadata, SCHEMA_VERSION};
pub use thumbnail::ThumbnailService;
