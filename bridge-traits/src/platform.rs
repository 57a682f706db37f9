//! Thread-safety bound shared by every bridge trait.
//!
//! Bridge implementations are invoked from the host thread, the session
//! decode worker and the event dispatcher, so all of them must be
//! `Send + Sync`.

/// Marker trait for types usable from any engine thread.
pub trait PlatformSendSync: Send + Sync {}

impl<T> PlatformSendSync for T where T: Send + Sync + ?Sized {}
