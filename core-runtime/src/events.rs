//! # Event Bus System
//!
//! Provides an engine-wide event channel using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Per-session callbacks are delivered to each session's `SessionListener`.
//! The same events, tagged with the session handle, are mirrored onto the
//! [`EventBus`] together with engine-level events (sessions created and
//! released, thumbnails, probes). Hosts that prefer a single stream over
//! per-session listeners subscribe here.
//!
//! ```text
//! ┌──────────────┐   emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Session N    ├─────────>│           ├────────────>│ Subscriber │
//! └──────────────┘          │ EventBus  │             └────────────┘
//! ┌──────────────┐   emit   │ (broadcast│  subscribe  ┌────────────┐
//! │ MediaEngine  ├─────────>│  channel) ├────────────>│ Subscriber │
//! └──────────────┘          └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut stream = EventStream::new(bus.subscribe()).for_session(7);
//!
//! bus.emit(CoreEvent::session(7, SessionEvent::FirstFrame)).ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.handle(), Some(7));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Position
//!   events are frequent, so slow subscribers should expect this and keep
//!   reading.
//! - **`RecvError::Closed`**: the engine dropped its bus.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Event produced by one playback session.
    Session {
        /// Handle of the producing session.
        handle: u64,
        /// The session event.
        event: SessionEvent,
    },
    /// Engine-level event not tied to a live session.
    Engine(EngineEvent),
}

impl CoreEvent {
    /// Shorthand for [`CoreEvent::Session`].
    pub fn session(handle: u64, event: SessionEvent) -> Self {
        CoreEvent::Session { handle, event }
    }

    /// Session handle the event belongs to, if any.
    pub fn handle(&self) -> Option<u64> {
        match self {
            CoreEvent::Session { handle, .. } => Some(*handle),
            CoreEvent::Engine(EngineEvent::SessionCreated { handle })
            | CoreEvent::Engine(EngineEvent::SessionReleased { handle }) => Some(*handle),
            CoreEvent::Engine(_) => None,
        }
    }

    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session { event, .. } => event.description(),
            CoreEvent::Engine(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Session {
                event: SessionEvent::Error { .. },
                ..
            } => EventSeverity::Error,
            CoreEvent::Engine(EngineEvent::ThumbnailFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Session {
                event: SessionEvent::AudioStateChanged { state },
                ..
            } if state == "stoppedBySystem" || state == "dead" => EventSeverity::Warning,
            CoreEvent::Session {
                event: SessionEvent::Position { .. },
                ..
            } => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Lifecycle events of a playback session.
///
/// One variant per host callback, in the order a session can produce them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// Source opened and streams selected.
    Prepared {
        has_audio: bool,
        /// Container duration, `-1` when unknown.
        duration_ms: i64,
    },
    /// First frame presented on a newly attached surface.
    SurfaceReady,
    /// First frame of the session.
    FirstFrame,
    /// First frame presented for the latest seek target.
    FirstFrameAfterSeek { position_ms: i64 },
    /// Coalesced playback position.
    Position { position_ms: i64 },
    /// End of stream reached.
    Ended,
    /// Decode or output failure. The session stays releasable.
    Error { message: String },
    /// Audio device/route change.
    AudioStateChanged { state: String },
}

impl SessionEvent {
    pub fn description(&self) -> &str {
        match self {
            SessionEvent::Prepared { .. } => "Session prepared",
            SessionEvent::SurfaceReady => "Surface ready",
            SessionEvent::FirstFrame => "First frame presented",
            SessionEvent::FirstFrameAfterSeek { .. } => "First frame after seek presented",
            SessionEvent::Position { .. } => "Position updated",
            SessionEvent::Ended => "Playback ended",
            SessionEvent::Error { .. } => "Playback error",
            SessionEvent::AudioStateChanged { .. } => "Audio state changed",
        }
    }
}

// ============================================================================
// Engine Events
// ============================================================================

/// Events emitted by the engine façade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum EngineEvent {
    /// Engine initialised.
    Initialized { version: String },
    /// A session was prepared and registered.
    SessionCreated { handle: u64 },
    /// A session was released.
    SessionReleased { handle: u64 },
    /// A thumbnail was produced.
    ThumbnailExtracted {
        time_ms: i64,
        width: u32,
        height: u32,
    },
    /// Thumbnail extraction failed.
    ThumbnailFailed { time_ms: i64, message: String },
    /// Metadata probe finished.
    ProbeCompleted { success: bool },
}

impl EngineEvent {
    fn description(&self) -> &str {
        match self {
            EngineEvent::Initialized { .. } => "Engine initialized",
            EngineEvent::SessionCreated { .. } => "Session created",
            EngineEvent::SessionReleased { .. } => "Session released",
            EngineEvent::ThumbnailExtracted { .. } => "Thumbnail extracted",
            EngineEvent::ThumbnailFailed { .. } => "Thumbnail extraction failed",
            EngineEvent::ProbeCompleted { .. } => "Metadata probe completed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for engine events.
///
/// Emitting never blocks: with no subscribers the event is dropped, and slow
/// subscribers observe `RecvError::Lagged` instead of stalling the emitter.
/// This matters because sessions emit from their dispatcher threads.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only yield events matching `predicate`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only yield events belonging to the session `handle`.
    pub fn for_session(self, handle: u64) -> Self {
        self.filter(move |event| event.handle() == Some(handle))
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        match &self.filter {
            Some(filter) => filter(event),
            None => true,
        }
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_creation() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        let result = bus.emit(CoreEvent::session(1, SessionEvent::Ended));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Engine(EngineEvent::SessionCreated { handle: 42 });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_for_session() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_session(2);

        bus.emit(CoreEvent::session(1, SessionEvent::FirstFrame)).ok();
        bus.emit(CoreEvent::Engine(EngineEvent::ProbeCompleted { success: true }))
            .ok();
        bus.emit(CoreEvent::session(
            2,
            SessionEvent::Position { position_ms: 250 },
        ))
        .ok();

        let received = stream.recv().await.unwrap();
        assert_eq!(
            received,
            CoreEvent::session(2, SessionEvent::Position { position_ms: 250 })
        );
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(CoreEvent::session(
                1,
                SessionEvent::Position { position_ms: i * 250 },
            ))
            .ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let error = CoreEvent::session(
            1,
            SessionEvent::Error {
                message: "decode failed".to_string(),
            },
        );
        assert_eq!(error.severity(), EventSeverity::Error);

        let route_lost = CoreEvent::session(
            1,
            SessionEvent::AudioStateChanged {
                state: "stoppedBySystem".to_string(),
            },
        );
        assert_eq!(route_lost.severity(), EventSeverity::Warning);

        let position = CoreEvent::session(1, SessionEvent::Position { position_ms: 10 });
        assert_eq!(position.severity(), EventSeverity::Debug);

        let created = CoreEvent::Engine(EngineEvent::SessionCreated { handle: 3 });
        assert_eq!(created.severity(), EventSeverity::Info);
    }

    #[test]
    fn test_event_description_and_handle() {
        let event = CoreEvent::session(9, SessionEvent::Ended);
        assert_eq!(event.description(), "Playback ended");
        assert_eq!(event.handle(), Some(9));

        let engine = CoreEvent::Engine(EngineEvent::Initialized {
            version: "0.1.0".to_string(),
        });
        assert_eq!(engine.handle(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::session(
            5,
            SessionEvent::Prepared {
                has_audio: true,
                duration_ms: 12_000,
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Session\""));
        assert!(json.contains("\"event\":\"Prepared\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_try_recv_empty_and_filtered() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|e| matches!(e, CoreEvent::Engine(_)));

        assert!(stream.try_recv().is_none());

        bus.emit(CoreEvent::session(1, SessionEvent::FirstFrame)).ok();
        assert!(stream.try_recv().is_none());

        bus.emit(CoreEvent::Engine(EngineEvent::SessionReleased { handle: 1 }))
            .ok();
        assert!(matches!(stream.try_recv(), Some(Ok(CoreEvent::Engine(_)))));
    }
}
