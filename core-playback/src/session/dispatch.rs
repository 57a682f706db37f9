//! Ordered event delivery.
//!
//! The decode worker never calls into the host. It queues [`SessionEvent`]s
//! on an unbounded channel; one dispatcher thread per session drains the
//! channel in order, invokes the host [`SessionListener`] and mirrors each
//! event onto the engine-wide [`EventBus`].

use bridge_traits::SessionListener;
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, trace, warn};

pub(crate) fn spawn(
    handle: u64,
    listener: Arc<dyn SessionListener>,
    bus: Option<EventBus>,
    mut events: UnboundedReceiver<SessionEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("media-events-{:x}", handle))
        .spawn(move || {
            while let Some(event) = events.blocking_recv() {
                trace!(handle, event = event.description(), "Dispatching session event");

                let delivered = catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref(), &event)));
                if delivered.is_err() {
                    warn!(handle, event = event.description(), "Session listener panicked");
                }

                if let Some(bus) = &bus {
                    let _ = bus.emit(CoreEvent::session(handle, event));
                }
            }
            debug!(handle, "Event dispatcher stopped");
        })
}

fn deliver(listener: &dyn SessionListener, event: &SessionEvent) {
    match event {
        SessionEvent::Prepared {
            has_audio,
            duration_ms,
        } => listener.on_prepared(*has_audio, *duration_ms),
        SessionEvent::SurfaceReady => listener.on_surface_ready(),
        SessionEvent::FirstFrame => listener.on_first_frame(),
        SessionEvent::FirstFrameAfterSeek { .. } => listener.on_first_frame_after_seek(),
        SessionEvent::Position { position_ms } => listener.on_position(*position_ms),
        SessionEvent::Ended => listener.on_ended(),
        SessionEvent::Error { message } => listener.on_error(message),
        SessionEvent::AudioStateChanged { state } => listener.on_audio_state_changed(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl SessionListener for Calls {
        fn on_prepared(&self, has_audio: bool, duration_ms: i64) {
            self.0.lock().push(format!("prepared {} {}", has_audio, duration_ms));
        }

        fn on_position(&self, position_ms: i64) {
            if position_ms < 0 {
                panic!("negative position");
            }
            self.0.lock().push(format!("position {}", position_ms));
        }

        fn on_ended(&self) {
            self.0.lock().push("ended".to_string());
        }
    }

    #[test]
    fn test_events_delivered_in_order_and_mirrored() {
        let calls = Arc::new(Calls::default());
        let bus = EventBus::new(16);
        let mut bus_rx = bus.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();

        let dispatcher = spawn(7, calls.clone(), Some(bus), rx).unwrap();
        tx.send(SessionEvent::Prepared {
            has_audio: true,
            duration_ms: 10_000,
        })
        .unwrap();
        tx.send(SessionEvent::Position { position_ms: -1 }).unwrap();
        tx.send(SessionEvent::Position { position_ms: 250 }).unwrap();
        tx.send(SessionEvent::Ended).unwrap();
        drop(tx);
        dispatcher.join().unwrap();

        // the panicking callback is skipped, the dispatcher keeps going
        assert_eq!(
            *calls.0.lock(),
            vec!["prepared true 10000", "position 250", "ended"]
        );

        let first = bus_rx.try_recv().unwrap();
        assert_eq!(first.handle(), Some(7));
        let mut mirrored = 1;
        while bus_rx.try_recv().is_ok() {
            mirrored += 1;
        }
        assert_eq!(mirrored, 4);
    }
}
