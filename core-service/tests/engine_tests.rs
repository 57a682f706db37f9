//! End-to-end tests of the engine command surface over scripted media.

use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{NoopListener, PixelBuffer, RenderSurface, SessionListener};
use core_playback::testing::{RecordingListener, ScriptedBackend, ScriptedMedia};
use core_runtime::events::{CoreEvent, EngineEvent, SessionEvent};
use core_service::{EngineConfig, MediaEngine, SessionState};
use mockall::mock;
use std::sync::{mpsc, Arc};
use std::time::Duration;

mock! {
    Surface {}

    impl RenderSurface for Surface {
        fn present(&self, frame: &PixelBuffer) -> BridgeResult<()>;
        fn preferred_size(&self) -> Option<(u32, u32)>;
    }
}

mock! {
    Listener {}

    impl SessionListener for Listener {
        fn on_prepared(&self, has_audio: bool, duration_ms: i64);
        fn on_error(&self, message: &str);
    }
}

const WAIT: Duration = Duration::from_secs(5);

fn engine_with(backend: ScriptedBackend) -> MediaEngine {
    let config = EngineConfig::builder()
        .backend(Arc::new(backend))
        .event_buffer_size(1024)
        .build()
        .unwrap();
    MediaEngine::new(config).unwrap()
}

fn clip() -> ScriptedMedia {
    ScriptedMedia::video(10_000, 30, 640, 360).with_audio()
}

#[test]
fn test_prepare_returns_live_handle() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let engine = engine_with(ScriptedBackend::new(clip()));
    let listener = Arc::new(RecordingListener::new());

    let handle = engine.prepare(file.path(), listener.clone());
    assert_ne!(handle, 0);
    assert_eq!(engine.state(handle), Some(SessionState::Ready));
    assert_eq!(engine.duration_ms(handle), 10_000);
    assert_eq!(engine.position_ms(handle), 0);
    assert!(listener
        .wait_for(|e| matches!(e, SessionEvent::Prepared { .. }), WAIT)
        .is_some());

    engine.release(handle);
    assert_eq!(engine.state(handle), None);
}

#[test]
fn test_prepare_failure_returns_zero_and_reports_error() {
    let engine = engine_with(ScriptedBackend::new(clip()));

    let mut listener = MockListener::new();
    listener.expect_on_prepared().never();
    listener
        .expect_on_error()
        .withf(|message: &str| message.contains("Source unavailable"))
        .times(1)
        .return_const(());

    let handle = engine.prepare(std::path::Path::new("/no/such/clip.mp4"), Arc::new(listener));
    assert_eq!(handle, 0);
    assert_eq!(engine.session_count(), 0);
}

#[test]
fn test_commands_on_unknown_handles_are_noops() {
    let engine = engine_with(ScriptedBackend::new(clip()));

    for handle in [0, 1, 0xdead_beef, u64::MAX] {
        engine.play(handle).unwrap();
        engine.pause(handle).unwrap();
        engine.seek(handle, 2.0, true).unwrap();
        assert_eq!(engine.set_speed(handle, 2.0).unwrap(), None);
        engine.set_surface(handle, None).unwrap();
        assert_eq!(engine.position_ms(handle), 0);
        assert_eq!(engine.duration_ms(handle), 0);
        engine.release(handle);
    }
}

#[test]
fn test_release_does_not_touch_other_sessions() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let engine = engine_with(ScriptedBackend::new(clip()));

    let first = engine.prepare(file.path(), Arc::new(NoopListener));
    let second = engine.prepare(file.path(), Arc::new(NoopListener));
    assert_ne!(first, second);

    engine.release(first);
    engine.release(first);
    engine.release(0);

    assert_eq!(engine.state(second), Some(SessionState::Ready));
    engine.play(second).unwrap();
    assert_eq!(engine.state(second), Some(SessionState::Playing));
    engine.release(second);
}

#[test]
fn test_stale_handle_does_not_reach_new_session() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let engine = engine_with(ScriptedBackend::new(clip()));

    let stale = engine.prepare(file.path(), Arc::new(NoopListener));
    engine.release(stale);

    let fresh = engine.prepare(file.path(), Arc::new(NoopListener));
    assert_ne!(stale, fresh);

    engine.play(stale).unwrap();
    assert_eq!(engine.state(fresh), Some(SessionState::Ready));
    engine.release(fresh);
}

#[test]
fn test_invalid_speed_is_rejected() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let engine = engine_with(ScriptedBackend::new(clip()));
    let handle = engine.prepare(file.path(), Arc::new(NoopListener));

    assert!(engine.set_speed(handle, 0.0).is_err());
    assert!(engine.set_speed(handle, -1.0).is_err());
    assert_eq!(engine.set_speed(handle, 10.0).unwrap(), Some(3.0));
    engine.release(handle);
}

#[test]
fn test_surface_receives_frames_at_preferred_size() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let engine = engine_with(ScriptedBackend::new(clip()));
    let handle = engine.prepare(file.path(), Arc::new(NoopListener));

    let (sender, receiver) = mpsc::channel();
    let mut surface = MockSurface::new();
    surface.expect_preferred_size().return_const(Some((320, 0)));
    surface.expect_present().returning(move |frame| {
        let _ = sender.send((frame.width(), frame.height(), frame.len()));
        Ok(())
    });

    let surface: Arc<dyn RenderSurface> = Arc::new(surface);
    engine.set_surface(handle, Some(&surface)).unwrap();

    let (width, height, len) = receiver.recv_timeout(WAIT).unwrap();
    assert_eq!((width, height), (320, 180));
    assert_eq!(len, 320 * 180 * 4);

    engine.release(handle);
}

#[test]
fn test_stateless_operations_return_sentinels() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let engine = engine_with(ScriptedBackend::new(clip()));
    let missing = std::path::Path::new("/no/such/clip.mp4");

    let bytes = engine.extract_thumbnail(file.path(), 5_000, 640, 360).unwrap();
    assert_eq!(bytes.len(), 921_600);
    assert!(engine.extract_thumbnail(file.path(), 5_000, 0, 0).is_none());
    assert!(engine.extract_thumbnail(missing, 5_000, 64, 64).is_none());

    assert_eq!(engine.video_duration(file.path()), 10_000);
    assert_eq!(engine.video_duration(missing), -1);

    let metadata = engine.video_metadata(file.path()).unwrap();
    assert_eq!((metadata.width, metadata.height), (640, 360));
    assert!(engine.video_metadata(missing).is_none());

    let json: serde_json::Value =
        serde_json::from_str(&engine.video_metadata_json(missing)).unwrap();
    assert_eq!(json["success"], false);
    assert!(json["error"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bus_mirrors_session_and_engine_events() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let engine = engine_with(ScriptedBackend::new(clip()));
    let mut stream = engine.subscribe();

    let handle = engine.prepare(file.path(), Arc::new(NoopListener));
    assert_ne!(handle, 0);

    let mut created = false;
    let mut prepared = false;
    while !(created && prepared) {
        let event = tokio::time::timeout(WAIT, stream.recv())
            .await
            .expect("event before timeout")
            .unwrap();
        match event {
            CoreEvent::Engine(EngineEvent::SessionCreated { handle: h }) => {
                assert_eq!(h, handle);
                created = true;
            }
            CoreEvent::Session {
                handle: h,
                event: SessionEvent::Prepared { duration_ms, has_audio },
            } => {
                assert_eq!(h, handle);
                assert_eq!(duration_ms, 10_000);
                assert!(has_audio);
                prepared = true;
            }
            _ => {}
        }
    }

    engine.release(handle);
    loop {
        let event = tokio::time::timeout(WAIT, stream.recv())
            .await
            .expect("release event before timeout")
            .unwrap();
        if event == CoreEvent::Engine(EngineEvent::SessionReleased { handle }) {
            break;
        }
    }
}

#[tokio::test]
async fn test_bus_reports_stateless_outcomes() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let engine = engine_with(ScriptedBackend::new(clip()));
    let mut stream = engine.subscribe();

    engine.extract_thumbnail(file.path(), 1_000, 64, 0);
    engine.extract_thumbnail(file.path(), 1_000, -1, 10);
    engine.video_metadata_json(file.path());

    let mut events = Vec::new();
    while let Some(Ok(event)) = stream.try_recv() {
        events.push(event);
    }

    assert_eq!(
        events[0],
        CoreEvent::Engine(EngineEvent::ThumbnailExtracted {
            time_ms: 1_000,
            width: 64,
            height: 36,
        })
    );
    assert!(matches!(
        events[1],
        CoreEvent::Engine(EngineEvent::ThumbnailFailed { time_ms: 1_000, .. })
    ));
    assert_eq!(
        events[2],
        CoreEvent::Engine(EngineEvent::ProbeCompleted { success: true })
    );
}

#[test]
fn test_initialize_is_idempotent() {
    let backend = ScriptedBackend::new(clip());
    let config = EngineConfig::builder()
        .backend(Arc::new(backend))
        .build()
        .unwrap();

    let first = MediaEngine::initialize(config).unwrap();
    let second = MediaEngine::initialize(EngineConfig::default()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.version().ends_with("(scripted 1.0)"));
    assert!(Arc::ptr_eq(&MediaEngine::global().unwrap(), &first));
}
