//! Integration tests for thumbnail extraction.

use core_metadata::ThumbnailService;
use core_playback::testing::{ScriptedBackend, ScriptedMedia};
use core_playback::PlaybackError;
use std::sync::Arc;
use std::thread;

fn ten_second_clip() -> ScriptedMedia {
    ScriptedMedia::video(10_000, 30, 640, 360).with_audio()
}

#[test]
fn test_full_size_thumbnail() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let service = ThumbnailService::new(Arc::new(ScriptedBackend::new(ten_second_clip())));

    let buffer = service.extract(file.path(), 5_000, 640, 360).unwrap();
    assert_eq!(buffer.len(), 921_600);

    // frame 150 sits at exactly 5s
    let fill = ScriptedMedia::fill_value(150);
    assert_eq!(buffer.pixel(320, 180), Some([fill, fill, fill, 255]));
}

#[test]
fn test_height_derived_from_aspect_ratio() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let service = ThumbnailService::new(Arc::new(ScriptedBackend::new(ten_second_clip())));

    let buffer = service.extract(file.path(), 5_000, 320, 0).unwrap();
    assert_eq!((buffer.width(), buffer.height()), (320, 180));
    assert_eq!(buffer.len(), 320 * 180 * 4);
}

#[test]
fn test_exact_seek_picks_nearest_frame() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let service = ThumbnailService::new(Arc::new(ScriptedBackend::new(
        ScriptedMedia::video(10_000, 30, 64, 36).with_gop(90),
    )));

    // 4.01s lies between frame 120 (4.000s) and 121 (4.033s)
    let buffer = service.extract(file.path(), 4_010, 64, 36).unwrap();
    let fill = ScriptedMedia::fill_value(120);
    assert_eq!(buffer.pixel(10, 10), Some([fill, fill, fill, 255]));

    let buffer = service.extract(file.path(), 4_030, 64, 36).unwrap();
    let fill = ScriptedMedia::fill_value(121);
    assert_eq!(buffer.pixel(10, 10), Some([fill, fill, fill, 255]));
}

#[test]
fn test_audio_only_source_has_no_thumbnail() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let service =
        ThumbnailService::new(Arc::new(ScriptedBackend::new(ScriptedMedia::audio_only(5_000))));

    let err = service.extract(file.path(), 1_000, 64, 64).unwrap_err();
    assert!(err.is_no_video());
}

#[test]
fn test_buffer_size_matches_request() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let service = ThumbnailService::new(Arc::new(ScriptedBackend::new(ten_second_clip())));

    for (w, h) in [(1, 1), (17, 9), (640, 360), (100, 400)] {
        let buffer = service.extract(file.path(), 2_500, w, h).unwrap();
        assert_eq!(buffer.len(), (w * h * 4) as usize);
    }
}

#[test]
fn test_concurrent_extractions_share_nothing() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let backend = ScriptedBackend::new(ten_second_clip());
    let service = ThumbnailService::new(Arc::new(backend.clone()));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let service = service.clone();
            let path = file.path().to_path_buf();
            thread::spawn(move || service.extract(&path, i * 2_000, 160, 90).map(|b| b.len()))
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 160 * 90 * 4);
    }
    assert_eq!(backend.open_count(), 4);
    assert_eq!(backend.live_sources(), 0);
}

#[test]
fn test_decode_failure_propagates() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let service = ThumbnailService::new(Arc::new(ScriptedBackend::new(
        ScriptedMedia::video(10_000, 30, 64, 36).with_corrupt(150..151),
    )));

    let err = service.extract(file.path(), 5_000, 64, 36).unwrap_err();
    assert!(matches!(
        err.as_playback(),
        Some(PlaybackError::DecodeFailure(_))
    ));
}
