//! # Sample Format Converter
//!
//! Normalizes Symphonia's decoded buffers into interleaved `f32` PCM.

use crate::traits::AudioFrame;
use std::time::Duration;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::conv::IntoSample;
use symphonia::core::sample::Sample;

/// Converts every Symphonia sample format to interleaved `f32` in
/// `[-1.0, 1.0]` (LRLR... for stereo).
pub struct SampleConverter;

impl SampleConverter {
    /// Wrap a decoded buffer as an [`AudioFrame`] stamped with `pts`.
    pub fn to_audio_frame(buffer: &AudioBufferRef<'_>, pts: Duration) -> AudioFrame {
        let spec = buffer.spec();
        AudioFrame {
            pts,
            samples: Self::to_interleaved_f32(buffer),
            channels: spec.channels.count() as u16,
            sample_rate: spec.rate,
        }
    }

    pub fn to_interleaved_f32(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
        match buffer {
            AudioBufferRef::F32(buf) => Self::interleave(&**buf),
            AudioBufferRef::F64(buf) => Self::interleave(&**buf),
            AudioBufferRef::S32(buf) => Self::interleave(&**buf),
            AudioBufferRef::S24(buf) => Self::interleave(&**buf),
            AudioBufferRef::S16(buf) => Self::interleave(&**buf),
            AudioBufferRef::S8(buf) => Self::interleave(&**buf),
            AudioBufferRef::U32(buf) => Self::interleave(&**buf),
            AudioBufferRef::U24(buf) => Self::interleave(&**buf),
            AudioBufferRef::U16(buf) => Self::interleave(&**buf),
            AudioBufferRef::U8(buf) => Self::interleave(&**buf),
        }
    }

    /// Planar (LLLL...RRRR...) to interleaved, converting each sample.
    fn interleave<T>(buf: &AudioBuffer<T>) -> Vec<f32>
    where
        T: Sample + IntoSample<f32>,
    {
        let channels = buf.spec().channels.count();
        let frames = buf.frames();
        let mut interleaved = Vec::with_capacity(frames * channels);

        for frame in 0..frames {
            for channel in 0..channels {
                interleaved.push(buf.chan(channel)[frame].into_sample());
            }
        }

        interleaved
    }
}
