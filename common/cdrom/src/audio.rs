//! Compressed-audio track support.
//!
//! The codec libraries themselves live outside this crate; they plug in through
//! [`AudioDecoder`]. This module owns what happens after decoding: rate conversion to
//! 44100 Hz, mono-to-stereo duplication, and seek compensation.

use crate::CD_SAMPLE_RATE;
use crate::resampler::Resampler;
use std::fmt::{self, Debug, Formatter};
use std::path::Path;

/// Contract for an opened audio file: report its format, deliver 16-bit PCM frames,
/// and seek by frame.
pub trait AudioDecoder: Send {
    fn sample_rate(&self) -> u32;

    /// 1 (mono) or 2 (stereo). Anything else is rejected at open time.
    fn channels(&self) -> u8;

    /// Fill `buffer` (`buffer.len() / channels` frames) with decoded samples; returns
    /// the number of frames actually produced. Short reads signal end of stream.
    fn read_frames(&mut self, buffer: &mut [i16]) -> usize;

    fn seek_to_frame(&mut self, frame: u64) -> bool;
}

/// Opens an audio file in any supported codec, or `None` if the file is missing or in
/// no recognized format.
pub type DecoderOpenFn = fn(&Path) -> Option<Box<dyn AudioDecoder>>;

/// The default decoder registry: no codecs. Audio tracks backed by compressed files
/// play silence, the same way a track in an unrecognized format would.
#[must_use]
pub fn no_decoders(_path: &Path) -> Option<Box<dyn AudioDecoder>> {
    None
}

/// An opened audio track: decoder plus resampler, delivering 44100 Hz stereo.
pub struct CdAudio {
    decoder: Box<dyn AudioDecoder>,
    resampler: Resampler,
}

impl Debug for CdAudio {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdAudio")
            .field("sample_rate", &self.decoder.sample_rate())
            .field("channels", &self.decoder.channels())
            .finish_non_exhaustive()
    }
}

impl CdAudio {
    /// Wrap a decoder. Returns `None` if the stream's channel layout is unsupported.
    #[must_use]
    pub fn new(decoder: Box<dyn AudioDecoder>) -> Option<Self> {
        let channels = decoder.channels();
        if channels != 1 && channels != 2 {
            log::warn!("Rejecting audio stream with {channels} channels");
            return None;
        }

        let resampler = Resampler::new(decoder.sample_rate(), CD_SAMPLE_RATE, channels);
        Some(Self { decoder, resampler })
    }

    /// Seek to the given 44100 Hz output frame, rescaling through the resampler's
    /// increment so that playback resumes at the right place in the source stream.
    pub fn seek(&mut self, output_frame: u64) -> bool {
        let source_frame = self.resampler.source_frame_for(output_frame);
        self.resampler.reset();
        self.decoder.seek_to_frame(source_frame)
    }

    /// Fill `buffer` (interleaved stereo, `buffer.len() / 2` frames) with resampled
    /// audio; returns frames produced.
    pub fn read_frames(&mut self, buffer: &mut [i16]) -> usize {
        let decoder = &mut *self.decoder;
        self.resampler.resample(&mut |frame| decoder.read_frames(frame) == 1, buffer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic ramp generator standing in for a real codec.
    pub(crate) struct RampDecoder {
        pub sample_rate: u32,
        pub channels: u8,
        pub position: u64,
        pub total_frames: u64,
    }

    impl AudioDecoder for RampDecoder {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn channels(&self) -> u8 {
            self.channels
        }

        fn read_frames(&mut self, buffer: &mut [i16]) -> usize {
            let channels = usize::from(self.channels);
            let mut frames_done = 0;
            for frame in buffer.chunks_exact_mut(channels) {
                if self.position >= self.total_frames {
                    break;
                }
                frame.fill(self.position as i16);
                self.position += 1;
                frames_done += 1;
            }
            frames_done
        }

        fn seek_to_frame(&mut self, frame: u64) -> bool {
            if frame > self.total_frames {
                return false;
            }
            self.position = frame;
            true
        }
    }

    #[test]
    fn rejects_surround_streams() {
        let decoder =
            RampDecoder { sample_rate: 44100, channels: 6, position: 0, total_frames: 100 };
        assert!(CdAudio::new(Box::new(decoder)).is_none());
    }

    #[test]
    fn mono_track_duplicated_to_stereo() {
        let decoder =
            RampDecoder { sample_rate: 44100, channels: 1, position: 0, total_frames: 1000 };
        let mut audio = CdAudio::new(Box::new(decoder)).unwrap();

        let mut buffer = [0; 32];
        assert_eq!(audio.read_frames(&mut buffer), 16);
        for frame in buffer.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn seek_rescales_through_increment() {
        let decoder =
            RampDecoder { sample_rate: 22050, channels: 2, position: 0, total_frames: 10000 };
        let mut audio = CdAudio::new(Box::new(decoder)).unwrap();

        assert!(audio.seek(2000));

        // 22050 Hz source at a 44100 Hz output rate: output frame 2000 is source frame 1000
        let mut buffer = [0; 2];
        assert_eq!(audio.read_frames(&mut buffer), 1);
        assert_eq!(buffer[0], 1000);
    }
}
