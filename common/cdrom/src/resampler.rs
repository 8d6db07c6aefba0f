//! Pull-based linear-interpolation resampler used to bring decoded audio tracks to the
//! CD-DA rate of 44100 Hz

/// Fixed-point precision used for the source-position increment.
pub const FIXED_POINT_SHIFT: u32 = 16;
const FIXED_POINT_ONE: u64 = 1 << FIXED_POINT_SHIFT;

#[derive(Debug, Clone)]
pub struct Resampler {
    increment: u64,
    position: u64,
    channels: u8,
    previous_frame: [i16; 2],
    current_frame: [i16; 2],
    primed: bool,
    ended: bool,
}

impl Resampler {
    /// # Panics
    ///
    /// Panics if either rate is zero or `channels` is not 1 or 2.
    #[must_use]
    pub fn new(source_rate: u32, output_rate: u32, channels: u8) -> Self {
        assert!(source_rate != 0 && output_rate != 0);
        assert!(channels == 1 || channels == 2, "unsupported channel count: {channels}");

        Self {
            increment: (u64::from(source_rate) << FIXED_POINT_SHIFT) / u64::from(output_rate),
            position: 0,
            channels,
            previous_frame: [0; 2],
            current_frame: [0; 2],
            primed: false,
            ended: false,
        }
    }

    /// Scale an output-frame position into the decoder's frame space. Seeks must pass
    /// through this so that a seek to N output frames lands on the sample that will be
    /// playing N output frames in.
    #[must_use]
    pub fn source_frame_for(&self, output_frame: u64) -> u64 {
        (output_frame * self.increment) >> FIXED_POINT_SHIFT
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.previous_frame = [0; 2];
        self.current_frame = [0; 2];
        self.primed = false;
        self.ended = false;
    }

    /// Fill `output` (interleaved stereo, so `output.len() / 2` frames) by pulling
    /// source frames from `read_source_frame`, which must fill one frame of
    /// `channels` samples and return false at end of stream. Mono sources are
    /// duplicated into both output channels. Returns the number of frames produced.
    pub fn resample(
        &mut self,
        read_source_frame: &mut dyn FnMut(&mut [i16]) -> bool,
        output: &mut [i16],
    ) -> usize {
        let channels = usize::from(self.channels);
        let mut frames_done = 0;

        if !self.primed {
            if !self.advance(read_source_frame) {
                return 0;
            }
            // Pull a second frame so previous/current straddle the interpolation
            // window; a one-frame source degrades to a held sample
            self.advance(read_source_frame);
            self.primed = true;
        }

        for frame in output.chunks_exact_mut(2) {
            while self.position >= FIXED_POINT_ONE {
                if !self.advance(read_source_frame) {
                    return frames_done;
                }
                self.position -= FIXED_POINT_ONE;
            }

            let fraction = self.position as i32;
            for channel in 0..channels {
                let a = i32::from(self.previous_frame[channel]);
                let b = i32::from(self.current_frame[channel]);
                let interpolated = a + (((b - a) * fraction) >> FIXED_POINT_SHIFT);
                frame[channel] = interpolated.clamp(-0x7FFF, 0x7FFF) as i16;
            }

            if channels == 1 {
                frame[1] = frame[0];
            }

            self.position += self.increment;
            frames_done += 1;
        }

        frames_done
    }

    fn advance(&mut self, read_source_frame: &mut dyn FnMut(&mut [i16]) -> bool) -> bool {
        if self.ended {
            return false;
        }

        self.previous_frame = self.current_frame;

        let mut frame = [0; 2];
        if !read_source_frame(&mut frame[..usize::from(self.channels)]) {
            self.ended = true;
            return false;
        }
        self.current_frame = frame;

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_at_equal_rates() {
        let mut resampler = Resampler::new(44100, 44100, 2);

        let mut n: i16 = 0;
        let mut source = |frame: &mut [i16]| {
            frame[0] = n;
            frame[1] = -n;
            n += 100;
            true
        };

        let mut output = [0; 20];
        let frames = resampler.resample(&mut source, &mut output);
        assert_eq!(frames, 10);

        // Position 0 interpolates exactly onto input samples
        assert_eq!(output[0], 0);
        assert_eq!(output[2], 100);
        assert_eq!(output[3], -100);
    }

    #[test]
    fn upsamples_mono_to_stereo() {
        let mut resampler = Resampler::new(22050, 44100, 1);

        let mut n: i16 = 0;
        let mut source = |frame: &mut [i16]| {
            frame[0] = n;
            n += 64;
            true
        };

        let mut output = [0; 16];
        let frames = resampler.resample(&mut source, &mut output);
        assert_eq!(frames, 8);

        for frame in output.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }

        // Half-rate source: every other output frame is a midpoint
        assert_eq!(output[0], 0);
        assert_eq!(output[2], 32);
        assert_eq!(output[4], 64);
    }

    #[test]
    fn stops_at_end_of_source() {
        let mut resampler = Resampler::new(44100, 44100, 2);

        let mut remaining = 5;
        let mut source = |frame: &mut [i16]| {
            if remaining == 0 {
                return false;
            }
            remaining -= 1;
            frame.fill(0x100);
            true
        };

        let mut output = [0; 64];
        let frames = resampler.resample(&mut source, &mut output);
        assert!(frames <= 5);
        assert!(frames >= 4);

        assert_eq!(resampler.resample(&mut source, &mut output), 0);
    }

    #[test]
    fn seek_compensation() {
        let resampler = Resampler::new(22050, 44100, 2);
        assert_eq!(resampler.source_frame_for(1000), 500);

        let resampler = Resampler::new(44100, 44100, 2);
        assert_eq!(resampler.source_frame_for(1000), 1000);
    }
}
