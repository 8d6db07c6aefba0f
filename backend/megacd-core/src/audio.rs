//! Audio mixing for embedders: collects the four sample streams at their native
//! rates, resamples each to a common output rate, and mixes them into stereo
//! 16-bit frames. Also tracks the rolling host-queue depth that frontends feed back
//! into their playback-speed control.

use bincode::{Decode, Encode};
use mdemu_common::frontend::TimingMode;
use megadrive_core::timing::{
    self, CDDA_SAMPLE_RATE, FM_SAMPLE_DIVIDER, M68K_DIVIDER, MCD_M68K_DIVIDER, MCD_MASTER_CLOCK,
    PCM_SAMPLE_DIVIDER, PSG_SAMPLE_DIVIDER, Z80_DIVIDER,
};
use std::collections::VecDeque;

pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Window length of the queued-frame rolling average.
const QUEUE_HISTORY_LEN: usize = 16;

/// Push-based linear-interpolation rate converter for one stream.
#[derive(Debug, Clone, Encode, Decode)]
struct StreamResampler {
    source_rate: u64,
    output_rate: u64,
    rate_product: u64,
    x_counter: u64,
    previous_frame: [i16; 2],
    current_frame: [i16; 2],
    output: VecDeque<(i16, i16)>,
}

impl StreamResampler {
    fn new(source_rate: u32, output_rate: u32) -> Self {
        Self {
            source_rate: source_rate.into(),
            output_rate: output_rate.into(),
            rate_product: 0,
            x_counter: 0,
            previous_frame: [0; 2],
            current_frame: [0; 2],
            output: VecDeque::with_capacity(output_rate as usize / 30),
        }
    }

    fn set_output_rate(&mut self, output_rate: u32) {
        self.output_rate = output_rate.into();
    }

    fn collect_frame(&mut self, left: i16, right: i16) {
        self.previous_frame = self.current_frame;
        self.current_frame = [left, right];

        self.rate_product += self.output_rate;
        while self.rate_product >= self.source_rate {
            self.rate_product -= self.source_rate;

            self.x_counter += self.source_rate;
            while self.x_counter >= self.output_rate {
                self.x_counter -= self.output_rate;
            }

            let interpolate = |a: i16, b: i16| {
                let delta = i64::from(b) - i64::from(a);
                (i64::from(a) + delta * self.x_counter as i64 / self.output_rate as i64) as i16
            };

            self.output.push_back((
                interpolate(self.previous_frame[0], self.current_frame[0]),
                interpolate(self.previous_frame[1], self.current_frame[1]),
            ));
        }
    }

    fn available(&self) -> usize {
        self.output.len()
    }

    fn pop(&mut self) -> (i16, i16) {
        self.output.pop_front().unwrap_or((0, 0))
    }
}

/// Mixes the FM, PSG, PCM, and CD-DA streams into interleaved stereo output frames.
///
/// Wire its `collect_*` methods into the corresponding `*_audio_to_be_generated`
/// frontend callbacks, then drain with [`AudioMixer::end_frame`] once per video
/// frame.
#[derive(Debug, Clone, Encode, Decode)]
pub struct AudioMixer {
    fm: StreamResampler,
    psg: StreamResampler,
    pcm: StreamResampler,
    cdda: StreamResampler,
    queue_history: [u32; QUEUE_HISTORY_LEN],
    queue_history_index: usize,
}

impl AudioMixer {
    #[must_use]
    pub fn new(timing_mode: TimingMode) -> Self {
        Self::with_output_rate(timing_mode, DEFAULT_OUTPUT_SAMPLE_RATE)
    }

    #[must_use]
    pub fn with_output_rate(timing_mode: TimingMode, output_rate: u32) -> Self {
        let master_clock = timing::master_clock(timing_mode);

        Self {
            fm: StreamResampler::new(master_clock / M68K_DIVIDER / FM_SAMPLE_DIVIDER, output_rate),
            psg: StreamResampler::new(
                master_clock / Z80_DIVIDER / PSG_SAMPLE_DIVIDER,
                output_rate,
            ),
            pcm: StreamResampler::new(
                MCD_MASTER_CLOCK / MCD_M68K_DIVIDER / PCM_SAMPLE_DIVIDER,
                output_rate,
            ),
            cdda: StreamResampler::new(CDDA_SAMPLE_RATE, output_rate),
            queue_history: [0; QUEUE_HISTORY_LEN],
            queue_history_index: 0,
        }
    }

    pub fn set_output_rate(&mut self, output_rate: u32) {
        self.fm.set_output_rate(output_rate);
        self.psg.set_output_rate(output_rate);
        self.pcm.set_output_rate(output_rate);
        self.cdda.set_output_rate(output_rate);
    }

    /// Interleaved stereo FM samples at the chip's native rate.
    pub fn collect_fm(&mut self, buffer: &[i16]) {
        for frame in buffer.chunks_exact(2) {
            self.fm.collect_frame(frame[0], frame[1]);
        }
    }

    /// Mono PSG samples at the chip's native rate.
    pub fn collect_psg(&mut self, buffer: &[i16]) {
        for &sample in buffer {
            self.psg.collect_frame(sample, sample);
        }
    }

    /// Interleaved stereo PCM samples at the chip's native rate.
    pub fn collect_pcm(&mut self, buffer: &[i16]) {
        for frame in buffer.chunks_exact(2) {
            self.pcm.collect_frame(frame[0], frame[1]);
        }
    }

    /// Interleaved stereo CD audio at 44100 Hz.
    pub fn collect_cdda(&mut self, buffer: &[i16]) {
        for frame in buffer.chunks_exact(2) {
            self.cdda.collect_frame(frame[0], frame[1]);
        }
    }

    /// Mix every output frame all four streams can supply, appending interleaved
    /// stereo samples to `output`. Returns the number of frames produced.
    pub fn end_frame(&mut self, output: &mut Vec<i16>) -> usize {
        let frames = self
            .fm
            .available()
            .min(self.psg.available())
            .min(self.pcm.available())
            .min(self.cdda.available());

        output.reserve(frames * 2);
        for _ in 0..frames {
            let (fm_l, fm_r) = self.fm.pop();
            let (psg_l, psg_r) = self.psg.pop();
            let (pcm_l, pcm_r) = self.pcm.pop();
            let (cdda_l, cdda_r) = self.cdda.pop();

            let left = i32::from(fm_l) + i32::from(psg_l) + i32::from(pcm_l) + i32::from(cdda_l);
            let right = i32::from(fm_r) + i32::from(psg_r) + i32::from(pcm_r) + i32::from(cdda_r);

            output.push(left.clamp(-0x8000, 0x7FFF) as i16);
            output.push(right.clamp(-0x8000, 0x7FFF) as i16);
        }

        frames
    }

    /// Record how many frames the host currently has queued; the rolling average is
    /// the speed-feedback signal frontends divide against their target queue depth.
    pub fn record_queued_frames(&mut self, frames: u32) {
        self.queue_history[self.queue_history_index] = frames;
        self.queue_history_index = (self.queue_history_index + 1) % QUEUE_HISTORY_LEN;
    }

    #[must_use]
    pub fn average_queued_frames(&self) -> u32 {
        self.queue_history.iter().sum::<u32>() / QUEUE_HISTORY_LEN as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_one_frame(mixer: &mut AudioMixer, fm_level: i16) {
        // Roughly one NTSC frame of samples per stream
        let fm = vec![fm_level; 888 * 2];
        mixer.collect_fm(&fm);

        let psg = vec![100; 3729];
        mixer.collect_psg(&psg);

        let pcm = vec![-50; 543 * 2];
        mixer.collect_pcm(&pcm);

        let cdda = vec![25; 735 * 2];
        mixer.collect_cdda(&cdda);
    }

    #[test]
    fn produces_roughly_one_frame_of_output() {
        let mut mixer = AudioMixer::new(TimingMode::Ntsc);
        feed_one_frame(&mut mixer, 1000);

        let mut output = Vec::new();
        let frames = mixer.end_frame(&mut output);

        // 48000 Hz / ~60 fps, within resampler startup slack
        assert!((780..=805).contains(&frames), "got {frames} frames");
        assert_eq!(output.len(), frames * 2);

        // Steady-state samples are the sum of all four streams
        let expected = 1000 + 100 - 50 + 25;
        assert!(output[200..].iter().all(|&s| (i32::from(s) - expected).abs() <= 2));
    }

    #[test]
    fn mixing_saturates() {
        let mut mixer = AudioMixer::new(TimingMode::Ntsc);

        let fm = vec![0x7FFF; 888 * 2];
        mixer.collect_fm(&fm);
        let psg = vec![0x7FFF; 3729];
        mixer.collect_psg(&psg);
        let pcm = vec![0x7FFF; 543 * 2];
        mixer.collect_pcm(&pcm);
        let cdda = vec![0x7FFF; 735 * 2];
        mixer.collect_cdda(&cdda);

        let mut output = Vec::new();
        mixer.end_frame(&mut output);
        assert!(output[100..].iter().all(|&s| s == 0x7FFF));
    }

    #[test]
    fn output_is_limited_by_the_slowest_stream() {
        let mut mixer = AudioMixer::new(TimingMode::Ntsc);

        let fm = vec![0; 888 * 2];
        mixer.collect_fm(&fm);
        // No PSG/PCM/CDDA collected yet
        let mut output = Vec::new();
        assert_eq!(mixer.end_frame(&mut output), 0);
        assert!(output.is_empty());
    }

    #[test]
    fn queue_average_is_a_rolling_window() {
        let mut mixer = AudioMixer::new(TimingMode::Ntsc);

        for _ in 0..QUEUE_HISTORY_LEN {
            mixer.record_queued_frames(800);
        }
        assert_eq!(mixer.average_queued_frames(), 800);

        for _ in 0..QUEUE_HISTORY_LEN / 2 {
            mixer.record_queued_frames(400);
        }
        assert_eq!(mixer.average_queued_frames(), 600);
    }
}
