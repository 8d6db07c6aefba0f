//! Integer IIR low-pass filters modelling the analog output stages of the console.
//!
//! The Mega Drive low-passes the YM2612 and SN76489 through a simple RC filter
//! (10K resistor + 5600pF capacitor, ~2842 Hz cutoff on a VA4 board), and the Mega CD
//! applies a steeper second-order filter to the RF5C164. These are reproduced in
//! 16.16 fixed point so that filtering stays exact across save states.

use bincode::{Decode, Encode};

const FIXED_BASE: i32 = 1 << 16;

fn to_fixed(x: f64, output_coefficient: f64) -> i32 {
    (x * f64::from(FIXED_BASE) / output_coefficient).round() as i32
}

fn fixed_multiply(multiplicand: i32, multiplier: i32) -> i32 {
    multiplicand * multiplier / FIXED_BASE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct FirstOrderCoefficients {
    sample_magic: i32,
    output_magic: i32,
}

impl FirstOrderCoefficients {
    /// Derive fixed-point coefficients from the filter's characteristic constants,
    /// as produced by a bilinear-transform RC filter design for the chip's sample rate.
    #[must_use]
    pub fn compute(output_coefficient: f64, input_coefficient: f64) -> Self {
        Self {
            sample_magic: to_fixed(1.0, output_coefficient),
            output_magic: to_fixed(input_coefficient, output_coefficient),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct SecondOrderCoefficients {
    sample_magic: i32,
    output_magic_1: i32,
    output_magic_2: i32,
}

impl SecondOrderCoefficients {
    #[must_use]
    pub fn compute(
        output_coefficient: f64,
        input_coefficient_1: f64,
        input_coefficient_2: f64,
    ) -> Self {
        Self {
            sample_magic: to_fixed(1.0, output_coefficient),
            output_magic_1: to_fixed(input_coefficient_1, output_coefficient),
            output_magic_2: to_fixed(input_coefficient_2, output_coefficient),
        }
    }
}

/// First-order low-pass over `CHANNELS`-channel interleaved sample buffers.
#[derive(Debug, Clone, Encode, Decode)]
pub struct FirstOrderLowPass<const CHANNELS: usize> {
    previous_samples: [i16; CHANNELS],
    previous_outputs: [i16; CHANNELS],
}

impl<const CHANNELS: usize> Default for FirstOrderLowPass<CHANNELS> {
    fn default() -> Self {
        Self {
            previous_samples: [0; CHANNELS],
            previous_outputs: [0; CHANNELS],
        }
    }
}

impl<const CHANNELS: usize> FirstOrderLowPass<CHANNELS> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.previous_samples = [0; CHANNELS];
        self.previous_outputs = [0; CHANNELS];
    }

    /// Filter an interleaved buffer in place. The buffer length must be a multiple of
    /// the channel count.
    pub fn apply(&mut self, buffer: &mut [i16], coefficients: FirstOrderCoefficients) {
        debug_assert!(buffer.len() % CHANNELS == 0);

        for frame in buffer.chunks_exact_mut(CHANNELS) {
            for (channel, sample) in frame.iter_mut().enumerate() {
                let output = (fixed_multiply(
                    i32::from(*sample) + i32::from(self.previous_samples[channel]),
                    coefficients.sample_magic,
                ) + fixed_multiply(
                    i32::from(self.previous_outputs[channel]),
                    coefficients.output_magic,
                )) as i16;

                self.previous_samples[channel] = *sample;
                self.previous_outputs[channel] = output;
                *sample = output;
            }
        }
    }
}

/// Second-order low-pass over `CHANNELS`-channel interleaved sample buffers.
///
/// Unlike the first-order filter, this one can overshoot the 16-bit range, so its
/// output is clamped.
#[derive(Debug, Clone, Encode, Decode)]
pub struct SecondOrderLowPass<const CHANNELS: usize> {
    previous_samples: [[i16; 2]; CHANNELS],
    previous_outputs: [[i16; 2]; CHANNELS],
}

impl<const CHANNELS: usize> Default for SecondOrderLowPass<CHANNELS> {
    fn default() -> Self {
        Self {
            previous_samples: [[0; 2]; CHANNELS],
            previous_outputs: [[0; 2]; CHANNELS],
        }
    }
}

impl<const CHANNELS: usize> SecondOrderLowPass<CHANNELS> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.previous_samples = [[0; 2]; CHANNELS];
        self.previous_outputs = [[0; 2]; CHANNELS];
    }

    pub fn apply(&mut self, buffer: &mut [i16], coefficients: SecondOrderCoefficients) {
        debug_assert!(buffer.len() % CHANNELS == 0);

        for frame in buffer.chunks_exact_mut(CHANNELS) {
            for (channel, sample) in frame.iter_mut().enumerate() {
                let samples = &mut self.previous_samples[channel];
                let outputs = &mut self.previous_outputs[channel];

                let unclamped = fixed_multiply(
                    i32::from(*sample) + i32::from(samples[0]),
                    coefficients.sample_magic,
                ) + fixed_multiply(
                    i32::from(samples[0]) + i32::from(samples[1]),
                    coefficients.sample_magic,
                ) + fixed_multiply(i32::from(outputs[0]), coefficients.output_magic_1)
                    - fixed_multiply(i32::from(outputs[1]), coefficients.output_magic_2);

                let output = unclamped.clamp(-0x7FFF, 0x7FFF) as i16;

                samples[1] = samples[0];
                samples[0] = *sample;
                outputs[1] = outputs[0];
                outputs[0] = output;
                *sample = output;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_order_unity_dc_gain() {
        let coefficients = FirstOrderCoefficients::compute(6.910, 4.910);
        let mut filter = FirstOrderLowPass::<1>::new();

        let mut last = 0;
        for _ in 0..200 {
            let mut buffer = [0x1000];
            filter.apply(&mut buffer, coefficients);
            last = buffer[0];
        }

        // Converges to the input level at DC (within integer truncation)
        assert!((0x1000 - last).abs() < 8, "converged to {last:#X}");
    }

    #[test]
    fn first_order_attenuates_nyquist() {
        let coefficients = FirstOrderCoefficients::compute(6.910, 4.910);
        let mut filter = FirstOrderLowPass::<1>::new();

        // Warm up, then measure a full-rate square wave; it should come out much
        // quieter than it went in
        let mut peak: i16 = 0;
        for i in 0..200 {
            let mut buffer = [if i % 2 == 0 { 0x4000 } else { -0x4000 }];
            filter.apply(&mut buffer, coefficients);
            if i >= 100 {
                peak = peak.max(buffer[0].abs());
            }
        }

        assert!(peak < 0x1000, "peak was {peak:#X}");
    }

    #[test]
    fn second_order_clamps() {
        let coefficients = SecondOrderCoefficients::compute(3.526, 0.132, 0.606);
        let mut filter = SecondOrderLowPass::<2>::new();

        for _ in 0..100 {
            let mut buffer = [0x7FFF, -0x7FFF];
            filter.apply(&mut buffer, coefficients);
            assert!(buffer[0] >= -0x7FFF);
            assert!(buffer[1] >= -0x7FFF);
        }
    }

    #[test]
    fn stereo_channels_are_independent() {
        let coefficients = FirstOrderCoefficients::compute(6.910, 4.910);
        let mut filter = FirstOrderLowPass::<2>::new();

        for _ in 0..100 {
            let mut buffer = [0x2000, 0];
            filter.apply(&mut buffer, coefficients);
            assert_eq!(buffer[1], 0);
        }
    }
}
