//! YM2612 FM synthesis chip: six 4-operator channels plus the channel-6 DAC,
//! producing one stereo sample per 24 M68K clocks (≈ 53267 Hz).

mod envelope;
mod lfo;
mod phase;
mod timer;

use crate::timing::FM_SAMPLE_DIVIDER;
use crate::ym2612::envelope::EnvelopeGenerator;
use crate::ym2612::lfo::LowFrequencyOscillator;
use crate::ym2612::phase::PhaseGenerator;
use crate::ym2612::timer::{FmTimer, timer_a_reload, timer_b_reload};
use bincode::{Decode, Encode};
use mdemu_common::num::GetBit;
use std::array;
use std::sync::LazyLock;

// Channel samples are 9-bit signed
const CHANNEL_SAMPLE_MIN: i16 = -0x100;
const CHANNEL_SAMPLE_MAX: i16 = 0xFF;

// The final mix divides each channel's 16-bit-scaled sample by this so that six
// channels sum without immediately clipping
const VOLUME_DIVISOR: i16 = 4;

// A register write holds the BUSY flag for 32 internal cycles (= 192 M68K cycles)
const BUSY_M68K_CYCLES: u32 = 32 * 6;

// The half-sine attenuation table: 512 entries of 4.8 fixed-point log2 attenuation
static LOG_SINE_TABLE: LazyLock<[u16; 512]> = LazyLock::new(|| {
    array::from_fn(|mut i| {
        use std::f64::consts::PI;

        if i.bit(8) {
            // Second quarter mirrors the first
            i = (!i) & 0xFF;
        }

        // Offset by half a step to avoid log2(0)
        let n = ((i << 1) | 1) as f64;
        let sine = (n / 512.0 * PI / 2.0).sin();

        (-sine.log2() * f64::from(1 << 8)).round() as u16
    })
});

// 2^(-n) for n in (0, 1], as 0.11 fixed-point
static POW_2_TABLE: LazyLock<[u16; 256]> = LazyLock::new(|| {
    array::from_fn(|i| {
        let n = ((i + 1) as f64) / 256.0;
        (2.0_f64.powf(-n) * f64::from(1 << 11)).round() as u16
    })
});

// Converts a 4.8 log2 attenuation into a 14-bit magnitude
fn attenuation_to_amplitude(attenuation: u16) -> u16 {
    let int_part = (attenuation >> 8) & 0x1F;
    if int_part >= 13 {
        return 0;
    }

    let fract_pow_2 = POW_2_TABLE[(attenuation & 0xFF) as usize];
    (fract_pow_2 << 2) >> int_part
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct FmOperator {
    phase: PhaseGenerator,
    envelope: EnvelopeGenerator,
    am_enabled: bool,
}

impl FmOperator {
    fn key_on_or_off(&mut self, key_on: bool) {
        if key_on {
            if !self.envelope.is_key_on() {
                self.phase.reset();
                self.envelope.key_on();
            }
        } else {
            self.envelope.key_off();
        }
    }

    /// Produce this operator's 14-bit signed sample. `phase_modulation` is the raw
    /// 14-bit output of the modulating operator(s) (or the feedback value).
    fn process(&self, phase_modulation: i32, lfo_am: u8, am_shift: u8) -> i16 {
        let phase =
            self.phase.current_phase().wrapping_add((phase_modulation >> 1) as u16) & 0x3FF;

        // Hardware splits the 10-bit phase into a sign bit and a half-phase
        let sign = phase.bit(9);
        let sine_attenuation = LOG_SINE_TABLE[(phase & 0x1FF) as usize];

        let mut envelope_attenuation = self.envelope.current_attenuation();
        if self.am_enabled {
            envelope_attenuation = (envelope_attenuation + u16::from(lfo_am >> am_shift))
                .min(envelope::MAX_ATTENUATION);
        }

        // Sine attenuation is 4.8 fixed-point; envelope attenuation is 4.6
        let total_attenuation = sine_attenuation + (envelope_attenuation << 2);

        let amplitude = attenuation_to_amplitude(total_attenuation) as i16;
        if sign { -amplitude } else { amplitude }
    }
}

fn to_9_bit(sample_14_bit: i16) -> i16 {
    sample_14_bit >> 5
}

fn mix_9_bit(a: i16, b: i16) -> i16 {
    (a + b).clamp(CHANNEL_SAMPLE_MIN, CHANNEL_SAMPLE_MAX)
}

#[derive(Debug, Clone, Encode, Decode)]
struct FmChannel {
    operators: [FmOperator; 4],
    algorithm: u8,
    feedback: u8,
    pan_left: bool,
    pan_right: bool,
    am_shift: u8,
    pm_sensitivity: u8,
    f_number_and_block: u16,
    pending_frequency_high: u8,
    operator_1_previous_samples: [i16; 2],
}

impl FmChannel {
    fn new() -> Self {
        Self {
            operators: array::from_fn(|_| FmOperator::default()),
            algorithm: 0,
            feedback: 0,
            pan_left: true,
            pan_right: true,
            am_shift: 7,
            pm_sensitivity: 0,
            f_number_and_block: 0,
            pending_frequency_high: 0,
            operator_1_previous_samples: [0; 2],
        }
    }

    fn set_phase_modulation(&mut self, phase_modulation: u8) {
        for operator in &mut self.operators {
            operator.phase.set_modulation(phase_modulation, self.pm_sensitivity);
        }
    }

    fn set_operator_frequency(&mut self, operator: usize, phase_modulation: u8, value: u16) {
        let op = &mut self.operators[operator];
        op.phase.set_frequency(phase_modulation, self.pm_sensitivity, value);
        op.envelope.update_key_scale_rate(op.phase.key_code());
    }

    #[inline]
    fn clock_operators(&mut self) {
        for operator in &mut self.operators {
            operator.phase.clock();
        }
        for operator in &mut self.operators {
            let FmOperator { phase, envelope, .. } = operator;
            envelope.clock(phase);
        }
    }

    /// Run the operator DAG for this channel's algorithm; returns a 9-bit signed
    /// sample.
    fn generate_sample(&mut self, lfo_am: u8) -> i16 {
        let am_shift = self.am_shift;

        let feedback = if self.feedback == 0 {
            0
        } else {
            // Two-sample moving average of operator 1, shifted by the feedback level
            (i32::from(self.operator_1_previous_samples[0])
                + i32::from(self.operator_1_previous_samples[1]))
                >> (9 - self.feedback)
        };

        let process =
            |op: &FmOperator, modulation: i32| op.process(modulation, lfo_am, am_shift);

        let [op1, op2, op3, op4] = &self.operators;
        let op1_sample = process(op1, feedback);

        let sample = match self.algorithm {
            0 => {
                // O1 -> O2 -> O3 -> O4
                let op2_sample = process(op2, op1_sample.into());
                let op3_sample = process(op3, op2_sample.into());
                to_9_bit(process(op4, op3_sample.into()))
            }
            1 => {
                // (O1 + O2) -> O3 -> O4
                let op2_sample = process(op2, 0);
                let op3_sample = process(op3, i32::from(op1_sample) + i32::from(op2_sample));
                to_9_bit(process(op4, op3_sample.into()))
            }
            2 => {
                // (O1 + (O2 -> O3)) -> O4
                let op2_sample = process(op2, 0);
                let op3_sample = process(op3, op2_sample.into());
                to_9_bit(process(op4, i32::from(op1_sample) + i32::from(op3_sample)))
            }
            3 => {
                // ((O1 -> O2) + O3) -> O4
                let op2_sample = process(op2, op1_sample.into());
                let op3_sample = process(op3, 0);
                to_9_bit(process(op4, i32::from(op2_sample) + i32::from(op3_sample)))
            }
            4 => {
                // (O1 -> O2) + (O3 -> O4)
                let op2_sample = process(op2, op1_sample.into());
                let op3_sample = process(op3, 0);
                let op4_sample = process(op4, op3_sample.into());
                mix_9_bit(to_9_bit(op2_sample), to_9_bit(op4_sample))
            }
            5 => {
                // O1 -> each of O2, O3, O4
                let op2_sample = process(op2, op1_sample.into());
                let op3_sample = process(op3, op1_sample.into());
                let op4_sample = process(op4, op1_sample.into());
                mix_9_bit(
                    mix_9_bit(to_9_bit(op2_sample), to_9_bit(op3_sample)),
                    to_9_bit(op4_sample),
                )
            }
            6 => {
                // (O1 -> O2) + O3 + O4
                let op2_sample = process(op2, op1_sample.into());
                let op3_sample = process(op3, 0);
                let op4_sample = process(op4, 0);
                mix_9_bit(
                    mix_9_bit(to_9_bit(op2_sample), to_9_bit(op3_sample)),
                    to_9_bit(op4_sample),
                )
            }
            7 => {
                // All four in parallel
                let op2_sample = process(op2, 0);
                let op3_sample = process(op3, 0);
                let op4_sample = process(op4, 0);
                mix_9_bit(
                    mix_9_bit(
                        mix_9_bit(to_9_bit(op1_sample), to_9_bit(op2_sample)),
                        to_9_bit(op3_sample),
                    ),
                    to_9_bit(op4_sample),
                )
            }
            _ => unreachable!("algorithm is masked to 3 bits"),
        };

        self.operator_1_previous_samples[1] = self.operator_1_previous_samples[0];
        self.operator_1_previous_samples[0] = op1_sample;

        sample
    }
}

impl Default for FmChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum FrequencyMode {
    #[default]
    Single,
    /// Channel 3's per-operator frequency mode
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum RegisterGroup {
    /// Global registers and channels 1-3
    #[default]
    One,
    /// Channels 4-6
    Two,
}

const GROUP_1_BASE_CHANNEL: usize = 0;
const GROUP_2_BASE_CHANNEL: usize = 3;

// Channel 3's supplementary frequency registers map to operators out of order
const CHANNEL_3_OPERATOR_ORDER: [usize; 3] = [2, 0, 1];

#[derive(Debug, Clone, Encode, Decode)]
pub struct Fm {
    channels: [FmChannel; 6],
    channel_3_mode: FrequencyMode,
    channel_3_operator_f_numbers: [u16; 3],
    channel_3_pending_highs: [u8; 3],
    csm_enabled: bool,
    lfo: LowFrequencyOscillator,
    timer_a: FmTimer,
    timer_b: FmTimer,
    raw_timer_a_value: u16,
    /// Unsigned 9-bit DAC sample; 0x100 is silence.
    dac_sample: u16,
    dac_enabled: bool,
    dac_test: bool,
    ladder_effect_enabled: bool,
    selected_register: u8,
    selected_group: RegisterGroup,
    status: u8,
    busy_cycles_remaining: u32,
    leftover_cycles: u32,
}

impl Fm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: array::from_fn(|_| FmChannel::default()),
            channel_3_mode: FrequencyMode::default(),
            channel_3_operator_f_numbers: [0; 3],
            channel_3_pending_highs: [0; 3],
            csm_enabled: false,
            lfo: LowFrequencyOscillator::new(),
            timer_a: FmTimer::new(timer_a_reload(0)),
            timer_b: FmTimer::new(timer_b_reload(0)),
            raw_timer_a_value: 0,
            dac_sample: 0x100,
            dac_enabled: false,
            dac_test: false,
            ladder_effect_enabled: true,
            selected_register: 0,
            selected_group: RegisterGroup::default(),
            status: 0,
            busy_cycles_remaining: 0,
            leftover_cycles: 0,
        }
    }

    /// Reset to power-on state (the Z80 reset line also resets the FM chip).
    pub fn reset(&mut self) {
        let ladder = self.ladder_effect_enabled;
        *self = Self::new();
        self.ladder_effect_enabled = ladder;
    }

    pub fn set_ladder_effect_enabled(&mut self, enabled: bool) {
        self.ladder_effect_enabled = enabled;
    }

    pub fn write_address_1(&mut self, value: u8) {
        self.selected_register = value;
        self.selected_group = RegisterGroup::One;
    }

    pub fn write_address_2(&mut self, value: u8) {
        self.selected_register = value;
        self.selected_group = RegisterGroup::Two;
    }

    /// The status register: BUSY in bit 7, timer B/A expired flags in bits 1/0.
    #[must_use]
    pub fn read_status(&self) -> u8 {
        self.status | (u8::from(self.busy_cycles_remaining != 0) << 7)
    }

    pub fn write_data(&mut self, value: u8) {
        self.busy_cycles_remaining = BUSY_M68K_CYCLES;

        match self.selected_group {
            RegisterGroup::One => self.write_group_1_register(value),
            RegisterGroup::Two => self.write_group_2_register(value),
        }
    }

    fn write_group_1_register(&mut self, value: u8) {
        let register = self.selected_register;
        match register {
            0x22 => {
                if self.lfo.set_enabled(value.bit(3)) {
                    self.propagate_phase_modulation();
                }
                self.lfo.frequency = value & 0x07;

                log::trace!("LFO: enabled {}, frequency {}", value.bit(3), value & 7);
            }
            0x24 => {
                self.raw_timer_a_value = (self.raw_timer_a_value & 3) | (u16::from(value) << 2);
                self.timer_a.reload = timer_a_reload(self.raw_timer_a_value);
            }
            0x25 => {
                self.raw_timer_a_value = (self.raw_timer_a_value & !3) | u16::from(value & 3);
                self.timer_a.reload = timer_a_reload(self.raw_timer_a_value);
            }
            0x26 => {
                self.timer_b.reload = timer_b_reload(value);
            }
            0x27 => {
                self.channel_3_mode =
                    if value & 0xC0 != 0 { FrequencyMode::Multiple } else { FrequencyMode::Single };
                self.csm_enabled = value & 0xC0 == 0x80;
                self.apply_channel_frequencies(2);

                self.timer_a.set_control(value.bit(0), value.bit(2));
                self.timer_b.set_control(value.bit(1), value.bit(3));

                if value.bit(4) {
                    self.status &= !0x01;
                }
                if value.bit(5) {
                    self.status &= !0x02;
                }

                log::trace!(
                    "Channel 3 mode {:?}, CSM {}, timer control {:02X}",
                    self.channel_3_mode,
                    self.csm_enabled,
                    value & 0x3F
                );
            }
            0x28 => {
                let base =
                    if value.bit(2) { GROUP_2_BASE_CHANNEL } else { GROUP_1_BASE_CHANNEL };
                let offset = (value & 3) as usize;
                if offset < 3 {
                    let channel = &mut self.channels[base + offset];
                    for (i, operator) in channel.operators.iter_mut().enumerate() {
                        operator.key_on_or_off(value.bit(4 + i as u8));
                    }

                    log::trace!("Key on/off channel {}: {:X}", base + offset + 1, value >> 4);
                }
            }
            0x2A => {
                self.dac_sample = (self.dac_sample & 1) | (u16::from(value) << 1);
            }
            0x2B => {
                self.dac_enabled = value.bit(7);
                log::trace!("DAC enabled: {}", self.dac_enabled);
            }
            0x2C => {
                // Test register: the 9th DAC bit plus the "DAC on all slots" bit
                self.dac_sample = (self.dac_sample & !1) | u16::from(value.bit(3));
                self.dac_test = value.bit(5);
            }
            0x30..=0x9F => {
                self.write_operator_register(register, value, GROUP_1_BASE_CHANNEL);
            }
            0xA0..=0xBF => {
                self.write_channel_register(register, value, GROUP_1_BASE_CHANNEL);
            }
            _ => {}
        }
    }

    fn write_group_2_register(&mut self, value: u8) {
        let register = self.selected_register;
        match register {
            0x30..=0x9F => {
                self.write_operator_register(register, value, GROUP_2_BASE_CHANNEL);
            }
            0xA0..=0xBF => {
                self.write_channel_register(register, value, GROUP_2_BASE_CHANNEL);
            }
            _ => {}
        }
    }

    fn write_operator_register(&mut self, register: u8, value: u8, base_channel: usize) {
        let channel_offset = (register & 3) as usize;
        if channel_offset == 3 {
            return;
        }

        let channel_idx = base_channel + channel_offset;
        // Bits 2-3 select the operator, with the middle two swapped
        let operator_idx = (((register & 8) >> 3) | ((register & 4) >> 1)) as usize;

        let phase_modulation = self.lfo.phase_modulation();
        let channel = &mut self.channels[channel_idx];
        let pm_sensitivity = channel.pm_sensitivity;
        let operator = &mut channel.operators[operator_idx];

        match register >> 4 {
            0x3 => {
                operator.phase.set_detune_and_multiplier(
                    phase_modulation,
                    pm_sensitivity,
                    (value >> 4) & 7,
                    value & 0x0F,
                );
            }
            0x4 => {
                operator.envelope.total_level = value & 0x7F;
            }
            0x5 => {
                operator.envelope.attack_rate = value & 0x1F;
                operator.envelope.key_scale = value >> 6;
                operator.envelope.update_key_scale_rate(operator.phase.key_code());
            }
            0x6 => {
                operator.envelope.decay_rate = value & 0x1F;
                operator.am_enabled = value.bit(7);
            }
            0x7 => {
                operator.envelope.sustain_rate = value & 0x1F;
            }
            0x8 => {
                operator.envelope.release_rate = value & 0x0F;
                operator.envelope.sustain_level = value >> 4;
            }
            0x9 => {
                operator.envelope.write_ssg_register(value);
            }
            _ => unreachable!("register is in 0x30..=0x9F"),
        }
    }

    fn write_channel_register(&mut self, register: u8, value: u8, base_channel: usize) {
        match register {
            0xA0..=0xA2 => {
                let channel_idx = base_channel + (register & 3) as usize;
                let channel = &mut self.channels[channel_idx];
                channel.f_number_and_block =
                    u16::from_be_bytes([channel.pending_frequency_high, value]);

                self.apply_channel_frequencies(channel_idx);

                log::trace!(
                    "Channel {} frequency: {:04X}",
                    channel_idx + 1,
                    self.channels[channel_idx].f_number_and_block
                );
            }
            0xA4..=0xA6 => {
                // Latched; takes effect when the low byte is written
                let channel_idx = base_channel + (register & 3) as usize;
                self.channels[channel_idx].pending_frequency_high = value & 0x3F;
            }
            0xA8..=0xAA => {
                // Channel 3 supplementary frequency, low byte
                let slot = CHANNEL_3_OPERATOR_ORDER[(register - 0xA8) as usize];
                self.channel_3_operator_f_numbers[slot] =
                    u16::from_be_bytes([self.channel_3_pending_highs[slot], value]);

                if self.channel_3_mode == FrequencyMode::Multiple {
                    self.apply_channel_frequencies(2);
                }
            }
            0xAC..=0xAE => {
                let slot = CHANNEL_3_OPERATOR_ORDER[(register - 0xAC) as usize];
                self.channel_3_pending_highs[slot] = value & 0x3F;
            }
            0xB0..=0xB2 => {
                let channel = &mut self.channels[base_channel + (register & 3) as usize];
                channel.algorithm = value & 0x07;
                channel.feedback = (value >> 3) & 0x07;
            }
            0xB4..=0xB6 => {
                let phase_modulation = self.lfo.phase_modulation();
                let channel = &mut self.channels[base_channel + (register & 3) as usize];
                channel.pan_left = value.bit(7);
                channel.pan_right = value.bit(6);
                channel.am_shift = 7 >> ((value >> 4) & 3);
                channel.pm_sensitivity = value & 0x07;
                channel.set_phase_modulation(phase_modulation);
            }
            _ => {}
        }
    }

    /// Push (possibly channel-3 per-operator) frequencies into the phase generators.
    fn apply_channel_frequencies(&mut self, channel_idx: usize) {
        let phase_modulation = self.lfo.phase_modulation();

        if channel_idx == 2 && self.channel_3_mode == FrequencyMode::Multiple {
            let frequencies = self.channel_3_operator_f_numbers;
            let channel_frequency = self.channels[2].f_number_and_block;
            let channel = &mut self.channels[2];

            for (operator, &frequency) in frequencies.iter().enumerate() {
                channel.set_operator_frequency(operator, phase_modulation, frequency);
            }
            channel.set_operator_frequency(3, phase_modulation, channel_frequency);
        } else {
            let channel = &mut self.channels[channel_idx];
            let frequency = channel.f_number_and_block;
            for operator in 0..4 {
                channel.set_operator_frequency(operator, phase_modulation, frequency);
            }
        }
    }

    fn propagate_phase_modulation(&mut self) {
        let phase_modulation = self.lfo.phase_modulation();
        for channel in &mut self.channels {
            channel.set_phase_modulation(phase_modulation);
        }
    }

    /// Advance by `m68k_cycles`; returns how many FM samples are now due. The caller
    /// routes that through the frontend's audio callback into [`Self::output_samples`].
    pub fn update(&mut self, m68k_cycles: u32) -> u32 {
        let total = self.leftover_cycles + m68k_cycles;
        self.leftover_cycles = total % FM_SAMPLE_DIVIDER;

        self.busy_cycles_remaining = self.busy_cycles_remaining.saturating_sub(m68k_cycles);

        total / FM_SAMPLE_DIVIDER
    }

    fn final_sample(&self, mut sample: i16, enabled: bool) -> i16 {
        // Crossover distortion of the real DAC: non-positive samples sit one ladder
        // step below the positive ones
        let offset = if !self.ladder_effect_enabled {
            0
        } else if sample < 0 {
            sample += 1;
            -4
        } else {
            4
        };

        if !enabled {
            sample = 0;
        }

        if self.dac_test {
            // The DAC sample is output on all four time slots
            sample = (sample * 4).clamp(-0xFF, 0xFF);
        } else {
            sample += offset;
        }

        // Scale the 9-bit sample to 16 bits, divided down for headroom
        sample * (1 << (16 - 9)) / VOLUME_DIVISOR
    }

    /// Generate interleaved stereo samples, accumulating into `buffer`
    /// (`buffer.len() / 2` frames).
    pub fn output_samples(&mut self, buffer: &mut [i16]) {
        let dac_sample = self.dac_sample as i16 - 0x100;

        for frame in buffer.chunks_exact_mut(2) {
            if self.lfo.advance() {
                self.propagate_phase_modulation();
            }
            let lfo_am = self.lfo.amplitude_modulation();

            for channel_idx in 0..6 {
                let channel = &mut self.channels[channel_idx];
                channel.clock_operators();
                let fm_sample = channel.generate_sample(lfo_am);

                let is_dac = (channel_idx == 5 && self.dac_enabled) || self.dac_test;
                let sample = if is_dac { dac_sample } else { fm_sample };

                let (pan_left, pan_right) =
                    (self.channels[channel_idx].pan_left, self.channels[channel_idx].pan_right);
                frame[0] = frame[0].saturating_add(self.final_sample(sample, pan_left));
                frame[1] = frame[1].saturating_add(self.final_sample(sample, pan_right));
            }

            if self.timer_a.tick() {
                if self.timer_a.flag_enabled {
                    self.status |= 0x01;
                }

                if self.csm_enabled {
                    // CSM: key on & off every channel-3 operator that isn't already
                    // keyed on
                    for operator in &mut self.channels[2].operators {
                        if !operator.envelope.is_key_on() {
                            operator.key_on_or_off(true);
                            operator.key_on_or_off(false);
                        }
                    }
                }
            }

            if self.timer_b.tick() && self.timer_b.flag_enabled {
                self.status |= 0x02;
            }
        }
    }
}

impl Default for Fm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_register(fm: &mut Fm, register: u8, value: u8) {
        fm.write_address_1(register);
        fm.write_data(value);
    }

    #[test]
    fn timer_a_counter_reloads_on_enable_edge() {
        let mut fm = Fm::new();

        write_register(&mut fm, 0x24, 0x3F); // high 8 bits
        write_register(&mut fm, 0x25, 0x02); // low 2 bits
        let raw: u32 = (0x3F << 2) | 0x02;
        assert_eq!(fm.timer_a.reload, 0x400 - raw);

        write_register(&mut fm, 0x27, 0x01);
        assert_eq!(fm.timer_a.counter(), 0x400 - raw);
    }

    #[test]
    fn timer_expiry_sets_and_clears_status_flags() {
        let mut fm = Fm::new();

        // Timer A interval 0x3FF -> expires every sample; load + flag-enable
        write_register(&mut fm, 0x24, 0xFF);
        write_register(&mut fm, 0x25, 0x03);
        write_register(&mut fm, 0x27, 0x05);

        let mut buffer = [0; 8];
        fm.output_samples(&mut buffer);
        assert_eq!(fm.read_status() & 0x03, 0x01);

        // Reset bit clears the flag
        write_register(&mut fm, 0x27, 0x15);
        assert_eq!(fm.read_status() & 0x03, 0x00);
    }

    #[test]
    fn busy_flag_decays_after_a_write() {
        let mut fm = Fm::new();
        assert_eq!(fm.read_status() & 0x80, 0);

        write_register(&mut fm, 0x30, 0x01);
        assert_eq!(fm.read_status() & 0x80, 0x80);

        fm.update(BUSY_M68K_CYCLES);
        assert_eq!(fm.read_status() & 0x80, 0);
    }

    #[test]
    fn silent_chip_outputs_ladder_bias() {
        let mut fm = Fm::new();

        let mut buffer = [0; 2];
        fm.output_samples(&mut buffer);

        // Every channel contributes the +4 ladder offset: 6 * 4 * 128 / 4
        let expected = 6 * (4 << 7) / VOLUME_DIVISOR;
        assert_eq!(buffer, [expected; 2]);

        // With the ladder effect off, silence is silent
        let mut fm = Fm::new();
        fm.set_ladder_effect_enabled(false);
        let mut buffer = [0; 2];
        fm.output_samples(&mut buffer);
        assert_eq!(buffer, [0; 2]);
    }

    #[test]
    fn dac_replaces_channel_6() {
        let mut fm = Fm::new();
        fm.set_ladder_effect_enabled(false);

        write_register(&mut fm, 0x2B, 0x80); // DAC enable
        write_register(&mut fm, 0x2A, 0xFF); // loudest positive sample

        let mut buffer = [0; 2];
        fm.output_samples(&mut buffer);

        // Channels 1-5 are keyed off (zero); channel 6 outputs the DAC level
        let dac = (0xFF_u16 << 1) as i16 - 0x100;
        let expected = dac * (1 << 7) / VOLUME_DIVISOR;
        assert_eq!(buffer, [expected; 2]);
    }

    #[test]
    fn keyed_on_channel_produces_a_waveform() {
        let mut fm = Fm::new();
        fm.set_ladder_effect_enabled(false);

        // Channel 1: algorithm 7, operator 1 audible with a fast attack
        write_register(&mut fm, 0xB0, 0x07);
        write_register(&mut fm, 0x30, 0x01); // detune 0, multiplier 1
        write_register(&mut fm, 0x40, 0x00); // total level 0
        write_register(&mut fm, 0x50, 0x1F); // attack rate 31
        write_register(&mut fm, 0xA4, 0x22); // block 4
        write_register(&mut fm, 0xA0, 0x69);
        write_register(&mut fm, 0x28, 0xF0); // key on all operators of channel 1

        let mut buffer = [0; 2048];
        fm.output_samples(&mut buffer);

        let peak = buffer.iter().copied().map(i16::abs).max().unwrap();
        assert!(peak > 0x100, "FM output too quiet: peak {peak}");

        // Both a positive and a negative half-wave appear
        assert!(buffer.iter().any(|&s| s > 0));
        assert!(buffer.iter().any(|&s| s < 0));
    }

    #[test]
    fn dac_test_broadcasts_to_all_slots() {
        let mut fm = Fm::new();

        write_register(&mut fm, 0x2A, 0x90);
        write_register(&mut fm, 0x2C, 0x20); // DAC test bit

        // All six channels output the 4x-amplified DAC sample
        let dac = (0x90_u16 << 1) as i16 - 0x100;
        let expected = 6 * ((dac * 4).clamp(-0xFF, 0xFF) * (1 << 7) / VOLUME_DIVISOR);

        let mut buffer = [0; 2];
        fm.output_samples(&mut buffer);
        assert_eq!(buffer, [expected; 2]);
    }
}
