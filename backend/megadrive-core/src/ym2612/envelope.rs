//! YM2612 envelope generator: four-phase ADSR over a 10-bit attenuation scale, with
//! key scaling and the SSG-EG looping modes.

use crate::ym2612::phase::PhaseGenerator;
use bincode::{Decode, Encode};
use mdemu_common::num::GetBit;
use std::cmp;

// The envelope advances once per three samples
const ENVELOPE_DIVIDER: u8 = 3;

// Attenuation is 10 bits (0 = full volume, 0x3FF = silent)
pub(super) const MAX_ATTENUATION: u16 = 0x3FF;

// SSG-EG inversion pivots around this level
const SSG_THRESHOLD: u16 = 0x200;

// Attenuation increments per update, indexed by effective rate and update cycle
#[rustfmt::skip]
const ATTENUATION_INCREMENTS: [[u16; 8]; 64] = [
    [0,0,0,0,0,0,0,0], [0,0,0,0,0,0,0,0], [0,1,0,1,0,1,0,1], [0,1,0,1,0,1,0,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,0,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,0,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [0,1,0,1,0,1,0,1], [0,1,0,1,1,1,0,1], [0,1,1,1,0,1,1,1], [0,1,1,1,1,1,1,1],
    [1,1,1,1,1,1,1,1], [1,1,1,2,1,1,1,2], [1,2,1,2,1,2,1,2], [1,2,2,2,1,2,2,2],
    [2,2,2,2,2,2,2,2], [2,2,2,4,2,2,2,4], [2,4,2,4,2,4,2,4], [2,4,4,4,2,4,4,4],
    [4,4,4,4,4,4,4,4], [4,4,4,8,4,4,4,8], [4,8,4,8,4,8,4,8], [4,8,8,8,4,8,8,8],
    [8,8,8,8,8,8,8,8], [8,8,8,8,8,8,8,8], [8,8,8,8,8,8,8,8], [8,8,8,8,8,8,8,8],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum EnvelopeMode {
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(super) struct EnvelopeGenerator {
    pub(super) attack_rate: u8,
    pub(super) decay_rate: u8,
    pub(super) sustain_rate: u8,
    pub(super) release_rate: u8,
    pub(super) total_level: u8,
    pub(super) sustain_level: u8,
    pub(super) key_scale: u8,
    mode: EnvelopeMode,
    attenuation: u16,
    key_scale_rate: u8,
    cycle_count: u16,
    divider: u8,
    ssg_enabled: bool,
    ssg_attack: bool,
    ssg_alternate: bool,
    ssg_hold: bool,
    ssg_inverted: bool,
}

impl EnvelopeGenerator {
    pub(super) fn new() -> Self {
        Self {
            attack_rate: 0,
            decay_rate: 0,
            sustain_rate: 0,
            release_rate: 0,
            total_level: 0,
            sustain_level: 0,
            key_scale: 0,
            mode: EnvelopeMode::Release,
            attenuation: MAX_ATTENUATION,
            key_scale_rate: 0,
            cycle_count: 1,
            divider: ENVELOPE_DIVIDER,
            ssg_enabled: false,
            ssg_attack: false,
            ssg_alternate: false,
            ssg_hold: false,
            ssg_inverted: false,
        }
    }

    #[inline]
    pub(super) fn clock(&mut self, phase: &mut PhaseGenerator) {
        if self.ssg_enabled {
            self.ssg_clock(phase);
        }

        self.divider -= 1;
        if self.divider == 0 {
            self.divider = ENVELOPE_DIVIDER;
            self.envelope_clock();
        }
    }

    fn envelope_clock(&mut self) {
        // The cycle counter is 12 bits and skips 0 on wrap
        self.cycle_count += 1;
        self.cycle_count = (self.cycle_count & 0xFFF) + (self.cycle_count >> 12);

        // Sustain level is in steps of 32, with 15 special-cased to the maximum
        let sustain_level = match self.sustain_level {
            15 => (MAX_ATTENUATION >> 5) << 5,
            level => u16::from(level) << 5,
        };

        if self.mode == EnvelopeMode::Attack && self.attenuation == 0 {
            self.mode = EnvelopeMode::Decay;
        }

        if self.mode == EnvelopeMode::Decay && self.attenuation >= sustain_level {
            self.mode = EnvelopeMode::Sustain;
        }

        let r = match self.mode {
            EnvelopeMode::Attack => self.attack_rate,
            EnvelopeMode::Decay => self.decay_rate,
            EnvelopeMode::Sustain => self.sustain_rate,
            // The 4-bit release rate behaves as a 5-bit rate with the low bit set
            EnvelopeMode::Release => (self.release_rate << 1) | 1,
        };

        let rate = if r == 0 { 0 } else { cmp::min(63, 2 * r + self.key_scale_rate) };

        let update_shift = 11_u8.saturating_sub(rate >> 2);
        if self.cycle_count & ((1 << update_shift) - 1) != 0 {
            return;
        }

        let increment_index = (self.cycle_count >> update_shift) & 7;
        let increment = ATTENUATION_INCREMENTS[rate as usize][increment_index as usize];

        match self.mode {
            EnvelopeMode::Attack => {
                // Rates 62-63 do nothing here; key-on skips the attack phase for them
                if rate <= 61 {
                    self.attenuation = self
                        .attenuation
                        .wrapping_add((!self.attenuation).wrapping_mul(increment) >> 4)
                        & MAX_ATTENUATION;
                }
            }
            EnvelopeMode::Decay | EnvelopeMode::Sustain | EnvelopeMode::Release => {
                if self.ssg_enabled {
                    // SSG-EG quadruples the decay speed while below the inversion
                    // threshold
                    if self.attenuation < SSG_THRESHOLD {
                        self.attenuation =
                            cmp::min(MAX_ATTENUATION, self.attenuation + 4 * increment);
                    }
                } else {
                    self.attenuation = cmp::min(MAX_ATTENUATION, self.attenuation + increment);
                }
            }
        }
    }

    fn ssg_clock(&mut self, phase: &mut PhaseGenerator) {
        if self.attenuation < SSG_THRESHOLD {
            return;
        }

        if self.ssg_alternate {
            if self.ssg_hold {
                self.ssg_inverted = true;
            } else {
                self.ssg_inverted = !self.ssg_inverted;
            }
        }

        if !self.ssg_alternate && !self.ssg_hold {
            // Looping without alternation restarts the waveform each pass
            phase.reset();
        }

        if matches!(self.mode, EnvelopeMode::Decay | EnvelopeMode::Sustain) && !self.ssg_hold {
            // Start another attack-decay-sustain pass
            if 2 * self.attack_rate + self.key_scale_rate >= 62 {
                self.attenuation = 0;
                self.mode = EnvelopeMode::Decay;
            } else {
                self.mode = EnvelopeMode::Attack;
            }
        } else if self.mode == EnvelopeMode::Release
            || (self.mode != EnvelopeMode::Attack && self.ssg_inverted == self.ssg_attack)
        {
            self.attenuation = MAX_ATTENUATION;
        }
    }

    pub(super) fn is_key_on(&self) -> bool {
        self.mode != EnvelopeMode::Release
    }

    pub(super) fn key_on(&mut self) {
        if self.is_key_on() {
            return;
        }

        let rate = 2 * self.attack_rate + self.key_scale_rate;
        if rate >= 62 {
            self.mode = EnvelopeMode::Decay;
            self.attenuation = 0;
        } else {
            self.mode = EnvelopeMode::Attack;
        }

        self.ssg_inverted = false;
    }

    pub(super) fn key_off(&mut self) {
        if self.ssg_enabled && self.is_key_on() && self.ssg_inverted != self.ssg_attack {
            // Keying off while inverted bakes the inversion into the stored level
            self.attenuation = SSG_THRESHOLD.wrapping_sub(self.attenuation) & MAX_ATTENUATION;
        }

        self.mode = EnvelopeMode::Release;
    }

    pub(super) fn update_key_scale_rate(&mut self, key_code: u8) {
        self.key_scale_rate = key_code >> (3 - self.key_scale);
    }

    /// Current attenuation including total level, on the 10-bit scale.
    pub(super) fn current_attenuation(&self) -> u16 {
        let attenuation = if self.ssg_enabled
            && self.is_key_on()
            && self.ssg_inverted != self.ssg_attack
        {
            SSG_THRESHOLD.wrapping_sub(self.attenuation) & MAX_ATTENUATION
        } else {
            self.attenuation
        };

        let total_level = u16::from(self.total_level) << 3;
        cmp::min(MAX_ATTENUATION, attenuation + total_level)
    }

    pub(super) fn write_ssg_register(&mut self, value: u8) {
        self.ssg_enabled = value.bit(3);
        self.ssg_attack = value.bit(2);
        self.ssg_alternate = value.bit(1);
        self.ssg_hold = value.bit(0);
    }
}

impl Default for EnvelopeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_n(envelope: &mut EnvelopeGenerator, phase: &mut PhaseGenerator, n: u32) {
        for _ in 0..n {
            envelope.clock(phase);
        }
    }

    #[test]
    fn key_on_reaches_full_volume() {
        let mut envelope = EnvelopeGenerator::new();
        let mut phase = PhaseGenerator::new();
        envelope.attack_rate = 31;
        envelope.decay_rate = 0;

        assert_eq!(envelope.current_attenuation(), MAX_ATTENUATION);

        envelope.key_on();
        assert!(envelope.is_key_on());

        clock_n(&mut envelope, &mut phase, 60);
        assert_eq!(envelope.current_attenuation(), 0);
    }

    #[test]
    fn fast_attack_skips_straight_to_decay() {
        let mut envelope = EnvelopeGenerator::new();
        envelope.attack_rate = 31;
        envelope.key_scale_rate = 3;

        envelope.key_on();
        assert_eq!(envelope.mode, EnvelopeMode::Decay);
        assert_eq!(envelope.attenuation, 0);
    }

    #[test]
    fn release_decays_to_silence() {
        let mut envelope = EnvelopeGenerator::new();
        let mut phase = PhaseGenerator::new();
        envelope.attack_rate = 31;
        envelope.release_rate = 15;

        envelope.key_on();
        clock_n(&mut envelope, &mut phase, 60);
        envelope.key_off();
        assert!(!envelope.is_key_on());

        clock_n(&mut envelope, &mut phase, 2000);
        assert_eq!(envelope.current_attenuation(), MAX_ATTENUATION);
    }

    #[test]
    fn total_level_floors_the_output() {
        let mut envelope = EnvelopeGenerator::new();
        let mut phase = PhaseGenerator::new();
        envelope.attack_rate = 31;
        envelope.total_level = 0x10;

        envelope.key_on();
        clock_n(&mut envelope, &mut phase, 60);
        assert_eq!(envelope.current_attenuation(), 0x10 << 3);
    }
}
