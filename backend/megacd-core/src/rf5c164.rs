//! Ricoh RF5C164 PCM chip: eight wavetable channels over 64 KiB of wave RAM, one
//! stereo sample per 0x180 Sub-CPU clocks (≈ 32552 Hz).

use bincode::{Decode, Encode};
use mdemu_common::boxedarray::BoxedByteArray;
use mdemu_common::num::GetBit;
use std::array;

const WAVE_RAM_LEN: usize = 64 * 1024;

/// Channel addresses are 16.11 fixed point over the full 64 KiB.
const ADDRESS_FRACTION_BITS: u32 = 11;
const ADDRESS_MASK: u32 = (1 << (16 + ADDRESS_FRACTION_BITS)) - 1;

/// The end-of-sample marker byte; hitting it jumps to the channel's loop address.
const LOOP_MARKER: u8 = 0xFF;

#[derive(Debug, Clone, Default, Encode, Decode)]
struct PcmChannel {
    enabled: bool,
    start_address: u16,
    loop_address: u16,
    envelope: u8,
    pan_left: u8,
    pan_right: u8,
    current_sample: u8,
    /// 16.11 fixed point.
    current_address: u32,
    /// 5.11 fixed point.
    frequency_step: u32,
}

impl PcmChannel {
    fn key_on(&mut self) {
        if !self.enabled {
            self.current_address = u32::from(self.start_address) << ADDRESS_FRACTION_BITS;
            self.current_sample = 0;
            self.enabled = true;
        }
    }

    fn key_off(&mut self) {
        self.enabled = false;
    }

    fn clock(&mut self, wave_ram: &[u8; WAVE_RAM_LEN]) {
        if !self.enabled {
            return;
        }

        self.current_address = (self.current_address + self.frequency_step) & ADDRESS_MASK;

        let sample = wave_ram[(self.current_address >> ADDRESS_FRACTION_BITS) as usize];
        if sample == LOOP_MARKER {
            self.current_address = u32::from(self.loop_address) << ADDRESS_FRACTION_BITS;

            let loop_sample = wave_ram[(self.current_address >> ADDRESS_FRACTION_BITS) as usize];
            // A loop marker at the loop address means an empty (silent) loop
            self.current_sample = if loop_sample == LOOP_MARKER { 0 } else { loop_sample };
        } else {
            self.current_sample = sample;
        }
    }

    /// Signed stereo contribution. Samples are sign + 7-bit magnitude (sign bit set
    /// means positive), scaled by envelope then pan.
    fn sample(&self) -> (i32, i32) {
        if !self.enabled {
            return (0, 0);
        }

        let magnitude = u32::from(self.current_sample & 0x7F);
        let sign = if self.current_sample.bit(7) { 1 } else { -1 };

        let amplified = magnitude * u32::from(self.envelope);
        let left = sign * ((amplified * u32::from(self.pan_left)) >> 5) as i32;
        let right = sign * ((amplified * u32::from(self.pan_right)) >> 5) as i32;

        (left, right)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Pcm {
    sounding: bool,
    channels: [PcmChannel; 8],
    wave_ram: BoxedByteArray<WAVE_RAM_LEN>,
    wave_ram_bank: u8,
    selected_channel: u8,
}

impl Pcm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sounding: false,
            channels: array::from_fn(|_| PcmChannel::default()),
            wave_ram: BoxedByteArray::new(),
            wave_ram_bank: 0,
            selected_channel: 0,
        }
    }

    /// Byte read within the 4 KiB wave-RAM window currently banked in. Wave RAM is
    /// only readable while the chip is not sounding.
    #[must_use]
    pub fn read_wave_ram(&self, address: u16) -> u8 {
        if self.sounding {
            return 0;
        }

        let wave_address = (usize::from(self.wave_ram_bank) << 12) | usize::from(address & 0xFFF);
        self.wave_ram[wave_address]
    }

    pub fn write_wave_ram(&mut self, address: u16, value: u8) {
        let wave_address = (usize::from(self.wave_ram_bank) << 12) | usize::from(address & 0xFFF);
        self.wave_ram[wave_address] = value;
    }

    #[must_use]
    pub fn read_register(&self, address: u16) -> u8 {
        match address & 0x1F {
            0x08 => {
                // Channel on/off bits (1 = off)
                self.channels
                    .iter()
                    .enumerate()
                    .map(|(i, channel)| u8::from(!channel.enabled) << i)
                    .fold(0, |a, b| a | b)
            }
            0x10..=0x1F => self.read_channel_address(address),
            _ => 0,
        }
    }

    fn read_channel_address(&self, address: u16) -> u8 {
        let channel = &self.channels[usize::from((address & 0xF) >> 1)];
        let channel_address = if channel.enabled {
            (channel.current_address >> ADDRESS_FRACTION_BITS) as u16
        } else {
            channel.start_address
        };

        if address.bit(0) { (channel_address >> 8) as u8 } else { channel_address as u8 }
    }

    pub fn write_register(&mut self, address: u16, value: u8) {
        let channel = &mut self.channels[usize::from(self.selected_channel)];

        match address & 0x0F {
            0x00 => {
                channel.envelope = value;
            }
            0x01 => {
                channel.pan_left = value & 0x0F;
                channel.pan_right = value >> 4;
            }
            0x02 => {
                channel.frequency_step = (channel.frequency_step & 0xFF00) | u32::from(value);
            }
            0x03 => {
                channel.frequency_step =
                    (channel.frequency_step & 0x00FF) | (u32::from(value) << 8);
            }
            0x04 => {
                channel.loop_address = (channel.loop_address & 0xFF00) | u16::from(value);
            }
            0x05 => {
                channel.loop_address = (channel.loop_address & 0x00FF) | (u16::from(value) << 8);
            }
            0x06 => {
                // Start address; the low byte is always zero
                channel.start_address = u16::from(value) << 8;
            }
            0x07 => {
                self.sounding = value.bit(7);

                // Bit 6 selects what the low bits address
                if value.bit(6) {
                    self.selected_channel = value & 0x07;
                } else {
                    self.wave_ram_bank = value & 0x0F;
                }
            }
            0x08 => {
                for (i, channel) in self.channels.iter_mut().enumerate() {
                    if value.bit(i as u8) {
                        channel.key_off();
                    } else {
                        channel.key_on();
                    }
                }
            }
            _ => {}
        }
    }

    /// Generate interleaved stereo samples at the chip's native rate, accumulating
    /// into `buffer`.
    pub fn update(&mut self, buffer: &mut [i16]) {
        for frame in buffer.chunks_exact_mut(2) {
            if !self.sounding {
                continue;
            }

            for channel in &mut self.channels {
                channel.clock(&self.wave_ram);
            }

            let (left, right) = self
                .channels
                .iter()
                .map(PcmChannel::sample)
                .fold((0, 0), |(l, r), (cl, cr)| (l + cl, r + cr));

            frame[0] = frame[0].saturating_add(left.clamp(-0x7FFF, 0x7FFF) as i16);
            frame[1] = frame[1].saturating_add(right.clamp(-0x7FFF, 0x7FFF) as i16);
        }
    }
}

impl Default for Pcm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_channel(pcm: &mut Pcm, channel: u8) {
        // Keep the chip sounding while selecting
        pcm.write_register(0x07, 0xC0 | channel);
    }

    fn fill_wave_bank(pcm: &mut Pcm, bank: u8, data: &[u8]) {
        pcm.write_register(0x07, bank); // not sounding, bank select
        for (i, &byte) in data.iter().enumerate() {
            pcm.write_wave_ram(i as u16, byte);
        }
    }

    #[test]
    fn bank_register_windows_wave_ram() {
        let mut pcm = Pcm::new();

        fill_wave_bank(&mut pcm, 0, &[0x11]);
        fill_wave_bank(&mut pcm, 3, &[0x33]);

        pcm.write_register(0x07, 0x00);
        assert_eq!(pcm.read_wave_ram(0), 0x11);
        pcm.write_register(0x07, 0x03);
        assert_eq!(pcm.read_wave_ram(0), 0x33);
    }

    #[test]
    fn channel_plays_and_loops() {
        let mut pcm = Pcm::new();

        // Bank 0: positive ramp then a loop marker back to the start
        fill_wave_bank(&mut pcm, 0, &[0x81, 0x82, 0x83, LOOP_MARKER]);

        select_channel(&mut pcm, 0);
        pcm.write_register(0x00, 0xFF); // envelope max
        pcm.write_register(0x01, 0xFF); // both pans max
        pcm.write_register(0x02, 0x00);
        pcm.write_register(0x03, 0x08); // step 1.0
        pcm.write_register(0x04, 0x00);
        pcm.write_register(0x05, 0x00); // loop to 0
        pcm.write_register(0x06, 0x00); // start at 0

        pcm.write_register(0x08, 0xFE); // key on channel 0

        let mut buffer = [0; 12];
        pcm.update(&mut buffer);

        // Samples advance 1,2,3 then the loop marker pulls in wave_ram[0] again
        let level = |magnitude: i32| ((magnitude * 0xFF * 0xF) >> 5) as i16;
        assert_eq!(buffer[0], level(1));
        assert_eq!(buffer[2], level(2));
        assert_eq!(buffer[4], level(3));
        assert_eq!(buffer[6], level(1));

        // Left and right channels match with symmetric pan
        assert_eq!(buffer[0], buffer[1]);
    }

    #[test]
    fn negative_sign_bit() {
        let mut pcm = Pcm::new();
        fill_wave_bank(&mut pcm, 0, &[0x05, 0x05]);

        select_channel(&mut pcm, 0);
        pcm.write_register(0x00, 0xFF);
        pcm.write_register(0x01, 0xFF);
        pcm.write_register(0x03, 0x08);
        pcm.write_register(0x08, 0xFE);

        let mut buffer = [0; 2];
        pcm.update(&mut buffer);
        assert!(buffer[0] < 0);
    }

    #[test]
    fn silent_when_not_sounding() {
        let mut pcm = Pcm::new();
        fill_wave_bank(&mut pcm, 0, &[0x81; 16]);

        select_channel(&mut pcm, 0);
        pcm.write_register(0x00, 0xFF);
        pcm.write_register(0x01, 0xFF);
        pcm.write_register(0x03, 0x08);
        pcm.write_register(0x08, 0xFE);
        pcm.write_register(0x07, 0x40); // sounding off

        let mut buffer = [0; 8];
        pcm.update(&mut buffer);
        assert_eq!(buffer, [0; 8]);
    }

    #[test]
    fn address_readback_reports_position() {
        let mut pcm = Pcm::new();
        fill_wave_bank(&mut pcm, 0, &[0x81; 256]);

        select_channel(&mut pcm, 0);
        pcm.write_register(0x06, 0x10); // start 0x1000
        assert_eq!(pcm.read_register(0x11), 0x10);
        assert_eq!(pcm.read_register(0x10), 0x00);

        pcm.write_register(0x03, 0x08);
        pcm.write_register(0x08, 0xFE);

        let mut buffer = [0; 8];
        pcm.update(&mut buffer);
        assert_eq!(pcm.read_register(0x11), 0x10);
        assert_eq!(pcm.read_register(0x10), 0x04);
    }

    #[test]
    fn channel_on_register_is_inverted() {
        let mut pcm = Pcm::new();
        select_channel(&mut pcm, 0);
        assert_eq!(pcm.read_register(0x08), 0xFF);

        pcm.write_register(0x08, 0xFE);
        assert_eq!(pcm.read_register(0x08), 0xFE);
    }
}
