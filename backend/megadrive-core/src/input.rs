//! Controller ports: the per-port programmable I/O registers and the 3/6-button pad
//! protocol driven by the TH line.

use bincode::{Decode, Encode};
use mdemu_common::frontend::Button;
use mdemu_common::num::GetBit;

const TH_BIT: u8 = 6;

/// How long the 6-button strobe sequence survives without a TH flip before the pad
/// falls back to reporting 3-button data (a little under 1.5 ms on real pads).
const STROBE_TIMEOUT_MICROSECONDS: u32 = 1500;

/// A standard 6-button control pad. 3-button pads are the same device with the strobe
/// counter permanently at 0, which this model reproduces naturally because the extra
/// reports only appear on the third and fourth TH flips.
#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct Controller {
    countdown: u32,
    strobes: u8,
    th: bool,
}

impl Controller {
    #[must_use]
    pub fn new() -> Self {
        // TH idles high; some games will not boot if it reads low out of reset
        Self { countdown: 0, strobes: 0, th: true }
    }

    fn apply_elapsed(&mut self, microseconds: u32) {
        if self.countdown != 0 {
            self.countdown = self.countdown.saturating_sub(microseconds);
            if self.countdown == 0 {
                self.strobes = 0;
            }
        }
    }

    /// TH written by the console. `microseconds` is the time elapsed since this
    /// port was last accessed.
    pub fn write(&mut self, value: u8, microseconds: u32) {
        self.apply_elapsed(microseconds);

        let th = value.bit(TH_BIT);
        if !self.th && th {
            self.strobes = (self.strobes + 1) & 3;
            self.countdown = STROBE_TIMEOUT_MICROSECONDS;
        }
        self.th = th;
    }

    /// Produce the pad's data-line byte. Button lines are active-low;
    /// `button_pressed` polls the frontend.
    pub fn read(
        &mut self,
        microseconds: u32,
        mut button_pressed: impl FnMut(Button) -> bool,
    ) -> u8 {
        self.apply_elapsed(microseconds);

        let mut line = |button: Button, bit: u8| u8::from(!button_pressed(button)) << bit;

        let buttons = match (self.strobes, self.th) {
            (0..=2, true) => {
                line(Button::C, 5)
                    | line(Button::B, 4)
                    | line(Button::Right, 3)
                    | line(Button::Left, 2)
                    | line(Button::Down, 1)
                    | line(Button::Up, 0)
            }
            (0..=1, false) => {
                line(Button::Start, 5)
                    | line(Button::A, 4)
                    | line(Button::Down, 1)
                    | line(Button::Up, 0)
            }
            (2, false) => {
                // The 6-button signature read: all-zero directional bits
                line(Button::Start, 5) | line(Button::A, 4)
            }
            (3, true) => {
                line(Button::C, 5)
                    | line(Button::B, 4)
                    | line(Button::Mode, 3)
                    | line(Button::X, 2)
                    | line(Button::Y, 1)
                    | line(Button::Z, 0)
            }
            (3, false) => {
                line(Button::Start, 5) | line(Button::A, 4) | 0b1111
            }
            _ => unreachable!("strobe count is always masked to 0-3"),
        };

        buttons | (u8::from(self.th) << TH_BIT)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

/// One of the console's three I/O ports: a direction mask plus the last written data
/// byte. Lines configured as outputs read back the written value; input lines come
/// from whatever is plugged in.
#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct IoPort {
    mask: u8,
    cached_write: u8,
}

impl IoPort {
    #[must_use]
    pub fn new() -> Self {
        // The standard boot code detects soft-resets by checking for a zeroed control
        // register
        Self::default()
    }

    #[must_use]
    pub fn read_control(&self) -> u8 {
        self.mask
    }

    pub fn write_control(&mut self, value: u8) {
        self.mask = value;
    }

    pub fn read_data(
        &self,
        microseconds: u32,
        controller: Option<&mut Controller>,
        button_pressed: impl FnMut(Button) -> bool,
    ) -> u8 {
        let Some(controller) = controller else {
            // Nothing plugged in
            return 0;
        };

        (controller.read(microseconds, button_pressed) & !self.mask) | self.cached_write
    }

    pub fn write_data(
        &mut self,
        value: u8,
        microseconds: u32,
        controller: Option<&mut Controller>,
    ) {
        self.cached_write = value & self.mask;

        if let Some(controller) = controller {
            controller.write(self.cached_write, microseconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pressed_set(buttons: &[Button]) -> HashSet<Button> {
        buttons.iter().copied().collect()
    }

    #[test]
    fn three_button_report() {
        let mut port = IoPort::new();
        let mut controller = Controller::new();
        port.write_control(0x40);

        let pressed = pressed_set(&[Button::C, Button::Up]);

        // TH high: C B Right Left Down Up
        port.write_data(0x40, 0, Some(&mut controller));
        let value =
            port.read_data(1, Some(&mut controller), |button| pressed.contains(&button));
        assert_eq!(value & 0x3F, 0b011110);

        // TH low: Start A 0 0 Down Up
        port.write_data(0x00, 1, Some(&mut controller));
        let pressed = pressed_set(&[Button::Start, Button::Down]);
        let value =
            port.read_data(1, Some(&mut controller), |button| pressed.contains(&button));
        assert_eq!(value & 0x3F, 0b011101);
    }

    #[test]
    fn six_button_extended_reports() {
        let mut controller = Controller::new();
        let pressed = pressed_set(&[Button::X, Button::Z]);
        let poll = |button: Button| pressed.contains(&button);

        // TH starts high; cycle it low/high twice to reach strobe count 2
        for _ in 0..2 {
            controller.write(0x00, 1);
            controller.write(0x40, 1);
        }

        // Third low phase: the all-zero signature
        controller.write(0x00, 1);
        assert_eq!(controller.read(1, poll) & 0x0F, 0);

        // Third high phase: C B Mode X Y Z
        controller.write(0x40, 1);
        assert_eq!(controller.read(1, poll) & 0x3F, 0b111010);

        // Fourth low phase: Start A 1 1 1 1
        controller.write(0x00, 1);
        assert_eq!(controller.read(1, poll) & 0x3F, 0b111111);
    }

    #[test]
    fn strobe_sequence_times_out() {
        let mut controller = Controller::new();
        let poll = |_: Button| false;

        controller.write(0x00, 1);
        controller.write(0x40, 1);
        assert_eq!(controller.strobes, 1);

        // A millisecond and a half of silence resets the sequence
        assert_eq!(controller.read(2000, poll) & 0x3F, 0b111111);
        assert_eq!(controller.strobes, 0);
    }

    #[test]
    fn output_lines_read_back_written_bits() {
        let mut port = IoPort::new();
        let mut controller = Controller::new();

        port.write_control(0x60);
        port.write_data(0x7F, 0, Some(&mut controller));

        let value = port.read_data(0, Some(&mut controller), |_| true);
        // Bits 5-6 come from the cached write; the rest from the (all-pressed) pad
        assert_eq!(value & 0x60, 0x60);
        assert_eq!(value & 0x0F, 0);
    }

    #[test]
    fn empty_port_reads_zero() {
        let port = IoPort::new();
        assert_eq!(port.read_data(0, None, |_| true), 0);
    }
}
