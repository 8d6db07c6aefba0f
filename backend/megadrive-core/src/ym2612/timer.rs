//! YM2612 timers A and B, clocked once per FM sample.
//!
//! Register 0x27 exposes three bit pairs: load (bits 0/1), expired-flag enable
//! (bits 2/3), and expired-flag reset (bits 4/5). The counter reloads only on the
//! rising edge of the load bit, but keeps counting either way; the load and enable
//! bits just gate what the wrap is allowed to do.

use bincode::{Decode, Encode};

/// Timer A counts 0x400 - value samples.
pub(super) fn timer_a_reload(raw_value: u16) -> u32 {
    0x400 - u32::from(raw_value & 0x3FF)
}

/// Timer B counts 16 * (0x100 - value) samples.
pub(super) fn timer_b_reload(raw_value: u8) -> u32 {
    0x10 * (0x100 - u32::from(raw_value))
}

#[derive(Debug, Clone, Encode, Decode)]
pub(super) struct FmTimer {
    pub(super) reload: u32,
    counter: u32,
    pub(super) running: bool,
    pub(super) flag_enabled: bool,
}

impl FmTimer {
    pub(super) fn new(reload: u32) -> Self {
        Self { reload, counter: reload, running: false, flag_enabled: false }
    }

    pub(super) fn set_control(&mut self, running: bool, flag_enabled: bool) {
        if !self.running && running {
            self.counter = self.reload;
        }
        self.running = running;
        self.flag_enabled = flag_enabled;
    }

    /// Count one sample; returns true on wrap.
    #[inline]
    pub(super) fn tick(&mut self) -> bool {
        self.counter -= 1;
        if self.counter != 0 {
            return false;
        }

        self.counter = self.reload;
        true
    }

    #[cfg(test)]
    pub(super) fn counter(&self) -> u32 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_conversions() {
        assert_eq!(timer_a_reload(0), 0x400);
        assert_eq!(timer_a_reload(0x3FF), 1);
        assert_eq!(timer_b_reload(0), 0x1000);
        assert_eq!(timer_b_reload(0xFF), 0x10);
    }

    #[test]
    fn wraps_on_schedule() {
        let mut timer = FmTimer::new(3);
        timer.set_control(true, true);

        assert!(!timer.tick());
        assert!(!timer.tick());
        assert!(timer.tick());

        // Reloaded and counting again
        assert!(!timer.tick());
    }

    #[test]
    fn load_rising_edge_reloads() {
        let mut timer = FmTimer::new(100);
        timer.tick();
        timer.tick();
        assert_eq!(timer.counter(), 98);

        timer.set_control(true, false);
        assert_eq!(timer.counter(), 100);

        // Re-writing the load bit while already set does not reload
        timer.tick();
        timer.set_control(true, false);
        assert_eq!(timer.counter(), 99);
    }
}
