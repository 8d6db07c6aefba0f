//! Cycle accounting: clock constants, cross-domain cycle conversion, and the
//! cooperative sync primitive that drives every component.
//!
//! Time is a 32-bit cycle count in a machine's master-clock domain. Each component
//! tracks how far it has advanced (`current_cycle`) and, for CPUs, how many cycles
//! remain in the instruction it is part-way through (`cycle_countdown`). Whenever one
//! component observes another, the observed component is first synced up to the
//! observer's current cycle, so every cross-component read sees a causally consistent
//! value.

use bincode::{Decode, Encode};
use mdemu_common::frontend::TimingMode;

pub const NTSC_MASTER_CLOCK: u32 = 53_693_175;
pub const PAL_MASTER_CLOCK: u32 = 53_203_424;

pub const M68K_DIVIDER: u32 = 7;
pub const Z80_DIVIDER: u32 = 15;

/// The YM2612 produces one sample per 6 * 24 M68K clocks (master / 7 / 144 ≈ 53267 Hz).
pub const FM_SAMPLE_DIVIDER: u32 = 6 * 24;

/// The SN76489 produces one sample per 16 Z80 clocks (master / 15 / 16 ≈ 223722 Hz).
pub const PSG_SAMPLE_DIVIDER: u32 = 16;

pub const MCD_MASTER_CLOCK: u32 = 50_000_000;
pub const MCD_M68K_DIVIDER: u32 = 4;

/// The RF5C164 produces one sample per 0x180 Sub-CPU clocks (≈ 32552 Hz).
pub const PCM_SAMPLE_DIVIDER: u32 = 0x180;

pub const CDDA_SAMPLE_RATE: u32 = 44100;

#[must_use]
pub fn master_clock(timing_mode: TimingMode) -> u32 {
    match timing_mode {
        TimingMode::Ntsc => NTSC_MASTER_CLOCK,
        TimingMode::Pal => PAL_MASTER_CLOCK,
    }
}

/// Cycles (or samples) per video frame at the console's refresh rate. NTSC runs at
/// 60/1.001 Hz, so dividing by it multiplies by 1.001.
#[must_use]
pub fn divide_by_frame_rate(timing_mode: TimingMode, value: u32) -> u32 {
    match timing_mode {
        TimingMode::Ntsc => value / 60 + value / (60 * 1000),
        TimingMode::Pal => value / 50,
    }
}

#[must_use]
pub fn television_vertical_resolution(timing_mode: TimingMode) -> u16 {
    match timing_mode {
        TimingMode::Ntsc => 262,
        TimingMode::Pal => 312,
    }
}

/// A point in time in the Mega Drive master-clock domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub struct MegaDriveCycle(pub u32);

/// A point in time in the Mega CD master-clock domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub struct MegaCdCycle(pub u32);

// The conversion constants are `0x80000000 * source_clock / destination_clock` split
// into 16-bit halves, so the multiply can be carried out to sub-cycle precision
// without overflowing a 32-bit intermediate.
const MD_TO_MCD_NTSC: [u32; 2] = [0x7732, 0x1ECA];
const MD_TO_MCD_PAL: [u32; 2] = [0x784B, 0x02AF];
const MCD_TO_MD_NTSC: [u32; 2] = [0x8974, 0x5BF2];
const MCD_TO_MD_PAL: [u32; 2] = [0x8833, 0x655D];

fn convert_cycle(cycle: u32, scale_halves: [u32; 2]) -> u32 {
    let cycle_upper = cycle >> 16;
    let cycle_lower = cycle & 0xFFFF;

    let result_upper = cycle_upper * scale_halves[0];
    let result_lower_1 = cycle_upper * scale_halves[1];
    let result_lower_2 = cycle_lower * scale_halves[0];

    (result_upper << 1)
        .wrapping_add(result_lower_1 >> 15)
        .wrapping_add(result_lower_2 >> 15)
}

impl MegaDriveCycle {
    #[must_use]
    pub fn to_mega_cd(self, timing_mode: TimingMode) -> MegaCdCycle {
        let halves = match timing_mode {
            TimingMode::Ntsc => MD_TO_MCD_NTSC,
            TimingMode::Pal => MD_TO_MCD_PAL,
        };
        MegaCdCycle(convert_cycle(self.0, halves))
    }
}

impl MegaCdCycle {
    #[must_use]
    pub fn to_mega_drive(self, timing_mode: TimingMode) -> MegaDriveCycle {
        let halves = match timing_mode {
            TimingMode::Ntsc => MCD_TO_MD_NTSC,
            TimingMode::Pal => MCD_TO_MD_PAL,
        };
        MegaDriveCycle(convert_cycle(self.0, halves))
    }
}

/// Per-frame progress marker for a freely-running component (sound chip sample
/// counter, I/O port microsecond clock). Created at zero at the top of each frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentSync {
    pub current_cycle: u32,
}

impl ComponentSync {
    /// Advance to `target_cycle` master cycles, where one unit of this component's
    /// time is `clock_divider` master cycles; returns the number of units elapsed.
    ///
    /// Calling this twice with the same target is a no-op the second time.
    pub fn sync(&mut self, target_cycle: u32, clock_divider: u32) -> u32 {
        let native_target_cycle = target_cycle / clock_divider;

        debug_assert!(
            native_target_cycle >= self.current_cycle,
            "component observed backwards in time: {} -> {native_target_cycle}",
            self.current_cycle,
        );

        let elapsed = native_target_cycle.saturating_sub(self.current_cycle);
        self.current_cycle = native_target_cycle;

        elapsed
    }
}

/// Run a CPU up to `target_cycle` (in its machine's master-clock domain).
///
/// `countdown` is the persistent cycles-remaining-in-current-instruction counter;
/// `step` executes one instruction and returns its length in master cycles. A halted
/// CPU (bus-requested or reset-held) jumps straight to the target without executing.
pub fn sync_cpu(
    sync: &mut ComponentSync,
    countdown: &mut u32,
    target_cycle: u32,
    cpu_not_running: bool,
    mut step: impl FnMut() -> u32,
) {
    if *countdown == 0 || cpu_not_running {
        sync.current_cycle = target_cycle;
        return;
    }

    while sync.current_cycle < target_cycle {
        let cycles_to_do = (*countdown).min(target_cycle - sync.current_cycle);

        sync.current_cycle += cycles_to_do;
        *countdown -= cycles_to_do;

        if *countdown == 0 {
            *countdown = step();
            debug_assert!(*countdown != 0, "CPU step must consume at least one cycle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_conversion_round_trips_closely() {
        // One NTSC frame of Mega Drive master cycles
        let frame = divide_by_frame_rate(TimingMode::Ntsc, NTSC_MASTER_CLOCK);
        let converted = MegaDriveCycle(frame).to_mega_cd(TimingMode::Ntsc);

        // 50 MHz / 59.94 Hz
        let expected = divide_by_frame_rate(TimingMode::Ntsc, MCD_MASTER_CLOCK);
        let error = i64::from(converted.0) - i64::from(expected);
        assert!(error.abs() < 8, "converted {converted:?}, expected {expected}");

        let back = converted.to_mega_drive(TimingMode::Ntsc);
        let error = i64::from(back.0) - i64::from(frame);
        assert!(error.abs() < 8, "round trip {back:?}, expected {frame}");
    }

    #[test]
    fn conversion_is_monotonic() {
        let mut last = 0;
        for cycle in (0..2_000_000).step_by(997) {
            let converted = MegaDriveCycle(cycle).to_mega_cd(TimingMode::Pal).0;
            assert!(converted >= last);
            last = converted;
        }
    }

    #[test]
    fn component_sync_is_idempotent() {
        let mut sync = ComponentSync::default();

        assert_eq!(sync.sync(700, 7), 100);
        assert_eq!(sync.current_cycle, 100);
        assert_eq!(sync.sync(700, 7), 0);
        assert_eq!(sync.sync(1400, 7), 100);
    }

    #[test]
    fn cpu_sync_executes_whole_instructions() {
        let mut sync = ComponentSync::default();
        let mut countdown = 1;
        let mut instructions = 0;

        sync_cpu(&mut sync, &mut countdown, 70, false, || {
            instructions += 1;
            28
        });

        assert_eq!(sync.current_cycle, 70);
        // 1 leftover cycle, then 28-cycle instructions until cycle 70
        assert_eq!(instructions, 3);
        assert_eq!(countdown, 28 - 13);

        // Re-syncing to the same target does nothing
        sync_cpu(&mut sync, &mut countdown, 70, false, || panic!("should not step"));
        assert_eq!(countdown, 28 - 13);
    }

    #[test]
    fn halted_cpu_jumps_to_target() {
        let mut sync = ComponentSync::default();
        let mut countdown = 5;

        sync_cpu(&mut sync, &mut countdown, 1000, true, || panic!("halted CPU must not step"));

        assert_eq!(sync.current_cycle, 1000);
        assert_eq!(countdown, 5);
    }
}
