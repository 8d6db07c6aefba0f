//! The emulator aggregate and the per-frame loop.

use crate::memory::{BusView, MachineState, Machinery, SubCpuBus};
use bincode::{Decode, Encode};
use mdemu_common::frontend::{CD_SECTOR_WORDS, FrontendCallbacks, TimingMode};
use megadrive_core::cpu::{M68kCore, Z80Core};
use megadrive_core::timing::{
    self, CDDA_SAMPLE_RATE, ComponentSync, MCD_MASTER_CLOCK, MegaCdCycle, MegaDriveCycle,
};
use megadrive_core::vdp::Vdp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum ConsoleRegion {
    Domestic,
    #[default]
    Overseas,
}

impl ConsoleRegion {
    #[must_use]
    pub fn is_overseas(self) -> bool {
        self == Self::Overseas
    }
}

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct MegaCdConfig {
    pub timing_mode: TimingMode,
    pub region: ConsoleRegion,
}

/// Per-frame progress markers for every component; countdowns live in the persistent
/// state, but progress restarts from zero each frame.
#[derive(Debug, Default)]
pub(crate) struct FrameSync {
    pub m68k: ComponentSync,
    pub z80: ComponentSync,
    pub sub_m68k: ComponentSync,
    pub irq3: ComponentSync,
    pub fm: ComponentSync,
    pub psg: ComponentSync,
    pub pcm: ComponentSync,
    pub io_ports: [ComponentSync; 3],
}

/// Master cycles from the start of a scanline to the horizontal sync point, where the
/// Main CPU is synced before the H-interrupt decision.
pub(crate) fn cycles_until_horizontal_sync(vdp: &Vdp) -> u32 {
    if vdp.h40_enabled() {
        // H40 uses the faster pixel clock for the active area
        2 * 5 + (62 + 26 + 640 + 28 + 18) * 4
    } else {
        (48 + 26 + 512 + 28 + 18) * 5
    }
}

/// The whole machine: the three CPU interpreters supplied by the embedder, plus every
/// hardware component.
pub struct MegaCd<M, S, Z> {
    main_cpu: M,
    sub_cpu: S,
    z80: Z,
    state: MachineState,
    config: MegaCdConfig,
    cdda_scratch: Vec<i16>,
}

impl<M: M68kCore, S: M68kCore, Z: Z80Core> MegaCd<M, S, Z> {
    #[must_use]
    pub fn new(main_cpu: M, sub_cpu: S, z80: Z, config: MegaCdConfig) -> Self {
        Self {
            main_cpu,
            sub_cpu,
            z80,
            state: MachineState::new(),
            config,
            cdda_scratch: Vec::new(),
        }
    }

    /// The serializable machine state (for save states).
    #[must_use]
    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut MachineState {
        &mut self.state
    }

    /// Reset the machine: re-parse the cartridge's external-RAM header, clear CPU and
    /// sound-chip state and pending interrupts. VRAM and Work RAM survive unless
    /// `cd_boot` is requested, which loads the disc's Initial and Sub Programs the
    /// way the real BIOS does.
    pub fn reset<F: FrontendCallbacks>(
        &mut self,
        frontend: &mut F,
        cd_boot: bool,
        cartridge_size: u32,
    ) {
        self.state.external_ram.configure_from_header(frontend, cartridge_size);

        self.state.mega_cd.boot_from_cd = cd_boot;
        self.state.fm.reset();
        self.state.main_m68k.h_int_pending = false;
        self.state.main_m68k.v_int_pending = false;

        let irq = &mut self.state.mega_cd.irq;
        irq.irq1_pending = false;
        irq.irq2_pending = false;
        irq.irq3_pending = false;

        if cd_boot {
            cd_boot_load(frontend, &mut self.state);
        }

        // Both 68000s refetch their vectors through their buses
        let mut sync = FrameSync::default();
        {
            let mut mach = Machinery {
                state: &mut self.state,
                frontend: &mut *frontend,
                sync: &mut sync,
                config: self.config,
            };
            let mut main_bus: crate::memory::MainCpuBus<'_, '_, M, S, Z, F> =
                crate::memory::MainCpuBus {
                    view: BusView {
                        mach: &mut mach,
                        main_cpu: None,
                        sub_cpu: Some(&mut self.sub_cpu),
                        z80: Some(&mut self.z80),
                    },
                };
            self.main_cpu.reset(&mut main_bus);
        }
        {
            let mut mach = Machinery {
                state: &mut self.state,
                frontend: &mut *frontend,
                sync: &mut sync,
                config: self.config,
            };
            let mut sub_bus: SubCpuBus<'_, '_, M, S, Z, F> = SubCpuBus {
                view: BusView { mach: &mut mach, main_cpu: None, sub_cpu: None, z80: None },
                pc: 0,
            };
            self.sub_cpu.reset(&mut sub_bus);
        }

        self.z80.reset();
    }

    /// Run one video frame: scanline loop with per-line CPU syncs and rendering,
    /// interrupts at the blanking boundaries, and an end-of-frame drain of every
    /// clock domain. No error condition escapes this method.
    pub fn iterate<F: FrontendCallbacks>(&mut self, frontend: &mut F) {
        let timing_mode = self.config.timing_mode;

        let television_lines = u32::from(timing::television_vertical_resolution(timing_mode));
        let console_lines =
            u32::from(if self.state.vdp.v30_enabled() { 30_u8 } else { 28 }) * 8;

        let cycles_per_frame =
            timing::divide_by_frame_rate(timing_mode, timing::master_clock(timing_mode));
        let cycles_per_scanline = cycles_per_frame / television_lines;
        let cycles_until_h_sync = cycles_until_horizontal_sync(&self.state.vdp);
        let mcd_cycles_per_frame =
            timing::divide_by_frame_rate(timing_mode, MCD_MASTER_CLOCK);

        let mut h_int_counter = u32::from(self.state.vdp.h_int_interval());
        self.state.vdp.set_in_vblank(false);

        let mut sync = FrameSync::default();
        let mut mach = Machinery {
            state: &mut self.state,
            frontend,
            sync: &mut sync,
            config: self.config,
        };
        let mut view = BusView {
            mach: &mut mach,
            main_cpu: Some(&mut self.main_cpu),
            sub_cpu: Some(&mut self.sub_cpu),
            z80: Some(&mut self.z80),
        };

        for scanline in 0..television_lines {
            view.mach.state.current_scanline = scanline as u16;

            // The Main CPU is synced twice per line: once up to horizontal sync so
            // the H-interrupt decision observes its writes, and once to the end of
            // the line before the scanline is rendered
            view.sync_main(MegaDriveCycle(
                cycles_per_scanline * scanline + cycles_until_h_sync,
            ));

            if scanline < console_lines {
                if h_int_counter == 0 {
                    h_int_counter = u32::from(view.mach.state.vdp.h_int_interval());
                    view.mach.state.main_m68k.h_int_pending = true;
                } else {
                    h_int_counter -= 1;
                }
            }

            let end_of_line = MegaDriveCycle(cycles_per_scanline * (scanline + 1));
            view.sync_main(end_of_line);

            if scanline < console_lines {
                let MachineState { vdp, .. } = &mut *view.mach.state;
                if vdp.double_resolution_enabled() {
                    vdp.render_scanline((scanline * 2) as u16, view.mach.frontend);
                    vdp.render_scanline((scanline * 2 + 1) as u16, view.mach.frontend);
                } else {
                    vdp.render_scanline(scanline as u16, view.mach.frontend);
                }
            } else if scanline == console_lines {
                view.mach.state.main_m68k.v_int_pending = true;

                // The Z80 interrupt asserts for one scanline starting at V-int,
                // regardless of the 68k's interrupt enable bits
                view.sync_z80(end_of_line);
                if let Some(z80) = view.z80.as_deref_mut() {
                    z80.set_interrupt_line(true);
                }

                view.mach.state.vdp.set_in_vblank(true);
            } else if scanline == console_lines + 1 {
                view.sync_z80(end_of_line);
                if let Some(z80) = view.z80.as_deref_mut() {
                    z80.set_interrupt_line(false);
                }
            }
        }

        // Drain every clock domain to the end of the frame
        let frame_end = MegaDriveCycle(cycles_per_frame);
        let mcd_frame_end = MegaCdCycle(mcd_cycles_per_frame);

        view.sync_main(frame_end);
        view.sync_z80(frame_end);
        view.sync_sub(mcd_frame_end);
        view.sync_fm(frame_end);
        view.sync_psg(frame_end);
        view.sync_pcm(mcd_frame_end);

        let cdda_frames = timing::divide_by_frame_rate(timing_mode, CDDA_SAMPLE_RATE);
        run_cdda(&mut view, cdda_frames, &mut self.cdda_scratch);

        // The fade engine nominally ticks at the CDD's 75 Hz; once per frame is what
        // the hardware-facing volume curve is calibrated against here
        view.mach.state.mega_cd.cdda.update_fade();
    }
}

fn run_cdda<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>(
    view: &mut BusView<'_, '_, M, S, Z, F>,
    total_frames: u32,
    scratch: &mut Vec<i16>,
) {
    scratch.clear();
    scratch.resize(total_frames as usize * 2, 0);

    let frames_read = if view.mach.state.mega_cd.cdda.audible() {
        view.mach.frontend.cd_audio_read(scratch).min(total_frames as usize)
    } else {
        0
    };

    view.mach.state.mega_cd.cdda.postprocess(scratch, frames_read);

    view.mach.frontend.cdda_audio_to_be_generated(total_frames, &mut |buffer| {
        let length = buffer.len().min(scratch.len());
        buffer[..length].copy_from_slice(&scratch[..length]);
    });
}

/// CD boot ("Mode 2"): pull the boot header from the disc's first sector and place
/// the Initial Program in WORD-RAM (mirrored into Work RAM) and the Sub Program in
/// PRG-RAM, then hand WORD-RAM to the Sub CPU.
fn cd_boot_load<F: FrontendCallbacks>(frontend: &mut F, state: &mut MachineState) {
    const BOOT_HEADER_WORDS: usize = 0x6000 / 2;
    const IP_START_DEFAULT: u32 = 0x200;
    const IP_LENGTH_DEFAULT: u32 = 0x600;

    let mega_cd = &mut state.mega_cd;

    // The BIOS reads the first sector into PRG-RAM
    frontend.cd_seeked(0);
    {
        let sector: &mut [u16; CD_SECTOR_WORDS] = (&mut mega_cd.prg_ram.buffer
            [BOOT_HEADER_WORDS..BOOT_HEADER_WORDS + CD_SECTOR_WORDS])
            .try_into()
            .unwrap();
        frontend.cd_sector_read(sector);
    }

    let header_long = |words: &[u16], offset: usize| {
        (u32::from(words[BOOT_HEADER_WORDS + offset]) << 16)
            | u32::from(words[BOOT_HEADER_WORDS + offset + 1])
    };
    let ip_start = header_long(&**mega_cd.prg_ram.buffer, 0x18);
    let ip_length = header_long(&**mega_cd.prg_ram.buffer, 0x1A);
    let sp_start = header_long(&**mega_cd.prg_ram.buffer, 0x20);
    let sp_length = header_long(&**mega_cd.prg_ram.buffer, 0x22);

    log::info!(
        "CD boot: IP {ip_length:#X} bytes at {ip_start:#X}, SP {sp_length:#X} bytes at {sp_start:#X}"
    );

    // The default Initial Program region comes straight out of the header sector
    let ip_source = BOOT_HEADER_WORDS + (IP_START_DEFAULT / 2) as usize;
    let ip_words = (IP_LENGTH_DEFAULT / 2) as usize;
    mega_cd.word_ram.buffer[..ip_words]
        .copy_from_slice(&mega_cd.prg_ram.buffer[ip_source..ip_source + ip_words]);

    if ip_start != IP_START_DEFAULT || ip_length != IP_LENGTH_DEFAULT {
        // Oversized Initial Programs stream in whole sectors after the default region
        read_sectors(frontend, &mut mega_cd.word_ram.buffer[ip_words..], ip_start, 32 * 0x800);
    }

    // The BIOS leaves a copy of the Initial Program area in the bottom 32 KiB of
    // Work RAM
    let mirrored_words = state.work_ram.len() / 2;
    state.work_ram[..mirrored_words]
        .copy_from_slice(&mega_cd.word_ram.buffer[..mirrored_words]);

    // Stream the Sub Program into PRG-RAM after the boot header
    let sp_length = sp_length.min(crate::memory::PRG_RAM_WORDS as u32 * 2 - 0x6000);
    read_sectors(frontend, &mut mega_cd.prg_ram.buffer[BOOT_HEADER_WORDS..], sp_start, sp_length);

    // WORD-RAM belongs to the Sub CPU from here
    mega_cd.word_ram.dmna = true;
    mega_cd.word_ram.ret = false;
}

fn read_sectors<F: FrontendCallbacks>(
    frontend: &mut F,
    destination: &mut [u16],
    start_byte_offset: u32,
    length_bytes: u32,
) {
    frontend.cd_seeked(start_byte_offset / 0x800);

    let total_sectors = length_bytes.div_ceil(0x800) as usize;
    for i in 0..total_sectors {
        let offset = i * CD_SECTOR_WORDS;
        if offset + CD_SECTOR_WORDS > destination.len() {
            break;
        }

        let sector: &mut [u16; CD_SECTOR_WORDS] =
            (&mut destination[offset..offset + CD_SECTOR_WORDS]).try_into().unwrap();
        frontend.cd_sector_read(sector);
    }
}
