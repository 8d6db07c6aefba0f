//! Machine state and the three bus dispatchers (Main-68k, Sub-68k, Z80).
//!
//! Every cross-domain access syncs the observed component up to the observer's
//! current cycle before touching shared state, so reads are causally consistent. A
//! component syncing "itself" from a nested access degrades to a no-op, because its
//! own progress marker is already at the target.

use crate::api::{FrameSync, MegaCdConfig};
use crate::bios::PendingBiosCall;
use crate::cdc::{Cdc, DeviceDestination};
use crate::cdda::Cdda;
use crate::graphics::{self, GraphicsAsic};
use crate::rf5c164::Pcm;
use bincode::{Decode, Encode};
use dsp::iir::{FirstOrderLowPass, SecondOrderLowPass};
use mdemu_common::boxedarray::{BoxedByteArray, BoxedWordArray};
use mdemu_common::frontend::{FrontendCallbacks, TimingMode};
use mdemu_common::num::{GetBit, U16Ext};
use megadrive_core::cartridge::{CartridgeBankswitch, ExternalRam};
use megadrive_core::cpu::{M68kBus, M68kCore, Z80Bus, Z80Core};
use megadrive_core::input::{Controller, IoPort};
use megadrive_core::psg::Psg;
use megadrive_core::timing::{
    self, M68K_DIVIDER, MCD_M68K_DIVIDER, MegaCdCycle, MegaDriveCycle, PCM_SAMPLE_DIVIDER,
    PSG_SAMPLE_DIVIDER, Z80_DIVIDER,
};
use megadrive_core::vdp::{Vdp, VdpDmaSource};
use megadrive_core::ym2612::Fm;

pub const WORK_RAM_WORDS: usize = 0x8000;
pub const Z80_RAM_LEN: usize = 0x2000;
pub const PRG_RAM_WORDS: usize = 0x40000;
pub const WORD_RAM_WORDS: usize = 0x20000;

/// Divider converting master cycles to the I/O ports' microsecond clock.
const IO_PORT_DIVIDER: u32 = timing::NTSC_MASTER_CLOCK / 1_000_000;

/// Converting a cycle across clock domains and back truncates twice; a nested sync
/// target may land this many cycles past the observer's own position.
const CONVERSION_SLACK: u32 = 4;

#[derive(Debug, Clone, Encode, Decode)]
pub struct MainCpuState {
    pub cycle_countdown: u32,
    pub h_int_pending: bool,
    pub v_int_pending: bool,
}

impl MainCpuState {
    fn new() -> Self {
        Self { cycle_countdown: 1, h_int_pending: false, v_int_pending: false }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Z80State {
    pub ram: BoxedByteArray<Z80_RAM_LEN>,
    pub cycle_countdown: u32,
    /// 9-bit shift register mapping the 0x8000-0xFFFF window into 68k space.
    pub bank: u16,
    pub bus_requested: bool,
    pub reset_held: bool,
    /// A reset-line release resets the Z80 core at its next scheduled step.
    pub reset_pending: bool,
}

impl Z80State {
    fn new() -> Self {
        Self {
            ram: BoxedByteArray::new(),
            cycle_countdown: 1,
            bank: 0,
            bus_requested: false,
            reset_held: true,
            reset_pending: false,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct SubCpuState {
    pub cycle_countdown: u32,
    pub bus_requested: bool,
    pub reset_held: bool,
}

impl SubCpuState {
    fn new() -> Self {
        Self { cycle_countdown: 1, bus_requested: true, reset_held: true }
    }

    pub fn halted(&self) -> bool {
        self.bus_requested || self.reset_held
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct PrgRam {
    pub buffer: BoxedWordArray<PRG_RAM_WORDS>,
    /// Which 128 KiB bank the Main CPU's 128 KiB window sees (2 bits).
    pub bank: u8,
    /// Write protection in 0x200-byte units from the bottom.
    pub write_protect: u8,
}

impl PrgRam {
    fn new() -> Self {
        Self { buffer: BoxedWordArray::new(), bank: 0, write_protect: 0 }
    }

    pub fn write_protected(&self, byte_address: u32) -> bool {
        byte_address < u32::from(self.write_protect) * 0x200
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct WordRam {
    pub buffer: BoxedWordArray<WORD_RAM_WORDS>,
    pub in_1m_mode: bool,
    /// Main requested a hand-off to Sub.
    pub dmna: bool,
    /// Sub returned the RAM to Main (2M), or selects the 1M half assignment.
    pub ret: bool,
}

impl WordRam {
    fn new() -> Self {
        // The hardware manual documents RET=1 (Main owns WORD-RAM) out of reset
        Self { buffer: BoxedWordArray::new(), in_1m_mode: false, dmna: false, ret: true }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct Communication {
    pub flag: u16,
    /// Main to Sub.
    pub command: [u16; 8],
    /// Sub to Main.
    pub status: [u16; 8],
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct IrqState {
    /// Mask bits for levels 1-6 (index 0 = level 1).
    pub enabled: [bool; 6],
    pub irq1_pending: bool,
    pub irq2_pending: bool,
    pub irq3_pending: bool,
    pub irq3_countdown: u32,
    pub irq3_reload: u32,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct MegaCdState {
    pub sub_m68k: SubCpuState,
    pub prg_ram: PrgRam,
    pub word_ram: WordRam,
    pub communication: Communication,
    pub irq: IrqState,
    pub graphics: GraphicsAsic,
    pub cdc: Cdc,
    pub cdda: Cdda,
    pub pcm: Pcm,
    pub boot_from_cd: bool,
    /// The BIOS's H-INT vector override register.
    pub hblank_address: u16,
    /// The one-word staging register behind the delayed WORD-RAM DMA quirk.
    pub delayed_dma_word: u16,
    pub pending_bios_call: Option<PendingBiosCall>,
}

impl MegaCdState {
    fn new() -> Self {
        Self {
            sub_m68k: SubCpuState::new(),
            prg_ram: PrgRam::new(),
            word_ram: WordRam::new(),
            communication: Communication::default(),
            irq: IrqState::default(),
            graphics: GraphicsAsic::new(),
            cdc: Cdc::new(),
            cdda: Cdda::new(),
            pcm: Pcm::new(),
            boot_from_cd: false,
            hblank_address: 0xFFFF,
            delayed_dma_word: 0,
            pending_bios_call: None,
        }
    }
}

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct AudioFilters {
    pub fm: FirstOrderLowPass<2>,
    pub psg: FirstOrderLowPass<1>,
    pub pcm: SecondOrderLowPass<2>,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct MachineState {
    pub work_ram: BoxedWordArray<WORK_RAM_WORDS>,
    pub main_m68k: MainCpuState,
    pub z80: Z80State,
    pub vdp: Vdp,
    pub fm: Fm,
    pub psg: Psg,
    pub io_ports: [IoPort; 3],
    pub controllers: [Controller; 2],
    pub external_ram: ExternalRam,
    pub bankswitch: CartridgeBankswitch,
    pub current_scanline: u16,
    pub mega_cd: MegaCdState,
    pub filters: AudioFilters,
}

impl MachineState {
    pub fn new() -> Self {
        Self {
            work_ram: BoxedWordArray::new(),
            main_m68k: MainCpuState::new(),
            z80: Z80State::new(),
            vdp: Vdp::new(),
            fm: Fm::new(),
            psg: Psg::new(),
            io_ports: [IoPort::new(); 3],
            controllers: [Controller::new(); 2],
            external_ram: ExternalRam::new(),
            bankswitch: CartridgeBankswitch::new(),
            current_scanline: 0,
            mega_cd: MegaCdState::new(),
            filters: AudioFilters::default(),
        }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}

/// The passive machine plus everything a bus access might need that is not a CPU
/// core.
pub(crate) struct Machinery<'a, F> {
    pub state: &'a mut MachineState,
    pub frontend: &'a mut F,
    pub sync: &'a mut FrameSync,
    pub config: MegaCdConfig,
}

/// One bus-capable borrow of the machine. CPU handles are present when the access
/// context can legally drive that CPU; a context syncing its own CPU sees `None` and
/// the sync degrades to the no-op the invariants guarantee it to be.
pub(crate) struct BusView<'a, 'b, M, S, Z, F> {
    pub mach: &'a mut Machinery<'b, F>,
    pub main_cpu: Option<&'a mut M>,
    pub sub_cpu: Option<&'a mut S>,
    pub z80: Option<&'a mut Z>,
}

impl<'a, 'b, M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>
    BusView<'a, 'b, M, S, Z, F>
{
    fn timing_mode(&self) -> TimingMode {
        self.mach.config.timing_mode
    }

    fn reborrow(&mut self) -> BusView<'_, 'b, M, S, Z, F> {
        BusView {
            mach: &mut *self.mach,
            main_cpu: self.main_cpu.as_deref_mut(),
            sub_cpu: self.sub_cpu.as_deref_mut(),
            z80: self.z80.as_deref_mut(),
        }
    }

    // ------------------------------------------------------------------
    // Component syncs
    // ------------------------------------------------------------------

    /// Bring the Main CPU up to `target`. Only meaningful when called with the Main
    /// CPU handle present; nested observers find it already at or past the target.
    pub fn sync_main(&mut self, target: MegaDriveCycle) {
        let Some(main_cpu) = self.main_cpu.take() else {
            // Nested observers only ever target the cycle the Main CPU is already
            // at, modulo the sub-cycle truncation of a domain round trip
            debug_assert!(
                self.mach.sync.m68k.current_cycle + CONVERSION_SLACK >= target.0,
                "Main CPU observed ahead of its own progress"
            );
            return;
        };

        let mut countdown = self.mach.state.main_m68k.cycle_countdown;
        while self.mach.sync.m68k.current_cycle < target.0 {
            let cycles_to_do = countdown.min(target.0 - self.mach.sync.m68k.current_cycle);
            self.mach.sync.m68k.current_cycle += cycles_to_do;
            countdown -= cycles_to_do;

            if countdown == 0 {
                self.deliver_main_interrupts(main_cpu);

                let mut bus = MainCpuBus { view: self.reborrow() };
                countdown = M68K_DIVIDER * main_cpu.execute(&mut bus);
            }
        }
        self.mach.state.main_m68k.cycle_countdown = countdown;

        self.main_cpu = Some(main_cpu);
    }

    fn deliver_main_interrupts(&mut self, main_cpu: &mut M) {
        let state = &mut self.mach.state;
        if state.main_m68k.v_int_pending && state.vdp.v_int_enabled() {
            state.main_m68k.v_int_pending = false;
            main_cpu.request_interrupt(6);
        }
        if state.main_m68k.h_int_pending && state.vdp.h_int_enabled() {
            state.main_m68k.h_int_pending = false;
            main_cpu.request_interrupt(4);
        }
    }

    /// Bring the Z80 up to `target` (Mega Drive master cycles).
    pub fn sync_z80(&mut self, target: MegaDriveCycle) {
        let Some(z80) = self.z80.take() else {
            debug_assert!(
                self.mach.sync.z80.current_cycle + CONVERSION_SLACK >= target.0,
                "Z80 observed ahead of its own progress"
            );
            return;
        };

        let not_running =
            self.mach.state.z80.bus_requested || self.mach.state.z80.reset_held;

        if not_running {
            self.mach.sync.z80.current_cycle = target.0;
        } else {
            let mut countdown = self.mach.state.z80.cycle_countdown;
            while self.mach.sync.z80.current_cycle < target.0 {
                let cycles_to_do = countdown.min(target.0 - self.mach.sync.z80.current_cycle);
                self.mach.sync.z80.current_cycle += cycles_to_do;
                countdown -= cycles_to_do;

                if countdown == 0 {
                    if self.mach.state.z80.reset_pending {
                        self.mach.state.z80.reset_pending = false;
                        z80.reset();
                    }

                    let mut bus = Z80CpuBus { view: self.reborrow() };
                    countdown = Z80_DIVIDER * z80.execute(&mut bus);
                }
            }
            self.mach.state.z80.cycle_countdown = countdown;
        }

        self.z80 = Some(z80);
    }

    /// Bring the Sub CPU (and its timer interrupt) up to `target` (Mega CD master
    /// cycles).
    pub fn sync_sub(&mut self, target: MegaCdCycle) {
        self.sync_irq3(target);

        let Some(sub_cpu) = self.sub_cpu.take() else {
            debug_assert!(
                self.mach.sync.sub_m68k.current_cycle + CONVERSION_SLACK >= target.0,
                "Sub CPU observed ahead of its own progress"
            );
            return;
        };

        if self.mach.state.mega_cd.sub_m68k.halted() {
            self.mach.sync.sub_m68k.current_cycle = target.0;
        } else {
            let mut countdown = self.mach.state.mega_cd.sub_m68k.cycle_countdown;
            while self.mach.sync.sub_m68k.current_cycle < target.0 {
                let cycles_to_do =
                    countdown.min(target.0 - self.mach.sync.sub_m68k.current_cycle);
                self.mach.sync.sub_m68k.current_cycle += cycles_to_do;
                countdown -= cycles_to_do;

                if countdown == 0 {
                    self.deliver_sub_interrupts(sub_cpu);

                    let pc = sub_cpu.pc();
                    let mut bus = SubCpuBus { view: self.reborrow(), pc };
                    countdown = MCD_M68K_DIVIDER * sub_cpu.execute(&mut bus);

                    if let Some(call) = self.mach.state.mega_cd.pending_bios_call.take() {
                        crate::bios::dispatch(self, sub_cpu, call);
                    }
                }
            }
            self.mach.state.mega_cd.sub_m68k.cycle_countdown = countdown;
        }

        self.sub_cpu = Some(sub_cpu);
    }

    fn deliver_sub_interrupts(&mut self, sub_cpu: &mut S) {
        let irq = &mut self.mach.state.mega_cd.irq;

        if irq.irq3_pending && irq.enabled[2] {
            irq.irq3_pending = false;
            sub_cpu.request_interrupt(3);
        }
        if irq.irq2_pending && irq.enabled[1] {
            irq.irq2_pending = false;
            sub_cpu.request_interrupt(2);
        }
        if irq.irq1_pending && irq.enabled[0] {
            irq.irq1_pending = false;
            sub_cpu.request_interrupt(1);
        }
    }

    /// Advance the programmable timer interrupt's countdown (it ticks off the PCM
    /// sample clock).
    fn sync_irq3(&mut self, target: MegaCdCycle) {
        let irq = &mut self.mach.state.mega_cd.irq;
        let sync = &mut self.mach.sync.irq3;

        if irq.irq3_reload == 0 || irq.irq3_countdown == 0 {
            sync.current_cycle = target.0;
            return;
        }

        while sync.current_cycle < target.0 {
            let cycles_to_do = irq.irq3_countdown.min(target.0 - sync.current_cycle);
            sync.current_cycle += cycles_to_do;
            irq.irq3_countdown -= cycles_to_do;

            if irq.irq3_countdown == 0 {
                irq.irq3_pending = true;
                irq.irq3_countdown = irq.irq3_reload;
            }
        }
    }

    /// Generate any FM samples owed up to `target`.
    pub fn sync_fm(&mut self, target: MegaDriveCycle) {
        let m68k_cycles = self.mach.sync.fm.sync(target.0, M68K_DIVIDER);
        let total_frames = self.mach.state.fm.update(m68k_cycles);
        if total_frames == 0 {
            return;
        }

        let MachineState { fm, filters, .. } = &mut *self.mach.state;
        self.mach.frontend.fm_audio_to_be_generated(total_frames, &mut |buffer| {
            fm.output_samples(buffer);
            // RC output filter of a VA4 Mega Drive: ~2842 Hz cutoff at the chip's
            // 53267 Hz sample rate
            filters.fm.apply(buffer, dsp::iir::FirstOrderCoefficients::compute(6.910, 4.910));
        });
    }

    pub fn sync_psg(&mut self, target: MegaDriveCycle) {
        let total_frames = self.mach.sync.psg.sync(target.0, Z80_DIVIDER * PSG_SAMPLE_DIVIDER);
        if total_frames == 0 {
            return;
        }

        let MachineState { psg, filters, .. } = &mut *self.mach.state;
        self.mach.frontend.psg_audio_to_be_generated(total_frames, &mut |buffer| {
            psg.update(buffer);
            // The same RC filter, at the SN76489's 223722 Hz sample rate
            filters.psg.apply(buffer, dsp::iir::FirstOrderCoefficients::compute(26.044, 24.044));
        });
    }

    pub fn sync_pcm(&mut self, target: MegaCdCycle) {
        let total_frames =
            self.mach.sync.pcm.sync(target.0, MCD_M68K_DIVIDER * PCM_SAMPLE_DIVIDER);
        if total_frames == 0 {
            return;
        }

        let MachineState { mega_cd, filters, .. } = &mut *self.mach.state;
        self.mach.frontend.pcm_audio_to_be_generated(total_frames, &mut |buffer| {
            mega_cd.pcm.update(buffer);
            // The Mega CD's steeper PCM output filter, ~7973 Hz at 32552 Hz
            filters.pcm.apply(
                buffer,
                dsp::iir::SecondOrderCoefficients::compute(3.526, 0.132, 0.606),
            );
        });
    }

    // ------------------------------------------------------------------
    // Main-68k bus
    // ------------------------------------------------------------------

    pub fn main_read_word(
        &mut self,
        address_words: u32,
        upper: bool,
        lower: bool,
        target: MegaDriveCycle,
        is_vdp_dma: bool,
    ) -> u16 {
        let address = (address_words << 1) & 0xFF_FFFF;
        let address_words = address >> 1;

        match address >> 21 {
            0..=3 => {
                let MachineState { mega_cd, external_ram, bankswitch, .. } =
                    &mut *self.mach.state;
                medium_read_word(
                    self.mach.frontend,
                    mega_cd,
                    external_ram,
                    bankswitch,
                    address,
                    upper,
                    lower,
                    is_vdp_dma,
                )
            }
            4 => {
                log::warn!("Main CPU read from invalid address {address:#08X}");
                0
            }
            5 => self.main_read_io_region(address, upper, lower, target),
            6 => self.main_read_vdp_region(address_words, target),
            7 => self.mach.state.work_ram[(address_words as usize) % WORK_RAM_WORDS],
            _ => unreachable!("24-bit address produces a 3-bit slice index"),
        }
    }

    fn main_read_io_region(
        &mut self,
        address: u32,
        upper: bool,
        lower: bool,
        target: MegaDriveCycle,
    ) -> u16 {
        match address {
            0xA00000..=0xA01FFF | 0xA04000 | 0xA04002 => {
                let z80 = &self.mach.state.z80;
                if !z80.bus_requested {
                    log::warn!("Main CPU read Z80 memory without holding the Z80 bus");
                    0
                } else if z80.reset_held {
                    log::warn!("Main CPU read Z80 memory while the Z80 reset is asserted");
                    0
                } else {
                    // All Z80-area access is byte-size; the byte is mirrored into
                    // both halves
                    let byte_address = address + u32::from(!upper);
                    let byte = self.z80_read((byte_address & 0xFFFF) as u16, target);
                    u16::from_be_bytes([byte, byte])
                }
            }
            0xA10000 => {
                let overseas = self.mach.config.region.is_overseas();
                let pal = self.timing_mode() == TimingMode::Pal;
                // Bit 5 clear signals an attached Mega CD
                (u16::from(overseas) << 7) | (u16::from(pal) << 6)
            }
            0xA10002 | 0xA10004 | 0xA10006 => {
                let port_index = ((address - 0xA10002) / 2) as usize;
                self.read_io_port_data(port_index, target).into()
            }
            0xA10008 | 0xA1000A | 0xA1000C => {
                let port_index = ((address - 0xA10008) / 2) as usize;
                self.mach.state.io_ports[port_index].read_control().into()
            }
            0xA11000 => 0,
            0xA11100 => {
                let z80 = &self.mach.state.z80;
                // Bus requests never complete while the reset line is held
                let bus_obtained = z80.bus_requested && !z80.reset_held;
                let byte = 0xFF ^ u8::from(bus_obtained);
                u16::from_be_bytes([byte, byte])
            }
            0xA11200 => {
                let byte = 0xFF ^ u8::from(self.mach.state.z80.reset_held);
                u16::from_be_bytes([byte, byte])
            }
            0xA12000 => {
                let mega_cd = &self.mach.state.mega_cd;
                (u16::from(mega_cd.irq.enabled[1]) << 15)
                    | (u16::from(mega_cd.sub_m68k.bus_requested) << 1)
                    | u16::from(!mega_cd.sub_m68k.reset_held)
            }
            0xA12002 => {
                let mega_cd = &self.mach.state.mega_cd;
                (u16::from(mega_cd.prg_ram.write_protect) << 8)
                    | (u16::from(mega_cd.prg_ram.bank) << 6)
                    | (u16::from(mega_cd.word_ram.in_1m_mode) << 2)
                    | (u16::from(mega_cd.word_ram.dmna) << 1)
                    | u16::from(mega_cd.word_ram.ret)
            }
            0xA12004 => self.mach.state.mega_cd.cdc.mode(false),
            0xA12006 => self.mach.state.mega_cd.hblank_address,
            0xA12008 => self.mach.state.mega_cd.cdc.host_data(false),
            0xA1200C => {
                log::warn!("Main CPU read from the stop-watch register");
                0
            }
            0xA1200E => {
                self.sync_sub(target.to_mega_cd(self.timing_mode()));
                self.mach.state.mega_cd.communication.flag
            }
            0xA12010..=0xA1201F => {
                self.sync_sub(target.to_mega_cd(self.timing_mode()));
                self.mach.state.mega_cd.communication.command[((address - 0xA12010) / 2) as usize]
            }
            0xA12020..=0xA1202F => {
                self.sync_sub(target.to_mega_cd(self.timing_mode()));
                self.mach.state.mega_cd.communication.status[((address - 0xA12020) / 2) as usize]
            }
            0xA12030 | 0xA12032 | 0xA130F0 | 0xA130F2..=0xA13100 => {
                log::warn!("Main CPU read from write-only register {address:#08X}");
                0
            }
            _ => {
                let _ = (upper, lower);
                log::warn!("Main CPU read from invalid address {address:#08X}");
                0
            }
        }
    }

    fn read_io_port_data(&mut self, port_index: usize, target: MegaDriveCycle) -> u8 {
        let microseconds = self.mach.sync.io_ports[port_index].sync(target.0, IO_PORT_DIVIDER);

        let MachineState { io_ports, controllers, .. } = &mut *self.mach.state;
        let controller = controllers.get_mut(port_index);
        let frontend = &mut *self.mach.frontend;

        io_ports[port_index].read_data(microseconds, controller, |button| {
            frontend.input_requested(port_index as u8, button)
        })
    }

    fn main_read_vdp_region(&mut self, address_words: u32, target: MegaDriveCycle) -> u16 {
        match (address_words << 1) & 0x1F {
            0x00 | 0x02 => self.mach.state.vdp.read_data(),
            0x04 | 0x06 => {
                let mut status = self.mach.state.vdp.read_control();
                status |= u16::from(self.timing_mode() == TimingMode::Pal);
                status |= u16::from(self.in_h_blank(target)) << 2;
                status
            }
            0x08..=0x0F => {
                let h_counter = self.approximate_h_counter(target);
                self.mach.state.vdp.hv_counter(self.mach.state.current_scanline, h_counter)
            }
            0x10..=0x17 => {
                log::warn!("Main CPU read from the PSG; this freezes a real Mega Drive");
                0
            }
            _ => {
                log::warn!("Main CPU read from invalid VDP address");
                0
            }
        }
    }

    fn cycles_per_scanline(&self) -> u32 {
        let timing_mode = self.timing_mode();
        timing::divide_by_frame_rate(timing_mode, timing::master_clock(timing_mode))
            / u32::from(timing::television_vertical_resolution(timing_mode))
    }

    fn in_h_blank(&self, target: MegaDriveCycle) -> bool {
        let cycles_per_scanline = self.cycles_per_scanline();
        let cycle_in_line = target.0 % cycles_per_scanline;
        cycle_in_line >= crate::api::cycles_until_horizontal_sync(&self.mach.state.vdp)
    }

    fn approximate_h_counter(&self, target: MegaDriveCycle) -> u8 {
        let cycles_per_scanline = self.cycles_per_scanline();
        let cycle_in_line = target.0 % cycles_per_scanline;
        ((cycle_in_line * 0x100) / cycles_per_scanline) as u8
    }

    pub fn main_write_word(
        &mut self,
        address_words: u32,
        upper: bool,
        lower: bool,
        value: u16,
        target: MegaDriveCycle,
    ) {
        let address = (address_words << 1) & 0xFF_FFFF;
        let address_words = address >> 1;

        match address >> 21 {
            0..=3 => self.main_write_medium(address, upper, lower, value, target),
            4 => log::warn!("Main CPU write to invalid address {address:#08X}"),
            5 => self.main_write_io_region(address, upper, lower, value, target),
            6 => self.main_write_vdp_region(address_words, upper, lower, value, target),
            7 => {
                let word = &mut self.mach.state.work_ram[(address_words as usize) % WORK_RAM_WORDS];
                write_with_byte_enables(word, value, upper, lower);
            }
            _ => unreachable!("24-bit address produces a 3-bit slice index"),
        }
    }

    fn main_write_medium(
        &mut self,
        address: u32,
        upper: bool,
        lower: bool,
        value: u16,
        _target: MegaDriveCycle,
    ) {
        let on_cartridge_side =
            (address & 0x400000 == 0) != self.mach.state.mega_cd.boot_from_cd;

        if on_cartridge_side {
            if address & 0x200000 != 0 && self.mach.state.external_ram.mapped_in() {
                self.mach.state.external_ram.write_word(address & 0x1FFFFF, value, upper, lower);
            } else {
                if upper {
                    self.mach.frontend.cartridge_written(address & 0x3FFFFF, value.msb());
                }
                if lower {
                    self.mach.frontend.cartridge_written((address & 0x3FFFFF) + 1, value.lsb());
                }
            }
            return;
        }

        if address & 0x200000 != 0 {
            // WORD-RAM, Main side
            let word_ram = &mut self.mach.state.mega_cd.word_ram;
            let address_words = address >> 1;
            if word_ram.in_1m_mode {
                if address & 0x20000 != 0 {
                    log::warn!("Main CPU write to the cell-image half of 1M WORD-RAM");
                } else {
                    let index =
                        ((address_words as usize & 0xFFFF) * 2) + usize::from(word_ram.ret);
                    write_with_byte_enables(&mut word_ram.buffer[index], value, upper, lower);
                }
            } else if word_ram.dmna {
                log::warn!("Main CPU write to WORD-RAM while the Sub CPU owns it");
            } else {
                let index = address_words as usize & 0x1FFFF;
                write_with_byte_enables(&mut word_ram.buffer[index], value, upper, lower);
            }
        } else if address & 0x20000 == 0 {
            log::warn!("Main CPU write to the BIOS ROM ({address:#08X})");
        } else {
            // PRG-RAM window
            let mega_cd = &mut self.mach.state.mega_cd;
            let bank_base_words = 0x10000 * u32::from(mega_cd.prg_ram.bank);
            let index_words = bank_base_words + ((address >> 1) & 0xFFFF);

            if !mega_cd.sub_m68k.bus_requested {
                log::warn!("Main CPU write to PRG-RAM while the Sub CPU holds its bus");
            } else if mega_cd.prg_ram.write_protected(index_words << 1) {
                log::warn!("Main CPU write to write-protected PRG-RAM ({index_words:#X})");
            } else {
                write_with_byte_enables(
                    &mut mega_cd.prg_ram.buffer[index_words as usize],
                    value,
                    upper,
                    lower,
                );
            }
        }
    }

    fn main_write_io_region(
        &mut self,
        address: u32,
        upper: bool,
        lower: bool,
        value: u16,
        target: MegaDriveCycle,
    ) {
        let timing_mode = self.timing_mode();
        match address {
            0xA00000..=0xA01FFF | 0xA04000 | 0xA04002 => {
                if !self.mach.state.z80.bus_requested {
                    log::warn!("Main CPU wrote Z80 memory without holding the Z80 bus");
                } else if self.mach.state.z80.reset_held {
                    log::warn!("Main CPU wrote Z80 memory while the Z80 reset is asserted");
                } else {
                    // Word-size writes only land the upper byte
                    let (byte_address, byte) =
                        if upper { (address, value.msb()) } else { (address + 1, value.lsb()) };
                    self.z80_write((byte_address & 0xFFFF) as u16, byte, target);
                }
            }
            0xA10002 | 0xA10004 | 0xA10006 => {
                if lower {
                    let port_index = ((address - 0xA10002) / 2) as usize;
                    let microseconds =
                        self.mach.sync.io_ports[port_index].sync(target.0, IO_PORT_DIVIDER);

                    let MachineState { io_ports, controllers, .. } = &mut *self.mach.state;
                    io_ports[port_index].write_data(
                        value.lsb(),
                        microseconds,
                        controllers.get_mut(port_index),
                    );
                }
            }
            0xA10008 | 0xA1000A | 0xA1000C => {
                if lower {
                    let port_index = ((address - 0xA10008) / 2) as usize;
                    self.mach.state.io_ports[port_index].write_control(value.lsb());
                }
            }
            0xA11100 => {
                if upper {
                    let bus_request = value.msb().bit(0);
                    if self.mach.state.z80.bus_requested != bus_request {
                        self.sync_z80(target);
                    }
                    self.mach.state.z80.bus_requested = bus_request;
                }
            }
            0xA11200 => {
                if upper {
                    let reset_held = !value.msb().bit(0);
                    if self.mach.state.z80.reset_held && !reset_held {
                        self.sync_z80(target);
                        self.mach.state.z80.reset_pending = true;
                        self.mach.state.fm.reset();
                    }
                    self.mach.state.z80.reset_held = reset_held;
                }
            }
            0xA12000 => {
                let interrupt = upper && value.msb().bit(0);
                let bus_request = lower && value.lsb().bit(1);
                let reset_held = lower && !value.lsb().bit(0);

                let mcd_target = target.to_mega_cd(timing_mode);

                if lower && self.mach.state.mega_cd.sub_m68k.bus_requested != bus_request {
                    self.sync_sub(mcd_target);
                }

                if lower && self.mach.state.mega_cd.sub_m68k.reset_held && !reset_held {
                    self.sync_sub(mcd_target);
                    if let Some(sub_cpu) = self.sub_cpu.take() {
                        let mut bus = SubCpuBus { view: self.reborrow(), pc: 0 };
                        sub_cpu.reset(&mut bus);
                        self.sub_cpu = Some(sub_cpu);
                    }
                }

                if interrupt && self.mach.state.mega_cd.irq.enabled[1] {
                    self.sync_sub(mcd_target);
                    self.mach.state.mega_cd.irq.irq2_pending = true;
                }

                if lower {
                    self.mach.state.mega_cd.sub_m68k.bus_requested = bus_request;
                    self.mach.state.mega_cd.sub_m68k.reset_held = reset_held;
                }
            }
            0xA12002 => {
                if upper {
                    self.mach.state.mega_cd.prg_ram.write_protect = value.msb();
                }
                if lower {
                    if value.lsb().bit(1) {
                        self.sync_sub(target.to_mega_cd(timing_mode));

                        let word_ram = &mut self.mach.state.mega_cd.word_ram;
                        word_ram.dmna = true;
                        if !word_ram.in_1m_mode {
                            word_ram.ret = false;
                        }
                    }

                    self.mach.state.mega_cd.prg_ram.bank = (value.lsb() >> 6) & 3;
                }
            }
            0xA12006 => {
                let word = &mut self.mach.state.mega_cd.hblank_address;
                write_with_byte_enables(word, value, upper, lower);
            }
            0xA1200E => {
                if upper {
                    self.sync_sub(target.to_mega_cd(timing_mode));
                    self.mach.state.mega_cd.communication.flag.set_msb(value.msb());
                }
                if lower {
                    log::warn!("Main CPU wrote the Sub CPU's half of the communication flag");
                }
            }
            0xA12010..=0xA1201F => {
                self.sync_sub(target.to_mega_cd(timing_mode));
                let word = &mut self.mach.state.mega_cd.communication.command
                    [((address - 0xA12010) / 2) as usize];
                write_with_byte_enables(word, value, upper, lower);
            }
            0xA12020..=0xA1202F => {
                log::warn!("Main CPU wrote the Sub CPU's communication status registers");
            }
            0xA12004 | 0xA12008 | 0xA1200C | 0xA12030 | 0xA12032 => {
                log::warn!("Main CPU wrote read-only or Sub-side register {address:#08X}");
            }
            0xA130F0 => {
                if lower {
                    self.mach.state.external_ram.set_mapped_in(value.lsb() != 0);
                }
            }
            0xA130F2..=0xA13100 => {
                if lower {
                    self.mach.state.bankswitch.write_register(address, value.lsb());
                }
            }
            _ => {
                log::warn!("Main CPU write to invalid address {address:#08X}");
            }
        }
    }

    fn main_write_vdp_region(
        &mut self,
        address_words: u32,
        upper: bool,
        lower: bool,
        value: u16,
        target: MegaDriveCycle,
    ) {
        match (address_words << 1) & 0x1F {
            0x00 | 0x02 => {
                let MachineState { vdp, .. } = &mut *self.mach.state;
                vdp.write_data(value, self.mach.frontend);
            }
            0x04 | 0x06 => {
                let MachineState { vdp, mega_cd, external_ram, bankswitch, work_ram, .. } =
                    &mut *self.mach.state;
                let mut dma_source =
                    MainBusDmaSource { mega_cd, external_ram, bankswitch, work_ram };
                vdp.write_control(value, self.mach.frontend, &mut dma_source);
            }
            0x08..=0x0F => {
                // H/V counter is read-only
            }
            0x10..=0x17 => {
                if lower {
                    self.sync_z80(target);
                    self.sync_psg(target);
                    self.mach.state.psg.write(value.lsb());
                }
            }
            0x18 => self.mach.state.vdp.write_debug_data(value),
            0x1C => self.mach.state.vdp.write_debug_control(value),
            _ => {
                let _ = upper;
                log::warn!("Main CPU write to invalid VDP address");
            }
        }
    }

    // ------------------------------------------------------------------
    // Z80 bus
    // ------------------------------------------------------------------

    pub fn z80_read(&mut self, address: u16, target: MegaDriveCycle) -> u8 {
        match address >> 13 {
            0 | 1 => self.mach.state.z80.ram[usize::from(address) % Z80_RAM_LEN],
            2 => {
                self.sync_fm(target);
                self.mach.state.fm.read_status()
            }
            3 => {
                if address < 0x7F00 {
                    0xFF
                } else {
                    // VDP ports, reached through the 68k bus
                    self.sync_main(target);
                    self.main_read_byte(0xC00000 + u32::from(address & 0x1F), target)
                }
            }
            4..=7 => {
                // The banked window into 68k address space
                self.sync_main(target);
                let m68k_address =
                    (u32::from(self.mach.state.z80.bank) << 15) | u32::from(address & 0x7FFF);
                self.main_read_byte(m68k_address, target)
            }
            _ => unreachable!("16-bit address produces a 3-bit slice index"),
        }
    }

    fn main_read_byte(&mut self, byte_address: u32, target: MegaDriveCycle) -> u8 {
        let upper = byte_address & 1 == 0;
        let word = self.main_read_word(byte_address >> 1, upper, !upper, target, false);
        if upper { word.msb() } else { word.lsb() }
    }

    pub fn z80_write(&mut self, address: u16, value: u8, target: MegaDriveCycle) {
        match address >> 13 {
            0 | 1 => {
                self.mach.state.z80.ram[usize::from(address) % Z80_RAM_LEN] = value;
            }
            2 => {
                self.sync_fm(target);
                match address & 3 {
                    0 => self.mach.state.fm.write_address_1(value),
                    2 => self.mach.state.fm.write_address_2(value),
                    _ => self.mach.state.fm.write_data(value),
                }
            }
            3 => {
                if address < 0x6100 {
                    // The bank register: one bit shifted in per write
                    let z80 = &mut self.mach.state.z80;
                    z80.bank = (z80.bank >> 1) | (u16::from(value.bit(0)) << 8);
                } else if address < 0x7F00 {
                    // Unmapped
                } else {
                    self.sync_main(target);
                    self.main_write_byte(0xC00000 + u32::from(address & 0x1F), value, target);
                }
            }
            4..=7 => {
                self.sync_main(target);
                let m68k_address =
                    (u32::from(self.mach.state.z80.bank) << 15) | u32::from(address & 0x7FFF);
                self.main_write_byte(m68k_address, value, target);
            }
            _ => unreachable!("16-bit address produces a 3-bit slice index"),
        }
    }

    fn main_write_byte(&mut self, byte_address: u32, value: u8, target: MegaDriveCycle) {
        let upper = byte_address & 1 == 0;
        let word = u16::from_be_bytes([value, value]);
        self.main_write_word(byte_address >> 1, upper, !upper, word, target);
    }

    // ------------------------------------------------------------------
    // Sub-68k bus
    // ------------------------------------------------------------------

    pub fn sub_read_word(
        &mut self,
        address_words: u32,
        upper: bool,
        lower: bool,
        target: MegaCdCycle,
        program_counter: Option<u32>,
    ) -> u16 {
        let address = (address_words << 1) & 0xFF_FFFF;
        let address_words = address >> 1;

        if address < 0x80000 {
            // PRG-RAM, including the BIOS-call trampolines
            if let Some(pc) = program_counter {
                if let Some(call) = PendingBiosCall::trampoline(address, pc) {
                    self.mach.state.mega_cd.pending_bios_call = Some(call);
                    // The call's side effects run at the instruction boundary
                    return crate::bios::RETURN_FROM_SUBROUTINE;
                }
            }

            return self.mach.state.mega_cd.prg_ram.buffer[address_words as usize];
        }

        if address < 0xC0000 {
            // WORD-RAM, 2M view
            let word_ram = &self.mach.state.mega_cd.word_ram;
            if word_ram.in_1m_mode {
                log::warn!("Sub CPU read from the 2M WORD-RAM view while in 1M mode");
                return 0;
            }
            if !word_ram.dmna {
                log::warn!("Sub CPU read from WORD-RAM while the Main CPU owns it");
                return 0;
            }
            return word_ram.buffer[(address_words as usize) % WORD_RAM_WORDS];
        }

        if address < 0xE0000 {
            // WORD-RAM, 1M half view
            let word_ram = &self.mach.state.mega_cd.word_ram;
            if !word_ram.in_1m_mode {
                log::warn!("Sub CPU read from the 1M WORD-RAM view while in 2M mode");
                return 0;
            }
            let index = ((address_words as usize & 0xFFFF) * 2) + usize::from(!word_ram.ret);
            return word_ram.buffer[index];
        }

        if (0xFF0000..0xFF8000).contains(&address) {
            let masked = (address_words & 0xFFF) as u16;
            return if address & 0x2000 != 0 {
                self.mach.state.mega_cd.pcm.read_wave_ram(masked).into()
            } else {
                self.sync_pcm(target);
                self.mach.state.mega_cd.pcm.read_register(masked).into()
            };
        }

        let timing_mode = self.timing_mode();
        match address {
            0xFF8000 => 1, // The Mega CD reports itself ready
            0xFF8002 => {
                let mega_cd = &self.mach.state.mega_cd;
                (u16::from(mega_cd.prg_ram.write_protect) << 8)
                    | (u16::from(mega_cd.word_ram.in_1m_mode) << 2)
                    | (u16::from(mega_cd.word_ram.dmna) << 1)
                    | u16::from(mega_cd.word_ram.ret)
            }
            0xFF8004 => self.mach.state.mega_cd.cdc.mode(true),
            0xFF8008 => self.mach.state.mega_cd.cdc.host_data(true),
            0xFF800E => {
                self.sync_main(target.to_mega_drive(timing_mode));
                self.mach.state.mega_cd.communication.flag
            }
            0xFF8010..=0xFF801F => {
                self.sync_main(target.to_mega_drive(timing_mode));
                self.mach.state.mega_cd.communication.command[((address - 0xFF8010) / 2) as usize]
            }
            0xFF8020..=0xFF802F => {
                self.sync_main(target.to_mega_drive(timing_mode));
                self.mach.state.mega_cd.communication.status[((address - 0xFF8020) / 2) as usize]
            }
            0xFF8032 => {
                let irq = &self.mach.state.mega_cd.irq;
                irq.enabled
                    .iter()
                    .enumerate()
                    .map(|(i, &enabled)| u16::from(enabled) << (1 + i))
                    .fold(0, |a, b| a | b)
            }
            0xFF8058..=0xFF8067 => self.mach.state.mega_cd.graphics.read_register(address),
            0xFF8006 | 0xFF800A | 0xFF800C | 0xFF8030 => {
                log::warn!(
                    "Sub CPU read from write-only register {address:#08X} (pc {:#X})",
                    program_counter.unwrap_or(0)
                );
                0
            }
            _ => {
                let _ = (upper, lower);
                log::warn!("Sub CPU read from invalid address {address:#08X}");
                0
            }
        }
    }

    pub fn sub_write_word(
        &mut self,
        address_words: u32,
        upper: bool,
        lower: bool,
        value: u16,
        target: MegaCdCycle,
    ) {
        let address = (address_words << 1) & 0xFF_FFFF;
        let address_words = address >> 1;

        if address < 0x80000 {
            let prg_ram = &mut self.mach.state.mega_cd.prg_ram;
            if prg_ram.write_protected(address) {
                log::warn!("Sub CPU write to write-protected PRG-RAM ({address:#08X})");
            } else {
                write_with_byte_enables(
                    &mut prg_ram.buffer[address_words as usize],
                    value,
                    upper,
                    lower,
                );
            }
            return;
        }

        if address < 0xC0000 {
            let word_ram = &mut self.mach.state.mega_cd.word_ram;
            if word_ram.in_1m_mode {
                log::warn!("Sub CPU write to the 2M WORD-RAM view while in 1M mode");
            } else if !word_ram.dmna {
                log::warn!("Sub CPU write to WORD-RAM while the Main CPU owns it");
            } else {
                let index = (address_words as usize) % WORD_RAM_WORDS;
                write_with_byte_enables(&mut word_ram.buffer[index], value, upper, lower);
            }
            return;
        }

        if address < 0xE0000 {
            let word_ram = &mut self.mach.state.mega_cd.word_ram;
            if !word_ram.in_1m_mode {
                log::warn!("Sub CPU write to the 1M WORD-RAM view while in 2M mode");
            } else {
                let index = ((address_words as usize & 0xFFFF) * 2) + usize::from(!word_ram.ret);
                write_with_byte_enables(&mut word_ram.buffer[index], value, upper, lower);
            }
            return;
        }

        if (0xFF0000..0xFF8000).contains(&address) {
            if lower {
                self.sync_pcm(target);
                let masked = (address_words & 0xFFF) as u16;
                if address & 0x2000 != 0 {
                    self.mach.state.mega_cd.pcm.write_wave_ram(masked, value.lsb());
                } else {
                    self.mach.state.mega_cd.pcm.write_register(masked, value.lsb());
                }
            }
            return;
        }

        let timing_mode = self.timing_mode();
        match address {
            0xFF8002 => {
                if lower {
                    self.sync_main(target.to_mega_drive(timing_mode));

                    let word_ram = &mut self.mach.state.mega_cd.word_ram;
                    let ret = value.lsb().bit(0);
                    word_ram.in_1m_mode = value.lsb().bit(2);

                    if ret || word_ram.in_1m_mode {
                        word_ram.dmna = false;
                        word_ram.ret = ret;
                    }
                }
            }
            0xFF8004 => {
                let destination = DeviceDestination::from_bits(value.msb() & 7);
                self.mach.state.mega_cd.cdc.set_device_destination(destination);
            }
            0xFF800A => {
                self.mach.state.mega_cd.cdc.set_dma_address(value);
            }
            0xFF800E => {
                if upper {
                    log::warn!("Sub CPU wrote the Main CPU's half of the communication flag");
                }
                if lower {
                    self.sync_main(target.to_mega_drive(timing_mode));
                    self.mach.state.mega_cd.communication.flag.set_lsb(value.lsb());
                }
            }
            0xFF8010..=0xFF801F => {
                log::warn!("Sub CPU wrote the Main CPU's communication command registers");
            }
            0xFF8020..=0xFF802F => {
                self.sync_main(target.to_mega_drive(timing_mode));
                let word = &mut self.mach.state.mega_cd.communication.status
                    [((address - 0xFF8020) / 2) as usize];
                write_with_byte_enables(word, value, upper, lower);
            }
            0xFF8030 => {
                if lower {
                    // The register reloads as (value + 1) timer ticks even though the
                    // hardware manual describes plain multiples; kept as the original
                    // implementation has it
                    let irq = &mut self.mach.state.mega_cd.irq;
                    irq.irq3_reload = if value.lsb() == 0 {
                        0
                    } else {
                        (u32::from(value.lsb()) + 1) * MCD_M68K_DIVIDER * PCM_SAMPLE_DIVIDER
                    };
                    irq.irq3_countdown = irq.irq3_reload;
                }
            }
            0xFF8032 => {
                if lower {
                    let irq = &mut self.mach.state.mega_cd.irq;
                    for (i, enabled) in irq.enabled.iter_mut().enumerate() {
                        *enabled = value.lsb().bit(1 + i as u8);
                    }
                    if !irq.enabled[0] {
                        irq.irq1_pending = false;
                    }
                }
            }
            0xFF8058..=0xFF8065 => {
                self.mach.state.mega_cd.graphics.write_register(address, value);
            }
            0xFF8066 => {
                // Writing the trace-table address renders the whole image buffer
                graphics::render_trace_table(&mut self.mach.state.mega_cd, value);
            }
            0xFF8000 | 0xFF8006 | 0xFF8008 | 0xFF800C => {
                log::warn!("Sub CPU wrote read-only register {address:#08X}");
            }
            _ => {
                log::warn!("Sub CPU write to invalid address {address:#08X}");
            }
        }
    }
}

/// The cartridge/Mega-CD slice of Main-68k address space (0x000000-0x7FFFFF), shared
/// between CPU reads and VDP DMA fetches.
#[allow(clippy::too_many_arguments)]
fn medium_read_word<F: FrontendCallbacks>(
    frontend: &mut F,
    mega_cd: &mut MegaCdState,
    external_ram: &ExternalRam,
    bankswitch: &CartridgeBankswitch,
    address: u32,
    upper: bool,
    lower: bool,
    is_vdp_dma: bool,
) -> u16 {
    let on_cartridge_side = (address & 0x400000 == 0) != mega_cd.boot_from_cd;

    if on_cartridge_side {
        if address & 0x200000 != 0 && external_ram.mapped_in() {
            return external_ram.read_word(address & 0x1FFFFF);
        }

        let cartridge_address = bankswitch.map_address(address & 0x3FFFFF);
        let mut value = 0;
        if upper {
            value |= u16::from(frontend.cartridge_read(cartridge_address)) << 8;
        }
        if lower {
            value |= u16::from(frontend.cartridge_read(cartridge_address + 1));
        }
        return value;
    }

    if address & 0x200000 != 0 {
        // WORD-RAM, Main side
        let word_ram = &mega_cd.word_ram;
        let address_words = address >> 1;
        let mut value = if word_ram.in_1m_mode {
            if address & 0x20000 != 0 {
                log::warn!("Main CPU read from the cell-image half of 1M WORD-RAM");
                0
            } else {
                let index = ((address_words as usize & 0xFFFF) * 2) + usize::from(word_ram.ret);
                word_ram.buffer[index]
            }
        } else if word_ram.dmna {
            log::warn!("Main CPU read from WORD-RAM while the Sub CPU owns it");
            0
        } else {
            word_ram.buffer[(address_words as usize) % WORD_RAM_WORDS]
        };

        if is_vdp_dma {
            // WORD-RAM DMA reads are served one word late; games schedule around
            // this hardware bug, so the staging register must be preserved
            std::mem::swap(&mut value, &mut mega_cd.delayed_dma_word);
        }

        return value;
    }

    if address & 0x20000 == 0 {
        // BIOS ROM; the H-INT vector override shadows offset 0x72. The ROM image
        // itself is served by the frontend
        if address & 0x1FFFF == 0x72 {
            return mega_cd.hblank_address;
        }

        let mut value = 0;
        if upper {
            value |= u16::from(frontend.cartridge_read(address)) << 8;
        }
        if lower {
            value |= u16::from(frontend.cartridge_read(address + 1));
        }
        return value;
    }

    // PRG-RAM window
    if !mega_cd.sub_m68k.bus_requested {
        log::warn!("Main CPU read from PRG-RAM while the Sub CPU holds its bus");
        return 0;
    }

    let index_words = 0x10000 * u32::from(mega_cd.prg_ram.bank) + ((address >> 1) & 0xFFFF);
    mega_cd.prg_ram.buffer[index_words as usize]
}

fn write_with_byte_enables(word: &mut u16, value: u16, upper: bool, lower: bool) {
    if upper {
        word.set_msb(value.msb());
    }
    if lower {
        word.set_lsb(value.lsb());
    }
}

/// VDP memory-to-VRAM DMA fetches: the medium slice plus Work RAM, exactly what the
/// DMA engine can reach without re-entering the VDP.
pub(crate) struct MainBusDmaSource<'a> {
    pub mega_cd: &'a mut MegaCdState,
    pub external_ram: &'a mut ExternalRam,
    pub bankswitch: &'a mut CartridgeBankswitch,
    pub work_ram: &'a mut BoxedWordArray<WORK_RAM_WORDS>,
}

impl<F: FrontendCallbacks> VdpDmaSource<F> for MainBusDmaSource<'_> {
    fn read_word_for_dma(&mut self, frontend: &mut F, byte_address: u32) -> u16 {
        let address = byte_address & 0xFF_FFFE;
        match address >> 21 {
            0..=3 => medium_read_word(
                frontend,
                self.mega_cd,
                self.external_ram,
                self.bankswitch,
                address,
                true,
                true,
                true,
            ),
            7 => self.work_ram[((address >> 1) as usize) % WORK_RAM_WORDS],
            _ => {
                log::warn!("VDP DMA read from unsupported address {address:#08X}");
                0
            }
        }
    }
}

// ----------------------------------------------------------------------
// CPU bus adapters
// ----------------------------------------------------------------------

pub(crate) struct MainCpuBus<'a, 'b, M, S, Z, F> {
    pub view: BusView<'a, 'b, M, S, Z, F>,
}

impl<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks> M68kBus
    for MainCpuBus<'_, '_, M, S, Z, F>
{
    fn read_word(&mut self, address: u32, upper: bool, lower: bool) -> u16 {
        let target = MegaDriveCycle(self.view.mach.sync.m68k.current_cycle);
        self.view.main_read_word(address, upper, lower, target, false)
    }

    fn write_word(&mut self, address: u32, upper: bool, lower: bool, value: u16) {
        let target = MegaDriveCycle(self.view.mach.sync.m68k.current_cycle);
        self.view.main_write_word(address, upper, lower, value, target);
    }
}

pub(crate) struct SubCpuBus<'a, 'b, M, S, Z, F> {
    pub view: BusView<'a, 'b, M, S, Z, F>,
    /// The executing instruction's address, for the BIOS-call trampolines.
    pub pc: u32,
}

impl<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks> M68kBus
    for SubCpuBus<'_, '_, M, S, Z, F>
{
    fn read_word(&mut self, address: u32, upper: bool, lower: bool) -> u16 {
        let target = MegaCdCycle(self.view.mach.sync.sub_m68k.current_cycle);
        self.view.sub_read_word(address, upper, lower, target, Some(self.pc))
    }

    fn write_word(&mut self, address: u32, upper: bool, lower: bool, value: u16) {
        let target = MegaCdCycle(self.view.mach.sync.sub_m68k.current_cycle);
        self.view.sub_write_word(address, upper, lower, value, target);
    }
}

pub(crate) struct Z80CpuBus<'a, 'b, M, S, Z, F> {
    pub view: BusView<'a, 'b, M, S, Z, F>,
}

impl<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks> Z80Bus
    for Z80CpuBus<'_, '_, M, S, Z, F>
{
    fn read(&mut self, address: u16) -> u8 {
        let target = MegaDriveCycle(self.view.mach.sync.z80.current_cycle);
        self.view.z80_read(address, target)
    }

    fn write(&mut self, address: u16, value: u8) {
        let target = MegaDriveCycle(self.view.mach.sync.z80.current_cycle);
        self.view.z80_write(address, value, target);
    }
}
