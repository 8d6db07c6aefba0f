//! The video display processor: VRAM/CRAM/VSRAM, the two-phase control port, DMA, and
//! the scanline renderer.

mod blit;
mod render;
mod sprites;

use crate::vdp::sprites::SpriteRowCache;
use bincode::{Decode, Encode};
use mdemu_common::boxedarray::BoxedByteArray;
use mdemu_common::frontend::FrontendCallbacks;
use mdemu_common::num::GetBit;

pub use blit::{SHADOW_HIGHLIGHT_HIGHLIGHT, SHADOW_HIGHLIGHT_NORMAL, SHADOW_HIGHLIGHT_SHADOW};

pub const MAX_SCANLINE_WIDTH: usize = 320;

/// V30 in double-resolution interlace mode.
pub const MAX_SCANLINES: usize = 240 * 2;

const VRAM_LEN: usize = 0x10000;
const CRAM_LEN: usize = 64;
const VSRAM_LEN: usize = 64;

const TILE_WIDTH: usize = 8;
const TILE_PAIR_WIDTH: usize = TILE_WIDTH * 2;
const SCANLINE_WIDTH_IN_TILE_PAIRS: usize = MAX_SCANLINE_WIDTH / TILE_PAIR_WIDTH;
const MAX_SPRITE_WIDTH: usize = TILE_WIDTH * 4;

/// Where the VDP's memory-to-VRAM DMA fetches its words from. Reads go through the
/// observing machine's bus (cartridge fetches come from the frontend, hence the
/// callback handle), including the delayed WORD-RAM word.
pub trait VdpDmaSource<F: FrontendCallbacks> {
    fn read_word_for_dma(&mut self, frontend: &mut F, byte_address: u32) -> u16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum AccessBuffer {
    #[default]
    Vram,
    Cram,
    Vsram,
    Vram8Bit,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum DmaMode {
    #[default]
    MemoryToVram,
    Fill,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum VScrollMode {
    #[default]
    Full,
    TwoCell,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct AccessControl {
    write_pending: bool,
    /// 17 bits, so extended VRAM is addressable.
    address: u32,
    code: u8,
    increment: u8,
    selected_buffer: AccessBuffer,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct DmaState {
    enabled: bool,
    mode: DmaMode,
    source_address_high: u8,
    source_address_low: u16,
    length: u16,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct Window {
    aligned_right: bool,
    aligned_bottom: bool,
    /// In tile pairs.
    horizontal_boundary: u16,
    /// In pixels.
    vertical_boundary: u16,
}

#[derive(Debug, Clone, Default, Encode, Decode)]
struct DebugRegisters {
    selected_register: u8,
    hide_layers: bool,
    forced_layer: u8,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Vdp {
    access: AccessControl,
    dma: DmaState,
    plane_a_address: u32,
    plane_b_address: u32,
    window_address: u32,
    sprite_table_address: u32,
    hscroll_address: u32,
    window: Window,
    plane_width_shift: u8,
    plane_height_bitmask: u16,
    extended_vram_enabled: bool,
    display_enabled: bool,
    v_int_enabled: bool,
    h_int_enabled: bool,
    h40_enabled: bool,
    v30_enabled: bool,
    mega_drive_mode_enabled: bool,
    shadow_highlight_enabled: bool,
    double_resolution_enabled: bool,
    sprite_tile_index_rebase: bool,
    plane_a_tile_index_rebase: bool,
    plane_b_tile_index_rebase: bool,
    background_colour: u8,
    h_int_interval: u8,
    currently_in_vblank: bool,
    allow_sprite_masking: bool,
    hscroll_mask: u8,
    vscroll_mode: VScrollMode,
    debug: DebugRegisters,
    vram: BoxedByteArray<VRAM_LEN>,
    cram: [u16; CRAM_LEN],
    vsram: [u16; VSRAM_LEN],
    sprite_table_cache: [[u8; 4]; 80],
    sprite_row_cache: SpriteRowCache,
    /// Placeholder for the write FIFO; its stale contents leak into invalid reads and
    /// CRAM/VSRAM DMA fills.
    fifo: [u16; 4],
}

impl Vdp {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access: AccessControl::default(),
            dma: DmaState::default(),
            plane_a_address: 0,
            plane_b_address: 0,
            window_address: 0,
            sprite_table_address: 0,
            hscroll_address: 0,
            window: Window::default(),
            plane_width_shift: 5,
            plane_height_bitmask: 0x1F,
            extended_vram_enabled: false,
            display_enabled: false,
            v_int_enabled: false,
            h_int_enabled: false,
            h40_enabled: false,
            v30_enabled: false,
            mega_drive_mode_enabled: false,
            shadow_highlight_enabled: false,
            double_resolution_enabled: false,
            sprite_tile_index_rebase: false,
            plane_a_tile_index_rebase: false,
            plane_b_tile_index_rebase: false,
            background_colour: 0,
            h_int_interval: 0,
            currently_in_vblank: false,
            allow_sprite_masking: false,
            hscroll_mask: 0x00,
            vscroll_mode: VScrollMode::default(),
            debug: DebugRegisters::default(),
            vram: BoxedByteArray::new(),
            cram: [0; CRAM_LEN],
            vsram: [0; VSRAM_LEN],
            sprite_table_cache: [[0; 4]; 80],
            sprite_row_cache: SpriteRowCache::new(),
            fifo: [0; 4],
        }
    }

    #[must_use]
    pub fn h_int_enabled(&self) -> bool {
        self.h_int_enabled
    }

    #[must_use]
    pub fn v_int_enabled(&self) -> bool {
        self.v_int_enabled
    }

    #[must_use]
    pub fn h_int_interval(&self) -> u8 {
        self.h_int_interval
    }

    #[must_use]
    pub fn display_enabled(&self) -> bool {
        self.display_enabled
    }

    #[must_use]
    pub fn h40_enabled(&self) -> bool {
        self.h40_enabled
    }

    #[must_use]
    pub fn v30_enabled(&self) -> bool {
        self.v30_enabled
    }

    #[must_use]
    pub fn double_resolution_enabled(&self) -> bool {
        self.double_resolution_enabled
    }

    pub fn set_in_vblank(&mut self, in_vblank: bool) {
        self.currently_in_vblank = in_vblank;
    }

    fn dma_pending(&self) -> bool {
        self.access.code.bit(5)
    }

    fn clear_dma_pending(&mut self) {
        self.access.code &= !0x20;
    }

    fn in_read_mode(&self) -> bool {
        !self.access.code.bit(0)
    }

    fn tile_height_shift(&self) -> u8 {
        3 + u8::from(self.double_resolution_enabled)
    }

    fn sprite_table_address(&self) -> u32 {
        // The low bits are forced clear in H40 mode
        self.sprite_table_address & if self.h40_enabled { !0x3FF } else { !0x1FF }
    }

    /// Map a logical VRAM address onto the flat byte buffer: the 128 KiB extended-mode
    /// bit permutation, then the byte swap that makes dumps match what ROM hackers
    /// expect.
    fn decode_vram_address(&self, address: u32) -> u32 {
        let address = if self.extended_vram_enabled {
            ((address & 0x1F802) >> 1)
                | ((address & 0x400) >> 9)
                | (address & 0x3FC)
                | ((address & 1) << 16)
        } else {
            address & 0xFFFF
        };

        address ^ 1
    }

    fn read_vram_byte(&self, address: u32) -> u8 {
        // Reads wrap so that both halves of a word alias the same byte in 128 KiB
        // mode, which is what a Mega Drive missing its second VRAM chip does
        self.vram[self.decode_vram_address(address) as usize % VRAM_LEN]
    }

    fn read_vram_word(&self, address: u32) -> u16 {
        u16::from(self.read_vram_byte(address))
            | (u16::from(self.read_vram_byte(address ^ 1)) << 8)
    }

    fn write_vram_byte(&mut self, address: u32, value: u8) {
        let decoded = self.decode_vram_address(address);

        // Writes into the cached part of the sprite table refresh the sprite cache
        let sprite_table_offset = address.wrapping_sub(self.sprite_table_address());
        let cached_len = if self.h40_enabled { 80 * 8 } else { 64 * 8 };
        if sprite_table_offset < cached_len && sprite_table_offset & 4 == 0 {
            let entry = &mut self.sprite_table_cache[(sprite_table_offset / 8) as usize];
            entry[(sprite_table_offset & 3) as usize] = value;
            self.sprite_row_cache.needs_update = true;
        }

        if (decoded as usize) < VRAM_LEN {
            self.vram[decoded as usize] = value;
        }
    }

    fn increment_address(&mut self) {
        self.access.address =
            (self.access.address + u32::from(self.access.increment)) & 0x1FFFF;
    }

    fn update_fifo(&mut self, value: u16) {
        self.fifo.rotate_left(1);
        self.fifo[3] = value;
    }

    fn write_and_increment<F: FrontendCallbacks>(&mut self, value: u16, frontend: &mut F) {
        match self.access.selected_buffer {
            AccessBuffer::Vram => {
                self.write_vram_byte(self.access.address ^ 0, value as u8);
                self.write_vram_byte(self.access.address ^ 1, (value >> 8) as u8);
            }
            AccessBuffer::Cram => {
                let colour = value & 0xEEE;
                let index = (self.access.address as usize / 2) % CRAM_LEN;
                self.cram[index] = colour;

                // Precompute all three brightness variants so the frontend can build
                // its palette up front
                let index = index as u16;
                frontend.colour_updated(
                    u16::from(SHADOW_HIGHLIGHT_NORMAL) | index,
                    colour | ((colour & 0x888) >> 3),
                );
                frontend
                    .colour_updated(u16::from(SHADOW_HIGHLIGHT_SHADOW) | index, colour >> 1);
                frontend.colour_updated(
                    u16::from(SHADOW_HIGHLIGHT_HIGHLIGHT) | index,
                    0x888 + (colour >> 1),
                );
            }
            AccessBuffer::Vsram => {
                const VISIBLE_VSRAM_WORDS: usize = 40;

                let index = (self.access.address as usize / 2) % VSRAM_LEN;
                if index < VISIBLE_VSRAM_WORDS {
                    let vscroll = value & 0x7FF;

                    // The first two entries are mirrored into the unused upper words
                    if index < 2 {
                        let mut mirror = VISIBLE_VSRAM_WORDS + index;
                        while mirror < VSRAM_LEN {
                            self.vsram[mirror] = vscroll;
                            mirror += 2;
                        }
                    }

                    self.vsram[index] = vscroll;
                }
            }
            AccessBuffer::Vram8Bit | AccessBuffer::Invalid => {
                log::warn!(
                    "VDP write attempted with invalid access mode (code {:#04X})",
                    self.access.code
                );
            }
        }

        self.increment_address();
    }

    fn read_and_increment(&mut self) -> u16 {
        let word_address = self.access.address / 2;

        // Stale FIFO contents occupy the bits the selected buffer doesn't drive
        let mut value = self.fifo[0];

        match self.access.selected_buffer {
            AccessBuffer::Vram => {
                value = self.read_vram_word(word_address * 2);
            }
            AccessBuffer::Cram => {
                value = (value & !0xEEE) | self.cram[(word_address as usize) % CRAM_LEN];
            }
            AccessBuffer::Vsram => {
                value = (value & !0x7FF) | self.vsram[(word_address as usize) % VSRAM_LEN];
            }
            AccessBuffer::Vram8Bit => {
                value = (value & !0xFF) | u16::from(self.read_vram_byte(self.access.address));
            }
            AccessBuffer::Invalid => {
                log::warn!(
                    "VDP read attempted with invalid access mode (code {:#04X})",
                    self.access.code
                );
            }
        }

        self.increment_address();

        value
    }

    /// Read the data port.
    pub fn read_data(&mut self) -> u16 {
        self.access.write_pending = false;

        if !self.in_read_mode() {
            log::warn!("VDP data port read while the VDP is in write mode");
            // Still increments the address; the returned value is stale FIFO data
            self.increment_address();
            return self.fifo[0];
        }

        self.read_and_increment()
    }

    /// Write the data port. This is also what triggers an armed DMA fill.
    pub fn write_data<F: FrontendCallbacks>(&mut self, value: u16, frontend: &mut F) {
        self.access.write_pending = false;

        self.update_fifo(value);

        if self.in_read_mode() {
            log::warn!("VDP data port written while the VDP is in read mode");
            // The data is dropped but the address still increments
            self.increment_address();
            return;
        }

        self.write_and_increment(value, frontend);

        if self.dma_pending() {
            // DMA fill: the first data-port write after arming starts it
            self.clear_dma_pending();

            loop {
                if self.access.selected_buffer == AccessBuffer::Vram {
                    // The high byte is splatted across VRAM
                    self.write_vram_byte(self.access.address, (value >> 8) as u8);
                    self.increment_address();
                } else {
                    // CRAM/VSRAM fills pull the fill value out of the stale FIFO
                    self.write_and_increment(self.fifo[0], frontend);
                }

                self.dma.source_address_low = self.dma.source_address_low.wrapping_add(1);
                self.dma.length = self.dma.length.wrapping_sub(1);
                if self.dma.length == 0 {
                    break;
                }
            }
        }
    }

    /// Read the control port (the status register). Also cancels a half-written
    /// command word, which the official boot code relies on.
    pub fn read_control(&mut self) -> u16 {
        self.access.write_pending = false;

        let fifo_empty = true;
        0x3400 | (u16::from(fifo_empty) << 9) | (u16::from(self.currently_in_vblank) << 3)
    }

    /// Write the control port: either half of the two-word address/code command, or a
    /// register write, possibly kicking off memory-to-VRAM or copy DMA.
    pub fn write_control<F: FrontendCallbacks, D: VdpDmaSource<F>>(
        &mut self,
        value: u16,
        frontend: &mut F,
        dma_source: &mut D,
    ) {
        if self.access.write_pending || value & 0xC000 != 0x8000 {
            if self.access.write_pending {
                // Second half: address bits 16-14 and code bits 5-2 (DMA bit masked
                // off while DMA is disabled)
                let code_bitmask = if self.dma.enabled { 0x3C } else { 0x1C };

                self.access.write_pending = false;
                self.access.address =
                    (self.access.address & 0x3FFF) | (u32::from(value & 7) << 14);
                self.access.code =
                    (self.access.code & !code_bitmask) | (((value >> 2) as u8) & code_bitmask);
            } else {
                // First half: address bits 13-0 and code bits 1-0
                self.access.write_pending = true;
                self.access.address =
                    u32::from(value & 0x3FFF) | (self.access.address & (7 << 14));
                self.access.code = ((value >> 14) as u8 & 3) | (self.access.code & 0x3C);
            }

            self.access.selected_buffer = match (self.access.code >> 1) & 7 {
                0 => AccessBuffer::Vram,
                1 | 4 => AccessBuffer::Cram,
                2 => AccessBuffer::Vsram,
                6 => AccessBuffer::Vram8Bit,
                _ => AccessBuffer::Invalid,
            };
        } else {
            let register = (value >> 8) & 0x1F;
            let data = (value & 0xFF) as u8;

            // A register write leaves the access mode invalid (Sonic 3D Blast's
            // opening FMV depends on this)
            self.access.selected_buffer = AccessBuffer::Invalid;

            // Registers above 10 only exist in Mega Drive mode
            if register <= 10 || self.mega_drive_mode_enabled {
                self.write_register(register as u8, data);
            }
        }

        if self.dma_pending() && self.dma.mode != DmaMode::Fill {
            self.clear_dma_pending();
            self.run_transfer_dma(frontend, dma_source);
        }
    }

    fn run_transfer_dma<F: FrontendCallbacks, D: VdpDmaSource<F>>(
        &mut self,
        frontend: &mut F,
        dma_source: &mut D,
    ) {
        loop {
            match self.dma.mode {
                DmaMode::MemoryToVram => {
                    let source_address = (u32::from(self.dma.source_address_high) << 17)
                        | (u32::from(self.dma.source_address_low) << 1);
                    let value = dma_source.read_word_for_dma(frontend, source_address);
                    self.update_fifo(value);
                    self.write_and_increment(value, frontend);
                }
                DmaMode::Copy => {
                    let byte = self.read_vram_byte(self.dma.source_address_low.into());
                    self.write_vram_byte(self.access.address, byte);
                    self.increment_address();
                }
                DmaMode::Fill => unreachable!("fill DMA is triggered by the data port"),
            }

            // The source address wraps within a 128 KiB page, a real hardware bug
            self.dma.source_address_low = self.dma.source_address_low.wrapping_add(1);
            self.dma.length = self.dma.length.wrapping_sub(1);
            if self.dma.length == 0 {
                break;
            }
        }
    }

    fn write_register(&mut self, register: u8, data: u8) {
        log::trace!("VDP register {register} = {data:#04X}");

        match register {
            0 => {
                self.h_int_enabled = data.bit(4);
            }
            1 => {
                self.extended_vram_enabled = data.bit(7);
                self.display_enabled = data.bit(6);
                self.v_int_enabled = data.bit(5);
                self.dma.enabled = data.bit(4);
                self.v30_enabled = data.bit(3);
                self.mega_drive_mode_enabled = data.bit(2);
            }
            2 => {
                self.plane_a_address = u32::from(data & 0x78) << 10;
            }
            3 => {
                self.window_address = u32::from(data & 0x7E) << 10;
            }
            4 => {
                self.plane_b_address = u32::from(data & 0x0F) << 13;
            }
            5 => {
                // The sprite cache is deliberately NOT invalidated here; real VDPs
                // keep stale cache contents when the table address moves
                self.sprite_table_address = u32::from(data) << 9;
            }
            6 => {
                self.sprite_tile_index_rebase = data.bit(5);
            }
            7 => {
                self.background_colour = data & 0x3F;
            }
            8 | 9 => {
                // Master System legacy scroll registers
            }
            10 => {
                self.h_int_interval = data;
            }
            11 => {
                self.vscroll_mode =
                    if data.bit(2) { VScrollMode::TwoCell } else { VScrollMode::Full };
                // Full / invalid / cell / line strides
                self.hscroll_mask = [0x00, 0x07, 0xF8, 0xFF][(data & 3) as usize];
            }
            12 => {
                self.h40_enabled = data & 0x81 != 0;
                self.shadow_highlight_enabled = data.bit(3);
                // Interlace modes 0-2 all render single-resolution; mode 3 doubles
                self.double_resolution_enabled = (data >> 1) & 3 == 3;
            }
            13 => {
                self.hscroll_address = u32::from(data & 0x7F) << 10;
            }
            14 => {
                self.plane_a_tile_index_rebase = data.bit(0);
                self.plane_b_tile_index_rebase = data.bit(4) && self.plane_a_tile_index_rebase;
            }
            15 => {
                self.access.increment = data;
            }
            16 => {
                self.plane_height_bitmask = (u16::from(data) << 1) | 0x1F;
                let (width_shift, height_mask) = match data & 3 {
                    0 => (5, 0x7F),
                    1 => (6, 0x3F),
                    2 => (5, 0x00),
                    3 => (7, 0x1F),
                    _ => unreachable!("data & 3 is always <= 3"),
                };
                self.plane_width_shift = width_shift;
                self.plane_height_bitmask &= height_mask;
            }
            17 => {
                self.window.aligned_right = data.bit(7);
                self.window.horizontal_boundary =
                    (SCANLINE_WIDTH_IN_TILE_PAIRS as u16).min(u16::from(data & 0x1F));
            }
            18 => {
                self.window.aligned_bottom = data.bit(7);
                self.window.vertical_boundary = u16::from(data & 0x1F) << self.tile_height_shift();
            }
            19 => {
                self.dma.length = (self.dma.length & 0xFF00) | u16::from(data);
            }
            20 => {
                self.dma.length = (self.dma.length & 0x00FF) | (u16::from(data) << 8);
            }
            21 => {
                self.dma.source_address_low =
                    (self.dma.source_address_low & 0xFF00) | u16::from(data);
            }
            22 => {
                self.dma.source_address_low =
                    (self.dma.source_address_low & 0x00FF) | (u16::from(data) << 8);
            }
            23 => {
                if data.bit(7) {
                    self.dma.source_address_high = data & 0x3F;
                    self.dma.mode = if data.bit(6) { DmaMode::Copy } else { DmaMode::Fill };
                } else {
                    self.dma.source_address_high = data & 0x7F;
                    self.dma.mode = DmaMode::MemoryToVram;
                }
            }
            _ => {
                log::warn!("Write to invalid VDP register {register}");
            }
        }
    }

    /// The debug control port (0xC0001C): selects a debug register.
    pub fn write_debug_control(&mut self, value: u16) {
        self.debug.selected_register = ((value >> 8) & 0xF) as u8;
    }

    /// The debug data port (0xC00018).
    pub fn write_debug_data(&mut self, value: u16) {
        if self.debug.selected_register == 0 {
            self.debug.hide_layers = value.bit(6);
            self.debug.forced_layer = ((value >> 7) & 3) as u8;
        }
    }

    /// The H/V counter: the scanline-derived V counter in the high byte (with the
    /// double-resolution ninth-bit interleave) and the supplied H counter below.
    #[must_use]
    pub fn hv_counter(&self, scanline: u16, h_counter: u8) -> u16 {
        let v_counter = if self.double_resolution_enabled {
            ((scanline & 0x7F) << 1) | ((scanline & 0x80) >> 7)
        } else {
            scanline & 0xFF
        };

        (v_counter << 8) | u16::from(h_counter)
    }

    /// Screen width in pixels for the current horizontal mode.
    #[must_use]
    pub fn screen_width(&self) -> u16 {
        if self.h40_enabled { 320 } else { 256 }
    }

    /// Screen height in pixels for the current vertical mode (doubled in
    /// double-resolution interlace mode).
    #[must_use]
    pub fn screen_height(&self) -> u16 {
        u16::from(if self.v30_enabled { 30_u8 } else { 28 }) << self.tile_height_shift()
    }
}

impl Default for Vdp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFrontend {
        colours: Vec<(u16, u16)>,
    }

    impl NullFrontend {
        fn new() -> Self {
            Self { colours: Vec::new() }
        }
    }

    impl FrontendCallbacks for NullFrontend {
        fn colour_updated(&mut self, index: u16, colour: u16) {
            self.colours.push((index, colour));
        }
    }

    struct NullDmaSource;

    impl<F: FrontendCallbacks> VdpDmaSource<F> for NullDmaSource {
        fn read_word_for_dma(&mut self, _frontend: &mut F, _byte_address: u32) -> u16 {
            0
        }
    }

    struct PatternDmaSource;

    impl<F: FrontendCallbacks> VdpDmaSource<F> for PatternDmaSource {
        fn read_word_for_dma(&mut self, _frontend: &mut F, byte_address: u32) -> u16 {
            (byte_address / 2) as u16
        }
    }

    fn write_control(vdp: &mut Vdp, value: u16) {
        vdp.write_control(value, &mut NullFrontend::new(), &mut NullDmaSource);
    }

    /// The "address set" command pair for a VRAM write at the given address.
    fn set_vram_write_address(vdp: &mut Vdp, address: u16) {
        write_control(vdp, 0x4000 | (address & 0x3FFF));
        write_control(vdp, address >> 14);
    }

    #[test]
    fn register_write_sets_up_vram_access() {
        let mut vdp = Vdp::new();

        write_control(&mut vdp, 0x8104); // Mega Drive mode (registers above 10 exist)
        write_control(&mut vdp, 0x8F02); // auto-increment = 2
        assert_eq!(vdp.access.increment, 2);
        assert!(!vdp.access.write_pending);

        set_vram_write_address(&mut vdp, 0x100);
        assert_eq!(vdp.access.address, 0x100);
        assert_eq!(vdp.access.selected_buffer, AccessBuffer::Vram);
        assert!(!vdp.access.write_pending);

        vdp.write_data(0xABCD, &mut NullFrontend::new());
        assert_eq!(vdp.read_vram_word(0x100), 0xABCD);
        assert_eq!(vdp.access.address, 0x102);
    }

    #[test]
    fn control_port_read_clears_write_pending() {
        let mut vdp = Vdp::new();

        write_control(&mut vdp, 0x4000);
        assert!(vdp.access.write_pending);

        let _ = vdp.read_control();
        assert!(!vdp.access.write_pending);
    }

    #[test]
    fn cram_write_emits_all_three_brightness_variants() {
        let mut vdp = Vdp::new();
        let mut frontend = NullFrontend::new();

        // Address 0, CRAM write (CD = 0b000011 -> first word 0xC000)
        write_control(&mut vdp, 0xC000);
        write_control(&mut vdp, 0x0000);
        vdp.write_data(0x0E86, &mut frontend);

        assert_eq!(vdp.cram[0], 0x0E86);
        let normal = 0x0E86 | ((0x0E86 & 0x0888) >> 3);
        assert_eq!(
            frontend.colours,
            vec![(0x00, normal), (0x40, 0x0E86 >> 1), (0x80, 0x888 + (0x0E86 >> 1))]
        );
    }

    #[test]
    fn vsram_mirrors_first_two_entries() {
        let mut vdp = Vdp::new();
        let mut frontend = NullFrontend::new();

        write_control(&mut vdp, 0x8104);
        write_control(&mut vdp, 0x8F02);

        // VSRAM write: CD = 0b000101 -> first word 0x4000 | code bits, second 0x0010
        write_control(&mut vdp, 0x4000);
        write_control(&mut vdp, 0x0010);
        assert_eq!(vdp.access.selected_buffer, AccessBuffer::Vsram);

        vdp.write_data(0x123, &mut frontend);
        assert_eq!(vdp.vsram[0], 0x123);
        assert_eq!(vdp.vsram[40], 0x123);
        assert_eq!(vdp.vsram[62], 0x123);

        vdp.write_data(0x456, &mut frontend);
        assert_eq!(vdp.vsram[1], 0x456);
        assert_eq!(vdp.vsram[41], 0x456);
        assert_eq!(vdp.vsram[63], 0x456);
    }

    #[test]
    fn dma_fill_splats_high_byte() {
        let mut vdp = Vdp::new();
        let mut frontend = NullFrontend::new();

        write_control(&mut vdp, 0x8114); // enable DMA
        write_control(&mut vdp, 0x8F01); // auto-increment = 1
        write_control(&mut vdp, 0x9310); // DMA length low = 0x10
        write_control(&mut vdp, 0x9400); // DMA length high = 0
        write_control(&mut vdp, 0x9780); // DMA mode = fill

        // VRAM write to address 0 with CD5 set (DMA pending)
        write_control(&mut vdp, 0x4000);
        vdp.write_control(0x0080, &mut frontend, &mut NullDmaSource);

        vdp.write_data(0xAA00, &mut frontend);

        // The first write was a normal data write of 0xAA00 (low byte 0x00 to address
        // 0); the fill then splats the high byte from address 1 onward
        assert_eq!(vdp.read_vram_byte(0), 0x00);
        for address in 1..=0x10 {
            assert_eq!(vdp.read_vram_byte(address), 0xAA, "address {address:#X}");
        }
        assert_eq!(vdp.dma.length, 0);
    }

    #[test]
    fn dma_fill_into_cram_uses_stale_fifo() {
        let mut vdp = Vdp::new();
        let mut frontend = NullFrontend::new();

        // Seed the FIFO with older writes
        set_vram_write_address(&mut vdp, 0);
        for value in [0x111, 0x222, 0x333, 0x444] {
            vdp.write_data(value, &mut frontend);
        }

        write_control(&mut vdp, 0x8114);
        write_control(&mut vdp, 0x8F02);
        write_control(&mut vdp, 0x9304); // length = 4
        write_control(&mut vdp, 0x9400);
        write_control(&mut vdp, 0x9780); // fill

        // CRAM write address 0 with DMA pending
        write_control(&mut vdp, 0xC000);
        vdp.write_control(0x0080, &mut frontend, &mut NullDmaSource);

        vdp.write_data(0x0EEE, &mut frontend);

        // CRAM[0] got the written value, but the fill pulled the oldest FIFO entry
        // (0x222 after the trigger write shifted the FIFO)
        assert_eq!(vdp.cram[0], 0x0EEE);
        assert_eq!(vdp.cram[1], 0x0222 & 0xEEE);
        assert_eq!(vdp.cram[2], 0x0222 & 0xEEE);
    }

    #[test]
    fn memory_to_vram_dma_wraps_source_at_128k() {
        let mut vdp = Vdp::new();
        let mut frontend = NullFrontend::new();

        write_control(&mut vdp, 0x8114);
        write_control(&mut vdp, 0x8F02);
        write_control(&mut vdp, 0x9304); // length 4
        write_control(&mut vdp, 0x9400);
        // Source: high = 0, low = 0xFFFE (2 words before the page wrap)
        write_control(&mut vdp, 0x95FE);
        write_control(&mut vdp, 0x96FF);
        write_control(&mut vdp, 0x9700);

        // VRAM write address 0 with CD5 set triggers the transfer immediately
        write_control(&mut vdp, 0x4000);
        vdp.write_control(0x0080, &mut frontend, &mut PatternDmaSource);

        // Words fetched from 0xFFFE, 0xFFFF, then wrapped to 0x0000, 0x0001
        assert_eq!(vdp.read_vram_word(0), 0xFFFE);
        assert_eq!(vdp.read_vram_word(2), 0xFFFF);
        assert_eq!(vdp.read_vram_word(4), 0x0000);
        assert_eq!(vdp.read_vram_word(6), 0x0001);
        assert_eq!(vdp.dma.length, 0);
    }

    #[test]
    fn invalid_mode_reads_return_fifo_and_still_increment() {
        let mut vdp = Vdp::new();
        let mut frontend = NullFrontend::new();

        write_control(&mut vdp, 0x8104);
        set_vram_write_address(&mut vdp, 0);
        vdp.write_data(0x1234, &mut frontend);

        // Still in write mode; reading the data port is invalid
        write_control(&mut vdp, 0x8F02);
        set_vram_write_address(&mut vdp, 0x40);
        let address_before = vdp.access.address;
        let value = vdp.read_data();
        assert_eq!(value, vdp.fifo[0]);
        assert_eq!(vdp.access.address, address_before + 2);
    }

    #[test]
    fn vram_byte_swap_law() {
        let mut vdp = Vdp::new();
        let mut frontend = NullFrontend::new();

        write_control(&mut vdp, 0x8104);
        write_control(&mut vdp, 0x8F02);
        set_vram_write_address(&mut vdp, 0x200);
        vdp.write_data(0xBEEF, &mut frontend);

        let word = vdp.read_vram_word(0x200);
        assert_eq!(word, 0xBEEF);
        assert_eq!(vdp.read_vram_byte(0x200), (word & 0xFF) as u8);
        assert_eq!(vdp.read_vram_byte(0x201), (word >> 8) as u8);
    }
}
