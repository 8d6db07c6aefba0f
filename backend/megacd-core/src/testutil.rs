//! Scripted CPU cores and a recording frontend for driving the machine in tests.

use mdemu_common::frontend::{Button, CD_SECTOR_WORDS, FrontendCallbacks};
use megadrive_core::cpu::{M68kBus, M68kCore, Z80Bus, Z80Core};

#[derive(Debug, Clone, Copy)]
pub(crate) enum ScriptOp {
    WriteWord { address: u32, value: u16 },
    WriteByte { address: u32, value: u8 },
    ReadWord { address: u32 },
    ReadByte { address: u32 },
    /// Simulate a JSR to a BIOS entry point: fetch from `entry` with D0 = `d0`.
    BiosCall { entry: u32, d0: u32 },
    Idle,
}

/// A 68000 stand-in that executes a fixed list of bus operations, then idles.
#[derive(Debug)]
pub(crate) struct ScriptedM68k {
    pub ops: Vec<ScriptOp>,
    pub index: usize,
    pub data: [u32; 8],
    pub address: [u32; 8],
    pub carry: bool,
    pub pc: u32,
    pub read_log: Vec<u16>,
    pub interrupts: Vec<u8>,
    pub reset_count: u32,
}

impl ScriptedM68k {
    pub fn new(ops: Vec<ScriptOp>) -> Self {
        let mut cpu = Self {
            ops,
            index: 0,
            data: [0; 8],
            address: [0; 8],
            carry: false,
            pc: 0x1000,
            read_log: Vec::new(),
            interrupts: Vec::new(),
            reset_count: 0,
        };
        cpu.prepare_next_op();
        cpu
    }

    /// Point the program counter at the next op's fetch address, the way a real core
    /// exposes the address of the instruction about to execute.
    fn prepare_next_op(&mut self) {
        self.pc = match self.ops.get(self.index) {
            Some(&ScriptOp::BiosCall { entry, .. }) => entry,
            _ => 0x1000,
        };
    }
}

impl M68kCore for ScriptedM68k {
    fn reset<B: M68kBus + ?Sized>(&mut self, bus: &mut B) {
        // Fetch the stack pointer and entry vectors like a real 68000
        let _ = bus.read_long_word(0);
        let _ = bus.read_long_word(4);
        self.reset_count += 1;
    }

    fn execute<B: M68kBus + ?Sized>(&mut self, bus: &mut B) -> u32 {
        let op = self.ops.get(self.index).copied().unwrap_or(ScriptOp::Idle);
        self.index = (self.index + 1).min(self.ops.len());

        match op {
            ScriptOp::WriteWord { address, value } => {
                bus.write_word(address >> 1, true, true, value);
            }
            ScriptOp::WriteByte { address, value } => {
                bus.write_byte(address, value);
            }
            ScriptOp::ReadWord { address } => {
                let value = bus.read_word(address >> 1, true, true);
                self.read_log.push(value);
            }
            ScriptOp::ReadByte { address } => {
                let value = bus.read_byte(address);
                self.read_log.push(value.into());
            }
            ScriptOp::BiosCall { entry, d0 } => {
                self.data[0] = d0;
                let opcode = bus.read_word(entry >> 1, true, true);
                self.read_log.push(opcode);
            }
            ScriptOp::Idle => {}
        }

        self.prepare_next_op();
        8
    }

    fn request_interrupt(&mut self, level: u8) {
        self.interrupts.push(level);
    }

    fn pc(&self) -> u32 {
        self.pc
    }

    fn data_register(&self, register: usize) -> u32 {
        self.data[register]
    }

    fn set_data_register(&mut self, register: usize, value: u32) {
        self.data[register] = value;
    }

    fn address_register(&self, register: usize) -> u32 {
        self.address[register]
    }

    fn set_address_register(&mut self, register: usize, value: u32) {
        self.address[register] = value;
    }

    fn carry(&self) -> bool {
        self.carry
    }

    fn set_carry(&mut self, carry: bool) {
        self.carry = carry;
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedZ80 {
    pub interrupt_line_changes: Vec<bool>,
    pub reset_count: u32,
}

impl ScriptedZ80 {
    pub fn new() -> Self {
        Self { interrupt_line_changes: Vec::new(), reset_count: 0 }
    }
}

impl Z80Core for ScriptedZ80 {
    fn reset(&mut self) {
        self.reset_count += 1;
    }

    fn execute<B: Z80Bus + ?Sized>(&mut self, _bus: &mut B) -> u32 {
        4
    }

    fn set_interrupt_line(&mut self, asserted: bool) {
        self.interrupt_line_changes.push(asserted);
    }
}

/// Records everything the core pushes out, and serves deterministic CD sectors whose
/// payload words count up from zero.
#[derive(Debug, Default)]
pub(crate) struct RecordingFrontend {
    pub colours: Vec<(u16, u16)>,
    pub scanlines: Vec<(u16, Vec<u8>, usize, usize)>,
    pub pressed: Vec<Button>,
    pub sectors_read: u32,
    pub seeks: Vec<u32>,
}

impl RecordingFrontend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrontendCallbacks for RecordingFrontend {
    fn colour_updated(&mut self, index: u16, colour: u16) {
        self.colours.push((index, colour));
    }

    fn scanline_rendered(
        &mut self,
        scanline: u16,
        pixels: &[u8],
        left: usize,
        right: usize,
        _screen_width: u16,
        _screen_height: u16,
    ) {
        self.scanlines.push((scanline, pixels.to_vec(), left, right));
    }

    fn input_requested(&mut self, _player: u8, button: Button) -> bool {
        self.pressed.contains(&button)
    }

    fn cd_seeked(&mut self, sector: u32) {
        self.seeks.push(sector);
    }

    fn cd_sector_read(&mut self, buffer: &mut [u16; CD_SECTOR_WORDS]) {
        for (i, word) in buffer.iter_mut().enumerate() {
            *word = i as u16;
        }
        self.sectors_read += 1;
    }
}
