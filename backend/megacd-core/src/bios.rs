//! The Sub-CPU system-call interface.
//!
//! The real BIOS exposes two entry points in PRG-RAM: 0x5F16 (backup-RAM calls) and
//! 0x5F22 (CD calls). Executing either address returns an RTS opcode from the bus,
//! and the requested service runs against the machine at the instruction boundary;
//! callers observe its register and carry-flag results right after their JSR returns.

use crate::cdc::DeviceDestination;
use crate::memory::BusView;
use bincode::{Decode, Encode};
use mdemu_common::frontend::{CddaMode, FrontendCallbacks};
use mdemu_common::num::U16Ext;
use megadrive_core::cpu::{M68kCore, Z80Core};
use megadrive_core::timing::MegaCdCycle;

const BRAM_ENTRY_POINT: u32 = 0x5F16;
const BIOS_ENTRY_POINT: u32 = 0x5F22;

/// The RTS opcode served in place of the entry point's contents.
pub(crate) const RETURN_FROM_SUBROUTINE: u16 = 0x4E75;

const FILE_NAME_LENGTH: u32 = 11;

fn buram_block_size(write_protected: bool) -> u32 {
    if write_protected { 0x20 } else { 0x40 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum PendingBiosCall {
    BackupRam,
    Bios,
}

impl PendingBiosCall {
    /// Detect an instruction fetch from one of the system-call entry points.
    #[must_use]
    pub fn trampoline(byte_address: u32, program_counter: u32) -> Option<Self> {
        if byte_address == BRAM_ENTRY_POINT && program_counter == BRAM_ENTRY_POINT {
            Some(Self::BackupRam)
        } else if byte_address == BIOS_ENTRY_POINT && program_counter == BIOS_ENTRY_POINT {
            Some(Self::Bios)
        } else {
            None
        }
    }
}

pub(crate) fn dispatch<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>(
    view: &mut BusView<'_, '_, M, S, Z, F>,
    sub_cpu: &mut S,
    call: PendingBiosCall,
) {
    match call {
        PendingBiosCall::BackupRam => backup_ram_call(view, sub_cpu),
        PendingBiosCall::Bios => bios_call(view, sub_cpu),
    }
}

struct SubBusAccess<'v, 'a, 'b, M, S, Z, F> {
    view: &'v mut BusView<'a, 'b, M, S, Z, F>,
}

impl<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>
    SubBusAccess<'_, '_, '_, M, S, Z, F>
{
    fn target(&self) -> MegaCdCycle {
        MegaCdCycle(self.view.mach.sync.sub_m68k.current_cycle)
    }

    fn read_byte(&mut self, byte_address: u32) -> u8 {
        let upper = byte_address & 1 == 0;
        let target = self.target();
        let word = self.view.sub_read_word(byte_address >> 1, upper, !upper, target, None);
        if upper { word.msb() } else { word.lsb() }
    }

    fn read_word(&mut self, byte_address: u32) -> u16 {
        let target = self.target();
        self.view.sub_read_word(byte_address >> 1, true, true, target, None)
    }

    fn read_long_word(&mut self, byte_address: u32) -> u32 {
        (u32::from(self.read_word(byte_address)) << 16)
            | u32::from(self.read_word(byte_address.wrapping_add(2)))
    }

    fn write_byte(&mut self, byte_address: u32, value: u8) {
        let upper = byte_address & 1 == 0;
        let target = self.target();
        let word = u16::from_be_bytes([value, value]);
        self.view.sub_write_word(byte_address >> 1, upper, !upper, word, target);
    }

    fn write_word(&mut self, byte_address: u32, value: u16) {
        let target = self.target();
        self.view.sub_write_word(byte_address >> 1, true, true, value, target);
    }
}

fn rom_seek<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>(
    view: &mut BusView<'_, '_, M, S, Z, F>,
    starting_sector: u32,
    total_sectors: u32,
) {
    let mega_cd = &mut view.mach.state.mega_cd;
    mega_cd.cdc.stop();
    mega_cd.cdc.seek(view.mach.frontend, starting_sector, total_sectors);
    view.mach.frontend.cd_seeked(starting_sector);
}

fn cdc_start<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>(
    view: &mut BusView<'_, '_, M, S, Z, F>,
) {
    let mega_cd = &mut view.mach.state.mega_cd;
    mega_cd.cdda.set_playing(false);
    mega_cd.cdc.start(view.mach.frontend);
}

fn bios_call<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>(
    view: &mut BusView<'_, '_, M, S, Z, F>,
    sub_cpu: &mut S,
) {
    let command = sub_cpu.data_register(0) & 0xFFFF;
    log::trace!("BIOS call {command:#04X}");

    match command {
        0x02 | 0x03 => {
            // MSCSTOP / MSCPAUSEON; stop behaves as a pause here
            view.mach.state.mega_cd.cdda.set_paused(true);
        }
        0x04 => {
            // MSCPAUSEOFF
            view.mach.state.mega_cd.cdda.set_paused(false);
        }
        0x11 | 0x12 | 0x13 => {
            // MSCPLAY / MSCPLAY1 / MSCPLAYR
            let track_number =
                SubBusAccess { view: &mut *view }.read_word(sub_cpu.address_register(0));

            let mode = match command {
                0x11 => CddaMode::PlayAll,
                0x12 => CddaMode::PlayOnce,
                _ => CddaMode::Repeat,
            };

            let cdda = &mut view.mach.state.mega_cd.cdda;
            cdda.set_playing(true);
            cdda.set_paused(false);

            view.mach.frontend.cd_track_seeked(track_number, mode);
        }
        0x17 => {
            // ROMREAD
            let starting_sector =
                SubBusAccess { view: &mut *view }.read_long_word(sub_cpu.address_register(0));
            rom_seek(view, starting_sector, 0);
            cdc_start(view);
        }
        0x18 => {
            // ROMSEEK
            let starting_sector =
                SubBusAccess { view: &mut *view }.read_long_word(sub_cpu.address_register(0));
            rom_seek(view, starting_sector, 0);
        }
        0x20 => {
            // ROMREADN
            let mut access = SubBusAccess { view: &mut *view };
            let starting_sector = access.read_long_word(sub_cpu.address_register(0));
            let total_sectors = access.read_long_word(sub_cpu.address_register(0) + 4);

            rom_seek(view, starting_sector, total_sectors);
            cdc_start(view);
        }
        0x21 => {
            // ROMREADE: the second parameter is the last sector rather than a count
            let mut access = SubBusAccess { view: &mut *view };
            let starting_sector = access.read_long_word(sub_cpu.address_register(0));
            let last_sector = access.read_long_word(sub_cpu.address_register(0) + 4);

            let total_sectors = last_sector.saturating_sub(starting_sector);
            rom_seek(view, starting_sector, total_sectors);
            cdc_start(view);
        }
        0x85 => {
            // FDRSET
            let value = sub_cpu.data_register(1);
            let volume = (value & 0x7FFF) as u16;
            let cdda = &mut view.mach.state.mega_cd.cdda;
            if value & 0x8000 != 0 {
                cdda.set_master_volume(volume);
            } else {
                cdda.set_volume(volume);
            }
        }
        0x86 => {
            // FDRCHG
            let value = sub_cpu.data_register(1);
            let target_volume = (value >> 16) as u16;
            let fade_step = value as u16;
            view.mach.state.mega_cd.cdda.fade_to_volume(target_volume, fade_step);
        }
        0x88 => {
            // CDCSTART
            cdc_start(view);
        }
        0x89 => {
            // CDCSTOP
            view.mach.state.mega_cd.cdc.stop();
        }
        0x8A => {
            // CDCSTAT: carry set when no sector is buffered
            let ready = view.mach.state.mega_cd.cdc.stat(view.mach.frontend);
            sub_cpu.set_carry(!ready);
        }
        0x8B => {
            cdc_read(view, sub_cpu);
        }
        0x8C => {
            cdc_transfer(view, sub_cpu);
        }
        0x8D => {
            // CDCACK
            view.mach.state.mega_cd.cdc.ack();
        }
        _ => {
            log::warn!("Unrecognized BIOS call {command:#04X}");
        }
    }
}

/// CDCREAD: bind the next sector and, for the RAM destinations, run the transfer
/// immediately through the Sub-CPU bus. The DMA address register counts Sub
/// address-space bytes (units of 8), not destination-RAM bytes; PCM transfers expose
/// this by landing each sector byte on every other wave-RAM byte.
fn cdc_read<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>(
    view: &mut BusView<'_, '_, M, S, Z, F>,
    sub_cpu: &mut S,
) {
    let Some(header) = view.mach.state.mega_cd.cdc.read(view.mach.frontend) else {
        sub_cpu.set_carry(true);
        return;
    };

    sub_cpu.set_data_register(0, header);

    let destination = view.mach.state.mega_cd.cdc.device_destination();
    if matches!(
        destination,
        DeviceDestination::PcmRam | DeviceDestination::PrgRam | DeviceDestination::WordRam
    ) {
        let offset = u32::from(view.mach.state.mega_cd.cdc.dma_address()) * 8;

        let mut address = match destination {
            DeviceDestination::PcmRam => 0xFF2000 + (offset & 0x1FFF),
            DeviceDestination::PrgRam => offset & 0x7FFFF,
            DeviceDestination::WordRam => {
                if view.mach.state.mega_cd.word_ram.in_1m_mode {
                    0xC0000 + (offset & 0x1FFFF)
                } else {
                    0x80000 + (offset & 0x3FFFF)
                }
            }
            _ => unreachable!("destination was just matched"),
        };

        // The two header words are not part of the transfer
        view.mach.state.mega_cd.cdc.host_data(true);
        view.mach.state.mega_cd.cdc.host_data(true);

        while view.mach.state.mega_cd.cdc.mode(true) & 0x4000 != 0 {
            let word = view.mach.state.mega_cd.cdc.host_data(true);

            let mut access = SubBusAccess { view: &mut *view };
            if destination == DeviceDestination::PcmRam {
                // Byte-wide device: each byte occupies a word-sized bus slot
                access.write_word(address, word >> 8);
                address += 2;
                access.write_word(address, word & 0xFF);
            } else {
                access.write_word(address, word);
            }
            address += 2;
        }
    }

    sub_cpu.set_carry(false);
}

/// CDCTRN: transfer the bound sector to Sub-CPU-supplied buffers, header to [A1] and
/// payload to [A0], advancing both pointers.
fn cdc_transfer<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>(
    view: &mut BusView<'_, '_, M, S, Z, F>,
    sub_cpu: &mut S,
) {
    if view.mach.state.mega_cd.cdc.mode(true) & 0x8000 != 0 {
        sub_cpu.set_carry(true);
        return;
    }

    let sector_address = sub_cpu.address_register(0);
    let header_address = sub_cpu.address_register(1);

    for i in 0..2 {
        let word = view.mach.state.mega_cd.cdc.host_data(true);
        SubBusAccess { view: &mut *view }.write_word(header_address + i * 2, word);
    }

    for i in 0..0x400 {
        let word = view.mach.state.mega_cd.cdc.host_data(true);
        SubBusAccess { view: &mut *view }.write_word(sector_address + i * 2, word);
    }

    sub_cpu.set_address_register(0, sector_address.wrapping_add(0x800));
    sub_cpu.set_address_register(1, header_address.wrapping_add(4));
    sub_cpu.set_carry(false);
}

// ----------------------------------------------------------------------
// Backup RAM
// ----------------------------------------------------------------------

fn read_file_name<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>(
    view: &mut BusView<'_, '_, M, S, Z, F>,
    sub_cpu: &S,
    write_protected: bool,
) -> String {
    let mut access = SubBusAccess { view: &mut *view };

    let mut name = String::with_capacity(18);
    for i in 0..FILE_NAME_LENGTH {
        name.push(access.read_byte(sub_cpu.address_register(0) + i) as char);
    }

    if write_protected {
        name.push_str(".wp");
    }
    name.push_str(".brm");

    name
}

fn backup_ram_call<M: M68kCore, S: M68kCore, Z: Z80Core, F: FrontendCallbacks>(
    view: &mut BusView<'_, '_, M, S, Z, F>,
    sub_cpu: &mut S,
) {
    let command = sub_cpu.data_register(0) & 0xFFFF;
    log::trace!("BRAM call {command:#04X}");

    match command {
        0x00 => {
            // BRMINIT: formatted RAM of the maximum officially-allowed size
            sub_cpu.set_carry(false);
            let d0 = (sub_cpu.data_register(0) & 0xFFFF_0000) | 0x100;
            sub_cpu.set_data_register(0, d0);
        }
        0x01 => {
            // BRMSTAT: report plenty of free blocks and a single file
            let d0 = (sub_cpu.data_register(0) & 0xFFFF_0000) | 100;
            sub_cpu.set_data_register(0, d0);
            let d1 = (sub_cpu.data_register(1) & 0xFFFF_0000) | 1;
            sub_cpu.set_data_register(1, d1);
        }
        0x02 => {
            // BRMSERCH
            let mut found = None;
            for write_protected in [false, true] {
                let name = read_file_name(view, sub_cpu, write_protected);
                if let Some(size) = view.mach.frontend.save_file_size_obtained(&name) {
                    found = Some((write_protected, size));
                    break;
                }
            }

            match found {
                None => sub_cpu.set_carry(true),
                Some((write_protected, size)) => {
                    let blocks = size as u32 / buram_block_size(write_protected);
                    let d0 = (sub_cpu.data_register(0) & 0xFFFF_0000) | (blocks & 0xFFFF);
                    sub_cpu.set_data_register(0, d0);
                    let d1 = (sub_cpu.data_register(1) & 0xFFFF_FF00)
                        | if write_protected { 0xFF } else { 0 };
                    sub_cpu.set_data_register(1, d1);
                    sub_cpu.set_carry(false);
                }
            }
        }
        0x03 => {
            // BRMREAD
            let mut opened = None;
            for write_protected in [false, true] {
                let name = read_file_name(view, sub_cpu, write_protected);
                if view.mach.frontend.save_file_opened_for_reading(&name) {
                    opened = Some(write_protected);
                    break;
                }
            }

            match opened {
                None => sub_cpu.set_carry(true),
                Some(write_protected) => {
                    let mut total_bytes: u32 = 0;
                    loop {
                        let value = view.mach.frontend.save_file_read();
                        if value == -1 {
                            break;
                        }
                        SubBusAccess { view: &mut *view }.write_byte(
                            sub_cpu.address_register(1) + total_bytes,
                            value as u8,
                        );
                        total_bytes += 1;
                    }
                    view.mach.frontend.save_file_closed();

                    let blocks = total_bytes / buram_block_size(write_protected);
                    let d0 = (sub_cpu.data_register(0) & 0xFFFF_0000) | (blocks & 0xFFFF);
                    sub_cpu.set_data_register(0, d0);
                    let d1 = (sub_cpu.data_register(1) & 0xFFFF_FF00)
                        | if write_protected { 0xFF } else { 0 };
                    sub_cpu.set_data_register(1, d1);
                    sub_cpu.set_carry(false);
                }
            }
        }
        0x04 => {
            // BRMWRITE: the write-protect flag and block count follow the name
            let write_protected = SubBusAccess { view: &mut *view }
                .read_byte(sub_cpu.address_register(0) + FILE_NAME_LENGTH)
                != 0;
            let name = read_file_name(view, sub_cpu, write_protected);

            if !view.mach.frontend.save_file_opened_for_writing(&name) {
                sub_cpu.set_carry(true);
            } else {
                let total_blocks = u32::from(
                    SubBusAccess { view: &mut *view }
                        .read_word(sub_cpu.address_register(0) + FILE_NAME_LENGTH + 1),
                );
                let total_bytes = total_blocks * buram_block_size(write_protected);

                for i in 0..total_bytes {
                    let byte =
                        SubBusAccess { view: &mut *view }.read_byte(sub_cpu.address_register(1) + i);
                    view.mach.frontend.save_file_written(byte);
                }
                view.mach.frontend.save_file_closed();

                sub_cpu.set_carry(false);
            }
        }
        0x05 => {
            // BRMDEL
            let mut removed = false;
            for write_protected in [false, true] {
                let name = read_file_name(view, sub_cpu, write_protected);
                removed |= view.mach.frontend.save_file_removed(&name);
            }
            sub_cpu.set_carry(!removed);
        }
        0x06 => {
            // BRMFORMAT
            sub_cpu.set_carry(false);
        }
        0x07 => {
            // BRMDIR is not supported
            sub_cpu.set_carry(true);
        }
        0x08 => {
            // BRMVERIFY
            let write_protected = SubBusAccess { view: &mut *view }
                .read_byte(sub_cpu.address_register(0) + FILE_NAME_LENGTH)
                != 0;
            let name = read_file_name(view, sub_cpu, write_protected);

            if !view.mach.frontend.save_file_opened_for_reading(&name) {
                sub_cpu.set_carry(true);
            } else {
                let total_blocks = u32::from(
                    SubBusAccess { view: &mut *view }
                        .read_word(sub_cpu.address_register(0) + FILE_NAME_LENGTH + 1),
                );
                let total_bytes = total_blocks * buram_block_size(write_protected);

                let mut verified = 0;
                while verified < total_bytes {
                    let expected =
                        SubBusAccess { view: &mut *view }.read_byte(sub_cpu.address_register(1) + verified);
                    let actual = view.mach.frontend.save_file_read();

                    if actual == -1 || actual as u8 != expected {
                        break;
                    }
                    verified += 1;
                }
                view.mach.frontend.save_file_closed();

                sub_cpu.set_carry(verified != total_bytes);
            }
        }
        _ => {
            log::warn!("Unrecognized BRAM call {command:#04X}");
        }
    }
}
