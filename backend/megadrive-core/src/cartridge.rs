//! Cartridge-side state owned by the core: the external (save) RAM whose geometry is
//! parsed out of the ROM header, and the 512 KiB bank-switching table used by large
//! cartridges. The ROM bytes themselves stay with the frontend and are fetched through
//! the `cartridge_read` callback.

use bincode::{Decode, Encode};
use mdemu_common::boxedarray::BoxedByteArray;
use mdemu_common::frontend::FrontendCallbacks;
use mdemu_common::num::GetBit;
use regex::Regex;
use std::sync::OnceLock;

pub const EXTERNAL_RAM_LEN: usize = 64 * 1024;

fn read_header_word<F: FrontendCallbacks>(frontend: &mut F, address: u32) -> u16 {
    u16::from_be_bytes([frontend.cartridge_read(address), frontend.cartridge_read(address + 1)])
}

fn read_header_long<F: FrontendCallbacks>(frontend: &mut F, address: u32) -> u32 {
    (u32::from(read_header_word(frontend, address)) << 16)
        | u32::from(read_header_word(frontend, address + 2))
}

fn next_power_of_two(value: u32) -> u32 {
    value.max(1).next_power_of_two()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum ExternalRamDataSize {
    /// RAM on both byte lanes
    #[default]
    WordWide,
    /// Serial EEPROM (unsupported; logged and treated as word-wide SRAM)
    Eeprom,
    /// RAM on the even (upper) byte lane only
    EvenBytes,
    /// RAM on the odd (lower) byte lane only
    OddBytes,
}

impl ExternalRamDataSize {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::WordWide,
            1 => Self::Eeprom,
            2 => Self::EvenBytes,
            3 => Self::OddBytes,
            _ => unreachable!("value & 3 is always <= 3"),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct ExternalRam {
    buffer: BoxedByteArray<EXTERNAL_RAM_LEN>,
    size: u32,
    non_volatile: bool,
    data_size: ExternalRamDataSize,
    device_type: u8,
    mapped_in: bool,
}

impl ExternalRam {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BoxedByteArray::new(),
            size: 0,
            non_volatile: false,
            data_size: ExternalRamDataSize::default(),
            device_type: 0,
            mapped_in: false,
        }
    }

    /// Parse the external-RAM metadata block at 0x1B0 in the cartridge header and
    /// (re)configure this RAM. If the marker is missing, the locked-on cartridge
    /// pointed to by 0x1D4 is searched instead (Sonic 3 & Knuckles saves through the
    /// locked-on cartridge's header).
    pub fn configure_from_header<F: FrontendCallbacks>(
        &mut self,
        frontend: &mut F,
        cartridge_size: u32,
    ) {
        const MARKER: u16 = u16::from_be_bytes(*b"RA");

        let mut cartridge_base = 0;
        if read_header_word(frontend, 0x1B0) != MARKER {
            cartridge_base = read_header_long(frontend, 0x1D4) + 1;
        }

        self.size = 0;
        self.mapped_in = false;

        if cartridge_base & 1 != 0
            || read_header_word(frontend, cartridge_base + 0x1B0) != MARKER
        {
            return;
        }

        let metadata = read_header_word(frontend, cartridge_base + 0x1B2);
        let start = read_header_long(frontend, cartridge_base + 0x1B4);
        let end = read_header_long(frontend, cartridge_base + 0x1B8) + 1;
        let size = next_power_of_two(end.wrapping_sub(0x200000));

        self.size = EXTERNAL_RAM_LEN as u32;
        self.non_volatile = metadata.bit(14);
        self.data_size = ExternalRamDataSize::from_bits(metadata >> 11);
        self.device_type = ((metadata >> 5) & 7) as u8;
        // Cartridges larger than 2MiB have to map their external RAM in explicitly
        self.mapped_in = cartridge_size <= 2 * 1024 * 1024;

        let junk_bits = metadata & 0xA71F;
        if junk_bits != 0xA000 {
            log::warn!(
                "External RAM metadata at 0x1B2 has incorrect junk bits: expected 0xA000, was {junk_bits:#06X}"
            );
        }

        if self.device_type != 1 && self.device_type != 2 {
            log::warn!(
                "Invalid external RAM device type: expected 1 or 2, was {}",
                self.device_type
            );
        }

        if self.data_size == ExternalRamDataSize::Eeprom || self.device_type == 2 {
            log::warn!("EEPROM external RAM is not supported; treating it as SRAM");
        }

        let expected_start =
            if self.data_size == ExternalRamDataSize::OddBytes { 0x200001 } else { 0x200000 };
        if start != expected_start {
            log::warn!(
                "Invalid external RAM start address: expected {expected_start:#X}, was {start:#X}"
            );
        } else if end < start {
            log::warn!("Invalid external RAM end address: before the start address");
        } else if size > EXTERNAL_RAM_LEN as u32 {
            log::warn!(
                "External RAM is too large: must be at most {EXTERNAL_RAM_LEN:#X} bytes, was {size:#X}"
            );
        } else {
            self.size = size;
        }

        log::info!(
            "External RAM configured: size {:#X}, data size {:?}, non-volatile {}, mapped in {}",
            self.size,
            self.data_size,
            self.non_volatile,
            self.mapped_in
        );
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.size != 0
    }

    #[must_use]
    pub fn is_non_volatile(&self) -> bool {
        self.non_volatile
    }

    #[must_use]
    pub fn mapped_in(&self) -> bool {
        self.mapped_in
    }

    /// Map external RAM in or out (the 0xA130F0 register). Ignored when no external
    /// RAM is present.
    pub fn set_mapped_in(&mut self, mapped_in: bool) {
        if self.size != 0 {
            self.mapped_in = mapped_in;
        }
    }

    /// `index` is the address offset within the 2MiB external-RAM window.
    #[must_use]
    pub fn read_word(&self, index: u32) -> u16 {
        if index >= self.size {
            log::warn!("Read past the end of external RAM ({index:#X} >= {:#X})", self.size);
            return 0xFFFF;
        }

        let index = index as usize;
        u16::from_be_bytes([self.buffer[index], self.buffer[(index + 1) % EXTERNAL_RAM_LEN]])
    }

    /// Word write with byte enables. Which lanes actually hold RAM depends on the
    /// header's data-size field.
    pub fn write_word(&mut self, index: u32, value: u16, upper: bool, lower: bool) {
        if index >= self.size {
            log::warn!("Write past the end of external RAM ({index:#X} >= {:#X})", self.size);
            return;
        }

        let [high_byte, low_byte] = value.to_be_bytes();
        let index = index as usize;

        if upper
            && matches!(
                self.data_size,
                ExternalRamDataSize::WordWide
                    | ExternalRamDataSize::Eeprom
                    | ExternalRamDataSize::EvenBytes
            )
        {
            self.buffer[index] = high_byte;
        }

        if lower
            && matches!(
                self.data_size,
                ExternalRamDataSize::WordWide
                    | ExternalRamDataSize::Eeprom
                    | ExternalRamDataSize::OddBytes
            )
        {
            self.buffer[(index + 1) % EXTERNAL_RAM_LEN] = low_byte;
        }
    }

    /// The populated portion of the RAM, for save-file persistence.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.size as usize]
    }

    pub fn load_data(&mut self, data: &[u8]) {
        let len = data.len().min(EXTERNAL_RAM_LEN);
        self.buffer[..len].copy_from_slice(&data[..len]);
    }
}

impl Default for ExternalRam {
    fn default() -> Self {
        Self::new()
    }
}

/// Eight-entry bank table addressing 4MiB of cartridge space in 512 KiB banks.
/// Bank 0 is locked to 0 on real hardware; the register decode makes slot 0
/// unreachable.
#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct CartridgeBankswitch {
    banks: [u8; 8],
}

impl CartridgeBankswitch {
    #[must_use]
    pub fn new() -> Self {
        Self { banks: [0, 1, 2, 3, 4, 5, 6, 7] }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Handle a write to 0xA130F2-0xA13100. 0xA130F0 itself selects bank 0, which is
    /// not writable.
    pub fn write_register(&mut self, address: u32, value: u8) {
        let slot = ((address - 0xA130F0) / 2) as usize;
        if slot == 0 || slot >= 8 {
            return;
        }

        self.banks[slot] = value;
        log::trace!("Cartridge bank {slot} set to {value:#04X}");
    }

    #[must_use]
    pub fn map_address(&self, address: u32) -> u32 {
        let bank: u32 = self.banks[((address >> 19) & 7) as usize].into();
        (bank << 19) | (address & 0x7FFFF)
    }
}

impl Default for CartridgeBankswitch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum CartridgeRegion {
    #[default]
    Americas,
    Japan,
    Europe,
}

impl CartridgeRegion {
    /// Guess the hardware region from the header's country codes at 0x1F0.
    #[must_use]
    pub fn from_header<F: FrontendCallbacks>(frontend: &mut F) -> Self {
        let codes: [u8; 3] = std::array::from_fn(|i| frontend.cartridge_read(0x1F0 + i as u32));

        // Newer ROMs store a hex digit bitmask (bit 0 = Japan, bit 2 = Americas,
        // bit 3 = Europe); older ROMs store country-code characters
        if let Some(digit) = (codes[0] as char).to_digit(16) {
            if codes[1] == b' ' || codes[1] == 0 {
                if digit.bit(2) {
                    return Self::Americas;
                }
                if digit.bit(3) {
                    return Self::Europe;
                }
                return Self::Japan;
            }
        }

        if codes.contains(&b'U') {
            Self::Americas
        } else if codes.contains(&b'E') {
            Self::Europe
        } else {
            Self::Japan
        }
    }
}

/// Program title from the cartridge header, whitespace-collapsed.
#[must_use]
pub fn program_title<F: FrontendCallbacks>(frontend: &mut F, region: CartridgeRegion) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();

    let address = match region {
        CartridgeRegion::Americas | CartridgeRegion::Europe => 0x150,
        CartridgeRegion::Japan => 0x120,
    };

    let title: String =
        (0..48).map(|i| frontend.cartridge_read(address + i) as char).collect();

    let re = RE.get_or_init(|| Regex::new(r" +").unwrap());
    re.replace_all(title.trim(), " ").into()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RomFrontend {
        rom: Vec<u8>,
    }

    impl FrontendCallbacks for RomFrontend {
        fn cartridge_read(&mut self, address: u32) -> u8 {
            self.rom.get(address as usize).copied().unwrap_or(0)
        }
    }

    fn rom_with_sram_header() -> RomFrontend {
        let mut rom = vec![0; 0x200];
        rom[0x1B0..0x1B2].copy_from_slice(b"RA");
        // 0xA000 junk bits | data size 0 (word-wide) | non-volatile | device type 1
        let metadata: u16 = 0xA000 | (1 << 14) | (1 << 5);
        rom[0x1B2..0x1B4].copy_from_slice(&metadata.to_be_bytes());
        rom[0x1B4..0x1B8].copy_from_slice(&0x0020_0000_u32.to_be_bytes());
        rom[0x1B8..0x1BC].copy_from_slice(&0x0020_3FFF_u32.to_be_bytes());
        RomFrontend { rom }
    }

    #[test]
    fn configures_sram_from_header() {
        let mut frontend = rom_with_sram_header();
        let mut ram = ExternalRam::new();
        ram.configure_from_header(&mut frontend, 128 * 1024);

        assert!(ram.is_present());
        assert!(ram.is_non_volatile());
        assert!(ram.mapped_in());
        assert_eq!(ram.data().len(), 0x4000);
    }

    #[test]
    fn no_marker_means_no_ram() {
        let mut frontend = RomFrontend { rom: vec![0; 0x200] };
        let mut ram = ExternalRam::new();
        ram.configure_from_header(&mut frontend, 128 * 1024);

        assert!(!ram.is_present());
        // Mapping in is refused while absent
        ram.set_mapped_in(true);
        assert!(!ram.mapped_in());
    }

    #[test]
    fn odd_byte_ram_ignores_the_even_lane() {
        let mut frontend = rom_with_sram_header();
        // Rewrite metadata for odd-byte data size (3 << 11)
        let metadata: u16 = 0xA000 | (3 << 11) | (1 << 5);
        frontend.rom[0x1B2..0x1B4].copy_from_slice(&metadata.to_be_bytes());
        frontend.rom[0x1B4..0x1B8].copy_from_slice(&0x0020_0001_u32.to_be_bytes());

        let mut ram = ExternalRam::new();
        ram.configure_from_header(&mut frontend, 128 * 1024);

        ram.write_word(0, 0xABCD, true, true);
        assert_eq!(ram.read_word(0), 0x00CD);
    }

    #[test]
    fn bankswitch_mapping() {
        let mut banks = CartridgeBankswitch::new();

        // Identity mapping out of reset
        assert_eq!(banks.map_address(0x0C_1234), 0x0C_1234);
        assert_eq!(banks.map_address(0x38_0000), 0x38_0000);

        banks.write_register(0xA130FE, 0x09);
        assert_eq!(banks.map_address(0x38_1234), (0x09 << 19) | 0x1234);

        // Bank 0 cannot be remapped
        banks.write_register(0xA130F0, 0x05);
        assert_eq!(banks.map_address(0x01234), 0x01234);
    }

    #[test]
    fn title_is_whitespace_collapsed() {
        let mut frontend = RomFrontend { rom: vec![b' '; 0x200] };
        frontend.rom[0x150..0x15D].copy_from_slice(b"SONIC    THE ");
        frontend.rom[0x15D..0x165].copy_from_slice(b"HEDGEHOG");

        let title = program_title(&mut frontend, CartridgeRegion::Americas);
        assert_eq!(title, "SONIC THE HEDGEHOG");
    }
}
