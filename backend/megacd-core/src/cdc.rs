//! The CD data controller: a five-sector ring buffer between the disc drive and the
//! host-data port, with a destination latch that steers each bound sector at one of
//! the two CPUs or one of the three RAM targets.

use bincode::{Decode, Encode};
use mdemu_common::frontend::{CD_SECTOR_WORDS, FrontendCallbacks};
use mdemu_common::num::to_bcd;
use std::array;

pub const SECTOR_BUFFER_COUNT: usize = 5;

/// Two header words (BCD MSF + mode) in front of the 0x400-word payload.
const BUFFERED_SECTOR_WORDS: usize = 2 + CD_SECTOR_WORDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum DeviceDestination {
    MainCpuRead,
    SubCpuRead,
    PcmRam,
    PrgRam,
    WordRam,
    Invalid(u8),
}

impl DeviceDestination {
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            2 => Self::MainCpuRead,
            3 => Self::SubCpuRead,
            4 => Self::PcmRam,
            5 => Self::PrgRam,
            7 => Self::WordRam,
            bits => Self::Invalid(bits),
        }
    }

    #[must_use]
    pub fn to_bits(self) -> u8 {
        match self {
            Self::MainCpuRead => 2,
            Self::SubCpuRead => 3,
            Self::PcmRam => 4,
            Self::PrgRam => 5,
            Self::WordRam => 7,
            Self::Invalid(bits) => bits,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct BufferedSector {
    words: Box<[u16; BUFFERED_SECTOR_WORDS]>,
}

impl BufferedSector {
    fn new() -> Self {
        Self { words: vec![0; BUFFERED_SECTOR_WORDS].into_boxed_slice().try_into().unwrap() }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Cdc {
    buffered_sectors: [BufferedSector; SECTOR_BUFFER_COUNT],
    current_sector: u32,
    sectors_remaining: u32,
    host_data_word_index: usize,
    host_data_buffered_sector_index: usize,
    read_index: usize,
    write_index: usize,
    buffered_total: usize,
    dma_address: u16,
    device_destination: DeviceDestination,
    host_data_target_sub_cpu: bool,
    reading: bool,
    host_data_bound: bool,
}

impl Cdc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffered_sectors: array::from_fn(|_| BufferedSector::new()),
            current_sector: 0,
            sectors_remaining: 0,
            host_data_word_index: BUFFERED_SECTOR_WORDS,
            host_data_buffered_sector_index: 0,
            read_index: 0,
            write_index: 0,
            buffered_total: 0,
            dma_address: 0,
            device_destination: DeviceDestination::SubCpuRead,
            host_data_target_sub_cpu: false,
            reading: false,
            host_data_bound: false,
        }
    }

    #[must_use]
    pub fn device_destination(&self) -> DeviceDestination {
        self.device_destination
    }

    /// Writing the destination also resets the DMA address counter.
    pub fn set_device_destination(&mut self, destination: DeviceDestination) {
        log::trace!("CDC device destination set to {destination:?}");
        self.device_destination = destination;
        self.dma_address = 0;
    }

    #[must_use]
    pub fn dma_address(&self) -> u16 {
        self.dma_address
    }

    pub fn set_dma_address(&mut self, dma_address: u16) {
        self.dma_address = dma_address;
    }

    fn sector_header_words(&self) -> [u16; 2] {
        let minutes = to_bcd((self.current_sector / (75 * 60)) as u8);
        let seconds = to_bcd(((self.current_sector / 75) % 60) as u8);
        let frames = to_bcd((self.current_sector % 75) as u8);
        let mode = 0x01;

        [u16::from_be_bytes([minutes, seconds]), u16::from_be_bytes([frames, mode])]
    }

    /// Pull sectors from the disc until the ring is full or the programmed sector
    /// count runs out.
    fn refill_sector_buffer<F: FrontendCallbacks>(&mut self, frontend: &mut F) {
        if !self.reading {
            return;
        }

        while self.buffered_total != SECTOR_BUFFER_COUNT {
            let header = self.sector_header_words();
            let sector = &mut self.buffered_sectors[self.write_index];
            sector.words[0] = header[0];
            sector.words[1] = header[1];

            let payload: &mut [u16; CD_SECTOR_WORDS] =
                (&mut sector.words[2..]).try_into().unwrap();
            frontend.cd_sector_read(payload);

            self.current_sector += 1;
            self.buffered_total += 1;
            self.write_index = (self.write_index + 1) % SECTOR_BUFFER_COUNT;

            if self.sectors_remaining != 0 {
                self.sectors_remaining -= 1;
                if self.sectors_remaining == 0 {
                    self.reading = false;
                    break;
                }
            }
        }
    }

    pub fn start<F: FrontendCallbacks>(&mut self, frontend: &mut F) {
        self.reading = true;
        self.refill_sector_buffer(frontend);
    }

    pub fn stop(&mut self) {
        self.reading = false;
    }

    /// Point the drive at `sector` and program an automatic read length
    /// (0 = unbounded).
    pub fn seek<F: FrontendCallbacks>(
        &mut self,
        frontend: &mut F,
        sector: u32,
        total_sectors: u32,
    ) {
        self.current_sector = sector;
        self.sectors_remaining = total_sectors;
        self.refill_sector_buffer(frontend);
    }

    /// CDCSTAT: is a sector buffered?
    pub fn stat<F: FrontendCallbacks>(&mut self, frontend: &mut F) -> bool {
        self.refill_sector_buffer(frontend);
        self.buffered_total != 0
    }

    /// CDCREAD: bind the oldest buffered sector to the host-data port and return its
    /// header (MSF + mode). Fails when the ring is empty, a sector is already bound,
    /// or the destination is invalid.
    pub fn read<F: FrontendCallbacks>(&mut self, frontend: &mut F) -> Option<u32> {
        self.refill_sector_buffer(frontend);

        if self.buffered_total == 0 || self.host_data_bound {
            return None;
        }

        self.host_data_target_sub_cpu = match self.device_destination {
            DeviceDestination::MainCpuRead => false,
            DeviceDestination::SubCpuRead
            | DeviceDestination::PcmRam
            | DeviceDestination::PrgRam
            | DeviceDestination::WordRam => true,
            DeviceDestination::Invalid(bits) => {
                log::warn!("CDCREAD with invalid device destination {bits:#X}");
                return None;
            }
        };

        self.host_data_buffered_sector_index = self.read_index;
        self.host_data_word_index = 0;
        self.host_data_bound = true;

        let words = &self.buffered_sectors[self.host_data_buffered_sector_index].words;
        Some((u32::from(words[0]) << 16) | u32::from(words[1]))
    }

    /// The host-data port. Once the bound sector is exhausted, the final word repeats
    /// indefinitely.
    pub fn host_data(&mut self, is_sub_cpu: bool) -> u16 {
        if is_sub_cpu != self.host_data_target_sub_cpu || !self.host_data_bound {
            return 0;
        }

        let words = &self.buffered_sectors[self.host_data_buffered_sector_index].words;
        if self.host_data_word_index >= BUFFERED_SECTOR_WORDS {
            words[BUFFERED_SECTOR_WORDS - 1]
        } else {
            let word = words[self.host_data_word_index];
            self.host_data_word_index += 1;
            word
        }
    }

    /// CDCACK: unbind the transferred sector and free its ring slot.
    pub fn ack(&mut self) {
        if !self.host_data_bound {
            return;
        }

        self.host_data_bound = false;
        self.buffered_total -= 1;
        self.read_index = (self.read_index + 1) % SECTOR_BUFFER_COUNT;
    }

    /// The CDC mode register for the querying CPU: EDT (end of data transfer) in bit
    /// 15, DSR (data set ready) in bit 14.
    #[must_use]
    pub fn mode(&self, is_sub_cpu: bool) -> u16 {
        if is_sub_cpu != self.host_data_target_sub_cpu {
            return 0x8000;
        }

        let end_of_data_transfer = self.host_data_word_index >= BUFFERED_SECTOR_WORDS - 1;
        let data_set_ready = self.host_data_word_index != BUFFERED_SECTOR_WORDS;

        (u16::from(end_of_data_transfer) << 15) | (u16::from(data_set_ready) << 14)
    }
}

impl Default for Cdc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serves sectors whose payload words all equal the sector number.
    struct CountingDisc {
        next_sector: u16,
        reads: u32,
    }

    impl CountingDisc {
        fn new() -> Self {
            Self { next_sector: 0, reads: 0 }
        }
    }

    impl FrontendCallbacks for CountingDisc {
        fn cd_sector_read(&mut self, buffer: &mut [u16; CD_SECTOR_WORDS]) {
            buffer.fill(self.next_sector);
            self.next_sector += 1;
            self.reads += 1;
        }
    }

    #[test]
    fn ring_holds_at_most_five_sectors() {
        let mut cdc = Cdc::new();
        let mut disc = CountingDisc::new();

        cdc.start(&mut disc);
        assert_eq!(disc.reads, 5);

        // No room; further polls read nothing
        assert!(cdc.stat(&mut disc));
        assert_eq!(disc.reads, 5);

        // Consuming one sector frees one slot
        cdc.read(&mut disc).unwrap();
        cdc.ack();
        assert!(cdc.stat(&mut disc));
        assert_eq!(disc.reads, 6);
    }

    #[test]
    fn ring_index_invariant_holds() {
        let mut cdc = Cdc::new();
        let mut disc = CountingDisc::new();

        cdc.start(&mut disc);
        for _ in 0..7 {
            cdc.read(&mut disc).unwrap();
            cdc.ack();
            assert_eq!(
                (cdc.read_index + cdc.buffered_total) % SECTOR_BUFFER_COUNT,
                cdc.write_index
            );
        }
    }

    #[test]
    fn header_is_bcd_msf() {
        let mut cdc = Cdc::new();
        let mut disc = CountingDisc::new();

        // Sector 9874 = 02:11:49
        cdc.seek(&mut disc, 9874, 0);
        cdc.start(&mut disc);

        let header = cdc.read(&mut disc).unwrap();
        assert_eq!(header, 0x0211_4901);
    }

    #[test]
    fn host_data_repeats_final_word_when_exhausted() {
        let mut cdc = Cdc::new();
        let mut disc = CountingDisc::new();
        cdc.start(&mut disc);
        cdc.read(&mut disc).unwrap();

        // Drain the entire sector (2 header words + payload)
        let mut last = 0;
        for _ in 0..BUFFERED_SECTOR_WORDS {
            last = cdc.host_data(true);
        }

        assert_eq!(cdc.host_data(true), last);
        assert_eq!(cdc.host_data(true), last);

        // EDT set, DSR clear once fully drained
        assert_eq!(cdc.mode(true), 0x8000);
    }

    #[test]
    fn host_data_targets_one_cpu() {
        let mut cdc = Cdc::new();
        let mut disc = CountingDisc::new();
        cdc.set_device_destination(DeviceDestination::MainCpuRead);
        cdc.start(&mut disc);
        cdc.read(&mut disc).unwrap();

        assert_eq!(cdc.mode(false) & 0x4000, 0x4000);
        assert_eq!(cdc.mode(true), 0x8000);

        // The Sub CPU reads nothing while Main is the target; Main sees the header
        // (sector 0, mode 1)
        assert_eq!(cdc.host_data(true), 0);
        assert_eq!(cdc.host_data(false), 0x0000);
        assert_eq!(cdc.host_data(false), 0x0001);
    }

    #[test]
    fn read_fails_while_bound_or_empty() {
        let mut cdc = Cdc::new();
        let mut disc = CountingDisc::new();

        // Nothing buffered yet
        assert!(cdc.read(&mut disc).is_none());

        cdc.start(&mut disc);
        assert!(cdc.read(&mut disc).is_some());

        // Already bound
        assert!(cdc.read(&mut disc).is_none());

        cdc.ack();
        assert!(cdc.read(&mut disc).is_some());
    }

    #[test]
    fn sector_count_stops_reading() {
        let mut cdc = Cdc::new();
        let mut disc = CountingDisc::new();

        cdc.seek(&mut disc, 0, 3);
        cdc.start(&mut disc);
        assert_eq!(disc.reads, 3);

        // Draining the ring does not restart the drive
        for _ in 0..3 {
            cdc.read(&mut disc).unwrap();
            cdc.ack();
        }
        assert!(!cdc.stat(&mut disc));
        assert_eq!(disc.reads, 3);
    }
}
