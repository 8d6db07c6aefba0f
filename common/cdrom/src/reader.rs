//! The disc reader: identifies the backing image format and exposes sector and
//! CD-audio reads through a virtual track/index layer.
//!
//! Four on-disk layouts are understood, probed in a fixed order:
//! 1. Raw MODE1/2352 images, recognized by the 12-byte sync pattern + mode-1 header
//! 2. Track-index images, recognized by their magic (see [`crate::trackindex`])
//! 3. CUE sheets, recognized by parsing successfully
//! 4. Raw MODE1/2048 images (the fallback)

use crate::audio::{CdAudio, DecoderOpenFn, no_decoders};
use crate::cue::{CueFileType, CueSheet, CueTrackType};
use crate::trackindex::{self, TrackIndex};
use crate::{
    AUDIO_FRAME_SIZE, AUDIO_FRAMES_PER_SECTOR, DiscError, DiscResult, SECTOR_DATA_SIZE,
    SECTOR_HEADER_SIZE, SECTOR_RAW_SIZE,
};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscLayout {
    Cue,
    Raw2048,
    Raw2352,
    TrackIndex,
}

const RAW_2352_SYNC: [u8; 16] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x02, 0x00,
    0x01,
];

/// Extensions probed when looking for the audio companion files of a raw data-track
/// image (`"<image base> NN.<extension>"`).
const AUDIO_EXTENSIONS: &[&str] = &["FLAC", "flac", "MP3", "mp3", "OGG", "ogg", "WAV", "wav"];

#[derive(Debug)]
enum TrackSource {
    /// Sectors or raw PCM inside a regular file (the disc image itself, a CUE BINARY
    /// file, or a track-index image at `data_offset`).
    File { file: BufReader<File>, data_offset: u64 },
    /// Decoded compressed audio.
    Decoded(CdAudio),
    /// An audio track whose backing file exists but could not be decoded; reads
    /// produce silence.
    Silent,
}

#[derive(Debug)]
struct Track {
    number: u8,
    index: u8,
    track_type: CueTrackType,
    source: TrackSource,
    starting_sector: u32,
    ending_sector: u32,
    /// Absolute sector within the backing file; `None` until the first seek.
    current_sector: Option<u32>,
    starting_frame: u64,
    total_frames: u64,
    current_frame: Option<u64>,
}

pub struct CdRom {
    path: PathBuf,
    layout: DiscLayout,
    cue: Option<CueSheet>,
    track_index: Option<TrackIndex>,
    /// Backing image for the single-file layouts; taken by the active track.
    image_file: Option<BufReader<File>>,
    decoder_open: DecoderOpenFn,
    track: Option<Track>,
}

impl std::fmt::Debug for CdRom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdRom")
            .field("path", &self.path)
            .field("layout", &self.layout)
            .field("track", &self.track)
            .finish_non_exhaustive()
    }
}

fn sector_to_frame(sector: u32) -> u64 {
    u64::from(sector) * AUDIO_FRAMES_PER_SECTOR
}

fn open_buffered(path: &Path) -> DiscResult<BufReader<File>> {
    let file = File::open(path)
        .map_err(|source| DiscError::DiscOpen { path: path.display().to_string(), source })?;
    Ok(BufReader::new(file))
}

impl CdRom {
    /// Open a disc image with no audio codecs registered; compressed audio tracks will
    /// play silence.
    pub fn open<P: AsRef<Path>>(path: P) -> DiscResult<Self> {
        Self::open_with_decoders(path, no_decoders)
    }

    /// Open a disc image, identifying the layout by its leading bytes.
    pub fn open_with_decoders<P: AsRef<Path>>(
        path: P,
        decoder_open: DecoderOpenFn,
    ) -> DiscResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = open_buffered(&path)?;

        let mut prefix = [0; 16];
        let prefix_len = read_up_to(&mut file, &mut prefix)?;
        file.seek(SeekFrom::Start(0))?;

        let mut cue = None;
        let mut track_index = None;
        let mut image_file = None;

        let layout = if prefix_len == 16 && prefix == RAW_2352_SYNC {
            image_file = Some(file);
            DiscLayout::Raw2352
        } else if trackindex::matches_magic(&prefix[..prefix_len]) {
            track_index = Some(TrackIndex::parse(&mut file)?);
            image_file = Some(file);
            DiscLayout::TrackIndex
        } else if let Some(sheet) = try_parse_cue(&mut file)? {
            cue = Some(sheet);
            DiscLayout::Cue
        } else {
            image_file = Some(file);
            DiscLayout::Raw2048
        };

        log::debug!("Opened disc image '{}' with layout {layout:?}", path.display());

        Ok(Self { path, layout, cue, track_index, image_file, decoder_open, track: None })
    }

    #[must_use]
    pub fn layout(&self) -> DiscLayout {
        self.layout
    }

    #[must_use]
    pub fn cue(&self) -> Option<&CueSheet> {
        self.cue.as_ref()
    }

    /// Switch to the given track/index, then seek to `sector` (data tracks) or `frame`
    /// (audio tracks), both relative to the start of the track. Returns the track type,
    /// or `None` if the track does not exist or the seek went out of range.
    pub fn set_state(
        &mut self,
        track: u8,
        index: u8,
        sector: u32,
        frame: u64,
    ) -> Option<CueTrackType> {
        if !self.seek_track_index_internal(track, index) {
            self.track = None;
            return None;
        }

        let track_type = self.track.as_ref().map(|track| track.track_type)?;
        let seek_ok = match track_type {
            CueTrackType::Mode1Data | CueTrackType::Mode1Raw => self.seek_sector(sector),
            CueTrackType::Audio => self.seek_audio_frame(frame),
        };

        seek_ok.then_some(track_type)
    }

    /// `set_state(track, index, 0, 0)`.
    pub fn seek_track_index(&mut self, track: u8, index: u8) -> Option<CueTrackType> {
        self.set_state(track, index, 0, 0)
    }

    /// Seek to a sector relative to the start of the current (data) track.
    pub fn seek_sector(&mut self, sector: u32) -> bool {
        let Some(track) = &mut self.track else { return false };
        if track.track_type.is_audio() {
            return false;
        }

        let absolute = track.starting_sector.saturating_add(sector);
        if absolute >= track.ending_sector {
            return false;
        }

        track.current_sector = Some(absolute);
        true
    }

    /// Seek to a 44100 Hz audio frame relative to the start of the current (audio)
    /// track.
    pub fn seek_audio_frame(&mut self, frame: u64) -> bool {
        let Some(track) = &mut self.track else { return false };
        if !track.track_type.is_audio() {
            return false;
        }

        if frame >= track.total_frames {
            return false;
        }

        if track.current_frame != Some(frame) {
            if let TrackSource::Decoded(audio) = &mut track.source {
                if !audio.seek(track.starting_frame + frame) {
                    return false;
                }
            }
            track.current_frame = Some(frame);
        }

        true
    }

    /// Read the 2048-byte payload of the current sector and advance. On any failure the
    /// buffer is zero-filled and false is returned; the frame loop never stalls on a
    /// bad disc.
    pub fn read_sector(&mut self, buffer: &mut [u8; SECTOR_DATA_SIZE]) -> bool {
        let Some(track) = &mut self.track else {
            buffer.fill(0);
            return false;
        };

        let Some(sector) = track.current_sector else {
            buffer.fill(0);
            return false;
        };

        if track.track_type.is_audio() || sector >= track.ending_sector {
            buffer.fill(0);
            return false;
        }

        let sector_size = track.track_type.sector_size();
        let payload_offset =
            if track.track_type == CueTrackType::Mode1Raw { SECTOR_HEADER_SIZE as u64 } else { 0 };

        let TrackSource::File { file, data_offset } = &mut track.source else {
            buffer.fill(0);
            return false;
        };

        let offset = *data_offset + u64::from(sector) * sector_size + payload_offset;
        let read_ok = file.seek(SeekFrom::Start(offset)).is_ok() && file.read_exact(buffer).is_ok();

        if !read_ok {
            log::warn!("Failed to read sector {sector} from disc image");
            buffer.fill(0);
            return false;
        }

        track.current_sector = Some(sector + 1);
        true
    }

    /// Read up to `buffer.len() / 2` stereo 44100 Hz frames from the current audio
    /// track. When the source runs out mid-sector, the remainder of that sector is
    /// zero-padded (CD-DA semantics). Returns total frames delivered.
    pub fn read_audio_frames(&mut self, buffer: &mut [i16]) -> usize {
        let Some(track) = &mut self.track else { return 0 };
        if !track.track_type.is_audio() {
            return 0;
        }

        let Some(current_frame) = track.current_frame else { return 0 };

        let requested = buffer.len() / 2;
        let frames_left = track.total_frames.saturating_sub(current_frame);
        let frames_to_do = (frames_left.min(requested as u64)) as usize;

        let frames_done = match &mut track.source {
            TrackSource::File { file, data_offset } => {
                let offset = *data_offset
                    + u64::from(track.starting_sector) * SECTOR_RAW_SIZE as u64
                    + current_frame * AUDIO_FRAME_SIZE;
                read_pcm_frames(file, offset, &mut buffer[..frames_to_do * 2])
            }
            TrackSource::Decoded(audio) => audio.read_frames(&mut buffer[..frames_to_do * 2]),
            TrackSource::Silent => 0,
        };

        track.current_frame = Some(current_frame + frames_done as u64);

        // Zero-pad out the remainder of the current sector
        let occupied = (current_frame + frames_done as u64) % AUDIO_FRAMES_PER_SECTOR;
        let empty_in_sector =
            if occupied == 0 { 0 } else { (AUDIO_FRAMES_PER_SECTOR - occupied) as usize };
        let padding = empty_in_sector.min(requested - frames_done);
        buffer[frames_done * 2..(frames_done + padding) * 2].fill(0);

        frames_done + padding
    }

    fn seek_track_index_internal(&mut self, track: u8, index: u8) -> bool {
        if let Some(current) = &self.track {
            if current.number == track && current.index == index {
                return true;
            }
        }

        self.reclaim_image_file();

        let new_track = match self.layout {
            DiscLayout::Cue => self.open_cue_track(track, index),
            DiscLayout::Raw2048 | DiscLayout::Raw2352 => self.open_raw_track(track, index),
            DiscLayout::TrackIndex => self.open_track_index_track(track, index),
        };

        match new_track {
            Some(new_track) => {
                self.track = Some(new_track);
                true
            }
            None => {
                log::debug!("Seek to track {track} index {index} failed");
                false
            }
        }
    }

    /// Return a borrowed image file to `self.image_file` before switching tracks.
    fn reclaim_image_file(&mut self) {
        if let Some(Track { source: TrackSource::File { file, .. }, .. }) = self.track.take() {
            if self.image_file.is_none() && self.layout != DiscLayout::Cue {
                self.image_file = Some(file);
            }
        }
    }

    fn open_cue_track(&mut self, track: u8, index: u8) -> Option<Track> {
        let sheet = self.cue.as_ref()?;
        let entry = sheet.find(track, index)?.clone();
        let ending_sector = sheet.ending_sector(&entry);

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let file_path = parent.join(&entry.file_name);

        let source = match entry.file_type {
            CueFileType::Binary => {
                let file = match open_buffered(&file_path) {
                    Ok(file) => file,
                    Err(error) => {
                        log::error!("{error}");
                        return None;
                    }
                };
                TrackSource::File { file, data_offset: 0 }
            }
            CueFileType::Wave | CueFileType::Mp3 => open_audio_source(
                self.decoder_open,
                &file_path,
            ),
        };

        let starting_sector = entry.start.to_sector_number();
        Some(Track::new(track, index, entry.track_type, source, starting_sector, ending_sector))
    }

    fn open_raw_track(&mut self, track: u8, index: u8) -> Option<Track> {
        if index != 1 {
            return None;
        }

        if track == 1 {
            let track_type = if self.layout == DiscLayout::Raw2352 {
                CueTrackType::Mode1Raw
            } else {
                CueTrackType::Mode1Data
            };
            let file = self.take_image_file()?;
            let source = TrackSource::File { file, data_offset: 0 };
            return Some(Track::new(track, index, track_type, source, 0, u32::MAX));
        }

        if track > 99 {
            return None;
        }

        // Audio companion files live next to the image, named "<base> NN.<ext>"
        let base = self.path.with_extension("");
        let base = base.to_string_lossy();
        for extension in AUDIO_EXTENSIONS {
            let candidate = PathBuf::from(format!("{base} {track:02}.{extension}"));
            if let Some(decoder) = (self.decoder_open)(&candidate) {
                let source = CdAudio::new(decoder).map_or(TrackSource::Silent, TrackSource::Decoded);
                return Some(Track::new(track, index, CueTrackType::Audio, source, 0, u32::MAX));
            }
        }

        None
    }

    fn open_track_index_track(&mut self, track: u8, index: u8) -> Option<Track> {
        if index != 1 {
            return None;
        }

        let track_index = self.track_index.as_ref()?;
        let entry = track_index.track(track)?;
        let data_offset = track_index.data_offset();

        let file = self.take_image_file()?;
        let source = TrackSource::File { file, data_offset };

        Some(Track::new(
            track,
            index,
            entry.track_type,
            source,
            entry.starting_sector,
            entry.ending_sector(),
        ))
    }

    fn take_image_file(&mut self) -> Option<BufReader<File>> {
        if self.image_file.is_none() {
            // The previous track didn't hold it (e.g. it was a companion audio track);
            // reopen from the path
            match open_buffered(&self.path) {
                Ok(file) => return Some(file),
                Err(error) => {
                    log::error!("{error}");
                    return None;
                }
            }
        }
        self.image_file.take()
    }
}

impl Track {
    fn new(
        number: u8,
        index: u8,
        track_type: CueTrackType,
        source: TrackSource,
        starting_sector: u32,
        ending_sector: u32,
    ) -> Self {
        Self {
            number,
            index,
            track_type,
            source,
            starting_sector,
            ending_sector,
            current_sector: None,
            starting_frame: sector_to_frame(starting_sector),
            total_frames: sector_to_frame(ending_sector.saturating_sub(starting_sector).min(
                // Cap open-ended tracks well below u64 overflow territory
                0x00FF_FFFF,
            )),
            current_frame: None,
        }
    }
}

fn open_audio_source(decoder_open: DecoderOpenFn, path: &Path) -> TrackSource {
    match decoder_open(path).and_then(CdAudio::new) {
        Some(audio) => TrackSource::Decoded(audio),
        None => {
            log::warn!("Could not decode audio file '{}'; track will be silent", path.display());
            TrackSource::Silent
        }
    }
}

fn read_pcm_frames(file: &mut BufReader<File>, offset: u64, buffer: &mut [i16]) -> usize {
    if file.seek(SeekFrom::Start(offset)).is_err() {
        return 0;
    }

    let mut frames_done = 0;
    let mut bytes = [0; 4];
    for frame in buffer.chunks_exact_mut(2) {
        match read_up_to(file, &mut bytes) {
            Ok(4) => {
                frame[0] = i16::from_le_bytes([bytes[0], bytes[1]]);
                frame[1] = i16::from_le_bytes([bytes[2], bytes[3]]);
                frames_done += 1;
            }
            _ => break,
        }
    }

    frames_done
}

fn read_up_to<R: Read>(reader: &mut R, buffer: &mut [u8]) -> DiscResult<usize> {
    let mut total = 0;
    while total < buffer.len() {
        let read = reader.read(&mut buffer[total..])?;
        if read == 0 {
            break;
        }
        total += read;
    }
    Ok(total)
}

fn try_parse_cue(file: &mut BufReader<File>) -> DiscResult<Option<CueSheet>> {
    // CUE sheets are small; anything huge is a disc image misidentified
    const MAX_CUE_SIZE: u64 = 1024 * 1024;

    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    if size > MAX_CUE_SIZE {
        return Ok(None);
    }

    let mut bytes = Vec::with_capacity(size as usize);
    file.read_to_end(&mut bytes)?;

    let Ok(text) = String::from_utf8(bytes) else { return Ok(None) };
    Ok(CueSheet::parse(&text).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioDecoder;
    use crate::audio::tests::RampDecoder;
    use std::fs;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_dir(name: &str) -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir()
            .join(format!("cdrom-reader-tests-{}-{name}-{id}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn data_sector_2048(fill: u8) -> Vec<u8> {
        vec![fill; SECTOR_DATA_SIZE]
    }

    fn raw_sector_2352(fill: u8) -> Vec<u8> {
        let mut sector = Vec::with_capacity(SECTOR_RAW_SIZE);
        sector.extend_from_slice(&RAW_2352_SYNC);
        sector.extend_from_slice(&vec![fill; SECTOR_DATA_SIZE]);
        sector.extend_from_slice(&[0; SECTOR_RAW_SIZE - SECTOR_HEADER_SIZE - SECTOR_DATA_SIZE]);
        sector
    }

    #[test_log::test]
    fn raw_2048_image() {
        let dir = test_dir("raw2048");
        let path = dir.join("game.iso");

        let mut image = Vec::new();
        for fill in [0x11, 0x22, 0x33] {
            image.extend_from_slice(&data_sector_2048(fill));
        }
        fs::write(&path, image).unwrap();

        let mut disc = CdRom::open(&path).unwrap();
        assert_eq!(disc.layout(), DiscLayout::Raw2048);

        assert_eq!(disc.set_state(1, 1, 1, 0), Some(CueTrackType::Mode1Data));

        let mut buffer = [0; SECTOR_DATA_SIZE];
        assert!(disc.read_sector(&mut buffer));
        assert!(buffer.iter().all(|&b| b == 0x22));

        // Sequential read advances to the next sector
        assert!(disc.read_sector(&mut buffer));
        assert!(buffer.iter().all(|&b| b == 0x33));

        // Off the end: zero-filled, no panic
        assert!(!disc.read_sector(&mut buffer));
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[test_log::test]
    fn raw_2352_image_skips_headers() {
        let dir = test_dir("raw2352");
        let path = dir.join("game.bin");

        let mut image = Vec::new();
        image.extend_from_slice(&raw_sector_2352(0xAA));
        image.extend_from_slice(&raw_sector_2352(0xBB));
        fs::write(&path, image).unwrap();

        let mut disc = CdRom::open(&path).unwrap();
        assert_eq!(disc.layout(), DiscLayout::Raw2352);

        assert_eq!(disc.set_state(1, 1, 0, 0), Some(CueTrackType::Mode1Raw));

        let mut buffer = [0; SECTOR_DATA_SIZE];
        assert!(disc.read_sector(&mut buffer));
        assert!(buffer.iter().all(|&b| b == 0xAA));
        assert!(disc.read_sector(&mut buffer));
        assert!(buffer.iter().all(|&b| b == 0xBB));
    }

    #[test_log::test]
    fn cue_bin_data_and_pcm_audio() {
        let dir = test_dir("cuebin");
        let bin_path = dir.join("disc.bin");
        let cue_path = dir.join("disc.cue");

        // Track 1: one data sector; track 2: raw PCM audio
        let mut image = Vec::new();
        image.extend_from_slice(&raw_sector_2352(0x5C));
        let audio_start = image.len();
        for n in 0..1000u32 {
            let sample = (n as i16).to_le_bytes();
            image.extend_from_slice(&sample);
            image.extend_from_slice(&sample);
        }
        assert_eq!(audio_start, SECTOR_RAW_SIZE);
        fs::write(&bin_path, image).unwrap();

        fs::write(
            &cue_path,
            "FILE \"disc.bin\" BINARY\n\
             TRACK 01 MODE1/2352\n\
             INDEX 01 00:00:00\n\
             TRACK 02 AUDIO\n\
             INDEX 01 00:00:01\n",
        )
        .unwrap();

        let mut disc = CdRom::open(&cue_path).unwrap();
        assert_eq!(disc.layout(), DiscLayout::Cue);

        assert_eq!(disc.set_state(1, 1, 0, 0), Some(CueTrackType::Mode1Raw));
        let mut buffer = [0; SECTOR_DATA_SIZE];
        assert!(disc.read_sector(&mut buffer));
        assert!(buffer.iter().all(|&b| b == 0x5C));

        assert_eq!(disc.set_state(2, 1, 0, 0), Some(CueTrackType::Audio));
        let mut audio = [0; 8];
        assert_eq!(disc.read_audio_frames(&mut audio), 4);
        assert_eq!(audio, [0, 0, 1, 1, 2, 2, 3, 3]);

        // Seeking within the track is frame-accurate
        assert!(disc.seek_audio_frame(10));
        assert_eq!(disc.read_audio_frames(&mut audio), 4);
        assert_eq!(audio[0], 10);
    }

    #[test_log::test]
    fn audio_zero_pads_to_sector_boundary() {
        let dir = test_dir("padding");
        let bin_path = dir.join("disc.bin");
        let cue_path = dir.join("disc.cue");

        // 10 frames of audio, i.e. a fraction of one sector
        let mut image = Vec::new();
        for _ in 0..10 {
            image.extend_from_slice(&0x1234_i16.to_le_bytes());
            image.extend_from_slice(&0x1234_i16.to_le_bytes());
        }
        fs::write(&bin_path, image).unwrap();
        fs::write(
            &cue_path,
            "FILE \"disc.bin\" BINARY\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n",
        )
        .unwrap();

        let mut disc = CdRom::open(&cue_path).unwrap();
        assert_eq!(disc.set_state(1, 1, 0, 0), Some(CueTrackType::Audio));

        let mut buffer = [0; 2 * AUDIO_FRAMES_PER_SECTOR as usize];
        let frames = disc.read_audio_frames(&mut buffer);

        // 10 real frames plus zero padding out to the 588-frame sector boundary
        assert_eq!(frames, AUDIO_FRAMES_PER_SECTOR as usize);
        assert_eq!(buffer[0], 0x1234);
        assert_eq!(buffer[19], 0x1234);
        assert!(buffer[20..frames * 2].iter().all(|&s| s == 0));
    }

    #[test_log::test]
    fn track_index_image() {
        let dir = test_dir("trackindex");
        let path = dir.join("game.img");

        let mut image = Vec::new();
        image.extend_from_slice(&trackindex::TRACK_INDEX_MAGIC);
        image.extend_from_slice(&0u16.to_be_bytes());
        image.extend_from_slice(&1u16.to_be_bytes());
        image.extend_from_slice(&0u16.to_be_bytes()); // MODE1/2352
        image.extend_from_slice(&0u32.to_be_bytes());
        image.extend_from_slice(&2u32.to_be_bytes());
        image.extend_from_slice(&raw_sector_2352(0x77));
        image.extend_from_slice(&raw_sector_2352(0x88));
        fs::write(&path, image).unwrap();

        let mut disc = CdRom::open(&path).unwrap();
        assert_eq!(disc.layout(), DiscLayout::TrackIndex);

        assert_eq!(disc.set_state(1, 1, 1, 0), Some(CueTrackType::Mode1Raw));
        let mut buffer = [0; SECTOR_DATA_SIZE];
        assert!(disc.read_sector(&mut buffer));
        assert!(buffer.iter().all(|&b| b == 0x88));

        // Sector count bounds reads
        assert!(!disc.read_sector(&mut buffer));

        assert!(disc.set_state(2, 1, 0, 0).is_none());
    }

    fn open_ramp_decoder(path: &Path) -> Option<Box<dyn AudioDecoder>> {
        path.exists().then(|| {
            Box::new(RampDecoder {
                sample_rate: 44100,
                channels: 2,
                position: 0,
                total_frames: 100_000,
            }) as Box<dyn AudioDecoder>
        })
    }

    #[test_log::test]
    fn companion_audio_discovery() {
        let dir = test_dir("companion");
        let path = dir.join("game.iso");

        fs::write(&path, data_sector_2048(0x42)).unwrap();
        fs::write(dir.join("game 02.wav"), [0]).unwrap();

        let mut disc = CdRom::open_with_decoders(&path, open_ramp_decoder).unwrap();

        assert_eq!(disc.set_state(2, 1, 0, 0), Some(CueTrackType::Audio));
        let mut audio = [0; 4];
        assert_eq!(disc.read_audio_frames(&mut audio), 2);
        assert_eq!(audio, [0, 0, 1, 1]);

        // No "game 03.*" file exists
        assert!(disc.set_state(3, 1, 0, 0).is_none());

        // Switching back to the data track reopens the image
        assert_eq!(disc.set_state(1, 1, 0, 0), Some(CueTrackType::Mode1Data));
        let mut buffer = [0; SECTOR_DATA_SIZE];
        assert!(disc.read_sector(&mut buffer));
        assert!(buffer.iter().all(|&b| b == 0x42));
    }

    #[test_log::test]
    fn missing_codec_yields_silence() {
        let dir = test_dir("silence");
        let bin_path = dir.join("music.mp3");
        let cue_path = dir.join("disc.cue");

        fs::write(&bin_path, [0; 128]).unwrap();
        fs::write(
            &cue_path,
            "FILE \"music.mp3\" MP3\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n",
        )
        .unwrap();

        let mut disc = CdRom::open(&cue_path).unwrap();
        assert_eq!(disc.set_state(1, 1, 0, 0), Some(CueTrackType::Audio));

        let mut buffer = [1; 32];
        assert_eq!(disc.read_audio_frames(&mut buffer), 0);
    }
}
