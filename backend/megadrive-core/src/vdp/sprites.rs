//! Sprite attribute table caching and per-scanline sprite rendering.
//!
//! The row cache is rebuilt lazily whenever a write lands in the cached portion of the
//! sprite attribute table; per scanline it lists which sprites cover that line, so the
//! renderer never walks the full table per line.

use crate::vdp::{MAX_SCANLINES, MAX_SCANLINE_WIDTH, MAX_SPRITE_WIDTH, TILE_WIDTH, Vdp};
use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};

pub(super) const SPRITES_PER_LINE: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct SpriteRowCacheEntry {
    pub(super) table_index: u8,
    pub(super) y_in_sprite: u8,
    pub(super) width: u8,
    pub(super) height: u8,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct SpriteRow {
    pub(super) total: u8,
    pub(super) sprites: [SpriteRowCacheEntry; SPRITES_PER_LINE],
}

impl Default for SpriteRow {
    fn default() -> Self {
        Self { total: 0, sprites: [SpriteRowCacheEntry::default(); SPRITES_PER_LINE] }
    }
}

/// Rebuilt from the sprite table cache on demand, so it is deliberately not part of
/// the serialized state; decoding produces a dirty cache.
#[derive(Debug, Clone)]
pub(super) struct SpriteRowCache {
    pub(super) needs_update: bool,
    pub(super) rows: Box<[SpriteRow; MAX_SCANLINES]>,
}

impl SpriteRowCache {
    pub(super) fn new() -> Self {
        Self {
            needs_update: true,
            rows: vec![SpriteRow::default(); MAX_SCANLINES]
                .into_boxed_slice()
                .try_into()
                .unwrap(),
        }
    }
}

impl Encode for SpriteRowCache {
    fn encode<E: Encoder>(&self, _encoder: &mut E) -> Result<(), EncodeError> {
        Ok(())
    }
}

impl<Context> Decode<Context> for SpriteRowCache {
    fn decode<D: Decoder<Context = Context>>(_decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Self::new())
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for SpriteRowCache {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        _decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Ok(Self::new())
    }
}

/// The fields of a sprite that live in the VDP's internal sprite cache (the first four
/// bytes of each table entry).
#[derive(Debug, Clone, Copy)]
pub(super) struct CachedSprite {
    pub(super) y: u16,
    pub(super) link: u8,
    pub(super) width: u8,
    pub(super) height: u8,
}

impl Vdp {
    pub(super) fn cached_sprite(&self, sprite_index: u8) -> CachedSprite {
        let bytes = self.sprite_table_cache[sprite_index as usize];

        let y_mask = 0x3FF >> u16::from(!self.double_resolution_enabled);
        CachedSprite {
            y: (u16::from(bytes[0]) | (u16::from(bytes[1] & 3) << 8)) & y_mask,
            link: bytes[2] & 0x7F,
            width: ((bytes[3] >> 2) & 3) + 1,
            height: (bytes[3] & 3) + 1,
        }
    }

    pub(super) fn update_sprite_row_cache(&mut self) {
        if !self.sprite_row_cache.needs_update {
            return;
        }
        self.sprite_row_cache.needs_update = false;

        for row in self.sprite_row_cache.rows.iter_mut() {
            row.total = 0;
        }

        let tile_height_shift = self.tile_height_shift();
        let max_sprites = if self.h40_enabled { 80 } else { 64 };
        let sprites_per_line = if self.h40_enabled { 20 } else { 16 };
        let blank_lines = 128_u16 << u16::from(self.double_resolution_enabled);
        let screen_height =
            u16::from(if self.v30_enabled { 30_u8 } else { 28 }) << tile_height_shift;

        let mut sprites_remaining = max_sprites;
        let mut sprite_index = 0_u8;

        loop {
            let sprite = self.cached_sprite(sprite_index);
            let sprite_height_pixels = u16::from(sprite.height) << tile_height_shift;

            let first_line = sprite.y.max(blank_lines);
            let last_line = (sprite.y + sprite_height_pixels).min(blank_lines + screen_height);

            for line in first_line..last_line {
                let row = &mut self.sprite_row_cache.rows[usize::from(line - blank_lines)];

                // The hardware drops sprites past the per-line limit
                if usize::from(row.total) == sprites_per_line {
                    continue;
                }

                row.sprites[usize::from(row.total)] = SpriteRowCacheEntry {
                    table_index: sprite_index,
                    y_in_sprite: (line - sprite.y) as u8,
                    width: sprite.width,
                    height: sprite.height,
                };
                row.total += 1;
            }

            if sprite.link >= max_sprites {
                // An out-of-range link terminates the walk, like real hardware
                break;
            }

            sprite_index = sprite.link;
            sprites_remaining -= 1;
            if sprite_index == 0 || sprites_remaining == 0 {
                break;
            }
        }
    }

    /// Render the sprite layer for one scanline into `metapixels`:
    /// (colour index, high metapixel bits) pairs, with `MAX_SPRITE_WIDTH - 1` pixels
    /// of overdraw padding on each side.
    pub(super) fn render_sprites(
        &mut self,
        scanline: u16,
        metapixels: &mut [[u8; 2]; SPRITE_BUFFER_LEN],
    ) {
        let tile_height_shift = self.tile_height_shift();
        let tile_height_mask = (1_u16 << tile_height_shift) - 1;
        let base_tile_address = if self.sprite_tile_index_rebase { 0x10000 } else { 0 };

        let mut sprite_limit = if self.h40_enabled { 20 } else { 16 };
        let mut pixel_limit: u16 = if self.h40_enabled { 320 } else { 256 };
        let mut masked = false;

        let row = self.sprite_row_cache.rows[usize::from(scanline)];
        for entry in &row.sprites[..usize::from(row.total)] {
            let table_address =
                self.sprite_table_address() + u32::from(entry.table_index) * 8;
            let width = u16::from(entry.width);
            let x = self.read_vram_word(table_address + 6) & 0x1FF;

            if x == 0 {
                // A sprite at x == 0 masks the rest of the line, but only once a
                // visible sprite has been drawn (or the pixel budget ran out mid-line)
                masked = self.allow_sprite_masking;
            } else {
                self.allow_sprite_masking = true;
            }

            let off_screen = x + width * TILE_WIDTH as u16 <= 0x80
                || x >= 0x80 + (if self.h40_enabled { 40 } else { 32 }) * TILE_WIDTH as u16;

            if masked || off_screen {
                // Hidden sprites still consume pixel budget
                if pixel_limit <= width * TILE_WIDTH as u16 {
                    return;
                }
                pixel_limit -= width * TILE_WIDTH as u16;
            } else {
                let attributes = self.read_vram_word(table_address + 4);
                let tile_index = attributes & 0x7FF;
                let x_flip = attributes & 0x800 != 0;
                let y_flip = attributes & 0x1000 != 0;
                let metapixel_high_bits = ((attributes >> 13) & 7) as u8;

                let height = u16::from(entry.height);
                let y_in_sprite = if y_flip {
                    (height << tile_height_shift) - u16::from(entry.y_in_sprite) - 1
                } else {
                    u16::from(entry.y_in_sprite)
                };
                let pixel_y_in_tile = y_in_sprite & tile_height_mask;

                let mut cursor = (MAX_SPRITE_WIDTH - 1) + usize::from(x) - 0x80;

                // The byte-swapped VRAM view cancels out for sequential fetches; with
                // x-flip the bytes come out in reverse order instead
                let byte_xor: u32 = if x_flip { 2 } else { 1 };

                for column in 0..width {
                    let x_in_sprite = if x_flip { width - column - 1 } else { column };
                    let column_tile_index = tile_index
                        + (y_in_sprite >> tile_height_shift)
                        + x_in_sprite * height;

                    let tile_row_address = base_tile_address
                        + ((u32::from(column_tile_index) << tile_height_shift)
                            + u32::from(pixel_y_in_tile))
                            * 4;

                    for byte_index in 0..(TILE_WIDTH / 2) as u32 {
                        let byte = self.read_vram_byte(tile_row_address + (byte_index ^ byte_xor));

                        let nybbles =
                            if x_flip { [byte & 0xF, byte >> 4] } else { [byte >> 4, byte & 0xF] };

                        for colour_index in nybbles {
                            if cursor < metapixels.len() && metapixels[cursor][0] == 0 {
                                metapixels[cursor] = [colour_index, metapixel_high_bits];
                            }
                            cursor += 1;

                            pixel_limit -= 1;
                            if pixel_limit == 0 {
                                return;
                            }
                        }
                    }
                }
            }

            sprite_limit -= 1;
            if sprite_limit == 0 {
                break;
            }
        }

        // The line ended without hitting the pixel limit
        self.allow_sprite_masking = false;
    }
}

pub(super) const SPRITE_BUFFER_LEN: usize =
    (MAX_SPRITE_WIDTH - 1) + MAX_SCANLINE_WIDTH + (MAX_SPRITE_WIDTH - 1);
