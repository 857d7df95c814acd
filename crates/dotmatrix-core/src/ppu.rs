//! Scanline renderer and LCD mode machine.
//!
//! Each visible line is drawn in one go at the start of pixel transfer.
//! Background, window and sprite layers are plain functions over a row of
//! host colors plus a row of background color ids used for sprite priority.

use crate::events::{Event, EventQueue};
use crate::hardware::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::io::{self, INT_STAT, INT_VBLANK, Io};
use crate::palette::{Palette, map_palette};
use crate::snapshot::{SnapshotError, StateReader, StateWriter};

#[cfg(feature = "ppu-trace")]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}
#[cfg(not(feature = "ppu-trace"))]
macro_rules! ppu_trace {
    ($($arg:tt)*) => {};
}

// Timing per LCD mode in dots
const MODE0_CYCLES: u16 = 204; // HBlank
const MODE1_CYCLES: u16 = 456; // one VBlank line
const MODE2_CYCLES: u16 = 80; // OAM scan
const MODE3_CYCLES: u16 = 172; // pixel transfer

const LAST_LINE: u8 = 153;

const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

pub const VRAM_SIZE: usize = 0x2000;
pub const OAM_SIZE: usize = 0xA0;

const WINDOW_X_MAX: u8 = 166;
const WINDOW_Y_MAX: u8 = 143;

// VRAM layout, relative to 0x8000
const BG_MAP_0_BASE: usize = 0x1800;
const BG_MAP_1_BASE: usize = 0x1C00;

pub const MODE_HBLANK: u8 = 0;
pub const MODE_VBLANK: u8 = 1;
pub const MODE_OAM: u8 = 2;
pub const MODE_TRANSFER: u8 = 3;

const FRAME_PIXELS: usize = SCREEN_WIDTH * SCREEN_HEIGHT;

/// Bytes written by [`Ppu::save_state`].
pub const STATE_SIZE: usize = VRAM_SIZE + OAM_SIZE + 7 + 3 + 3 * 17 + FRAME_PIXELS * 4;

// Palette cache slots
const PAL_BG: usize = 0;
const PAL_OBJ0: usize = 1;
const PAL_OBJ1: usize = 2;
const PALETTE_REGS: [u16; 3] = [io::BGP, io::OBP0, io::OBP1];

/// One OAM entry in screen coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Sprite {
    pub x: i16,
    pub y: i16,
    pub tile: u8,
    pub flags: u8,
    pub oam_index: usize,
}

impl Sprite {
    fn behind_bg(&self) -> bool {
        self.flags & 0x80 != 0
    }
    fn flip_y(&self) -> bool {
        self.flags & 0x40 != 0
    }
    fn flip_x(&self) -> bool {
        self.flags & 0x20 != 0
    }
    fn uses_obp1(&self) -> bool {
        self.flags & 0x10 != 0
    }
}

/// The first ten sprites covering `ly`, ordered by x with ties in OAM order.
pub fn select_sprites(oam: &[u8; OAM_SIZE], ly: u8, height: i16) -> Vec<Sprite> {
    let mut sprites = Vec::with_capacity(MAX_SPRITES_PER_LINE);
    for i in 0..TOTAL_SPRITES {
        if sprites.len() >= MAX_SPRITES_PER_LINE {
            break;
        }
        let base = i * 4;
        let y = oam[base] as i16 - 16;
        let line = ly as i16;
        if line >= y && line < y + height {
            sprites.push(Sprite {
                x: oam[base + 1] as i16 - 8,
                y,
                tile: oam[base + 2],
                flags: oam[base + 3],
                oam_index: i,
            });
        }
    }
    // sort_by_key is stable, so equal x keeps OAM order
    sprites.sort_by_key(|s| s.x);
    sprites
}

/// Color ids 0-3 of one 8-pixel tile row, leftmost first.
#[inline]
fn tile_row(vram: &[u8; VRAM_SIZE], addr: usize, row: usize) -> [u8; 8] {
    let lo = vram[addr + row * 2];
    let hi = vram[addr + row * 2 + 1];
    let mut ids = [0u8; 8];
    for (px, id) in ids.iter_mut().enumerate() {
        let bit = 7 - px;
        *id = ((hi >> bit) & 1) << 1 | ((lo >> bit) & 1);
    }
    ids
}

/// Offset of a BG/window tile in VRAM for the LCDC addressing mode.
#[inline]
fn bg_tile_addr(lcdc: u8, tile_index: u8) -> usize {
    if lcdc & 0x10 != 0 {
        tile_index as usize * 16
    } else {
        (0x1000 + (tile_index as i8 as i32) * 16) as usize
    }
}

/// Registers sampled once per line.
#[derive(Clone, Copy)]
struct LineRegs {
    lcdc: u8,
    ly: u8,
    scx: u8,
    scy: u8,
    wx: u8,
    wy: u8,
}

fn render_background(
    vram: &[u8; VRAM_SIZE],
    regs: LineRegs,
    colours: &[u32; 4],
    row: &mut [u32],
    ids: &mut [u8; SCREEN_WIDTH],
) {
    let map = if regs.lcdc & 0x08 != 0 {
        BG_MAP_1_BASE
    } else {
        BG_MAP_0_BASE
    };
    let y = regs.ly.wrapping_add(regs.scy) as usize;
    let map_row = (y >> 3) * 32;
    let pixel_row = y & 7;
    let base_tile_x = (regs.scx >> 3) as usize;
    let sub_tile_x = (regs.scx & 7) as i32;

    for tile_x in 0..21usize {
        let map_col = (base_tile_x + tile_x) & 31;
        let tile_index = vram[map + map_row + map_col];
        let pixels = tile_row(vram, bg_tile_addr(regs.lcdc, tile_index), pixel_row);
        for (x, &id) in pixels.iter().enumerate() {
            let x_index = (tile_x * 8 + x) as i32 - sub_tile_x;
            if !(0..SCREEN_WIDTH as i32).contains(&x_index) {
                continue;
            }
            let x_index = x_index as usize;
            row[x_index] = colours[id as usize];
            ids[x_index] = id;
        }
    }
}

/// Draws the window over the row. Returns whether any pixel was drawn.
fn render_window(
    vram: &[u8; VRAM_SIZE],
    regs: LineRegs,
    window_line: u8,
    colours: &[u32; 4],
    row: &mut [u32],
    ids: &mut [u8; SCREEN_WIDTH],
) -> bool {
    if regs.lcdc & 0x20 == 0
        || regs.wx > WINDOW_X_MAX
        || regs.wy > WINDOW_Y_MAX
        || regs.wy > regs.ly
    {
        return false;
    }
    let map = if regs.lcdc & 0x40 != 0 {
        BG_MAP_1_BASE
    } else {
        BG_MAP_0_BASE
    };
    let origin = regs.wx as i32 - 7;
    let start = origin.max(0) as usize;
    if start >= SCREEN_WIDTH {
        return false;
    }
    let wy = window_line as usize;
    let map_row = (wy >> 3) * 32;
    for x in start..SCREEN_WIDTH {
        let wx = (x as i32 - origin) as usize;
        let tile_index = vram[map + map_row + ((wx >> 3) & 31)];
        let pixels = tile_row(vram, bg_tile_addr(regs.lcdc, tile_index), wy & 7);
        let id = pixels[wx & 7];
        row[x] = colours[id as usize];
        ids[x] = id;
    }
    true
}

fn render_sprites(
    vram: &[u8; VRAM_SIZE],
    sprites: &[Sprite],
    regs: LineRegs,
    obj_colours: [&[u32; 4]; 2],
    row: &mut [u32],
    ids: &[u8; SCREEN_WIDTH],
) {
    let height: i16 = if regs.lcdc & 0x04 != 0 { 16 } else { 8 };
    let mut claimed = [false; SCREEN_WIDTH];
    for s in sprites {
        if s.x == -8 || s.x >= SCREEN_WIDTH as i16 {
            continue;
        }
        let tile = if height == 16 { s.tile & 0xFE } else { s.tile };
        let mut line = regs.ly as i16 - s.y;
        if s.flip_y() {
            line = height - 1 - line;
        }
        let line = line as usize;
        let addr = (tile as usize + (line >> 3)) * 16;
        let pixels = tile_row(vram, addr, line & 7);
        let colours = obj_colours[s.uses_obp1() as usize];
        for px in 0..8usize {
            let id = if s.flip_x() { pixels[7 - px] } else { pixels[px] };
            if id == 0 {
                continue;
            }
            let sx = s.x + px as i16;
            if !(0..SCREEN_WIDTH as i16).contains(&sx) {
                continue;
            }
            let sx = sx as usize;
            if claimed[sx] {
                continue;
            }
            claimed[sx] = true;
            if s.behind_bg() && ids[sx] != 0 {
                continue;
            }
            row[sx] = colours[id as usize];
        }
    }
}

#[derive(Clone)]
pub struct Ppu {
    pub vram: [u8; VRAM_SIZE],
    pub oam: [u8; OAM_SIZE],

    ly: u8,
    mode: u8,
    /// Dots spent in the current mode.
    dot: u16,
    /// Internal window line counter.
    window_line: u8,
    stat_line: bool,

    shades: Palette,
    colours: [[u32; 4]; 3],
    /// Register values the caches were built from.
    palette_regs: [u8; 3],
    palette_dirty: [bool; 3],

    back: Box<[u32]>,
    front: Box<[u32]>,
    line_ids: [u8; SCREEN_WIDTH],
    frame_ready: bool,
}

impl Ppu {
    pub fn new(shades: Palette) -> Self {
        Self {
            vram: [0; VRAM_SIZE],
            oam: [0; OAM_SIZE],
            ly: 0,
            mode: MODE_OAM,
            dot: 0,
            window_line: 0,
            stat_line: false,
            shades,
            colours: [[0; 4]; 3],
            palette_regs: [0; 3],
            palette_dirty: [true; 3],
            back: vec![shades.bg[0]; FRAME_PIXELS].into_boxed_slice(),
            front: vec![shades.bg[0]; FRAME_PIXELS].into_boxed_slice(),
            line_ids: [0; SCREEN_WIDTH],
            frame_ready: false,
        }
    }

    /// Replaces the host shades; every cache is rebuilt on the next line.
    pub fn set_palette(&mut self, shades: Palette) {
        self.shades = shades;
        self.palette_dirty = [true; 3];
    }

    pub fn palette(&self) -> Palette {
        self.shades
    }

    /// Flags the cache of the palette register at `addr` for a rebuild.
    pub fn mark_palette_dirty(&mut self, addr: u16) {
        if let Some(slot) = PALETTE_REGS.iter().position(|&a| a == addr) {
            self.palette_dirty[slot] = true;
        }
    }

    fn refresh_palettes(&mut self, io: &Io) {
        let shade_sets = [&self.shades.bg, &self.shades.obj0, &self.shades.obj1];
        for slot in 0..3 {
            let reg = io.get(PALETTE_REGS[slot]);
            if self.palette_dirty[slot] || reg != self.palette_regs[slot] {
                self.colours[slot] = map_palette(reg, shade_sets[slot]);
                self.palette_regs[slot] = reg;
                self.palette_dirty[slot] = false;
            }
        }
    }

    #[inline]
    pub fn ly(&self) -> u8 {
        self.ly
    }

    #[inline]
    pub fn mode(&self) -> u8 {
        self.mode
    }

    /// Last completed frame as `0x00RRGGBB`, row-major.
    pub fn framebuffer(&self) -> &[u32] {
        &self.front
    }

    pub fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    pub fn clear_frame_ready(&mut self) {
        self.frame_ready = false;
    }

    fn lcd_on(io: &Io) -> bool {
        io.get(io::LCDC) & 0x80 != 0
    }

    /// Handles a CPU write to LCDC.
    pub fn write_lcdc(&mut self, io: &mut Io, val: u8) {
        let was_on = Self::lcd_on(io);
        io.set(io::LCDC, val);
        let on = val & 0x80 != 0;
        if was_on && !on {
            self.ly = 0;
            self.mode = MODE_HBLANK;
            self.dot = 0;
            self.window_line = 0;
            ppu_trace!("[PPU] lcd off");
        } else if !was_on && on {
            self.ly = 0;
            self.mode = MODE_OAM;
            self.dot = 0;
            self.window_line = 0;
            ppu_trace!("[PPU] lcd on");
        }
        self.sync_registers(io);
    }

    /// Publishes LY and the STAT mode/coincidence bits, then raises the STAT
    /// interrupt on a rising edge of the combined source line.
    pub fn sync_registers(&mut self, io: &mut Io) {
        io.set(io::LY, self.ly);
        let coincidence = self.ly == io.get(io::LYC);
        let stat = (io.get(io::STAT) & 0x78) | ((coincidence as u8) << 2) | self.mode;
        io.set(io::STAT, stat);

        if !Self::lcd_on(io) {
            self.stat_line = false;
            return;
        }
        let line = (coincidence && stat & 0x40 != 0)
            || match self.mode {
                MODE_HBLANK => stat & 0x08 != 0,
                MODE_VBLANK => stat & 0x10 != 0,
                MODE_OAM => stat & 0x20 != 0,
                _ => false,
            };
        if line && !self.stat_line {
            io.request_interrupt(INT_STAT);
        }
        self.stat_line = line;
    }

    fn mode_length(&self) -> u16 {
        match self.mode {
            MODE_HBLANK => MODE0_CYCLES,
            MODE_VBLANK => MODE1_CYCLES,
            MODE_OAM => MODE2_CYCLES,
            _ => MODE3_CYCLES,
        }
    }

    /// Advances by `cycles` dots.
    pub fn step(&mut self, cycles: u32, io: &mut Io, events: &mut EventQueue) {
        if !Self::lcd_on(io) {
            return;
        }
        let mut remaining = cycles;
        while remaining > 0 {
            let left = (self.mode_length() - self.dot) as u32;
            let inc = remaining.min(left);
            self.dot += inc as u16;
            remaining -= inc;
            if self.dot >= self.mode_length() {
                self.dot = 0;
                self.advance_mode(io, events);
                self.sync_registers(io);
            }
        }
    }

    fn advance_mode(&mut self, io: &mut Io, events: &mut EventQueue) {
        match self.mode {
            MODE_OAM => {
                self.mode = MODE_TRANSFER;
                if (self.ly as usize) < SCREEN_HEIGHT {
                    self.render_scanline(io);
                }
            }
            MODE_TRANSFER => {
                self.mode = MODE_HBLANK;
                events.push(Event::HBlank);
            }
            MODE_HBLANK => {
                self.ly += 1;
                if self.ly as usize == SCREEN_HEIGHT {
                    self.mode = MODE_VBLANK;
                    io.request_interrupt(INT_VBLANK);
                } else {
                    self.mode = MODE_OAM;
                }
            }
            _ => {
                if self.ly as usize == SCREEN_HEIGHT {
                    self.front.copy_from_slice(&self.back);
                    self.frame_ready = true;
                    events.push(Event::VBlank);
                }
                if self.ly >= LAST_LINE {
                    self.ly = 0;
                    self.window_line = 0;
                    self.mode = MODE_OAM;
                } else {
                    self.ly += 1;
                }
            }
        }
    }

    /// Draws line LY into the back buffer.
    pub fn render_scanline(&mut self, io: &Io) {
        let ly = self.ly as usize;
        if ly >= SCREEN_HEIGHT {
            return;
        }
        self.refresh_palettes(io);
        let regs = LineRegs {
            lcdc: io.get(io::LCDC),
            ly: self.ly,
            scx: io.get(io::SCX),
            scy: io.get(io::SCY),
            wx: io.get(io::WX),
            wy: io.get(io::WY),
        };
        ppu_trace!(
            "[PPU] line {} lcdc={:02X} scx={} scy={}",
            regs.ly,
            regs.lcdc,
            regs.scx,
            regs.scy
        );

        let row = &mut self.back[ly * SCREEN_WIDTH..(ly + 1) * SCREEN_WIDTH];
        let ids = &mut self.line_ids;
        let bg = &self.colours[PAL_BG];

        if regs.lcdc & 0x01 == 0 {
            row.fill(bg[0]);
            ids.fill(0);
        } else {
            render_background(&self.vram, regs, bg, row, ids);
            if render_window(&self.vram, regs, self.window_line, bg, row, ids) {
                self.window_line = self.window_line.wrapping_add(1);
            }
        }

        if regs.lcdc & 0x02 != 0 {
            let height = if regs.lcdc & 0x04 != 0 { 16 } else { 8 };
            let sprites = select_sprites(&self.oam, regs.ly, height);
            render_sprites(
                &self.vram,
                &sprites,
                regs,
                [&self.colours[PAL_OBJ0], &self.colours[PAL_OBJ1]],
                row,
                ids,
            );
        }
    }

    pub fn save_state(&self, w: &mut StateWriter) {
        w.bytes(&self.vram);
        w.bytes(&self.oam);
        w.u8(self.ly);
        w.u8(self.mode);
        w.u16(self.dot);
        w.u8(self.window_line);
        w.bool(self.stat_line);
        w.bool(self.frame_ready);
        w.bytes(&self.palette_regs);
        for slot in 0..3 {
            w.u32s(&self.colours[slot]);
            w.bool(self.palette_dirty[slot]);
        }
        w.u32s(&self.back);
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), SnapshotError> {
        r.bytes_into(&mut self.vram)?;
        r.bytes_into(&mut self.oam)?;
        self.ly = r.u8()?;
        if self.ly > LAST_LINE {
            return Err(SnapshotError::Corrupt("ppu line out of range"));
        }
        self.mode = r.u8()?;
        if self.mode > MODE_TRANSFER {
            return Err(SnapshotError::Corrupt("ppu mode out of range"));
        }
        self.dot = r.u16()?;
        if self.dot >= self.mode_length() {
            return Err(SnapshotError::Corrupt("ppu dot counter out of range"));
        }
        self.window_line = r.u8()?;
        self.stat_line = r.bool()?;
        self.frame_ready = r.bool()?;
        r.bytes_into(&mut self.palette_regs)?;
        for slot in 0..3 {
            r.u32s_into(&mut self.colours[slot])?;
            self.palette_dirty[slot] = r.bool()?;
        }
        r.u32s_into(&mut self.back)?;
        Ok(())
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new(Palette::default())
    }
}
