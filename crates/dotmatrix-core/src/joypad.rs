use crate::io::{self, INT_JOYPAD, Io};
use crate::snapshot::{SnapshotError, StateReader, StateWriter};

pub const STATE_SIZE: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// Bit in the pressed mask. Directions occupy the low nibble.
    #[inline]
    const fn mask(self) -> u8 {
        1 << (self as u8)
    }

    #[inline]
    const fn is_direction(self) -> bool {
        (self as u8) < 4
    }
}

/// Button state behind P1. Line selection bits live in the register bank.
#[derive(Clone, Default)]
pub struct Joypad {
    pressed: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self::default()
    }

    /// P1 as the CPU sees it; pressed buttons on selected lines read 0.
    pub fn read(&self, io: &Io) -> u8 {
        let select = io.get(io::P1) & 0x30;
        let mut low = 0x0F;
        if select & 0x10 == 0 {
            low &= !(self.pressed & 0x0F);
        }
        if select & 0x20 == 0 {
            low &= !(self.pressed >> 4);
        }
        0xC0 | select | low
    }

    pub fn press(&mut self, io: &mut Io, button: Button) {
        let was_pressed = self.pressed & button.mask() != 0;
        self.pressed |= button.mask();
        if was_pressed {
            return;
        }
        let select = io.get(io::P1);
        let line_selected = if button.is_direction() {
            select & 0x10 == 0
        } else {
            select & 0x20 == 0
        };
        if line_selected {
            io.request_interrupt(INT_JOYPAD);
        }
    }

    pub fn release(&mut self, button: Button) {
        self.pressed &= !button.mask();
    }

    pub fn any_pressed(&self) -> bool {
        self.pressed != 0
    }

    pub fn save_state(&self, w: &mut StateWriter) {
        w.u8(self.pressed);
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), SnapshotError> {
        self.pressed = r.u8()?;
        Ok(())
    }
}
