//! DIV/TIMA/TMA/TAC.
//!
//! The 16-bit divider runs at the CPU clock; DIV is its upper byte. TIMA is
//! incremented on falling edges of the divider bit selected by TAC, gated by
//! the enable bit. An overflow leaves TIMA at zero for four cycles before
//! TMA is copied in and the timer interrupt is requested.

use crate::io::{self, INT_TIMER, Io};
use crate::snapshot::{SnapshotError, StateReader, StateWriter};

/// Cycles between an overflow and the TMA reload.
const RELOAD_DELAY: u8 = 3;

pub const STATE_SIZE: usize = 9;

#[derive(Clone, Default)]
pub struct Timer {
    /// Internal divider. DIV is the upper 8 bits.
    div: u16,
    last_signal: bool,
    /// TMA before a write landing in the same cycle as a reload.
    tma_latch: Option<u8>,
    pending_reload: Option<u8>,
    reload_delay: u8,
    /// Set during the cycle a reload is applied; TIMA writes are dropped.
    reloading: bool,
}

#[inline]
fn timer_bit(div: u16, tac: u8) -> bool {
    let shift = match tac & 0x03 {
        0x00 => 9,
        0x01 => 3,
        0x02 => 5,
        _ => 7,
    };
    (div >> shift) & 1 != 0
}

#[inline]
fn signal(div: u16, tac: u8) -> bool {
    tac & 0x04 != 0 && timer_bit(div, tac)
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Divider value after the boot ROM hands over.
    pub fn post_boot(div: u16) -> Self {
        Self {
            div,
            ..Self::default()
        }
    }

    #[inline]
    pub fn div(&self) -> u16 {
        self.div
    }

    /// Handles a CPU write to 0xFF04-0xFF07.
    pub fn write(&mut self, io: &mut Io, addr: u16, val: u8) {
        match addr {
            io::DIV => self.reset_div(io),
            io::TIMA => {
                if self.reloading || (self.pending_reload.is_some() && self.reload_delay == 0) {
                    return;
                }
                io.set(io::TIMA, val);
                if self.pending_reload.is_some() {
                    // a write inside the delay window cancels the reload
                    self.pending_reload = None;
                    self.reload_delay = 0;
                }
            }
            io::TMA => {
                self.tma_latch = Some(io.get(io::TMA));
                io.set(io::TMA, val);
                if self.pending_reload.is_some() {
                    self.pending_reload = Some(val);
                }
                if self.reloading {
                    io.set(io::TIMA, val);
                }
            }
            io::TAC => {
                let tac = io.get(io::TAC);
                let prev = signal(self.div, tac);
                let new_tac = (tac & !0x07) | (val & 0x07);
                io.set(io::TAC, new_tac);
                let new = signal(self.div, new_tac);
                if prev && !new {
                    let tma_old = self.tma_latch.take();
                    self.increment(io, tma_old);
                }
                self.last_signal = new;
            }
            _ => {}
        }
    }

    /// Advances by `cycles` CPU cycles.
    pub fn step(&mut self, cycles: u32, io: &mut Io) {
        let tac = io.get(io::TAC);
        for _ in 0..cycles {
            self.apply_reload(io);
            let prev = self.last_signal;
            let tma_old = self.tma_latch.take();
            self.div = self.div.wrapping_add(1);
            let new = signal(self.div, tac);
            if prev && !new {
                self.increment(io, tma_old);
            }
            self.last_signal = new;
        }
        io.set(io::DIV, (self.div >> 8) as u8);
    }

    /// Clears the divider. A set selected bit produces a falling edge.
    pub fn reset_div(&mut self, io: &mut Io) {
        self.apply_reload(io);
        let tac = io.get(io::TAC);
        let prev = signal(self.div, tac);
        self.div = 0;
        io.set(io::DIV, 0);
        if prev {
            let tma_old = self.tma_latch.take();
            self.increment(io, tma_old);
        }
        self.last_signal = false;
    }

    fn apply_reload(&mut self, io: &mut Io) {
        self.reloading = false;
        if let Some(val) = self.pending_reload {
            if self.reload_delay == 0 {
                io.set(io::TIMA, val);
                io.request_interrupt(INT_TIMER);
                self.pending_reload = None;
                self.reloading = true;
            } else {
                self.reload_delay -= 1;
            }
        }
    }

    fn increment(&mut self, io: &mut Io, tma_old: Option<u8>) {
        let tima = io.get(io::TIMA);
        if tima == 0xFF {
            io.set(io::TIMA, 0);
            self.pending_reload = Some(tma_old.unwrap_or_else(|| io.get(io::TMA)));
            self.reload_delay = RELOAD_DELAY;
        } else {
            io.set(io::TIMA, tima + 1);
        }
    }

    pub fn save_state(&self, w: &mut StateWriter) {
        w.u16(self.div);
        w.bool(self.last_signal);
        w.bool(self.tma_latch.is_some());
        w.u8(self.tma_latch.unwrap_or(0));
        w.bool(self.pending_reload.is_some());
        w.u8(self.pending_reload.unwrap_or(0));
        w.u8(self.reload_delay);
        w.bool(self.reloading);
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), SnapshotError> {
        self.div = r.u16()?;
        self.last_signal = r.bool()?;
        let has_latch = r.bool()?;
        let latch = r.u8()?;
        self.tma_latch = has_latch.then_some(latch);
        let has_reload = r.bool()?;
        let reload = r.u8()?;
        self.pending_reload = has_reload.then_some(reload);
        self.reload_delay = r.u8()?;
        if self.reload_delay > RELOAD_DELAY {
            return Err(SnapshotError::Corrupt("timer reload delay out of range"));
        }
        self.reloading = r.bool()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(tac: u8) -> (Timer, Io) {
        let mut io = Io::new(false);
        let mut timer = Timer::new();
        timer.write(&mut io, io::TAC, tac);
        (timer, io)
    }

    #[test]
    fn fastest_rate_counts_every_16_cycles() {
        let (mut timer, mut io) = enabled(0x05);
        timer.step(16 * 10, &mut io);
        assert_eq!(io.get(io::TIMA), 10);
    }

    #[test]
    fn overflow_reloads_tma_after_delay() {
        let (mut timer, mut io) = enabled(0x05);
        io.write(io::IF, 0);
        io.set(io::TIMA, 0xFF);
        io.set(io::TMA, 0x42);

        timer.step(16, &mut io);
        assert_eq!(io.get(io::TIMA), 0);
        assert_eq!(io.get(io::IF) & INT_TIMER, 0);

        timer.step(4, &mut io);
        assert_eq!(io.get(io::TIMA), 0x42);
        assert_ne!(io.get(io::IF) & INT_TIMER, 0);
    }

    #[test]
    fn tima_write_during_delay_cancels_reload() {
        let (mut timer, mut io) = enabled(0x05);
        io.write(io::IF, 0);
        io.set(io::TIMA, 0xFF);
        io.set(io::TMA, 0x42);
        timer.step(16, &mut io);
        timer.write(&mut io, io::TIMA, 0x10);
        timer.step(8, &mut io);
        assert_eq!(io.get(io::TIMA), 0x10);
        assert_eq!(io.get(io::IF) & INT_TIMER, 0);
    }

    #[test]
    fn div_reset_with_selected_bit_high_ticks_tima() {
        let (mut timer, mut io) = enabled(0x05);
        timer.step(8, &mut io);
        assert_eq!(io.get(io::TIMA), 0);
        timer.write(&mut io, io::DIV, 0);
        assert_eq!(io.get(io::TIMA), 1);
        assert_eq!(io.get(io::DIV), 0);
    }

    #[test]
    fn disabled_timer_never_counts() {
        let (mut timer, mut io) = enabled(0x01);
        timer.step(10_000, &mut io);
        assert_eq!(io.get(io::TIMA), 0);
        assert_eq!(io.get(io::DIV), (10_000u16 >> 8) as u8);
    }
}
