//! SB/SC and the link cable.
//!
//! With the internal clock a transfer shifts one bit per falling edge of
//! the selected divider bit and exchanges the whole byte with the partner
//! through [`LinkPort::transfer`] before the first shift. With the external
//! clock the unit only offers its byte and completes once the partner has
//! clocked a byte in.

use std::sync::{Arc, Mutex, PoisonError};

use crate::io::{self, INT_SERIAL, Io};
use crate::snapshot::{SnapshotError, StateReader, StateWriter};

/// Serial output kept for the frontend before it is drained.
const MAX_OUTPUT: usize = 0x10000;

pub const STATE_SIZE: usize = 8;

pub trait LinkPort: Send {
    /// Exchanges a byte with the partner as the clock master and returns
    /// the byte received.
    fn transfer(&mut self, byte: u8) -> u8;

    /// Makes `byte` available to a partner that drives the clock.
    fn offer(&mut self, _byte: u8) {}

    /// A byte clocked in by the partner, if one arrived.
    fn poll(&mut self) -> Option<u8> {
        None
    }
}

/// Port used when no cable is attached: the line floats high, so every
/// transfer receives 0xFF. With `loopback` the sent byte comes back.
#[derive(Default)]
pub struct NullLinkPort {
    loopback: bool,
}

impl NullLinkPort {
    pub fn new(loopback: bool) -> Self {
        Self { loopback }
    }
}

impl LinkPort for NullLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.loopback { byte } else { 0xFF }
    }
}

#[derive(Default)]
struct Wire {
    offered: [Option<u8>; 2],
    inbox: [Option<u8>; 2],
}

/// One end of an in-process cable between two instances.
pub struct LinkCable {
    wire: Arc<Mutex<Wire>>,
    side: usize,
}

impl LinkCable {
    /// Two connected ends; give one to each instance.
    pub fn pair() -> (LinkCable, LinkCable) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        (
            LinkCable {
                wire: Arc::clone(&wire),
                side: 0,
            },
            LinkCable { wire, side: 1 },
        )
    }

    fn with_wire<R>(&self, f: impl FnOnce(&mut Wire) -> R) -> R {
        let mut wire = self.wire.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut wire)
    }
}

impl LinkPort for LinkCable {
    fn transfer(&mut self, byte: u8) -> u8 {
        let other = self.side ^ 1;
        self.with_wire(|w| {
            w.inbox[other] = Some(byte);
            w.offered[other].take().unwrap_or(0xFF)
        })
    }

    fn offer(&mut self, byte: u8) {
        let side = self.side;
        self.with_wire(|w| w.offered[side] = Some(byte));
    }

    fn poll(&mut self) -> Option<u8> {
        let side = self.side;
        self.with_wire(|w| w.inbox[side].take())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferState {
    remaining_bits: u8,
    outgoing: u8,
    incoming: Option<u8>,
    pending_in: u8,
    internal_clock: bool,
    fast_clock: bool,
}

impl TransferState {
    fn new(outgoing: u8, sc: u8) -> Self {
        Self {
            remaining_bits: 8,
            outgoing,
            incoming: None,
            pending_in: 0,
            internal_clock: sc & 0x01 != 0,
            fast_clock: sc & 0x02 != 0,
        }
    }

    fn latch_incoming(&mut self, incoming: u8) {
        if self.incoming.is_none() {
            self.incoming = Some(incoming);
            self.pending_in = incoming;
        }
    }

    /// Shifts one bit into SB; true once all eight are in.
    fn shift(&mut self, sb: &mut u8) -> bool {
        if self.remaining_bits == 0 {
            return true;
        }
        let bit = (self.pending_in & 0x80) != 0;
        self.pending_in <<= 1;
        *sb = (*sb << 1) | bit as u8;
        self.remaining_bits -= 1;
        self.remaining_bits == 0
    }
}

/// Decoded serial block of a snapshot.
#[derive(Clone, Copy, Debug)]
pub struct SerialState {
    transfer: Option<TransferState>,
}

pub struct Serial {
    port: Box<dyn LinkPort>,
    transfer: Option<TransferState>,
    output: Vec<u8>,
    cgb: bool,
}

impl Default for Serial {
    fn default() -> Self {
        Self::new(false)
    }
}

fn clock_bit(cgb: bool, double_speed: bool, fast_clock: bool) -> u32 {
    match (cgb && fast_clock, double_speed) {
        (false, false) => 8,
        (false, true) => 7,
        (true, false) => 3,
        (true, true) => 2,
    }
}

impl Serial {
    pub fn new(cgb: bool) -> Self {
        Self {
            port: Box::new(NullLinkPort::default()),
            transfer: None,
            output: Vec::new(),
            cgb,
        }
    }

    pub fn connect(&mut self, port: Box<dyn LinkPort>) {
        self.port = port;
    }

    pub fn disconnect(&mut self) {
        self.port = Box::new(NullLinkPort::default());
    }

    pub fn is_transferring(&self) -> bool {
        self.transfer.is_some()
    }

    /// Handles CPU writes to SB and SC.
    pub fn write(&mut self, io: &mut Io, addr: u16, val: u8) {
        match addr {
            io::SB => io.set(io::SB, val),
            io::SC => {
                io.write(io::SC, val);
                if val & 0x80 == 0 {
                    self.transfer = None;
                    return;
                }
                // a write with bit 7 set restarts any transfer in progress
                let state = TransferState::new(io.get(io::SB), val);
                if !state.internal_clock {
                    self.port.offer(state.outgoing);
                }
                self.transfer = Some(state);
            }
            _ => {}
        }
    }

    /// Advances by the divider movement of one step.
    pub fn step(&mut self, prev_div: u16, curr_div: u16, double_speed: bool, io: &mut Io) {
        let Some(state) = self.transfer.as_mut() else {
            return;
        };
        let mut sb = io.get(io::SB);
        let mut complete = false;

        if state.internal_clock {
            if state.incoming.is_none() {
                let incoming = self.port.transfer(state.outgoing);
                state.latch_incoming(incoming);
            }
            let bit = clock_bit(self.cgb, double_speed, state.fast_clock);
            let mut div = prev_div;
            let mut prev_clock = (div >> bit) & 1 != 0;
            for _ in 0..curr_div.wrapping_sub(prev_div) {
                div = div.wrapping_add(1);
                let clock = (div >> bit) & 1 != 0;
                if prev_clock && !clock && state.shift(&mut sb) {
                    complete = true;
                    break;
                }
                prev_clock = clock;
            }
        } else if let Some(incoming) = self.port.poll() {
            state.latch_incoming(incoming);
            while !state.shift(&mut sb) {}
            complete = true;
        }

        io.set(io::SB, sb);
        if complete {
            self.finish(io);
        }
    }

    /// Clocks `count` bits of an externally clocked transfer.
    pub fn external_clock_pulse(&mut self, count: u8, io: &mut Io) {
        let Some(state) = self.transfer.as_mut() else {
            return;
        };
        if state.internal_clock {
            return;
        }
        if state.incoming.is_none() {
            let incoming = self.port.transfer(state.outgoing);
            state.latch_incoming(incoming);
        }
        let mut sb = io.get(io::SB);
        let mut complete = false;
        for _ in 0..count {
            if state.shift(&mut sb) {
                complete = true;
                break;
            }
        }
        io.set(io::SB, sb);
        if complete {
            self.finish(io);
        }
    }

    fn finish(&mut self, io: &mut Io) {
        let Some(state) = self.transfer.take() else {
            return;
        };
        io.set(io::SB, state.incoming.unwrap_or(0xFF));
        io.set(io::SC, io.get(io::SC) & 0x7F);
        io.request_interrupt(INT_SERIAL);
        if self.output.len() < MAX_OUTPUT {
            self.output.push(state.outgoing);
        }
        log::trace!(
            "serial transfer out={:02X} in={:02X}",
            state.outgoing,
            io.get(io::SB)
        );
    }

    /// Bytes sent since the last call.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn save_state(&self, w: &mut StateWriter) {
        let t = self.transfer.unwrap_or(TransferState::new(0, 0));
        w.bool(self.transfer.is_some());
        w.u8(t.remaining_bits);
        w.u8(t.outgoing);
        w.bool(t.incoming.is_some());
        w.u8(t.incoming.unwrap_or(0));
        w.u8(t.pending_in);
        w.bool(t.internal_clock);
        w.bool(t.fast_clock);
    }

    pub fn decode_state(&self, r: &mut StateReader) -> Result<SerialState, SnapshotError> {
        let active = r.bool()?;
        let remaining_bits = r.u8()?;
        if remaining_bits > 8 {
            return Err(SnapshotError::Corrupt("serial bit count out of range"));
        }
        let outgoing = r.u8()?;
        let has_incoming = r.bool()?;
        let incoming = r.u8()?;
        let state = TransferState {
            remaining_bits,
            outgoing,
            incoming: has_incoming.then_some(incoming),
            pending_in: r.u8()?,
            internal_clock: r.bool()?,
            fast_clock: r.bool()?,
        };
        Ok(SerialState {
            transfer: active.then_some(state),
        })
    }

    /// Applies a decoded block; the attached port is kept.
    pub fn apply_state(&mut self, state: SerialState) {
        self.transfer = state.transfer;
    }

    /// Power-on state for `cgb`, still wired to the same port.
    pub fn reset(&mut self, cgb: bool) {
        self.transfer = None;
        self.output.clear();
        self.cgb = cgb;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedInLinkPort(u8);

    impl LinkPort for FixedInLinkPort {
        fn transfer(&mut self, _byte: u8) -> u8 {
            self.0
        }
    }

    fn start(serial: &mut Serial, io: &mut Io, sb: u8, sc: u8) {
        io.write(io::IF, 0);
        serial.write(io, io::SB, sb);
        serial.write(io, io::SC, sc);
    }

    #[test]
    fn internal_clock_completes_after_eight_edges() {
        let mut io = Io::new(false);
        let mut serial = Serial::new(false);
        serial.connect(Box::new(FixedInLinkPort(0x34)));
        start(&mut serial, &mut io, 0x12, 0x81);

        // one bit per falling edge of DIV bit 8
        serial.step(0, 3584, false, &mut io);
        assert_ne!(io.get(io::SC) & 0x80, 0);
        assert_eq!(io.get(io::IF) & INT_SERIAL, 0);

        serial.step(3584, 4096, false, &mut io);
        assert_eq!(io.get(io::SC) & 0x80, 0);
        assert_ne!(io.get(io::IF) & INT_SERIAL, 0);
        assert_eq!(io.get(io::SB), 0x34);
        assert_eq!(serial.take_output(), vec![0x12]);
    }

    #[test]
    fn clearing_sc_cancels_transfer() {
        let mut io = Io::new(false);
        let mut serial = Serial::new(false);
        start(&mut serial, &mut io, 0x12, 0x81);
        serial.write(&mut io, io::SC, 0x01);
        serial.step(0, 8192, false, &mut io);
        assert_eq!(io.get(io::IF) & INT_SERIAL, 0);
    }

    #[test]
    fn no_partner_receives_ff() {
        let mut io = Io::new(false);
        let mut serial = Serial::new(false);
        start(&mut serial, &mut io, 0x12, 0x81);
        serial.step(0, 4096, false, &mut io);
        assert_eq!(io.get(io::SB), 0xFF);
    }

    #[test]
    fn external_clock_waits_for_pulses() {
        let mut io = Io::new(false);
        let mut serial = Serial::new(false);
        serial.connect(Box::new(FixedInLinkPort(0x34)));
        start(&mut serial, &mut io, 0x12, 0x80);

        serial.step(0, 60000, false, &mut io);
        assert_ne!(io.get(io::SC) & 0x80, 0);

        serial.external_clock_pulse(8, &mut io);
        assert_eq!(io.get(io::SC) & 0x80, 0);
        assert_eq!(io.get(io::SB), 0x34);
    }

    #[test]
    fn cable_pair_exchanges_bytes() {
        let (a, b) = LinkCable::pair();
        let (mut io_a, mut io_b) = (Io::new(false), Io::new(false));
        let (mut master, mut slave) = (Serial::new(false), Serial::new(false));
        master.connect(Box::new(a));
        slave.connect(Box::new(b));

        start(&mut slave, &mut io_b, 0x55, 0x80);
        start(&mut master, &mut io_a, 0xAA, 0x81);

        master.step(0, 4096, false, &mut io_a);
        slave.step(0, 4, false, &mut io_b);

        assert_eq!(io_a.get(io::SB), 0x55);
        assert_eq!(io_b.get(io::SB), 0xAA);
        assert_ne!(io_b.get(io::IF) & INT_SERIAL, 0);
    }
}
