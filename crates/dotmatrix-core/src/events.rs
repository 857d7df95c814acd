use std::collections::VecDeque;
use std::fmt;

/// Pending events are capped; the oldest are dropped first.
pub const MAX_PENDING_EVENTS: usize = 4096;

/// Something observable that happened while stepping the machine.
///
/// Events are queued at the exact step in which the hardware condition
/// occurred and are delivered in order by [`crate::gameboy::GameBoy::drain_events`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The first vblank line finished and the front buffer holds a new frame.
    VBlank,
    /// A visible line entered horizontal blank.
    HBlank,
    /// An OAM DMA copied 160 bytes from `source`.
    Dma { source: u16 },
    /// The CPU executed HALT.
    Halt,
    /// The CPU executed STOP (without a speed switch).
    Stop,
    Error(ErrorEvent),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Rom,
    SaveData,
    Snapshot,
    Memory,
}

/// Payload of [`Event::Error`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorEvent {
    UnknownInstruction { opcode: u8, cb_prefix: bool, pc: u16 },
    Info(String),
    Warn(String),
    Error { kind: ErrorKind, message: String },
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorEvent::UnknownInstruction {
                opcode,
                cb_prefix,
                pc,
            } => {
                if *cb_prefix {
                    write!(f, "unknown instruction CB {opcode:02X} at {pc:04X}")
                } else {
                    write!(f, "unknown instruction {opcode:02X} at {pc:04X}")
                }
            }
            ErrorEvent::Info(msg) => write!(f, "{msg}"),
            ErrorEvent::Warn(msg) => write!(f, "{msg}"),
            ErrorEvent::Error { kind, message } => write!(f, "{kind:?}: {message}"),
        }
    }
}

#[derive(Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
    dropped: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        if self.events.len() >= MAX_PENDING_EVENTS {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(Event::Error(ErrorEvent::Info(message.into())));
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Event::Error(ErrorEvent::Warn(message.into())));
    }

    pub fn error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.push(Event::Error(ErrorEvent::Error {
            kind,
            message: message.into(),
        }));
    }

    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, Event> {
        self.events.drain(..)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest() {
        let mut q = EventQueue::new();
        q.push(Event::Dma { source: 0xC000 });
        for _ in 0..MAX_PENDING_EVENTS {
            q.push(Event::HBlank);
        }
        assert_eq!(q.len(), MAX_PENDING_EVENTS);
        assert_eq!(q.dropped(), 1);
        assert!(q.drain().all(|e| e == Event::HBlank));
    }

    #[test]
    fn unknown_instruction_display() {
        let e = ErrorEvent::UnknownInstruction {
            opcode: 0xD3,
            cb_prefix: false,
            pc: 0x0150,
        };
        assert_eq!(e.to_string(), "unknown instruction D3 at 0150");
    }
}
