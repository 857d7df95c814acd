//! SM83 interpreter.
//!
//! Every memory access and internal delay costs one machine cycle (4 clock
//! cycles); `step` returns the sum for one instruction or interrupt dispatch.

use crate::events::{ErrorEvent, Event};
use crate::hardware::SystemType;
use crate::io::{self, INT_JOYPAD};
use crate::mmu::Mmu;
use crate::snapshot::{SnapshotError, StateReader, StateWriter};

#[cfg(feature = "cpu-trace")]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}
#[cfg(not(feature = "cpu-trace"))]
macro_rules! cpu_trace {
    ($($arg:tt)*) => {};
}

const FLAG_Z: u8 = 0x80;
const FLAG_N: u8 = 0x40;
const FLAG_H: u8 = 0x20;
const FLAG_C: u8 = 0x10;

const INTERRUPT_VBLANK: u16 = 0x40;
const INTERRUPT_STAT: u16 = 0x48;
const INTERRUPT_TIMER: u16 = 0x50;
const INTERRUPT_SERIAL: u16 = 0x58;
const INTERRUPT_JOYPAD: u16 = 0x60;

const BOOT_PC: u16 = 0x0100;
const BOOT_SP: u16 = 0xFFFE;

const CYCLES_PER_M_CYCLE: u32 = 4;

/// Bytes written by [`Cpu::save_state`].
pub const STATE_SIZE: usize = 18;

/// Opcodes with no defined behavior.
const UNDEFINED_OPCODES: [u8; 11] = [
    0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub pc: u16,
    pub sp: u16,
    pub ime: bool,
    /// EI executed; IME is set after the next instruction.
    ei_delay: bool,
    pub halted: bool,
    pub stopped: bool,
    halt_bug: bool,
    pub double_speed: bool,
    /// Clock cycles spent by the instruction in progress.
    spent: u32,
}

impl Cpu {
    /// Registers as the boot ROM leaves them.
    pub fn new(system: SystemType) -> Self {
        let a = if system.is_gbc() { 0x11 } else { 0x01 };
        Self {
            a,
            f: 0xB0,
            b: 0x00,
            c: 0x13,
            d: 0x00,
            e: 0xD8,
            h: 0x01,
            l: 0x4D,
            pc: BOOT_PC,
            sp: BOOT_SP,
            ime: false,
            ei_delay: false,
            halted: false,
            stopped: false,
            halt_bug: false,
            double_speed: false,
            spent: 0,
        }
    }

    pub fn af(&self) -> u16 {
        ((self.a as u16) << 8) | self.f as u16
    }

    pub fn bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.f = val as u8 & 0xF0;
    }

    /// BC, DE, HL, SP by the 2-bit field used by most 16-bit opcodes.
    fn rp(&self, index: u8) -> u16 {
        match index & 3 {
            0 => self.bc(),
            1 => self.de(),
            2 => self.hl(),
            _ => self.sp,
        }
    }

    fn set_rp(&mut self, index: u8, val: u16) {
        match index & 3 {
            0 => self.set_bc(val),
            1 => self.set_de(val),
            2 => self.set_hl(val),
            _ => self.sp = val,
        }
    }

    fn flag(&self, mask: u8) -> bool {
        self.f & mask != 0
    }

    fn condition(&self, cc: u8) -> bool {
        match cc & 3 {
            0 => !self.flag(FLAG_Z),
            1 => self.flag(FLAG_Z),
            2 => !self.flag(FLAG_C),
            _ => self.flag(FLAG_C),
        }
    }

    /// Formatted register dump.
    pub fn debug_state(&self) -> String {
        format!(
            "AF:{:04X} BC:{:04X} DE:{:04X} HL:{:04X} PC:{:04X} SP:{:04X} IME:{}",
            self.af(),
            self.bc(),
            self.de(),
            self.hl(),
            self.pc,
            self.sp,
            self.ime as u8
        )
    }

    fn next_interrupt(pending: u8) -> (u8, u16) {
        if pending & 0x01 != 0 {
            (0x01, INTERRUPT_VBLANK)
        } else if pending & 0x02 != 0 {
            (0x02, INTERRUPT_STAT)
        } else if pending & 0x04 != 0 {
            (0x04, INTERRUPT_TIMER)
        } else if pending & 0x08 != 0 {
            (0x08, INTERRUPT_SERIAL)
        } else {
            (0x10, INTERRUPT_JOYPAD)
        }
    }

    #[inline(always)]
    fn idle(&mut self) {
        self.spent += CYCLES_PER_M_CYCLE;
    }

    #[inline(always)]
    fn fetch8(&mut self, mmu: &mut Mmu) -> u8 {
        let val = self.read8(mmu, self.pc);
        self.pc = self.pc.wrapping_add(1);
        val
    }

    #[inline(always)]
    fn fetch16(&mut self, mmu: &mut Mmu) -> u16 {
        let lo = self.fetch8(mmu) as u16;
        let hi = self.fetch8(mmu) as u16;
        (hi << 8) | lo
    }

    #[inline(always)]
    fn read8(&mut self, mmu: &mut Mmu, addr: u16) -> u8 {
        self.idle();
        mmu.cpu_read(addr)
    }

    #[inline(always)]
    fn write8(&mut self, mmu: &mut Mmu, addr: u16, val: u8) {
        self.idle();
        mmu.write(addr, val);
    }

    fn push_stack(&mut self, mmu: &mut Mmu, val: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, (val >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, val as u8);
    }

    fn pop_stack(&mut self, mmu: &mut Mmu) -> u16 {
        let lo = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        let hi = self.read8(mmu, self.sp) as u16;
        self.sp = self.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    fn read_reg(&mut self, mmu: &mut Mmu, index: u8) -> u8 {
        match index & 7 {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            6 => self.read8(mmu, self.hl()),
            _ => self.a,
        }
    }

    fn write_reg(&mut self, mmu: &mut Mmu, index: u8, val: u8) {
        match index & 7 {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            6 => {
                let addr = self.hl();
                self.write8(mmu, addr, val);
            }
            _ => self.a = val,
        }
    }

    /// Runs one instruction, one interrupt dispatch, or one idle slice of
    /// HALT/STOP. Returns the clock cycles consumed.
    pub fn step(&mut self, mmu: &mut Mmu) -> u32 {
        self.spent = 0;

        if self.stopped {
            let wake = mmu.joypad.any_pressed() || mmu.io.pending_interrupts() & INT_JOYPAD != 0;
            if !wake {
                self.idle();
                return self.spent;
            }
            self.stopped = false;
        }

        if self.halted {
            if mmu.io.pending_interrupts() == 0 {
                self.idle();
                return self.spent;
            }
            self.halted = false;
        }

        if self.ime && mmu.io.pending_interrupts() != 0 {
            self.handle_interrupts(mmu);
            return self.spent;
        }

        let enable_after = std::mem::take(&mut self.ei_delay);
        let pc = self.pc;
        let opcode = if self.halt_bug {
            // the byte after HALT is fetched without advancing PC
            self.halt_bug = false;
            self.read8(mmu, self.pc)
        } else {
            self.fetch8(mmu)
        };
        cpu_trace!("[CPU] {:04X}: {:02X} {}", pc, opcode, self.debug_state());
        self.execute(mmu, opcode, pc);
        if enable_after && opcode != 0xF3 {
            self.ime = true;
        }
        self.spent
    }

    fn handle_interrupts(&mut self, mmu: &mut Mmu) {
        self.ime = false;
        self.idle();
        self.idle();

        // EI; HALT with an interrupt pending returns to the HALT
        let return_pc = if std::mem::take(&mut self.halt_bug) {
            self.pc.wrapping_sub(1)
        } else {
            self.pc
        };
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, (return_pc >> 8) as u8);

        // the upper byte may land on IE and cancel the dispatch
        let pending = mmu.io.pending_interrupts();
        self.sp = self.sp.wrapping_sub(1);
        self.write8(mmu, self.sp, return_pc as u8);
        if pending == 0 {
            self.pc = 0;
            self.idle();
            return;
        }

        let (bit, vector) = Self::next_interrupt(pending);
        mmu.io.clear_interrupt(bit);
        self.pc = vector;
        self.idle();
        cpu_trace!("[CPU] interrupt {:02X} -> {:04X}", bit, vector);
    }

    fn unknown_opcode(&mut self, mmu: &mut Mmu, opcode: u8, pc: u16) {
        log::warn!("unknown opcode {opcode:02X} at {pc:04X}");
        mmu.events.push(Event::Error(ErrorEvent::UnknownInstruction {
            opcode,
            cb_prefix: false,
            pc,
        }));
    }

    fn halt(&mut self, mmu: &mut Mmu) {
        mmu.events.push(Event::Halt);
        if !self.ime && mmu.io.pending_interrupts() != 0 {
            self.halt_bug = true;
        } else {
            self.halted = true;
        }
    }

    fn stop(&mut self, mmu: &mut Mmu) {
        // STOP is followed by a padding byte
        self.pc = self.pc.wrapping_add(1);
        let key1 = mmu.io.get(io::KEY1);
        if mmu.io.is_gbc() && key1 & 0x01 != 0 {
            self.double_speed = !self.double_speed;
            mmu.io.set(io::KEY1, (key1 & 0x7E) | ((self.double_speed as u8) << 7));
            mmu.reset_div(self.double_speed);
            log::debug!(
                "speed switch: {}",
                if self.double_speed { "double" } else { "normal" }
            );
            return;
        }
        self.stopped = true;
        mmu.events.push(Event::Stop);
    }

    fn execute(&mut self, mmu: &mut Mmu, opcode: u8, pc: u16) {
        match opcode {
            0x00 => {}
            0x01 | 0x11 | 0x21 | 0x31 => {
                let val = self.fetch16(mmu);
                self.set_rp(opcode >> 4, val);
            }
            0x02 => {
                let addr = self.bc();
                self.write8(mmu, addr, self.a);
            }
            0x12 => {
                let addr = self.de();
                self.write8(mmu, addr, self.a);
            }
            0x22 | 0x32 => {
                let addr = self.hl();
                self.write8(mmu, addr, self.a);
                self.set_hl(if opcode == 0x22 {
                    addr.wrapping_add(1)
                } else {
                    addr.wrapping_sub(1)
                });
            }
            0x0A => self.a = self.read8(mmu, self.bc()),
            0x1A => self.a = self.read8(mmu, self.de()),
            0x2A | 0x3A => {
                let addr = self.hl();
                self.a = self.read8(mmu, addr);
                self.set_hl(if opcode == 0x2A {
                    addr.wrapping_add(1)
                } else {
                    addr.wrapping_sub(1)
                });
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                let idx = opcode >> 4;
                self.set_rp(idx, self.rp(idx).wrapping_add(1));
                self.idle();
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let idx = opcode >> 4;
                self.set_rp(idx, self.rp(idx).wrapping_sub(1));
                self.idle();
            }
            op if op & 0xC7 == 0x04 => {
                let r = (op >> 3) & 7;
                let val = self.read_reg(mmu, r);
                let res = val.wrapping_add(1);
                self.f = (self.f & FLAG_C)
                    | if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x0F == 0x0F { FLAG_H } else { 0 };
                self.write_reg(mmu, r, res);
            }
            op if op & 0xC7 == 0x05 => {
                let r = (op >> 3) & 7;
                let val = self.read_reg(mmu, r);
                let res = val.wrapping_sub(1);
                self.f = (self.f & FLAG_C)
                    | FLAG_N
                    | if res == 0 { FLAG_Z } else { 0 }
                    | if val & 0x0F == 0 { FLAG_H } else { 0 };
                self.write_reg(mmu, r, res);
            }
            op if op & 0xC7 == 0x06 => {
                let val = self.fetch8(mmu);
                self.write_reg(mmu, (op >> 3) & 7, val);
            }
            0x07 => {
                let carry = self.a & 0x80 != 0;
                self.a = self.a.rotate_left(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x0F => {
                let carry = self.a & 0x01 != 0;
                self.a = self.a.rotate_right(1);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x17 => {
                let carry = self.a & 0x80 != 0;
                self.a = (self.a << 1) | self.flag(FLAG_C) as u8;
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x1F => {
                let carry = self.a & 0x01 != 0;
                self.a = (self.a >> 1) | ((self.flag(FLAG_C) as u8) << 7);
                self.f = if carry { FLAG_C } else { 0 };
            }
            0x08 => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, self.sp as u8);
                self.write8(mmu, addr.wrapping_add(1), (self.sp >> 8) as u8);
            }
            0x09 | 0x19 | 0x29 | 0x39 => {
                let hl = self.hl();
                let val = self.rp(opcode >> 4);
                let res = hl as u32 + val as u32;
                self.f = (self.f & FLAG_Z)
                    | if (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF {
                        FLAG_H
                    } else {
                        0
                    }
                    | if res > 0xFFFF { FLAG_C } else { 0 };
                self.set_hl(res as u16);
                self.idle();
            }
            0x10 => self.stop(mmu),
            0x18 => {
                let off = self.fetch8(mmu) as i8;
                self.pc = self.pc.wrapping_add(off as u16);
                self.idle();
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let off = self.fetch8(mmu) as i8;
                if self.condition(opcode >> 3) {
                    self.pc = self.pc.wrapping_add(off as u16);
                    self.idle();
                }
            }
            0x27 => self.daa(),
            0x2F => {
                self.a = !self.a;
                self.f = (self.f & (FLAG_Z | FLAG_C)) | FLAG_N | FLAG_H;
            }
            0x37 => self.f = (self.f & FLAG_Z) | FLAG_C,
            0x3F => self.f = (self.f & FLAG_Z) | if self.flag(FLAG_C) { 0 } else { FLAG_C },
            0x76 => self.halt(mmu),
            0x40..=0x7F => {
                let val = self.read_reg(mmu, opcode & 7);
                self.write_reg(mmu, (opcode >> 3) & 7, val);
            }
            0x80..=0xBF => {
                let val = self.read_reg(mmu, opcode & 7);
                self.alu((opcode >> 3) & 7, val);
            }
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.fetch8(mmu);
                self.alu((opcode >> 3) & 7, val);
            }
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                self.idle();
                if self.condition(opcode >> 3) {
                    self.pc = self.pop_stack(mmu);
                    self.idle();
                }
            }
            0xC9 | 0xD9 => {
                self.pc = self.pop_stack(mmu);
                self.idle();
                if opcode == 0xD9 {
                    self.ime = true;
                }
            }
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let val = self.pop_stack(mmu);
                match (opcode >> 4) & 3 {
                    0 => self.set_bc(val),
                    1 => self.set_de(val),
                    2 => self.set_hl(val),
                    _ => self.set_af(val),
                }
            }
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let val = match (opcode >> 4) & 3 {
                    0 => self.bc(),
                    1 => self.de(),
                    2 => self.hl(),
                    _ => self.af(),
                };
                self.idle();
                self.push_stack(mmu, val);
            }
            0xC3 => {
                self.pc = self.fetch16(mmu);
                self.idle();
            }
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch16(mmu);
                if self.condition(opcode >> 3) {
                    self.pc = addr;
                    self.idle();
                }
            }
            0xE9 => self.pc = self.hl(),
            0xCD => {
                let addr = self.fetch16(mmu);
                self.idle();
                self.push_stack(mmu, self.pc);
                self.pc = addr;
            }
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch16(mmu);
                if self.condition(opcode >> 3) {
                    self.idle();
                    self.push_stack(mmu, self.pc);
                    self.pc = addr;
                }
            }
            op if op & 0xC7 == 0xC7 => {
                self.idle();
                self.push_stack(mmu, self.pc);
                self.pc = (op & 0x38) as u16;
            }
            0xCB => {
                let cb = self.fetch8(mmu);
                self.handle_cb(cb, mmu);
            }
            0xE0 => {
                let addr = 0xFF00 | self.fetch8(mmu) as u16;
                self.write8(mmu, addr, self.a);
            }
            0xF0 => {
                let addr = 0xFF00 | self.fetch8(mmu) as u16;
                self.a = self.read8(mmu, addr);
            }
            0xE2 => self.write8(mmu, 0xFF00 | self.c as u16, self.a),
            0xF2 => self.a = self.read8(mmu, 0xFF00 | self.c as u16),
            0xEA => {
                let addr = self.fetch16(mmu);
                self.write8(mmu, addr, self.a);
            }
            0xFA => {
                let addr = self.fetch16(mmu);
                self.a = self.read8(mmu, addr);
            }
            0xE8 => {
                let val = self.fetch8(mmu);
                self.sp = self.add_sp_signed(val);
                self.idle();
                self.idle();
            }
            0xF8 => {
                let val = self.fetch8(mmu);
                let res = self.add_sp_signed(val);
                self.set_hl(res);
                self.idle();
            }
            0xF9 => {
                self.sp = self.hl();
                self.idle();
            }
            0xF3 => {
                self.ime = false;
                self.ei_delay = false;
            }
            0xFB => self.ei_delay = true,
            op => {
                debug_assert!(UNDEFINED_OPCODES.contains(&op));
                self.unknown_opcode(mmu, op, pc);
            }
        }
    }

    /// SP + signed immediate with flags from the low byte.
    fn add_sp_signed(&mut self, val: u8) -> u16 {
        let sp = self.sp;
        let offset = val as i8 as i16 as u16;
        self.f = if (sp & 0x0F) + (val as u16 & 0x0F) > 0x0F {
            FLAG_H
        } else {
            0
        } | if (sp & 0xFF) + val as u16 > 0xFF {
            FLAG_C
        } else {
            0
        };
        sp.wrapping_add(offset)
    }

    fn alu(&mut self, op: u8, val: u8) {
        let carry_in = self.flag(FLAG_C) as u8;
        match op & 7 {
            0 | 1 => {
                let carry = if op == 1 { carry_in } else { 0 };
                let res = self.a as u16 + val as u16 + carry as u16;
                self.f = if res as u8 == 0 { FLAG_Z } else { 0 }
                    | if (self.a & 0x0F) + (val & 0x0F) + carry > 0x0F {
                        FLAG_H
                    } else {
                        0
                    }
                    | if res > 0xFF { FLAG_C } else { 0 };
                self.a = res as u8;
            }
            2 | 3 | 7 => {
                let carry = if op == 3 { carry_in } else { 0 };
                let res = self.a as i16 - val as i16 - carry as i16;
                self.f = FLAG_N
                    | if res as u8 == 0 { FLAG_Z } else { 0 }
                    | if (self.a & 0x0F) < (val & 0x0F) + carry {
                        FLAG_H
                    } else {
                        0
                    }
                    | if res < 0 { FLAG_C } else { 0 };
                if op != 7 {
                    self.a = res as u8;
                }
            }
            4 => {
                self.a &= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 } | FLAG_H;
            }
            5 => {
                self.a ^= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
            _ => {
                self.a |= val;
                self.f = if self.a == 0 { FLAG_Z } else { 0 };
            }
        }
    }

    fn daa(&mut self) {
        let mut a = self.a;
        let mut carry = self.flag(FLAG_C);
        if !self.flag(FLAG_N) {
            if carry || a > 0x99 {
                a = a.wrapping_add(0x60);
                carry = true;
            }
            if self.flag(FLAG_H) || a & 0x0F > 0x09 {
                a = a.wrapping_add(0x06);
            }
        } else {
            if carry {
                a = a.wrapping_sub(0x60);
            }
            if self.flag(FLAG_H) {
                a = a.wrapping_sub(0x06);
            }
        }
        self.a = a;
        self.f = (self.f & FLAG_N) | if a == 0 { FLAG_Z } else { 0 } | if carry { FLAG_C } else { 0 };
    }

    fn handle_cb(&mut self, opcode: u8, mmu: &mut Mmu) {
        let r = opcode & 0x07;
        let val = self.read_reg(mmu, r);
        match opcode {
            0x00..=0x3F => {
                let carry_in = self.flag(FLAG_C) as u8;
                let (res, carry) = match opcode >> 3 {
                    0 => (val.rotate_left(1), val & 0x80 != 0),
                    1 => (val.rotate_right(1), val & 0x01 != 0),
                    2 => ((val << 1) | carry_in, val & 0x80 != 0),
                    3 => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
                    4 => (val << 1, val & 0x80 != 0),
                    5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
                    6 => (val.rotate_left(4), false),
                    _ => (val >> 1, val & 0x01 != 0),
                };
                self.f = if res == 0 { FLAG_Z } else { 0 } | if carry { FLAG_C } else { 0 };
                self.write_reg(mmu, r, res);
            }
            0x40..=0x7F => {
                let bit = (opcode >> 3) & 7;
                self.f =
                    (self.f & FLAG_C) | FLAG_H | if val & (1 << bit) == 0 { FLAG_Z } else { 0 };
            }
            0x80..=0xBF => {
                let bit = (opcode >> 3) & 7;
                self.write_reg(mmu, r, val & !(1 << bit));
            }
            _ => {
                let bit = (opcode >> 3) & 7;
                self.write_reg(mmu, r, val | (1 << bit));
            }
        }
    }

    pub fn save_state(&self, w: &mut StateWriter) {
        for v in [self.a, self.f, self.b, self.c, self.d, self.e, self.h, self.l] {
            w.u8(v);
        }
        w.u16(self.pc);
        w.u16(self.sp);
        w.bool(self.ime);
        w.bool(self.ei_delay);
        w.bool(self.halted);
        w.bool(self.stopped);
        w.bool(self.halt_bug);
        w.bool(self.double_speed);
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), SnapshotError> {
        self.a = r.u8()?;
        self.f = r.u8()? & 0xF0;
        self.b = r.u8()?;
        self.c = r.u8()?;
        self.d = r.u8()?;
        self.e = r.u8()?;
        self.h = r.u8()?;
        self.l = r.u8()?;
        self.pc = r.u16()?;
        self.sp = r.u16()?;
        self.ime = r.bool()?;
        self.ei_delay = r.bool()?;
        self.halted = r.bool()?;
        self.stopped = r.bool()?;
        self.halt_bug = r.bool()?;
        self.double_speed = r.bool()?;
        self.spent = 0;
        Ok(())
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new(SystemType::Dmg)
    }
}
