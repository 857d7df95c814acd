//! Sound: two pulse channels, the wave channel, noise, the frame sequencer
//! and a stereo mixer.
//!
//! Register values live in the I/O bank; the channels here hold only the
//! counters that are not visible to the CPU. Every channel produces a signed
//! sample centered on zero, and a channel whose DAC is off is silent.

use std::collections::VecDeque;

use crate::hardware::CPU_CLOCK_HZ;
use crate::io::{self, Io};
use crate::snapshot::{SnapshotError, StateReader, StateWriter};

#[cfg(feature = "apu-trace")]
macro_rules! apu_trace {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}
#[cfg(not(feature = "apu-trace"))]
macro_rules! apu_trace {
    ($($arg:tt)*) => {};
}

const VOLUME_FACTOR: i32 = 64;
pub const AUDIO_LATENCY_MS: u32 = 40;

/// Bytes written by [`Apu::save_state`]: both pulse channels, wave, noise,
/// then the sequencer and mixer state.
pub const STATE_SIZE: usize = 17 + 17 + 11 + 14 + 25;

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1], // 12.5%
    [1, 0, 0, 0, 0, 0, 0, 1], // 25%
    [1, 0, 0, 0, 0, 1, 1, 1], // 50%
    [0, 1, 1, 1, 1, 1, 1, 0], // 75%
];

/// Wave nibble to signed level, symmetric around zero.
const WAVE_SAMPLE_TABLE: [i8; 16] = [
    -15, -13, -11, -9, -7, -5, -3, -1, 1, 3, 5, 7, 9, 11, 13, 15,
];

/// Right shift per NR32 volume code: mute, 100%, 50%, 25%.
const WAVE_SHIFT: [u8; 4] = [4, 0, 1, 2];

/// Signed wave level for `nibble` at NR32 volume `code`.
pub fn wave_sample(nibble: u8, code: u8) -> i8 {
    let shift = WAVE_SHIFT[(code & 3) as usize];
    if shift >= 4 {
        return 0;
    }
    WAVE_SAMPLE_TABLE[(nibble & 0x0F) as usize] / (1 << shift)
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Envelope {
    add: bool,
    period: u8,
    volume: u8,
    timer: u8,
}

impl Envelope {
    fn trigger(&mut self, nrx2: u8) {
        self.volume = nrx2 >> 4;
        self.add = nrx2 & 0x08 != 0;
        self.period = nrx2 & 0x07;
        self.timer = self.period;
    }

    fn clock(&mut self) {
        if self.period == 0 {
            return;
        }
        self.timer = self.timer.saturating_sub(1);
        if self.timer == 0 {
            self.timer = self.period;
            if self.add && self.volume < 15 {
                self.volume += 1;
            } else if !self.add && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }

    fn save(&self, w: &mut StateWriter) {
        w.bool(self.add);
        w.u8(self.period);
        w.u8(self.volume);
        w.u8(self.timer);
    }

    fn load(r: &mut StateReader) -> Result<Self, SnapshotError> {
        Ok(Self {
            add: r.bool()?,
            period: r.u8()? & 0x07,
            volume: r.u8()? & 0x0F,
            timer: r.u8()?,
        })
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct Sweep {
    enabled: bool,
    shadow: u16,
    timer: u8,
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct PulseChannel {
    enabled: bool,
    dac: bool,
    length: u16,
    duty_pos: u8,
    timer: u32,
    envelope: Envelope,
    sweep: Sweep,
}

impl PulseChannel {
    fn period(freq: u16) -> u32 {
        (2048 - freq as u32) * 4
    }

    fn step(&mut self, cycles: u32, freq: u16) {
        if !self.enabled {
            return;
        }
        let mut cycles = cycles;
        while cycles >= self.timer {
            cycles -= self.timer;
            self.timer = Self::period(freq);
            self.duty_pos = (self.duty_pos + 1) & 7;
        }
        self.timer -= cycles;
    }

    fn output(&self, duty: u8) -> i8 {
        if !self.enabled || !self.dac {
            return 0;
        }
        let level = self.envelope.volume as i8;
        if DUTY_TABLE[(duty & 3) as usize][self.duty_pos as usize] != 0 {
            level
        } else {
            -level
        }
    }

    fn clock_length(&mut self, length_enable: bool) {
        if length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    fn save(&self, w: &mut StateWriter) {
        w.bool(self.enabled);
        w.bool(self.dac);
        w.u16(self.length);
        w.u8(self.duty_pos);
        w.u32(self.timer);
        self.envelope.save(w);
        w.bool(self.sweep.enabled);
        w.u16(self.sweep.shadow);
        w.u8(self.sweep.timer);
    }

    fn load(r: &mut StateReader) -> Result<Self, SnapshotError> {
        Ok(Self {
            enabled: r.bool()?,
            dac: r.bool()?,
            length: r.u16()?.min(64),
            duty_pos: r.u8()? & 7,
            timer: r.u32()?.min(8192),
            envelope: Envelope::load(r)?,
            sweep: Sweep {
                enabled: r.bool()?,
                shadow: r.u16()? & 0x7FF,
                timer: r.u8()?,
            },
        })
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct WaveChannel {
    enabled: bool,
    dac: bool,
    length: u16,
    /// 0-31; even positions play the high nibble.
    position: u8,
    sample_buffer: u8,
    timer: u32,
    /// NR34 as written by the last trigger.
    nr34: u8,
}

impl WaveChannel {
    fn period(freq: u16) -> u32 {
        (2048 - freq as u32) * 2
    }

    fn advance(&mut self, wave: &[u8; 0x10]) {
        self.position = (self.position + 1) & 0x1F;
        self.sample_buffer = wave[(self.position >> 1) as usize];
    }

    fn step(&mut self, cycles: u32, freq: u16, wave: &[u8; 0x10]) {
        if !self.enabled {
            return;
        }
        let mut cycles = cycles;
        while cycles >= self.timer {
            cycles -= self.timer;
            self.timer = Self::period(freq);
            self.advance(wave);
        }
        self.timer -= cycles;
    }

    fn nibble(&self) -> u8 {
        if self.position & 1 == 0 {
            self.sample_buffer >> 4
        } else {
            self.sample_buffer & 0x0F
        }
    }

    fn output(&self, nr32: u8) -> i8 {
        if !self.enabled || !self.dac {
            return 0;
        }
        wave_sample(self.nibble(), (nr32 >> 5) & 3)
    }

    fn clock_length(&mut self, length_enable: bool) {
        if length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    fn save(&self, w: &mut StateWriter) {
        w.bool(self.enabled);
        w.bool(self.dac);
        w.u16(self.length);
        w.u8(self.position);
        w.u8(self.sample_buffer);
        w.u32(self.timer);
        w.u8(self.nr34);
    }

    fn load(r: &mut StateReader) -> Result<Self, SnapshotError> {
        Ok(Self {
            enabled: r.bool()?,
            dac: r.bool()?,
            length: r.u16()?.min(256),
            position: r.u8()? & 0x1F,
            sample_buffer: r.u8()?,
            timer: r.u32()?.min(4096),
            nr34: r.u8()?,
        })
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq)]
struct NoiseChannel {
    enabled: bool,
    dac: bool,
    length: u16,
    envelope: Envelope,
    lfsr: u16,
    timer: u32,
}

impl NoiseChannel {
    fn period(nr43: u8) -> u32 {
        let divisor = match nr43 & 0x07 {
            0 => 8,
            r => r as u32 * 16,
        };
        divisor << (nr43 >> 4)
    }

    fn step(&mut self, cycles: u32, nr43: u8) {
        if !self.enabled || nr43 >> 4 >= 14 {
            return;
        }
        let mut cycles = cycles;
        while cycles >= self.timer {
            cycles -= self.timer;
            self.timer = Self::period(nr43);
            // feedback is bit 0 XNOR bit 1
            let bit = !(self.lfsr ^ (self.lfsr >> 1)) & 1;
            self.lfsr = (self.lfsr >> 1) | (bit << 14);
            if nr43 & 0x08 != 0 {
                self.lfsr = (self.lfsr & !0x40) | (bit << 6);
            }
        }
        self.timer -= cycles;
    }

    fn output(&self) -> i8 {
        if !self.enabled || !self.dac {
            return 0;
        }
        let level = self.envelope.volume as i8;
        if self.lfsr & 1 == 0 { level } else { -level }
    }

    fn clock_length(&mut self, length_enable: bool) {
        if length_enable && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }

    fn save(&self, w: &mut StateWriter) {
        w.bool(self.enabled);
        w.bool(self.dac);
        w.u16(self.length);
        self.envelope.save(w);
        w.u16(self.lfsr);
        w.u32(self.timer);
    }

    fn load(r: &mut StateReader) -> Result<Self, SnapshotError> {
        Ok(Self {
            enabled: r.bool()?,
            dac: r.bool()?,
            length: r.u16()?.min(64),
            envelope: Envelope::load(r)?,
            lfsr: r.u16()? & 0x7FFF,
            timer: r.u32()?,
        })
    }
}

#[derive(Clone)]
pub struct Apu {
    ch1: PulseChannel,
    ch2: PulseChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,
    pub(crate) sequencer_step: u8,
    /// Residual CPU cycle in double speed, where channels run at half rate.
    half_cycle: u32,
    sample_rate: u32,
    sample_phase: u32,
    samples: VecDeque<i16>,
    max_samples: usize,
    hp_coef: f32,
    hp_prev_input_left: f32,
    hp_prev_output_left: f32,
    hp_prev_input_right: f32,
    hp_prev_output_right: f32,
}

fn freq(io: &Io, lo: u16, hi: u16) -> u16 {
    ((io.get(hi) as u16 & 0x07) << 8) | io.get(lo) as u16
}

impl Apu {
    /// APU as the boot ROM leaves it: channel 1 playing its chime tail.
    pub fn new(sample_rate: u32) -> Self {
        let sample_rate = sample_rate.max(1);
        let mut ch1 = PulseChannel {
            enabled: true,
            dac: true,
            timer: PulseChannel::period(0x7FF),
            ..PulseChannel::default()
        };
        ch1.envelope.trigger(0xF3);
        Self {
            ch1,
            ch2: PulseChannel::default(),
            ch3: WaveChannel::default(),
            ch4: NoiseChannel::default(),
            sequencer_step: 0,
            half_cycle: 0,
            sample_rate,
            sample_phase: 0,
            samples: VecDeque::new(),
            max_samples: ((sample_rate as usize * AUDIO_LATENCY_MS as usize) / 1000) * 2,
            hp_coef: Self::calc_hp_coef(sample_rate),
            hp_prev_input_left: 0.0,
            hp_prev_output_left: 0.0,
            hp_prev_input_right: 0.0,
            hp_prev_output_right: 0.0,
        }
    }

    fn calc_hp_coef(rate: u32) -> f32 {
        0.999_958_f32.powf(CPU_CLOCK_HZ as f32 / rate as f32)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Interleaved stereo samples produced since the last call.
    pub fn take_samples(&mut self) -> Vec<i16> {
        self.samples.drain(..).collect()
    }

    fn push_sample(&mut self, left: i16, right: i16) {
        while self.samples.len() + 2 > self.max_samples.max(2) {
            self.samples.pop_front();
        }
        self.samples.push_back(left);
        self.samples.push_back(right);
    }

    fn powered(io: &Io) -> bool {
        io.get(io::NR52) & 0x80 != 0
    }

    /// Handles a CPU write to 0xFF10-0xFF3F.
    pub fn write(&mut self, io: &mut Io, addr: u16, val: u8) {
        if addr >= io::WAVE_RAM {
            io.set(addr, val);
            return;
        }
        if addr == io::NR52 {
            let was_on = Self::powered(io);
            io.write(io::NR52, val);
            match (was_on, val & 0x80 != 0) {
                (true, false) => self.power_off(io),
                (false, true) => self.sequencer_step = 0,
                _ => {}
            }
            self.sync_status(io);
            return;
        }
        if !Self::powered(io) {
            return;
        }
        io.set(addr, val);
        apu_trace!("[APU] write {:04X} <- {:02X}", addr, val);

        match addr {
            io::NR10 => {
                // leaving negate after a negated calculation is not modelled
            }
            io::NR11 => self.ch1.length = 64 - (val & 0x3F) as u16,
            io::NR21 => self.ch2.length = 64 - (val & 0x3F) as u16,
            io::NR31 => self.ch3.length = 256 - val as u16,
            io::NR41 => self.ch4.length = 64 - (val & 0x3F) as u16,
            io::NR12 => {
                self.ch1.dac = val & 0xF8 != 0;
                self.ch1.enabled &= self.ch1.dac;
            }
            io::NR22 => {
                self.ch2.dac = val & 0xF8 != 0;
                self.ch2.enabled &= self.ch2.dac;
            }
            io::NR30 => {
                self.ch3.dac = val & 0x80 != 0;
                self.ch3.enabled &= self.ch3.dac;
            }
            io::NR42 => {
                self.ch4.dac = val & 0xF8 != 0;
                self.ch4.enabled &= self.ch4.dac;
            }
            io::NR14 if val & 0x80 != 0 => self.trigger_pulse1(io),
            io::NR24 if val & 0x80 != 0 => self.trigger_pulse2(io),
            io::NR34 if val & 0x80 != 0 => self.trigger_wave(io, val),
            io::NR44 if val & 0x80 != 0 => self.trigger_noise(io),
            _ => {}
        }
        self.sync_status(io);
    }

    fn power_off(&mut self, io: &mut Io) {
        for addr in io::NR10..=io::NR51 {
            io.set(addr, 0);
        }
        self.ch1 = PulseChannel::default();
        self.ch2 = PulseChannel::default();
        self.ch3 = WaveChannel::default();
        self.ch4 = NoiseChannel::default();
        self.sequencer_step = 0;
        log::debug!("apu powered off");
    }

    fn trigger_pulse1(&mut self, io: &Io) {
        let f = freq(io, io::NR13, io::NR14);
        Self::trigger_pulse(&mut self.ch1, io.get(io::NR12), f);

        let nr10 = io.get(io::NR10);
        let period = (nr10 >> 4) & 0x07;
        let shift = nr10 & 0x07;
        let sweep = &mut self.ch1.sweep;
        sweep.shadow = f;
        sweep.timer = if period == 0 { 8 } else { period };
        sweep.enabled = period != 0 || shift != 0;
        if shift != 0 && sweep_target(f, nr10) > 2047 {
            self.ch1.enabled = false;
        }
    }

    fn trigger_pulse2(&mut self, io: &Io) {
        let f = freq(io, io::NR23, io::NR24);
        Self::trigger_pulse(&mut self.ch2, io.get(io::NR22), f);
    }

    fn trigger_pulse(ch: &mut PulseChannel, nrx2: u8, f: u16) {
        ch.enabled = true;
        if ch.length == 0 {
            ch.length = 64;
        }
        ch.timer = PulseChannel::period(f);
        ch.envelope.trigger(nrx2);
        ch.dac = nrx2 & 0xF8 != 0;
        ch.enabled &= ch.dac;
    }

    fn trigger_wave(&mut self, io: &Io, nr34: u8) {
        let ch = &mut self.ch3;
        ch.enabled = true;
        // the length-enable bit is taken from the previous trigger's NR34
        if ch.length == 0 && ch.nr34 & 0x40 != 0 {
            ch.length = 256;
        }
        ch.position = 0;
        ch.sample_buffer = io.get(io::WAVE_RAM);
        ch.timer = WaveChannel::period(freq(io, io::NR33, io::NR34));
        ch.nr34 = nr34;
        if !ch.dac {
            ch.enabled = false;
        }
    }

    fn trigger_noise(&mut self, io: &Io) {
        let ch = &mut self.ch4;
        ch.enabled = true;
        if ch.length == 0 {
            ch.length = 64;
        }
        ch.lfsr = 0;
        ch.timer = NoiseChannel::period(io.get(io::NR43));
        ch.envelope.trigger(io.get(io::NR42));
        ch.enabled &= ch.dac;
    }

    /// Publishes the channel-on bits in NR52.
    fn sync_status(&self, io: &mut Io) {
        let mut status = io.get(io::NR52) & 0x80;
        for (bit, on) in [
            self.ch1.enabled,
            self.ch2.enabled,
            self.ch3.enabled,
            self.ch4.enabled,
        ]
        .into_iter()
        .enumerate()
        {
            if on {
                status |= 1 << bit;
            }
        }
        io.set(io::NR52, status);
    }

    fn clock_sequencer(&mut self, io: &mut Io) {
        let step = self.sequencer_step;
        self.sequencer_step = (step + 1) & 7;
        if step & 1 == 0 {
            self.ch1.clock_length(io.get(io::NR14) & 0x40 != 0);
            self.ch2.clock_length(io.get(io::NR24) & 0x40 != 0);
            self.ch3.clock_length(io.get(io::NR34) & 0x40 != 0);
            self.ch4.clock_length(io.get(io::NR44) & 0x40 != 0);
        }
        if step == 2 || step == 6 {
            self.clock_sweep(io);
        }
        if step == 7 {
            self.ch1.envelope.clock();
            self.ch2.envelope.clock();
            self.ch4.envelope.clock();
        }
    }

    fn clock_sweep(&mut self, io: &mut Io) {
        let nr10 = io.get(io::NR10);
        let period = (nr10 >> 4) & 0x07;
        let shift = nr10 & 0x07;
        let sweep = &mut self.ch1.sweep;
        sweep.timer = sweep.timer.saturating_sub(1);
        if sweep.timer > 0 {
            return;
        }
        sweep.timer = if period == 0 { 8 } else { period };
        if !sweep.enabled || period == 0 {
            return;
        }
        let target = sweep_target(sweep.shadow, nr10);
        if target > 2047 {
            self.ch1.enabled = false;
            return;
        }
        if shift != 0 {
            sweep.shadow = target;
            io.set(io::NR13, target as u8);
            io.set(io::NR14, (io.get(io::NR14) & !0x07) | ((target >> 8) as u8 & 0x07));
            if sweep_target(target, nr10) > 2047 {
                self.ch1.enabled = false;
            }
        }
    }

    /// DIV was cleared; a set sequencer bit counts as a falling edge.
    pub fn on_div_reset(&mut self, old_div: u16, double_speed: bool, io: &mut Io) {
        let bit = if double_speed { 13 } else { 12 };
        if Self::powered(io) && (old_div >> bit) & 1 != 0 {
            self.clock_sequencer(io);
            self.sync_status(io);
        }
    }

    /// Advances by `cycles` CPU cycles during which the divider moved from
    /// `prev_div` to `curr_div`.
    pub fn step(
        &mut self,
        cycles: u32,
        prev_div: u16,
        curr_div: u16,
        double_speed: bool,
        io: &mut Io,
    ) {
        let powered = Self::powered(io);
        if powered {
            let bit = if double_speed { 13 } else { 12 };
            if (prev_div >> bit) & 1 != 0 && (curr_div >> bit) & 1 == 0 {
                self.clock_sequencer(io);
            }
        }

        // channels and the mixer run at the single-speed clock
        let base_cycles = if double_speed {
            let total = cycles + self.half_cycle;
            self.half_cycle = total & 1;
            total >> 1
        } else {
            cycles
        };

        let wave = io.wave_ram();
        let f1 = freq(io, io::NR13, io::NR14);
        let f2 = freq(io, io::NR23, io::NR24);
        let f3 = freq(io, io::NR33, io::NR34);
        let nr43 = io.get(io::NR43);
        let duty1 = io.get(io::NR11) >> 6;
        let duty2 = io.get(io::NR21) >> 6;
        let nr32 = io.get(io::NR32);
        let nr50 = io.get(io::NR50);
        let nr51 = io.get(io::NR51);

        for _ in 0..base_cycles {
            if powered {
                self.ch1.step(1, f1);
                self.ch2.step(1, f2);
                self.ch3.step(1, f3, &wave);
                self.ch4.step(1, nr43);
            }
            self.sample_phase += self.sample_rate;
            if self.sample_phase >= CPU_CLOCK_HZ {
                self.sample_phase -= CPU_CLOCK_HZ;
                let outputs = [
                    self.ch1.output(duty1),
                    self.ch2.output(duty2),
                    self.ch3.output(nr32),
                    self.ch4.output(),
                ];
                let (l, r) = self.mix(outputs, nr50, nr51);
                self.push_sample(l, r);
            }
        }
        self.sync_status(io);
    }

    fn dacs_on(&self) -> bool {
        self.ch1.dac || self.ch2.dac || self.ch3.dac || self.ch4.dac
    }

    fn mix(&mut self, outputs: [i8; 4], nr50: u8, nr51: u8) -> (i16, i16) {
        if !self.dacs_on() {
            self.hp_prev_input_left = 0.0;
            self.hp_prev_output_left = 0.0;
            self.hp_prev_input_right = 0.0;
            self.hp_prev_output_right = 0.0;
            return (0, 0);
        }
        let mut left = 0i32;
        let mut right = 0i32;
        for (i, &out) in outputs.iter().enumerate() {
            if nr51 & (0x10 << i) != 0 {
                left += out as i32;
            }
            if nr51 & (0x01 << i) != 0 {
                right += out as i32;
            }
        }
        let left_vol = ((nr50 >> 4) & 0x07) as i32 + 1;
        let right_vol = (nr50 & 0x07) as i32 + 1;
        self.dc_block(
            (left * left_vol * VOLUME_FACTOR) as i16,
            (right * right_vol * VOLUME_FACTOR) as i16,
        )
    }

    fn dc_block(&mut self, left: i16, right: i16) -> (i16, i16) {
        let r = self.hp_coef;
        let left_in = left as f32;
        let right_in = right as f32;
        let left_out = left_in - self.hp_prev_input_left + r * self.hp_prev_output_left;
        let right_out = right_in - self.hp_prev_input_right + r * self.hp_prev_output_right;
        self.hp_prev_input_left = left_in;
        self.hp_prev_output_left = left_out;
        self.hp_prev_input_right = right_in;
        self.hp_prev_output_right = right_out;
        (
            left_out.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16,
            right_out.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16,
        )
    }

    pub fn save_state(&self, w: &mut StateWriter) {
        self.ch1.save(w);
        self.ch2.save(w);
        self.ch3.save(w);
        self.ch4.save(w);
        w.u8(self.sequencer_step);
        w.u32(self.half_cycle);
        w.u32(self.sample_phase);
        w.f32(self.hp_prev_input_left);
        w.f32(self.hp_prev_output_left);
        w.f32(self.hp_prev_input_right);
        w.f32(self.hp_prev_output_right);
    }

    pub fn load_state(&mut self, r: &mut StateReader) -> Result<(), SnapshotError> {
        self.ch1 = PulseChannel::load(r)?;
        self.ch2 = PulseChannel::load(r)?;
        self.ch3 = WaveChannel::load(r)?;
        self.ch4 = NoiseChannel::load(r)?;
        self.sequencer_step = r.u8()? & 7;
        self.half_cycle = r.u32()? & 1;
        self.sample_phase = r.u32()?;
        if self.sample_phase >= CPU_CLOCK_HZ {
            return Err(SnapshotError::Corrupt("apu sample phase out of range"));
        }
        self.hp_prev_input_left = r.f32()?;
        self.hp_prev_output_left = r.f32()?;
        self.hp_prev_input_right = r.f32()?;
        self.hp_prev_output_right = r.f32()?;
        Ok(())
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SAMPLE_RATE)
    }
}

fn sweep_target(shadow: u16, nr10: u8) -> u16 {
    let delta = shadow >> (nr10 & 0x07);
    if nr10 & 0x08 != 0 {
        shadow.wrapping_sub(delta)
    } else {
        shadow + delta
    }
}
