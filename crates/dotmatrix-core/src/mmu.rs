use crate::{
    apu::Apu,
    cartridge::Cartridge,
    config::Config,
    events::{ErrorKind, Event, EventQueue},
    hardware::SystemType,
    io::{self, Io},
    joypad::Joypad,
    ppu::{OAM_SIZE, Ppu},
    serial::Serial,
    timer::Timer,
};

pub const WRAM_SIZE: usize = 0x2000;
pub const HRAM_SIZE: usize = 0x7F;

/// Divider phase at the first post-boot instruction.
const POST_BOOT_DIV: u16 = 0xABCC;

/// The address bus and everything hanging off it.
pub struct Mmu {
    pub io: Io,
    pub wram: Box<[u8; WRAM_SIZE]>,
    pub hram: [u8; HRAM_SIZE],
    pub cart: Option<Cartridge>,
    pub ppu: Ppu,
    pub apu: Apu,
    pub timer: Timer,
    pub serial: Serial,
    pub joypad: Joypad,
    pub events: EventQueue,
    /// Mirrors the CPU speed flag for DIV-driven side effects.
    pub double_speed: bool,
    /// Set when DIV was cleared during the current step.
    div_reset: bool,
    unusable_reported: bool,
    no_cart_reported: bool,
}

impl Mmu {
    pub fn new(system: SystemType, config: &Config) -> Self {
        let gbc = system.is_gbc();
        let mut io = Io::new(gbc);
        io.set(io::DIV, (POST_BOOT_DIV >> 8) as u8);
        Self {
            io,
            wram: Box::new([0; WRAM_SIZE]),
            hram: [0; HRAM_SIZE],
            cart: None,
            ppu: Ppu::new(config.palette.resolve()),
            apu: Apu::new(config.sample_rate),
            timer: Timer::post_boot(POST_BOOT_DIV),
            serial: Serial::new(gbc),
            joypad: Joypad::new(),
            events: EventQueue::new(),
            double_speed: false,
            div_reset: false,
            unusable_reported: false,
            no_cart_reported: false,
        }
    }

    pub fn is_gbc(&self) -> bool {
        self.io.is_gbc()
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => self.cart.as_ref().map_or(0xFF, |c| c.read_rom(addr)),
            0x8000..=0x9FFF => self.ppu.vram[(addr - 0x8000) as usize],
            0xA000..=0xBFFF => self.cart.as_ref().map_or(0xFF, |c| c.read_ram(addr)),
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize],
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize],
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize],
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00..=0xFF7F => self.read_io(addr),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            io::IE => self.io.ie,
        }
    }

    /// Reads on behalf of the CPU, reporting accesses that reach no device.
    pub fn cpu_read(&mut self, addr: u16) -> u8 {
        self.check_mapped(addr, "read");
        self.read(addr)
    }

    /// Reports the first access to the unusable area, and the first
    /// cartridge access with no cartridge inserted, since reset.
    fn check_mapped(&mut self, addr: u16, access: &str) {
        let reported = match addr {
            0xFEA0..=0xFEFF => &mut self.unusable_reported,
            0x0000..=0x7FFF | 0xA000..=0xBFFF if self.cart.is_none() => {
                &mut self.no_cart_reported
            }
            _ => return,
        };
        if std::mem::replace(reported, true) {
            return;
        }
        let message = if (0xFEA0..=0xFEFF).contains(&addr) {
            format!("{access} of unusable address {addr:04X}")
        } else {
            format!("{access} of {addr:04X} with no cartridge inserted")
        };
        log::debug!("{message}");
        self.events.error(ErrorKind::Memory, message);
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        self.check_mapped(addr, "write");
        match addr {
            0x0000..=0x7FFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write(addr, val);
                }
            }
            0x8000..=0x9FFF => self.ppu.vram[(addr - 0x8000) as usize] = val,
            0xA000..=0xBFFF => {
                if let Some(cart) = self.cart.as_mut() {
                    cart.write_ram(addr, val);
                }
            }
            0xC000..=0xDFFF => self.wram[(addr - 0xC000) as usize] = val,
            0xE000..=0xFDFF => self.wram[(addr - 0xE000) as usize] = val,
            0xFE00..=0xFE9F => self.ppu.oam[(addr - 0xFE00) as usize] = val,
            0xFEA0..=0xFEFF => {}
            0xFF00..=0xFF7F => self.write_io(addr, val),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            io::IE => self.io.ie = val,
        }
    }

    fn read_io(&self, addr: u16) -> u8 {
        match addr {
            io::P1 => self.joypad.read(&self.io),
            _ => self.io.read(addr),
        }
    }

    fn write_io(&mut self, addr: u16, val: u8) {
        match addr {
            io::SC => self.serial.write(&mut self.io, addr, val),
            io::DIV => self.reset_div(self.double_speed),
            io::TIMA | io::TMA | io::TAC => self.timer.write(&mut self.io, addr, val),
            0xFF10..=0xFF3F => self.apu.write(&mut self.io, addr, val),
            io::LCDC => self.ppu.write_lcdc(&mut self.io, val),
            io::STAT | io::LYC => {
                self.io.write(addr, val);
                self.ppu.sync_registers(&mut self.io);
            }
            io::LY => {}
            io::DMA => {
                self.io.set(io::DMA, val);
                self.oam_dma(val);
            }
            io::BGP | io::OBP0 | io::OBP1 => {
                self.io.write(addr, val);
                self.ppu.mark_palette_dirty(addr);
            }
            io::KEY1 => {
                if self.is_gbc() {
                    self.io.write(addr, val);
                }
            }
            _ => self.io.write(addr, val),
        }
    }

    /// Clears the divider and forwards the resulting edges.
    pub fn reset_div(&mut self, double_speed: bool) {
        let old = self.timer.div();
        self.timer.reset_div(&mut self.io);
        self.apu.on_div_reset(old, double_speed, &mut self.io);
        self.div_reset = true;
    }

    /// Reports and clears a DIV reset since the last call.
    pub fn take_div_reset(&mut self) -> bool {
        std::mem::take(&mut self.div_reset)
    }

    /// Copies 160 bytes from `page << 8` into OAM at once.
    fn oam_dma(&mut self, page: u8) {
        let mut source = (page as u16) << 8;
        if source >= 0xE000 {
            source -= 0x2000;
        }
        let mut buf = [0u8; OAM_SIZE];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read(source + i as u16);
        }
        self.ppu.oam = buf;
        log::trace!("oam dma from {source:04X}");
        self.events.push(Event::Dma { source });
    }

    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.serial.take_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ErrorEvent;

    fn mmu() -> Mmu {
        Mmu::new(SystemType::Dmg, &Config::default())
    }

    #[test]
    fn echo_ram_mirrors_wram() {
        let mut mmu = mmu();
        mmu.write(0xC123, 0x42);
        assert_eq!(mmu.read(0xE123), 0x42);
        mmu.write(0xFDFF, 0x17);
        assert_eq!(mmu.read(0xDDFF), 0x17);
    }

    fn memory_errors(mmu: &mut Mmu) -> Vec<String> {
        mmu.events
            .drain()
            .filter_map(|e| match e {
                Event::Error(ErrorEvent::Error {
                    kind: ErrorKind::Memory,
                    message,
                }) => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn unusable_area_and_missing_cart_read_ff() {
        let mut mmu = mmu();
        mmu.write(0xFEA0, 0x00);
        assert_eq!(mmu.cpu_read(0xFEA0), 0xFF);
        assert_eq!(mmu.cpu_read(0x0100), 0xFF);
        assert_eq!(mmu.cpu_read(0xA000), 0xFF);
        assert_eq!(
            memory_errors(&mut mmu),
            [
                "write of unusable address FEA0",
                "read of 0100 with no cartridge inserted",
            ]
        );

        // each kind is reported once until reset
        mmu.cpu_read(0xFEFF);
        mmu.write(0x2000, 0x01);
        assert!(memory_errors(&mut mmu).is_empty());
        assert_eq!(mmu.read(0xFEA0), 0xFF);
    }

    #[test]
    fn oam_dma_copies_page_and_reports() {
        let mut mmu = mmu();
        for i in 0..0xA0u16 {
            mmu.write(0xC000 + i, i as u8);
        }
        mmu.write(io::DMA, 0xC0);
        assert_eq!(mmu.ppu.oam[0x9F], 0x9F);
        assert_eq!(mmu.read(0xFE10), 0x10);
        assert!(
            mmu.events
                .drain()
                .any(|e| e == Event::Dma { source: 0xC000 })
        );
    }

    #[test]
    fn div_write_clears_divider() {
        let mut mmu = mmu();
        assert_ne!(mmu.read(io::DIV), 0);
        mmu.write(io::DIV, 0x55);
        assert_eq!(mmu.read(io::DIV), 0);
        assert_eq!(mmu.timer.div(), 0);
    }

    #[test]
    fn ly_is_read_only() {
        let mut mmu = mmu();
        mmu.write(io::LY, 0x42);
        assert_eq!(mmu.read(io::LY), 0);
    }
}
