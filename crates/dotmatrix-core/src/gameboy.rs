use crate::{
    cartridge::{CartFlags, Cartridge, Header, LoadError, MbcKind, SaveData, SaveDataError},
    config::Config,
    cpu::Cpu,
    events::{ErrorKind, Event},
    hardware::{FRAME_CPU_CYCLES, SystemSelection, SystemType},
    joypad::Button,
    mmu::Mmu,
    serial::{LinkPort, Serial},
};

/// What a successful [`GameBoy::load_rom`] found in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomInfo {
    pub header: Header,
    pub system: SystemType,
    pub mbc: MbcKind,
    pub flags: CartFlags,
    pub rom_size: usize,
    pub ram_size: usize,
    /// Sum of the title bytes, as used for palette lookup.
    pub title_hash: u8,
    pub header_checksum_ok: bool,
}

/// Resolves the console model from the header CGB flag and the user's
/// preference. Informational notes are returned alongside.
fn resolve_system(
    header: &Header,
    selection: SystemSelection,
) -> Result<(SystemType, Option<&'static str>), LoadError> {
    if header.cgb_only() {
        return match selection {
            SystemSelection::ForceDmg => Err(LoadError::SystemConflict(
                "only GBC system supported but config forces DMG system",
            )),
            SystemSelection::ForceSgb => Ok((
                SystemType::Sgb,
                Some("GBC only game but set to SGB system via config"),
            )),
            _ => Ok((SystemType::Gbc, None)),
        };
    }
    if header.cgb_supported() {
        return Ok(match selection {
            SystemSelection::ForceGbc => (SystemType::Gbc, None),
            SystemSelection::ForceSgb => (
                SystemType::Sgb,
                Some("rom supports GBC mode, however falling back to SGB mode"),
            ),
            _ => (
                SystemType::Dmg,
                Some("rom supports GBC mode, however falling back to DMG mode"),
            ),
        });
    }
    match selection {
        SystemSelection::ForceGbc => Err(LoadError::SystemConflict(
            "only DMG system supported but config forces GBC system",
        )),
        SystemSelection::ForceSgb => Ok((SystemType::Sgb, None)),
        _ => Ok((SystemType::Dmg, None)),
    }
}

pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    config: Config,
    system: SystemType,
}

impl GameBoy {
    pub fn new(config: Config) -> Self {
        let system = SystemType::Dmg;
        Self {
            cpu: Cpu::new(system),
            mmu: Mmu::new(system, &config),
            config,
            system,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn system_type(&self) -> SystemType {
        self.system
    }

    pub fn is_loaded(&self) -> bool {
        self.mmu.cart.is_some()
    }

    /// Validates and inserts a cartridge, then resets to the post-boot
    /// state. On failure the machine is left without a cartridge.
    pub fn load_rom(&mut self, rom: Vec<u8>) -> Result<RomInfo, LoadError> {
        self.mmu.cart = None;
        match self.try_load(rom) {
            Ok(info) => Ok(info),
            Err(e) => {
                log::error!("rom load failed: {e}");
                self.mmu.events.error(ErrorKind::Rom, e.to_string());
                Err(e)
            }
        }
    }

    fn try_load(&mut self, rom: Vec<u8>) -> Result<RomInfo, LoadError> {
        let cart = Cartridge::load(rom)?;
        let header = cart.header().clone();
        let (system, note) = resolve_system(&header, self.config.system)?;

        let info = RomInfo {
            system,
            mbc: cart.mbc(),
            flags: cart.flags(),
            rom_size: cart.rom().len(),
            ram_size: cart.ram().len(),
            title_hash: crate::cartridge::title_hash(cart.rom()),
            header_checksum_ok: crate::cartridge::header_checksum(cart.rom())
                == header.header_checksum,
            header,
        };
        if !info.header_checksum_ok {
            log::warn!("header checksum mismatch");
        }

        self.system = system;
        self.reset_with(Some(cart));
        if let Some(note) = note {
            log::info!("{note}");
            self.mmu.events.info(note);
        }
        log::info!(
            "loaded \"{}\" as {} ({:?}, {} KiB rom, {} B ram)",
            info.header.title,
            system.name(),
            info.mbc,
            info.rom_size / 1024,
            info.ram_size
        );
        Ok(info)
    }

    /// Returns to the post-boot state, keeping the cartridge (with its RAM)
    /// and the attached link port.
    pub fn reset(&mut self) {
        let cart = self.mmu.cart.take();
        self.reset_with(cart);
    }

    fn reset_with(&mut self, mut cart: Option<Cartridge>) {
        let mut serial = std::mem::replace(&mut self.mmu.serial, Serial::new(false));
        serial.reset(self.system.is_gbc());
        if let Some(c) = cart.as_mut() {
            c.reset_banking();
        }
        self.cpu = Cpu::new(self.system);
        self.mmu = Mmu::new(self.system, &self.config);
        self.mmu.serial = serial;
        if let Some(c) = cart.as_ref().filter(|_| !self.system.is_gbc()) {
            let rom = c.rom();
            let palette = self
                .config
                .palette
                .resolve_for(crate::cartridge::title_hash(rom), rom[0x137]);
            self.mmu.ppu.set_palette(palette);
        }
        self.mmu.cart = cart;
    }

    /// Executes one instruction and advances every unit by its cost.
    pub fn run_step(&mut self) -> u32 {
        let mmu = &mut self.mmu;
        mmu.double_speed = self.cpu.double_speed;
        let prev_div = mmu.timer.div();
        let cycles = self.cpu.step(mmu);

        // a speed switch inside the step applies from here on
        let double_speed = self.cpu.double_speed;
        mmu.double_speed = double_speed;
        let ds = double_speed as u32;

        // the reset already delivered its own edges; count from zero
        let prev_div = if mmu.take_div_reset() { 0 } else { prev_div };
        mmu.timer.step(cycles, &mut mmu.io);
        let curr_div = mmu.timer.div();
        mmu.serial.step(prev_div, curr_div, double_speed, &mut mmu.io);
        mmu.apu
            .step(cycles, prev_div, curr_div, double_speed, &mut mmu.io);
        mmu.ppu.step(cycles >> ds, &mut mmu.io, &mut mmu.events);
        if let Some(cart) = mmu.cart.as_mut() {
            cart.step_rtc(cycles >> ds);
        }
        cycles
    }

    /// Runs until at least one frame's worth of cycles has elapsed.
    pub fn run_frame(&mut self) -> u32 {
        let mut total = 0;
        while total < FRAME_CPU_CYCLES {
            total += self.run_step();
        }
        total
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.mmu.events.drain().collect()
    }

    pub fn framebuffer(&self) -> &[u32] {
        self.mmu.ppu.framebuffer()
    }

    pub fn frame_ready(&self) -> bool {
        self.mmu.ppu.frame_ready()
    }

    pub fn clear_frame_ready(&mut self) {
        self.mmu.ppu.clear_frame_ready();
    }

    /// Interleaved stereo samples at `Config::sample_rate`.
    pub fn take_samples(&mut self) -> Vec<i16> {
        self.mmu.apu.take_samples()
    }

    /// Bytes shifted out over the serial port since the last call.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.mmu.take_serial_output()
    }

    pub fn press(&mut self, button: Button) {
        self.mmu.joypad.press(&mut self.mmu.io, button);
    }

    pub fn release(&mut self, button: Button) {
        self.mmu.joypad.release(button);
    }

    pub fn connect_link_cable(&mut self, port: Box<dyn LinkPort>) {
        self.mmu.serial.connect(port);
    }

    pub fn disconnect_link_cable(&mut self) {
        self.mmu.serial.disconnect();
    }

    pub fn has_save(&self) -> bool {
        self.mmu.cart.as_ref().is_some_and(Cartridge::has_save)
    }

    pub fn has_rtc(&self) -> bool {
        self.mmu.cart.as_ref().is_some_and(Cartridge::has_rtc)
    }

    pub fn save_data(&self) -> Result<SaveData, SaveDataError> {
        self.mmu
            .cart
            .as_ref()
            .ok_or(SaveDataError::NoCartridge)?
            .save_data()
    }

    /// Restores battery RAM. A missing clock record on an RTC cartridge is
    /// reported but does not fail the load.
    pub fn load_save_data(&mut self, data: &SaveData) -> Result<(), SaveDataError> {
        let cart = self.mmu.cart.as_mut().ok_or(SaveDataError::NoCartridge)?;
        if let Err(e) = cart.load_save_data(data) {
            log::warn!("save data rejected: {e}");
            self.mmu.events.error(ErrorKind::SaveData, e.to_string());
            return Err(e);
        }
        if cart.has_rtc() && data.rtc.is_none() {
            let msg = "save data has no rtc record, clock keeps its current value";
            log::warn!("{msg}");
            self.mmu.events.warn(msg);
        }
        Ok(())
    }

    /// Catches the cartridge clock up on host time that passed while the
    /// machine was not running.
    pub fn advance_rtc_seconds(&mut self, seconds: u64) {
        if let Some(cart) = self.mmu.cart.as_mut() {
            cart.advance_rtc_seconds(seconds);
        }
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{self, INT_SERIAL};
    use crate::timer::Timer;

    fn header_with_cgb_flag(flag: u8) -> Header {
        let mut rom = vec![0u8; 0x8000];
        rom[0x143] = flag;
        Header::parse(&rom).unwrap()
    }

    #[test]
    fn cgb_only_rom_rejects_forced_dmg() {
        let h = header_with_cgb_flag(0xC0);
        assert!(matches!(
            resolve_system(&h, SystemSelection::ForceDmg),
            Err(LoadError::SystemConflict(_))
        ));
        assert_eq!(
            resolve_system(&h, SystemSelection::Auto).unwrap().0,
            SystemType::Gbc
        );
        assert_eq!(
            resolve_system(&h, SystemSelection::ForceSgb).unwrap().0,
            SystemType::Sgb
        );
    }

    #[test]
    fn dual_mode_rom_falls_back_to_dmg() {
        let h = header_with_cgb_flag(0x80);
        let (system, note) = resolve_system(&h, SystemSelection::Auto).unwrap();
        assert_eq!(system, SystemType::Dmg);
        assert!(note.is_some());
        assert_eq!(
            resolve_system(&h, SystemSelection::ForceGbc).unwrap().0,
            SystemType::Gbc
        );
    }

    #[test]
    fn dmg_rom_rejects_forced_gbc() {
        let h = header_with_cgb_flag(0x00);
        assert!(resolve_system(&h, SystemSelection::ForceGbc).is_err());
        assert_eq!(
            resolve_system(&h, SystemSelection::ForceSgb).unwrap(),
            (SystemType::Sgb, None)
        );
    }

    fn machine_at_wram(program: &[u8], div: u16) -> GameBoy {
        let mut gb = GameBoy::default();
        for (i, &b) in program.iter().enumerate() {
            gb.mmu.write(0xC000 + i as u16, b);
        }
        gb.mmu.timer = Timer::post_boot(div);
        gb.cpu.pc = 0xC000;
        gb
    }

    #[test]
    fn div_write_clocks_frame_sequencer_once() {
        // LDH (DIV),A with DIV bit 12 set
        let mut gb = machine_at_wram(&[0xE0, 0x04], 0x1000);
        let before = gb.mmu.apu.sequencer_step;
        assert_eq!(gb.run_step(), 12);
        assert_eq!(gb.mmu.apu.sequencer_step, (before + 1) & 7);
        assert_eq!(gb.mmu.timer.div(), 12);
    }

    #[test]
    fn div_write_keeps_serial_transfer_in_flight() {
        let mut gb = machine_at_wram(&[0xE0, 0x04], 0x0010);
        gb.mmu.write(io::SB, 0x42);
        gb.mmu.write(io::SC, 0x81);
        gb.run_step();
        assert!(gb.mmu.serial.is_transferring());
        assert_ne!(gb.mmu.io.get(io::SC) & 0x80, 0);
        assert_eq!(gb.mmu.io.get(io::IF) & INT_SERIAL, 0);
        assert_eq!(gb.mmu.io.get(io::SB), 0x42);
    }

    #[test]
    fn unloaded_machine_still_steps() {
        let mut gb = GameBoy::default();
        assert!(!gb.is_loaded());
        assert!(gb.run_frame() >= FRAME_CPU_CYCLES);
        assert_eq!(gb.save_data(), Err(SaveDataError::NoCartridge));
    }
}
