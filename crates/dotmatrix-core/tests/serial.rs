mod common;

use common::{IDLE_ROM, RomBuilder, machine, run_frames};
use dotmatrix_core::GameBoy;
use dotmatrix_core::io::{self, INT_SERIAL};
use dotmatrix_core::serial::{LinkCable, NullLinkPort};

fn serial_irq(gb: &GameBoy) -> bool {
    gb.mmu.read(io::IF) & INT_SERIAL != 0
}

fn clear_if(gb: &mut GameBoy) {
    gb.mmu.write(io::IF, 0x00);
}

#[test]
fn unconnected_port_receives_ff() {
    let mut gb = machine(&IDLE_ROM);
    clear_if(&mut gb);
    gb.mmu.write(io::SB, 0x5A);
    gb.mmu.write(io::SC, 0x81);
    gb.run_frame();
    assert_eq!(gb.mmu.read(io::SB), 0xFF);
    assert_eq!(gb.mmu.read(io::SC) & 0x80, 0);
    assert!(serial_irq(&gb));
    assert_eq!(gb.take_serial_output(), vec![0x5A]);
}

#[test]
fn loopback_port_returns_sent_byte() {
    let mut gb = machine(&IDLE_ROM);
    gb.connect_link_cable(Box::new(NullLinkPort::new(true)));
    gb.mmu.write(io::SB, 0x3C);
    gb.mmu.write(io::SC, 0x81);
    gb.run_frame();
    assert_eq!(gb.mmu.read(io::SB), 0x3C);
}

#[test]
fn transfer_takes_eight_divider_edges() {
    let mut gb = machine(&IDLE_ROM);
    gb.mmu.write(io::SB, 0x01);
    gb.mmu.write(io::SC, 0x81);
    // 8192 Hz shift clock: 512 cycles per bit
    let mut cycles = 0;
    while cycles < 3000 {
        cycles += gb.run_step();
    }
    assert_ne!(gb.mmu.read(io::SC) & 0x80, 0, "still shifting");
    while cycles < 4200 {
        cycles += gb.run_step();
    }
    assert_eq!(gb.mmu.read(io::SC) & 0x80, 0);
}

#[test]
fn linked_machines_exchange_bytes() {
    let (a, b) = LinkCable::pair();
    let mut master = machine(&IDLE_ROM);
    let mut slave = machine(&IDLE_ROM);
    master.connect_link_cable(Box::new(a));
    slave.connect_link_cable(Box::new(b));
    clear_if(&mut master);
    clear_if(&mut slave);

    slave.mmu.write(io::SB, 0x42);
    slave.mmu.write(io::SC, 0x80);
    master.mmu.write(io::SB, 0x17);
    master.mmu.write(io::SC, 0x81);

    for _ in 0..2 {
        master.run_frame();
        slave.run_frame();
    }

    assert_eq!(master.mmu.read(io::SB), 0x42);
    assert_eq!(slave.mmu.read(io::SB), 0x17);
    assert!(serial_irq(&master));
    assert!(serial_irq(&slave));
    assert_eq!(master.take_serial_output(), vec![0x17]);
    assert_eq!(slave.take_serial_output(), vec![0x42]);
}

#[test]
fn slave_waits_without_a_master() {
    let (_a, b) = LinkCable::pair();
    let mut slave = machine(&IDLE_ROM);
    slave.connect_link_cable(Box::new(b));
    clear_if(&mut slave);
    slave.mmu.write(io::SB, 0x99);
    slave.mmu.write(io::SC, 0x80);
    run_frames(&mut slave, 3);
    assert_ne!(slave.mmu.read(io::SC) & 0x80, 0);
    assert!(!serial_irq(&slave));
}

#[test]
fn program_output_is_collected() {
    let rom = RomBuilder::new()
        .program(&[
            0x3E, b'O', // LD A,'O'
            0xE0, 0x01, // LDH (SB),A
            0x3E, 0x81, // LD A,$81
            0xE0, 0x02, // LDH (SC),A
            0xF0, 0x02, // LDH A,(SC)
            0xCB, 0x7F, // BIT 7,A
            0x20, 0xFA, // JR NZ,-6
            0x3E, b'K', // LD A,'K'
            0xE0, 0x01, // LDH (SB),A
            0x3E, 0x81, // LD A,$81
            0xE0, 0x02, // LDH (SC),A
            0xF0, 0x02, // LDH A,(SC)
            0xCB, 0x7F, // BIT 7,A
            0x20, 0xFA, // JR NZ,-6
            0x18, 0xFE, // JR -2
        ])
        .build();
    let mut gb = machine(&rom);
    run_frames(&mut gb, 2);
    assert_eq!(gb.take_serial_output(), b"OK".to_vec());
    assert!(gb.take_serial_output().is_empty());
}

#[test]
fn reset_keeps_the_cable() {
    let (a, b) = LinkCable::pair();
    let mut master = machine(&IDLE_ROM);
    let mut slave = machine(&IDLE_ROM);
    master.connect_link_cable(Box::new(a));
    slave.connect_link_cable(Box::new(b));
    master.reset();
    slave.reset();

    slave.mmu.write(io::SB, 0x24);
    slave.mmu.write(io::SC, 0x80);
    master.mmu.write(io::SB, 0x81);
    master.mmu.write(io::SC, 0x81);
    master.run_frame();
    slave.run_frame();
    assert_eq!(master.mmu.read(io::SB), 0x24);
    assert_eq!(slave.mmu.read(io::SB), 0x81);
}
