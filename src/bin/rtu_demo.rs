//! Modbus RTU demo: a master and a slave wired over an in-memory bus.
//!
//! Runs a handful of exchanges without any serial hardware: read holding
//! registers, write a coil, write multiple registers, and a broadcast.
//! Run with `RUST_LOG=debug` to see the frame traffic.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use voltage_rtu::utils::format::registers_to_hex;
use voltage_rtu::{
    Clock, MasterEvent, ModbusFunction, ModbusQuery, ModbusRtuMaster, ModbusRtuSlave,
    RegisterBanks, SlaveEvent, Transport,
};

/// Two byte queues standing in for the serial line.
#[derive(Default)]
struct Wire {
    master_to_slave: VecDeque<u8>,
    slave_to_master: VecDeque<u8>,
}

struct MasterPort(Rc<RefCell<Wire>>);
struct SlavePort(Rc<RefCell<Wire>>);

impl Transport for MasterPort {
    fn available(&self) -> usize {
        self.0.borrow().slave_to_master.len()
    }

    fn read(&mut self) -> Option<u8> {
        self.0.borrow_mut().slave_to_master.pop_front()
    }

    fn write_all(&mut self, bytes: &[u8]) {
        self.0.borrow_mut().master_to_slave.extend(bytes);
    }

    fn flush(&mut self) {}
}

impl Transport for SlavePort {
    fn available(&self) -> usize {
        self.0.borrow().master_to_slave.len()
    }

    fn read(&mut self) -> Option<u8> {
        self.0.borrow_mut().master_to_slave.pop_front()
    }

    fn write_all(&mut self, bytes: &[u8]) {
        self.0.borrow_mut().slave_to_master.extend(bytes);
    }

    fn flush(&mut self) {}
}

/// Manually stepped clock shared by both ends.
#[derive(Clone, Default)]
struct BusClock(Rc<RefCell<u32>>);

impl BusClock {
    fn tick(&self, ms: u32) {
        *self.0.borrow_mut() += ms;
    }
}

impl Clock for BusClock {
    fn now_ms(&self) -> u32 {
        *self.0.borrow()
    }
}

fn main() {
    env_logger::init();
    println!("{}", voltage_rtu::info());

    let wire = Rc::new(RefCell::new(Wire::default()));
    let clock = BusClock::default();

    let mut master = ModbusRtuMaster::new(MasterPort(wire.clone()), clock.clone());
    let mut slave = ModbusRtuSlave::new(0x11, SlavePort(wire), clock.clone()).unwrap();
    master.start();
    slave.start();

    let mut coils = [false; 256];
    let discrete_inputs = [false; 128];
    let input_registers = [0u16; 64];
    let mut holding_registers = [0u16; 512];
    holding_registers[0x6B] = 0xAE41;
    holding_registers[0x6C] = 0x5652;
    holding_registers[0x6D] = 0x4340;

    let queries = [
        (
            "read 3 holding registers @ 0x6B",
            ModbusQuery {
                slave_id: 0x11,
                function: ModbusFunction::ReadHoldingRegisters,
                address: 0x006B,
                quantity: 3,
            },
            [0u16; 4],
        ),
        (
            "switch coil 0xAC on",
            ModbusQuery {
                slave_id: 0x11,
                function: ModbusFunction::WriteSingleCoil,
                address: 0x00AC,
                quantity: 1,
            },
            [1, 0, 0, 0],
        ),
        (
            "write registers @ 0x012C",
            ModbusQuery {
                slave_id: 0x11,
                function: ModbusFunction::WriteMultipleRegisters,
                address: 0x012C,
                quantity: 2,
            },
            [0x000A, 0x0102, 0, 0],
        ),
    ];

    for (label, query, mut image) in queries {
        master.query(&query, &mut image).expect("query refused");

        // pump both ends until the exchange settles
        let event = loop {
            let mut banks = RegisterBanks::new(
                &mut coils,
                &discrete_inputs,
                &input_registers,
                &mut holding_registers,
            );
            if let SlaveEvent::Replied(n) = slave.poll(&mut banks).expect("slave fault") {
                log::info!("slave answered with {} bytes", n);
            }
            match master.poll(&mut image).expect("master fault") {
                MasterEvent::Waiting => clock.tick(1),
                event => break event,
            }
        };

        println!(
            "{:<35} -> {:?}, image: {}",
            label,
            event,
            registers_to_hex(&image)
        );
    }

    println!("coil 0xAC is {}", if coils[0xAC] { "ON" } else { "OFF" });
    println!(
        "holding[0x12C..0x12E] = {}",
        registers_to_hex(&holding_registers[0x12C..0x12E])
    );

    // broadcast: every slave acts, none replies, the master does not wait
    let mut image = [0x1234u16];
    master
        .query(
            &ModbusQuery {
                slave_id: voltage_rtu::BROADCAST,
                function: ModbusFunction::WriteSingleRegister,
                address: 0x0000,
                quantity: 1,
            },
            &mut image,
        )
        .expect("broadcast refused");
    for _ in 0..3 {
        let mut banks = RegisterBanks::new(
            &mut coils,
            &discrete_inputs,
            &input_registers,
            &mut holding_registers,
        );
        let _ = slave.poll(&mut banks).expect("slave fault");
        clock.tick(3);
    }
    println!(
        "after broadcast, holding[0] = {:04X} (no reply on the wire)",
        holding_registers[0]
    );

    let stats = master.stats();
    println!(
        "master counters: out={} in={} err={}",
        stats.frames_out, stats.frames_in, stats.errors
    );
}
