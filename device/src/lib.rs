//! Emulates the model 0xEE / revision 0x10 time-of-flight device behind a
//! 256-byte register file: a passive data store, a register pointer, and a
//! simulated measurement timer. Knows nothing about GPIO or framing; it is
//! driven purely through [`bus::responder::RegisterDevice`].

use std::time::{Duration, Instant};

use bus::responder::RegisterDevice;
use rand::Rng;

pub const REG_START: u8 = 0x00;
pub const REG_INT_STATUS: u8 = 0x13;
pub const REG_RANGE_STATUS: u8 = 0x14;
pub const REG_DISTANCE_HI: u8 = 0x1E;
pub const REG_DISTANCE_LO: u8 = 0x1F;
pub const REG_MODEL_ID: u8 = 0xC0;
pub const REG_REVISION_ID: u8 = 0xC2;

pub const MODEL_ID: u8 = 0xEE;
pub const REVISION_ID: u8 = 0x10;

/// Value of 0x13 ("interrupt status") that signals a completed measurement.
pub const DATA_READY: u8 = 0x07;

pub const CONVERSION_LATENCY: Duration = Duration::from_millis(75);

const DISTANCE_MIN: i32 = 100;
const DISTANCE_MAX: i32 = 2000;
const DISTANCE_STEP: i32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeasurementState {
    Idle,
    InProgress,
    Complete,
}

pub struct Device {
    registers: [u8; 256],
    pointer: u8,
    state: MeasurementState,
    measurement_start: Option<Instant>,
    distance_mm: i32,
    rng: rand::rngs::ThreadRng,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let distance_mm = rng.gen_range(DISTANCE_MIN..=DISTANCE_MAX);
        let mut registers = [0u8; 256];
        registers[REG_MODEL_ID as usize] = MODEL_ID;
        registers[REG_REVISION_ID as usize] = REVISION_ID;
        write_distance(&mut registers, distance_mm);
        Device {
            registers,
            pointer: 0,
            state: MeasurementState::Idle,
            measurement_start: None,
            distance_mm,
            rng,
        }
    }

    /// Current 16-bit distance, for logging/stats; always in [100, 2000].
    pub fn distance_mm(&self) -> u16 {
        self.distance_mm as u16
    }

    pub fn is_measuring(&self) -> bool {
        self.state == MeasurementState::InProgress
    }

    fn walk_distance(&mut self) {
        let delta = self.rng.gen_range(-DISTANCE_STEP..=DISTANCE_STEP);
        self.distance_mm = (self.distance_mm + delta).clamp(DISTANCE_MIN, DISTANCE_MAX);
        write_distance(&mut self.registers, self.distance_mm);
    }
}

fn write_distance(registers: &mut [u8; 256], distance_mm: i32) {
    let d = distance_mm as u16;
    registers[REG_DISTANCE_HI as usize] = (d >> 8) as u8;
    registers[REG_DISTANCE_LO as usize] = (d & 0xff) as u8;
}

impl RegisterDevice for Device {
    fn pointer(&self) -> u8 {
        self.pointer
    }

    fn set_pointer(&mut self, pointer: u8) {
        self.pointer = pointer;
    }

    fn write_register(&mut self, index: u8, value: u8) {
        self.registers[index as usize] = value;
        if index == REG_START && value & 1 != 0 && self.state == MeasurementState::Idle {
            log::debug!("measurement start strobe observed");
            self.state = MeasurementState::InProgress;
            self.measurement_start = Some(Instant::now());
            self.registers[REG_INT_STATUS as usize] = 0x00;
        }
    }

    fn read_register(&mut self, index: u8) -> u8 {
        let value = self.registers[index as usize];
        if index == REG_INT_STATUS && value == DATA_READY {
            self.registers[REG_INT_STATUS as usize] = 0x00;
            self.state = MeasurementState::Idle;
            log::debug!("data-ready latch cleared on read");
        }
        value
    }

    fn tick(&mut self) {
        if self.state != MeasurementState::InProgress {
            return;
        }
        let Some(start) = self.measurement_start else { return };
        if start.elapsed() >= CONVERSION_LATENCY {
            self.walk_distance();
            self.registers[REG_INT_STATUS as usize] = DATA_READY;
            self.state = MeasurementState::Complete;
            log::info!("measurement complete, distance = {} mm", self.distance_mm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_registers_are_fixed() {
        let mut dev = Device::new();
        assert_eq!(dev.read_register(REG_MODEL_ID), MODEL_ID);
        assert_eq!(dev.read_register(REG_REVISION_ID), REVISION_ID);
    }

    #[test]
    fn scratch_register_persists_as_written() {
        let mut dev = Device::new();
        dev.write_register(0x42, 0xa5);
        assert_eq!(dev.read_register(0x42), 0xa5);
    }

    #[test]
    fn range_status_stays_valid() {
        let mut dev = Device::new();
        assert_eq!(dev.read_register(REG_RANGE_STATUS), 0x00);
    }

    #[test]
    fn distance_starts_in_bounds() {
        let dev = Device::new();
        let d = dev.distance_mm();
        assert!((100..=2000).contains(&d));
    }

    #[test]
    fn measurement_cycle_latches_and_self_clears() {
        let mut dev = Device::new();
        dev.write_register(REG_START, 0x01);
        assert!(dev.is_measuring());
        assert_eq!(dev.read_register(REG_INT_STATUS), 0x00);

        // conversion latency has not elapsed yet
        dev.tick();
        assert_eq!(dev.read_register(REG_INT_STATUS), 0x00);

        std::thread::sleep(CONVERSION_LATENCY + Duration::from_millis(5));
        dev.tick();
        assert!(!dev.is_measuring());
        assert_eq!(dev.read_register(REG_INT_STATUS), DATA_READY);

        // self-clears on read
        assert_eq!(dev.read_register(REG_INT_STATUS), 0x00);
        assert_eq!(dev.read_register(REG_INT_STATUS), 0x00);

        let hi = dev.read_register(REG_DISTANCE_HI) as u16;
        let lo = dev.read_register(REG_DISTANCE_LO) as u16;
        let distance = (hi << 8) | lo;
        assert!((100..=2000).contains(&distance));
    }

    #[test]
    fn start_strobe_is_edge_triggered_not_latched() {
        let mut dev = Device::new();
        dev.write_register(REG_START, 0x01);
        assert!(dev.is_measuring());
        // writing 0x01 again while already in progress must not restart the timer
        dev.write_register(REG_START, 0x01);
        assert!(dev.is_measuring());
    }

    #[test]
    fn pointer_auto_increments_across_writes() {
        let mut dev = Device::new();
        dev.set_pointer(0x10);
        for v in [0x01u8, 0x02, 0x03] {
            let ptr = dev.pointer();
            dev.write_register(ptr, v);
            dev.set_pointer(ptr.wrapping_add(1));
        }
        assert_eq!(dev.pointer(), 0x13);
        assert_eq!(dev.read_register(0x10), 0x01);
        assert_eq!(dev.read_register(0x11), 0x02);
        assert_eq!(dev.read_register(0x12), 0x03);
    }

    #[test]
    fn pointer_wraps_at_256() {
        let mut dev = Device::new();
        dev.set_pointer(0xff);
        let ptr = dev.pointer();
        dev.write_register(ptr, 0x7a);
        dev.set_pointer(ptr.wrapping_add(1));
        assert_eq!(dev.pointer(), 0x00);
    }
}
