//! End-to-end controller/responder transactions over the in-memory mock
//! wire, with a real `device::Device` behind the responder. These are the
//! closest thing this crate has to hardware-in-the-loop tests: no GPIO
//! chardev is touched, but every bit crosses the same framing code a real
//! transfer would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bus::controller::Controller;
use bus::line::{mock_wire_pair, MockLine};
use bus::responder::{Responder, ResponderConfig};
use device::Device;

const ADDRESS: u8 = 0x29;
const BIT_PERIOD_US: u64 = 150;
const EDGE_TIMEOUT_PERIODS: u32 = 40;

/// Spawns a responder driving a fresh `Device` on its own thread, and
/// returns the controller-side line ends plus a handle to stop it.
fn spawn_responder(address: u8) -> (MockLine, MockLine, Arc<AtomicBool>, JoinHandle<()>) {
    let (ctrl_data, resp_data) = mock_wire_pair();
    let (ctrl_clock, resp_clock) = mock_wire_pair();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_handle = stop.clone();

    let join = thread::spawn(move || {
        let cfg = ResponderConfig::new(address, BIT_PERIOD_US, EDGE_TIMEOUT_PERIODS);
        let mut responder =
            Responder::new(resp_data, resp_clock, cfg, Device::new()).expect("responder setup");
        loop {
            if stop_handle.load(Ordering::Relaxed) {
                break;
            }
            // A timing fault just counts as a soft error and the loop goes
            // back to waiting for the next START; nothing to assert here.
            let _ = responder.poll_once(&stop_handle);
        }
    });

    (ctrl_data, ctrl_clock, stop, join)
}

fn finish(stop: Arc<AtomicBool>, join: JoinHandle<()>) {
    stop.store(true, Ordering::Relaxed);
    join.join().expect("responder thread panicked");
}

#[test]
fn identification_registers_read_back_correctly() {
    let (data, clock, stop, join) = spawn_responder(ADDRESS);
    let mut controller = Controller::new(data, clock, BIT_PERIOD_US).expect("controller setup");
    let gap = Duration::from_micros(BIT_PERIOD_US * 2);

    let mut model = [0u8; 1];
    controller
        .write_register_then_read(ADDRESS, device::REG_MODEL_ID, gap, &mut model)
        .expect("read model id");
    assert_eq!(model[0], device::MODEL_ID);

    let mut revision = [0u8; 1];
    controller
        .write_register_then_read(ADDRESS, device::REG_REVISION_ID, gap, &mut revision)
        .expect("read revision id");
    assert_eq!(revision[0], device::REVISION_ID);

    finish(stop, join);
}

#[test]
fn scratch_register_round_trips() {
    let (data, clock, stop, join) = spawn_responder(ADDRESS);
    let mut controller = Controller::new(data, clock, BIT_PERIOD_US).expect("controller setup");

    controller.write(ADDRESS, &[0x40, 0xa5]).expect("write scratch register");

    let mut readback = [0u8; 1];
    controller
        .write_register_then_read(ADDRESS, 0x40, Duration::from_micros(BIT_PERIOD_US * 2), &mut readback)
        .expect("read scratch register");
    assert_eq!(readback[0], 0xa5);

    finish(stop, join);
}

#[test]
fn multi_byte_read_auto_increments_the_pointer() {
    let (data, clock, stop, join) = spawn_responder(ADDRESS);
    let mut controller = Controller::new(data, clock, BIT_PERIOD_US).expect("controller setup");

    controller
        .write(ADDRESS, &[0x50, 0x11, 0x22, 0x33])
        .expect("seed three scratch registers");

    let mut readback = [0u8; 3];
    controller
        .write_register_then_read(ADDRESS, 0x50, Duration::from_micros(BIT_PERIOD_US * 2), &mut readback)
        .expect("burst read");
    assert_eq!(readback, [0x11, 0x22, 0x33]);

    finish(stop, join);
}

#[test]
fn transaction_to_a_different_address_is_ignored() {
    let (data, clock, stop, join) = spawn_responder(ADDRESS);
    let mut controller = Controller::new(data, clock, BIT_PERIOD_US).expect("controller setup");

    let err = controller
        .write(ADDRESS ^ 0x01, &[0x00, 0x01])
        .expect_err("no device should answer this address");
    assert!(matches!(err, bus::TransactionError::NoResponse { .. }));

    // the responder must still be healthy for its own address afterwards
    let mut model = [0u8; 1];
    controller
        .write_register_then_read(ADDRESS, device::REG_MODEL_ID, Duration::from_micros(BIT_PERIOD_US * 2), &mut model)
        .expect("still answers its own address");
    assert_eq!(model[0], device::MODEL_ID);

    finish(stop, join);
}

#[test]
fn full_measurement_cycle_is_observable_over_the_bus() {
    let (data, clock, stop, join) = spawn_responder(ADDRESS);
    let mut controller = Controller::new(data, clock, BIT_PERIOD_US).expect("controller setup");
    let gap = Duration::from_micros(BIT_PERIOD_US * 2);

    controller.write(ADDRESS, &[device::REG_START, 0x01]).expect("start strobe");

    let mut status = [0u8; 1];
    controller
        .write_register_then_read(ADDRESS, device::REG_INT_STATUS, gap, &mut status)
        .expect("poll status before conversion finishes");
    assert_eq!(status[0], 0x00);

    thread::sleep(device::CONVERSION_LATENCY + Duration::from_millis(20));

    controller
        .write_register_then_read(ADDRESS, device::REG_INT_STATUS, gap, &mut status)
        .expect("poll status after conversion finishes");
    assert_eq!(status[0], device::DATA_READY);

    // the read above must have self-cleared the latch
    controller
        .write_register_then_read(ADDRESS, device::REG_INT_STATUS, gap, &mut status)
        .expect("poll status again");
    assert_eq!(status[0], 0x00);

    let mut distance = [0u8; 2];
    controller
        .write_register_then_read(ADDRESS, device::REG_DISTANCE_HI, gap, &mut distance)
        .expect("read distance pair");
    let mm = u16::from_be_bytes(distance);
    assert!((100..=2000).contains(&mm));

    finish(stop, join);
}

#[test]
fn recovers_after_an_abandoned_transaction() {
    let (mut data, mut clock, stop, join) = spawn_responder(ADDRESS);
    let cfg = bus::bit::BitConfig::from_bit_period_us(BIT_PERIOD_US);

    // Hand-drive a START and an address byte, then walk away: release both
    // lines without sending the register byte the responder is waiting
    // for, so its edge wait has to time out on its own.
    bus::bit::controller::start(&mut data, &mut clock, &cfg).expect("start");
    let acked = bus::byte::transmit_byte(&mut data, &mut clock, &cfg, (ADDRESS << 1) | 0).expect("address byte");
    assert!(acked);
    data.release().expect("release data");
    clock.release().expect("release clock");

    let edge_timeout = cfg.quarter_period * EDGE_TIMEOUT_PERIODS;
    thread::sleep(edge_timeout + Duration::from_millis(20));

    // A fresh, well-formed transaction on the now-idle bus must still work.
    let mut controller = Controller::new(data, clock, BIT_PERIOD_US).expect("controller setup");
    let mut model = [0u8; 1];
    controller
        .write_register_then_read(ADDRESS, device::REG_MODEL_ID, Duration::from_micros(BIT_PERIOD_US * 2), &mut model)
        .expect("recovered transaction");
    assert_eq!(model[0], device::MODEL_ID);

    finish(stop, join);
}

#[test]
fn bus_recovery_leaves_the_responder_ready_for_a_fresh_start() {
    const MAX_CONSECUTIVE_FAILURES: u32 = 2;

    let (data, clock, stop, join) = spawn_responder(ADDRESS);
    let mut controller = Controller::new(data, clock, BIT_PERIOD_US).expect("controller setup");

    // Drive the configured threshold worth of failed transactions against
    // an address nothing answers, exactly as the controller binary's own
    // workflow loop does before it decides to recover the bus.
    let mut consecutive_failures = 0u32;
    for _ in 0..MAX_CONSECUTIVE_FAILURES {
        let err = controller
            .write(ADDRESS ^ 0x01, &[0x00])
            .expect_err("no device should answer this address");
        assert!(matches!(err, bus::TransactionError::NoResponse { .. }));
        consecutive_failures += 1;
    }
    assert_eq!(consecutive_failures, MAX_CONSECUTIVE_FAILURES);

    controller.recover_bus().expect("bus recovery");

    // The responder must accept a fresh START well within the two
    // bit-period bound of testable property 9, with no extra settling
    // beyond the recovery sequence itself.
    let mut model = [0u8; 1];
    controller
        .write_register_then_read(ADDRESS, device::REG_MODEL_ID, Duration::from_micros(BIT_PERIOD_US * 2), &mut model)
        .expect("transaction after recovery");
    assert_eq!(model[0], device::MODEL_ID);

    finish(stop, join);
}
