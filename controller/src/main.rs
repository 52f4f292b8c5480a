//! Controller-side entry point: drives measurement cycles against a single
//! responder over a bit-banged I2C bus, at a configured cadence, until the
//! measurement budget is spent or a signal asks it to stop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bus::controller::Controller;
use bus::line::open_pair;
use bus::{GpioError, TransactionError};
use clap::Parser;

const CONSUMER: &str = "tofvirt-ctl";

#[derive(Parser, Debug)]
#[command(name = "tofvirt-ctl", about = "Drives a bit-banged I2C time-of-flight responder")]
struct Args {
    /// Path to the GPIO chardev, e.g. /dev/gpiochip0
    #[arg(long)]
    chip: PathBuf,

    /// Data line offset on the chip
    #[arg(long = "data-line")]
    data_line: u32,

    /// Clock line offset on the chip
    #[arg(long = "clock-line")]
    clock_line: u32,

    /// 7-bit responder address
    #[arg(long = "responder-address", default_value_t = 0x29)]
    responder_address: u8,

    /// Quarter-clock-phase duration in microseconds
    #[arg(long = "bit-period-us", default_value_t = 2000)]
    bit_period_us: u64,

    /// Measurement cycles per second
    #[arg(long = "measurement-frequency-hz", default_value_t = 5.0)]
    measurement_frequency_hz: f64,

    /// Total measurement cycles before exit
    #[arg(long = "max-measurements", default_value_t = 500)]
    max_measurements: u32,

    /// Delay between a register-pointer write and the following read, in
    /// microseconds. Defaults to bit-period-us / 20.
    #[arg(long = "write-to-read-gap-us")]
    write_to_read_gap_us: Option<u64>,

    /// Consecutive transaction failures before bus recovery is triggered
    #[arg(long = "max-consecutive-failures", default_value_t = 2)]
    max_consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct Stats {
    measurements_completed: u32,
    transaction_failures: u32,
    bus_recoveries: u32,
}

impl Stats {
    fn log_summary(&self) {
        log::info!(
            "measurements completed: {}, transaction failures: {}, bus recoveries: {}",
            self.measurements_completed,
            self.transaction_failures,
            self.bus_recoveries
        );
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("fatal: {e}");
            std::process::exit(1);
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum FatalError {
    #[error("gpio: {0}")]
    Gpio(#[from] GpioError),
}

fn run(args: Args) -> Result<(), FatalError> {
    let should_stop = Arc::new(AtomicBool::new(false));
    let stop_handle = should_stop.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        stop_handle.store(true, Ordering::Relaxed);
    })
    .expect("failed to install signal handler");

    let (data, clock) = open_pair(&args.chip, args.data_line, args.clock_line, CONSUMER)?;
    let mut controller = Controller::new(data, clock, args.bit_period_us)?;

    let gap = Duration::from_micros(args.write_to_read_gap_us.unwrap_or(args.bit_period_us / 20));
    let cycle_period = Duration::from_secs_f64(1.0 / args.measurement_frequency_hz.max(0.001));

    let mut stats = Stats::default();
    let mut consecutive_failures = 0u32;

    for cycle in 0..args.max_measurements {
        if should_stop.load(Ordering::Relaxed) {
            break;
        }
        let cycle_start = Instant::now();

        match run_measurement_cycle(&mut controller, args.responder_address, gap) {
            Ok(mm) => {
                log::info!("cycle {cycle}: distance = {mm} mm");
                stats.measurements_completed += 1;
                consecutive_failures = 0;
            }
            Err(e) => {
                log::warn!("cycle {cycle} failed: {e}");
                stats.transaction_failures += 1;
                consecutive_failures += 1;

                if consecutive_failures >= args.max_consecutive_failures {
                    log::warn!("{consecutive_failures} consecutive failures, running bus recovery");
                    controller.recover_bus()?;
                    stats.bus_recoveries += 1;
                    consecutive_failures = 0;
                }
            }
        }

        if cycle % 20 == 0 {
            stats.log_summary();
        }

        let elapsed = cycle_start.elapsed();
        if elapsed < cycle_period {
            std::thread::sleep(cycle_period - elapsed);
        }
    }

    stats.log_summary();
    Ok(())
}

/// Strobes a measurement, polls the data-ready latch, and reads back the
/// distance once it clears. Transaction errors are the caller's problem to
/// count and react to; this function only runs the wire-level steps of one
/// cycle.
fn run_measurement_cycle(
    controller: &mut Controller<bus::CdevLine, bus::CdevLine>,
    address: u8,
    gap: Duration,
) -> Result<u16, TransactionError> {
    controller.write(address, &[device::REG_START, 0x01])?;

    let mut status = [0u8; 1];
    let deadline = Instant::now() + device::CONVERSION_LATENCY * 4;
    loop {
        controller.write_register_then_read(address, device::REG_INT_STATUS, gap, &mut status)?;
        if status[0] == device::DATA_READY {
            break;
        }
        if Instant::now() >= deadline {
            return Err(TransactionError::NoResponse { address });
        }
        std::thread::sleep(device::CONVERSION_LATENCY / 8);
    }

    let mut distance = [0u8; 2];
    controller.write_register_then_read(address, device::REG_DISTANCE_HI, gap, &mut distance)?;
    Ok(u16::from_be_bytes(distance))
}
