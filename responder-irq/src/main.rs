//! Event-driven reference responder. Behaviourally identical to
//! `tofvirt-dev` -- same device emulation, same frame state machine -- but
//! sleeps on the kernel's GPIO edge-event queue between transactions
//! instead of busy-polling the data line.
//!
//! The Linux chardev ABI this crate targets only allows one open request
//! per line, so the data line has to be released and re-requested on each
//! trip through the loop: once as a throwaway event source while idle,
//! once as a plain input for the transaction that follows. A real falling
//! edge on an otherwise-idle bus can only be the start of a START
//! condition, so on wake this engine commits straight to receiving an
//! address byte rather than re-confirming the idle-then-transition
//! pattern `wait_for_start` looks for -- that re-check is what a busy
//! poller needs to avoid mistaking mid-transaction activity for a fresh
//! START, but it is also what the gap between "edge observed" and "plain
//! handle re-requested" would make unreliable.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bus::line::{wait_for_falling_edge, CdevLine};
use bus::responder::{Responder, ResponderConfig, TransactionOutcome};
use bus::GpioError;
use clap::Parser;
use device::Device;
use gpio_cdev::Chip;

const CONSUMER: &str = "tofvirt-dev-irq";

#[derive(Parser, Debug)]
#[command(name = "tofvirt-dev-irq", about = "Event-driven reference responder for the time-of-flight emulation")]
struct Args {
    #[arg(long)]
    chip: PathBuf,

    #[arg(long = "data-line")]
    data_line: u32,

    #[arg(long = "clock-line")]
    clock_line: u32,

    #[arg(long = "responder-address", default_value_t = 0x29)]
    responder_address: u8,

    #[arg(long = "bit-period-us", default_value_t = 2000)]
    bit_period_us: u64,

    #[arg(long = "max-consecutive-failures", default_value_t = 2)]
    max_consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct Stats {
    transactions_completed: u32,
    wrong_address: u32,
    soft_errors: u32,
    idle_pauses: u32,
}

impl Stats {
    fn log_summary(&self) {
        log::info!(
            "transactions completed: {}, wrong-address: {}, soft errors: {}, idle pauses: {}",
            self.transactions_completed,
            self.wrong_address,
            self.soft_errors,
            self.idle_pauses
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

fn run(args: Args) -> Result<(), GpioError> {
    let should_stop = Arc::new(AtomicBool::new(false));
    let stop_handle = should_stop.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        stop_handle.store(true, Ordering::Relaxed);
    })
    .expect("failed to install signal handler");

    let mut chip = Chip::new(&args.chip)
        .map_err(|source| GpioError::ChipOpen { path: args.chip.display().to_string(), source })?;
    let cfg = ResponderConfig::new(args.responder_address, args.bit_period_us, bus::DEFAULT_EDGE_TIMEOUT_PERIODS);
    let extended_pause = Duration::from_micros(args.bit_period_us * 10);

    let mut device = Device::new();
    let mut stats = Stats::default();
    let mut consecutive_failures = 0u32;
    let mut cycles = 0u64;

    loop {
        if !wait_for_falling_edge(&mut chip, args.data_line, CONSUMER, &should_stop)? {
            break;
        }

        let data = CdevLine::new(&mut chip, args.data_line, CONSUMER)?;
        let clock = CdevLine::new(&mut chip, args.clock_line, CONSUMER)?;
        let mut responder = Responder::new(data, clock, cfg, device)?;
        responder.prepare_for_start();

        match responder.handle_started_transaction() {
            Ok(TransactionOutcome::Completed) => {
                stats.transactions_completed += 1;
                consecutive_failures = 0;
            }
            Ok(TransactionOutcome::WrongAddress) => {
                stats.wrong_address += 1;
                consecutive_failures = 0;
            }
            Err(e) => {
                log::warn!("transaction aborted: {e}");
                stats.soft_errors += 1;
                consecutive_failures += 1;

                if consecutive_failures >= args.max_consecutive_failures {
                    log::warn!("{consecutive_failures} consecutive soft errors, pausing before resuming");
                    std::thread::sleep(extended_pause);
                    responder.reset_soft_errors();
                    stats.idle_pauses += 1;
                    consecutive_failures = 0;
                }
            }
        }
        device = responder.into_device();

        cycles += 1;
        if cycles % 200 == 0 {
            stats.log_summary();
        }
    }

    stats.log_summary();
    Ok(())
}
