//! Polled responder entry point: emulates the time-of-flight device's
//! register file and answers transactions addressed to it, busy-polling the
//! bus between edges. See `tofvirt-dev-irq` for the event-driven variant of
//! the same engine.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bus::line::open_pair;
use bus::responder::{Responder, ResponderConfig, TransactionOutcome};
use bus::GpioError;
use clap::Parser;
use device::Device;

const CONSUMER: &str = "tofvirt-dev";

#[derive(Parser, Debug)]
#[command(name = "tofvirt-dev", about = "Emulates a time-of-flight device over bit-banged I2C")]
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

    let (data, clock) = open_pair(&args.chip, args.data_line, args.clock_line, CONSUMER)?;
    let cfg = ResponderConfig::new(args.responder_address, args.bit_period_us, bus::DEFAULT_EDGE_TIMEOUT_PERIODS);
    let mut responder = Responder::new(data, clock, cfg, Device::new())?;

    let extended_pause = Duration::from_micros(args.bit_period_us * 10);
    let mut stats = Stats::default();
    let mut consecutive_failures = 0u32;
    let mut cycles = 0u64;

    loop {
        match responder.poll_once(&should_stop) {
            Ok(None) => break,
            Ok(Some(TransactionOutcome::Completed)) => {
                stats.transactions_completed += 1;
                consecutive_failures = 0;
            }
            Ok(Some(TransactionOutcome::WrongAddress)) => {
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

        cycles += 1;
        if cycles % 200 == 0 {
            stats.log_summary();
        }
    }

    stats.log_summary();
    Ok(())
}
