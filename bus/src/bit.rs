//! Bit-level primitives. The controller side drives the clock and owns all
//! timing; the responder side only ever observes the clock it's given and
//! times its own waits against a bounded number of bit periods.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::error::{GpioError, ResponderError, TimingFault};
use crate::line::{GpioLine, Level};

#[derive(Clone, Copy)]
pub struct BitConfig {
    pub quarter_period: Duration,
}

impl BitConfig {
    pub fn from_bit_period_us(bit_period_us: u64) -> Self {
        BitConfig { quarter_period: Duration::from_micros(bit_period_us) }
    }
}

pub mod controller {
    use super::*;

    /// Emits one bit. Precondition: clock already asserted low.
    pub fn emit_bit<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        cfg: &BitConfig,
        value: bool,
    ) -> Result<(), GpioError> {
        if value { data.release()? } else { data.drive_low()? }
        sleep(cfg.quarter_period);
        clock.release()?;
        sleep(cfg.quarter_period * 2);
        clock.drive_low()?;
        sleep(cfg.quarter_period);
        Ok(())
    }

    /// Samples one bit, as close to the middle of the clock-high phase as
    /// this implementation permits. Precondition: clock already asserted low.
    pub fn sample_bit<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        cfg: &BitConfig,
    ) -> Result<bool, GpioError> {
        data.release()?;
        sleep(cfg.quarter_period);
        clock.release()?;
        sleep(cfg.quarter_period);
        let level = data.read_level()?;
        sleep(cfg.quarter_period);
        clock.drive_low()?;
        sleep(cfg.quarter_period);
        Ok(level == Level::High)
    }

    /// Precondition: clock and data both released (bus idle, or just past a
    /// prior ack/nack slot for a repeated start).
    pub fn start<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        cfg: &BitConfig,
    ) -> Result<(), GpioError> {
        data.drive_low()?;
        sleep(cfg.quarter_period);
        clock.drive_low()?;
        Ok(())
    }

    /// Precondition: clock low, data low.
    pub fn stop<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        cfg: &BitConfig,
    ) -> Result<(), GpioError> {
        clock.release()?;
        sleep(cfg.quarter_period);
        data.release()?;
        Ok(())
    }
}

pub mod responder {
    use super::*;

    fn wait_level<C: GpioLine>(
        clock: &mut C,
        want: Level,
        poll: Duration,
        timeout: Duration,
        fault: TimingFault,
    ) -> Result<(), ResponderError> {
        let deadline = Instant::now() + timeout;
        loop {
            if clock.read_level()? == want {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ResponderError::Timing(fault));
            }
            sleep(poll);
        }
    }

    /// Confirms an idle bus (both lines released), then returns once a
    /// high-to-low data transition is observed while the clock is high.
    /// Returns `Ok(false)` if `should_stop` is observed first.
    pub fn wait_for_start<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        poll: Duration,
        should_stop: &AtomicBool,
    ) -> Result<bool, ResponderError> {
        loop {
            if should_stop.load(Ordering::Relaxed) {
                return Ok(false);
            }
            if clock.read_level()? == Level::High && data.read_level()? == Level::High {
                break;
            }
            sleep(poll);
        }
        let mut prev_data = Level::High;
        loop {
            if should_stop.load(Ordering::Relaxed) {
                return Ok(false);
            }
            let d = data.read_level()?;
            let c = clock.read_level()?;
            if c == Level::High && prev_data == Level::High && d == Level::Low {
                return Ok(true);
            }
            prev_data = d;
            sleep(poll);
        }
    }

    /// Waits for the clock to fall, waits for it to rise, reads data, waits
    /// for it to fall again. Used for bytes where a STOP cannot legally
    /// occur (address, register pointer).
    ///
    /// Releases data first: the caller may be sampling right after driving
    /// its own ack bit (e.g. the byte after `AddrAck`/`RegAck`), and that
    /// drive must be let go before the controller's next bit can be read.
    pub fn sample_bit_on_clock<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        poll: Duration,
        timeout: Duration,
    ) -> Result<bool, ResponderError> {
        data.release()?;
        wait_level(clock, Level::High, poll, timeout, TimingFault::ClockRiseTimeout)?;
        let v = data.read_level()?;
        wait_level(clock, Level::Low, poll, timeout, TimingFault::ClockFallTimeout)?;
        Ok(v == Level::High)
    }

    /// Outcome of sampling a bit during DATA_IN, where the controller may
    /// instead choose to terminate the transaction with a STOP.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum BitOrStop {
        Bit(bool),
        Stop,
    }

    /// Same as `sample_bit_on_clock`, but also recognizes a STOP condition:
    /// a low-to-high data transition observed while the clock stays high.
    /// A STOP can only be distinguished from an ordinary '1' bit when the
    /// line was sampled low on the rising edge and is later released while
    /// the clock is still high.
    ///
    /// Releases data first, for the same reason as `sample_bit_on_clock`:
    /// this is called right after driving the previous byte's ack.
    pub fn sample_bit_on_clock_or_stop<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        poll: Duration,
        timeout: Duration,
    ) -> Result<BitOrStop, ResponderError> {
        data.release()?;
        wait_level(clock, Level::High, poll, timeout, TimingFault::ClockRiseTimeout)?;
        let initial = data.read_level()?;
        let deadline = Instant::now() + timeout;
        loop {
            if clock.read_level()? == Level::Low {
                return Ok(BitOrStop::Bit(initial == Level::High));
            }
            if initial == Level::Low && data.read_level()? == Level::High {
                return Ok(BitOrStop::Stop);
            }
            if Instant::now() >= deadline {
                return Err(ResponderError::Timing(TimingFault::ClockFallTimeout));
            }
            sleep(poll);
        }
    }

    /// Waits for the clock to fall, sets data, waits for it to rise (data
    /// must be stable across this edge), waits for it to fall again.
    pub fn emit_bit_on_clock<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        poll: Duration,
        timeout: Duration,
        value: bool,
    ) -> Result<(), ResponderError> {
        wait_level(clock, Level::Low, poll, timeout, TimingFault::ClockFallTimeout)?;
        if value { data.release()? } else { data.drive_low()? }
        wait_level(clock, Level::High, poll, timeout, TimingFault::ClockRiseTimeout)?;
        wait_level(clock, Level::Low, poll, timeout, TimingFault::ClockFallTimeout)?;
        Ok(())
    }
}
