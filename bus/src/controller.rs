//! Controller Engine: framed write and read transfers plus bus recovery.

use std::thread::sleep;
use std::time::Duration;

use crate::bit::{self, BitConfig};
use crate::byte;
use crate::error::{GpioError, TransactionError};
use crate::line::GpioLine;

pub struct Controller<D, C> {
    data: D,
    clock: C,
    cfg: BitConfig,
}

impl<D: GpioLine, C: GpioLine> Controller<D, C> {
    pub fn new(mut data: D, mut clock: C, bit_period_us: u64) -> Result<Self, GpioError> {
        data.release()?;
        clock.release()?;
        Ok(Controller { data, clock, cfg: BitConfig::from_bit_period_us(bit_period_us) })
    }

    /// START, address byte with the write bit, each byte in `bytes`, STOP.
    pub fn write(&mut self, target: u8, bytes: &[u8]) -> Result<(), TransactionError> {
        bit::controller::start(&mut self.data, &mut self.clock, &self.cfg)?;
        let acked = byte::transmit_byte(&mut self.data, &mut self.clock, &self.cfg, (target << 1) | 0)?;
        if !acked {
            self.stop()?;
            return Err(TransactionError::NoResponse { address: target });
        }
        for (i, &b) in bytes.iter().enumerate() {
            let acked = byte::transmit_byte(&mut self.data, &mut self.clock, &self.cfg, b)?;
            if !acked {
                self.stop()?;
                return Err(TransactionError::NackAt { at: i });
            }
        }
        self.stop()?;
        Ok(())
    }

    /// START, address byte with the read bit, `buf.len()` bytes (ack all
    /// but the last, nack the last), STOP.
    pub fn read(&mut self, target: u8, buf: &mut [u8]) -> Result<(), TransactionError> {
        bit::controller::start(&mut self.data, &mut self.clock, &self.cfg)?;
        let acked = byte::transmit_byte(&mut self.data, &mut self.clock, &self.cfg, (target << 1) | 1)?;
        if !acked {
            self.stop()?;
            return Err(TransactionError::NoResponse { address: target });
        }
        let n = buf.len();
        for (i, slot) in buf.iter_mut().enumerate() {
            let ack_this = i + 1 < n;
            *slot = byte::receive_byte(&mut self.data, &mut self.clock, &self.cfg, ack_this)?;
        }
        self.stop()?;
        Ok(())
    }

    /// Writes a single register-pointer byte, waits `gap`, then reads.
    /// Issues a fresh START for the read rather than a repeated START; the
    /// responder tolerates either pattern.
    pub fn write_register_then_read(
        &mut self,
        target: u8,
        register: u8,
        gap: Duration,
        buf: &mut [u8],
    ) -> Result<(), TransactionError> {
        self.write(target, &[register])?;
        sleep(gap);
        self.read(target, buf)
    }

    /// Brings the data line low and releases it through the clock, forming
    /// a STOP from whatever the last byte's ack/nack sampling left behind.
    fn stop(&mut self) -> Result<(), GpioError> {
        self.data.drive_low()?;
        sleep(self.cfg.quarter_period);
        bit::controller::stop(&mut self.data, &mut self.clock, &self.cfg)
    }

    /// Releases both lines, pulses the clock low-high up to 9 times with
    /// data released, then emits a STOP to leave the bus idle.
    pub fn recover_bus(&mut self) -> Result<(), GpioError> {
        self.data.release()?;
        self.clock.release()?;
        for _ in 0..9 {
            self.clock.drive_low()?;
            sleep(self.cfg.quarter_period);
            self.clock.release()?;
            sleep(self.cfg.quarter_period);
        }
        // `stop()` requires the clock already low before it drives data low
        // (its own precondition, and `bit::controller::stop`'s); the pulse
        // loop above leaves the clock released, so bring it back down first.
        self.clock.drive_low()?;
        sleep(self.cfg.quarter_period);
        self.stop()
    }
}
