//! Composes bit primitives into 8-bit transfers plus a single
//! acknowledgement bit.

use std::time::Duration;

use crate::bit::{self, BitConfig};
use crate::error::{GpioError, ResponderError};
use crate::line::GpioLine;

/// Emits `byte` most-significant-bit first, then releases data and samples
/// the acknowledgement bit. Returns `true` if acked (sampled low).
pub fn transmit_byte<D: GpioLine, C: GpioLine>(
    data: &mut D,
    clock: &mut C,
    cfg: &BitConfig,
    byte: u8,
) -> Result<bool, GpioError> {
    for i in (0..8).rev() {
        let bit = (byte >> i) & 1 != 0;
        bit::controller::emit_bit(data, clock, cfg, bit)?;
    }
    let nack = bit::controller::sample_bit(data, clock, cfg)?;
    Ok(!nack)
}

/// Samples 8 bits most-significant-bit first, then drives the ack/nack bit.
pub fn receive_byte<D: GpioLine, C: GpioLine>(
    data: &mut D,
    clock: &mut C,
    cfg: &BitConfig,
    ack: bool,
) -> Result<u8, GpioError> {
    let mut byte = 0u8;
    for _ in 0..8 {
        let bit = bit::controller::sample_bit(data, clock, cfg)?;
        byte = (byte << 1) | bit as u8;
    }
    bit::controller::emit_bit(data, clock, cfg, !ack)?;
    Ok(byte)
}

pub mod responder {
    use super::*;
    use crate::bit::responder::BitOrStop;

    pub fn receive_byte<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        poll: Duration,
        timeout: Duration,
    ) -> Result<u8, ResponderError> {
        let mut byte = 0u8;
        for _ in 0..8 {
            let bit = bit::responder::sample_bit_on_clock(data, clock, poll, timeout)?;
            byte = (byte << 1) | bit as u8;
        }
        Ok(byte)
    }

    /// Outcome of receiving a byte during DATA_IN.
    pub enum ByteOrStop {
        Byte(u8),
        Stop,
    }

    pub fn receive_byte_or_stop<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        poll: Duration,
        timeout: Duration,
    ) -> Result<ByteOrStop, ResponderError> {
        let mut byte = 0u8;
        for _ in 0..8 {
            match bit::responder::sample_bit_on_clock_or_stop(data, clock, poll, timeout)? {
                BitOrStop::Bit(b) => byte = (byte << 1) | b as u8,
                BitOrStop::Stop => return Ok(ByteOrStop::Stop),
            }
        }
        Ok(ByteOrStop::Byte(byte))
    }

    pub fn ack<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        poll: Duration,
        timeout: Duration,
        ack: bool,
    ) -> Result<(), ResponderError> {
        bit::responder::emit_bit_on_clock(data, clock, poll, timeout, !ack)
    }

    /// Transmits `byte` most-significant-bit first, then samples the
    /// controller's ack/nack. Returns `true` if the controller acked.
    pub fn transmit_byte<D: GpioLine, C: GpioLine>(
        data: &mut D,
        clock: &mut C,
        poll: Duration,
        timeout: Duration,
        byte: u8,
    ) -> Result<bool, ResponderError> {
        for i in (0..8).rev() {
            let bit = (byte >> i) & 1 != 0;
            bit::responder::emit_bit_on_clock(data, clock, poll, timeout, bit)?;
        }
        let nack = bit::responder::sample_bit_on_clock(data, clock, poll, timeout)?;
        Ok(!nack)
    }
}
