//! Responder Engine: the frame state machine described in the device's
//! protocol table. The states below exist mainly as a tracing aid (see
//! `state()` and the `debug!` logging in `poll_once`); control flow is a
//! straight-line transaction runner rather than an event-fed state
//! machine, since every wait already blocks until its own completion or
//! timeout.

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::bit;
use crate::byte::{self, responder::ByteOrStop};
use crate::error::{GpioError, ResponderError};
use crate::line::GpioLine;

/// Register-map side effects the engine drives on every accepted data
/// byte. The engine owns no register state itself; `device` implements
/// this against its own register file and measurement timer.
pub trait RegisterDevice {
    fn pointer(&self) -> u8;
    fn set_pointer(&mut self, pointer: u8);
    fn write_register(&mut self, index: u8, value: u8);
    fn read_register(&mut self, index: u8) -> u8;
    /// Called once per idle poll iteration so background timers can
    /// advance even when no transaction is in flight.
    fn tick(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Addr,
    AddrAck,
    Reg,
    RegAck,
    DataIn,
    DataInAck,
    DataOut,
    DataOutAck,
}

#[derive(Debug, Clone, Copy)]
pub struct ResponderConfig {
    pub address: u8,
    pub poll_period: Duration,
    pub edge_timeout: Duration,
}

impl ResponderConfig {
    pub fn new(address: u8, bit_period_us: u64, timeout_periods: u32) -> Self {
        let quarter = Duration::from_micros(bit_period_us);
        ResponderConfig {
            address,
            poll_period: quarter / 4,
            edge_timeout: quarter * timeout_periods,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Completed,
    WrongAddress,
}

pub struct Responder<D, C, Dev> {
    data: D,
    clock: C,
    cfg: ResponderConfig,
    pub device: Dev,
    state: FrameState,
    soft_errors: u32,
}

impl<D: GpioLine, C: GpioLine, Dev: RegisterDevice> Responder<D, C, Dev> {
    pub fn new(mut data: D, clock: C, cfg: ResponderConfig, device: Dev) -> Result<Self, GpioError> {
        data.release()?;
        Ok(Responder { data, clock, cfg, device, state: FrameState::Idle, soft_errors: 0 })
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn soft_error_count(&self) -> u32 {
        self.soft_errors
    }

    pub fn reset_soft_errors(&mut self) {
        self.soft_errors = 0;
    }

    /// Unwraps the engine back into its device, discarding the line
    /// handles. Used by callers that rebuild the line pair around each
    /// idle-wait phase (e.g. the event-driven responder) rather than
    /// holding them for the process lifetime.
    pub fn into_device(self) -> Dev {
        self.device
    }

    /// Runs the background timer, then waits for a START. If one arrives
    /// addressed to us, runs the whole transaction through to STOP, NACK,
    /// or a timeout. Returns `Ok(None)` if told to stop while idle, or if
    /// a timing fault aborted an in-flight transaction (counted as a soft
    /// error, already logged by the caller via the returned `Err`).
    pub fn poll_once(
        &mut self,
        should_stop: &AtomicBool,
    ) -> Result<Option<TransactionOutcome>, ResponderError> {
        self.prepare_for_start();

        if !bit::responder::wait_for_start(&mut self.data, &mut self.clock, self.cfg.poll_period, should_stop)? {
            return Ok(None);
        }
        self.handle_started_transaction().map(Some)
    }

    /// Advances the device's background timer and resets frame-tracking
    /// state to `Idle`. Call once per idle iteration, before waiting for a
    /// START by whatever means the caller prefers: `poll_once`'s busy poll,
    /// or a blocking edge-event read on the clock line.
    pub fn prepare_for_start(&mut self) {
        self.device.tick();
        self.state = FrameState::Idle;
    }

    /// Runs one full transaction through to STOP, NACK, or a timing fault,
    /// assuming the caller has already observed a START condition (e.g. via
    /// `prepare_for_start` followed by its own wait). Performs the same
    /// soft-error bookkeeping and reset-to-`Idle` that `poll_once` does
    /// internally after its own wait.
    pub fn handle_started_transaction(&mut self) -> Result<TransactionOutcome, ResponderError> {
        match self.run_transaction() {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.soft_errors += 1;
                self.data.release().ok();
                self.state = FrameState::Idle;
                Err(e)
            }
        }
    }

    fn run_transaction(&mut self) -> Result<TransactionOutcome, ResponderError> {
        self.state = FrameState::Addr;
        let addr_byte =
            byte::responder::receive_byte(&mut self.data, &mut self.clock, self.cfg.poll_period, self.cfg.edge_timeout)?;
        let target = addr_byte >> 1;
        let write = addr_byte & 1 == 0;

        if target != self.cfg.address {
            self.state = FrameState::Idle;
            return Ok(TransactionOutcome::WrongAddress);
        }

        self.state = FrameState::AddrAck;
        byte::responder::ack(&mut self.data, &mut self.clock, self.cfg.poll_period, self.cfg.edge_timeout, true)?;

        if write {
            self.state = FrameState::Reg;
            let reg =
                byte::responder::receive_byte(&mut self.data, &mut self.clock, self.cfg.poll_period, self.cfg.edge_timeout)?;
            self.device.set_pointer(reg);

            self.state = FrameState::RegAck;
            byte::responder::ack(&mut self.data, &mut self.clock, self.cfg.poll_period, self.cfg.edge_timeout, true)?;

            loop {
                self.state = FrameState::DataIn;
                match byte::responder::receive_byte_or_stop(
                    &mut self.data,
                    &mut self.clock,
                    self.cfg.poll_period,
                    self.cfg.edge_timeout,
                )? {
                    ByteOrStop::Stop => break,
                    ByteOrStop::Byte(value) => {
                        let ptr = self.device.pointer();
                        self.device.write_register(ptr, value);
                        self.device.set_pointer(ptr.wrapping_add(1));

                        self.state = FrameState::DataInAck;
                        byte::responder::ack(
                            &mut self.data,
                            &mut self.clock,
                            self.cfg.poll_period,
                            self.cfg.edge_timeout,
                            true,
                        )?;
                    }
                }
            }
        } else {
            loop {
                self.state = FrameState::DataOut;
                let ptr = self.device.pointer();
                let value = self.device.read_register(ptr);
                self.device.set_pointer(ptr.wrapping_add(1));

                self.state = FrameState::DataOutAck;
                let acked = byte::responder::transmit_byte(
                    &mut self.data,
                    &mut self.clock,
                    self.cfg.poll_period,
                    self.cfg.edge_timeout,
                    value,
                )?;
                if !acked {
                    self.data.release()?;
                    break;
                }
            }
        }

        self.state = FrameState::Idle;
        Ok(TransactionOutcome::Completed)
    }
}
