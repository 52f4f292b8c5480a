use thiserror::Error;

/// Failures reconfiguring or reading a single GPIO line. Any one of these is
/// fatal for the transaction in flight; the caller is responsible for
/// attempting to re-release both lines before surfacing the error further
/// (see the Line Driver failure policy).
#[derive(Debug, Error)]
pub enum GpioError {
    #[error("failed to open gpio chip {path}: {source}")]
    ChipOpen { path: String, source: gpio_cdev::Error },

    #[error("failed to request line {line} as {direction}: {source}")]
    LineRequest { line: u32, direction: &'static str, source: gpio_cdev::Error },

    #[error("failed to read line {line}: {source}")]
    LineRead { line: u32, source: gpio_cdev::Error },

    #[error("failed to poll line {line} for an edge event: {source}")]
    EventPoll { line: u32, source: std::io::Error },
}

/// A bounded wait on a clock edge expired.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimingFault {
    #[error("timed out waiting for the clock line to rise")]
    ClockRiseTimeout,
    #[error("timed out waiting for the clock line to fall")]
    ClockFallTimeout,
}

/// Errors that can surface from the responder side of the bit/byte layers,
/// where a timeout is a routine, recoverable outcome rather than a bug.
#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("gpio failure: {0}")]
    Gpio(#[from] GpioError),
    #[error(transparent)]
    Timing(#[from] TimingFault),
}

/// Outcome of a controller-initiated write or read, reported with the byte
/// position at which things went wrong so the caller can log or retry.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("no response from responder at address {address:#04x}")]
    NoResponse { address: u8 },
    #[error("nack at byte index {at}")]
    NackAt { at: usize },
    #[error("gpio failure: {0}")]
    Gpio(#[from] GpioError),
}
