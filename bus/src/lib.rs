//! Bit-banged I2C physical and link layer.
//!
//! Layering follows the device's own responsibility split: [`line`] is the
//! open-drain GPIO abstraction, [`bit`] and [`byte`] compose it into
//! clocked transfers, and [`controller`] / [`responder`] are the two
//! framed engines built on top. Register-map semantics live one layer up,
//! in the `device` crate, which implements [`responder::RegisterDevice`].

pub mod bit;
pub mod byte;
pub mod controller;
pub mod error;
pub mod line;
pub mod responder;

pub use controller::Controller;
pub use error::{GpioError, ResponderError, TimingFault, TransactionError};
pub use line::{CdevLine, GpioLine, Level};
pub use responder::{Responder, ResponderConfig};

/// Number of bit periods a responder-side edge wait may span before it is
/// treated as a timing fault. Mid-range of the spec's recommended 10-100.
pub const DEFAULT_EDGE_TIMEOUT_PERIODS: u32 = 40;

/// Consecutive soft errors before bus recovery is triggered, on both ends.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 2;
