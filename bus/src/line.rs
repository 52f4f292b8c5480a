//! Open-drain abstraction over a single GPIO line: a line is either
//! *released* (input, pulled up, floats high) or *driven low* (output at
//! 0). There is deliberately no "drive high" operation.

use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gpio_cdev::{Chip, EventRequestFlags, Line, LineHandle, LineRequestFlags};

use crate::error::GpioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    fn from_raw(v: u8) -> Self {
        if v == 0 { Level::Low } else { Level::High }
    }
}

pub trait GpioLine {
    fn release(&mut self) -> Result<(), GpioError>;
    fn drive_low(&mut self) -> Result<(), GpioError>;
    fn read_level(&self) -> Result<Level, GpioError>;
}

/// A line on a Linux kernel GPIO chardev chip. Each direction change drops
/// the previous request before issuing the new one; the chardev only ever
/// allows one open request per line, so there is no window where both the
/// old and new handle exist at once.
pub struct CdevLine {
    line: Line,
    offset: u32,
    consumer: &'static str,
    handle: Option<LineHandle>,
    driven_low: bool,
}

impl CdevLine {
    pub fn new(chip: &mut Chip, offset: u32, consumer: &'static str) -> Result<Self, GpioError> {
        let line = chip
            .get_line(offset)
            .map_err(|source| GpioError::LineRequest { line: offset, direction: "input", source })?;
        let handle = line
            .request(LineRequestFlags::INPUT | LineRequestFlags::BIAS_PULL_UP, 1, consumer)
            .map_err(|source| GpioError::LineRequest { line: offset, direction: "input", source })?;
        Ok(CdevLine { line, offset, consumer, handle: Some(handle), driven_low: false })
    }
}

impl GpioLine for CdevLine {
    fn release(&mut self) -> Result<(), GpioError> {
        if self.handle.is_some() && !self.driven_low {
            return Ok(());
        }
        self.handle.take();
        let handle = self
            .line
            .request(LineRequestFlags::INPUT | LineRequestFlags::BIAS_PULL_UP, 1, self.consumer)
            .map_err(|source| GpioError::LineRequest { line: self.offset, direction: "input", source })?;
        self.handle = Some(handle);
        self.driven_low = false;
        Ok(())
    }

    fn drive_low(&mut self) -> Result<(), GpioError> {
        if self.handle.is_some() && self.driven_low {
            return Ok(());
        }
        self.handle.take();
        let handle = self
            .line
            .request(LineRequestFlags::OUTPUT, 0, self.consumer)
            .map_err(|source| GpioError::LineRequest { line: self.offset, direction: "output", source })?;
        self.handle = Some(handle);
        self.driven_low = true;
        Ok(())
    }

    fn read_level(&self) -> Result<Level, GpioError> {
        let handle = self.handle.as_ref().expect("line handle missing between transitions");
        let v = handle
            .get_value()
            .map_err(|source| GpioError::LineRead { line: self.offset, source })?;
        Ok(Level::from_raw(v))
    }
}

/// Opens the chip once and requests both bus lines as released inputs.
pub fn open_pair(
    chip_path: &Path,
    data_offset: u32,
    clock_offset: u32,
    consumer: &'static str,
) -> Result<(CdevLine, CdevLine), GpioError> {
    let mut chip = Chip::new(chip_path).map_err(|source| GpioError::ChipOpen {
        path: chip_path.display().to_string(),
        source,
    })?;
    let data = CdevLine::new(&mut chip, data_offset, consumer)?;
    let clock = CdevLine::new(&mut chip, clock_offset, consumer)?;
    Ok((data, clock))
}

/// Blocks until a falling edge is observed on `offset`, or `should_stop` is
/// set, without spinning: requests the line as a one-shot kernel event
/// source, then polls its file descriptor with a bounded timeout so the
/// shutdown flag stays responsive. The request is released again before
/// returning, leaving the line free for a plain [`CdevLine`] request.
///
/// The Linux GPIO chardev this crate targets only allows one open request
/// per line at a time, so a line cannot simultaneously serve as an
/// edge-event source and a normal input/output handle; callers that want
/// both must request one after releasing the other, as this function and
/// `CdevLine::new` each do in turn.
pub fn wait_for_falling_edge(
    chip: &mut Chip,
    offset: u32,
    consumer: &'static str,
    should_stop: &AtomicBool,
) -> Result<bool, GpioError> {
    let line = chip
        .get_line(offset)
        .map_err(|source| GpioError::LineRequest { line: offset, direction: "event", source })?;
    let events = line
        .events(
            LineRequestFlags::INPUT | LineRequestFlags::BIAS_PULL_UP,
            EventRequestFlags::FALLING_EDGE,
            consumer,
        )
        .map_err(|source| GpioError::LineRequest { line: offset, direction: "event", source })?;

    let fd = events.as_raw_fd();
    loop {
        if should_stop.load(Ordering::Relaxed) {
            return Ok(false);
        }
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        let n = unsafe { libc::poll(&mut pfd, 1, 200) };
        if n < 0 {
            return Err(GpioError::EventPoll { line: offset, source: std::io::Error::last_os_error() });
        }
        if n > 0 {
            return Ok(true);
        }
    }
}

/// A wire shared by two in-process parties, standing in for a physical
/// open-drain GPIO line plus its external pull-up: the observed level is
/// low whenever either party is driving low, high otherwise. Used only by
/// tests, the same role the teacher's `i2c/hosted.rs` plays for real
/// hardware builds.
pub struct MockLine {
    own: Arc<AtomicBool>,
    other: Arc<AtomicBool>,
}

pub fn mock_wire_pair() -> (MockLine, MockLine) {
    let a = Arc::new(AtomicBool::new(false));
    let b = Arc::new(AtomicBool::new(false));
    (
        MockLine { own: a.clone(), other: b.clone() },
        MockLine { own: b, other: a },
    )
}

impl GpioLine for MockLine {
    fn release(&mut self) -> Result<(), GpioError> {
        self.own.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn drive_low(&mut self) -> Result<(), GpioError> {
        self.own.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read_level(&self) -> Result<Level, GpioError> {
        let low = self.own.load(Ordering::SeqCst) || self.other.load(Ordering::SeqCst);
        Ok(if low { Level::Low } else { Level::High })
    }
}
