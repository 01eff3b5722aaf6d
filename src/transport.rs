//! Physical bus access.
//!
//! A [`Transport`] moves bytes and control-line states to the chip.
//! The register protocol in [`crate::encoder`] is written against this
//! trait only, so any bus that can latch a data byte and toggle the
//! parallel-port style control lines can drive an OPL chip.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use parking_lot::Mutex;
use snafu::Snafu;
#[cfg(target_os = "linux")]
use snafu::{ensure, ResultExt as _};

bitflags! {
    /// Parallel port control register lines
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Control: u8 {
        /// nStrobe
        const STROBE = 0x01;
        /// nAutoFd
        const AUTOFD = 0x02;
        /// nInit
        const INIT = 0x04;
        /// nSelectIn
        const SELECT = 0x08;
    }
}

/// An error claiming a transport
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum TransportError {
    /// Transport is already claimed by another device
    Busy,
    /// Failed to open {path}
    Open {
        path: String,
        source: std::io::Error,
    },
    /// Failed to lock port {base:#x} on {path}
    Lock {
        path: String,
        base: u64,
        source: std::io::Error,
    },
}

/// The capability set a bus must provide to carry OPL register writes.
///
/// `port` is the port address selected for the register bank being
/// written. Writes and delays cannot fail from the caller's point of
/// view; a transport that hits an I/O error reports it through the log.
pub trait Transport {
    /// Place a byte on the data lines.
    fn write_data(&mut self, port: u64, data: u8);

    /// Drive the control lines to exactly the given state.
    fn write_control(&mut self, port: u64, lines: Control);

    /// Busy-wait for at least `micros` microseconds.
    fn delay(&mut self, micros: u32);

    /// Take exclusive ownership of the bus.
    fn claim(&mut self) -> Result<(), TransportError>;

    /// Give up ownership of the bus.
    fn release(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_data(&mut self, port: u64, data: u8) {
        (**self).write_data(port, data)
    }

    fn write_control(&mut self, port: u64, lines: Control) {
        (**self).write_control(port, lines)
    }

    fn delay(&mut self, micros: u32) {
        (**self).delay(micros)
    }

    fn claim(&mut self) -> Result<(), TransportError> {
        (**self).claim()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Spin until at least `micros` microseconds have elapsed.
///
/// Never sleeps: the chip latches are timed from the last edge,
/// and a descheduled thread would only make the gap longer, never shorter.
pub fn spin_delay(micros: u32) {
    let deadline = Instant::now() + Duration::from_micros(micros.into());
    while Instant::now() < deadline {
        core::hint::spin_loop();
    }
}

/// Parallel port access through the Linux `/dev/port` device.
///
/// The data register sits at the port base and the control register
/// two bytes above it. Requires the privileges to open `/dev/port`.
///
/// Claiming takes an exclusive lock on the port's register range of the
/// device file, so two `DevPort`s for the same base cannot both hold the
/// port, whether they live in one process or in two.
#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct DevPort {
    path: std::path::PathBuf,
    base: u64,
    file: Option<std::fs::File>,
}

#[cfg(target_os = "linux")]
impl DevPort {
    pub const DEFAULT_PATH: &'static str = "/dev/port";

    /// Offset of the control register from the port base
    pub const CONTROL_OFFSET: u64 = 2;

    /// Registers covered by the claim: data, status and control
    const REGISTER_SPAN: u64 = 3;

    pub fn new(base: u64) -> Self {
        Self::with_path(Self::DEFAULT_PATH, base)
    }

    pub fn with_path(path: impl Into<std::path::PathBuf>, base: u64) -> Self {
        Self {
            path: path.into(),
            base,
            file: None,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    fn write_byte(&mut self, offset: u64, byte: u8) {
        use std::os::unix::fs::FileExt as _;

        let Some(file) = &self.file else {
            log::error!("write to {:#x} on unclaimed {}", offset, self.path.display());
            return;
        };
        if let Err(e) = file.write_all_at(&[byte], offset) {
            log::error!("failed to write {:#x} to {:#x}: {}", byte, offset, e);
        }
    }

    /// Take a non-blocking write lock on the port's registers.
    ///
    /// Open file description locks belong to the open file, not the
    /// process, and go away when the file is closed.
    fn lock(&self, file: &std::fs::File) -> Result<(), TransportError> {
        use std::os::unix::io::AsRawFd as _;

        // SAFETY: flock is a plain C struct for which all zeroes is valid
        let mut lock: libc::flock = unsafe { core::mem::zeroed() };
        lock.l_type = libc::F_WRLCK as _;
        lock.l_whence = libc::SEEK_SET as _;
        lock.l_start = self.base as _;
        lock.l_len = Self::REGISTER_SPAN as _;

        // SAFETY: the descriptor is owned by `file` and `lock` outlives the call
        if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_OFD_SETLK, &lock) } == 0 {
            return Ok(());
        }
        let error = std::io::Error::last_os_error();
        match error.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EACCES) => BusySnafu.fail(),
            _ => Err(error).context(LockSnafu {
                path: self.path.display().to_string(),
                base: self.base,
            }),
        }
    }
}

#[cfg(target_os = "linux")]
impl Transport for DevPort {
    fn write_data(&mut self, port: u64, data: u8) {
        self.write_byte(port, data);
    }

    fn write_control(&mut self, port: u64, lines: Control) {
        self.write_byte(port + Self::CONTROL_OFFSET, lines.bits());
    }

    fn delay(&mut self, micros: u32) {
        spin_delay(micros);
    }

    fn claim(&mut self) -> Result<(), TransportError> {
        ensure!(self.file.is_none(), BusySnafu);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .context(OpenSnafu {
                path: self.path.display().to_string(),
            })?;
        self.lock(&file)?;
        log::debug!("claimed {} at {:#x}", self.path.display(), self.base);
        self.file = Some(file);
        Ok(())
    }

    fn release(&mut self) {
        // closing the file drops the lock
        if self.file.take().is_some() {
            log::debug!("released {} at {:#x}", self.path.display(), self.base);
        }
    }
}

/// A single observable action on a bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BusEvent {
    Claim,
    Release,
    Data { port: u64, data: u8 },
    Control { port: u64, lines: Control },
    Delay { micros: u32 },
}

/// A register write reassembled from a bus trace.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BusWrite {
    pub port: u64,
    pub register: u8,
    pub value: u8,
}

#[derive(Debug, Default)]
struct TraceState {
    events: Vec<BusEvent>,
    claimed: bool,
}

/// A recording of everything that happened on a simulated bus.
///
/// Clones share the same recording, and every [`TraceTransport`]
/// created from it attaches to the same simulated bus, so only one of
/// them can hold the claim at a time.
#[derive(Debug, Clone, Default)]
pub struct Trace(Arc<Mutex<TraceState>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new transport to this bus.
    pub fn transport(&self) -> TraceTransport {
        TraceTransport {
            trace: self.clone(),
            claimed: false,
            realtime: false,
        }
    }

    /// A snapshot of all recorded events.
    pub fn events(&self) -> Vec<BusEvent> {
        self.0.lock().events.clone()
    }

    pub fn clear(&self) {
        self.0.lock().events.clear();
    }

    /// Whether a transport currently holds this bus.
    pub fn is_claimed(&self) -> bool {
        self.0.lock().claimed
    }

    /// Number of recorded events equal to `event`.
    pub fn count(&self, event: BusEvent) -> usize {
        self.0.lock().events.iter().filter(|&&e| e == event).count()
    }

    /// Reassemble register writes from the recorded data bytes.
    ///
    /// Data bytes alternate between register index and value,
    /// so this is only meaningful on a trace of complete writes.
    pub fn writes(&self) -> Vec<BusWrite> {
        let state = self.0.lock();
        let mut data = state.events.iter().filter_map(|e| match *e {
            BusEvent::Data { port, data } => Some((port, data)),
            _ => None,
        });
        let mut writes = Vec::new();
        while let (Some((port, register)), Some((_, value))) = (data.next(), data.next()) {
            writes.push(BusWrite {
                port,
                register,
                value,
            });
        }
        writes
    }

    fn record(&self, event: BusEvent) {
        log::trace!("bus: {:?}", event);
        self.0.lock().events.push(event);
    }
}

/// A transport that records into a [`Trace`] instead of touching hardware.
#[derive(Debug)]
pub struct TraceTransport {
    trace: Trace,
    claimed: bool,
    realtime: bool,
}

impl TraceTransport {
    /// Also spin for the requested delays, like a real bus would.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }
}

impl Transport for TraceTransport {
    fn write_data(&mut self, port: u64, data: u8) {
        self.trace.record(BusEvent::Data { port, data });
    }

    fn write_control(&mut self, port: u64, lines: Control) {
        self.trace.record(BusEvent::Control { port, lines });
    }

    fn delay(&mut self, micros: u32) {
        if self.realtime {
            spin_delay(micros);
        }
        self.trace.record(BusEvent::Delay { micros });
    }

    fn claim(&mut self) -> Result<(), TransportError> {
        let mut state = self.trace.0.lock();
        if state.claimed {
            return BusySnafu.fail();
        }
        state.claimed = true;
        state.events.push(BusEvent::Claim);
        self.claimed = true;
        Ok(())
    }

    fn release(&mut self) {
        if !self.claimed {
            return;
        }
        self.claimed = false;
        let mut state = self.trace.0.lock();
        state.claimed = false;
        state.events.push(BusEvent::Release);
    }
}
