//! Driver core for OPL2/OPL3 FM synthesizers on a bit-banged bus.
//!
//! A quick overview of the modules:
//!
//! - `registers`: helper OPL register definitions
//! - `opl`: register commands, register banks and chip classes
//! - `transport`: the bus capability the protocol is written against,
//!   with a Linux `/dev/port` parallel port and an in-memory tracing bus
//! - `encoder`: the two-phase latch protocol for a single register write
//! - `chip`: chip handles and their initialize/reset/teardown lifecycle
//! - `attach`: binding chips to ports, with full unwinding on failure
//! - `config`: driver parameters selecting ports and chip classes
//!
//! ```
//! use opl3lpt::{ChipHandle, Hardware, PortPair, Trace};
//!
//! let trace = Trace::new();
//! let chip = ChipHandle::create(trace.transport(), Hardware::Opl2, PortPair::single(0x378))?;
//! chip.initialize()?;
//! chip.reset();
//! chip.teardown();
//! assert!(!trace.is_claimed());
//! # Ok::<(), opl3lpt::ChipError>(())
//! ```

pub mod attach;
pub mod chip;
pub mod config;
pub mod encoder;
pub mod opl;
pub mod registers;
pub mod transport;

pub use crate::attach::{Error as AttachError, PortInfo, Registry, SoundCard};
pub use crate::chip::{ChipHandle, ChipState, Error as ChipError};
pub use crate::config::{DriverConfig, Error as ConfigError, SlotConfig};
pub use crate::opl::{Hardware, Port, PortPair, RegisterCommand};
pub use crate::transport::{Control, Trace, Transport, TransportError};
