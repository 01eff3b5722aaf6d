//! Chip lifecycle: initialization, reset and teardown.

use core::fmt;

use parking_lot::{Mutex, MutexGuard};
use snafu::{ResultExt as _, Snafu};

use crate::encoder;
use crate::opl::{Hardware, PortPair, RegisterCommand};
use crate::registers::{
    AM_VIBRATO_RHYTHM, ENABLE_WAVE_SELECT, LEFT, RIGHT, TEST_LSI, TOTAL_LEVEL_MASK,
    VOICES_PER_BANK, VOICE_OPERATORS,
};
use crate::transport::{Transport, TransportError};

/// An error driving an OPL chip
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Could not claim the transport
    TransportUnavailable { source: TransportError },
    /// Operation not allowed while the chip is {state}
    InvalidState { state: ChipState },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Where a chip is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChipState {
    Uninitialized,
    Initialized,
    Reset,
    /// The transport has been released; no more writes reach the chip.
    Disconnected,
}

impl fmt::Display for ChipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChipState::Uninitialized => "uninitialized",
            ChipState::Initialized => "initialized",
            ChipState::Reset => "reset",
            ChipState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Everything behind the register lock.
#[derive(Debug)]
pub(crate) struct Bus<T> {
    transport: T,
    state: ChipState,
}

impl<T> Bus<T> {
    /// The transport, unless it has already been released.
    pub(crate) fn transport(&mut self) -> Option<&mut T> {
        if self.state == ChipState::Disconnected {
            None
        } else {
            Some(&mut self.transport)
        }
    }
}

/// The writes that bring a freshly powered chip into a usable state.
///
/// Wave select must be enabled first.
pub const INIT_SEQUENCE: [RegisterCommand; 2] = [
    RegisterCommand::new(LEFT | TEST_LSI as u16, ENABLE_WAVE_SELECT),
    RegisterCommand::new(LEFT | AM_VIBRATO_RHYTHM as u16, 0x00),
];

/// The writes that silence every voice of the given chip class.
///
/// Each voice gets both operators fully attenuated and its key released.
/// Voices past the first bank live in the secondary bank.
/// Ends with [`INIT_SEQUENCE`] so that rhythm mode is switched off as well.
pub fn reset_sequence(hardware: Hardware) -> Vec<RegisterCommand> {
    let voices = hardware.max_voices();
    let mut commands = Vec::with_capacity(voices as usize * 3 + INIT_SEQUENCE.len());

    for voice in 0..voices {
        let (bank, offset) = if voice < VOICES_PER_BANK {
            (LEFT, voice)
        } else {
            (RIGHT, voice - VOICES_PER_BANK)
        };
        let (modulator, carrier) = VOICE_OPERATORS[offset as usize];

        commands.push(RegisterCommand::new(
            bank | (0x40 + modulator) as u16,
            TOTAL_LEVEL_MASK,
        ));
        commands.push(RegisterCommand::new(
            bank | (0x40 + carrier) as u16,
            TOTAL_LEVEL_MASK,
        ));
        commands.push(RegisterCommand::new(bank | (0xB0 + offset) as u16, 0x00));
    }

    commands.extend(INIT_SEQUENCE);
    commands
}

/// One OPL2 or OPL3 chip reachable through a claimed transport.
///
/// The transport is claimed when the handle is created and released
/// exactly once, either by [`ChipHandle::disconnect`],
/// [`ChipHandle::teardown`] or when the handle is dropped.
///
/// All methods take `&self`; register writes from several threads are
/// serialized by the handle's register lock.
#[derive(Debug)]
pub struct ChipHandle<T: Transport> {
    hardware: Hardware,
    ports: PortPair,
    bus: Mutex<Bus<T>>,
}

impl<T: Transport> ChipHandle<T> {
    /// Claim `transport` and wrap it in an uninitialized chip handle.
    pub fn create(mut transport: T, hardware: Hardware, ports: PortPair) -> Result<Self> {
        transport.claim().context(TransportUnavailableSnafu)?;
        log::debug!(
            "{} handle created on ports {:#x}/{:#x}",
            hardware,
            ports.primary,
            ports.secondary
        );

        Ok(Self {
            hardware,
            ports,
            bus: Mutex::new(Bus {
                transport,
                state: ChipState::Uninitialized,
            }),
        })
    }

    pub fn hardware(&self) -> Hardware {
        self.hardware
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    pub fn state(&self) -> ChipState {
        self.bus.lock().state
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Bus<T>> {
        self.bus.lock()
    }

    /// Write a single register.
    pub fn send(&self, command: RegisterCommand) {
        encoder::send(self, command);
    }

    /// Enable wave select and clear the percussion register.
    ///
    /// Calling this again re-issues the same writes.
    pub fn initialize(&self) -> Result<()> {
        let mut bus = self.bus.lock();
        let state = bus.state;
        let Some(transport) = bus.transport() else {
            return InvalidStateSnafu { state }.fail();
        };

        for command in INIT_SEQUENCE {
            encoder::encode(transport, self.ports.select(command.port()), command);
        }
        bus.state = ChipState::Initialized;
        log::debug!("{} initialized", self.hardware);
        Ok(())
    }

    /// Silence all voices and return the chip to a known quiet state.
    pub fn reset(&self) {
        let mut bus = self.bus.lock();
        let Some(transport) = bus.transport() else {
            log::warn!("ignoring reset of disconnected {}", self.hardware);
            return;
        };

        for command in reset_sequence(self.hardware) {
            encoder::encode(transport, self.ports.select(command.port()), command);
        }
        bus.state = ChipState::Reset;
        log::debug!("{} reset", self.hardware);
    }

    /// The chip status byte.
    ///
    /// The transports in this crate cannot read back from the chip,
    /// so this is the fixed value the chip class reports on a
    /// write-only interface.
    pub fn status(&self) -> u8 {
        self.hardware.fallback_status()
    }

    /// Release the transport without touching the chip.
    ///
    /// Later writes are dropped. Does nothing if already disconnected.
    pub fn disconnect(&self) {
        let mut bus = self.bus.lock();
        if bus.state == ChipState::Disconnected {
            return;
        }
        bus.transport.release();
        bus.state = ChipState::Disconnected;
        log::debug!("{} disconnected", self.hardware);
    }

    /// Silence the chip, release the transport and free the handle.
    pub fn teardown(self) {
        self.reset();
        self.disconnect();
    }
}

impl<T: Transport> Drop for ChipHandle<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
