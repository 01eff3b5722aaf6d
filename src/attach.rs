//! Binding chips to parallel ports.
//!
//! A [`Registry`] owns every chip that has been attached to a port,
//! together with the sound card object that exposes it. Probing acquires
//! resources in a fixed order (device slot, transport, card device,
//! card registration) and unwinds exactly what it acquired when a step
//! fails.

use snafu::{ResultExt as _, Snafu};

use crate::chip::{self, ChipHandle};
use crate::config::{DriverConfig, SlotConfig, MAX_CARDS};
use crate::opl::{Hardware, PortPair};
use crate::transport::Transport;

/// Driver name as reported to the card layer
pub const DRIVER_NAME: &str = "opl3lpt";

/// An error attaching a chip to a port
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// No free device slot, all {max} slots are in use
    ResourceExhausted { max: usize },
    /// parport{number} is already bound to device {slot}
    PortInUse { number: u32, slot: usize },
    /// Could not claim access to parport{number}
    TransportUnavailable { number: u32, source: chip::Error },
    /// Card layer rejected the new device
    ChipInitFailure { source: CardError },
    /// Chip could not be brought up
    ChipSetup { source: chip::Error },
    /// Failed to register card
    RegistrationFailure { source: CardError },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// An error reported by the card layer
#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct CardError {
    message: String,
}

impl CardError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Identity of a physical parallel port.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PortInfo {
    /// Port number, as in `parport0`
    pub number: u32,
    /// I/O base address
    pub base: u64,
}

/// Names and numbering handed to the card layer for a new device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub index: Option<i32>,
    pub id: Option<String>,
    pub driver: &'static str,
    pub short_name: String,
    pub long_name: String,
    pub hardware: Hardware,
}

impl CardInfo {
    fn new(slot: &SlotConfig, port: &PortInfo) -> Self {
        Self {
            index: slot.index,
            id: slot.id.clone(),
            driver: DRIVER_NAME,
            short_name: DRIVER_NAME.to_string(),
            long_name: format!("{} on parport{}", DRIVER_NAME, port.number),
            hardware: slot.hardware,
        }
    }
}

/// The sound card layer a chip is exposed through.
///
/// Calls arrive in acquisition order: `create_device`, then `register`.
/// On teardown `disconnect` is followed by `free`, both only after a
/// successful `create_device`.
pub trait SoundCard {
    fn create_device(&mut self, info: &CardInfo) -> Result<(), CardError>;

    fn register(&mut self) -> Result<(), CardError>;

    fn disconnect(&mut self);

    fn free(&mut self);
}

/// A card layer with nothing behind it, for running chips standalone.
#[derive(Debug, Default)]
pub struct HeadlessCard {
    info: Option<CardInfo>,
}

impl HeadlessCard {
    pub fn info(&self) -> Option<&CardInfo> {
        self.info.as_ref()
    }
}

impl SoundCard for HeadlessCard {
    fn create_device(&mut self, info: &CardInfo) -> Result<(), CardError> {
        log::debug!("{}: new device {}", info.driver, info.long_name);
        self.info = Some(info.clone());
        Ok(())
    }

    fn register(&mut self) -> Result<(), CardError> {
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn free(&mut self) {
        self.info = None;
    }
}

/// A chip bound to a port.
#[derive(Debug)]
pub struct Attached<T: Transport, C> {
    pub port: PortInfo,
    pub chip: ChipHandle<T>,
    pub card: C,
}

impl<T: Transport, C: SoundCard> Attached<T, C> {
    fn teardown(self) {
        let Attached {
            port,
            chip,
            mut card,
        } = self;
        chip.reset();
        card.disconnect();
        card.free();
        chip.disconnect();
        log::info!("{}: detached from parport{}", DRIVER_NAME, port.number);
    }
}

/// All chips attached by one driver instance.
#[derive(Debug)]
pub struct Registry<T: Transport, C: SoundCard> {
    config: DriverConfig,
    slots: Vec<Option<Attached<T, C>>>,
}

impl<T: Transport, C: SoundCard> Registry<T, C> {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            slots: (0..MAX_CARDS).map(|_| None).collect(),
        }
    }

    /// Number of attached chips.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, port: &PortInfo) -> Option<&Attached<T, C>> {
        self.slots.iter().flatten().find(|a| a.port == *port)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attached<T, C>> {
        self.slots.iter().flatten()
    }

    /// Offer a newly discovered port to the driver.
    ///
    /// The port is probed when it is the one the first free device slot
    /// is configured for; otherwise `transport` and `card` are dropped
    /// untouched and `Ok(None)` is returned.
    pub fn match_port(&mut self, port: PortInfo, transport: T, card: C) -> Result<Option<usize>> {
        let slot = self.config.slot(self.free_slot().unwrap_or(MAX_CARDS));
        if !slot.matches(&port) {
            log::debug!(
                "{}: parport{} at {:#x} not requested",
                DRIVER_NAME,
                port.number,
                port.base
            );
            return Ok(None);
        }
        self.probe(port, transport, card, &slot).map(Some)
    }

    /// Attach a chip on `port`, returning the slot it occupies.
    pub fn probe(
        &mut self,
        port: PortInfo,
        transport: T,
        mut card: C,
        slot_config: &SlotConfig,
    ) -> Result<usize> {
        log::info!(
            "{}: initialising device at parport{} base {:#x}",
            DRIVER_NAME,
            port.number,
            port.base
        );

        if let Some(slot) = self.slot_of(&port) {
            log::error!("{}: parport{} is already in use", DRIVER_NAME, port.number);
            return PortInUseSnafu {
                number: port.number,
                slot,
            }
            .fail();
        }

        let Some(slot) = self.free_slot() else {
            log::error!("{}: no free card devices", DRIVER_NAME);
            return ResourceExhaustedSnafu { max: MAX_CARDS }.fail();
        };

        let hardware = slot_config.hardware;
        let chip = ChipHandle::create(transport, hardware, PortPair::single(port.base))
            .inspect_err(|e| {
                log::error!(
                    "{}: could not claim access to parport{}: {}",
                    DRIVER_NAME,
                    port.number,
                    e
                )
            })
            .context(TransportUnavailableSnafu {
                number: port.number,
            })?;

        if let Err(e) = card.create_device(&CardInfo::new(slot_config, &port)) {
            log::error!("{}: couldn't create new sound card: {}", DRIVER_NAME, e);
            chip.disconnect();
            return Err(e).context(ChipInitFailureSnafu);
        }

        if let Err(e) = chip.initialize() {
            log::error!("{}: couldn't initialise {}: {}", DRIVER_NAME, hardware, e);
            card.disconnect();
            card.free();
            chip.disconnect();
            return Err(e).context(ChipSetupSnafu);
        }
        chip.reset();

        if let Err(e) = card.register() {
            log::error!("{}: failed to register card: {}", DRIVER_NAME, e);
            chip.reset();
            card.disconnect();
            card.free();
            chip.disconnect();
            return Err(e).context(RegistrationFailureSnafu);
        }

        self.slots[slot] = Some(Attached { port, chip, card });
        log::info!(
            "{}: {} ready on parport{} (device {})",
            DRIVER_NAME,
            hardware,
            port.number,
            slot
        );
        Ok(slot)
    }

    /// Detach the chip on `port`, if any.
    ///
    /// Silences the chip, frees the card and releases the transport.
    pub fn remove(&mut self, port: &PortInfo) -> bool {
        let Some(slot) = self.slot_of(port) else {
            return false;
        };
        if let Some(attached) = self.slots[slot].take() {
            attached.teardown();
        }
        true
    }

    /// Detach every chip, most recently attached slot first.
    pub fn shutdown(&mut self) {
        for attached in self.slots.iter_mut().rev().filter_map(Option::take) {
            attached.teardown();
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn slot_of(&self, port: &PortInfo) -> Option<usize> {
        self.slots
            .iter()
            .position(|a| a.as_ref().is_some_and(|a| a.port == *port))
    }
}

impl<T: Transport, C: SoundCard> Drop for Registry<T, C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
