//! OPL command module
//!

use crate::registers::{BANK_MASK, VOICES_PER_BANK};

/// A single write to the OPL register file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegisterCommand {
    /// the OPL register to write to,
    /// any bit set in the high byte selects the secondary register bank
    pub address: u16,
    /// the data to write to the register
    pub value: u8,
}

impl RegisterCommand {
    pub const fn new(address: u16, value: u8) -> Self {
        Self { address, value }
    }

    /// The port this command is routed to.
    pub fn port(self) -> Port {
        if self.address & BANK_MASK != 0 {
            Port::Secondary
        } else {
            Port::Primary
        }
    }

    /// The register index within the selected bank,
    /// as it is placed on the data lines.
    pub fn register(self) -> u8 {
        (self.address & 0xFF) as u8
    }
}

/// One of the two register banks of an OPL3.
///
/// OPL2 chips only have the primary bank.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Port {
    /// Left bank, registers `0x000..=0x0FF`
    Primary,
    /// Right (stereo extension) bank, registers `0x100..=0x1FF`
    Secondary,
}

/// The port addresses a chip is reachable at.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub primary: u64,
    pub secondary: u64,
}

impl PortPair {
    /// Both banks behind the same port address,
    /// which is how a parallel port adapter is wired.
    pub fn single(address: u64) -> Self {
        Self {
            primary: address,
            secondary: address,
        }
    }

    pub fn select(&self, port: Port) -> u64 {
        match port {
            Port::Primary => self.primary,
            Port::Secondary => self.secondary,
        }
    }
}

/// The class of chip behind a transport.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Hardware {
    /// YM3812: a single bank of nine voices
    Opl2,
    /// YMF262: two banks of nine voices
    Opl3,
}

impl Hardware {
    /// Number of two-operator voices the chip provides.
    pub fn max_voices(self) -> u8 {
        match self {
            Hardware::Opl2 => VOICES_PER_BANK,
            Hardware::Opl3 => VOICES_PER_BANK * 2,
        }
    }

    /// The status byte reported when the transport cannot read the
    /// status register back.
    pub fn fallback_status(self) -> u8 {
        match self {
            Hardware::Opl2 => 0x06,
            Hardware::Opl3 => 0x00,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Hardware::Opl2 => "OPL2",
            Hardware::Opl3 => "OPL3",
        }
    }
}

impl core::fmt::Display for Hardware {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
