//! Driver parameters.
//!
//! Parameters use the module parameter syntax: space separated
//! `name=value` pairs, where every value is a comma separated array
//! with one entry per device slot.
//!
//! ```
//! use opl3lpt::config::DriverConfig;
//!
//! let config = DriverConfig::from_params("ioport=0x378,0 parportnum=0,1 hardware=opl3").unwrap();
//! assert_eq!(config.slot(0).ioport, Some(0x378));
//! assert_eq!(config.slot(1).parportnum, 1);
//! ```

use snafu::{ensure, OptionExt as _, Snafu};

use crate::attach::PortInfo;
use crate::opl::Hardware;

/// Number of device slots a driver instance can hold
pub const MAX_CARDS: usize = 8;

/// An error parsing driver parameters
#[derive(Debug, PartialEq, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Unknown parameter `{name}`
    UnknownParameter { name: String },
    /// Parameter `{name}` has no value
    MissingValue { name: String },
    /// Invalid value `{value}` for parameter `{name}`
    InvalidValue { name: String, value: String },
    /// Parameter `{name}` has {count} values, at most {max} are allowed
    TooManyValues {
        name: String,
        count: usize,
        max: usize,
    },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Settings for one device slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotConfig {
    /// I/O address of the parallel port; overrides `parportnum` when set
    pub ioport: Option<u64>,
    /// Parallel port number, e.g. 0 for parport0
    pub parportnum: u32,
    /// Card index, `None` to let the card layer pick one
    pub index: Option<i32>,
    /// Card ID string
    pub id: Option<String>,
    /// Chip class attached to the port
    pub hardware: Hardware,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            ioport: None,
            parportnum: 0,
            index: None,
            id: None,
            hardware: Hardware::Opl2,
        }
    }
}

impl SlotConfig {
    /// Whether the given port is the one this slot asks for.
    pub fn matches(&self, port: &PortInfo) -> bool {
        match self.ioport {
            Some(base) => base == port.base,
            None => self.parportnum == port.number,
        }
    }
}

/// Settings for all device slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverConfig {
    pub slots: Vec<SlotConfig>,
}

impl DriverConfig {
    /// The settings for slot `n`, or the defaults if none were given.
    pub fn slot(&self, n: usize) -> SlotConfig {
        self.slots.get(n).cloned().unwrap_or_default()
    }

    /// Parse a parameter string such as `ioport=0x378 index=-1 id=lpt0`.
    pub fn from_params(params: &str) -> Result<Self> {
        let mut config = DriverConfig::default();
        for param in params.split_whitespace() {
            let (name, values) = param.split_once('=').context(MissingValueSnafu { name: param })?;
            ensure!(!values.is_empty(), MissingValueSnafu { name });

            let values: Vec<&str> = values.split(',').collect();
            ensure!(
                values.len() <= MAX_CARDS,
                TooManyValuesSnafu {
                    name,
                    count: values.len(),
                    max: MAX_CARDS,
                }
            );
            if config.slots.len() < values.len() {
                config.slots.resize_with(values.len(), SlotConfig::default);
            }

            for (slot, value) in config.slots.iter_mut().zip(values) {
                let invalid = || InvalidValueSnafu { name, value };
                match name {
                    "ioport" => {
                        let base = parse_u64(value).with_context(invalid)?;
                        slot.ioport = (base != 0).then_some(base);
                    }
                    "parportnum" => {
                        let number = parse_u64(value).with_context(invalid)?;
                        slot.parportnum = u32::try_from(number).ok().with_context(invalid)?;
                    }
                    "index" => {
                        let index: i32 = value.parse().ok().with_context(invalid)?;
                        slot.index = (index >= 0).then_some(index);
                    }
                    "id" => {
                        slot.id = Some(value.to_string());
                    }
                    "hardware" => {
                        slot.hardware = parse_hardware(value).with_context(invalid)?;
                    }
                    _ => return UnknownParameterSnafu { name }.fail(),
                }
            }
        }
        Ok(config)
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_hardware(value: &str) -> Option<Hardware> {
    match value.to_ascii_lowercase().as_str() {
        "opl2" => Some(Hardware::Opl2),
        "opl3" => Some(Hardware::Opl3),
        _ => None,
    }
}
