//! CLI tool to bring up an OPL chip on a parallel port.
//!
//! Without `--device` the chip is attached to a simulated bus and the
//! register writes it received are printed instead.
use env_logger::Env;
use snafu::prelude::*;
use snafu::{report, Whatever};

use opl3lpt::attach::HeadlessCard;
use opl3lpt::transport::BusEvent;
use opl3lpt::{DriverConfig, PortInfo, Registry, Trace, Transport};

const USAGE: &str = "Usage: lptprobe [--device] <parportnum> <base> [param=value ...]";

#[report]
fn main() -> Result<(), Whatever> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1).collect::<Vec<_>>();
    let device = match args.iter().position(|a| a == "--device") {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    };
    // Expecting at least the port number and base address
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(-1);
    }

    let number: u32 = args[0]
        .parse()
        .with_whatever_context(|_| format!("Invalid port number `{}`", args[0]))?;
    let base = parse_base(&args[1])
        .with_whatever_context(|| format!("Invalid base address `{}`", args[1]))?;
    let config = DriverConfig::from_params(&args[2..].join(" "))
        .whatever_context("Invalid driver parameters")?;
    let port = PortInfo { number, base };

    if device {
        bring_up(config, port, open_device(base)?)?;
        return Ok(());
    }

    let trace = Trace::new();
    bring_up(config, port, Box::new(trace.transport()))?;

    for write in trace.writes() {
        println!(
            "{:#06x}  reg {:#04x} <- {:#04x}",
            write.port, write.register, write.value
        );
    }
    let delay_us: u32 = trace
        .events()
        .iter()
        .filter_map(|e| match e {
            BusEvent::Delay { micros } => Some(*micros),
            _ => None,
        })
        .sum();
    println!(
        "{} register writes, {} us of settle time",
        trace.writes().len(),
        delay_us
    );
    Ok(())
}

fn bring_up(config: DriverConfig, port: PortInfo, transport: Box<dyn Transport>) -> Result<(), Whatever> {
    let mut registry = Registry::new(config);
    let slot = registry
        .match_port(port, transport, HeadlessCard::default())
        .whatever_context("Failed to attach chip")?;
    let Some(slot) = slot else {
        whatever!(
            "parport{} at {:#x} does not match the configured port",
            port.number,
            port.base
        );
    };

    if let Some(attached) = registry.get(&port) {
        println!(
            "{} on parport{} (device {}), status {:#04x}",
            attached.chip.hardware(),
            port.number,
            slot,
            attached.chip.status()
        );
    }
    registry.shutdown();
    Ok(())
}

#[cfg(target_os = "linux")]
fn open_device(base: u64) -> Result<Box<dyn Transport>, Whatever> {
    Ok(Box::new(opl3lpt::transport::DevPort::new(base)))
}

#[cfg(not(target_os = "linux"))]
fn open_device(_base: u64) -> Result<Box<dyn Transport>, Whatever> {
    whatever!("Direct port access is only supported on Linux");
}

fn parse_base(value: &str) -> Option<u64> {
    match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
