use std::sync::Arc;
use std::thread;

use opl3lpt::attach::{CardError, CardInfo, PortInfo, Registry, SoundCard};
use opl3lpt::chip::{reset_sequence, INIT_SEQUENCE};
use opl3lpt::config::{DriverConfig, SlotConfig, MAX_CARDS};
use opl3lpt::transport::{BusEvent, BusWrite, TraceTransport};
use opl3lpt::{
    AttachError, ChipHandle, Control, Hardware, PortPair, RegisterCommand, Trace, Transport,
    TransportError,
};
use parking_lot::Mutex;
use test_log::test;

const LPT1: PortInfo = PortInfo {
    number: 0,
    base: 0x378,
};

/// Acquisition and release steps, in the order they happened
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Step {
    Claim,
    CreateDevice,
    Register,
    Disconnect,
    FreeCard,
    Release,
}

#[derive(Debug, Clone, Default)]
struct Journal(Arc<Mutex<Vec<Step>>>);

impl Journal {
    fn push(&self, step: Step) {
        self.0.lock().push(step);
    }

    fn steps(&self) -> Vec<Step> {
        self.0.lock().clone()
    }
}

#[derive(Debug)]
struct JournalTransport {
    inner: TraceTransport,
    journal: Journal,
}

impl Transport for JournalTransport {
    fn write_data(&mut self, port: u64, data: u8) {
        self.inner.write_data(port, data);
    }

    fn write_control(&mut self, port: u64, lines: Control) {
        self.inner.write_control(port, lines);
    }

    fn delay(&mut self, micros: u32) {
        self.inner.delay(micros);
    }

    fn claim(&mut self) -> Result<(), TransportError> {
        self.inner.claim()?;
        self.journal.push(Step::Claim);
        Ok(())
    }

    fn release(&mut self) {
        self.journal.push(Step::Release);
        self.inner.release();
    }
}

#[derive(Debug, Default)]
struct MockCard {
    journal: Journal,
    fail_create: bool,
    fail_register: bool,
}

impl SoundCard for MockCard {
    fn create_device(&mut self, _info: &CardInfo) -> Result<(), CardError> {
        if self.fail_create {
            return Err(CardError::new("no card index available"));
        }
        self.journal.push(Step::CreateDevice);
        Ok(())
    }

    fn register(&mut self) -> Result<(), CardError> {
        if self.fail_register {
            return Err(CardError::new("device registration refused"));
        }
        self.journal.push(Step::Register);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.journal.push(Step::Disconnect);
    }

    fn free(&mut self) {
        self.journal.push(Step::FreeCard);
    }
}

fn parts(trace: &Trace) -> (JournalTransport, MockCard, Journal) {
    let journal = Journal::default();
    let transport = JournalTransport {
        inner: trace.transport(),
        journal: journal.clone(),
    };
    let card = MockCard {
        journal: journal.clone(),
        ..Default::default()
    };
    (transport, card, journal)
}

fn writes_at(port: u64, commands: &[RegisterCommand]) -> Vec<BusWrite> {
    commands
        .iter()
        .map(|c| BusWrite {
            port,
            register: c.register(),
            value: c.value,
        })
        .collect()
}

#[test]
fn concurrent_writes_never_interleave() {
    const THREADS: u8 = 4;
    const WRITES: usize = 50;

    let trace = Trace::new();
    let transport = trace.transport().realtime(true);
    let chip = Arc::new(ChipHandle::create(transport, Hardware::Opl3, PortPair::single(0x378)).unwrap());

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let chip = Arc::clone(&chip);
            thread::spawn(move || {
                for _ in 0..WRITES {
                    chip.send(RegisterCommand::new(0xA0 + t as u16, t));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let events = trace.events();
    assert_eq!(events[0], BusEvent::Claim);
    let events = &events[1..];
    assert_eq!(events.len(), THREADS as usize * WRITES * 10);

    let port = 0x378;
    for sequence in events.chunks(10) {
        let (BusEvent::Data { data: register, .. }, BusEvent::Data { data: value, .. }) =
            (sequence[0], sequence[5])
        else {
            panic!("sequence does not start a latch cycle: {:?}", sequence);
        };
        assert_eq!(register, 0xA0 + value, "address and value from different writes");

        let mut expected = Trace::new().transport();
        opl3lpt::encoder::encode(&mut expected, port, RegisterCommand::new(register as u16, value));
        assert_eq!(sequence, expected.trace().events());
    }
}

#[test]
fn initialize_writes_wave_select_then_percussion() {
    let trace = Trace::new();
    let chip = ChipHandle::create(trace.transport(), Hardware::Opl2, PortPair::single(0x378)).unwrap();
    chip.initialize().unwrap();

    assert_eq!(
        trace.writes(),
        vec![
            BusWrite {
                port: 0x378,
                register: 0x01,
                value: 0x20
            },
            BusWrite {
                port: 0x378,
                register: 0xBD,
                value: 0x00
            },
        ]
    );

    // calling it again repeats the writes
    chip.initialize().unwrap();
    assert_eq!(trace.writes().len(), 4);
}

#[test]
fn high_address_routes_to_secondary_port() {
    let trace = Trace::new();
    let ports = PortPair {
        primary: 0x388,
        secondary: 0x38A,
    };
    let chip = ChipHandle::create(trace.transport(), Hardware::Opl3, ports).unwrap();

    chip.send(RegisterCommand::new(0x0220, 0x11));
    let secondary: Vec<_> = trace.events().into_iter().skip(1).collect();
    assert_eq!(secondary.len(), 10);
    for event in secondary {
        match event {
            BusEvent::Data { port, .. } | BusEvent::Control { port, .. } => assert_eq!(port, 0x38A),
            BusEvent::Delay { .. } => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    trace.clear();
    chip.send(RegisterCommand::new(0x0020, 0x11));
    assert!(trace.events().iter().all(|e| match *e {
        BusEvent::Data { port, .. } | BusEvent::Control { port, .. } => port == 0x388,
        _ => true,
    }));
}

#[test]
fn repeated_resets_are_identical() {
    let trace = Trace::new();
    let chip = ChipHandle::create(trace.transport(), Hardware::Opl3, PortPair::single(0x378)).unwrap();
    chip.initialize().unwrap();
    trace.clear();

    chip.reset();
    let first = trace.events();
    trace.clear();

    assert_eq!(chip.status(), 0x00);
    chip.reset();
    let second = trace.events();

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn status_ignores_writes() {
    for (hardware, status) in [(Hardware::Opl2, 0x06), (Hardware::Opl3, 0x00)] {
        let trace = Trace::new();
        let chip = ChipHandle::create(trace.transport(), hardware, PortPair::single(0x378)).unwrap();
        assert_eq!(chip.status(), status);
        chip.initialize().unwrap();
        chip.send(RegisterCommand::new(0x04, 0x60));
        chip.send(RegisterCommand::new(0x04, 0x80));
        assert_eq!(chip.status(), status);
        chip.reset();
        assert_eq!(chip.status(), status);
    }
}

#[test]
fn init_reset_teardown_on_simulated_bus() {
    let trace = Trace::new();
    let chip = ChipHandle::create(trace.transport(), Hardware::Opl2, PortPair::single(0x378)).unwrap();
    chip.initialize().unwrap();
    chip.reset();

    let mut expected = INIT_SEQUENCE.to_vec();
    expected.extend(reset_sequence(Hardware::Opl2));
    assert_eq!(trace.writes(), writes_at(0x378, &expected));

    chip.teardown();
    expected.extend(reset_sequence(Hardware::Opl2));
    assert_eq!(trace.writes(), writes_at(0x378, &expected));
    assert_eq!(trace.count(BusEvent::Claim), 1);
    assert_eq!(trace.count(BusEvent::Release), 1);
    assert_eq!(trace.events().last(), Some(&BusEvent::Release));
}

#[test]
fn probe_and_remove_release_everything_in_reverse() {
    let trace = Trace::new();
    let (transport, card, journal) = parts(&trace);
    let mut registry = Registry::new(DriverConfig::default());

    let slot = registry
        .probe(LPT1, transport, card, &SlotConfig::default())
        .unwrap();
    assert_eq!(slot, 0);
    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.get(&LPT1).map(|a| a.chip.state()),
        Some(opl3lpt::ChipState::Reset)
    );

    let mut expected = INIT_SEQUENCE.to_vec();
    expected.extend(reset_sequence(Hardware::Opl2));
    assert_eq!(trace.writes(), writes_at(0x378, &expected));

    assert!(registry.remove(&LPT1));
    assert!(!registry.remove(&LPT1));
    assert!(registry.is_empty());
    assert_eq!(
        journal.steps(),
        vec![
            Step::Claim,
            Step::CreateDevice,
            Step::Register,
            Step::Disconnect,
            Step::FreeCard,
            Step::Release,
        ]
    );
    assert!(!trace.is_claimed());
}

#[test]
fn exhausted_slots_touch_nothing() {
    let mut registry = Registry::new(DriverConfig::default());
    let mut traces = Vec::new();
    for number in 0..MAX_CARDS as u32 {
        let trace = Trace::new();
        let (transport, card, _) = parts(&trace);
        let port = PortInfo {
            number,
            base: 0x378 + number as u64 * 0x100,
        };
        registry
            .probe(port, transport, card, &SlotConfig::default())
            .unwrap();
        traces.push(trace);
    }

    let trace = Trace::new();
    let (transport, card, journal) = parts(&trace);
    let port = PortInfo {
        number: 99,
        base: 0x3BC,
    };
    let err = registry
        .probe(port, transport, card, &SlotConfig::default())
        .unwrap_err();
    assert!(matches!(err, AttachError::ResourceExhausted { max: MAX_CARDS }));
    assert!(journal.steps().is_empty());
    assert!(trace.events().is_empty());

    drop(registry);
    for trace in traces {
        assert_eq!(trace.count(BusEvent::Release), 1);
    }
}

#[test]
fn busy_transport_touches_nothing() {
    let trace = Trace::new();
    let mut other = trace.transport();
    other.claim().unwrap();

    let (transport, card, journal) = parts(&trace);
    let mut registry = Registry::new(DriverConfig::default());
    let err = registry
        .probe(LPT1, transport, card, &SlotConfig::default())
        .unwrap_err();

    assert!(matches!(err, AttachError::TransportUnavailable { number: 0, .. }));
    assert!(journal.steps().is_empty());
    assert!(registry.is_empty());
    assert_eq!(trace.events(), vec![BusEvent::Claim]);
}

#[test]
fn port_already_bound_is_refused() {
    let trace = Trace::new();
    let mut registry = Registry::new(DriverConfig::default());
    let (transport, card, _) = parts(&trace);
    registry
        .probe(LPT1, transport, card, &SlotConfig::default())
        .unwrap();

    let (transport, card, journal) = parts(&trace);
    let err = registry
        .probe(LPT1, transport, card, &SlotConfig::default())
        .unwrap_err();
    assert!(matches!(err, AttachError::PortInUse { number: 0, slot: 0 }));
    assert!(journal.steps().is_empty());
    assert_eq!(registry.len(), 1);
}

#[test]
fn card_creation_failure_releases_transport() {
    let trace = Trace::new();
    let (transport, mut card, journal) = parts(&trace);
    card.fail_create = true;

    let mut registry = Registry::new(DriverConfig::default());
    let err = registry
        .probe(LPT1, transport, card, &SlotConfig::default())
        .unwrap_err();

    assert!(matches!(err, AttachError::ChipInitFailure { .. }));
    assert_eq!(journal.steps(), vec![Step::Claim, Step::Release]);
    assert!(trace.writes().is_empty());
    assert!(registry.is_empty());
    assert!(!trace.is_claimed());
}

#[test]
fn registration_failure_resets_chip_and_unwinds() {
    let trace = Trace::new();
    let (transport, mut card, journal) = parts(&trace);
    card.fail_register = true;

    let mut registry = Registry::new(DriverConfig::default());
    let err = registry
        .probe(LPT1, transport, card, &SlotConfig::default())
        .unwrap_err();

    assert!(matches!(err, AttachError::RegistrationFailure { .. }));
    assert_eq!(
        journal.steps(),
        vec![
            Step::Claim,
            Step::CreateDevice,
            Step::Disconnect,
            Step::FreeCard,
            Step::Release,
        ]
    );

    let mut expected = INIT_SEQUENCE.to_vec();
    expected.extend(reset_sequence(Hardware::Opl2));
    expected.extend(reset_sequence(Hardware::Opl2));
    assert_eq!(trace.writes(), writes_at(0x378, &expected));
    assert_eq!(trace.events().last(), Some(&BusEvent::Release));
    assert!(registry.is_empty());

    // the slot is free again
    let (transport, card, _) = parts(&trace);
    assert_eq!(
        registry
            .probe(LPT1, transport, card, &SlotConfig::default())
            .unwrap(),
        0
    );
}

#[test]
fn match_port_follows_configuration() {
    let config = DriverConfig::from_params("ioport=0x278 hardware=opl3").unwrap();
    let mut registry = Registry::new(config);

    let lpt1_trace = Trace::new();
    let (transport, card, journal) = parts(&lpt1_trace);
    assert!(registry.match_port(LPT1, transport, card).unwrap().is_none());
    assert!(journal.steps().is_empty());
    assert!(lpt1_trace.events().is_empty());

    let lpt2 = PortInfo {
        number: 1,
        base: 0x278,
    };
    let lpt2_trace = Trace::new();
    let (transport, card, _) = parts(&lpt2_trace);
    assert_eq!(registry.match_port(lpt2, transport, card).unwrap(), Some(0));

    let attached = registry.get(&lpt2).unwrap();
    assert_eq!(attached.chip.hardware(), Hardware::Opl3);
    assert_eq!(attached.chip.status(), 0x00);
    assert!(lpt2_trace.writes().iter().all(|w| w.port == 0x278));

    registry.shutdown();
    assert!(registry.is_empty());
    assert_eq!(lpt2_trace.count(BusEvent::Release), 1);
}

#[test]
fn match_port_reuses_the_slot_freed_by_remove() {
    let config = DriverConfig::from_params("ioport=0x278 hardware=opl3").unwrap();
    let mut registry = Registry::new(config);
    let lpt2 = PortInfo {
        number: 1,
        base: 0x278,
    };

    let first = Trace::new();
    let (transport, card, _) = parts(&first);
    assert_eq!(registry.match_port(lpt2, transport, card).unwrap(), Some(0));
    assert!(registry.remove(&lpt2));
    assert!(registry.is_empty());

    // the port is still the one slot 0 is configured for
    let second = Trace::new();
    let (transport, card, _) = parts(&second);
    assert_eq!(registry.match_port(lpt2, transport, card).unwrap(), Some(0));
    assert_eq!(registry.get(&lpt2).unwrap().chip.hardware(), Hardware::Opl3);
    assert_eq!(second.count(BusEvent::Claim), 1);
}
