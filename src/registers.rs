//! Helper module for OPL register addresses

use core::ops::Range;

/// Register address bit selecting the secondary (right) register bank
pub const RIGHT: u16 = 0x100;

/// Register address bits above the register index;
/// any of them set routes a write to the secondary bank
pub const BANK_MASK: u16 = 0xFF00;

/// Register address of the primary (left) register bank
pub const LEFT: u16 = 0x000;

/// Test LSI / Enable waveform control
pub const TEST_LSI: u8 = 0x01;

/// Timer 1 data
pub const TIMER1_DATA: u8 = 0x02;

/// Timer 2 data
pub const TIMER2_DATA: u8 = 0x03;

/// Timer control flags
pub const TIMER_CONTROL: u8 = 0x04;

/// OPL3 4-operator connection select (secondary bank only)
pub const CONNECTION_SELECT: u8 = 0x04;

/// OPL3 mode register (secondary bank only)
pub const MODE: u8 = 0x05;

/// Speech synthesis mode / Keyboard split note select
pub const SPEECH_SYNTHESIS: u8 = 0x08;

/// Amp Mod / Vibrato / EG type / Key Scaling / Multiple
pub const AMP_MOD_VIBRATO_EG_TYPE_KEY_SCALING_MULTIPLE_RANGE: Range<u8> = 0x20..0x36;

/// Key scaling level / Operator output level
pub const KEY_SCALING_LEVEL_OPERATOR_OUTPUT_LEVEL_RANGE: Range<u8> = 0x40..0x56;

/// Attack Rate / Decay Rate
pub const ATTACK_DECAY_RATE_RANGE: Range<u8> = 0x60..0x76;

/// Sustain Level / Release Rate
pub const SUSTAIN_RELEASE_RATE_RANGE: Range<u8> = 0x80..0x96;

/// Frequency (low 8 bits)
pub const FREQUENCY_LOW_RANGE: Range<u8> = 0xA0..0xA9;

/// Key On / Octave / Frequency (high 2 bits)
pub const KEY_ON_OCTAVE_FREQUENCY_HIGH_RANGE: Range<u8> = 0xB0..0xB9;

///  AM depth / Vibrato depth / Rhythm control
pub const AM_VIBRATO_RHYTHM: u8 = 0xBD;

/// Feedback strength / Connection type
pub const FEEDBACK_CONNECTION_RANGE: Range<u8> = 0xC0..0xC9;

/// Wave Select
pub const WAVE_SELECT_RANGE: Range<u8> = 0xE0..0xF6;

/// Value for [`TEST_LSI`] enabling the waveform select registers
pub const ENABLE_WAVE_SELECT: u8 = 0x20;

/// Total level bits of the key scaling / output level registers
/// (all set means the operator is fully attenuated)
pub const TOTAL_LEVEL_MASK: u8 = 0x3F;

/// Value for [`MODE`] enabling the OPL3 extensions
pub const OPL3_ENABLE: u8 = 0x01;

/// Number of two-operator voices in one register bank
pub const VOICES_PER_BANK: u8 = 9;

/// Operator slot offsets (modulator, carrier) of each voice in a bank
pub const VOICE_OPERATORS: [(u8, u8); VOICES_PER_BANK as usize] = [
    (0x00, 0x03),
    (0x01, 0x04),
    (0x02, 0x05),
    (0x08, 0x0B),
    (0x09, 0x0C),
    (0x0A, 0x0D),
    (0x10, 0x13),
    (0x11, 0x14),
    (0x12, 0x15),
];

/// Check whether the given OPL register address is valid
pub fn is_valid_opl_register(register: u8) -> bool {
    match register {
        TEST_LSI | TIMER1_DATA | TIMER2_DATA | TIMER_CONTROL | SPEECH_SYNTHESIS
        | AM_VIBRATO_RHYTHM => true,
        r if (0x20..=0x35).contains(&r) => true,
        r if (0x40..=0x55).contains(&r) => true,
        r if (0x60..=0x75).contains(&r) => true,
        r if (0x80..=0x95).contains(&r) => true,
        r if (0xA0..=0xA8).contains(&r) => true,
        r if (0xB0..=0xB8).contains(&r) => true,
        r if (0xC0..=0xC8).contains(&r) => true,
        r if (0xE0..=0xF5).contains(&r) => true,
        _ => false,
    }
}

/// Check whether the given register address (bank bit included)
/// is a valid OPL3 register
pub fn is_valid_opl3_address(address: u16) -> bool {
    if address > 0x1FF {
        return false;
    }
    let register = (address & 0xFF) as u8;
    match address & RIGHT {
        RIGHT if register == CONNECTION_SELECT || register == MODE => true,
        _ => is_valid_opl_register(register),
    }
}
