//! Parameter model of a pulse program. See [`PulseParams`] for details.
//!
//! A pulse program carries two kinds of tunable values:
//! 1. Scalar parameters declared on `%key = value` lines (frequency, delays, cycle counts).
//!    Keys are enumerated by [`ParamKey`], values are held as a [`ParamValue`].
//! 2. Three integer triples taken from the `PULSE 0 90 ...`, `PULSE 0 180 ...` and
//!    `READ_DATA ...` instruction lines.
//!
//! Unknown `%` keys are not tracked: the program text keeps them verbatim.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

// Enumeration of the scalar parameters understood by the controller.
// To be modified if the firmware grows new tunables
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Frequency,
    PolarizationTime,
    NinetyHalfCycles,
    EchoDelay,
    OneEightyHalfCycles,
    ReceiverDelay,
    NumPoints,
    RepetitionDelay,
}

impl ParamKey {
    pub const ALL: [ParamKey; 8] = [
        ParamKey::Frequency,
        ParamKey::PolarizationTime,
        ParamKey::NinetyHalfCycles,
        ParamKey::EchoDelay,
        ParamKey::OneEightyHalfCycles,
        ParamKey::ReceiverDelay,
        ParamKey::NumPoints,
        ParamKey::RepetitionDelay,
    ];

    /// Key as written in the program text (`%<file_key> = value`).
    pub fn file_key(&self) -> &'static str {
        match self {
            ParamKey::Frequency => "frequency",
            ParamKey::PolarizationTime => "polarization_time",
            ParamKey::NinetyHalfCycles => "90_half_cycles",
            ParamKey::EchoDelay => "echo_delay",
            ParamKey::OneEightyHalfCycles => "180_half_cycles",
            ParamKey::ReceiverDelay => "receiver_delay",
            ParamKey::NumPoints => "num_points",
            ParamKey::RepetitionDelay => "repetition_delay",
        }
    }

    /// Human-readable label for input forms.
    pub fn label(&self) -> &'static str {
        match self {
            ParamKey::Frequency => "Frequency in Hz",
            ParamKey::PolarizationTime => "Polarization time in ms",
            ParamKey::NinetyHalfCycles => "90° RF half cycles",
            ParamKey::EchoDelay => "Echo delay in ms",
            ParamKey::OneEightyHalfCycles => "180° RF half cycles",
            ParamKey::ReceiverDelay => "Receiver delay in ms",
            ParamKey::NumPoints => "ADC sample count",
            ParamKey::RepetitionDelay => "Repetition delay in ms",
        }
    }

    pub fn from_file_key(key: &str) -> Option<ParamKey> {
        ParamKey::ALL.into_iter().find(|k| k.file_key() == key)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.file_key())
    }
}

/// Value of a `%key = value` line.
///
/// Parsing tries an integer first, then a float, and keeps anything else as text,
/// so `%frequency = 2000` stays an integer when the program is written back.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(v) = raw.parse::<i64>() {
            ParamValue::Int(v)
        } else if let Ok(v) = raw.parse::<f64>() {
            ParamValue::Float(v)
        } else {
            ParamValue::Text(raw.to_string())
        }
    }
}

impl Default for ParamValue {
    fn default() -> Self {
        ParamValue::Int(0)
    }
}

impl FromStr for ParamValue {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ParamValue::parse(s))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            // Whole floats keep their decimal point so they read back as floats
            ParamValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Three integers following a pulse keyword, e.g. `PULSE 0 90 12` gives `[0, 90, 12]`.
pub type PulseTriple = [u32; 3];

/// Parses the tokens following a keyword into a [`PulseTriple`].
///
/// Mirrors the firmware convention: a token that is not purely decimal digits counts as 0,
/// and missing tokens are padded with 0.
pub fn parse_triple<'a>(tokens: impl Iterator<Item = &'a str>) -> PulseTriple {
    let mut triple = [0; 3];
    for (slot, token) in triple.iter_mut().zip(tokens) {
        *slot = if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
            token.parse().unwrap_or(0)
        } else {
            0
        };
    }
    triple
}

pub fn format_triple(triple: &PulseTriple) -> String {
    triple
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<String>>()
        .join(" ")
}

/// The complete set of tunable values of a pulse program.
///
/// Every [`ParamKey`] always has a value (0 until parsed or set); iteration follows
/// [`ParamKey::ALL`] order.
#[derive(Clone, Debug, PartialEq)]
pub struct PulseParams {
    values: IndexMap<ParamKey, ParamValue>,
    pub first_pulse: PulseTriple,
    pub second_pulse: PulseTriple,
    pub read_data: PulseTriple,
}

impl PulseParams {
    pub fn new() -> Self {
        Self {
            values: ParamKey::ALL
                .into_iter()
                .map(|k| (k, ParamValue::default()))
                .collect(),
            first_pulse: [0; 3],
            second_pulse: [0; 3],
            read_data: [0; 3],
        }
    }

    pub fn get(&self, key: ParamKey) -> &ParamValue {
        // Every key is inserted at construction
        &self.values[&key]
    }

    pub fn set(&mut self, key: ParamKey, value: ParamValue) {
        self.values.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &ParamValue)> {
        self.values.iter()
    }

    /// Sets every parameter and triple back to zero.
    pub fn reset(&mut self) {
        *self = PulseParams::new();
    }
}

impl Default for PulseParams {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PulseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.iter() {
            writeln!(f, "{} = {}", key, value)?;
        }
        writeln!(f, "first_pulse = [{}]", format_triple(&self.first_pulse))?;
        writeln!(f, "second_pulse = [{}]", format_triple(&self.second_pulse))?;
        write!(f, "read_data = [{}]", format_triple(&self.read_data))
    }
}
