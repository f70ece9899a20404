//! OBD-II PID Definitions and Response Parsing
//!
//! Defines the standard Mode 01 Parameter IDs (PIDs), their decoding formulas,
//! and the sample type the poll loop hands to the telemetry store. This table
//! is the single place a PID code is mapped to a name and unit.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::framing::PROMPT;
use crate::mode;

/// Standard OBD-II PIDs for Mode 01 (current data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Calculated engine load (0x04)
    #[serde(rename = "0104")]
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    #[serde(rename = "0105")]
    CoolantTemp = 0x05,
    /// Short-term fuel trim bank 1 (0x06)
    #[serde(rename = "0106")]
    ShortFuelTrim = 0x06,
    /// Long-term fuel trim bank 1 (0x07)
    #[serde(rename = "0107")]
    LongFuelTrim = 0x07,
    /// Intake manifold absolute pressure (0x0B)
    #[serde(rename = "010B")]
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    #[serde(rename = "010C")]
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    #[serde(rename = "010D")]
    Speed = 0x0D,
    /// Intake air temperature (0x0F)
    #[serde(rename = "010F")]
    IntakeTemp = 0x0F,
    /// Mass air flow rate (0x10)
    #[serde(rename = "0110")]
    Maf = 0x10,
    /// Throttle position (0x11)
    #[serde(rename = "0111")]
    ThrottlePosition = 0x11,
    /// Oxygen sensor voltage bank 1, sensor 1 (0x14)
    #[serde(rename = "0114")]
    O2Voltage = 0x14,
    /// Control module voltage (0x42)
    #[serde(rename = "0142")]
    ControlModuleVoltage = 0x42,
}

impl Pid {
    /// Every PID with a registered decoder
    pub const ALL: [Pid; 12] = [
        Pid::EngineLoad,
        Pid::CoolantTemp,
        Pid::ShortFuelTrim,
        Pid::LongFuelTrim,
        Pid::IntakeManifoldPressure,
        Pid::Rpm,
        Pid::Speed,
        Pid::IntakeTemp,
        Pid::Maf,
        Pid::ThrottlePosition,
        Pid::O2Voltage,
        Pid::ControlModuleVoltage,
    ];

    /// PIDs polled when no explicit set is configured
    pub const DEFAULT_TRACKED: [Pid; 7] = [
        Pid::Rpm,
        Pid::Speed,
        Pid::CoolantTemp,
        Pid::EngineLoad,
        Pid::IntakeTemp,
        Pid::Maf,
        Pid::ControlModuleVoltage,
    ];

    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Service byte the PID is requested with
    pub fn mode(&self) -> u8 {
        mode::CURRENT_DATA
    }

    /// Four-character request code, e.g. `010C`
    pub fn code(&self) -> &'static str {
        self.definition().code
    }

    /// Get the number of response bytes for this PID
    pub fn response_bytes(&self) -> usize {
        self.definition().data_bytes
    }

    /// Look up the table entry for this PID
    pub fn definition(&self) -> &'static PidDefinition {
        match self {
            Pid::EngineLoad => &ENGINE_LOAD,
            Pid::CoolantTemp => &COOLANT_TEMP,
            Pid::ShortFuelTrim => &SHORT_FUEL_TRIM,
            Pid::LongFuelTrim => &LONG_FUEL_TRIM,
            Pid::IntakeManifoldPressure => &INTAKE_MANIFOLD_PRESSURE,
            Pid::Rpm => &RPM,
            Pid::Speed => &SPEED,
            Pid::IntakeTemp => &INTAKE_TEMP,
            Pid::Maf => &MAF,
            Pid::ThrottlePosition => &THROTTLE_POSITION,
            Pid::O2Voltage => &O2_VOLTAGE,
            Pid::ControlModuleVoltage => &CONTROL_MODULE_VOLTAGE,
        }
    }

    /// Resolve a service/parameter byte pair
    pub fn from_parts(service: u8, parameter: u8) -> Option<Pid> {
        if service != mode::CURRENT_DATA {
            return None;
        }
        Pid::ALL.into_iter().find(|pid| pid.as_hex() == parameter)
    }

    /// Resolve a request code such as `010C` (case-insensitive)
    pub fn from_code(code: &str) -> Option<Pid> {
        let (service, parameter) = split_code(code)?;
        Pid::from_parts(service, parameter)
    }

    /// Decode a raw adapter response for this PID
    pub fn decode_response(&self, raw: &str) -> Option<f64> {
        decode_pid(self.code(), raw)
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Static decode table entry
#[derive(Debug, Clone, Copy)]
pub struct PidDefinition {
    /// The PID this entry describes
    pub pid: Pid,
    /// Request code, e.g. `010C`
    pub code: &'static str,
    /// Human readable name
    pub name: &'static str,
    /// Display unit
    pub unit: &'static str,
    /// Smallest value the formula can produce
    pub min_value: f64,
    /// Largest value the formula can produce
    pub max_value: f64,
    /// Data bytes the formula consumes
    pub data_bytes: usize,
    formula: fn(&[u8]) -> f64,
}

impl PidDefinition {
    /// Apply the formula, or `None` if the payload is too short
    pub fn decode(&self, bytes: &[u8]) -> Option<f64> {
        if bytes.len() < self.data_bytes {
            return None;
        }
        Some((self.formula)(bytes))
    }

    /// Check whether a value lies inside the formula's envelope
    pub fn in_range(&self, value: f64) -> bool {
        value >= self.min_value && value <= self.max_value
    }
}

// A * 100 / 255 (%)
fn percent(bytes: &[u8]) -> f64 {
    bytes[0] as f64 * 100.0 / 255.0
}

// A - 40 (°C)
fn temperature(bytes: &[u8]) -> f64 {
    bytes[0] as f64 - 40.0
}

// (A - 128) * 100 / 128 (%)
fn fuel_trim(bytes: &[u8]) -> f64 {
    (bytes[0] as f64 - 128.0) * 100.0 / 128.0
}

fn single_byte(bytes: &[u8]) -> f64 {
    bytes[0] as f64
}

fn word(bytes: &[u8]) -> f64 {
    (bytes[0] as f64 * 256.0) + bytes[1] as f64
}

// ((A*256)+B)/4
fn rpm(bytes: &[u8]) -> f64 {
    word(bytes) / 4.0
}

// ((A*256)+B) / 100 (g/s)
fn air_flow(bytes: &[u8]) -> f64 {
    word(bytes) / 100.0
}

// ((A*256)+B) / 1000 (V)
fn millivolts(bytes: &[u8]) -> f64 {
    word(bytes) / 1000.0
}

// A / 200 (V)
fn o2_voltage(bytes: &[u8]) -> f64 {
    bytes[0] as f64 / 200.0
}

const ENGINE_LOAD: PidDefinition = PidDefinition {
    pid: Pid::EngineLoad,
    code: "0104",
    name: "Calculated Engine Load",
    unit: "%",
    min_value: 0.0,
    max_value: 100.0,
    data_bytes: 1,
    formula: percent,
};

const COOLANT_TEMP: PidDefinition = PidDefinition {
    pid: Pid::CoolantTemp,
    code: "0105",
    name: "Coolant Temperature",
    unit: "°C",
    min_value: -40.0,
    max_value: 215.0,
    data_bytes: 1,
    formula: temperature,
};

const SHORT_FUEL_TRIM: PidDefinition = PidDefinition {
    pid: Pid::ShortFuelTrim,
    code: "0106",
    name: "Short Term Fuel Trim (Bank 1)",
    unit: "%",
    min_value: -100.0,
    max_value: 99.21875,
    data_bytes: 1,
    formula: fuel_trim,
};

const LONG_FUEL_TRIM: PidDefinition = PidDefinition {
    pid: Pid::LongFuelTrim,
    code: "0107",
    name: "Long Term Fuel Trim (Bank 1)",
    unit: "%",
    min_value: -100.0,
    max_value: 99.21875,
    data_bytes: 1,
    formula: fuel_trim,
};

const INTAKE_MANIFOLD_PRESSURE: PidDefinition = PidDefinition {
    pid: Pid::IntakeManifoldPressure,
    code: "010B",
    name: "Intake Manifold Pressure",
    unit: "kPa",
    min_value: 0.0,
    max_value: 255.0,
    data_bytes: 1,
    formula: single_byte,
};

const RPM: PidDefinition = PidDefinition {
    pid: Pid::Rpm,
    code: "010C",
    name: "Engine RPM",
    unit: "rpm",
    min_value: 0.0,
    max_value: 16383.75,
    data_bytes: 2,
    formula: rpm,
};

const SPEED: PidDefinition = PidDefinition {
    pid: Pid::Speed,
    code: "010D",
    name: "Vehicle Speed",
    unit: "km/h",
    min_value: 0.0,
    max_value: 255.0,
    data_bytes: 1,
    formula: single_byte,
};

const INTAKE_TEMP: PidDefinition = PidDefinition {
    pid: Pid::IntakeTemp,
    code: "010F",
    name: "Intake Air Temperature",
    unit: "°C",
    min_value: -40.0,
    max_value: 215.0,
    data_bytes: 1,
    formula: temperature,
};

const MAF: PidDefinition = PidDefinition {
    pid: Pid::Maf,
    code: "0110",
    name: "Mass Air Flow",
    unit: "g/s",
    min_value: 0.0,
    max_value: 655.35,
    data_bytes: 2,
    formula: air_flow,
};

const THROTTLE_POSITION: PidDefinition = PidDefinition {
    pid: Pid::ThrottlePosition,
    code: "0111",
    name: "Throttle Position",
    unit: "%",
    min_value: 0.0,
    max_value: 100.0,
    data_bytes: 1,
    formula: percent,
};

const O2_VOLTAGE: PidDefinition = PidDefinition {
    pid: Pid::O2Voltage,
    code: "0114",
    name: "O2 Sensor Voltage (Bank 1, Sensor 1)",
    unit: "V",
    min_value: 0.0,
    max_value: 1.275,
    data_bytes: 1,
    formula: o2_voltage,
};

const CONTROL_MODULE_VOLTAGE: PidDefinition = PidDefinition {
    pid: Pid::ControlModuleVoltage,
    code: "0142",
    name: "Control Module Voltage",
    unit: "V",
    min_value: 0.0,
    max_value: 65.535,
    data_bytes: 2,
    formula: millivolts,
};

/// Read-only decode table, one entry per supported PID
pub static PID_TABLE: [PidDefinition; 12] = [
    ENGINE_LOAD,
    COOLANT_TEMP,
    SHORT_FUEL_TRIM,
    LONG_FUEL_TRIM,
    INTAKE_MANIFOLD_PRESSURE,
    RPM,
    SPEED,
    INTAKE_TEMP,
    MAF,
    THROTTLE_POSITION,
    O2_VOLTAGE,
    CONTROL_MODULE_VOLTAGE,
];

/// Split a four-character request code into service and parameter bytes
fn split_code(code: &str) -> Option<(u8, u8)> {
    let code = code.trim();
    if code.len() != 4 || !code.is_ascii() {
        return None;
    }
    let service = u8::from_str_radix(&code[..2], 16).ok()?;
    let parameter = u8::from_str_radix(&code[2..], 16).ok()?;
    Some((service, parameter))
}

/// Parse leading hex pairs, stopping at the first pair that is not hex
fn payload_bytes(hex: &str) -> Vec<u8> {
    hex.as_bytes()
        .chunks_exact(2)
        .map_while(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        })
        .collect()
}

/// Decode the response to a PID request into its numeric value
///
/// Returns `None` for negative or garbled responses (`NO DATA`, `?`), when the
/// payload is shorter than the PID needs, or when the PID is not registered.
pub fn decode_pid(pid_code: &str, raw_response: &str) -> Option<f64> {
    let (service, parameter) = split_code(pid_code)?;
    let cleaned: String = raw_response
        .chars()
        .filter(|c| !c.is_whitespace() && *c != PROMPT)
        .collect::<String>()
        .to_ascii_uppercase();

    let positive = service.checked_add(mode::POSITIVE_RESPONSE_OFFSET)?;
    let prefix = format!("{:02X}{:02X}", positive, parameter);
    let Some(index) = cleaned.find(&prefix) else {
        trace!("No {} header in response {:?}", prefix, raw_response);
        return None;
    };

    let definition = Pid::from_parts(service, parameter)?.definition();
    let bytes = payload_bytes(&cleaned[index + prefix.len()..]);
    definition.decode(&bytes)
}

/// One decoded reading, as handed to the telemetry store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Timestamp of the sweep that produced the reading (Unix ms)
    pub timestamp_ms: u64,
    /// The PID that was queried
    pub pid: Pid,
    /// Decoded value
    pub value: f64,
    /// Display unit
    pub unit: String,
    /// Cleaned adapter response the value was decoded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

impl TelemetrySample {
    /// Create a sample, taking the unit from the PID table
    pub fn new(pid: Pid, value: f64, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            pid,
            value,
            unit: pid.definition().unit.to_string(),
            raw_text: None,
        }
    }

    /// Attach the raw response text
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_text = Some(raw.into());
        self
    }
}
