//! Diagnostic Trouble Code Parsing (Mode 03)

use serde::{Deserialize, Serialize};

use crate::error::ObdError;
use crate::framing::PROMPT;
use crate::mode;

/// Vehicle system a trouble code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DtcSystem {
    Powertrain,
    Chassis,
    Body,
    Network,
}

impl DtcSystem {
    /// Letter used as the code prefix
    pub fn letter(&self) -> char {
        match self {
            DtcSystem::Powertrain => 'P',
            DtcSystem::Chassis => 'C',
            DtcSystem::Body => 'B',
            DtcSystem::Network => 'U',
        }
    }
}

/// A stored trouble code such as `P0133`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dtc {
    pub code: String,
    pub system: DtcSystem,
    /// Human-readable meaning from [`DTC_DESCRIPTIONS`]
    pub description: String,
}

/// Fallback for codes missing from [`DTC_DESCRIPTIONS`]
pub const UNKNOWN_DTC_DESCRIPTION: &str = "Unknown Diagnostic Trouble Code";

/// Known code descriptions
pub const DTC_DESCRIPTIONS: &[(&str, &str)] = &[
    ("P0133", "O2 Sensor Circuit Slow Response (Bank 1 Sensor 1)"),
    ("P0300", "Random/Multiple Cylinder Misfire Detected"),
];

/// Look up the description for a code such as `P0300`
pub fn describe_dtc(code: &str) -> &'static str {
    DTC_DESCRIPTIONS
        .iter()
        .find(|(known, _)| *known == code)
        .map_or(UNKNOWN_DTC_DESCRIPTION, |(_, description)| *description)
}

impl Dtc {
    /// Decode a two-byte code; the top two bits pick the system
    pub fn from_bytes(high: u8, low: u8) -> Self {
        let system = match high >> 6 {
            0 => DtcSystem::Powertrain,
            1 => DtcSystem::Chassis,
            2 => DtcSystem::Body,
            _ => DtcSystem::Network,
        };
        let code = format!("{}{}{:X}{:02X}", system.letter(), (high >> 4) & 0x03, high & 0x0F, low);
        let description = describe_dtc(&code).to_string();
        Self {
            code,
            system,
            description,
        }
    }
}

/// Parse the adapter's reply to a `03` request
///
/// `NO DATA` means no stored codes. `0000` groups are padding.
pub fn parse_dtc_response(raw: &str) -> Result<Vec<Dtc>, ObdError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != PROMPT)
        .collect::<String>()
        .to_ascii_uppercase();

    if cleaned == "NODATA" {
        return Ok(Vec::new());
    }

    let header = format!("{:02X}", mode::READ_DTC + mode::POSITIVE_RESPONSE_OFFSET);
    let Some(payload) = cleaned.strip_prefix(&header) else {
        return Err(ObdError::InvalidResponse(raw.to_string()));
    };

    let mut codes = Vec::new();
    for group in payload.as_bytes().chunks_exact(4) {
        let group = std::str::from_utf8(group)
            .map_err(|_| ObdError::InvalidResponse(raw.to_string()))?;
        if group == "0000" {
            continue;
        }
        let high = u8::from_str_radix(&group[..2], 16)
            .map_err(|_| ObdError::InvalidResponse(raw.to_string()))?;
        let low = u8::from_str_radix(&group[2..], 16)
            .map_err(|_| ObdError::InvalidResponse(raw.to_string()))?;
        codes.push(Dtc::from_bytes(high, low));
    }
    Ok(codes)
}
