//! ELM327 protocol selection and the adapter init handshake

use serde::{Deserialize, Serialize};

/// Adapter reset; answers with the firmware banner
pub const RESET_COMMAND: &str = "ATZ";

/// Sent after the reset: echo, linefeeds, spaces and headers off
const SETUP_COMMANDS: [&str; 4] = ["ATE0", "ATL0", "ATS0", "ATH0"];

/// Bus protocol the adapter is told to use (`ATSP<n>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObdProtocol {
    /// Let the adapter probe the bus
    #[default]
    Auto,
    J1850Pwm,
    J1850Vpw,
    Iso9141,
    KwpSlowInit,
    KwpFastInit,
    Can11Bit500k,
    Can29Bit500k,
    Can11Bit250k,
    Can29Bit250k,
}

impl ObdProtocol {
    /// ELM327 protocol number, 0 for automatic
    pub fn number(&self) -> u8 {
        *self as u8
    }

    /// `ATSP` command selecting this protocol
    pub fn select_command(&self) -> String {
        format!("ATSP{}", self.number())
    }
}

/// Ordered init commands: reset, setup, then protocol selection
pub fn init_sequence(protocol: ObdProtocol) -> Vec<String> {
    std::iter::once(RESET_COMMAND)
        .chain(SETUP_COMMANDS)
        .map(str::to_string)
        .chain(std::iter::once(protocol.select_command()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence() {
        assert_eq!(
            init_sequence(ObdProtocol::default()),
            vec!["ATZ", "ATE0", "ATL0", "ATS0", "ATH0", "ATSP0"]
        );
    }

    #[test]
    fn test_explicit_protocol_is_last() {
        let sequence = init_sequence(ObdProtocol::Can11Bit500k);
        assert_eq!(sequence.len(), 6);
        assert_eq!(sequence.last().map(String::as_str), Some("ATSP6"));
        assert_eq!(ObdProtocol::Can29Bit250k.select_command(), "ATSP9");
    }

    #[test]
    fn test_config_names() {
        let protocol: ObdProtocol = serde_json::from_str("\"can11_bit500k\"").unwrap();
        assert_eq!(protocol, ObdProtocol::Can11Bit500k);
        assert_eq!(serde_json::to_string(&ObdProtocol::Auto).unwrap(), "\"auto\"");
    }
}
