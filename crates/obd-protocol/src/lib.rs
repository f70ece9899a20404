//! OBD-II Protocol Implementation
//!
//! Stateless pieces of the ELM327 conversation: response framing, the Mode 01
//! PID table and its decoders, trouble code parsing, and the types shared by
//! the transport, session and store crates.

mod dtc;
mod error;
mod framing;
mod pid;
mod protocol;
mod state;

pub use dtc::{
    describe_dtc, parse_dtc_response, Dtc, DtcSystem, DTC_DESCRIPTIONS, UNKNOWN_DTC_DESCRIPTION,
};
pub use error::ObdError;
pub use framing::{
    check_acknowledgement, clean_response, encode_command, is_complete_response,
    is_error_response, PROMPT,
};
pub use pid::{decode_pid, Pid, PidDefinition, TelemetrySample, PID_TABLE};
pub use protocol::{init_sequence, ObdProtocol, RESET_COMMAND};
pub use state::ConnectionState;

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Added to the requested mode in a positive response
    pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;
}

/// Wall-clock time in Unix milliseconds
pub fn unix_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
