//! Stored trouble codes
//!
//! Service 03/04 requests share the command queue with the poll loop.

use tracing::{info, warn};

use ble_transport::{ObdTransport, TransportError};
use obd_protocol::{mode, parse_dtc_response, Dtc, ObdError};

use crate::controller::SessionController;
use crate::error::SessionError;

impl<T: ObdTransport> SessionController<T> {
    fn require_link(&self) -> Result<(), SessionError> {
        if !self.transport.state().can_poll() {
            return Err(TransportError::NotConnected.into());
        }
        Ok(())
    }

    /// Read stored diagnostic trouble codes
    pub async fn read_dtcs(&self) -> Result<Vec<Dtc>, SessionError> {
        self.require_link()?;
        let command = format!("{:02X}", mode::READ_DTC);
        let response = self.transport.send_command(&command).await?;
        let codes = parse_dtc_response(&response)?;
        info!("Read {} stored trouble code(s)", codes.len());
        Ok(codes)
    }

    /// Clear stored trouble codes and the MIL
    pub async fn clear_dtcs(&self) -> Result<(), SessionError> {
        self.require_link()?;
        let command = format!("{:02X}", mode::CLEAR_DTC);
        let response = self.transport.send_command(&command).await?;

        let expected = format!("{:02X}", mode::CLEAR_DTC + mode::POSITIVE_RESPONSE_OFFSET);
        let compact: String = response
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        if !compact.starts_with(&expected) {
            warn!("Clear codes rejected: {:?}", response);
            return Err(ObdError::CommandRejected { command, response }.into());
        }

        info!("Stored trouble codes cleared");
        Ok(())
    }
}
