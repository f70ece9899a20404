//! ELM327 Response Framing
//!
//! The adapter has no length prefix or checksum on its text responses. A
//! frame is complete once the `>` prompt shows up at the end of the buffer.

use crate::error::ObdError;

/// Prompt byte the ELM327 prints when it is ready for the next command
pub const PROMPT: char = '>';

/// Markers the adapter prints instead of data when a command fails
const ERROR_MARKERS: [&str; 2] = ["ERROR", "UNABLE TO CONNECT"];

/// Check whether the accumulated buffer holds a complete response
pub fn is_complete_response(buffer: &str) -> bool {
    buffer.trim().ends_with(PROMPT)
}

/// Strip prompts and line breaks, joining the remaining lines with single spaces
pub fn clean_response(buffer: &str) -> String {
    buffer
        .replace(PROMPT, "")
        .replace('\r', "\n")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bytes written to the link for a command: ASCII terminated by a carriage return
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + 1);
    bytes.extend_from_slice(command.trim().as_bytes());
    bytes.push(b'\r');
    bytes
}

/// Check if a cleaned response is one of the adapter's error replies
pub fn is_error_response(response: &str) -> bool {
    // A lone question mark is the reply to an unknown command
    let upper = response.trim().to_ascii_uppercase();
    upper == "?" || ERROR_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Fail if the adapter did not accept `command`
pub fn check_acknowledgement(command: &str, response: &str) -> Result<(), ObdError> {
    if is_error_response(response) {
        return Err(ObdError::CommandRejected {
            command: command.to_string(),
            response: response.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_without_prompt() {
        assert!(!is_complete_response("41 0C 0F A0"));
        assert!(!is_complete_response(""));
    }

    #[test]
    fn test_complete_with_prompt() {
        assert!(is_complete_response("41 0C 0F A0>"));
        // Trailing whitespace after the prompt still counts
        assert!(is_complete_response("41 0C 0F A0\r\r>\r\n"));
    }

    #[test]
    fn test_prompt_in_middle_is_incomplete() {
        assert!(!is_complete_response(">41 0C"));
    }

    #[test]
    fn test_clean_joins_lines() {
        assert_eq!(clean_response("41 0C\r0F A0\r>"), "41 0C 0F A0");
    }

    #[test]
    fn test_clean_drops_blank_lines_and_padding() {
        assert_eq!(clean_response("\r\n  ELM327 v1.5  \r\r\n>"), "ELM327 v1.5");
        assert_eq!(clean_response(">"), "");
    }

    #[test]
    fn test_clean_removes_every_prompt() {
        assert_eq!(clean_response(">OK\r>"), "OK");
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command("010C"), b"010C\r".to_vec());
        assert_eq!(encode_command(" ATZ \n"), b"ATZ\r".to_vec());
    }

    #[test]
    fn test_error_responses() {
        assert!(is_error_response("?"));
        assert!(is_error_response("CAN ERROR"));
        assert!(is_error_response("unable to connect"));
        assert!(!is_error_response("OK"));
        assert!(!is_error_response("ELM327 v2.1"));
        assert!(!is_error_response("41 0C 0F A0"));
    }

    #[test]
    fn test_acknowledgement() {
        assert!(check_acknowledgement("ATE0", "OK").is_ok());
        let err = check_acknowledgement("ATXX", "?").unwrap_err();
        assert_eq!(
            err,
            ObdError::CommandRejected {
                command: "ATXX".to_string(),
                response: "?".to_string(),
            }
        );
    }
}
