//! Single in-flight request slot and response reassembly
//!
//! Notification chunks are appended to a buffer until the ELM327 prompt
//! arrives. A completed frame goes to whichever command currently owns the
//! slot; frames with no owner (late replies after a timeout) are dropped.

use obd_protocol::{clean_response, is_complete_response};
use tokio::sync::oneshot;
use tracing::{debug, trace};

struct InFlight {
    command: String,
    reply: oneshot::Sender<String>,
}

/// What happened to a notification chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Buffered, prompt not seen yet
    Pending,
    /// A full frame was handed to the waiting command
    Delivered,
    /// A full frame arrived with nobody waiting
    Orphaned(String),
}

#[derive(Default)]
pub struct Exchange {
    buffer: String,
    in_flight: Option<InFlight>,
}

impl Exchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `command`; any stale buffered bytes are discarded
    pub fn begin(&mut self, command: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        if !self.buffer.is_empty() {
            debug!("Discarding {} stale bytes before {}", self.buffer.len(), command);
        }
        self.buffer.clear();
        self.in_flight = Some(InFlight {
            command: command.to_string(),
            reply: tx,
        });
        rx
    }

    /// Release the slot after a timeout
    pub fn abandon(&mut self) {
        self.buffer.clear();
        self.in_flight = None;
    }

    pub fn reset(&mut self) {
        self.abandon();
    }

    /// Append a notification chunk and complete the frame on the prompt
    pub fn push_chunk(&mut self, chunk: &[u8]) -> ChunkOutcome {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        if !is_complete_response(&self.buffer) {
            return ChunkOutcome::Pending;
        }

        let frame = clean_response(&self.buffer);
        self.buffer.clear();

        match self.in_flight.take() {
            Some(in_flight) => {
                trace!("Frame for {}: {:?}", in_flight.command, frame);
                // Receiver gone means the caller timed out in the same instant
                if let Err(frame) = in_flight.reply.send(frame) {
                    return ChunkOutcome::Orphaned(frame);
                }
                ChunkOutcome::Delivered
            }
            None => ChunkOutcome::Orphaned(frame),
        }
    }
}
