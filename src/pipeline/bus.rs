//! Lifecycle messages
//!
//! Stages and collaborators post onto a [`Bus`]; the control context drains
//! the messages one at a time through a [`MessageSource`].

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::pipeline::port::PortRef;
use crate::pipeline::state::PipelineState;
use crate::pipeline::types::MediaFormat;

/// A lifecycle notification
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The stream ended normally
    EndOfStream,

    /// Something went wrong but the stream goes on
    Warning { source: Option<String>, text: String },

    /// The stream cannot continue
    Error { source: Option<String>, text: String },

    /// The graph completed a state step
    StateChanged {
        old: PipelineState,
        new: PipelineState,
    },

    /// A stage exposed a port once the stream format became known
    PortAdded { port: PortRef, format: MediaFormat },

    /// Stage-specific notification
    Element { source: String, name: String },

    /// External cancellation request
    Interrupt,
}

impl Message {
    pub fn warning(text: impl Into<String>) -> Self {
        Message::Warning {
            source: None,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Message::Error {
            source: None,
            text: text.into(),
        }
    }

    /// Whether the run loop stops on this message
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Message::EndOfStream | Message::Error { .. } | Message::Interrupt
        )
    }
}

/// Sending half of the message bus, cheap to clone
#[derive(Debug, Clone)]
pub struct Bus {
    tx: mpsc::UnboundedSender<Message>,
}

/// Receiving half of the message bus
#[derive(Debug)]
pub struct BusReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Bus {
    pub fn new() -> (Bus, BusReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Bus { tx }, BusReceiver { rx })
    }

    /// Post a message; returns false once the receiver is gone
    pub fn post(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Ask the run loop to tear the graph down
    pub fn interrupt(&self) -> bool {
        self.post(Message::Interrupt)
    }
}

/// Ordered supply of lifecycle messages
pub trait MessageSource {
    /// Next message, or `None` once the source is exhausted
    fn next_message(&mut self) -> Option<Message>;
}

impl MessageSource for BusReceiver {
    fn next_message(&mut self) -> Option<Message> {
        self.rx.blocking_recv()
    }
}

impl MessageSource for VecDeque<Message> {
    fn next_message(&mut self) -> Option<Message> {
        self.pop_front()
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
    Interrupted,
}

/// Result of [`run_until_terminal`](crate::pipeline::PipelineGraph::run_until_terminal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Text of the error that ended a failed run
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn completed() -> Self {
        Self {
            status: RunStatus::Completed,
            error: None,
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(text.into()),
        }
    }

    pub fn interrupted() -> Self {
        Self {
            status: RunStatus::Interrupted,
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Completed => 0,
            RunStatus::Failed => 1,
            RunStatus::Interrupted => 130,
        }
    }
}
