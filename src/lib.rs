//! redactline: assemble a video stage graph and hide detected objects
//!
//! The [`pipeline`] module holds the graph model (stages, ports, links,
//! sub-graphs, lifecycle and the message bus). [`redact`] turns detector
//! output into blurred or filled regions. [`app`] wires both into the
//! decode → infer → redact → encode graph used by the command line tool.

pub mod app;
pub mod buffer;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod redact;

pub use error::{FrameError, LinkFailure, PipelineError, Result};
