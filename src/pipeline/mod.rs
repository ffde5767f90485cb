//! Processing graph for redactline
//!
//! This module models a media graph the way the streaming runtime sees it:
//! - Stages: named units with typed ports, built from a registry of kinds
//! - Links: source → sink port pairs agreed on a common format
//! - Sub-graphs: composites exposing internal ports as their own
//! - Lifecycle: Null → Ready → Paused → Playing, stepped one state at a time
//! - Messages: an ordered bus consumed by `run_until_terminal`
//!
//! # Architecture
//!
//! Assembly and lifecycle calls happen on the control context. Buffers are
//! handed to port probes on the streaming context through `push_buffer`.
//! Ports that appear at runtime are announced on the bus and linked by a
//! `PortAddedHandler` such as the `DynamicLinkNegotiator`.

pub mod bus;
pub mod graph;
pub mod health;
pub mod negotiate;
pub mod port;
pub mod registry;
pub mod stage;
pub mod state;
pub mod subgraph;
mod topology;
pub mod types;

pub use bus::{Bus, BusReceiver, Message, MessageSource, RunOutcome, RunStatus};
pub use graph::{PipelineGraph, PortAddedHandler, StateGuard};
pub use health::{HealthSummary, RedactionHealth};
pub use negotiate::{DynamicLinkNegotiator, NegotiationState, Rejection};
pub use port::{BufferProbe, Port, PortDirection, PortRef, Presence, ProbeReturn};
pub use registry::{PortLimit, PortTemplate, PropertyType, StageKind, StageRegistry};
pub use stage::{RequireProperty, Stage, StageImpl};
pub use state::{PipelineState, StateChange};
pub use subgraph::{SubGraph, BOUNDARY_SINK, BOUNDARY_SOURCE};
pub use topology::{Link, Node, StageRef};
pub use types::{ConfigValue, EncodingProfile, FormatTemplate, MediaFormat, MediaKind, StageConfig};
