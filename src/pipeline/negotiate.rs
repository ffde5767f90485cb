//! Linking ports that appear at runtime
//!
//! Decoders only expose their outputs once they have seen the stream. The
//! negotiator links each video output to a fresh request port on the
//! aggregator and leaves every other output alone.

use std::collections::HashMap;

use log::{error, info, warn};

use crate::error::{LinkFailure, PipelineError};
use crate::pipeline::graph::{PipelineGraph, PortAddedHandler};
use crate::pipeline::port::PortRef;
use crate::pipeline::types::{MediaFormat, MediaKind};

/// Why a dynamic port was left unlinked
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// The port is not known to the graph
    UnknownPort,
    /// The port carries no format yet
    NoFormat,
    /// The port carries something other than video
    NotVideo(MediaFormat),
    /// The aggregator has no free input left
    PortUnavailable,
    /// The aggregator input was obtained but the link failed
    LinkFailed(LinkFailure),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::UnknownPort => write!(f, "unknown port"),
            Rejection::NoFormat => write!(f, "no format"),
            Rejection::NotVideo(format) => write!(f, "not video ({})", format.media_type()),
            Rejection::PortUnavailable => write!(f, "no aggregator input available"),
            Rejection::LinkFailed(reason) => write!(f, "link failed: {}", reason),
        }
    }
}

/// Progress of a single dynamic port
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NegotiationState {
    #[default]
    Unresolved,
    Resolving,
    /// Linked to the given aggregator input
    Linked(PortRef),
    Rejected(Rejection),
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Linked(_) | NegotiationState::Rejected(_))
    }
}

/// Links newly announced video ports to request ports of an aggregator
#[derive(Debug)]
pub struct DynamicLinkNegotiator {
    aggregator: String,
    sink_template: String,
    ports: HashMap<PortRef, NegotiationState>,
}

impl DynamicLinkNegotiator {
    pub fn new(aggregator: impl Into<String>, sink_template: impl Into<String>) -> Self {
        Self {
            aggregator: aggregator.into(),
            sink_template: sink_template.into(),
            ports: HashMap::new(),
        }
    }

    pub fn aggregator(&self) -> &str {
        &self.aggregator
    }

    /// Where `port` stands, `Unresolved` if never seen
    pub fn state(&self, port: &PortRef) -> NegotiationState {
        self.ports.get(port).cloned().unwrap_or_default()
    }

    /// Try to link `port` to the aggregator
    ///
    /// A port that is already linked is left as is, so repeated
    /// announcements are harmless.
    pub fn negotiate(&mut self, graph: &mut PipelineGraph, port: &PortRef) -> NegotiationState {
        if let Some(state @ NegotiationState::Linked(_)) = self.ports.get(port) {
            return state.clone();
        }
        self.ports.insert(port.clone(), NegotiationState::Resolving);

        let state = self.resolve(graph, port);
        self.ports.insert(port.clone(), state.clone());
        state
    }

    fn resolve(&self, graph: &mut PipelineGraph, port: &PortRef) -> NegotiationState {
        let (peer, format) = match graph.port(port) {
            Ok(p) => (p.peer().cloned(), p.query_format().cloned()),
            Err(e) => {
                error!("Cannot negotiate {}: {}", port, e);
                return NegotiationState::Rejected(Rejection::UnknownPort);
            }
        };

        if let Some(peer) = peer {
            info!("{} is already linked to {}", port, peer);
            return NegotiationState::Linked(peer);
        }

        let Some(format) = format else {
            warn!("{} has no format, leaving it unlinked", port);
            return NegotiationState::Rejected(Rejection::NoFormat);
        };
        if format.kind() != MediaKind::Video {
            info!("Ignoring {} carrying {}", port, format.media_type());
            return NegotiationState::Rejected(Rejection::NotVideo(format));
        }

        let sink = match graph.request_port(&self.aggregator, &self.sink_template) {
            Ok(sink) => sink,
            Err(e) => {
                error!("Unable to get a sink port from '{}': {}", self.aggregator, e);
                return NegotiationState::Rejected(Rejection::PortUnavailable);
            }
        };

        match graph.link_ports(port, &sink) {
            Ok(()) => {
                info!("Linked decoder output {} to {}", port, sink);
                NegotiationState::Linked(sink)
            }
            Err(e) => {
                error!("{}", e);
                graph.release_port(&sink);
                let reason = match e {
                    PipelineError::Link { reason, .. } => reason,
                    _ => LinkFailure::NoPort,
                };
                NegotiationState::Rejected(Rejection::LinkFailed(reason))
            }
        }
    }
}

impl PortAddedHandler for DynamicLinkNegotiator {
    fn on_new_port(&mut self, graph: &mut PipelineGraph, port: &PortRef) {
        self.negotiate(graph, port);
    }
}
