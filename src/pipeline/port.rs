//! Ports: typed connection points on a stage

use crate::buffer::Buffer;
use crate::pipeline::types::{FormatTemplate, MediaFormat};

/// Direction of data through a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Source,
    Sink,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDirection::Source => write!(f, "source"),
            PortDirection::Sink => write!(f, "sink"),
        }
    }
}

/// When a port exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    /// Created with the stage
    Always,
    /// Appears once the stage has inspected the stream
    Sometimes,
    /// Created when another party asks for it
    Request,
}

/// Address of a port: owning stage name + local port name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub stage: String,
    pub port: String,
}

impl PortRef {
    pub fn new(stage: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            port: port.into(),
        }
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.stage, self.port)
    }
}

/// What a probe wants done with the buffer it inspected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReturn {
    /// Let the buffer continue downstream
    Pass,
    /// Discard the buffer
    Drop,
}

/// Synchronous buffer interceptor attached to a port
///
/// Runs in the streaming context, once per buffer crossing the port. The
/// buffer is only borrowed for the call and must not be retained.
pub trait BufferProbe: Send {
    fn on_buffer(&mut self, port: &PortRef, buffer: &mut Buffer) -> ProbeReturn;
}

/// A connection point owned by a stage or a sub-graph boundary
pub struct Port {
    name: String,
    direction: PortDirection,
    presence: Presence,
    template: FormatTemplate,
    format: Option<MediaFormat>,
    peer: Option<PortRef>,
    probes: Vec<Box<dyn BufferProbe>>,
}

impl Port {
    pub fn new(
        name: impl Into<String>,
        direction: PortDirection,
        presence: Presence,
        template: FormatTemplate,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            presence,
            template,
            format: None,
            peer: None,
            probes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    /// Whether the port was not fixed at stage construction
    pub fn is_dynamic(&self) -> bool {
        self.presence != Presence::Always
    }

    pub fn template(&self) -> &FormatTemplate {
        &self.template
    }

    /// Format agreed on this port, set lazily at link time or when the port
    /// appears with a known format
    pub fn format(&self) -> Option<&MediaFormat> {
        self.format.as_ref()
    }

    /// Best known format: the negotiated one, else a fixed template
    pub fn query_format(&self) -> Option<&MediaFormat> {
        self.format.as_ref().or_else(|| self.template.as_format())
    }

    pub fn peer(&self) -> Option<&PortRef> {
        self.peer.as_ref()
    }

    pub fn is_linked(&self) -> bool {
        self.peer.is_some()
    }

    pub(crate) fn set_format(&mut self, format: Option<MediaFormat>) {
        self.format = format;
    }

    pub(crate) fn set_peer(&mut self, peer: Option<PortRef>) {
        self.peer = peer;
    }

    pub(crate) fn add_probe(&mut self, probe: Box<dyn BufferProbe>) {
        self.probes.push(probe);
    }

    pub(crate) fn run_probes(&mut self, me: &PortRef, buffer: &mut Buffer) -> ProbeReturn {
        for probe in &mut self.probes {
            if probe.on_buffer(me, buffer) == ProbeReturn::Drop {
                return ProbeReturn::Drop;
            }
        }
        ProbeReturn::Pass
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("presence", &self.presence)
            .field("template", &self.template)
            .field("format", &self.format)
            .field("peer", &self.peer)
            .field("probes", &self.probes.len())
            .finish()
    }
}
