//! Composite stages
//!
//! A sub-graph owns its own stages and links and shows its parent a sink
//! and a source port that delegate to ports of internal stages. To the
//! parent it is just another stage.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::{PipelineError, Result};
use crate::pipeline::port::{BufferProbe, Port, PortDirection, PortRef, ProbeReturn};
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::state::{PipelineState, StateChange};
use crate::pipeline::topology::{Link, Node, StageRef, Topology};
use crate::pipeline::types::{FormatTemplate, MediaFormat, StageConfig};

/// Name of the boundary port that feeds the sub-graph
pub const BOUNDARY_SINK: &str = "sink";
/// Name of the boundary port that the sub-graph feeds
pub const BOUNDARY_SOURCE: &str = "src";

/// External port forwarding to an internal one
#[derive(Debug)]
struct Boundary {
    port: Port,
    target: PortRef,
}

/// A stage made of stages
pub struct SubGraph {
    name: String,
    topology: Topology,
    boundary: Vec<Boundary>,
    state: PipelineState,
}

impl SubGraph {
    pub(crate) fn new(name: &str, registry: Arc<StageRegistry>) -> Self {
        Self {
            name: name.to_string(),
            topology: Topology::new(registry),
            boundary: Vec::new(),
            state: PipelineState::Null,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Create an internal stage
    pub fn create_stage(&mut self, kind: &str, name: &str, config: StageConfig) -> Result<StageRef> {
        self.topology.create_stage(kind, name, config)
    }

    /// Nest another sub-graph
    pub fn add_subgraph(&mut self, sub: SubGraph) -> Result<StageRef> {
        self.topology.add_subgraph(sub)
    }

    /// Link internal stages along a chain
    pub fn link<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.topology.link_chain(names).map(|_| ())
    }

    pub fn link_ports(&mut self, from: &PortRef, to: &PortRef) -> Result<()> {
        self.topology.link_ports(from, to)
    }

    pub fn lookup(&self, name: &str) -> Result<&Node> {
        self.topology.node(name)
    }

    /// Internal port
    pub fn port(&self, port: &PortRef) -> Result<&Port> {
        self.topology.port(port)
    }

    pub fn links(&self) -> &[Link] {
        self.topology.links()
    }

    pub fn stages(&self) -> impl Iterator<Item = &Node> {
        self.topology.nodes()
    }

    /// Publish an internal port as the boundary port `name`
    ///
    /// The internal port must exist, have the expected direction and be
    /// free; it is then reserved for the boundary.
    pub(crate) fn expose(&mut self, name: &str, direction: PortDirection, target: &PortRef) -> Result<()> {
        let creation_error = |reason: String| PipelineError::StageCreation {
            kind: "subgraph".to_string(),
            name: self.name.clone(),
            reason,
        };

        if self.boundary_port(name).is_some() {
            return Err(creation_error(format!("boundary port '{}' already exposed", name)));
        }

        let inner = self
            .topology
            .port(target)
            .map_err(|_| creation_error(format!("boundary target {} is not an internal port", target)))?;
        if inner.direction() != direction {
            return Err(creation_error(format!(
                "boundary target {} is a {} port, expected {}",
                target,
                inner.direction(),
                direction
            )));
        }
        if inner.is_linked() {
            return Err(creation_error(format!("boundary target {} is already linked", target)));
        }

        let template = match inner.format() {
            Some(format) => FormatTemplate::Fixed(format.clone()),
            None => inner.template().clone(),
        };
        let port = Port::new(name, direction, inner.presence(), template);

        let me = PortRef::new(self.name.clone(), name);
        self.topology.port_mut(target)?.set_peer(Some(me));
        self.boundary.push(Boundary {
            port,
            target: target.clone(),
        });
        Ok(())
    }

    /// Whether both boundary ports resolve to internal ports
    pub fn is_complete(&self) -> bool {
        [BOUNDARY_SINK, BOUNDARY_SOURCE]
            .iter()
            .all(|name| self.boundary_target(name).is_some())
    }

    pub fn boundary_ports(&self) -> impl Iterator<Item = &Port> {
        self.boundary.iter().map(|b| &b.port)
    }

    pub fn boundary_port(&self, name: &str) -> Option<&Port> {
        self.boundary_ports().find(|p| p.name() == name)
    }

    pub(crate) fn boundary_port_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.boundary
            .iter_mut()
            .map(|b| &mut b.port)
            .find(|p| p.name() == name)
    }

    /// Internal port a boundary port delegates to
    pub fn boundary_target(&self, name: &str) -> Option<&PortRef> {
        self.boundary
            .iter()
            .find(|b| b.port.name() == name)
            .map(|b| &b.target)
    }

    /// Attach a probe to an internal port
    pub fn add_probe(&mut self, port: &PortRef, probe: Box<dyn BufferProbe>) -> Result<()> {
        self.topology.add_probe(port, probe)
    }

    /// Run the probes of an internal port
    pub fn push_buffer(&mut self, port: &PortRef, buffer: &mut Buffer) -> Result<ProbeReturn> {
        self.topology.push_buffer(port, buffer)
    }

    /// Mirror a format negotiated on a boundary port onto its target
    pub(crate) fn forward_format(&mut self, boundary: &str, format: Option<MediaFormat>) {
        let Some(format) = format else {
            return;
        };
        if let Some(target) = self.boundary_target(boundary).cloned()
            && let Ok(port) = self.topology.port_mut(&target)
        {
            port.set_format(Some(format));
        }
    }

    pub(crate) fn change_state(&mut self, change: StateChange) -> Result<()> {
        let result = self.topology.change_state(change);
        if result.is_ok() || !change.is_upward() {
            self.state = change.to;
        }
        result
    }
}

impl std::fmt::Debug for SubGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubGraph")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("stages", &self.topology.nodes().map(Node::name).collect::<Vec<_>>())
            .field("boundary", &self.boundary)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter_pair() -> SubGraph {
        let mut sub = SubGraph::new("blurrer", StageRegistry::builtin());
        sub.create_stage("nvvideoconvert", "conv", StageConfig::new()).unwrap();
        sub.create_stage(
            "capsfilter",
            "caps",
            StageConfig::new().with("caps", "video/x-raw(memory:NVMM), format=RGBA"),
        )
        .unwrap();
        sub.link(&["conv", "caps"]).unwrap();
        sub
    }

    #[test]
    fn test_expose_delegates() {
        let mut sub = converter_pair();
        sub.expose(BOUNDARY_SINK, PortDirection::Sink, &PortRef::new("conv", "sink"))
            .unwrap();
        sub.expose(BOUNDARY_SOURCE, PortDirection::Source, &PortRef::new("caps", "src"))
            .unwrap();

        assert!(sub.is_complete());
        assert_eq!(sub.boundary_target("src"), Some(&PortRef::new("caps", "src")));
        let src = sub.boundary_port("src").unwrap();
        assert_eq!(src.query_format().and_then(|f| f.field("format")), Some("RGBA"));
        // the internal port is reserved by the boundary
        assert!(sub.port(&PortRef::new("conv", "sink")).unwrap().is_linked());
    }

    #[test]
    fn test_expose_rejects_wrong_direction() {
        let mut sub = converter_pair();
        let err = sub
            .expose(BOUNDARY_SINK, PortDirection::Sink, &PortRef::new("caps", "src"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageCreation { .. }));
        assert!(!sub.is_complete());
    }

    #[test]
    fn test_expose_rejects_missing_and_linked_targets() {
        let mut sub = converter_pair();
        assert!(
            sub.expose(BOUNDARY_SINK, PortDirection::Sink, &PortRef::new("ghost", "sink"))
                .is_err()
        );
        // conv.src is already linked to caps.sink
        assert!(
            sub.expose(BOUNDARY_SOURCE, PortDirection::Source, &PortRef::new("conv", "src"))
                .is_err()
        );
    }
}
