//! Named stage set with links, shared by graphs and sub-graphs

use std::sync::Arc;

use log::{error, info, warn};

use crate::buffer::Buffer;
use crate::error::{LinkFailure, PipelineError, Result};
use crate::pipeline::port::{BufferProbe, Port, PortDirection, PortRef, ProbeReturn};
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::stage::Stage;
use crate::pipeline::state::{PipelineState, StateChange};
use crate::pipeline::subgraph::SubGraph;
use crate::pipeline::types::{FormatTemplate, MediaFormat, StageConfig};

/// Handle to a stage owned by a graph, usable wherever a name is expected
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageRef(String);

impl StageRef {
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Address one of this stage's ports
    pub fn port(&self, port: &str) -> PortRef {
        PortRef::new(self.0.clone(), port)
    }
}

impl AsRef<str> for StageRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A committed source → sink link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub from: PortRef,
    pub to: PortRef,
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

/// Member of a topology: a plain stage or a composite
#[derive(Debug)]
pub enum Node {
    Stage(Stage),
    SubGraph(SubGraph),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Stage(stage) => stage.name(),
            Node::SubGraph(sub) => sub.name(),
        }
    }

    pub fn ports(&self) -> Box<dyn Iterator<Item = &Port> + '_> {
        match self {
            Node::Stage(stage) => Box::new(stage.ports()),
            Node::SubGraph(sub) => Box::new(sub.boundary_ports()),
        }
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        match self {
            Node::Stage(stage) => stage.port(name),
            Node::SubGraph(sub) => sub.boundary_port(name),
        }
    }

    fn port_mut(&mut self, name: &str) -> Option<&mut Port> {
        match self {
            Node::Stage(stage) => stage.port_mut(name),
            Node::SubGraph(sub) => sub.boundary_port_mut(name),
        }
    }

    pub fn state(&self) -> PipelineState {
        match self {
            Node::Stage(stage) => stage.state(),
            Node::SubGraph(sub) => sub.state(),
        }
    }

    pub fn as_stage(&self) -> Option<&Stage> {
        match self {
            Node::Stage(stage) => Some(stage),
            Node::SubGraph(_) => None,
        }
    }

    pub fn as_subgraph(&self) -> Option<&SubGraph> {
        match self {
            Node::Stage(_) => None,
            Node::SubGraph(sub) => Some(sub),
        }
    }

    fn free_static_port(&self, direction: PortDirection) -> Option<&Port> {
        match self {
            Node::Stage(stage) => stage.free_static_port(direction),
            Node::SubGraph(sub) => sub
                .boundary_ports()
                .find(|p| p.direction() == direction && !p.is_linked()),
        }
    }

    fn change_state(&mut self, change: StateChange) -> Result<()> {
        match self {
            Node::Stage(stage) => stage
                .change_state(change)
                .map_err(|reason| PipelineError::StateTransition {
                    stage: stage.name().to_string(),
                    from: change.from,
                    to: change.to,
                    reason,
                }),
            Node::SubGraph(sub) => sub.change_state(change),
        }
    }
}

/// Insertion-ordered set of uniquely named nodes plus their links
pub(crate) struct Topology {
    registry: Arc<StageRegistry>,
    nodes: Vec<Node>,
    links: Vec<Link>,
}

impl Topology {
    pub(crate) fn new(registry: Arc<StageRegistry>) -> Self {
        Self {
            registry,
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub(crate) fn links(&self) -> &[Link] {
        &self.links
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name() == name)
    }

    pub(crate) fn create_stage(&mut self, kind: &str, name: &str, config: StageConfig) -> Result<StageRef> {
        let descriptor = self
            .registry
            .get(kind)
            .ok_or_else(|| PipelineError::StageCreation {
                kind: kind.to_string(),
                name: name.to_string(),
                reason: "unknown stage kind".to_string(),
            })?;

        if self.contains(name) {
            return Err(PipelineError::StageCreation {
                kind: kind.to_string(),
                name: name.to_string(),
                reason: "name already in use".to_string(),
            });
        }

        let stage = Stage::build(descriptor, name, config)?;
        self.nodes.push(Node::Stage(stage));
        Ok(StageRef(name.to_string()))
    }

    pub(crate) fn add_subgraph(&mut self, sub: SubGraph) -> Result<StageRef> {
        if self.contains(sub.name()) {
            return Err(PipelineError::StageCreation {
                kind: "subgraph".to_string(),
                name: sub.name().to_string(),
                reason: "name already in use".to_string(),
            });
        }
        let name = sub.name().to_string();
        self.nodes.push(Node::SubGraph(sub));
        Ok(StageRef(name))
    }

    pub(crate) fn node(&self, name: &str) -> Result<&Node> {
        self.nodes
            .iter()
            .find(|n| n.name() == name)
            .ok_or_else(|| PipelineError::NotFound(name.to_string()))
    }

    pub(crate) fn node_mut(&mut self, name: &str) -> Result<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|n| n.name() == name)
            .ok_or_else(|| PipelineError::NotFound(name.to_string()))
    }

    fn stage_mut(&mut self, name: &str) -> Result<&mut Stage> {
        match self.node_mut(name)? {
            Node::Stage(stage) => Ok(stage),
            Node::SubGraph(_) => Err(PipelineError::NotFound(format!("stage {}", name))),
        }
    }

    pub(crate) fn port(&self, port: &PortRef) -> Result<&Port> {
        self.node(&port.stage)?
            .port(&port.port)
            .ok_or_else(|| PipelineError::NotFound(port.to_string()))
    }

    pub(crate) fn port_mut(&mut self, port: &PortRef) -> Result<&mut Port> {
        self.node_mut(&port.stage)?
            .port_mut(&port.port)
            .ok_or_else(|| PipelineError::NotFound(port.to_string()))
    }

    /// Link a source port to a sink port
    ///
    /// On failure neither port is modified.
    pub(crate) fn link_ports(&mut self, from: &PortRef, to: &PortRef) -> Result<()> {
        let src = self.port(from)?;
        let sink = self.port(to)?;

        if src.direction() != PortDirection::Source || sink.direction() != PortDirection::Sink {
            return Err(PipelineError::link(from, to, LinkFailure::WrongDirection));
        }
        if src.is_linked() || sink.is_linked() {
            return Err(PipelineError::link(from, to, LinkFailure::WasLinked));
        }

        let effective = |p: &Port| match p.format() {
            Some(format) => FormatTemplate::Fixed(format.clone()),
            None => p.template().clone(),
        };
        let common = effective(src)
            .intersect(&effective(sink))
            .ok_or_else(|| PipelineError::link(from, to, LinkFailure::NoFormat))?;
        let negotiated = common.as_format().cloned();

        let src = self.port_mut(from)?;
        src.set_peer(Some(to.clone()));
        if negotiated.is_some() {
            src.set_format(negotiated.clone());
        }

        let sink = self.port_mut(to)?;
        sink.set_peer(Some(from.clone()));
        if negotiated.is_some() {
            sink.set_format(negotiated.clone());
        }

        for end in [from, to] {
            if let Ok(Node::SubGraph(sub)) = self.node_mut(&end.stage) {
                sub.forward_format(&end.port, negotiated.clone());
            }
        }

        let link = Link {
            from: from.clone(),
            to: to.clone(),
        };
        info!("Linked {}", link);
        self.links.push(link);
        Ok(())
    }

    /// Link two stages through their declared ports
    ///
    /// The source side uses the first free static source port. The sink
    /// side uses the first free compatible static sink port, or a fresh
    /// request port when the stage only offers those.
    pub(crate) fn link_stages(&mut self, upstream: &str, downstream: &str) -> Result<Link> {
        let no_port = || PipelineError::Link {
            from: upstream.to_string(),
            to: downstream.to_string(),
            reason: LinkFailure::NoPort,
        };

        let src_port = self
            .node(upstream)?
            .free_static_port(PortDirection::Source)
            .ok_or_else(no_port)?;
        let from = PortRef::new(upstream, src_port.name());
        let src_template = src_port.template().clone();

        let sink_node = self.node(downstream)?;
        let static_sink = sink_node
            .ports()
            .filter(|p| p.direction() == PortDirection::Sink && !p.is_linked() && !p.is_dynamic())
            .find(|p| p.template().intersect(&src_template).is_some())
            .or_else(|| sink_node.free_static_port(PortDirection::Sink))
            .map(|p| p.name().to_string());

        let (sink_name, requested) = match static_sink {
            Some(name) => (name, false),
            None => {
                let template = match sink_node {
                    Node::Stage(stage) => stage
                        .request_templates(PortDirection::Sink)
                        .into_iter()
                        .find(|(_, format)| format.intersect(&src_template).is_some())
                        .map(|(name, _)| name),
                    Node::SubGraph(_) => None,
                }
                .ok_or_else(no_port)?;
                (self.stage_mut(downstream)?.request_port(&template)?, true)
            }
        };

        let to = PortRef::new(downstream, sink_name);
        match self.link_ports(&from, &to) {
            Ok(()) => Ok(Link { from, to }),
            Err(e) => {
                if requested {
                    self.release_port(&to);
                }
                Err(e)
            }
        }
    }

    /// Link consecutive pairs of `names`
    ///
    /// Every name is resolved before linking starts. Links made before a
    /// failing pair are kept.
    pub(crate) fn link_chain<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<Link>> {
        for name in names {
            self.node(name.as_ref())?;
        }

        let mut made = Vec::with_capacity(names.len().saturating_sub(1));
        for pair in names.windows(2) {
            let (a, b) = (pair[0].as_ref(), pair[1].as_ref());
            match self.link_stages(a, b) {
                Ok(link) => made.push(link),
                Err(e) => {
                    error!("{}", e);
                    return Err(e);
                }
            }
        }
        Ok(made)
    }

    pub(crate) fn request_port(&mut self, stage: &str, template: &str) -> Result<PortRef> {
        let name = self.stage_mut(stage)?.request_port(template)?;
        Ok(PortRef::new(stage, name))
    }

    pub(crate) fn release_port(&mut self, port: &PortRef) -> bool {
        match self.stage_mut(&port.stage) {
            Ok(stage) => stage.release_port(&port.port),
            Err(_) => false,
        }
    }

    pub(crate) fn add_dynamic_port(
        &mut self,
        port: &PortRef,
        format: MediaFormat,
    ) -> Result<()> {
        self.stage_mut(&port.stage)?.add_dynamic_port(&port.port, format)?;
        Ok(())
    }

    /// Attach a probe; sub-graph boundary ports forward to their target
    pub(crate) fn add_probe(&mut self, port: &PortRef, probe: Box<dyn BufferProbe>) -> Result<()> {
        if let Node::SubGraph(sub) = self.node_mut(&port.stage)?
            && let Some(target) = sub.boundary_target(&port.port).cloned()
        {
            return sub.add_probe(&target, probe);
        }
        self.port_mut(port)?.add_probe(probe);
        Ok(())
    }

    pub(crate) fn push_buffer(&mut self, port: &PortRef, buffer: &mut Buffer) -> Result<ProbeReturn> {
        if let Node::SubGraph(sub) = self.node_mut(&port.stage)?
            && let Some(target) = sub.boundary_target(&port.port).cloned()
        {
            return sub.push_buffer(&target, buffer);
        }
        Ok(self.port_mut(port)?.run_probes(port, buffer))
    }

    /// Step every node that is not at `target` until it is
    ///
    /// Used for stages added after the graph left `Null`. Upward catch-up
    /// stops at the first refusal; downward catch-up never does.
    pub(crate) fn sync_nodes(&mut self, target: PipelineState) -> Result<()> {
        for node in self.nodes.iter_mut().rev().filter(|n| n.state() != target) {
            for step in node.state().steps_to(target) {
                match node.change_state(step) {
                    Ok(()) => {}
                    Err(e) if step.is_upward() => return Err(e),
                    Err(e) => warn!("Ignoring refusal during {}: {}", step, e),
                }
            }
        }
        Ok(())
    }

    /// Apply one state step to every node sitting at `change.from`
    ///
    /// Upward steps go sink-first (reverse insertion order). On the first
    /// refusal the nodes that already moved are stepped back, so the
    /// topology is left where it started. Downward steps go source-first
    /// and never stop.
    pub(crate) fn change_state(&mut self, change: StateChange) -> Result<()> {
        if !change.is_upward() {
            for node in self.nodes.iter_mut().filter(|n| n.state() == change.from) {
                if let Err(e) = node.change_state(change) {
                    warn!("Ignoring refusal during {}: {}", change, e);
                }
            }
            return Ok(());
        }

        let refusal = self
            .nodes
            .iter_mut()
            .rev()
            .filter(|n| n.state() == change.from)
            .find_map(|node| node.change_state(change).err());

        match refusal {
            None => Ok(()),
            Some(e) => {
                let back = StateChange {
                    from: change.to,
                    to: change.from,
                };
                self.change_state(back)?;
                Err(e)
            }
        }
    }
}
