//! Top-level graph: assembly, lifecycle and the message loop

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::buffer::Buffer;
use crate::error::{PipelineError, Result};
use crate::pipeline::bus::{Bus, BusReceiver, Message, MessageSource, RunOutcome};
use crate::pipeline::port::{BufferProbe, Port, PortDirection, PortRef, ProbeReturn};
use crate::pipeline::registry::StageRegistry;
use crate::pipeline::state::PipelineState;
use crate::pipeline::subgraph::{BOUNDARY_SINK, BOUNDARY_SOURCE, SubGraph};
use crate::pipeline::topology::{Link, Node, StageRef, Topology};
use crate::pipeline::types::{MediaFormat, StageConfig};

/// Reacts to ports that appear while the graph runs
pub trait PortAddedHandler: Send {
    /// Called once the port exists on its stage and carries its format
    fn on_new_port(&mut self, graph: &mut PipelineGraph, port: &PortRef);
}

/// A named set of stages and links with a shared lifecycle
pub struct PipelineGraph {
    name: String,
    topology: Topology,
    state: PipelineState,
    bus: Bus,
    receiver: Option<BusReceiver>,
    handlers: HashMap<String, Box<dyn PortAddedHandler>>,
}

impl PipelineGraph {
    /// Empty graph over the built-in stage kinds
    pub fn new(name: &str) -> Self {
        Self::with_registry(name, StageRegistry::builtin())
    }

    pub fn with_registry(name: &str, registry: Arc<StageRegistry>) -> Self {
        let (bus, receiver) = Bus::new();
        Self {
            name: name.to_string(),
            topology: Topology::new(registry),
            state: PipelineState::Null,
            bus,
            receiver: Some(receiver),
            handlers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Instantiate a stage of a registered kind
    pub fn create_stage(&mut self, kind: &str, name: &str, config: StageConfig) -> Result<StageRef> {
        self.topology.create_stage(kind, name, config)
    }

    /// Fresh sub-graph sharing this graph's registry, not yet added
    pub fn new_subgraph(&self, name: &str) -> SubGraph {
        SubGraph::new(name, Arc::clone(self.topology.registry()))
    }

    /// Expose `boundary_sink` and `boundary_source` as the sub-graph's
    /// "sink" and "src" ports and add it to the graph
    pub fn create_subgraph(
        &mut self,
        mut sub: SubGraph,
        boundary_sink: &PortRef,
        boundary_source: &PortRef,
    ) -> Result<StageRef> {
        if self.topology.contains(sub.name()) {
            return Err(PipelineError::StageCreation {
                kind: "subgraph".to_string(),
                name: sub.name().to_string(),
                reason: "name already in use".to_string(),
            });
        }
        sub.expose(BOUNDARY_SINK, PortDirection::Sink, boundary_sink)?;
        sub.expose(BOUNDARY_SOURCE, PortDirection::Source, boundary_source)?;
        debug!(
            "Sub-graph '{}' exposes {} and {}",
            sub.name(),
            boundary_sink,
            boundary_source
        );
        self.topology.add_subgraph(sub)
    }

    /// Link consecutive stages of `names`
    ///
    /// Every name must exist before anything is linked. When a pair fails
    /// the links already made stay in place and the error names that pair.
    pub fn link<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.topology.link_chain(names).map(|_| ())
    }

    /// Link two specific ports
    pub fn link_ports(&mut self, from: &PortRef, to: &PortRef) -> Result<()> {
        self.topology.link_ports(from, to)
    }

    pub fn lookup(&self, name: &str) -> Result<&Node> {
        self.topology.node(name)
    }

    pub fn port(&self, port: &PortRef) -> Result<&Port> {
        self.topology.port(port)
    }

    pub fn stages(&self) -> impl Iterator<Item = &Node> {
        self.topology.nodes()
    }

    pub fn links(&self) -> &[Link] {
        self.topology.links()
    }

    pub fn request_port(&mut self, stage: &str, template: &str) -> Result<PortRef> {
        self.topology.request_port(stage, template)
    }

    /// Give back an unlinked request port
    pub fn release_port(&mut self, port: &PortRef) -> bool {
        self.topology.release_port(port)
    }

    /// Attach a buffer observer to a port
    ///
    /// A sub-graph boundary port forwards to the internal port it delegates to.
    pub fn add_probe(&mut self, port: &PortRef, probe: Box<dyn BufferProbe>) -> Result<()> {
        self.topology.add_probe(port, probe)
    }

    /// Hand a buffer to the probes of `port` as if it were flowing through it
    pub fn push_buffer(&mut self, port: &PortRef, buffer: &mut Buffer) -> Result<ProbeReturn> {
        self.topology.push_buffer(port, buffer)
    }

    /// Register the handler for ports that `stage` adds while running
    pub fn connect_port_added(&mut self, stage: &str, handler: Box<dyn PortAddedHandler>) -> Result<()> {
        self.topology.node(stage)?;
        self.handlers.insert(stage.to_string(), handler);
        Ok(())
    }

    /// Posting half of the graph's bus
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// Receiving half of the graph's bus, available once
    pub fn take_bus_receiver(&mut self) -> Option<BusReceiver> {
        self.receiver.take()
    }

    /// Drive every stage to `target` through the intermediate states
    ///
    /// Stages added since the last change first catch up with the graph.
    /// A refused upward step tears the whole graph down to `Null` before
    /// the refusal is returned.
    pub fn set_state(&mut self, target: PipelineState) -> Result<()> {
        if let Err(e) = self.drive(target) {
            error!("Pipeline '{}' failed in {}: {}", self.name, self.state, e);
            self.shutdown();
            return Err(e);
        }
        Ok(())
    }

    fn drive(&mut self, target: PipelineState) -> Result<()> {
        self.topology.sync_nodes(self.state)?;
        for step in self.state.steps_to(target) {
            info!("Pipeline '{}': {}", self.name, step);
            self.topology.change_state(step)?;
            self.state = step.to;
            self.bus.post(Message::StateChanged {
                old: step.from,
                new: step.to,
            });
        }
        Ok(())
    }

    /// Move to `target` and return a guard that moves back when released
    pub fn request_state(&mut self, target: PipelineState) -> Result<StateGuard<'_>> {
        let previous = self.state;
        self.set_state(target)?;
        Ok(StateGuard {
            graph: self,
            previous,
            released: false,
        })
    }

    /// Tear everything down to `Null`
    ///
    /// Downward steps never refuse, so this always completes.
    pub fn shutdown(&mut self) {
        for step in self.state.steps_to(PipelineState::Null) {
            info!("Pipeline '{}': {}", self.name, step);
            if let Err(e) = self.topology.change_state(step) {
                warn!("Pipeline '{}' shutdown: {}", self.name, e);
            }
            self.state = step.to;
            self.bus.post(Message::StateChanged {
                old: step.from,
                new: step.to,
            });
        }
        if let Err(e) = self.topology.sync_nodes(PipelineState::Null) {
            warn!("Pipeline '{}' shutdown: {}", self.name, e);
        }
    }

    /// Consume messages until end-of-stream, an error or an interrupt
    ///
    /// Warnings are logged and the loop goes on. Errors, interrupts and an
    /// exhausted source tear the graph down before returning; end-of-stream
    /// leaves it to the caller.
    pub fn run_until_terminal(&mut self, source: &mut dyn MessageSource) -> RunOutcome {
        while let Some(message) = source.next_message() {
            match message {
                Message::EndOfStream => {
                    info!("Pipeline '{}': end of stream", self.name);
                    return RunOutcome::completed();
                }
                Message::Warning { source, text } => {
                    warn!("{}: {}", source.as_deref().unwrap_or(&self.name), text);
                }
                Message::Error { source, text } => {
                    error!("{}: {}", source.as_deref().unwrap_or(&self.name), text);
                    self.shutdown();
                    return RunOutcome::failed(text);
                }
                Message::StateChanged { old, new } => {
                    debug!("Pipeline '{}' changed {} → {}", self.name, old, new);
                }
                Message::PortAdded { port, format } => self.handle_port_added(&port, format),
                Message::Element { source, name } => {
                    debug!("Element message '{}' from {}", name, source);
                }
                Message::Interrupt => {
                    warn!("Pipeline '{}' interrupted, shutting down", self.name);
                    self.shutdown();
                    return RunOutcome::interrupted();
                }
            }
        }
        error!("Pipeline '{}': message source closed before end-of-stream", self.name);
        self.shutdown();
        RunOutcome::failed("message source closed before end-of-stream")
    }

    fn handle_port_added(&mut self, port: &PortRef, format: MediaFormat) {
        info!("New port {} ({})", port, format);
        if let Err(e) = self.topology.add_dynamic_port(port, format) {
            error!("Cannot expose {}: {}", port, e);
            return;
        }

        // the handler needs the graph, so it sits outside the map meanwhile
        let Some(mut handler) = self.handlers.remove(&port.stage) else {
            debug!("No handler for ports of '{}'", port.stage);
            return;
        };
        handler.on_new_port(self, port);
        self.handlers.entry(port.stage.clone()).or_insert(handler);
    }

    /// One line per stage and per link
    pub fn describe(&self) -> String {
        let mut out = format!("{} [{}]\n", self.name, self.state);
        for node in self.topology.nodes() {
            let kind = match node {
                Node::Stage(stage) => stage.kind().to_string(),
                Node::SubGraph(sub) => format!("subgraph of {}", sub.stages().count()),
            };
            out.push_str(&format!("  {} ({}) {}\n", node.name(), kind, node.state()));
        }
        for link in self.topology.links() {
            out.push_str(&format!("  {}\n", link));
        }
        out
    }
}

impl std::fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("stages", &self.topology.nodes().map(Node::name).collect::<Vec<_>>())
            .field("links", &self.topology.links())
            .finish()
    }
}

impl Drop for PipelineGraph {
    fn drop(&mut self) {
        let busy = self.state != PipelineState::Null
            || self.topology.nodes().any(|n| n.state() != PipelineState::Null);
        if busy {
            self.shutdown();
        }
    }
}

/// Scoped state request
///
/// Dereferences to the graph. Dropping it, or calling [`release`],
/// returns the graph to the state it was in before the request.
///
/// [`release`]: StateGuard::release
#[derive(Debug)]
pub struct StateGuard<'a> {
    graph: &'a mut PipelineGraph,
    previous: PipelineState,
    released: bool,
}

impl StateGuard<'_> {
    /// State the graph returns to
    pub fn previous(&self) -> PipelineState {
        self.previous
    }

    /// Revert now and report the outcome
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.graph.set_state(self.previous)
    }
}

impl Deref for StateGuard<'_> {
    type Target = PipelineGraph;

    fn deref(&self) -> &PipelineGraph {
        self.graph
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut PipelineGraph {
        self.graph
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.graph.set_state(self.previous) {
            error!("Could not restore {} on '{}': {}", self.previous, self.graph.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::LinkFailure;
    use crate::pipeline::bus::RunStatus;
    use crate::pipeline::registry::{PortTemplate, StageKind};
    use crate::pipeline::stage::StageImpl;
    use crate::pipeline::state::StateChange;
    use crate::pipeline::types::FormatTemplate;

    fn filesink_graph() -> PipelineGraph {
        let mut graph = PipelineGraph::new("test");
        graph.create_stage("queue", "q", StageConfig::new()).unwrap();
        graph
            .create_stage("filesink", "out", StageConfig::new().with("location", "/tmp/out.mp4"))
            .unwrap();
        graph.link(&["q", "out"]).unwrap();
        graph
    }

    /// Registry whose "sink_only" stage has no source port
    fn registry_with_dead_end() -> Arc<StageRegistry> {
        let mut registry = StageRegistry::with_builtins();
        registry.register(
            StageKind::new("sink_only").template(PortTemplate::always(
                "sink",
                PortDirection::Sink,
                FormatTemplate::Any,
            )),
        );
        Arc::new(registry)
    }

    #[test]
    fn test_link_chain_keeps_partial_links() {
        let mut graph = PipelineGraph::with_registry("partial", registry_with_dead_end());
        graph.create_stage("queue", "a", StageConfig::new()).unwrap();
        graph.create_stage("sink_only", "b", StageConfig::new()).unwrap();
        graph.create_stage("queue", "c", StageConfig::new()).unwrap();

        let err = graph.link(&["a", "b", "c"]).unwrap_err();
        match err {
            PipelineError::Link { from, to, reason } => {
                assert_eq!(from, "b");
                assert_eq!(to, "c");
                assert_eq!(reason, LinkFailure::NoPort);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(graph.links().len(), 1);
        assert_eq!(graph.links()[0].to, PortRef::new("b", "sink"));

        let a_src = graph.port(&PortRef::new("a", "src")).unwrap();
        let b_sink = graph.port(&PortRef::new("b", "sink")).unwrap();
        assert!(a_src.is_linked() && b_sink.is_linked());
        assert_eq!(a_src.peer(), Some(&PortRef::new("b", "sink")));

        // b has no source at all, and c was never reached
        assert!(graph.lookup("b").unwrap().ports().all(|p| p.direction() == PortDirection::Sink));
        assert!(graph.lookup("c").unwrap().ports().all(|p| !p.is_linked()));
    }

    #[test]
    fn test_link_chain_unknown_name_links_nothing() {
        let mut graph = PipelineGraph::new("missing");
        graph.create_stage("queue", "a", StageConfig::new()).unwrap();
        graph.create_stage("queue", "b", StageConfig::new()).unwrap();
        let err = graph.link(&["a", "b", "ghost"]).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(name) if name == "ghost"));
        assert!(graph.links().is_empty());
    }

    #[test]
    fn test_wrong_direction_leaves_ports_untouched() {
        let mut graph = PipelineGraph::new("dir");
        graph.create_stage("queue", "a", StageConfig::new()).unwrap();
        graph.create_stage("queue", "b", StageConfig::new()).unwrap();

        let err = graph
            .link_ports(&PortRef::new("a", "src"), &PortRef::new("b", "src"))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Link {
                reason: LinkFailure::WrongDirection,
                ..
            }
        ));
        let err = graph
            .link_ports(&PortRef::new("a", "sink"), &PortRef::new("b", "sink"))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Link {
                reason: LinkFailure::WrongDirection,
                ..
            }
        ));
        assert!(graph.stages().flat_map(|n| n.ports()).all(|p| !p.is_linked()));
        assert!(graph.links().is_empty());
    }

    #[test]
    fn test_relink_is_refused() {
        let mut graph = filesink_graph();
        graph.create_stage("queue", "q2", StageConfig::new()).unwrap();
        let err = graph
            .link_ports(&PortRef::new("q2", "src"), &PortRef::new("out", "sink"))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Link {
                reason: LinkFailure::WasLinked,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_and_unknown_stages() {
        let mut graph = PipelineGraph::new("dup");
        graph.create_stage("queue", "q", StageConfig::new()).unwrap();
        assert!(matches!(
            graph.create_stage("queue", "q", StageConfig::new()),
            Err(PipelineError::StageCreation { .. })
        ));
        assert!(matches!(
            graph.create_stage("nosuchkind", "x", StageConfig::new()),
            Err(PipelineError::StageCreation { .. })
        ));
        assert!(matches!(graph.lookup("x"), Err(PipelineError::NotFound(_))));
    }

    #[test]
    fn test_state_guard_reverts() {
        let mut graph = filesink_graph();
        {
            let guard = graph.request_state(PipelineState::Paused).unwrap();
            assert_eq!(guard.state(), PipelineState::Paused);
            assert_eq!(guard.previous(), PipelineState::Null);
            assert!(guard.stages().all(|n| n.state() == PipelineState::Paused));
        }
        assert_eq!(graph.state(), PipelineState::Null);
        assert!(graph.stages().all(|n| n.state() == PipelineState::Null));

        let guard = graph.request_state(PipelineState::Playing).unwrap();
        guard.release().unwrap();
        assert_eq!(graph.state(), PipelineState::Null);
    }

    #[test]
    fn test_refused_transition_names_stage() {
        let mut graph = PipelineGraph::new("refuse");
        graph.create_stage("queue", "q", StageConfig::new()).unwrap();
        graph.create_stage("filesink", "out", StageConfig::new()).unwrap();
        graph.link(&["q", "out"]).unwrap();

        let err = graph.set_state(PipelineState::Playing).unwrap_err();
        match err {
            PipelineError::StateTransition { stage, from, to, .. } => {
                assert_eq!(stage, "out");
                assert_eq!(from, PipelineState::Null);
                assert_eq!(to, PipelineState::Ready);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(graph.state(), PipelineState::Null);
        assert!(graph.stages().all(|n| n.state() == PipelineState::Null));
    }

    /// Accepts `Null → Ready` but never prerolls
    struct NoPreroll;

    impl StageImpl for NoPreroll {
        fn change_state(&mut self, change: StateChange, _: &StageConfig) -> std::result::Result<(), String> {
            if change.from == PipelineState::Ready && change.is_upward() {
                return Err("cannot preroll".to_string());
            }
            Ok(())
        }
    }

    fn no_preroll(_: &StageConfig) -> Box<dyn StageImpl> {
        Box::new(NoPreroll)
    }

    static TEARDOWNS: AtomicUsize = AtomicUsize::new(0);

    /// Counts steps back to `Null`
    struct CountTeardown;

    impl StageImpl for CountTeardown {
        fn change_state(&mut self, change: StateChange, _: &StageConfig) -> std::result::Result<(), String> {
            if change.to == PipelineState::Null {
                TEARDOWNS.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn count_teardown(_: &StageConfig) -> Box<dyn StageImpl> {
        Box::new(CountTeardown)
    }

    fn registry_with_custom_kinds() -> Arc<StageRegistry> {
        let mut registry = StageRegistry::with_builtins();
        registry.register(
            StageKind::new("no_preroll")
                .template(PortTemplate::always("sink", PortDirection::Sink, FormatTemplate::Any))
                .factory(no_preroll),
        );
        registry.register(
            StageKind::new("count_teardown")
                .template(PortTemplate::always("sink", PortDirection::Sink, FormatTemplate::Any))
                .factory(count_teardown),
        );
        Arc::new(registry)
    }

    #[test]
    fn test_refusal_on_later_step_tears_down() {
        let mut graph = PipelineGraph::with_registry("preroll", registry_with_custom_kinds());
        graph.create_stage("queue", "q", StageConfig::new()).unwrap();
        graph.create_stage("no_preroll", "stuck", StageConfig::new()).unwrap();
        graph.link(&["q", "stuck"]).unwrap();

        let err = graph.request_state(PipelineState::Paused).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StateTransition { ref stage, from: PipelineState::Ready, .. } if stage == "stuck"
        ));
        assert_eq!(graph.state(), PipelineState::Null);
        assert!(graph.stages().all(|n| n.state() == PipelineState::Null));
    }

    #[test]
    fn test_late_stages_catch_up() {
        let mut graph = PipelineGraph::new("late");
        graph.create_stage("queue", "a", StageConfig::new()).unwrap();
        graph.set_state(PipelineState::Paused).unwrap();

        graph.create_stage("queue", "late", StageConfig::new()).unwrap();
        assert_eq!(graph.lookup("late").unwrap().state(), PipelineState::Null);
        graph.set_state(PipelineState::Playing).unwrap();
        assert_eq!(graph.lookup("late").unwrap().state(), PipelineState::Playing);

        // asking for the current state still syncs newcomers
        graph.create_stage("queue", "later", StageConfig::new()).unwrap();
        graph.set_state(PipelineState::Playing).unwrap();
        assert!(graph.stages().all(|n| n.state() == PipelineState::Playing));

        graph.shutdown();
        assert!(graph.stages().all(|n| n.state() == PipelineState::Null));
    }

    #[test]
    fn test_dropping_graph_tears_down() {
        {
            let mut graph = PipelineGraph::with_registry("dropped", registry_with_custom_kinds());
            graph.create_stage("count_teardown", "end", StageConfig::new()).unwrap();
            graph.set_state(PipelineState::Playing).unwrap();
            assert_eq!(TEARDOWNS.load(Ordering::SeqCst), 0);
        }
        assert_eq!(TEARDOWNS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_completes_after_warning() {
        let mut graph = filesink_graph();
        let mut messages = VecDeque::from([Message::warning("late frame"), Message::EndOfStream]);
        let outcome = graph.run_until_terminal(&mut messages);
        assert_eq!(outcome, RunOutcome::completed());
        assert!(messages.is_empty());
    }

    #[test]
    fn test_run_fails_on_error() {
        let mut graph = filesink_graph();
        graph.set_state(PipelineState::Playing).unwrap();
        let mut messages = VecDeque::from([
            Message::error("decode failure"),
            Message::EndOfStream,
        ]);
        let outcome = graph.run_until_terminal(&mut messages);
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("decode failure"));
        // the end-of-stream after the error is never read
        assert_eq!(messages.len(), 1);
        assert_eq!(graph.state(), PipelineState::Null);
        assert!(graph.stages().all(|n| n.state() == PipelineState::Null));
    }

    #[test]
    fn test_run_fails_when_source_closes() {
        let mut graph = filesink_graph();
        let mut messages = VecDeque::new();
        let outcome = graph.run_until_terminal(&mut messages);
        assert!(outcome.is_failed());
        assert_eq!(
            outcome.error.as_deref(),
            Some("message source closed before end-of-stream")
        );
    }

    #[test]
    fn test_interrupt_tears_down() {
        let mut graph = filesink_graph();
        graph.set_state(PipelineState::Playing).unwrap();

        let bus = graph.bus();
        let mut rx = graph.take_bus_receiver().unwrap();
        assert!(graph.take_bus_receiver().is_none());
        bus.interrupt();

        let outcome = graph.run_until_terminal(&mut rx);
        assert_eq!(outcome.status, RunStatus::Interrupted);
        assert_eq!(graph.state(), PipelineState::Null);
        assert!(graph.stages().all(|n| n.state() == PipelineState::Null));
    }

    struct Recorder(Arc<Mutex<Vec<PortRef>>>);

    impl PortAddedHandler for Recorder {
        fn on_new_port(&mut self, graph: &mut PipelineGraph, port: &PortRef) {
            assert!(graph.port(port).is_ok());
            self.0.lock().unwrap().push(port.clone());
        }
    }

    #[test]
    fn test_port_added_reaches_handler() {
        let mut graph = PipelineGraph::new("dynamic");
        graph
            .create_stage("uridecodebin", "dec", StageConfig::new().with("uri", "file:///in.mp4"))
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        graph
            .connect_port_added("dec", Box::new(Recorder(Arc::clone(&seen))))
            .unwrap();
        assert!(graph.connect_port_added("ghost", Box::new(Recorder(Arc::clone(&seen)))).is_err());

        let port = PortRef::new("dec", "src_0");
        let mut messages = VecDeque::from([
            Message::PortAdded {
                port: port.clone(),
                format: MediaFormat::new("video/x-raw"),
            },
            Message::EndOfStream,
        ]);
        assert_eq!(graph.run_until_terminal(&mut messages), RunOutcome::completed());
        assert_eq!(seen.lock().unwrap().as_slice(), &[port.clone()]);
        assert_eq!(
            graph.port(&port).unwrap().query_format().map(|f| f.media_type()),
            Some("video/x-raw")
        );
    }

    #[test]
    fn test_subgraph_behaves_as_stage() {
        let mut graph = PipelineGraph::new("outer");
        let mut sub = graph.new_subgraph("blurrer");
        sub.create_stage("nvvideoconvert", "conv", StageConfig::new()).unwrap();
        sub.create_stage(
            "capsfilter",
            "caps",
            StageConfig::new().with("caps", "video/x-raw(memory:NVMM), format=RGBA"),
        )
        .unwrap();
        sub.link(&["conv", "caps"]).unwrap();

        graph.create_stage("queue", "in", StageConfig::new()).unwrap();
        graph
            .create_subgraph(sub, &PortRef::new("conv", "sink"), &PortRef::new("caps", "src"))
            .unwrap();
        graph.create_stage("queue", "out", StageConfig::new()).unwrap();
        graph.link(&["in", "blurrer", "out"]).unwrap();

        assert_eq!(graph.links().len(), 2);
        let out_sink = graph.port(&PortRef::new("out", "sink")).unwrap();
        assert_eq!(out_sink.format().and_then(|f| f.field("format")), Some("RGBA"));

        graph.set_state(PipelineState::Playing).unwrap();
        let Node::SubGraph(sub) = graph.lookup("blurrer").unwrap() else {
            panic!("blurrer is not a sub-graph");
        };
        assert!(sub.stages().all(|n| n.state() == PipelineState::Playing));
        graph.shutdown();
        assert_eq!(graph.lookup("blurrer").unwrap().state(), PipelineState::Null);
    }
}
