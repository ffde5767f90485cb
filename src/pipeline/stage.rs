//! Pipeline stage and its pluggable behaviour
//!
//! A stage is opaque to the graph beyond its name, its ports and whether it
//! accepts a state change. What it does with data is up to the [`StageImpl`].

use log::debug;

use crate::error::{PipelineError, Result};
use crate::pipeline::port::{Port, PortDirection, Presence};
use crate::pipeline::registry::StageKind;
use crate::pipeline::state::{PipelineState, StateChange};
use crate::pipeline::types::{ConfigValue, FormatTemplate, MediaFormat, StageConfig};

/// Behaviour behind a stage
pub trait StageImpl: Send {
    /// Acknowledge or refuse one adjacent state step
    ///
    /// Refusals of downward steps are logged by the graph and ignored, so
    /// teardown always completes.
    fn change_state(&mut self, change: StateChange, config: &StageConfig) -> Result<(), String>;
}

/// Refuses to leave `Null` until a string property is set
pub struct RequireProperty {
    key: &'static str,
}

impl RequireProperty {
    pub fn new(key: &'static str) -> Self {
        Self { key }
    }
}

impl StageImpl for RequireProperty {
    fn change_state(&mut self, change: StateChange, config: &StageConfig) -> Result<(), String> {
        if change.from == PipelineState::Null && change.is_upward() {
            match config.get_str(self.key) {
                Some(value) if !value.trim().is_empty() => {}
                _ => return Err(format!("property '{}' is not set", self.key)),
            }
        }
        Ok(())
    }
}

/// A named processing unit with ports
pub struct Stage {
    name: String,
    kind: StageKind,
    config: StageConfig,
    ports: Vec<Port>,
    state: PipelineState,
    imp: Box<dyn StageImpl>,
}

impl Stage {
    /// Validate `config` against the kind's schema and build the stage
    pub(crate) fn build(kind: &StageKind, name: &str, config: StageConfig) -> Result<Self> {
        let creation_error = |reason: String| PipelineError::StageCreation {
            kind: kind.name.clone(),
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(creation_error("empty stage name".to_string()));
        }

        let mut validated = StageConfig::new();
        for (key, value) in config.iter() {
            let ty = kind
                .property_type(key)
                .ok_or_else(|| creation_error(format!("unknown property '{}'", key)))?;
            let value = ty.coerce(value.clone()).map_err(|value| {
                creation_error(format!(
                    "property '{}' expects {:?}, got {} {}",
                    key,
                    ty,
                    value.type_name(),
                    value
                ))
            })?;
            validated.insert_value(key.to_string(), value);
        }

        // a "caps" property narrows every static port to that format
        let narrowed = match validated.get("caps") {
            Some(ConfigValue::Caps(format)) => Some(format.clone()),
            _ => None,
        };

        let ports = kind
            .templates
            .iter()
            .filter(|t| t.presence == Presence::Always)
            .map(|t| {
                let template = match &narrowed {
                    Some(format) => FormatTemplate::Fixed(format.clone()),
                    None => t.format.clone(),
                };
                Port::new(t.name.clone(), t.direction, t.presence, template)
            })
            .collect();

        let imp = (kind.factory)(&validated);

        debug!("Created stage '{}' ({})", name, kind.name);

        Ok(Self {
            name: name.to_string(),
            kind: kind.clone(),
            config: validated,
            ports,
            state: PipelineState::Null,
            imp,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind.name
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name() == name)
    }

    pub(crate) fn port_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.name() == name)
    }

    /// Create a port from a request template
    ///
    /// `template` is either the pattern (`sink_%u`) or a concrete name it
    /// covers (`sink_0`). Fails when the template is unknown, the concrete
    /// name is taken, or the template's limit is reached.
    pub(crate) fn request_port(&mut self, template: &str) -> Result<String> {
        let unavailable = || PipelineError::PortUnavailable {
            stage: self.name.clone(),
            template: template.to_string(),
        };

        let tmpl = self
            .kind
            .templates
            .iter()
            .find(|t| t.presence == Presence::Request && (t.name == template || t.matches(template)))
            .ok_or_else(unavailable)?;

        let existing = self.ports.iter().filter(|p| tmpl.matches(p.name())).count();
        if let Some(limit) = &tmpl.limit
            && existing >= limit.resolve(&self.config)
        {
            return Err(unavailable());
        }

        let name = if tmpl.name == template {
            (0..)
                .map(|i| tmpl.instantiate(i))
                .find(|candidate| self.port(candidate).is_none())
                .ok_or_else(unavailable)?
        } else if self.port(template).is_some() {
            return Err(unavailable());
        } else {
            template.to_string()
        };

        self.ports.push(Port::new(
            name.clone(),
            tmpl.direction,
            Presence::Request,
            tmpl.format.clone(),
        ));
        Ok(name)
    }

    /// Drop an unlinked request port; returns whether one was removed
    pub(crate) fn release_port(&mut self, name: &str) -> bool {
        let before = self.ports.len();
        self.ports
            .retain(|p| !(p.name() == name && p.presence() == Presence::Request && !p.is_linked()));
        self.ports.len() != before
    }

    /// Expose a port discovered while streaming
    ///
    /// Announcing the same port twice returns the existing one.
    pub(crate) fn add_dynamic_port(&mut self, name: &str, format: MediaFormat) -> Result<&Port> {
        if let Some(index) = self.ports.iter().position(|p| p.name() == name) {
            return Ok(&self.ports[index]);
        }

        let template = self
            .kind
            .templates
            .iter()
            .find(|t| t.presence == Presence::Sometimes && t.matches(name))
            .ok_or_else(|| PipelineError::NotFound(format!("{}.{}", self.name, name)))?;

        let mut port = Port::new(name, template.direction, Presence::Sometimes, template.format.clone());
        port.set_format(Some(format));
        self.ports.push(port);
        Ok(&self.ports[self.ports.len() - 1])
    }

    /// First unlinked port created with the stage in the given direction
    pub(crate) fn free_static_port(&self, direction: PortDirection) -> Option<&Port> {
        self.ports
            .iter()
            .find(|p| p.direction() == direction && p.presence() == Presence::Always && !p.is_linked())
    }

    /// Request templates in the given direction
    pub(crate) fn request_templates(&self, direction: PortDirection) -> Vec<(String, FormatTemplate)> {
        self.kind
            .templates
            .iter()
            .filter(|t| t.presence == Presence::Request && t.direction == direction)
            .map(|t| (t.name.clone(), t.format.clone()))
            .collect()
    }

    /// Run one state step through the behaviour
    ///
    /// Downward steps always land, even when the behaviour complains.
    pub(crate) fn change_state(&mut self, change: StateChange) -> Result<(), String> {
        let result = self.imp.change_state(change, &self.config);
        if result.is_ok() || !change.is_upward() {
            self.state = change.to;
        }
        result
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("kind", &self.kind.name)
            .field("state", &self.state)
            .field("ports", &self.ports)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::registry::StageRegistry;

    fn build(kind: &str, name: &str, config: StageConfig) -> Result<Stage> {
        let registry = StageRegistry::builtin();
        Stage::build(registry.get(kind).unwrap(), name, config)
    }

    #[test]
    fn test_unknown_property_fails() {
        let err = build("queue", "q", StageConfig::new().with("colour", "blue")).unwrap_err();
        assert!(matches!(err, PipelineError::StageCreation { .. }));
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_wrong_type_fails() {
        let err = build("nvstreammux", "mux", StageConfig::new().with("width", "wide")).unwrap_err();
        assert!(err.to_string().contains("width"));
    }

    #[test]
    fn test_static_ports_created() {
        let stage = build("nvinfer", "pgie", StageConfig::new()).unwrap();
        assert!(stage.port("sink").is_some());
        assert!(stage.port("src").is_some());
        assert!(stage.ports().all(|p| !p.is_dynamic()));
    }

    #[test]
    fn test_caps_narrow_ports() {
        let stage = build(
            "capsfilter",
            "caps",
            StageConfig::new().with("caps", "video/x-raw(memory:NVMM), format=RGBA"),
        )
        .unwrap();
        let src = stage.port("src").unwrap();
        assert_eq!(src.query_format().and_then(|f| f.field("format")), Some("RGBA"));
    }

    #[test]
    fn test_request_ports_respect_limit() {
        let mut mux = build("nvstreammux", "mux", StageConfig::new().with("batch-size", 2)).unwrap();
        assert_eq!(mux.request_port("sink_%u").unwrap(), "sink_0");
        assert_eq!(mux.request_port("sink_%u").unwrap(), "sink_1");
        assert!(matches!(
            mux.request_port("sink_%u"),
            Err(PipelineError::PortUnavailable { .. })
        ));

        assert!(mux.release_port("sink_0"));
        assert_eq!(mux.request_port("sink_0").unwrap(), "sink_0");
    }

    #[test]
    fn test_dynamic_port_is_idempotent() {
        let mut decoder = build("uridecodebin", "dec", StageConfig::new()).unwrap();
        let video = MediaFormat::new("video/x-raw");
        decoder.add_dynamic_port("src_0", video.clone()).unwrap();
        decoder.add_dynamic_port("src_0", video).unwrap();
        assert_eq!(decoder.ports().count(), 1);
        assert!(decoder.add_dynamic_port("sink_0", MediaFormat::new("video/x-raw")).is_err());
    }

    #[test]
    fn test_require_property() {
        let mut sink = build("filesink", "sink", StageConfig::new()).unwrap();
        let up = StateChange {
            from: PipelineState::Null,
            to: PipelineState::Ready,
        };
        assert!(sink.change_state(up).is_err());
        assert_eq!(sink.state(), PipelineState::Null);

        let mut sink = build("filesink", "sink", StageConfig::new().with("location", "/tmp/o.mp4")).unwrap();
        assert!(sink.change_state(up).is_ok());
        assert_eq!(sink.state(), PipelineState::Ready);
    }
}
