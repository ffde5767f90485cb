//! Stage kinds known to the backend
//!
//! A [`StageKind`] describes what a kind accepts (property schema), which
//! ports it offers (templates) and how to build its opaque behaviour.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::pipeline::port::{PortDirection, Presence};
use crate::pipeline::stage::{RequireProperty, StageImpl};
use crate::pipeline::state::StateChange;
use crate::pipeline::types::{ConfigValue, FormatTemplate, MediaFormat, StageConfig};

/// Type expected for a configuration key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Bool,
    Int,
    Float,
    Str,
    /// A caps string or a parsed format
    Caps,
    Profile,
}

impl PropertyType {
    /// Check a value, converting where the conversion is lossless
    pub(crate) fn coerce(self, value: ConfigValue) -> Result<ConfigValue, ConfigValue> {
        match (self, value) {
            (PropertyType::Bool, v @ ConfigValue::Bool(_)) => Ok(v),
            (PropertyType::Int, v @ ConfigValue::Int(_)) => Ok(v),
            (PropertyType::Float, v @ ConfigValue::Float(_)) => Ok(v),
            (PropertyType::Float, ConfigValue::Int(i)) => Ok(ConfigValue::Float(i as f64)),
            (PropertyType::Str, v @ ConfigValue::Str(_)) => Ok(v),
            (PropertyType::Caps, v @ ConfigValue::Caps(_)) => Ok(v),
            (PropertyType::Caps, ConfigValue::Str(s)) => match MediaFormat::parse(&s) {
                Ok(format) => Ok(ConfigValue::Caps(format)),
                Err(_) => Err(ConfigValue::Str(s)),
            },
            (PropertyType::Profile, v @ ConfigValue::Profile(_)) => Ok(v),
            (_, v) => Err(v),
        }
    }
}

/// Port offered by a stage kind
///
/// For request and sometimes ports the name may contain `%u`, which is
/// replaced by the lowest free index.
#[derive(Debug, Clone)]
pub struct PortTemplate {
    pub name: String,
    pub direction: PortDirection,
    pub presence: Presence,
    pub format: FormatTemplate,
    /// Upper bound on simultaneously existing ports from this template
    pub limit: Option<PortLimit>,
}

/// Bound on the number of ports a request template hands out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortLimit {
    Fixed(usize),
    /// Read from an integer property, with a default when unset
    Property { key: String, default: usize },
}

impl PortLimit {
    pub fn resolve(&self, config: &StageConfig) -> usize {
        match self {
            PortLimit::Fixed(n) => *n,
            PortLimit::Property { key, default } => config
                .get_int(key)
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(*default),
        }
    }
}

impl PortTemplate {
    pub fn always(name: &str, direction: PortDirection, format: FormatTemplate) -> Self {
        Self {
            name: name.to_string(),
            direction,
            presence: Presence::Always,
            format,
            limit: None,
        }
    }

    pub fn sometimes(name: &str, direction: PortDirection, format: FormatTemplate) -> Self {
        Self {
            presence: Presence::Sometimes,
            ..Self::always(name, direction, format)
        }
    }

    pub fn request(name: &str, direction: PortDirection, format: FormatTemplate) -> Self {
        Self {
            presence: Presence::Request,
            ..Self::always(name, direction, format)
        }
    }

    pub fn limited_by(mut self, limit: PortLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `port_name` could have been produced by this template
    pub fn matches(&self, port_name: &str) -> bool {
        match self.name.split_once("%u") {
            Some((prefix, suffix)) => port_name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
                .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())),
            None => self.name == port_name,
        }
    }

    /// Concrete port name for the given index
    pub fn instantiate(&self, index: usize) -> String {
        self.name.replacen("%u", &index.to_string(), 1)
    }
}

/// Builds the behaviour of a stage from its validated configuration
pub type StageFactory = fn(&StageConfig) -> Box<dyn StageImpl>;

/// Description of a stage kind
#[derive(Clone)]
pub struct StageKind {
    pub name: String,
    pub properties: Vec<(String, PropertyType)>,
    pub templates: Vec<PortTemplate>,
    pub factory: StageFactory,
}

fn passthrough(_: &StageConfig) -> Box<dyn StageImpl> {
    Box::new(Passthrough)
}

fn require_location(_: &StageConfig) -> Box<dyn StageImpl> {
    Box::new(RequireProperty::new("location"))
}

fn require_uri(_: &StageConfig) -> Box<dyn StageImpl> {
    Box::new(RequireProperty::new("uri"))
}

fn require_config_file(_: &StageConfig) -> Box<dyn StageImpl> {
    Box::new(RequireProperty::new("config-file-path"))
}

/// Behaviour that accepts every state change
pub struct Passthrough;

impl StageImpl for Passthrough {
    fn change_state(&mut self, _: StateChange, _: &StageConfig) -> Result<(), String> {
        Ok(())
    }
}

impl StageKind {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            properties: Vec::new(),
            templates: Vec::new(),
            factory: passthrough,
        }
    }

    pub fn property(mut self, key: &str, ty: PropertyType) -> Self {
        self.properties.push((key.to_string(), ty));
        self
    }

    pub fn template(mut self, template: PortTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn factory(mut self, factory: StageFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn property_type(&self, key: &str) -> Option<PropertyType> {
        self.properties
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, ty)| *ty)
    }

    /// Template whose name pattern covers `port_name`
    pub fn template_for(&self, port_name: &str) -> Option<&PortTemplate> {
        self.templates.iter().find(|t| t.matches(port_name))
    }

    /// Source and sink passthrough pair, the shape of most filters
    fn filter(name: &str, sink: FormatTemplate, src: FormatTemplate) -> Self {
        Self::new(name)
            .template(PortTemplate::always("sink", PortDirection::Sink, sink))
            .template(PortTemplate::always("src", PortDirection::Source, src))
    }
}

impl std::fmt::Debug for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageKind")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("templates", &self.templates)
            .finish()
    }
}

/// Kind name → description lookup
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    kinds: HashMap<String, StageKind>,
}

static BUILTIN: Lazy<Arc<StageRegistry>> = Lazy::new(|| Arc::new(StageRegistry::with_builtins()));

impl StageRegistry {
    /// Registry without any kind
    pub fn empty() -> Self {
        Self::default()
    }

    /// Shared registry of the built-in kinds
    pub fn builtin() -> Arc<StageRegistry> {
        Arc::clone(&BUILTIN)
    }

    pub fn register(&mut self, kind: StageKind) {
        self.kinds.insert(kind.name.clone(), kind);
    }

    pub fn get(&self, kind: &str) -> Option<&StageKind> {
        self.kinds.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Registry holding the stages of the redaction deployment
    pub fn with_builtins() -> Self {
        use PortDirection::{Sink, Source};
        use PropertyType::*;

        let nvmm = || FormatTemplate::Fixed(MediaFormat::new("video/x-raw").with_feature("memory:NVMM"));
        let raw = || FormatTemplate::media("video/x-raw");
        let h264 = || FormatTemplate::media("video/x-h264");
        let any = || FormatTemplate::Any;

        let mut registry = Self::empty();

        registry.register(
            StageKind::new("filesrc")
                .property("location", Str)
                .template(PortTemplate::always("src", Source, any()))
                .factory(require_location),
        );
        registry.register(
            StageKind::new("uridecodebin")
                .property("uri", Str)
                .template(PortTemplate::sometimes("src_%u", Source, any()))
                .factory(require_uri),
        );
        registry.register(StageKind::filter("h264parse", h264(), h264()).property("config-interval", Int));
        registry.register(StageKind::filter("nvv4l2decoder", h264(), nvmm()));
        registry.register(
            StageKind::new("nvstreammux")
                .property("width", Int)
                .property("height", Int)
                .property("batch-size", Int)
                .property("batched-push-timeout", Int)
                .property("live-source", Int)
                .template(
                    PortTemplate::request("sink_%u", Sink, nvmm()).limited_by(PortLimit::Property {
                        key: "batch-size".to_string(),
                        default: 1,
                    }),
                )
                .template(PortTemplate::always("src", Source, nvmm())),
        );
        registry.register(
            StageKind::filter("nvinfer", nvmm(), nvmm())
                .property("config-file-path", Str)
                .property("batch-size", Int)
                .property("unique-id", Int)
                .factory(require_config_file),
        );
        registry.register(
            StageKind::filter("nvvideoconvert", any(), any())
                .property("copy-hw", Int)
                .property("compute-hw", Int),
        );
        registry.register(StageKind::filter("capsfilter", any(), any()).property("caps", Caps));
        registry.register(
            StageKind::filter("nvdsosd", nvmm(), nvmm())
                .property("process-mode", Int)
                .property("display-text", Bool),
        );
        registry.register(
            StageKind::filter("x264enc", raw(), h264())
                .property("speed-preset", Str)
                .property("bitrate", Int)
                .property("pass", Str)
                .property("quantizer", Int),
        );
        for muxer in ["qtmux", "mp4mux"] {
            registry.register(
                StageKind::new(muxer)
                    .property("faststart", Bool)
                    .template(PortTemplate::request("video_%u", Sink, h264()))
                    .template(PortTemplate::always(
                        "src",
                        Source,
                        FormatTemplate::media("video/quicktime"),
                    )),
            );
        }
        registry.register(StageKind::filter("encodebin", any(), any()).property("profile", Profile));
        registry.register(
            StageKind::new("filesink")
                .property("location", Str)
                .property("sync", Bool)
                .template(PortTemplate::always("sink", Sink, any()))
                .factory(require_location),
        );
        registry.register(
            StageKind::filter("queue", any(), any())
                .property("max-size-buffers", Int)
                .property("leaky", Str),
        );

        registry
    }
}
