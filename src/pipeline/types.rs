//! Core types for the pipeline system

use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};

/// Kind of media carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video frame data
    Video,
    /// Audio sample data
    Audio,
    /// Containers, subtitles and anything else
    Other,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
            MediaKind::Other => write!(f, "Other"),
        }
    }
}

/// A concrete or template media format, written as a caps string
///
/// `video/x-raw(memory:NVMM), format=RGBA` has media type `video/x-raw`,
/// memory feature `memory:NVMM` and one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaFormat {
    media_type: String,
    feature: Option<String>,
    fields: BTreeMap<String, String>,
}

impl MediaFormat {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            feature: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Parse a caps string such as `video/x-raw(memory:NVMM), format=RGBA`
    pub fn parse(caps: &str) -> Result<Self> {
        let invalid = |why: &str| PipelineError::InvalidConfig(format!("caps '{}': {}", caps, why));

        let mut parts = caps.split(',').map(str::trim);
        let head = parts.next().filter(|h| !h.is_empty()).ok_or_else(|| invalid("empty"))?;

        let (media_type, feature) = match head.split_once('(') {
            Some((media_type, rest)) => {
                let feature = rest
                    .strip_suffix(')')
                    .ok_or_else(|| invalid("unterminated memory feature"))?;
                (media_type.trim(), Some(feature.trim().to_string()))
            }
            None => (head, None),
        };

        if !media_type.contains('/') {
            return Err(invalid("media type must look like 'category/name'"));
        }

        let mut format = MediaFormat {
            media_type: media_type.to_string(),
            feature,
            fields: BTreeMap::new(),
        };

        for part in parts.filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid("field without '='"))?;
            // drop an optional "(string)" style type annotation
            let value = value.trim();
            let value = match value.strip_prefix('(').and_then(|v| v.split_once(')')) {
                Some((_, v)) => v.trim(),
                None => value,
            };
            format.fields.insert(key.trim().to_string(), value.to_string());
        }

        Ok(format)
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn feature(&self) -> Option<&str> {
        self.feature.as_deref()
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Top-level category of the media type
    pub fn kind(&self) -> MediaKind {
        match self.media_type.split('/').next() {
            Some("video") => MediaKind::Video,
            Some("audio") => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }

    /// Common format of two formats, if any
    ///
    /// Media types and memory features must match and every field present in
    /// both must agree. The result carries the union of the fields.
    pub fn intersect(&self, other: &MediaFormat) -> Option<MediaFormat> {
        if self.media_type != other.media_type || self.feature != other.feature {
            return None;
        }

        let mut fields = self.fields.clone();
        for (key, value) in &other.fields {
            match fields.get(key) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }

        Some(MediaFormat {
            media_type: self.media_type.clone(),
            feature: self.feature.clone(),
            fields,
        })
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.media_type)?;
        if let Some(feature) = &self.feature {
            write!(f, "({})", feature)?;
        }
        for (key, value) in &self.fields {
            write!(f, ", {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Format accepted by a port: anything, or a specific format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatTemplate {
    Any,
    Fixed(MediaFormat),
}

impl FormatTemplate {
    /// Template accepting any format of the given media type
    pub fn media(media_type: &str) -> Self {
        FormatTemplate::Fixed(MediaFormat::new(media_type))
    }

    /// Narrow two templates to their common one
    pub fn intersect(&self, other: &FormatTemplate) -> Option<FormatTemplate> {
        match (self, other) {
            (FormatTemplate::Any, t) | (t, FormatTemplate::Any) => Some(t.clone()),
            (FormatTemplate::Fixed(a), FormatTemplate::Fixed(b)) => {
                a.intersect(b).map(FormatTemplate::Fixed)
            }
        }
    }

    pub fn as_format(&self) -> Option<&MediaFormat> {
        match self {
            FormatTemplate::Any => None,
            FormatTemplate::Fixed(format) => Some(format),
        }
    }
}

impl std::fmt::Display for FormatTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatTemplate::Any => write!(f, "ANY"),
            FormatTemplate::Fixed(format) => write!(f, "{}", format),
        }
    }
}

/// One elementary stream inside an encoding profile
#[derive(Debug, Clone, PartialEq)]
pub struct StreamProfile {
    pub format: MediaFormat,
    pub variable_framerate: bool,
}

/// Container + codec description handed to an encoding stage
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingProfile {
    pub name: String,
    pub description: String,
    pub container: MediaFormat,
    pub streams: Vec<StreamProfile>,
}

impl EncodingProfile {
    /// QuickTime/MP4 container with a variable-framerate H.264 stream
    pub fn mp4_h264() -> Self {
        Self {
            name: "mp4_profile".to_string(),
            description: "Redactline Output".to_string(),
            container: MediaFormat::new("video/quicktime"),
            streams: vec![StreamProfile {
                format: MediaFormat::new("video/x-h264"),
                variable_framerate: true,
            }],
        }
    }
}

/// Value of a single stage configuration key
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Caps(MediaFormat),
    Profile(EncodingProfile),
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Int(_) => "int",
            ConfigValue::Float(_) => "float",
            ConfigValue::Str(_) => "string",
            ConfigValue::Caps(_) => "caps",
            ConfigValue::Profile(_) => "profile",
        }
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "{}", v),
            ConfigValue::Int(v) => write!(f, "{}", v),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Str(v) => write!(f, "\"{}\"", v),
            ConfigValue::Caps(v) => write!(f, "{}", v),
            ConfigValue::Profile(v) => write!(f, "<profile {}>", v.name),
        }
    }
}

macro_rules! config_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for ConfigValue {
            fn from(value: $ty) -> Self {
                ConfigValue::$variant(value.into())
            }
        })*
    };
}

config_value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    &str => Str,
    String => Str,
    MediaFormat => Caps,
    EncodingProfile => Profile,
}

/// Flat key → value configuration used at stage creation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl StageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ConfigValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ConfigValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn insert_value(&mut self, key: String, value: ConfigValue) {
        self.values.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_caps_with_feature() {
        let caps = MediaFormat::parse("video/x-raw(memory:NVMM), format=RGBA").unwrap();
        assert_eq!(caps.media_type(), "video/x-raw");
        assert_eq!(caps.feature(), Some("memory:NVMM"));
        assert_eq!(caps.field("format"), Some("RGBA"));
        assert_eq!(caps.kind(), MediaKind::Video);
        assert_eq!(caps.to_string(), "video/x-raw(memory:NVMM), format=RGBA");
    }

    #[test]
    fn test_parse_typed_field() {
        let caps = MediaFormat::parse("audio/x-raw, format=(string)S16LE, rate=48000").unwrap();
        assert_eq!(caps.kind(), MediaKind::Audio);
        assert_eq!(caps.field("format"), Some("S16LE"));
        assert_eq!(caps.field("rate"), Some("48000"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MediaFormat::parse("").is_err());
        assert!(MediaFormat::parse("rgba").is_err());
        assert!(MediaFormat::parse("video/x-raw(memory:NVMM").is_err());
        assert!(MediaFormat::parse("video/x-raw, format").is_err());
    }

    #[test]
    fn test_intersect() {
        let any_raw = MediaFormat::new("video/x-raw");
        let rgba = MediaFormat::new("video/x-raw").with_field("format", "RGBA");
        let nv12 = MediaFormat::new("video/x-raw").with_field("format", "NV12");
        let nvmm = MediaFormat::new("video/x-raw").with_feature("memory:NVMM");

        assert_eq!(any_raw.intersect(&rgba), Some(rgba.clone()));
        assert_eq!(rgba.intersect(&nv12), None);
        assert_eq!(any_raw.intersect(&nvmm), None);
        assert_eq!(any_raw.intersect(&MediaFormat::new("audio/x-raw")), None);
    }

    #[test]
    fn test_template_intersect_any() {
        let h264 = FormatTemplate::media("video/x-h264");
        assert_eq!(FormatTemplate::Any.intersect(&h264), Some(h264.clone()));
        assert_eq!(
            h264.intersect(&FormatTemplate::media("video/x-raw")),
            None
        );
    }

    #[test]
    fn test_stage_config_accessors() {
        let config = StageConfig::new()
            .with("width", 1920)
            .with("location", "/tmp/out.mp4")
            .with("sync", false);
        assert_eq!(config.get_int("width"), Some(1920));
        assert_eq!(config.get_str("location"), Some("/tmp/out.mp4"));
        assert_eq!(config.get("sync"), Some(&ConfigValue::Bool(false)));
        assert_eq!(config.get_str("width"), None);
    }
}
