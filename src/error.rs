//! Error types for graph assembly and lifecycle control

use thiserror::Error;

use crate::buffer::PixelFormat;
use crate::pipeline::port::PortRef;
use crate::pipeline::state::PipelineState;

/// Reason a single port-to-port link was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFailure {
    /// Both ends are sources or both are sinks.
    WrongDirection,
    /// One of the ports already has a peer.
    WasLinked,
    /// The formats accepted by the two ports do not intersect.
    NoFormat,
    /// The stage has no free port of the required direction.
    NoPort,
}

impl std::fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LinkFailure::WrongDirection => "wrong direction",
            LinkFailure::WasLinked => "already linked",
            LinkFailure::NoFormat => "incompatible formats",
            LinkFailure::NoPort => "no free port",
        };
        f.write_str(text)
    }
}

/// Assembly and lifecycle errors.
///
/// All of these are fatal for graph construction: the caller is expected to
/// fix the topology rather than retry.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Could not create stage '{name}' of kind '{kind}': {reason}")]
    StageCreation {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Failed to link {from} → {to}: {reason}")]
    Link {
        from: String,
        to: String,
        reason: LinkFailure,
    },

    #[error("No stage or port named '{0}'")]
    NotFound(String),

    #[error("Stage '{stage}' has no free '{template}' port")]
    PortUnavailable { stage: String, template: String },

    #[error("Stage '{stage}' refused {from} → {to}: {reason}")]
    StateTransition {
        stage: String,
        from: PipelineState,
        to: PipelineState,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    pub(crate) fn link(from: &PortRef, to: &PortRef, reason: LinkFailure) -> Self {
        PipelineError::Link {
            from: from.to_string(),
            to: to.to_string(),
            reason,
        }
    }
}

/// Problems scoped to a single frame
///
/// These never abort a run: the frame is passed on untouched.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("frame {frame_num}: no surface in batch slot {batch_id}")]
    MissingSurface { frame_num: u64, batch_id: usize },

    #[error("frame {frame_num}: surface is {actual:?}, metadata says {expected:?}")]
    SurfaceMismatch {
        frame_num: u64,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("frame {frame_num}: cannot blur {format:?} pixels")]
    UnsupportedPixelFormat { frame_num: u64, format: PixelFormat },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
