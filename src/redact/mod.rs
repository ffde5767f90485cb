//! Redaction of detected objects
//!
//! [`RedactionEngine`] turns the detector boxes of each frame into clamped
//! regions and hides them, either by blurring the pixels or by attaching
//! opaque overlays. [`blurring_subgraph`] packages it as a composite stage.

pub mod blur;
pub mod engine;
pub mod overlay;
pub mod region;

pub use blur::{blur_region, BlurKernel, KernelSize, DEFAULT_KERNEL_SIZE};
pub use engine::{FrameReport, RedactConfig, RedactStrategy, RedactionEngine, DEFAULT_CLASSES};
pub use overlay::{opaque_fill, render_overlays};
pub use region::RedactionRegion;

use log::info;

use crate::error::Result;
use crate::pipeline::{PipelineGraph, PortRef, StageConfig, StageRef, BOUNDARY_SOURCE};

/// Caps the blurring stage hands its probe: packed RGBA in device memory
pub const BLUR_INPUT_CAPS: &str = "video/x-raw(memory:NVMM), format=RGBA";

/// Add a composite stage `name` that converts frames to RGBA and runs
/// `engine` on every buffer leaving it
///
/// Inside is `nvvideoconvert → capsfilter`; the boundary sink is the
/// converter's input and the boundary source the filter's output.
pub fn blurring_subgraph(graph: &mut PipelineGraph, name: &str, engine: RedactionEngine) -> Result<StageRef> {
    let convert = format!("{}_convert", name);
    let caps = format!("{}_caps", name);

    let mut sub = graph.new_subgraph(name);
    sub.create_stage("nvvideoconvert", &convert, StageConfig::new())?;
    sub.create_stage("capsfilter", &caps, StageConfig::new().with("caps", BLUR_INPUT_CAPS))?;
    sub.link(&[&convert, &caps])?;

    let stage = graph.create_subgraph(sub, &PortRef::new(&convert, "sink"), &PortRef::new(&caps, "src"))?;
    graph.add_probe(&stage.port(BOUNDARY_SOURCE), Box::new(engine))?;
    info!("Blurring stage '{}' ready", name);
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BatchMeta, Buffer, FrameMeta, ObjectMeta, RectParams, Surface};
    use crate::pipeline::{Node, ProbeReturn};

    #[test]
    fn test_subgraph_runs_engine_on_boundary_source() {
        let mut graph = PipelineGraph::new("redact");
        let engine = RedactionEngine::new(RedactConfig {
            strategy: RedactStrategy::Fill,
            ..RedactConfig::default()
        });
        let health = engine.health().clone();
        let stage = blurring_subgraph(&mut graph, "blurrer", engine).unwrap();

        let Node::SubGraph(sub) = graph.lookup("blurrer").unwrap() else {
            panic!("blurrer is not a sub-graph");
        };
        assert!(sub.is_complete());
        assert_eq!(sub.stages().count(), 2);
        assert_eq!(
            sub.boundary_target(BOUNDARY_SOURCE),
            Some(&PortRef::new("blurrer_caps", "src"))
        );

        let frame = FrameMeta::new(0, 32, 32).with_objects(vec![ObjectMeta::new(
            1,
            0.7,
            RectParams::new(4.0, 4.0, 8.0, 8.0),
        )]);
        let mut buffer = Buffer::new(vec![Some(Surface::filled(32, 32, [9, 9, 9, 255]))], BatchMeta::new(vec![frame]));
        let verdict = graph.push_buffer(&stage.port(BOUNDARY_SOURCE), &mut buffer).unwrap();
        assert_eq!(verdict, ProbeReturn::Pass);

        let frame = buffer.batch_meta().unwrap().frames().next().unwrap();
        assert_eq!(frame.overlay_count(), 1);
        assert_eq!(health.regions_applied(), 1);
    }
}
