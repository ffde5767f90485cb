//! Application graph and the entry points of the CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, anyhow, ensure};
use bytes::BytesMut;
use log::info;

use crate::buffer::{BatchMeta, Buffer, FrameMeta, ObjectMeta, PixelFormat, Surface};
use crate::config::AppConfig;
use crate::pipeline::{
    DynamicLinkNegotiator, PipelineGraph, PipelineState, RedactionHealth, StageConfig,
};
use crate::redact::{RedactConfig, RedactStrategy, RedactionEngine, blurring_subgraph, render_overlays};

pub const DECODER: &str = "decoder";
pub const MUXER: &str = "muxer";
pub const INFERENCE: &str = "pgie";
pub const BLURRER: &str = "blurrer";
/// On-screen display that draws fill overlays
pub const RENDERER: &str = "osd";
pub const POST_CONVERT: &str = "postconvert";
pub const ENCODER: &str = "encoder";
pub const CONTAINER: &str = "container";
pub const FILE_SINK: &str = "sink";

/// Request template of the aggregator inputs
const MUXER_SINK_TEMPLATE: &str = "sink_%u";

/// The assembled redaction graph
pub struct RedactionPipeline {
    pub graph: PipelineGraph,
    pub health: Arc<RedactionHealth>,
}

/// Assemble decoder → aggregator → inference → blurring → encoder → file
///
/// The fill strategy adds a renderer after the blurring stage to draw its
/// overlays. The decoder output is linked later by the negotiator, once
/// the decoder has seen the stream.
pub fn build_pipeline(config: &AppConfig) -> anyhow::Result<RedactionPipeline> {
    let redact = config.redact_config()?;
    let mut graph = PipelineGraph::new("redactline");

    graph.create_stage(
        "uridecodebin",
        DECODER,
        StageConfig::new().with("uri", config.input_uri()),
    )?;
    graph.create_stage(
        "nvstreammux",
        MUXER,
        StageConfig::new()
            .with("width", config.muxer.width)
            .with("height", config.muxer.height)
            .with("batch-size", config.muxer.batch_size)
            .with("batched-push-timeout", config.muxer.batched_push_timeout),
    )?;
    graph.create_stage(
        "nvinfer",
        INFERENCE,
        StageConfig::new()
            .with("config-file-path", config.infer_config.display().to_string())
            .with("batch-size", config.muxer.batch_size),
    )?;

    let renders_overlays = redact.strategy == RedactStrategy::Fill;
    let health = Arc::new(RedactionHealth::new());
    let engine = RedactionEngine::with_health(redact, Arc::clone(&health));
    blurring_subgraph(&mut graph, BLURRER, engine)?;

    let mut chain = vec![MUXER, INFERENCE, BLURRER];
    if renders_overlays {
        graph.create_stage(
            "nvdsosd",
            RENDERER,
            StageConfig::new().with("display-text", false),
        )?;
        chain.push(RENDERER);
    }
    chain.extend([POST_CONVERT, ENCODER, CONTAINER, FILE_SINK]);

    graph.create_stage(
        "nvvideoconvert",
        POST_CONVERT,
        StageConfig::new().with("copy-hw", config.encoder.copy_hw),
    )?;
    graph.create_stage(
        "x264enc",
        ENCODER,
        StageConfig::new()
            .with("speed-preset", config.encoder.speed_preset.as_str())
            .with("bitrate", config.encoder.bitrate)
            .with("pass", config.encoder.pass.as_str())
            .with("quantizer", config.encoder.quantizer),
    )?;
    graph.create_stage("qtmux", CONTAINER, StageConfig::new())?;
    graph.create_stage(
        "filesink",
        FILE_SINK,
        StageConfig::new().with("location", config.output.display().to_string()),
    )?;

    graph
        .link(&chain)
        .context("Failed to assemble the redaction graph")?;
    graph.connect_port_added(
        DECODER,
        Box::new(DynamicLinkNegotiator::new(MUXER, MUXER_SINK_TEMPLATE)),
    )?;

    Ok(RedactionPipeline { graph, health })
}

/// Build the graph, preroll it and report its topology
///
/// The graph is brought back to `Null` before returning.
pub fn check(config: &AppConfig) -> anyhow::Result<String> {
    ensure!(
        config.input.exists(),
        "Input file {} not found!",
        config.input.display()
    );

    let started = Instant::now();
    let mut pipeline = build_pipeline(config)?;
    let guard = pipeline
        .graph
        .request_state(PipelineState::Paused)
        .context("Could not preroll the redaction graph")?;
    let topology = guard.describe();
    guard.release().context("Could not restore the redaction graph")?;

    info!(
        "{} (checked in {:.3}s)",
        pipeline.health.summary(),
        started.elapsed().as_secs_f64()
    );
    Ok(topology)
}

/// A still image to redact
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub input: PathBuf,
    /// JSON array of detected objects
    pub detections: PathBuf,
    pub output: PathBuf,
    pub redact: RedactConfig,
}

fn read_detections(path: &Path) -> anyhow::Result<Vec<ObjectMeta>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read detections from {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Malformed detections in {}", path.display()))
}

/// Redact a still image and write the result; returns the regions applied
pub fn redact_image(job: &ImageJob) -> anyhow::Result<usize> {
    let source = image::open(&job.input)
        .with_context(|| format!("Could not open {}", job.input.display()))?
        .to_rgba8();
    let (width, height) = source.dimensions();
    let objects = read_detections(&job.detections)?;
    info!("{} detection(s) in {}x{} image", objects.len(), width, height);

    let surface = Surface::from_raw(width, height, PixelFormat::Rgba, BytesMut::from(source.as_raw().as_slice()))
        .ok_or_else(|| anyhow!("Image buffer is smaller than {}x{}", width, height))?;
    let frame = FrameMeta::new(0, width, height).with_objects(objects);
    let mut buffer = Buffer::new(vec![Some(surface)], BatchMeta::new(vec![frame]));

    let engine = RedactionEngine::new(job.redact.clone());
    let applied = engine.redact_buffer(&mut buffer);

    // no renderer downstream, so composite the fill overlays here
    let (batch, surfaces) = buffer.parts_mut();
    if let (Some(batch), Some(Some(surface))) = (batch, surfaces.first_mut())
        && let Some(mut view) = surface.view_mut()
    {
        for frame in batch.frames() {
            render_overlays(&mut view, frame);
        }
    }

    let surface = buffer
        .into_surfaces()
        .into_iter()
        .next()
        .flatten()
        .context("Redacted frame lost its surface")?;
    let redacted = image::RgbaImage::from_raw(width, height, surface.into_bytes().to_vec())
        .context("Redacted frame has the wrong size")?;
    redacted
        .save(&job.output)
        .with_context(|| format!("Could not write {}", job.output.display()))?;

    info!("{}", engine.health().summary());
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{MediaFormat, Message, Node, PortRef, RunOutcome};
    use crate::redact::{BlurKernel, RedactStrategy};
    use std::collections::VecDeque;
    use std::io::Write;

    fn config_in(dir: &Path) -> AppConfig {
        AppConfig {
            base_dir: dir.to_path_buf(),
            ..AppConfig::default()
        }
        .resolve()
        .unwrap()
    }

    #[test]
    fn test_graph_is_fully_linked_except_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = build_pipeline(&config_in(dir.path())).unwrap();
        let graph = &pipeline.graph;

        assert_eq!(graph.links().len(), 6);
        assert!(graph.lookup(DECODER).unwrap().ports().next().is_none());
        assert!(matches!(graph.lookup(BLURRER).unwrap(), Node::SubGraph(_)));
        let sink = graph.port(&PortRef::new(FILE_SINK, "sink")).unwrap();
        assert_eq!(sink.peer(), Some(&PortRef::new(CONTAINER, "src")));
    }

    #[test]
    fn test_fill_strategy_adds_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let blur = build_pipeline(&config_in(dir.path())).unwrap();
        assert!(blur.graph.lookup(RENDERER).is_err());

        let config = AppConfig {
            strategy: "fill".to_string(),
            ..config_in(dir.path())
        };
        let pipeline = build_pipeline(&config).unwrap();
        let graph = &pipeline.graph;

        let Node::Stage(osd) = graph.lookup(RENDERER).unwrap() else {
            panic!("renderer is not a plain stage");
        };
        assert_eq!(osd.kind(), "nvdsosd");
        assert_eq!(graph.links().len(), 7);
        assert_eq!(
            graph.port(&PortRef::new(RENDERER, "sink")).unwrap().peer(),
            Some(&PortRef::new(BLURRER, "src"))
        );
        assert_eq!(
            graph.port(&PortRef::new(RENDERER, "src")).unwrap().peer(),
            Some(&PortRef::new(POST_CONVERT, "sink"))
        );
    }

    #[test]
    fn test_decoder_video_reaches_muxer() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = build_pipeline(&config_in(dir.path())).unwrap();

        let video = PortRef::new(DECODER, "src_0");
        let audio = PortRef::new(DECODER, "src_1");
        let mut messages = VecDeque::from([
            Message::PortAdded {
                port: audio.clone(),
                format: MediaFormat::new("audio/x-raw"),
            },
            Message::PortAdded {
                port: video.clone(),
                format: MediaFormat::parse("video/x-raw(memory:NVMM), format=NV12").unwrap(),
            },
            Message::EndOfStream,
        ]);
        let outcome = pipeline.graph.run_until_terminal(&mut messages);
        assert_eq!(outcome, RunOutcome::completed());

        let graph = &pipeline.graph;
        assert_eq!(graph.port(&video).unwrap().peer(), Some(&PortRef::new(MUXER, "sink_0")));
        assert!(!graph.port(&audio).unwrap().is_linked());
    }

    #[test]
    fn test_check_requires_input() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let err = check(&config).unwrap_err();
        assert!(err.to_string().contains("not found"));

        std::fs::create_dir_all(config.input.parent().unwrap()).unwrap();
        std::fs::File::create(&config.input).unwrap();
        let topology = check(&config).unwrap();
        assert!(topology.contains("redactline [Paused]"));
        assert!(topology.contains("blurrer (subgraph of 2) Paused"));
        assert!(topology.contains("muxer.src → pgie.sink"));
    }

    #[test]
    fn test_check_fails_without_inference_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        std::fs::create_dir_all(config.input.parent().unwrap()).unwrap();
        std::fs::File::create(&config.input).unwrap();
        config.infer_config = PathBuf::new();

        let err = check(&config).unwrap_err();
        assert!(format!("{:#}", err).contains("pgie"));
    }

    fn write_image(path: &Path) {
        let image = image::RgbaImage::from_fn(16, 16, |x, _| {
            if x % 2 == 0 {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        image.save(path).unwrap();
    }

    fn write_detections(path: &Path) {
        let mut file = std::fs::File::create(path).unwrap();
        write!(
            file,
            r#"[{{"class_id": 0, "confidence": 0.9, "left": 2, "top": 2, "width": 4, "height": 4}},
                {{"class_id": 9, "left": 10, "top": 10, "width": 4, "height": 4}}]"#
        )
        .unwrap();
    }

    #[test]
    fn test_redact_image_fill() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let detections = dir.path().join("detections.json");
        let output = dir.path().join("out.png");
        write_image(&input);
        write_detections(&detections);

        let job = ImageJob {
            input,
            detections,
            output: output.clone(),
            redact: RedactConfig {
                strategy: RedactStrategy::Fill,
                ..RedactConfig::default()
            },
        };
        assert_eq!(redact_image(&job).unwrap(), 1);

        let result = image::open(&output).unwrap().to_rgba8();
        assert_eq!(result.get_pixel(2, 2).0, [0, 0, 0, 255]);
        assert_eq!(result.get_pixel(4, 5).0, [0, 0, 0, 255]);
        assert_eq!(result.get_pixel(6, 2).0, [255, 255, 255, 255]);
        assert_eq!(result.get_pixel(10, 10).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_redact_image_blur() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let detections = dir.path().join("detections.json");
        let output = dir.path().join("out.png");
        write_image(&input);
        write_detections(&detections);

        let job = ImageJob {
            input,
            detections,
            output: output.clone(),
            redact: RedactConfig {
                strategy: RedactStrategy::Blur(BlurKernel::square(3).unwrap()),
                ..RedactConfig::default()
            },
        };
        assert_eq!(redact_image(&job).unwrap(), 1);

        let result = image::open(&output).unwrap().to_rgba8();
        assert_ne!(result.get_pixel(2, 2).0, [255, 255, 255, 255]);
        assert_eq!(result.get_pixel(1, 2).0, [0, 0, 0, 255]);
        assert_eq!(result.get_pixel(6, 2).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_redact_image_missing_detections() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        write_image(&input);
        let job = ImageJob {
            input,
            detections: dir.path().join("missing.json"),
            output: dir.path().join("out.png"),
            redact: RedactConfig::default(),
        };
        assert!(redact_image(&job).is_err());
    }
}
