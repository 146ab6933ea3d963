//! Semantic Video Segmentation Pipeline - Main Entry Point
//!
//! Enumerates target frames from a manifest, shards them across
//! workers, and runs tiled multi-scale inference on each frame. Every
//! worker owns a private inference session; frames within a worker are
//! processed strictly in order.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use videoseg_pipeline::config::AppConfig;
use videoseg_pipeline::eval::{ClassCounts, SegmentationScorer};
use videoseg_pipeline::loader::{parse_manifest, scaled_dims, FrameLoader, FrameTarget};
use videoseg_pipeline::metrics::{MetricsReporter, PipelineMetrics};
use videoseg_pipeline::models::OnnxScorer;
use videoseg_pipeline::output::LabelWriter;
use videoseg_pipeline::tiling::{crop_grid, MultiScaleCombiner};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;

    info!("Starting Semantic Video Segmentation Pipeline");
    info!(
        crop_size = config.inference.crop_size,
        stride = config.inference.stride,
        num_classes = config.inference.num_classes,
        scales = ?config.inference.scales,
        workers = config.pipeline.workers,
        "Configuration loaded"
    );

    let manifest = std::fs::read_to_string(&config.dataset.manifest)
        .with_context(|| format!("reading manifest {}", config.dataset.manifest))?;
    let targets = parse_manifest(&manifest)?;
    if targets.is_empty() {
        anyhow::bail!("manifest {} lists no frames", config.dataset.manifest);
    }
    info!(frames = targets.len(), split = %config.dataset.split, "Manifest loaded");

    let writer = LabelWriter::new(&config.output.label_dir, &config.output.color_dir);
    writer.ensure_dirs()?;

    // Canonical resolution is the native frame size; every per-scale
    // probability map is resampled back to it before summing.
    let probe = FrameLoader::new(&config.dataset, &config.inference);
    let (canonical_w, canonical_h) = probe.native_dimensions(&targets[0])?;
    info!(canonical_h, canonical_w, "Probed canonical resolution");

    // Validate the crop geometry of every scale up front, before any
    // model loading, and count the crops one frame will cost.
    let mut crops_per_frame = 0u64;
    for &scale in &config.inference.scales {
        let (sw, sh) = scaled_dims(canonical_w, canonical_h, scale);
        let padded_h = (sh as usize).max(config.inference.crop_size);
        let padded_w = (sw as usize).max(config.inference.crop_size);
        let grid = crop_grid(
            padded_h,
            padded_w,
            config.inference.crop_size,
            config.inference.stride,
        )
        .with_context(|| format!("crop geometry invalid at scale {scale}"))?;
        crops_per_frame += grid.len() as u64;
    }
    info!(crops_per_frame, "Validated crop geometry");

    let metrics = Arc::new(PipelineMetrics::new());
    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        let reporter = MetricsReporter::new(metrics_clone, 60);
        reporter.start().await;
    });

    // Shard frames round-robin: worker w takes frames[w::W]. Each
    // worker builds its own scorer; the session is never shared.
    let num_workers = config.pipeline.workers.max(1);
    let config = Arc::new(config);
    let mut handles = Vec::with_capacity(num_workers);
    for worker_id in 0..num_workers {
        let shard: Vec<FrameTarget> = targets
            .iter()
            .skip(worker_id)
            .step_by(num_workers)
            .cloned()
            .collect();
        if shard.is_empty() {
            continue;
        }

        let config = config.clone();
        let metrics = metrics.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run_worker(worker_id, &config, shard, &metrics, canonical_h, canonical_w)
        });
        handles.push(handle);
    }

    let mut total_counts = ClassCounts::new(config.inference.num_classes);
    let mut trimap_counts = ClassCounts::new(config.inference.num_classes);
    let mut scored_frames = 0u64;
    for handle in handles {
        let worker_result = handle.await.context("worker task panicked")?;
        let report = worker_result?;
        if let Some((counts, trimap, frames)) = report {
            total_counts.merge(&counts);
            trimap_counts.merge(&trimap);
            scored_frames += frames;
        }
    }

    metrics.print_summary();
    if scored_frames > 0 {
        match (total_counts.mean_iou(), trimap_counts.mean_iou()) {
            (Some(miou), Some(trimap_miou)) => info!(
                frames = scored_frames,
                mean_iou = %format!("{miou:.4}"),
                trimap_mean_iou = %format!("{trimap_miou:.4}"),
                "Evaluation complete"
            ),
            _ => info!(frames = scored_frames, "Evaluation produced no scorable classes"),
        }
    }

    info!("Pipeline finished");
    Ok(())
}

/// Evaluation tallies from one worker: whole-frame counts, trimap
/// counts, and the number of frames scored.
type WorkerReport = Option<(ClassCounts, ClassCounts, u64)>;

fn run_worker(
    worker_id: usize,
    config: &AppConfig,
    shard: Vec<FrameTarget>,
    metrics: &PipelineMetrics,
    canonical_h: u32,
    canonical_w: u32,
) -> Result<WorkerReport> {
    info!(worker = worker_id, frames = shard.len(), "Worker starting");

    let loader = FrameLoader::new(&config.dataset, &config.inference);
    let writer = LabelWriter::new(&config.output.label_dir, &config.output.color_dir);
    let mut scorer = OnnxScorer::new(config)
        .with_context(|| format!("initializing scorer for worker {worker_id}"))?;
    let combiner = MultiScaleCombiner::new(
        config.inference.scales.clone(),
        config.inference.crop_size,
        config.inference.stride,
        canonical_h as usize,
        canonical_w as usize,
        config.inference.flip,
    );

    let evaluator = config
        .dataset
        .ground_truth_root
        .as_ref()
        .map(|root| GroundTruthScorer::new(root, config));
    let mut counts = ClassCounts::new(config.inference.num_classes);
    let mut trimap_counts = ClassCounts::new(config.inference.num_classes);
    let mut scored_frames = 0u64;

    for target in &shard {
        let frame_name = target.frame_name();
        if config.pipeline.skip_existing && writer.exists(&frame_name) {
            metrics.record_skipped();
            continue;
        }

        let started = Instant::now();
        let run = combiner
            .run(&mut scorer, |scale| loader.load_sequence(target, scale))
            .with_context(|| format!("processing frame {frame_name}"))?;
        let labels = run.probabilities.argmax();
        writer.write(&frame_name, &labels)?;

        metrics.record_frame(started.elapsed());
        metrics.record_crops(run.crops_scored as u64);
        for (scale, elapsed) in &run.scale_times {
            metrics.record_scale_time(*scale, *elapsed);
        }
        info!(
            worker = worker_id,
            frame = %frame_name,
            crops = run.crops_scored,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Frame processed"
        );

        if let Some(evaluator) = &evaluator {
            match evaluator.score(target, &labels) {
                Ok((frame_counts, frame_trimap)) => {
                    counts.merge(&frame_counts);
                    trimap_counts.merge(&frame_trimap);
                    scored_frames += 1;
                }
                Err(e) => {
                    error!(frame = %frame_name, error = %e, "Ground-truth scoring failed");
                }
            }
        }
    }

    info!(worker = worker_id, "Worker finished");
    if scored_frames > 0 {
        Ok(Some((counts, trimap_counts, scored_frames)))
    } else {
        Ok(None)
    }
}

/// Scores predicted label maps against on-disk ground truth.
struct GroundTruthScorer {
    root: std::path::PathBuf,
    split: String,
    scorer: SegmentationScorer,
    trimap: usize,
}

impl GroundTruthScorer {
    fn new(root: &str, config: &AppConfig) -> Self {
        Self {
            root: std::path::PathBuf::from(root),
            split: config.dataset.split.clone(),
            scorer: SegmentationScorer::new(config.inference.num_classes),
            trimap: 8,
        }
    }

    fn score(
        &self,
        target: &FrameTarget,
        labels: &videoseg_pipeline::LabelMap,
    ) -> Result<(ClassCounts, ClassCounts)> {
        let path = self
            .root
            .join(&self.split)
            .join(target.city())
            .join(format!("{}_gtFine_labelTrainIds.png", target.frame_name()));
        let gt_img = image::open(&path)
            .with_context(|| format!("opening ground truth {}", path.display()))?
            .to_luma8();
        let (w, h) = gt_img.dimensions();
        if (h as usize, w as usize) != (labels.height(), labels.width()) {
            anyhow::bail!(
                "ground truth {}x{} does not match prediction {}x{}",
                h,
                w,
                labels.height(),
                labels.width()
            );
        }
        let gt = ndarray::Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
            gt_img.get_pixel(x as u32, y as u32)[0]
        });

        let counts = self.scorer.count(labels.data(), &gt);
        let trimap = self.scorer.count_trimap(labels.data(), &gt, self.trimap);
        Ok((counts, trimap))
    }
}

fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
