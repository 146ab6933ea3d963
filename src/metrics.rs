//! Performance metrics and statistics tracking for the segmentation pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline performance
pub struct PipelineMetrics {
    /// Total frames processed
    pub frames_processed: AtomicU64,
    /// Total crops scored (forward and flipped passes count once)
    pub crops_scored: AtomicU64,
    /// Total frames skipped because their outputs already existed
    pub frames_skipped: AtomicU64,
    /// Per-frame processing times (in milliseconds)
    frame_times: RwLock<Vec<u64>>,
    /// Per-scale processing times (in milliseconds), keyed by scale
    scale_times: RwLock<HashMap<String, Vec<u64>>>,
    /// Start time for rate calculation
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            frames_processed: AtomicU64::new(0),
            crops_scored: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            frame_times: RwLock::new(Vec::with_capacity(1000)),
            scale_times: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a fully processed frame
    pub fn record_frame(&self, processing_time: Duration) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.frame_times.write() {
            times.push(processing_time.as_millis() as u64);
            // Keep only the most recent window for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }
    }

    /// Record a skipped frame
    pub fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record scored crops for one grid run
    pub fn record_crops(&self, count: u64) {
        self.crops_scored.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one scale's run time within a frame
    pub fn record_scale_time(&self, scale: f64, duration: Duration) {
        if let Ok(mut times) = self.scale_times.write() {
            let entry = times.entry(format!("{scale}")).or_default();
            entry.push(duration.as_millis() as u64);
            if entry.len() > 1000 {
                entry.drain(0..500);
            }
        }
    }

    /// Get per-frame processing time statistics
    pub fn get_frame_stats(&self) -> ProcessingStats {
        let times = match self.frame_times.read() {
            Ok(t) => t,
            Err(_) => return ProcessingStats::default(),
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_ms: sum / count as u64,
            p50_ms: sorted[count / 2],
            p95_ms: sorted[(count as f64 * 0.95) as usize],
            p99_ms: sorted[(count as f64 * 0.99) as usize],
            max_ms: sorted[count - 1],
        }
    }

    /// Get per-scale run time stats
    pub fn get_scale_stats(&self) -> HashMap<String, ScaleStats> {
        let times = match self.scale_times.read() {
            Ok(t) => t,
            Err(_) => return HashMap::new(),
        };
        let mut stats = HashMap::new();

        for (scale, scale_times) in times.iter() {
            if scale_times.is_empty() {
                continue;
            }

            let mut sorted: Vec<u64> = scale_times.clone();
            sorted.sort();

            let sum: u64 = sorted.iter().sum();
            let count = sorted.len();

            stats.insert(
                scale.clone(),
                ScaleStats {
                    runs: count as u64,
                    mean_ms: sum / count as u64,
                    p50_ms: sorted[count / 2],
                    p99_ms: sorted[(count as f64 * 0.99) as usize],
                },
            );
        }

        stats
    }

    /// Get current throughput (frames per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.frames_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let skipped = self.frames_skipped.load(Ordering::Relaxed);
        let crops = self.crops_scored.load(Ordering::Relaxed);
        let crops_per_frame = if frames > 0 {
            crops as f64 / frames as f64
        } else {
            0.0
        };

        let frame_stats = self.get_frame_stats();
        let throughput = self.get_throughput();

        info!(
            frames_processed = frames,
            frames_skipped = skipped,
            crops_scored = crops,
            crops_per_frame = %format!("{crops_per_frame:.1}"),
            throughput_fps = %format!("{throughput:.3}"),
            "pipeline summary"
        );
        info!(
            mean_ms = frame_stats.mean_ms,
            p50_ms = frame_stats.p50_ms,
            p95_ms = frame_stats.p95_ms,
            p99_ms = frame_stats.p99_ms,
            max_ms = frame_stats.max_ms,
            "frame processing time"
        );

        let mut scale_stats: Vec<(String, ScaleStats)> =
            self.get_scale_stats().into_iter().collect();
        scale_stats.sort_by(|a, b| a.0.cmp(&b.0));
        for (scale, stats) in scale_stats {
            info!(
                scale = %scale,
                runs = stats.runs,
                mean_ms = stats.mean_ms,
                p50_ms = stats.p50_ms,
                p99_ms = stats.p99_ms,
                "scale run time"
            );
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

/// Per-scale run statistics
#[derive(Debug)]
pub struct ScaleStats {
    pub runs: u64,
    pub mean_ms: u64,
    pub p50_ms: u64,
    pub p99_ms: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: std::sync::Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: std::sync::Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = PipelineMetrics::new();

        metrics.record_frame(Duration::from_millis(1200));
        metrics.record_frame(Duration::from_millis(800));
        metrics.record_crops(18);
        metrics.record_skipped();

        assert_eq!(metrics.frames_processed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.crops_scored.load(Ordering::Relaxed), 18);
        assert_eq!(metrics.frames_skipped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_frame_stats() {
        let metrics = PipelineMetrics::new();
        for ms in [100, 200, 300, 400] {
            metrics.record_frame(Duration::from_millis(ms));
        }

        let stats = metrics.get_frame_stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_ms, 250);
        assert_eq!(stats.max_ms, 400);
    }

    #[test]
    fn test_scale_stats_keyed_by_scale() {
        let metrics = PipelineMetrics::new();
        metrics.record_scale_time(0.5, Duration::from_millis(50));
        metrics.record_scale_time(1.75, Duration::from_millis(700));

        let stats = metrics.get_scale_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["0.5"].runs, 1);
        assert_eq!(stats["1.75"].mean_ms, 700);
    }
}
