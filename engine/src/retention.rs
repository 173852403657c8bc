//! Timer-driven purge of raw biometric media.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use vouch_media::ArtifactPipeline;
use vouch_types::{SessionId, VouchError, VouchResult};

use crate::pool::BlockingPool;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Raw namespaces untouched for longer than this are purged.
    pub raw_ttl: Duration,
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw_ttl: Duration::from_secs(48 * 60 * 60),
            interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale namespaces found.
    pub scanned: usize,
    pub purged: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another sweep was already running.
    Skipped,
}

/// Purges stale raw namespaces regardless of the owning session's status.
#[derive(Clone)]
pub struct RetentionScheduler {
    pipeline: Arc<ArtifactPipeline>,
    pool: BlockingPool,
    policy: RetentionPolicy,
    running: Arc<AtomicBool>,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RetentionScheduler {
    pub fn new(pipeline: Arc<ArtifactPipeline>, pool: BlockingPool, policy: RetentionPolicy) -> Self {
        Self {
            pipeline,
            pool,
            policy,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn sweep_now(&self) -> VouchResult<SweepOutcome> {
        self.sweep_at(SystemTime::now()).await
    }

    /// Sweep as if the current time were `now`.
    pub async fn sweep_at(&self, now: SystemTime) -> VouchResult<SweepOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("retention sweep already running; skipped");
            return Ok(SweepOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);

        let pipeline = Arc::clone(&self.pipeline);
        let ttl = self.policy.raw_ttl;
        let report = self.pool.run(move || sweep(&pipeline, ttl, now)).await?;
        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                purged = report.purged,
                failed = report.failed,
                "retention sweep finished"
            );
        }
        Ok(SweepOutcome::Completed(report))
    }

    /// Spawn the periodic sweep. The first sweep runs immediately.
    pub fn start(self) -> RetentionHandle {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.policy.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_now().await {
                            tracing::warn!(error = %e, "retention sweep failed");
                        }
                    }
                }
            }
            tracing::debug!("retention job stopped");
        });
        RetentionHandle { stop, task }
    }
}

fn sweep(pipeline: &ArtifactPipeline, ttl: Duration, now: SystemTime) -> VouchResult<SweepReport> {
    let stale = pipeline.stale_raw_namespaces(ttl, now).map_err(VouchError::from)?;
    Ok(purge(pipeline, &stale))
}

/// Purge each namespace in `stale`. One that vanished since it was listed
/// (a verify cleaned it up) counts as neither purged nor failed.
fn purge(pipeline: &ArtifactPipeline, stale: &[SessionId]) -> SweepReport {
    let mut report = SweepReport {
        scanned: stale.len(),
        ..SweepReport::default()
    };
    for &session in stale {
        match pipeline.cleanup_session(session) {
            Ok(true) => report.purged += 1,
            Ok(false) => tracing::debug!(session_id = %session, "raw media already gone"),
            Err(e) => {
                report.failed += 1;
                tracing::warn!(session_id = %session, error = %e, "failed to purge raw media");
            }
        }
    }
    report
}

/// Running retention job.
pub struct RetentionHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RetentionHandle {
    /// Signal the job to stop and wait for it. An in-flight sweep finishes first.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "retention job ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use vouch_media::{DisabledFaceDetector, FfmpegFrameSource, PipelineSettings, StorageLayout};

    use super::*;

    fn scheduler(root: &std::path::Path) -> RetentionScheduler {
        let pipeline = ArtifactPipeline::new(
            StorageLayout::new(root),
            Arc::new(FfmpegFrameSource::new("ffmpeg".into(), "ffprobe".into())),
            Arc::new(DisabledFaceDetector),
            PipelineSettings::default(),
        );
        RetentionScheduler::new(Arc::new(pipeline), BlockingPool::new(1), RetentionPolicy::default())
    }

    #[tokio::test]
    async fn concurrent_sweep_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path());

        scheduler.running.store(true, Ordering::SeqCst);
        assert_eq!(scheduler.sweep_now().await.unwrap(), SweepOutcome::Skipped);

        scheduler.running.store(false, Ordering::SeqCst);
        assert_eq!(
            scheduler.sweep_now().await.unwrap(),
            SweepOutcome::Completed(SweepReport::default())
        );
        assert!(!scheduler.running.load(Ordering::SeqCst));
    }

    #[test]
    fn vanished_namespace_is_not_counted_as_purged() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler(dir.path());
        let present = SessionId::generate();
        let vanished = SessionId::generate();
        std::fs::create_dir_all(scheduler.pipeline.layout().raw_dir(present)).unwrap();

        let report = purge(&scheduler.pipeline, &[present, vanished]);
        assert_eq!(report, SweepReport { scanned: 2, purged: 1, failed: 0 });
    }

    #[tokio::test]
    async fn shutdown_stops_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let handle = scheduler(dir.path()).start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown().await;
    }
}
