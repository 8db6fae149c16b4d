use std::time::Duration;

use accident_watch_common::config::DetectionConfig;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::detect::{Detection, Detector};
use crate::source::{FrameSource, SourceError};
use crate::store::{ImageStore, StoreError};

/// A write failure loses one capture, which is tolerable; this many in a
/// row means the store itself is broken and the loop must stop.
const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 5;

enum CaptureState {
    /// Frames are being acquired and every Nth one is sent to the detector.
    Sampling,
    /// A capture was just persisted; all processing is suspended until the
    /// deadline so one ongoing event does not flood the store.
    Cooldown { until: Instant },
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),
    #[error("image store failing repeatedly: {0}")]
    StoreFailing(StoreError),
}

/// The capture loop: acquires frames, subsamples them to the detector,
/// persists qualifying frames, and cools down after each capture.
pub struct CaptureLoop {
    store: ImageStore,
    accident_class: u32,
    min_confidence: f32,
    sample_interval: u64,
    cooldown: Duration,
    shutdown: watch::Receiver<bool>,
    state: CaptureState,
    write_failures: u32,
}

impl CaptureLoop {
    pub fn new(store: ImageStore, config: &DetectionConfig, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            accident_class: config.accident_class,
            min_confidence: config.min_confidence,
            // interval 0 would mean "never detect"; treat it as every frame
            sample_interval: config.sample_interval.max(1),
            cooldown: Duration::from_secs_f64(config.cooldown_secs),
            shutdown,
            state: CaptureState::Sampling,
            write_failures: 0,
        }
    }

    /// Run until the source fails, the store fails repeatedly, or shutdown
    /// is signalled. Shutdown is observed at the top of every iteration and
    /// during cooldown, and is a graceful `Ok(())`.
    pub async fn run<S: FrameSource, D: Detector>(
        &mut self,
        source: &mut S,
        detector: &mut D,
    ) -> Result<(), CaptureError> {
        let mut counter: u64 = 0;

        loop {
            if *self.shutdown.borrow() {
                info!("shutdown requested, stopping capture loop");
                return Ok(());
            }

            if let CaptureState::Cooldown { until } = self.state {
                self.wait_out_cooldown(until).await;
                self.state = CaptureState::Sampling;
                debug!("cooldown over, sampling resumed");
                continue;
            }

            let frame = source.next_frame().await?;
            counter += 1;

            if counter % self.sample_interval != 0 {
                continue;
            }

            debug!(counter, bytes = frame.payload_size(), "forwarding frame to detector");
            let detections = match detector.detect(&frame).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, counter, "detector failed, skipping frame");
                    continue;
                }
            };

            if !self.qualifies(&detections) {
                continue;
            }

            info!(counter, "accident detected");
            let name = frame.artifact_name();
            match self.store.write(&name, &frame.jpeg) {
                Ok(()) => {
                    self.write_failures = 0;
                    info!(name, "accident image saved");
                    self.state = CaptureState::Cooldown {
                        until: Instant::now() + self.cooldown,
                    };
                }
                Err(e) => {
                    self.write_failures += 1;
                    error!(
                        error = %e,
                        consecutive = self.write_failures,
                        "failed to persist accident image"
                    );
                    if self.write_failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
                        return Err(CaptureError::StoreFailing(e));
                    }
                }
            }
        }
    }

    /// True if any detection matches the configured accident class at or
    /// above the confidence floor. Other classes never affect the decision.
    fn qualifies(&self, detections: &[Detection]) -> bool {
        detections
            .iter()
            .any(|d| d.class_id == self.accident_class && d.confidence >= self.min_confidence)
    }

    /// Suspend everything — including frame acquisition — until the
    /// cooldown deadline, waking early only for an actual shutdown signal.
    async fn wait_out_cooldown(&mut self, until: Instant) {
        let sleep = tokio::time::sleep_until(until);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                changed = self.shutdown.changed() => match changed {
                    Ok(()) if *self.shutdown.borrow() => return,
                    // Spurious wake: the value changed but not to true.
                    Ok(()) => {}
                    // Sender gone: nothing can signal shutdown anymore,
                    // so the full cooldown must still be served.
                    Err(_) => {
                        sleep.as_mut().await;
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accident_watch_common::frame::Frame;
    use chrono::Local;
    use std::collections::VecDeque;

    struct ScriptedSource {
        remaining: u64,
    }

    impl ScriptedSource {
        fn with_frames(n: u64) -> Self {
            Self { remaining: n }
        }
    }

    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Result<Frame, SourceError> {
            if self.remaining == 0 {
                return Err(SourceError::EndOfStream);
            }
            self.remaining -= 1;
            Ok(Frame::new(vec![0xFF, 0xD8, 0x42], Local::now()))
        }
    }

    struct ScriptedDetector {
        /// One scripted result per invocation; extra calls see no detections.
        results: VecDeque<Result<Vec<Detection>, crate::detect::DetectError>>,
        call_times: Vec<std::time::Instant>,
    }

    impl ScriptedDetector {
        fn new(results: Vec<Result<Vec<Detection>, crate::detect::DetectError>>) -> Self {
            Self {
                results: results.into(),
                call_times: Vec::new(),
            }
        }

        fn calls(&self) -> usize {
            self.call_times.len()
        }
    }

    impl Detector for ScriptedDetector {
        async fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, crate::detect::DetectError> {
            self.call_times.push(std::time::Instant::now());
            self.results.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn detection(class_id: u32, confidence: f32) -> Detection {
        Detection {
            class_id,
            confidence,
            bbox: [0.0; 4],
        }
    }

    fn config(sample_interval: u64, cooldown_secs: f64) -> DetectionConfig {
        DetectionConfig {
            model_url: String::new(),
            accident_class: 1,
            min_confidence: 0.0,
            sample_interval,
            cooldown_secs,
        }
    }

    fn test_loop(
        store: ImageStore,
        cfg: &DetectionConfig,
    ) -> (CaptureLoop, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (CaptureLoop::new(store, cfg, rx), tx)
    }

    #[tokio::test]
    async fn detector_sees_every_nth_frame_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let (mut capture, _tx) = test_loop(store, &config(5, 0.0));

        let mut source = ScriptedSource::with_frames(23);
        let mut detector = ScriptedDetector::new(Vec::new());

        let result = capture.run(&mut source, &mut detector).await;
        assert!(matches!(result, Err(CaptureError::SourceUnavailable(_))));
        // frames 5, 10, 15, 20
        assert_eq!(detector.calls(), 4);
    }

    #[tokio::test]
    async fn qualifying_detection_persists_the_frame() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let (mut capture, _tx) = test_loop(store.clone(), &config(5, 0.0));

        let mut source = ScriptedSource::with_frames(5);
        let mut detector =
            ScriptedDetector::new(vec![Ok(vec![detection(2, 0.9), detection(1, 0.8)])]);

        let _ = capture.run(&mut source, &mut detector).await;

        let names = store.list().unwrap();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("accident_"));
        assert!(names[0].ends_with(".jpg"));
        assert_eq!(store.read(&names[0]).unwrap(), vec![0xFF, 0xD8, 0x42]);
    }

    #[tokio::test]
    async fn other_classes_never_trigger_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let (mut capture, _tx) = test_loop(store.clone(), &config(1, 0.0));

        let mut source = ScriptedSource::with_frames(4);
        let mut detector = ScriptedDetector::new(vec![
            Ok(vec![detection(0, 0.99)]),
            Ok(vec![detection(2, 0.99), detection(3, 0.99)]),
            Ok(Vec::new()),
            Ok(vec![detection(7, 1.0)]),
        ]);

        let _ = capture.run(&mut source, &mut detector).await;
        assert!(store.list().unwrap().is_empty());
        assert_eq!(detector.calls(), 4);
    }

    #[tokio::test]
    async fn low_confidence_accident_is_ignored_when_floor_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let mut cfg = config(1, 0.0);
        cfg.min_confidence = 0.5;
        let (mut capture, _tx) = test_loop(store.clone(), &cfg);

        let mut source = ScriptedSource::with_frames(1);
        let mut detector = ScriptedDetector::new(vec![Ok(vec![detection(1, 0.2)])]);

        let _ = capture.run(&mut source, &mut detector).await;
        assert!(store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cooldown_suppresses_detection_until_elapsed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let cooldown = Duration::from_millis(150);
        let (mut capture, _tx) = test_loop(store.clone(), &config(1, 0.15));

        let mut source = ScriptedSource::with_frames(2);
        let mut detector = ScriptedDetector::new(vec![
            Ok(vec![detection(1, 0.9)]),
            Ok(vec![detection(1, 0.9)]),
        ]);

        let _ = capture.run(&mut source, &mut detector).await;

        assert_eq!(detector.calls(), 2);
        let gap = detector.call_times[1] - detector.call_times[0];
        assert!(gap >= cooldown, "detector invoked {gap:?} after write, inside cooldown");
        // Both captures land within the same wall-clock second, so the
        // second write overwrites the first (preserved behavior).
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn detector_error_skips_frame_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let (mut capture, _tx) = test_loop(store.clone(), &config(1, 0.0));

        let mut source = ScriptedSource::with_frames(2);
        let mut detector = ScriptedDetector::new(vec![
            Err(crate::detect::DetectError::Status(503)),
            Ok(vec![detection(1, 0.9)]),
        ]);

        let result = capture.run(&mut source, &mut detector).await;
        // the loop survived the detector error and still ended on EndOfStream
        assert!(matches!(result, Err(CaptureError::SourceUnavailable(_))));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_before_first_frame_is_graceful() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let (mut capture, tx) = test_loop(store, &config(1, 0.0));
        tx.send(true).unwrap();

        let mut source = ScriptedSource::with_frames(10);
        let mut detector = ScriptedDetector::new(Vec::new());

        let result = capture.run(&mut source, &mut detector).await;
        assert!(result.is_ok());
        assert_eq!(detector.calls(), 0);
        assert_eq!(source.remaining, 10);
    }

    /// Always reports an accident, and vandalizes or repairs the store
    /// directory on scripted calls to drive write failures.
    struct SabotagingDetector {
        dir: std::path::PathBuf,
        repair_on: Option<u32>,
        sabotage_on: Option<u32>,
        calls: u32,
    }

    impl Detector for SabotagingDetector {
        async fn detect(
            &mut self,
            _frame: &Frame,
        ) -> Result<Vec<Detection>, crate::detect::DetectError> {
            self.calls += 1;
            if self.repair_on == Some(self.calls) {
                std::fs::create_dir_all(&self.dir).unwrap();
            }
            if self.sabotage_on == Some(self.calls) {
                std::fs::remove_dir_all(&self.dir).unwrap();
            }
            Ok(vec![detection(1, 0.9)])
        }
    }

    #[tokio::test]
    async fn repeated_write_failures_are_fatal() {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join("captures");
        let store = ImageStore::open(&dir).unwrap();
        // Every write fails once the directory is gone.
        std::fs::remove_dir_all(&dir).unwrap();
        let (mut capture, _tx) = test_loop(store, &config(1, 0.0));

        let mut source = ScriptedSource::with_frames(20);
        let mut detector = SabotagingDetector {
            dir: dir.clone(),
            repair_on: None,
            sabotage_on: None,
            calls: 0,
        };

        let result = capture.run(&mut source, &mut detector).await;
        assert!(matches!(result, Err(CaptureError::StoreFailing(_))));
        // The loop survived four failures and stopped on the fifth.
        assert_eq!(detector.calls, 5);
    }

    #[tokio::test]
    async fn successful_write_resets_failure_counter() {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join("captures");
        let store = ImageStore::open(&dir).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        let (mut capture, _tx) = test_loop(store, &config(1, 0.0));

        let mut source = ScriptedSource::with_frames(20);
        // Calls 1-2 fail, call 3 succeeds (directory repaired), call 4
        // breaks the store again; only after five fresh failures does the
        // loop give up.
        let mut detector = SabotagingDetector {
            dir: dir.clone(),
            repair_on: Some(3),
            sabotage_on: Some(4),
            calls: 0,
        };

        let result = capture.run(&mut source, &mut detector).await;
        assert!(matches!(result, Err(CaptureError::StoreFailing(_))));
        assert_eq!(detector.calls, 8);
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_serves_full_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        let cooldown = Duration::from_millis(150);
        let (tx, rx) = watch::channel(false);
        let mut capture = CaptureLoop::new(store, &config(1, 0.15), rx);
        // No sender left: a closed channel must not cut the pause short.
        drop(tx);

        let mut source = ScriptedSource::with_frames(2);
        let mut detector = ScriptedDetector::new(vec![
            Ok(vec![detection(1, 0.9)]),
            Ok(vec![detection(1, 0.9)]),
        ]);

        let _ = capture.run(&mut source, &mut detector).await;

        assert_eq!(detector.calls(), 2);
        let gap = detector.call_times[1] - detector.call_times[0];
        assert!(gap >= cooldown, "cooldown cut short to {gap:?} by closed channel");
    }

    #[tokio::test]
    async fn shutdown_during_cooldown_is_graceful() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::open(dir.path()).unwrap();
        // Long cooldown; only shutdown can end the run promptly.
        let (mut capture, tx) = test_loop(store, &config(1, 30.0));

        let mut source = ScriptedSource::with_frames(5);
        let mut detector = ScriptedDetector::new(vec![Ok(vec![detection(1, 0.9)])]);

        let run = async {
            let result = capture.run(&mut source, &mut detector).await;
            assert!(result.is_ok());
        };
        let signal = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(run, signal);
        })
        .await
        .expect("run did not honor shutdown during cooldown");
    }
}
