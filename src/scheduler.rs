//! 推論スケジューラ
//!
//! 一定間隔でグリッドのスナップショットを取り、描かれていれば分類器に渡して
//! 結果を表示側に公開する。
//!
//! 状態遷移: Idle → Polling → {Predicting | Waiting} → Polling → … → Stopped
//!
//! 次のtickは前のtickの完了時点から `interval` 後（固定レートではない）。

use crate::classifier::Classifier;
use crate::display::Publisher;
use crate::grid::{GridSurface, Snapshot};
use crate::types::{DisplayUpdate, Prediction, SchedulerState};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// ポーリングのタイミング
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// 最初のtickまでの待ち時間
    pub warmup: Duration,
    /// tick完了から次のtickまでの待ち時間
    pub interval: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(100),
            interval: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub predictions: u64,
    pub empty_polls: u64,
    pub failures: u64,
}

/// 1回のtickの結果
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// 停止済みのため何もしなかった
    Skipped,
    NoInput,
    Predicted(Prediction),
    /// 分類器のエラー（ループは継続）
    Failed(String),
}

/// panicのペイロードからメッセージを取り出す
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Poller {
    surface: GridSurface,
    classifier: Arc<dyn Classifier>,
    publisher: Publisher,
    state: Mutex<SchedulerState>,
    stats: Mutex<SchedulerStats>,
}

impl Poller {
    /// 状態を遷移させる。停止済みなら遷移せず false
    fn enter(&self, next: SchedulerState) -> bool {
        let mut state = lock(&self.state);
        if *state == SchedulerState::Stopped {
            return false;
        }
        *state = next;
        true
    }

    fn tick(&self) -> TickOutcome {
        if !self.enter(SchedulerState::Polling) {
            return TickOutcome::Skipped;
        }

        let snapshot = self.surface.snapshot();
        lock(&self.stats).ticks += 1;

        if snapshot.is_blank() {
            if !self.enter(SchedulerState::Waiting) {
                return TickOutcome::Skipped;
            }
            lock(&self.stats).empty_polls += 1;
            self.publisher.publish(DisplayUpdate::NoInput);
            return TickOutcome::NoInput;
        }

        if !self.enter(SchedulerState::Predicting) {
            return TickOutcome::Skipped;
        }

        match self.classify(&snapshot) {
            Ok(prediction) => {
                // 推論中に停止された場合は公開しない
                if *lock(&self.state) == SchedulerState::Stopped {
                    return TickOutcome::Skipped;
                }
                lock(&self.stats).predictions += 1;
                log::debug!(
                    "[Scheduler] 予測: {} ({:.3})",
                    prediction.class,
                    prediction.confidence()
                );
                self.publisher.publish(DisplayUpdate::Predicted(prediction.clone()));
                TickOutcome::Predicted(prediction)
            }
            Err(e) => {
                lock(&self.stats).failures += 1;
                log::error!("[Scheduler] 推論エラー ({}): {:#}", self.classifier.name(), e);
                TickOutcome::Failed(format!("{:#}", e))
            }
        }
    }

    fn classify(&self, snapshot: &Snapshot) -> Result<Prediction> {
        // バックエンドは入力不正をpanicで報告するため、エラーとして扱う
        let probabilities = catch_unwind(AssertUnwindSafe(|| self.classifier.classify(snapshot)))
            .map_err(|payload| {
                anyhow!("分類器がpanicしました: {}", panic_message(&*payload))
            })??;
        let expected = self.classifier.num_classes();
        if probabilities.len() != expected {
            bail!(
                "分類結果のクラス数が不正です: {} (期待: {})",
                probabilities.len(),
                expected
            );
        }
        Prediction::from_probabilities(probabilities)
            .ok_or_else(|| anyhow!("分類結果に有限でない値が含まれています"))
    }
}

async fn run_loop(poller: Arc<Poller>, timing: PollTiming) {
    tokio::time::sleep(timing.warmup).await;
    loop {
        if poller.tick() == TickOutcome::Skipped {
            break;
        }
        tokio::time::sleep(timing.interval).await;
    }
    log::debug!("[Scheduler] ポーリングループ終了");
}

/// 推論スケジューラ
///
/// `stop()` 後は再開できない。drop時にも停止する。
pub struct InferenceScheduler {
    poller: Arc<Poller>,
    timing: PollTiming,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InferenceScheduler {
    pub fn new(surface: GridSurface, classifier: Arc<dyn Classifier>, timing: PollTiming) -> Self {
        let publisher = surface.publisher().clone();
        Self {
            poller: Arc::new(Poller {
                surface,
                classifier,
                publisher,
                state: Mutex::new(SchedulerState::Idle),
                stats: Mutex::new(SchedulerStats::default()),
            }),
            timing,
            task: Mutex::new(None),
        }
    }

    /// ポーリングを開始（tokioランタイム上で呼ぶこと）
    ///
    /// 既に開始済みなら何もしない。
    pub fn start(&self) -> Result<()> {
        if self.state() == SchedulerState::Stopped {
            bail!("停止済みのスケジューラは再開できません");
        }
        let mut task = lock(&self.task);
        if task.is_some() {
            log::warn!("[Scheduler] 既に開始しています");
            return Ok(());
        }

        let handle = tokio::runtime::Handle::try_current()
            .context("tokioランタイムの外ではスケジューラを開始できません")?;
        let poller = self.poller.clone();
        *task = Some(handle.spawn(run_loop(poller, self.timing)));

        log::info!(
            "[Scheduler] 開始: 初回 {}ms後, 間隔 {}ms ({})",
            self.timing.warmup.as_millis(),
            self.timing.interval.as_millis(),
            self.poller.classifier.name()
        );
        Ok(())
    }

    /// 1回分のポーリングを即座に実行
    pub fn tick(&self) -> TickOutcome {
        self.poller.tick()
    }

    /// 停止。待機中のtickは取り消される。二重に呼んでも問題ない
    pub fn stop(&self) {
        {
            let mut state = lock(&self.poller.state);
            if *state == SchedulerState::Stopped {
                return;
            }
            *state = SchedulerState::Stopped;
        }
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        log::info!("[Scheduler] 停止");
    }

    pub fn state(&self) -> SchedulerState {
        *lock(&self.poller.state)
    }

    pub fn is_running(&self) -> bool {
        let alive = lock(&self.task).as_ref().is_some_and(|h| !h.is_finished());
        alive && self.state() != SchedulerState::Stopped
    }

    pub fn stats(&self) -> SchedulerStats {
        lock(&self.poller.stats).clone()
    }

    pub fn timing(&self) -> PollTiming {
        self.timing
    }
}

impl Drop for InferenceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasGeometry;
    use crate::classifier::testing::{PanickingClassifier, SpyClassifier, WrongLengthClassifier};
    use crate::types::NUM_CLASSES;

    fn setup(classifier: Arc<dyn Classifier>) -> (GridSurface, InferenceScheduler) {
        let surface = GridSurface::new(CanvasGeometry::default(), Publisher::new());
        let scheduler = InferenceScheduler::new(surface.clone(), classifier, PollTiming::default());
        (surface, scheduler)
    }

    #[test]
    fn test_empty_grid_skips_classifier() {
        let spy = Arc::new(SpyClassifier::default());
        let (surface, scheduler) = setup(spy.clone());
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        assert_eq!(scheduler.tick(), TickOutcome::NoInput);
        assert_eq!(spy.calls(), 0);
        assert_eq!(surface.publisher().current(), DisplayUpdate::NoInput);
        assert_eq!(scheduler.state(), SchedulerState::Waiting);
        assert_eq!(scheduler.stats().empty_polls, 1);
    }

    #[test]
    fn test_painted_grid_is_classified_once() {
        let spy = Arc::new(SpyClassifier::default());
        let (surface, scheduler) = setup(spy.clone());
        surface.paint(4, 3);
        surface.paint(5, 3);

        let outcome = scheduler.tick();
        assert_eq!(spy.calls(), 1);

        let inputs = spy.inputs();
        assert_eq!(inputs[0].shape(), [1, 28, 28, 1]);
        assert_eq!(inputs[0].painted_cells(), vec![(4, 3), (5, 3)]);

        let TickOutcome::Predicted(prediction) = outcome else {
            panic!("expected a prediction");
        };
        assert_eq!(prediction.probabilities.len(), NUM_CLASSES);
        let argmax = prediction
            .probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(prediction.class, argmax);
        assert_eq!(prediction.class, 3);
        assert_eq!(surface.publisher().current(), DisplayUpdate::Predicted(prediction));
        assert_eq!(scheduler.state(), SchedulerState::Predicting);
    }

    #[test]
    fn test_classifier_failure_is_recoverable() {
        let spy = Arc::new(SpyClassifier::failing());
        let (surface, scheduler) = setup(spy.clone());
        surface.paint(0, 0);

        assert!(matches!(scheduler.tick(), TickOutcome::Failed(_)));
        assert!(matches!(scheduler.tick(), TickOutcome::Failed(_)));
        assert_eq!(spy.calls(), 2);
        assert_eq!(scheduler.stats().failures, 2);
        assert_ne!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(surface.publisher().current(), DisplayUpdate::Blank);
    }

    #[test]
    fn test_wrong_class_count_is_a_failure() {
        let (surface, scheduler) = setup(Arc::new(WrongLengthClassifier));
        surface.paint(1, 1);
        let TickOutcome::Failed(message) = scheduler.tick() else {
            panic!("expected failure");
        };
        assert!(message.contains("2"));
    }

    #[test]
    fn test_classifier_panic_is_a_failure() {
        let panicking = Arc::new(PanickingClassifier::default());
        let (surface, scheduler) = setup(panicking.clone());
        surface.paint(1, 1);

        let TickOutcome::Failed(message) = scheduler.tick() else {
            panic!("expected failure");
        };
        assert!(message.contains("shape mismatch"));
        assert_eq!(scheduler.stats().failures, 1);

        // 次のtickも普通に動く
        surface.clear();
        assert_eq!(scheduler.tick(), TickOutcome::NoInput);
        assert_eq!(panicking.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_classifier_does_not_stop_loop() {
        let panicking = Arc::new(PanickingClassifier::default());
        let (surface, scheduler) = setup(panicking.clone());
        surface.paint(3, 3);

        scheduler.start().unwrap();
        // 100, 400, 700, 1000, 1300, 1600
        tokio::time::sleep(Duration::from_millis(1750)).await;
        assert_eq!(panicking.calls(), 6);
        let stats = scheduler.stats();
        assert_eq!(stats.ticks, 6);
        assert_eq!(stats.failures, 6);
        assert!(scheduler.is_running());

        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_and_blocks_ticks() {
        let spy = Arc::new(SpyClassifier::default());
        let (surface, scheduler) = setup(spy.clone());
        surface.paint(2, 2);

        scheduler.stop();
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.tick(), TickOutcome::Skipped);
        assert_eq!(spy.calls(), 0);
        assert_eq!(scheduler.stats().ticks, 0);
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let (_surface, scheduler) = setup(Arc::new(SpyClassifier::default()));
        assert!(scheduler.start().is_err());
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_schedule_and_stop() {
        let spy = Arc::new(SpyClassifier::default());
        let (surface, scheduler) = setup(spy.clone());
        surface.paint(10, 10);

        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(spy.calls(), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(spy.calls(), 1);

        tokio::time::sleep(Duration::from_millis(305)).await;
        assert_eq!(spy.calls(), 2);

        scheduler.stop();
        assert!(!scheduler.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(spy.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_follows_grid() {
        let spy = Arc::new(SpyClassifier::default());
        let (surface, scheduler) = setup(spy.clone());
        let mut display = surface.publisher().subscribe();

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*display.borrow_and_update(), DisplayUpdate::NoInput);

        surface.paint(0, 7);
        tokio::time::sleep(Duration::from_millis(300)).await;
        match &*display.borrow_and_update() {
            DisplayUpdate::Predicted(p) => assert_eq!(p.class, 7),
            other => panic!("unexpected update: {:?}", other),
        }

        surface.clear();
        assert_eq!(*display.borrow_and_update(), DisplayUpdate::Blank);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*display.borrow_and_update(), DisplayUpdate::NoInput);
        assert_eq!(spy.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick() {
        let spy = Arc::new(SpyClassifier::default());
        let (surface, scheduler) = setup(spy.clone());
        surface.paint(3, 3);

        scheduler.start().unwrap();
        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(spy.calls(), 0);
        assert!(scheduler.start().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_loop() {
        let spy = Arc::new(SpyClassifier::failing());
        let (surface, scheduler) = setup(spy.clone());
        surface.paint(3, 3);

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100 + 300 * 3 + 50)).await;
        assert_eq!(spy.calls(), 4);
        assert_eq!(scheduler.stats().failures, 4);
        assert!(scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_loop() {
        let spy = Arc::new(SpyClassifier::default());
        let (surface, scheduler) = setup(spy.clone());
        surface.paint(3, 3);

        scheduler.start().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(scheduler);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(spy.calls(), 1);
    }
}
