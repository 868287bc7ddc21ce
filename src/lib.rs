mod types;
mod csv_loader;

pub mod canvas;
pub mod classifier;
pub mod display;
pub mod grid;
pub mod logging;
pub mod model;
pub mod scheduler;
#[cfg(feature = "ml")]
pub mod ml;

pub use canvas::CanvasGeometry;
pub use classifier::Classifier;
pub use csv_loader::{load_csv, load_from_reader};
pub use display::Publisher;
pub use grid::{Grid, GridSurface, Snapshot};
pub use model::AppConfig;
pub use scheduler::{InferenceScheduler, PollTiming, SchedulerStats, TickOutcome};
pub use types::{
    DisplayUpdate, InputAction, PointerEvent, Prediction, SchedulerState, NUM_CLASSES,
};

use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// 描画面・推論スケジューラ・表示チャネルをまとめたもの
pub struct LivePad {
    pub config: AppConfig,
    pub publisher: Publisher,
    pub surface: GridSurface,
    pub scheduler: InferenceScheduler,
}

/// 入力の与え方
pub enum InputSource {
    /// 記録されたポインタ操作を時刻どおりに再生
    Trace(Vec<PointerEvent>),
    /// 画像を読み込んでグリッドに焼き付ける
    Image(PathBuf),
}

impl LivePad {
    pub fn new(config: AppConfig, classifier: Arc<dyn Classifier>) -> Self {
        let publisher = Publisher::new();
        let surface = GridSurface::new(config.geometry(), publisher.clone());
        let scheduler = InferenceScheduler::new(surface.clone(), classifier, config.timing());
        Self {
            config,
            publisher,
            surface,
            scheduler,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.scheduler.start()
    }

    /// ウィンドウを閉じるときの後始末
    pub fn shutdown(&self) {
        self.scheduler.stop();
    }
}

/// ポインタ操作を記録時刻どおりに描画面へ流す
pub async fn replay(surface: GridSurface, events: Vec<PointerEvent>) {
    let start = Instant::now();
    for event in events {
        tokio::time::sleep_until(start + Duration::from_millis(event.t_ms)).await;
        if surface.handle_pointer(&event) {
            log::trace!("[Input] {:?} ({}, {})", event.action, event.x, event.y);
        }
    }
    log::debug!("[Input] 再生完了: {} セル", surface.painted_count());
}

/// ライブ推論を実行する
///
/// `shutdown` が完了するまで表示の更新ごとに `on_update` を呼び、最後にスケジューラを停止する。
pub async fn run<F, S>(
    pad: &LivePad,
    input: Option<InputSource>,
    shutdown: S,
    mut on_update: F,
) -> Result<SchedulerStats>
where
    F: FnMut(&DisplayUpdate),
    S: Future<Output = ()>,
{
    let mut display = pad.publisher.subscribe();

    if let Some(InputSource::Image(path)) = &input {
        pad.surface.load_image(path, pad.config.grid.image_threshold)?;
    }

    // 開始に失敗したら入力は流さない
    pad.start()?;

    let replay_task = match input {
        Some(InputSource::Trace(events)) => {
            log::info!("[Input] {} 件の操作を再生します", events.len());
            Some(tokio::spawn(replay(pad.surface.clone(), events)))
        }
        _ => None,
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = display.changed() => {
                if changed.is_err() {
                    break;
                }
                let update = display.borrow_and_update().clone();
                on_update(&update);
            }
        }
    }

    pad.shutdown();
    if let Some(task) = replay_task {
        task.abort();
    }

    let stats = pad.scheduler.stats();
    log::info!(
        "[Scheduler] tick {} 回, 推論 {} 回, 入力なし {} 回, 失敗 {} 回",
        stats.ticks,
        stats.predictions,
        stats.empty_polls,
        stats.failures
    );
    Ok(stats)
}

/// 終了シグナルを待つ
///
/// シグナルの登録に失敗した場合はログを残して永久に待つ（他の終了条件に任せる）。
pub async fn interrupted<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        log::error!("[Signal] Ctrl+C を待てません: {}", e);
        std::future::pending::<()>().await;
    }
}
