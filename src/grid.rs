//! 描画グリッド
//!
//! セルは 0.0（空白）か 1.0（塗りつぶし）のどちらか。サイズは作成時に固定。
//! 推論側にはコピー（スナップショット）のみを渡し、内部の配列は共有しない。

use crate::canvas::CanvasGeometry;
use crate::display::Publisher;
use crate::types::{DisplayUpdate, InputAction, PointerEvent};
use anyhow::{Context, Result};
use image::imageops::FilterType;
use ndarray::{Array2, Array4, Axis};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 推論入力 (batch=1, height, width, channel=1)
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    data: Array4<f32>,
}

impl Snapshot {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.data.shape();
        [s[0], s[1], s[2], s[3]]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn sum(&self) -> f32 {
        self.data.sum()
    }

    /// 何も描かれていないか（合計が0）
    pub fn is_blank(&self) -> bool {
        self.sum() == 0.0
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        self.data.get((0, row, col, 0)).copied()
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    /// NHWC順に平坦化した値
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// 値が0でないセルの (row, col) 一覧
    pub fn painted_cells(&self) -> Vec<(usize, usize)> {
        self.data
            .indexed_iter()
            .filter(|(_, v)| **v != 0.0)
            .map(|((_, row, col, _), _)| (row, col))
            .collect()
    }
}

/// 正方形の描画グリッド
#[derive(Debug, Clone)]
pub struct Grid {
    cells: Array2<f32>,
}

impl Grid {
    pub fn new(size: usize) -> Self {
        Self {
            cells: Array2::zeros((size, size)),
        }
    }

    pub fn size(&self) -> usize {
        self.cells.nrows()
    }

    /// セルを塗る。範囲外は何もしない
    ///
    /// 戻り値: セルが新たに塗られたか
    pub fn paint(&mut self, row: usize, col: usize) -> bool {
        match self.cells.get_mut((row, col)) {
            Some(cell) if *cell == 0.0 => {
                *cell = 1.0;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.cells.fill(0.0);
    }

    pub fn is_painted(&self, row: usize, col: usize) -> bool {
        self.cells.get((row, col)).is_some_and(|v| *v != 0.0)
    }

    pub fn painted_count(&self) -> usize {
        self.cells.iter().filter(|v| **v != 0.0).count()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            data: self.cells.clone().insert_axis(Axis(0)).insert_axis(Axis(3)),
        }
    }

    /// グレースケール画像をグリッドに焼き付ける
    ///
    /// 画像はグリッドサイズに縮小され、インクの濃さが `threshold` 以上のセルを塗る。
    /// 背景が暗い画像（平均輝度が128未満）は明るい画素をインクとみなす。
    pub fn paint_image(&mut self, img: &image::GrayImage, threshold: u8) -> usize {
        let size = self.size() as u32;
        let resized = image::imageops::resize(img, size, size, FilterType::Triangle);

        let total: u64 = resized.pixels().map(|p| p[0] as u64).sum();
        let dark_background = total < 128 * (size as u64 * size as u64);

        let mut painted = 0;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let ink = if dark_background { pixel[0] } else { 255 - pixel[0] };
            if ink >= threshold && self.paint(y as usize, x as usize) {
                painted += 1;
            }
        }
        painted
    }
}

/// 描画面（共有ハンドル）
///
/// 入力イベント処理とスケジューラの両方から使われる。
/// クリア時は表示中の推論結果も無効化する。
#[derive(Clone)]
pub struct GridSurface {
    grid: Arc<Mutex<Grid>>,
    geometry: CanvasGeometry,
    publisher: Publisher,
}

impl GridSurface {
    pub fn new(geometry: CanvasGeometry, publisher: Publisher) -> Self {
        Self {
            grid: Arc::new(Mutex::new(Grid::new(geometry.grid_size))),
            geometry,
            publisher,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Grid> {
        self.grid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn geometry(&self) -> CanvasGeometry {
        self.geometry
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn paint(&self, row: usize, col: usize) {
        self.lock().paint(row, col);
    }

    /// 全セルを空白に戻し、表示を `Blank` に戻す
    pub fn clear(&self) {
        self.lock().clear();
        self.publisher.publish(DisplayUpdate::Blank);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    pub fn painted_count(&self) -> usize {
        self.lock().painted_count()
    }

    /// ポインタイベントを処理
    ///
    /// 戻り値: グリッドが変化したか
    pub fn handle_pointer(&self, event: &PointerEvent) -> bool {
        match event.action {
            InputAction::Down | InputAction::Drag => match self.geometry.cell_at(event.x, event.y) {
                Some((row, col)) => self.lock().paint(row, col),
                None => false,
            },
            InputAction::Clear => {
                self.clear();
                true
            }
        }
    }

    /// 画像ファイルを読み込んでグリッドを置き換える
    pub fn load_image<P: AsRef<Path>>(&self, path: P, threshold: u8) -> Result<usize> {
        let path = path.as_ref();
        let img = image::open(path)
            .with_context(|| format!("画像の読み込みに失敗しました: {}", path.display()))?
            .to_luma8();

        let painted = {
            let mut grid = self.lock();
            grid.clear();
            grid.paint_image(&img, threshold)
        };
        self.publisher.publish(DisplayUpdate::Blank);
        log::info!("[Grid] 画像を読み込みました: {} ({} セル)", path.display(), painted);
        Ok(painted)
    }
}
