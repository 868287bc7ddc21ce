//! キャンバス座標とグリッドセルの対応

use serde::{Deserialize, Serialize};

/// キャンバスの幾何情報
///
/// 1セルは `cell_size` ピクセル四方。キャンバス全体は
/// `grid_size * cell_size` ピクセル四方。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasGeometry {
    pub grid_size: usize,
    pub cell_size: usize,
}

impl CanvasGeometry {
    pub fn new(grid_size: usize, cell_size: usize) -> Self {
        Self { grid_size, cell_size }
    }

    /// キャンバスの一辺（ピクセル）
    pub fn canvas_size(&self) -> usize {
        self.grid_size * self.cell_size
    }

    /// ピクセル座標を (row, col) に変換
    ///
    /// キャンバス外の座標は `None`。
    pub fn cell_at(&self, x: i32, y: i32) -> Option<(usize, usize)> {
        if x < 0 || y < 0 || self.cell_size == 0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        let size = self.canvas_size();
        if x >= size || y >= size {
            return None;
        }
        Some((y / self.cell_size, x / self.cell_size))
    }
}

impl Default for CanvasGeometry {
    fn default() -> Self {
        Self::new(28, 10)
    }
}
