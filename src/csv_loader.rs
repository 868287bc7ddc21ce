use crate::types::{InputAction, PointerEvent};
use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

/// 記録されたポインタ操作を読み込む
///
/// 列: `t_ms,action,x,y`（action は down / drag (move) / clear。clear の x, y は空でよい）
pub fn load_csv(path: &Path) -> Result<Vec<PointerEvent>> {
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("CSVを開けません: {}", path.display()))?;
    read_events(reader)
}

/// 任意のリーダーから読み込む
pub fn load_from_reader<R: Read>(rdr: R) -> Result<Vec<PointerEvent>> {
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(rdr);
    read_events(reader)
}

/// CSVの1行。clear の座標は空でよい
#[derive(Debug, Deserialize)]
struct TraceRecord {
    t_ms: u64,
    action: InputAction,
    x: Option<i32>,
    y: Option<i32>,
}

impl TraceRecord {
    fn into_event(self) -> Result<PointerEvent> {
        let (x, y) = match (self.action, self.x, self.y) {
            (InputAction::Clear, x, y) => (x.unwrap_or(0), y.unwrap_or(0)),
            (_, Some(x), Some(y)) => (x, y),
            (_, None, _) => bail!("Missing x"),
            (_, _, None) => bail!("Missing y"),
        };
        Ok(PointerEvent {
            t_ms: self.t_ms,
            action: self.action,
            x,
            y,
        })
    }
}

fn read_events<R: Read>(mut reader: csv::Reader<R>) -> Result<Vec<PointerEvent>> {
    let mut events = Vec::new();

    for (i, result) in reader.deserialize::<TraceRecord>().enumerate() {
        // ヘッダーの次が2行目
        let line = i + 2;
        let event = result
            .map_err(anyhow::Error::from)
            .and_then(TraceRecord::into_event)
            .with_context(|| format!("{}行目", line))?;
        events.push(event);
    }

    // 時刻順に再生する
    events.sort_by_key(|e| e.t_ms);
    Ok(events)
}
