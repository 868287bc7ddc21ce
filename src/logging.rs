//! ログ出力の初期化
//!
//! ライブラリ側は `log` マクロで出力し、バイナリ起動時にここで購読者を設定する。
//! レベルは `RUST_LOG` で上書きできる（未指定時は info）。

use std::io::IsTerminal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// グローバルなログ購読者を設定する。二度目以降の呼び出しは無視される
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    if Registry::default().with(filter).with(fmt_layer).try_init().is_err() {
        log::debug!("ログは既に初期化されています");
    }
}
