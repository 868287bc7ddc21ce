//! ライブ数字予測（ヘッドレス版）
//!
//! 記録したポインタ操作（CSV）または画像を描画面に流し、一定間隔で推論した結果を表示する。
//! Ctrl+C か指定時間の経過で終了する。

#[cfg(feature = "ml")]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    use digit_pad_lib::ml::load_classifier;
    use digit_pad_lib::{
        interrupted, load_csv, logging, AppConfig, DisplayUpdate, InputSource, LivePad,
    };
    use std::path::PathBuf;
    use std::time::Duration;

    logging::init_logging();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("Usage: digit_pad [config.json] [input.csv|image.png] [run_ms]");
        return;
    }

    let config_path = args.get(1).map(PathBuf::from).unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_default(&config_path);
    config.display();

    let input = match args.get(2) {
        Some(path) if path.to_lowercase().ends_with(".csv") => match load_csv(path.as_ref()) {
            Ok(events) => Some(InputSource::Trace(events)),
            Err(e) => {
                eprintln!("✗ 入力の読み込みエラー: {:#}", e);
                return;
            }
        },
        Some(path) => Some(InputSource::Image(PathBuf::from(path))),
        None => None,
    };
    let run_for = args.get(3).and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis);

    let classifier = load_classifier(&config);
    let pad = LivePad::new(config, classifier);

    let shutdown = async move {
        match run_for {
            Some(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(d) => {}
                    _ = interrupted(tokio::signal::ctrl_c()) => {}
                }
            }
            None => interrupted(tokio::signal::ctrl_c()).await,
        }
    };

    let result = digit_pad_lib::run(&pad, input, shutdown, |update| {
        println!("{}", update.label_text());
        if let DisplayUpdate::Predicted(prediction) = update {
            let bars: Vec<String> = prediction
                .probabilities
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{}:{:.2}", i, p))
                .collect();
            println!("  {}", bars.join(" "));
        }
    })
    .await;

    match result {
        Ok(stats) => match serde_json::to_string(&stats) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("✗ 統計の出力エラー: {}", e),
        },
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(not(feature = "ml"))]
fn main() {
    eprintln!("digit_pad は ml 機能を有効にしてビルドしてください");
}
