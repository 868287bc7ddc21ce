//! テスト用: 画像をグリッドに読み込んで1回だけ推論し、結果を表示する簡易バイナリ

#[cfg(feature = "ml")]
fn main() {
    use digit_pad_lib::ml::load_classifier;
    use digit_pad_lib::{logging, AppConfig, LivePad, TickOutcome};
    use std::path::PathBuf;

    logging::init_logging();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: classify_image <image_path> [config.json]");
        return;
    }

    let image_path = PathBuf::from(&args[1]);
    let config_path = args.get(2).map(PathBuf::from).unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_default(&config_path);
    let threshold = config.grid.image_threshold;

    let classifier = load_classifier(&config);
    let pad = LivePad::new(config, classifier);

    match pad.surface.load_image(&image_path, threshold) {
        Ok(painted) => println!("✓ 画像読み込み: {} ({} セル)", image_path.display(), painted),
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            return;
        }
    }

    // グリッドを表示
    let snapshot = pad.surface.snapshot();
    for row in 0..snapshot.height() {
        let line: String = (0..snapshot.width())
            .map(|col| if snapshot.get(row, col) == Some(1.0) { '#' } else { '.' })
            .collect();
        println!("{}", line);
    }

    match pad.scheduler.tick() {
        TickOutcome::Predicted(prediction) => {
            println!("Prediction: {} ({:.1}%)", prediction.class, prediction.confidence() * 100.0);
            for (digit, p) in prediction.probabilities.iter().enumerate() {
                let bar = "█".repeat((p * 40.0).round() as usize);
                println!("  {}: {:>6.2}% {}", digit, p * 100.0, bar);
            }
        }
        TickOutcome::NoInput => println!("Prediction: (waiting...) 画像に描画がありません"),
        TickOutcome::Failed(message) => eprintln!("✗ 推論エラー: {}", message),
        TickOutcome::Skipped => {}
    }
    pad.shutdown();
}

#[cfg(not(feature = "ml"))]
fn main() {
    eprintln!("classify_image は ml 機能を有効にしてビルドしてください");
}
