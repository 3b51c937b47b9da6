//! train_textgram - トークン化済みコーパスから線形テキスト分類器を学習
//!
//! 1行 `カテゴリ,<token_id> <token_id> ...` 形式のコーパスを読み、
//! 単語・バイグラム・位置埋め込みのプーリング特徴による線形分類器を
//! lazy Adam で学習する。学習後はテスト分割の精度を報告し、必要なら
//! 単語埋め込みをテキスト形式で書き出す。
//!
//! # 使用例
//!
//! ```bash
//! # 基本的な使用法
//! cargo run -p textgram --bin train_textgram -- \
//!   --train train.csv --vocab 30000 --categories 4
//!
//! # 検証・テスト分割と埋め込み出力つき
//! cargo run -p textgram --bin train_textgram -- \
//!   --train train.csv --valid valid.csv --test test.csv \
//!   --vocab 30000 --categories 4 --em-path embeddings.txt
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use textgram::logging::StructuredLogger;
use textgram::{evaluate, export_embeddings, Dataset, TrainConfig, Trainer};

/// プーリング特徴つき線形テキスト分類器の学習
#[derive(Parser)]
#[command(
    name = "train_textgram",
    version,
    about = "Train a pooled-embedding linear text classifier"
)]
struct Cli {
    /// 学習コーパス
    #[arg(long)]
    train: PathBuf,

    /// 検証コーパス（エポックごとに精度を報告）
    #[arg(long)]
    valid: Option<PathBuf>,

    /// テストコーパス（学習終了後に精度を報告）
    #[arg(long)]
    test: Option<PathBuf>,

    /// 埋め込み次元
    #[arg(long, default_value_t = 200)]
    dim: usize,

    /// 語彙サイズ
    #[arg(long)]
    vocab: usize,

    /// カテゴリ数
    #[arg(long)]
    categories: usize,

    /// エポック数
    #[arg(short, long, default_value_t = 10)]
    epochs: usize,

    /// バッチサイズ
    #[arg(short, long, default_value_t = 2000)]
    batch_size: usize,

    /// 並列処理スレッド数（0=自動）
    #[arg(short, long, default_value_t = 20)]
    threads: usize,

    /// 学習率（Adam の α）
    #[arg(long, default_value_t = 0.001)]
    lr: f32,

    /// 使用する語彙の割合 (0, 1]。id >= limit_vocab*vocab のトークンは捨てる
    #[arg(long, default_value_t = 1.0)]
    limit_vocab: f32,

    /// シード値
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// 単語埋め込みの出力先（省略時は出力しない）
    #[arg(long)]
    em_path: Option<PathBuf>,

    /// 出力する埋め込みの行数（0=全語彙）
    #[arg(long, default_value_t = 0)]
    em_len: usize,

    /// 構造化JSONLメトリクスの出力先（'-' で stdout）
    #[arg(long)]
    metrics: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if !(cli.limit_vocab > 0.0 && cli.limit_vocab <= 1.0) {
        anyhow::bail!("--limit-vocab must be in (0, 1], got {}", cli.limit_vocab);
    }
    if cli.vocab == 0 || cli.categories == 0 {
        anyhow::bail!("--vocab and --categories must be > 0");
    }
    if cli.batch_size == 0 {
        anyhow::bail!("--batch-size must be > 0");
    }

    // スレッド数を設定
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to set thread count: {e}");
            });
    }

    let config = TrainConfig {
        em_dim: cli.dim,
        vocab: cli.vocab,
        categories: cli.categories,
        epochs: cli.epochs,
        batch_size: cli.batch_size,
        threads: cli.threads,
        learning_rate: cli.lr,
        limit_vocab: cli.limit_vocab,
        seed: cli.seed,
    };
    let vocab_limit = config.vocab_limit();

    let train_data = Dataset::load(&cli.train, vocab_limit, cli.categories)
        .with_context(|| format!("failed to load training corpus {}", cli.train.display()))?;
    if train_data.is_empty() {
        anyhow::bail!("training corpus {} has no usable sequences", cli.train.display());
    }
    let vali_data = cli
        .valid
        .as_deref()
        .map(|p| {
            Dataset::load(p, vocab_limit, cli.categories)
                .with_context(|| format!("failed to load validation corpus {}", p.display()))
        })
        .transpose()?;
    let test_data = cli
        .test
        .as_deref()
        .map(|p| {
            Dataset::load(p, vocab_limit, cli.categories)
                .with_context(|| format!("failed to load test corpus {}", p.display()))
        })
        .transpose()?;

    let metrics = cli
        .metrics
        .as_deref()
        .and_then(|p| match StructuredLogger::new(p) {
            Ok(logger) => Some(logger),
            Err(e) => {
                eprintln!("Warning: failed to open metrics log '{p}': {e}");
                None
            }
        });

    // 位置テーブルはどの分割の系列にも届く行数が必要
    let max_len = train_data
        .max_len()
        .max(vali_data.as_ref().map_or(0, Dataset::max_len))
        .max(test_data.as_ref().map_or(0, Dataset::max_len));

    let mut trainer = Trainer::new(config, max_len);
    info!(
        "model: dim {}, vocab {}, categories {}, max sequence length {}, {} parameters",
        trainer.model.em_dim,
        trainer.model.vocab,
        trainer.model.categories,
        max_len,
        trainer.model.param_count()
    );

    trainer.train(&train_data, vali_data.as_ref(), metrics.as_ref())?;

    if let Some(test) = test_data.as_ref() {
        let report = evaluate(&trainer.model, test, cli.batch_size)?;
        textgram::eval::log_report(&report, "test");
        if let Some(metrics) = metrics.as_ref() {
            metrics.write_json(&serde_json::json!({
                "event": "test",
                "samples": report.evaluated(),
                "accuracy": report.macro_accuracy(),
            }));
        }
    }

    if let Some(em_path) = cli.em_path.as_deref() {
        export_embeddings(&trainer.model, em_path, cli.em_len)
            .with_context(|| format!("failed to write embeddings to {}", em_path.display()))?;
        info!("wrote word embeddings to {}", em_path.display());
    }

    Ok(())
}
