//! テキスト分類器の学習ライブラリ
//!
//! 単語・バイグラム・位置埋め込みをプーリングした4特徴の線形分類器を、
//! 疎な勾配に対応した lazy Adam で学習する。CSV ライクなトークン化済み
//! コーパスを読み、エポックごとに損失と検証精度を報告し、学習後に
//! 単語埋め込みをテキスト形式で書き出せる。

pub mod accumulate;
pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod export;
pub mod features;
pub mod gradient;
pub mod logging;
pub mod model;
pub mod optimizer;
pub mod params;
pub mod trainer;

pub use config::TrainConfig;
pub use dataset::Dataset;
pub use error::{Result, TrainError};
pub use eval::{evaluate, EvalReport};
pub use export::export_embeddings;
pub use model::Model;
pub use trainer::Trainer;
