//! 学習コアのエラー型
//!
//! コーパス形式エラー・空シーケンス・I/Oエラーはすべて致命的で、
//! リトライ経路は存在しない（オフライン一括学習のため）。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    /// コーパスの形式エラー（カテゴリ欄・トークン欄の不正など）
    #[error("corpus parse error at {path}:{line}: {reason}")]
    Corpus {
        path: String,
        line: usize,
        reason: String,
    },

    /// 長さ0のシーケンスが学習/評価に到達した
    #[error("sequence {seq_id} has zero length")]
    EmptySequence { seq_id: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainError {
    pub fn corpus(path: &str, line: usize, reason: impl Into<String>) -> Self {
        Self::Corpus {
            path: path.to_string(),
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrainError>;
