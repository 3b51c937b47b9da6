//! 学習設定
//!
//! CLI から構築され、以後は不変の設定として各コンポーネントに渡される。

/// 学習設定
#[derive(Clone, Debug)]
pub struct TrainConfig {
    /// 埋め込み次元
    pub em_dim: usize,
    /// 語彙サイズ
    pub vocab: usize,
    /// カテゴリ数
    pub categories: usize,
    /// エポック数
    pub epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカースレッド数
    pub threads: usize,
    /// 学習率（Adam の α）
    pub learning_rate: f32,
    /// 語彙の使用割合 (0, 1]。有効語彙数 = limit_vocab * vocab
    pub limit_vocab: f32,
    /// シード値
    pub seed: u64,
}

impl TrainConfig {
    /// フィルタリングに使う実効語彙上限
    pub fn vocab_limit(&self) -> usize {
        (self.limit_vocab as f64 * self.vocab as f64) as usize
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            em_dim: 200,
            vocab: 0,
            categories: 0,
            epochs: 10,
            batch_size: 2000,
            threads: 20,
            learning_rate: 0.001,
            limit_vocab: 1.0,
            seed: 42,
        }
    }
}
