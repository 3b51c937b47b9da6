//! パラメータストア
//!
//! 4つの埋め込みテーブルと4つの全結合重み行列、バイアスを所有する。
//! すべて row-major の flat `Vec<f32>`。同一形状のゼロバッファは
//! 勾配アキュムレータと Adam のモーメントにも再利用される。

use rand::Rng;

use crate::params::EMBED_RANGE;

/// flat バッファから i 行目のスライスを取り出す
#[inline]
pub fn row(buf: &[f32], dim: usize, i: usize) -> &[f32] {
    &buf[i * dim..(i + 1) * dim]
}

/// 学習対象パラメータ一式
#[derive(Clone)]
pub struct Model {
    /// 単語埋め込み [vocab][dim]
    pub word_orig: Vec<f32>,
    /// バイグラム用単語埋め込み [vocab][dim]
    pub word_bi: Vec<f32>,
    /// 位置埋め込み [max_len][dim]
    pub pos_orig: Vec<f32>,
    /// バイグラム用位置埋め込み [max_len][dim]
    pub pos_bi: Vec<f32>,
    /// 全結合重み（平均プーリング特徴） [categories][dim]
    pub w_orig: Vec<f32>,
    /// 全結合重み（バイグラム特徴） [categories][dim]
    pub w_bi: Vec<f32>,
    /// 全結合重み（位置特徴） [categories][dim]
    pub w_pos: Vec<f32>,
    /// 全結合重み（バイグラム位置特徴） [categories][dim]
    pub w_bipos: Vec<f32>,
    /// 全結合バイアス [categories]
    pub bias: Vec<f32>,

    pub em_dim: usize,
    pub vocab: usize,
    pub categories: usize,
    pub max_len: usize,
}

impl Model {
    /// ゼロ初期化されたバッファ一式を作る
    ///
    /// 勾配アキュムレータと Adam の m/v にも同じ形状が必要なため、
    /// ランダム初期化とは独立したコンストラクタになっている。
    pub fn zeros(em_dim: usize, vocab: usize, categories: usize, max_len: usize) -> Self {
        Self {
            word_orig: vec![0.0; vocab * em_dim],
            word_bi: vec![0.0; vocab * em_dim],
            pos_orig: vec![0.0; max_len * em_dim],
            pos_bi: vec![0.0; max_len * em_dim],
            w_orig: vec![0.0; categories * em_dim],
            w_bi: vec![0.0; categories * em_dim],
            w_pos: vec![0.0; categories * em_dim],
            w_bipos: vec![0.0; categories * em_dim],
            bias: vec![0.0; categories],
            em_dim,
            vocab,
            categories,
            max_len,
        }
    }

    /// `shape` と同一形状のゼロバッファ
    pub fn zeros_like(shape: &Model) -> Self {
        Self::zeros(shape.em_dim, shape.vocab, shape.categories, shape.max_len)
    }

    /// ランダム初期化
    ///
    /// 単語テーブルは [-EMBED_RANGE, EMBED_RANGE] の一様分布、位置テーブルは
    /// 固定の正弦波パターン（偶数次元 sin / 奇数次元 cos）、重みとバイアスは
    /// [-1/√(2·dim), 1/√(2·dim)] の一様分布。
    pub fn init_random<R: Rng>(
        em_dim: usize,
        vocab: usize,
        categories: usize,
        max_len: usize,
        rng: &mut R,
    ) -> Self {
        let mut model = Self::zeros(em_dim, vocab, categories, max_len);

        for w in model.word_orig.iter_mut() {
            *w = rng.random_range(-EMBED_RANGE..EMBED_RANGE);
        }
        for w in model.word_bi.iter_mut() {
            *w = rng.random_range(-EMBED_RANGE..EMBED_RANGE);
        }

        // 位置テーブルは語彙に依存しない正弦波で初期化する（以後は通常どおり更新される）
        for i in 0..max_len {
            for j in 0..em_dim {
                let exponent = (j - j % 2) as f64 / em_dim as f64;
                let angle = i as f64 / (max_len as f64).powf(exponent);
                let value = if j % 2 == 0 {
                    EMBED_RANGE * angle.sin() as f32
                } else {
                    EMBED_RANGE * angle.cos() as f32
                };
                model.pos_orig[i * em_dim + j] = value;
                model.pos_bi[i * em_dim + j] = value;
            }
        }

        let stdv = 1.0 / ((2 * em_dim) as f32).sqrt();
        for w in model.w_orig.iter_mut() {
            *w = rng.random_range(-stdv..stdv);
        }
        for w in model.w_bi.iter_mut() {
            *w = rng.random_range(-stdv..stdv);
        }
        for w in model.w_pos.iter_mut() {
            *w = rng.random_range(-stdv..stdv);
        }
        for w in model.w_bipos.iter_mut() {
            *w = rng.random_range(-stdv..stdv);
        }
        for b in model.bias.iter_mut() {
            *b = rng.random_range(-stdv..stdv);
        }

        model
    }

    /// パラメータ総数
    pub fn param_count(&self) -> usize {
        2 * self.vocab * self.em_dim
            + 2 * self.max_len * self.em_dim
            + 4 * self.categories * self.em_dim
            + self.categories
    }
}
