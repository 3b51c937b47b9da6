//! スパース勾配アキュムレータ
//!
//! バッチ内全サンプルのサンプル単位勾配を、provenance インデックスに従って
//! 共有の勾配バッファに合算する。複数サンプルの勝者行が同じ行に重なっても
//! 単純に加算されるだけで済むよう、このフェーズは厳密に直列で走る。
//!
//! 不変条件: 触れた行の勾配は、どの特徴経路から来たものであれ、
//! オプティマイザがその行に触れる前にすべて合算済みである。合算された
//! バッファは直後のオプティマイザステップで完全に消費（ゼロ化）される。

use std::collections::BTreeSet;

use crate::dataset::Dataset;
use crate::features::SampleSlot;
use crate::model::Model;
use crate::params::LAMBDA;

/// バッチ1回分の勾配バッファと、このバッチで触れた埋め込み行の集合
pub struct GradAccumulator {
    /// パラメータストアと同一形状の勾配バッファ
    pub grad: Model,
    /// このバッチで勾配が入った word_orig の行
    pub touched_word: BTreeSet<usize>,
    /// このバッチで勾配が入った word_bi の行
    pub touched_word_bi: BTreeSet<usize>,
    /// このバッチで勾配が入った pos_orig の行
    pub touched_pos: BTreeSet<usize>,
    /// このバッチで勾配が入った pos_bi の行
    pub touched_pos_bi: BTreeSet<usize>,
}

impl GradAccumulator {
    pub fn new(shape: &Model) -> Self {
        Self {
            grad: Model::zeros_like(shape),
            touched_word: BTreeSet::new(),
            touched_word_bi: BTreeSet::new(),
            touched_pos: BTreeSet::new(),
            touched_pos_bi: BTreeSet::new(),
        }
    }

    /// バッチ内全サンプルの勾配を 1/batch_size で合算する
    ///
    /// 端数バッチでも割るのは設定上のバッチサイズ（実サンプル数ではない）。
    pub fn accumulate(&mut self, data: &Dataset, slots: &[SampleSlot], batch_size: usize) {
        let dim = self.grad.em_dim;
        let categories = self.grad.categories;
        let inv_batch = 1.0 / batch_size as f32;

        for slot in slots {
            // 密な勾配（重み行列・バイアス）
            for k in 0..categories * dim {
                self.grad.w_orig[k] += slot.grad_w_orig[k] * inv_batch;
                self.grad.w_bi[k] += slot.grad_w_bi[k] * inv_batch;
                self.grad.w_pos[k] += slot.grad_w_pos[k] * inv_batch;
                self.grad.w_bipos[k] += slot.grad_w_bipos[k] * inv_batch;
            }
            for c in 0..categories {
                self.grad.bias[c] += slot.grad_b[c] * inv_batch;
            }

            // 埋め込み行への疎な勾配ルーティング
            let tokens = data.tokens(slot.seq_id);
            let inv_batch_len = inv_batch / tokens.len() as f32;
            for &tok in tokens {
                self.touched_word.insert(tok as usize);
            }

            for j in 0..dim {
                // 平均特徴：系列の全トークン行へファンアウト（さらに 1/len）
                for &tok in tokens {
                    self.grad.word_orig[tok as usize * dim + j] +=
                        slot.grad_avg[j] * inv_batch_len;
                }

                // 位置つき max 特徴：勝者の単語行は等倍、位置行は λ 倍
                let word_row = slot.pos_word_rows[j];
                self.grad.word_orig[word_row * dim + j] += slot.grad_pos[j] * inv_batch;
                self.touched_word.insert(word_row);

                let pos_row = slot.pos_pos_rows[j];
                self.grad.pos_orig[pos_row * dim + j] += LAMBDA * slot.grad_pos[j] * inv_batch;
                self.touched_pos.insert(pos_row);

                // バイグラム max 特徴：勝者2行に等分
                let [b0, b1] = slot.bi_rows[j];
                let half = 0.5 * slot.grad_bi[j] * inv_batch;
                self.grad.word_bi[b0 * dim + j] += half;
                self.grad.word_bi[b1 * dim + j] += half;
                self.touched_word_bi.insert(b0);
                self.touched_word_bi.insert(b1);

                // バイグラム位置つき max 特徴：word_bi 2行に等分、pos_bi 2行に λ 倍で等分
                let [c0, c1] = slot.bipos_word_rows[j];
                let half = 0.5 * slot.grad_bipos[j] * inv_batch;
                self.grad.word_bi[c0 * dim + j] += half;
                self.grad.word_bi[c1 * dim + j] += half;
                self.touched_word_bi.insert(c0);
                self.touched_word_bi.insert(c1);

                let [p0, p1] = slot.bipos_pos_rows[j];
                let half = 0.5 * LAMBDA * slot.grad_bipos[j] * inv_batch;
                self.grad.pos_bi[p0 * dim + j] += half;
                self.grad.pos_bi[p1 * dim + j] += half;
                self.touched_pos_bi.insert(p0);
                self.touched_pos_bi.insert(p1);
            }
        }
    }

    /// すべての勾配スロットがゼロか（ステップ後の検証用）
    pub fn is_drained(&self) -> bool {
        let g = &self.grad;
        g.word_orig.iter().all(|&x| x == 0.0)
            && g.word_bi.iter().all(|&x| x == 0.0)
            && g.pos_orig.iter().all(|&x| x == 0.0)
            && g.pos_bi.iter().all(|&x| x == 0.0)
            && g.w_orig.iter().all(|&x| x == 0.0)
            && g.w_bi.iter().all(|&x| x == 0.0)
            && g.w_pos.iter().all(|&x| x == 0.0)
            && g.w_bipos.iter().all(|&x| x == 0.0)
            && g.bias.iter().all(|&x| x == 0.0)
    }
}
