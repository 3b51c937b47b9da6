//! 逆伝播（勾配計算）
//!
//! exp 済みロジットから出力層誤差を作り、サンプル単位の重み勾配と
//! プーリング特徴レベルの勾配を計算する。埋め込み行への勾配の
//! ルーティングはここでは行わない（accumulate が担当する。複数サンプルの
//! 勝者行が重なると並列実行で加算が競合するため、直列フェーズに遅延させる）。

use crate::features::SampleSlot;
use crate::model::{row, Model};

/// 逆伝播
///
/// forward 直後の `slot`（exp 済みロジット入り）を前提とする。
pub fn backward(model: &Model, gold: usize, slot: &mut SampleSlot) {
    let dim = model.em_dim;

    // softmax cross-entropy の出力層誤差: exp(l_c)/Σ - [c == gold]
    let exp_sum: f32 = slot.logits.iter().sum();
    for (err, &exp_logit) in slot.out_err.iter_mut().zip(slot.logits.iter()) {
        *err = exp_logit / exp_sum;
    }
    slot.out_err[gold] -= 1.0;

    slot.grad_b.copy_from_slice(&slot.out_err);

    // 重み勾配 = 特徴 ⊗ 誤差
    for c in 0..model.categories {
        let err = slot.out_err[c];
        for j in 0..dim {
            slot.grad_w_orig[c * dim + j] = slot.avg[j] * err;
            slot.grad_w_bi[c * dim + j] = slot.bi[j] * err;
            slot.grad_w_pos[c * dim + j] = slot.pos[j] * err;
            slot.grad_w_bipos[c * dim + j] = slot.bipos[j] * err;
        }
    }

    // 特徴レベル勾配 = Wᵀ·誤差（線形層を通すところまで）
    slot.grad_avg.fill(0.0);
    slot.grad_bi.fill(0.0);
    slot.grad_pos.fill(0.0);
    slot.grad_bipos.fill(0.0);
    for c in 0..model.categories {
        let err = slot.out_err[c];
        let w_orig = row(&model.w_orig, dim, c);
        let w_bi = row(&model.w_bi, dim, c);
        let w_pos = row(&model.w_pos, dim, c);
        let w_bipos = row(&model.w_bipos, dim, c);
        for j in 0..dim {
            slot.grad_avg[j] += w_orig[j] * err;
            slot.grad_bi[j] += w_bi[j] * err;
            slot.grad_pos[j] += w_pos[j] * err;
            slot.grad_bipos[j] += w_bipos[j] * err;
        }
    }
}
