//! Adam オプティマイザ
//!
//! 密なパラメータ（重み行列・バイアス）は毎バッチ全要素を更新し、
//! 埋め込みテーブルはそのバッチで触れた行だけを更新する（lazy Adam）。
//! 疎フェーズは直列：異なる特徴経路で発見された行が重なっても、
//! 各行は1バッチにつき正確に1回だけステップされる。

use rayon::prelude::*;

use crate::accumulate::GradAccumulator;
use crate::model::Model;
use crate::params::{ADAM_BETA1, ADAM_BETA2, ADAM_EPSILON};

/// Adam のモーメントと減衰カウンタ
///
/// m/v はパラメータストアと同一形状で、学習実行全体を通じて保持される。
/// β1^t / β2^t は全パラメータで共有され、バッチごとに1回進む。
pub struct AdamState {
    m: Model,
    v: Model,
    pub beta1t: f32,
    pub beta2t: f32,
    alpha: f32,
}

/// 1要素分の Adam 更新。消費した勾配スロットはゼロに戻す
#[inline]
fn adam_update(
    param: &mut f32,
    grad: &mut f32,
    m: &mut f32,
    v: &mut f32,
    beta1t: f32,
    beta2t: f32,
    alpha: f32,
) {
    let g = *grad;
    *grad = 0.0;
    *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
    *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
    let m_hat = *m / (1.0 - beta1t);
    let v_hat = *v / (1.0 - beta2t);
    *param -= alpha * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
}

/// 密パラメータの並列更新（要素間に依存がないため rayon で分割できる）
fn update_dense(
    params: &mut [f32],
    grads: &mut [f32],
    m: &mut [f32],
    v: &mut [f32],
    beta1t: f32,
    beta2t: f32,
    alpha: f32,
) {
    params
        .par_iter_mut()
        .zip_eq(grads.par_iter_mut())
        .zip_eq(m.par_iter_mut().zip_eq(v.par_iter_mut()))
        .for_each(|((p, g), (m, v))| adam_update(p, g, m, v, beta1t, beta2t, alpha));
}

impl AdamState {
    pub fn new(shape: &Model, alpha: f32) -> Self {
        Self {
            m: Model::zeros_like(shape),
            v: Model::zeros_like(shape),
            beta1t: ADAM_BETA1,
            beta2t: ADAM_BETA2,
            alpha,
        }
    }

    /// 1バッチ分の更新：密フェーズ → 疎フェーズ → 減衰カウンタを進める
    ///
    /// アキュムレータは完全に消費され、触れた行の集合もクリアされる。
    pub fn step(&mut self, model: &mut Model, acc: &mut GradAccumulator) {
        self.step_dense(model, acc);
        self.step_sparse(model, acc);
        self.beta1t *= ADAM_BETA1;
        self.beta2t *= ADAM_BETA2;
    }

    fn step_dense(&mut self, model: &mut Model, acc: &mut GradAccumulator) {
        let (beta1t, beta2t, alpha) = (self.beta1t, self.beta2t, self.alpha);
        update_dense(
            &mut model.w_orig,
            &mut acc.grad.w_orig,
            &mut self.m.w_orig,
            &mut self.v.w_orig,
            beta1t,
            beta2t,
            alpha,
        );
        update_dense(
            &mut model.w_bi,
            &mut acc.grad.w_bi,
            &mut self.m.w_bi,
            &mut self.v.w_bi,
            beta1t,
            beta2t,
            alpha,
        );
        update_dense(
            &mut model.w_pos,
            &mut acc.grad.w_pos,
            &mut self.m.w_pos,
            &mut self.v.w_pos,
            beta1t,
            beta2t,
            alpha,
        );
        update_dense(
            &mut model.w_bipos,
            &mut acc.grad.w_bipos,
            &mut self.m.w_bipos,
            &mut self.v.w_bipos,
            beta1t,
            beta2t,
            alpha,
        );

        // バイアスは要素数が少ないので直列で足りる
        for c in 0..model.categories {
            adam_update(
                &mut model.bias[c],
                &mut acc.grad.bias[c],
                &mut self.m.bias[c],
                &mut self.v.bias[c],
                beta1t,
                beta2t,
                alpha,
            );
        }
    }

    /// 疎フェーズ：触れた行だけ、勾配が入った要素だけをステップする
    ///
    /// 集約フェーズで行の勾配はすでに全経路分が合算済みなので、
    /// ここで行を1回ずつ歩けば二重ステップは起こらない。消費時に
    /// 勾配をゼロへ戻すため、仮に同じ行を再訪しても no-op になる。
    fn step_sparse(&mut self, model: &mut Model, acc: &mut GradAccumulator) {
        let dim = model.em_dim;
        let (beta1t, beta2t, alpha) = (self.beta1t, self.beta2t, self.alpha);
        let GradAccumulator {
            grad,
            touched_word,
            touched_word_bi,
            touched_pos,
            touched_pos_bi,
        } = acc;

        for &r in touched_word.iter() {
            for j in 0..dim {
                let k = r * dim + j;
                if grad.word_orig[k] != 0.0 {
                    adam_update(
                        &mut model.word_orig[k],
                        &mut grad.word_orig[k],
                        &mut self.m.word_orig[k],
                        &mut self.v.word_orig[k],
                        beta1t,
                        beta2t,
                        alpha,
                    );
                }
            }
        }
        for &r in touched_word_bi.iter() {
            for j in 0..dim {
                let k = r * dim + j;
                if grad.word_bi[k] != 0.0 {
                    adam_update(
                        &mut model.word_bi[k],
                        &mut grad.word_bi[k],
                        &mut self.m.word_bi[k],
                        &mut self.v.word_bi[k],
                        beta1t,
                        beta2t,
                        alpha,
                    );
                }
            }
        }
        for &r in touched_pos.iter() {
            for j in 0..dim {
                let k = r * dim + j;
                if grad.pos_orig[k] != 0.0 {
                    adam_update(
                        &mut model.pos_orig[k],
                        &mut grad.pos_orig[k],
                        &mut self.m.pos_orig[k],
                        &mut self.v.pos_orig[k],
                        beta1t,
                        beta2t,
                        alpha,
                    );
                }
            }
        }
        for &r in touched_pos_bi.iter() {
            for j in 0..dim {
                let k = r * dim + j;
                if grad.pos_bi[k] != 0.0 {
                    adam_update(
                        &mut model.pos_bi[k],
                        &mut grad.pos_bi[k],
                        &mut self.m.pos_bi[k],
                        &mut self.v.pos_bi[k],
                        beta1t,
                        beta2t,
                        alpha,
                    );
                }
            }
        }

        touched_word.clear();
        touched_word_bi.clear();
        touched_pos.clear();
        touched_pos_bi.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ADAM_EPSILON;

    fn small_shape() -> Model {
        Model::zeros(2, 3, 2, 3)
    }

    #[test]
    fn test_first_step_moves_param_against_gradient() {
        let shape = small_shape();
        let mut model = Model::zeros_like(&shape);
        let mut adam = AdamState::new(&shape, 0.001);
        let mut acc = GradAccumulator::new(&shape);

        acc.grad.w_orig[0] = 0.5;
        acc.grad.w_orig[1] = -0.25;
        acc.grad.bias[1] = 1.0;

        adam.step(&mut model, &mut acc);

        // t=1 では m̂ = g, v̂ = g² なので Δ = -α·g/(|g|+ε)
        let expected = |g: f32| -0.001 * g / (g.abs() + ADAM_EPSILON);
        assert!((model.w_orig[0] - expected(0.5)).abs() < 1e-9);
        assert!((model.w_orig[1] - expected(-0.25)).abs() < 1e-9);
        assert!((model.bias[1] - expected(1.0)).abs() < 1e-9);
        // 勾配ゼロの要素は t=1 では動かない（モーメントもゼロのまま）
        assert_eq!(model.w_orig[2], 0.0);
        assert_eq!(model.bias[0], 0.0);
    }

    #[test]
    fn test_sparse_step_touches_only_touched_rows() {
        let shape = small_shape();
        let mut model = Model::zeros_like(&shape);
        let mut adam = AdamState::new(&shape, 0.01);
        let mut acc = GradAccumulator::new(&shape);

        acc.grad.word_orig[2] = 0.3; // 行1, 次元0
        acc.touched_word.insert(1);

        adam.step(&mut model, &mut acc);

        assert!(model.word_orig[2] < 0.0);
        // 同じ行の勾配ゼロ要素と他の行は動かない
        assert_eq!(model.word_orig[3], 0.0);
        assert_eq!(model.word_orig[0], 0.0);
        assert!(acc.touched_word.is_empty());
    }

    #[test]
    fn test_row_with_multiple_contributions_gets_single_step() {
        let shape = small_shape();
        let mut model = Model::zeros_like(&shape);
        let mut adam = AdamState::new(&shape, 0.01);
        let mut acc = GradAccumulator::new(&shape);

        // 2つの特徴経路からの寄与が合算済みという想定
        acc.grad.word_bi[0] = 0.2 + 0.3;
        acc.touched_word_bi.insert(0);

        adam.step(&mut model, &mut acc);

        // 合算値での1ステップちょうど
        let g = 0.5f32;
        let expected = -0.01 * g / (g.abs() + ADAM_EPSILON);
        assert!((model.word_bi[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_step_drains_accumulator() {
        let shape = small_shape();
        let mut model = Model::zeros_like(&shape);
        let mut adam = AdamState::new(&shape, 0.001);
        let mut acc = GradAccumulator::new(&shape);

        acc.grad.w_orig.fill(0.1);
        acc.grad.w_bipos.fill(-0.2);
        acc.grad.bias.fill(0.3);
        acc.grad.word_orig[4] = 0.7;
        acc.touched_word.insert(2);
        acc.grad.pos_bi[1] = -0.4;
        acc.touched_pos_bi.insert(0);

        adam.step(&mut model, &mut acc);

        assert!(acc.is_drained());
        assert!(acc.touched_word.is_empty());
        assert!(acc.touched_pos_bi.is_empty());
    }

    #[test]
    fn test_decay_counters_advance_once_per_step() {
        let shape = small_shape();
        let mut model = Model::zeros_like(&shape);
        let mut adam = AdamState::new(&shape, 0.001);
        let mut acc = GradAccumulator::new(&shape);

        assert!((adam.beta1t - 0.9).abs() < 1e-7);
        adam.step(&mut model, &mut acc);
        assert!((adam.beta1t - 0.9 * 0.9).abs() < 1e-7);
        assert!((adam.beta2t - 0.999 * 0.999).abs() < 1e-7);
        adam.step(&mut model, &mut acc);
        assert!((adam.beta1t - 0.9f32.powi(3)).abs() < 1e-7);
    }
}
