//! 評価
//!
//! forward のみの並列パス。各ワーカーは自分のスロットで argmax 予測を
//! 出すだけで、カテゴリ別カウンタへの加算はバッチごとの直列フェーズで行う
//! （共有カウンタへの競合を避けるため）。

use log::info;
use rayon::prelude::*;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::features::{forward, SampleSlot};
use crate::model::Model;

/// カテゴリ別の正解数と出現数
pub struct EvalReport {
    pub correct: Vec<usize>,
    pub total: Vec<usize>,
}

impl EvalReport {
    /// 評価した系列数
    pub fn evaluated(&self) -> usize {
        self.total.iter().sum()
    }

    /// 全体精度 Σtrue/Σtotal
    pub fn macro_accuracy(&self) -> f32 {
        let correct: usize = self.correct.iter().sum();
        correct as f32 / self.evaluated() as f32
    }

    /// カテゴリ c の精度。出現数0のカテゴリは NaN（報告上の値であり、エラーではない）
    pub fn precision(&self, c: usize) -> f32 {
        self.correct[c] as f32 / self.total[c] as f32
    }
}

/// forward のみの評価パス
pub fn evaluate(model: &Model, data: &Dataset, batch_size: usize) -> Result<EvalReport> {
    let mut slots: Vec<SampleSlot> = (0..batch_size)
        .map(|_| SampleSlot::new(model.em_dim, model.categories))
        .collect();
    let mut preds = vec![0usize; batch_size];
    let mut correct = vec![0usize; model.categories];
    let mut total = vec![0usize; model.categories];

    let ids: Vec<usize> = (0..data.len()).collect();
    for chunk in ids.chunks(batch_size) {
        let n = chunk.len();

        // 並列フェーズ：スロット単位で forward と argmax
        slots[..n]
            .par_iter_mut()
            .zip_eq(preds[..n].par_iter_mut())
            .zip_eq(chunk.par_iter())
            .try_for_each(|((slot, pred), &seq_id)| -> Result<()> {
                forward(model, data, seq_id, slot)?;
                // exp は単調なので指数化済みの値でも argmax は変わらない
                let mut best = 0;
                for c in 1..model.categories {
                    if slot.logits[c] > slot.logits[best] {
                        best = c;
                    }
                }
                *pred = best;
                Ok(())
            })?;

        // 直列フェーズ：共有カウンタへの集計
        for (k, &seq_id) in chunk.iter().enumerate() {
            let label = data.label(seq_id);
            total[label] += 1;
            if preds[k] == label {
                correct[label] += 1;
            }
        }
    }

    Ok(EvalReport { correct, total })
}

/// 評価結果をログに書く
pub fn log_report(report: &EvalReport, split: &str) {
    info!(
        "{}: {} samples, macro accuracy {:.5}",
        split,
        report.evaluated(),
        report.macro_accuracy()
    );
    for c in 0..report.total.len() {
        info!("  category #{c} precision: {:.5}", report.precision(c));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::tiny_model;

    #[test]
    fn test_count_invariants() {
        let model = tiny_model();
        let data = Dataset::from_parts(vec![0, 1, 2, 1, 0], vec![2, 1, 2], vec![0, 1, 1]);
        let report = evaluate(&model, &data, 2).unwrap();

        assert_eq!(report.evaluated(), data.len());
        assert_eq!(report.total.iter().sum::<usize>(), 3);
        assert!(report.correct.iter().sum::<usize>() <= 3);
        assert_eq!(report.total, vec![1, 2]);
        for c in 0..2 {
            assert!(report.correct[c] <= report.total[c]);
        }
    }

    #[test]
    fn test_zero_model_predicts_first_category() {
        // 全パラメータ0ならロジットは同値で argmax は常にカテゴリ0
        let model = Model::zeros(2, 3, 3, 3);
        let data = Dataset::from_parts(vec![0, 1, 2], vec![1, 1, 1], vec![0, 1, 1]);
        let report = evaluate(&model, &data, 8).unwrap();

        assert_eq!(report.correct, vec![1, 0, 0]);
        assert_eq!(report.total, vec![1, 2, 0]);
        assert!((report.macro_accuracy() - 1.0 / 3.0).abs() < 1e-6);
        // 出現数0のカテゴリの精度は NaN（致命的エラーではない）
        assert!(report.precision(2).is_nan());
    }

    #[test]
    fn test_empty_sequence_aborts_evaluation() {
        let model = tiny_model();
        let data = Dataset::from_parts(vec![1], vec![1, 0], vec![0, 1]);
        assert!(evaluate(&model, &data, 4).is_err());
    }
}
