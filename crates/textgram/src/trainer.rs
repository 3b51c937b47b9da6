//! 学習ループ
//!
//! 1バッチは4つのフェーズからなる:
//!   1. 並列: バッチ位置ごとのスロットで forward / backward
//!   2. 直列: サンプル単位勾配を共有バッファへ合算（疎ルーティング込み）
//!   3. 並列+直列: Adam ステップ（密は並列、埋め込み行は直列）
//!   4. 減衰カウンタを1つ進める
//!
//! サンプルの巡回順はエポックごとにシャッフルされる。シードが同じなら
//! 実行順も勾配合算順も固定なので、結果は再現可能。

use std::time::Instant;

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::accumulate::GradAccumulator;
use crate::config::TrainConfig;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::eval::{evaluate, log_report};
use crate::features::{forward, SampleSlot};
use crate::gradient::backward;
use crate::logging::StructuredLogger;
use crate::model::Model;
use crate::optimizer::AdamState;

pub struct Trainer {
    config: TrainConfig,
    pub model: Model,
    rng: StdRng,
}

impl Trainer {
    /// モデルを初期化して学習器を作る
    ///
    /// `max_len` は学習・検証・テストを通した最大系列長。位置テーブルの
    /// 行数になるため、どの分割の系列でも forward が範囲内に収まる。
    pub fn new(config: TrainConfig, max_len: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let model = Model::init_random(
            config.em_dim,
            config.vocab,
            config.categories,
            max_len,
            &mut rng,
        );
        Self { config, model, rng }
    }

    /// 全エポックを回し、エポックごとの平均損失を返す
    pub fn train(
        &mut self,
        train_data: &Dataset,
        vali_data: Option<&Dataset>,
        metrics: Option<&StructuredLogger>,
    ) -> Result<Vec<f32>> {
        let batch = self.config.batch_size;
        let mut slots: Vec<SampleSlot> = (0..batch)
            .map(|_| SampleSlot::new(self.model.em_dim, self.model.categories))
            .collect();
        let mut acc = GradAccumulator::new(&self.model);
        let mut adam = AdamState::new(&self.model, self.config.learning_rate);

        let mut order: Vec<usize> = (0..train_data.len()).collect();
        let mut losses = Vec::with_capacity(self.config.epochs);

        for epoch in 0..self.config.epochs {
            let start = Instant::now();
            order.shuffle(&mut self.rng);
            let mut epoch_loss = 0.0f64;

            for chunk in order.chunks(batch) {
                let n = chunk.len();

                let model = &self.model;
                slots[..n]
                    .par_iter_mut()
                    .zip_eq(chunk.par_iter())
                    .try_for_each(|(slot, &seq_id)| -> Result<()> {
                        forward(model, train_data, seq_id, slot)?;
                        backward(model, train_data.label(seq_id), slot);
                        Ok(())
                    })?;

                for slot in &slots[..n] {
                    epoch_loss += slot.loss as f64;
                }

                // 端数バッチでも設定上のバッチサイズで割る
                acc.accumulate(train_data, &slots[..n], batch);
                adam.step(&mut self.model, &mut acc);
            }

            let avg_loss = (epoch_loss / train_data.len() as f64) as f32;
            losses.push(avg_loss);
            let elapsed = start.elapsed();
            info!(
                "epoch {}/{}: loss {:.6} ({:.2}s)",
                epoch + 1,
                self.config.epochs,
                avg_loss,
                elapsed.as_secs_f64()
            );
            if let Some(metrics) = metrics {
                metrics.write_json(&serde_json::json!({
                    "event": "epoch",
                    "epoch": epoch + 1,
                    "loss": avg_loss,
                    "elapsed_sec": elapsed.as_secs_f64(),
                }));
            }

            if let Some(vali) = vali_data {
                let report = evaluate(&self.model, vali, batch)?;
                log_report(&report, "validation");
                if let Some(metrics) = metrics {
                    metrics.write_json(&serde_json::json!({
                        "event": "validation",
                        "epoch": epoch + 1,
                        "samples": report.evaluated(),
                        "accuracy": report.macro_accuracy(),
                    }));
                }
            }
        }

        Ok(losses)
    }
}
