//! 学習全体で共有する数値定数。

/// 埋め込みテーブルの一様初期化範囲 [-EMBED_RANGE, EMBED_RANGE]
pub const EMBED_RANGE: f32 = 0.01;

/// 位置埋め込みの寄与の重み
pub const LAMBDA: f32 = 0.1;

pub const ADAM_BETA1: f32 = 0.9;
pub const ADAM_BETA2: f32 = 0.999;
pub const ADAM_EPSILON: f32 = 1e-8;
