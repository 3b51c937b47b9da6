//! 学習済み単語埋め込みのエクスポート
//!
//! word_orig テーブルの先頭 n 行を、1行1ベクトルの空白区切りテキストで書き出す。

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::model::{row, Model};

/// 先頭 `n` 行の単語埋め込みを書き出す。`n == 0` は全語彙を意味する。
pub fn export_embeddings(model: &Model, path: &Path, n: usize) -> std::io::Result<()> {
    let n = if n == 0 { model.vocab } else { n.min(model.vocab) };
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    for i in 0..n {
        let embedding = row(&model.word_orig, model.em_dim, i);
        for (j, value) in embedding.iter().enumerate() {
            if j + 1 == model.em_dim {
                writeln!(writer, "{value:.8}")?;
            } else {
                write!(writer, "{value:.8} ")?;
            }
        }
    }
    writer.flush()
}
