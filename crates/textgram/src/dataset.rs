//! 学習データの読み込み
//!
//! 1行 = `カテゴリ,<token_id> <token_id> ...`。読み込んだ系列は
//! flat なトークン配列 + 長さ + 開始オフセット（CSR 形式）で保持する。
//! 語彙上限以上のトークンは捨てる（エラーではない）。捨てた結果
//! 空になった行はデータセットに載せず ignored として数える。

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;

use crate::error::{Result, TrainError};

/// トークン系列の集合（読み込み後は不変、スレッド間共有可）
pub struct Dataset {
    tokens: Vec<u32>,
    lens: Vec<usize>,
    labels: Vec<usize>,
    starts: Vec<usize>,
    ignored: usize,
}

impl Dataset {
    /// ファイルから読み込む
    pub fn load(path: &Path, vocab_limit: usize, categories: usize) -> Result<Self> {
        let source = path.display().to_string();
        let file = File::open(path)?;
        let data = Self::from_reader(BufReader::new(file), vocab_limit, categories, &source)?;
        info!(
            "loaded {}: {} sequences, {} tokens, {} ignored lines",
            source,
            data.len(),
            data.token_count(),
            data.ignored()
        );
        Ok(data)
    }

    /// 任意のリーダーからパースする
    pub fn from_reader<R: BufRead>(
        reader: R,
        vocab_limit: usize,
        categories: usize,
        source: &str,
    ) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut lens = Vec::new();
        let mut labels = Vec::new();
        let mut ignored = 0;

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                ignored += 1;
                continue;
            }

            let (cat_field, rest) = line.split_once(',').ok_or_else(|| {
                TrainError::corpus(source, line_no, "missing category separator")
            })?;
            let label: usize = cat_field.trim().parse().map_err(|_| {
                TrainError::corpus(source, line_no, "malformed category field")
            })?;
            if label >= categories {
                return Err(TrainError::corpus(
                    source,
                    line_no,
                    format!("category {label} out of range (categories={categories})"),
                ));
            }

            let before = tokens.len();
            for field in rest.split_whitespace() {
                let id: usize = field.parse().map_err(|_| {
                    TrainError::corpus(source, line_no, "malformed token field")
                })?;
                if id < vocab_limit {
                    tokens.push(id as u32);
                }
            }

            let len = tokens.len() - before;
            if len == 0 {
                ignored += 1;
                continue;
            }
            lens.push(len);
            labels.push(label);
        }

        Ok(Self::build(tokens, lens, labels, ignored))
    }

    /// すでにトークン化済みのデータから構築する（テスト・合成コーパス用）
    pub fn from_parts(tokens: Vec<u32>, lens: Vec<usize>, labels: Vec<usize>) -> Self {
        assert_eq!(lens.len(), labels.len());
        assert_eq!(lens.iter().sum::<usize>(), tokens.len());
        Self::build(tokens, lens, labels, 0)
    }

    fn build(tokens: Vec<u32>, lens: Vec<usize>, labels: Vec<usize>, ignored: usize) -> Self {
        // 開始オフセット = 長さの前置和
        let mut starts = Vec::with_capacity(lens.len());
        let mut offset = 0;
        for &len in &lens {
            starts.push(offset);
            offset += len;
        }
        Self {
            tokens,
            lens,
            labels,
            starts,
            ignored,
        }
    }

    /// 系列数
    pub fn len(&self) -> usize {
        self.lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lens.is_empty()
    }

    /// i 番目の系列のトークン列
    pub fn tokens(&self, i: usize) -> &[u32] {
        &self.tokens[self.starts[i]..self.starts[i] + self.lens[i]]
    }

    /// i 番目の系列のラベル
    pub fn label(&self, i: usize) -> usize {
        self.labels[i]
    }

    pub fn seq_len(&self, i: usize) -> usize {
        self.lens[i]
    }

    /// 全系列中の最大長（位置テーブルの行数を決める）
    pub fn max_len(&self) -> usize {
        self.lens.iter().copied().max().unwrap_or(0)
    }

    /// 保持しているトークン総数
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// パース時に捨てた行数
    pub fn ignored(&self) -> usize {
        self.ignored
    }
}
