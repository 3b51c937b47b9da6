//! 構造化JSONログを扱うヘルパ。
//!
//! エポックごとの損失・評価指標を1行1JSONで追記する。パスに `-` を
//! 渡すと stdout へ出力する。

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::sync::Mutex;

pub struct StructuredLogger {
    to_stdout: bool,
    file: Option<Mutex<BufWriter<File>>>,
}

impl StructuredLogger {
    pub fn new(path: &str) -> std::io::Result<Self> {
        if path == "-" {
            Ok(Self {
                to_stdout: true,
                file: None,
            })
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            let f = fs::OpenOptions::new().create(true).append(true).open(path)?;
            Ok(Self {
                to_stdout: false,
                file: Some(Mutex::new(BufWriter::new(f))),
            })
        }
    }

    pub fn write_json(&self, v: &serde_json::Value) {
        if self.to_stdout {
            println!("{v}");
        } else if let Some(ref file) = self.file {
            if let Ok(mut w) = file.lock() {
                let _ = writeln!(w, "{v}");
            }
        }
    }

    /// 内部バッファを明示的に flush する。stdout モードでは何もしない。
    pub fn flush(&self) -> std::io::Result<()> {
        if let Some(ref file) = self.file {
            if let Ok(mut w) = file.lock() {
                return w.flush();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_appends_one_json_per_line() {
        let dir = std::env::temp_dir().join("textgram_logger_test");
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("metrics.jsonl");
        let path_str = path.to_str().unwrap();

        let logger = StructuredLogger::new(path_str).unwrap();
        logger.write_json(&serde_json::json!({"event": "epoch", "epoch": 1}));
        logger.write_json(&serde_json::json!({"event": "epoch", "epoch": 2}));
        logger.flush().unwrap();

        let mut text = String::new();
        File::open(&path).unwrap().read_to_string(&mut text).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(v["epoch"], 2);

        let _ = fs::remove_dir_all(&dir);
    }
}
