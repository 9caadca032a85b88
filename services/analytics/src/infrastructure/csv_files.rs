/// CSVファイル出力
///
/// Lambdaでは`/tmp`のみ書き込み可能なため、アップロード前に
/// エクスポートディレクトリへCSVを書き出す。
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::domain::{CsvError, CsvTable};

/// ファイル出力のエラー型
#[derive(Debug, Error)]
pub enum CsvFileError {
    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error("Failed to write {path}: {reason}")]
    Io { path: String, reason: String },
}

/// 書き出したCSVファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: Vec<u8>,
}

/// エクスポートディレクトリへのCSV書き出し
#[derive(Debug, Clone)]
pub struct CsvFileWriter {
    dir: PathBuf,
}

impl CsvFileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// テーブルを`<dir>/<file_name>`へ書き出す（既存ファイルは上書き）
    pub async fn write(&self, file_name: &str, table: &CsvTable) -> Result<WrittenFile, CsvFileError> {
        let bytes = table.to_csv_bytes()?;
        let path = self.dir.join(file_name);
        let io_err = |e: std::io::Error| CsvFileError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        tokio::fs::write(&path, &bytes).await.map_err(io_err)?;

        debug!(path = %path.display(), rows = table.row_count(), "CSV書き出し完了");

        Ok(WrittenFile {
            path,
            rows: table.row_count(),
            bytes,
        })
    }

    /// 書き出したファイルを削除する（存在しなければ何もしない）
    pub async fn remove(&self, path: &Path) -> Result<(), CsvFileError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "CSV削除完了");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CsvFileError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
