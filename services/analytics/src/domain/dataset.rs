/// エクスポートデータセットとCSVテーブル
///
/// Power BIはNeonDBに直接接続できないため、テナントごとに
/// 以下のデータセットをCSVとしてS3へ配置する。
/// - sales-fact-YYYY-MM-DD.csv: テナント分のファクト行
/// - time-dim-YYYY-MM-DD.csv: 対象日の時間ディメンション
/// - mart-<tenant>-YYYY-MM-DD.csv: テナントのデータマート
use serde::Serialize;
use thiserror::Error;

use super::export_date::ExportDate;
use super::tenant::Tenant;

/// CSV生成のエラー型
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("CSV書き出しエラー: {0}")]
    Write(String),

    #[error("列数が一致しません: 行 {row} は {actual} 列（ヘッダーは {expected} 列）")]
    ColumnMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// テナントごとにエクスポートするデータセット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportDataset {
    /// ファクトテーブル（テナント分のみ）
    SalesFact,
    /// 時間ディメンション（対象日分）
    TimeDim,
    /// テナントのデータマート
    Mart,
}

impl ExportDataset {
    /// エクスポート順
    pub const ALL: [ExportDataset; 3] = [
        ExportDataset::SalesFact,
        ExportDataset::TimeDim,
        ExportDataset::Mart,
    ];

    /// 日付付きのCSVファイル名
    pub fn file_name(&self, tenant: Tenant, date: &ExportDate) -> String {
        match self {
            ExportDataset::SalesFact => format!("sales-fact-{}.csv", date),
            ExportDataset::TimeDim => format!("time-dim-{}.csv", date),
            ExportDataset::Mart => format!("mart-{}-{}.csv", tenant.code(), date),
        }
    }

    /// S3オブジェクトキー（プレフィックス + ファイル名）
    ///
    /// プレフィックスが空でなく`/`で終わらない場合は区切りを補う。
    pub fn object_key(&self, prefix: &str, tenant: Tenant, date: &ExportDate) -> String {
        let file_name = self.file_name(tenant, date);
        let prefix = prefix.trim_start_matches('/');
        if prefix.is_empty() {
            file_name
        } else if prefix.ends_with('/') {
            format!("{}{}", prefix, file_name)
        } else {
            format!("{}/{}", prefix, file_name)
        }
    }
}

/// クエリ結果をそのままCSVにするためのテーブル
///
/// すべてのセルはテキストとして保持し、NULLは`None`で表す。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CsvTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) {
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// ヘッダー行付きのCSVバイト列を生成する（NULLは空フィールド）
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, CsvError> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        writer
            .write_record(&self.headers)
            .map_err(|e| CsvError::Write(e.to_string()))?;

        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != self.headers.len() {
                return Err(CsvError::ColumnMismatch {
                    row: index,
                    expected: self.headers.len(),
                    actual: row.len(),
                });
            }
            writer
                .write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))
                .map_err(|e| CsvError::Write(e.to_string()))?;
        }

        writer
            .into_inner()
            .map_err(|e| CsvError::Write(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> ExportDate {
        ExportDate::parse("2025-07-01").unwrap()
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            ExportDataset::SalesFact.file_name(Tenant::Campus, &date()),
            "sales-fact-2025-07-01.csv"
        );
        assert_eq!(
            ExportDataset::TimeDim.file_name(Tenant::Campus, &date()),
            "time-dim-2025-07-01.csv"
        );
        assert_eq!(
            ExportDataset::Mart.file_name(Tenant::Evntgarde, &date()),
            "mart-evntgarde-2025-07-01.csv"
        );
    }

    #[test]
    fn test_object_key_prefix_handling() {
        let mart = ExportDataset::Mart;
        assert_eq!(
            mart.object_key("", Tenant::Teleo, &date()),
            "mart-teleo-2025-07-01.csv"
        );
        assert_eq!(
            mart.object_key("powerbi", Tenant::Teleo, &date()),
            "powerbi/mart-teleo-2025-07-01.csv"
        );
        assert_eq!(
            mart.object_key("/powerbi/daily/", Tenant::Teleo, &date()),
            "powerbi/daily/mart-teleo-2025-07-01.csv"
        );
    }

    #[test]
    fn test_to_csv_bytes_with_nulls_and_quoting() {
        let mut table = CsvTable::new(vec!["log_id".to_string(), "request_body".to_string()]);
        table.push_row(vec![Some("1".to_string()), Some("{\"a\":1, \"b\":2}".to_string())]);
        table.push_row(vec![Some("2".to_string()), None]);

        let csv = String::from_utf8(table.to_csv_bytes().unwrap()).unwrap();

        assert_eq!(
            csv,
            "log_id,request_body\n1,\"{\"\"a\"\":1, \"\"b\"\":2}\"\n2,\n"
        );
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_to_csv_bytes_header_only() {
        let table = CsvTable::new(vec!["time_id".to_string(), "timestamp".to_string()]);
        let csv = String::from_utf8(table.to_csv_bytes().unwrap()).unwrap();
        assert_eq!(csv, "time_id,timestamp\n");
    }

    #[test]
    fn test_to_csv_bytes_column_mismatch() {
        let mut table = CsvTable::new(vec!["a".to_string(), "b".to_string()]);
        table.push_row(vec![Some("1".to_string())]);

        match table.to_csv_bytes() {
            Err(CsvError::ColumnMismatch {
                row,
                expected,
                actual,
            }) => {
                assert_eq!((row, expected, actual), (0, 2, 1));
            }
            other => panic!("Expected ColumnMismatch, got {:?}", other),
        }
    }
}
