/// ETLサービス
///
/// 1日分のOLTPトランザクションを読み込み、スタースキーマへ変換してロードする。
/// ロードは冪等で、同じ日付を再実行しても既存行は増えない。
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::domain::{ExportWindow, StarBatch};
use crate::infrastructure::{SourceError, TransactionSource, Warehouse, WarehouseError};

/// ETLのエラー型
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("Extract failed: {0}")]
    Extract(#[from] SourceError),

    #[error("Load failed: {0}")]
    Load(#[from] WarehouseError),
}

/// ETL結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EtlSummary {
    /// 読み込んだ行数
    pub extracted: usize,
    /// ウィンドウ外・重複として除外した行数
    pub skipped: usize,
    /// 新規挿入したディメンション行数
    pub dimension_rows_inserted: u64,
    /// 新規挿入したファクト行数
    pub fact_rows_inserted: u64,
}

impl EtlSummary {
    /// レポート用の要約文
    pub fn describe(&self) -> String {
        format!(
            "extracted {} rows ({} skipped), inserted {} dimension rows and {} fact rows",
            self.extracted, self.skipped, self.dimension_rows_inserted, self.fact_rows_inserted
        )
    }
}

/// ETLサービス
pub struct EtlService<S, W>
where
    S: TransactionSource,
    W: Warehouse,
{
    source: S,
    warehouse: W,
}

impl<S, W> EtlService<S, W>
where
    S: TransactionSource,
    W: Warehouse,
{
    pub fn new(source: S, warehouse: W) -> Self {
        Self { source, warehouse }
    }

    /// ウィンドウ分のETLを実行する
    ///
    /// 対象行がない場合はロードを行わない。
    pub async fn run(&self, window: &ExportWindow) -> Result<EtlSummary, EtlError> {
        info!(start = %window.start, end = %window.end, "ETL開始");

        let transactions = self.source.fetch_window(window).await?;
        let batch = StarBatch::from_transactions(&transactions, window);

        let mut summary = EtlSummary {
            extracted: transactions.len(),
            skipped: batch.skipped,
            ..Default::default()
        };

        if batch.is_empty() {
            info!(extracted = summary.extracted, "ロード対象なし");
            return Ok(summary);
        }

        let report = self.warehouse.load_batch(&batch).await?;
        summary.dimension_rows_inserted = report.dimension_rows_inserted;
        summary.fact_rows_inserted = report.fact_rows_inserted;

        info!(
            extracted = summary.extracted,
            skipped = summary.skipped,
            dimension_rows_inserted = summary.dimension_rows_inserted,
            fact_rows_inserted = summary.fact_rows_inserted,
            "ETL完了"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExportDate;
    use crate::domain::star_schema::tests::{at, transaction};
    use crate::infrastructure::transaction_source::tests::MockTransactionSource;
    use crate::infrastructure::warehouse::tests::{MockWarehouse, WarehouseCall};

    fn window() -> ExportWindow {
        ExportDate::parse("2025-07-01").unwrap().window()
    }

    #[tokio::test]
    async fn test_run_loads_window_rows() {
        let source = MockTransactionSource::new(vec![
            transaction(10, at("2025-07-01", (8, 0, 0), 0)),
            transaction(11, at("2025-07-01", (9, 0, 0), 0)),
            transaction(12, at("2025-07-02", (0, 0, 0), 0)),
        ]);
        let warehouse = MockWarehouse::new();
        let service = EtlService::new(source.clone(), warehouse.clone());

        let summary = service.run(&window()).await.unwrap();

        assert_eq!(summary.extracted, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.fact_rows_inserted, 2);
        assert_eq!(source.requested_windows(), vec![window()]);
        assert_eq!(warehouse.calls(), vec![WarehouseCall::LoadBatch { facts: 2 }]);
    }

    #[tokio::test]
    async fn test_run_twice_is_idempotent() {
        let source = MockTransactionSource::new(vec![transaction(
            1,
            at("2025-07-01", (12, 0, 0), 0),
        )]);
        let warehouse = MockWarehouse::new();
        let service = EtlService::new(source, warehouse.clone());

        let first = service.run(&window()).await.unwrap();
        let second = service.run(&window()).await.unwrap();

        assert_eq!(first.fact_rows_inserted, 1);
        assert_eq!(second.fact_rows_inserted, 0);
        assert_eq!(second.dimension_rows_inserted, 0);
        assert_eq!(warehouse.loaded_log_ids(), vec![1]);
    }

    #[tokio::test]
    async fn test_run_without_rows_skips_load() {
        let warehouse = MockWarehouse::new();
        let service = EtlService::new(MockTransactionSource::new(vec![]), warehouse.clone());

        let summary = service.run(&window()).await.unwrap();

        assert_eq!(summary, EtlSummary::default());
        assert!(warehouse.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_propagates_errors() {
        let service = EtlService::new(MockTransactionSource::failing(), MockWarehouse::new());
        assert!(matches!(
            service.run(&window()).await,
            Err(EtlError::Extract(_))
        ));

        let service = EtlService::new(
            MockTransactionSource::new(vec![transaction(1, at("2025-07-01", (1, 0, 0), 0))]),
            MockWarehouse::new().failing_load(),
        );
        assert!(matches!(service.run(&window()).await, Err(EtlError::Load(_))));
    }

    #[test]
    fn test_describe() {
        let summary = EtlSummary {
            extracted: 5,
            skipped: 1,
            dimension_rows_inserted: 7,
            fact_rows_inserted: 4,
        };
        assert_eq!(
            summary.describe(),
            "extracted 5 rows (1 skipped), inserted 7 dimension rows and 4 fact rows"
        );
    }
}
