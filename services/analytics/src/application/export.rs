/// CSVエクスポートサービス
///
/// テナントのデータセットを取得してCSVに書き出し、
/// テナントのS3バケットへアップロードする。
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{ExportDataset, ExportDate, Tenant};
use crate::infrastructure::{
    CSV_CONTENT_TYPE, ConfigError, CsvFileError, CsvFileWriter, ObjectStore, ObjectStoreError,
    TenantBuckets, Warehouse, WarehouseError,
};

/// エクスポートのエラー型
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to query {dataset:?}: {source}")]
    Query {
        dataset: ExportDataset,
        source: WarehouseError,
    },

    #[error(transparent)]
    File(#[from] CsvFileError),

    #[error("Failed to upload s3://{bucket}/{key}: {source}")]
    Upload {
        bucket: String,
        key: String,
        source: ObjectStoreError,
    },
}

/// エクスポート設定
#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// テナントごとのバケット
    pub buckets: TenantBuckets,
    /// オブジェクトキーのプレフィックス
    pub key_prefix: String,
    /// falseの場合はローカルへの書き出しのみ
    pub upload: bool,
}

/// 書き出したファイル
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    pub dataset: ExportDataset,
    /// ローカルに残したファイル（アップロード後は削除するためNone）
    pub local_path: Option<PathBuf>,
    pub rows: usize,
    /// アップロード先のキー（アップロードしない場合はNone）
    pub object_key: Option<String>,
}

/// 1テナント分のエクスポート結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantExport {
    pub tenant: Tenant,
    pub bucket: Option<String>,
    pub files: Vec<ExportedFile>,
}

impl TenantExport {
    /// レポート用の要約文
    pub fn describe(&self) -> String {
        let rows: usize = self.files.iter().map(|f| f.rows).sum();
        match &self.bucket {
            Some(bucket) => format!(
                "{} files ({} rows) uploaded to s3://{}",
                self.files.len(),
                rows,
                bucket
            ),
            None => format!("{} files ({} rows) written locally", self.files.len(), rows),
        }
    }
}

/// CSVエクスポートサービス
pub struct ExportService<W, O>
where
    W: Warehouse,
    O: ObjectStore,
{
    warehouse: W,
    store: O,
    writer: CsvFileWriter,
    settings: ExportSettings,
}

impl<W, O> ExportService<W, O>
where
    W: Warehouse,
    O: ObjectStore,
{
    pub fn new(warehouse: W, store: O, writer: CsvFileWriter, settings: ExportSettings) -> Self {
        Self {
            warehouse,
            store,
            writer,
            settings,
        }
    }

    /// 1テナント分の3データセットをエクスポートする
    ///
    /// アップロードする場合、バケット未設定ならファイルを書き出す前に失敗する。
    /// アップロードに成功したファイルはエクスポートディレクトリから削除する。
    pub async fn export_tenant(
        &self,
        tenant: Tenant,
        date: &ExportDate,
    ) -> Result<TenantExport, ExportError> {
        let bucket = if self.settings.upload {
            Some(self.settings.buckets.bucket_for(tenant)?.to_string())
        } else {
            None
        };
        let window = date.window();

        let mut files = Vec::with_capacity(ExportDataset::ALL.len());
        for dataset in ExportDataset::ALL {
            let table = self
                .warehouse
                .fetch_dataset(dataset, tenant, &window)
                .await
                .map_err(|source| ExportError::Query { dataset, source })?;

            let written = self
                .writer
                .write(&dataset.file_name(tenant, date), &table)
                .await?;

            let (object_key, local_path) = match &bucket {
                Some(bucket) => {
                    let key = dataset.object_key(&self.settings.key_prefix, tenant, date);
                    self.store
                        .put_object(bucket, &key, written.bytes, CSV_CONTENT_TYPE)
                        .await
                        .map_err(|source| ExportError::Upload {
                            bucket: bucket.clone(),
                            key: key.clone(),
                            source,
                        })?;

                    if let Err(err) = self.writer.remove(&written.path).await {
                        warn!(error = %err, "アップロード済みCSVの削除に失敗");
                    }
                    (Some(key), None)
                }
                None => (None, Some(written.path)),
            };

            files.push(ExportedFile {
                dataset,
                local_path,
                rows: written.rows,
                object_key,
            });
        }

        let export = TenantExport {
            tenant,
            bucket,
            files,
        };
        info!(tenant = %tenant, date = %date, summary = %export.describe(), "エクスポート完了");
        Ok(export)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::object_store::tests::MockObjectStore;
    use crate::infrastructure::warehouse::tests::{MockWarehouse, WarehouseCall};

    fn date() -> ExportDate {
        ExportDate::parse("2025-07-01").unwrap()
    }

    fn settings(upload: bool) -> ExportSettings {
        ExportSettings {
            buckets: TenantBuckets::parse("campus=campus-analytics,teleo=teleo-analytics")
                .unwrap(),
            key_prefix: "powerbi".to_string(),
            upload,
        }
    }

    #[tokio::test]
    async fn test_export_tenant_writes_and_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = MockWarehouse::new();
        let store = MockObjectStore::new();
        let service = ExportService::new(
            warehouse.clone(),
            store.clone(),
            CsvFileWriter::new(dir.path()),
            settings(true),
        );

        let export = service.export_tenant(Tenant::Campus, &date()).await.unwrap();

        assert_eq!(export.bucket.as_deref(), Some("campus-analytics"));
        assert_eq!(
            store.keys(),
            vec![
                "powerbi/sales-fact-2025-07-01.csv".to_string(),
                "powerbi/time-dim-2025-07-01.csv".to_string(),
                "powerbi/mart-campus-2025-07-01.csv".to_string(),
            ]
        );
        assert!(store.objects().iter().all(|o| o.bucket == "campus-analytics"));
        assert_eq!(export.files.len(), 3);
        assert!(export.files.iter().all(|f| f.local_path.is_none()));
        assert_eq!(export.files[0].rows, 1);
        assert_eq!(
            warehouse.calls(),
            ExportDataset::ALL
                .iter()
                .map(|d| WarehouseCall::FetchDataset(*d, Tenant::Campus))
                .collect::<Vec<_>>()
        );
        assert_eq!(export.describe(), "3 files (3 rows) uploaded to s3://campus-analytics");
    }

    #[tokio::test]
    async fn test_uploaded_body_matches_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockObjectStore::new();
        let service = ExportService::new(
            MockWarehouse::new(),
            store.clone(),
            CsvFileWriter::new(dir.path()),
            settings(true),
        );

        service.export_tenant(Tenant::Teleo, &date()).await.unwrap();

        let uploaded = &store.objects()[1];
        assert_eq!(
            String::from_utf8(uploaded.body.clone()).unwrap(),
            "dataset,tenant\nTimeDim,teleo\n"
        );
        assert_eq!(uploaded.content_type, CSV_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_uploaded_files_are_removed_from_export_dir() {
        let dir = tempfile::tempdir().unwrap();
        let service = ExportService::new(
            MockWarehouse::new(),
            MockObjectStore::new(),
            CsvFileWriter::new(dir.path()),
            settings(true),
        );

        service.export_tenant(Tenant::Campus, &date()).await.unwrap();
        service
            .export_tenant(Tenant::Campus, &ExportDate::parse("2025-07-02").unwrap())
            .await
            .unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = ExportService::new(
            MockWarehouse::new(),
            MockObjectStore::new().failing_bucket("campus-analytics"),
            CsvFileWriter::new(dir.path()),
            settings(true),
        );

        assert!(service.export_tenant(Tenant::Campus, &date()).await.is_err());
        assert!(dir.path().join("sales-fact-2025-07-01.csv").exists());
    }

    #[tokio::test]
    async fn test_export_without_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = MockObjectStore::new();
        let service = ExportService::new(
            MockWarehouse::new(),
            store.clone(),
            CsvFileWriter::new(dir.path()),
            settings(false),
        );

        // バケット未設定のテナントでもローカル出力はできる
        let export = service.export_tenant(Tenant::Pillars, &date()).await.unwrap();

        assert_eq!(export.bucket, None);
        assert!(export.files.iter().all(|f| f.object_key.is_none()));
        assert!(store.objects().is_empty());
        assert_eq!(
            export.files[2].local_path,
            Some(dir.path().join("mart-pillars-2025-07-01.csv"))
        );
        assert!(dir.path().join("mart-pillars-2025-07-01.csv").exists());
        assert_eq!(export.describe(), "3 files (3 rows) written locally");
    }

    #[tokio::test]
    async fn test_missing_bucket_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let warehouse = MockWarehouse::new();
        let service = ExportService::new(
            warehouse.clone(),
            MockObjectStore::new(),
            CsvFileWriter::new(dir.path()),
            settings(true),
        );

        let result = service.export_tenant(Tenant::Evntgarde, &date()).await;

        assert!(matches!(
            result,
            Err(ExportError::Config(ConfigError::MissingBucket(Tenant::Evntgarde)))
        ));
        assert!(warehouse.calls().is_empty());
    }

    #[tokio::test]
    async fn test_query_and_upload_errors() {
        let dir = tempfile::tempdir().unwrap();
        let service = ExportService::new(
            MockWarehouse::new().failing_dataset(ExportDataset::TimeDim, Tenant::Campus),
            MockObjectStore::new(),
            CsvFileWriter::new(dir.path()),
            settings(true),
        );
        match service.export_tenant(Tenant::Campus, &date()).await {
            Err(ExportError::Query { dataset, .. }) => assert_eq!(dataset, ExportDataset::TimeDim),
            other => panic!("Expected Query error, got {:?}", other),
        }

        let service = ExportService::new(
            MockWarehouse::new(),
            MockObjectStore::new().failing_bucket("teleo-analytics"),
            CsvFileWriter::new(dir.path()),
            settings(true),
        );
        let error = service
            .export_tenant(Tenant::Teleo, &date())
            .await
            .unwrap_err();
        assert!(
            error
                .to_string()
                .starts_with("Failed to upload s3://teleo-analytics/powerbi/sales-fact-2025-07-01.csv")
        );
    }
}
