//! S3アップロードモジュール
//!
//! エクスポートしたCSVをテナントのS3バケットへ配置する。

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use tracing::{info, warn};

/// CSVのContent-Type
pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

/// アップロードのエラー型
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// AWS SDK エラー
    #[error("AWS S3 APIエラー: {0}")]
    AwsSdkError(String),
}

/// オブジェクト配置トレイト（テスト用の抽象化）
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// オブジェクトを配置する（同じキーは上書き）
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;
}

/// AWS S3 SDKを使用した実装
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let size = body.len();

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                warn!(bucket = %bucket, key = %key, error = %err, "S3アップロード失敗");
                ObjectStoreError::AwsSdkError(err.to_string())
            })?;

        info!(bucket = %bucket, key = %key, size, "S3アップロード完了");
        Ok(())
    }
}
